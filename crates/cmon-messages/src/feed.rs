use crate::{merge_messages_by_id, upsert_message_batch, MessageList, DEFAULT_MAX_MESSAGES};
use cmon_core::BusMessage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFeedConfig {
    pub batch_window: Duration,
    pub max_messages: usize,
}

impl Default for MessageFeedConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(120),
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was due, or the batch changed nothing.
    Unchanged,
    Updated(MessageList),
}

/// Live message feed: stream arrivals are held for one batch window and then
/// applied in a single upsert.
#[derive(Debug, Clone)]
pub struct MessageFeed {
    config: MessageFeedConfig,
    messages: MessageList,
    pending: Vec<Arc<BusMessage>>,
    flush_at: Option<Instant>,
}

impl MessageFeed {
    pub fn new(config: MessageFeedConfig) -> Self {
        Self {
            config,
            messages: Arc::new(Vec::new()),
            pending: Vec::new(),
            flush_at: None,
        }
    }

    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    /// Queues a stream message. The first message of a batch arms the window.
    pub fn queue(&mut self, message: BusMessage, now: Instant) -> Instant {
        self.pending.push(Arc::new(message));
        *self
            .flush_at
            .get_or_insert_with(|| now + self.config.batch_window)
    }

    /// Applies the pending batch if its window has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> FlushOutcome {
        match self.flush_at {
            Some(due) if due <= now => self.flush(),
            _ => FlushOutcome::Unchanged,
        }
    }

    pub fn flush(&mut self) -> FlushOutcome {
        self.flush_at = None;
        if self.pending.is_empty() {
            return FlushOutcome::Unchanged;
        }
        let batch = std::mem::take(&mut self.pending);
        let next = upsert_message_batch(&self.messages, &batch, self.config.max_messages);
        debug!(
            event = "message_feed_flush",
            batch = batch.len(),
            changed = !Arc::ptr_eq(&next, &self.messages),
        );
        self.replace(next)
    }

    /// Merges a fetched snapshot. Pending stream messages are dropped; the
    /// snapshot supersedes them.
    pub fn hydrate(&mut self, snapshot: &[BusMessage]) -> FlushOutcome {
        self.clear_pending();
        let incoming: Vec<Arc<BusMessage>> = snapshot.iter().cloned().map(Arc::new).collect();
        let next = merge_messages_by_id(&self.messages, &incoming, self.config.max_messages);
        self.replace(next)
    }

    /// Replaces the working set wholesale, e.g. after a scope change.
    pub fn reset(&mut self) {
        self.clear_pending();
        self.messages = Arc::new(Vec::new());
    }

    pub fn teardown(&mut self) {
        self.clear_pending();
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.flush_at = None;
    }

    fn replace(&mut self, next: MessageList) -> FlushOutcome {
        if Arc::ptr_eq(&next, &self.messages) {
            return FlushOutcome::Unchanged;
        }
        self.messages = Arc::clone(&next);
        FlushOutcome::Updated(next)
    }
}

impl Default for MessageFeed {
    fn default() -> Self {
        Self::new(MessageFeedConfig::default())
    }
}

/// Text and type filter applied to the working set for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub text: String,
    pub kind: String,
}

impl MessageFilter {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.kind.trim().is_empty()
    }
}

/// Returns `messages` itself when the filter is empty.
pub fn filter_messages(messages: &MessageList, filter: &MessageFilter) -> MessageList {
    if filter.is_empty() {
        return Arc::clone(messages);
    }
    let text = filter.text.trim().to_lowercase();
    let kind = filter.kind.trim().to_lowercase();
    let matched = messages
        .iter()
        .filter(|message| kind.is_empty() || message.kind.to_lowercase() == kind)
        .filter(|message| {
            if text.is_empty() {
                return true;
            }
            let haystack = [
                message.body.as_str(),
                message.msg_id.as_str(),
                message.kind.as_str(),
                message.project_ref().unwrap_or_default(),
                message.task_ref().unwrap_or_default(),
                message.run_id.as_deref().unwrap_or_default(),
            ]
            .join("\n")
            .to_lowercase();
            haystack.contains(&text)
        })
        .cloned()
        .collect();
    Arc::new(matched)
}
