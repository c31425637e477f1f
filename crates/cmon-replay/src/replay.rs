use crate::fixture::Fixture;
use cmon_core::sse::{DecodeReport, SseEvent, SseFrameDecoder, DEFAULT_MAX_BUFFER_BYTES};
use cmon_core::{drain_pages, parse_live_event, FetchError, LiveEvent, Page};
use cmon_messages::{FlushOutcome, MessageFeed, MessageFeedConfig};
use cmon_reconcile::{
    apply_runs_snapshot, apply_tasks_snapshot, message_fallback_refetch_interval, project_tree,
    runs_flat_refetch_interval, store_messages, ConnectionState, LiveRefreshConfig,
    LiveRunRefresh, MemoryCache, QueryCache, QueryKey, RunList, Selection, StreamHealth,
};
use cmon_tree::Tree;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub selection: Selection,
    pub limit: Option<usize>,
    pub page_size: usize,
    pub max_buffer_bytes: usize,
    pub refresh: LiveRefreshConfig,
    pub feed: MessageFeedConfig,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            selection: Selection::default(),
            limit: None,
            page_size: 200,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            refresh: LiveRefreshConfig::default(),
            feed: MessageFeedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub chunks: usize,
    pub frames: usize,
    pub frame_errors: usize,
    pub dropped_events: usize,
    pub status_events: usize,
    pub log_events: usize,
    pub messages_queued: usize,
    pub messages_ignored: usize,
    pub refresh_batches: usize,
    pub message_flushes: usize,
}

/// What one timer pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub invalidated: Vec<QueryKey>,
    pub messages: Option<usize>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.invalidated.is_empty() && self.messages.is_none()
    }
}

/// Polling cadence the dashboard would use for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPlan {
    pub connection: ConnectionState,
    pub runs_flat: Duration,
    pub messages: Option<Duration>,
}

/// Drives the reconciliation engine from recorded data: snapshots seed the
/// cache, stream bytes go through the frame decoder, and the caller advances
/// time with `tick`.
pub struct ReplayEngine {
    cache: MemoryCache,
    selection: Selection,
    limit: Option<usize>,
    page_size: usize,
    refresh: LiveRunRefresh,
    feed: MessageFeed,
    decoder: SseFrameDecoder,
    health: StreamHealth,
    stats: ReplayStats,
}

impl ReplayEngine {
    pub fn new(settings: ReplaySettings) -> Self {
        Self {
            cache: MemoryCache::new(),
            refresh: LiveRunRefresh::new(settings.refresh, settings.selection.clone()),
            selection: settings.selection,
            limit: settings.limit.filter(|limit| *limit > 0),
            page_size: settings.page_size.max(1),
            feed: MessageFeed::new(settings.feed),
            decoder: SseFrameDecoder::new(settings.max_buffer_bytes),
            health: StreamHealth::default(),
            stats: ReplayStats::default(),
        }
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    pub fn connection(&self) -> ConnectionState {
        self.health.state()
    }

    /// Loads the fixture snapshots the way the dashboard's initial queries
    /// would: tasks, then the paged run listing, then the message history.
    pub fn seed(&mut self, fixture: &Fixture) -> Result<(), FetchError> {
        let Some(project_id) = self.selection.project_id().map(str::to_string) else {
            debug!(event = "replay_seed_skipped", reason = "no_project");
            return Ok(());
        };

        let tasks = fixture
            .tasks
            .iter()
            .filter(|task| task.project_id.as_deref().map_or(true, |id| id == project_id))
            .cloned()
            .collect();
        let tasks = apply_tasks_snapshot(&mut self.cache, &project_id, tasks);

        let runs = drain_pages(
            |offset, limit| Ok(page_of(&fixture.runs, offset, limit)),
            self.page_size,
        )?;
        let runs = apply_runs_snapshot(&mut self.cache, &self.selection, self.limit, runs)
            .unwrap_or_default();

        let messages: Vec<_> = fixture
            .messages
            .iter()
            .filter(|message| message.project_ref().map_or(true, |id| id == project_id))
            .cloned()
            .collect();
        self.feed.hydrate(&messages);
        store_messages(&mut self.cache, &messages_key(&project_id), self.feed.messages());

        self.health.connecting();
        info!(
            event = "replay_seeded",
            project_id = %project_id,
            tasks = tasks.len(),
            runs = runs.len(),
            messages = self.feed.messages().len(),
        );
        Ok(())
    }

    /// Feeds one chunk of stream bytes; returns how many frames it completed.
    pub fn push_chunk(&mut self, chunk: &[u8], now: Instant) -> usize {
        if self.health.state() != ConnectionState::Open {
            self.health.opened();
        }
        self.stats.chunks += 1;
        let report = self.decoder.push_chunk(chunk);
        self.handle_report(report, now)
    }

    /// Ends the stream: dispatches any trailing frame and marks the
    /// connection as dropped.
    pub fn finish(&mut self, now: Instant) -> usize {
        let report = self.decoder.finish();
        let frames = self.handle_report(report, now);
        self.health.failed("end_of_stream");
        frames
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.refresh.next_deadline(), self.feed.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn tick(&mut self, now: Instant) -> TickReport {
        let invalidated = self.refresh.flush_due(&mut self.cache, now);
        let outcome = self.feed.flush_due(now);
        self.record(invalidated, outcome)
    }

    /// Flushes everything still pending regardless of deadlines.
    pub fn drain(&mut self) -> TickReport {
        let invalidated = self.refresh.flush(&mut self.cache);
        let outcome = self.feed.flush();
        self.record(invalidated, outcome)
    }

    pub fn tree(&self) -> Option<Tree> {
        project_tree(&self.cache, &self.selection, self.limit)
    }

    pub fn poll_plan(&self) -> PollPlan {
        let connection = self.health.state();
        let runs: Option<RunList> = self
            .selection
            .project_id()
            .and_then(|project_id| self.cache.get(&QueryKey::runs_flat(project_id)));
        PollPlan {
            connection,
            runs_flat: runs_flat_refetch_interval(
                runs.as_ref().map(|runs| runs.as_slice()),
                Some(connection),
            ),
            messages: message_fallback_refetch_interval(Some(connection)),
        }
    }

    fn handle_report(&mut self, report: DecodeReport, now: Instant) -> usize {
        for err in &report.errors {
            self.stats.frame_errors += 1;
            warn!(event = "live_stream_frame_error", error = %err);
        }
        let frames = report.events.len();
        for frame in report.events {
            self.dispatch(frame, now);
        }
        frames
    }

    fn dispatch(&mut self, frame: SseEvent, now: Instant) {
        self.stats.frames += 1;
        let event = match parse_live_event(&frame.event, &frame.data) {
            Ok(event) => event,
            Err(err) => {
                self.stats.dropped_events += 1;
                debug!(event = "live_event_dropped", name = %frame.event, error = %err);
                return;
            }
        };
        match event {
            LiveEvent::Message(message) => {
                let Some(project_id) = self.selection.project_id() else {
                    self.stats.messages_ignored += 1;
                    return;
                };
                if message.project_ref().is_some_and(|id| id != project_id) {
                    self.stats.messages_ignored += 1;
                    debug!(
                        event = "live_message_ignored",
                        msg_id = %message.msg_id,
                        project_id = message.project_ref().unwrap_or_default(),
                    );
                    return;
                }
                self.stats.messages_queued += 1;
                self.feed.queue(*message, now);
            }
            other => {
                match &other {
                    LiveEvent::Status(_) => self.stats.status_events += 1,
                    LiveEvent::Log(_) => self.stats.log_events += 1,
                    LiveEvent::Message(_) => {}
                }
                self.refresh.on_event(&mut self.cache, &other, now);
            }
        }
    }

    fn record(&mut self, invalidated: Vec<QueryKey>, outcome: FlushOutcome) -> TickReport {
        // Keys reach callers through the tick report.
        self.cache.take_invalidations();
        if !invalidated.is_empty() {
            self.stats.refresh_batches += 1;
        }
        let messages = match outcome {
            FlushOutcome::Unchanged => None,
            FlushOutcome::Updated(list) => {
                self.stats.message_flushes += 1;
                if let Some(project_id) = self.selection.project_id() {
                    store_messages(&mut self.cache, &messages_key(project_id), &list);
                }
                Some(list.len())
            }
        };
        TickReport {
            invalidated,
            messages,
        }
    }
}

fn messages_key(project_id: &str) -> QueryKey {
    QueryKey::ProjectMessages {
        project_id: project_id.to_string(),
    }
}

/// Serves one `offset`/`limit` window of a recorded listing.
fn page_of<T: Clone>(items: &[T], offset: usize, limit: usize) -> Page<T> {
    let end = offset.saturating_add(limit).min(items.len());
    let window = items.get(offset..end).unwrap_or_default().to_vec();
    Page {
        items: window,
        total: items.len() as u64,
        limit,
        offset,
        has_more: end < items.len(),
    }
}
