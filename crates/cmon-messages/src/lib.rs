//! Bounded, recency-ordered message working set.
//!
//! Lists are shared as `Arc`s and every operation that finds nothing to
//! change hands back the list it was given, so callers can compare with
//! `Arc::ptr_eq` instead of walking the contents.

use cmon_core::BusMessage;
use std::sync::Arc;

mod feed;
mod store;

pub use feed::{filter_messages, FlushOutcome, MessageFeed, MessageFeedConfig, MessageFilter};
pub use store::{merge_messages_by_id, upsert_message_batch, upsert_message_by_id};

pub const DEFAULT_MAX_MESSAGES: usize = 1500;

/// Newest first. Unrelated entries keep their `Arc` across merges.
pub type MessageList = Arc<Vec<Arc<BusMessage>>>;

pub fn message_list<I>(messages: I) -> MessageList
where
    I: IntoIterator<Item = BusMessage>,
{
    Arc::new(messages.into_iter().map(Arc::new).collect())
}
