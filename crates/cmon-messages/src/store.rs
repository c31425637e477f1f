use crate::MessageList;
use cmon_core::BusMessage;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergePath {
    Linear,
    Sorted,
}

/// Recency order: newer timestamp first, then the larger id.
fn by_recency(a: &BusMessage, b: &BusMessage) -> Ordering {
    b.timestamp_millis()
        .cmp(&a.timestamp_millis())
        .then_with(|| b.msg_id.cmp(&a.msg_id))
}

fn comes_before(candidate: &BusMessage, current: &BusMessage) -> bool {
    by_recency(candidate, current) == Ordering::Less
}

fn same_payload(a: &Arc<BusMessage>, b: &Arc<BusMessage>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

/// Newer wins; a timestamp tie replaces only when the payload changed.
fn should_replace(current: &Arc<BusMessage>, next: &Arc<BusMessage>) -> bool {
    match next.timestamp_millis().cmp(&current.timestamp_millis()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => !same_payload(current, next),
    }
}

fn same_sequence(a: &[Arc<BusMessage>], b: &[Arc<BusMessage>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(left, right)| same_payload(left, right))
}

fn is_recency_ordered(messages: &[Arc<BusMessage>]) -> bool {
    messages
        .windows(2)
        .all(|pair| !comes_before(&pair[1], &pair[0]))
}

fn trim(messages: &mut Vec<Arc<BusMessage>>, max_messages: usize) {
    if max_messages > 0 && messages.len() > max_messages {
        messages.truncate(max_messages);
    }
}

/// Returns `existing` itself when `next` holds the same entries.
fn settle(existing: &MessageList, next: Vec<Arc<BusMessage>>) -> MessageList {
    if same_sequence(existing, &next) {
        Arc::clone(existing)
    } else {
        Arc::new(next)
    }
}

/// Inserts or replaces one message, keeping every other entry where it was.
pub fn upsert_message_by_id(
    existing: &MessageList,
    incoming: Arc<BusMessage>,
    max_messages: usize,
) -> MessageList {
    let position = existing
        .iter()
        .position(|message| message.msg_id == incoming.msg_id);
    if let Some(index) = position {
        let current = &existing[index];
        match incoming.timestamp_millis().cmp(&current.timestamp_millis()) {
            Ordering::Less => return Arc::clone(existing),
            Ordering::Equal if same_payload(current, &incoming) => return Arc::clone(existing),
            _ => {}
        }
    }

    let mut next: Vec<Arc<BusMessage>> = Vec::with_capacity(existing.len() + 1);
    next.extend(
        existing
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != position)
            .map(|(_, message)| Arc::clone(message)),
    );
    let insert_at = next
        .iter()
        .position(|message| comes_before(&incoming, message))
        .unwrap_or(next.len());
    next.insert(insert_at, incoming);
    trim(&mut next, max_messages);
    settle(existing, next)
}

/// Batch upsert. Sorted, duplicate-free input takes a single forward merge;
/// anything else falls back to a union-and-sort with identical results.
pub fn merge_messages_by_id(
    existing: &MessageList,
    incoming: &[Arc<BusMessage>],
    max_messages: usize,
) -> MessageList {
    merge_with_path(existing, incoming, max_messages).0
}

pub(crate) fn merge_with_path(
    existing: &MessageList,
    incoming: &[Arc<BusMessage>],
    max_messages: usize,
) -> (MessageList, MergePath) {
    match merge_linear(existing, incoming, max_messages) {
        Some(merged) => (merged, MergePath::Linear),
        None => (
            merge_sorted(existing, incoming, max_messages),
            MergePath::Sorted,
        ),
    }
}

pub fn upsert_message_batch(
    existing: &MessageList,
    incoming: &[Arc<BusMessage>],
    max_messages: usize,
) -> MessageList {
    match incoming {
        [] => Arc::clone(existing),
        [single] => upsert_message_by_id(existing, Arc::clone(single), max_messages),
        _ => merge_messages_by_id(existing, incoming, max_messages),
    }
}

fn merge_linear(
    existing: &MessageList,
    incoming: &[Arc<BusMessage>],
    max_messages: usize,
) -> Option<MessageList> {
    if !is_recency_ordered(existing) || !is_recency_ordered(incoming) {
        return None;
    }

    let mut existing_by_id: HashMap<&str, &Arc<BusMessage>> = HashMap::with_capacity(existing.len());
    for message in existing.iter() {
        if existing_by_id.insert(message.msg_id.as_str(), message).is_some() {
            return None;
        }
    }

    let mut incoming_by_id: HashMap<&str, &Arc<BusMessage>> = HashMap::with_capacity(incoming.len());
    let mut incoming_order: Vec<&str> = Vec::with_capacity(incoming.len());
    for message in incoming {
        match incoming_by_id.get(message.msg_id.as_str()) {
            None => {
                incoming_by_id.insert(message.msg_id.as_str(), message);
                incoming_order.push(message.msg_id.as_str());
            }
            Some(current) if should_replace(current, message) => {
                incoming_by_id.insert(message.msg_id.as_str(), message);
            }
            Some(_) => {}
        }
    }

    let mut replaced: HashSet<&str> = HashSet::new();
    let mut accepted: Vec<Arc<BusMessage>> = Vec::new();
    for msg_id in incoming_order {
        let Some(candidate) = incoming_by_id.get(msg_id) else {
            continue;
        };
        match existing_by_id.get(msg_id) {
            None => accepted.push(Arc::clone(candidate)),
            Some(current) if should_replace(current, candidate) => {
                accepted.push(Arc::clone(candidate));
                replaced.insert(msg_id);
            }
            Some(_) => {}
        }
    }

    if accepted.is_empty() {
        let mut trimmed = existing.to_vec();
        trim(&mut trimmed, max_messages);
        return Some(settle(existing, trimmed));
    }

    // Deduplicating by id keeps the newest payload, which can leave `accepted`
    // out of order when a later duplicate replaced an earlier one.
    if !is_recency_ordered(&accepted) {
        return None;
    }

    let mut merged: Vec<Arc<BusMessage>> = Vec::with_capacity(existing.len() + accepted.len());
    let mut kept = existing
        .iter()
        .filter(|message| !replaced.contains(message.msg_id.as_str()))
        .peekable();
    let mut fresh = accepted.into_iter().peekable();
    loop {
        let take_existing = match (kept.peek(), fresh.peek()) {
            (Some(current), Some(candidate)) => by_recency(current, candidate) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_existing {
            if let Some(message) = kept.next() {
                merged.push(Arc::clone(message));
            }
        } else if let Some(message) = fresh.next() {
            merged.push(message);
        }
        if max_messages > 0 && merged.len() >= max_messages {
            break;
        }
    }
    trim(&mut merged, max_messages);
    Some(settle(existing, merged))
}

fn merge_sorted(
    existing: &MessageList,
    incoming: &[Arc<BusMessage>],
    max_messages: usize,
) -> MessageList {
    let mut by_id: HashMap<&str, &Arc<BusMessage>> =
        HashMap::with_capacity(existing.len() + incoming.len());
    for message in existing.iter().chain(incoming) {
        match by_id.get(message.msg_id.as_str()) {
            Some(current) if !should_replace(current, message) => {}
            _ => {
                by_id.insert(message.msg_id.as_str(), message);
            }
        }
    }
    let mut merged: Vec<Arc<BusMessage>> = by_id.into_values().map(Arc::clone).collect();
    merged.sort_by(|a, b| by_recency(a, b));
    trim(&mut merged, max_messages);
    settle(existing, merged)
}
