//! Per-group playback queues with bounded replay history.
//!
//! Each group owns an independent FIFO of [`PlaybackRequest`]s and a
//! most-recent-first history of identifiers that left the queue for playback.
//! The store is a concurrent map whose values carry their own lock, so queue
//! mutations for one group never block another group.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::media::MediaRef;
use crate::state::DuplicatePolicy;
use crate::utils::now_millis;

/// One queued playback request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackRequest {
    /// Unique per enqueue, so duplicates of the same media stay distinguishable.
    pub ticket: Uuid,
    /// The media to play.
    pub media: MediaRef,
    pub group_id: String,
    /// Unix timestamp in milliseconds.
    pub enqueued_at: u64,
}

impl PlaybackRequest {
    fn new(group_id: &str, media: MediaRef) -> Self {
        Self {
            ticket: Uuid::new_v4(),
            media,
            group_id: group_id.to_string(),
            enqueued_at: now_millis(),
        }
    }
}

#[derive(Debug, Default)]
struct GroupQueue {
    pending: VecDeque<PlaybackRequest>,
    /// Most recent first, each media at most once.
    history: VecDeque<MediaRef>,
}

impl GroupQueue {
    fn position_of(&self, media: &MediaRef) -> Option<usize> {
        self.pending.iter().position(|r| &r.media == media)
    }

    fn record_history(&mut self, media: MediaRef, capacity: usize) {
        self.history.retain(|m| m != &media);
        self.history.push_front(media);
        self.history.truncate(capacity);
    }
}

/// Concurrent store of per-group playback queues.
pub struct PlaybackQueueStore {
    groups: DashMap<String, Arc<Mutex<GroupQueue>>>,
    history_capacity: usize,
    duplicate_policy: DuplicatePolicy,
}

impl PlaybackQueueStore {
    /// Creates an empty store.
    pub fn new(history_capacity: usize, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            groups: DashMap::new(),
            history_capacity,
            duplicate_policy,
        }
    }

    /// Returns the group's queue, creating it on first use.
    ///
    /// The map shard lock is released before the caller locks the queue.
    fn group(&self, group_id: &str) -> Arc<Mutex<GroupQueue>> {
        if let Some(queue) = self.groups.get(group_id) {
            return queue.value().clone();
        }
        self.groups
            .entry(group_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Returns the group's queue without creating it.
    fn existing(&self, group_id: &str) -> Option<Arc<Mutex<GroupQueue>>> {
        self.groups.get(group_id).map(|r| r.value().clone())
    }

    /// Appends `media` and returns its 1-based position.
    ///
    /// Under [`DuplicatePolicy::Ignore`] a media reference that is already
    /// pending is not appended again; its existing position is returned.
    pub fn enqueue(&self, group_id: &str, media: MediaRef) -> usize {
        let queue = self.group(group_id);
        let mut queue = queue.lock();

        if self.duplicate_policy == DuplicatePolicy::Ignore {
            if let Some(index) = queue.position_of(&media) {
                log::debug!("[Queue] {}: ignoring duplicate {}", group_id, media);
                return index + 1;
            }
        }

        queue.pending.push_back(PlaybackRequest::new(group_id, media));
        queue.pending.len()
    }

    /// Removes and returns the head, recording it into history.
    pub fn dequeue_next(&self, group_id: &str) -> Option<PlaybackRequest> {
        let queue = self.existing(group_id)?;
        let mut queue = queue.lock();
        let request = queue.pending.pop_front()?;
        queue.record_history(request.media.clone(), self.history_capacity);
        Some(request)
    }

    /// Returns the head without removing it.
    #[must_use]
    pub fn front(&self, group_id: &str) -> Option<PlaybackRequest> {
        let queue = self.existing(group_id)?;
        let queue = queue.lock();
        queue.pending.front().cloned()
    }

    /// Commits `request` to history and removes it from the pending queue.
    ///
    /// History is recorded even when the request was already removed or
    /// cleared meanwhile. Returns whether it was still pending.
    pub fn take(&self, group_id: &str, request: &PlaybackRequest) -> bool {
        let queue = self.group(group_id);
        let mut queue = queue.lock();
        let index = queue.pending.iter().position(|r| r.ticket == request.ticket);
        let removed = index.and_then(|i| queue.pending.remove(i)).is_some();
        queue.record_history(request.media.clone(), self.history_capacity);
        removed
    }

    /// Removes the first occurrence of `media`. Returns whether anything was removed.
    pub fn remove(&self, group_id: &str, media: &MediaRef) -> bool {
        let Some(queue) = self.existing(group_id) else {
            return false;
        };
        let mut queue = queue.lock();
        match queue.position_of(media) {
            Some(index) => queue.pending.remove(index).is_some(),
            None => false,
        }
    }

    /// Removes the request with `ticket` without touching history.
    pub fn remove_ticket(&self, group_id: &str, ticket: Uuid) -> bool {
        let Some(queue) = self.existing(group_id) else {
            return false;
        };
        let mut queue = queue.lock();
        let before = queue.pending.len();
        queue.pending.retain(|r| r.ticket != ticket);
        queue.pending.len() < before
    }

    /// Empties the queue, and the history too when `also_history` is set.
    pub fn clear(&self, group_id: &str, also_history: bool) {
        let Some(queue) = self.existing(group_id) else {
            return;
        };
        let mut queue = queue.lock();
        queue.pending.clear();
        if also_history {
            queue.history.clear();
        }
    }

    /// Returns the pending requests in play order.
    #[must_use]
    pub fn snapshot(&self, group_id: &str) -> Vec<PlaybackRequest> {
        self.existing(group_id)
            .map(|q| q.lock().pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the history, most recent first.
    #[must_use]
    pub fn history(&self, group_id: &str) -> Vec<MediaRef> {
        self.existing(group_id)
            .map(|q| q.lock().history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self, group_id: &str) -> usize {
        self.existing(group_id)
            .map(|q| q.lock().pending.len())
            .unwrap_or(0)
    }

    /// Whether the group has nothing pending.
    #[must_use]
    pub fn is_empty(&self, group_id: &str) -> bool {
        self.len(group_id) == 0
    }

    /// Re-queues history entries at the front, most recent first.
    ///
    /// Entries already pending are skipped. Returns false if history is empty.
    pub fn restore_from_history(&self, group_id: &str) -> bool {
        let Some(queue) = self.existing(group_id) else {
            return false;
        };
        let mut queue = queue.lock();
        if queue.history.is_empty() {
            return false;
        }

        let restored: Vec<MediaRef> = queue
            .history
            .iter()
            .filter(|media| queue.position_of(media).is_none())
            .cloned()
            .collect();

        // Push in reverse so the most recent entry ends up at the head.
        for media in restored.into_iter().rev() {
            queue
                .pending
                .push_front(PlaybackRequest::new(group_id, media));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(name: &str) -> MediaRef {
        MediaRef::parse(&format!("https://media.test/{name}"), &[]).unwrap()
    }

    fn names(requests: &[PlaybackRequest]) -> Vec<String> {
        requests
            .iter()
            .map(|r| r.media.as_str().rsplit('/').next().unwrap().to_string())
            .collect()
    }

    fn store() -> PlaybackQueueStore {
        PlaybackQueueStore::new(10, DuplicatePolicy::Allow)
    }

    #[test]
    fn enqueue_returns_one_based_positions() {
        let store = store();
        assert_eq!(store.enqueue("g1", media("a")), 1);
        assert_eq!(store.enqueue("g1", media("b")), 2);
        assert_eq!(store.enqueue("g1", media("a")), 3);
        assert_eq!(store.len("g1"), 3);
    }

    #[test]
    fn dequeue_is_fifo_and_records_history() {
        let store = store();
        store.enqueue("g1", media("a"));
        store.enqueue("g1", media("b"));

        assert_eq!(store.dequeue_next("g1").unwrap().media, media("a"));
        assert_eq!(store.dequeue_next("g1").unwrap().media, media("b"));
        assert!(store.dequeue_next("g1").is_none());
        assert_eq!(store.history("g1"), vec![media("b"), media("a")]);
    }

    #[test]
    fn dequeue_on_unknown_group_is_empty() {
        assert!(store().dequeue_next("nobody").is_none());
    }

    #[test]
    fn history_is_bounded_and_deduplicated() {
        let store = PlaybackQueueStore::new(3, DuplicatePolicy::Allow);
        for name in ["a", "b", "c", "d", "b"] {
            store.enqueue("g1", media(name));
            store.dequeue_next("g1");
        }
        assert_eq!(store.history("g1"), vec![media("b"), media("d"), media("c")]);
    }

    #[test]
    fn remove_drops_first_occurrence_only() {
        let store = store();
        store.enqueue("g1", media("a"));
        store.enqueue("g1", media("b"));
        store.enqueue("g1", media("a"));

        assert!(store.remove("g1", &media("a")));
        assert_eq!(names(&store.snapshot("g1")), vec!["b", "a"]);
        assert!(!store.remove("g1", &media("zzz")));
    }

    #[test]
    fn take_removes_exact_ticket() {
        let store = store();
        store.enqueue("g1", media("a"));
        store.enqueue("g1", media("a"));
        let second = store.snapshot("g1")[1].clone();

        assert!(store.take("g1", &second));
        assert!(!store.take("g1", &second));
        assert_eq!(store.len("g1"), 1);
        assert_ne!(store.front("g1").unwrap().ticket, second.ticket);
        assert_eq!(store.history("g1"), vec![media("a")]);
    }

    #[test]
    fn take_records_history_after_clear() {
        let store = store();
        store.enqueue("g1", media("a"));
        store.enqueue("g1", media("b"));
        let playing = store.front("g1").unwrap();
        store.clear("g1", false);

        assert!(!store.take("g1", &playing));
        assert!(store.is_empty("g1"));
        assert_eq!(store.history("g1"), vec![media("a")]);
    }

    #[test]
    fn remove_ticket_leaves_history_alone() {
        let store = store();
        store.enqueue("g1", media("a"));
        let ticket = store.front("g1").unwrap().ticket;

        assert!(store.remove_ticket("g1", ticket));
        assert!(store.is_empty("g1"));
        assert!(store.history("g1").is_empty());
    }

    #[test]
    fn clear_optionally_keeps_history() {
        let store = store();
        store.enqueue("g1", media("a"));
        store.dequeue_next("g1");
        store.enqueue("g1", media("b"));

        store.clear("g1", false);
        assert!(store.is_empty("g1"));
        assert_eq!(store.history("g1"), vec![media("a")]);

        store.clear("g1", true);
        assert!(store.history("g1").is_empty());
    }

    #[test]
    fn restore_puts_most_recent_first_and_skips_queued() {
        let store = store();
        for name in ["a", "b", "c"] {
            store.enqueue("g1", media(name));
            store.dequeue_next("g1");
        }
        // history: c, b, a
        store.enqueue("g1", media("b"));
        store.enqueue("g1", media("x"));

        assert!(store.restore_from_history("g1"));
        assert_eq!(names(&store.snapshot("g1")), vec!["c", "a", "b", "x"]);
    }

    #[test]
    fn restore_with_empty_history_returns_false() {
        let store = store();
        assert!(!store.restore_from_history("g1"));
        store.enqueue("g1", media("a"));
        assert!(!store.restore_from_history("g1"));
        assert_eq!(store.len("g1"), 1);
    }

    #[test]
    fn ignore_policy_reports_existing_position() {
        let store = PlaybackQueueStore::new(10, DuplicatePolicy::Ignore);
        store.enqueue("g1", media("a"));
        store.enqueue("g1", media("b"));

        assert_eq!(store.enqueue("g1", media("a")), 1);
        assert_eq!(store.len("g1"), 2);
    }

    #[test]
    fn groups_are_independent() {
        let store = store();
        store.enqueue("g1", media("a"));
        store.enqueue("g2", media("b"));
        store.clear("g1", true);

        assert!(store.is_empty("g1"));
        assert_eq!(names(&store.snapshot("g2")), vec!["b"]);
    }

    #[test]
    fn concurrent_enqueues_across_threads_lose_nothing() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.enqueue(&format!("g{}", t % 2), media(&format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len("g0"), 100);
        assert_eq!(store.len("g1"), 100);
    }
}
