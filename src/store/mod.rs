//! In-memory message store with priority, expiry and status lifecycle.
//!
//! Messages are kept in insertion order. Status only moves forward
//! (`sent -> delivered -> read`) and `expires_at` is fixed at creation.

pub mod stats;

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashSet;

use crate::protocol::{Message, MessageDraft, MessageStatus, Recipient};

pub use stats::{PriorityCounts, StatusCounts, StoreStats};

/// Originating tuple of a message that was just marked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMark {
    pub id: String,
    pub from: String,
    pub to: Recipient,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new message and return a copy of it.
    ///
    /// A ttl that would push `expires_at` past the representable range
    /// leaves the message without an expiry.
    pub fn put(&mut self, draft: MessageDraft, now: DateTime<Utc>) -> Message {
        let expires_at = draft.ttl.and_then(|ttl| {
            let expires_at = now.checked_add_signed(ttl);
            if expires_at.is_none() {
                tracing::debug!("TTL of {} overflows, message will not expire", ttl);
            }
            expires_at
        });

        let message = Message {
            id: generate_id(),
            from: draft.from,
            from_name: draft.from_name,
            to: draft.to,
            content: draft.content,
            timestamp: now,
            status: MessageStatus::Sent,
            delivered_at: None,
            read_at: None,
            expires_at,
            priority: draft.priority,
            retry_count: 0,
            max_retries: draft.max_retries,
        };

        tracing::debug!(
            "Stored message {} from {} to {} ({})",
            message.id,
            message.from,
            message.to,
            message.priority
        );
        self.messages.push(message.clone());
        message
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Live messages addressed to `instance_id` or to broadcast.
    ///
    /// Ordered high, normal, low; the sort is stable, so each tier keeps
    /// insertion order.
    pub fn messages_for(&self, instance_id: &str, undelivered_only: bool, now: DateTime<Utc>) -> Vec<Message> {
        let mut result: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.to.includes(instance_id))
            .filter(|m| !m.is_expired(now))
            .filter(|m| !undelivered_only || m.status == MessageStatus::Sent)
            .cloned()
            .collect();

        result.sort_by_key(|m| Reverse(m.priority));
        result
    }

    /// Advance messages to `delivered`. Returns those that actually moved.
    pub fn mark_delivered(&mut self, ids: &[String], now: DateTime<Utc>) -> Vec<Message> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut advanced = Vec::new();
        for message in self.messages.iter_mut() {
            if ids.contains(message.id.as_str()) && message.mark_delivered(now) {
                advanced.push(message.clone());
            }
        }
        advanced
    }

    /// Advance messages to `read`. Returns the origin of each one that moved.
    pub fn mark_read(&mut self, ids: &[String], now: DateTime<Utc>) -> Vec<ReadMark> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut marks = Vec::new();
        for message in self.messages.iter_mut() {
            if ids.contains(message.id.as_str()) && message.mark_read(now) {
                marks.push(ReadMark {
                    id: message.id.clone(),
                    from: message.from.clone(),
                    to: message.to.clone(),
                });
            }
        }
        marks
    }

    /// Remove every message whose expiry has passed, whatever its status.
    pub fn expiry_sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_expired(now));
        let removed = before - self.messages.len();
        if removed > 0 {
            tracing::debug!("Expiry sweep removed {} messages", removed);
        }
        removed
    }

    /// The last `limit` unexpired messages in insertion order. A `limit` of
    /// zero returns the whole history.
    pub fn conversation(&self, limit: usize, now: DateTime<Utc>) -> Vec<Message> {
        tail(self.messages.iter().filter(|m| !m.is_expired(now)), limit)
    }

    /// The last `limit` unexpired messages exchanged directly between two
    /// instances, in either direction.
    pub fn conversation_between(&self, a: &str, b: &str, limit: usize, now: DateTime<Utc>) -> Vec<Message> {
        let between = self.messages.iter().filter(|m| {
            !m.is_expired(now)
                && ((m.from == a && m.to.as_str() == b) || (m.from == b && m.to.as_str() == a))
        });
        tail(between, limit)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> StoreStats {
        StoreStats::collect(self.messages.iter(), now)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn tail<'a>(messages: impl Iterator<Item = &'a Message>, limit: usize) -> Vec<Message> {
    let all: Vec<&Message> = messages.collect();
    let skip = match limit {
        0 => 0,
        limit => all.len().saturating_sub(limit),
    };
    all.into_iter().skip(skip).cloned().collect()
}

fn generate_id() -> String {
    ulid::Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Priority;
    use chrono::Duration;

    fn to(id: &str) -> Recipient {
        Recipient::Instance(id.to_string())
    }

    fn draft(content: &str, priority: Priority) -> MessageDraft {
        MessageDraft::new("a1", "alice", to("b1"), content).with_priority(priority)
    }

    #[test]
    fn test_put_stamps_lifecycle_fields() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let msg = store.put(draft("hi", Priority::Normal).with_ttl_ms(100), now);

        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.timestamp, now);
        assert_eq!(msg.expires_at, Some(now + Duration::milliseconds(100)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let msg = store.put(draft("gone", Priority::Normal).with_ttl_ms(0), now);

        assert_eq!(msg.expires_at, Some(now));
        assert!(store.messages_for("b1", true, now).is_empty());
        assert_eq!(store.expiry_sweep(now), 1);
    }

    #[test]
    fn test_overflowing_ttl_never_expires() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let msg = store.put(draft("forever", Priority::Normal).with_ttl_ms(u64::MAX), now);

        assert_eq!(msg.expires_at, None);
        let far = now + Duration::days(365 * 100);
        assert_eq!(store.messages_for("b1", true, far).len(), 1);
        assert_eq!(store.expiry_sweep(far), 0);
    }

    #[test]
    fn test_large_ttl_within_range_is_kept() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let week_ms = 7 * 24 * 60 * 60 * 1000;
        let msg = store.put(draft("week", Priority::Normal).with_ttl_ms(week_ms), now);

        assert_eq!(msg.expires_at, Some(now + Duration::days(7)));
    }

    #[test]
    fn test_messages_for_orders_by_priority_stably() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let sequence = [
            ("n1", Priority::Normal),
            ("l1", Priority::Low),
            ("h1", Priority::High),
            ("n2", Priority::Normal),
            ("l2", Priority::Low),
            ("h2", Priority::High),
            ("n3", Priority::Normal),
        ];
        for (content, priority) in sequence {
            store.put(draft(content, priority), now);
        }

        let contents: Vec<String> = store
            .messages_for("b1", true, now)
            .into_iter()
            .map(|m| m.content.as_str().unwrap().to_string())
            .collect();
        assert_eq!(contents, vec!["h1", "h2", "n1", "n2", "n3", "l1", "l2"]);
    }

    #[test]
    fn test_messages_for_includes_broadcast_and_filters_delivered() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let direct = store.put(draft("direct", Priority::Normal), now);
        store.put(MessageDraft::new("a1", "alice", Recipient::Broadcast, "all"), now);
        store.put(MessageDraft::new("a1", "alice", to("c1"), "other"), now);

        assert_eq!(store.messages_for("b1", true, now).len(), 2);

        store.mark_delivered(&[direct.id.clone()], now);
        assert_eq!(store.messages_for("b1", true, now).len(), 1);
        assert_eq!(store.messages_for("b1", false, now).len(), 2);
    }

    #[test]
    fn test_ttl_hides_then_sweep_removes() {
        let mut store = MessageStore::new();
        let start = Utc::now();
        let msg = store.put(draft("short", Priority::Normal).with_ttl_ms(100), start);
        store.mark_read(&[msg.id.clone()], start);
        store.put(draft("forever", Priority::Normal), start);

        let before = start + Duration::milliseconds(99);
        assert_eq!(store.messages_for("b1", false, before).len(), 2);

        let at = start + Duration::milliseconds(100);
        assert_eq!(store.messages_for("b1", false, at).len(), 1);
        assert_eq!(store.stats(at).expired_pending_sweep, 1);

        assert_eq!(store.expiry_sweep(at), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&msg.id).is_none());
        assert_eq!(store.expiry_sweep(at), 0);
    }

    #[test]
    fn test_mark_delivered_after_read_keeps_read() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let msg = store.put(draft("hi", Priority::Normal), now);
        let ids = vec![msg.id.clone()];

        let marks = store.mark_read(&ids, now);
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].from, "a1");
        assert_eq!(marks[0].to, to("b1"));

        assert!(store.mark_delivered(&ids, now).is_empty());
        assert_eq!(store.get(&msg.id).unwrap().status, MessageStatus::Read);

        // Idempotent: no second receipt.
        assert!(store.mark_read(&ids, now).is_empty());
    }

    #[test]
    fn test_mark_delivered_keeps_first_timestamp() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let msg = store.put(draft("hi", Priority::Normal), now);
        let ids = vec![msg.id.clone()];

        assert_eq!(store.mark_delivered(&ids, now).len(), 1);
        store.mark_delivered(&ids, now + Duration::seconds(5));
        assert_eq!(store.get(&msg.id).unwrap().delivered_at, Some(now));
    }

    #[test]
    fn test_conversation_between_and_limit() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        store.put(MessageDraft::new("a1", "alice", to("b1"), "1"), now);
        store.put(MessageDraft::new("b1", "bob", to("a1"), "2"), now);
        store.put(MessageDraft::new("c1", "carol", to("a1"), "3"), now);
        store.put(MessageDraft::new("a1", "alice", to("b1"), "4"), now);

        let between = store.conversation_between("a1", "b1", 100, now);
        let contents: Vec<_> = between.iter().map(|m| m.content.as_str().unwrap()).collect();
        assert_eq!(contents, vec!["1", "2", "4"]);

        let last_two = store.conversation(2, now);
        let contents: Vec<_> = last_two.iter().map(|m| m.content.as_str().unwrap()).collect();
        assert_eq!(contents, vec!["3", "4"]);
    }

    #[test]
    fn test_zero_limit_returns_whole_history() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        for content in ["1", "2", "3"] {
            store.put(MessageDraft::new("a1", "alice", to("b1"), content), now);
        }

        assert_eq!(store.conversation(0, now).len(), 3);
        assert_eq!(store.conversation_between("a1", "b1", 0, now).len(), 3);
    }

    #[test]
    fn test_mark_read_ignores_unknown_and_duplicate_ids() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        let msg = store.put(draft("hi", Priority::Normal), now);

        let ids = vec![msg.id.clone(), msg.id.clone(), "missing".to_string()];
        let marks = store.mark_read(&ids, now);
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].id, msg.id);
        assert!(store.mark_delivered(&ids, now).is_empty());
    }

    #[test]
    fn test_stats() {
        let mut store = MessageStore::new();
        let start = Utc::now();
        let a = store.put(draft("a", Priority::High), start);
        let b = store.put(draft("b", Priority::Low), start);
        store.put(draft("c", Priority::Normal).with_ttl_ms(10), start);

        store.mark_delivered(&[a.id.clone()], start + Duration::milliseconds(40));
        store.mark_read(&[b.id.clone()], start + Duration::milliseconds(20));

        let stats = store.stats(start + Duration::milliseconds(50));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status, StatusCounts { sent: 1, delivered: 1, read: 1 });
        assert_eq!(stats.by_priority, PriorityCounts { high: 1, normal: 1, low: 1 });
        assert_eq!(stats.expired_pending_sweep, 1);
        assert_eq!(stats.mean_delivery_latency_ms, Some(30.0));
    }
}
