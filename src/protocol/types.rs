//! Core data types shared by the registry, store and wire protocol.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Reserved destination meaning "every other live instance".
pub const BROADCAST_TARGET: &str = "broadcast";

/// Default number of retries recorded on a message when the sender gives none.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message priority levels.
///
/// Priority governs retrieval order only; it never changes how fast a push
/// goes out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Message delivery status. Ordered so that a status can only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Stored, not yet handed to the recipient
    #[default]
    Sent,
    /// Pushed to or fetched by the recipient
    Delivered,
    /// Recipient acknowledged with `mark_read`
    Read,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Delivered => write!(f, "delivered"),
            MessageStatus::Read => write!(f, "read"),
        }
    }
}

/// Resolved destination of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    Broadcast,
    Instance(String),
}

impl Recipient {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::Broadcast)
    }

    /// Check if this destination covers the given instance.
    pub fn includes(&self, instance_id: &str) -> bool {
        match self {
            Recipient::Broadcast => true,
            Recipient::Instance(id) => id == instance_id,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Recipient::Broadcast => BROADCAST_TARGET,
            Recipient::Instance(id) => id,
        }
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        if value == BROADCAST_TARGET {
            Recipient::Broadcast
        } else {
            Recipient::Instance(value)
        }
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        match value {
            Recipient::Broadcast => BROADCAST_TARGET.to_string(),
            Recipient::Instance(id) => id,
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered, currently live participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A stored message and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub from_name: String,
    pub to: Recipient,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    /// A message is expired from `expires_at` onwards.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Advance to `delivered`. Returns false if already there or beyond.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> bool {
        if self.status >= MessageStatus::Delivered {
            return false;
        }
        self.status = MessageStatus::Delivered;
        self.delivered_at.get_or_insert(now);
        true
    }

    /// Advance to `read`, filling `delivered_at` if it was skipped.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.status >= MessageStatus::Read {
            return false;
        }
        self.status = MessageStatus::Read;
        self.delivered_at.get_or_insert(now);
        self.read_at.get_or_insert(now);
        true
    }

    /// Milliseconds between creation and delivery, once delivered.
    pub fn delivery_latency_ms(&self) -> Option<i64> {
        if self.status < MessageStatus::Delivered {
            return None;
        }
        self.delivered_at
            .map(|delivered| (delivered - self.timestamp).num_milliseconds())
    }
}

/// Everything the store needs to create a message.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub from: String,
    pub from_name: String,
    pub to: Recipient,
    pub content: serde_json::Value,
    pub priority: Priority,
    pub ttl: Option<Duration>,
    pub max_retries: u32,
}

impl MessageDraft {
    pub fn new(
        from: impl Into<String>,
        from_name: impl Into<String>,
        to: Recipient,
        content: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            from: from.into(),
            from_name: from_name.into(),
            to,
            content: content.into(),
            priority: Priority::Normal,
            ttl: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set time-to-live in milliseconds. Values too large to represent as a
    /// duration clamp to the maximum, which never expires in practice.
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        let ttl = i64::try_from(ttl_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX);
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }
}
