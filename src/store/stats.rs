//! Aggregate statistics over the message store.

use serde::Serialize;

use crate::protocol::{Message, MessageStatus, Priority};
use chrono::{DateTime, Utc};

/// Counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub sent: usize,
    pub delivered: usize,
    pub read: usize,
}

/// Counts per priority tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub by_status: StatusCounts,
    pub by_priority: PriorityCounts,
    /// Expired but still awaiting the next sweep.
    pub expired_pending_sweep: usize,
    /// Mean of `deliveredAt - timestamp` over delivered or read messages.
    pub mean_delivery_latency_ms: Option<f64>,
}

impl StoreStats {
    pub(crate) fn collect<'a>(messages: impl Iterator<Item = &'a Message>, now: DateTime<Utc>) -> Self {
        let mut stats = StoreStats::default();
        let mut latency_sum = 0i64;
        let mut latency_count = 0usize;

        for message in messages {
            stats.total += 1;

            match message.status {
                MessageStatus::Sent => stats.by_status.sent += 1,
                MessageStatus::Delivered => stats.by_status.delivered += 1,
                MessageStatus::Read => stats.by_status.read += 1,
            }

            match message.priority {
                Priority::High => stats.by_priority.high += 1,
                Priority::Normal => stats.by_priority.normal += 1,
                Priority::Low => stats.by_priority.low += 1,
            }

            if message.is_expired(now) {
                stats.expired_pending_sweep += 1;
            }

            if let Some(latency) = message.delivery_latency_ms() {
                latency_sum += latency;
                latency_count += 1;
            }
        }

        if latency_count > 0 {
            stats.mean_delivery_latency_ms = Some(latency_sum as f64 / latency_count as f64);
        }

        stats
    }
}
