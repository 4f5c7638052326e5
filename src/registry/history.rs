//! Per-name identity history used to reconcile superseded instance ids.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// An id that used to own a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousId {
    pub id: String,
    pub disconnected_at: DateTime<Utc>,
}

/// Identity history for one name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHistory {
    /// Id most recently bound to the name. Stale while the name is
    /// unregistered, `None` once its holder renamed itself away.
    pub current_id: Option<String>,
    pub previous_ids: Vec<PreviousId>,
}

impl ConnectionHistory {
    pub fn new(current_id: impl Into<String>) -> Self {
        Self {
            current_id: Some(current_id.into()),
            previous_ids: Vec::new(),
        }
    }

    /// Rebind the name to `id`, archiving the old one.
    ///
    /// Returns the superseded id, if there was one.
    pub fn rebind(&mut self, id: &str, now: DateTime<Utc>, grace: Duration) -> Option<String> {
        if self.current_id.as_deref() == Some(id) {
            self.prune(now, grace);
            return None;
        }

        let old = self.current_id.replace(id.to_string());
        self.previous_ids.retain(|prev| prev.id != id);
        if let Some(old) = &old {
            self.previous_ids.push(PreviousId {
                id: old.clone(),
                disconnected_at: now,
            });
        }
        self.prune(now, grace);
        old
    }

    /// Forget the current holder without archiving it. Used when the holder
    /// moves to another name, so it never resolves to this name's next owner.
    pub fn release(&mut self, id: &str) {
        if self.current_id.as_deref() == Some(id) {
            self.current_id = None;
        }
    }

    /// Drop archived ids older than the grace period.
    pub fn prune(&mut self, now: DateTime<Utc>, grace: Duration) {
        self.previous_ids
            .retain(|prev| now - prev.disconnected_at < grace);
    }

    /// Find an archived id still inside the grace window.
    pub fn find_recent(&self, id: &str, now: DateTime<Utc>, grace: Duration) -> Option<&PreviousId> {
        self.previous_ids
            .iter()
            .find(|prev| prev.id == id && now - prev.disconnected_at < grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebind_archives_old_id() {
        let now = Utc::now();
        let grace = Duration::minutes(5);
        let mut history = ConnectionHistory::new("a1");

        assert_eq!(history.rebind("a2", now, grace), Some("a1".to_string()));
        assert_eq!(history.current_id.as_deref(), Some("a2"));
        assert_eq!(history.previous_ids.len(), 1);
        assert_eq!(history.previous_ids[0].id, "a1");

        assert_eq!(history.rebind("a2", now, grace), None);
        assert_eq!(history.previous_ids.len(), 1);
    }

    #[test]
    fn test_prune_drops_entries_past_grace() {
        let start = Utc::now();
        let grace = Duration::minutes(5);
        let mut history = ConnectionHistory::new("a1");
        history.rebind("a2", start, grace);

        let later = start + Duration::minutes(6);
        assert!(history.find_recent("a1", later, grace).is_none());

        history.rebind("a3", later, grace);
        let ids: Vec<_> = history.previous_ids.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a2"]);
    }

    #[test]
    fn test_release_clears_without_archiving() {
        let now = Utc::now();
        let grace = Duration::minutes(5);
        let mut history = ConnectionHistory::new("a1");

        history.release("other");
        assert_eq!(history.current_id.as_deref(), Some("a1"));

        history.release("a1");
        assert!(history.current_id.is_none());
        assert!(history.previous_ids.is_empty());

        assert_eq!(history.rebind("a2", now, grace), None);
        assert!(history.previous_ids.is_empty());
        assert!(history.find_recent("a1", now, grace).is_none());
    }
}
