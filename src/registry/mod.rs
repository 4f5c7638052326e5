//! Instance registry: live instances, name index and identity history.
//!
//! A name is unique among live instances. Registering a name that another id
//! holds moves that id into the name's history, where it stays resolvable to
//! its replacement for the grace period.

pub mod history;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::protocol::Instance;

pub use history::{ConnectionHistory, PreviousId};

/// Default window during which a superseded id still resolves.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 300;

/// Outcome of a registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub instance: Instance,
    /// Previously live id whose claim on the name was just evicted.
    pub evicted: Option<String>,
}

#[derive(Debug)]
pub struct InstanceRegistry {
    instances: HashMap<String, Instance>,
    /// Live name -> instance id.
    names: HashMap<String, String>,
    histories: HashMap<String, ConnectionHistory>,
    grace: Duration,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_GRACE_PERIOD_SECS as i64))
    }
}

impl InstanceRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            instances: HashMap::new(),
            names: HashMap::new(),
            histories: HashMap::new(),
            grace,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Bind `name` to `id` and upsert the instance record.
    pub fn register(
        &mut self,
        id: &str,
        name: &str,
        description: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Registration {
        // Same id re-registering under a new name gives up the old one.
        if let Some(existing) = self.instances.get(id) {
            if existing.name != name {
                if self.names.get(&existing.name).map(String::as_str) == Some(id) {
                    self.names.remove(&existing.name);
                }
                if let Some(history) = self.histories.get_mut(&existing.name) {
                    history.release(id);
                }
            }
        }

        let history = self
            .histories
            .entry(name.to_string())
            .or_insert_with(|| ConnectionHistory::new(id));
        let replaced = history.rebind(id, now, self.grace);

        // Only a live holder of this very name is evicted.
        let evicted = replaced.filter(|old| {
            self.instances.get(old).is_some_and(|instance| instance.name == name)
        });
        if let Some(old) = &evicted {
            self.instances.remove(old);
        }

        if let Some(old) = &evicted {
            tracing::info!("Instance {} replaced {} as '{}'", id, old, name);
        }

        let instance = Instance {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            metadata,
            registered_at: now,
            last_seen: now,
        };
        self.names.insert(name.to_string(), id.to_string());
        self.instances.insert(id.to_string(), instance.clone());

        Registration { instance, evicted }
    }

    /// Get a live instance by id.
    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Resolve a live instance by id first, then by name.
    pub fn lookup(&self, id_or_name: &str) -> Option<&Instance> {
        self.instances.get(id_or_name).or_else(|| {
            self.names
                .get(id_or_name)
                .and_then(|id| self.instances.get(id))
        })
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    /// Remove a live instance. Its name history is kept.
    pub fn unregister(&mut self, id: &str) -> Option<Instance> {
        let instance = self.instances.remove(id)?;
        if self.names.get(&instance.name).map(String::as_str) == Some(id) {
            self.names.remove(&instance.name);
        }
        Some(instance)
    }

    /// Record a heartbeat. Returns false if the id is not live.
    pub fn touch(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.instances.get_mut(id) {
            Some(instance) => {
                instance.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all live instances.
    pub fn list(&self) -> Vec<Instance> {
        self.instances.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn history(&self, name: &str) -> Option<&ConnectionHistory> {
        self.histories.get(name)
    }

    /// Map a superseded id to the id that currently owns its name.
    ///
    /// Fails once the grace period has elapsed or when the name has no live
    /// registration.
    pub fn resolve_stale(&self, stale_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.histories.values().find_map(|history| {
            history.find_recent(stale_id, now, self.grace)?;
            history
                .current_id
                .clone()
                .filter(|current| self.instances.contains_key(current))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InstanceRegistry {
        InstanceRegistry::new(Duration::minutes(5))
    }

    fn meta() -> serde_json::Value {
        serde_json::json!({})
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = registry();
        let now = Utc::now();
        reg.register("a1", "alice", "frontend", meta(), now);

        assert_eq!(reg.lookup("a1").unwrap().name, "alice");
        assert_eq!(reg.lookup("alice").unwrap().id, "a1");
        assert!(reg.lookup("bob").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reregister_same_name_rotates_id() {
        let mut reg = registry();
        let now = Utc::now();
        reg.register("a1", "alice", "", meta(), now);
        let registration = reg.register("a2", "alice", "", meta(), now);

        assert_eq!(registration.evicted.as_deref(), Some("a1"));
        assert!(!reg.is_live("a1"));
        assert_eq!(reg.lookup("alice").unwrap().id, "a2");

        let history = reg.history("alice").unwrap();
        assert_eq!(history.current_id.as_deref(), Some("a2"));
        assert_eq!(history.previous_ids[0].id, "a1");
    }

    #[test]
    fn test_resolve_stale_within_grace() {
        let mut reg = registry();
        let start = Utc::now();
        reg.register("a1", "alice", "", meta(), start);
        reg.register("a2", "alice", "", meta(), start);

        let within = start + Duration::minutes(4);
        assert_eq!(reg.resolve_stale("a1", within), Some("a2".to_string()));

        let after = start + Duration::minutes(5);
        assert_eq!(reg.resolve_stale("a1", after), None);
    }

    #[test]
    fn test_resolve_stale_requires_live_owner() {
        let mut reg = registry();
        let now = Utc::now();
        reg.register("a1", "alice", "", meta(), now);
        reg.register("a2", "alice", "", meta(), now);
        reg.unregister("a2");

        assert_eq!(reg.resolve_stale("a1", now), None);
        assert!(reg.history("alice").is_some());
    }

    #[test]
    fn test_reconnect_after_disconnect_keeps_old_id_resolvable() {
        let mut reg = registry();
        let now = Utc::now();
        reg.register("a1", "alice", "", meta(), now);
        reg.unregister("a1");

        let registration = reg.register("a2", "alice", "", meta(), now);
        assert!(registration.evicted.is_none());
        assert_eq!(reg.resolve_stale("a1", now), Some("a2".to_string()));
    }

    #[test]
    fn test_rename_releases_old_name() {
        let mut reg = registry();
        let now = Utc::now();
        reg.register("a1", "alice", "", meta(), now);
        reg.register("a1", "alicia", "", meta(), now);

        assert!(reg.lookup("alice").is_none());
        assert_eq!(reg.lookup("alicia").unwrap().id, "a1");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_rename_then_reclaim_keeps_renamed_instance() {
        let mut reg = registry();
        let now = Utc::now();
        reg.register("a1", "alice", "", meta(), now);
        reg.register("a1", "alicia", "", meta(), now);

        let registration = reg.register("a2", "alice", "", meta(), now);
        assert!(registration.evicted.is_none());

        assert_eq!(reg.lookup("alicia").unwrap().id, "a1");
        assert_eq!(reg.lookup("alice").unwrap().id, "a2");
        assert_eq!(reg.len(), 2);

        let history = reg.history("alice").unwrap();
        assert_eq!(history.current_id.as_deref(), Some("a2"));
        assert!(history.previous_ids.is_empty());

        reg.unregister("a1");
        assert_eq!(reg.resolve_stale("a1", now), None);
    }

    #[test]
    fn test_touch_updates_last_seen() {
        let mut reg = registry();
        let start = Utc::now();
        reg.register("a1", "alice", "", meta(), start);

        let later = start + Duration::seconds(30);
        assert!(reg.touch("a1", later));
        assert_eq!(reg.get("a1").unwrap().last_seen, later);
        assert!(!reg.touch("ghost", later));
    }
}
