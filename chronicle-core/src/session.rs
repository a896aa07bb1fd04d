//! Session/Location tracker — "what world am I in right now".
//!
//! A passive cache over the raw `location` events. It keeps no open/close
//! state machine (that belongs to the instance-history journal) and emits
//! nothing; journals read snapshots when they need the current context.

use parking_lot::RwLock;

use crate::events::LocationEvent;

/// The current instance context, overwritten wholesale on every `location`
/// event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Full location string of the current instance.
    pub location: Option<String>,
    /// World id of the current instance.
    pub world_id: Option<String>,
    /// Instance id within the world.
    pub instance_id: Option<String>,
}

/// Shared, read-mostly cache of the current instance context.
#[derive(Debug, Default)]
pub struct SessionTracker {
    state: RwLock<SessionState>,
}

impl SessionTracker {
    /// Create an empty tracker (no known location).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally overwrite the current context from a location event.
    pub fn apply(&self, event: &LocationEvent) {
        let mut state = self.state.write();
        state.location = Some(event.location.clone());
        state.world_id = Some(event.world_id.clone());
        state.instance_id = Some(event.instance_id.clone());
    }

    /// Snapshot the current context.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Forget the current context (account switch).
    pub fn clear(&self) {
        *self.state.write() = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(world: &str, instance: &str) -> LocationEvent {
        LocationEvent {
            world_id: world.to_string(),
            instance_id: instance.to_string(),
            location: format!("{world}:{instance}"),
            world_name: None,
            timestamp: 1_000,
        }
    }

    #[test]
    fn starts_empty() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.snapshot(), SessionState::default());
    }

    #[test]
    fn apply_overwrites_unconditionally() {
        let tracker = SessionTracker::new();
        tracker.apply(&location("wrld_a", "1"));
        tracker.apply(&location("wrld_b", "2"));

        let snap = tracker.snapshot();
        assert_eq!(snap.world_id.as_deref(), Some("wrld_b"));
        assert_eq!(snap.instance_id.as_deref(), Some("2"));
        assert_eq!(snap.location.as_deref(), Some("wrld_b:2"));
    }

    #[test]
    fn clear_forgets_context() {
        let tracker = SessionTracker::new();
        tracker.apply(&location("wrld_a", "1"));
        tracker.clear();
        assert_eq!(tracker.snapshot(), SessionState::default());
    }
}
