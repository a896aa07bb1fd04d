//! Process-wide typed publish/subscribe fabric.
//!
//! All inter-component signaling flows through the bus exclusively — no
//! consumer ever calls another consumer directly. Dispatch is synchronous and
//! in-process: each publish invokes the handlers registered for that event
//! kind, in registration order, exactly once each. There is no buffering and
//! no delivery across process restarts.
//!
//! A failing handler must not starve the rest: handler errors are logged and
//! dispatch continues with the next handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{Event, EventKind};

/// Handler signature. Handlers run synchronously on the publisher's task.
pub type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Opaque token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct BusInner {
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
    next_token: u64,
    publish_count: u64,
}

/// Typed publish/subscribe bus.
///
/// Handlers are snapshotted out of the registry before dispatch, so a handler
/// may itself publish (the presence tracker emits `friend-state-changed`
/// while handling `friend-update`) without deadlocking. Subscriptions made
/// during a dispatch take effect from the next publish.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("kinds", &inner.handlers.len())
            .field("publish_count", &inner.publish_count)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                handlers: HashMap::new(),
                next_token: 0,
                publish_count: 0,
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push((token, Arc::new(handler)));
        SubscriptionToken(token)
    }

    /// Remove the subscription identified by `token`.
    ///
    /// Returns `true` if a handler was actually removed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut inner = self.inner.lock();
        for handlers in inner.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(t, _)| *t == token.0) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Publish `event` to every handler registered for its kind, in
    /// registration order, on the calling task.
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<(u64, Handler)> = {
            let mut inner = self.inner.lock();
            inner.publish_count += 1;
            inner
                .handlers
                .get(&event.kind())
                .map(|hs| hs.iter().map(|(t, h)| (*t, Arc::clone(h))).collect())
                .unwrap_or_default()
        };

        debug!(event = event.name(), handlers = snapshot.len(), "publish");

        for (token, handler) in snapshot {
            if let Err(e) = (*handler)(event) {
                warn!(event = event.name(), token, error = %e, "event handler failed");
            }
        }
    }

    /// Total number of publish calls since construction.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.inner.lock().publish_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChronicleError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn game_closed() -> Event {
        Event::GameClosed
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(EventKind::GameClosed, move |_| {
                order.lock().push(i);
                Ok(())
            });
        }

        bus.publish(&game_closed());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn only_matching_kind_receives() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        bus.subscribe(EventKind::WorldName, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&game_closed());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_handler_does_not_stop_later_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::GameClosed, |_| {
            Err(ChronicleError::Serialization("boom".into()))
        });
        let h = Arc::clone(&hits);
        bus.subscribe(EventKind::GameClosed, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&game_closed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let token = bus.subscribe(EventKind::GameClosed, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&game_closed());
        assert!(bus.unsubscribe(token));
        bus.publish(&game_closed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(token), "double unsubscribe is a no-op");
    }

    #[test]
    fn handler_may_publish_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_bus = Arc::clone(&bus);
        bus.subscribe(EventKind::GameClosed, move |_| {
            inner_bus.publish(&Event::WorldName(crate::events::WorldNameEvent {
                name: "Somewhere".into(),
                timestamp: 0,
            }));
            Ok(())
        });
        let h = Arc::clone(&hits);
        bus.subscribe(EventKind::WorldName, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&game_closed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
