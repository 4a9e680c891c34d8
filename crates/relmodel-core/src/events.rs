//! Entity lifecycle notifications.
//!
//! Each table has its own `saved` and `deleted` channels. Relations subscribe
//! to the channels of the tables they point at and the saver publishes to
//! them. Delivery is synchronous, in subscription order, and happens inside
//! the triggering save or delete call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::entity::EntityRef;

/// Lifecycle events published per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Saved,
    Deleted,
}

impl LifecycleEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Saved => "saved",
            LifecycleEvent::Deleted => "deleted",
        }
    }
}

/// What a handler wants after receiving an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stay subscribed.
    Keep,
    /// Drop this subscription.
    Unsubscribe,
}

type Handler = Rc<dyn Fn(&EntityRef) -> Delivery>;

/// Handle returned by a subscription, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    table: &'static str,
    event: LifecycleEvent,
    id: u64,
}

impl Subscription {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn event(&self) -> LifecycleEvent {
        self.event
    }
}

#[derive(Default)]
struct Bus {
    next_id: u64,
    channels: HashMap<(&'static str, LifecycleEvent), Vec<(u64, Handler)>>,
}

impl Bus {
    fn remove(&mut self, subscription: Subscription) -> bool {
        let Some(handlers) = self
            .channels
            .get_mut(&(subscription.table, subscription.event))
        else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        before != handlers.len()
    }
}

/// Per-table lifecycle channels.
///
/// Cloning yields another handle to the same channels.
#[derive(Clone, Default)]
pub struct Events {
    bus: Rc<RefCell<Bus>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to entities of `table` being saved.
    pub fn on_saved<F>(&self, table: &'static str, handler: F) -> Subscription
    where
        F: Fn(&EntityRef) -> Delivery + 'static,
    {
        self.subscribe(table, LifecycleEvent::Saved, handler)
    }

    /// Subscribe to entities of `table` being deleted.
    pub fn on_deleted<F>(&self, table: &'static str, handler: F) -> Subscription
    where
        F: Fn(&EntityRef) -> Delivery + 'static,
    {
        self.subscribe(table, LifecycleEvent::Deleted, handler)
    }

    pub fn subscribe<F>(&self, table: &'static str, event: LifecycleEvent, handler: F) -> Subscription
    where
        F: Fn(&EntityRef) -> Delivery + 'static,
    {
        let mut bus = self.bus.borrow_mut();
        bus.next_id += 1;
        let id = bus.next_id;
        bus.channels
            .entry((table, event))
            .or_default()
            .push((id, Rc::new(handler)));
        tracing::trace!(table = table, event = event.as_str(), id = id, "subscribed");
        Subscription { table, event, id }
    }

    /// Cancel a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.bus.borrow_mut().remove(subscription)
    }

    /// Deliver `event` for `entity` to every subscriber of `table`.
    ///
    /// Handlers run without the channel borrowed, so they may subscribe or
    /// emit themselves. Returns the number of handlers invoked.
    pub fn emit(&self, table: &'static str, event: LifecycleEvent, entity: &EntityRef) -> usize {
        let handlers = match self.bus.borrow().channels.get(&(table, event)) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        let mut finished = Vec::new();
        for (id, handler) in &handlers {
            if handler(entity) == Delivery::Unsubscribe {
                finished.push(*id);
            }
        }

        if !finished.is_empty() {
            if let Some(live) = self.bus.borrow_mut().channels.get_mut(&(table, event)) {
                live.retain(|(id, _)| !finished.contains(id));
            }
        }

        tracing::trace!(
            table = table,
            event = event.as_str(),
            delivered = handlers.len(),
            dropped = finished.len(),
            "lifecycle event emitted"
        );
        handlers.len()
    }

    pub fn subscriber_count(&self, table: &'static str, event: LifecycleEvent) -> usize {
        self.bus
            .borrow()
            .channels
            .get(&(table, event))
            .map_or(0, Vec::len)
    }
}

/// Subscriptions that are cancelled together when dropped.
///
/// A loaded collection holds the registration of its mirroring handlers, so
/// replacing or dropping the collection releases them without waiting for
/// the next event on the table.
pub struct Registration {
    events: Events,
    subscriptions: Vec<Subscription>,
}

impl Registration {
    pub fn new(events: &Events, subscriptions: Vec<Subscription>) -> Self {
        Self {
            events: events.clone(),
            subscriptions,
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        // Inside a channel mutation the handlers prune themselves on the next emit.
        let Ok(mut bus) = self.events.bus.try_borrow_mut() else {
            return;
        };
        let released = self
            .subscriptions
            .drain(..)
            .filter(|subscription| bus.remove(*subscription))
            .count();
        tracing::trace!(released = released, "subscriptions released");
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bus = self.bus.borrow();
        let mut channels: Vec<_> = bus
            .channels
            .iter()
            .map(|((table, event), handlers)| (*table, event.as_str(), handlers.len()))
            .collect();
        channels.sort_unstable();
        f.debug_struct("Events").field("channels", &channels).finish()
    }
}
