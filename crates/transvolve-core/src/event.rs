use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::CoreResult;
use crate::lifecycle::Disposable;

/// Handle returned by every subscription.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it. Unsubscribing after the
/// emitter is gone is a no-op.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the listener from its emitter.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Unsubscribe every handle in `subscriptions`.
pub fn unsubscribe_all(subscriptions: impl IntoIterator<Item = Subscription>) {
    for subscription in subscriptions {
        subscription.unsubscribe();
    }
}

struct Listener<C, E> {
    id: u64,
    channel: C,
    component_type: Option<String>,
    once: bool,
    active: Cell<bool>,
    handler: Box<dyn Fn(&E)>,
}

impl<C: PartialEq, E> Listener<C, E> {
    fn matches(&self, channel: &C, component_type: Option<&str>) -> bool {
        self.channel == *channel && self.component_type.as_deref() == component_type
    }
}

struct Registry<C, E> {
    next_id: u64,
    listeners: Vec<Rc<Listener<C, E>>>,
}

impl<C, E> Registry<C, E> {
    fn remove(&mut self, id: u64) {
        if let Some(pos) = self.listeners.iter().position(|l| l.id == id) {
            let listener = self.listeners.remove(pos);
            listener.active.set(false);
        }
    }
}

/// A typed observer registry.
///
/// Listeners are keyed by a channel and an optional component type, so the
/// generic `Add` channel and the per-type `Add` channel for `"health"` are
/// independent. Dispatch works on a snapshot of the matching listeners and
/// holds no borrow while a handler runs; handlers may subscribe, unsubscribe
/// or emit on the same registry. A listener removed mid-dispatch is skipped.
pub struct Emitter<C, E> {
    registry: Rc<RefCell<Registry<C, E>>>,
}

impl<C, E> Default for Emitter<C, E> {
    fn default() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }
}

impl<C, E> fmt::Debug for Emitter<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.registry.borrow().listeners.len())
            .finish()
    }
}

impl<C: PartialEq + Clone + 'static, E: 'static> Emitter<C, E> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `channel`, optionally narrowed to one component type.
    pub fn on(
        &self,
        channel: C,
        component_type: Option<&str>,
        handler: impl Fn(&E) + 'static,
    ) -> Subscription {
        self.register(channel, component_type, false, Box::new(handler))
    }

    /// Register a listener that is removed after its first invocation.
    pub fn once(
        &self,
        channel: C,
        component_type: Option<&str>,
        handler: impl Fn(&E) + 'static,
    ) -> Subscription {
        self.register(channel, component_type, true, Box::new(handler))
    }

    fn register(
        &self,
        channel: C,
        component_type: Option<&str>,
        once: bool,
        handler: Box<dyn Fn(&E)>,
    ) -> Subscription {
        let id = {
            let mut registry = self.registry.borrow_mut();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push(Rc::new(Listener {
                id,
                channel,
                component_type: component_type.map(str::to_owned),
                once,
                active: Cell::new(true),
                handler,
            }));
            id
        };

        let registry: Weak<RefCell<Registry<C, E>>> = Rc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.borrow_mut().remove(id);
            }
        })
    }

    /// Dispatch `event` to the listeners of `channel` (and `component_type`, if given).
    pub fn emit(&self, channel: &C, component_type: Option<&str>, event: &E) {
        let snapshot: Vec<Rc<Listener<C, E>>> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .filter(|l| l.matches(channel, component_type))
            .cloned()
            .collect();

        for listener in snapshot {
            if !listener.active.get() {
                continue;
            }
            if listener.once {
                self.registry.borrow_mut().remove(listener.id);
            }
            (listener.handler)(event);
        }
    }

    /// Dispatch on the generic channel, then on its per-type channel.
    pub fn emit_typed(&self, channel: &C, component_type: &str, event: &E) {
        self.emit(channel, None, event);
        self.emit(channel, Some(component_type), event);
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let drained: Vec<_> = self.registry.borrow_mut().listeners.drain(..).collect();
        for listener in drained {
            listener.active.set(false);
        }
    }

    /// Number of registered listeners across all channels.
    pub fn listener_count(&self) -> usize {
        self.registry.borrow().listeners.len()
    }
}

/// Capability of objects that publish events on typed channels.
///
/// Subscribing to a disposed object is a contract violation.
pub trait Subscribable: Disposable {
    /// Channel identifier.
    type Channel: PartialEq + Clone + 'static;
    /// Event payload delivered to handlers.
    type Event: 'static;

    /// The registry backing this object's channels.
    fn emitter(&self) -> &Emitter<Self::Channel, Self::Event>;

    /// Listen on a generic channel.
    fn subscribe(
        &self,
        channel: Self::Channel,
        handler: impl Fn(&Self::Event) + 'static,
    ) -> CoreResult<Subscription> {
        self.ensure_open()?;
        Ok(self.emitter().on(channel, None, handler))
    }

    /// Listen on the per-type variant of a channel, e.g. `Add` for `"health"` only.
    fn subscribe_type(
        &self,
        channel: Self::Channel,
        component_type: &str,
        handler: impl Fn(&Self::Event) + 'static,
    ) -> CoreResult<Subscription> {
        self.ensure_open()?;
        Ok(self.emitter().on(channel, Some(component_type), handler))
    }

    /// Listen on a generic channel for a single event.
    fn subscribe_once(
        &self,
        channel: Self::Channel,
        handler: impl Fn(&Self::Event) + 'static,
    ) -> CoreResult<Subscription> {
        self.ensure_open()?;
        Ok(self.emitter().once(channel, None, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Ch {
        Ping,
        Pong,
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&u32)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &str| -> Box<dyn Fn(&u32)> {
            let sink = sink.clone();
            let label = label.to_string();
            Box::new(move |n: &u32| sink.borrow_mut().push(format!("{label}:{n}")))
        };
        (log, make)
    }

    #[test]
    fn generic_and_typed_channels_are_independent() {
        let emitter: Emitter<Ch, u32> = Emitter::new();
        let (log, make) = recorder();
        let _a = emitter.on(Ch::Ping, None, make("generic"));
        let _b = emitter.on(Ch::Ping, Some("health"), make("health"));
        let _c = emitter.on(Ch::Ping, Some("mana"), make("mana"));

        emitter.emit_typed(&Ch::Ping, "health", &1);
        emitter.emit(&Ch::Pong, None, &2);

        assert_eq!(*log.borrow(), vec!["generic:1", "health:1"]);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let emitter: Emitter<Ch, u32> = Emitter::new();
        let (log, make) = recorder();
        let sub = emitter.on(Ch::Ping, None, make("a"));
        emitter.emit(&Ch::Ping, None, &1);
        sub.unsubscribe();
        emitter.emit(&Ch::Ping, None, &2);

        assert_eq!(*log.borrow(), vec!["a:1"]);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let emitter: Emitter<Ch, u32> = Emitter::new();
        let (log, make) = recorder();
        let _sub = emitter.once(Ch::Ping, None, make("once"));
        emitter.emit(&Ch::Ping, None, &1);
        emitter.emit(&Ch::Ping, None, &2);

        assert_eq!(*log.borrow(), vec!["once:1"]);
    }

    #[test]
    fn listener_removed_during_dispatch_is_skipped() {
        let emitter: Rc<Emitter<Ch, u32>> = Rc::new(Emitter::new());
        let hits = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot = victim.clone();
        let _first = emitter.on(Ch::Ping, None, move |_| {
            if let Some(sub) = slot.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        let counter = hits.clone();
        *victim.borrow_mut() = Some(emitter.on(Ch::Ping, None, move |_| {
            counter.set(counter.get() + 1);
        }));

        emitter.emit(&Ch::Ping, None, &1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn handlers_may_reenter_the_emitter() {
        let emitter: Rc<Emitter<Ch, u32>> = Rc::new(Emitter::new());
        let (log, make) = recorder();
        let inner = emitter.clone();
        let _relay = emitter.on(Ch::Ping, None, move |n| inner.emit(&Ch::Pong, None, &(n + 1)));
        let _pong = emitter.on(Ch::Pong, None, make("pong"));

        emitter.emit(&Ch::Ping, None, &1);
        assert_eq!(*log.borrow(), vec!["pong:2"]);
    }

    #[test]
    fn clear_drops_everything() {
        let emitter: Emitter<Ch, u32> = Emitter::new();
        let (log, make) = recorder();
        let sub = emitter.on(Ch::Ping, None, make("a"));
        emitter.clear();
        emitter.emit(&Ch::Ping, None, &1);
        sub.unsubscribe();

        assert!(log.borrow().is_empty());
    }
}
