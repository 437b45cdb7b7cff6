use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use transvolve_core::event::unsubscribe_all;
use transvolve_core::{
    Component, Disposable, Emitter, Entity, EntityChannel, EntityEvent, EntityId,
    EntityManager, EntityTarget, Lifecycle, ManagerChannel, ManagerEvent, Subscribable,
    Subscription,
};

use crate::config::EngineConfig;
use crate::context::{self, EngineContext};
use crate::error::{EngineError, EngineResult};
use crate::system::{System, SystemChannel, SystemEvent};

/// Where an [`Engine`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Created, systems not initialized yet.
    Pending,
    /// Systems initialized, timer not running.
    Initialized,
    /// Timer running, no tick in flight.
    Idle,
    /// A tick is in flight.
    Running,
    /// `stop` was requested while a tick was in flight.
    Stopping,
    /// Timer cancelled and no tick in flight.
    Stopped,
    /// Reserved for unrecoverable failures; never entered at the moment.
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Initialized => "initialized",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "in error",
        };
        f.write_str(name)
    }
}

/// Channels published by an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineChannel {
    /// `init` completed.
    Initialize,
    /// The timer started.
    Start,
    /// A tick finished executing every system.
    Tick,
    /// The last in-flight tick finished while running.
    Idle,
    /// The engine came to a stop.
    Stop,
    /// The engine is being disposed.
    Dispose,
    /// A system, the primary manager, or one of its entities reported an
    /// error, or an executor failed.
    Error,
}

/// Payload delivered to engine listeners.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `init` completed.
    Initialize,
    /// The timer started.
    Start,
    /// Tick number `0` (counting from one) finished.
    Tick(u64),
    /// No tick is in flight any more.
    Idle,
    /// The engine came to a stop.
    Stop,
    /// The engine is being disposed.
    Dispose,
    /// Something reported an error.
    Error(Rc<EngineError>),
}

struct SystemEntry {
    system: System,
    errors: Subscription,
}

struct EngineInner {
    interval: Duration,
    manager: EntityManager,
    systems: RefCell<Vec<SystemEntry>>,
    state: Cell<EngineState>,
    ticks: Cell<u64>,
    in_flight: Cell<usize>,
    timer: RefCell<Option<JoinHandle<()>>>,
    entity_wiring: RefCell<HashMap<EntityId, Subscription>>,
    manager_wiring: RefCell<Vec<Subscription>>,
    emitter: Emitter<EngineChannel, EngineEvent>,
    lifecycle: Lifecycle,
}

/// Drives registered systems on a fixed-delay timer.
///
/// Systems execute sequentially, in registration order, once per tick.
/// Errors from systems, from the primary manager, and from entities in the
/// primary manager are re-published on the engine's `Error` channel.
///
/// The engine is single-threaded: [`Engine::start`] spawns its timer with
/// [`tokio::task::spawn_local`], so it has to be called from inside a
/// [`tokio::task::LocalSet`].
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    /// Create a pending engine. Fails if the configured manager is disposed.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let manager = config.manager.unwrap_or_default();
        manager.ensure_open()?;

        let engine = Self {
            inner: Rc::new(EngineInner {
                interval: config.interval,
                manager,
                systems: RefCell::new(Vec::new()),
                state: Cell::new(EngineState::Pending),
                ticks: Cell::new(0),
                in_flight: Cell::new(0),
                timer: RefCell::new(None),
                entity_wiring: RefCell::new(HashMap::new()),
                manager_wiring: RefCell::new(Vec::new()),
                emitter: Emitter::new(),
                lifecycle: Lifecycle::new(),
            }),
        };
        engine.wire_manager()?;
        Ok(engine)
    }

    fn wire_manager(&self) -> EngineResult<()> {
        let manager = &self.inner.manager;
        let mut wiring = Vec::with_capacity(3);

        let weak = self.downgrade();
        wiring.push(manager.subscribe(ManagerChannel::Error, move |event| {
            if let (Some(engine), ManagerEvent::Error(error)) = (weak.upgrade(), event) {
                engine.publish_error(error.clone().into());
            }
        })?);
        let weak = self.downgrade();
        wiring.push(manager.subscribe(ManagerChannel::Add, move |event| {
            if let (Some(engine), ManagerEvent::Add(entity)) = (weak.upgrade(), event) {
                engine.watch_errors(entity);
            }
        })?);
        let weak = self.downgrade();
        wiring.push(manager.subscribe(ManagerChannel::Remove, move |event| {
            if let (Some(engine), ManagerEvent::Remove(entity)) = (weak.upgrade(), event) {
                engine.forget_errors(entity);
            }
        })?);
        self.inner.manager_wiring.borrow_mut().extend(wiring);

        for entity in manager.to_vec()? {
            self.watch_errors(&entity);
        }
        Ok(())
    }

    fn watch_errors(&self, entity: &Entity) {
        let weak = self.downgrade();
        let subscribed = entity.id().and_then(|id| {
            let subscription = entity.subscribe(EntityChannel::Error, move |event| {
                if let (Some(engine), EntityEvent::Error { error, .. }) = (weak.upgrade(), event) {
                    engine.publish_error(error.clone().into());
                }
            })?;
            Ok((id, subscription))
        });
        match subscribed {
            Ok((id, subscription)) => {
                let previous = self.inner.entity_wiring.borrow_mut().insert(id, subscription);
                unsubscribe_all(previous);
            }
            Err(err) => log::warn!("engine cannot observe entity: {err}"),
        }
    }

    fn forget_errors(&self, entity: &Entity) {
        // Entities leave the manager before their teardown completes.
        let Ok(id) = entity.id() else {
            return;
        };
        let subscription = self.inner.entity_wiring.borrow_mut().remove(&id);
        unsubscribe_all(subscription);
    }

    /// The current lifecycle state. Readable after disposal.
    pub fn state(&self) -> EngineState {
        self.inner.state.get()
    }

    /// Number of ticks completed since creation.
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.get()
    }

    /// The primary entity manager.
    pub fn manager(&self) -> EngineResult<EntityManager> {
        self.ensure_open()?;
        Ok(self.inner.manager.clone())
    }

    /// Registered systems, in registration order.
    pub fn systems(&self) -> EngineResult<Vec<System>> {
        self.ensure_open()?;
        Ok(self
            .inner
            .systems
            .borrow()
            .iter()
            .map(|entry| entry.system.clone())
            .collect())
    }

    /// The registered system called `name`.
    pub fn system(&self, name: &str) -> EngineResult<Option<System>> {
        self.ensure_open()?;
        Ok(self
            .inner
            .systems
            .borrow()
            .iter()
            .find(|entry| entry.system.raw_name() == name)
            .map(|entry| entry.system.clone()))
    }

    /// Add entities to the primary manager.
    pub fn add_entities(&self, entities: impl IntoIterator<Item = Entity>) -> EngineResult<()> {
        self.ensure_open()?;
        Ok(self.inner.manager.add_entities(entities)?)
    }

    /// Remove entities from the primary manager, without disposing them.
    pub fn remove_entities<I, T>(&self, targets: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityTarget>,
    {
        self.ensure_open()?;
        Ok(self.inner.manager.remove_entities(targets)?)
    }

    /// Create an entity owning `components` and add it to the primary manager.
    pub fn create_entity(
        &self,
        components: impl IntoIterator<Item = Component>,
    ) -> EngineResult<Entity> {
        self.ensure_open()?;
        context::create_entity(&self.inner.manager, components)
    }

    /// Register systems, in order.
    ///
    /// A name that is already registered is skipped with
    /// [`EngineError::DuplicateSystemName`] on the error channel. Once the
    /// engine is initialized, new systems are initialized right away.
    pub fn add_systems(&self, systems: impl IntoIterator<Item = System>) -> EngineResult<()> {
        self.ensure_open()?;
        for system in systems {
            let name = system.name()?.to_string();
            let taken = self
                .inner
                .systems
                .borrow()
                .iter()
                .any(|entry| entry.system.raw_name() == name);
            if taken {
                self.publish_error(EngineError::DuplicateSystemName(name));
                continue;
            }

            let weak = self.downgrade();
            let errors = system.subscribe(SystemChannel::Error, move |event| {
                if let (Some(engine), SystemEvent::Error(error)) = (weak.upgrade(), event) {
                    engine.publish_error(error.clone().into());
                }
            })?;
            if self.state() != EngineState::Pending && !system.is_initialized() {
                if let Err(err) = system.init(&self.inner.manager) {
                    errors.unsubscribe();
                    return Err(err);
                }
            }
            log::debug!("engine registered system \"{name}\"");
            self.inner
                .systems
                .borrow_mut()
                .push(SystemEntry { system, errors });
        }
        Ok(())
    }

    /// Unregister the systems called `names` and return them, undisposed.
    ///
    /// Unknown names are reported as [`EngineError::SystemNotFound`] on the
    /// error channel.
    pub fn remove_systems<I, S>(&self, names: I) -> EngineResult<Vec<System>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open()?;
        let mut removed = Vec::new();
        for name in names {
            let name = name.as_ref();
            let entry = {
                let mut systems = self.inner.systems.borrow_mut();
                systems
                    .iter()
                    .position(|entry| entry.system.raw_name() == name)
                    .map(|index| systems.remove(index))
            };
            match entry {
                Some(entry) => {
                    entry.errors.unsubscribe();
                    log::debug!("engine unregistered system \"{name}\"");
                    removed.push(entry.system);
                }
                None => self.publish_error(EngineError::SystemNotFound(name.to_string())),
            }
        }
        Ok(removed)
    }

    /// Initialize every registered system against the primary manager.
    ///
    /// Only valid while pending. If a system fails to initialize, its error
    /// is returned and the engine stays pending.
    pub fn init(&self) -> EngineResult<()> {
        self.ensure_open()?;
        self.expect_state("init", &[EngineState::Pending])?;

        for system in self.systems()? {
            if !system.is_initialized() {
                system.init(&self.inner.manager)?;
            }
        }
        self.inner.state.set(EngineState::Initialized);
        log::debug!("engine initialized");
        self.publish(EngineChannel::Initialize, EngineEvent::Initialize);
        Ok(())
    }

    /// Start the tick timer. The first tick fires one interval from now.
    ///
    /// Only valid once initialized or after a stop.
    ///
    /// # Panics
    ///
    /// Panics when called outside a [`tokio::task::LocalSet`].
    pub fn start(&self) -> EngineResult<()> {
        self.ensure_open()?;
        self.expect_state("start", &[EngineState::Initialized, EngineState::Stopped])?;

        // A zero period would make the timer spin.
        let period = self.inner.interval.max(Duration::from_millis(1));
        let first = Instant::now() + period;
        let weak = self.downgrade();
        let timer = tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                tokio::task::spawn_local(async move { engine.tick().await });
            }
        });
        *self.inner.timer.borrow_mut() = Some(timer);

        self.inner.state.set(EngineState::Running);
        log::debug!("engine started (interval {period:?})");
        self.publish(EngineChannel::Start, EngineEvent::Start);
        Ok(())
    }

    /// Cancel the timer.
    ///
    /// From idle the engine stops at once. While a tick is in flight it
    /// enters `Stopping` and the tick completes the stop. Executor
    /// invocations already running are never interrupted.
    pub fn stop(&self) -> EngineResult<()> {
        self.ensure_open()?;
        let state = self.expect_state("stop", &[EngineState::Running, EngineState::Idle])?;
        self.cancel_timer();

        if state == EngineState::Running && self.inner.in_flight.get() > 0 {
            self.inner.state.set(EngineState::Stopping);
            log::debug!("engine stopping");
        } else {
            self.finish_stop();
        }
        Ok(())
    }

    fn finish_stop(&self) {
        self.inner.state.set(EngineState::Stopped);
        log::debug!("engine stopped after {} ticks", self.ticks());
        self.publish(EngineChannel::Stop, EngineEvent::Stop);
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.inner.timer.borrow_mut().take() {
            timer.abort();
        }
    }

    fn expect_state(&self, op: &'static str, allowed: &[EngineState]) -> EngineResult<EngineState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(EngineError::InvalidTransition {
                op,
                state: state.to_string(),
            })
        }
    }

    async fn tick(&self) {
        // A tick queued by the timer before `stop()` must not run.
        let live = matches!(self.state(), EngineState::Running | EngineState::Idle);
        if !live || self.is_disposed() {
            return;
        }
        self.inner.in_flight.set(self.inner.in_flight.get() + 1);
        if self.state() == EngineState::Idle {
            self.inner.state.set(EngineState::Running);
        }

        let context = EngineContext::new(self.inner.manager.clone());
        let systems: Vec<System> = self
            .inner
            .systems
            .borrow()
            .iter()
            .map(|entry| entry.system.clone())
            .collect();
        for system in systems {
            if system.is_disposed() {
                continue;
            }
            if let Err(err) = system.execute(Some(&context)).await {
                self.publish_error(err);
            }
        }

        let tick = self.inner.ticks.get() + 1;
        self.inner.ticks.set(tick);
        self.inner.in_flight.set(self.inner.in_flight.get() - 1);
        if self.is_disposed() {
            return;
        }
        self.publish(EngineChannel::Tick, EngineEvent::Tick(tick));

        if self.inner.in_flight.get() == 0 {
            match self.state() {
                EngineState::Running => {
                    self.inner.state.set(EngineState::Idle);
                    self.publish(EngineChannel::Idle, EngineEvent::Idle);
                }
                EngineState::Stopping => self.finish_stop(),
                _ => {}
            }
        }
    }

    fn publish(&self, channel: EngineChannel, event: EngineEvent) {
        self.inner.emitter.emit(&channel, None, &event);
    }

    fn publish_error(&self, error: EngineError) {
        log::debug!("engine: {error}");
        self.publish(EngineChannel::Error, EngineEvent::Error(Rc::new(error)));
    }

    fn downgrade(&self) -> WeakEngine {
        WeakEngine(Rc::downgrade(&self.inner))
    }
}

impl Disposable for Engine {
    const KIND: &'static str = "engine";

    /// Stops the timer, publishes `Dispose`, drops every listener and
    /// wiring subscription, then disposes the primary manager. Registered
    /// systems are left alone.
    fn dispose(&self) {
        if !self.inner.lifecycle.begin_dispose() {
            return;
        }
        if matches!(self.state(), EngineState::Running | EngineState::Idle) {
            // Best effort: the state was just checked.
            let _ = self.stop();
        }
        self.cancel_timer();
        self.publish(EngineChannel::Dispose, EngineEvent::Dispose);
        self.inner.emitter.clear();

        let systems = std::mem::take(&mut *self.inner.systems.borrow_mut());
        unsubscribe_all(systems.into_iter().map(|entry| entry.errors));
        let manager_wiring = std::mem::take(&mut *self.inner.manager_wiring.borrow_mut());
        unsubscribe_all(manager_wiring);
        let entity_wiring = std::mem::take(&mut *self.inner.entity_wiring.borrow_mut());
        unsubscribe_all(entity_wiring.into_values());

        self.inner.manager.dispose();
        self.inner.lifecycle.finish_dispose();
        log::debug!("engine disposed");
    }

    fn is_disposed(&self) -> bool {
        self.inner.lifecycle.is_disposed()
    }
}

impl Subscribable for Engine {
    type Channel = EngineChannel;
    type Event = EngineEvent;

    fn emitter(&self) -> &Emitter<EngineChannel, EngineEvent> {
        &self.inner.emitter
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .field("systems", &self.inner.systems.borrow().len())
            .field("entities", &self.inner.manager.len())
            .finish()
    }
}

struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    fn upgrade(&self) -> Option<Engine> {
        self.0.upgrade().map(|inner| Engine { inner })
    }
}
