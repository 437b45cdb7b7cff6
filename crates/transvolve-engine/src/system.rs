use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::LocalSet;
use tokio::time::Instant;
use transvolve_core::event::unsubscribe_all;
use transvolve_core::{
    Component, CoreError, Disposable, Emitter, Entity, EntityManager, Lifecycle, ManagerChannel,
    ManagerEvent, Subscribable, Subscription,
};

use crate::config::SystemConfig;
use crate::context::{EngineContext, ExecutionContext, ScopeView, TimeInfo};
use crate::error::{EngineError, EngineResult};

/// Future returned by an executor for one entity.
pub type ExecutorFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;

type Executor = Rc<dyn Fn(ExecutionContext) -> ExecutorFuture>;

/// Channels published by a [`System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemChannel {
    /// An entity entered the scope.
    Watch,
    /// An entity left the scope.
    Unwatch,
    /// The system is being disposed.
    Dispose,
    /// A required component of a scoped entity changed.
    EntityChange,
    /// The scope published a domain-data error.
    Error,
}

/// Payload delivered to system listeners.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// `0` entered the scope.
    Watch(Entity),
    /// `0` left the scope.
    Unwatch(Entity),
    /// The system is being disposed.
    Dispose,
    /// A required component of a scoped entity changed.
    EntityChange {
        /// The scoped entity.
        entity: Entity,
        /// The component that changed.
        component: Component,
        /// State after the update.
        current: Value,
        /// State before the update.
        previous: Value,
    },
    /// The scope published a domain-data error.
    Error(CoreError),
}

/// Outcome of [`System::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Less than one interval has passed; nothing ran.
    Skipped,
    /// The executor ran once per scoped entity.
    Ran {
        /// Number of executor invocations.
        invocations: usize,
        /// Time since the previous execution.
        delta: Duration,
        /// How far past its interval the system ran.
        latency: Duration,
    },
}

impl Execution {
    /// Whether the executor ran.
    pub fn ran(&self) -> bool {
        matches!(self, Self::Ran { .. })
    }
}

struct SystemInner {
    name: String,
    requirements: Vec<String>,
    interval: Duration,
    scope: EntityManager,
    executor: Executor,
    executed_on: Cell<Option<Instant>>,
    latency: Cell<Option<Duration>>,
    wiring: RefCell<Vec<Subscription>>,
    emitter: Emitter<SystemChannel, SystemEvent>,
    lifecycle: Lifecycle,
}

/// A named executor applied to every entity owning a set of required
/// component types.
///
/// The system keeps its scope in its own [`EntityManager`]. Once
/// initialized against a source manager, membership follows component
/// events synchronously: an entity enters the scope as soon as it owns every
/// requirement and leaves it as soon as it loses one, or leaves the source.
///
/// ```
/// use transvolve_core::{Component, Entity, EntityManager};
/// use transvolve_engine::System;
///
/// let regen = System::builder("regen")
///     .requires(["health", "regeneration"])
///     .interval_ms(1000)
///     .executor_fn(|ctx| {
///         let health = ctx.component("health")?.ok_or_else(|| anyhow::anyhow!("no health"))?;
///         let hp: i64 = health.state_at_as("hp")?;
///         health.set_state_at("hp", (hp + 1).into())?;
///         Ok(())
///     })
///     .build()
///     .unwrap();
///
/// let player = Entity::with_components([
///     Component::new("health", serde_json::json!({ "hp": 100 })).unwrap(),
///     Component::marker("regeneration").unwrap(),
/// ])
/// .unwrap();
/// regen.init(&EntityManager::with_entities([player]).unwrap()).unwrap();
/// assert_eq!(regen.scope_len(), 1);
/// ```
#[derive(Clone)]
pub struct System {
    inner: Rc<SystemInner>,
}

impl System {
    /// Start building a system called `name`.
    pub fn builder(name: impl Into<String>) -> SystemBuilder {
        SystemBuilder::from(SystemConfig::new(name))
    }

    /// Create a system from `config` and an async executor.
    pub fn new<F, Fut>(config: SystemConfig, executor: F) -> EngineResult<Self>
    where
        F: Fn(ExecutionContext) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Self::from_parts(config, async_executor(executor))
    }

    fn from_parts(config: SystemConfig, executor: Executor) -> EngineResult<Self> {
        if config.name.is_empty() {
            return Err(CoreError::MissingField("name").into());
        }
        let mut requirements: Vec<String> = Vec::with_capacity(config.requirements.len());
        for requirement in config.requirements {
            if !requirements.contains(&requirement) {
                requirements.push(requirement);
            }
        }
        let scope = config.scope.unwrap_or_default();

        let system = Self {
            inner: Rc::new(SystemInner {
                name: config.name,
                requirements,
                interval: config.interval,
                scope,
                executor,
                executed_on: Cell::new(None),
                latency: Cell::new(None),
                wiring: RefCell::new(Vec::new()),
                emitter: Emitter::new(),
                lifecycle: Lifecycle::new(),
            }),
        };

        let weak = system.downgrade();
        let forward = system
            .inner
            .scope
            .subscribe(ManagerChannel::Error, move |event| {
                if let (Some(system), ManagerEvent::Error(error)) = (weak.upgrade(), event) {
                    system.publish(SystemChannel::Error, SystemEvent::Error(error.clone()));
                }
            })?;
        system.inner.wiring.borrow_mut().push(forward);
        Ok(system)
    }

    /// The system name.
    pub fn name(&self) -> EngineResult<&str> {
        self.ensure_open()?;
        Ok(&self.inner.name)
    }

    pub(crate) fn raw_name(&self) -> &str {
        &self.inner.name
    }

    /// The component types an entity must own to be in scope.
    pub fn requirements(&self) -> EngineResult<&[String]> {
        self.ensure_open()?;
        Ok(&self.inner.requirements)
    }

    /// Minimum time between two executions.
    pub fn interval(&self) -> EngineResult<Duration> {
        self.ensure_open()?;
        Ok(self.inner.interval)
    }

    /// When the executor last completed, or when the system was initialized.
    pub fn executed_on(&self) -> EngineResult<Option<Instant>> {
        self.ensure_open()?;
        Ok(self.inner.executed_on.get())
    }

    /// How far past its interval the last successful execution ran, or
    /// `None` before the first one.
    pub fn latency(&self) -> EngineResult<Option<Duration>> {
        self.ensure_open()?;
        Ok(self.inner.latency.get())
    }

    /// Ordered snapshot of the entities in scope.
    pub fn scope(&self) -> EngineResult<Vec<Entity>> {
        self.ensure_open()?;
        Ok(self.inner.scope.to_vec()?)
    }

    /// Number of entities in scope.
    pub fn scope_len(&self) -> usize {
        self.inner.scope.len()
    }

    /// Whether [`System::init`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.executed_on.get().is_some()
    }

    /// Bring `entity` into scope if it owns every requirement and is not in
    /// scope yet, publishing `Watch`.
    pub fn watch_entity(&self, entity: &Entity) -> EngineResult<()> {
        self.ensure_open()?;
        if self.inner.scope.contains(entity)? {
            return Ok(());
        }
        if entity.has_components(&self.inner.requirements)? {
            self.inner.scope.add_entity(entity.clone())?;
            log::trace!("system \"{}\" watches entity {}", self.inner.name, entity.id()?);
            self.publish(SystemChannel::Watch, SystemEvent::Watch(entity.clone()));
        }
        Ok(())
    }

    /// Drop `entity` from scope if it is there and no longer owns every
    /// requirement, publishing `Unwatch`.
    pub fn unwatch_entity(&self, entity: &Entity) -> EngineResult<()> {
        self.ensure_open()?;
        if !self.inner.scope.contains(entity)? {
            return Ok(());
        }
        if !entity.has_components(&self.inner.requirements)? {
            self.release(entity)?;
        }
        Ok(())
    }

    fn release(&self, entity: &Entity) -> EngineResult<()> {
        if !self.inner.scope.contains(entity)? {
            return Ok(());
        }
        self.inner.scope.remove_entity(entity)?;
        log::trace!("system \"{}\" unwatches entity {}", self.inner.name, entity.id()?);
        self.publish(SystemChannel::Unwatch, SystemEvent::Unwatch(entity.clone()));
        Ok(())
    }

    /// Attach the system to `source` and seed the scope from it.
    ///
    /// From then on the scope follows entities joining or leaving `source`
    /// and gaining or losing required components. Fails if the system is
    /// disposed or already initialized, or if `source` is disposed.
    pub fn init(&self, source: &EntityManager) -> EngineResult<()> {
        self.ensure_open()?;
        if self.is_initialized() {
            return Err(EngineError::AlreadyInitialized(self.inner.name.clone()));
        }
        source.ensure_open()?;

        let mut wiring = Vec::new();
        if let Err(err) = self.wire(source, &mut wiring) {
            unsubscribe_all(wiring);
            return Err(err);
        }
        self.inner.wiring.borrow_mut().extend(wiring);

        for entity in source.to_vec()? {
            self.watch_entity(&entity)?;
        }
        self.inner.executed_on.set(Some(Instant::now()));
        log::debug!(
            "system \"{}\" initialized with {} entities in scope",
            self.inner.name,
            self.scope_len()
        );
        Ok(())
    }

    fn wire(&self, source: &EntityManager, wiring: &mut Vec<Subscription>) -> EngineResult<()> {
        wiring.push(source.subscribe(
            ManagerChannel::Add,
            membership(self.downgrade(), Self::watch_entity),
        )?);
        wiring.push(source.subscribe(
            ManagerChannel::Remove,
            membership(self.downgrade(), Self::release),
        )?);

        for requirement in &self.inner.requirements {
            wiring.push(source.subscribe_type(
                ManagerChannel::EntityAdd,
                requirement,
                membership(self.downgrade(), Self::watch_entity),
            )?);
            wiring.push(self.inner.scope.subscribe_type(
                ManagerChannel::EntityRemove,
                requirement,
                membership(self.downgrade(), Self::unwatch_entity),
            )?);

            let weak = self.downgrade();
            wiring.push(self.inner.scope.subscribe_type(
                ManagerChannel::EntityChange,
                requirement,
                move |event| {
                    let Some(system) = weak.upgrade() else {
                        return;
                    };
                    if let ManagerEvent::EntityChange {
                        entity,
                        component,
                        current,
                        previous,
                    } = event
                    {
                        let relayed = SystemEvent::EntityChange {
                            entity: entity.clone(),
                            component: component.clone(),
                            current: current.clone(),
                            previous: previous.clone(),
                        };
                        system.publish(SystemChannel::EntityChange, relayed);
                    }
                },
            )?);
        }
        Ok(())
    }

    /// Run the executor once per scoped entity, if at least one interval
    /// has passed since the previous run.
    ///
    /// Invocations run concurrently on a local task set and are all awaited.
    /// If any of them fails or panics, the first failure is returned and the
    /// timing bookkeeping is left untouched, so the next call retries.
    pub async fn execute(&self, engine: Option<&EngineContext>) -> EngineResult<Execution> {
        self.ensure_open()?;
        let Some(executed_on) = self.inner.executed_on.get() else {
            return Err(EngineError::NotInitialized(self.inner.name.clone()));
        };

        let delta = Instant::now().saturating_duration_since(executed_on);
        if delta < self.inner.interval {
            return Ok(Execution::Skipped);
        }
        let latency = delta - self.inner.interval;
        let time = TimeInfo { delta, latency };
        let scope = ScopeView::new(self.inner.scope.clone());

        let tasks = LocalSet::new();
        let handles: Vec<_> = self
            .inner
            .scope
            .to_vec()?
            .into_iter()
            .map(|entity| {
                let context = ExecutionContext {
                    entity,
                    time,
                    scope: scope.clone(),
                    engine: engine.cloned(),
                };
                tasks.spawn_local((self.inner.executor)(context))
            })
            .collect();
        let invocations = handles.len();

        let outcomes = tasks
            .run_until(async move {
                let mut outcomes = Vec::with_capacity(handles.len());
                for handle in handles {
                    outcomes.push(match handle.await {
                        Ok(outcome) => outcome,
                        Err(err) => Err(anyhow::anyhow!("executor task failed: {err}")),
                    });
                }
                outcomes
            })
            .await;

        if let Some(source) = outcomes.into_iter().find_map(Result::err) {
            log::warn!("system \"{}\" failed: {source}", self.inner.name);
            return Err(EngineError::Executor {
                system: self.inner.name.clone(),
                source,
            });
        }

        self.inner.latency.set(Some(latency));
        self.inner.executed_on.set(Some(Instant::now()));
        log::trace!(
            "system \"{}\" ran {invocations} invocations (delta {delta:?}, latency {latency:?})",
            self.inner.name
        );
        Ok(Execution::Ran {
            invocations,
            delta,
            latency,
        })
    }

    fn publish(&self, channel: SystemChannel, event: SystemEvent) {
        if let SystemEvent::Error(error) = &event {
            log::debug!("system \"{}\": {error}", self.inner.name);
        }
        self.inner.emitter.emit(&channel, None, &event);
    }

    fn downgrade(&self) -> WeakSystem {
        WeakSystem(Rc::downgrade(&self.inner))
    }
}

impl Disposable for System {
    const KIND: &'static str = "system";

    /// Publishes `Dispose`, drops every listener and wiring subscription,
    /// then disposes the scope. The source manager is left alone.
    fn dispose(&self) {
        if !self.inner.lifecycle.begin_dispose() {
            return;
        }
        self.inner
            .emitter
            .emit(&SystemChannel::Dispose, None, &SystemEvent::Dispose);
        self.inner.emitter.clear();
        let wiring = std::mem::take(&mut *self.inner.wiring.borrow_mut());
        unsubscribe_all(wiring);
        self.inner.scope.dispose();
        self.inner.lifecycle.finish_dispose();
        log::debug!("system \"{}\" disposed", self.inner.name);
    }

    fn is_disposed(&self) -> bool {
        self.inner.lifecycle.is_disposed()
    }
}

impl Subscribable for System {
    type Channel = SystemChannel;
    type Event = SystemEvent;

    fn emitter(&self) -> &Emitter<SystemChannel, SystemEvent> {
        &self.inner.emitter
    }
}

impl PartialEq for System {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for System {}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.inner.name)
            .field("requirements", &self.inner.requirements)
            .field("interval", &self.inner.interval)
            .field("scope", &self.inner.scope.len())
            .finish()
    }
}

struct WeakSystem(Weak<SystemInner>);

impl WeakSystem {
    fn upgrade(&self) -> Option<System> {
        self.0.upgrade().map(|inner| System { inner })
    }
}

/// Listener that applies a membership rule to the entity of a manager event.
fn membership(
    weak: WeakSystem,
    rule: fn(&System, &Entity) -> EngineResult<()>,
) -> impl Fn(&ManagerEvent) + 'static {
    move |event| {
        let (Some(system), Some(entity)) = (weak.upgrade(), event.entity()) else {
            return;
        };
        if let Err(err) = rule(&system, entity) {
            log::warn!("system \"{}\": {err}", system.inner.name);
        }
    }
}

fn async_executor<F, Fut>(executor: F) -> Executor
where
    F: Fn(ExecutionContext) -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    Rc::new(move |context| Box::pin(executor(context)) as ExecutorFuture)
}

/// Chained construction of a [`System`].
pub struct SystemBuilder {
    config: SystemConfig,
    executor: Option<Executor>,
}

impl From<SystemConfig> for SystemBuilder {
    fn from(config: SystemConfig) -> Self {
        Self {
            config,
            executor: None,
        }
    }
}

impl SystemBuilder {
    /// Add required component types.
    pub fn requires<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .requirements
            .extend(requirements.into_iter().map(Into::into));
        self
    }

    /// Set the minimum time between two executions.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the minimum time between two executions, in milliseconds.
    pub fn interval_ms(self, millis: u64) -> Self {
        self.interval(Duration::from_millis(millis))
    }

    /// Keep the scope in an existing manager.
    pub fn scope(mut self, scope: EntityManager) -> Self {
        self.config.scope = Some(scope);
        self
    }

    /// Use an async executor.
    pub fn executor<F, Fut>(mut self, executor: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.executor = Some(async_executor(executor));
        self
    }

    /// Use a synchronous executor.
    pub fn executor_fn<F>(self, executor: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<()> + 'static,
    {
        let executor = Rc::new(executor);
        self.executor(move |context| {
            let executor = executor.clone();
            async move { executor(&context) }
        })
    }

    /// Finish the system. Fails if the name or the executor is missing.
    pub fn build(self) -> EngineResult<System> {
        let executor = self.executor.ok_or(CoreError::MissingField("executor"))?;
        System::from_parts(self.config, executor)
    }
}

impl fmt::Debug for SystemBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemBuilder")
            .field("config", &self.config)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn noop(name: &str, requirements: &[&str]) -> System {
        System::builder(name)
            .requires(requirements.iter().copied())
            .executor_fn(|_| Ok(()))
            .build()
            .unwrap()
    }

    fn entity_with(types: &[&str]) -> Entity {
        Entity::with_components(types.iter().map(|ty| Component::marker(*ty).unwrap())).unwrap()
    }

    fn membership_log(system: &System) -> Rc<RefCell<Vec<&'static str>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for channel in [SystemChannel::Watch, SystemChannel::Unwatch] {
            let sink = log.clone();
            system
                .subscribe(channel, move |event| {
                    let label = match event {
                        SystemEvent::Watch(_) => "watch",
                        SystemEvent::Unwatch(_) => "unwatch",
                        _ => "other",
                    };
                    sink.borrow_mut().push(label);
                })
                .unwrap();
        }
        log
    }

    #[test]
    fn builder_requires_name_and_executor() {
        let missing_executor = System::builder("spawn").build().unwrap_err();
        assert!(matches!(
            missing_executor,
            EngineError::Core(CoreError::MissingField("executor"))
        ));

        let missing_name = System::builder("").executor_fn(|_| Ok(())).build().unwrap_err();
        assert!(matches!(
            missing_name,
            EngineError::Core(CoreError::MissingField("name"))
        ));
    }

    #[test]
    fn new_from_config() {
        let config = SystemConfig::new("decay")
            .with_requirements(["decay", "decay"])
            .with_interval(Duration::from_millis(1000));
        let system = System::new(config, |_| async { anyhow::Ok(()) }).unwrap();

        assert_eq!(system.name().unwrap(), "decay");
        assert_eq!(system.requirements().unwrap(), ["decay".to_string()]);
        assert_eq!(system.interval().unwrap(), Duration::from_secs(1));
        assert!(!system.is_initialized());
        assert_eq!(system.latency().unwrap(), None);
    }

    #[test]
    fn watch_and_unwatch_follow_requirements() {
        let system = noop("regen", &["health", "regeneration"]);
        let log = membership_log(&system);
        let partial = entity_with(&["health"]);
        let full = entity_with(&["health", "regeneration"]);

        system.watch_entity(&partial).unwrap();
        system.watch_entity(&full).unwrap();
        system.watch_entity(&full).unwrap();
        assert_eq!(system.scope().unwrap(), vec![full.clone()]);

        system.unwatch_entity(&full).unwrap();
        assert_eq!(system.scope_len(), 1);

        full.remove_component("regeneration").unwrap();
        system.unwatch_entity(&full).unwrap();
        system.unwatch_entity(&partial).unwrap();

        assert_eq!(system.scope_len(), 0);
        assert_eq!(*log.borrow(), vec!["watch", "unwatch"]);
    }

    #[test]
    fn init_seeds_scope_and_tracks_membership() {
        let ready = entity_with(&["health", "regeneration"]);
        let later = entity_with(&["health"]);
        let source = EntityManager::with_entities([ready.clone(), later.clone()]).unwrap();
        let system = noop("regen", &["health", "regeneration"]);

        system.init(&source).unwrap();
        assert!(system.is_initialized());
        assert_eq!(system.scope().unwrap(), vec![ready.clone()]);

        later
            .add_component(Component::marker("regeneration").unwrap())
            .unwrap();
        assert_eq!(system.scope().unwrap(), vec![ready.clone(), later.clone()]);

        ready.remove_component("health").unwrap();
        assert_eq!(system.scope().unwrap(), vec![later.clone()]);

        let newcomer = entity_with(&["health", "regeneration"]);
        source.add_entity(newcomer.clone()).unwrap();
        assert_eq!(system.scope().unwrap(), vec![later.clone(), newcomer.clone()]);

        source.remove_entity(&later).unwrap();
        newcomer.dispose();
        assert_eq!(system.scope_len(), 0);
    }

    #[test]
    fn init_twice_or_on_disposed_source_fails() {
        let system = noop("spawn", &["spawn"]);
        let source = EntityManager::new();
        system.init(&source).unwrap();
        assert!(matches!(
            system.init(&source),
            Err(EngineError::AlreadyInitialized(name)) if name == "spawn"
        ));

        let other = noop("other", &[]);
        let gone = EntityManager::new();
        gone.dispose();
        assert!(matches!(
            other.init(&gone),
            Err(EngineError::Core(CoreError::Disposed("entity manager")))
        ));
        assert!(!other.is_initialized());
    }

    #[test]
    fn required_changes_are_rebroadcast_once() {
        let entity = Entity::with_components([
            Component::new("health", json!({ "hp": 1 })).unwrap(),
            Component::new("name", json!("Mellow")).unwrap(),
        ])
        .unwrap();
        let source = EntityManager::with_entities([entity.clone()]).unwrap();
        let system = noop("regen", &["health"]);
        system.init(&source).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        system
            .subscribe(SystemChannel::EntityChange, move |event| {
                if let SystemEvent::EntityChange { current, .. } = event {
                    sink.borrow_mut().push(current.clone());
                }
            })
            .unwrap();

        let health = entity.component("health").unwrap().unwrap();
        health.set_state_at("hp", json!(2)).unwrap();
        let name = entity.component("name").unwrap().unwrap();
        name.set_state(json!("Chimo")).unwrap();

        assert_eq!(*seen.borrow(), vec![json!({ "hp": 2 })]);
    }

    #[test]
    fn scope_errors_bubble_to_the_system() {
        let scope = EntityManager::new();
        let system = System::builder("scoped")
            .scope(scope.clone())
            .executor_fn(|_| Ok(()))
            .build()
            .unwrap();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        system
            .subscribe(SystemChannel::Error, move |event| {
                if let SystemEvent::Error(error) = event {
                    sink.borrow_mut().push(error.clone());
                }
            })
            .unwrap();

        let stranger = Entity::new();
        scope.remove_entity(&stranger).unwrap();

        assert_eq!(
            *errors.borrow(),
            vec![CoreError::EntityNotFound(stranger.id().unwrap())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn execute_waits_for_the_interval() {
        let entity = Entity::with_components([Component::new("health", json!({ "hp": 100 })).unwrap()])
            .unwrap();
        let source = EntityManager::with_entities([entity.clone()]).unwrap();
        let system = System::builder("regen")
            .requires(["health"])
            .interval_ms(1000)
            .executor_fn(|ctx| {
                let health = ctx
                    .component("health")?
                    .ok_or_else(|| anyhow::anyhow!("missing health"))?;
                let hp: i64 = health.state_at_as("hp")?;
                health.set_state_at("hp", json!(hp + 1))?;
                Ok(())
            })
            .build()
            .unwrap();

        assert!(matches!(
            system.execute(None).await,
            Err(EngineError::NotInitialized(_))
        ));
        system.init(&source).unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(system.execute(None).await.unwrap(), Execution::Skipped);

        tokio::time::advance(Duration::from_millis(700)).await;
        let execution = system.execute(None).await.unwrap();
        assert_eq!(
            execution,
            Execution::Ran {
                invocations: 1,
                delta: Duration::from_millis(1200),
                latency: Duration::from_millis(200),
            }
        );
        assert_eq!(system.latency().unwrap(), Some(Duration::from_millis(200)));
        assert_eq!(
            entity.component("health").unwrap().unwrap().state_at("hp").unwrap(),
            json!(101)
        );
        assert_eq!(system.execute(None).await.unwrap(), Execution::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn async_executors_run_concurrently() {
        let source = EntityManager::with_entities((0..3).map(|_| entity_with(&["tick"]))).unwrap();
        let finished = Rc::new(Cell::new(0));
        let counter = finished.clone();
        let system = System::builder("slow")
            .requires(["tick"])
            .interval_ms(10)
            .executor(move |ctx| {
                let counter = counter.clone();
                async move {
                    assert_eq!(ctx.scope.len(), 3);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    counter.set(counter.get() + 1);
                    anyhow::Ok(())
                }
            })
            .build()
            .unwrap();
        system.init(&source).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;

        let before = Instant::now();
        let execution = system.execute(None).await.unwrap();

        assert!(execution.ran());
        assert_eq!(finished.get(), 3);
        assert_eq!(Instant::now() - before, Duration::from_millis(100));
        assert_eq!(system.executed_on().unwrap(), Some(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_execution_keeps_bookkeeping() {
        let source = EntityManager::with_entities([entity_with(&["fragile"])]).unwrap();
        let system = System::builder("fragile")
            .requires(["fragile"])
            .interval_ms(10)
            .executor_fn(|_| Err(anyhow::anyhow!("shattered")))
            .build()
            .unwrap();
        system.init(&source).unwrap();
        let initialized_on = system.executed_on().unwrap();
        tokio::time::advance(Duration::from_millis(25)).await;

        let err = system.execute(None).await.unwrap_err();

        assert!(matches!(
            &err,
            EngineError::Executor { system, source } if system == "fragile" && source.to_string() == "shattered"
        ));
        assert_eq!(system.executed_on().unwrap(), initialized_on);
        assert_eq!(system.latency().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_executor_is_reported() {
        let source = EntityManager::with_entities([entity_with(&["boom"])]).unwrap();
        let system = System::builder("boom")
            .requires(["boom"])
            .interval_ms(1)
            .executor_fn(|_| panic!("kaboom"))
            .build()
            .unwrap();
        system.init(&source).unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;

        assert!(matches!(
            system.execute(None).await,
            Err(EngineError::Executor { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn executor_may_unwatch_its_own_entity() {
        let entity = Entity::with_components([Component::new("decay", json!({ "timer": 0 })).unwrap()])
            .unwrap();
        let source = EntityManager::with_entities([entity.clone()]).unwrap();
        let system = System::builder("decay")
            .requires(["decay"])
            .interval_ms(1)
            .executor_fn(|ctx| {
                ctx.entity.remove_component("decay")?;
                Ok(())
            })
            .build()
            .unwrap();
        system.init(&source).unwrap();
        let log = membership_log(&system);
        tokio::time::advance(Duration::from_millis(1)).await;

        system.execute(None).await.unwrap();

        assert_eq!(system.scope_len(), 0);
        assert_eq!(*log.borrow(), vec!["unwatch"]);
        assert!(source.contains(&entity).unwrap());
    }

    #[test]
    fn dispose_releases_scope_but_not_source() {
        let entity = entity_with(&["health"]);
        let source = EntityManager::with_entities([entity.clone()]).unwrap();
        let system = noop("regen", &["health"]);
        system.init(&source).unwrap();
        let disposed = Rc::new(Cell::new(0));
        let counter = disposed.clone();
        system
            .subscribe(SystemChannel::Dispose, move |_| counter.set(counter.get() + 1))
            .unwrap();

        system.dispose();
        system.dispose();

        assert_eq!(disposed.get(), 1);
        assert!(!source.is_disposed());
        assert_eq!(source.len(), 1);
        assert!(matches!(
            system.scope(),
            Err(EngineError::Core(CoreError::Disposed("system")))
        ));
        source.add_entity(entity_with(&["health"])).unwrap();
        entity.remove_component("health").unwrap();
    }
}
