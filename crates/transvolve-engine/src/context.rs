use std::time::Duration;

use transvolve_core::{Component, Entity, EntityId, EntityManager, EntityTarget};

use crate::error::EngineResult;

/// Timing of the current system execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeInfo {
    /// Time since the previous execution (or since `init`).
    pub delta: Duration,
    /// How far past its interval the system ran.
    pub latency: Duration,
}

/// Read-only view of a system's scope.
#[derive(Debug, Clone)]
pub struct ScopeView {
    manager: EntityManager,
}

impl ScopeView {
    pub(crate) fn new(manager: EntityManager) -> Self {
        Self { manager }
    }

    /// Number of entities in scope.
    pub fn len(&self) -> usize {
        self.manager.len()
    }

    /// Whether the scope is empty.
    pub fn is_empty(&self) -> bool {
        self.manager.is_empty()
    }

    /// The scoped entity stored under `id`.
    pub fn entity(&self, id: EntityId) -> EngineResult<Option<Entity>> {
        Ok(self.manager.entity(id)?)
    }

    /// Scoped entities matching `predicate`, in scope order.
    pub fn find(&self, predicate: impl FnMut(&Entity) -> bool) -> EngineResult<Vec<Entity>> {
        Ok(self.manager.find(predicate)?)
    }

    /// Whether `entity` is in scope.
    pub fn contains(&self, entity: &Entity) -> EngineResult<bool> {
        Ok(self.manager.contains(entity)?)
    }

    /// Call `iteratee` for each scoped entity.
    pub fn for_each(&self, iteratee: impl FnMut(&Entity)) -> EngineResult<()> {
        Ok(self.manager.for_each(iteratee)?)
    }

    /// Ordered snapshot of the scope.
    pub fn to_vec(&self) -> EngineResult<Vec<Entity>> {
        Ok(self.manager.to_vec()?)
    }
}

/// Access to the engine's primary manager from inside an executor.
#[derive(Debug, Clone)]
pub struct EngineContext {
    manager: EntityManager,
}

impl EngineContext {
    pub(crate) fn new(manager: EntityManager) -> Self {
        Self { manager }
    }

    /// Number of entities in the primary manager.
    pub fn len(&self) -> usize {
        self.manager.len()
    }

    /// Whether the primary manager is empty.
    pub fn is_empty(&self) -> bool {
        self.manager.is_empty()
    }

    /// The entity stored under `id`.
    pub fn entity(&self, id: EntityId) -> EngineResult<Option<Entity>> {
        Ok(self.manager.entity(id)?)
    }

    /// Entities matching `predicate`, in insertion order.
    pub fn find(&self, predicate: impl FnMut(&Entity) -> bool) -> EngineResult<Vec<Entity>> {
        Ok(self.manager.find(predicate)?)
    }

    /// Remove entities from the primary manager (without disposing them).
    pub fn remove_entities<I, T>(&self, targets: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityTarget>,
    {
        Ok(self.manager.remove_entities(targets)?)
    }

    /// Create an entity owning `components` and add it to the primary manager.
    pub fn create_entity(
        &self,
        components: impl IntoIterator<Item = Component>,
    ) -> EngineResult<Entity> {
        create_entity(&self.manager, components)
    }
}

pub(crate) fn create_entity(
    manager: &EntityManager,
    components: impl IntoIterator<Item = Component>,
) -> EngineResult<Entity> {
    let entity = Entity::with_components(components)?;
    manager.add_entity(entity.clone())?;
    Ok(entity)
}

/// Everything an executor receives for one entity.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The entity being processed.
    pub entity: Entity,
    /// Timing of this execution.
    pub time: TimeInfo,
    /// The system's scope at the start of this execution.
    pub scope: ScopeView,
    /// The running engine, when executed by one.
    pub engine: Option<EngineContext>,
}

impl ExecutionContext {
    /// Shorthand for the component of `component_type` on the entity.
    pub fn component(&self, component_type: &str) -> EngineResult<Option<Component>> {
        Ok(self.entity.component(component_type)?)
    }
}
