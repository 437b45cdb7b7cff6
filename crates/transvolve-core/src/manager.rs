use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::component::Component;
use crate::entity::{Entity, EntityChannel, EntityEvent, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::event::{Emitter, Subscribable, Subscription, unsubscribe_all};
use crate::lifecycle::{Disposable, Lifecycle};

/// Channels published by an [`EntityManager`].
///
/// The `Entity*` channels re-broadcast the events of contained entities and
/// are also published per component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerChannel {
    /// An entity joined the manager.
    Add,
    /// An entity left the manager.
    Remove,
    /// A contained entity adopted a component.
    EntityAdd,
    /// A component of a contained entity changed.
    EntityChange,
    /// A contained entity lost a component.
    EntityRemove,
    /// The manager is being disposed.
    Dispose,
    /// A domain-data error occurred.
    Error,
}

/// Payload delivered to manager listeners.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// `0` joined the manager.
    Add(Entity),
    /// `0` left the manager.
    Remove(Entity),
    /// A contained entity adopted `component`.
    EntityAdd {
        /// The contained entity.
        entity: Entity,
        /// The adopted component.
        component: Component,
    },
    /// A component of a contained entity changed.
    EntityChange {
        /// The contained entity.
        entity: Entity,
        /// The component that changed.
        component: Component,
        /// State after the update.
        current: Value,
        /// State before the update.
        previous: Value,
    },
    /// A contained entity lost `component`.
    EntityRemove {
        /// The contained entity.
        entity: Entity,
        /// The removed component.
        component: Component,
    },
    /// The manager is being disposed.
    Dispose,
    /// A lookup or mutation hit a domain-data condition.
    Error(CoreError),
}

impl ManagerEvent {
    /// The entity this event is about, if any.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Add(entity) | Self::Remove(entity) => Some(entity),
            Self::EntityAdd { entity, .. }
            | Self::EntityChange { entity, .. }
            | Self::EntityRemove { entity, .. } => Some(entity),
            Self::Dispose | Self::Error(_) => None,
        }
    }
}

/// Something that identifies an entity to remove: its id or the instance.
#[derive(Debug, Clone)]
pub enum EntityTarget {
    /// Whatever entity is stored under this id.
    Id(EntityId),
    /// This exact instance.
    Instance(Entity),
}

impl EntityTarget {
    fn id(&self) -> EntityId {
        match self {
            Self::Id(id) => *id,
            Self::Instance(entity) => entity.raw_id(),
        }
    }
}

impl From<EntityId> for EntityTarget {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl From<Entity> for EntityTarget {
    fn from(entity: Entity) -> Self {
        Self::Instance(entity)
    }
}

impl From<&Entity> for EntityTarget {
    fn from(entity: &Entity) -> Self {
        Self::Instance(entity.clone())
    }
}

struct Node {
    entity: Entity,
    prev: Option<usize>,
    next: Option<usize>,
    subscriptions: Vec<Subscription>,
}

/// Insertion-ordered entity storage: a doubly linked list threaded through
/// an arena of slots, plus an id index for O(1) lookup and unlink.
#[derive(Default)]
struct EntityList {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<EntityId, usize>,
}

impl EntityList {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn get(&self, id: EntityId) -> Option<&Entity> {
        let slot = *self.index.get(&id)?;
        self.node(slot).map(|node| &node.entity)
    }

    fn head(&self) -> Option<&Entity> {
        self.head.and_then(|slot| self.node(slot)).map(|node| &node.entity)
    }

    fn push_back(&mut self, entity: Entity, subscriptions: Vec<Subscription>) {
        let id = entity.raw_id();
        let node = Node {
            entity,
            prev: self.tail,
            next: None,
            subscriptions,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        match self.tail.and_then(|tail| self.node_mut(tail)) {
            Some(tail) => tail.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(id, slot);
    }

    fn remove(&mut self, id: EntityId) -> Option<Node> {
        let slot = self.index.remove(&id)?;
        let node = self.slots.get_mut(slot)?.take()?;

        match node.prev.and_then(|prev| self.node_mut(prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.node_mut(next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(slot);
        Some(node)
    }

    fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        std::iter::successors(self.head.and_then(|slot| self.node(slot)), |node| {
            node.next.and_then(|slot| self.node(slot))
        })
        .map(|node| &node.entity)
    }
}

struct ManagerInner {
    entities: RefCell<EntityList>,
    emitter: Emitter<ManagerChannel, ManagerEvent>,
    lifecycle: Lifecycle,
}

/// An insertion-ordered collection of entities that re-broadcasts their
/// events.
///
/// Every operation that walks the collection works on a snapshot, so
/// callbacks may add or remove entities freely. A contained entity that is
/// disposed is removed automatically. Disposing the manager removes its
/// entities without disposing them.
#[derive(Clone)]
pub struct EntityManager {
    inner: Rc<ManagerInner>,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                entities: RefCell::new(EntityList::default()),
                emitter: Emitter::new(),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    /// Create a manager that already contains `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> CoreResult<Self> {
        let manager = Self::new();
        manager.add_entities(entities)?;
        Ok(manager)
    }

    /// Number of contained entities. Always zero once disposed.
    pub fn len(&self) -> usize {
        self.inner.entities.borrow().len()
    }

    /// Whether the manager contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entity stored under `id`, publishing
    /// [`CoreError::EntityNotFound`] when there is none.
    pub fn entity(&self, id: EntityId) -> CoreResult<Option<Entity>> {
        self.ensure_open()?;
        let found = self.inner.entities.borrow().get(id).cloned();
        if found.is_none() {
            self.publish_error(CoreError::EntityNotFound(id));
        }
        Ok(found)
    }

    /// Every contained entity, in insertion order.
    pub fn entities(&self) -> CoreResult<Vec<Entity>> {
        self.to_vec()
    }

    /// The entities stored under `ids`, in argument order, one error event
    /// per miss.
    pub fn entities_of(&self, ids: impl IntoIterator<Item = EntityId>) -> CoreResult<Vec<Entity>> {
        self.ensure_open()?;
        let mut found = Vec::new();
        for id in ids {
            found.extend(self.entity(id)?);
        }
        Ok(found)
    }

    /// The entities matching `predicate`, in insertion order.
    pub fn find(&self, mut predicate: impl FnMut(&Entity) -> bool) -> CoreResult<Vec<Entity>> {
        Ok(self.to_vec()?.into_iter().filter(|e| predicate(e)).collect())
    }

    /// Whether this exact entity is contained.
    pub fn contains(&self, entity: &Entity) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.entities.borrow().get(entity.raw_id()) == Some(entity))
    }

    /// Call `iteratee` for each entity in insertion order.
    pub fn for_each(&self, mut iteratee: impl FnMut(&Entity)) -> CoreResult<()> {
        for entity in self.to_vec()? {
            iteratee(&entity);
        }
        Ok(())
    }

    /// Ordered snapshot of the contained entities.
    pub fn to_vec(&self) -> CoreResult<Vec<Entity>> {
        self.ensure_open()?;
        Ok(self.inner.entities.borrow().iter().cloned().collect())
    }

    /// Add one entity. See [`EntityManager::add_entities`].
    pub fn add_entity(&self, entity: Entity) -> CoreResult<()> {
        self.add_entities([entity])
    }

    /// Append entities in order, publishing `Add` for each.
    ///
    /// An id that is already present is skipped with
    /// [`CoreError::EntityAlreadyExists`] on the error channel. Adding a
    /// disposed entity is a contract violation.
    pub fn add_entities(&self, entities: impl IntoIterator<Item = Entity>) -> CoreResult<()> {
        self.ensure_open()?;
        for entity in entities {
            let id = entity.id()?;
            if self.inner.entities.borrow().get(id).is_some() {
                self.publish_error(CoreError::EntityAlreadyExists(id));
                continue;
            }

            let subscriptions = self.observe(&entity)?;
            self.inner
                .entities
                .borrow_mut()
                .push_back(entity.clone(), subscriptions);
            log::trace!("manager added entity {id}");
            self.inner
                .emitter
                .emit(&ManagerChannel::Add, None, &ManagerEvent::Add(entity));
        }
        Ok(())
    }

    /// Remove one entity. See [`EntityManager::remove_entities`].
    pub fn remove_entity(&self, target: impl Into<EntityTarget>) -> CoreResult<()> {
        self.remove_entities([target.into()])
    }

    /// Remove entities by id or by instance, publishing `Remove` for each.
    ///
    /// An unknown id, or an instance that is not the one stored under its
    /// id, is skipped with [`CoreError::EntityNotFound`] on the error
    /// channel. Removed entities are not disposed.
    pub fn remove_entities<I, T>(&self, targets: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityTarget>,
    {
        self.ensure_open()?;
        for target in targets {
            let target = target.into();
            let id = target.id();
            let node = {
                let mut entities = self.inner.entities.borrow_mut();
                let matches = match (&target, entities.get(id)) {
                    (EntityTarget::Id(_), Some(_)) => true,
                    (EntityTarget::Instance(wanted), Some(stored)) => wanted == stored,
                    (_, None) => false,
                };
                if matches { entities.remove(id) } else { None }
            };

            let Some(node) = node else {
                self.publish_error(CoreError::EntityNotFound(id));
                continue;
            };
            unsubscribe_all(node.subscriptions);
            log::trace!("manager removed entity {id}");
            self.inner.emitter.emit(
                &ManagerChannel::Remove,
                None,
                &ManagerEvent::Remove(node.entity),
            );
        }
        Ok(())
    }

    /// Remove every entity, front to back, publishing `Remove` for each.
    pub fn clear(&self) -> CoreResult<()> {
        self.ensure_open()?;
        loop {
            let head = self.inner.entities.borrow().head().map(Entity::raw_id);
            match head {
                Some(id) => self.remove_entities([id])?,
                None => return Ok(()),
            }
        }
    }

    fn downgrade(&self) -> WeakManager {
        WeakManager(Rc::downgrade(&self.inner))
    }

    fn observe(&self, entity: &Entity) -> CoreResult<Vec<Subscription>> {
        let mut subscriptions = Vec::with_capacity(4);
        for channel in [
            EntityChannel::Dispose,
            EntityChannel::Add,
            EntityChannel::Change,
            EntityChannel::Remove,
        ] {
            let weak = self.downgrade();
            let subscribed = entity.subscribe(channel, move |event| {
                if let Some(manager) = weak.upgrade() {
                    manager.relay(event);
                }
            });
            match subscribed {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => {
                    unsubscribe_all(subscriptions);
                    return Err(err);
                }
            }
        }
        Ok(subscriptions)
    }

    fn relay(&self, event: &EntityEvent) {
        let (channel, component_type, relayed) = match event {
            EntityEvent::Dispose { entity } => {
                // Only fails once the manager itself is gone.
                let _ = self.remove_entities([entity.raw_id()]);
                return;
            }
            EntityEvent::Add { entity, component } => (
                ManagerChannel::EntityAdd,
                component.type_tag(),
                ManagerEvent::EntityAdd {
                    entity: entity.clone(),
                    component: component.clone(),
                },
            ),
            EntityEvent::Change {
                entity,
                component,
                current,
                previous,
            } => (
                ManagerChannel::EntityChange,
                component.type_tag(),
                ManagerEvent::EntityChange {
                    entity: entity.clone(),
                    component: component.clone(),
                    current: current.clone(),
                    previous: previous.clone(),
                },
            ),
            EntityEvent::Remove { entity, component } => (
                ManagerChannel::EntityRemove,
                component.type_tag(),
                ManagerEvent::EntityRemove {
                    entity: entity.clone(),
                    component: component.clone(),
                },
            ),
            EntityEvent::Error { .. } => return,
        };
        self.inner
            .emitter
            .emit_typed(&channel, component_type, &relayed);
    }

    fn publish_error(&self, error: CoreError) {
        log::debug!("entity manager: {error}");
        self.inner
            .emitter
            .emit(&ManagerChannel::Error, None, &ManagerEvent::Error(error));
    }
}

impl Disposable for EntityManager {
    const KIND: &'static str = "entity manager";

    /// Publishes `Dispose`, drops every listener, then removes all entities.
    ///
    /// The removals are silent: listeners are gone by then, so no `Remove`
    /// event is published for the entities detached here.
    fn dispose(&self) {
        if !self.inner.lifecycle.begin_dispose() {
            return;
        }
        self.inner
            .emitter
            .emit(&ManagerChannel::Dispose, None, &ManagerEvent::Dispose);
        self.inner.emitter.clear();
        // Cannot fail: the manager stays open until `finish_dispose`.
        let _ = self.clear();
        self.inner.lifecycle.finish_dispose();
        log::debug!("entity manager disposed");
    }

    fn is_disposed(&self) -> bool {
        self.inner.lifecycle.is_disposed()
    }
}

impl Subscribable for EntityManager {
    type Channel = ManagerChannel;
    type Event = ManagerEvent;

    fn emitter(&self) -> &Emitter<ManagerChannel, ManagerEvent> {
        &self.inner.emitter
    }
}

impl PartialEq for EntityManager {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for EntityManager {}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("len", &self.len())
            .field("disposed", &self.inner.lifecycle.is_disposed())
            .finish()
    }
}

/// Non-owning manager reference held by entity listeners.
#[derive(Clone)]
struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    fn upgrade(&self) -> Option<EntityManager> {
        self.0.upgrade().map(|inner| EntityManager { inner })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn entity_with(types: &[&str]) -> Entity {
        let entity = Entity::new();
        for ty in types {
            entity.add_component(Component::marker(*ty).unwrap()).unwrap();
        }
        entity
    }

    fn error_log(manager: &EntityManager) -> Rc<RefCell<Vec<CoreError>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        manager
            .subscribe(ManagerChannel::Error, move |event| {
                if let ManagerEvent::Error(error) = event {
                    sink.borrow_mut().push(error.clone());
                }
            })
            .unwrap();
        log
    }

    fn ids(entities: &[Entity]) -> Vec<EntityId> {
        entities.iter().map(|e| e.id().unwrap()).collect()
    }

    #[test]
    fn keeps_insertion_order() {
        let (a, b, c) = (Entity::new(), Entity::new(), Entity::new());
        let manager = EntityManager::with_entities([c.clone(), a.clone(), b.clone()]).unwrap();

        assert_eq!(manager.len(), 3);
        assert_eq!(manager.to_vec().unwrap(), vec![c.clone(), a.clone(), b.clone()]);

        manager.remove_entity(&a).unwrap();
        let d = Entity::new();
        manager.add_entity(d.clone()).unwrap();
        assert_eq!(manager.entities().unwrap(), vec![c, b, d]);
    }

    #[test]
    fn lookups_publish_not_found() {
        let (a, b) = (Entity::new(), Entity::new());
        let manager = EntityManager::with_entities([a.clone()]).unwrap();
        let errors = error_log(&manager);
        let a_id = a.id().unwrap();
        let b_id = b.id().unwrap();

        assert_eq!(manager.entity(a_id).unwrap(), Some(a.clone()));
        assert_eq!(manager.entity(b_id).unwrap(), None);
        assert_eq!(ids(&manager.entities_of([b_id, a_id]).unwrap()), vec![a_id]);
        assert_eq!(
            *errors.borrow(),
            vec![CoreError::EntityNotFound(b_id), CoreError::EntityNotFound(b_id)]
        );
    }

    #[test]
    fn adding_twice_reports_already_exists() {
        let entity = Entity::new();
        let manager = EntityManager::new();
        let errors = error_log(&manager);
        let added = Rc::new(Cell::new(0));
        let counter = added.clone();
        manager
            .subscribe(ManagerChannel::Add, move |_| counter.set(counter.get() + 1))
            .unwrap();

        manager.add_entities([entity.clone(), entity.clone()]).unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(added.get(), 1);
        assert_eq!(
            *errors.borrow(),
            vec![CoreError::EntityAlreadyExists(entity.id().unwrap())]
        );
    }

    #[test]
    fn remove_by_id_or_instance() {
        let (a, b, stranger) = (Entity::new(), Entity::new(), Entity::new());
        let manager = EntityManager::with_entities([a.clone(), b.clone()]).unwrap();
        let errors = error_log(&manager);

        manager.remove_entity(a.id().unwrap()).unwrap();
        manager.remove_entity(&stranger).unwrap();
        manager.remove_entity(b.clone()).unwrap();

        assert!(manager.is_empty());
        assert!(!a.is_disposed());
        assert_eq!(
            *errors.borrow(),
            vec![CoreError::EntityNotFound(stranger.id().unwrap())]
        );
        assert!(!manager.contains(&a).unwrap());
    }

    #[test]
    fn disposed_entity_leaves_without_error() {
        let entity = entity_with(&["health"]);
        let manager = EntityManager::with_entities([Entity::new(), entity.clone()]).unwrap();
        let errors = error_log(&manager);
        let removed = Rc::new(RefCell::new(Vec::new()));
        let sink = removed.clone();
        manager
            .subscribe(ManagerChannel::Remove, move |event| {
                if let ManagerEvent::Remove(entity) = event {
                    sink.borrow_mut().push(entity.clone());
                }
            })
            .unwrap();

        entity.dispose();

        assert_eq!(manager.len(), 1);
        assert_eq!(*removed.borrow(), vec![entity]);
        assert!(errors.borrow().is_empty());
    }

    #[test]
    fn relays_entity_events_with_types() {
        let entity = entity_with(&["health"]);
        let manager = EntityManager::with_entities([entity.clone()]).unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        for (channel, ty) in [
            (ManagerChannel::EntityAdd, None),
            (ManagerChannel::EntityAdd, Some("player")),
            (ManagerChannel::EntityChange, Some("health")),
            (ManagerChannel::EntityRemove, None),
            (ManagerChannel::EntityRemove, Some("health")),
        ] {
            let sink = trace.clone();
            let label = format!("{channel:?}:{}", ty.unwrap_or("*"));
            let handler = move |_: &ManagerEvent| sink.borrow_mut().push(label.clone());
            match ty {
                Some(ty) => manager.subscribe_type(channel, ty, handler).unwrap(),
                None => manager.subscribe(channel, handler).unwrap(),
            };
        }

        let health = entity.component("health").unwrap().unwrap();
        entity.add_component(Component::marker("player").unwrap()).unwrap();
        health.set_state(json!({ "hp": 10 })).unwrap();
        entity.remove_component("player").unwrap();
        entity.remove_component("health").unwrap();

        insta::assert_snapshot!(trace.borrow().join("\n"), @r"
EntityAdd:*
EntityAdd:player
EntityChange:health
EntityRemove:*
EntityRemove:*
EntityRemove:health
");
    }

    #[test]
    fn removed_entity_is_no_longer_relayed() {
        let entity = entity_with(&["health"]);
        let manager = EntityManager::with_entities([entity.clone()]).unwrap();
        let changes = Rc::new(Cell::new(0));
        let counter = changes.clone();
        manager
            .subscribe(ManagerChannel::EntityChange, move |_| {
                counter.set(counter.get() + 1)
            })
            .unwrap();

        manager.remove_entity(&entity).unwrap();
        entity
            .component("health")
            .unwrap()
            .unwrap()
            .set_state(json!(1))
            .unwrap();

        assert_eq!(changes.get(), 0);
    }

    #[test]
    fn find_and_for_each_walk_a_snapshot() {
        let (a, b, c) = (
            entity_with(&["health"]),
            entity_with(&["mana"]),
            entity_with(&["health", "mana"]),
        );
        let manager = EntityManager::with_entities([a.clone(), b.clone(), c.clone()]).unwrap();

        let healthy = manager
            .find(|e| e.has_components(["health"]).unwrap())
            .unwrap();
        assert_eq!(healthy, vec![a.clone(), c.clone()]);

        let mut visited = Vec::new();
        manager
            .for_each(|e| {
                visited.push(e.clone());
                manager.remove_entity(e).unwrap();
            })
            .unwrap();
        assert_eq!(visited, vec![a, b, c]);
        assert!(manager.is_empty());
    }

    #[test]
    fn clear_removes_front_to_back() {
        let (a, b) = (Entity::new(), Entity::new());
        let manager = EntityManager::with_entities([a.clone(), b.clone()]).unwrap();
        let removed = Rc::new(RefCell::new(Vec::new()));
        let sink = removed.clone();
        manager
            .subscribe(ManagerChannel::Remove, move |event| {
                sink.borrow_mut().extend(event.entity().cloned());
            })
            .unwrap();

        manager.clear().unwrap();

        assert_eq!(*removed.borrow(), vec![a, b]);
        assert!(manager.is_empty());
    }

    #[test]
    fn dispose_detaches_entities_without_disposing_them() {
        let entity = Entity::new();
        let manager = EntityManager::with_entities([entity.clone()]).unwrap();
        let disposed = Rc::new(Cell::new(0));
        let counter = disposed.clone();
        manager
            .subscribe(ManagerChannel::Dispose, move |_| counter.set(counter.get() + 1))
            .unwrap();

        manager.dispose();
        manager.dispose();

        assert_eq!(disposed.get(), 1);
        assert!(manager.is_empty());
        assert!(!entity.is_disposed());
        assert_eq!(
            manager.add_entity(Entity::new()).unwrap_err(),
            CoreError::Disposed("entity manager")
        );
        // The manager no longer listens to the entity.
        entity.dispose();
    }

    #[test]
    fn dispose_removes_entities_silently() {
        let manager = EntityManager::with_entities([Entity::new(), Entity::new()]).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (channel, label) in [
            (ManagerChannel::Dispose, "dispose"),
            (ManagerChannel::Remove, "remove"),
        ] {
            let sink = log.clone();
            manager
                .subscribe(channel, move |_| sink.borrow_mut().push(label))
                .unwrap();
        }

        manager.dispose();

        assert!(manager.is_empty());
        assert_eq!(*log.borrow(), vec!["dispose"]);
    }

    #[test]
    fn adding_a_disposed_entity_is_a_contract_violation() {
        let entity = Entity::new();
        entity.dispose();
        let err = EntityManager::new().add_entity(entity).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Remove(usize),
        Dispose(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize).prop_map(Op::Add),
            (0..6usize).prop_map(Op::Remove),
            (0..6usize).prop_map(Op::Dispose),
        ]
    }

    proptest! {
        #[test]
        fn length_tracks_live_members(ops in prop::collection::vec(op(), 0..60)) {
            let pool: Vec<Entity> = (0..6).map(|_| Entity::new()).collect();
            let manager = EntityManager::new();
            let mut members = std::collections::HashSet::new();

            for op in ops {
                match op {
                    Op::Add(i) => {
                        if manager.add_entity(pool[i].clone()).is_ok() {
                            members.insert(i);
                        }
                    }
                    Op::Remove(i) => {
                        manager.remove_entity(&pool[i]).unwrap();
                        members.remove(&i);
                    }
                    Op::Dispose(i) => {
                        pool[i].dispose();
                        members.remove(&i);
                    }
                }
                prop_assert_eq!(manager.len(), members.len());
                prop_assert_eq!(manager.to_vec().unwrap().len(), members.len());
            }
        }
    }
}
