use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::{Component, ComponentChannel, ComponentEvent};
use crate::error::{CoreError, CoreResult};
use crate::event::{Emitter, Subscribable, Subscription, unsubscribe_all};
use crate::lifecycle::{Disposable, Lifecycle};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide unique, monotonically assigned entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channels published by an [`Entity`].
///
/// `Add`, `Change` and `Remove` are also published per component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityChannel {
    /// A component was adopted.
    Add,
    /// An owned component changed state.
    Change,
    /// A component was removed (and is about to be disposed).
    Remove,
    /// The entity is being disposed.
    Dispose,
    /// A domain-data error occurred.
    Error,
}

/// Payload delivered to entity listeners.
#[derive(Debug, Clone)]
pub enum EntityEvent {
    /// `component` was adopted by `entity`.
    Add {
        /// The owning entity.
        entity: Entity,
        /// The adopted component.
        component: Component,
    },
    /// `component`, owned by `entity`, changed state.
    Change {
        /// The owning entity.
        entity: Entity,
        /// The component that changed.
        component: Component,
        /// State after the update.
        current: Value,
        /// State before the update.
        previous: Value,
    },
    /// `component` was removed from `entity`.
    Remove {
        /// The former owner.
        entity: Entity,
        /// The removed component.
        component: Component,
    },
    /// `entity` is being disposed.
    Dispose {
        /// The entity being disposed.
        entity: Entity,
    },
    /// A lookup or mutation on `entity` hit a domain-data condition.
    Error {
        /// The entity that published the error.
        entity: Entity,
        /// What went wrong.
        error: CoreError,
    },
}

impl EntityEvent {
    /// The entity that published this event.
    pub fn entity(&self) -> &Entity {
        match self {
            Self::Add { entity, .. }
            | Self::Change { entity, .. }
            | Self::Remove { entity, .. }
            | Self::Dispose { entity }
            | Self::Error { entity, .. } => entity,
        }
    }
}

/// Something that identifies a component to remove: its type or the instance.
#[derive(Debug, Clone)]
pub enum ComponentTarget {
    /// Whatever component of this type the entity owns.
    Type(String),
    /// This exact instance; another instance of the same type does not match.
    Instance(Component),
}

impl ComponentTarget {
    fn type_name(&self) -> &str {
        match self {
            Self::Type(ty) => ty,
            Self::Instance(component) => component.type_tag(),
        }
    }
}

impl From<&str> for ComponentTarget {
    fn from(ty: &str) -> Self {
        Self::Type(ty.to_string())
    }
}

impl From<String> for ComponentTarget {
    fn from(ty: String) -> Self {
        Self::Type(ty)
    }
}

impl From<Component> for ComponentTarget {
    fn from(component: Component) -> Self {
        Self::Instance(component)
    }
}

impl From<&Component> for ComponentTarget {
    fn from(component: &Component) -> Self {
        Self::Instance(component.clone())
    }
}

struct EntityInner {
    id: EntityId,
    components: RefCell<BTreeMap<String, Component>>,
    subscriptions: RefCell<HashMap<String, Vec<Subscription>>>,
    emitter: Emitter<EntityChannel, EntityEvent>,
    lifecycle: Lifecycle,
}

/// An identity owning at most one [`Component`] per type.
///
/// `Entity` is a cheap handle; clones refer to the same entity and equality
/// is identity. Component events are re-published on the entity, both on
/// the generic channel and on the channel for the component's type.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity {
    /// Create an entity with the next free id and no components.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EntityInner {
                id: EntityId::next(),
                components: RefCell::new(BTreeMap::new()),
                subscriptions: RefCell::new(HashMap::new()),
                emitter: Emitter::new(),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    /// Create an entity that already owns `components`.
    pub fn with_components(components: impl IntoIterator<Item = Component>) -> CoreResult<Self> {
        let entity = Self::new();
        entity.add_components(components)?;
        Ok(entity)
    }

    /// The entity id.
    pub fn id(&self) -> CoreResult<EntityId> {
        self.ensure_open()?;
        Ok(self.inner.id)
    }

    /// The id without the disposal check, for managers tearing down links.
    pub(crate) fn raw_id(&self) -> EntityId {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.inner))
    }

    /// Snapshot of every owned component, keyed by type.
    pub fn components(&self) -> CoreResult<BTreeMap<String, Component>> {
        self.ensure_open()?;
        Ok(self.inner.components.borrow().clone())
    }

    /// The component of `component_type`, publishing
    /// [`CoreError::ComponentNotFound`] when the entity has none.
    pub fn component(&self, component_type: &str) -> CoreResult<Option<Component>> {
        self.ensure_open()?;
        let found = self.inner.components.borrow().get(component_type).cloned();
        if found.is_none() {
            self.publish_error(CoreError::ComponentNotFound(component_type.to_string()));
        }
        Ok(found)
    }

    /// The owned components among `types`, one error event per missing type.
    pub fn components_of<I, S>(&self, types: I) -> CoreResult<BTreeMap<String, Component>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open()?;
        let mut found = BTreeMap::new();
        for ty in types {
            if let Some(component) = self.component(ty.as_ref())? {
                found.insert(ty.as_ref().to_string(), component);
            }
        }
        Ok(found)
    }

    /// Adopt one component. See [`Entity::add_components`].
    pub fn add_component(&self, component: Component) -> CoreResult<()> {
        self.add_components([component])
    }

    /// Adopt every component, publishing `Add` on the generic and per-type
    /// channels for each.
    ///
    /// A component whose type is already owned is skipped with
    /// [`CoreError::ComponentAlreadyOwned`] (same instance) or
    /// [`CoreError::DuplicateComponentType`] (different instance) on the
    /// error channel. Adopting a disposed component is a contract violation.
    pub fn add_components(&self, components: impl IntoIterator<Item = Component>) -> CoreResult<()> {
        self.ensure_open()?;
        for component in components {
            let ty = component.component_type()?.to_string();
            let owned = self.inner.components.borrow().get(&ty).cloned();
            match owned {
                Some(owned) if owned == component => {
                    self.publish_error(CoreError::ComponentAlreadyOwned(ty));
                }
                Some(_) => {
                    self.publish_error(CoreError::DuplicateComponentType(ty));
                }
                None => {
                    let subscriptions = self.observe(&component)?;
                    self.inner
                        .components
                        .borrow_mut()
                        .insert(ty.clone(), component.clone());
                    self.inner
                        .subscriptions
                        .borrow_mut()
                        .insert(ty.clone(), subscriptions);
                    log::trace!("entity {} adopted \"{ty}\"", self.inner.id);

                    let event = EntityEvent::Add {
                        entity: self.clone(),
                        component,
                    };
                    self.inner.emitter.emit_typed(&EntityChannel::Add, &ty, &event);
                }
            }
        }
        Ok(())
    }

    /// Remove one component. See [`Entity::remove_components`].
    pub fn remove_component(&self, target: impl Into<ComponentTarget>) -> CoreResult<()> {
        self.remove_components([target.into()])
    }

    /// Remove components by type or by instance, publishing `Remove` on the
    /// generic and per-type channels and then disposing each removed
    /// component.
    ///
    /// An unknown type, or an instance that is not the one owned, is skipped
    /// with [`CoreError::ComponentNotFound`] on the error channel.
    pub fn remove_components<I, T>(&self, targets: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<ComponentTarget>,
    {
        self.ensure_open()?;
        for target in targets {
            let target = target.into();
            let owned = self
                .inner
                .components
                .borrow()
                .get(target.type_name())
                .cloned();
            let component = match (&target, owned) {
                (ComponentTarget::Type(_), Some(owned)) => owned,
                (ComponentTarget::Instance(wanted), Some(owned)) if *wanted == owned => owned,
                _ => {
                    self.publish_error(CoreError::ComponentNotFound(
                        target.type_name().to_string(),
                    ));
                    continue;
                }
            };

            let ty = component.type_tag().to_string();
            self.inner.components.borrow_mut().remove(&ty);
            let subscriptions = self.inner.subscriptions.borrow_mut().remove(&ty);
            unsubscribe_all(subscriptions.into_iter().flatten());
            log::trace!("entity {} released \"{ty}\"", self.inner.id);

            let event = EntityEvent::Remove {
                entity: self.clone(),
                component: component.clone(),
            };
            self.inner
                .emitter
                .emit_typed(&EntityChannel::Remove, &ty, &event);
            component.dispose();
        }
        Ok(())
    }

    /// Whether the entity owns a component of every listed type.
    pub fn has_components<I, S>(&self, types: I) -> CoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open()?;
        let components = self.inner.components.borrow();
        Ok(types
            .into_iter()
            .all(|ty| components.contains_key(ty.as_ref())))
    }

    fn observe(&self, component: &Component) -> CoreResult<Vec<Subscription>> {
        let weak = self.downgrade();
        let on_change = component.subscribe(ComponentChannel::Change, move |event| {
            let Some(entity) = weak.upgrade() else {
                return;
            };
            if let ComponentEvent::Change {
                component,
                current,
                previous,
            } = event
            {
                entity.relay_change(component, current, previous);
            }
        })?;

        let weak = self.downgrade();
        let on_dispose = component.subscribe(ComponentChannel::Dispose, move |event| {
            let Some(entity) = weak.upgrade() else {
                return;
            };
            if let ComponentEvent::Dispose { component } = event {
                // Fails only when the entity is already disposed.
                let _ = entity.remove_component(component);
            }
        });
        let on_dispose = match on_dispose {
            Ok(subscription) => subscription,
            Err(err) => {
                on_change.unsubscribe();
                return Err(err);
            }
        };

        Ok(vec![on_change, on_dispose])
    }

    fn relay_change(&self, component: &Component, current: &Value, previous: &Value) {
        let event = EntityEvent::Change {
            entity: self.clone(),
            component: component.clone(),
            current: current.clone(),
            previous: previous.clone(),
        };
        self.inner
            .emitter
            .emit_typed(&EntityChannel::Change, component.type_tag(), &event);
    }

    fn publish_error(&self, error: CoreError) {
        log::debug!("entity {}: {error}", self.inner.id);
        let event = EntityEvent::Error {
            entity: self.clone(),
            error,
        };
        self.inner.emitter.emit(&EntityChannel::Error, None, &event);
    }
}

impl Disposable for Entity {
    const KIND: &'static str = "entity";

    /// Publishes `Dispose`, drops every listener, then disposes each owned
    /// component.
    fn dispose(&self) {
        if !self.inner.lifecycle.begin_dispose() {
            return;
        }
        let event = EntityEvent::Dispose {
            entity: self.clone(),
        };
        self.inner
            .emitter
            .emit(&EntityChannel::Dispose, None, &event);
        self.inner.emitter.clear();

        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        unsubscribe_all(subscriptions.into_values().flatten());
        let components = std::mem::take(&mut *self.inner.components.borrow_mut());
        for component in components.into_values() {
            component.dispose();
        }

        self.inner.lifecycle.finish_dispose();
        log::trace!("entity {} disposed", self.inner.id);
    }

    fn is_disposed(&self) -> bool {
        self.inner.lifecycle.is_disposed()
    }
}

impl Subscribable for Entity {
    type Channel = EntityChannel;
    type Event = EntityEvent;

    fn emitter(&self) -> &Emitter<EntityChannel, EntityEvent> {
        &self.inner.emitter
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.inner.id)
            .field(
                "components",
                &self.inner.components.borrow().keys().collect::<Vec<_>>(),
            )
            .field("disposed", &self.inner.lifecycle.is_disposed())
            .finish()
    }
}

/// Non-owning entity reference held by listeners.
#[derive(Clone)]
pub(crate) struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    pub(crate) fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(|inner| Entity { inner })
    }
}
