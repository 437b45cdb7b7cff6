use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::event::{Emitter, Subscribable};
use crate::lifecycle::{Disposable, Lifecycle};
use crate::state;

/// Channels published by a [`Component`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentChannel {
    /// The state was replaced or partially updated.
    Change,
    /// The component is being disposed.
    Dispose,
}

/// Payload delivered to component listeners.
#[derive(Debug, Clone)]
pub enum ComponentEvent {
    /// The state changed from `previous` to `current`.
    Change {
        /// The component that changed.
        component: Component,
        /// State after the update.
        current: Value,
        /// State before the update.
        previous: Value,
    },
    /// The component is being disposed.
    Dispose {
        /// The component being disposed.
        component: Component,
    },
}

struct ComponentInner {
    component_type: String,
    state: RefCell<Value>,
    emitter: Emitter<ComponentChannel, ComponentEvent>,
    lifecycle: Lifecycle,
}

/// A typed, observable cell of structured data.
///
/// `Component` is a cheap handle; clones refer to the same cell and
/// equality is identity. State goes in and comes out as independent copies,
/// so nothing outside the component can alias what it stores.
///
/// ```
/// use serde_json::json;
/// use transvolve_core::Component;
///
/// let player = Component::new("player", json!({ "user": { "id": 1337, "handle": "TheChimo" } })).unwrap();
/// player.set_state_at("user.handle", json!("somethingElse")).unwrap();
/// assert_eq!(player.state_at("user.handle").unwrap(), json!("somethingElse"));
/// ```
#[derive(Clone)]
pub struct Component {
    inner: Rc<ComponentInner>,
}

impl Component {
    /// Create a component of `component_type` holding `state`.
    pub fn new(component_type: impl Into<String>, state: Value) -> CoreResult<Self> {
        let component_type = component_type.into();
        if component_type.is_empty() {
            return Err(CoreError::MissingField("type"));
        }
        Ok(Self {
            inner: Rc::new(ComponentInner {
                component_type,
                state: RefCell::new(state),
                emitter: Emitter::new(),
                lifecycle: Lifecycle::new(),
            }),
        })
    }

    /// Create a component with null state, used as a flag (`spawn`, `death`, ...).
    pub fn marker(component_type: impl Into<String>) -> CoreResult<Self> {
        Self::new(component_type, Value::Null)
    }

    /// Create a component whose state is the serialized form of `state`.
    pub fn from_serialize<T: Serialize>(
        component_type: impl Into<String>,
        state: &T,
    ) -> CoreResult<Self> {
        Self::new(component_type, serde_json::to_value(state)?)
    }

    /// The component type.
    pub fn component_type(&self) -> CoreResult<&str> {
        self.ensure_open()?;
        Ok(&self.inner.component_type)
    }

    /// The type tag without the disposal check, for internal bookkeeping
    /// that has to run while a component is mid-teardown.
    pub(crate) fn type_tag(&self) -> &str {
        &self.inner.component_type
    }

    /// A copy of the whole state.
    pub fn state(&self) -> CoreResult<Value> {
        self.ensure_open()?;
        Ok(self.inner.state.borrow().clone())
    }

    /// A copy of the value at `path`, or null when nothing is there.
    /// The empty path returns the whole state.
    pub fn state_at(&self, path: &str) -> CoreResult<Value> {
        self.ensure_open()?;
        let segments = state::parse_path(path)?;
        let current = self.inner.state.borrow();
        Ok(state::get_path(&current, &segments)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// The whole state deserialized into `T`.
    pub fn state_as<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(serde_json::from_value(self.state()?)?)
    }

    /// The value at `path` deserialized into `T`.
    pub fn state_at_as<T: DeserializeOwned>(&self, path: &str) -> CoreResult<T> {
        Ok(serde_json::from_value(self.state_at(path)?)?)
    }

    /// Replace the whole state and publish [`ComponentEvent::Change`].
    pub fn set_state(&self, value: Value) -> CoreResult<()> {
        self.ensure_open()?;
        let previous = self.inner.state.replace(value.clone());
        self.publish_change(value, previous);
        Ok(())
    }

    /// Replace the whole state with the serialized form of `value`.
    pub fn set_state_from<T: Serialize>(&self, value: &T) -> CoreResult<()> {
        self.set_state(serde_json::to_value(value)?)
    }

    /// Replace the subtree at `path` and publish [`ComponentEvent::Change`].
    ///
    /// Missing intermediate containers are created. A null state is treated
    /// as an empty object. The empty path replaces the whole state.
    pub fn set_state_at(&self, path: &str, value: Value) -> CoreResult<()> {
        self.ensure_open()?;
        let segments = state::parse_path(path)?;
        if segments.is_empty() {
            return self.set_state(value);
        }

        let previous = self.inner.state.borrow().clone();
        let mut current = if previous.is_null() {
            Value::Object(Map::new())
        } else {
            previous.clone()
        };
        state::set_path(&mut current, &segments, value);
        *self.inner.state.borrow_mut() = current.clone();
        self.publish_change(current, previous);
        Ok(())
    }

    fn publish_change(&self, current: Value, previous: Value) {
        let event = ComponentEvent::Change {
            component: self.clone(),
            current,
            previous,
        };
        self.inner
            .emitter
            .emit(&ComponentChannel::Change, None, &event);
    }
}

impl Disposable for Component {
    const KIND: &'static str = "component";

    fn dispose(&self) {
        if !self.inner.lifecycle.begin_dispose() {
            return;
        }
        let event = ComponentEvent::Dispose {
            component: self.clone(),
        };
        self.inner
            .emitter
            .emit(&ComponentChannel::Dispose, None, &event);
        self.inner.emitter.clear();
        self.inner.lifecycle.finish_dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.lifecycle.is_disposed()
    }
}

impl Subscribable for Component {
    type Channel = ComponentChannel;
    type Event = ComponentEvent;

    fn emitter(&self) -> &Emitter<ComponentChannel, ComponentEvent> {
        &self.inner.emitter
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Component {}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("type", &self.inner.component_type)
            .field("state", &self.inner.state.borrow())
            .field("disposed", &self.inner.lifecycle.is_disposed())
            .finish()
    }
}
