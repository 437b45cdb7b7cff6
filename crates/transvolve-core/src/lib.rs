//! Core types for Transvolve: observable components, entities, and entity
//! managers.
//!
//! Everything here is single-threaded. Handles are cheap `Rc` clones with
//! identity equality, and every change is announced synchronously on typed
//! event channels. The engine crate builds systems and the tick loop on top
//! of these events.

/// Observable, typed cells of structured state.
pub mod component;
/// Entities, their identifiers, and component ownership.
pub mod entity;
/// Error types used throughout the crate.
pub mod error;
/// The typed observer registry and subscription handles.
pub mod event;
/// Explicit, idempotent teardown.
pub mod lifecycle;
/// Ordered entity collections that re-broadcast entity events.
pub mod manager;
/// Path addressing into component state.
pub mod state;

/// Re-export component types.
pub use component::{Component, ComponentChannel, ComponentEvent};
/// Re-export entity types.
pub use entity::{ComponentTarget, Entity, EntityChannel, EntityEvent, EntityId};
/// Re-export error types.
pub use error::{CoreError, CoreResult};
/// Re-export event plumbing.
pub use event::{Emitter, Subscribable, Subscription};
/// Re-export lifecycle types.
pub use lifecycle::{Disposable, Lifecycle};
/// Re-export manager types.
pub use manager::{EntityManager, EntityTarget, ManagerChannel, ManagerEvent};
