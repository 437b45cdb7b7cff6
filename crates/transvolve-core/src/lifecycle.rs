use std::cell::Cell;

use crate::error::{CoreError, CoreResult};

/// Capability of objects with an explicit, idempotent teardown.
///
/// After [`Disposable::dispose`] completes, every public operation other
/// than `dispose` and `is_disposed` fails with [`CoreError::Disposed`].
pub trait Disposable {
    /// Name used in contract-violation messages.
    const KIND: &'static str;

    /// Tear the object down. Only the first call has an effect.
    fn dispose(&self);

    /// Whether teardown has completed.
    fn is_disposed(&self) -> bool;

    /// Fail with a contract violation if the object is disposed.
    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_disposed() {
            Err(CoreError::Disposed(Self::KIND))
        } else {
            Ok(())
        }
    }
}

/// Disposal flags embedded in every disposable handle.
///
/// `disposing` flips on the first `dispose` call and guards re-entry;
/// `disposed` flips once teardown has finished. Between the two the object
/// is still usable, so listeners reacting to a dispose event may read it.
#[derive(Debug, Default)]
pub struct Lifecycle {
    disposing: Cell<bool>,
    disposed: Cell<bool>,
}

impl Lifecycle {
    /// Create flags for a live object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark teardown as started. Returns false if it already was.
    pub fn begin_dispose(&self) -> bool {
        !self.disposing.replace(true)
    }

    /// Mark teardown as finished.
    pub fn finish_dispose(&self) {
        self.disposed.set(true);
    }

    /// Whether teardown has started.
    pub fn is_disposing(&self) -> bool {
        self.disposing.get()
    }

    /// Whether teardown has finished.
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}
