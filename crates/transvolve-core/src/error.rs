use crate::entity::EntityId;

/// Alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised or published by components, entities, and entity managers.
///
/// Two families share this enum. Contract violations are returned as `Err`
/// from the offending call. Domain-data conditions are published on the
/// owning object's `Error` channel so a batch operation keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// An operation was invoked on an object that has been disposed.
    #[error("{0} is disposed and no longer available")]
    Disposed(&'static str),

    /// A required constructor field was missing or empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// A state path could not be parsed.
    #[error("invalid state path \"{path}\": {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Converting state to or from a typed value failed.
    #[error("state conversion failed: {0}")]
    Conversion(String),

    /// The requested entity is not contained in the target.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// The target already references an entity with this id.
    #[error("entity already exists: {0}")]
    EntityAlreadyExists(EntityId),

    /// The requested component is not owned by the target.
    #[error("component not found: \"{0}\"")]
    ComponentNotFound(String),

    /// The component is already owned by the target.
    #[error("component already owned: \"{0}\"")]
    ComponentAlreadyOwned(String),

    /// The entity already owns a different component of the same type.
    #[error("entity already owns a component of type \"{0}\"")]
    DuplicateComponentType(String),
}

impl CoreError {
    /// Returns true for programming errors that abort the call, false for
    /// domain-data conditions that are published instead of returned.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Disposed(_)
                | Self::MissingField(_)
                | Self::InvalidPath { .. }
                | Self::Conversion(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Conversion(err.to_string())
    }
}
