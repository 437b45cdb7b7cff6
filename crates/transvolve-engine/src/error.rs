use transvolve_core::CoreError;

/// Alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised or published by systems and the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A core contract violation surfaced through a system or the engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A lifecycle operation was invoked from a state that does not allow it.
    #[error("cannot {op} while the engine is {state}")]
    InvalidTransition {
        /// The rejected operation.
        op: &'static str,
        /// The state the engine was in.
        state: String,
    },

    /// `init` was called on a system that is already initialized.
    #[error("system \"{0}\" is already initialized")]
    AlreadyInitialized(String),

    /// `execute` was called on a system that has not been initialized.
    #[error("system \"{0}\" has not been initialized")]
    NotInitialized(String),

    /// An executor invocation returned an error or panicked.
    #[error("executor of system \"{system}\" failed: {source}")]
    Executor {
        /// Name of the failing system.
        system: String,
        /// What the executor reported.
        source: anyhow::Error,
    },

    /// No registered system has this name.
    #[error("system not found: \"{0}\"")]
    SystemNotFound(String),

    /// A system with this name is already registered.
    #[error("a system named \"{0}\" is already registered")]
    DuplicateSystemName(String),
}

impl EngineError {
    /// Returns true for programming errors that abort the call, false for
    /// conditions that are published on an `Error` channel instead.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Self::Core(err) => err.is_contract_violation(),
            Self::InvalidTransition { .. }
            | Self::AlreadyInitialized(_)
            | Self::NotInitialized(_) => true,
            Self::Executor { .. } | Self::SystemNotFound(_) | Self::DuplicateSystemName(_) => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_core_errors_transparently() {
        let err = EngineError::from(CoreError::Disposed("system"));
        assert_eq!(err.to_string(), "system is disposed and no longer available");
        assert!(err.is_contract_violation());
    }

    #[test]
    fn executor_failures_name_the_system() {
        let err = EngineError::Executor {
            system: "regen".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.to_string(), "executor of system \"regen\" failed: boom");
        assert!(!err.is_contract_violation());
    }
}
