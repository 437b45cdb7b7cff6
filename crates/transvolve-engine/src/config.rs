use std::time::Duration;

use transvolve_core::EntityManager;

/// Default pause between ticks and between system executions.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(16);

/// Configuration for an [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between ticks.
    pub interval: Duration,
    /// Primary entity manager. A fresh one is created when absent.
    pub manager: Option<EntityManager>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            manager: None,
        }
    }
}

impl EngineConfig {
    /// Set the pause between ticks.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Use an existing manager as the primary entity source.
    pub fn with_manager(mut self, manager: EntityManager) -> Self {
        self.manager = Some(manager);
        self
    }
}

/// Configuration for a [`crate::System`], minus its executor.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Unique system name.
    pub name: String,
    /// Component types an entity must own to be in scope.
    pub requirements: Vec<String>,
    /// Manager holding the scope. A fresh one is created when absent.
    pub scope: Option<EntityManager>,
    /// Minimum time between two executions.
    pub interval: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            requirements: Vec::new(),
            scope: None,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl SystemConfig {
    /// Start a configuration for the system called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the required component types.
    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    /// Use an existing manager to hold the scope.
    pub fn with_scope(mut self, scope: EntityManager) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the minimum time between two executions.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
