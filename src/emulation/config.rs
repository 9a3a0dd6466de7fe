//! Interpreter configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emulation::RuntimeConfig;
//!
//! let config = RuntimeConfig::default().with_max_call_depth(64);
//! assert_eq!(config.max_call_depth, 64);
//! ```

/// Limits and switches of a [`crate::emulation::Runtime`].
///
/// # Default Configuration
///
/// - 256 nested calls
/// - Type initializers run on first static access
/// - Calls are not traced
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum depth of nested interpreted calls before [`crate::Error::RecursionLimit`]
    pub max_call_depth: usize,

    /// Run a type's `.cctor` before the first access to one of its static fields
    pub run_type_initializers: bool,

    /// Emit a `trace` event for every invoked method
    pub trace_calls: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_call_depth: 256,
            run_type_initializers: true,
            trace_calls: false,
        }
    }
}

impl RuntimeConfig {
    /// Sets the call depth limit
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Enables or disables type initializers
    #[must_use]
    pub fn with_type_initializers(mut self, enabled: bool) -> Self {
        self.run_type_initializers = enabled;
        self
    }

    /// Enables or disables call tracing
    #[must_use]
    pub fn with_call_tracing(mut self, enabled: bool) -> Self {
        self.trace_calls = enabled;
        self
    }
}
