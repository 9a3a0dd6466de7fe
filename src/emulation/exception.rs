//! Managed exceptions crossing from interpreted code to the host.

use std::fmt;

use crate::emulation::EmValue;

/// A managed exception that was thrown and not caught by interpreted code
#[derive(Clone)]
pub struct ThrownException {
    /// The exception object
    pub exception: EmValue,
    /// Full name of the exception's runtime type
    pub type_name: String,
    /// The exception message
    pub message: String,
}

impl ThrownException {
    /// Is the exception of the type called `type_name`
    #[must_use]
    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }
}

impl fmt::Debug for ThrownException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrownException")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for ThrownException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}
