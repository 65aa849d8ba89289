use thiserror::Error;

/// Errors surfaced by the register allocation phase.
///
/// Heuristic misses (no register, alias hazards, unsupported types) are never
/// errors: the candidate simply stays in memory. Broken internal invariants are
/// assertion failures. What remains is cancellation and malformed input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocatorError {
    #[error("Compilation interrupted during {phase}")]
    Interrupted { phase: String },

    #[error("Invalid allocator configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid method description: {message}")]
    InvalidMethod { message: String },

    #[error("Internal allocator error: {message}")]
    InternalError { message: String },
}

/// Result type used throughout the allocator crates
pub type AllocResult<T> = Result<T, AllocatorError>;

impl AllocatorError {
    /// Create a cancellation error for the named phase
    pub fn interrupted(phase: impl Into<String>) -> Self {
        AllocatorError::Interrupted { phase: phase.into() }
    }

    /// Create a configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        AllocatorError::InvalidConfig { message: message.into() }
    }

    /// Create a method-description error
    pub fn invalid_method(message: impl Into<String>) -> Self {
        AllocatorError::InvalidMethod { message: message.into() }
    }

    /// Whether this error is an external cancellation rather than a defect
    pub fn is_interrupt(&self) -> bool {
        matches!(self, AllocatorError::Interrupted { .. })
    }
}

/// Convert from String (for simple error cases)
impl From<String> for AllocatorError {
    fn from(message: String) -> Self {
        AllocatorError::InternalError { message }
    }
}
