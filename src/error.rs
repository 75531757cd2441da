//! Error types for heap sizing

/// Sizing operation result type
pub type SizingResult<T> = Result<T, SizingError>;

/// Errors that can occur in the sizing subsystem
#[derive(Debug, thiserror::Error)]
pub enum SizingError {
    /// Invalid configuration
    #[error("invalid sizing configuration: {0}")]
    InvalidConfig(String),

    /// Invalid heap layout
    #[error("invalid heap layout: {0}")]
    InvalidLayout(String),

    /// Region id outside the region table
    #[error("unknown region id {0}")]
    UnknownRegion(usize),

    /// Region is not in a state that allows the requested transition
    #[error("region {id} cannot transition: {reason}")]
    InvalidTransition {
        /// Region id
        id: usize,
        /// Why the transition was rejected
        reason: &'static str,
    },

    /// No uncommitted region left to satisfy an on-demand commit
    #[error("no region available for allocation")]
    NoRegionAvailable,

    /// Subsystem is disabled by configuration
    #[error("subsystem disabled: {0}")]
    Disabled(String),
}

impl SizingError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid layout error
    pub fn invalid_layout(msg: impl Into<String>) -> Self {
        Self::InvalidLayout(msg.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(id: usize, reason: &'static str) -> Self {
        Self::InvalidTransition { id, reason }
    }

    /// Create a disabled error
    pub fn disabled(msg: impl Into<String>) -> Self {
        Self::Disabled(msg.into())
    }
}
