//! Error taxonomy for the deadlock-detection and matching core.
//!
//! One `thiserror`-derived enum with classification helpers the scheduler
//! consults instead of re-deriving severity ad hoc at each call site.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("scheduling invariant violation: {0}")]
    SchedulingInvariantViolation(String),

    #[error("matching ambiguity on comm {comm}: {detail}")]
    MatchingAmbiguity { comm: u64, detail: String },

    #[error("participant mismatch on comm {comm} wave {wave}: {detail}")]
    ParticipantMismatch {
        comm: u64,
        wave: u32,
        detail: String,
    },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("rollback attempted without a live checkpoint")]
    NoLiveCheckpoint,

    #[error("checkpoint group mismatch: {0}")]
    CheckpointGroupMismatch(String),

    #[error("unknown rank {0}")]
    UnknownRank(u32),

    #[error("unknown communicator {0}")]
    UnknownComm(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport is fatally dead: {0}")]
    TransportFatal(String),

    #[error("channel send failed")]
    ChannelSend,

    #[error("channel receive failed")]
    ChannelReceive,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True if this error must escalate to panic/shutdown rather than
    /// become a diagnostic event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::SchedulingInvariantViolation(_)
                | CoreError::TransportFatal(_)
                | CoreError::CheckpointGroupMismatch(_)
        )
    }

    /// True if this error is purely diagnostic: matching/scheduling
    /// continues, the condition is reported and nothing else changes.
    pub fn is_diagnostic_only(&self) -> bool {
        matches!(
            self,
            CoreError::MatchingAmbiguity { .. }
                | CoreError::ParticipantMismatch { .. }
                | CoreError::TypeMismatch(_)
        )
    }

    /// Severity this error should be reported at on the outbound
    /// diagnostic stream.
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::MatchingAmbiguity { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{s}")
    }
}
