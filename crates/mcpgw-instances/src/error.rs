//! Errors from process/container instance lifecycle management (spec §4.F,
//! §4.G, §7).

use mcpgw_wire::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstanceError {
    #[error("instance manager at capacity ({0} live instances)")]
    CapacityExceeded(usize),

    #[error("failed to start instance: {0}")]
    SpawnFailed(String),

    #[error("instance did not become ready within the configured deadline")]
    NotReady,

    #[error("invalid instance configuration: {0}")]
    Configuration(String),

    #[error("container resource controller error: {0}")]
    Controller(String),
}

impl InstanceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CapacityExceeded(_) => ErrorCategory::CapacityExceeded,
            Self::SpawnFailed(_) | Self::NotReady | Self::Controller(_) => {
                ErrorCategory::Transport
            }
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

pub type InstanceResult<T> = Result<T, InstanceError>;
