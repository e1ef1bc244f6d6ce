use thiserror::Error;

use crate::cache::RefreshError;
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {0}")]
    Configuration(#[from] LoadError),
    #[error("refresh runtime unavailable: {0}")]
    Refresh(#[from] RefreshError),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
