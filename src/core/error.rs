//! Job-processing error taxonomy.
//!
//! Every failure inside a tick is converted into one of these and then into
//! a job state transition. Only `is_retryable` errors send a job back to
//! `pending`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// External call made while processing a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Synthesis,
    Mixing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesis => f.write_str("tts"),
            Self::Mixing => f.write_str("mixer"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or blank script
    #[error("no script")]
    NoScript,

    #[error("meditation not found: {0}")]
    MeditationNotFound(Uuid),

    #[error("{stage} failed: {message}")]
    Provider { stage: Stage, message: String },

    #[error("{stage} timed out after {limit:?}")]
    Timeout { stage: Stage, limit: Duration },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    /// Provider failures, timeouts and store outages consume an attempt and
    /// may be retried; bad input and missing meditations never will succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoScript | Self::MeditationNotFound(_) => false,
            Self::Provider { .. } | Self::Timeout { .. } | Self::Store(_) => true,
        }
    }
}

/// Run an external call under a timeout, mapping both failure modes into
/// `JobError`
pub async fn bounded<F>(stage: Stage, limit: Duration, call: F) -> Result<String, JobError>
where
    F: std::future::Future<Output = anyhow::Result<String>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(url)) => Ok(url),
        Ok(Err(e)) => Err(JobError::Provider {
            stage,
            message: format!("{:#}", e),
        }),
        Err(_) => Err(JobError::Timeout { stage, limit }),
    }
}
