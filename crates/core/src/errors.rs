use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::TenantId;

/// Which pipeline stage issued a call or produced an error. Tags every
/// governor invocation and every structured log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTag {
    Planner,
    Retriever,
    Composer,
    Formatter,
    Validator,
}

impl StageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Retriever => "retriever",
            Self::Composer => "composer",
            Self::Formatter => "formatter",
            Self::Validator => "validator",
        }
    }
}

/// Scope at which a rate limit was exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Tenant,
    User,
}

/// Errors surfaced by the resource governor for a single model call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GovernorError {
    #[error("rate limited at {scope:?} scope, retry after {retry_after_secs}s")]
    RateLimited { scope: LimitScope, retry_after_secs: u64 },
    #[error("circuit open for backend `{backend}`")]
    CircuitOpen { backend: String },
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("no credential configured for tenant `{0:?}`")]
    InvalidCredential(TenantId),
    #[error("model call exceeded {timeout_secs}s timeout")]
    Timeout { timeout_secs: u64 },
}

/// Errors a stage can produce. The orchestrator converts all of these to the
/// graceful-failure branch; none reach the caller raw.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error(transparent)]
    Governor(#[from] GovernorError),
    #[error("{stage:?} produced malformed structured output: {detail}")]
    MalformedOutput { stage: StageTag, detail: String },
    #[error("data unavailable: {reason}")]
    DataUnavailable { reason: String },
    #[error("{stage:?} exceeded its time budget")]
    Timeout { stage: StageTag },
}

impl StageError {
    pub fn malformed(stage: StageTag, detail: impl Into<String>) -> Self {
        Self::MalformedOutput { stage, detail: detail.into() }
    }

    /// Whether Planner/Composer may retry once with a stricter output
    /// contract. Timeouts and credential problems never retry.
    pub fn allows_internal_retry(&self) -> bool {
        match self {
            Self::Governor(GovernorError::RateLimited { .. })
            | Self::Governor(GovernorError::CircuitOpen { .. })
            | Self::Governor(GovernorError::Backend(_))
            | Self::MalformedOutput { .. } => true,
            Self::Governor(GovernorError::InvalidCredential(_))
            | Self::Governor(GovernorError::Timeout { .. })
            | Self::DataUnavailable { .. }
            | Self::Timeout { .. } => false,
        }
    }

    /// Stable error kind label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Governor(GovernorError::RateLimited { .. }) => "rate_limited",
            Self::Governor(GovernorError::CircuitOpen { .. }) => "circuit_open",
            Self::Governor(GovernorError::Backend(_)) => "backend_error",
            Self::Governor(GovernorError::InvalidCredential(_)) => "invalid_credential",
            Self::Governor(GovernorError::Timeout { .. }) => "call_timeout",
            Self::MalformedOutput { .. } => "malformed_stage_output",
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::Timeout { .. } => "stage_timeout",
        }
    }
}
