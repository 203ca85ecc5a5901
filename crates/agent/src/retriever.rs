//! Data Retriever stage: runs the planner's data request against an external
//! tool under its own timeout. Failure is folded into the composer's input as
//! an explicit unavailability signal, never escalated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use tally_core::{DataPayload, RetrievedData, StageError, StageTag, TenantId};

use crate::stage::{Stage, StageContext};

/// Errors the concrete data tool may surface. All of them fold into
/// `RetrievedData::Unavailable`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DataToolError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("data request rejected: {0}")]
    BadRequest(String),
}

/// Boundary contract for the external data source, e.g. a timesheet API
/// client. The concrete implementation lives outside this crate.
#[async_trait]
pub trait DataTool: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        data_request: &str,
        tenant_id: &TenantId,
    ) -> Result<DataPayload, DataToolError>;
}

pub struct DataRetriever {
    tool: Arc<dyn DataTool>,
    timeout: Duration,
}

impl DataRetriever {
    pub fn new(tool: Arc<dyn DataTool>, timeout: Duration) -> Self {
        Self { tool, timeout }
    }
}

#[async_trait]
impl Stage for DataRetriever {
    type Input = String;
    type Output = RetrievedData;

    fn tag(&self) -> StageTag {
        StageTag::Retriever
    }

    /// Never fails the run: timeouts and tool errors come back as
    /// `RetrievedData::Unavailable` with a user-safe reason. The raw detail
    /// goes to the log, not to the composer.
    async fn execute(
        &self,
        data_request: String,
        ctx: &StageContext,
    ) -> Result<RetrievedData, StageError> {
        let outcome =
            tokio::time::timeout(self.timeout, self.tool.fetch(&data_request, &ctx.tenant_id))
                .await;

        match outcome {
            Ok(Ok(payload)) => Ok(RetrievedData::Available(payload)),
            Ok(Err(error)) => {
                warn!(
                    event_name = "data_retrieval_failed",
                    request_id = %ctx.request_id.0,
                    tool = self.tool.name(),
                    error = %error,
                    "retrieval failed, composing without data"
                );
                Ok(RetrievedData::Unavailable {
                    reason: "the timesheet data source did not return results".to_string(),
                })
            }
            Err(_elapsed) => {
                warn!(
                    event_name = "data_retrieval_timeout",
                    request_id = %ctx.request_id.0,
                    tool = self.tool.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "retrieval timed out, composing without data"
                );
                Ok(RetrievedData::Unavailable {
                    reason: "the timesheet data source took too long to respond".to_string(),
                })
            }
        }
    }
}
