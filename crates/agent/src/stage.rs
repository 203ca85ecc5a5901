//! The uniform stage contract and the per-run context stages execute in.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use tally_core::{Request, RequestId, StageError, StageTag, TenantId, UserId};
use tally_governor::{CallScope, ChatPrompt, Completion, ResourceGovernor};

/// Per-run context handed to every stage. Cheap to clone; the governor is
/// shared behind an `Arc`.
#[derive(Clone)]
pub struct StageContext {
    pub request_id: RequestId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    governor: Arc<ResourceGovernor>,
}

impl StageContext {
    pub fn for_request(request: &Request, governor: Arc<ResourceGovernor>) -> Self {
        Self {
            request_id: request.id.clone(),
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone(),
            governor,
        }
    }

    pub fn scope(&self, stage: StageTag) -> CallScope {
        CallScope {
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            stage,
        }
    }

    /// One governed model call on behalf of a stage.
    pub async fn invoke(
        &self,
        stage: StageTag,
        prompt: &ChatPrompt,
    ) -> Result<Completion, StageError> {
        Ok(self.governor.invoke(prompt, &self.scope(stage)).await?)
    }

    /// Governed call with the single internal retry Planner and Composer are
    /// allowed: a transient failure or malformed output gets one more attempt
    /// with a stricter prompt, anything else escalates immediately.
    pub async fn invoke_with_retry<F>(
        &self,
        stage: StageTag,
        prompt: &ChatPrompt,
        stricter_prompt: F,
    ) -> Result<Completion, StageError>
    where
        F: FnOnce() -> ChatPrompt,
    {
        match self.invoke(stage, prompt).await {
            Ok(completion) => Ok(completion),
            Err(error) if error.allows_internal_retry() => {
                warn!(
                    event_name = "stage_internal_retry",
                    request_id = %self.request_id.0,
                    stage = stage.as_str(),
                    error_kind = error.kind(),
                    "retrying once with a stricter contract"
                );
                self.invoke(stage, &stricter_prompt()).await
            }
            Err(error) => Err(error),
        }
    }
}

/// Model output helper: tolerate a fenced JSON block even when the contract
/// asked for bare JSON.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start().strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
}

/// Uniform interface every pipeline stage implements. The orchestrator wires
/// concrete stages; the trait keeps the seam substitutable in tests.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn tag(&self) -> StageTag;

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &StageContext,
    ) -> Result<Self::Output, StageError>;
}
