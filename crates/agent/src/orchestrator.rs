//! Pipeline orchestrator: sequences the five stages, owns the bounded
//! refinement loop and the graceful-failure branch, and enforces the per-run
//! wall-clock budget at stage boundaries.
//!
//! No stage error ever reaches the caller raw; every failure lands in the
//! apology path, and the apology is sent even when it fails validation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use tally_core::config::AppConfig;
use tally_core::{
    PipelineReply, PipelineRun, Request, RequestId, RetrievedData, RunOutcome, StageError,
    StageTag, ValidationOutcome,
};
use tally_governor::ResourceGovernor;

use crate::composer::{ComposeTask, Composer, FALLBACK_APOLOGY};
use crate::formatter::Formatter;
use crate::planner::Planner;
use crate::retriever::{DataRetriever, DataTool};
use crate::stage::{Stage, StageContext};
use crate::validator::{ValidationInput, Validator};

/// Write-after-send seam: persists the exchange once a reply is handed to
/// the send boundary. The conversation store behind it is an external
/// collaborator.
pub trait SendHook: Send + Sync {
    fn record(&self, request: &Request, reply: &PipelineReply);
}

pub struct Orchestrator {
    planner: Planner,
    retriever: DataRetriever,
    composer: Composer,
    formatter: Formatter,
    validator: Validator,
    governor: Arc<ResourceGovernor>,
    run_budget: Duration,
    max_refinements: u32,
    send_hook: Option<Arc<dyn SendHook>>,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        governor: Arc<ResourceGovernor>,
        data_tool: Arc<dyn DataTool>,
    ) -> Self {
        Self {
            planner: Planner::new(),
            retriever: DataRetriever::new(
                data_tool,
                Duration::from_secs(config.pipeline.retriever_timeout_secs),
            ),
            composer: Composer::new(),
            formatter: Formatter::new(config.channels.clone()),
            validator: Validator::new(Duration::from_secs(
                config.pipeline.criterion_timeout_secs,
            )),
            governor,
            run_budget: Duration::from_secs(config.pipeline.run_budget_secs),
            max_refinements: config.pipeline.max_refinements,
            send_hook: None,
        }
    }

    pub fn with_send_hook(mut self, hook: Arc<dyn SendHook>) -> Self {
        self.send_hook = Some(hook);
        self
    }

    /// One inbound message, one reply. The terminal outcome is always `Sent`
    /// or `GracefulFailure`; errors never propagate.
    pub async fn run(&self, request: Request) -> PipelineReply {
        let deadline = Instant::now() + self.run_budget;
        let ctx = StageContext::for_request(&request, Arc::clone(&self.governor));
        let mut run = PipelineRun::new(request);

        let reply = match self.drive(&mut run, &ctx, deadline).await {
            Ok(Some(parts)) => PipelineReply { parts, outcome: RunOutcome::Sent },
            Ok(None) => {
                // Validation could not be satisfied within the refinement cap.
                self.graceful_failure(&run, &ctx, deadline).await
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline_stage_failed",
                    request_id = %ctx.request_id.0,
                    error_kind = error.kind(),
                    error = %error,
                    refinements = run.refinements_used(),
                    "stage failed, taking the graceful-failure branch"
                );
                self.graceful_failure(&run, &ctx, deadline).await
            }
        };

        info!(
            event_name = "pipeline_run_completed",
            request_id = %ctx.request_id.0,
            tenant_id = %ctx.tenant_id.0,
            outcome = ?reply.outcome,
            refinements = run.refinements_used(),
            parts = reply.parts.len(),
            "run finished"
        );

        if let Some(hook) = &self.send_hook {
            hook.record(&run.request, &reply);
        }
        reply
    }

    /// The main sequence. `Ok(Some(parts))` is a validated reply,
    /// `Ok(None)` means validation stayed failed after the allowed
    /// refinement, `Err` is a stage failure.
    async fn drive(
        &self,
        run: &mut PipelineRun,
        ctx: &StageContext,
        deadline: Instant,
    ) -> Result<Option<Vec<String>>, StageError> {
        check_budget(deadline, StageTag::Planner)?;
        let plan = self
            .planner
            .execute(run.request.clone(), ctx)
            .await
            .map_err(|error| logged(&ctx.request_id, StageTag::Planner, error))?;
        run.plan = Some(plan.clone());

        let data = match &plan.data_request {
            Some(data_request) if plan.needs_data => {
                check_budget(deadline, StageTag::Retriever)?;
                self.retriever.execute(data_request.clone(), ctx).await?
            }
            _ => RetrievedData::NotRequested,
        };

        check_budget(deadline, StageTag::Composer)?;
        let mut draft = self
            .composer
            .execute(
                ComposeTask::Draft { request: run.request.clone(), plan: plan.clone(), data },
                ctx,
            )
            .await
            .map_err(|error| logged(&ctx.request_id, StageTag::Composer, error))?;
        run.draft = Some(draft.clone());

        loop {
            check_budget(deadline, StageTag::Formatter)?;
            let parts =
                self.formatter.execute((draft.clone(), run.request.channel), ctx).await?;

            check_budget(deadline, StageTag::Validator)?;
            let outcome = self.validate(&parts, &plan.scorecard, run, ctx).await?;
            let failed = outcome.failed_feedback();
            run.last_validation = Some(outcome.clone());

            if outcome.overall_pass {
                return Ok(Some(parts));
            }
            if !run.can_refine(self.max_refinements) {
                return Ok(None);
            }

            run.record_refinement();
            check_budget(deadline, StageTag::Composer)?;
            draft = self
                .composer
                .execute(
                    ComposeTask::Refine {
                        request: run.request.clone(),
                        draft: draft.clone(),
                        feedback: failed,
                    },
                    ctx,
                )
                .await
                .map_err(|error| logged(&ctx.request_id, StageTag::Composer, error))?;
            run.draft = Some(draft.clone());
        }
    }

    /// Compose, format, and validate the apology. The apology is sent even
    /// when it fails validation; if composing it fails at all, a fixed
    /// literal goes out instead. Never loops.
    ///
    /// When planning itself failed (no plan on the run) or the budget is
    /// spent, the fixed apology goes out directly without further model
    /// calls.
    async fn graceful_failure(
        &self,
        run: &PipelineRun,
        ctx: &StageContext,
        deadline: Instant,
    ) -> PipelineReply {
        let over_budget = Instant::now() >= deadline;
        let apology = if over_budget || run.plan.is_none() {
            FALLBACK_APOLOGY.to_string()
        } else {
            match self
                .composer
                .execute(ComposeTask::GracefulFailure { request: run.request.clone() }, ctx)
                .await
            {
                Ok(apology) => apology,
                Err(error) => {
                    warn!(
                        event_name = "apology_composition_failed",
                        request_id = %ctx.request_id.0,
                        error_kind = error.kind(),
                        "falling back to the fixed apology"
                    );
                    FALLBACK_APOLOGY.to_string()
                }
            }
        };

        // Formatting is pure and cannot fail; the fallback arm keeps the
        // apology path total.
        let parts = self
            .formatter
            .execute((apology.clone(), run.request.channel), ctx)
            .await
            .unwrap_or_else(|_| vec![apology.clone()]);

        if !over_budget {
            if let Some(plan) = &run.plan {
                match self.validate(&parts, &plan.scorecard, run, ctx).await {
                    Ok(outcome) if !outcome.overall_pass => {
                        warn!(
                            event_name = "apology_failed_validation",
                            request_id = %ctx.request_id.0,
                            "sending the apology as a last resort anyway"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(
                            event_name = "apology_validation_errored",
                            request_id = %ctx.request_id.0,
                            error_kind = error.kind(),
                            "sending the apology unvalidated"
                        );
                    }
                }
            }
        }

        PipelineReply { parts, outcome: RunOutcome::GracefulFailure }
    }

    async fn validate(
        &self,
        parts: &[String],
        scorecard: &[tally_core::Criterion],
        run: &PipelineRun,
        ctx: &StageContext,
    ) -> Result<ValidationOutcome, StageError> {
        self.validator
            .execute(
                ValidationInput {
                    message: parts.join("\n"),
                    request_text: run.request.text.clone(),
                    scorecard: scorecard.to_vec(),
                },
                ctx,
            )
            .await
    }
}

fn check_budget(deadline: Instant, stage: StageTag) -> Result<(), StageError> {
    if Instant::now() >= deadline {
        return Err(StageError::Timeout { stage });
    }
    Ok(())
}

fn logged(request_id: &RequestId, stage: StageTag, error: StageError) -> StageError {
    warn!(
        event_name = "stage_error",
        request_id = %request_id.0,
        stage = stage.as_str(),
        error_kind = error.kind(),
        "stage returned an error"
    );
    error
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use tally_core::config::{AppConfig, TenantCredentialConfig};
    use tally_core::{
        Channel, DataPayload, InMemoryUsageSink, PipelineReply, Request, RunOutcome, TenantId,
    };
    use tally_governor::{
        BackendCompletion, BackendError, ChatPrompt, ModelBackend, ResourceGovernor, TokenUsage,
    };

    use super::{Orchestrator, SendHook};
    use crate::composer::FALLBACK_APOLOGY;
    use crate::retriever::{DataTool, DataToolError};

    /// Scripted backend keyed on the stage prompts: composer drafts, refine
    /// drafts, apologies, and per-criterion verdicts.
    struct ScriptedBackend {
        draft: String,
        refined: String,
        /// Fail this criterion whenever the message lacks the marker.
        fail_rule: Option<(&'static str, &'static str)>,
        fail_all_validation: bool,
        compose_calls: AtomicU32,
        refine_calls: AtomicU32,
        last_compose_input: Mutex<String>,
    }

    impl ScriptedBackend {
        fn passing(draft: &str) -> Self {
            Self {
                draft: draft.to_string(),
                refined: draft.to_string(),
                fail_rule: None,
                fail_all_validation: false,
                compose_calls: AtomicU32::new(0),
                refine_calls: AtomicU32::new(0),
                last_compose_input: Mutex::new(String::new()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            prompt: &ChatPrompt,
            _model: &str,
            _api_key: &SecretString,
        ) -> Result<BackendCompletion, BackendError> {
            let system = &prompt.messages[0].content;
            let user = &prompt.messages[1].content;

            let content = if system.contains("revise a draft") {
                self.refine_calls.fetch_add(1, Ordering::SeqCst);
                self.refined.clone()
            } else if system.contains("apology") {
                "I'm sorry, I couldn't get that answered. Could you rephrase it for me?"
                    .to_string()
            } else if system.contains("check one quality criterion") {
                if self.fail_all_validation {
                    r#"{"passed": false, "feedback": "not satisfied"}"#.to_string()
                } else if let Some((criterion, marker)) = self.fail_rule {
                    if user.contains(&format!("[{criterion}]")) && !user.contains(marker) {
                        format!(r#"{{"passed": false, "feedback": "mention {marker}"}}"#)
                    } else {
                        r#"{"passed": true, "feedback": null}"#.to_string()
                    }
                } else {
                    r#"{"passed": true, "feedback": null}"#.to_string()
                }
            } else {
                self.compose_calls.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut last) = self.last_compose_input.lock() {
                    *last = user.clone();
                }
                self.draft.clone()
            };

            Ok(BackendCompletion {
                content,
                usage: TokenUsage { prompt_tokens: 40, completion_tokens: 12 },
            })
        }
    }

    struct FailingBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _prompt: &ChatPrompt,
            _model: &str,
            _api_key: &SecretString,
        ) -> Result<BackendCompletion, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Transport("HTTP 503: unavailable".to_string()))
        }
    }

    struct FakeTimesheetTool {
        result: Result<DataPayload, DataToolError>,
    }

    #[async_trait]
    impl DataTool for FakeTimesheetTool {
        fn name(&self) -> &str {
            "timesheet-fake"
        }

        async fn fetch(
            &self,
            _data_request: &str,
            _tenant_id: &TenantId,
        ) -> Result<DataPayload, DataToolError> {
            self.result.clone()
        }
    }

    fn week_data() -> Result<DataPayload, DataToolError> {
        Ok(DataPayload::new(serde_json::json!({"hours": 35, "entries": 5}))
            .with_period("Aug 17 to Aug 23"))
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.tenants.push(TenantCredentialConfig {
            id: "acme".to_string(),
            api_key: "sk-acme".to_string().into(),
        });
        config
    }

    fn orchestrator(
        config: &AppConfig,
        backend: Arc<dyn ModelBackend>,
        tool_result: Result<DataPayload, DataToolError>,
    ) -> Orchestrator {
        let governor = Arc::new(ResourceGovernor::from_config(
            config,
            backend,
            Arc::new(InMemoryUsageSink::default()),
        ));
        Orchestrator::new(config, governor, Arc::new(FakeTimesheetTool { result: tool_result }))
    }

    #[derive(Default)]
    struct RecordingHook {
        replies: Mutex<Vec<PipelineReply>>,
    }

    impl SendHook for RecordingHook {
        fn record(&self, _request: &Request, reply: &PipelineReply) {
            if let Ok(mut replies) = self.replies.lock() {
                replies.push(reply.clone());
            }
        }
    }

    #[tokio::test]
    async fn happy_path_sends_a_validated_answer_without_refinement() {
        let backend = Arc::new(ScriptedBackend::passing(
            "Aug 17 to Aug 23: you logged 35 hours across 5 entries this week.",
        ));
        let config = test_config();
        let hook = Arc::new(RecordingHook::default());
        let orchestrator = orchestrator(&config, backend.clone(), week_data())
            .with_send_hook(hook.clone());

        let reply = orchestrator
            .run(Request::new("acme", "u-1", Channel::Sms, "what were my hours this week?"))
            .await;

        assert_eq!(reply.outcome, RunOutcome::Sent);
        assert_eq!(reply.parts.len(), 1);
        assert!(reply.parts[0].chars().count() <= 160);
        assert_eq!(backend.refine_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.compose_calls.load(Ordering::SeqCst), 1);

        let recorded = hook.replies.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].outcome, RunOutcome::Sent);
    }

    #[tokio::test]
    async fn refinement_fixes_a_failing_criterion_then_sends() {
        let backend = Arc::new(ScriptedBackend {
            draft: "You logged 35 hours across 5 entries.".to_string(),
            refined: "Aug 17 to Aug 23: you logged 35 hours across 5 entries.".to_string(),
            fail_rule: Some(("states-period", "Aug 17")),
            fail_all_validation: false,
            compose_calls: AtomicU32::new(0),
            refine_calls: AtomicU32::new(0),
            last_compose_input: Mutex::new(String::new()),
        });
        let config = test_config();
        let orchestrator = orchestrator(&config, backend.clone(), week_data());

        let reply = orchestrator
            .run(Request::new("acme", "u-1", Channel::Sms, "what were my hours this week?"))
            .await;

        assert_eq!(reply.outcome, RunOutcome::Sent);
        assert!(reply.parts[0].contains("Aug 17"));
        assert_eq!(backend.refine_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_validation_failure_sends_the_apology() {
        let backend = Arc::new(ScriptedBackend {
            draft: "You logged 35 hours.".to_string(),
            refined: "You logged 35 hours, really.".to_string(),
            fail_rule: None,
            fail_all_validation: true,
            compose_calls: AtomicU32::new(0),
            refine_calls: AtomicU32::new(0),
            last_compose_input: Mutex::new(String::new()),
        });
        let config = test_config();
        let orchestrator = orchestrator(&config, backend.clone(), week_data());

        let reply = orchestrator
            .run(Request::new("acme", "u-1", Channel::Sms, "what were my hours this week?"))
            .await;

        assert_eq!(reply.outcome, RunOutcome::GracefulFailure);
        assert!(!reply.parts.is_empty(), "graceful failure must still send a message");
        assert!(reply.parts[0].to_ascii_lowercase().contains("sorry"));
        // The refinement bound holds even when validation never passes.
        assert_eq!(backend.refine_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_data_yields_an_honest_answer_not_a_failure() {
        let backend = Arc::new(ScriptedBackend::passing(
            "I couldn't reach your timesheet data for this week just now. \
             Please try again shortly.",
        ));
        let config = test_config();
        let orchestrator = orchestrator(
            &config,
            backend.clone(),
            Err(DataToolError::Unavailable("connection refused".to_string())),
        );

        let reply = orchestrator
            .run(Request::new("acme", "u-1", Channel::Sms, "what were my hours this week?"))
            .await;

        assert_eq!(reply.outcome, RunOutcome::Sent);
        let compose_input = backend.last_compose_input.lock().unwrap();
        assert!(compose_input.contains("Data: unavailable"));
        // The raw tool error never reaches the composer.
        assert!(!compose_input.contains("connection refused"));
    }

    #[tokio::test]
    async fn open_circuit_lands_in_graceful_failure_with_the_fixed_apology() {
        let backend = Arc::new(FailingBackend { calls: AtomicU32::new(0) });
        let mut config = test_config();
        config.governor.breaker_failure_threshold = 2;
        let orchestrator = orchestrator(&config, backend.clone(), week_data());

        let reply = orchestrator
            .run(Request::new("acme", "u-1", Channel::Sms, "what were my hours this week?"))
            .await;

        assert_eq!(reply.outcome, RunOutcome::GracefulFailure);
        assert_eq!(reply.parts, vec![FALLBACK_APOLOGY.to_string()]);
        // Compose attempt plus its internal retry opened the circuit; the
        // apology path failed fast without another backend call.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
