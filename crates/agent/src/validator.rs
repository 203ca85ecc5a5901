//! Validator stage: evaluates the formatted message against the scorecard,
//! one model call per criterion, fanned out in parallel and merged
//! deterministically by criterion id.
//!
//! An evaluator that errors (timeout, malformed verdict, governor rejection)
//! defaults that criterion to pass with the `defaulted` flag set, so a broken
//! evaluator can never block delivery. Defaulted verdicts are logged for
//! review.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::warn;

use tally_core::{Criterion, CriterionVerdict, StageError, StageTag, ValidationOutcome};
use tally_governor::{ChatMessage, ChatPrompt};

use crate::stage::{strip_code_fences, Stage, StageContext};

pub struct ValidationInput {
    pub message: String,
    pub request_text: String,
    pub scorecard: Vec<Criterion>,
}

pub struct Validator {
    criterion_timeout: Duration,
}

impl Validator {
    pub fn new(criterion_timeout: Duration) -> Self {
        Self { criterion_timeout }
    }

    async fn evaluate_criterion(
        ctx: StageContext,
        criterion: Criterion,
        message: String,
        request_text: String,
        budget: Duration,
    ) -> Result<CriterionVerdict, StageError> {
        let prompt = verdict_prompt(&criterion, &message, &request_text);
        let evaluation = tokio::time::timeout(budget, ctx.invoke(StageTag::Validator, &prompt))
            .await
            .map_err(|_| StageError::Timeout { stage: StageTag::Validator })??;
        parse_verdict(&criterion.id, &evaluation.content)
    }
}

#[async_trait]
impl Stage for Validator {
    type Input = ValidationInput;
    type Output = ValidationOutcome;

    fn tag(&self) -> StageTag {
        StageTag::Validator
    }

    async fn execute(
        &self,
        input: ValidationInput,
        ctx: &StageContext,
    ) -> Result<ValidationOutcome, StageError> {
        let mut tasks = JoinSet::new();
        for criterion in input.scorecard.iter().cloned() {
            let ctx = ctx.clone();
            let message = input.message.clone();
            let request_text = input.request_text.clone();
            let budget = self.criterion_timeout;
            tasks.spawn(async move {
                let id = criterion.id.clone();
                let verdict =
                    Self::evaluate_criterion(ctx, criterion, message, request_text, budget).await;
                (id, verdict)
            });
        }

        let mut verdicts = std::collections::HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((criterion_id, verdict)) = joined else {
                continue;
            };
            match verdict {
                Ok(verdict) => {
                    verdicts.insert(criterion_id, verdict);
                }
                Err(error) => {
                    warn!(
                        event_name = "criterion_evaluation_defaulted",
                        request_id = %ctx.request_id.0,
                        criterion_id = %criterion_id,
                        error_kind = error.kind(),
                        "evaluator failed, criterion defaults to pass"
                    );
                    verdicts.insert(criterion_id.clone(), CriterionVerdict::defaulted_pass(criterion_id));
                }
            }
        }

        // Merge in scorecard order; completion order of the parallel tasks
        // never affects the outcome. A verdict lost to a panicked task also
        // defaults to pass.
        let per_criterion = input
            .scorecard
            .iter()
            .map(|criterion| {
                verdicts
                    .remove(&criterion.id)
                    .unwrap_or_else(|| CriterionVerdict::defaulted_pass(&criterion.id))
            })
            .collect();
        Ok(ValidationOutcome::from_verdicts(per_criterion))
    }
}

fn verdict_prompt(criterion: &Criterion, message: &str, request_text: &str) -> ChatPrompt {
    let system = "You check one quality criterion for a reply from a workplace \
         time-tracking assistant. Judge only the stated criterion, nothing else. \
         Respond with a single JSON object: {\"passed\": bool, \
         \"feedback\": string or null}. When the criterion fails, feedback must \
         say concretely what to change."
        .to_string();
    let user = format!(
        "Criterion [{id}]: {description}\nLook for: {signal}\n\
         Original question: {request_text}\nReply under review:\n{message}",
        id = criterion.id,
        description = criterion.description,
        signal = criterion.expected_signal,
    );

    ChatPrompt::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(0.0)
}

#[derive(Deserialize)]
struct VerdictWire {
    passed: bool,
    #[serde(default)]
    feedback: Option<String>,
}

fn parse_verdict(criterion_id: &str, content: &str) -> Result<CriterionVerdict, StageError> {
    let wire: VerdictWire = serde_json::from_str(strip_code_fences(content))
        .map_err(|error| StageError::malformed(StageTag::Validator, error.to_string()))?;

    if wire.passed {
        Ok(CriterionVerdict::pass(criterion_id))
    } else {
        Ok(CriterionVerdict::fail(
            criterion_id,
            wire.feedback.unwrap_or_else(|| "criterion not satisfied".to_string()),
        ))
    }
}
