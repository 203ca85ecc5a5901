//! Planner stage: decides whether a request needs external data and emits
//! the validation scorecard the final answer is judged against.
//!
//! Known timesheet request shapes are classified heuristically without a
//! model call; only novel phrasing falls back to the model, with one stricter
//! retry if the structured output comes back malformed.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use tally_core::{Channel, Criterion, ExecutionPlan, Request, StageError, StageTag};
use tally_governor::{ChatMessage, ChatPrompt};

use crate::stage::{strip_code_fences, Stage, StageContext};

const MAX_CRITERIA: usize = 5;
const HISTORY_TURNS_IN_PROMPT: usize = 6;

#[derive(Clone, Debug, Default)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Heuristic pass over known request shapes. `None` means the phrasing
    /// is novel and the model decides.
    pub fn classify(&self, request: &Request) -> Option<ExecutionPlan> {
        let normalized = normalize_text(&request.text);

        if is_timesheet_shaped(&normalized) {
            let period = extract_period(&normalized);
            let data_request = serde_json::json!({
                "query": "timesheet_summary",
                "period": period,
            })
            .to_string();
            return Some(ExecutionPlan::with_data(
                data_request,
                timesheet_scorecard(request.channel, period),
            ));
        }

        if is_small_talk(&normalized) {
            return Some(ExecutionPlan::answer_only(vec![generic_completeness()]));
        }

        None
    }

    async fn plan_via_model(
        &self,
        request: &Request,
        ctx: &StageContext,
    ) -> Result<ExecutionPlan, StageError> {
        let first = self.model_attempt(request, ctx, false).await;
        match first {
            Ok(plan) => Ok(plan),
            Err(error) if error.allows_internal_retry() => {
                warn!(
                    event_name = "stage_internal_retry",
                    request_id = %ctx.request_id.0,
                    stage = StageTag::Planner.as_str(),
                    error_kind = error.kind(),
                    "retrying plan generation with a stricter contract"
                );
                self.model_attempt(request, ctx, true).await
            }
            Err(error) => Err(error),
        }
    }

    async fn model_attempt(
        &self,
        request: &Request,
        ctx: &StageContext,
        strict: bool,
    ) -> Result<ExecutionPlan, StageError> {
        let prompt = plan_prompt(request, strict);
        let completion = ctx.invoke(StageTag::Planner, &prompt).await?;
        parse_plan(&completion.content, request.channel)
    }
}

#[async_trait]
impl Stage for Planner {
    type Input = Request;
    type Output = ExecutionPlan;

    fn tag(&self) -> StageTag {
        StageTag::Planner
    }

    async fn execute(
        &self,
        request: Request,
        ctx: &StageContext,
    ) -> Result<ExecutionPlan, StageError> {
        if let Some(plan) = self.classify(&request) {
            debug!(
                event_name = "plan_heuristic_match",
                request_id = %ctx.request_id.0,
                needs_data = plan.needs_data,
                criteria = plan.scorecard.len(),
                "request matched a known shape"
            );
            return Ok(plan);
        }
        self.plan_via_model(&request, ctx).await
    }
}

fn plan_prompt(request: &Request, strict: bool) -> ChatPrompt {
    let mut system = String::from(
        "You plan replies for a workplace time-tracking assistant. Decide whether \
         answering requires timesheet data and write 1-5 boolean quality criteria \
         the final reply must satisfy. Each criterion must be checkable from the \
         final message and the request alone. Respond with a single JSON object: \
         {\"needs_data\": bool, \"data_request\": string or null, \
         \"criteria\": [{\"id\": string, \"description\": string, \
         \"expected_signal\": string}]}",
    );
    if strict {
        system.push_str(
            " Output ONLY the JSON object. No prose, no code fences, no trailing text.",
        );
    }

    let mut user = String::new();
    for turn in request.history.iter().rev().take(HISTORY_TURNS_IN_PROMPT).rev() {
        user.push_str(&format!("[{:?}] {}\n", turn.role, turn.text));
    }
    user.push_str(&format!("Channel: {}\nRequest: {}", request.channel.as_str(), request.text));

    ChatPrompt::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
}

#[derive(Deserialize)]
struct PlanWire {
    needs_data: bool,
    data_request: Option<String>,
    criteria: Vec<CriterionWire>,
}

#[derive(Deserialize)]
struct CriterionWire {
    id: String,
    description: String,
    #[serde(default)]
    expected_signal: String,
}

fn parse_plan(content: &str, channel: Channel) -> Result<ExecutionPlan, StageError> {
    let body = strip_code_fences(content);
    let wire: PlanWire = serde_json::from_str(body)
        .map_err(|error| StageError::malformed(StageTag::Planner, error.to_string()))?;

    if wire.needs_data && wire.data_request.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(StageError::malformed(
            StageTag::Planner,
            "needs_data set without a data_request",
        ));
    }

    let raw = wire
        .criteria
        .into_iter()
        .map(|criterion| {
            Criterion::new(criterion.id, criterion.description, criterion.expected_signal)
        })
        .collect();
    let scorecard = sanitize_scorecard(raw, channel);

    Ok(ExecutionPlan {
        needs_data: wire.needs_data,
        data_request: if wire.needs_data { wire.data_request } else { None },
        scorecard,
    })
}

/// Drop unverifiable or duplicate criteria, cap the count, and fall back to
/// the generic completeness criterion when nothing usable remains.
pub(crate) fn sanitize_scorecard(raw: Vec<Criterion>, channel: Channel) -> Vec<Criterion> {
    let mut seen = std::collections::BTreeSet::new();
    let mut scorecard: Vec<Criterion> = raw
        .into_iter()
        .filter(is_verifiable)
        .filter(|criterion| seen.insert(criterion.id.clone()))
        .take(MAX_CRITERIA)
        .collect();

    if scorecard.is_empty() {
        scorecard.push(generic_completeness());
    }
    if scorecard.len() < MAX_CRITERIA {
        if let Some(channel_criterion) = channel_criterion(channel) {
            if seen.insert(channel_criterion.id.clone()) {
                scorecard.push(channel_criterion);
            }
        }
    }
    scorecard
}

/// A criterion is verifiable when the evaluator can check it against the
/// final message and the request alone. Vague judgement words make a
/// criterion unverifiable.
fn is_verifiable(criterion: &Criterion) -> bool {
    const VAGUE_TERMS: [&str; 5] = ["appropriate", "reasonable", "good", "suitable", "engaging"];

    if criterion.id.trim().is_empty()
        || criterion.description.trim().is_empty()
        || criterion.expected_signal.trim().is_empty()
    {
        return false;
    }
    let signal = criterion.expected_signal.to_ascii_lowercase();
    !VAGUE_TERMS.iter().any(|term| signal.contains(term))
}

fn generic_completeness() -> Criterion {
    Criterion::new(
        "complete-answer",
        "the reply directly addresses the user's question",
        "content responsive to the request text",
    )
}

fn channel_criterion(channel: Channel) -> Option<Criterion> {
    match channel {
        Channel::Sms => Some(Criterion::new(
            "channel-plain",
            "the reply contains no markup, suitable for plain text",
            "absence of markdown or HTML constructs",
        )),
        Channel::Chat => Some(Criterion::new(
            "channel-reduced",
            "the reply uses at most simple emphasis, no headers or tables",
            "no heading, table, or link markup",
        )),
        Channel::Email => None,
    }
}

fn timesheet_scorecard(channel: Channel, period: &str) -> Vec<Criterion> {
    let mut scorecard = vec![
        Criterion::new(
            "states-period",
            "the reply states the time period the data covers",
            format!("an explicit period, e.g. \"{period}\" or a date range"),
        ),
        Criterion::new(
            "answers-hours",
            "the reply gives a concrete hours figure or honestly says the data \
             could not be retrieved",
            "a number of hours, or a clear unavailability statement",
        ),
    ];
    if let Some(criterion) = channel_criterion(channel) {
        scorecard.push(criterion);
    }
    scorecard
}

fn is_timesheet_shaped(normalized: &str) -> bool {
    const SHAPES: [&str; 8] = [
        "hours",
        "timesheet",
        "time sheet",
        "logged",
        "worked",
        "overtime",
        "clocked",
        "time entries",
    ];
    SHAPES.iter().any(|shape| normalized.contains(shape))
}

fn is_small_talk(normalized: &str) -> bool {
    const OPENERS: [&str; 6] = ["hello", "hi ", "hey", "thanks", "thank you", "good morning"];
    normalized.len() < 40 && OPENERS.iter().any(|opener| normalized.starts_with(opener))
}

fn extract_period(normalized: &str) -> &'static str {
    const PERIODS: [&str; 8] = [
        "last week",
        "this week",
        "last month",
        "this month",
        "yesterday",
        "today",
        "last pay period",
        "this pay period",
    ];
    PERIODS
        .iter()
        .find(|period| normalized.contains(**period))
        .copied()
        .unwrap_or("this week")
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{parse_plan, sanitize_scorecard, Planner};
    use tally_core::{Channel, Criterion, Request};

    #[test]
    fn hours_question_classifies_as_data_backed() {
        let planner = Planner::new();
        let request = Request::new("acme", "u-1", Channel::Sms, "What were my hours last week?");

        let plan = planner.classify(&request).expect("known shape");
        assert!(plan.needs_data);
        let data_request = plan.data_request.clone().expect("data request");
        assert!(data_request.contains("timesheet_summary"));
        assert!(data_request.contains("last week"));
        assert!(plan.scorecard.iter().any(|criterion| criterion.id == "states-period"));
        assert!(plan.has_unique_criterion_ids());
    }

    #[test]
    fn greeting_classifies_as_answer_only() {
        let planner = Planner::new();
        let request = Request::new("acme", "u-1", Channel::Chat, "hello there");

        let plan = planner.classify(&request).expect("known shape");
        assert!(!plan.needs_data);
        assert_eq!(plan.scorecard.len(), 1);
        assert_eq!(plan.scorecard[0].id, "complete-answer");
    }

    #[test]
    fn novel_phrasing_is_not_classified_heuristically() {
        let planner = Planner::new();
        let request =
            Request::new("acme", "u-1", Channel::Email, "Compare my Q2 utilization to Q1");
        assert!(planner.classify(&request).is_none());
    }

    #[test]
    fn vague_and_duplicate_criteria_are_rejected() {
        let scorecard = sanitize_scorecard(
            vec![
                Criterion::new("tone", "tone is nice", "an appropriate tone"),
                Criterion::new("period", "states the period", "a date range"),
                Criterion::new("period", "states the period twice", "a date range"),
            ],
            Channel::Email,
        );

        assert_eq!(scorecard.len(), 1);
        assert_eq!(scorecard[0].id, "period");
    }

    #[test]
    fn empty_scorecard_falls_back_to_generic_completeness() {
        let scorecard = sanitize_scorecard(
            vec![Criterion::new("tone", "tone is nice", "a suitable register")],
            Channel::Email,
        );
        assert_eq!(scorecard.len(), 1);
        assert_eq!(scorecard[0].id, "complete-answer");
    }

    #[test]
    fn model_plan_parses_with_and_without_code_fences() {
        let body = r#"{"needs_data": true, "data_request": "overtime for march",
            "criteria": [{"id": "period", "description": "states the period",
            "expected_signal": "a month name"}]}"#;
        let plan = parse_plan(body, Channel::Sms).expect("bare json");
        assert!(plan.needs_data);

        let fenced = format!("```json\n{body}\n```");
        let plan = parse_plan(&fenced, Channel::Sms).expect("fenced json");
        assert_eq!(plan.data_request.as_deref(), Some("overtime for march"));
        assert!(plan.scorecard.iter().any(|criterion| criterion.id == "channel-plain"));
    }

    #[test]
    fn needs_data_without_a_request_is_malformed() {
        let body = r#"{"needs_data": true, "data_request": null, "criteria": []}"#;
        assert!(parse_plan(body, Channel::Sms).is_err());
    }
}
