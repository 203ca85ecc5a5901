//! Composer stage: turns the plan and retrieved data into a natural-language
//! draft, revises a draft against validator feedback, and writes the apology
//! for the graceful-failure branch.

use async_trait::async_trait;

use tally_core::{ExecutionPlan, Request, RetrievedData, StageError, StageTag};
use tally_governor::{ChatMessage, ChatPrompt};

use crate::stage::{Stage, StageContext};

/// Last-resort apology used when even the graceful-failure composition
/// fails. Sent as a literal, never validated, never looped.
pub const FALLBACK_APOLOGY: &str = "Sorry, I couldn't put together an answer just now. \
     Could you try rephrasing your question?";

/// The three composer operations behind the uniform stage interface.
pub enum ComposeTask {
    Draft { request: Request, plan: ExecutionPlan, data: RetrievedData },
    Refine { request: Request, draft: String, feedback: Vec<(String, String)> },
    GracefulFailure { request: Request },
}

#[derive(Clone, Debug, Default)]
pub struct Composer;

impl Composer {
    pub fn new() -> Self {
        Self
    }

    fn draft_prompt(request: &Request, plan: &ExecutionPlan, data: &RetrievedData) -> ChatPrompt {
        let system = "You write replies for a workplace time-tracking assistant. \
             Answer the user's question directly and plainly. When data is provided, \
             state the time period it covers. When data is marked unavailable, say so \
             honestly and do not invent figures. Output only the reply text."
            .to_string();

        let mut user = format!("Question: {}\n", request.text);
        match data {
            RetrievedData::Available(payload) => {
                if let Some(period) = &payload.period {
                    user.push_str(&format!("Data period: {period}\n"));
                }
                user.push_str(&format!("Data: {}\n", payload.fields));
            }
            RetrievedData::Unavailable { reason } => {
                user.push_str(&format!("Data: unavailable ({reason})\n"));
            }
            RetrievedData::NotRequested => {}
        }
        if let Some(data_request) = &plan.data_request {
            user.push_str(&format!("Data request was: {data_request}\n"));
        }

        ChatPrompt::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }

    fn refine_prompt(request: &Request, draft: &str, feedback: &[(String, String)]) -> ChatPrompt {
        let system = "You revise a draft reply from a workplace time-tracking assistant. \
             Address every piece of feedback without dropping facts the draft already \
             states correctly. Output only the revised reply text."
            .to_string();

        let mut user = format!("Question: {}\nDraft: {draft}\nFeedback:\n", request.text);
        for (criterion_id, note) in feedback {
            user.push_str(&format!("- [{criterion_id}] {note}\n"));
        }

        ChatPrompt::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }

    fn apology_prompt(request: &Request) -> ChatPrompt {
        let system = "You write a short, warm apology for a workplace time-tracking \
             assistant that could not answer. Invite the user to rephrase. Never \
             mention errors, systems, or technical details. Output only the apology."
            .to_string();
        let user = format!("The question that could not be answered: {}", request.text);

        ChatPrompt::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }

    fn stricter(prompt: &ChatPrompt) -> ChatPrompt {
        let mut messages = prompt.messages.clone();
        if let Some(system) = messages.first_mut() {
            system.content.push_str(
                " Respond with the reply text alone: no preamble, no quotes, no fences.",
            );
        }
        ChatPrompt { messages, temperature: prompt.temperature, max_tokens: prompt.max_tokens }
    }
}

#[async_trait]
impl Stage for Composer {
    type Input = ComposeTask;
    type Output = String;

    fn tag(&self) -> StageTag {
        StageTag::Composer
    }

    async fn execute(&self, task: ComposeTask, ctx: &StageContext) -> Result<String, StageError> {
        let prompt = match &task {
            ComposeTask::Draft { request, plan, data } => Self::draft_prompt(request, plan, data),
            ComposeTask::Refine { request, draft, feedback } => {
                Self::refine_prompt(request, draft, feedback)
            }
            ComposeTask::GracefulFailure { request } => Self::apology_prompt(request),
        };

        let completion = ctx
            .invoke_with_retry(StageTag::Composer, &prompt, || Self::stricter(&prompt))
            .await?;

        let draft = completion.content.trim().to_string();
        if draft.is_empty() {
            return Err(StageError::malformed(StageTag::Composer, "empty completion"));
        }
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::Composer;
    use tally_core::{Channel, DataPayload, ExecutionPlan, Request, RetrievedData};

    #[test]
    fn draft_prompt_carries_the_data_period() {
        let request = Request::new("acme", "u-1", Channel::Sms, "hours this week?");
        let plan = ExecutionPlan::with_data("timesheet_summary", Vec::new());
        let data = RetrievedData::Available(
            DataPayload::new(serde_json::json!({"hours": 35})).with_period("2026-08-17 to 2026-08-23"),
        );

        let prompt = Composer::draft_prompt(&request, &plan, &data);
        let user = &prompt.messages[1].content;
        assert!(user.contains("2026-08-17 to 2026-08-23"));
        assert!(user.contains("\"hours\":35"));
    }

    #[test]
    fn unavailable_data_is_flagged_in_the_prompt() {
        let request = Request::new("acme", "u-1", Channel::Sms, "hours this week?");
        let plan = ExecutionPlan::with_data("timesheet_summary", Vec::new());
        let data = RetrievedData::Unavailable { reason: "source did not respond".to_string() };

        let prompt = Composer::draft_prompt(&request, &plan, &data);
        assert!(prompt.messages[1].content.contains("Data: unavailable"));
    }

    #[test]
    fn refine_prompt_lists_only_failed_criteria() {
        let request = Request::new("acme", "u-1", Channel::Sms, "hours this week?");
        let feedback = vec![("states-period".to_string(), "say which week".to_string())];

        let prompt = Composer::refine_prompt(&request, "You logged 35 hours.", &feedback);
        let user = &prompt.messages[1].content;
        assert!(user.contains("[states-period] say which week"));
    }
}
