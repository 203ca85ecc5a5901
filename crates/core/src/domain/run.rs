use serde::{Deserialize, Serialize};

use crate::domain::plan::ExecutionPlan;
use crate::domain::request::Request;
use crate::domain::validation::ValidationOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// A validated answer (or the last-resort apology) was handed to the
    /// send boundary.
    Sent,
    /// The apology path was taken: validation could not be satisfied or an
    /// earlier stage failed unrecoverably.
    GracefulFailure,
}

/// What the orchestrator hands back to the caller: ordered message parts
/// ready for the channel sender, plus the terminal outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReply {
    pub parts: Vec<String>,
    pub outcome: RunOutcome,
}

/// Aggregate state for one pipeline run. Exclusively owned and mutated by
/// the orchestrator; discarded when the reply is handed back.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub request: Request,
    pub plan: Option<ExecutionPlan>,
    pub draft: Option<String>,
    pub last_validation: Option<ValidationOutcome>,
    refinements_used: u32,
}

impl PipelineRun {
    pub fn new(request: Request) -> Self {
        Self { request, plan: None, draft: None, last_validation: None, refinements_used: 0 }
    }

    pub fn refinements_used(&self) -> u32 {
        self.refinements_used
    }

    /// Whether another refinement pass is permitted under the configured cap.
    /// The cap is checked here, before looping, never by call depth.
    pub fn can_refine(&self, max_refinements: u32) -> bool {
        self.refinements_used < max_refinements
    }

    pub fn record_refinement(&mut self) {
        self.refinements_used += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineRun;
    use crate::domain::request::{Channel, Request};

    #[test]
    fn refinement_cap_is_enforced_by_counter() {
        let mut run =
            PipelineRun::new(Request::new("acme", "u-1", Channel::Sms, "hours this week"));
        assert!(run.can_refine(1));
        run.record_refinement();
        assert!(!run.can_refine(1));
        assert_eq!(run.refinements_used(), 1);
    }
}
