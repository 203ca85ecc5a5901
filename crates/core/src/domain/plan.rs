use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One boolean quality requirement the final message must satisfy.
///
/// Identity is `id`; ids must be unique within a scorecard. Insertion order
/// is the display order in diagnostics, nothing more.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub description: String,
    /// What the evaluator should look for in the message (a phrase, a fact,
    /// an absence of markup). Must be checkable from the message and the
    /// original request alone.
    pub expected_signal: String,
}

impl Criterion {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        expected_signal: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_signal: expected_signal.into(),
        }
    }
}

/// Planner output: whether external data is needed and the scorecard the
/// final answer will be validated against. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub needs_data: bool,
    pub data_request: Option<String>,
    pub scorecard: Vec<Criterion>,
}

impl ExecutionPlan {
    pub fn answer_only(scorecard: Vec<Criterion>) -> Self {
        Self { needs_data: false, data_request: None, scorecard }
    }

    pub fn with_data(data_request: impl Into<String>, scorecard: Vec<Criterion>) -> Self {
        Self { needs_data: true, data_request: Some(data_request.into()), scorecard }
    }

    pub fn has_unique_criterion_ids(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.scorecard.iter().all(|criterion| seen.insert(criterion.id.as_str()))
    }
}
