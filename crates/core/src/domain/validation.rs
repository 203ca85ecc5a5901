use serde::{Deserialize, Serialize};

/// Verdict for a single scorecard criterion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub criterion_id: String,
    pub passed: bool,
    /// True when the evaluator itself errored and the criterion was defaulted
    /// to pass. Surfaced so observability can count masked verdicts.
    pub defaulted: bool,
    pub feedback: Option<String>,
}

impl CriterionVerdict {
    pub fn pass(criterion_id: impl Into<String>) -> Self {
        Self { criterion_id: criterion_id.into(), passed: true, defaulted: false, feedback: None }
    }

    pub fn fail(criterion_id: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            passed: false,
            defaulted: false,
            feedback: Some(feedback.into()),
        }
    }

    pub fn defaulted_pass(criterion_id: impl Into<String>) -> Self {
        Self { criterion_id: criterion_id.into(), passed: true, defaulted: true, feedback: None }
    }
}

/// Aggregated validator output for one formatted message.
///
/// `overall_pass` is derived in the constructor and always equals
/// "every per-criterion verdict passed".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub overall_pass: bool,
    pub per_criterion: Vec<CriterionVerdict>,
}

impl ValidationOutcome {
    pub fn from_verdicts(per_criterion: Vec<CriterionVerdict>) -> Self {
        let overall_pass = per_criterion.iter().all(|verdict| verdict.passed);
        Self { overall_pass, per_criterion }
    }

    /// Failed criteria with their feedback, the refinement input.
    pub fn failed_feedback(&self) -> Vec<(String, String)> {
        self.per_criterion
            .iter()
            .filter(|verdict| !verdict.passed)
            .map(|verdict| {
                (
                    verdict.criterion_id.clone(),
                    verdict.feedback.clone().unwrap_or_else(|| {
                        "criterion not satisfied; no evaluator feedback".to_string()
                    }),
                )
            })
            .collect()
    }

    pub fn defaulted_criteria(&self) -> Vec<&str> {
        self.per_criterion
            .iter()
            .filter(|verdict| verdict.defaulted)
            .map(|verdict| verdict.criterion_id.as_str())
            .collect()
    }
}
