use serde::{Deserialize, Serialize};

/// Structured result returned by an external data tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    /// What slice of data this covers, e.g. "2026-08-17 to 2026-08-23".
    pub period: Option<String>,
    pub fields: serde_json::Value,
}

impl DataPayload {
    pub fn new(fields: serde_json::Value) -> Self {
        Self { period: None, fields }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }
}

/// What the Composer receives from the retrieval step. Retrieval failure is
/// folded in as an explicit signal rather than aborting the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RetrievedData {
    Available(DataPayload),
    Unavailable { reason: String },
    NotRequested,
}

impl RetrievedData {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}
