//! Per-call cost and latency accounting.
//!
//! Every governed model call emits one [`UsageRecord`] tagged by tenant,
//! user, and calling stage. The pipeline itself only produces these records;
//! an external observability consumer reads them through a [`UsageSink`].

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{TenantId, UserId};
use crate::errors::StageTag;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub stage: StageTag,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub estimated_cost_micro_usd: u64,
    pub latency_ms: u64,
    /// True when the completion was served from the response cache and no
    /// backend call was made.
    pub cached: bool,
    pub recorded_at: DateTime<Utc>,
}

pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

#[derive(Clone, Default)]
pub struct InMemoryUsageSink {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl InMemoryUsageSink {
    pub fn records(&self) -> Vec<UsageRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl UsageSink for InMemoryUsageSink {
    fn record(&self, record: UsageRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Sink that drops every record. For callers that do not consume usage.
#[derive(Clone, Copy, Default)]
pub struct NullUsageSink;

impl UsageSink for NullUsageSink {
    fn record(&self, _record: UsageRecord) {}
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{InMemoryUsageSink, UsageRecord, UsageSink};
    use crate::domain::request::{TenantId, UserId};
    use crate::errors::StageTag;

    #[test]
    fn in_memory_sink_keeps_tenant_and_stage_tags() {
        let sink = InMemoryUsageSink::default();
        sink.record(UsageRecord {
            tenant_id: TenantId("acme".into()),
            user_id: UserId("u-7".into()),
            stage: StageTag::Composer,
            model: "tally-chat-1".into(),
            prompt_tokens: 180,
            completion_tokens: 42,
            estimated_cost_micro_usd: 96,
            latency_ms: 640,
            cached: false,
            recorded_at: Utc::now(),
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tenant_id, TenantId("acme".into()));
        assert_eq!(records[0].stage, StageTag::Composer);
        assert!(!records[0].cached);
    }
}
