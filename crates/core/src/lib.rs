pub mod config;
pub mod domain;
pub mod errors;
pub mod usage;

pub use domain::plan::{Criterion, ExecutionPlan};
pub use domain::request::{Channel, HistoryTurn, Request, RequestId, Role, TenantId, UserId};
pub use domain::retrieval::{DataPayload, RetrievedData};
pub use domain::run::{PipelineReply, PipelineRun, RunOutcome};
pub use domain::validation::{CriterionVerdict, ValidationOutcome};
pub use errors::{GovernorError, LimitScope, StageError, StageTag};
pub use usage::{InMemoryUsageSink, NullUsageSink, UsageRecord, UsageSink};
