//! Quality-gated reply pipeline.
//!
//! One inbound conversational message runs through five stages:
//!
//! 1. **Planner** (`planner`) - decides whether timesheet data is needed and
//!    writes the validation scorecard
//! 2. **Data Retriever** (`retriever`) - fetches from the external data tool,
//!    folding failure into an explicit unavailability signal
//! 3. **Composer** (`composer`) - drafts, refines, and writes apologies
//! 4. **Formatter** (`formatter`) - channel presentation rules from config
//! 5. **Validator** (`validator`) - per-criterion parallel evaluation
//!
//! The orchestrator (`orchestrator`) sequences them with at most one
//! refinement pass and a graceful-failure fallback. Every model call goes
//! through the resource governor; no stage talks to a backend directly.
//!
//! # Delivery Guarantee
//!
//! A message only reaches the send boundary after its latest validation
//! passed, except the apology path, which is sent as a last resort even when
//! it fails validation. The caller always gets a reply.

pub mod composer;
pub mod formatter;
pub mod orchestrator;
pub mod planner;
pub mod retriever;
pub mod stage;
pub mod validator;

pub use composer::{ComposeTask, Composer, FALLBACK_APOLOGY};
pub use formatter::Formatter;
pub use orchestrator::{Orchestrator, SendHook};
pub use planner::Planner;
pub use retriever::{DataRetriever, DataTool, DataToolError};
pub use stage::{Stage, StageContext};
pub use validator::{ValidationInput, Validator};
