//! Resource governance for every outbound model call.
//!
//! No stage talks to a model backend directly: every call goes through
//! [`ResourceGovernor::invoke`], which applies, in order, credential routing,
//! two-scope rate limiting, response caching, circuit breaking, and a
//! per-call timeout, then records token/latency/cost usage per tenant, user,
//! and calling stage.
//!
//! All shared state (quota windows, cache entries, breaker state) lives in
//! concurrency-safe stores injected as explicit dependencies so tests can
//! substitute fakes per case.

pub mod backend;
pub mod breaker;
pub mod cache;
pub mod credentials;
pub mod governor;
pub mod prompt;
pub mod rate_limit;

pub use backend::{BackendCompletion, BackendError, HttpModelBackend, ModelBackend};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::ResponseCache;
pub use credentials::CredentialStore;
pub use governor::{CallScope, ResourceGovernor};
pub use prompt::{ChatMessage, ChatPrompt, Completion, TokenUsage};
pub use rate_limit::{RateLimitConfig, RateLimiter};
