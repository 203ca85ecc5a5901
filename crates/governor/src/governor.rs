use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use secrecy::SecretString;
use tracing::{debug, warn};

use tally_core::config::{AppConfig, ModelCostConfig};
use tally_core::{GovernorError, StageTag, TenantId, UsageRecord, UsageSink, UserId};

use crate::backend::{BackendError, ModelBackend};
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::cache::ResponseCache;
use crate::credentials::CredentialStore;
use crate::prompt::{ChatPrompt, Completion, TokenUsage};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Who is making a call and from where. Tags rate-limit scopes and usage
/// records.
#[derive(Clone, Debug)]
pub struct CallScope {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub stage: StageTag,
}

/// The single entry point for model calls from every stage.
pub struct ResourceGovernor {
    backend: Arc<dyn ModelBackend>,
    credentials: CredentialStore,
    limiter: RateLimiter,
    cache: ResponseCache,
    breaker: CircuitBreaker,
    usage_sink: Arc<dyn UsageSink>,
    model: String,
    per_call_timeout: Duration,
    model_costs: BTreeMap<String, ModelCostConfig>,
}

impl ResourceGovernor {
    pub fn from_config(
        config: &AppConfig,
        backend: Arc<dyn ModelBackend>,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Self {
        let breaker_name = backend.name().to_string();
        Self::from_parts(
            backend,
            CredentialStore::new(&config.tenants),
            RateLimiter::new(RateLimitConfig {
                window: Duration::from_secs(config.governor.window_secs),
                tenant_budget: config.governor.tenant_requests_per_window,
                user_budget: config.governor.user_requests_per_window,
            }),
            ResponseCache::new(
                Duration::from_secs(config.governor.cache_ttl_secs),
                config.governor.cache_capacity,
            ),
            CircuitBreaker::new(
                breaker_name,
                BreakerConfig {
                    failure_threshold: config.governor.breaker_failure_threshold,
                    success_threshold: config.governor.breaker_success_threshold,
                    cooldown: Duration::from_secs(config.governor.breaker_cooldown_secs),
                },
            ),
            usage_sink,
            config.llm.model.clone(),
            Duration::from_secs(config.governor.per_call_timeout_secs),
            config.governor.model_costs.clone(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        backend: Arc<dyn ModelBackend>,
        credentials: CredentialStore,
        limiter: RateLimiter,
        cache: ResponseCache,
        breaker: CircuitBreaker,
        usage_sink: Arc<dyn UsageSink>,
        model: String,
        per_call_timeout: Duration,
        model_costs: BTreeMap<String, ModelCostConfig>,
    ) -> Self {
        Self {
            backend,
            credentials,
            limiter,
            cache,
            breaker,
            usage_sink,
            model,
            per_call_timeout,
            model_costs,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Governed model call: credential routing, then rate limiting, then
    /// cache, then circuit breaker, then the timed backend call. Rejections
    /// happen before any network activity.
    pub async fn invoke(
        &self,
        prompt: &ChatPrompt,
        scope: &CallScope,
    ) -> Result<Completion, GovernorError> {
        let api_key: SecretString = self.credentials.resolve(&scope.tenant_id)?.clone();

        self.limiter.check_and_count(&scope.tenant_id, &scope.user_id)?;

        let cache_key = prompt.cache_key(&self.model, &scope.tenant_id);
        if let Some((content, usage)) = self.cache.get(&cache_key) {
            debug!(
                stage = scope.stage.as_str(),
                tenant_id = %scope.tenant_id.0,
                "completion served from cache"
            );
            self.record_usage(scope, usage, 0, 0, true);
            return Ok(Completion { content, usage, cached: true });
        }

        self.breaker.check()?;

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.per_call_timeout, self.backend.complete(prompt, &self.model, &api_key))
                .await;

        match outcome {
            Err(_elapsed) => {
                self.breaker.record_failure();
                warn!(
                    stage = scope.stage.as_str(),
                    tenant_id = %scope.tenant_id.0,
                    timeout_secs = self.per_call_timeout.as_secs(),
                    "model call timed out"
                );
                Err(GovernorError::Timeout { timeout_secs: self.per_call_timeout.as_secs() })
            }
            Ok(Err(BackendError::AuthRejected(detail))) => {
                // A rejected tenant key is not a backend health signal; it
                // must not open the circuit for other tenants.
                warn!(
                    stage = scope.stage.as_str(),
                    tenant_id = %scope.tenant_id.0,
                    detail,
                    "backend rejected tenant credential"
                );
                Err(GovernorError::InvalidCredential(scope.tenant_id.clone()))
            }
            Ok(Err(error)) => {
                self.breaker.record_failure();
                Err(GovernorError::Backend(error.to_string()))
            }
            Ok(Ok(completion)) => {
                self.breaker.record_success();
                let latency_ms = started.elapsed().as_millis() as u64;
                self.cache.put(cache_key, completion.content.clone(), completion.usage);
                let cost = self.estimate_cost(completion.usage);
                self.record_usage(scope, completion.usage, cost, latency_ms, false);
                Ok(Completion {
                    content: completion.content,
                    usage: completion.usage,
                    cached: false,
                })
            }
        }
    }

    fn estimate_cost(&self, usage: TokenUsage) -> u64 {
        let Some(rates) = self.model_costs.get(&self.model) else {
            return 0;
        };
        let prompt_cost =
            u64::from(usage.prompt_tokens).saturating_mul(rates.prompt_micro_usd_per_1k) / 1000;
        let completion_cost = u64::from(usage.completion_tokens)
            .saturating_mul(rates.completion_micro_usd_per_1k)
            / 1000;
        prompt_cost.saturating_add(completion_cost)
    }

    fn record_usage(
        &self,
        scope: &CallScope,
        usage: TokenUsage,
        estimated_cost_micro_usd: u64,
        latency_ms: u64,
        cached: bool,
    ) {
        self.usage_sink.record(UsageRecord {
            tenant_id: scope.tenant_id.clone(),
            user_id: scope.user_id.clone(),
            stage: scope.stage,
            model: self.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            estimated_cost_micro_usd,
            latency_ms,
            cached,
            recorded_at: Utc::now(),
        });
    }
}
