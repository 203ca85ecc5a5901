//! Sliding-window rate limiting at two independent scopes.
//!
//! Budgets are enforced per tenant and per end user (within a tenant); a
//! call exceeding either scope is rejected before any network activity. Both
//! windows are advanced and counted under one lock so a rejected call never
//! consumes budget at the other scope.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use std::sync::Mutex;

use tally_core::{GovernorError, LimitScope, TenantId, UserId};

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub tenant_budget: u32,
    pub user_budget: u32,
}

#[derive(Clone, Copy, Debug)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

impl WindowCounter {
    fn fresh(now: Instant) -> Self {
        Self { count: 0, window_start: now }
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn retry_after(&self, now: Instant, window: Duration) -> u64 {
        window.saturating_sub(now.duration_since(self.window_start)).as_secs().max(1)
    }
}

#[derive(Default)]
struct Counters {
    tenants: HashMap<TenantId, WindowCounter>,
    users: HashMap<(TenantId, UserId), WindowCounter>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    counters: Mutex<Counters>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, counters: Mutex::new(Counters::default()) }
    }

    /// Check both scopes and, only if both have budget, count the call
    /// against each.
    pub fn check_and_count(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<(), GovernorError> {
        let now = Instant::now();
        let mut guard = match self.counters.lock() {
            Ok(counters) => counters,
            Err(poisoned) => poisoned.into_inner(),
        };
        let counters = &mut *guard;

        let window = self.config.window;

        let tenant = counters
            .tenants
            .entry(tenant_id.clone())
            .or_insert_with(|| WindowCounter::fresh(now));
        tenant.roll(now, window);
        if tenant.count >= self.config.tenant_budget {
            let retry_after_secs = tenant.retry_after(now, window);
            return Err(GovernorError::RateLimited { scope: LimitScope::Tenant, retry_after_secs });
        }

        let user_key = (tenant_id.clone(), user_id.clone());
        let user = counters.users.entry(user_key).or_insert_with(|| WindowCounter::fresh(now));
        user.roll(now, window);
        if user.count >= self.config.user_budget {
            let retry_after_secs = user.retry_after(now, window);
            return Err(GovernorError::RateLimited { scope: LimitScope::User, retry_after_secs });
        }

        user.count += 1;
        tenant.count += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RateLimitConfig, RateLimiter};
    use tally_core::{GovernorError, LimitScope, TenantId, UserId};

    fn limiter(tenant_budget: u32, user_budget: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            tenant_budget,
            user_budget,
        })
    }

    #[test]
    fn user_scope_trips_before_tenant_scope() {
        let limiter = limiter(10, 2);
        let tenant = TenantId("acme".into());
        let user = UserId("u-1".into());

        assert!(limiter.check_and_count(&tenant, &user).is_ok());
        assert!(limiter.check_and_count(&tenant, &user).is_ok());
        let err = limiter.check_and_count(&tenant, &user).unwrap_err();
        assert!(matches!(err, GovernorError::RateLimited { scope: LimitScope::User, .. }));
    }

    #[test]
    fn tenant_budget_is_shared_across_users() {
        let limiter = limiter(3, 3);
        let tenant = TenantId("acme".into());

        assert!(limiter.check_and_count(&tenant, &UserId("u-1".into())).is_ok());
        assert!(limiter.check_and_count(&tenant, &UserId("u-2".into())).is_ok());
        assert!(limiter.check_and_count(&tenant, &UserId("u-3".into())).is_ok());
        let err = limiter.check_and_count(&tenant, &UserId("u-4".into())).unwrap_err();
        assert!(matches!(err, GovernorError::RateLimited { scope: LimitScope::Tenant, .. }));
    }

    #[test]
    fn tenants_are_isolated_from_each_other() {
        let limiter = limiter(1, 1);
        let user = UserId("u-1".into());

        assert!(limiter.check_and_count(&TenantId("acme".into()), &user).is_ok());
        assert!(limiter.check_and_count(&TenantId("globex".into()), &user).is_ok());
        assert!(limiter.check_and_count(&TenantId("acme".into()), &user).is_err());
    }

    #[test]
    fn rejected_user_call_does_not_consume_tenant_budget() {
        let limiter = limiter(2, 1);
        let tenant = TenantId("acme".into());

        assert!(limiter.check_and_count(&tenant, &UserId("u-1".into())).is_ok());
        // u-1 is now over its user budget; the rejection must not burn the
        // tenant's remaining slot.
        assert!(limiter.check_and_count(&tenant, &UserId("u-1".into())).is_err());
        assert!(limiter.check_and_count(&tenant, &UserId("u-2".into())).is_ok());
    }

    #[test]
    fn window_expiry_restores_budget() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(20),
            tenant_budget: 1,
            user_budget: 1,
        });
        let tenant = TenantId("acme".into());
        let user = UserId("u-1".into());

        assert!(limiter.check_and_count(&tenant, &user).is_ok());
        assert!(limiter.check_and_count(&tenant, &user).is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check_and_count(&tenant, &user).is_ok());
    }
}
