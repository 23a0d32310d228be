//! Per-hook token-bucket rate limiting for the webhook receiver: 60 requests/minute, burst
//! 10. Limiters are built lazily, under the same double-checked-locking idiom the Tool Pool
//! uses for its per-project cache.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;

type HookLimiter = RateLimiter<governor::state::direct::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

const REQUESTS_PER_MINUTE: u32 = 60;
const BURST: u32 = 10;

pub struct WebhookRateLimiters {
    limiters: RwLock<HashMap<String, Arc<HookLimiter>>>,
}

impl WebhookRateLimiters {
    pub fn new() -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// `true` if the request is allowed under `hook_id`'s bucket, `false` if rate-limited.
    pub async fn check(&self, hook_id: &str) -> bool {
        let limiter = self.get_or_create(hook_id).await;
        limiter.check().is_ok()
    }

    async fn get_or_create(&self, hook_id: &str) -> Arc<HookLimiter> {
        {
            let read = self.limiters.read().await;
            if let Some(l) = read.get(hook_id) {
                return l.clone();
            }
        }
        let mut write = self.limiters.write().await;
        if let Some(l) = write.get(hook_id) {
            return l.clone();
        }
        let quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap())
            .allow_burst(NonZeroU32::new(BURST).unwrap());
        let limiter = Arc::new(RateLimiter::direct(quota));
        write.insert(hook_id.to_string(), limiter.clone());
        limiter
    }
}

impl Default for WebhookRateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_limit_is_allowed() {
        let limiters = WebhookRateLimiters::new();
        for _ in 0..BURST {
            assert!(limiters.check("hook-1").await);
        }
    }

    #[tokio::test]
    async fn exceeding_burst_is_rate_limited() {
        let limiters = WebhookRateLimiters::new();
        for _ in 0..BURST {
            assert!(limiters.check("hook-1").await);
        }
        assert!(!limiters.check("hook-1").await);
    }

    #[tokio::test]
    async fn separate_hooks_have_independent_buckets() {
        let limiters = WebhookRateLimiters::new();
        for _ in 0..BURST {
            assert!(limiters.check("hook-1").await);
        }
        assert!(limiters.check("hook-2").await);
    }
}
