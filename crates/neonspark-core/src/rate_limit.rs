//! Per-client request rate limiting.
//!
//! Each client key may burst up to `max_requests`, after which one request is
//! replenished every `window / max_requests`.

use crate::{NeonError, Result};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as KeyedRateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Keys tracked before stale entries are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Rate limiter keyed by client identifier (usually the peer IP).
pub struct RateLimiter {
    limiter: KeyedRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    clock: DefaultClock,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    /// Allow `max_requests` per `window` for each client.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let burst = NonZeroU32::new(max_requests).ok_or_else(|| NeonError::Config {
            message: "RATE_LIMIT_REQUESTS must be greater than zero".to_string(),
        })?;
        let quota = Quota::with_period(window / max_requests)
            .ok_or_else(|| NeonError::Config {
                message: "RATE_LIMIT_WINDOW must be greater than zero".to_string(),
            })?
            .allow_burst(burst);

        Ok(Self {
            limiter: KeyedRateLimiter::keyed(quota),
            clock: DefaultClock::default(),
            max_requests,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request for `client_id`, failing when its budget is spent.
    pub fn check(&self, client_id: &str) -> Result<()> {
        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
        }

        self.limiter
            .check_key(&client_id.to_string())
            .map_err(|not_until| {
                let wait = not_until.wait_time_from(self.clock.now());
                debug!("Client {} rate limited for {:?}", client_id, wait);
                NeonError::RateLimited {
                    service: client_id.to_string(),
                    retry_after_secs: Some(wait.as_secs().max(1)),
                }
            })
    }
}
