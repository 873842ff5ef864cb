use rand::Rng;
use std::time::{Duration, Instant};

use crate::common::{
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_FACTOR, DEFAULT_RETRY_JITTER,
    DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_RETRY_WINDOW_MS,
};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::lock::LockService;

/// Backoff policy for lock acquisition.
///
/// The delay before retry `n` is `base_delay_ms * factor^n`, capped at
/// `max_delay_ms`, plus a random jitter of up to `jitter` times that step.
/// Acquisition gives up with `LockTimeout` once `window_ms` has elapsed.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
    pub window_ms: u64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            factor: DEFAULT_RETRY_FACTOR,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            window_ms: DEFAULT_RETRY_WINDOW_MS,
            jitter: DEFAULT_RETRY_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given retry, without jitter.
    pub(crate) fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = (self.factor.max(1) as u64).saturating_pow(attempt.min(63));
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.calculate_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=jitter);
        delay + delay.mul_f64(extra)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// A lock held by one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
    /// Owner of the key before this lease was granted.
    pub previous_owner: Option<String>,
}

/// Acquires, renews and releases locks on behalf of one shard.
#[derive(Clone)]
pub struct LockClient {
    service: LockService,
    owner: String,
    policy: RetryPolicy,
}

impl LockClient {
    pub fn new(service: LockService, owner: &str, policy: RetryPolicy) -> Self {
        LockClient {
            service,
            owner: owner.to_string(),
            policy,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Acquires `key`, backing off while another owner holds it.
    ///
    /// # Errors
    ///
    /// * `LockTimeout` when the retry window runs out.
    /// * `LockServiceError` when the service itself fails.
    pub fn acquire(&self, key: &str, ttl: Duration) -> MemDbResult<Lease> {
        let started = Instant::now();
        let window = self.policy.window();
        let mut attempt = 0u32;

        loop {
            let grant = self
                .service
                .try_acquire(key, &self.owner, ttl)
                .map_err(|e| service_error("acquire", key, e))?;

            if let Some(grant) = grant {
                if attempt > 0 {
                    log::debug!("Lock {} acquired by {} after {} retries", key, self.owner, attempt);
                }
                return Ok(Lease {
                    key: key.to_string(),
                    token: grant.token,
                    previous_owner: grant.previous_owner,
                });
            }

            let delay = self.policy.jittered_delay(attempt);
            if started.elapsed() + delay > window {
                log::error!("Timed out acquiring lock {} after {} attempts", key, attempt + 1);
                return Err(MemDbError::new(
                    &format!("Timed out acquiring lock {}", key),
                    ErrorKind::LockTimeout,
                ));
            }
            std::thread::sleep(delay);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Releases a lease. A lease that expired or moved on is left alone.
    pub fn release(&self, lease: &Lease) -> MemDbResult<()> {
        let released = self
            .service
            .release(&lease.key, &lease.token)
            .map_err(|e| service_error("release", &lease.key, e))?;
        if !released {
            log::debug!("Lock {} was no longer held by {} on release", lease.key, self.owner);
        }
        Ok(())
    }

    /// Extends a lease.
    ///
    /// # Errors
    ///
    /// `LockLost` if the lease expired or was reassigned.
    pub fn renew(&self, lease: &Lease, ttl: Duration) -> MemDbResult<()> {
        let renewed = self
            .service
            .renew(&lease.key, &lease.token, ttl)
            .map_err(|e| service_error("renew", &lease.key, e))?;
        if renewed {
            Ok(())
        } else {
            log::error!("Lock {} is no longer held by {}", lease.key, self.owner);
            Err(MemDbError::new(
                &format!("Lock {} was lost", lease.key),
                ErrorKind::LockLost,
            ))
        }
    }
}

fn service_error(action: &str, key: &str, cause: MemDbError) -> MemDbError {
    log::error!("Lock service failed to {} {}: {}", action, key, cause);
    MemDbError::new_with_cause(
        &format!("Lock service failed to {} {}", action, key),
        ErrorKind::LockServiceError,
        cause,
    )
}
