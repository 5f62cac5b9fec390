//! Per-client failure counting and temporary lockout.
//!
//! Each key is either open (attempts below the threshold) or blocked until a
//! deadline. A success resets the key; a background sweep drops stale and
//! elapsed entries so the map stays bounded.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AuthError;
use crate::config::RateLimitConfig;

/// Key for the stricter authentication-endpoint limiter.
pub fn auth_key(ip: IpAddr) -> String {
    format!("auth:{ip}")
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    attempts: u32,
    last_attempt: Instant,
    blocked: bool,
    block_until: Option<Instant>,
}

impl RateLimitEntry {
    fn is_blocked_at(&self, now: Instant) -> bool {
        self.blocked && self.block_until.is_some_and(|until| now < until)
    }
}

/// Failure counter with lockout, shared across request tasks.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    config: RateLimitConfig,
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one failure for `key`. Returns `true` when the key is now blocked.
    pub async fn record_failure(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                attempts: 0,
                last_attempt: now,
                blocked: false,
                block_until: None,
            });

        if entry.is_blocked_at(now) {
            return true;
        }
        if entry.blocked || now.duration_since(entry.last_attempt) > self.config.window {
            entry.attempts = 0;
            entry.blocked = false;
            entry.block_until = None;
        }

        entry.attempts += 1;
        entry.last_attempt = now;
        if entry.attempts >= self.config.max_attempts {
            entry.blocked = true;
            entry.block_until = Some(now + self.config.block_duration);
            warn!(
                target: "audit",
                limiter = self.name,
                key,
                attempts = entry.attempts,
                block_secs = self.config.block_duration.as_secs(),
                "client blocked after repeated failures"
            );
            return true;
        }
        false
    }

    pub async fn is_blocked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.is_blocked_at(now))
    }

    /// Remaining block time, `None` when the key is open.
    pub async fn retry_after(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| e.is_blocked_at(now))?;
        entry.block_until.map(|until| until.saturating_duration_since(now))
    }

    /// Reject with [`AuthError::RateLimited`] while `key` is blocked.
    pub async fn check(&self, key: &str) -> Result<(), AuthError> {
        match self.retry_after(key).await {
            Some(remaining) => Err(AuthError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            }),
            None => Ok(()),
        }
    }

    /// Forget `key` after a successful authentication.
    pub async fn reset(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drop open entries idle past the window and blocks that have elapsed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| {
            if e.blocked {
                e.is_blocked_at(now)
            } else {
                now.duration_since(e.last_attempt) <= window
            }
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.config.sweep_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(limiter = limiter.name, "rate limiter sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = limiter.sweep().await;
                        if removed > 0 {
                            debug!(limiter = limiter.name, removed, "rate limiter sweep");
                        }
                    }
                }
            }
        })
    }
}
