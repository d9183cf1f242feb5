//! Fixed-window request budgets.
//!
//! Windows live in process memory, keyed by bucket and caller identifier.
//! They are the only mutable in-process state on the request path and are
//! pruned by the maintenance task.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::Address;

/// What a rule counts requests by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKey {
    /// Client IP address.
    Ip,
    /// Session address, falling back to the client IP when anonymous.
    Address,
}

/// A budget of `max_requests` per `window` for one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub bucket: &'static str,
    pub max_requests: u32,
    pub window: Duration,
    pub key: RateLimitKey,
}

impl RateLimitRule {
    pub fn per_minute(bucket: &'static str, max_requests: u32, key: RateLimitKey) -> Self {
        Self {
            bucket,
            max_requests,
            window: Duration::from_secs(60),
            key,
        }
    }

    /// Identifier this rule counts the caller under.
    pub fn identifier(&self, ip: Option<IpAddr>, address: Option<&Address>) -> String {
        let ip = ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        match (self.key, address) {
            (RateLimitKey::Address, Some(address)) => format!("{}:addr:{address}", self.bucket),
            _ => format!("{}:ip:{ip}", self.bucket),
        }
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter shared by all requests.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, rule: &RateLimitRule, identifier: &str) -> RateLimitDecision {
        self.check_at(rule, identifier, Instant::now())
    }

    /// Count one request at `now` against `identifier`'s window.
    pub fn check_at(&self, rule: &RateLimitRule, identifier: &str, now: Instant) -> RateLimitDecision {
        let mut window = self
            .windows
            .entry(identifier.to_string())
            .or_insert(Window {
                started: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= rule.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= rule.max_requests {
            let retry_after = rule
                .window
                .saturating_sub(now.saturating_duration_since(window.started));
            return RateLimitDecision::Limited {
                retry_after: retry_after.max(Duration::from_secs(1)),
            };
        }
        window.count += 1;
        RateLimitDecision::Allowed {
            remaining: rule.max_requests - window.count,
        }
    }

    /// Drop windows idle for longer than `max_window`.
    pub fn prune(&self, max_window: Duration) -> usize {
        self.prune_at(max_window, Instant::now())
    }

    pub fn prune_at(&self, max_window: Duration, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < max_window);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
