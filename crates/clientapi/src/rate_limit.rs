use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// `20/min` and `100/hour`, both windows must allow (§4.9). Fixed-window
/// per-IP counters, grounded on `crates/gateway/src/request_throttle.rs`'s
/// `DashMap<key, WindowState>` design; extended here to two independent
/// windows per key and a periodic sweep rather than a request-count
/// trigger, to match §4.9's literal "swept every 5 minutes".
pub struct ValidateRateLimiter {
    minute_limit: usize,
    minute_window: Duration,
    hour_limit: usize,
    hour_window: Duration,
    buckets: DashMap<IpAddr, (WindowState, WindowState)>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

impl WindowState {
    fn fresh(now: Instant) -> Self {
        Self {
            started_at: now,
            count: 1,
        }
    }
}

pub enum RateLimitDecision {
    Allowed,
    Denied,
}

impl ValidateRateLimiter {
    pub fn new() -> Self {
        Self::with_limits(20, Duration::from_secs(60), 100, Duration::from_secs(3600))
    }

    fn with_limits(minute_limit: usize, minute_window: Duration, hour_limit: usize, hour_window: Duration) -> Self {
        Self {
            minute_limit,
            minute_window,
            hour_limit,
            hour_window,
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitDecision {
        let mut entry = self
            .buckets
            .entry(ip)
            .or_insert_with(|| (WindowState::fresh(now), WindowState::fresh(now)));
        let (minute, hour) = entry.value_mut();

        if now.duration_since(minute.started_at) >= self.minute_window {
            *minute = WindowState::fresh(now);
        } else if minute.count >= self.minute_limit {
            return RateLimitDecision::Denied;
        } else {
            minute.count += 1;
        }

        if now.duration_since(hour.started_at) >= self.hour_window {
            *hour = WindowState::fresh(now);
        } else if hour.count >= self.hour_limit {
            return RateLimitDecision::Denied;
        } else {
            hour.count += 1;
        }

        RateLimitDecision::Allowed
    }

    /// Drops buckets idle past the longer of the two windows. Intended to
    /// run on a 5-minute interval (§4.9).
    pub fn sweep(&self) {
        let now = Instant::now();
        let stale_after = self.hour_window;
        self.buckets.retain(|_, (minute, hour)| {
            now.duration_since(minute.started_at) <= stale_after
                || now.duration_since(hour.started_at) <= stale_after
        });
    }

    pub async fn run_sweeper(self: std::sync::Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
        loop {
            interval.tick().await;
            self.sweep();
        }
    }
}

impl Default for ValidateRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_minute_limit_then_denies() {
        let limiter = ValidateRateLimiter::with_limits(2, Duration::from_secs(60), 100, Duration::from_secs(3600));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let now = Instant::now();

        assert!(matches!(limiter.check_at(ip, now), RateLimitDecision::Allowed));
        assert!(matches!(limiter.check_at(ip, now), RateLimitDecision::Allowed));
        assert!(matches!(limiter.check_at(ip, now), RateLimitDecision::Denied));
    }

    #[test]
    fn minute_window_resets_but_hour_window_still_applies() {
        let limiter = ValidateRateLimiter::with_limits(1, Duration::from_secs(60), 1, Duration::from_secs(3600));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let now = Instant::now();

        assert!(matches!(limiter.check_at(ip, now), RateLimitDecision::Allowed));
        // Minute window has reset, but the hourly bucket is still consumed.
        let later = now + Duration::from_secs(61);
        assert!(matches!(limiter.check_at(ip, later), RateLimitDecision::Denied));
    }

    #[test]
    fn different_ips_have_independent_buckets() {
        let limiter = ValidateRateLimiter::with_limits(1, Duration::from_secs(60), 100, Duration::from_secs(3600));
        let now = Instant::now();
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();

        assert!(matches!(limiter.check_at(a, now), RateLimitDecision::Allowed));
        assert!(matches!(limiter.check_at(b, now), RateLimitDecision::Allowed));
    }
}
