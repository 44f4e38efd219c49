//! Per-bucket request suspension driven by server rate-limit signals.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_AFTER_HEADER: &str = "x-ratelimit-reset-after";
const GLOBAL_HEADER: &str = "x-ratelimit-global";

/// Used when a 429 carries no usable retry-after.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Rate-limit signals from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
    /// Delay demanded by a 429.
    pub retry_after: Option<Duration>,
    /// Whether the limit applies to every bucket.
    pub global: bool,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

impl RateLimitInfo {
    /// Read the signals of a response.
    ///
    /// `retry_after` comes from the JSON body's `retry_after` (seconds, may
    /// be fractional) and falls back to the `Retry-After` header.
    #[must_use]
    pub fn from_response(headers: &HeaderMap, body: &str) -> Self {
        let parsed: Option<RateLimitBody> = serde_json::from_str(body).ok();

        let retry_after = parsed
            .as_ref()
            .and_then(|b| b.retry_after)
            .and_then(seconds)
            .or_else(|| {
                header_str(headers, RETRY_AFTER.as_str())
                    .and_then(|v| v.parse::<f64>().ok())
                    .and_then(seconds)
            });

        let global = parsed.as_ref().is_some_and(|b| b.global)
            || header_str(headers, GLOBAL_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Self {
            remaining: header_str(headers, REMAINING_HEADER).and_then(|v| v.parse().ok()),
            reset_after: header_str(headers, RESET_AFTER_HEADER)
                .and_then(|v| v.parse::<f64>().ok())
                .and_then(seconds),
            retry_after,
            global,
        }
    }
}

/// Tracks when each bucket may be used again.
///
/// Requests call [`acquire`](Self::acquire) before hitting the network; a
/// suspended bucket holds them back without affecting other buckets, while
/// a global suspension holds back everything.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Instant>>,
    global: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limiter with nothing suspended.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `bucket` becomes usable, if it is suspended now.
    ///
    /// Expired suspensions of `bucket` and the global one are forgotten.
    #[must_use]
    pub fn suspended_until(&self, bucket: &str) -> Option<Instant> {
        let now = Instant::now();
        let local = {
            let mut buckets = self.buckets.lock();
            match buckets.get(bucket).copied() {
                Some(until) if until <= now => {
                    buckets.remove(bucket);
                    None
                }
                local => local,
            }
        };
        let global = {
            let mut global = self.global.lock();
            if global.is_some_and(|until| until <= now) {
                *global = None;
            }
            *global
        };
        [local, global].into_iter().flatten().max()
    }

    /// Number of buckets with a suspension on record.
    #[must_use]
    pub fn tracked_buckets(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Wait until `bucket` may be used.
    ///
    /// Re-checks after every wait, since a suspension can be extended while
    /// a request sleeps.
    pub async fn acquire(&self, bucket: &str) {
        while let Some(until) = self.suspended_until(bucket) {
            let wait = until.saturating_duration_since(Instant::now());
            debug!(bucket, wait_ms = wait.as_millis() as u64, "waiting for rate limit");
            tokio::time::sleep_until(until).await;
        }
    }

    /// Hold back `bucket` for `delay`. An existing later suspension wins.
    pub fn suspend(&self, bucket: &str, delay: Duration) {
        self.prune();
        let until = Instant::now() + delay;
        let mut buckets = self.buckets.lock();
        let entry = buckets.entry(bucket.to_string()).or_insert(until);
        if *entry < until {
            *entry = until;
        }
        debug!(bucket, delay_ms = delay.as_millis() as u64, "bucket suspended");
    }

    /// Hold back every bucket for `delay`.
    pub fn suspend_global(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut global = self.global.lock();
        if global.is_none_or(|current| current < until) {
            *global = Some(until);
        }
        debug!(delay_ms = delay.as_millis() as u64, "global rate limit");
    }

    /// Apply the signals of a non-429 response: an exhausted window
    /// suspends the bucket until it resets.
    pub fn observe(&self, bucket: &str, info: &RateLimitInfo) {
        if info.remaining == Some(0) {
            if let Some(reset_after) = info.reset_after {
                self.suspend(bucket, reset_after);
            }
        }
    }

    /// Drop suspensions that have already expired.
    pub fn prune(&self) {
        let now = Instant::now();
        self.buckets.lock().retain(|_, until| *until > now);
        let mut global = self.global.lock();
        if global.is_some_and(|until| until <= now) {
            *global = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_retry_after_from_body() {
        let info = RateLimitInfo::from_response(
            &HeaderMap::new(),
            r#"{"message": "You are being rate limited.", "retry_after": 2.5, "global": false}"#,
        );
        assert_eq!(info.retry_after, Some(Duration::from_millis(2_500)));
        assert!(!info.global);
    }

    #[test]
    fn test_retry_after_header_fallback() {
        let info = RateLimitInfo::from_response(&headers(&[("retry-after", "2")]), "not json");
        assert_eq!(info.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_body_wins_over_header() {
        let info = RateLimitInfo::from_response(
            &headers(&[("retry-after", "9")]),
            r#"{"retry_after": 0.25}"#,
        );
        assert_eq!(info.retry_after, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_negative_retry_after_ignored() {
        let info = RateLimitInfo::from_response(&HeaderMap::new(), r#"{"retry_after": -1}"#);
        assert_eq!(info.retry_after, None);
    }

    #[test]
    fn test_window_headers_and_global() {
        let info = RateLimitInfo::from_response(
            &headers(&[
                ("x-ratelimit-remaining", "0"),
                ("x-ratelimit-reset-after", "1.5"),
                ("x-ratelimit-global", "true"),
            ]),
            "",
        );
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset_after, Some(Duration::from_millis(1_500)));
        assert!(info.global);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_bucket_waits_other_bucket_does_not() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.suspend("GET /channels/1/messages", Duration::from_secs(2));

        limiter.acquire("GET /channels/2/messages").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire("GET /channels/1/messages").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_holds_every_bucket() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.suspend_global(Duration::from_secs(1));

        limiter.acquire("POST /channels/9/messages").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(limiter.suspended_until("POST /channels/9/messages").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_suspension_does_not_shorten() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.suspend("b", Duration::from_secs(3));
        limiter.suspend("b", Duration::from_secs(1));

        limiter.acquire("b").await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_window_suspends_proactively() {
        let limiter = RateLimiter::new();
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_after: Some(Duration::from_millis(500)),
            ..RateLimitInfo::default()
        };
        limiter.observe("b", &info);
        assert!(limiter.suspended_until("b").is_some());

        limiter.observe("c", &RateLimitInfo { remaining: Some(3), ..info });
        assert!(limiter.suspended_until("c").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_buckets_are_forgotten() {
        let limiter = RateLimiter::new();
        for channel in 0..1_000 {
            limiter.suspend(&format!("GET /channels/{channel}/messages"), Duration::from_millis(1));
        }
        assert_eq!(limiter.tracked_buckets(), 1_000);
        tokio::time::sleep(Duration::from_secs(1)).await;

        limiter.acquire("GET /channels/0/messages").await;
        assert_eq!(limiter.tracked_buckets(), 999);

        limiter.suspend("GET /channels/5000/messages", Duration::from_secs(1));
        assert_eq!(limiter.tracked_buckets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_forgets_expired() {
        let limiter = RateLimiter::new();
        limiter.suspend("b", Duration::from_millis(10));
        limiter.suspend_global(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;

        limiter.prune();
        assert!(limiter.buckets.lock().is_empty());
        assert!(limiter.global.lock().is_none());
    }
}
