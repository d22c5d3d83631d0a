use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::HeaderMap;

use crate::data::config::MAX_SAFE_TIMEOUT_MS;
use crate::data::{BackoffFn, RetryOptions};
use crate::error::Error;

pub const DEFAULT_LIMIT: u32 = 2;
pub const DEFAULT_METHODS: &[&str] = &["get", "put", "head", "delete", "options", "trace"];
pub const DEFAULT_STATUS_CODES: &[u16] = &[408, 413, 429, 500, 502, 503, 504];
pub const DEFAULT_AFTER_STATUS_CODES: &[u16] = &[413, 429, 503];

/// Headers carrying a server-directed delay, in lookup order.
const RETRY_AFTER_HEADERS: &[&str] = &[
    "retry-after",
    "ratelimit-reset",
    "x-ratelimit-reset",
    "x-rate-limit-reset",
];

/// Numeric delays at or above this many milliseconds (2024-01-01T00:00:00Z) are
/// absolute epoch times rather than relative seconds.
const EPOCH_THRESHOLD_MS: f64 = 1_704_067_200_000.0;

const BASE_BACKOFF: Duration = Duration::from_millis(300);

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then send again.
    Retry(Duration),
    /// Surface the error.
    Fail,
}

/// Normalized retry settings.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub limit: u32,
    /// Retry-eligible methods, compared case-insensitively.
    pub methods: Vec<String>,
    pub status_codes: Vec<u16>,
    /// Statuses for which a server delay header is honoured.
    pub after_status_codes: Vec<u16>,
    pub max_retry_after: Option<Duration>,
    pub backoff_limit: Option<Duration>,
    pub delay: BackoffFn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            methods: DEFAULT_METHODS.iter().map(|m| m.to_string()).collect(),
            status_codes: DEFAULT_STATUS_CODES.to_vec(),
            after_status_codes: DEFAULT_AFTER_STATUS_CODES.to_vec(),
            max_retry_after: None,
            backoff_limit: None,
            delay: Arc::new(default_backoff),
        }
    }
}

impl RetryPolicy {
    /// Fill unset fields with defaults. Set lists replace the default lists.
    pub fn from_options(options: RetryOptions) -> Self {
        let defaults = Self::default();
        Self {
            limit: options.limit.unwrap_or(defaults.limit),
            methods: options.methods.unwrap_or(defaults.methods),
            status_codes: options.status_codes.unwrap_or(defaults.status_codes),
            after_status_codes: options
                .after_status_codes
                .unwrap_or(defaults.after_status_codes),
            max_retry_after: options.max_retry_after,
            backoff_limit: options.backoff_limit,
            delay: options.delay.unwrap_or(defaults.delay),
        }
    }

    pub fn allows_method(&self, method: &http::Method) -> bool {
        self.methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method.as_str()))
    }

    /// Decide whether the `retry_count`-th retry (starting at 1) should happen after `error`.
    pub fn decide(&self, error: &Error, retry_count: u32, now: SystemTime) -> RetryDecision {
        if retry_count > self.limit {
            return RetryDecision::Fail;
        }
        if error.is_timeout() || error.is_config() || matches!(error, Error::Aborted) {
            return RetryDecision::Fail;
        }

        if let Error::Http(http) = error {
            let status = http.response.status().as_u16();
            if !self.status_codes.contains(&status) {
                return RetryDecision::Fail;
            }
            if self.after_status_codes.contains(&status) {
                if let Some(after) = retry_after(http.response.headers(), now) {
                    let after = match self.max_retry_after {
                        Some(max) => after.min(max),
                        None => after,
                    };
                    return RetryDecision::Retry(cap(after));
                }
            }
            if status == 413 {
                return RetryDecision::Fail;
            }
        }

        let delay = (self.delay)(retry_count);
        let delay = match self.backoff_limit {
            Some(limit) => delay.min(limit),
            None => delay,
        };
        RetryDecision::Retry(cap(delay))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("limit", &self.limit)
            .field("methods", &self.methods)
            .field("status_codes", &self.status_codes)
            .field("after_status_codes", &self.after_status_codes)
            .field("max_retry_after", &self.max_retry_after)
            .field("backoff_limit", &self.backoff_limit)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff: `300ms * 2^(retry_count - 1)`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pulith_http::core::default_backoff;
///
/// assert_eq!(default_backoff(1), Duration::from_millis(300));
/// assert_eq!(default_backoff(2), Duration::from_millis(600));
/// assert_eq!(default_backoff(3), Duration::from_millis(1200));
/// ```
pub fn default_backoff(retry_count: u32) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count.saturating_sub(1));
    BASE_BACKOFF.saturating_mul(multiplier)
}

/// Server-directed delay from the first present delay header.
///
/// Numeric values are seconds, or absolute epoch seconds once they pass the
/// 2024-01-01 threshold. Other values are parsed as HTTP dates. Past times
/// yield zero. Unparseable values yield `None`.
pub fn retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = RETRY_AFTER_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))?
        .to_str()
        .ok()?
        .trim();
    if value.is_empty() {
        return None;
    }

    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as f64)
        .unwrap_or_default();

    let after_ms = match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() => {
            let ms = seconds * 1000.0;
            if ms >= EPOCH_THRESHOLD_MS { ms - now_ms } else { ms }
        }
        Ok(_) => return None,
        Err(_) => {
            let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
            date.timestamp_millis() as f64 - now_ms
        }
    };

    Some(Duration::from_millis(after_ms.max(0.0) as u64))
}

fn cap(delay: Duration) -> Duration {
    delay.min(Duration::from_millis(MAX_SAFE_TIMEOUT_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Config, Options, Request, Response};
    use crate::effects::from_fn;
    use crate::error::{HttpError, TimeoutError};
    use http::{HeaderValue, Method, StatusCode};

    fn now() -> SystemTime {
        // 2025-01-01T00:00:00Z
        UNIX_EPOCH + Duration::from_secs(1_735_689_600)
    }

    fn request() -> Request {
        Request::new(Method::GET, "https://a.test/".parse().unwrap())
    }

    fn http_error(status: u16, headers: &[(&'static str, &'static str)]) -> Error {
        let mut response = Response::new(StatusCode::from_u16(status).unwrap());
        for &(name, value) in headers {
            response = response.with_header(
                http::HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        let options = Options::new().transport(from_fn(|_request| async {
            Ok(Response::new(StatusCode::OK))
        }));
        let (config, _) = Config::normalize(options).unwrap();
        HttpError::new(response, request(), Arc::new(config)).into()
    }

    #[test]
    fn test_default_backoff_exponential_growth() {
        let delays: Vec<Duration> = (1..6).map(default_backoff).collect();
        for i in 1..delays.len() {
            assert_eq!(delays[i], delays[i - 1] * 2);
        }
        assert_eq!(default_backoff(0), Duration::from_millis(300));
    }

    #[test]
    fn test_default_backoff_overflow_protection() {
        let delay = default_backoff(u32::MAX);
        assert!(delay >= Duration::from_millis(300));
    }

    #[test]
    fn test_limit_exceeded_fails() {
        let policy = RetryPolicy::default();
        let error = http_error(503, &[]);
        assert_eq!(
            policy.decide(&error, 2, now()),
            RetryDecision::Retry(Duration::from_millis(600))
        );
        assert_eq!(policy.decide(&error, 3, now()), RetryDecision::Fail);
    }

    #[test]
    fn test_timeout_and_abort_never_retry() {
        let policy = RetryPolicy::default();
        let timeout = Error::from(TimeoutError::new(request()));
        assert_eq!(policy.decide(&timeout, 1, now()), RetryDecision::Fail);
        assert_eq!(policy.decide(&Error::Aborted, 1, now()), RetryDecision::Fail);
        assert_eq!(
            policy.decide(&Error::MissingTransport, 1, now()),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_transport_error_uses_backoff() {
        let policy = RetryPolicy::default();
        let error = Error::Transport("connection reset".into());
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_status_not_retryable() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&http_error(404, &[]), 1, now()), RetryDecision::Fail);
    }

    #[test]
    fn test_413_without_header_fails() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&http_error(413, &[]), 1, now()), RetryDecision::Fail);
    }

    #[test]
    fn test_413_with_retry_after_retries() {
        let policy = RetryPolicy::default();
        let error = http_error(413, &[("retry-after", "2")]);
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_retry_after_seconds() {
        let policy = RetryPolicy::default();
        let error = http_error(503, &[("retry-after", "120")]);
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_millis(120_000))
        );
    }

    #[test]
    fn test_retry_after_ignored_for_other_statuses() {
        let policy = RetryPolicy::default();
        let error = http_error(500, &[("retry-after", "120")]);
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_retry_after_capped_by_max() {
        let policy = RetryPolicy::from_options(
            RetryOptions::new().max_retry_after(Duration::from_secs(1)),
        );
        let error = http_error(429, &[("retry-after", "120")]);
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers, now()), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_future_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 01 Jan 2025 00:00:30 GMT"),
        );
        assert_eq!(retry_after(&headers, now()), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_after_epoch_timestamp() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1735689605"));
        assert_eq!(retry_after(&headers, now()), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_retry_after_header_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("9"));
        headers.insert("ratelimit-reset", HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers, now()), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_retry_after_unparseable_falls_back() {
        let policy = RetryPolicy::default();
        let error = http_error(503, &[("retry-after", "soon")]);
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_backoff_limit_and_custom_delay() {
        let policy = RetryPolicy::from_options(
            RetryOptions::new()
                .delay(|n| Duration::from_secs(u64::from(n) * 10))
                .backoff_limit(Duration::from_secs(15)),
        );
        let error = Error::Transport("offline".into());
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_secs(10))
        );
        assert_eq!(
            policy.decide(&error, 2, now()),
            RetryDecision::Retry(Duration::from_secs(15))
        );
    }

    #[test]
    fn test_delay_capped_at_max_safe_timeout() {
        let policy =
            RetryPolicy::from_options(RetryOptions::new().delay(|_| Duration::from_secs(u64::MAX)));
        let error = Error::Transport("offline".into());
        assert_eq!(
            policy.decide(&error, 1, now()),
            RetryDecision::Retry(Duration::from_millis(MAX_SAFE_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_allows_method_case_insensitive() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_method(&Method::GET));
        assert!(policy.allows_method(&Method::OPTIONS));
        assert!(!policy.allows_method(&Method::POST));
    }
}
