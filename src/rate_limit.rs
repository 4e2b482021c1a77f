use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, RETRY_AFTER};

const REMAINING_HEADERS: [&str; 3] = [
    "x-ratelimit-remaining",
    "ratelimit-remaining",
    "x-rate-limit-remaining",
];

/// Decides whether a response is throttled and how long to wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    default_wait: Duration,
    max_wait: Duration,
}

/// Result of inspecting one response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitAssessment {
    pub is_rate_limited: bool,
    pub wait: Duration,
}

impl RateLimitPolicy {
    pub fn new(default_wait: Duration, max_wait: Duration) -> Self {
        Self {
            default_wait: default_wait.min(max_wait),
            max_wait,
        }
    }

    /// A response is throttled on 429, or when a failed response reports an
    /// exhausted quota through a `*-ratelimit-remaining: 0` header.
    pub fn assess(&self, status: u16, headers: &HeaderMap) -> RateLimitAssessment {
        self.assess_at(status, headers, SystemTime::now())
    }

    pub(crate) fn assess_at(
        &self,
        status: u16,
        headers: &HeaderMap,
        now: SystemTime,
    ) -> RateLimitAssessment {
        let is_rate_limited =
            status == 429 || (status >= 400 && quota_exhausted(headers));
        if !is_rate_limited {
            return RateLimitAssessment {
                is_rate_limited,
                wait: Duration::ZERO,
            };
        }

        let wait = parse_retry_after(headers, now)
            .map(|hint| hint.min(self.max_wait))
            .unwrap_or(self.default_wait);
        RateLimitAssessment {
            is_rate_limited,
            wait,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

fn quota_exhausted(headers: &HeaderMap) -> bool {
    REMAINING_HEADERS.iter().any(|name| {
        headers
            .get(*name)
            .and_then(|raw| raw.to_str().ok())
            .is_some_and(|value| value.trim() == "0")
    })
}

/// Parses `Retry-After` as delay seconds (integer or decimal) or an HTTP-date.
///
/// A date in the past means no wait. A delay too large to represent saturates.
fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        return Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX));
    }

    let date = httpdate::parse_http_date(value).ok()?;
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    use super::RateLimitPolicy;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn status_429_uses_retry_after_hint() {
        let policy = RateLimitPolicy::default();
        let assessment = policy.assess(429, &headers(&[("retry-after", "3")]));
        assert!(assessment.is_rate_limited);
        assert_eq!(assessment.wait, Duration::from_secs(3));
    }

    #[test]
    fn fractional_hint_is_accepted() {
        let policy = RateLimitPolicy::default();
        let assessment = policy.assess(429, &headers(&[("retry-after", "0.5")]));
        assert_eq!(assessment.wait, Duration::from_millis(500));
    }

    #[test]
    fn missing_or_garbage_hint_falls_back_to_default() {
        let policy = RateLimitPolicy::new(Duration::from_millis(750), Duration::from_secs(10));
        assert_eq!(policy.assess(429, &HeaderMap::new()).wait, Duration::from_millis(750));
        assert_eq!(
            policy.assess(429, &headers(&[("retry-after", "soon")])).wait,
            Duration::from_millis(750)
        );
        assert_eq!(
            policy.assess(429, &headers(&[("retry-after", "-4")])).wait,
            Duration::from_millis(750)
        );
    }

    #[test]
    fn http_date_hint_waits_until_that_time() {
        let policy = RateLimitPolicy::new(Duration::from_millis(750), Duration::from_secs(60));
        let mut map = HeaderMap::new();
        map.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        let date = httpdate::parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();

        let now = date - Duration::from_secs(12);
        assert_eq!(policy.assess_at(429, &map, now).wait, Duration::from_secs(12));

        let now = date - Duration::from_secs(3_600);
        assert_eq!(policy.assess_at(429, &map, now).wait, Duration::from_secs(60));

        let now = date + Duration::from_secs(5);
        assert_eq!(policy.assess_at(429, &map, now).wait, Duration::ZERO);
    }

    #[test]
    fn oversized_decimal_hint_is_capped() {
        let policy = RateLimitPolicy::new(Duration::from_millis(750), Duration::from_secs(30));
        let assessment = policy.assess(429, &headers(&[("retry-after", "1e30")]));
        assert_eq!(assessment.wait, Duration::from_secs(30));
    }

    #[test]
    fn hint_is_capped() {
        let policy = RateLimitPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        let assessment = policy.assess(429, &headers(&[("retry-after", "86400")]));
        assert_eq!(assessment.wait, Duration::from_secs(30));
    }

    #[test]
    fn exhausted_quota_header_on_failure_is_rate_limited() {
        let policy = RateLimitPolicy::default();
        let map = headers(&[("x-ratelimit-remaining", "0")]);
        assert!(policy.assess(403, &map).is_rate_limited);
        assert!(!policy.assess(200, &map).is_rate_limited);
        assert!(!policy
            .assess(403, &headers(&[("x-ratelimit-remaining", "12")]))
            .is_rate_limited);
    }

    #[test]
    fn ordinary_errors_are_not_rate_limited() {
        let policy = RateLimitPolicy::default();
        let assessment = policy.assess(503, &headers(&[("retry-after", "5")]));
        assert!(!assessment.is_rate_limited);
        assert_eq!(assessment.wait, Duration::ZERO);
    }
}
