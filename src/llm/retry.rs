use rand::Rng;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * attempt`
    Linear,
    /// `base * 2^attempt + jitter`, jitter drawn from `[0, base)`
    Exponential,
}

impl BackoffStrategy {
    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "linear" => Some(Self::Linear),
            "exponential" | "exp" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Retry budget for one model call. `max_attempts` counts the first call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_wait: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
            strategy: BackoffStrategy::Linear,
        }
    }
}

impl RetryPolicy {
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before the call that follows failed `attempt` (1-based). A
    /// provider hint wins over the formula; both are capped by `max_wait`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let wait = hint.unwrap_or_else(|| self.fallback_delay(attempt));
        wait.min(self.max_wait)
    }

    pub fn fallback_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.strategy {
            BackoffStrategy::Linear => self.base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                let base_ms = self.base.as_millis() as u64;
                let jitter = if base_ms == 0 {
                    0
                } else {
                    rand::rng().random_range(0..base_ms)
                };
                self.base
                    .saturating_mul(factor)
                    .saturating_add(Duration::from_millis(jitter))
            }
        }
    }
}

/// Longest reset hint among the headers a provider may send with a 429.
pub fn reset_hint(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let mut hints = Vec::new();
    if let Some(ms) = header("retry-after-ms").and_then(|v| v.trim().parse::<f64>().ok()) {
        hints.extend(duration_from_secs(ms / 1000.0));
    }
    if let Some(secs) = header("retry-after").and_then(|v| v.trim().parse::<f64>().ok()) {
        hints.extend(duration_from_secs(secs));
    }
    for name in ["x-ratelimit-reset-requests", "x-ratelimit-reset-tokens"] {
        if let Some(value) = header(name).and_then(parse_reset_duration) {
            hints.push(value);
        }
    }
    hints.into_iter().max()
}

/// Parses the compact reset format used by rate-limit headers: `20ms`,
/// `1s`, `6m0s`, `1h2m3.5s`. A bare number is read as seconds.
pub fn parse_reset_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<f64>() {
        return duration_from_secs(secs);
    }

    let mut total = 0f64;
    let mut number = String::new();
    let mut chars = input.chars().peekable();
    let mut matched = false;
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let unit_secs = match ch {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        total += value * unit_secs;
        matched = true;
    }
    if !number.is_empty() || !matched {
        return None;
    }
    duration_from_secs(total)
}

/// `None` for negative, non-finite, or out-of-range values.
pub fn duration_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            strategy,
        }
    }

    #[test]
    fn linear_grows_with_attempt() {
        let p = policy(BackoffStrategy::Linear);
        assert_eq!(p.fallback_delay(1), Duration::from_secs(1));
        assert_eq!(p.fallback_delay(2), Duration::from_secs(2));
        assert_eq!(p.fallback_delay(3), Duration::from_secs(3));
    }

    #[test]
    fn exponential_is_non_decreasing_despite_jitter() {
        let p = policy(BackoffStrategy::Exponential);
        for _ in 0..50 {
            let waits: Vec<Duration> = (1..=4).map(|a| p.delay_for(a, None)).collect();
            assert!(waits.windows(2).all(|w| w[0] <= w[1]), "{waits:?}");
            assert!(waits[0] >= Duration::from_secs(2));
            assert!(waits[0] < Duration::from_secs(3));
        }
    }

    #[test]
    fn waits_are_capped() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(p.delay_for(10, None), Duration::from_secs(30));
        assert_eq!(
            p.delay_for(1, Some(Duration::from_secs(600))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn hint_takes_precedence() {
        let p = policy(BackoffStrategy::Linear);
        assert_eq!(
            p.delay_for(3, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn attempt_budget() {
        let p = policy(BackoffStrategy::Linear);
        assert!(p.allows_retry(4));
        assert!(!p.allows_retry(5));
    }

    #[test]
    fn parses_compact_reset_values() {
        assert_eq!(parse_reset_duration("20ms"), Some(Duration::from_millis(20)));
        assert_eq!(parse_reset_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_reset_duration("6m0s"), Some(Duration::from_secs(360)));
        assert_eq!(
            parse_reset_duration("1h2m3.5s"),
            Some(Duration::from_secs_f64(3723.5))
        );
        assert_eq!(parse_reset_duration("2.5"), Some(Duration::from_secs_f64(2.5)));
        assert_eq!(parse_reset_duration("soon"), None);
        assert_eq!(parse_reset_duration("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_reset_duration("3x"), None);
    }

    #[test]
    fn out_of_range_reset_values_are_ignored() {
        assert_eq!(parse_reset_duration("inf"), None);
        assert_eq!(parse_reset_duration("NaN"), None);
        assert_eq!(parse_reset_duration("1e30"), None);
        assert_eq!(parse_reset_duration("-4"), None);
        assert_eq!(parse_reset_duration("99999999999999999999999h"), None);

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1e30"));
        headers.insert("retry-after-ms", HeaderValue::from_static("inf"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("inf"));
        assert_eq!(reset_hint(&headers), None);

        headers.insert("x-ratelimit-reset-tokens", HeaderValue::from_static("3s"));
        assert_eq!(reset_hint(&headers), Some(Duration::from_secs(3)));
    }

    #[test]
    fn reset_hint_takes_longest_header() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset-tokens", HeaderValue::from_static("7s"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("120ms"));
        assert_eq!(reset_hint(&headers), Some(Duration::from_secs(7)));
        assert_eq!(reset_hint(&HeaderMap::new()), None);
    }
}
