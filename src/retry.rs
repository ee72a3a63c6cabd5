//! Retry hints and the retry policy.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::{
    decode::decode_error_envelope,
    transport::{HttpResponse, TransportError},
    Configuration, ParseError,
};

/// Header consulted on `429 Too Many Requests`.
pub const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";
/// Header consulted on `503 Service Unavailable`.
pub const RETRY_AFTER_HEADER: &str = "retry-after";
/// Wait used when a retry hint is missing or unreadable.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

type HintStrategy = fn(&str, DateTime<Utc>) -> Option<Duration>;

/// Tried in order; the first strategy that understands the value wins.
const HINT_STRATEGIES: [HintStrategy; 3] = [delay_seconds, http_date, legacy_http_date];

/// Date layouts servers still send besides IMF-fixdate: a `UTC` zone name,
/// RFC 850 and asctime. All of them are in UTC.
const LEGACY_DATE_FORMATS: [&str; 3] = [
    "%a, %d %b %Y %H:%M:%S UTC",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

fn delay_seconds(value: &str, _now: DateTime<Utc>) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_secs)
}

fn http_date(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some(until(at, now))
}

fn legacy_http_date(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    LEGACY_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| until(Utc.from_utc_datetime(&naive), now))
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Converts a retry header value into a wait duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryHintParser {
    fallback: Duration,
}

impl Default for RetryHintParser {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl RetryHintParser {
    pub fn new(fallback: Duration) -> Self {
        Self { fallback }
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    /// Parses relative to the current wall-clock time.
    pub fn parse(&self, value: Option<&str>) -> Duration {
        self.parse_at(value, Utc::now())
    }

    /// Integer seconds first, then an HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`,
    /// or its RFC 850 and asctime forms), then the fallback. Dates in the past
    /// yield zero.
    pub fn parse_at(&self, value: Option<&str>, now: DateTime<Utc>) -> Duration {
        value
            .map(str::trim)
            .and_then(|value| {
                HINT_STRATEGIES
                    .iter()
                    .find_map(|strategy| strategy(value, now))
            })
            .unwrap_or(self.fallback)
    }
}

/// Why an attempt did not succeed.
#[derive(Debug)]
pub enum AttemptFailure {
    /// The server answered with a 4xx or 5xx status.
    Status(HttpResponse),
    /// No response arrived.
    Transport(TransportError),
}

/// What to do after a failed attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Wait(Duration),
    Fail(ParseError),
}

/// Decides between retrying and failing for each failed attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_connection_attempts: u32,
    hints: RetryHintParser,
}

impl RetryPolicy {
    /// A ceiling of zero is treated as one: every execution gets its first attempt.
    pub fn new(max_connection_attempts: u32, hints: RetryHintParser) -> Self {
        Self {
            max_connection_attempts: max_connection_attempts.max(1),
            hints,
        }
    }

    pub fn from_configuration(configuration: &Configuration) -> Self {
        Self::new(
            configuration.max_connection_attempts,
            RetryHintParser::new(Duration::from_millis(configuration.default_retry_delay_ms)),
        )
    }

    pub fn max_connection_attempts(&self) -> u32 {
        self.max_connection_attempts
    }

    /// `attempt` is the number of the attempt that just failed, starting at 1.
    pub fn evaluate(&self, failure: AttemptFailure, attempt: u32) -> RetryDecision {
        self.evaluate_at(failure, attempt, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        failure: AttemptFailure,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let (delay, error) = match failure {
            AttemptFailure::Status(response) => {
                let hint_header = match response.status {
                    429 => RATE_LIMIT_RESET_HEADER,
                    503 => RETRY_AFTER_HEADER,
                    status => {
                        return RetryDecision::Fail(decode_error_envelope(status, &response.body))
                    }
                };
                let delay = self.hints.parse_at(response.header(hint_header), now);
                (delay, decode_error_envelope(response.status, &response.body))
            }
            AttemptFailure::Transport(err) => (self.hints.fallback(), ParseError::from(err)),
        };

        if attempt >= self.max_connection_attempts {
            return RetryDecision::Fail(error);
        }
        RetryDecision::Wait(delay)
    }
}
