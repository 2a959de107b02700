use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConcurrencyLimit;
use crate::ConfigError;
use crate::FixedWindow;
use crate::MAX_SEGMENTS_PER_WINDOW;
use crate::Policy;
use crate::QueueOrder;
use crate::SlidingWindow;
use crate::TokenBucket;

/// Parameters for one named policy, as read from configuration.
///
/// The `kind` tag selects the algorithm:
///
/// ```yaml
/// kind: sliding_window
/// permit_limit: 2
/// window: 10s
/// segments_per_window: 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    FixedWindow {
        permit_limit: usize,
        #[serde(with = "duration_format")]
        window: Duration,
        #[serde(default)]
        queue_limit: usize,
        #[serde(default)]
        queue_order: QueueOrder,
    },
    SlidingWindow {
        permit_limit: usize,
        #[serde(with = "duration_format")]
        window: Duration,
        segments_per_window: usize,
        #[serde(default)]
        queue_limit: usize,
        #[serde(default)]
        queue_order: QueueOrder,
    },
    TokenBucket {
        token_limit: usize,
        tokens_per_period: usize,
        #[serde(with = "duration_format")]
        replenishment_period: Duration,
    },
    Concurrency {
        permit_limit: usize,
    },
}

fn non_zero(policy: &str, field: &str, value: usize) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(value)
        .ok_or_else(|| ConfigError::invalid(policy, format!("{field} must be greater than zero")))
}

fn positive(policy: &str, field: &str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::invalid(
            policy,
            format!("{field} must be longer than zero"),
        ))
    } else {
        Ok(value)
    }
}

fn segments(policy: &str, value: usize, window: Duration) -> Result<NonZeroUsize, ConfigError> {
    let segments = non_zero(policy, "segments_per_window", value)?;
    if value > MAX_SEGMENTS_PER_WINDOW {
        return Err(ConfigError::invalid(
            policy,
            format!("segments_per_window must be at most {MAX_SEGMENTS_PER_WINDOW}"),
        ));
    }
    if window.as_nanos() < value as u128 {
        return Err(ConfigError::invalid(
            policy,
            "segments_per_window must not exceed the window length in nanoseconds",
        ));
    }
    Ok(segments)
}

impl PolicyConfig {
    /// Checks every parameter without building anything.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match *self {
            PolicyConfig::FixedWindow {
                permit_limit,
                window,
                ..
            } => {
                non_zero(name, "permit_limit", permit_limit)?;
                positive(name, "window", window)?;
            }
            PolicyConfig::SlidingWindow {
                permit_limit,
                window,
                segments_per_window,
                ..
            } => {
                non_zero(name, "permit_limit", permit_limit)?;
                segments(name, segments_per_window, positive(name, "window", window)?)?;
            }
            PolicyConfig::TokenBucket {
                token_limit,
                tokens_per_period,
                replenishment_period,
            } => {
                non_zero(name, "token_limit", token_limit)?;
                non_zero(name, "tokens_per_period", tokens_per_period)?;
                positive(name, "replenishment_period", replenishment_period)?;
            }
            PolicyConfig::Concurrency { permit_limit } => {
                non_zero(name, "permit_limit", permit_limit)?;
            }
        }
        Ok(())
    }

    /// Builds the policy named `name` with fresh counters.
    pub fn build(&self, name: &str) -> Result<Policy, ConfigError> {
        let policy = match *self {
            PolicyConfig::FixedWindow {
                permit_limit,
                window,
                queue_limit,
                queue_order,
            } => FixedWindow::new(
                non_zero(name, "permit_limit", permit_limit)?,
                positive(name, "window", window)?,
            )
            .with_queue(queue_limit, queue_order)
            .into(),
            PolicyConfig::SlidingWindow {
                permit_limit,
                window,
                segments_per_window,
                queue_limit,
                queue_order,
            } => {
                let window = positive(name, "window", window)?;
                SlidingWindow::new(
                    non_zero(name, "permit_limit", permit_limit)?,
                    window,
                    segments(name, segments_per_window, window)?,
                )
                .with_queue(queue_limit, queue_order)
                .into()
            }
            PolicyConfig::TokenBucket {
                token_limit,
                tokens_per_period,
                replenishment_period,
            } => TokenBucket::new(
                non_zero(name, "token_limit", token_limit)?,
                non_zero(name, "tokens_per_period", tokens_per_period)?.get(),
                positive(name, "replenishment_period", replenishment_period)?,
            )
            .into(),
            PolicyConfig::Concurrency { permit_limit } => {
                ConcurrencyLimit::new(non_zero(name, "permit_limit", permit_limit)?).into()
            }
        };
        Ok(policy)
    }
}

/// Serde helpers for human readable durations such as `10s` or `250ms`.
pub mod duration_format {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use serde::de::Error;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}
