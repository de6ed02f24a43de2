//! Dispatcher configuration loaded from environment variables.
//!
//! All settings have defaults so a dispatcher can be built with zero
//! configuration in tests and embedded use.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_shared::constants::{
    COMPLETED_RETENTION_DAYS, EVENT_CHANNEL_CAPACITY, SEGMENT_RETENTION_DAYS,
};

/// How many recipients must confirm before a message counts as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationQuorum {
    /// Every recipient the message was handed off to.
    All,
    /// Any single recipient.
    AtLeastOne,
}

impl ConfirmationQuorum {
    pub fn at_least_one(self) -> bool {
        matches!(self, Self::AtLeastOne)
    }
}

impl FromStr for ConfirmationQuorum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "at-least-one" | "at_least_one" | "any" => Ok(Self::AtLeastOne),
            other => Err(format!("unknown confirmation quorum: {other}")),
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Whether auto-resend messages go through datasync.
    /// Env: `COURIER_DATASYNC` (true/false)
    /// Default: `true`
    pub datasync: bool,

    /// Quorum applied to datasync acks seen on the receive path.
    /// Env: `COURIER_CONFIRMATION_QUORUM` (`all` | `at-least-one`)
    /// Default: `all`
    pub confirmation_quorum: ConfirmationQuorum,

    /// Incomplete segments older than this many days are pruned.
    /// Env: `COURIER_SEGMENT_RETENTION_DAYS`
    /// Default: `7`
    pub segment_retention_days: i64,

    /// Completed-reassembly tombstones older than this many days are pruned.
    /// Env: `COURIER_COMPLETED_RETENTION_DAYS`
    /// Default: `30`
    pub completed_retention_days: i64,

    /// Bound of each message-event subscription channel.
    /// Env: `COURIER_EVENT_CAPACITY`
    /// Default: `100`
    pub event_capacity: usize,

    /// Deadline for a single transport send. `None` waits indefinitely.
    /// Env: `COURIER_SEND_TIMEOUT_MS`
    /// Default: unset
    pub send_timeout: Option<Duration>,

    /// Deadline for a bundle advertisement triggered by an unknown device.
    /// Env: `COURIER_ADVERTISE_TIMEOUT_MS`
    /// Default: `1000`
    pub advertise_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            datasync: true,
            confirmation_quorum: ConfirmationQuorum::All,
            segment_retention_days: SEGMENT_RETENTION_DAYS,
            completed_retention_days: COMPLETED_RETENTION_DAYS,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            send_timeout: None,
            advertise_timeout: Duration::from_secs(1),
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COURIER_DATASYNC") {
            config.datasync = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("COURIER_CONFIRMATION_QUORUM") {
            match val.parse::<ConfirmationQuorum>() {
                Ok(quorum) => config.confirmation_quorum = quorum,
                Err(e) => {
                    tracing::warn!(
                        value = %val,
                        error = %e,
                        "Invalid COURIER_CONFIRMATION_QUORUM, using default"
                    );
                }
            }
        }

        if let Some(days) = parse_positive::<i64>("COURIER_SEGMENT_RETENTION_DAYS") {
            config.segment_retention_days = days;
        }

        if let Some(days) = parse_positive::<i64>("COURIER_COMPLETED_RETENTION_DAYS") {
            config.completed_retention_days = days;
        }

        if let Some(capacity) = parse_positive::<usize>("COURIER_EVENT_CAPACITY") {
            config.event_capacity = capacity;
        }

        if let Some(ms) = parse_positive::<u64>("COURIER_SEND_TIMEOUT_MS") {
            config.send_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(ms) = parse_positive::<u64>("COURIER_ADVERTISE_TIMEOUT_MS") {
            config.advertise_timeout = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

/// Read `name` as a strictly positive number. Unparsable or zero values are
/// reported and ignored.
fn parse_positive<T>(name: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let val = std::env::var(name).ok()?;
    match val.trim().parse::<T>() {
        Ok(n) if n > T::default() => Some(n),
        _ => {
            tracing::warn!(variable = name, value = %val, "Invalid value, using default");
            None
        }
    }
}
