use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// How the action queue of a working memory is drained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerMode {
    /// Whichever thread calls `flush` becomes the consumer for that drain.
    #[default]
    Passive,
    /// A dedicated worker task drains the queue whenever it is woken.
    Worker,
}

impl fmt::Display for ConsumerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerMode::Passive => write!(f, "passive"),
            ConsumerMode::Worker => write!(f, "worker"),
        }
    }
}

impl std::str::FromStr for ConsumerMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passive" => Ok(ConsumerMode::Passive),
            "worker" => Ok(ConsumerMode::Worker),
            _ => Err(format!("Unknown consumer mode: {}", s)),
        }
    }
}

/// Which clock backs the timer service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockType {
    /// Wall clock; jobs fire on their own.
    #[default]
    Realtime,
    /// Manually advanced clock; jobs fire when time is advanced past them.
    Pseudo,
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockType::Realtime => write!(f, "realtime"),
            ClockType::Pseudo => write!(f, "pseudo"),
        }
    }
}

impl std::str::FromStr for ClockType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realtime" => Ok(ClockType::Realtime),
            "pseudo" => Ok(ClockType::Pseudo),
            _ => Err(format!("Unknown clock type: {}", s)),
        }
    }
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Unique identifier for a fact handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub Uuid);

impl FactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a scheduled timer job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a propagation target (a type node in the match network).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Engine time in milliseconds since the Unix epoch.
///
/// `Timestamp::MAX` stands for "never": a deadline that no clock reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }

    pub fn is_max(&self) -> bool {
        self.0 == i64::MAX
    }

    /// Add `offset_ms`, saturating to `Timestamp::MAX`.
    ///
    /// An overflowing or negative sum both saturate: a wrapped value would
    /// otherwise look like a deadline far in the past.
    pub fn saturating_offset(self, offset_ms: i64) -> Timestamp {
        match self.0.checked_add(offset_ms) {
            Some(sum) if sum >= 0 => Timestamp(sum),
            _ => Timestamp::MAX,
        }
    }

    /// Milliseconds from `self` until `later`, zero if `later` is not after `self`.
    pub fn millis_until(&self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0).max(0) as u64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "never")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}
