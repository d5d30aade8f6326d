//! Logical timestamps for causal ordering across devices.
//!
//! Wall-clock time alone cannot order edits made on different devices: clocks
//! skew, and a device can even observe its own clock moving backward. A
//! logical timestamp combines the wall clock with a counter and an actor id,
//! giving a total order that is robust to both.
//!
//! Rendered form: `"<ms>:<counter>:<actor>"`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A logical timestamp: wall-clock milliseconds, a tie-breaking counter, and
/// the issuing actor's id.
///
/// Ordering compares `ms`, then `counter`, then `actor` lexically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lt {
    /// Unix milliseconds at issue time (never regresses per actor)
    pub ms: u64,
    /// Counter distinguishing timestamps issued within the same millisecond
    pub counter: u32,
    /// Id of the issuing actor (device/instance)
    pub actor: String,
}

impl Lt {
    /// Create a timestamp from its parts.
    pub fn new(ms: u64, counter: u32, actor: impl Into<String>) -> Self {
        Self {
            ms,
            counter,
            actor: actor.into(),
        }
    }

    /// Parse a rendered timestamp, returning `None` for anything malformed.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let ms = parts.next()?.parse().ok()?;
        let counter = parts.next()?.parse().ok()?;
        let actor = parts.next()?;
        if actor.is_empty() {
            return None;
        }
        Some(Self::new(ms, counter, actor))
    }
}

impl fmt::Display for Lt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ms, self.counter, self.actor)
    }
}

impl FromStr for Lt {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lt::parse(s).ok_or(())
    }
}

impl Ord for Lt {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ms
            .cmp(&other.ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.actor.cmp(&other.actor))
    }
}

impl PartialOrd for Lt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two raw timestamp strings.
///
/// An unparsable value sorts lower than any valid one; two unparsable values
/// compare equal.
pub fn compare_lt(a: &str, b: &str) -> Ordering {
    match (Lt::parse(a), Lt::parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Whether `candidate` is strictly newer than `current`.
///
/// A missing `current` is treated as older than any valid candidate.
pub fn is_newer(candidate: &str, current: Option<&str>) -> bool {
    match current {
        Some(current) => compare_lt(candidate, current) == Ordering::Greater,
        None => Lt::parse(candidate).is_some(),
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Issues strictly increasing logical timestamps for one actor.
///
/// The clock remembers the last value it handed out, so repeated calls to
/// [`tick`](LogicalClock::tick) produce an increasing sequence even when the
/// wall clock stalls or moves backward.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    actor: String,
    last: Option<Lt>,
}

impl LogicalClock {
    /// Create a clock for `actor` with no issued history.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            last: None,
        }
    }

    /// Create a clock seeded with the last timestamp this actor is known to
    /// have issued (e.g. restored from persisted credentials).
    ///
    /// An unparsable seed is ignored.
    pub fn seeded(actor: impl Into<String>, last_lt: Option<&str>) -> Self {
        Self {
            actor: actor.into(),
            last: last_lt.and_then(Lt::parse),
        }
    }

    /// The actor this clock issues timestamps for.
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Issue the next timestamp.
    ///
    /// If `now_ms` has advanced past the last issued value, the counter
    /// resets; otherwise (same millisecond, or a regressed wall clock) the
    /// last millisecond value is kept and the counter increments.
    pub fn tick(&mut self, now_ms: u64) -> Lt {
        let next = match &self.last {
            Some(last) if now_ms <= last.ms => Lt::new(last.ms, last.counter + 1, &self.actor),
            _ => Lt::new(now_ms, 0, &self.actor),
        };
        self.last = Some(next.clone());
        next
    }
}
