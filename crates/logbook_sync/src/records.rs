//! The record shapes the sync subsystem knows how to merge.
//!
//! Only four shapes exist; each has a bespoke conflict resolver in
//! [`crate::merge`]. Everything else that travels through sync is treated as
//! a flat object.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which resolver applies to a record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A dated log record (`day:<date>`).
    Day,
    /// The tracker roster.
    Roster,
    /// The dismissed-hint map.
    Dismissals,
    /// Flat settings/metadata objects, and the fallback for unknown keys.
    Flat,
}

impl RecordKind {
    /// Route a record key to its resolver.
    pub fn for_key(key: &str) -> Self {
        if key.starts_with("day:") {
            RecordKind::Day
        } else {
            match key {
                "roster" => RecordKind::Roster,
                "dismissed" => RecordKind::Dismissals,
                _ => RecordKind::Flat,
            }
        }
    }
}

/// One named sub-section of a day's log.
///
/// Sections carry their own revision counter and array-valued fields, so
/// concurrent additions on two devices can be merged by union instead of
/// one side winning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySection {
    /// Section revision, bumped on every local edit.
    #[serde(default)]
    pub revision: u64,

    /// Logged entries, in insertion order.
    #[serde(default)]
    pub entries: Vec<String>,

    /// Tags attached to the section.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A single day's log record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    /// The day this record covers (`YYYY-MM-DD`).
    pub date: String,

    /// Record revision, bumped on every local edit and on every merge.
    #[serde(default)]
    pub revision: u64,

    /// Logical timestamp of the last edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    /// Named sub-sections, one per tracker logged that day.
    #[serde(default)]
    pub sections: IndexMap<String, DaySection>,
}

/// One tracker in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    /// Stable identity.
    pub id: String,

    /// Display label.
    pub label: String,

    /// Whether the tracker is hidden from daily logging.
    #[serde(default)]
    pub archived: bool,
}

/// The identity-keyed list of things the user tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    /// Trackers in display order.
    #[serde(default)]
    pub trackers: Vec<TrackerEntry>,
}

/// Dismissed-hint state: scope -> record key -> rule -> dismissal time
/// (unix ms).
pub type DismissalMap = HashMap<String, HashMap<String, HashMap<String, i64>>>;

/// Normalize a tracker label for duplicate detection.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}
