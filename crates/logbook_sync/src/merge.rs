//! Per-record-type conflict resolvers.
//!
//! These run whenever two versions of a record must become one: on a push
//! precondition conflict, and when a pull brings down a remote record for a
//! key that already has local content. The same functions back the local
//! import flow.
//!
//! Design intent: a tracking log is append-mostly, so the resolvers lean on
//! set union - concurrent additions from two devices are never silently
//! dropped. The flat overlay is the one right-biased exception.
//!
//! Convergence for 3+-way conflict histories is not proven. The union
//! resolvers are order-independent; [`merge_flat`] is right-biased and
//! therefore order-dependent by design.

use serde_json::Value;

use crate::clock;
use crate::records::{DayRecord, DismissalMap, RecordKind, Roster, normalize_label};

/// Merge two versions of a day record.
///
/// The side with the higher `(revision, then updated_at)` becomes the base;
/// the other side's section entries and tags are folded in as deduplicated
/// unions. When the fold adds nothing the base is returned unchanged, so
/// re-merging an already-subsumed record is a no-op (this is what keeps two
/// devices from ping-ponging revision bumps forever). A genuine union gets a
/// revision strictly above both inputs.
pub fn merge_day(local: &DayRecord, remote: &DayRecord) -> DayRecord {
    let local_wins = match local.revision.cmp(&remote.revision) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            let l = local.updated_at.as_deref().unwrap_or("");
            let r = remote.updated_at.as_deref().unwrap_or("");
            clock::compare_lt(l, r) == std::cmp::Ordering::Greater
        }
    };
    let (base, other) = if local_wins {
        (local, remote)
    } else {
        (remote, local)
    };

    let mut merged = base.clone();
    let mut changed = false;

    for (name, section) in &other.sections {
        match merged.sections.get_mut(name) {
            Some(target) => {
                changed |= union_into(&mut target.entries, &section.entries);
                changed |= union_into(&mut target.tags, &section.tags);
                if section.revision > target.revision {
                    target.revision = section.revision;
                }
            }
            None => {
                merged.sections.insert(name.clone(), section.clone());
                changed = true;
            }
        }
    }

    if changed {
        merged.revision = local.revision.max(remote.revision) + 1;
    }
    merged
}

/// Merge two rosters by tracker identity.
///
/// Entries are unioned by id, keeping the first side's order and appending
/// ids only the second side knows. With `dedupe_labels` enabled, entries
/// whose normalized label was already seen are dropped (first seen wins), so
/// "Sleep" created independently on two devices does not show up twice.
pub fn merge_roster(a: &Roster, b: &Roster, dedupe_labels: bool) -> Roster {
    let mut merged = Roster::default();
    let mut seen_ids = std::collections::HashSet::new();
    let mut seen_labels = std::collections::HashSet::new();

    for entry in a.trackers.iter().chain(b.trackers.iter()) {
        if !seen_ids.insert(entry.id.clone()) {
            continue;
        }
        if dedupe_labels && !seen_labels.insert(normalize_label(&entry.label)) {
            continue;
        }
        merged.trackers.push(entry.clone());
    }
    merged
}

/// Merge two dismissal maps, keeping the most recent timestamp per leaf.
pub fn merge_dismissals(a: &DismissalMap, b: &DismissalMap) -> DismissalMap {
    let mut merged = a.clone();
    for (scope, keys) in b {
        let scope_slot = merged.entry(scope.clone()).or_default();
        for (key, rules) in keys {
            let key_slot = scope_slot.entry(key.clone()).or_default();
            for (rule, ts) in rules {
                let slot = key_slot.entry(rule.clone()).or_insert(*ts);
                if *ts > *slot {
                    *slot = *ts;
                }
            }
        }
    }
    merged
}

/// Shallow right-biased overlay for flat settings/metadata objects.
///
/// Remote (the right side) wins on key collision. Non-object inputs resolve
/// to the right side wholesale.
pub fn merge_flat(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged = l.clone();
            for (key, value) in r {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => remote.clone(),
    }
}

/// Resolve two JSON versions of a record by its kind.
///
/// A value that fails to parse as its routed shape falls back to the flat
/// overlay - a malformed record must not wedge the sync pass.
pub fn resolve_record(kind: RecordKind, local: &Value, remote: &Value) -> Value {
    match kind {
        RecordKind::Day => {
            match (
                serde_json::from_value::<DayRecord>(local.clone()),
                serde_json::from_value::<DayRecord>(remote.clone()),
            ) {
                (Ok(l), Ok(r)) => match serde_json::to_value(merge_day(&l, &r)) {
                    Ok(v) => v,
                    Err(_) => remote.clone(),
                },
                _ => {
                    log::warn!("day record did not parse; falling back to overlay merge");
                    merge_flat(local, remote)
                }
            }
        }
        RecordKind::Roster => {
            match (
                serde_json::from_value::<Roster>(local.clone()),
                serde_json::from_value::<Roster>(remote.clone()),
            ) {
                (Ok(l), Ok(r)) => match serde_json::to_value(merge_roster(&l, &r, true)) {
                    Ok(v) => v,
                    Err(_) => remote.clone(),
                },
                _ => {
                    log::warn!("roster did not parse; falling back to overlay merge");
                    merge_flat(local, remote)
                }
            }
        }
        RecordKind::Dismissals => {
            match (
                serde_json::from_value::<DismissalMap>(local.clone()),
                serde_json::from_value::<DismissalMap>(remote.clone()),
            ) {
                (Ok(l), Ok(r)) => match serde_json::to_value(merge_dismissals(&l, &r)) {
                    Ok(v) => v,
                    Err(_) => remote.clone(),
                },
                _ => {
                    log::warn!("dismissal map did not parse; falling back to overlay merge");
                    merge_flat(local, remote)
                }
            }
        }
        RecordKind::Flat => merge_flat(local, remote),
    }
}

fn union_into(target: &mut Vec<String>, additions: &[String]) -> bool {
    let mut changed = false;
    for item in additions {
        if !target.contains(item) {
            target.push(item.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DaySection, TrackerEntry};
    use serde_json::json;

    fn day(revision: u64, updated_at: &str, entries: &[&str]) -> DayRecord {
        let mut record = DayRecord {
            date: "2026-08-06".into(),
            revision,
            updated_at: Some(updated_at.into()),
            sections: Default::default(),
        };
        record.sections.insert(
            "sleep".into(),
            DaySection {
                revision,
                entries: entries.iter().map(|s| s.to_string()).collect(),
                tags: vec![],
            },
        );
        record
    }

    #[test]
    fn test_merge_day_unions_concurrent_entries() {
        let local = day(2, "100:0:a", &["7h"]);
        let remote = day(2, "100:0:b", &["8h"]);

        let merged = merge_day(&local, &remote);
        let entries = &merged.sections["sleep"].entries;
        assert!(entries.contains(&"7h".to_string()));
        assert!(entries.contains(&"8h".to_string()));
        assert!(merged.revision > 2);
    }

    #[test]
    fn test_merge_day_is_order_independent_on_content() {
        let local = day(1, "100:0:a", &["7h"]);
        let remote = day(3, "200:0:b", &["8h"]);

        let ab = merge_day(&local, &remote);
        let ba = merge_day(&remote, &local);
        let mut ab_entries = ab.sections["sleep"].entries.clone();
        let mut ba_entries = ba.sections["sleep"].entries.clone();
        ab_entries.sort();
        ba_entries.sort();
        assert_eq!(ab_entries, ba_entries);
        assert_eq!(ab.revision, ba.revision);
    }

    #[test]
    fn test_merge_day_subsumed_side_is_noop() {
        let subsumed = day(1, "100:0:a", &["7h"]);
        let superset = day(4, "200:0:b", &["7h", "8h"]);

        // Nothing to fold in: the base comes back unchanged, revision and
        // all. Without this, two devices would bump revisions at each other
        // forever.
        let merged = merge_day(&subsumed, &superset);
        assert_eq!(merged, superset);
    }

    #[test]
    fn test_merge_day_keeps_base_sections() {
        let mut local = day(5, "300:0:a", &["7h"]);
        local.sections.insert(
            "mood".into(),
            DaySection {
                revision: 1,
                entries: vec!["good".into()],
                tags: vec!["pm".into()],
            },
        );
        let remote = day(2, "100:0:b", &["6h"]);

        let merged = merge_day(&local, &remote);
        assert!(merged.sections.contains_key("mood"));
        assert!(
            merged.sections["sleep"]
                .entries
                .contains(&"6h".to_string())
        );
    }

    fn tracker(id: &str, label: &str) -> TrackerEntry {
        TrackerEntry {
            id: id.into(),
            label: label.into(),
            archived: false,
        }
    }

    #[test]
    fn test_merge_roster_unions_by_id() {
        let a = Roster {
            trackers: vec![tracker("1", "Sleep"), tracker("2", "Mood")],
        };
        let b = Roster {
            trackers: vec![tracker("2", "Mood"), tracker("3", "Steps")],
        };

        let merged = merge_roster(&a, &b, false);
        let ids: Vec<_> = merged.trackers.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_merge_roster_dedupes_normalized_labels() {
        let a = Roster {
            trackers: vec![tracker("1", "Sleep")],
        };
        let b = Roster {
            trackers: vec![tracker("9", "  sleep "), tracker("3", "Steps")],
        };

        let merged = merge_roster(&a, &b, true);
        let labels: Vec<_> = merged.trackers.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["Sleep", "Steps"]);

        // Never two entries with the same normalized label, even given
        // duplicate inputs on one side.
        let dup = Roster {
            trackers: vec![tracker("5", "Water"), tracker("6", "water")],
        };
        let merged = merge_roster(&dup, &dup, true);
        assert_eq!(merged.trackers.len(), 1);
    }

    #[test]
    fn test_merge_dismissals_keeps_newest_leaf() {
        let mut a = DismissalMap::new();
        a.entry("home".into())
            .or_default()
            .entry("day:2026-08-06".into())
            .or_default()
            .insert("missing-sleep".into(), 100);

        let mut b = DismissalMap::new();
        b.entry("home".into())
            .or_default()
            .entry("day:2026-08-06".into())
            .or_default()
            .insert("missing-sleep".into(), 200);
        b.entry("review".into())
            .or_default()
            .entry("roster".into())
            .or_default()
            .insert("unused-tracker".into(), 50);

        let merged = merge_dismissals(&a, &b);
        assert_eq!(merged["home"]["day:2026-08-06"]["missing-sleep"], 200);
        assert_eq!(merged["review"]["roster"]["unused-tracker"], 50);
    }

    #[test]
    fn test_merge_flat_right_bias() {
        let local = json!({"theme": "dark", "week_start": "mon"});
        let remote = json!({"theme": "light", "locale": "en"});

        let merged = merge_flat(&local, &remote);
        assert_eq!(merged["theme"], "light");
        assert_eq!(merged["week_start"], "mon");
        assert_eq!(merged["locale"], "en");
    }

    #[test]
    fn test_resolve_record_falls_back_on_malformed() {
        let local = json!({"date": "2026-08-06", "revision": 1});
        let remote = json!("not an object");

        // Malformed remote: overlay fallback resolves to the right side.
        let merged = resolve_record(RecordKind::Day, &local, &remote);
        assert_eq!(merged, remote);
    }
}
