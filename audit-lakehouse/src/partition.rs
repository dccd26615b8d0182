//! Partition keys for the columnar store
//!
//! An event's partition is `(year, month, day, actor)`, computed from `when`
//! and `who` alone:
//!
//! ```text
//! year=2021/month=4/day=1/user=bobby.beans/<id>.parquet
//! ```
//!
//! - Calendar components are taken in `Europe/London`, the zone the existing
//!   partitions were laid out in.
//! - Month and day are NOT zero-padded, matching the partition values already
//!   registered in the catalog.
//! - The actor keeps ASCII letters, digits and `. _ - @ +`; any other
//!   character becomes `_`. A missing or empty actor maps to
//!   [`UNKNOWN_ACTOR`].

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use crate::event::AuditEvent;

/// Zone partition dates are computed in
pub const PARTITION_ZONE: Tz = chrono_tz::Europe::London;

/// Actor segment used when the event has no `who`
pub const UNKNOWN_ACTOR: &str = "__HIVE_DEFAULT_PARTITION__";

/// Partition column names in path order
pub const PARTITION_COLUMNS: [&str; 4] = ["year", "month", "day", "user"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub actor: String,
}

impl PartitionKey {
    pub fn derive(when: DateTime<Utc>, who: Option<&str>) -> Self {
        let local = when.with_timezone(&PARTITION_ZONE);
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            actor: actor_segment(who),
        }
    }

    pub fn for_event(event: &AuditEvent) -> Self {
        Self::derive(event.when, event.who.as_deref())
    }

    /// `year=<Y>/month=<M>/day=<D>/user=<who>`
    pub fn prefix(&self) -> String {
        self.to_string()
    }

    /// Full object key for a record stored in this partition
    pub fn object_key(&self, id: &str, extension: &str) -> String {
        format!("{self}/{id}.{extension}")
    }

    /// Recover the partition from an object location or prefix
    ///
    /// Returns `None` unless the first four segments are
    /// `year=`, `month=`, `day=`, `user=` in that order.
    pub fn parse(location: &str) -> Option<Self> {
        let mut segments = location.trim_start_matches('/').split('/');
        let year = segment_value(segments.next()?, "year")?.parse().ok()?;
        let month = segment_value(segments.next()?, "month")?.parse().ok()?;
        let day = segment_value(segments.next()?, "day")?.parse().ok()?;
        let actor = segment_value(segments.next()?, "user")?;
        if actor.is_empty() {
            return None;
        }
        Some(Self {
            year,
            month,
            day,
            actor: actor.to_string(),
        })
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "year={}/month={}/day={}/user={}",
            self.year, self.month, self.day, self.actor
        )
    }
}

fn segment_value<'a>(segment: &'a str, name: &str) -> Option<&'a str> {
    segment.strip_prefix(name)?.strip_prefix('=')
}

fn actor_segment(who: Option<&str>) -> String {
    match who {
        Some(w) if !w.is_empty() => w
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+') {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
        _ => UNKNOWN_ACTOR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_derive_is_deterministic() {
        let when = DateTime::parse_from_rfc3339("2021-04-01T15:15:30Z")
            .unwrap()
            .with_timezone(&Utc);
        for _ in 0..3 {
            let key = PartitionKey::derive(when, Some("bobby.beans"));
            assert_eq!(key.year, 2021);
            assert_eq!(key.month, 4);
            assert_eq!(key.day, 1);
            assert_eq!(key.actor, "bobby.beans");
            assert_eq!(key.prefix(), "year=2021/month=4/day=1/user=bobby.beans");
        }
    }

    #[test]
    fn test_local_zone_rolls_the_day() {
        // 23:30 UTC in June is 00:30 BST the next day
        let key = PartitionKey::derive(at(2021, 6, 30, 23, 30), Some("a"));
        assert_eq!((key.year, key.month, key.day), (2021, 7, 1));

        // GMT in winter: UTC and local agree
        let key = PartitionKey::derive(at(2021, 12, 31, 23, 30), Some("a"));
        assert_eq!((key.year, key.month, key.day), (2021, 12, 31));
    }

    #[test]
    fn test_missing_actor_uses_placeholder() {
        let none = PartitionKey::derive(at(2021, 4, 1, 12, 0), None);
        let empty = PartitionKey::derive(at(2021, 4, 1, 12, 0), Some(""));
        assert_eq!(none.actor, UNKNOWN_ACTOR);
        assert_eq!(none, empty);
    }

    #[test]
    fn test_path_unsafe_actor_is_sanitized() {
        let key = PartitionKey::derive(at(2021, 4, 1, 12, 0), Some("../etc/pass wd"));
        assert_eq!(key.actor, ".._etc_pass_wd");
        assert_eq!(key.prefix().matches('/').count(), 3);
    }

    #[test]
    fn test_object_key_and_parse() {
        let key = PartitionKey::derive(at(2021, 4, 1, 12, 0), Some("bobby.beans"));
        let object = key.object_key("abc", "parquet");
        assert_eq!(object, "year=2021/month=4/day=1/user=bobby.beans/abc.parquet");
        assert_eq!(PartitionKey::parse(&object), Some(key));
    }

    #[test]
    fn test_parse_rejects_foreign_layout() {
        assert_eq!(PartitionKey::parse("results/abc.parquet"), None);
        assert_eq!(PartitionKey::parse("year=2021/month=x/day=1/user=a"), None);
        assert_eq!(PartitionKey::parse("year=2021/month=4/day=1"), None);
    }
}
