use std::fmt;

use crate::unddit::record::{Record, is_removed};

/// Start of the archive provider's habit of re-syncing removals from the
/// live source (2021-08-01 UTC).
pub const DEFAULT_ARCHIVE_CUTOVER_UTC: i64 = 1_627_776_000;

/// Why a removed record has no archived text to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalNote {
    TooQuickToArchive,
    RemovedWithin(i64),
    MaybeRemovedFromArchive(i64),
}

impl fmt::Display for RemovalNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalNote::TooQuickToArchive => f.write_str("[removed too quickly to be archived]"),
            RemovalNote::RemovedWithin(secs) => {
                write!(f, "[removed within {}]", pretty_time_diff(*secs, false))
            }
            RemovalNote::MaybeRemovedFromArchive(secs) => write!(
                f,
                "[either removed too quickly, or removed(?) from archive after {}]",
                pretty_time_diff(*secs, false)
            ),
        }
    }
}

/// Note for a removed record whose archived body is itself a placeholder.
///
/// Records created before `cutover_utc` use whichever retrieval stamp is
/// present. Later records only trust `retrieved_utc`; a bare
/// `retrieved_on` may mean the archive rewrote its own copy.
pub fn removal_note(record: &Record, cutover_utc: i64) -> Option<RemovalNote> {
    if !record.removed || !is_removed(&record.body) {
        return None;
    }
    let created = record.created_utc;
    let Some(first_archived) = record.first_archived_utc().filter(|_| created > 0) else {
        return Some(RemovalNote::TooQuickToArchive);
    };
    if created < cutover_utc {
        return Some(RemovalNote::RemovedWithin(first_archived - created));
    }
    Some(match (record.retrieved_utc, record.retrieved_on) {
        (Some(retrieved), _) => RemovalNote::RemovedWithin(retrieved - created),
        (None, Some(retrieved)) => RemovalNote::MaybeRemovedFromArchive(retrieved - created),
        (None, None) => RemovalNote::TooQuickToArchive,
    })
}

/// Seconds as a short duration ("90 seconds", "3 hours"), rounded up unless
/// `round_down`.
pub fn pretty_time_diff(secs: i64, round_down: bool) -> String {
    if secs < 2 {
        return "1 second".to_string();
    }
    if secs < 120 {
        return format!("{secs} seconds");
    }
    let round = |n: i64, d: i64| {
        if round_down {
            n.div_euclid(d)
        } else {
            (n + d - 1).div_euclid(d)
        }
    };
    if secs < 7_200 {
        return format!("{} minutes", round(secs, 60));
    }
    if secs < 172_800 {
        return format!("{} hours", round(secs, 3_600));
    }
    let days = round(secs, 86_400);
    if days < 10 && round_down {
        let hours = round(secs - days * 86_400, 3_600);
        return format!("{days} days, {hours} hours");
    }
    format!("{days} days")
}

/// Age relative to `now` in the live source's own style.
pub fn pretty_age(created_utc: i64, now: i64) -> String {
    let secs = now - created_utc;
    let days = secs.div_euclid(86_400);
    if days < 0 {
        return String::new();
    }
    if days == 0 {
        return match secs {
            s if s < 10 => "just now".to_string(),
            s if s < 60 => format!("{s} seconds ago"),
            s if s < 120 => "a minute ago".to_string(),
            s if s < 3_600 => format!("{} minutes ago", s / 60),
            s if s < 7_200 => "an hour ago".to_string(),
            s => format!("{} hours ago", s / 3_600),
        };
    }
    match days {
        d if d < 7 => format!("{d} days ago"),
        d if d < 31 => format!("{} weeks ago", d / 7),
        d if d < 365 => format!("{} months ago", d / 30),
        d => format!("{} years ago", d / 365),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(created: i64, retrieved_utc: Option<i64>, retrieved_on: Option<i64>) -> Record {
        let mut record = Record::comment("a", "abc", "abc");
        record.body = "[removed]".to_string();
        record.removed = true;
        record.created_utc = created;
        record.retrieved_utc = retrieved_utc;
        record.retrieved_on = retrieved_on;
        record
    }

    #[test]
    fn no_note_when_archived_text_exists() {
        let mut record = removed(100, Some(130), None);
        record.body = "kept by the archive".to_string();
        assert_eq!(removal_note(&record, DEFAULT_ARCHIVE_CUTOVER_UTC), None);
    }

    #[test]
    fn missing_retrieval_stamps_mean_too_quick() {
        let record = removed(100, None, None);
        assert_eq!(
            removal_note(&record, DEFAULT_ARCHIVE_CUTOVER_UTC),
            Some(RemovalNote::TooQuickToArchive)
        );
    }

    #[test]
    fn before_cutover_either_stamp_counts() {
        let record = removed(1_000, None, Some(1_045));
        assert_eq!(
            removal_note(&record, DEFAULT_ARCHIVE_CUTOVER_UTC),
            Some(RemovalNote::RemovedWithin(45))
        );
    }

    #[test]
    fn after_cutover_retrieved_on_alone_is_ambiguous() {
        let created = DEFAULT_ARCHIVE_CUTOVER_UTC + 10;
        let record = removed(created, None, Some(created + 3_600));
        let note = removal_note(&record, DEFAULT_ARCHIVE_CUTOVER_UTC);
        assert_eq!(note, Some(RemovalNote::MaybeRemovedFromArchive(3_600)));

        let record = removed(created, Some(created + 30), Some(created + 3_600));
        assert_eq!(
            removal_note(&record, DEFAULT_ARCHIVE_CUTOVER_UTC),
            Some(RemovalNote::RemovedWithin(30))
        );
    }

    #[test]
    fn cutover_is_configurable() {
        let record = removed(500, None, Some(560));
        assert_eq!(removal_note(&record, 400), Some(RemovalNote::MaybeRemovedFromArchive(60)));
    }

    #[test]
    fn time_diff_rounds_up_by_default() {
        assert_eq!(pretty_time_diff(1, false), "1 second");
        assert_eq!(pretty_time_diff(45, false), "45 seconds");
        assert_eq!(pretty_time_diff(121, false), "3 minutes");
        assert_eq!(pretty_time_diff(121, true), "2 minutes");
        assert_eq!(pretty_time_diff(7_201, false), "3 hours");
        assert_eq!(pretty_time_diff(3 * 86_400 + 7_200, true), "3 days, 2 hours");
        assert_eq!(pretty_time_diff(20 * 86_400, false), "20 days");
    }

    #[test]
    fn note_renders_duration() {
        assert_eq!(RemovalNote::RemovedWithin(90).to_string(), "[removed within 90 seconds]");
    }

    #[test]
    fn age_buckets() {
        assert_eq!(pretty_age(100, 105), "just now");
        assert_eq!(pretty_age(0, 5_400), "an hour ago");
        assert_eq!(pretty_age(0, 3 * 86_400), "3 days ago");
        assert_eq!(pretty_age(0, 400 * 86_400), "1 years ago");
        assert_eq!(pretty_age(10, 0), "");
    }
}
