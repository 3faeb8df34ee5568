//! Per-day attendance deduplication.
//!
//! Each name is either not yet seen on the current day or already seen.
//! The in-memory set answers repeat sightings without touching the log;
//! the log itself remains the authority, so a restart mid-day never
//! produces a second row.

use crate::attendance::{AttendanceEvent, AttendanceLog, LogWriteError};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;

pub struct Deduplicator<L> {
    log: L,
    day: NaiveDate,
    seen: HashSet<String>,
}

impl<L: AttendanceLog> Deduplicator<L> {
    /// Start a session on `today` with nothing seen yet.
    pub fn new(log: L, today: NaiveDate) -> Self {
        Self { log, day: today, seen: HashSet::new() }
    }

    /// Whether a sighting of `name` on `today` could still be novel.
    pub fn should_record(&self, name: &str, today: NaiveDate) -> bool {
        today != self.day || !self.seen.contains(name)
    }

    /// Mark `name` as seen on `today`.
    pub fn record(&mut self, name: &str, today: NaiveDate) {
        self.roll_over(today);
        self.seen.insert(name.to_string());
    }

    /// Start a fresh day if `today` differs from the tracked one. Returns
    /// whether the seen set was cleared.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        tracing::info!(
            previous = %self.day,
            today = %today,
            carried = self.seen.len(),
            "day changed, clearing seen set"
        );
        self.day = today;
        self.seen.clear();
        true
    }

    /// Handle one recognised sighting.
    ///
    /// Returns the event when this sighting is the first for the day. On a
    /// log failure nothing is marked, so the next sighting retries.
    pub fn observe(&mut self, name: &str, now: NaiveDateTime) -> Result<Option<AttendanceEvent>, LogWriteError> {
        let today = now.date();
        if !self.should_record(name, today) {
            return Ok(None);
        }

        let event = AttendanceEvent::at(name, now);
        let written = self.log.record_if_absent(&event)?;
        self.record(name, today);

        if written {
            tracing::info!(name, date = %event.date, time = %event.time, "attendance recorded");
            Ok(Some(event))
        } else {
            tracing::debug!(name, date = %event.date, "attendance already in log");
            Ok(None)
        }
    }

    /// The day the seen set refers to.
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn seen(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }

    pub fn log(&self) -> &L {
        &self.log
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attendance::CsvAttendanceLog;

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    pub(crate) fn moment(d: u32, h: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, 0, 0).unwrap()
    }

    /// Fails the first `failures` writes, then behaves like a set of rows.
    #[derive(Default)]
    pub(crate) struct FlakyLog {
        pub failures: usize,
        pub rows: Vec<AttendanceEvent>,
        pub writes: usize,
    }

    impl AttendanceLog for FlakyLog {
        fn record_if_absent(&mut self, event: &AttendanceEvent) -> Result<bool, LogWriteError> {
            self.writes += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(LogWriteError::Io {
                    path: "flaky.csv".into(),
                    source: std::io::Error::other("disk unplugged"),
                });
            }
            if self.rows.iter().any(|r| r.name == event.name && r.date == event.date) {
                return Ok(false);
            }
            self.rows.push(event.clone());
            Ok(true)
        }

        fn entries(&self) -> Result<Vec<AttendanceEvent>, LogWriteError> {
            Ok(self.rows.clone())
        }
    }

    #[test]
    fn test_record_then_should_record_is_false() {
        let mut dedup = Deduplicator::new(FlakyLog::default(), day(7));
        assert!(dedup.should_record("alice", day(7)));
        dedup.record("alice", day(7));
        assert!(!dedup.should_record("alice", day(7)));
        assert!(dedup.should_record("bob", day(7)));
    }

    #[test]
    fn test_repeat_sightings_emit_once() {
        let mut dedup = Deduplicator::new(FlakyLog::default(), day(7));
        assert!(dedup.observe("alice", moment(7, 9)).unwrap().is_some());
        assert!(dedup.observe("alice", moment(7, 10)).unwrap().is_none());
        assert!(dedup.observe("alice", moment(7, 11)).unwrap().is_none());
        // Only the first sighting reached the log
        assert_eq!(dedup.log().writes, 1);
        assert_eq!(dedup.log().rows.len(), 1);
    }

    #[test]
    fn test_new_day_is_novel_again() {
        let mut dedup = Deduplicator::new(FlakyLog::default(), day(7));
        dedup.observe("alice", moment(7, 23)).unwrap();
        assert!(dedup.should_record("alice", day(8)));

        let event = dedup.observe("alice", moment(8, 0)).unwrap().unwrap();
        assert_eq!(event.date, "2024-03-08");
        assert_eq!(dedup.day(), day(8));
        assert_eq!(dedup.log().rows.len(), 2);
    }

    #[test]
    fn test_roll_over_clears_only_on_change() {
        let mut dedup = Deduplicator::new(FlakyLog::default(), day(7));
        dedup.record("alice", day(7));
        assert!(!dedup.roll_over(day(7)));
        assert_eq!(dedup.seen().count(), 1);
        assert!(dedup.roll_over(day(8)));
        assert_eq!(dedup.seen().count(), 0);
    }

    #[test]
    fn test_log_failure_leaves_name_unseen() {
        let log = FlakyLog { failures: 1, ..Default::default() };
        let mut dedup = Deduplicator::new(log, day(7));

        assert!(dedup.observe("alice", moment(7, 9)).is_err());
        assert!(dedup.should_record("alice", day(7)));

        // retry on the next sighting succeeds
        assert!(dedup.observe("alice", moment(7, 9)).unwrap().is_some());
        assert!(!dedup.should_record("alice", day(7)));
    }

    #[test]
    fn test_row_from_previous_process_suppresses_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Date,Time\nalice,2024-03-07,08:00:00\n").unwrap();

        let mut dedup = Deduplicator::new(CsvAttendanceLog::new(&path), day(7));
        assert!(dedup.observe("alice", moment(7, 9)).unwrap().is_none());
        // marked seen, so no further log reads for alice today
        assert!(!dedup.should_record("alice", day(7)));
        assert_eq!(dedup.log().entries().unwrap().len(), 1);
    }
}
