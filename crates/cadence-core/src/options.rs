//! Schedule options controlling when and how an entry may run

use chrono::{DateTime, TimeZone, Utc};

/// Far-future sentinel used by entries with no configured end date.
pub fn no_end_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap()
}

pub trait ScheduleOptions: Send + Sync {
    fn start_date(&self) -> DateTime<Utc>;

    /// Firings after this instant are silently skipped.
    fn end_date(&self) -> DateTime<Utc>;

    /// Stop scheduling this entry after a failed run.
    fn stop_on_failure(&self) -> bool;

    /// Let a new run start while the previous one is still going.
    fn allow_overlap(&self) -> bool;

    /// Re-run firings missed while the process was down. The core only
    /// carries the flag; its effect is up to the task body.
    fn rescue(&self) -> bool;
}

/// Options with a fixed activation window.
#[derive(Debug, Clone)]
pub struct DefaultOptions {
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    stop_on_failure: bool,
    allow_overlap: bool,
    rescue: bool,
}

impl DefaultOptions {
    pub fn new(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        stop_on_failure: bool,
        allow_overlap: bool,
        rescue: bool,
    ) -> Self {
        Self {
            start_date,
            end_date,
            stop_on_failure,
            allow_overlap,
            rescue,
        }
    }
}

impl ScheduleOptions for DefaultOptions {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }

    fn stop_on_failure(&self) -> bool {
        self.stop_on_failure
    }

    fn allow_overlap(&self) -> bool {
        self.allow_overlap
    }

    fn rescue(&self) -> bool {
        self.rescue
    }
}

/// Options for entries that are live from the moment they are registered:
/// the start date reads as "now" and the end date never arrives.
#[derive(Debug, Clone, Default)]
pub struct StartImmediately {
    stop_on_failure: bool,
    allow_overlap: bool,
    rescue: bool,
}

impl StartImmediately {
    pub fn new(stop_on_failure: bool, allow_overlap: bool, rescue: bool) -> Self {
        Self {
            stop_on_failure,
            allow_overlap,
            rescue,
        }
    }
}

impl ScheduleOptions for StartImmediately {
    fn start_date(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn end_date(&self) -> DateTime<Utc> {
        no_end_date()
    }

    fn stop_on_failure(&self) -> bool {
        self.stop_on_failure
    }

    fn allow_overlap(&self) -> bool {
        self.allow_overlap
    }

    fn rescue(&self) -> bool {
        self.rescue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_immediately_window() {
        let opts = StartImmediately::new(false, true, true);
        let before = Utc::now();
        assert!(opts.start_date() >= before);
        assert_eq!(opts.end_date(), no_end_date());
        assert!(opts.allow_overlap());
        assert!(opts.rescue());
        assert!(!opts.stop_on_failure());
    }

    #[test]
    fn fixed_window_round_trip() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let opts = DefaultOptions::new(start, end, true, false, false);
        assert_eq!(opts.start_date(), start);
        assert_eq!(opts.end_date(), end);
        assert!(opts.stop_on_failure());
        assert!(!opts.allow_overlap());
    }
}
