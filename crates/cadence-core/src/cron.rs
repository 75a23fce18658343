//! Cron expression parsing and next-fire computation
//!
//! Expressions are compiled into a [`SpecSchedule`]: one 64-bit mask per
//! field, where bit `k` set means value `k` fires. A high marker bit records
//! fields that were written as a wildcard, which drives the day-of-month vs
//! day-of-week matching rules.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Marks a field that was originally `*` or `?`.
///
/// A day candidate must satisfy both the day-of-month and day-of-week masks
/// when either of the two was a wildcard; when both are restricted, matching
/// either one is enough.
const STAR_BIT: u64 = 1 << 63;

/// Search horizon for [`SpecSchedule::next`]; schedules with no firing time
/// within this many years are unsatisfiable.
const YEAR_HORIZON: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("no cron expression provided")]
    Empty,
    #[error("expected exactly {expected} fields, found {found}: {expr}")]
    FieldCount {
        expected: usize,
        found: usize,
        expr: String,
    },
    #[error("expected {min} to {max} fields, found {found}: {expr}")]
    FieldCountRange {
        min: usize,
        max: usize,
        found: usize,
        expr: String,
    },
    #[error("too many hyphens: {0}")]
    TooManyHyphens(String),
    #[error("too many slashes: {0}")]
    TooManySlashes(String),
    #[error("beginning of range ({start}) below minimum ({min}): {expr}")]
    BelowMinimum { start: u32, min: u32, expr: String },
    #[error("end of range ({end}) above maximum ({max}): {expr}")]
    AboveMaximum { end: u32, max: u32, expr: String },
    #[error("beginning of range ({start}) beyond end of range ({end}): {expr}")]
    InvertedRange { start: u32, end: u32, expr: String },
    #[error("step of range must be a positive number: {0}")]
    ZeroStep(String),
    #[error("failed to parse int from {0}")]
    BadInt(String),
    #[error("negative number ({0}) not allowed")]
    Negative(i64),
    #[error("unrecognized symbolic name: {0}")]
    UnknownName(String),
    #[error("unrecognized descriptor: {0}")]
    UnknownDescriptor(String),
}

/// A schedule produces the next activation instant strictly after a given
/// instant. `None` means the schedule can never fire again.
pub trait Schedule: Send + Sync {
    fn next(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>>;
}

// ============================================================================
// Field bounds
// ============================================================================

struct Bounds {
    min: u32,
    max: u32,
    names: &'static [(&'static str, u32)],
}

const SECONDS: Bounds = Bounds {
    min: 0,
    max: 59,
    names: &[],
};
const MINUTES: Bounds = Bounds {
    min: 0,
    max: 59,
    names: &[],
};
const HOURS: Bounds = Bounds {
    min: 0,
    max: 23,
    names: &[],
};
const DOM: Bounds = Bounds {
    min: 1,
    max: 31,
    names: &[],
};
const MONTHS: Bounds = Bounds {
    min: 1,
    max: 12,
    names: &[
        ("jan", 1),
        ("feb", 2),
        ("mar", 3),
        ("apr", 4),
        ("may", 5),
        ("jun", 6),
        ("jul", 7),
        ("aug", 8),
        ("sep", 9),
        ("oct", 10),
        ("nov", 11),
        ("dec", 12),
    ],
};
const DOW: Bounds = Bounds {
    min: 0,
    max: 6,
    names: &[
        ("sun", 0),
        ("mon", 1),
        ("tue", 2),
        ("wed", 3),
        ("thu", 4),
        ("fri", 5),
        ("sat", 6),
    ],
};

// ============================================================================
// Parser
// ============================================================================

/// Which fields the parser accepts, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions(u32);

impl ParseOptions {
    pub const SECOND: Self = Self(1);
    pub const MINUTE: Self = Self(1 << 1);
    pub const HOUR: Self = Self(1 << 2);
    pub const DOM: Self = Self(1 << 3);
    pub const MONTH: Self = Self(1 << 4);
    pub const DOW: Self = Self(1 << 5);
    pub const DOW_OPTIONAL: Self = Self(1 << 6);
    pub const DESCRIPTOR: Self = Self(1 << 7);

    fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ParseOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ParseOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

const PLACES: [ParseOptions; 6] = [
    ParseOptions::SECOND,
    ParseOptions::MINUTE,
    ParseOptions::HOUR,
    ParseOptions::DOM,
    ParseOptions::MONTH,
    ParseOptions::DOW,
];

const DEFAULTS: [&str; 6] = ["0", "0", "0", "*", "*", "*"];

/// Compiles cron expressions into [`SpecSchedule`]s.
pub struct Parser {
    options: ParseOptions,
    optionals: usize,
}

impl Parser {
    pub fn new(mut options: ParseOptions) -> Self {
        let mut optionals = 0;
        if options.contains(ParseOptions::DOW_OPTIONAL) {
            options |= ParseOptions::DOW;
            optionals += 1;
        }
        Self { options, optionals }
    }

    pub fn parse(&self, expr: &str) -> Result<SpecSchedule, ScheduleError> {
        if expr.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if expr.starts_with('@') && self.options.contains(ParseOptions::DESCRIPTOR) {
            return parse_descriptor(expr);
        }

        let max = PLACES
            .iter()
            .filter(|place| self.options.contains(**place))
            .count();
        let min = max - self.optionals;

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let count = fields.len();
        if count < min || count > max {
            if min == max {
                return Err(ScheduleError::FieldCount {
                    expected: min,
                    found: count,
                    expr: expr.to_string(),
                });
            }
            return Err(ScheduleError::FieldCountRange {
                min,
                max,
                found: count,
                expr: expr.to_string(),
            });
        }

        let fields = expand_fields(&fields, self.options);

        Ok(SpecSchedule {
            second: get_field(fields[0], &SECONDS)?,
            minute: get_field(fields[1], &MINUTES)?,
            hour: get_field(fields[2], &HOURS)?,
            dom: get_field(fields[3], &DOM)?,
            month: get_field(fields[4], &MONTHS)?,
            dow: get_field(fields[5], &DOW)?,
        })
    }
}

/// Parse a full expression: `SEC MIN HOUR DOM MON [DOW]`, or a descriptor.
pub fn parse(expr: &str) -> Result<SpecSchedule, ScheduleError> {
    Parser::new(
        ParseOptions::SECOND
            | ParseOptions::MINUTE
            | ParseOptions::HOUR
            | ParseOptions::DOM
            | ParseOptions::MONTH
            | ParseOptions::DOW_OPTIONAL
            | ParseOptions::DESCRIPTOR,
    )
    .parse(expr)
}

/// Parse a standard 5-field crontab expression: `MIN HOUR DOM MON DOW`,
/// or a descriptor. The seconds field is pinned to 0.
pub fn parse_standard(expr: &str) -> Result<SpecSchedule, ScheduleError> {
    Parser::new(
        ParseOptions::MINUTE
            | ParseOptions::HOUR
            | ParseOptions::DOM
            | ParseOptions::MONTH
            | ParseOptions::DOW
            | ParseOptions::DESCRIPTOR,
    )
    .parse(expr)
}

/// Fill omitted fields with defaults, keeping provided fields aligned to the
/// places the parser was configured with.
fn expand_fields<'a>(fields: &[&'a str], options: ParseOptions) -> [&'a str; 6] {
    let mut expanded = DEFAULTS;
    let mut n = 0;
    for (i, place) in PLACES.iter().enumerate() {
        if options.contains(*place) && n < fields.len() {
            expanded[i] = fields[n];
            n += 1;
        }
    }
    expanded
}

/// A field is a comma-separated list of ranges.
fn get_field(field: &str, bounds: &Bounds) -> Result<u64, ScheduleError> {
    let mut bits = 0u64;
    for expr in field.split(',').filter(|s| !s.is_empty()) {
        bits |= get_range(expr, bounds)?;
    }
    Ok(bits)
}

/// One range: `number | number "-" number [ "/" number ]`, with `*`/`?`
/// standing in for the full span.
fn get_range(expr: &str, bounds: &Bounds) -> Result<u64, ScheduleError> {
    let range_and_step: Vec<&str> = expr.split('/').collect();
    let low_and_high: Vec<&str> = range_and_step[0].split('-').collect();
    let single_value = low_and_high.len() == 1;

    let mut extra = 0u64;
    let start;
    let mut end;
    if low_and_high[0] == "*" || low_and_high[0] == "?" {
        start = bounds.min;
        end = bounds.max;
        extra = STAR_BIT;
    } else {
        start = parse_int_or_name(low_and_high[0], bounds)?;
        match low_and_high.len() {
            1 => end = start,
            2 => end = parse_int_or_name(low_and_high[1], bounds)?,
            _ => return Err(ScheduleError::TooManyHyphens(expr.to_string())),
        }
    }

    let step = match range_and_step.len() {
        1 => 1,
        2 => {
            let step = parse_uint(range_and_step[1])?;
            // "N/step" means "N-max/step".
            if single_value {
                end = bounds.max;
            }
            step
        }
        _ => return Err(ScheduleError::TooManySlashes(expr.to_string())),
    };

    if start < bounds.min {
        return Err(ScheduleError::BelowMinimum {
            start,
            min: bounds.min,
            expr: expr.to_string(),
        });
    }
    if end > bounds.max {
        return Err(ScheduleError::AboveMaximum {
            end,
            max: bounds.max,
            expr: expr.to_string(),
        });
    }
    if start > end {
        return Err(ScheduleError::InvertedRange {
            start,
            end,
            expr: expr.to_string(),
        });
    }
    if step == 0 {
        return Err(ScheduleError::ZeroStep(expr.to_string()));
    }

    Ok(bit_range(start, end, step) | extra)
}

fn parse_int_or_name(expr: &str, bounds: &Bounds) -> Result<u32, ScheduleError> {
    if !bounds.names.is_empty() && !expr.chars().all(|c| c.is_ascii_digit()) {
        let lowered = expr.to_ascii_lowercase();
        return bounds
            .names
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, value)| *value)
            .ok_or_else(|| ScheduleError::UnknownName(expr.to_string()));
    }
    parse_uint(expr)
}

fn parse_uint(expr: &str) -> Result<u32, ScheduleError> {
    let num: i64 = expr
        .parse()
        .map_err(|_| ScheduleError::BadInt(expr.to_string()))?;
    if num < 0 {
        return Err(ScheduleError::Negative(num));
    }
    u32::try_from(num).map_err(|_| ScheduleError::BadInt(expr.to_string()))
}

/// All bits in `[min, max]`, modulo the step size.
fn bit_range(min: u32, max: u32, step: u32) -> u64 {
    if step == 1 {
        return (!0u64 << min) & (!0u64 >> (63 - max));
    }
    let mut bits = 0u64;
    let mut i = min;
    while i <= max {
        bits |= 1 << i;
        i += step;
    }
    bits
}

/// All bits within the bounds, plus the star bit.
fn all(bounds: &Bounds) -> u64 {
    bit_range(bounds.min, bounds.max, 1) | STAR_BIT
}

fn parse_descriptor(descriptor: &str) -> Result<SpecSchedule, ScheduleError> {
    match descriptor {
        "@yearly" | "@annually" => Ok(SpecSchedule {
            second: 1 << SECONDS.min,
            minute: 1 << MINUTES.min,
            hour: 1 << HOURS.min,
            dom: 1 << DOM.min,
            month: 1 << MONTHS.min,
            dow: all(&DOW),
        }),
        "@monthly" => Ok(SpecSchedule {
            second: 1 << SECONDS.min,
            minute: 1 << MINUTES.min,
            hour: 1 << HOURS.min,
            dom: 1 << DOM.min,
            month: all(&MONTHS),
            dow: all(&DOW),
        }),
        "@weekly" => Ok(SpecSchedule {
            second: 1 << SECONDS.min,
            minute: 1 << MINUTES.min,
            hour: 1 << HOURS.min,
            dom: all(&DOM),
            month: all(&MONTHS),
            dow: 1 << DOW.min,
        }),
        "@daily" | "@midnight" => Ok(SpecSchedule {
            second: 1 << SECONDS.min,
            minute: 1 << MINUTES.min,
            hour: 1 << HOURS.min,
            dom: all(&DOM),
            month: all(&MONTHS),
            dow: all(&DOW),
        }),
        "@hourly" => Ok(SpecSchedule {
            second: 1 << SECONDS.min,
            minute: 1 << MINUTES.min,
            hour: all(&HOURS),
            dom: all(&DOM),
            month: all(&MONTHS),
            dow: all(&DOW),
        }),
        _ => Err(ScheduleError::UnknownDescriptor(descriptor.to_string())),
    }
}

// ============================================================================
// SpecSchedule
// ============================================================================

/// A compiled cron expression: one firing mask per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSchedule {
    second: u64,
    minute: u64,
    hour: u64,
    dom: u64,
    month: u64,
    dow: u64,
}

impl SpecSchedule {
    /// Whether the day the instant falls on satisfies both day fields.
    ///
    /// When either field is a wildcard only the restricted one constrains;
    /// when both are restricted, matching either is enough.
    fn day_matches(&self, t: &DateTime<Tz>) -> bool {
        let dom_match = self.dom & (1u64 << t.day()) > 0;
        let dow_match = self.dow & (1u64 << t.weekday().num_days_from_sunday()) > 0;
        if self.dom & STAR_BIT > 0 || self.dow & STAR_BIT > 0 {
            dom_match && dow_match
        } else {
            dom_match || dow_match
        }
    }
}

impl Schedule for SpecSchedule {
    /// Least instant strictly after `after` with every field bit set.
    ///
    /// Advances field by field, month down to second; whenever a field is
    /// bumped, lower fields reset to their minimum. `None` when nothing
    /// matches within the horizon.
    fn next(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();

        // Round up to the next whole second.
        let mut t = after.with_nanosecond(0)? + Duration::seconds(1);

        // Set once a field has been bumped; lower fields then start from
        // their minimum instead of the current wall clock.
        let mut added = false;
        let year_limit = t.year() + YEAR_HORIZON;

        'wrap: loop {
            if t.year() > year_limit {
                return None;
            }

            while self.month & (1u64 << t.month()) == 0 {
                if !added {
                    added = true;
                    t = start_of_day(&tz, t.year(), t.month(), 1)?;
                }
                t = t.checked_add_months(Months::new(1))?;
                if t.month() == 1 {
                    continue 'wrap;
                }
            }

            while !self.day_matches(&t) {
                if !added {
                    added = true;
                    t = start_of_day(&tz, t.year(), t.month(), t.day())?;
                }
                t = t.checked_add_days(Days::new(1))?;
                if t.day() == 1 {
                    continue 'wrap;
                }
            }

            while self.hour & (1u64 << t.hour()) == 0 {
                if !added {
                    added = true;
                    t = t.with_minute(0)?.with_second(0)?;
                }
                t += Duration::hours(1);
                if t.hour() == 0 {
                    continue 'wrap;
                }
            }

            while self.minute & (1u64 << t.minute()) == 0 {
                if !added {
                    added = true;
                    t = t.with_second(0)?;
                }
                t += Duration::minutes(1);
                if t.minute() == 0 {
                    continue 'wrap;
                }
            }

            while self.second & (1u64 << t.second()) == 0 {
                added = true;
                t += Duration::seconds(1);
                if t.second() == 0 {
                    continue 'wrap;
                }
            }

            return Some(t);
        }
    }
}

/// Local midnight on the given date, taking the earlier instant when the
/// zone makes it ambiguous.
fn start_of_day(tz: &Tz, year: i32, month: u32, day: u32) -> Option<DateTime<Tz>> {
    chrono::NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
}

// ============================================================================
// Datetime parsing for schedule option dates
// ============================================================================

/// Parse a datetime in ISO 8601 or a couple of common naive layouts,
/// assuming UTC when no offset is given.
pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }

    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(anyhow::anyhow!(
        "invalid datetime format: '{}'. Use ISO 8601 (e.g. 2026-01-26T15:30:00Z)",
        s
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn next_of(expr: &str, after: DateTime<Tz>) -> DateTime<Tz> {
        parse(expr).unwrap().next(after).unwrap()
    }

    #[test]
    fn bitmask_roundtrip_per_field() {
        let s = parse("1,5,7 * * * * *").unwrap();
        assert_eq!(s.second, (1 << 1) | (1 << 5) | (1 << 7));

        let s = parse("0 0,30 * * * *").unwrap();
        assert_eq!(s.minute, 1 | (1 << 30));

        let s = parse("0 0 9-17 * * *").unwrap();
        assert_eq!(s.hour, bit_range(9, 17, 1));

        let s = parse("0 0 0 1,15 * *").unwrap();
        assert_eq!(s.dom, (1 << 1) | (1 << 15));

        let s = parse("0 0 0 * jan,jul *").unwrap();
        assert_eq!(s.month, (1 << 1) | (1 << 7));

        let s = parse("0 0 0 * * mon-fri").unwrap();
        assert_eq!(s.dow, bit_range(1, 5, 1));
    }

    #[test]
    fn step_expands_to_field_maximum() {
        let s = parse("0/15 * * * * *").unwrap();
        assert_eq!(s.second, (1 << 0) | (1 << 15) | (1 << 30) | (1 << 45));

        let s = parse("0 10-40/10 * * * *").unwrap();
        assert_eq!(s.minute, (1 << 10) | (1 << 20) | (1 << 30) | (1 << 40));
    }

    #[test]
    fn star_records_wildcard_marker() {
        let s = parse("* * * * * *").unwrap();
        assert!(s.second & STAR_BIT > 0);
        assert!(s.dom & STAR_BIT > 0);
        assert!(s.dow & STAR_BIT > 0);

        let s = parse("0 0 0 13 * *").unwrap();
        assert!(s.dom & STAR_BIT == 0);
        assert!(s.dow & STAR_BIT > 0);
    }

    #[test]
    fn optional_dow_field() {
        // Five fields with DOW omitted parse like six with a trailing `*`.
        let five = parse("0 30 8 1 1").unwrap();
        let six = parse("0 30 8 1 1 *").unwrap();
        assert_eq!(five, six);
    }

    #[test]
    fn standard_parser_pins_seconds() {
        let s = parse_standard("30 8 * * *").unwrap();
        assert_eq!(s.second, 1);
        assert_eq!(
            s.next(utc(2024, 3, 1, 0, 0, 0)).unwrap(),
            utc(2024, 3, 1, 8, 30, 0)
        );
    }

    #[test]
    fn field_count_validation() {
        assert!(matches!(
            parse("* * *"),
            Err(ScheduleError::FieldCountRange { .. })
        ));
        assert!(matches!(
            parse_standard("* * * *"),
            Err(ScheduleError::FieldCount { .. })
        ));
        assert!(matches!(parse(""), Err(ScheduleError::Empty)));
    }

    #[test]
    fn range_validation() {
        assert!(matches!(
            parse("0 0 0 32 * *"),
            Err(ScheduleError::AboveMaximum { end: 32, .. })
        ));
        assert!(matches!(
            parse("0 0 0 1 13 *"),
            Err(ScheduleError::AboveMaximum { end: 13, .. })
        ));
        assert!(matches!(
            parse("0 0 0 1 1 1/0"),
            Err(ScheduleError::ZeroStep(_))
        ));
        assert!(matches!(
            parse("5-2 * * * * *"),
            Err(ScheduleError::InvertedRange { start: 5, end: 2, .. })
        ));
        assert!(matches!(
            parse("1-2-3 * * * * *"),
            Err(ScheduleError::TooManyHyphens(_))
        ));
        assert!(matches!(
            parse("1/2/3 * * * * *"),
            Err(ScheduleError::TooManySlashes(_))
        ));
        assert!(matches!(
            parse("x * * * * *"),
            Err(ScheduleError::BadInt(_))
        ));
        assert!(matches!(
            parse("0 0 0 * * monx"),
            Err(ScheduleError::UnknownName(_))
        ));
        assert!(matches!(
            parse("0 0 0 * * 1/-2"),
            Err(ScheduleError::Negative(-2))
        ));
        assert!(matches!(
            parse("@fortnightly"),
            Err(ScheduleError::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn next_concrete_instants() {
        assert_eq!(
            next_of("0 30 * * * *", utc(2024, 1, 1, 0, 0, 0)),
            utc(2024, 1, 1, 0, 30, 0)
        );
        // Leap year: the day after Feb 28 2024 is Feb 29.
        assert_eq!(
            next_of("0 0 0 * * *", utc(2024, 2, 28, 12, 0, 0)),
            utc(2024, 2, 29, 0, 0, 0)
        );
        assert_eq!(
            next_of("@hourly", utc(2024, 1, 1, 0, 0, 1)),
            utc(2024, 1, 1, 1, 0, 0)
        );
    }

    #[test]
    fn next_is_strictly_after() {
        // An instant that already matches must advance to the next firing.
        assert_eq!(
            next_of("0 30 * * * *", utc(2024, 1, 1, 0, 30, 0)),
            utc(2024, 1, 1, 1, 30, 0)
        );
        assert_eq!(
            next_of("* * * * * *", utc(2024, 1, 1, 0, 0, 0)),
            utc(2024, 1, 1, 0, 0, 1)
        );
    }

    #[test]
    fn next_wraps_across_field_boundaries() {
        assert_eq!(
            next_of("0 0 0 1 * *", utc(2024, 12, 31, 23, 59, 59)),
            utc(2025, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            next_of("30 5 14 * * *", utc(2024, 6, 1, 14, 5, 31)),
            utc(2024, 6, 2, 14, 5, 30)
        );
        // Month by name range.
        assert_eq!(
            next_of("0 0 0 1 jan-mar *", utc(2024, 4, 1, 0, 0, 0)),
            utc(2025, 1, 1, 0, 0, 0)
        );
    }

    #[test]
    fn dom_dow_disjunction() {
        // Restricted DOM and DOW: fires on Fridays OR the 13th.
        // 2024-09-01 is a Sunday; the first Friday is the 6th.
        assert_eq!(
            next_of("0 0 0 13 * fri", utc(2024, 9, 1, 0, 0, 0)),
            utc(2024, 9, 6, 0, 0, 0)
        );
        // From the 12th the 13th (a Friday in September 2024) wins; from the
        // 14th the next Friday is the 20th.
        assert_eq!(
            next_of("0 0 0 13 * fri", utc(2024, 9, 12, 0, 0, 0)),
            utc(2024, 9, 13, 0, 0, 0)
        );
        assert_eq!(
            next_of("0 0 0 13 * fri", utc(2024, 9, 14, 0, 0, 0)),
            utc(2024, 9, 20, 0, 0, 0)
        );
        // Wildcard DOW: only the 13th fires.
        assert_eq!(
            next_of("0 0 0 13 * *", utc(2024, 9, 1, 0, 0, 0)),
            utc(2024, 9, 13, 0, 0, 0)
        );
        // Wildcard DOM: only Fridays fire.
        assert_eq!(
            next_of("0 0 0 * * fri", utc(2024, 9, 1, 0, 0, 0)),
            utc(2024, 9, 6, 0, 0, 0)
        );
    }

    #[test]
    fn unsatisfiable_schedule_returns_none() {
        // February 30th never exists.
        let s = parse("0 0 0 30 2 *").unwrap();
        assert!(s.next(utc(2024, 1, 1, 0, 0, 0)).is_none());
    }

    #[test]
    fn descriptors_match_explicit_expressions() {
        let pairs = [
            ("@yearly", "0 0 0 1 1 *"),
            ("@annually", "0 0 0 1 1 *"),
            ("@monthly", "0 0 0 1 * *"),
            ("@weekly", "0 0 0 * * 0"),
            ("@daily", "0 0 0 * * *"),
            ("@midnight", "0 0 0 * * *"),
            ("@hourly", "0 0 * * * *"),
        ];

        // Deterministic pseudo-random probe instants across three years.
        let mut seed: u64 = 0x5DEECE66D;
        let base = utc(2024, 1, 1, 0, 0, 0);
        for (descriptor, expr) in pairs {
            let d = parse(descriptor).unwrap();
            let e = parse(expr).unwrap();
            for _ in 0..1000 {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let t = base + Duration::seconds((seed % (86_400 * 365 * 3)) as i64);
                assert_eq!(d.next(t), e.next(t), "{descriptor} vs {expr} at {t}");
            }
        }
    }

    #[test]
    fn parse_datetime_layouts() {
        assert!(parse_datetime("2026-01-26T15:30:00Z").is_ok());
        assert!(parse_datetime("2026-01-26T15:30:00-06:00").is_ok());
        assert!(parse_datetime("2026-01-26T15:30:00").is_ok());
        assert!(parse_datetime("2026-01-26 15:30:00").is_ok());
        assert!(parse_datetime("2026-01-26").is_ok());
        assert!(parse_datetime("not a date").is_err());
    }
}
