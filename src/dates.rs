//! Module implement the date value used by certs.
//!
//! A [Date] is a count of milliseconds since the Unix epoch, interpreted
//! against the proleptic Gregorian calendar. The supported range runs
//! from 0001-01-01T00:00:00.000 through 292278993-12-31T23:59:59.999.
//! Conversion to and from broken-down time is done by hand, the standard
//! library caps out both on range and on sub-second resolution; only
//! formatting to local time delegates to [chrono].

use chrono::TimeZone;
use lazy_static::lazy_static;
use regex::Regex;

use std::{cmp, convert::TryFrom, fmt, result, str::FromStr, time};

use crate::{Error, Result};

// This is the date 292278994-01-01T00:00:00.000. That year overflows a
// signed 64-bit millisecond counter somewhere in August, so the last
// whole supported year is 292278993.
const LATEST_SUPPORTED: i64 = 9223372017129600000;

// This is the date 0001-01-01T00:00:00.000. There is no year zero in
// the Gregorian calendar.
const EARLIEST_SUPPORTED: i64 = -62135596800000;

const MIN: i64 = 60;
const HOUR: i64 = 60 * MIN;
const DAY: i64 = 24 * HOUR;

const DAYS_PER_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

lazy_static! {
    static ref ISO_8601: Regex = Regex::new(
        r"^(\d{1,9})-?(\d{2})-?(\d{2})[T ](\d{2}):?(\d{2}):?(\d{2})(\.\d{1,3})?(Z|[+-]\d{2}(:\d{2}|\d{2})?)?$"
    )
    .unwrap();
}

/// Broken-down time, always in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokenDown {
    pub year: i32, // anno Domini, i.e 1999
    pub month: u8, // 1 - 12
    pub day: u8,   // 1 - 31
    pub hour: u8,  // 0 - 23
    pub min: u8,   // 0 - 59
    pub sec: u8,   // 0 - 60, 60 admits a leap second
    pub msec: u16, // 0 - 999
}

/// Date as milliseconds since the Unix epoch, millisecond precision.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(i64);

impl Date {
    /// Construct from a raw millisecond count. Fail when outside the
    /// supported range.
    pub fn from_millis(ms: i64) -> Result<Date> {
        if !(EARLIEST_SUPPORTED..=LATEST_SUPPORTED).contains(&ms) {
            err_at!(UserError, msg: "date out of range {}", ms)?
        }
        Ok(Date(ms))
    }

    /// Current system time, truncated to millisecond precision.
    pub fn now() -> Result<Date> {
        let ms = match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
            Ok(d) => err_at!(FailConvert, i64::try_from(d.as_millis()))?,
            Err(err) => -err_at!(FailConvert, i64::try_from(err.duration().as_millis()))?,
        };
        Date::from_millis(ms)
    }

    pub fn to_millis(&self) -> i64 {
        self.0
    }

    /// Break the count down into its UTC calendar fields.
    pub fn to_broken_down(&self) -> BrokenDown {
        let (mut days, mut ms_in_day) = (self.0.div_euclid(DAY * 1000), self.0.rem_euclid(DAY * 1000));
        // shift epoch from 1970-01-01 to 0000-03-01 for era arithmetic.
        days += 719468;
        let era = days.div_euclid(146097);
        let doe = days.rem_euclid(146097); // [0, 146096]
        let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
        let year = yoe + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
        let mp = (5 * doy + 2) / 153; // [0, 11]
        let day = (doy - (153 * mp + 2) / 5 + 1) as u8; // [1, 31]
        let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8; // [1, 12]
        let year = if month <= 2 { year + 1 } else { year } as i32;

        let msec = (ms_in_day % 1000) as u16;
        ms_in_day /= 1000;
        let sec = (ms_in_day % 60) as u8;
        ms_in_day /= 60;
        let min = (ms_in_day % 60) as u8;
        let hour = (ms_in_day / 60) as u8;

        BrokenDown { year, month, day, hour, min, sec, msec }
    }

    fn from_broken_down(tb: &BrokenDown, tz_offset_secs: i64) -> Result<Date> {
        let (y, m, d) = (tb.year as i64, tb.month as i64, tb.day as i64);
        let y = if m <= 2 { y - 1 } else { y };
        let era = y.div_euclid(400);
        let yoe = y.rem_euclid(400);
        let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        let days = era * 146097 + doe - 719468;

        let secs = days * DAY
            + (tb.hour as i64) * HOUR
            + (tb.min as i64) * MIN
            + (tb.sec as i64)
            - tz_offset_secs;
        Date::from_millis(secs * 1000 + (tb.msec as i64))
    }

    /// Extended ISO-8601 form in UTC. Milliseconds are rendered only
    /// when non-zero.
    pub fn as_iso_8601_extended(&self) -> String {
        let tb = self.to_broken_down();
        let mut s = format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            tb.year, tb.month, tb.day, tb.hour, tb.min, tb.sec
        );
        if tb.msec != 0 {
            s.push_str(&format!(".{:03}", tb.msec));
        }
        s
    }

    /// Format in the host's local time zone with a strftime-style
    /// format string. Fail for dates outside chrono's range.
    pub fn as_formatted_localtime(&self, fmt: &str) -> Result<String> {
        let (secs, msec) = (self.0.div_euclid(1000), self.0.rem_euclid(1000));
        let nsec = (msec as u32) * 1_000_000;
        match chrono::Local.timestamp_opt(secs, nsec) {
            chrono::LocalResult::Single(dt) => Ok(dt.format(fmt).to_string()),
            _ => err_at!(UserError, msg: "date not representable in local time"),
        }
    }
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

impl FromStr for Date {
    type Err = Error;

    /// Parse an ISO-8601 date, `YYYY-MM-DDThh:mm:ss[.fff][±hh[:mm]|Z]`.
    /// A space is accepted in place of `T`. A date without a zone
    /// designator is interpreted as UTC.
    fn from_str(s: &str) -> Result<Date> {
        let caps = match ISO_8601.captures(s) {
            Some(caps) => caps,
            None => err_at!(UserError, msg: "unrecognized date {:?}", s)?,
        };

        let year: i64 = err_at!(FailConvert, caps[1].parse())?;
        let month: i64 = err_at!(FailConvert, caps[2].parse())?;
        let day: i64 = err_at!(FailConvert, caps[3].parse())?;
        let hour: i64 = err_at!(FailConvert, caps[4].parse())?;
        let min: i64 = err_at!(FailConvert, caps[5].parse())?;
        let sec: i64 = err_at!(FailConvert, caps[6].parse())?;

        if year < 1 {
            err_at!(UserError, msg: "date too early {:?}", s)?
        }
        if year > 292278993 {
            err_at!(UserError, msg: "date too late {:?}", s)?
        }
        if !(1..=12).contains(&month) {
            err_at!(UserError, msg: "month out of range in {:?}", s)?
        }
        let mdays = match month {
            2 if is_leap_year(year) => 29,
            m => DAYS_PER_MONTH[(m - 1) as usize] as i64,
        };
        if !(1..=mdays).contains(&day) {
            err_at!(UserError, msg: "day out of range in {:?}", s)?
        }
        if hour > 23 {
            err_at!(UserError, msg: "hour out of range in {:?}", s)?
        }
        if min > 59 {
            err_at!(UserError, msg: "minutes out of range in {:?}", s)?
        }
        // 60 admits a leap second, normalized into the next minute.
        if sec > 60 {
            err_at!(UserError, msg: "seconds out of range in {:?}", s)?
        }

        let msec: i64 = match caps.get(7) {
            Some(frac) => {
                let digits = &frac.as_str()[1..];
                let val: i64 = err_at!(FailConvert, digits.parse())?;
                val * 10_i64.pow(3 - (digits.len() as u32))
            }
            None => 0,
        };

        let tz_offset_secs: i64 = match caps.get(8) {
            None => 0,
            Some(m) if m.as_str() == "Z" => 0,
            Some(m) => {
                let t = m.as_str();
                let sign = if t.starts_with('-') { -1 } else { 1 };
                let hh: i64 = err_at!(FailConvert, t[1..3].parse())?;
                let mm: i64 = match caps.get(9) {
                    Some(m) => {
                        let v = m.as_str().trim_start_matches(':');
                        err_at!(FailConvert, v.parse())?
                    }
                    None => 0,
                };
                sign * (hh * HOUR + mm * MIN)
            }
        };

        let tb = BrokenDown {
            year: year as i32,
            month: month as u8,
            day: day as u8,
            hour: hour as u8,
            min: min as u8,
            sec: sec as u8,
            msec: msec as u16,
        };
        Date::from_broken_down(&tb, tz_offset_secs)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.as_iso_8601_extended())
    }
}

impl fmt::Debug for Date {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "Date({})", self.as_iso_8601_extended())
    }
}

impl PartialOrd for BrokenDown {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        let a = (self.year, self.month, self.day, self.hour, self.min, self.sec, self.msec);
        let b = (other.year, other.month, other.day, other.hour, other.min, other.sec, other.msec);
        a.partial_cmp(&b)
    }
}

#[cfg(test)]
#[path = "dates_test.rs"]
mod dates_test;
