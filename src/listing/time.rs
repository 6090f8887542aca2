//! Listing timestamp resolution
//!
//! Directory listings carry dates in three shapes, none of them
//! self-contained: the Unix form omits the year for recent entries, the
//! MSDOS form uses a two-digit year and a 12-hour clock, and only the
//! MultiNet form is fully absolute. [`TimeResolver`] turns any of them into
//! a UTC instant, given a reference "now" for the year inference.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use regex::Regex;

/// Resolves a protocol date token against a reference instant.
///
/// Regexes are compiled once at construction; the resolver is cheap to
/// share behind an `Arc`.
pub struct TimeResolver {
    unix_re: Regex,
    multinet_re: Regex,
    msdos_re: Regex,
    hhmm_re: Regex,
}

impl TimeResolver {
    pub fn new() -> Self {
        Self {
            // "Jan  5 10:00" or "Jan  5 2023"
            unix_re: Regex::new(r"^([A-Za-z]{3})\s+(\d{1,2})\s+([:\d]{2,5})$")
                .expect("valid regex"),
            // "15-MAR-2024 10:00[:30]"
            multinet_re: Regex::new(
                r"^(\d{1,2})-([A-Za-z]{3})-(\d{4})\s+(\d{2}):(\d{2})(:(\d{2}))?$",
            )
            .expect("valid regex"),
            // "03-15-24 02:30PM"
            msdos_re: Regex::new(r"^(\d{2})-(\d{2})-(\d{2})\s+(\d{2}):(\d{2})([AP]M)$")
                .expect("valid regex"),
            hhmm_re: Regex::new(r"^(\d{2}):(\d{2})$").expect("valid regex"),
        }
    }

    /// Resolve `token` to a UTC instant with zero sub-second precision.
    ///
    /// Returns `None` when the token matches no known shape or names an
    /// impossible date; the caller treats that as "line not recognized",
    /// never as an error.
    pub fn resolve(&self, token: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(caps) = self.unix_re.captures(token) {
            let month = month_number(&caps[1])?;
            let day: u32 = caps[2].parse().ok()?;
            let trailing = &caps[3];

            let (year, hour, minute) = if let Some(time) = self.hhmm_re.captures(trailing) {
                let hour: u32 = time[1].parse().ok()?;
                let minute: u32 = time[2].parse().ok()?;
                // No year in the listing: it is this year, unless the date
                // lies ahead of "now" in the calendar, in which case the
                // entry is from last year rather than the future.
                let year = if (month, day) > (reference.month(), reference.day()) {
                    reference.year() - 1
                } else {
                    reference.year()
                };
                (year, hour, minute)
            } else {
                // A 2-4 digit year instead of a time of day.
                let year: i32 = trailing.parse().ok()?;
                (year, 0, 0)
            };

            return Utc
                .with_ymd_and_hms(year, month, day, hour, minute, 0)
                .single();
        }

        if let Some(caps) = self.multinet_re.captures(token) {
            let day: u32 = caps[1].parse().ok()?;
            let month = month_number(&caps[2])?;
            let year: i32 = caps[3].parse().ok()?;
            let hour: u32 = caps[4].parse().ok()?;
            let minute: u32 = caps[5].parse().ok()?;
            let second: u32 = caps
                .get(7)
                .map(|s| s.as_str().parse().ok())
                .unwrap_or(Some(0))?;

            return Utc
                .with_ymd_and_hms(year, month, day, hour, minute, second)
                .single();
        }

        if let Some(caps) = self.msdos_re.captures(token) {
            let month: u32 = caps[1].parse().ok()?;
            let day: u32 = caps[2].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            let mut hour: u32 = caps[4].parse().ok()?;
            let minute: u32 = caps[5].parse().ok()?;

            // Classic two-digit-year windowing.
            let year = if year < 70 { year + 2000 } else { year + 1900 };

            // 12-hour clock: 12AM is hour 0, 12PM stays 12.
            if hour == 12 {
                hour = 0;
            }
            if &caps[6] == "PM" {
                hour += 12;
            }

            return Utc
                .with_ymd_and_hms(year, month, day, hour, minute, 0)
                .single();
        }

        None
    }
}

impl Default for TimeResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn month_number(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unix_year_inference_past_date() {
        let resolver = TimeResolver::new();
        let resolved = resolver.resolve("Jan  5 10:00", at(2024, 3, 1)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_unix_year_inference_future_date_is_last_year() {
        let resolver = TimeResolver::new();
        let resolved = resolver.resolve("Dec 20 10:00", at(2024, 3, 1)).unwrap();
        assert_eq!(
            resolved,
            Utc.with_ymd_and_hms(2023, 12, 20, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unix_same_day_is_this_year() {
        let resolver = TimeResolver::new();
        let resolved = resolver.resolve("Mar  1 08:15", at(2024, 3, 1)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap());
    }

    #[test]
    fn test_unix_explicit_year_zeroes_time() {
        let resolver = TimeResolver::new();
        let resolved = resolver.resolve("Jun 14 2019", at(2024, 3, 1)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2019, 6, 14, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_multinet() {
        let resolver = TimeResolver::new();
        let resolved = resolver
            .resolve("15-MAR-2024 10:20:30", at(2024, 6, 1))
            .unwrap();
        assert_eq!(
            resolved,
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 20, 30).unwrap()
        );

        // Missing seconds default to zero.
        let resolved = resolver.resolve("1-JAN-1999 23:59", at(2024, 6, 1)).unwrap();
        assert_eq!(
            resolved,
            Utc.with_ymd_and_hms(1999, 1, 1, 23, 59, 0).unwrap()
        );
    }

    #[test]
    fn test_msdos_windowing() {
        let resolver = TimeResolver::new();
        let resolved = resolver.resolve("03-15-24 02:30PM", at(2024, 6, 1)).unwrap();
        assert_eq!(
            resolved,
            Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()
        );

        let resolved = resolver.resolve("03-15-99 02:30AM", at(2024, 6, 1)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(1999, 3, 15, 2, 30, 0).unwrap());
    }

    #[test]
    fn test_msdos_noon_and_midnight() {
        let resolver = TimeResolver::new();
        let noon = resolver.resolve("01-02-20 12:00PM", at(2024, 6, 1)).unwrap();
        assert_eq!(noon, Utc.with_ymd_and_hms(2020, 1, 2, 12, 0, 0).unwrap());

        let midnight = resolver.resolve("01-02-20 12:00AM", at(2024, 6, 1)).unwrap();
        assert_eq!(midnight, Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_unrecognized_token() {
        let resolver = TimeResolver::new();
        assert!(resolver.resolve("yesterday", at(2024, 6, 1)).is_none());
        assert!(resolver.resolve("", at(2024, 6, 1)).is_none());
        // An impossible date is also "no match", not a panic.
        assert!(resolver.resolve("Feb 30 10:00", at(2024, 6, 1)).is_none());
    }
}
