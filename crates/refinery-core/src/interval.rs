//! Bar interval grammar.
//!
//! The enabled interval set is configuration, not hard-coded (see open questions):
//! any duration expressible as `<count><unit>` with unit in `{s, m, h, d}` parses.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bar aggregation interval, e.g. `1m`, `5m`, `1h`, `1d`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Interval {
    seconds: u64,
}

impl Interval {
    /// One minute.
    pub const ONE_MINUTE: Interval = Interval { seconds: 60 };
    /// Five minutes.
    pub const FIVE_MINUTES: Interval = Interval { seconds: 300 };
    /// One hour.
    pub const ONE_HOUR: Interval = Interval { seconds: 3600 };
    /// One day.
    pub const ONE_DAY: Interval = Interval { seconds: 86_400 };

    /// Parses an interval from its canonical string form (e.g. `"1m"`, `"5m"`, `"1h"`, `"1d"`).
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty interval string".to_string());
        }
        let (num_str, unit) = s.split_at(s.len() - 1);
        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("invalid interval number: {}", num_str))?;
        if num == 0 {
            return Err("interval count must be positive".to_string());
        }
        let seconds = match unit {
            "s" => num,
            "m" => num * 60,
            "h" => num * 3600,
            "d" => num * 86_400,
            other => return Err(format!("invalid interval unit: {}", other)),
        };
        Ok(Interval { seconds })
    }

    /// Total duration of the interval in seconds.
    pub fn as_seconds(&self) -> u64 {
        self.seconds
    }

    /// Total duration of the interval in milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.seconds as i64 * 1000
    }

    /// Floors `event_time` to this interval's boundary in UTC, returning the window start.
    pub fn floor(&self, event_time: DateTime<Utc>) -> DateTime<Utc> {
        let epoch_secs = event_time.timestamp();
        let bucket = epoch_secs.div_euclid(self.seconds as i64);
        Utc.timestamp_opt(bucket * self.seconds as i64, 0)
            .single()
            .unwrap_or(event_time)
    }

    /// The exclusive end of the window starting at `window_start`.
    pub fn window_end(&self, window_start: DateTime<Utc>) -> DateTime<Utc> {
        window_start + ChronoDuration::seconds(self.seconds as i64)
    }

    /// Canonical label for this interval, e.g. `1m`.
    pub fn label(&self) -> String {
        if self.seconds % 86_400 == 0 {
            format!("{}d", self.seconds / 86_400)
        } else if self.seconds % 3600 == 0 {
            format!("{}h", self.seconds / 3600)
        } else if self.seconds % 60 == 0 {
            format!("{}m", self.seconds / 60)
        } else {
            format!("{}s", self.seconds)
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_canonical_labels() {
        assert_eq!(Interval::parse("1m").unwrap(), Interval::ONE_MINUTE);
        assert_eq!(Interval::parse("5m").unwrap(), Interval::FIVE_MINUTES);
        assert_eq!(Interval::parse("1h").unwrap(), Interval::ONE_HOUR);
        assert_eq!(Interval::parse("1d").unwrap(), Interval::ONE_DAY);
    }

    #[test]
    fn rejects_malformed_intervals() {
        assert!(Interval::parse("").is_err());
        assert!(Interval::parse("0m").is_err());
        assert!(Interval::parse("1x").is_err());
    }

    #[test]
    fn floors_to_window_boundary() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 37).unwrap();
        let floored = Interval::ONE_MINUTE.floor(t);
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            Interval::ONE_MINUTE.window_end(floored),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 0).unwrap()
        );
    }

    #[test]
    fn label_roundtrips() {
        for s in ["1m", "5m", "1h", "1d", "30s"] {
            assert_eq!(Interval::parse(s).unwrap().label(), s);
        }
    }
}
