//! Quiet-hours windows in whole UTC hours.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One `start-end` range. `start == end` covers the whole day; `start > end` wraps
/// past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourRange {
    /// First quiet hour (inclusive).
    pub start: u32,
    /// First non-quiet hour (exclusive).
    pub end: u32,
}

impl HourRange {
    /// Whether `hour` (0..24) falls in the range.
    #[must_use]
    pub const fn contains(&self, hour: u32) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Set of quiet-hour ranges, e.g. `"22-6,13-14"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuietHours {
    ranges: Vec<HourRange>,
}

impl QuietHours {
    /// Whether no range is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Configured ranges.
    #[must_use]
    pub fn ranges(&self) -> &[HourRange] {
        &self.ranges
    }

    /// Whether `hour` is quiet.
    #[must_use]
    pub fn contains(&self, hour: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(hour))
    }

    /// Whether `now` is quiet.
    #[must_use]
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        self.contains(now.hour())
    }
}

impl FromStr for QuietHours {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (start, end) = part
                .split_once('-')
                .ok_or_else(|| format!("quiet hours range `{part}` must be `start-end`"))?;
            let parse = |v: &str| -> Result<u32, String> {
                let hour: u32 = v
                    .trim()
                    .parse()
                    .map_err(|_| format!("quiet hours range `{part}` has a non-numeric hour"))?;
                if hour > 23 {
                    return Err(format!("quiet hours range `{part}` hour out of range"));
                }
                Ok(hour)
            };
            ranges.push(HourRange {
                start: parse(start)?,
                end: parse(end)?,
            });
        }
        Ok(Self { ranges })
    }
}

impl fmt::Display for QuietHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|r| format!("{}-{}", r.start, r.end))
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl Serialize for QuietHours {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuietHours {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_wraps_midnight() {
        let quiet: QuietHours = "22-6, 13-14".parse().unwrap();
        assert_eq!(quiet.ranges().len(), 2);
        assert!(quiet.contains(23));
        assert!(quiet.contains(0));
        assert!(quiet.contains(5));
        assert!(!quiet.contains(6));
        assert!(quiet.contains(13));
        assert!(!quiet.contains(14));
        assert!(!quiet.contains(12));
        assert_eq!(quiet.to_string(), "22-6,13-14");
    }

    #[test]
    fn equal_bounds_cover_whole_day() {
        let quiet: QuietHours = "3-3".parse().unwrap();
        assert!((0..24).all(|h| quiet.contains(h)));
    }

    #[test]
    fn empty_string_is_never_quiet() {
        let quiet: QuietHours = "".parse().unwrap();
        assert!(quiet.is_empty());
        assert!(!quiet.contains(10));
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!("22".parse::<QuietHours>().is_err());
        assert!("a-b".parse::<QuietHours>().is_err());
        assert!("1-30".parse::<QuietHours>().is_err());
    }
}
