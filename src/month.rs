//! Calendar months used to select monthly trip files.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `YYYY-MM` calendar month. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

/// Default analysis window, October 2023 through September 2024.
pub const DEFAULT_START: YearMonth = YearMonth {
    year: 2023,
    month: 10,
};
pub const DEFAULT_END: YearMonth = YearMonth {
    year: 2024,
    month: 9,
};

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .with_context(|| format!("invalid month {year}-{month:02}"))?;
        Ok(Self { year, month })
    }

    /// Extracts the month embedded in a trip file stem such as
    /// `yellow_tripdata_2024-07`: the first seven characters of the last
    /// `_`-separated segment.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let segment = stem.rsplit('_').next()?;
        let head = segment.get(..7)?;
        head.parse().ok()
    }

    /// Whether `self` lies in the inclusive range `start..=end`.
    pub fn within(&self, start: YearMonth, end: YearMonth) -> bool {
        start <= *self && *self <= end
    }
}

impl FromStr for YearMonth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
            .with_context(|| format!("expected YYYY-MM, got {s:?}"))?;
        Ok(Self {
            year: date.year(),
            month: date.month(),
        })
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
