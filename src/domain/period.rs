//! Billing period (year + month).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A calendar month, the unit every settlement is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodParseError {
    #[error("invalid period '{0}', expected YYYY-MM")]
    Format(String),
    #[error("month out of range in period '{0}'")]
    Month(String),
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodParseError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodParseError::Month(format!("{year:04}-{month:02}")));
        }
        Ok(Period { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Lenient parse for ingestion labels.
    ///
    /// Accepts `YYYY-MM`, `YYYY/MM`, `YYYYMM` and full dates (`YYYY-MM-DD`),
    /// in which case the day is ignored.
    pub fn from_label(label: &str) -> Result<Self, PeriodParseError> {
        let trimmed = label.trim();
        if let Ok(period) = trimmed.parse::<Period>() {
            return Ok(period);
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            use chrono::Datelike;
            return Period::new(date.year(), date.month());
        }
        let normalized = trimmed.replace('/', "-");
        if let Ok(period) = normalized.parse::<Period>() {
            return Ok(period);
        }
        if trimmed.len() == 6 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            return format!("{}-{}", &trimmed[..4], &trimmed[4..]).parse();
        }
        Err(PeriodParseError::Format(trimmed.to_string()))
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    /// Strict `YYYY-MM` parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PeriodParseError::Format(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(bad)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(bad());
        }
        if !year.chars().chain(month.chars()).all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        let year: i32 = year.parse().map_err(|_| bad())?;
        let month: u32 = month.parse().map_err(|_| bad())?;
        Period::new(year, month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strict() {
        let p: Period = "2025-07".parse().unwrap();
        assert_eq!(p.year(), 2025);
        assert_eq!(p.month(), 7);
        assert_eq!(p.to_string(), "2025-07");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["2025-7", "25-07", "2025/07", "2025-13", "2025-00", "", "abcd-ef"] {
            assert!(bad.parse::<Period>().is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn test_from_label_variants() {
        let expected = Period::new(2025, 7).unwrap();
        for label in ["2025-07", "2025/07", "202507", "2025-07-31", " 2025-07 "] {
            assert_eq!(Period::from_label(label).unwrap(), expected, "label {label:?}");
        }
        assert!(Period::from_label("July").is_err());
    }

    #[test]
    fn test_ordering() {
        let a: Period = "2024-12".parse().unwrap();
        let b: Period = "2025-01".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_serde_as_string() {
        let p: Period = "2025-07".parse().unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"2025-07\"");
        let back: Period = serde_json::from_str("\"2025-07\"").unwrap();
        assert_eq!(back, p);
    }
}
