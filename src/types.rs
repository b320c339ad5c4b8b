// Validated Types - construction-time guarantees for selection parameters
// A value of one of these types is proof that validation already ran, so the
// controller and providers never re-check what the edge already rejected.

use anyhow::{ensure, Context, Result};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Maximum accepted length for a table identifier.
const MAX_TABLE_NAME_LENGTH: usize = 128;

/// Table identifiers the UI uses as placeholders, never as real tables.
/// Requests for these must fail before reaching any provider.
const RESERVED_TABLE_NAMES: &[&str] = &["all"];

/// Maximum number of order rows one request may ask for.
const MAX_ORDER_LIMIT: usize = 50_000;

/// A table identifier that is non-empty, within length limits, and not a
/// reserved placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedTableName(String);

impl ValidatedTableName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();

        ensure!(!trimmed.is_empty(), "Table name cannot be empty");
        ensure!(
            trimmed.len() <= MAX_TABLE_NAME_LENGTH,
            "Table name exceeds maximum length of {} characters",
            MAX_TABLE_NAME_LENGTH
        );
        ensure!(
            !RESERVED_TABLE_NAMES
                .iter()
                .any(|reserved| trimmed.eq_ignore_ascii_case(reserved)),
            "Table name '{}' is a reserved placeholder and cannot be queried",
            trimmed
        );
        ensure!(
            trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'),
            "Table name contains invalid characters (allowed: alphanumeric, '_', '-', '.')"
        );

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which upstream touch-point a conversion is credited to. The choice changes
/// which filter parameter the order provider expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    #[default]
    LastNonDirect,
    FirstClick,
}

impl AttributionModel {
    /// Stable identifier used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::LastNonDirect => "last_non_direct",
            AttributionModel::FirstClick => "first_click",
        }
    }

    /// Name of the segment filter parameter the order provider expects for
    /// this model. The two parameters are mutually exclusive.
    pub fn filter_param(&self) -> &'static str {
        match self {
            AttributionModel::LastNonDirect => "traffic_category",
            AttributionModel::FirstClick => "fs_traffic_category",
        }
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Segment selection for an order request: everything, or one labeled segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFilter {
    All,
    Segment(String),
}

impl SegmentFilter {
    pub fn segment(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let trimmed = label.trim();
        ensure!(!trimmed.is_empty(), "Segment label cannot be blank");
        ensure!(
            trimmed.len() <= 256,
            "Segment label exceeds maximum length of 256 characters"
        );
        Ok(Self::Segment(trimmed.to_string()))
    }

    /// The selected label, if this filter narrows to one segment.
    pub fn label(&self) -> Option<&str> {
        match self {
            SegmentFilter::All => None,
            SegmentFilter::Segment(label) => Some(label),
        }
    }

    /// Fragment used when composing cache keys.
    pub fn key_fragment(&self) -> &str {
        match self {
            SegmentFilter::All => "all",
            SegmentFilter::Segment(label) => label,
        }
    }
}

impl Default for SegmentFilter {
    fn default() -> Self {
        SegmentFilter::All
    }
}

impl fmt::Display for SegmentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_fragment())
    }
}

/// An inclusive calendar date range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl ValidatedDateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        ensure!(
            start <= end,
            "Date range start {} is after end {}",
            start,
            end
        );
        Ok(Self { start, end })
    }

    /// Parse a range from `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            .with_context(|| format!("Invalid start date '{start}' (expected YYYY-MM-DD)"))?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
            .with_context(|| format!("Invalid end date '{end}' (expected YYYY-MM-DD)"))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range, counting both endpoints.
    pub fn day_count(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days() + 1
    }

    /// The adjacent preceding window of equal length, for period-over-period
    /// comparisons: an n-day range `[start, end]` yields
    /// `[start - n days, start - 1 day]`.
    pub fn previous_period(&self) -> Result<Self> {
        let span = self.day_count() as u64;
        let prev_end = self
            .start
            .checked_sub_days(Days::new(1))
            .context("Date range starts at the calendar boundary")?;
        let prev_start = self
            .start
            .checked_sub_days(Days::new(span))
            .context("Previous period would cross the calendar boundary")?;
        Self::new(prev_start, prev_end)
    }

    /// True if the given date falls inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for ValidatedDateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A positive row limit for order downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedLimit(usize);

impl ValidatedLimit {
    pub fn new(limit: usize) -> Result<Self> {
        ensure!(limit > 0, "Limit must be positive");
        ensure!(
            limit <= MAX_ORDER_LIMIT,
            "Limit {} exceeds maximum of {}",
            limit,
            MAX_ORDER_LIMIT
        );
        Ok(Self(limit))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for ValidatedLimit {
    fn default() -> Self {
        // Matches the provider's default download size.
        Self(1000)
    }
}

impl fmt::Display for ValidatedLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A calendar month, used to key monthly goals (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        ensure!(
            (1..=12).contains(&month),
            "Month {} is out of range 1..=12",
            month
        );
        ensure!(
            (1970..=9999).contains(&year),
            "Year {} is out of supported range",
            year
        );
        Ok(Self { year, month })
    }

    /// The month a date falls in.
    pub fn for_date(date: NaiveDate) -> Self {
        // A NaiveDate always carries a valid month; the range checks cannot
        // fail for it.
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse a `YYYY-MM` month key.
    pub fn parse(value: &str) -> Result<Self> {
        let (year, month) = value
            .split_once('-')
            .with_context(|| format!("Invalid month key '{value}' (expected YYYY-MM)"))?;
        let year: i32 = year
            .parse()
            .with_context(|| format!("Invalid year in month key '{value}'"))?;
        let month: u32 = month
            .parse()
            .with_context(|| format!("Invalid month in month key '{value}'"))?;
        Self::new(year, month)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// Month keys serialize as their `YYYY-MM` form so goal maps keyed by month
// round-trip through JSON objects.
impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
