use std::fmt::{Display, Formatter};

use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// Instant normalized to UTC.
///
/// Upstream records mix RFC3339 timestamps with bare `YYYY-MM-DD` dates; both
/// parse here, bare dates as midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        Self::parse_lenient(input).ok_or_else(|| ValidationError::InvalidDate {
            value: input.to_owned(),
        })
    }

    /// RFC3339, then `YYYY-MM-DD`, then the date prefix of anything longer
    /// (offset-less `2024-03-01T10:00:00` and the like).
    pub fn parse_lenient(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Ok(parsed) = OffsetDateTime::parse(input, &Rfc3339) {
            return Some(Self(parsed.to_offset(UtcOffset::UTC)));
        }
        input
            .get(..10)
            .and_then(parse_date)
            .map(|date| Self(date.midnight().assume_utc()))
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Self {
        Self(value.to_offset(UtcOffset::UTC))
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn date(self) -> Date {
        self.0.date()
    }

    pub fn minus_days(self, days: i64) -> Self {
        Self(self.0 - Duration::days(days))
    }

    /// Whole days from `self` until `later`; negative when `later` is earlier.
    pub fn days_until(self, later: Self) -> i64 {
        (later.0 - self.0).whole_days()
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.format_date())
    }

    /// `YYYY-MM-DD`.
    pub fn format_date(self) -> String {
        let date = self.0.date();
        format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    }
}

fn parse_date(input: &str) -> Option<Date> {
    Date::parse(input, format_description!("[year]-[month]-[day]")).ok()
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}
