use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GwCloudError;

/// Identifier of a Bilby job. The service hands these out as strings, but
/// older endpoints and test fixtures use plain integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(value) => Self(value),
            RawId::Signed(value) => Self(value.to_string()),
            RawId::Unsigned(value) => Self(value.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub status: String,
    pub date: NaiveDate,
}

impl JobStatus {
    pub fn new(status: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            status: status.into(),
            date,
        }
    }

    /// Accepts `YYYY-MM-DD` as well as full RFC 3339 timestamps, keeping only
    /// the calendar date.
    pub fn parse(status: impl Into<String>, date: &str) -> Result<Self, GwCloudError> {
        let trimmed = date.trim();
        let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .or_else(|_| DateTime::parse_from_rfc3339(trimmed).map(|value| value.date_naive()))
            .map_err(|_| GwCloudError::MalformedResponse(format!("invalid job date: {date}")))?;
        Ok(Self::new(status, parsed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId {
    pub event_id: String,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_ligo_event: bool,
}

/// Reads an absent or `null` field as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl EventId {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            trigger_id: None,
            nickname: None,
            is_ligo_event: false,
        }
    }
}

/// Creation window accepted by the public job search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    Any,
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Any => "all",
            TimeRange::Day => "1d",
            TimeRange::Week => "1w",
            TimeRange::Month => "1m",
            TimeRange::Year => "1y",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = GwCloudError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "all" | "any" => Ok(TimeRange::Any),
            "1d" | "day" => Ok(TimeRange::Day),
            "1w" | "week" => Ok(TimeRange::Week),
            "1m" | "month" => Ok(TimeRange::Month),
            "1y" | "year" => Ok(TimeRange::Year),
            other => Err(GwCloudError::InvalidTimeRange(other.to_string())),
        }
    }
}

/// Compute cluster a submitted job runs on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cluster {
    #[default]
    Default,
    Ozstar,
    Cit,
    Custom(String),
}

impl Cluster {
    pub fn as_str(&self) -> &str {
        match self {
            Cluster::Default => "default",
            Cluster::Ozstar => "ozstar",
            Cluster::Cit => "cit",
            Cluster::Custom(name) => name,
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Cluster {
    fn from(value: &str) -> Self {
        match value {
            "default" => Cluster::Default,
            "ozstar" => Cluster::Ozstar,
            "cit" => Cluster::Cit,
            other => Cluster::Custom(other.to_string()),
        }
    }
}
