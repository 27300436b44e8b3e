//! Typed report parameters.
//!
//! Stored reports keep their parameters as a JSON bag; this module turns the
//! bag into the filter struct the matching generator actually reads. Dates
//! may be full RFC 3339 timestamps or plain `YYYY-MM-DD` days. A plain day
//! used as `end_date` covers the whole day.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::parse_timestamp;
use escrowise_core::error::{EscrowiseError, Result};

/// Date range + status equality, used by transactions, disputes and financial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default, alias = "startDate", deserialize_with = "start_bound")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "endDate", deserialize_with = "end_bound")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "non_blank")]
    pub status: Option<String>,
}

/// Date range + role equality, used by the users report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFilter {
    #[serde(default, alias = "startDate", deserialize_with = "start_bound")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "endDate", deserialize_with = "end_bound")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "non_blank")]
    pub role: Option<String>,
}

/// Plain date range, used by the analysis reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, alias = "startDate", deserialize_with = "start_bound")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "endDate", deserialize_with = "end_bound")]
    pub end_date: Option<DateTime<Utc>>,
}

/// Parameters keyed by report type. Tags without a builtin variant (handlers
/// registered at runtime) keep their raw bag in `Custom`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportParams {
    Transactions(RecordFilter),
    Users(ProfileFilter),
    Disputes(RecordFilter),
    Financial(RecordFilter),
    DisputeAnalysis(DateRange),
    UserActivity(DateRange),
    RevenueAnalysis(DateRange),
    /// Range applies to `completed_at`.
    Payouts(DateRange),
    /// Range applies to `completed_at`.
    Fees(DateRange),
    Custom {
        report_type: String,
        parameters: serde_json::Value,
    },
}

impl ReportParams {
    /// Interpret `parameters` for `report_type`.
    pub fn parse(report_type: &str, parameters: &serde_json::Value) -> Result<Self> {
        Ok(match report_type {
            "transactions" => Self::Transactions(parse_bag(parameters)?),
            "users" => Self::Users(parse_bag(parameters)?),
            "disputes" => Self::Disputes(parse_bag(parameters)?),
            "financial" => Self::Financial(parse_bag(parameters)?),
            "dispute_analysis" => Self::DisputeAnalysis(parse_bag(parameters)?),
            "user_activity" => Self::UserActivity(parse_bag(parameters)?),
            "revenue_analysis" => Self::RevenueAnalysis(parse_bag(parameters)?),
            "payouts" => Self::Payouts(parse_bag(parameters)?),
            "fees" => Self::Fees(parse_bag(parameters)?),
            other => Self::Custom {
                report_type: other.to_string(),
                parameters: parameters.clone(),
            },
        })
    }

    pub fn report_type(&self) -> &str {
        match self {
            Self::Transactions(_) => "transactions",
            Self::Users(_) => "users",
            Self::Disputes(_) => "disputes",
            Self::Financial(_) => "financial",
            Self::DisputeAnalysis(_) => "dispute_analysis",
            Self::UserActivity(_) => "user_activity",
            Self::RevenueAnalysis(_) => "revenue_analysis",
            Self::Payouts(_) => "payouts",
            Self::Fees(_) => "fees",
            Self::Custom { report_type, .. } => report_type,
        }
    }

    /// Error for a handler that received another report's parameters.
    pub fn mismatch(&self, expected: &str) -> EscrowiseError {
        EscrowiseError::InvalidParameters(format!(
            "{expected} handler received {} parameters",
            self.report_type()
        ))
    }
}

/// Deserialize a parameter bag; `null` means "no filters".
fn parse_bag<T: DeserializeOwned + Default>(value: &serde_json::Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|e| EscrowiseError::InvalidParameters(e.to_string()))
}

/// Parse a range bound. Plain dates expand to start or end of day.
pub fn parse_bound(raw: &str, end_of_day: bool) -> std::result::Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Some(dt) = parse_timestamp(raw) {
        return Ok(dt);
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("'{raw}' is not an RFC 3339 timestamp or YYYY-MM-DD date"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| "invalid time of day".to_string())?;
    Ok(Utc.from_utc_datetime(&day.and_time(time)))
}

fn bound<'de, D>(deserializer: D, end_of_day: bool) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_bound(s, end_of_day).map(Some).map_err(serde::de::Error::custom),
    }
}

fn start_bound<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    bound(deserializer, false)
}

fn end_bound<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    bound(deserializer, true)
}

fn non_blank<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}
