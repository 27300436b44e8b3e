//! Scheduled report definitions: the rows the dispatcher polls.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use escrowise_core::error::{EscrowiseError, Result};

/// How often a scheduled report repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Add one calendar unit to `from` (UTC). Monthly clamps to the last day
    /// of a shorter month: Jan 31 + 1 month = Feb 28/29.
    pub fn advance(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let next = match self {
            Frequency::Daily => from.checked_add_days(Days::new(1)),
            Frequency::Weekly => from.checked_add_days(Days::new(7)),
            Frequency::Monthly => from.checked_add_months(Months::new(1)),
        };
        next.ok_or_else(|| {
            EscrowiseError::InvalidSchedule(format!("{self} step from {from} overflows"))
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = EscrowiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(EscrowiseError::InvalidSchedule(format!(
                "unknown frequency '{other}' (expected daily, weekly or monthly)"
            ))),
        }
    }
}

/// A persisted recurring report job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledReport {
    /// Unique report ID.
    pub id: String,
    /// Generator tag, e.g. "transactions" or "financial".
    pub report_type: String,
    /// Parameter bag, interpreted by the generator registered for `report_type`.
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
    /// Delivery addresses.
    #[serde(deserialize_with = "deserialize_recipients")]
    pub recipients: Vec<String>,
    pub frequency: Frequency,
    /// Inactive reports are never picked up by the poll.
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_true() -> bool {
    true
}

impl ScheduledReport {
    /// Create a new active report whose first run is one `frequency` step after `now`.
    pub fn new(
        report_type: &str,
        parameters: serde_json::Value,
        recipients: Vec<String>,
        frequency: Frequency,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            report_type: report_type.to_string(),
            parameters,
            recipients: normalize_recipients(recipients),
            frequency,
            is_active: true,
            last_run_at: None,
            next_run_at: frequency.advance(now)?,
            created_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Due = active and `next_run_at` has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run_at <= now
    }

    /// True when at least one non-blank recipient is configured.
    pub fn has_recipients(&self) -> bool {
        self.recipients.iter().any(|r| !r.trim().is_empty())
    }
}

/// Trim, drop blanks, keep order.
pub fn normalize_recipients(recipients: Vec<String>) -> Vec<String> {
    recipients
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

/// Accept either `"a@x.com, b@x.com"` or `["a@x.com", "b@x.com"]`.
pub fn deserialize_recipients<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let list = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    };
    Ok(normalize_recipients(list))
}
