//! Data-store seam used by the generator and the dispatcher.
//!
//! Everything that touches persistence goes through [`ReportStore`], so the
//! SQLite store in [`crate::persistence`] can be swapped for a test double or
//! another backend without touching dispatch logic.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduledReport;
use escrowise_core::error::{EscrowiseError, Result};

/// A record as returned by the store: column name → JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Read-only record tables the generators query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Transactions,
    Profiles,
    Disputes,
}

const TRANSACTION_COLUMNS: &[&str] = &[
    "id",
    "amount",
    "fee_amount",
    "status",
    "transaction_type",
    "buyer_id",
    "seller_id",
    "description",
    "created_at",
    "completed_at",
];

const PROFILE_COLUMNS: &[&str] = &[
    "id",
    "full_name",
    "email",
    "role",
    "created_at",
    "last_sign_in_at",
];

const DISPUTE_COLUMNS: &[&str] = &[
    "id",
    "transaction_id",
    "initiator_id",
    "admin_id",
    "status",
    "reason",
    "created_at",
    "resolved_at",
];

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Transactions => "transactions",
            Table::Profiles => "profiles",
            Table::Disputes => "disputes",
        }
    }

    /// Whitelisted column names, in storage order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Transactions => TRANSACTION_COLUMNS,
            Table::Profiles => PROFILE_COLUMNS,
            Table::Disputes => DISPUTE_COLUMNS,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Fail with `InvalidParameters` unless `column` belongs to this table.
    pub fn check_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(EscrowiseError::InvalidParameters(format!(
                "unknown column '{column}' on {}",
                self.name()
            )))
        }
    }
}

impl std::str::FromStr for Table {
    type Err = EscrowiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transactions" => Ok(Table::Transactions),
            "profiles" => Ok(Table::Profiles),
            "disputes" => Ok(Table::Disputes),
            other => Err(EscrowiseError::InvalidParameters(format!("unknown table '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Inclusive timestamp range on one column. Open ends are unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct DateBounds {
    pub column: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Row-oriented query: optional range, equality filters, ordering, projection.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub table: Table,
    /// Projected columns; empty selects every column.
    pub columns: Vec<String>,
    pub range: Option<DateBounds>,
    pub equals: Vec<(String, String)>,
    /// Columns that must be non-null.
    pub not_null: Vec<String>,
    pub order_by: Option<(String, SortOrder)>,
}

impl RecordQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            range: None,
            equals: Vec::new(),
            not_null: Vec::new(),
            order_by: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn between(
        mut self,
        column: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        if start.is_some() || end.is_some() {
            self.range = Some(DateBounds {
                column: column.to_string(),
                start,
                end,
            });
        }
        self
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.equals.push((column.to_string(), value.to_string()));
        self
    }

    /// Equality filter only when a value is present.
    pub fn eq_opt(self, column: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn not_null(mut self, column: &str) -> Self {
        self.not_null.push(column.to_string());
        self
    }

    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by = Some((column.to_string(), order));
        self
    }

    /// Check every referenced column against the table whitelist.
    pub fn validate(&self) -> Result<()> {
        for c in &self.columns {
            self.table.check_column(c)?;
        }
        if let Some(range) = &self.range {
            self.table.check_column(&range.column)?;
        }
        for (c, _) in &self.equals {
            self.table.check_column(c)?;
        }
        for c in &self.not_null {
            self.table.check_column(c)?;
        }
        if let Some((c, _)) = &self.order_by {
            self.table.check_column(c)?;
        }
        Ok(())
    }
}

/// Matching rows plus the exact match count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// One dispatch attempt, kept for the admin delivery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub report_id: String,
    pub report_type: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub transport: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations needed by reports. Implementations must be safe to
/// share across tasks.
pub trait ReportStore: Send + Sync {
    // ─── Scheduled reports ─────────────────────────────────

    /// All scheduled reports, earliest `next_run_at` first.
    fn list_reports(&self) -> Result<Vec<ScheduledReport>>;

    fn get_report(&self, id: &str) -> Result<Option<ScheduledReport>>;

    /// Active reports with `next_run_at <= now`.
    fn due_reports(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReport>>;

    fn insert_report(&self, report: &ScheduledReport) -> Result<()>;

    /// Overwrite a report's definition. Returns false when the id is unknown.
    fn update_report(&self, report: &ScheduledReport) -> Result<bool>;

    /// Hard delete. Returns false when the id is unknown.
    fn delete_report(&self, id: &str) -> Result<bool>;

    /// Persist a successful run and drop any claim on the row.
    fn record_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Claim the row for one dispatcher invocation until `lease_until`.
    /// Returns false when another live claim exists or the row is gone.
    fn try_claim(&self, id: &str, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool>;

    fn release_claim(&self, id: &str) -> Result<()>;

    // ─── Read-only records ─────────────────────────────────

    fn query(&self, query: &RecordQuery) -> Result<QueryResult>;

    fn find_by_id(&self, table: Table, id: &str) -> Result<Option<Row>>;

    // ─── Delivery log ──────────────────────────────────────

    fn log_delivery(&self, record: &DeliveryRecord) -> Result<()>;

    fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>>;
}

/// Canonical storage format: RFC 3339, UTC, whole seconds. Fixed width, so
/// lexical comparison in SQL is chronological.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse RFC 3339 plus the Postgres text forms (`2024-03-01 10:00:00+00`).
/// A timestamp without an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}
