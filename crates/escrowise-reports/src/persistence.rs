//! SQLite-backed report store.
//! Holds the scheduled report definitions, the read-only record tables the
//! generators query, and the delivery log.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::schedule::{ScheduledReport, normalize_recipients};
use crate::store::{
    DeliveryRecord, DeliveryStatus, QueryResult, RecordQuery, ReportStore, Row, SortOrder, Table,
    format_timestamp, parse_timestamp,
};
use escrowise_core::error::{EscrowiseError, Result};

/// SQLite report store. One connection behind a mutex; every call is short.
pub struct ReportDb {
    conn: Mutex<Connection>,
}

const REPORT_SELECT: &str = "SELECT id, report_type, parameters, recipients, frequency, is_active, \
     last_run_at, next_run_at, created_by, created_at, updated_at FROM scheduled_reports";

/// Column values exactly as stored; converted outside the rusqlite closure so
/// decoding errors keep their own variant.
struct StoredReport {
    id: String,
    report_type: String,
    parameters: String,
    recipients: String,
    frequency: String,
    is_active: bool,
    last_run_at: Option<String>,
    next_run_at: String,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

fn row_to_stored(row: &rusqlite::Row) -> rusqlite::Result<StoredReport> {
    Ok(StoredReport {
        id: row.get(0)?,
        report_type: row.get(1)?,
        parameters: row.get(2)?,
        recipients: row.get(3)?,
        frequency: row.get(4)?,
        is_active: row.get(5)?,
        last_run_at: row.get(6)?,
        next_run_at: row.get(7)?,
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl StoredReport {
    fn into_report(self) -> Result<ScheduledReport> {
        let ts = |label: &str, raw: &str| {
            parse_timestamp(raw).ok_or_else(|| {
                EscrowiseError::query(
                    "scheduled_reports",
                    format!("{label} '{raw}' is not an RFC 3339 timestamp"),
                )
            })
        };
        let last_run_at = match self.last_run_at.as_deref() {
            Some(raw) => Some(ts("last_run_at", raw)?),
            None => None,
        };
        Ok(ScheduledReport {
            parameters: serde_json::from_str(&self.parameters)
                .map_err(|e| EscrowiseError::query("scheduled_reports", format!("parameters: {e}")))?,
            recipients: decode_recipients(&self.recipients),
            frequency: self.frequency.parse()?,
            is_active: self.is_active,
            last_run_at,
            next_run_at: ts("next_run_at", &self.next_run_at)?,
            created_at: ts("created_at", &self.created_at)?,
            updated_at: ts("updated_at", &self.updated_at)?,
            id: self.id,
            report_type: self.report_type,
            created_by: self.created_by,
        })
    }
}

/// Recipients are stored as a JSON array; older rows may hold a comma list.
fn decode_recipients(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => normalize_recipients(list),
        Err(_) => normalize_recipients(raw.split(',').map(str::to_string).collect()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}

/// Timestamp columns (`*_at`) are normalised to the canonical format so range
/// filters compare correctly.
/// `*_at` columns are stored in the canonical timestamp form so range
/// filters compare correctly; anything unparseable there is rejected.
fn json_to_sql(column: &str, value: &serde_json::Value) -> Result<SqlValue> {
    let timestamp_column = column.ends_with("_at");
    Ok(match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::String(s) if timestamp_column => {
            let dt = parse_timestamp(s).ok_or_else(|| {
                EscrowiseError::InvalidParameters(format!("{column}: '{s}' is not a timestamp"))
            })?;
            SqlValue::Text(format_timestamp(&dt))
        }
        _ if timestamp_column => {
            return Err(EscrowiseError::InvalidParameters(format!(
                "{column}: expected a timestamp string, got {value}"
            )));
        }
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    })
}

impl ReportDb {
    /// Open or create the report database. `":memory:"` gives a private
    /// in-memory store.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| EscrowiseError::query("open", e))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| EscrowiseError::query("pragma", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EscrowiseError::query("lock", "report database mutex poisoned"))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS scheduled_reports (
                id TEXT PRIMARY KEY,
                report_type TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',   -- JSON object
                recipients TEXT NOT NULL DEFAULT '[]',   -- JSON array of addresses
                frequency TEXT NOT NULL,                 -- 'daily', 'weekly', 'monthly'
                is_active INTEGER NOT NULL DEFAULT 1,
                last_run_at TEXT,
                next_run_at TEXT NOT NULL,
                created_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                claimed_until TEXT                       -- dispatcher lease
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_reports_due
                ON scheduled_reports (is_active, next_run_at);

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                amount NUMERIC,
                fee_amount NUMERIC,
                status TEXT,
                transaction_type TEXT,
                buyer_id TEXT,
                seller_id TEXT,
                description TEXT,
                created_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                full_name TEXT,
                email TEXT,
                role TEXT,
                created_at TEXT,
                last_sign_in_at TEXT
            );

            CREATE TABLE IF NOT EXISTS disputes (
                id TEXT PRIMARY KEY,
                transaction_id TEXT,
                initiator_id TEXT,
                admin_id TEXT,
                status TEXT,
                reason TEXT,
                created_at TEXT,
                resolved_at TEXT
            );

            CREATE TABLE IF NOT EXISTS report_deliveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id TEXT NOT NULL,
                report_type TEXT NOT NULL,
                recipients TEXT NOT NULL,
                subject TEXT NOT NULL,
                transport TEXT NOT NULL,
                status TEXT NOT NULL,                    -- 'sent', 'failed'
                error TEXT,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| EscrowiseError::query("migration", e))
    }

    // ─── Record import ────────────────────────────────────

    /// Insert or replace one record. Every key must be a known column.
    pub fn insert_record(&self, table: Table, record: &Row) -> Result<()> {
        if record.is_empty() {
            return Err(EscrowiseError::InvalidParameters(format!(
                "empty {} record",
                table.name()
            )));
        }
        for column in record.keys() {
            table.check_column(column)?;
        }
        let columns: Vec<&str> = record.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let values = record
            .iter()
            .map(|(k, v)| json_to_sql(k, v))
            .collect::<Result<Vec<SqlValue>>>()?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table.name(),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.lock()?
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| EscrowiseError::query(table.name(), e))?;
        Ok(())
    }

    /// Import a batch of records; returns how many were written.
    pub fn import_records(&self, table: Table, records: &[Row]) -> Result<usize> {
        for record in records {
            self.insert_record(table, record)?;
        }
        Ok(records.len())
    }

    fn load_reports(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ScheduledReport>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        let stored = stmt
            .query_map(args, row_to_stored)
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;

        // One undecodable row must not hide the rest.
        Ok(stored
            .into_iter()
            .filter_map(|s| {
                let id = s.id.clone();
                match s.into_report() {
                    Ok(report) => Some(report),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable scheduled report {id}: {e}");
                        None
                    }
                }
            })
            .collect())
    }
}

impl ReportStore for ReportDb {
    fn list_reports(&self) -> Result<Vec<ScheduledReport>> {
        self.load_reports(&format!("{REPORT_SELECT} ORDER BY next_run_at ASC"), &[])
    }

    fn get_report(&self, id: &str) -> Result<Option<ScheduledReport>> {
        let stored = self
            .lock()?
            .query_row(&format!("{REPORT_SELECT} WHERE id = ?1"), params![id], row_to_stored)
            .optional()
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        stored.map(StoredReport::into_report).transpose()
    }

    fn due_reports(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReport>> {
        let now = format_timestamp(&now);
        self.load_reports(
            &format!("{REPORT_SELECT} WHERE is_active = 1 AND next_run_at <= ?1 ORDER BY next_run_at ASC"),
            &[&now],
        )
    }

    fn insert_report(&self, report: &ScheduledReport) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO scheduled_reports
                 (id, report_type, parameters, recipients, frequency, is_active,
                  last_run_at, next_run_at, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    report.id,
                    report.report_type,
                    report.parameters.to_string(),
                    serde_json::to_string(&report.recipients)?,
                    report.frequency.as_str(),
                    report.is_active,
                    report.last_run_at.as_ref().map(format_timestamp),
                    format_timestamp(&report.next_run_at),
                    report.created_by,
                    format_timestamp(&report.created_at),
                    format_timestamp(&report.updated_at),
                ],
            )
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        Ok(())
    }

    fn update_report(&self, report: &ScheduledReport) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE scheduled_reports SET
                 report_type = ?2, parameters = ?3, recipients = ?4, frequency = ?5,
                 is_active = ?6, last_run_at = ?7, next_run_at = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    report.id,
                    report.report_type,
                    report.parameters.to_string(),
                    serde_json::to_string(&report.recipients)?,
                    report.frequency.as_str(),
                    report.is_active,
                    report.last_run_at.as_ref().map(format_timestamp),
                    format_timestamp(&report.next_run_at),
                    format_timestamp(&report.updated_at),
                ],
            )
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        Ok(changed > 0)
    }

    fn delete_report(&self, id: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute("DELETE FROM scheduled_reports WHERE id = ?1", params![id])
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        Ok(changed > 0)
    }

    fn record_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE scheduled_reports
                 SET last_run_at = ?2, next_run_at = ?3, claimed_until = NULL
                 WHERE id = ?1",
                params![id, format_timestamp(&last_run_at), format_timestamp(&next_run_at)],
            )
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        if changed == 0 {
            return Err(EscrowiseError::ReportNotFound(id.to_string()));
        }
        Ok(())
    }

    fn try_claim(&self, id: &str, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE scheduled_reports SET claimed_until = ?2
                 WHERE id = ?1 AND (claimed_until IS NULL OR claimed_until <= ?3)",
                params![id, format_timestamp(&lease_until), format_timestamp(&now)],
            )
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        Ok(changed == 1)
    }

    fn release_claim(&self, id: &str) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE scheduled_reports SET claimed_until = NULL WHERE id = ?1",
                params![id],
            )
            .map_err(|e| EscrowiseError::query("scheduled_reports", e))?;
        Ok(())
    }

    fn query(&self, query: &RecordQuery) -> Result<QueryResult> {
        query.validate()?;
        let table = query.table;

        let columns = if query.columns.is_empty() {
            table.columns().join(", ")
        } else {
            query.columns.join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}", table.name());
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(range) = &query.range {
            if let Some(start) = &range.start {
                args.push(SqlValue::Text(format_timestamp(start)));
                clauses.push(format!("{} >= ?{}", range.column, args.len()));
            }
            if let Some(end) = &range.end {
                args.push(SqlValue::Text(format_timestamp(end)));
                clauses.push(format!("{} <= ?{}", range.column, args.len()));
            }
        }
        for (column, value) in &query.equals {
            args.push(SqlValue::Text(value.clone()));
            clauses.push(format!("{column} = ?{}", args.len()));
        }
        for column in &query.not_null {
            clauses.push(format!("{column} IS NOT NULL"));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match &query.order_by {
            Some((column, SortOrder::Asc)) => sql.push_str(&format!(" ORDER BY {column} ASC")),
            Some((column, SortOrder::Desc)) => sql.push_str(&format!(" ORDER BY {column} DESC")),
            None => sql.push_str(" ORDER BY rowid ASC"),
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EscrowiseError::query(table.name(), e))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let mut out = Row::new();
                for (i, name) in names.iter().enumerate() {
                    out.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                }
                Ok(out)
            })
            .map_err(|e| EscrowiseError::query(table.name(), e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EscrowiseError::query(table.name(), e))?;

        Ok(QueryResult {
            count: rows.len() as u64,
            rows,
        })
    }

    fn find_by_id(&self, table: Table, id: &str) -> Result<Option<Row>> {
        let result = self.query(&RecordQuery::new(table).eq("id", id))?;
        Ok(result.rows.into_iter().next())
    }

    fn log_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO report_deliveries
                 (report_id, report_type, recipients, subject, transport, status, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.report_id,
                    record.report_type,
                    serde_json::to_string(&record.recipients)?,
                    record.subject,
                    record.transport,
                    record.status.as_str(),
                    record.error,
                    format_timestamp(&record.created_at),
                ],
            )
            .map_err(|e| EscrowiseError::query("report_deliveries", e))?;
        Ok(())
    }

    fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT report_id, report_type, recipients, subject, transport, status, error, created_at
                 FROM report_deliveries ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| EscrowiseError::query("report_deliveries", e))?;
        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|e| EscrowiseError::query("report_deliveries", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EscrowiseError::query("report_deliveries", e))?;

        Ok(raw
            .into_iter()
            .map(
                |(report_id, report_type, recipients, subject, transport, status, error, created_at)| {
                    DeliveryRecord {
                        report_id,
                        report_type,
                        recipients: decode_recipients(&recipients),
                        subject,
                        transport,
                        status: if status == "sent" {
                            DeliveryStatus::Sent
                        } else {
                            DeliveryStatus::Failed
                        },
                        error,
                        created_at: parse_timestamp(&created_at).unwrap_or_default(),
                    }
                },
            )
            .collect())
    }
}
