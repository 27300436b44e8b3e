//! Shared fixtures for unit tests.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::persistence::ReportDb;
use crate::schedule::ScheduledReport;
use crate::store::{DeliveryRecord, QueryResult, RecordQuery, ReportStore, Row, Table};
use escrowise_core::error::{EscrowiseError, Result};
use escrowise_core::traits::{Notifier, ReportEmail};

fn rows(values: serde_json::Value) -> Vec<Row> {
    values
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default()
}

pub fn memory_db() -> ReportDb {
    ReportDb::open(Path::new(":memory:")).unwrap()
}

/// Three profiles, five transactions, two disputes.
pub fn seeded_store() -> ReportDb {
    let db = memory_db();
    db.import_records(
        Table::Profiles,
        &rows(json!([
            {"id": "u1", "full_name": "Ada Lovelace", "email": "ada@example.com", "role": "buyer",
             "created_at": "2024-02-01T00:00:00Z", "last_sign_in_at": "2024-03-10T08:00:00Z"},
            {"id": "u2", "full_name": "Grace Hopper", "email": "grace@example.com", "role": "seller",
             "created_at": "2024-02-15T00:00:00Z", "last_sign_in_at": "2024-03-20T08:00:00Z"},
            {"id": "u3", "full_name": "Site Admin", "email": "admin@example.com", "role": "admin",
             "created_at": "2024-01-01T00:00:00Z", "last_sign_in_at": "2024-01-05T08:00:00Z"}
        ])),
    )
    .unwrap();
    db.import_records(
        Table::Transactions,
        &rows(json!([
            {"id": "t1", "amount": 100, "fee_amount": 2.5, "status": "completed",
             "buyer_id": "u1", "seller_id": "u2", "created_at": "2024-03-01T10:00:00Z"},
            {"id": "t2", "amount": 250.5, "fee_amount": 5, "status": "pending",
             "buyer_id": "u1", "seller_id": "u2", "created_at": "2024-03-01T15:00:00Z"},
            {"id": "t3", "amount": 75.25, "fee_amount": 1.5, "status": "completed",
             "buyer_id": "u1", "seller_id": "u2", "created_at": "2024-03-05T09:00:00Z"},
            {"id": "t4", "amount": null, "status": null,
             "buyer_id": "u1", "seller_id": "u2", "created_at": "2024-03-06T12:00:00Z"},
            {"id": "t5", "amount": 500, "fee_amount": 10, "status": "failed",
             "buyer_id": "u1", "seller_id": "u2", "created_at": "2024-04-02T08:00:00Z"}
        ])),
    )
    .unwrap();
    db.import_records(
        Table::Disputes,
        &rows(json!([
            {"id": "d1", "transaction_id": "t2", "initiator_id": "u1", "admin_id": null,
             "status": "open", "reason": "Item not received", "created_at": "2024-03-03T11:00:00Z"},
            {"id": "d2", "transaction_id": "t5", "initiator_id": "u2", "admin_id": "u3",
             "status": "resolved", "reason": "Damaged", "created_at": "2024-04-03T11:00:00Z",
             "resolved_at": "2024-04-05T11:00:00Z"}
        ])),
    )
    .unwrap();
    db
}

/// Counts every store call; optionally fails every record query.
pub struct CountingStore {
    inner: ReportDb,
    calls: AtomicUsize,
    fail_queries: bool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: memory_db(),
            calls: AtomicUsize::new(0),
            fail_queries: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_queries: true,
            ..Self::new()
        }
    }

    pub fn queries(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ReportStore for CountingStore {
    fn list_reports(&self) -> Result<Vec<ScheduledReport>> {
        self.tick();
        self.inner.list_reports()
    }

    fn get_report(&self, id: &str) -> Result<Option<ScheduledReport>> {
        self.tick();
        self.inner.get_report(id)
    }

    fn due_reports(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReport>> {
        self.tick();
        self.inner.due_reports(now)
    }

    fn insert_report(&self, report: &ScheduledReport) -> Result<()> {
        self.tick();
        self.inner.insert_report(report)
    }

    fn update_report(&self, report: &ScheduledReport) -> Result<bool> {
        self.tick();
        self.inner.update_report(report)
    }

    fn delete_report(&self, id: &str) -> Result<bool> {
        self.tick();
        self.inner.delete_report(id)
    }

    fn record_run(&self, id: &str, last: DateTime<Utc>, next: DateTime<Utc>) -> Result<()> {
        self.tick();
        self.inner.record_run(id, last, next)
    }

    fn try_claim(&self, id: &str, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool> {
        self.tick();
        self.inner.try_claim(id, now, lease_until)
    }

    fn release_claim(&self, id: &str) -> Result<()> {
        self.tick();
        self.inner.release_claim(id)
    }

    fn query(&self, query: &RecordQuery) -> Result<QueryResult> {
        self.tick();
        if self.fail_queries {
            return Err(EscrowiseError::query(query.table.name(), "connection refused"));
        }
        self.inner.query(query)
    }

    fn find_by_id(&self, table: Table, id: &str) -> Result<Option<Row>> {
        self.tick();
        if self.fail_queries {
            return Err(EscrowiseError::query(table.name(), "connection refused"));
        }
        self.inner.find_by_id(table, id)
    }

    fn log_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        self.tick();
        self.inner.log_delivery(record)
    }

    fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        self.tick();
        self.inner.recent_deliveries(limit)
    }
}

/// Records sent emails; fails for any message whose subject contains `fail_on`.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<ReportEmail>>,
    pub fail_on: Option<String>,
    pub delay: Option<std::time::Duration>,
}

impl RecordingNotifier {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<ReportEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, email: &ReportEmail) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(pattern) = &self.fail_on {
            if email.subject.contains(pattern.as_str()) {
                return Err(EscrowiseError::Notifier("smtp 421 service unavailable".into()));
            }
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
