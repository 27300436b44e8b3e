//! Record reports: transactions, users, disputes, financial.

use std::collections::HashMap;
use std::sync::Arc;

use crate::financial::{daily_volume, summarize};
use crate::generator::{ReportGenerator, ReportHandler};
use crate::params::{RecordFilter, ReportParams};
use crate::payload::ReportData;
use crate::store::{RecordQuery, ReportStore, Row, Table};
use escrowise_core::error::Result;

pub(crate) fn register_builtin(generator: &mut ReportGenerator) {
    generator.register("transactions", Arc::new(TransactionsReport));
    generator.register("users", Arc::new(UsersReport));
    generator.register("disputes", Arc::new(DisputesReport));
    generator.register("financial", Arc::new(FinancialReport));
}

/// `created_at` range + `status` on any record table.
fn filtered(table: Table, filter: &RecordFilter) -> RecordQuery {
    RecordQuery::new(table)
        .between("created_at", filter.start_date, filter.end_date)
        .eq_opt("status", filter.status.as_deref())
}

pub struct TransactionsReport;

impl ReportHandler for TransactionsReport {
    fn report_name(&self) -> &str {
        "Transactions Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::Transactions(filter) = params else {
            return Err(params.mismatch("transactions"));
        };
        let result = store.query(&filtered(Table::Transactions, filter))?;
        Ok(ReportData::rows(result.rows, result.count))
    }
}

pub struct UsersReport;

impl ReportHandler for UsersReport {
    fn report_name(&self) -> &str {
        "Users Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::Users(filter) = params else {
            return Err(params.mismatch("users"));
        };
        let query = RecordQuery::new(Table::Profiles)
            .between("created_at", filter.start_date, filter.end_date)
            .eq_opt("role", filter.role.as_deref());
        let result = store.query(&query)?;
        Ok(ReportData::rows(result.rows, result.count))
    }
}

/// Disputes with their transaction, initiator and admin attached.
pub struct DisputesReport;

impl ReportHandler for DisputesReport {
    fn report_name(&self) -> &str {
        "Disputes Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::Disputes(filter) = params else {
            return Err(params.mismatch("disputes"));
        };
        let result = store.query(&filtered(Table::Disputes, filter))?;

        let mut lookup = RelatedRecords::new(store);
        let mut rows = Vec::with_capacity(result.rows.len());
        for mut dispute in result.rows {
            let transaction = lookup.get(Table::Transactions, &dispute, "transaction_id")?;
            let initiator = lookup.get(Table::Profiles, &dispute, "initiator_id")?;
            let admin = lookup.get(Table::Profiles, &dispute, "admin_id")?;
            dispute.insert("transaction".into(), transaction);
            dispute.insert("initiator".into(), initiator);
            dispute.insert("admin".into(), admin);
            rows.push(dispute);
        }
        Ok(ReportData::rows(rows, result.count))
    }
}

pub struct FinancialReport;

impl ReportHandler for FinancialReport {
    fn report_name(&self) -> &str {
        "Financial Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::Financial(filter) = params else {
            return Err(params.mismatch("financial"));
        };
        let result = store.query(&filtered(Table::Transactions, filter))?;
        Ok(ReportData::Financial {
            summary: summarize(&result.rows),
            daily_volume: daily_volume(&result.rows),
            rows: result.rows,
        })
    }
}

/// Per-generation cache of records fetched by id.
pub(crate) struct RelatedRecords<'a> {
    store: &'a dyn ReportStore,
    cache: HashMap<(Table, String), serde_json::Value>,
}

impl<'a> RelatedRecords<'a> {
    pub(crate) fn new(store: &'a dyn ReportStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// Record referenced by `row[fk]`, or null when the key is empty or dangling.
    pub(crate) fn get(&mut self, table: Table, row: &Row, fk: &str) -> Result<serde_json::Value> {
        let Some(id) = row.get(fk).and_then(|v| v.as_str()).filter(|s| !s.is_empty()) else {
            return Ok(serde_json::Value::Null);
        };
        let key = (table, id.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let found = self
            .store
            .find_by_id(table, id)?
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Null);
        self.cache.insert(key, found.clone());
        Ok(found)
    }
}
