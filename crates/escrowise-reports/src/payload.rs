//! Generated report payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Row;

/// A generated report, ready for rendering or the ad-hoc API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub report_name: String,
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    pub parameters: serde_json::Value,
    pub data: ReportData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportData {
    /// Flat rows. `columns` is the header, declared by the generator.
    Rows {
        total: u64,
        columns: Vec<String>,
        rows: Vec<Row>,
    },
    Financial {
        summary: FinancialSummary,
        daily_volume: BTreeMap<NaiveDate, f64>,
        rows: Vec<Row>,
    },
}

impl ReportData {
    /// Rows with their column union as the header.
    pub fn rows(rows: Vec<Row>, total: u64) -> Self {
        ReportData::Rows {
            total,
            columns: column_union(&rows),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            ReportData::Rows { rows, .. } | ReportData::Financial { rows, .. } => rows.len(),
        }
    }
}

/// Every key seen across `rows`, in first-seen order.
pub fn column_union(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub total_transactions: u64,
    pub total_volume: f64,
    pub completed_transactions: u64,
    pub pending_transactions: u64,
    pub failed_transactions: u64,
    /// `total_volume / total_transactions`, or 0 with no transactions.
    pub average_transaction_value: f64,
    pub status_counts: BTreeMap<String, u64>,
}
