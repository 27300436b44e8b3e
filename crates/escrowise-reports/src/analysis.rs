//! Analysis reports: disputes, user activity and revenue over a date range.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::json;

use crate::builtin::RelatedRecords;
use crate::financial::{created_on, parse_amount};
use crate::generator::{ReportGenerator, ReportHandler};
use crate::params::ReportParams;
use crate::payload::ReportData;
use crate::store::{RecordQuery, ReportStore, Row, SortOrder, Table};
use escrowise_core::error::Result;

pub(crate) fn register_analysis(generator: &mut ReportGenerator) {
    generator.register("dispute_analysis", Arc::new(DisputeAnalysisReport));
    generator.register("user_activity", Arc::new(UserActivityReport));
    generator.register("revenue_analysis", Arc::new(RevenueAnalysisReport));
}

/// Pick `fields` out of a related record; null when the record is missing.
fn pick(record: &serde_json::Value, fields: &[&str]) -> serde_json::Value {
    match record.as_object() {
        Some(obj) => {
            let mut out = Row::new();
            for f in fields {
                out.insert((*f).to_string(), obj.get(*f).cloned().unwrap_or_default());
            }
            serde_json::Value::Object(out)
        }
        None => serde_json::Value::Null,
    }
}

pub struct DisputeAnalysisReport;

impl ReportHandler for DisputeAnalysisReport {
    fn report_name(&self) -> &str {
        "Dispute Analysis Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::DisputeAnalysis(range) = params else {
            return Err(params.mismatch("dispute_analysis"));
        };
        let query = RecordQuery::new(Table::Disputes)
            .select(&[
                "id",
                "status",
                "reason",
                "created_at",
                "resolved_at",
                "transaction_id",
                "initiator_id",
            ])
            .between("created_at", range.start_date, range.end_date)
            .order_by("created_at", SortOrder::Desc);
        let result = store.query(&query)?;

        let mut lookup = RelatedRecords::new(store);
        let mut rows = Vec::with_capacity(result.rows.len());
        for dispute in &result.rows {
            let transaction = lookup.get(Table::Transactions, dispute, "transaction_id")?;
            let initiator = lookup.get(Table::Profiles, dispute, "initiator_id")?;

            let mut row = Row::new();
            for key in ["id", "status", "reason", "created_at", "resolved_at"] {
                row.insert(key.into(), dispute.get(key).cloned().unwrap_or_default());
            }
            row.insert("transaction".into(), pick(&transaction, &["amount", "status"]));
            row.insert("initiator".into(), pick(&initiator, &["full_name", "email"]));
            rows.push(row);
        }
        Ok(ReportData::rows(rows, result.count))
    }
}

pub struct UserActivityReport;

impl ReportHandler for UserActivityReport {
    fn report_name(&self) -> &str {
        "User Activity Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::UserActivity(range) = params else {
            return Err(params.mismatch("user_activity"));
        };
        let profiles = store.query(
            &RecordQuery::new(Table::Profiles)
                .select(&["id", "full_name", "email", "last_sign_in_at"])
                .between("last_sign_in_at", range.start_date, range.end_date)
                .order_by("last_sign_in_at", SortOrder::Desc),
        )?;
        if profiles.rows.is_empty() {
            return Ok(ReportData::rows(Vec::new(), 0));
        }

        let transactions = store.query(
            &RecordQuery::new(Table::Transactions).select(&["id", "amount", "buyer_id", "seller_id"]),
        )?;
        // profile id -> (count, total)
        let mut stats: HashMap<&str, (u64, f64)> = HashMap::new();
        for tx in &transactions.rows {
            let amount = parse_amount(tx.get("amount"));
            let buyer = tx.get("buyer_id").and_then(|v| v.as_str());
            let seller = tx.get("seller_id").and_then(|v| v.as_str());
            for party in [buyer, seller.filter(|s| Some(*s) != buyer)].into_iter().flatten() {
                let entry = stats.entry(party).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += amount;
            }
        }

        let rows = profiles
            .rows
            .iter()
            .map(|profile| {
                let id = profile.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let (count, total) = stats.get(id).copied().unwrap_or((0, 0.0));
                let mut row = profile.clone();
                row.insert("transaction_count".into(), json!(count));
                row.insert("transaction_total".into(), json!(total));
                row
            })
            .collect();
        Ok(ReportData::rows(rows, profiles.count))
    }
}

pub struct RevenueAnalysisReport;

impl ReportHandler for RevenueAnalysisReport {
    fn report_name(&self) -> &str {
        "Revenue Analysis Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::RevenueAnalysis(range) = params else {
            return Err(params.mismatch("revenue_analysis"));
        };
        let result = store.query(
            &RecordQuery::new(Table::Transactions)
                .select(&["amount", "fee_amount", "created_at"])
                .between("created_at", range.start_date, range.end_date),
        )?;

        // day -> (count, fees, amount)
        let mut days: BTreeMap<chrono::NaiveDate, (u64, f64, f64)> = BTreeMap::new();
        for tx in &result.rows {
            let Some(day) = created_on(tx) else { continue };
            let entry = days.entry(day).or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += parse_amount(tx.get("fee_amount"));
            entry.2 += parse_amount(tx.get("amount"));
        }

        let rows: Vec<Row> = days
            .into_iter()
            .filter_map(|(day, (count, fees, amount))| {
                json!({
                    "date": day.to_string(),
                    "count": count,
                    "total_fees": fees,
                    "total_amount": amount,
                })
                .as_object()
                .cloned()
            })
            .collect();
        let total = rows.len() as u64;
        Ok(ReportData::rows(rows, total))
    }
}
