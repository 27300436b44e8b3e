//! Settlement reports: payouts and fee collection over a `completed_at` range.

use std::sync::Arc;

use crate::builtin::RelatedRecords;
use crate::generator::{ReportGenerator, ReportHandler};
use crate::params::ReportParams;
use crate::payload::ReportData;
use crate::store::{RecordQuery, ReportStore, Row, SortOrder, Table};
use escrowise_core::error::Result;

pub(crate) fn register_payouts(generator: &mut ReportGenerator) {
    generator.register("payouts", Arc::new(PayoutsReport));
    generator.register("fees", Arc::new(FeesReport));
}

const WITHDRAWAL: &str = "withdrawal";

pub struct PayoutsReport;

impl ReportHandler for PayoutsReport {
    fn report_name(&self) -> &str {
        "Payout Activity Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::Payouts(range) = params else {
            return Err(params.mismatch("payouts"));
        };
        let result = store.query(
            &RecordQuery::new(Table::Transactions)
                .select(&["id", "amount", "status", "completed_at", "seller_id", "buyer_id"])
                .eq("transaction_type", WITHDRAWAL)
                .between("completed_at", range.start_date, range.end_date)
                .order_by("completed_at", SortOrder::Desc),
        )?;

        let mut lookup = RelatedRecords::new(store);
        let mut rows = Vec::with_capacity(result.rows.len());
        for tx in &result.rows {
            // Funds leave to the seller; buyer-side refunds have no seller.
            let mut user = lookup.get(Table::Profiles, tx, "seller_id")?;
            if user.is_null() {
                user = lookup.get(Table::Profiles, tx, "buyer_id")?;
            }

            let mut row = Row::new();
            for key in ["id", "amount", "status", "completed_at"] {
                row.insert(key.into(), tx.get(key).cloned().unwrap_or_default());
            }
            row.insert("user".into(), pick_contact(&user));
            rows.push(row);
        }
        Ok(ReportData::rows(rows, result.count))
    }
}

fn pick_contact(profile: &serde_json::Value) -> serde_json::Value {
    match profile.as_object() {
        Some(p) => serde_json::json!({
            "full_name": p.get("full_name").cloned().unwrap_or_default(),
            "email": p.get("email").cloned().unwrap_or_default(),
        }),
        None => serde_json::Value::Null,
    }
}

pub struct FeesReport;

impl ReportHandler for FeesReport {
    fn report_name(&self) -> &str {
        "Fee Collection Report"
    }

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
        let ReportParams::Fees(range) = params else {
            return Err(params.mismatch("fees"));
        };
        let result = store.query(
            &RecordQuery::new(Table::Transactions)
                .select(&["id", "amount", "fee_amount", "status", "completed_at"])
                .not_null("fee_amount")
                .between("completed_at", range.start_date, range.end_date)
                .order_by("completed_at", SortOrder::Desc),
        )?;
        Ok(ReportData::rows(result.rows, result.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ReportDb;
    use crate::testing::memory_db;
    use serde_json::json;

    fn params(tag: &str, bag: serde_json::Value) -> ReportParams {
        ReportParams::parse(tag, &bag).unwrap()
    }

    fn settlements() -> ReportDb {
        let db = memory_db();
        let profiles = json!([
            {"id": "u1", "full_name": "Ada Lovelace", "email": "ada@example.com"},
            {"id": "u2", "full_name": "Grace Hopper", "email": "grace@example.com"}
        ]);
        let transactions = json!([
            {"id": "w1", "amount": 90, "fee_amount": 1.8, "status": "completed",
             "transaction_type": "withdrawal", "seller_id": "u2", "buyer_id": "u1",
             "completed_at": "2024-03-02T10:00:00Z"},
            {"id": "w2", "amount": 40, "status": "completed", "transaction_type": "withdrawal",
             "buyer_id": "u1", "completed_at": "2024-03-04 16:30:00+00"},
            {"id": "w3", "amount": 15, "fee_amount": 0.3, "status": "pending",
             "transaction_type": "withdrawal", "seller_id": "u2"},
            {"id": "e1", "amount": 300, "fee_amount": 6, "status": "completed",
             "transaction_type": "escrow", "completed_at": "2024-03-03T09:00:00Z"},
            {"id": "e2", "amount": 120, "fee_amount": 2.4, "status": "completed",
             "transaction_type": "escrow", "completed_at": "2024-04-01T09:00:00Z"}
        ]);
        for (table, records) in [(Table::Profiles, profiles), (Table::Transactions, transactions)] {
            let rows: Vec<Row> = records
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_object().cloned().unwrap())
                .collect();
            db.import_records(table, &rows).unwrap();
        }
        db
    }

    #[test]
    fn test_payouts_withdrawals_in_range_newest_first() {
        let data = PayoutsReport
            .generate(
                &settlements(),
                &params("payouts", json!({"startDate": "2024-03-01", "endDate": "2024-03-31"})),
            )
            .unwrap();
        let ReportData::Rows { total, columns, rows } = data else {
            panic!("expected rows");
        };
        assert_eq!(total, 2);
        assert_eq!(columns, vec!["id", "amount", "status", "completed_at", "user"]);
        assert_eq!(rows[0]["id"], "w2");
        assert_eq!(rows[0]["completed_at"], "2024-03-04T16:30:00Z");
        // No seller on w2, so the buyer is the payee.
        assert_eq!(rows[0]["user"], json!({"full_name": "Ada Lovelace", "email": "ada@example.com"}));
        assert_eq!(rows[1]["user"]["full_name"], "Grace Hopper");
    }

    #[test]
    fn test_payouts_open_range_includes_uncompleted() {
        let data = PayoutsReport
            .generate(&settlements(), &params("payouts", json!({})))
            .unwrap();
        assert_eq!(data.row_count(), 3);
    }

    #[test]
    fn test_fees_skip_null_fee_amount() {
        let data = FeesReport
            .generate(&settlements(), &params("fees", json!({"endDate": "2024-03-31"})))
            .unwrap();
        let ReportData::Rows { total, rows, .. } = data else {
            panic!("expected rows");
        };
        assert_eq!(total, 2);
        let ids: Vec<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["e1", "w1"]);
        assert_eq!(rows[0]["fee_amount"], json!(6));
    }

    #[test]
    fn test_handlers_reject_foreign_params() {
        let err = FeesReport
            .generate(&settlements(), &params("payouts", json!({})))
            .unwrap_err();
        assert!(err.to_string().contains("fees handler received payouts parameters"));
    }
}
