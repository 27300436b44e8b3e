//! Financial aggregates over transaction rows.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::params::parse_bound;
use crate::payload::FinancialSummary;
use crate::store::Row;

/// Amounts arrive as numbers or numeric strings. Anything else counts as 0.
pub fn parse_amount(value: Option<&serde_json::Value>) -> f64 {
    let amount = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if amount.is_finite() { amount } else { 0.0 }
}

fn status_of(row: &Row) -> &str {
    row.get("status")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
}

/// UTC calendar date of a row's `created_at`.
pub fn created_on(row: &Row) -> Option<NaiveDate> {
    let raw = row.get("created_at")?.as_str()?;
    parse_bound(raw, false).ok().map(|dt| dt.date_naive())
}

pub fn summarize(rows: &[Row]) -> FinancialSummary {
    let mut summary = FinancialSummary::default();
    for row in rows {
        summary.total_transactions += 1;
        summary.total_volume += parse_amount(row.get("amount"));

        let status = status_of(row);
        match status {
            "completed" => summary.completed_transactions += 1,
            "pending" => summary.pending_transactions += 1,
            "failed" => summary.failed_transactions += 1,
            _ => {}
        }
        *summary.status_counts.entry(status.to_string()).or_insert(0) += 1;
    }
    if summary.total_transactions > 0 {
        summary.average_transaction_value =
            summary.total_volume / summary.total_transactions as f64;
    }
    summary
}

/// Volume per day. Rows without a readable `created_at` are left out.
pub fn daily_volume(rows: &[Row]) -> BTreeMap<NaiveDate, f64> {
    let mut volume = BTreeMap::new();
    for row in rows {
        if let Some(day) = created_on(row) {
            *volume.entry(day).or_insert(0.0) += parse_amount(row.get("amount"));
        }
    }
    volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: serde_json::Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(Some(&json!(12.5))), 12.5);
        assert_eq!(parse_amount(Some(&json!(" 40.25 "))), 40.25);
        assert_eq!(parse_amount(Some(&json!("n/a"))), 0.0);
        assert_eq!(parse_amount(Some(&json!(null))), 0.0);
        assert_eq!(parse_amount(None), 0.0);
    }

    #[test]
    fn test_summary_counts_and_average() {
        let rows = rows(json!([
            {"amount": 100, "status": "completed", "created_at": "2024-03-01T10:00:00Z"},
            {"amount": "50", "status": "pending", "created_at": "2024-03-01T23:59:59Z"},
            {"amount": 30, "status": "failed", "created_at": "2024-03-02T00:00:00Z"},
            {"amount": 20, "status": "refunded", "created_at": "2024-03-03T08:00:00Z"},
            {"amount": null, "created_at": "2024-03-03T09:00:00Z"}
        ]));
        let s = summarize(&rows);
        assert_eq!(s.total_transactions, 5);
        assert_eq!(s.total_volume, 200.0);
        assert_eq!(s.completed_transactions, 1);
        assert_eq!(s.pending_transactions, 1);
        assert_eq!(s.failed_transactions, 1);
        assert_eq!(s.average_transaction_value, s.total_volume / 5.0);
        assert_eq!(s.status_counts.values().sum::<u64>(), s.total_transactions);
        assert_eq!(s.status_counts["unknown"], 1);
        assert_eq!(s.status_counts["refunded"], 1);
    }

    #[test]
    fn test_empty_summary_has_zero_average() {
        let s = summarize(&[]);
        assert_eq!(s.total_transactions, 0);
        assert_eq!(s.average_transaction_value, 0.0);
        assert!(s.status_counts.is_empty());
    }

    #[test]
    fn test_daily_volume_by_utc_date() {
        let rows = rows(json!([
            {"amount": 100, "created_at": "2024-03-01T10:00:00Z"},
            {"amount": 50, "created_at": "2024-03-01T23:30:00-02:00"},
            {"amount": 7, "created_at": "not a date"}
        ]));
        let volume = daily_volume(&rows);
        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        assert_eq!(volume.len(), 2);
        assert_eq!(volume[&day(1)], 100.0);
        assert_eq!(volume[&day(2)], 50.0);
    }
}
