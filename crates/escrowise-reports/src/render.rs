//! HTML rendering for report emails.

use std::fmt::Write;

use crate::payload::{FinancialSummary, ReportData, ReportPayload, column_union};
use crate::store::Row;

const TABLE: &str = r#"<table style="border-collapse: collapse; width: 100%;">"#;
const TH: &str = r#"<th style="border: 1px solid #ddd; padding: 8px; text-align: left;">"#;
const TD: &str = r#"<td style="border: 1px solid #ddd; padding: 8px;">"#;
const EMPTY: &str = "No records matched the report parameters.";

/// Escape text for HTML element content and attribute values.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cell text: strings as-is, null empty, nested values as compact JSON.
fn cell_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn render_rows(out: &mut String, columns: &[String], rows: &[Row]) {
    if rows.is_empty() || columns.is_empty() {
        let _ = write!(out, "<p>{EMPTY}</p>");
        return;
    }
    let _ = write!(out, "{TABLE}<thead><tr>");
    for column in columns {
        let _ = write!(out, "{TH}{}</th>", escape_html(column));
    }
    out.push_str("</tr></thead><tbody>");
    for row in rows {
        out.push_str("<tr>");
        for column in columns {
            let _ = write!(out, "{TD}{}</td>", escape_html(&cell_text(row.get(column))));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
}

fn render_pairs(out: &mut String, pairs: impl IntoIterator<Item = (String, String)>) {
    let _ = write!(out, "{TABLE}<tbody>");
    for (label, value) in pairs {
        let _ = write!(
            out,
            "<tr>{TH}{}</th>{TD}{}</td></tr>",
            escape_html(&label),
            escape_html(&value)
        );
    }
    out.push_str("</tbody></table>");
}

fn summary_pairs(summary: &FinancialSummary) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("Total transactions".to_string(), summary.total_transactions.to_string()),
        ("Total volume".to_string(), format!("{:.2}", summary.total_volume)),
        ("Completed".to_string(), summary.completed_transactions.to_string()),
        ("Pending".to_string(), summary.pending_transactions.to_string()),
        ("Failed".to_string(), summary.failed_transactions.to_string()),
        (
            "Average transaction value".to_string(),
            format!("{:.2}", summary.average_transaction_value),
        ),
    ];
    for (status, count) in &summary.status_counts {
        pairs.push((format!("Status: {status}"), count.to_string()));
    }
    pairs
}

/// Render a payload as a self-contained HTML fragment.
pub fn render_report_html(payload: &ReportPayload) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<div style="font-family: Arial, sans-serif;"><h2>{}</h2><p>Generated on: {}</p><div style="margin-top: 20px;">"#,
        escape_html(&payload.report_name),
        payload.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    match &payload.data {
        ReportData::Rows { columns, rows, .. } => render_rows(&mut out, columns, rows),
        ReportData::Financial {
            summary,
            daily_volume,
            rows,
        } => {
            out.push_str("<h3>Summary</h3>");
            render_pairs(&mut out, summary_pairs(summary));

            out.push_str("<h3>Daily volume</h3>");
            if daily_volume.is_empty() {
                let _ = write!(out, "<p>{EMPTY}</p>");
            } else {
                render_pairs(
                    &mut out,
                    daily_volume
                        .iter()
                        .map(|(day, volume)| (day.to_string(), format!("{volume:.2}"))),
                );
            }

            out.push_str("<h3>Transactions</h3>");
            render_rows(&mut out, &column_union(rows), rows);
        }
    }

    out.push_str("</div></div>");
    out
}
