//! # Escrowise Reports
//!
//! Scheduled report generation and delivery for the Escrowise admin platform.
//!
//! ## Architecture
//! ```text
//! Dispatcher (poll loop, CLI run-due, or HTTP trigger)
//!   ├── ReportStore::due_reports(now)  ← SQLite (ReportDb)
//!   └── per report, isolated:
//!         claim → ReportGenerator (registry by report_type)
//!                   ├── transactions / users / disputes / financial
//!                   ├── dispute_analysis / user_activity / revenue_analysis
//!                   └── payouts / fees
//!               → render_report_html → Notifier (SMTP or log)
//!               → record_run (next_run_at = now + frequency) or release claim
//! ```

pub mod analysis;
pub mod builtin;
pub mod dispatch;
pub mod engine;
pub mod financial;
pub mod generator;
pub mod notify;
pub mod params;
pub mod payload;
pub mod payouts;
pub mod persistence;
pub mod render;
pub mod schedule;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{DispatchOptions, DispatchSummary, Dispatcher, FailedReport};
pub use engine::spawn_report_scheduler;
pub use generator::{ReportGenerator, ReportHandler};
pub use notify::LogNotifier;
pub use params::ReportParams;
pub use payload::{FinancialSummary, ReportData, ReportPayload};
pub use persistence::ReportDb;
pub use render::render_report_html;
pub use schedule::{Frequency, ScheduledReport};
pub use store::{DeliveryRecord, DeliveryStatus, RecordQuery, ReportStore, Row, Table};
