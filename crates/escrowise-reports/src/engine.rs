//! Poll loop: runs the dispatcher on a fixed interval.
//! Without it the dispatcher is invocation-driven (CLI `run-due`, HTTP trigger).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::dispatch::{DispatchSummary, Dispatcher};

/// One poll: dispatch every due report.
pub async fn poll_once(dispatcher: &Dispatcher) -> DispatchSummary {
    dispatcher.run_scheduled_reports(None).await
}

/// Run the poll loop forever. A slow batch delays the next tick instead of
/// stacking ticks behind it.
pub async fn run_report_scheduler(dispatcher: Arc<Dispatcher>, check_interval_secs: u64) {
    let secs = check_interval_secs.max(1);
    tracing::info!("⏰ Report scheduler started (check every {}s)", secs);

    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let summary = poll_once(&dispatcher).await;
        if !summary.failed.is_empty() {
            tracing::warn!(
                "📣 {} of {} scheduled report(s) failed this poll",
                summary.failed.len(),
                summary.attempted
            );
        }
    }
}

/// Spawn [`run_report_scheduler`] as a background task.
pub fn spawn_report_scheduler(
    dispatcher: Arc<Dispatcher>,
    check_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_report_scheduler(dispatcher, check_interval_secs))
}
