//! Report dispatcher: generates, renders and delivers scheduled reports,
//! then reschedules them.
//!
//! Each report runs in isolation: one failure is logged and recorded, the
//! rest of the batch continues. A failed report keeps its `next_run_at`, so
//! the next poll picks it up again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::generator::ReportGenerator;
use crate::render::render_report_html;
use crate::schedule::ScheduledReport;
use crate::store::{DeliveryRecord, DeliveryStatus, ReportStore};
use escrowise_core::config::SchedulerConfig;
use escrowise_core::error::{EscrowiseError, Result};
use escrowise_core::traits::{Notifier, ReportEmail};

/// Source of "now" for a dispatch run.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Upper bound on generate + render + send for one report.
    pub report_timeout: Duration,
    /// How long an invocation holds its claim on a report row.
    pub claim_lease: Duration,
    /// Email subject is "<prefix>: <report_type>".
    pub subject_prefix: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl DispatchOptions {
    /// The claim lease never ends before the report timeout, otherwise a
    /// slow delivery could be picked up again by an overlapping poll.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let report_timeout = config.report_timeout_secs.max(1);
        let mut claim_lease = config.claim_lease_secs.max(1);
        if claim_lease < report_timeout {
            tracing::warn!(
                "claim_lease_secs ({claim_lease}) is shorter than report_timeout_secs ({report_timeout}); using {report_timeout}"
            );
            claim_lease = report_timeout;
        }
        Self {
            report_timeout: Duration::from_secs(report_timeout),
            claim_lease: Duration::from_secs(claim_lease),
            subject_prefix: config.subject_prefix.clone(),
        }
    }
}

/// A report that failed in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedReport {
    pub id: String,
    pub report_type: String,
    pub error: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    /// IDs of reports delivered and rescheduled.
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedReport>,
}

pub struct Dispatcher {
    store: Arc<dyn ReportStore>,
    generator: Arc<ReportGenerator>,
    notifier: Arc<dyn Notifier>,
    options: DispatchOptions,
    clock: Clock,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ReportStore>,
        generator: Arc<ReportGenerator>,
        notifier: Arc<dyn Notifier>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            generator,
            notifier,
            options,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock (tests, replays).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn generator(&self) -> &Arc<ReportGenerator> {
        &self.generator
    }

    pub fn notifier_name(&self) -> &str {
        self.notifier.name()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)().trunc_subsecs(0)
    }

    /// Dispatch one batch. `None` or an empty list runs every due report;
    /// an explicit list runs exactly those reports, due or not.
    pub async fn run_scheduled_reports(
        &self,
        explicit: Option<Vec<ScheduledReport>>,
    ) -> DispatchSummary {
        let now = self.now();
        let reports = match explicit {
            Some(list) if !list.is_empty() => list,
            _ => match self.store.due_reports(now) {
                Ok(due) => due,
                Err(e) => {
                    tracing::error!("❌ Could not load due reports: {e}");
                    return DispatchSummary::default();
                }
            },
        };

        let mut summary = DispatchSummary::default();
        for report in &reports {
            summary.attempted += 1;
            match self.run_one(report, now).await {
                Ok(next) => {
                    tracing::info!(
                        "📊 Report {} ({}) sent to {} recipient(s), next run {}",
                        report.id,
                        report.report_type,
                        report.recipients.len(),
                        next
                    );
                    summary.succeeded.push(report.id.clone());
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!("⚠️ Report {} ({}) failed: {e}", report.id, report.report_type);
                    } else {
                        tracing::error!("❌ Report {} ({}) failed: {e}", report.id, report.report_type);
                    }
                    summary.failed.push(FailedReport {
                        id: report.id.clone(),
                        report_type: report.report_type.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if summary.attempted > 0 {
            tracing::info!(
                "Dispatch finished: {} attempted, {} sent, {} failed",
                summary.attempted,
                summary.succeeded.len(),
                summary.failed.len()
            );
        }
        summary
    }

    /// Run one report immediately, regardless of `is_active` and
    /// `next_run_at`. Returns the rescheduled row.
    pub async fn run_report_now(&self, id: &str) -> Result<ScheduledReport> {
        let report = self
            .store
            .get_report(id)?
            .ok_or_else(|| EscrowiseError::ReportNotFound(id.to_string()))?;

        let now = self.now();
        self.run_one(&report, now).await?;

        self.store
            .get_report(id)?
            .ok_or_else(|| EscrowiseError::ReportNotFound(id.to_string()))
    }

    /// Claim, deliver and reschedule a single report. Returns the new `next_run_at`.
    async fn run_one(&self, report: &ScheduledReport, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let subject = format!("{}: {}", self.options.subject_prefix, report.report_type);
        let outcome = self.attempt(report, now, &subject).await;

        // Another invocation owns the row; nothing was attempted here.
        if !matches!(outcome, Err(EscrowiseError::ReportInProgress(_))) {
            self.record_delivery(report, &subject, now, outcome.as_ref().err());
        }
        outcome
    }

    async fn attempt(
        &self,
        report: &ScheduledReport,
        now: DateTime<Utc>,
        subject: &str,
    ) -> Result<DateTime<Utc>> {
        if !report.has_recipients() {
            return Err(EscrowiseError::NoRecipients(report.id.clone()));
        }
        let next = report.frequency.advance(now)?;

        let lease = chrono::Duration::from_std(self.options.claim_lease)
            .map_err(|e| EscrowiseError::Config(format!("claim lease: {e}")))?;
        let lease_until = now
            .checked_add_signed(lease)
            .ok_or_else(|| EscrowiseError::Config("claim lease overflows".into()))?;
        if !self.store.try_claim(&report.id, now, lease_until)? {
            return Err(match self.store.get_report(&report.id)? {
                Some(_) => EscrowiseError::ReportInProgress(report.id.clone()),
                None => EscrowiseError::ReportNotFound(report.id.clone()),
            });
        }

        let delivered = tokio::time::timeout(self.options.report_timeout, self.deliver(report, now, subject))
            .await
            .unwrap_or_else(|_| {
                Err(EscrowiseError::Timeout {
                    id: report.id.clone(),
                    secs: self.options.report_timeout.as_secs(),
                })
            });

        match delivered {
            Ok(()) => {
                if let Err(e) = self.store.record_run(&report.id, now, next) {
                    self.release(&report.id);
                    return Err(e);
                }
                Ok(next)
            }
            Err(e) => {
                self.release(&report.id);
                Err(e)
            }
        }
    }

    async fn deliver(&self, report: &ScheduledReport, now: DateTime<Utc>, subject: &str) -> Result<()> {
        let generator = self.generator.clone();
        let report_type = report.report_type.clone();
        let parameters = report.parameters.clone();
        // Store access is synchronous; keep it off the async workers.
        let payload = tokio::task::spawn_blocking(move || {
            generator.generate_at(&report_type, &parameters, now)
        })
        .await
        .map_err(|e| {
            EscrowiseError::query(format!("{} report", report.report_type), format!("generator task: {e}"))
        })??;

        let email = ReportEmail {
            to: report.recipients.clone(),
            subject: subject.to_string(),
            html: render_report_html(&payload),
        };
        self.notifier.send(&email).await
    }

    fn release(&self, id: &str) {
        if let Err(e) = self.store.release_claim(id) {
            tracing::warn!("Could not release claim on report {id}: {e}");
        }
    }

    fn record_delivery(
        &self,
        report: &ScheduledReport,
        subject: &str,
        now: DateTime<Utc>,
        error: Option<&EscrowiseError>,
    ) {
        let record = DeliveryRecord {
            report_id: report.id.clone(),
            report_type: report.report_type.clone(),
            recipients: report.recipients.clone(),
            subject: subject.to_string(),
            transport: self.notifier.name().to_string(),
            status: if error.is_none() {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            error: error.map(|e| e.to_string()),
            created_at: now,
        };
        if let Err(e) = self.store.log_delivery(&record) {
            tracing::warn!("Could not log delivery for report {}: {e}", report.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ReportDb;
    use crate::schedule::Frequency;
    use crate::testing::{RecordingNotifier, seeded_store};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<ReportDb>,
        notifier: Arc<RecordingNotifier>,
        dispatcher: Dispatcher,
    }

    fn fixture(notifier: RecordingNotifier, options: DispatchOptions, now: DateTime<Utc>) -> Fixture {
        let store = Arc::new(seeded_store());
        let notifier = Arc::new(notifier);
        let generator = Arc::new(ReportGenerator::new(store.clone()));
        let dispatcher = Dispatcher::new(store.clone(), generator, notifier.clone(), options)
            .with_clock(Arc::new(move || now));
        Fixture {
            store,
            notifier,
            dispatcher,
        }
    }

    fn scheduled(store: &ReportDb, report_type: &str, frequency: Frequency, next: DateTime<Utc>) -> ScheduledReport {
        let mut report = ScheduledReport::new(
            report_type,
            json!({}),
            vec!["ops@example.com".into()],
            frequency,
            at(1, 0),
        )
        .unwrap();
        report.next_run_at = next;
        store.insert_report(&report).unwrap();
        report
    }

    #[test]
    fn test_claim_lease_covers_report_timeout() {
        let short = SchedulerConfig {
            report_timeout_secs: 120,
            claim_lease_secs: 30,
            ..SchedulerConfig::default()
        };
        let options = DispatchOptions::from_config(&short);
        assert_eq!(options.report_timeout, Duration::from_secs(120));
        assert_eq!(options.claim_lease, Duration::from_secs(120));

        let long = SchedulerConfig {
            report_timeout_secs: 60,
            claim_lease_secs: 900,
            ..SchedulerConfig::default()
        };
        assert_eq!(DispatchOptions::from_config(&long).claim_lease, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_due_report_sent_and_rescheduled_from_now() {
        let now = at(10, 9);
        let f = fixture(RecordingNotifier::default(), DispatchOptions::default(), now);
        let r = scheduled(&f.store, "transactions", Frequency::Weekly, at(8, 6));
        let later = scheduled(&f.store, "users", Frequency::Daily, at(11, 0));

        let summary = f.dispatcher.run_scheduled_reports(None).await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, vec![r.id.clone()]);

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Escrowise Report: transactions");
        assert_eq!(sent[0].to, vec!["ops@example.com"]);
        assert!(sent[0].html.contains("Transactions Report"));

        let stored = f.store.get_report(&r.id).unwrap().unwrap();
        assert_eq!(stored.last_run_at, Some(now));
        assert_eq!(stored.next_run_at, at(17, 9));
        assert_eq!(f.store.get_report(&later.id).unwrap().unwrap().next_run_at, at(11, 0));

        let log = f.store.recent_deliveries(5).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, DeliveryStatus::Sent);
        assert_eq!(log[0].transport, "recording");
    }

    #[tokio::test]
    async fn test_notifier_failure_is_isolated() {
        let now = at(10, 9);
        let f = fixture(RecordingNotifier::failing_on("users"), DispatchOptions::default(), now);
        let ok = scheduled(&f.store, "transactions", Frequency::Daily, at(10, 0));
        let broken = scheduled(&f.store, "users", Frequency::Daily, at(9, 0));
        let also_ok = scheduled(&f.store, "financial", Frequency::Monthly, at(10, 8));

        let summary = f.dispatcher.run_scheduled_reports(None).await;
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].id, broken.id);
        assert!(summary.failed[0].error.contains("smtp 421"));

        let unchanged = f.store.get_report(&broken.id).unwrap().unwrap();
        assert_eq!(unchanged.next_run_at, at(9, 0));
        assert_eq!(unchanged.last_run_at, None);
        // Claim released, so the next poll can retry.
        assert!(f.store.try_claim(&broken.id, now, at(10, 10)).unwrap());

        assert_eq!(f.store.get_report(&ok.id).unwrap().unwrap().next_run_at, at(11, 9));
        assert_eq!(
            f.store.get_report(&also_ok.id).unwrap().unwrap().next_run_at,
            Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap()
        );

        let log = f.store.recent_deliveries(10).unwrap();
        assert_eq!(log.iter().filter(|d| d.status == DeliveryStatus::Failed).count(), 1);
    }

    #[tokio::test]
    async fn test_missing_recipients_fail_without_sending() {
        let now = at(10, 9);
        let f = fixture(RecordingNotifier::default(), DispatchOptions::default(), now);
        let mut r = scheduled(&f.store, "users", Frequency::Daily, at(10, 0));
        r.recipients.clear();
        f.store.update_report(&r).unwrap();

        let summary = f.dispatcher.run_scheduled_reports(None).await;
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].error.contains("no recipients"));
        assert!(f.notifier.sent().is_empty());
        assert_eq!(f.store.get_report(&r.id).unwrap().unwrap().next_run_at, at(10, 0));
    }

    #[tokio::test]
    async fn test_claimed_report_is_in_progress() {
        let now = at(10, 9);
        let f = fixture(RecordingNotifier::default(), DispatchOptions::default(), now);
        let r = scheduled(&f.store, "users", Frequency::Daily, at(10, 0));
        assert!(f.store.try_claim(&r.id, now, at(10, 10)).unwrap());

        let err = f.dispatcher.run_report_now(&r.id).await.unwrap_err();
        assert!(matches!(err, EscrowiseError::ReportInProgress(_)));
        assert!(f.notifier.sent().is_empty());
        // The other holder's claim is untouched.
        assert!(!f.store.try_claim(&r.id, now, at(10, 10)).unwrap());
        assert!(f.store.recent_deliveries(5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_delivery_times_out() {
        let now = at(10, 9);
        let options = DispatchOptions {
            report_timeout: Duration::from_millis(20),
            ..DispatchOptions::default()
        };
        let f = fixture(RecordingNotifier::slow(Duration::from_millis(500)), options, now);
        let r = scheduled(&f.store, "users", Frequency::Daily, at(10, 0));

        let err = f.dispatcher.run_report_now(&r.id).await.unwrap_err();
        assert!(matches!(err, EscrowiseError::Timeout { .. }));
        assert_eq!(f.store.get_report(&r.id).unwrap().unwrap().next_run_at, at(10, 0));
        assert!(f.store.try_claim(&r.id, now, at(10, 10)).unwrap());
    }

    #[tokio::test]
    async fn test_explicit_list_skips_due_gate() {
        let now = at(10, 9);
        let f = fixture(RecordingNotifier::default(), DispatchOptions::default(), now);
        let mut r = scheduled(&f.store, "disputes", Frequency::Daily, at(30, 0));
        r.is_active = false;
        f.store.update_report(&r).unwrap();

        assert_eq!(f.dispatcher.run_scheduled_reports(None).await.attempted, 0);
        let summary = f.dispatcher.run_scheduled_reports(Some(vec![r.clone()])).await;
        assert_eq!(summary.succeeded, vec![r.id.clone()]);
        assert_eq!(f.store.get_report(&r.id).unwrap().unwrap().next_run_at, at(11, 9));
    }

    #[tokio::test]
    async fn test_run_now_unknown_id() {
        let f = fixture(RecordingNotifier::default(), DispatchOptions::default(), at(10, 9));
        let err = f.dispatcher.run_report_now("nope").await.unwrap_err();
        assert!(matches!(err, EscrowiseError::ReportNotFound(_)));
    }
}
