//! End-to-end scheduling scenarios against an in-memory store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use escrowise_core::error::{EscrowiseError, Result};
use escrowise_core::traits::{Notifier, ReportEmail};
use escrowise_reports::{
    DispatchOptions, Dispatcher, Frequency, ReportDb, ReportGenerator, ReportStore,
    ScheduledReport, Table,
};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<ReportEmail>>,
}

#[async_trait]
impl Notifier for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, email: &ReportEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn store() -> Arc<ReportDb> {
    let db = ReportDb::open(Path::new(":memory:")).unwrap();
    let tx = json!({
        "id": "t1", "amount": 120, "fee_amount": 3, "status": "completed",
        "buyer_id": "u1", "seller_id": "u2", "created_at": "2024-01-15T10:00:00Z"
    });
    db.insert_record(Table::Transactions, tx.as_object().unwrap()).unwrap();
    Arc::new(db)
}

fn dispatcher(store: &Arc<ReportDb>, outbox: &Arc<Outbox>, now: DateTime<Utc>) -> Dispatcher {
    let generator = Arc::new(ReportGenerator::new(store.clone()));
    Dispatcher::new(store.clone(), generator, outbox.clone(), DispatchOptions::default())
        .with_clock(Arc::new(move || now))
}

fn report(
    store: &ReportDb,
    report_type: &str,
    frequency: Frequency,
    next_run_at: DateTime<Utc>,
) -> ScheduledReport {
    let mut r = ScheduledReport::new(
        report_type,
        json!({"startDate": "2024-01-01"}),
        vec!["finance@example.com".into()],
        frequency,
        utc(2024, 1, 1, 0),
    )
    .unwrap();
    r.next_run_at = next_run_at;
    store.insert_report(&r).unwrap();
    r
}

#[tokio::test]
async fn valid_and_corrupted_reports_in_one_batch() {
    let store = store();
    let outbox = Arc::new(Outbox::default());
    let now = utc(2024, 2, 1, 9);

    let a = report(&store, "transactions", Frequency::Daily, utc(2024, 2, 1, 8));
    let b = report(&store, "bogus_type", Frequency::Daily, utc(2024, 2, 1, 7));

    let summary = dispatcher(&store, &outbox, now).run_scheduled_reports(None).await;
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, vec![a.id.clone()]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].id, b.id);
    assert!(summary.failed[0].error.contains("Unknown report type: bogus_type"));

    let a_after = store.get_report(&a.id).unwrap().unwrap();
    assert_eq!(a_after.last_run_at, Some(now));
    assert_eq!(a_after.next_run_at, utc(2024, 2, 2, 9));

    let b_after = store.get_report(&b.id).unwrap().unwrap();
    assert_eq!(b_after.last_run_at, None);
    assert_eq!(b_after.next_run_at, utc(2024, 2, 1, 7));

    let sent = outbox.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Escrowise Report: transactions");
    assert!(sent[0].html.contains(">t1</td>"));
}

#[tokio::test]
async fn run_now_ignores_active_flag_and_schedule() {
    let store = store();
    let outbox = Arc::new(Outbox::default());
    let now = utc(2024, 2, 1, 9);

    let mut r = report(&store, "financial", Frequency::Weekly, utc(2030, 1, 1, 0));
    r.is_active = false;
    store.update_report(&r).unwrap();

    let refreshed = dispatcher(&store, &outbox, now).run_report_now(&r.id).await.unwrap();
    assert_eq!(refreshed.last_run_at, Some(now));
    assert_eq!(refreshed.next_run_at, utc(2024, 2, 8, 9));
    assert!(!refreshed.is_active);
    assert_eq!(outbox.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn late_monthly_run_reschedules_from_now() {
    let store = store();
    let outbox = Arc::new(Outbox::default());
    let now = Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap();

    let r = report(&store, "users", Frequency::Monthly, utc(2024, 1, 31, 9));
    let summary = dispatcher(&store, &outbox, now).run_scheduled_reports(None).await;
    assert_eq!(summary.succeeded.len(), 1);

    let after = store.get_report(&r.id).unwrap().unwrap();
    assert_eq!(after.next_run_at, utc(2024, 3, 10, 12));
    assert_ne!(after.next_run_at, utc(2024, 2, 29, 9));
}

#[tokio::test]
async fn overlapping_invocations_send_once() {
    let store = store();
    let outbox = Arc::new(Outbox::default());
    let now = utc(2024, 2, 1, 9);
    let r = report(&store, "transactions", Frequency::Daily, utc(2024, 2, 1, 8));

    // A second dispatcher already holds the row.
    assert!(store.try_claim(&r.id, now, utc(2024, 2, 1, 10)).unwrap());
    let summary = dispatcher(&store, &outbox, now).run_scheduled_reports(None).await;
    assert_eq!(summary.failed.len(), 1);
    assert!(outbox.sent.lock().unwrap().is_empty());

    let err = dispatcher(&store, &outbox, now).run_report_now(&r.id).await.unwrap_err();
    assert!(matches!(err, EscrowiseError::ReportInProgress(_)));

    // Once the lease expires the report goes out.
    let later = utc(2024, 2, 1, 11);
    let summary = dispatcher(&store, &outbox, later).run_scheduled_reports(None).await;
    assert_eq!(summary.succeeded, vec![r.id.clone()]);
    assert_eq!(outbox.sent.lock().unwrap().len(), 1);
}
