//! Delivery seam between the dispatcher and concrete transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A rendered report ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Delivers rendered reports. Any error means "this run failed"; the
/// dispatcher will not reschedule the report.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name used in logs and the delivery log (e.g. "smtp").
    fn name(&self) -> &str;

    /// Send one message to all recipients.
    async fn send(&self, email: &ReportEmail) -> Result<()>;
}
