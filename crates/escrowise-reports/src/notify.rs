//! Fallback notifier used when no outbound transport is configured.

use async_trait::async_trait;

use escrowise_core::error::Result;
use escrowise_core::traits::{Notifier, ReportEmail};

/// Logs each report instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &ReportEmail) -> Result<()> {
        tracing::info!(
            "📧 [log] '{}' → {} ({} bytes of HTML)",
            email.subject,
            email.to.join(", "),
            email.html.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        let email = ReportEmail {
            to: vec!["ops@example.com".into()],
            subject: "Escrowise Report: users".into(),
            html: "<p>hi</p>".into(),
        };
        assert!(LogNotifier.send(&email).await.is_ok());
        assert_eq!(LogNotifier.name(), "log");
    }
}
