//! Email channel: sends rendered reports via SMTP (async lettre).
//!
//! Messages are multipart/alternative: a plain-text fallback derived from the
//! HTML, then the HTML itself. Works with Gmail app passwords, Outlook and
//! custom relays that speak STARTTLS.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use escrowise_core::config::SmtpConfig;
use escrowise_core::error::{EscrowiseError, Result};
use escrowise_core::traits::{Notifier, ReportEmail};

/// SMTP notifier.
pub struct EmailNotifier {
    config: SmtpConfig,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Sender address; falls back to the login name (Gmail style).
    fn from_address(&self) -> &str {
        if self.config.from_address.is_empty() {
            &self.config.username
        } else {
            &self.config.from_address
        }
    }

    /// Build the MIME message without touching the network.
    pub fn build_message(&self, email: &ReportEmail) -> Result<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.from_address())
            .parse()
            .map_err(|e| EscrowiseError::Notifier(format!("Invalid from: {e}")))?;

        if email.to.is_empty() {
            return Err(EscrowiseError::Notifier("no recipients".into()));
        }

        let mut builder = Message::builder().from(from).subject(email.subject.as_str());
        for addr in &email.to {
            let to: Mailbox = addr
                .trim()
                .parse()
                .map_err(|e| EscrowiseError::Notifier(format!("Invalid to '{addr}': {e}")))?;
            builder = builder.to(to);
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                html_to_text(&email.html),
                email.html.clone(),
            ))
            .map_err(|e| EscrowiseError::Notifier(format!("Build email: {e}")))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| EscrowiseError::Notifier(format!("SMTP relay: {e}")))?
            .port(self.config.port);
        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &ReportEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| EscrowiseError::Notifier(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email '{}' sent to: {}", email.subject, email.to.join(", "));
        Ok(())
    }
}

/// Crude HTML → text for the plain part: cells become tabs, rows and blocks
/// become lines, tags are dropped and the common entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('>') else {
            rest = &rest[start..];
            break;
        };
        let tag = rest[start + 1..start + end].to_ascii_lowercase();
        let name = tag.trim_start_matches('/').split_whitespace().next().unwrap_or("");
        match name {
            "td" | "th" if tag.starts_with('/') => out.push('\t'),
            "tr" | "p" | "h2" | "h3" | "div" | "br" if tag.starts_with('/') || name == "br" => {
                out.push('\n')
            }
            _ => {}
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);

    let decoded = out
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(|l| l.trim_end_matches('\t').trim_end())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
