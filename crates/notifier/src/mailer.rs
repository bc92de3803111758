//! Delivery of reports to the site admins.
//!
//! Email goes through the Resend HTTP API. Without email settings, reports
//! are written to the log instead so they are never silently lost.

use std::future::Future;

use serde::Serialize;

use hare_common::config::AppConfig;
use hare_common::error::{HareError, Result};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Something that can get a message in front of the admins.
pub trait AdminNotifier: Send + Sync {
    fn mail_admins(&self, subject: &str, message: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Request body of `POST /emails`.
#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: &'a [String],
    subject: String,
    text: &'a str,
}

/// Sends admin mail through the Resend API.
#[derive(Debug, Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    admins: Vec<String>,
    subject_prefix: String,
    endpoint: String,
}

impl ResendMailer {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>, admins: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
            admins,
            subject_prefix: String::new(),
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Point at a different API base (self-hosted relay, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn admins(&self) -> &[String] {
        &self.admins
    }

    fn email<'a>(&'a self, subject: &str, message: &'a str) -> ResendEmail<'a> {
        ResendEmail {
            from: &self.from,
            to: &self.admins,
            subject: format!("{}{}", self.subject_prefix, subject),
            text: message,
        }
    }
}

impl AdminNotifier for ResendMailer {
    async fn mail_admins(&self, subject: &str, message: &str) -> Result<()> {
        if self.admins.is_empty() {
            tracing::debug!(subject, "No admins configured, skipping email");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.email(subject, message))
            .send()
            .await
            .map_err(|e| HareError::Notification(format!("email request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(HareError::Notification(format!(
                "email API returned {}: {}",
                status, detail
            )));
        }

        tracing::info!(
            subject,
            recipients = self.admins.len(),
            "Admin email sent"
        );
        Ok(())
    }
}

/// Writes reports to the log. Used when email delivery is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl AdminNotifier for LogNotifier {
    async fn mail_admins(&self, subject: &str, message: &str) -> Result<()> {
        tracing::error!(subject, report = message, "Admin notification (email not configured)");
        Ok(())
    }
}

/// The notifier picked from configuration.
#[derive(Debug, Clone)]
pub enum Notifier {
    Resend(ResendMailer),
    Log(LogNotifier),
}

impl Notifier {
    /// Resend when both `RESEND_API_KEY` and `EMAIL_FROM` are set, the log
    /// otherwise.
    pub fn from_config(config: &AppConfig) -> Self {
        match (&config.resend_api_key, &config.email_from) {
            (Some(api_key), Some(from)) => {
                if config.admin_emails.is_empty() {
                    tracing::warn!("Email delivery configured but ADMINS is empty");
                }
                Notifier::Resend(
                    ResendMailer::new(api_key, from, config.admin_emails.clone())
                        .with_subject_prefix(&config.email_subject_prefix),
                )
            }
            _ => {
                tracing::warn!("RESEND_API_KEY/EMAIL_FROM not set, admin reports go to the log");
                Notifier::Log(LogNotifier)
            }
        }
    }
}

impl AdminNotifier for Notifier {
    async fn mail_admins(&self, subject: &str, message: &str) -> Result<()> {
        match self {
            Notifier::Resend(mailer) => mailer.mail_admins(subject, message).await,
            Notifier::Log(log) => log.mail_admins(subject, message).await,
        }
    }
}

/// A mail captured by [`RecordingNotifier`].
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub subject: String,
    pub message: String,
}

/// Keeps mails in memory, optionally failing every send.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Arc<std::sync::Mutex<Vec<SentMail>>>,
    fail: bool,
}

#[cfg(any(test, feature = "testing"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "testing"))]
impl AdminNotifier for RecordingNotifier {
    async fn mail_admins(&self, subject: &str, message: &str) -> Result<()> {
        if self.fail {
            return Err(HareError::Notification("mail relay unavailable".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMail {
                subject: subject.to_string(),
                message: message.to_string(),
            });
        }
        Ok(())
    }
}
