//! Worker error reports and their delivery to the site admins.

pub mod mailer;
pub mod worker_error;

pub use mailer::{AdminNotifier, LogNotifier, Notifier, ResendMailer};
#[cfg(any(test, feature = "testing"))]
pub use mailer::{RecordingNotifier, SentMail};
pub use worker_error::{ReportedMessage, SUBJECT, WorkerErrorReport};
