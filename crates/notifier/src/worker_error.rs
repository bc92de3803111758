//! Plain-text report sent to the admins when a queue worker fails on a message.
//!
//! The report has three sections separated by a line of dashes:
//! 1. a status sentence saying whether the worker is still running,
//! 2. the message's AMQP metadata and body,
//! 3. the traceback, stamped with the time of rendering.
//!
//! Absent message fields render as `None`. Everything is interpolated as-is
//! except `message_id` and `timestamp`, which are HTML-escaped.

use askama::Template;
use chrono::{DateTime, Utc};

use hare_common::error::{HareError, Result};
use hare_common::types::{Message, MessageProperties};

/// Subject line of the admin email.
pub const SUBJECT: &str = "Queue worker error";

/// RFC 2822 style, e.g. `Thu, 21 Dec 2000 16:01:07 +0000`.
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

const NONE: &str = "None";

/// The message fields shown in a report, already formatted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportedMessage {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub delivery_mode: Option<String>,
    pub priority: Option<String>,
    pub expiration: Option<String>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub body: Option<String>,
}

impl ReportedMessage {
    pub fn from_properties(properties: &MessageProperties, body: Option<String>) -> Self {
        Self {
            message_id: properties.message_id.clone(),
            timestamp: properties.timestamp.map(format_amqp_timestamp),
            delivery_mode: properties.delivery_mode.map(|v| v.to_string()),
            priority: properties.priority.map(|v| v.to_string()),
            expiration: properties.expiration.clone(),
            kind: properties.kind.clone(),
            user_id: properties.user_id.clone(),
            app_id: properties.app_id.clone(),
            body,
        }
    }

    pub fn from_message<B>(message: &Message<B>, body: Option<String>) -> Self {
        Self::from_properties(&message.properties, body)
    }
}

/// AMQP timestamps are seconds since the epoch.
fn format_amqp_timestamp(seconds: u64) -> String {
    i64::try_from(seconds)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

#[derive(Template)]
#[template(path = "worker_error.txt")]
struct WorkerErrorTemplate<'a> {
    fault_tolerant: bool,
    now: &'a str,
    message_id: &'a str,
    timestamp: &'a str,
    delivery_mode: &'a str,
    priority: &'a str,
    expiration: &'a str,
    kind: &'a str,
    user_id: &'a str,
    app_id: &'a str,
    body: &'a str,
    traceback: &'a str,
}

fn or_none(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or(NONE)
}

/// Everything needed to render one error report.
#[derive(Debug, Clone)]
pub struct WorkerErrorReport {
    message: ReportedMessage,
    traceback: String,
    fault_tolerant: bool,
    rendered_at: DateTime<Utc>,
}

impl WorkerErrorReport {
    /// A report stamped with the current time.
    pub fn new(message: ReportedMessage, traceback: impl Into<String>, fault_tolerant: bool) -> Self {
        Self {
            message,
            traceback: traceback.into(),
            fault_tolerant,
            rendered_at: Utc::now(),
        }
    }

    /// Stamp the report with `time` instead of now.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.rendered_at = time;
        self
    }

    pub fn fault_tolerant(&self) -> bool {
        self.fault_tolerant
    }

    pub fn render(&self) -> Result<String> {
        let now = self.rendered_at.format(TIMESTAMP_FORMAT).to_string();
        let m = &self.message;

        WorkerErrorTemplate {
            fault_tolerant: self.fault_tolerant,
            now: &now,
            message_id: or_none(&m.message_id),
            timestamp: or_none(&m.timestamp),
            delivery_mode: or_none(&m.delivery_mode),
            priority: or_none(&m.priority),
            expiration: or_none(&m.expiration),
            kind: or_none(&m.kind),
            user_id: or_none(&m.user_id),
            app_id: or_none(&m.app_id),
            body: or_none(&m.body),
            traceback: &self.traceback,
        }
        .render()
        .map_err(|e| HareError::Render(e.to_string()))
    }
}
