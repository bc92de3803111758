use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Master switch for broker I/O. When false, connections are disabled and
    /// publishers/consumers silently do nothing.
    pub enable_mq: bool,

    /// Broker address as `host:port` (default: localhost:5672)
    pub amqp_host: String,

    /// Broker user (default: guest)
    pub amqp_user: String,

    /// Broker password (default: guest)
    pub amqp_password: String,

    /// Broker virtual host (default: /)
    pub amqp_vhost: String,

    /// PostgreSQL connection string. Workers run without transactions when unset.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Recipients of worker error reports
    pub admin_emails: Vec<String>,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Prefix prepended to every admin email subject (default: "[Hare] ")
    pub email_subject_prefix: String,

    /// Queue consumed by the worker binary
    pub worker_queue: Option<String>,

    /// Exchange the worker queue is bound to
    pub worker_exchange: Option<String>,

    /// Routing key used when binding the worker queue
    pub worker_routing_key: Option<String>,

    /// Whether the worker keeps running after a message fails (default: true)
    pub worker_fault_tolerant: bool,

    /// Broker prefetch window of the worker. Unbounded when unset.
    pub worker_prefetch: Option<u16>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            enable_mq: parse_bool("ENABLE_MQ", false)?,
            amqp_host: std::env::var("AMQP_HOST")
                .unwrap_or_else(|_| "localhost:5672".to_string()),
            amqp_user: std::env::var("AMQP_USER").unwrap_or_else(|_| "guest".to_string()),
            amqp_password: std::env::var("AMQP_PASSWORD").unwrap_or_else(|_| "guest".to_string()),
            amqp_vhost: std::env::var("AMQP_VHOST").unwrap_or_else(|_| "/".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            admin_emails: std::env::var("ADMINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            email_subject_prefix: std::env::var("EMAIL_SUBJECT_PREFIX")
                .unwrap_or_else(|_| "[Hare] ".to_string()),
            worker_queue: std::env::var("HARE_QUEUE").ok(),
            worker_exchange: std::env::var("HARE_EXCHANGE").ok(),
            worker_routing_key: std::env::var("HARE_ROUTING_KEY").ok(),
            worker_fault_tolerant: parse_bool("HARE_FAULT_TOLERANT", true)?,
            worker_prefetch: std::env::var("HARE_PREFETCH")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| anyhow::anyhow!("HARE_PREFETCH must be a valid u16"))?,
        })
    }
}

fn parse_bool(var: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(var) {
        Ok(value) => parse_flag(&value)
            .ok_or_else(|| anyhow::anyhow!("{} must be a valid bool", var)),
        Err(_) => Ok(default),
    }
}

/// Accepts the usual spellings of a boolean flag.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
