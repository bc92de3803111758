//! Connections to the AMQP server.
//!
//! `AmqpConnection` handles follow the identity map pattern: all handles
//! opened with equal parameters share a single broker connection, which is
//! closed when the last handle closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{Mutex, OnceCell};

use hare_common::config::AppConfig;
use hare_common::error::{HareError, Result};

use crate::registry::ConnectionRegistry;

const CLOSE_REPLY_CODE: u16 = 200;
const CLOSE_REPLY_TEXT: &str = "closing";
const DEFAULT_PORT: u16 = 5672;

/// Parameters identifying a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionParams {
    /// `host:port`
    pub host: String,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl ConnectionParams {
    /// Parameters taken from the `AMQP_*` settings.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.amqp_host.clone(),
            user: config.amqp_user.clone(),
            password: config.amqp_password.clone(),
            vhost: config.amqp_vhost.clone(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Key under which the shared connection is registered.
    pub fn signature(&self) -> ConnectionSignature {
        ConnectionSignature(self.clone())
    }

    /// Broker URI for these parameters. `host` may omit the port (5672).
    pub fn amqp_uri(&self) -> Result<AMQPUri> {
        let (host, port) = match self.host.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    HareError::Config(format!("invalid port in AMQP host {:?}", self.host))
                })?;
                (host, port)
            }
            None => (self.host.as_str(), DEFAULT_PORT),
        };

        Ok(AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: host.to_string(),
                port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        })
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost:5672".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }
    }
}

/// Hashable identity of a connection. Equal parameters give equal signatures.
///
/// `Display` omits the password.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSignature(ConnectionParams);

impl ConnectionSignature {
    pub fn params(&self) -> &ConnectionParams {
        &self.0
    }
}

impl std::fmt::Display for ConnectionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}{}", self.0.user, self.0.host, self.0.vhost)
    }
}

/// Process-wide registry of open broker connections.
pub fn shared_registry() -> &'static ConnectionRegistry<ConnectionSignature, Connection> {
    static REGISTRY: OnceLock<ConnectionRegistry<ConnectionSignature, Connection>> =
        OnceLock::new();
    REGISTRY.get_or_init(ConnectionRegistry::new)
}

/// A handle onto a (possibly shared) broker connection.
///
/// A disabled handle performs no broker I/O: it has no connection and hands
/// out no channels.
pub struct AmqpConnection {
    signature: ConnectionSignature,
    connection: Option<Arc<Connection>>,
    /// Every channel created through this handle.
    channels: Mutex<Vec<Channel>>,
    default_channel: OnceCell<Option<Channel>>,
    closed: AtomicBool,
}

impl AmqpConnection {
    /// Open a handle. With `enabled == false` no connection is made.
    pub async fn open(params: ConnectionParams, enabled: bool) -> Result<Self> {
        let signature = params.signature();

        let connection = if enabled {
            let uri = params.amqp_uri()?;
            let label = signature.to_string();
            let connection = shared_registry()
                .acquire(&signature, || async move {
                    tracing::debug!(connection = %label, "creating new amqp connection");
                    Connection::connect_uri(uri, ConnectionProperties::default()).await
                })
                .await?;
            Some(connection)
        } else {
            tracing::debug!(connection = %signature, "message queue disabled, connection not opened");
            None
        };

        Ok(Self {
            signature,
            connection,
            channels: Mutex::new(Vec::new()),
            default_channel: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a handle using the `AMQP_*` settings and `ENABLE_MQ`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        Self::open(ConnectionParams::from_config(config), config.enable_mq).await
    }

    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }

    pub fn signature(&self) -> &ConnectionSignature {
        &self.signature
    }

    /// The underlying broker connection, if enabled.
    pub fn inner(&self) -> Option<&Connection> {
        self.connection.as_deref()
    }

    /// Create a new channel bound to this connection. `None` when disabled.
    pub async fn new_channel(&self) -> Result<Option<Channel>> {
        let Some(connection) = &self.connection else {
            return Ok(None);
        };

        tracing::debug!(connection = %self.signature, "creating channel");
        let channel = connection.create_channel().await?;
        self.channels.lock().await.push(channel.clone());
        Ok(Some(channel))
    }

    /// The default channel of this handle, created on first use.
    pub async fn channel(&self) -> Result<Option<Channel>> {
        self.default_channel
            .get_or_try_init(|| self.new_channel())
            .await
            .cloned()
    }

    /// Close every channel opened by this handle, and the broker connection
    /// too if no other handle still uses it. Closing twice is a no-op.
    ///
    /// The registry entry is released even when a channel fails to close;
    /// the first channel error is returned afterwards.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let channels = std::mem::take(&mut *self.channels.lock().await);
        if self.connection.is_none() {
            return close_channels(channels).await;
        }

        let (channels_closed, last) = shared_registry()
            .release_after(&self.signature, close_channels(channels))
            .await;
        if let Some(connection) = last {
            tracing::debug!(connection = %self.signature, "closing connection");
            connection.close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT).await?;
        }

        channels_closed
    }
}

/// Close every connected channel, returning the first failure.
async fn close_channels(channels: Vec<Channel>) -> Result<()> {
    let mut first_error = None;
    for channel in channels {
        if !channel.status().connected() {
            continue;
        }
        tracing::debug!(channel_id = channel.id(), "closing channel");
        if let Err(e) = channel.close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT).await {
            tracing::warn!(channel_id = channel.id(), error = %e, "failed to close channel");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

impl PartialEq for AmqpConnection {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl std::fmt::Debug for AmqpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpConnection")
            .field("signature", &self.signature.to_string())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
