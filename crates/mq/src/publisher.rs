//! Publishing messages to an AMQP exchange.

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions, ExchangeDeleteOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};

use hare_common::error::Result;
use hare_common::types::{DeliveryMode, MessageProperties};

use crate::codec::{Codec, JsonCodec, TextCodec};
use crate::connection::AmqpConnection;
use crate::declarations;
use crate::properties::properties_to_amqp;

/// How the exchange is declared the first time a publisher sees it.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub internal: bool,
    pub arguments: FieldTable,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            kind: ExchangeKind::Direct,
            durable: true,
            auto_delete: false,
            passive: false,
            internal: false,
            arguments: FieldTable::default(),
        }
    }
}

/// Per-message publish settings. Unset exchange/routing key fall back to
/// the publisher's defaults.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: MessageProperties,
}

impl PublishOptions {
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }
}

/// Delivers messages to one exchange.
///
/// Use separate publishers per exchange, and possibly one per event type with
/// its default routing key.
pub struct Publisher<C: Codec = TextCodec> {
    exchange: String,
    routing_key: String,
    channel: Option<Channel>,
    codec: C,
}

/// Publisher of JSON-encoded bodies.
pub type JsonPublisher<T = serde_json::Value> = Publisher<JsonCodec<T>>;

impl<C: Codec> Publisher<C> {
    /// Create a publisher on the connection's default channel, declaring the
    /// exchange unless this process already declared it.
    pub async fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        connection: &AmqpConnection,
        options: ExchangeOptions,
        codec: C,
    ) -> Result<Self> {
        let exchange = exchange.into();
        let channel = connection.channel().await?;

        if let Some(channel) = &channel {
            if !declarations::exchanges().contains(&exchange) {
                tracing::debug!(
                    exchange = %exchange,
                    kind = ?options.kind,
                    durable = options.durable,
                    auto_delete = options.auto_delete,
                    "declaring exchange"
                );
                channel
                    .exchange_declare(
                        &exchange,
                        options.kind,
                        ExchangeDeclareOptions {
                            passive: options.passive,
                            durable: options.durable,
                            auto_delete: options.auto_delete,
                            internal: options.internal,
                            nowait: false,
                        },
                        options.arguments,
                    )
                    .await?;
                declarations::exchanges().mark(&exchange);
            }
        }

        Ok(Self {
            exchange,
            routing_key: routing_key.into(),
            channel,
            codec,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// False when the underlying connection is disabled.
    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    /// Delete the exchange this publisher represents.
    pub async fn destroy_exchange(&self) -> Result<()> {
        if let Some(channel) = &self.channel {
            tracing::debug!(exchange = %self.exchange, "deleting exchange");
            channel
                .exchange_delete(&self.exchange, ExchangeDeleteOptions::default())
                .await?;
        }
        declarations::exchanges().forget(&self.exchange);
        Ok(())
    }

    /// Encode and publish `body`, waiting for the broker's confirmation.
    ///
    /// Messages are persistent unless the options set a delivery mode.
    /// Returns `Ok(false)` without doing anything when disabled.
    pub async fn publish(&self, body: &C::Item, options: PublishOptions) -> Result<bool> {
        let Some(channel) = &self.channel else {
            return Ok(false);
        };

        let exchange = options.exchange.as_deref().unwrap_or(&self.exchange);
        let routing_key = options.routing_key.as_deref().unwrap_or(&self.routing_key);

        let mut properties = options.properties;
        properties
            .delivery_mode
            .get_or_insert(DeliveryMode::Persistent.as_u8());
        if properties.content_type.is_none() {
            properties.content_type = self.codec.content_type().map(String::from);
        }

        let payload = self.codec.encode(body)?;

        // Body intentionally left out of the log.
        tracing::debug!(
            exchange,
            routing_key,
            mandatory = options.mandatory,
            immediate = options.immediate,
            bytes = payload.len(),
            "publishing message"
        );

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: options.mandatory,
                    immediate: options.immediate,
                },
                &payload,
                properties_to_amqp(&properties),
            )
            .await?
            .await?;

        Ok(true)
    }
}
