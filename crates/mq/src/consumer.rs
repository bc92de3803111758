//! Consuming messages from an AMQP queue.

use std::future::Future;

use futures::{Stream, StreamExt};
use lapin::Channel;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions, BasicQosOptions,
    QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use uuid::Uuid;

use hare_common::error::{HareError, Result};
use hare_common::types::{Message, RawMessage};

use crate::codec::{Codec, JsonCodec, TextCodec};
use crate::connection::AmqpConnection;
use crate::declarations;
use crate::properties::message_from_delivery;

/// Queue declaration settings.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub nowait: bool,
    pub queue_arguments: FieldTable,
    pub bind_arguments: FieldTable,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
            queue_arguments: FieldTable::default(),
            bind_arguments: FieldTable::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    /// Exchange the queue is bound to. Required unless the queue is already
    /// declared (or `force_no_declare` is set).
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    /// Skip declaring and binding the queue.
    pub force_no_declare: bool,
    /// Consumer tag for subscriptions; a random one is generated when unset.
    pub tag: Option<String>,
    pub queue: QueueOptions,
}

impl ConsumerOptions {
    pub fn bound_to(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: Some(exchange.into()),
            routing_key: Some(routing_key.into()),
            ..Self::default()
        }
    }
}

/// Settings for [`Consumer::message_iterator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IteratorOptions {
    /// Let the broker consider messages acknowledged on delivery.
    pub no_ack: bool,
    /// Stop after this many messages.
    pub limit: Option<usize>,
    /// Most unacknowledged deliveries the broker pushes to this channel at a
    /// time. Unbounded when unset.
    pub prefetch: Option<u16>,
}

/// Reads and acknowledges messages from one queue.
pub struct Consumer<C: Codec = TextCodec> {
    queue: String,
    exchange: Option<String>,
    routing_key: Option<String>,
    tag: Option<String>,
    channel: Option<Channel>,
    codec: C,
}

/// Consumer of JSON-encoded bodies.
pub type JsonConsumer<T = serde_json::Value> = Consumer<JsonCodec<T>>;

impl<C: Codec> Consumer<C> {
    /// Create a consumer on the connection's default channel.
    ///
    /// Unless `force_no_declare` is set, a queue not yet declared by this
    /// process is declared and bound to `exchange` with `routing_key`
    /// (default `""`).
    pub async fn new(
        queue: impl Into<String>,
        connection: &AmqpConnection,
        options: ConsumerOptions,
        codec: C,
    ) -> Result<Self> {
        let queue = queue.into();
        let channel = connection.channel().await?;

        if !declarations::queues().contains(&queue) {
            if !options.force_no_declare {
                let exchange = options.exchange.as_deref().ok_or_else(|| {
                    HareError::Config("exchange is required to declare the queue".to_string())
                })?;

                if let Some(channel) = &channel {
                    let routing_key = options.routing_key.as_deref().unwrap_or("");
                    Self::declare_and_bind(channel, &queue, exchange, routing_key, &options.queue)
                        .await?;
                }
            }
            if channel.is_some() {
                declarations::queues().mark(&queue);
            }
        }

        Ok(Self {
            queue,
            exchange: options.exchange,
            routing_key: options.routing_key,
            tag: options.tag,
            channel,
            codec,
        })
    }

    async fn declare_and_bind(
        channel: &Channel,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: &QueueOptions,
    ) -> Result<()> {
        tracing::debug!(
            queue,
            durable = options.durable,
            exclusive = options.exclusive,
            auto_delete = options.auto_delete,
            "declaring queue"
        );
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: options.nowait,
                },
                options.queue_arguments.clone(),
            )
            .await?;

        tracing::debug!(queue, exchange, routing_key, "binding queue");
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions {
                    nowait: options.nowait,
                },
                options.bind_arguments.clone(),
            )
            .await?;

        Ok(())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// False when the underlying connection is disabled.
    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    /// Delete the queue this consumer reads from.
    pub async fn destroy_queue(&self) -> Result<()> {
        if let Some(channel) = &self.channel {
            tracing::debug!(queue = %self.queue, "deleting queue");
            channel
                .queue_delete(&self.queue, QueueDeleteOptions::default())
                .await?;
        }
        declarations::queues().forget(&self.queue);
        Ok(())
    }

    /// Decode a raw message's body, keeping its envelope.
    pub fn decode(&self, raw: RawMessage) -> Result<Message<C::Item>> {
        let body = self.codec.decode(&raw.body)?;
        Ok(raw.map_body(|_| body))
    }

    /// Take the next waiting message without decoding it. `None` when the
    /// queue is empty.
    pub async fn pop_raw(&self) -> Result<Option<RawMessage>> {
        let Some(channel) = &self.channel else {
            return Ok(None);
        };

        tracing::debug!(queue = %self.queue, "popping message");
        let message = channel
            .basic_get(&self.queue, BasicGetOptions { no_ack: false })
            .await?;

        Ok(message.map(|m| message_from_delivery(m.delivery)))
    }

    /// Take and decode the next waiting message. `None` when the queue is
    /// empty. The message must be acknowledged.
    pub async fn pop(&self) -> Result<Option<Message<C::Item>>> {
        match self.pop_raw().await? {
            Some(raw) => self.decode(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Pop messages until the queue is empty. The stream ends after the first
    /// error.
    pub fn drain(&self) -> impl Stream<Item = Result<Message<C::Item>>> + '_ {
        futures::stream::unfold(false, move |failed| async move {
            if failed {
                return None;
            }
            match self.pop().await {
                Ok(Some(message)) => Some((Ok(message), false)),
                Ok(None) => None,
                Err(e) => Some((Err(e), true)),
            }
        })
    }

    /// Acknowledge delivery of `message`.
    pub async fn acknowledge<B>(&self, message: &Message<B>) -> Result<()> {
        self.acknowledge_tag(message.delivery_tag).await
    }

    /// Acknowledge a delivery by its tag.
    pub async fn acknowledge_tag(&self, delivery_tag: u64) -> Result<()> {
        let Some(channel) = &self.channel else {
            return Ok(());
        };

        tracing::debug!(delivery_tag, "acknowledging message");
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    /// Call `callback` for every new message until it fails.
    ///
    /// Each message is acknowledged once its callback succeeds. The first
    /// callback or broker error cancels the subscription and is returned.
    pub async fn subscribe<F, Fut, E>(&self, mut callback: F) -> std::result::Result<(), E>
    where
        F: FnMut(Message<C::Item>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: From<HareError>,
    {
        let mut messages = self.message_iterator(IteratorOptions::default()).await?;

        let outcome: std::result::Result<(), E> = async {
            while let Some(message) = messages.next().await {
                let message = message?;
                let delivery_tag = message.delivery_tag;
                tracing::debug!(delivery_tag, "calling message callback");
                callback(message).await?;
                self.acknowledge_tag(delivery_tag).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = messages.cancel().await {
            tracing::warn!(error = %e, queue = %self.queue, "failed to cancel subscription");
        }
        outcome
    }

    /// Start consuming and return an iterator over the delivered messages.
    ///
    /// Messages must be acknowledged with [`Consumer::acknowledge`] unless
    /// `no_ack` is set. On a disabled connection the iterator is empty.
    pub async fn message_iterator(&self, options: IteratorOptions) -> Result<MessageIterator<'_, C>> {
        let tag = self
            .tag
            .clone()
            .unwrap_or_else(|| format!("hare-{}", Uuid::new_v4()));

        let stream = match &self.channel {
            Some(channel) => {
                if let Some(prefetch) = options.prefetch {
                    tracing::debug!(queue = %self.queue, prefetch, "setting prefetch count");
                    channel
                        .basic_qos(prefetch, BasicQosOptions::default())
                        .await?;
                }
                tracing::debug!(
                    queue = %self.queue,
                    no_ack = options.no_ack,
                    consumer_tag = %tag,
                    "subscribing to new messages"
                );
                let stream = channel
                    .basic_consume(
                        &self.queue,
                        &tag,
                        BasicConsumeOptions {
                            no_ack: options.no_ack,
                            ..BasicConsumeOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                Some(stream)
            }
            None => None,
        };

        Ok(MessageIterator {
            consumer: self,
            channel: self.channel.clone(),
            stream,
            tag,
            limit: options.limit,
            yielded: 0,
        })
    }
}

/// Messages delivered to an active broker subscription.
///
/// The subscription is cancelled when the limit is reached, on
/// [`MessageIterator::cancel`], or (in the background) when dropped.
pub struct MessageIterator<'a, C: Codec> {
    consumer: &'a Consumer<C>,
    channel: Option<Channel>,
    stream: Option<lapin::Consumer>,
    tag: String,
    limit: Option<usize>,
    yielded: usize,
}

impl<'a, C: Codec> MessageIterator<'a, C> {
    /// The consumer this subscription belongs to.
    pub fn consumer(&self) -> &'a Consumer<C> {
        self.consumer
    }

    pub fn consumer_tag(&self) -> &str {
        &self.tag
    }

    /// Number of messages yielded so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Wait for the next delivery, undecoded. `None` once the limit is
    /// reached or the subscription ended.
    pub async fn next_raw(&mut self) -> Option<Result<RawMessage>> {
        if self.limit.is_some_and(|limit| self.yielded >= limit) {
            if let Err(e) = self.cancel().await {
                return Some(Err(e));
            }
            return None;
        }

        let stream = self.stream.as_mut()?;
        match stream.next().await {
            Some(Ok(delivery)) => {
                self.yielded += 1;
                tracing::debug!(
                    routing_key = delivery.routing_key.as_str(),
                    delivery_tag = delivery.delivery_tag,
                    "message received"
                );
                Some(Ok(message_from_delivery(delivery)))
            }
            Some(Err(e)) => Some(Err(e.into())),
            None => {
                // Cancelled by the broker or the channel closed.
                self.stream = None;
                None
            }
        }
    }

    /// Wait for the next delivery and decode it.
    pub async fn next(&mut self) -> Option<Result<Message<C::Item>>> {
        let raw = self.next_raw().await?;
        Some(raw.and_then(|raw| self.consumer.decode(raw)))
    }

    /// Cancel the broker subscription. Safe to call more than once.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.stream.take().is_none() {
            return Ok(());
        }
        if let Some(channel) = &self.channel {
            tracing::debug!(consumer_tag = %self.tag, "cancelling message subscription");
            channel
                .basic_cancel(&self.tag, BasicCancelOptions::default())
                .await?;
        }
        Ok(())
    }
}

impl<C: Codec> Drop for MessageIterator<'_, C> {
    fn drop(&mut self) {
        if self.stream.take().is_none() {
            return;
        }
        let (Some(channel), Ok(runtime)) =
            (self.channel.clone(), tokio::runtime::Handle::try_current())
        else {
            return;
        };

        let tag = std::mem::take(&mut self.tag);
        runtime.spawn(async move {
            tracing::debug!(consumer_tag = %tag, "cancelling dropped message subscription");
            if let Err(e) = channel
                .basic_cancel(&tag, BasicCancelOptions::default())
                .await
            {
                tracing::warn!(consumer_tag = %tag, error = %e, "failed to cancel subscription");
            }
        });
    }
}
