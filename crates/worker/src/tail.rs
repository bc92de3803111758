//! A processor that logs every message it receives.

use hare_common::types::Message;
use hare_mq::Codec;

use crate::process::MessageProcessor;
use crate::unit_of_work::UnitOfWork;

/// Logs each message's envelope and rendered body. Never fails.
#[derive(Debug, Clone, Default)]
pub struct TailProcessor<C> {
    codec: C,
    seen: u64,
}

impl<C: Codec> TailProcessor<C> {
    pub fn new(codec: C) -> Self {
        Self { codec, seen: 0 }
    }

    /// Messages logged so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl<C: Codec, W: UnitOfWork> MessageProcessor<W> for TailProcessor<C> {
    type Codec = C;

    async fn process_message(
        &mut self,
        message: &Message<C::Item>,
        _work: &mut W::Handle,
    ) -> anyhow::Result<()> {
        self.seen += 1;
        let properties = &message.properties;
        tracing::info!(
            seq = self.seen,
            delivery_tag = message.delivery_tag,
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            redelivered = message.redelivered,
            message_id = properties.message_id.as_deref().unwrap_or(""),
            app_id = properties.app_id.as_deref().unwrap_or(""),
            kind = properties.kind.as_deref().unwrap_or(""),
            body = %self.codec.render(&message.body),
            "Message received"
        );
        Ok(())
    }
}
