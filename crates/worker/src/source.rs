//! Where a consumer process gets its messages from.

use std::future::Future;

use hare_common::error::Result;
use hare_common::types::RawMessage;
use hare_mq::{Codec, MessageIterator};

/// A stream of undecoded messages that can be acknowledged.
pub trait MessageSource {
    type Codec: Codec;

    /// Codec used to decode (and render) bodies.
    fn codec(&self) -> &Self::Codec;

    /// Next message, or `None` once the source is exhausted.
    fn next_raw(&mut self) -> impl Future<Output = Option<Result<RawMessage>>>;

    fn acknowledge(&self, delivery_tag: u64) -> impl Future<Output = Result<()>>;

    /// Stop receiving messages.
    fn cancel(&mut self) -> impl Future<Output = Result<()>>;
}

impl<C: Codec> MessageSource for MessageIterator<'_, C> {
    type Codec = C;

    fn codec(&self) -> &C {
        self.consumer().codec()
    }

    async fn next_raw(&mut self) -> Option<Result<RawMessage>> {
        MessageIterator::next_raw(self).await
    }

    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        self.consumer().acknowledge_tag(delivery_tag).await
    }

    async fn cancel(&mut self) -> Result<()> {
        MessageIterator::cancel(self).await
    }
}
