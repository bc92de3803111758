//! AMQP plumbing: shared connections, publishers and consumers.

pub mod codec;
pub mod connection;
pub mod consumer;
pub mod declarations;
pub mod properties;
pub mod publisher;
pub mod registry;

pub use codec::{Codec, JsonCodec, TextCodec};
pub use connection::{AmqpConnection, ConnectionParams, ConnectionSignature};
pub use consumer::{
    Consumer, ConsumerOptions, IteratorOptions, JsonConsumer, MessageIterator, QueueOptions,
};
pub use publisher::{ExchangeOptions, JsonPublisher, PublishOptions, Publisher};
pub use registry::ConnectionRegistry;
