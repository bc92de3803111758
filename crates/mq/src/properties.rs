//! Conversions between `lapin` deliveries/properties and hare's message types.

use lapin::BasicProperties;
use lapin::message::Delivery;
use lapin::types::ShortString;

use hare_common::types::{MessageProperties, RawMessage};

fn owned(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|s| s.as_str().to_string())
}

fn short(value: &str) -> ShortString {
    ShortString::from(value.to_string())
}

pub fn properties_from_amqp(props: &BasicProperties) -> MessageProperties {
    MessageProperties {
        message_id: owned(props.message_id()),
        timestamp: *props.timestamp(),
        delivery_mode: *props.delivery_mode(),
        priority: *props.priority(),
        expiration: owned(props.expiration()),
        kind: owned(props.kind()),
        user_id: owned(props.user_id()),
        app_id: owned(props.app_id()),
        content_type: owned(props.content_type()),
        content_encoding: owned(props.content_encoding()),
        correlation_id: owned(props.correlation_id()),
        reply_to: owned(props.reply_to()),
    }
}

pub fn properties_to_amqp(props: &MessageProperties) -> BasicProperties {
    let mut amqp = BasicProperties::default();

    if let Some(v) = &props.message_id {
        amqp = amqp.with_message_id(short(v));
    }
    if let Some(v) = props.timestamp {
        amqp = amqp.with_timestamp(v);
    }
    if let Some(v) = props.delivery_mode {
        amqp = amqp.with_delivery_mode(v);
    }
    if let Some(v) = props.priority {
        amqp = amqp.with_priority(v);
    }
    if let Some(v) = &props.expiration {
        amqp = amqp.with_expiration(short(v));
    }
    if let Some(v) = &props.kind {
        amqp = amqp.with_type(short(v));
    }
    if let Some(v) = &props.user_id {
        amqp = amqp.with_user_id(short(v));
    }
    if let Some(v) = &props.app_id {
        amqp = amqp.with_app_id(short(v));
    }
    if let Some(v) = &props.content_type {
        amqp = amqp.with_content_type(short(v));
    }
    if let Some(v) = &props.content_encoding {
        amqp = amqp.with_content_encoding(short(v));
    }
    if let Some(v) = &props.correlation_id {
        amqp = amqp.with_correlation_id(short(v));
    }
    if let Some(v) = &props.reply_to {
        amqp = amqp.with_reply_to(short(v));
    }

    amqp
}

/// Take ownership of a delivery's envelope and payload.
pub fn message_from_delivery(delivery: Delivery) -> RawMessage {
    RawMessage {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        redelivered: delivery.redelivered,
        properties: properties_from_amqp(&delivery.properties),
        body: delivery.data,
    }
}
