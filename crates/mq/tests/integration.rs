//! Broker round-trip tests.
//!
//! Requires a running RabbitMQ broker. Run with:
//!
//! ```bash
//! AMQP_HOST="localhost:5672" \
//!   cargo test -p hare-mq --test integration -- --ignored --nocapture
//! ```

use std::time::Duration;

use uuid::Uuid;

use hare_common::error::HareError;
use hare_common::types::{DeliveryMode, MessageProperties};
use hare_mq::connection::shared_registry;
use hare_mq::{
    AmqpConnection, ConnectionParams, Consumer, ConsumerOptions, ExchangeOptions, IteratorOptions,
    JsonCodec, PublishOptions, Publisher, TextCodec,
};

// ============================================================
// Shared helpers
// ============================================================

fn params() -> ConnectionParams {
    let host = std::env::var("AMQP_HOST").unwrap_or_else(|_| "localhost:5672".to_string());
    ConnectionParams::default().with_host(host)
}

async fn connect() -> AmqpConnection {
    AmqpConnection::open(params(), true).await.unwrap()
}

/// A publisher/consumer pair on a throwaway exchange and queue.
async fn text_pair(
    conn: &AmqpConnection,
    name: &str,
) -> (Publisher<TextCodec>, Consumer<TextCodec>) {
    let exchange = format!("_hare_test_{}", name);
    let queue = format!("_hare_test_queue_{}", name);
    let publisher = Publisher::new(&exchange, "test", conn, ExchangeOptions::default(), TextCodec)
        .await
        .unwrap();
    let consumer = Consumer::new(
        &queue,
        conn,
        ConsumerOptions::bound_to(&exchange, "test"),
        TextCodec,
    )
    .await
    .unwrap();
    (publisher, consumer)
}

async fn teardown<C: hare_mq::Codec, D: hare_mq::Codec>(
    publisher: &Publisher<C>,
    consumer: &Consumer<D>,
) {
    consumer.destroy_queue().await.unwrap();
    publisher.destroy_exchange().await.unwrap();
}

// ============================================================
// Communication
// ============================================================

#[tokio::test]
#[ignore]
async fn test_message_integrity() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "integrity").await;

    for _ in 0..200 {
        let sent = Uuid::new_v4().to_string();
        assert!(publisher.publish(&sent, PublishOptions::default()).await.unwrap());
        let received = consumer.pop().await.unwrap().expect("message should be waiting");
        assert_eq!(received.body, sent);
        consumer.acknowledge(&received).await.unwrap();
    }

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_unicode() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "unicode").await;

    let sent = "他媽的我的生活 Seru na můj život Ебут мою жизнь FML".to_string();
    publisher.publish(&sent, PublishOptions::default()).await.unwrap();
    let received = consumer.pop().await.unwrap().unwrap();
    assert_eq!(received.body, sent);
    consumer.acknowledge(&received).await.unwrap();

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_properties_and_default_delivery_mode() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "properties").await;

    let properties = MessageProperties::default()
        .with_message_id("m-42")
        .with_app_id("hare-tests")
        .with_kind("greeting");
    publisher
        .publish(
            &"hi".to_string(),
            PublishOptions::default().properties(properties),
        )
        .await
        .unwrap();

    let received = consumer.pop().await.unwrap().unwrap();
    assert_eq!(received.properties.message_id.as_deref(), Some("m-42"));
    assert_eq!(received.properties.app_id.as_deref(), Some("hare-tests"));
    assert_eq!(received.properties.kind.as_deref(), Some("greeting"));
    assert_eq!(
        received.properties.delivery_mode,
        Some(DeliveryMode::Persistent.as_u8())
    );
    consumer.acknowledge(&received).await.unwrap();

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_json_round_trip_through_broker() {
    let conn = connect().await;
    let exchange = "_hare_test_json";
    let publisher = Publisher::new(
        exchange,
        "test",
        &conn,
        ExchangeOptions::default(),
        JsonCodec::<serde_json::Value>::new(),
    )
    .await
    .unwrap();
    let consumer = Consumer::new(
        "_hare_test_queue_json",
        &conn,
        ConsumerOptions::bound_to(exchange, "test"),
        JsonCodec::<serde_json::Value>::new(),
    )
    .await
    .unwrap();

    let sent = serde_json::json!({"order_id": 7, "items": ["tea", "scones"]});
    publisher.publish(&sent, PublishOptions::default()).await.unwrap();
    let received = consumer.pop().await.unwrap().unwrap();
    assert_eq!(received.body, sent);
    assert_eq!(
        received.properties.content_type.as_deref(),
        Some("application/json")
    );
    consumer.acknowledge(&received).await.unwrap();

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_message_iterator_respects_limit() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "iterator").await;

    for i in 0..3 {
        publisher
            .publish(&format!("message {}", i), PublishOptions::default())
            .await
            .unwrap();
    }

    let mut messages = consumer
        .message_iterator(IteratorOptions {
            no_ack: false,
            limit: Some(2),
            ..IteratorOptions::default()
        })
        .await
        .unwrap();

    let mut bodies = Vec::new();
    while let Some(message) = messages.next().await {
        let message = message.unwrap();
        consumer.acknowledge(&message).await.unwrap();
        bodies.push(message.body);
    }
    assert_eq!(bodies, vec!["message 0".to_string(), "message 1".to_string()]);
    assert_eq!(messages.yielded(), 2);
    // Limit reached: the iterator stays exhausted.
    assert!(messages.next().await.is_none());
    drop(messages);

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_dropped_iterator_cancels_its_subscription() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "dropped_iterator").await;

    let messages = consumer
        .message_iterator(IteratorOptions::default())
        .await
        .unwrap();
    drop(messages);
    // The cancel runs on a spawned task.
    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher
        .publish(&"after drop".to_string(), PublishOptions::default())
        .await
        .unwrap();
    let received = consumer
        .pop()
        .await
        .unwrap()
        .expect("message should stay queued once nobody is subscribed");
    assert_eq!(received.body, "after drop");
    consumer.acknowledge(&received).await.unwrap();

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_prefetch_bounds_unacked_deliveries() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "prefetch").await;

    for body in ["first", "second"] {
        publisher
            .publish(&body.to_string(), PublishOptions::default())
            .await
            .unwrap();
    }

    let mut messages = consumer
        .message_iterator(IteratorOptions {
            prefetch: Some(1),
            ..IteratorOptions::default()
        })
        .await
        .unwrap();

    let first = messages.next().await.unwrap().unwrap();
    assert_eq!(first.body, "first");
    // The window is full until the first delivery is acknowledged.
    assert!(
        tokio::time::timeout(Duration::from_millis(500), messages.next())
            .await
            .is_err()
    );

    consumer.acknowledge(&first).await.unwrap();
    let second = messages.next().await.unwrap().unwrap();
    assert_eq!(second.body, "second");
    consumer.acknowledge(&second).await.unwrap();
    messages.cancel().await.unwrap();

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

// ============================================================
// Subscriptions
// ============================================================

#[tokio::test]
#[ignore]
async fn test_subscribe_acks_until_first_callback_error() {
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "subscribe").await;

    for body in ["a", "b", "stop", "d"] {
        publisher
            .publish(&body.to_string(), PublishOptions::default())
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let result = consumer
        .subscribe(|message| {
            seen.push(message.body.clone());
            async move {
                if message.body == "stop" {
                    return Err(HareError::Internal("callback refused".to_string()));
                }
                Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(HareError::Internal(ref m)) if m == "callback refused"));
    assert_eq!(seen, vec!["a", "b", "stop"]);

    // Closing the channel requeues whatever was not acknowledged.
    conn.close().await.unwrap();
    let conn = connect().await;
    let (publisher, consumer) = text_pair(&conn, "subscribe").await;

    let mut left = Vec::new();
    while let Some(message) = consumer.pop().await.unwrap() {
        consumer.acknowledge(&message).await.unwrap();
        left.push(message.body);
    }
    left.sort();
    assert_eq!(left, vec!["d", "stop"]);

    teardown(&publisher, &consumer).await;
    conn.close().await.unwrap();
}

// ============================================================
// Identity map
// ============================================================

#[tokio::test]
#[ignore]
async fn test_connection_identity_map() {
    let connection1 = AmqpConnection::open(params().with_host("localhost:5672"), true)
        .await
        .unwrap();
    let connection2 = AmqpConnection::open(params().with_host("localhost:5672"), true)
        .await
        .unwrap();
    assert_eq!(connection1, connection2);
    assert!(std::ptr::eq(
        connection1.inner().unwrap(),
        connection2.inner().unwrap()
    ));

    // localhost and 127.0.0.1 are different signatures
    let connection3 = AmqpConnection::open(params().with_host("127.0.0.1:5672"), true)
        .await
        .unwrap();
    let connection4 = AmqpConnection::open(params().with_host("127.0.0.1:5672"), true)
        .await
        .unwrap();
    assert!(std::ptr::eq(
        connection3.inner().unwrap(),
        connection4.inner().unwrap()
    ));
    assert!(!std::ptr::eq(
        connection1.inner().unwrap(),
        connection3.inner().unwrap()
    ));

    let local = connection1.signature().clone();
    assert_eq!(shared_registry().retain_count(&local).await, 2);
    connection1.close().await.unwrap();
    assert_eq!(shared_registry().retain_count(&local).await, 1);
    assert!(connection2.inner().unwrap().status().connected());
    connection2.close().await.unwrap();
    assert_eq!(shared_registry().retain_count(&local).await, 0);

    connection3.close().await.unwrap();
    connection4.close().await.unwrap();
}
