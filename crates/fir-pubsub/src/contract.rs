//! Behavior every [`Broker`] must satisfy.
//!
//! Each check uses fresh channel names, so the suite can run against a
//! shared external broker.

use std::time::Duration;

use tokio::time::timeout;

use crate::broker::{Broker, Message, Subscription};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Run every check against `broker`.
pub async fn run_all(broker: &dyn Broker) {
    fan_out_to_every_subscriber(broker).await;
    channels_are_isolated(broker).await;
    unsubscribe_stops_delivery(broker).await;
    origin_round_trips(broker).await;
    publish_without_subscribers_succeeds(broker).await;
    order_is_preserved_per_subscriber(broker).await;
}

fn channel(label: &str) -> String {
    format!("contract:{label}:{}", uuid::Uuid::now_v7())
}

async fn expect_message(sub: &mut Subscription) -> Message {
    timeout(RECV_TIMEOUT, sub.recv())
        .await
        .unwrap_or_else(|_| panic!("no message on {} within {RECV_TIMEOUT:?}", sub.channel()))
        .unwrap_or_else(|| panic!("subscription to {} closed", sub.channel()))
}

async fn expect_silence(sub: &mut Subscription) {
    if let Ok(Some(msg)) = timeout(QUIET_PERIOD, sub.recv()).await {
        panic!("unexpected message on {}: {msg:?}", sub.channel());
    }
}

async fn eventually_no_subscribers(broker: &dyn Broker, ch: &str) {
    for _ in 0..20 {
        if !broker.has_subscribers(ch).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("{ch} still has subscribers");
}

/// Two subscribers on one channel both receive a publish.
pub async fn fan_out_to_every_subscriber(broker: &dyn Broker) {
    let ch = channel("fanout");
    let mut a = broker.subscribe(&ch).await.unwrap();
    let mut b = broker.subscribe(&ch).await.unwrap();
    assert!(broker.has_subscribers(&ch).await.unwrap());

    broker.publish(&ch, Message::new("hello")).await.unwrap();
    assert_eq!(expect_message(&mut a).await.payload, "hello");
    assert_eq!(expect_message(&mut b).await.payload, "hello");
}

/// A subscriber on another channel receives nothing.
pub async fn channels_are_isolated(broker: &dyn Broker) {
    let c = channel("c");
    let d = channel("d");
    let mut on_c = broker.subscribe(&c).await.unwrap();
    let mut on_d = broker.subscribe(&d).await.unwrap();

    broker.publish(&c, Message::new("for c")).await.unwrap();
    assert_eq!(expect_message(&mut on_c).await.payload, "for c");
    expect_silence(&mut on_d).await;
}

/// After unsubscribe the channel has no subscribers and delivery stops.
pub async fn unsubscribe_stops_delivery(broker: &dyn Broker) {
    let ch = channel("unsub");
    let gone = broker.subscribe(&ch).await.unwrap();
    gone.unsubscribe();
    eventually_no_subscribers(broker, &ch).await;

    let mut stays = broker.subscribe(&ch).await.unwrap();
    let dropped = broker.subscribe(&ch).await.unwrap();
    drop(dropped);
    broker.publish(&ch, Message::new("after")).await.unwrap();
    assert_eq!(expect_message(&mut stays).await.payload, "after");
}

/// The origin survives the trip through the broker.
pub async fn origin_round_trips(broker: &dyn Broker) {
    let ch = channel("origin");
    let mut sub = broker.subscribe(&ch).await.unwrap();
    broker
        .publish(&ch, Message::from_origin("conn-1", "[]"))
        .await
        .unwrap();
    let msg = expect_message(&mut sub).await;
    assert!(msg.is_from("conn-1"));
}

/// Publishing to an empty channel is not an error.
pub async fn publish_without_subscribers_succeeds(broker: &dyn Broker) {
    let ch = channel("empty");
    assert!(!broker.has_subscribers(&ch).await.unwrap());
    broker.publish(&ch, Message::new("nobody")).await.unwrap();
}

/// One publisher's messages arrive in publish order.
pub async fn order_is_preserved_per_subscriber(broker: &dyn Broker) {
    let ch = channel("order");
    let mut sub = broker.subscribe(&ch).await.unwrap();
    for i in 0..10 {
        broker.publish(&ch, Message::new(i.to_string())).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(expect_message(&mut sub).await.payload, i.to_string());
    }
}
