//! Consumer against a live hub on an ephemeral port.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use client::{ConsumerConfig, StreamConsumer};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use server::{AppState, serve};
use shared::types::server_config::AppConfig;
use shared::types::{ADMIN_CHANNEL, EventEnvelope, EventType, OrderCreated, OrderStatus, OrderStatusUpdate};
use tokio::net::TcpListener;

async fn start() -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(AppConfig::default());
    tokio::spawn(serve(listener, state.clone()));
    (addr, state)
}

fn config(addr: SocketAddr) -> ConsumerConfig {
    ConsumerConfig::new(format!("http://{}/api/events", addr))
}

fn collect(consumer: &StreamConsumer, t: EventType) -> Arc<Mutex<Vec<EventEnvelope>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    consumer.on(t, move |env| s.lock().push(env.clone()));
    seen
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn buyer_receives_status_change_and_disconnect_releases_stream() {
    let (addr, state) = start().await;
    let consumer = StreamConsumer::for_user(config(addr), "42");
    let seen = collect(&consumer, EventType::OrderStatusChanged);

    consumer.connect().await.unwrap();
    assert!(consumer.status().connected);
    wait_until(|| state.registry.count("user-42") == 1).await;

    state
        .producer
        .order_status_changed(&OrderStatusUpdate {
            order_id: "o-1".to_string(),
            user_id: "42".to_string(),
            status: OrderStatus::Shipped,
        })
        .unwrap();

    wait_until(|| seen.lock().len() == 1).await;
    let env = seen.lock()[0].clone();
    assert_eq!(env.data().get("orderId"), Some(&Value::from("o-1")));
    assert_eq!(env.data().get("status"), Some(&Value::from("shipped")));

    consumer.disconnect();

    // The hub notices on its next write to the dropped stream
    let registry = state.registry.clone();
    wait_until(move || {
        registry.broadcast("user-42", EventType::OrderStatusChanged, Map::new());
        registry.count("user-42") == 0
    })
    .await;
}

#[tokio::test]
async fn admin_receives_new_orders() {
    let (addr, state) = start().await;
    let consumer = StreamConsumer::for_admin(config(addr));
    let seen = collect(&consumer, EventType::OrderCreated);

    consumer.connect().await.unwrap();
    wait_until(|| state.registry.count(ADMIN_CHANNEL) == 1).await;

    let mut summary = Map::new();
    summary.insert("total".to_string(), Value::from(1999));
    state
        .producer
        .order_created(&OrderCreated {
            order_id: "o-2".to_string(),
            user_id: "7".to_string(),
            summary,
        })
        .unwrap();

    wait_until(|| seen.lock().len() == 1).await;
    let env = seen.lock()[0].clone();
    assert_eq!(env.data().get("orderId"), Some(&Value::from("o-2")));
    assert_eq!(env.data().get("total"), Some(&Value::from(1999)));

    consumer.disconnect();
}

#[tokio::test]
async fn unreachable_hub_reports_error_and_schedules_retry() {
    // Bind then drop to get a port nothing listens on
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let consumer = StreamConsumer::for_user(config(addr), "1");
    let errors = collect(&consumer, EventType::ConnectionError);

    assert!(consumer.connect().await.is_err());

    assert_eq!(errors.lock().len(), 1);
    let status = consumer.status();
    assert!(!status.connected);
    assert_eq!(status.reconnect_attempts, 1);

    consumer.disconnect();
    assert_eq!(consumer.status().reconnect_attempts, 0);
}
