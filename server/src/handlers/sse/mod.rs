mod registry;
mod sse;

pub use registry::{ChannelRegistry, Registration, Sink};
pub use sse::{SseStreamBuilder, channel_param, handle_sse_subscribe};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::{Map, Value, json};
    use shared::types::sse::{EventEnvelope, EventType};
    use shared::types::{ADMIN_CHANNEL, SseDecoder};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn decode(frame: Bytes) -> EventEnvelope {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(&frame);
        assert_eq!(payloads.len(), 1, "one frame per write");
        EventEnvelope::parse(&payloads[0]).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_the_target_channel() {
        let registry = ChannelRegistry::new();
        let (a, mut rx_a) = Sink::channel(8);
        let (b, mut rx_b) = Sink::channel(8);
        let _reg_a = registry.register("user-42", a);
        let _reg_b = registry.register(ADMIN_CHANNEL, b);

        let payload = json!({"orderId": "X", "status": "shipped"});
        let delivered =
            registry.broadcast("user-42", EventType::OrderStatusChanged, data(payload.clone()));
        assert_eq!(delivered, 1);

        let received = drain(&mut rx_a);
        assert_eq!(received.len(), 1);
        let env = decode(received[0].clone());
        assert_eq!(env.event_type(), EventType::OrderStatusChanged);
        assert_eq!(Value::Object(env.data().clone()), payload);
        assert!(env.timestamp() > 0);

        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_subscribers() {
        let registry = ChannelRegistry::new();

        let delivered = registry.broadcast(ADMIN_CHANNEL, EventType::OrderCreated, Map::new());

        assert_eq!(delivered, 0);
        assert_eq!(registry.count(ADMIN_CHANNEL), 0);
        assert!(registry.channels().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_get_identical_bytes() {
        let registry = ChannelRegistry::new();
        let mut receivers = Vec::new();
        let mut registrations = Vec::new();
        for _ in 0..3 {
            let (sink, rx) = Sink::channel(4);
            registrations.push(registry.register(ADMIN_CHANNEL, sink));
            receivers.push(rx);
        }

        let delivered = registry.broadcast(
            ADMIN_CHANNEL,
            EventType::OrderCreated,
            data(json!({"orderId": "o1", "userId": "u1"})),
        );
        assert_eq!(delivered, 3);

        let frames: Vec<Bytes> = receivers.iter_mut().map(|rx| drain(rx).remove(0)).collect();
        assert!(frames.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_targeted() {
        let registry = ChannelRegistry::new();
        let (a, mut rx_a) = Sink::channel(4);
        let (b, mut rx_b) = Sink::channel(4);
        let reg_a = registry.register("user-1", a);
        let _reg_b = registry.register("user-1", b);
        assert_eq!(registry.count("user-1"), 2);

        reg_a.unregister();
        reg_a.unregister();
        assert_eq!(registry.count("user-1"), 1);

        registry.broadcast("user-1", EventType::OrderDeleted, Map::new());
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_registration_removes_channel() {
        let registry = ChannelRegistry::new();
        let (sink, _rx) = Sink::channel(4);
        {
            let _reg = registry.register("user-9", sink);
            assert_eq!(registry.channels(), vec![("user-9".to_string(), 1)]);
        }
        assert_eq!(registry.count("user-9"), 0);
        assert!(registry.channels().is_empty());
    }

    #[tokio::test]
    async fn test_dead_sink_pruned_during_broadcast() {
        let registry = ChannelRegistry::new();
        let (dead, dead_rx) = Sink::channel(4);
        let (live, mut live_rx) = Sink::channel(4);
        let _reg_dead = registry.register("user-5", dead);
        let _reg_live = registry.register("user-5", live);
        drop(dead_rx);

        let delivered = registry.broadcast("user-5", EventType::OrderStatusChanged, Map::new());

        assert_eq!(delivered, 1);
        assert_eq!(registry.count("user-5"), 1);
        assert_eq!(drain(&mut live_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_sink_pruned_without_blocking() {
        let registry = ChannelRegistry::new();
        let (slow, _slow_rx) = Sink::channel(1);
        let (fast, mut fast_rx) = Sink::channel(8);
        let _reg_slow = registry.register(ADMIN_CHANNEL, slow);
        let _reg_fast = registry.register(ADMIN_CHANNEL, fast);

        // First frame fills the slow sink's single slot
        assert_eq!(registry.broadcast(ADMIN_CHANNEL, EventType::OrderCreated, Map::new()), 2);
        assert_eq!(registry.broadcast(ADMIN_CHANNEL, EventType::OrderCreated, Map::new()), 1);

        assert_eq!(registry.count(ADMIN_CHANNEL), 1);
        assert_eq!(drain(&mut fast_rx).len(), 2);
    }

    #[tokio::test]
    async fn test_last_sink_pruned_removes_channel() {
        let registry = ChannelRegistry::new();
        let (sink, rx) = Sink::channel(4);
        let reg = registry.register("user-3", sink);
        drop(rx);

        assert_eq!(registry.broadcast("user-3", EventType::OrderDeleted, Map::new()), 0);
        assert!(registry.channels().is_empty());

        // Releasing after a prune is still a no-op
        reg.unregister();
        assert!(registry.channels().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_register_and_broadcast() {
        let registry = ChannelRegistry::new();
        let (observer, mut observer_rx) = Sink::channel(256);
        let _observer = registry.register(ADMIN_CHANNEL, observer);

        let mut handles = vec![];
        for i in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (sink, _rx) = Sink::channel(256);
                let reg = registry.register(ADMIN_CHANNEL, sink);
                registry.broadcast(
                    ADMIN_CHANNEL,
                    EventType::OrderCreated,
                    data(json!({"index": i})),
                );
                tokio::task::yield_now().await;
                reg.unregister();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(drain(&mut observer_rx).len(), 20);
        assert_eq!(registry.count(ADMIN_CHANNEL), 1);
    }

    #[tokio::test]
    async fn test_registry_clones_share_state() {
        let registry = Arc::new(ChannelRegistry::new());
        let clone = (*registry).clone();
        let (sink, _rx) = Sink::channel(1);
        let _reg = clone.register("user-7", sink);
        assert_eq!(registry.count("user-7"), 1);
    }

    #[test]
    fn test_heartbeat_frame_is_a_heartbeat_envelope() {
        let frame = SseStreamBuilder::heartbeat_frame().unwrap();
        assert_eq!(decode(frame).event_type(), EventType::Heartbeat);
    }
}
