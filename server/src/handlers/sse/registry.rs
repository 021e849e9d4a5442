use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use shared::types::sse::{EventEnvelope, EventType};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Write handle for one open stream.
///
/// Backed by a bounded queue drained by the connection's body stream. Writes
/// never wait: a full queue means the subscriber has stalled and a closed
/// queue means the connection is gone. Both count as a failed write.
#[derive(Debug, Clone)]
pub struct Sink {
    id: Uuid,
    tx: mpsc::Sender<Bytes>,
}

impl Sink {
    /// Create a sink and the receiving half that feeds the response body.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn try_write(&self, frame: &Bytes) -> Result<(), mpsc::error::TrySendError<Bytes>> {
        self.tx.try_send(frame.clone())
    }
}

// ---------------------------------------------------------------------------
// ChannelRegistry
// ---------------------------------------------------------------------------

type ChannelMap = HashMap<String, HashMap<Uuid, Sink>>;

/// channel id → set of live sinks.
///
/// Cheap to clone; every clone shares the same table. Channels appear on the
/// first registration and disappear with the last unregistration.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<ChannelMap>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `sink` under `channel_id`.
    ///
    /// The returned [`Registration`] removes exactly this sink from exactly
    /// this channel, either explicitly or when dropped.
    pub fn register(&self, channel_id: &str, sink: Sink) -> Registration {
        let sink_id = sink.id;
        {
            let mut channels = self.channels.write();
            let set = channels.entry(channel_id.to_string()).or_insert_with(|| {
                info!("Creating SSE channel: {}", channel_id);
                HashMap::new()
            });
            set.insert(sink_id, sink);
            debug!(
                "Registered sink {} on {} ({} subscribers)",
                sink_id,
                channel_id,
                set.len()
            );
        }

        Registration {
            registry: self.clone(),
            channel_id: channel_id.to_string(),
            sink_id,
            released: AtomicBool::new(false),
        }
    }

    /// Publish one event to every sink currently on `channel_id`.
    ///
    /// Returns how many sinks accepted the frame. A channel with no
    /// subscribers is a no-op. Sinks whose write fails are pruned before
    /// this returns; the remaining sinks still get the frame.
    pub fn broadcast(
        &self,
        channel_id: &str,
        event_type: EventType,
        data: Map<String, Value>,
    ) -> usize {
        // Snapshot so the lock is not held while writing
        let sinks: Vec<Sink> = match self.channels.read().get(channel_id) {
            Some(set) => set.values().cloned().collect(),
            None => {
                debug!("No subscribers on {}, dropping {}", channel_id, event_type);
                return 0;
            }
        };

        let envelope = EventEnvelope::new(event_type, data);
        let frame = match envelope.to_frame() {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                error!("Failed to encode {} for {}: {}", event_type, channel_id, e);
                return 0;
            }
        };

        info!(
            "Broadcasting {} event to {} ({} subscribers)",
            event_type,
            channel_id,
            sinks.len()
        );

        let mut delivered = 0;
        let mut dead = Vec::new();
        for sink in &sinks {
            match sink.try_write(&frame) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Sink {} on {} is stalled, dropping it", sink.id, channel_id);
                    dead.push(sink.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Sink {} on {} is closed, dropping it", sink.id, channel_id);
                    dead.push(sink.id);
                }
            }
        }

        if !dead.is_empty() {
            let mut channels = self.channels.write();
            for id in dead {
                Self::remove_locked(&mut channels, channel_id, id);
            }
        }

        delivered
    }

    /// Current subscriber count of one channel.
    pub fn count(&self, channel_id: &str) -> usize {
        self.channels.read().get(channel_id).map_or(0, HashMap::len)
    }

    /// `(channel, subscribers)` for every live channel, sorted by id.
    pub fn channels(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self
            .channels
            .read()
            .iter()
            .map(|(id, set)| (id.clone(), set.len()))
            .collect();
        out.sort();
        out
    }

    fn unregister(&self, channel_id: &str, sink_id: Uuid) {
        let mut channels = self.channels.write();
        Self::remove_locked(&mut channels, channel_id, sink_id);
    }

    fn remove_locked(channels: &mut ChannelMap, channel_id: &str, sink_id: Uuid) {
        let Some(set) = channels.get_mut(channel_id) else {
            return;
        };
        if set.remove(&sink_id).is_some() {
            debug!("Unregistered sink {} from {}", sink_id, channel_id);
        }
        if set.is_empty() {
            channels.remove(channel_id);
            info!("Removed empty SSE channel: {}", channel_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Handle returned by [`ChannelRegistry::register`].
///
/// Releasing twice is a no-op. Dropping the handle releases it.
#[derive(Debug)]
pub struct Registration {
    registry: ChannelRegistry,
    channel_id: String,
    sink_id: Uuid,
    released: AtomicBool,
}

impl Registration {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn unregister(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.unregister(&self.channel_id, self.sink_id);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}
