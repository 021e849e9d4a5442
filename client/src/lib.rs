//! Consumer side of the order-event hub.
//!
//! [`StreamConsumer`] holds one channel's stream open, survives drops with
//! capped exponential backoff and routes envelopes to typed listeners.

pub mod consumer;
pub mod listeners;
pub mod reconnect;
pub mod transport;

pub use consumer::{
    ConnectionState, ConnectionStatus, ConsumerConfig, ConsumerError, StreamConsumer, stream_url,
};
pub use listeners::{Listener, ListenerId, ListenerRegistry, Subscription};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::{ByteStream, HttpTransport, Transport, TransportError};
