//! Reconnecting stream consumer.
//!
//! One consumer follows one channel. It opens the stream, decodes envelopes,
//! hands them to listeners by type and, when the stream fails, retries with
//! exponential backoff until the attempt cap is reached.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!      ▲                          │                      │
//!      └──── failure (retry timer scheduled) ◀───────────┘
//! any state ──disconnect()──▶ Closed   (no automatic retries)
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use shared::types::sse::{EventEnvelope, EventType};
use shared::types::{ADMIN_CHANNEL, SseDecoder, user_channel};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::listeners::{Listener, ListenerId, ListenerRegistry, Subscription};
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::transport::{ByteStream, HttpTransport, Transport, TransportError};

// ---------------------------------------------------------------------------
// Config, status, errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Subscription route, e.g. `http://127.0.0.1:1337/api/events`
    pub endpoint: String,
    pub reconnect: ReconnectConfig,
    pub connect_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Where the consumer is in its lifecycle.
///
/// A failed open or a lost stream is the error step: `CONNECTION_ERROR` is
/// emitted and the state settles in `Disconnected`, both while a retry is
/// pending and after retries gave up ([`ConnectionStatus::gave_up`] tells
/// the two apart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not yet connected, or recovering from an error.
    Disconnected,
    Connecting,
    Connected,
    /// Closed by [`StreamConsumer::disconnect`]
    Closed,
}

/// Snapshot for UIs that show connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    /// Retries exhausted; only an explicit `connect()` starts over.
    pub gave_up: bool,
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    phase: ConnectionState,
    policy: ReconnectPolicy,
    /// Cancelled by `disconnect()`; stops the reader, a pending retry timer
    /// and an in-flight open. Replaced with a fresh token afterwards.
    session: CancellationToken,
    retry: Option<JoinHandle<()>>,
    gave_up: bool,
    last_heartbeat: Option<Instant>,
}

struct Inner {
    channel: String,
    url: String,
    transport: Arc<dyn Transport>,
    listeners: ListenerRegistry,
    state: Mutex<Shared>,
}

/// Follows one channel of the hub. See the module docs for the lifecycle.
///
/// Dropping the consumer stops its background tasks without emitting
/// `CONNECTION_CLOSED`.
pub struct StreamConsumer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("channel", &self.inner.channel)
            .field("status", &self.status())
            .finish()
    }
}

impl StreamConsumer {
    /// Consumer for a buyer's private channel, `user-{userId}`.
    pub fn for_user(config: ConsumerConfig, user_id: &str) -> Self {
        Self::new(config, user_channel(user_id))
    }

    /// Consumer for the shared admin channel.
    pub fn for_admin(config: ConsumerConfig) -> Self {
        Self::new(config, ADMIN_CHANNEL.to_string())
    }

    pub fn new(config: ConsumerConfig, channel: String) -> Self {
        let transport = Arc::new(HttpTransport::new(config.connect_timeout));
        Self::with_transport(config, channel, transport)
    }

    pub fn with_transport(
        config: ConsumerConfig,
        channel: String,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let url = stream_url(&config.endpoint, &channel);
        Self {
            inner: Arc::new(Inner {
                channel,
                url,
                transport,
                listeners: ListenerRegistry::new(),
                state: Mutex::new(Shared {
                    phase: ConnectionState::Disconnected,
                    policy: ReconnectPolicy::new(config.reconnect),
                    session: CancellationToken::new(),
                    retry: None,
                    gave_up: false,
                    last_heartbeat: None,
                }),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Open the stream.
    ///
    /// Resolves immediately when already connected and fails with
    /// [`ConsumerError::AlreadyConnecting`] while another attempt is in
    /// flight. A failed attempt emits `CONNECTION_ERROR` and schedules a
    /// retry before returning the error. Calling this after `disconnect()`
    /// or after retries gave up starts a fresh session.
    pub async fn connect(&self) -> Result<(), ConsumerError> {
        Inner::connect(&self.inner, None).await
    }

    /// Close the stream, cancel any pending retry and emit
    /// `CONNECTION_CLOSED`. A second call is a no-op.
    pub fn disconnect(&self) {
        {
            let mut s = self.inner.state.lock();
            if s.phase == ConnectionState::Closed {
                return;
            }
            s.phase = ConnectionState::Closed;
            s.session.cancel();
            s.session = CancellationToken::new();
            if let Some(retry) = s.retry.take() {
                retry.abort();
            }
            s.policy.reset();
            s.gave_up = false;
        }

        info!("Disconnected from {}", self.inner.channel);
        self.inner.emit(
            EventType::ConnectionClosed,
            json!({ "channel": self.inner.channel }),
        );
    }

    /// Register a listener for one event type.
    pub fn on<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner.listeners.on(event_type, listener)
    }

    pub fn off(&self, event_type: EventType, id: ListenerId) -> bool {
        self.inner.listeners.off(event_type, id)
    }

    /// Remove every registration of `listener` for `event_type`.
    pub fn off_listener(&self, event_type: EventType, listener: &Listener) -> usize {
        self.inner.listeners.off_listener(event_type, listener)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    /// The stream is receive-only: nothing is sent and `false` is returned.
    /// Present for callers that hold a generic two-way channel.
    pub fn send(&self, message: &str) -> bool {
        warn!(
            "Stream to {} is receive-only; dropping {} byte outbound message",
            self.inner.channel,
            message.len()
        );
        false
    }

    pub fn status(&self) -> ConnectionStatus {
        let s = self.inner.state.lock();
        ConnectionStatus {
            state: s.phase,
            connected: s.phase == ConnectionState::Connected,
            reconnect_attempts: s.policy.attempt_count(),
            max_reconnect_attempts: s.policy.max_attempts(),
            gave_up: s.gave_up,
        }
    }

    /// When the last `HEARTBEAT` arrived on the current connection.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.inner.state.lock().last_heartbeat
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        let mut s = self.inner.state.lock();
        s.session.cancel();
        if let Some(retry) = s.retry.take() {
            retry.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

impl Inner {
    /// `retry` carries the session of the timer that fired; `None` for a
    /// caller-initiated connect.
    async fn connect(this: &Arc<Inner>, retry: Option<CancellationToken>) -> Result<(), ConsumerError> {
        let session = {
            let mut s = this.state.lock();
            if retry.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(ConsumerError::Cancelled);
            }
            match s.phase {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(ConsumerError::AlreadyConnecting),
                ConnectionState::Disconnected | ConnectionState::Closed => {}
            }
            if retry.is_none() {
                // A caller-initiated attempt supersedes any pending retry
                if let Some(pending) = s.retry.take() {
                    pending.abort();
                }
                if s.gave_up {
                    s.policy.reset();
                    s.gave_up = false;
                }
            }
            s.phase = ConnectionState::Connecting;
            s.session.clone()
        };

        debug!("Opening {}", this.url);
        let opened = tokio::select! {
            biased;
            _ = session.cancelled() => return Err(ConsumerError::Cancelled),
            res = this.transport.open(&this.url) => res,
        };

        match opened {
            Ok(stream) => {
                {
                    let mut s = this.state.lock();
                    if session.is_cancelled() {
                        return Err(ConsumerError::Cancelled);
                    }
                    s.phase = ConnectionState::Connected;
                    s.policy.reset();
                    s.gave_up = false;
                    s.last_heartbeat = None;
                }

                info!("Connected to {}", this.channel);
                this.emit(EventType::ConnectionOpen, json!({ "channel": this.channel }));
                tokio::spawn(Inner::read_loop(Arc::clone(this), stream, session));
                Ok(())
            }
            Err(e) => {
                {
                    let mut s = this.state.lock();
                    if session.is_cancelled() {
                        return Err(ConsumerError::Cancelled);
                    }
                    s.phase = ConnectionState::Disconnected;
                }

                warn!("Failed to open {}: {}", this.channel, e);
                Inner::fail(this, &session, &e.to_string());
                Err(e.into())
            }
        }
    }

    async fn read_loop(this: Arc<Inner>, mut stream: ByteStream, session: CancellationToken) {
        let mut decoder = SseDecoder::new();

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = session.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for payload in decoder.feed(&chunk) {
                        if session.is_cancelled() {
                            return;
                        }
                        this.handle_payload(&payload);
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream closed by server".to_string(),
            }
        };

        {
            let mut s = this.state.lock();
            if session.is_cancelled() {
                return;
            }
            s.phase = ConnectionState::Disconnected;
        }

        warn!("Lost stream for {}: {}", this.channel, reason);
        Inner::fail(&this, &session, &reason);
    }

    /// Schedule the next retry, then report the failure with the retry
    /// outcome: `{error, reconnectAttempts, terminal}`. `terminal` is true
    /// once retries are exhausted and nothing further will be attempted.
    fn fail(this: &Arc<Inner>, session: &CancellationToken, reason: &str) {
        let (attempts, terminal) = Inner::schedule_reconnect(this, session);
        this.emit(
            EventType::ConnectionError,
            json!({
                "error": reason,
                "reconnectAttempts": attempts,
                "terminal": terminal,
            }),
        );
    }

    /// Arm the single retry timer, or give up once the cap is reached.
    /// Returns the attempt count and whether retries gave up.
    fn schedule_reconnect(this: &Arc<Inner>, session: &CancellationToken) -> (u32, bool) {
        let mut s = this.state.lock();
        if session.is_cancelled() || s.phase == ConnectionState::Closed {
            return (s.policy.attempt_count(), false);
        }

        let Some(delay) = s.policy.next_delay() else {
            s.gave_up = true;
            error!(
                "Giving up on {} after {} reconnect attempts",
                this.channel,
                s.policy.attempt_count()
            );
            return (s.policy.attempt_count(), true);
        };

        info!(
            "Reconnecting to {} in {}ms (attempt {}/{})",
            this.channel,
            delay.as_millis(),
            s.policy.attempt_count(),
            s.policy.max_attempts()
        );

        if let Some(previous) = s.retry.take() {
            previous.abort();
        }

        let inner = Arc::clone(this);
        let token = session.clone();
        s.retry = Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Fired: this task is no longer the pending timer
            inner.state.lock().retry.take();
            if let Err(e) = Inner::connect(&inner, Some(token)).await {
                debug!("Reconnect attempt for {} failed: {}", inner.channel, e);
            }
        }));
        (s.policy.attempt_count(), false)
    }

    fn handle_payload(&self, payload: &str) {
        let envelope = match EventEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping frame on {}: {}", self.channel, e);
                return;
            }
        };

        if envelope.event_type() == EventType::Heartbeat {
            trace!("Heartbeat on {}", self.channel);
            self.state.lock().last_heartbeat = Some(Instant::now());
            return;
        }

        self.listeners.dispatch(&envelope);
    }

    fn emit(&self, event_type: EventType, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.listeners.dispatch(&EventEnvelope::new(event_type, data));
    }
}

/// `<endpoint>?channel=<id>`, keeping any query the endpoint already has.
pub fn stream_url(endpoint: &str, channel: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(channel.as_bytes()).collect();
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}channel={}", endpoint, sep, encoded)
}
