use anyhow::Context;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::{Request, Response, StatusCode, body::Frame};
use shared::types::frame::encode_comment;
use shared::types::sse::{EventEnvelope, SseResult};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::handlers::http::utils::{HubResponse, deliver_error_json};

// ---------------------------------------------------------------------------
// SseStreamBuilder
// ---------------------------------------------------------------------------

/// Headers on every stream response. `x-accel-buffering` stops nginx from
/// holding frames back.
pub const STREAM_HEADERS: [(&str, &str); 4] = [
    ("content-type", "text/event-stream"),
    ("cache-control", "no-cache"),
    ("connection", "keep-alive"),
    ("x-accel-buffering", "no"),
];

pub struct SseStreamBuilder;

impl SseStreamBuilder {
    /// First bytes on a new stream. A comment, so consumers skip it.
    pub fn connected_frame() -> Bytes {
        Bytes::from(encode_comment("connected"))
    }

    pub fn heartbeat_frame() -> SseResult<Bytes> {
        EventEnvelope::heartbeat().to_frame().map(Bytes::from)
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

fn parse_query<B>(req: &Request<B>) -> HashMap<String, String> {
    form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

/// The `channel` query parameter, if present and non-blank.
pub fn channel_param<B>(req: &Request<B>) -> Option<String> {
    parse_query(req)
        .remove("channel")
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

// ---------------------------------------------------------------------------
// SSE subscribe handler
// ---------------------------------------------------------------------------

/// Open a long-lived stream bound to one channel.
///
/// ### Query parameters
/// | Param     | Description                                      |
/// |-----------|--------------------------------------------------|
/// | `channel` | `user-{userId}` or `admin-orders` (required)     |
///
/// ### Frames emitted
/// ```text
/// : connected                     (written once, flushes headers)
/// data: {"type":"ORDER_...",...}  (one per broadcast on the channel)
/// data: {"type":"HEARTBEAT",...}  (every `stream.heartbeat_secs`)
/// ```
///
/// The registration lives inside the body stream, so it is released however
/// the stream ends: client hang-up or a failed write (hyper drops the body),
/// server shutdown, or the registry pruning this sink.
pub async fn handle_sse_subscribe<B>(
    req: Request<B>,
    state: AppState,
) -> anyhow::Result<HubResponse> {
    let Some(channel) = channel_param(&req) else {
        warn!("SSE subscribe rejected: missing channel parameter");
        return deliver_error_json(
            "MISSING_CHANNEL",
            "Missing required query parameter: channel",
            StatusCode::BAD_REQUEST,
        );
    };

    let stream_cfg = state.config.stream().await;
    let interval = stream_cfg.heartbeat_interval();

    let (sink, mut rx) = crate::handlers::sse::Sink::channel(stream_cfg.sink_buffer);
    let sink_id = sink.id();
    let registration = state.registry.register(&channel, sink);
    let shutdown = state.shutdown.clone();

    info!("SSE connected: channel={} sink={}", channel, sink_id);

    let channel_log = channel.clone();
    let stream = async_stream::stream! {
        let registration = registration;
        yield Ok::<Bytes, Infallible>(SseStreamBuilder::connected_frame());

        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("SSE stream closing for shutdown: channel={}", channel);
                    None
                }
                frame = rx.recv() => {
                    if frame.is_none() {
                        warn!("SSE sink {} was pruned from {}", sink_id, channel);
                    }
                    frame
                }
                _ = heartbeat.tick() => match SseStreamBuilder::heartbeat_frame() {
                    Ok(frame) => {
                        debug!("SSE heartbeat → channel={}", channel);
                        Some(frame)
                    }
                    Err(e) => {
                        error!("Failed to encode heartbeat: {}", e);
                        None
                    }
                },
            };

            match next {
                Some(frame) => yield Ok::<Bytes, Infallible>(frame),
                None => break,
            }
        }

        registration.unregister();
        info!("SSE disconnected: channel={} sink={}", channel, sink_id);
    };

    let body = BodyExt::boxed(StreamBody::new(
        stream.map(|result| result.map(Frame::data)),
    ));

    let builder = STREAM_HEADERS
        .iter()
        .fold(Response::builder().status(StatusCode::OK), |b, (name, value)| {
            b.header(*name, *value)
        });
    builder
        .body(body)
        .with_context(|| format!("Failed to build stream response for {}", channel_log))
}
