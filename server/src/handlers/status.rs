use hyper::Request;
use serde::Serialize;

use crate::AppState;
use crate::handlers::http::utils::{HubResponse, deliver_success_json};

#[derive(Debug, Serialize)]
struct ChannelCount {
    channel: String,
    subscribers: usize,
}

/// `GET /health`
pub async fn handle_health<B>(
    _req: Request<B>,
    _state: AppState,
) -> anyhow::Result<HubResponse> {
    deliver_success_json::<()>(None)
}

/// `GET /api/channels`: live channels and their subscriber counts.
pub async fn handle_channels<B>(
    _req: Request<B>,
    state: AppState,
) -> anyhow::Result<HubResponse> {
    let channels: Vec<ChannelCount> = state
        .registry
        .channels()
        .into_iter()
        .map(|(channel, subscribers)| ChannelCount {
            channel,
            subscribers,
        })
        .collect();
    deliver_success_json(Some(channels))
}
