use anyhow::Context;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{Request, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::types::order::to_data;
use shared::types::sse::EventType;
use shared::types::{ADMIN_CHANNEL, OrderCreated, OrderStatusUpdate, user_channel};
use tracing::{info, warn};

use crate::AppState;
use crate::handlers::http::utils::{HubResponse, deliver_error_json, deliver_success_json};
use crate::handlers::sse::ChannelRegistry;

// ---------------------------------------------------------------------------
// OrderEventProducer
// ---------------------------------------------------------------------------

/// Sinks reached on each channel by one producer call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub channels: Vec<ChannelDelivery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub delivered: usize,
}

impl Delivery {
    fn push(&mut self, channel: &str, delivered: usize) {
        self.channels.push(ChannelDelivery {
            channel: channel.to_string(),
            delivered,
        });
    }

    pub fn total(&self) -> usize {
        self.channels.iter().map(|c| c.delivered).sum()
    }
}

/// Turns order mutations into broadcasts.
///
/// Callers invoke each entry point once per mutation; nothing is retried or
/// buffered here.
#[derive(Debug, Clone)]
pub struct OrderEventProducer {
    registry: ChannelRegistry,
}

impl OrderEventProducer {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    /// New orders go to the admin channel only.
    pub fn order_created(&self, order: &OrderCreated) -> anyhow::Result<Delivery> {
        let data = to_data(order).context("Failed to encode ORDER_CREATED payload")?;

        let mut delivery = Delivery::default();
        let n = self
            .registry
            .broadcast(ADMIN_CHANNEL, EventType::OrderCreated, data);
        delivery.push(ADMIN_CHANNEL, n);

        info!(
            "Order {} created by user {} → {} admin subscribers",
            order.order_id, order.user_id, n
        );
        Ok(delivery)
    }

    /// Status changes go to the owner's channel and to the admin channel.
    /// Admin dashboards filter by `userId` themselves.
    pub fn order_status_changed(&self, update: &OrderStatusUpdate) -> anyhow::Result<Delivery> {
        let data = to_data(update).context("Failed to encode ORDER_STATUS_CHANGED payload")?;
        let owner = user_channel(&update.user_id);

        let mut delivery = Delivery::default();
        let n = self
            .registry
            .broadcast(&owner, EventType::OrderStatusChanged, data.clone());
        delivery.push(&owner, n);
        let n = self
            .registry
            .broadcast(ADMIN_CHANNEL, EventType::OrderStatusChanged, data);
        delivery.push(ADMIN_CHANNEL, n);

        info!(
            "Order {} is now {} → {} subscribers",
            update.order_id,
            update.status,
            delivery.total()
        );
        Ok(delivery)
    }
}

// ---------------------------------------------------------------------------
// HTTP entry points
// ---------------------------------------------------------------------------

/// Largest order notification body the hub will buffer.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

enum BodyError {
    TooLarge,
    Invalid(String),
}

async fn read_json<T, B>(req: Request<B>) -> Result<T, BodyError>
where
    T: DeserializeOwned,
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => return Err(BodyError::TooLarge),
        Err(e) => return Err(BodyError::Invalid(format!("Failed to read body: {}", e))),
    };
    serde_json::from_slice(&body).map_err(|e| BodyError::Invalid(e.to_string()))
}

fn reject(event: EventType, err: BodyError) -> anyhow::Result<HubResponse> {
    match err {
        BodyError::TooLarge => {
            warn!("Rejected {} notification: body over {} bytes", event, MAX_BODY_BYTES);
            deliver_error_json(
                "PAYLOAD_TOO_LARGE",
                &format!("Body exceeds {} bytes", MAX_BODY_BYTES),
                StatusCode::PAYLOAD_TOO_LARGE,
            )
        }
        BodyError::Invalid(reason) => {
            warn!("Rejected {} notification: {}", event, reason);
            deliver_error_json("INVALID_PAYLOAD", &reason, StatusCode::BAD_REQUEST)
        }
    }
}

/// `POST /api/orders/created`
pub async fn handle_order_created<B>(
    req: Request<B>,
    state: AppState,
) -> anyhow::Result<HubResponse>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let order: OrderCreated = match read_json(req).await {
        Ok(order) => order,
        Err(e) => return reject(EventType::OrderCreated, e),
    };

    let delivery = state.producer.order_created(&order)?;
    deliver_success_json(Some(delivery))
}

/// `POST /api/orders/status`
pub async fn handle_order_status<B>(
    req: Request<B>,
    state: AppState,
) -> anyhow::Result<HubResponse>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let update: OrderStatusUpdate = match read_json(req).await {
        Ok(update) => update,
        Err(e) => return reject(EventType::OrderStatusChanged, e),
    };

    let delivery = state.producer.order_status_changed(&update)?;
    deliver_success_json(Some(delivery))
}
