use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use hyper::{Method, Request, StatusCode};
use tracing::{debug, error};

use crate::AppState;
use crate::handlers::http::utils::json_response::{self, HubResponse};
use crate::handlers::{orders, sse, status};

// ---------------------------------------------------------------------------
// Handler type alias
// ---------------------------------------------------------------------------
//
// No auth tier: the hub sits behind the marketplace's request pipeline,
// which authenticates before forwarding.

type RouteHandler = Box<
    dyn Fn(
            Request<hyper::body::Incoming>,
            AppState,
        )
            -> Pin<Box<dyn Future<Output = Result<HubResponse>> + Send>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

struct Route {
    method: Method,
    path: String,
    handler: RouteHandler,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    routes: Vec<Route>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes_count", &self.routes.len())
            .finish()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Every route the hub serves. `stream_path` is the configured
    /// subscription route.
    pub fn hub(stream_path: &str) -> Self {
        Self::new()
            .get("/health", |req, state| status::handle_health(req, state))
            .get("/api/channels", |req, state| status::handle_channels(req, state))
            .get(stream_path, |req, state| sse::handle_sse_subscribe(req, state))
            .post("/api/orders/created", |req, state| {
                orders::handle_order_created(req, state)
            })
            .post("/api/orders/status", |req, state| {
                orders::handle_order_status(req, state)
            })
    }

    pub fn get<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<hyper::body::Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HubResponse>> + Send + 'static,
    {
        self.add(Method::GET, path, handler)
    }

    pub fn post<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<hyper::body::Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HubResponse>> + Send + 'static,
    {
        self.add(Method::POST, path, handler)
    }

    fn add<F, Fut>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Request<hyper::body::Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HubResponse>> + Send + 'static,
    {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            handler: Box::new(move |req, state| Box::pin(handler(req, state))),
        });
        self
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    pub async fn route(
        &self,
        req: Request<hyper::body::Incoming>,
        state: AppState,
    ) -> Result<HubResponse> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{} {}", method, path);

        let mut path_known = false;
        for route in &self.routes {
            if !Self::path_matches(&route.path, &path) {
                continue;
            }
            path_known = true;
            if route.method == method {
                return (route.handler)(req, state).await;
            }
        }

        if path_known {
            return json_response::deliver_error_json(
                "METHOD_NOT_ALLOWED",
                "Method not allowed",
                StatusCode::METHOD_NOT_ALLOWED,
            )
            .context("Failed to deliver 405 response");
        }

        json_response::deliver_error_json("NOT_FOUND", "Endpoint not found", StatusCode::NOT_FOUND)
            .context("Failed to deliver 404 response")
    }

    /// Like [`Router::route`], but a handler error becomes a JSON 500.
    pub async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
        state: AppState,
    ) -> HubResponse {
        match self.route(req, state).await {
            Ok(response) => response,
            Err(e) => {
                error!("Handler failed: {:#}", e);
                json_response::deliver_error_json(
                    "INTERNAL",
                    "Internal server error",
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
                .unwrap_or_else(|_| json_response::internal_error())
            }
        }
    }

    // ── Path matching ─────────────────────────────────────────────────────────

    pub fn path_matches(route_path: &str, request_path: &str) -> bool {
        // Strip query string from incoming request path before comparing.
        let clean = request_path.split('?').next().unwrap_or(request_path);
        let clean = if clean.len() > 1 {
            clean.trim_end_matches('/')
        } else {
            clean
        };
        route_path == clean
    }
}
