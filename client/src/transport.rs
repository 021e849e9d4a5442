//! Opening the event stream.
//!
//! [`Transport`] is the seam the consumer talks to; [`HttpTransport`] is the
//! real HTTP/1.1 implementation on top of hyper.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use http::header::{ACCEPT, CACHE_CONTROL, HOST};
use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, BodyStream, Empty};
use hyper_util::rt::TokioIo;
use shared::types::ErrorResponse;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// Raw body chunks of an open stream. Ends when the server closes it.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint {0}: {1}")]
    InvalidUrl(String, String),

    #[error("Failed to connect to {0}: {1}")]
    Connect(String, #[source] std::io::Error),

    #[error("Timed out connecting to {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("Server answered {0}: {1}")]
    Status(StatusCode, String),
}

pub trait Transport: Send + Sync + 'static {
    /// Open a stream at `url`. Resolves once the response head has arrived.
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ByteStream, TransportError>>;
}

/// Plain HTTP/1.1 over TCP. TLS is expected to be terminated in front of
/// the hub.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ByteStream, TransportError>> {
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;
        Box::pin(async move { open_stream(url, connect_timeout).await })
    }
}

async fn open_stream(url: String, connect_timeout: Duration) -> Result<ByteStream, TransportError> {
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| TransportError::InvalidUrl(url.clone(), e.to_string()))?;

    if uri.scheme_str() != Some("http") {
        return Err(TransportError::InvalidUrl(
            url,
            "only http:// endpoints are supported".to_string(),
        ));
    }
    let (host, authority) = match (uri.host(), uri.authority()) {
        (Some(host), Some(authority)) => (host.to_string(), authority.to_string()),
        _ => return Err(TransportError::InvalidUrl(url, "missing host".to_string())),
    };
    let port = uri.port_u16().unwrap_or(80);
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| TransportError::Timeout(authority.clone()))?
        .map_err(|e| TransportError::Connect(authority.clone(), e))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tcp)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Stream connection ended with error: {}", e);
        }
    });

    let req = Request::get(path)
        .header(HOST, authority.as_str())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(Empty::<Bytes>::new())?;

    let response = tokio::time::timeout(connect_timeout, sender.send_request(req))
        .await
        .map_err(|_| TransportError::Timeout(authority.clone()))??;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.into_body().collect().await?.to_bytes();
        let reason = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| e.summary())
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
        return Err(TransportError::Status(status, reason));
    }

    let stream = BodyStream::new(response.into_body())
        .filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(TransportError::Http(e))),
            }
        })
        // The request sender lives as long as the body
        .map(move |chunk| {
            let _keep_alive = &sender;
            chunk
        });

    Ok(stream.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let transport = HttpTransport::new(Duration::from_secs(1));
        let err = transport
            .open("https://example.com/api/events?channel=user-1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidUrl(_, _)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(1));
        let err = transport
            .open(&format!("http://{}/api/events?channel=user-1", addr))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Connect(_, _)));
    }
}
