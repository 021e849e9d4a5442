use std::sync::Arc;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::handlers::http::Router;

/// Accept connections until `state.shutdown` is cancelled.
///
/// At most `server.max_connections` connections are served at once; extra
/// connections are closed straight away. On shutdown every open stream ends
/// (releasing its registration) and connections are closed gracefully.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let (max_connections, stream_path) = {
        let cfg = state.config.read().await;
        (cfg.server.max_connections, cfg.stream.path.clone())
    };
    let router = Arc::new(Router::hub(&stream_path));
    let permits = Arc::new(Semaphore::new(max_connections));

    info!(
        "Listening on http://{} (stream route {})",
        listener.local_addr()?,
        stream_path
    );

    loop {
        let (stream, peer) = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
            warn!("Connection limit {} reached, closing {}", max_connections, peer);
            drop(stream);
            continue;
        };

        let io = TokioIo::new(stream);
        let router = Arc::clone(&router);
        let state = state.clone();

        tokio::task::spawn(async move {
            let _permit = permit;
            let shutdown = state.shutdown.clone();
            let service = service_fn(move |req| {
                let router = Arc::clone(&router);
                let state = state.clone();
                async move { Ok::<_, std::convert::Infallible>(router.handle(req, state).await) }
            });

            let conn = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, service);
            tokio::pin!(conn);

            let result = tokio::select! {
                res = conn.as_mut() => res,
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(err) = result {
                debug!("Connection from {} ended with error: {:?}", peer, err);
            }
        });
    }

    info!("Accept loop stopped");
    Ok(())
}
