//! gitrow server
//!
//! Persists pushes as pack and ref rows and answers fetches and ref
//! listings over HTTP. The binary in `main.rs` wires configuration,
//! logging and shutdown around [`serve`].

pub mod backend;
pub mod error;
pub mod fetch;
pub mod notify;
pub mod push;
pub mod routes;

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

pub use backend::Backend;
pub use error::ServerError;
pub use fetch::{FetchPackService, FetchedPack};
pub use notify::{BroadcastSink, LogSink, NotificationSink};
pub use push::PushPersistenceService;
pub use routes::{build_router, AppState};

/// Serve the router on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
