use std::{future::Future, net::SocketAddr};

use tokio::net::TcpListener;

use super::{routes::create_router, state::ServerState};
use crate::SandplaneResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The control plane HTTP server.
pub struct SandplaneServer {
    addr: SocketAddr,
    state: ServerState,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandplaneServer {
    /// Creates a server that will listen on `addr`.
    pub fn new(addr: SocketAddr, state: ServerState) -> Self {
        Self { addr, state }
    }

    /// The state shared with the handlers.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> SandplaneResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let app = create_router(self.state);

        tracing::info!(addr = %self.addr, "control plane listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("control plane stopped serving");
        Ok(())
    }
}
