pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod rate_limit;
pub mod routes;
pub mod users;

use config::Listener;
use rate_limit::ClientRateLimiter;
use gateway::GithubClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use users::UserStore;
use vault::CredentialVault;

#[derive(thiserror::Error, Debug)]
pub enum ApiServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub github: GithubClient,
    pub users: Arc<dyn UserStore>,
    pub vault: Arc<CredentialVault>,
    pub rate_limiter: Arc<ClientRateLimiter>,
}

pub async fn serve(listener: &Listener, state: AppState) -> Result<(), ApiServerError> {
    let app = routes::router(state);
    let tcp_listener = TcpListener::bind(listener.address()).await?;
    tracing::info!(address = %listener.address(), "api listening");
    axum::serve(
        tcp_listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
