//! Account confirmation backend.
//!
//! # General Infrastructure
//! - Frontend talks to this server over JSON; confirmation links come back
//!   in through plain GETs because they are clicked from an email client,
//!   possibly on a different device than the one that submitted the form
//! - Redis holds the credential records; the transactional mail API
//!   delivers the confirmation links
//! - The submitting browser discovers completion by polling the two status
//!   endpoints, there is no push channel
//!
//! # Confirmation Flow
//!
//! - On signup we create (or overwrite) an unverified record and email a
//!   signed link carrying a snapshot of the record's version counter
//! - Re-submitting a signup bumps the counter, which kills the earlier link
//! - On password reset the new credential rides inside the link itself and
//!   is installed only when the link is clicked; the click bumps the counter
//! - The frontend polls every 5 seconds for up to 150 seconds, then gives up
//!   and asks the user to retry
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! `````
//!
//! Run against a local Redis.
//! ```sh
//! REDIS_URL=redis://localhost:6379 cargo run -p server
//! ```
use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod account;
pub mod config;
pub mod database;
pub mod error;
pub mod mailer;
pub mod poll;
pub mod routes;
pub mod state;
pub mod store;
pub mod token;

use routes::{
    login_handler, reset_handler, reset_status_handler, signup_handler, verify_handler,
    verify_reset_handler, verify_status_handler,
};
use state::State;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/api/auth/signup", post(signup_handler))
        .route("/api/auth/verify", get(verify_handler))
        .route("/api/auth/reset", post(reset_handler))
        .route("/api/auth/verify-reset", get(verify_reset_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/verify-status", get(verify_status_handler))
        .route("/api/auth/check-reset", get(reset_status_handler))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
