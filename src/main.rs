//! Facilitator HTTP entrypoint.
//!
//! Launches an axum server exposing the protocol interface for payment
//! verification and settlement:
//!
//! - `GET /facilitator/supported` – supported payment kinds
//! - `GET /facilitator/verify` – verification request schema
//! - `POST /facilitator/verify` – verify a payment payload
//! - `GET /facilitator/settle` – settlement request schema
//! - `POST /facilitator/settle` – settle a verified payment on-ledger
//!
//! Environment: `.env` values are loaded at startup; `HOST`/`PORT` control
//! the bind address; `WALLET_KEYPAIR`, `SOLANA_RPC`, and `SOLANA_NETWORK`
//! configure the ledger side. See [`sol402::config::Config`].

use axum::Router;
use axum::http::Method;
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use sol402::config::Config;
use sol402::facilitator_local::FacilitatorLocal;
use sol402::{handlers, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    telemetry::init_tracing();

    let config = Config::parse();
    let facilitator = FacilitatorLocal::new(config.provider()?);

    let app = Router::new()
        .nest("/facilitator", handlers::routes())
        .with_state(Arc::new(facilitator))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("starting server at http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
