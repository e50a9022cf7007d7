mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use abode_api::{AppState, AppStateInner};
use abode_engine::{Engine, PushDeliverer, SystemClock};
use abode_gateway::connection;
use abode_push::{HttpPushDeliverer, LogPushDeliverer};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abode=debug,abode_engine=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {:#}", e);
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Fix the ABODE_* settings in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(abode_db::Database::open(&config.db_path)?);

    let push: Arc<dyn PushDeliverer> = match &config.push {
        Some(push) => {
            info!("Push relay: {}", push.endpoint);
            Arc::new(HttpPushDeliverer::new(
                push.endpoint.clone(),
                push.api_key.clone(),
                config.engine.push_timeout,
            )?)
        }
        None => {
            warn!("ABODE_PUSH_ENDPOINT unset, push notifications are only logged");
            Arc::new(LogPushDeliverer)
        }
    };

    let engine = Arc::new(Engine::from_database(
        db.clone(),
        push,
        Arc::new(SystemClock),
        &config.engine,
    )?);

    // Reminder ticker, stopped on shutdown
    let shutdown = CancellationToken::new();
    let dispatch_loop = engine.spawn_dispatch_loop(shutdown.clone());

    let state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        sessions: abode_gateway::SessionTable::new(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = abode_api::router(state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Abode server listening on {}", config.addr);
    info!(
        "Reminder dispatch every {:?} (tolerance ±{:?}), chat fallback {:?}",
        config.engine.dispatch_interval, config.engine.dispatch_tolerance, config.engine.chat_fallback
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = dispatch_loop.await {
        warn!("Reminder dispatcher ended abnormally: {}", e);
    }

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.sessions.clone(), state.jwt_secret.clone())
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
