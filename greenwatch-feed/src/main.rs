use std::path::PathBuf;

use axum::extract::State;
use axum::{Json, Router, routing::get};
use clap::Parser;
use greenwatch_core::{Band, ParameterKind, Reading};
use greenwatch_feed::{
    Config, ConnectionHandle, ConnectionManager, ConnectionState, DashboardState, FeedConfig,
    MessageRouter, MockTransport, Store, Transport, WsTransport,
};
use greenwatch_feed::config::{ENDPOINT_ENV, resolve_endpoint};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "greenwatch-feed")]
#[command(about = "Greenwatch real-time telemetry feed")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "greenwatch.toml")]
    config: PathBuf,
}

#[derive(Clone)]
struct AppState {
    store: Store,
    connection: ConnectionHandle,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,greenwatch_feed=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    if !greenwatch_tls::install_crypto_provider() {
        warn!("A rustls crypto provider was already installed");
    }

    let store = Store::new();
    store.set_env_list(config.environments());
    if let Some(env) = config.current_environment() {
        store.set_current_env(Some(env));
    }

    info!(
        http_addr = %config.server.http_addr,
        current_env = ?config.current_env,
        "Starting greenwatch-feed"
    );

    match &config.feed {
        FeedConfig::Websocket { url, tls } => {
            let endpoint = resolve_endpoint(std::env::var(ENDPOINT_ENV).ok(), url.as_deref());
            info!(%endpoint, "Using WebSocket feed");

            let mut transport = WsTransport::new(endpoint);
            if let Some(tls) = tls {
                transport = transport.with_tls(greenwatch_tls::client_config(tls)?);
            }

            run_feed(transport, store, &config).await?;
        }
        FeedConfig::Mock {
            env,
            frame_interval_secs,
            device_count,
        } => {
            info!(%env, frame_interval_secs, device_count, "Using mock feed");

            let transport =
                MockTransport::new(env.clone(), frame_interval_secs.get(), *device_count);
            store.set_control_devices(transport.device_list());

            run_feed(transport, store, &config).await?;
        }
    }

    Ok(())
}

async fn run_feed<T: Transport>(
    transport: T,
    store: Store,
    config: &Config,
) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();

    let router = MessageRouter::new(store.clone());
    let (connection, manager_handle) = ConnectionManager::new(transport, router)
        .with_policy(config.reconnect.policy())
        .spawn(cancel.clone());
    connection.connect()?;

    let monitor_handle = tokio::spawn(run_threshold_monitor(store.subscribe(), cancel.clone()));

    // HTTP server
    let http_addr = config.server.http_addr;
    let axum_app = Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/connection", get(connection_handler))
        .with_state(AppState {
            store,
            connection: connection.clone(),
        });
    let axum_listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(axum_listener, axum_app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    connection.shutdown();
    let _ = manager_handle.await;
    let _ = monitor_handle.await;

    info!("greenwatch-feed shut down complete");
    Ok(())
}

/// Log a warning whenever a reading leaves its threshold band, and once more
/// when it comes back.
async fn run_threshold_monitor(mut rx: watch::Receiver<DashboardState>, cancel: CancellationToken) {
    let mut out_of_band: Vec<(ParameterKind, Band)> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }

                let (now, thresholds) = {
                    let state = rx.borrow_and_update();
                    // the zero baseline means nothing has been reported yet
                    let mut now = state.thresholds.out_of_band(&state.sensor_data);
                    now.retain(|(kind, _)| *state.sensor_data.get(*kind) != Reading::default());
                    (now, state.thresholds)
                };

                for (kind, band) in &now {
                    if !out_of_band.contains(&(*kind, *band)) {
                        let threshold = thresholds.get(*kind);
                        warn!(
                            parameter = %kind,
                            ?band,
                            min = threshold.min,
                            max = threshold.max,
                            "Reading out of range"
                        );
                    }
                }
                for (kind, _) in &out_of_band {
                    if !now.iter().any(|(k, _)| k == kind) {
                        info!(parameter = %kind, "Reading back in range");
                    }
                }

                out_of_band = now;
            }
        }
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn state_handler(State(app): State<AppState>) -> Json<DashboardState> {
    Json(app.store.snapshot())
}

async fn connection_handler(State(app): State<AppState>) -> Json<ConnectionState> {
    Json(app.connection.state())
}
