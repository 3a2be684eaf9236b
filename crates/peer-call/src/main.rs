//! Peer Call
//!
//! Two-party call rig over the in-process loopback relay.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Resolve display names and build the call route
//! 4. Spawn the host (Responder) and guest (Initiator) supervisors
//! 5. Start health HTTP server (liveness, readiness, connected, metrics)
//! 6. Watch status and events, optionally toggling the guest camera
//! 7. Wait for shutdown signal, then tear down guest and host in order

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::Router;
use common::identity::{resolve_display_name, CallRoute, Resolution};
use common::types::DisplayName;
use peer_call::actors::{
    CallSupervisor, CallSupervisorHandle, SessionBinding, SessionEventKind, SupervisorSettings,
};
use peer_call::config::Config;
use peer_call::media::MediaStream;
use peer_call::observability::{health_router, init_metrics_recorder, HealthState};
use peer_call::transport::loopback::{LoopbackCamera, LoopbackRelay};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for each supervisor's ordered teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Peer Call");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        identity_prefix = %config.identity_prefix,
        remote_name = %config.remote_name,
        relay_host = %config.relay.host,
        relay_port = config.relay.port,
        ice_servers = config.relay.ice_servers.len(),
        health_bind_address = %config.health_bind_address,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow!(e)
    })?;

    // Resolve identities and the route
    let (local_name, resolution) = resolve_display_name(config.local_name.as_deref());
    if resolution == Resolution::Generated {
        info!(
            local_name = %local_name,
            "No stored display name, generated one (set PC_LOCAL_NAME to keep it)"
        );
    }
    let remote_name = DisplayName::parse(&config.remote_name).context("PC_REMOTE_NAME")?;
    let route = CallRoute::new(remote_name.clone(), local_name.clone())
        .context("Failed to build call route")?;
    info!(route = %route.encode(), "Call route built");

    let host_binding = SessionBinding::from_route(&config.identity_prefix, &route, &remote_name)?;
    let guest_binding = SessionBinding::from_route(&config.identity_prefix, &route, &local_name)?;

    let shutdown_token = CancellationToken::new();
    let relay = LoopbackRelay::new();
    let settings = SupervisorSettings::from_config(&config);

    let (host, host_task) = CallSupervisor::spawn(
        host_binding,
        settings.clone(),
        Arc::new(relay.clone()),
        Arc::new(LoopbackCamera::new()),
        &shutdown_token,
    );
    let (guest, guest_task) = CallSupervisor::spawn(
        guest_binding,
        settings,
        Arc::new(relay.clone()),
        Arc::new(LoopbackCamera::new()),
        &shutdown_token,
    );
    info!("Supervisors spawned");

    // Health reflects the guest side, which drives the call
    let health_state = Arc::new(HealthState::new());
    spawn_event_logger("host", &host, None, shutdown_token.child_token());
    spawn_event_logger(
        "guest",
        &guest,
        Some(Arc::clone(&health_state)),
        shutdown_token.child_token(),
    );

    // Start health HTTP server
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        anyhow!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    if let Some(period) = config.toggle_camera_every {
        spawn_camera_toggler(guest.clone(), period, shutdown_token.child_token());
    }

    info!("Peer Call running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, tearing down sessions...");
    health_state.set_ready(false);

    // The caller hangs up first, then the callee
    for (side, handle, task) in [("guest", guest, guest_task), ("host", host, host_task)] {
        if let Err(e) = handle.shutdown().await {
            warn!(side, error = %e, "Supervisor already stopped");
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => info!(side, "Supervisor stopped"),
            Ok(Err(e)) => error!(side, error = %e, "Supervisor task panicked"),
            Err(_) => warn!(side, "Supervisor did not stop in time"),
        }
    }

    shutdown_token.cancel();

    info!("Peer Call shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "peer_call=debug,pc=debug,tower_http=debug".into());
    let json = std::env::var("PC_LOG_JSON").is_ok_and(|v| v == "true" || v == "1");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Log every lifecycle event and, for the side that drives health, keep
/// readiness and connectivity in sync.
fn spawn_event_logger(
    side: &'static str,
    handle: &CallSupervisorHandle,
    health: Option<Arc<HealthState>>,
    cancel_token: CancellationToken,
) {
    let mut events = handle.subscribe_events();
    let mut status = handle.status();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,

                event = events.recv() => match event {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => info!(side, event = %json, "Session event"),
                            Err(e) => warn!(side, error = %e, "Failed to serialize session event"),
                        }
                        if let Some(health) = &health {
                            match event.kind {
                                SessionEventKind::SignalingOpened => health.set_ready(true),
                                SessionEventKind::SignalingFailed { .. }
                                | SessionEventKind::Rebound { .. }
                                | SessionEventKind::Stopped => health.set_ready(false),
                                _ => {}
                            }
                        }
                        if event.kind == SessionEventKind::Stopped {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(side, skipped, "Event logger lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                },

                changed = status.changed() => match changed {
                    Ok(current) => {
                        info!(
                            side,
                            connected = current.connected,
                            remote_stream = ?current.remote_stream.as_ref().map(MediaStream::id),
                            "Call status changed"
                        );
                        if let Some(health) = &health {
                            health.set_connected(current.connected);
                        }
                    }
                    Err(_) => break,
                },
            }
        }
    });
}

fn spawn_camera_toggler(
    handle: CallSupervisorHandle,
    period: Duration,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => match handle.toggle_camera().await {
                    Ok(outcome) => info!(outcome = outcome.as_str(), "Camera toggled"),
                    Err(e) if e.is_recoverable() => warn!(error = %e, "Camera toggle failed"),
                    Err(_) => break,
                },
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
