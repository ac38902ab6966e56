use std::sync::Arc;

use teltonika_gateway::config::Config;
use teltonika_gateway::monitor::{self, MonitorState};
use teltonika_gateway::registry::Registry;
use teltonika_gateway::repository::InMemoryRepository;
use teltonika_gateway::listener;
use tracing::{error, info};

fn started_at_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let default_filter = if config.debug_log {
        "teltonika_gateway=debug,tower_http=info"
    } else {
        "teltonika_gateway=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()))
        .json()
        .init();

    info!(
        device_port = config.device_port,
        monitor_port = config.monitor_port,
        strict_crc = config.strict_crc,
        "teltonika gateway starting"
    );

    let config = Arc::new(config);
    let registry = Arc::new(Registry::new());
    // Real persistence is out of scope for this core (see DESIGN.md); the
    // in-memory store stands in for whatever `STORE_URI` would otherwise name.
    let repo = InMemoryRepository::new();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let monitor_state = MonitorState {
        registry: registry.clone(),
        started_at_ms: started_at_ms(),
        device_port: config.device_port,
        monitor_port: config.monitor_port,
    };
    let monitor_app = monitor::router(monitor_state);
    let monitor_addr = format!("0.0.0.0:{}", config.monitor_port);
    let monitor_listener = match tokio::net::TcpListener::bind(&monitor_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %monitor_addr, error = %e, "monitor port bind failed");
            std::process::exit(1);
        }
    };
    info!(addr = %monitor_addr, "monitor listener bound");

    let monitor_shutdown = shutdown_rx.clone();
    let monitor_task = tokio::spawn(async move {
        let mut shutdown = monitor_shutdown;
        axum::serve(monitor_listener, monitor_app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
    });

    let device_repo = repo.clone();
    let device_registry = registry.clone();
    let device_config = config.clone();
    let device_task = tokio::spawn(async move {
        listener::run(device_repo, device_registry, device_config, shutdown_rx).await
    });

    tokio::signal::ctrl_c().await.ok();
    info!("ctrl-c received, shutting down");
    let _ = shutdown_tx.send(true);

    match device_task.await {
        Ok(Err(e)) => error!(error = %e, "device listener exited with an error"),
        Err(e) => error!(error = %e, "device listener task panicked"),
        Ok(Ok(())) => {}
    }
    match monitor_task.await {
        Ok(Err(e)) => error!(error = %e, "monitor server exited with an error"),
        Err(e) => error!(error = %e, "monitor server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("shutdown complete");
}
