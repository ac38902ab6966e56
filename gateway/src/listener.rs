//! Listener (C10, §4.10): the accept loop, `MAX_CONCURRENT_SESSIONS`
//! backpressure, and graceful-shutdown supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::registry::Registry;
use crate::repository::Repository;
use crate::session;

/// Accepts connections on `config.device_port` until `shutdown` fires.
/// Enforces the concurrent-session cap before spawning a [`session::run`]
/// task; on shutdown, gives in-flight sessions a 3s budget before returning.
pub async fn run<R: Repository>(
    repo: R,
    registry: Arc<Registry>,
    config: Arc<Config>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", config.device_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "device listener bound");

    let active = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_sessions));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("device listener shutting down, draining in-flight sessions");
                break;
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let permit = match active.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(peer = %peer, "max concurrent sessions reached, closing");
                        drop(socket);
                        continue;
                    }
                };

                let repo = repo.clone();
                let registry = registry.clone();
                let config = config.clone();
                let session_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    session::run(socket, peer.to_string(), repo, registry, config, session_shutdown).await;
                });
            }
        }
    }

    // §5: graceful shutdown broadcasts a cancel; sessions observe it at their
    // next suspension point. We cannot force them to exit early without
    // violating ack-after-dispatch ordering, so we simply bound how long we
    // wait for the semaphore to drain back to full capacity.
    let cap = config.max_concurrent_sessions;
    let drained = tokio::time::timeout(Duration::from_secs(3), active.acquire_many(cap as u32)).await;
    match drained {
        Ok(Ok(_permits)) => info!("all sessions drained before shutdown budget expired"),
        _ => error!("shutdown budget (3s) expired with sessions still active"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn rejects_connections_beyond_max_concurrent_sessions() {
        let repo = InMemoryRepository::new();
        let registry = Arc::new(Registry::new());
        let mut config = Config {
            device_port: 0,
            monitor_port: 0,
            socket_timeout_ms: 60_000,
            max_concurrent_sessions: 1,
            rate_limit_frames_per_min: 60,
            warmup_ms: 300_000,
            idle_ms: 300_000,
            speed_threshold_kmh: 3,
            store_uri: None,
            debug_log: false,
            strict_crc: false,
        };
        // Bind once ourselves to learn the ephemeral port `run` will reuse.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        config.device_port = probe.local_addr().unwrap().port();
        drop(probe);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let config = Arc::new(config);
        let task = tokio::spawn(run(repo, registry.clone(), config.clone(), shutdown_rx));

        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let addr = format!("127.0.0.1:{}", config.device_port);

        let first = TcpStream::connect(&addr).await.unwrap();
        // First connection holds the single permit open (no IMEI sent, so the
        // session just sits in AwaitingImei until idle timeout).
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut second = TcpStream::connect(&addr).await.unwrap();
        let mut buf = [0u8; 1];
        use tokio::io::AsyncReadExt;
        let n = tokio::time::timeout(Duration::from_secs(1), second.read(&mut buf))
            .await
            .expect("second connection should be closed promptly")
            .unwrap();
        assert_eq!(n, 0, "connection beyond capacity must be closed with no data");

        drop(first);
        let _ = shutdown_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
    }
}
