//! Connection Session (C5, §4.5): one task per accepted socket, owning a
//! Framing Buffer, the IMEI/AVL codecs, a per-device [`Tracker`], and the
//! wire-ack discipline. Mirrors the teacher's per-connection task model
//! (no event callbacks, a single read loop with explicit states).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::codec::avl::{self, AvlResult};
use crate::codec::framing::FramingBuffer;
use crate::codec::imei::{self, ImeiResult};
use crate::config::Config;
use crate::error::SessionClose;
use crate::registry::Registry;
use crate::repository::Repository;
use crate::tracker::{Tracker, TrackerParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingImei,
    Authenticated,
}

/// Sliding one-minute window used to enforce `RATE_LIMIT_FRAMES_PER_MIN` (§4.5).
struct RateWindow {
    window_start: Instant,
    count: u32,
    limit: u32,
}

impl RateWindow {
    fn new(limit: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit,
        }
    }

    /// Returns true if the frame may be dispatched.
    fn allow(&mut self) -> bool {
        if self.window_start.elapsed() >= Duration::from_secs(60) {
            self.window_start = Instant::now();
            self.count = 0;
        }
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Runs one accepted connection to completion. Never panics on protocol
/// input; all malformed/oversized/unauthenticated cases end in a clean close.
pub async fn run<R: Repository>(
    mut socket: TcpStream,
    peer_addr: String,
    repo: R,
    registry: Arc<Registry>,
    config: Arc<Config>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let _ = socket.set_nodelay(true);

    let mut buf = FramingBuffer::new();
    let mut state = State::AwaitingImei;
    let mut device_id: Option<String> = None;
    let mut evict_handle: Option<Arc<Notify>> = None;
    let mut rate = RateWindow::new(config.rate_limit_frames_per_min);
    let mut resync_bytes: u32 = 0;
    let mut tracker: Option<Tracker<R>> = None;
    let mut device_ref: Option<R::DeviceRef> = None;

    let idle_timeout = Duration::from_millis(config.socket_timeout_ms);
    let tracker_params = TrackerParams {
        warmup_ms: config.warmup_ms,
        idle_ms: config.idle_ms,
        speed_threshold_kmh: config.speed_threshold_kmh,
    };

    let close_reason = loop {
        let evict_wait = async {
            match &evict_handle {
                Some(h) => h.notified().await,
                None => std::future::pending().await,
            }
        };

        let mut chunk = [0u8; 8192];
        tokio::select! {
            _ = evict_wait => {
                break SessionClose::Replaced;
            }
            _ = shutdown.changed() => {
                break SessionClose::Shutdown;
            }
            _ = tokio::time::sleep(idle_timeout) => {
                break SessionClose::IdleTimeout;
            }
            read = socket.read(&mut chunk) => {
                match read {
                    Ok(0) => break SessionClose::Shutdown,
                    Ok(n) => {
                        if buf.append(&chunk[..n]).is_err() {
                            break SessionClose::BufferOverflow;
                        }
                    }
                    Err(_) => break SessionClose::SocketWriteFail,
                }
            }
        }

        if state == State::AwaitingImei {
            match imei::try_parse_imei(&buf) {
                ImeiResult::NeedMore => continue,
                ImeiResult::Frame { digits, consumed } => {
                    buf.drop(consumed);
                    match repo.lookup_device(&digits).await {
                        Ok(dref) => {
                            if socket.write_all(&[0x01]).await.is_err() {
                                break SessionClose::SocketWriteFail;
                            }
                            let evict = registry.register(digits.clone(), peer_addr.clone());
                            info!(device = %digits, peer = %peer_addr, "device authenticated");
                            evict_handle = Some(evict);
                            device_ref = Some(dref);
                            tracker = Some(Tracker::new(digits.clone(), tracker_params));
                            device_id = Some(digits);
                            state = State::Authenticated;
                        }
                        Err(_) => break SessionClose::UnknownDevice,
                    }
                }
                ImeiResult::NotImei | ImeiResult::Malformed => break SessionClose::BadHandshake,
            }
        }

        if state == State::Authenticated {
            loop {
                match avl::try_parse_avl(&buf, config.strict_crc) {
                    AvlResult::NeedMore => break,
                    AvlResult::Resync => {
                        buf.drop(1);
                        resync_bytes += 1;
                        if resync_bytes >= avl::MAX_RESYNC_BYTES {
                            break;
                        }
                        continue;
                    }
                    AvlResult::Malformed(e) => {
                        warn!(device = ?device_id, error = %e, "malformed avl frame");
                        // A malformed frame's length cannot be trusted, so the
                        // session cannot safely resynchronize past it.
                        return close(
                            socket,
                            SessionClose::ProtocolError,
                            registry,
                            device_id,
                            evict_handle,
                            tracker,
                            &repo,
                        )
                        .await;
                    }
                    AvlResult::Frame {
                        frame,
                        consumed,
                        crc_ok,
                    } => {
                        resync_bytes = 0;
                        buf.drop(consumed);
                        if !crc_ok {
                            debug!(device = ?device_id, "crc mismatch, lenient mode");
                        }

                        let record_count = frame.records.len() as u32;
                        let ack: u32 = if rate.allow() {
                            let dref = device_ref.as_ref().expect("authenticated");
                            let t = tracker.as_mut().expect("authenticated");
                            for record in &frame.records {
                                t.on_record(&repo, dref, record).await;
                                let _ = crate::repository::with_retry("append_record", || {
                                    repo.append_record(dref, record)
                                })
                                .await;
                            }
                            if let Some(id) = &device_id {
                                registry.touch(id, consumed as u64, record_count as u64);
                            }
                            record_count
                        } else {
                            warn!(device = ?device_id, "rate limit exceeded, dropping frame");
                            0
                        };

                        if socket.write_all(&ack.to_be_bytes()).await.is_err() {
                            return close(
                                socket,
                                SessionClose::SocketWriteFail,
                                registry,
                                device_id,
                                evict_handle,
                                tracker,
                                &repo,
                            )
                            .await;
                        }
                    }
                }
            }
            if resync_bytes >= avl::MAX_RESYNC_BYTES {
                break SessionClose::ProtocolError;
            }
        }
    };

    close(
        socket,
        close_reason,
        registry,
        device_id,
        evict_handle,
        tracker,
        &repo,
    )
    .await;
}

async fn close<R: Repository>(
    mut socket: TcpStream,
    reason: SessionClose,
    registry: Arc<Registry>,
    device_id: Option<String>,
    evict_handle: Option<Arc<Notify>>,
    tracker: Option<Tracker<R>>,
    repo: &R,
) {
    let _ = socket.shutdown().await;
    if let (Some(id), Some(evict)) = (&device_id, &evict_handle) {
        registry.unregister(id, evict);
    }
    if let Some(mut t) = tracker {
        t.on_session_end(repo, now_ms()).await;
    }
    info!(device = ?device_id, reason = %reason, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    #[test]
    fn rate_window_allows_up_to_limit_then_drops() {
        let mut w = RateWindow::new(2);
        assert!(w.allow());
        assert!(w.allow());
        assert!(!w.allow());
    }

    #[tokio::test]
    async fn lookup_unknown_device_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo.lookup_device(&"000000000000000".to_string()).await;
        assert!(err.is_err());
    }
}
