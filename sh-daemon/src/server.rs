//! Unix Socket Control Server
//!
//! Async server exposing the sensor hub control plane to local clients.
//!
//! # Protocol
//! Line-delimited JSON: one `RequestEnvelope` per line in, one
//! `ResponseEnvelope` per line out. After `Subscribe` the connection also
//! carries every outbound sensor event as an unsolicited response with the
//! subscribe request's id. Requests keep working while subscribed.
//!
//! # Limits
//! - **Connection limit**: at most `MAX_CONNECTIONS` concurrent clients
//! - **Message limit**: lines longer than `MAX_MESSAGE_SIZE` are rejected
//! - **Rate limiting**: per-UID request budget per window
//! - **Timeouts**: idle reads and stalled writes close the connection
//! - **Peer credentials**: UID/GID/PID logged for every state change

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use sh_core::SensorHub;
use sh_protocol::{Request, RequestEnvelope, Response, ResponseEnvelope, SensorEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Limits
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 64;

const MAX_MESSAGE_SIZE: usize = sh_protocol::MAX_MESSAGE_SIZE;

/// Idle time allowed between requests on a non-subscribed connection
const READ_TIMEOUT: Duration = Duration::from_secs(30);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests allowed per client per window
const RATE_LIMIT_REQUESTS: u32 = 1500;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// Socket permissions: owner and group
const SOCKET_MODE: u32 = 0o660;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Everything a connection needs from the daemon
#[derive(Clone)]
pub struct ServerContext {
    pub hub: Arc<SensorHub>,
    pub events: broadcast::Sender<SensorEvent>,
}

// ============================================================================
// Bounded line reads
// ============================================================================

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            // consume what fits so the caller makes progress
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

struct ClientState {
    request_count: u32,
    window_start: Instant,
}

/// Fixed-window request counter keyed by UID
struct RateLimiter {
    clients: HashMap<u32, ClientState>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            max_requests,
            window,
        }
    }

    /// Returns true if the request is allowed
    fn check_and_increment(&mut self, uid: u32) -> bool {
        let now = Instant::now();
        let window = self.window;
        let state = self.clients.entry(uid).or_insert(ClientState {
            request_count: 0,
            window_start: now,
        });

        if now.duration_since(state.window_start) > window {
            state.request_count = 0;
            state.window_start = now;
        }

        if state.request_count >= self.max_requests {
            return false;
        }
        state.request_count += 1;
        true
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.clients
            .retain(|_, state| now.duration_since(state.window_start) < window * 2);
    }
}

// ============================================================================
// Server
// ============================================================================

/// Serve `ctx` on `socket_path` until `shutdown` flips to true
pub async fn run_server(
    socket_path: &str,
    ctx: ServerContext,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let path = Path::new(socket_path);

    if path.exists() {
        let metadata = path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            bail!("socket path {} is a symlink, refusing", socket_path);
        }
        std::fs::remove_file(path)?;
        debug!("Removed stale socket file");
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding control socket {}", socket_path))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path, SOCKET_MODE);
    info!(
        "Limits: max_conn={}, max_msg={}, rate_limit={}/{:?}",
        MAX_CONNECTIONS, MAX_MESSAGE_SIZE, RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW
    );

    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
        RATE_LIMIT_REQUESTS,
        RATE_LIMIT_WINDOW,
    )));

    let limiter_cleanup = Arc::clone(&rate_limiter);
    let cleanup_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_WINDOW).await;
            limiter_cleanup.lock().await.cleanup();
        }
    });

    let mut served: u64 = 0;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        served += 1;
                        let ctx = ctx.clone();
                        let limiter = Arc::clone(&rate_limiter);
                        tokio::spawn(async move {
                            handle_client(stream, ctx, limiter).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
    }

    cleanup_task.abort();
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove socket {}: {}", socket_path, e);
    }
    info!("Server stopped (served {} connections)", served);
    Ok(())
}

/// Credentials of the process on the other end of the socket
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

async fn handle_client(
    stream: UnixStream,
    ctx: ServerContext,
    rate_limiter: Arc<Mutex<RateLimiter>>,
) {
    let Some(cred) = get_peer_credentials(&stream) else {
        error!("Failed to get peer credentials, rejecting connection");
        return;
    };
    debug!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

    let (reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let mut forwarder: Option<JoinHandle<()>> = None;
    let connection_start = Instant::now();

    loop {
        let read = read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE);
        // subscribers may stay quiet indefinitely
        let read_result = if forwarder.is_some() {
            Ok(read.await)
        } else {
            timeout(READ_TIMEOUT, read).await
        };

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid,
                    cred.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                if !rate_limiter.lock().await.check_and_increment(cred.uid) {
                    warn!("Rate limit exceeded for uid={}, pid={}", cred.uid, cred.pid);
                    let reply = ResponseEnvelope::new(0, Response::error("Rate limit exceeded"));
                    if send_response(&writer, &reply).await.is_err() {
                        break;
                    }
                    continue;
                }

                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let Ok(text) = std::str::from_utf8(&line) else {
                    debug!("Non-UTF8 request from uid={}", cred.uid);
                    let reply = ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                    let _ = send_response(&writer, &reply).await;
                    break;
                };

                let (reply, subscribe) = process_request(text, &cred, &ctx);
                if send_response(&writer, &reply).await.is_err() {
                    break;
                }

                if subscribe && forwarder.is_none() {
                    info!("uid={}, pid={} subscribed to events", cred.uid, cred.pid);
                    forwarder = Some(tokio::spawn(forward_events(
                        ctx.events.subscribe(),
                        Arc::clone(&writer),
                        reply.id,
                    )));
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, cred.uid, cred.pid
                    );
                    let reply = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&writer, &reply).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                let reply = ResponseEnvelope::new(0, Response::error("Read timeout"));
                let _ = send_response(&writer, &reply).await;
                break;
            }
        }
    }

    if let Some(task) = forwarder {
        task.abort();
    }
}

/// Stream hub events to one subscriber until it goes away
async fn forward_events(
    mut rx: broadcast::Receiver<SensorEvent>,
    writer: SharedWriter,
    id: u64,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let message = ResponseEnvelope::new(id, Response::ok_event(event));
                if send_response(&writer, &message).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Subscriber lagging, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_response(writer: &SharedWriter, envelope: &ResponseEnvelope) -> Result<(), ()> {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let mut writer = writer.lock().await;
    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            warn!("Write timeout");
            Err(())
        }
    }
}

fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    // SAFETY: ucred is a plain C struct; all-zero is a valid value.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a live socket owned by `stream`, cred and len point to
    // properly sized, initialized storage for SO_PEERCRED.
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials {
        uid: cred.uid,
        gid: cred.gid,
        pid: cred.pid,
    })
}

/// Handle one request line; the flag is set when the client subscribed
fn process_request(line: &str, cred: &PeerCredentials, ctx: &ServerContext) -> (ResponseEnvelope, bool) {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", cred.uid, e);
            return (ResponseEnvelope::new(0, Response::error("Invalid request format")), false);
        }
    };

    let id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Request validation failed from uid={}: {}", cred.uid, e);
        return (ResponseEnvelope::new(id, Response::error(e)), false);
    }

    debug!("Processing {} (id={}) from uid={}, pid={}", request.type_name(), id, cred.uid, cred.pid);

    let mut subscribe = false;
    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::ListSensors => Response::ok_sensors(ctx.hub.sensor_list()),

        Request::Activate { handle, enabled } => {
            info!("AUDIT: Activate handle={} enabled={} by uid={}, pid={}", handle, enabled, cred.uid, cred.pid);
            to_response(ctx.hub.enable(handle, enabled))
        }

        Request::Batch { handle, period_ns, timeout_ns } => {
            info!(
                "AUDIT: Batch handle={} period_ns={} timeout_ns={} by uid={}, pid={}",
                handle, period_ns, timeout_ns, cred.uid, cred.pid
            );
            to_response(ctx.hub.set_delay(handle, period_ns, timeout_ns))
        }

        Request::Flush { handle } => to_response(ctx.hub.flush(handle)),

        Request::Subscribe => {
            subscribe = true;
            Response::ok()
        }
    };

    (ResponseEnvelope::new(id, response), subscribe)
}

fn to_response(result: sh_error::Result<()>) -> Response {
    match result {
        Ok(()) => Response::ok(),
        Err(e) => Response::error(e.to_string()),
    }
}
