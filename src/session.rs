//! Per-connection relay sessions.
//!
//! A session owns one client WebSocket and at most one backend TCP
//! connection, and keeps them bridged for the life of the client channel.
//! All of its event handling runs on a single task inside one `select!`
//! loop, so client messages, backend data, connect completions and timer
//! ticks are strictly serialized per session. Sessions never share state
//! except through the [`SessionRegistry`] counters.
//!
//! Backend outages do not end the session: client data is parked in a
//! bounded [`FrameBuffer`] while the session retries the backend with
//! capped exponential backoff. The client channel closing, by contrast,
//! tears the whole session down.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::backoff::{ReconnectPolicy, ReconnectState};
use crate::buffer::FrameBuffer;
use crate::cli::Config;
use crate::connector::{BackendConn, BackendConnector};
use crate::registry::{SessionCounters, SessionRegistry};

/// Buffer size for reading data from the backend socket.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Idle duration past which the idle-log timer reports the session.
pub const IDLE_LOG_THRESHOLD: Duration = Duration::from_secs(60);

/// Tagged session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A backend connect attempt is in flight.
    Connecting,
    /// Backend connection live, traffic flowing.
    Connected,
    /// Backend lost, a reconnect timer is pending.
    ReconnectPending,
    /// Reconnect attempts exhausted; client channel stays open but receives
    /// no further backend data.
    Degraded,
    /// Client channel gone; terminal. Set exactly once, makes all further
    /// reconnect activity a no-op.
    Closing,
}

type ConnectFut = Pin<Box<dyn Future<Output = std::io::Result<BackendConn>> + Send>>;

/// Everything tied to the current backend connection attempt/link.
///
/// At most one of `connecting` and the split halves is populated at a time;
/// replacing the link drops the previous halves first, so a session never
/// holds two live backend sockets.
#[derive(Default)]
struct BackendLink {
    read: Option<OwnedReadHalf>,
    write: Option<OwnedWriteHalf>,
    connecting: Option<ConnectFut>,
    reconnect_at: Option<Instant>,
    /// Deadline for the next backend byte; pushed forward only by backend
    /// reads, so timer ticks and client traffic cannot mask a hung backend.
    read_deadline: Option<Instant>,
}

impl BackendLink {
    /// Drops whatever is live or pending. Idempotent.
    fn clear(&mut self) {
        self.read = None;
        self.write = None;
        self.connecting = None;
        self.read_deadline = None;
    }
}

/// One client-channel-to-backend pairing with its own buffer, timers and
/// reconnect state.
pub struct RelaySession {
    id: u64,
    config: Config,
    connector: BackendConnector,
    policy: ReconnectPolicy,
    registry: Arc<SessionRegistry>,
    counters: Arc<SessionCounters>,
}

impl RelaySession {
    /// Creates a session and registers it with the registry.
    pub fn new(config: Config, registry: Arc<SessionRegistry>) -> Self {
        let (id, counters) = registry.register_session();
        let connector = BackendConnector::new(
            config.backend_host.clone(),
            config.backend_port,
            config.backend_connect_timeout,
        );
        let policy = ReconnectPolicy {
            base_delay: config.base_reconnect_delay,
            max_delay: config.max_reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
        };
        Self {
            id,
            config,
            connector,
            policy,
            registry,
            counters,
        }
    }

    /// Session identifier (monotonic per process).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs the session to completion, consuming the client channel.
    ///
    /// Returns when the client channel closes or errors, or when a shutdown
    /// signal arrives; backend failures are absorbed by the reconnect path
    /// and never end the session by themselves.
    pub async fn run<S>(self, ws: WebSocketStream<S>, mut shutdown_rx: Option<broadcast::Receiver<()>>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!(session_id = self.id, backend = %self.connector.addr(), "session started");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut state = SessionState::Connecting;
        let mut reconnect = ReconnectState::new();
        let mut buffer = FrameBuffer::new(self.config.max_buffer_bytes);
        let mut link = BackendLink::default();
        let mut read_buf = [0u8; READ_BUFFER_SIZE];
        let mut last_activity = Instant::now();

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        let mut idle_interval = tokio::time::interval(self.config.idle_log_interval);
        // The first tick of a tokio interval fires immediately; skip it so
        // the probes start one period in.
        ping_interval.tick().await;
        idle_interval.tick().await;

        // The session connects as soon as it owns the client channel.
        self.start_connect(&mut link, &mut state);

        loop {
            tokio::select! {
                // Client channel events.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(msg @ (Message::Binary(_) | Message::Text(_)))) => {
                            last_activity = Instant::now();
                            let data = msg.into_data();
                            self.counters
                                .bytes_from_client
                                .fetch_add(data.len() as u64, Ordering::Relaxed);
                            self.on_client_data(data, &mut buffer, &mut link, &mut state, &mut reconnect)
                                .await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_activity = Instant::now();
                            if let Err(e) = ws_tx.send(Message::Pong(payload)).await {
                                tracing::warn!(session_id = self.id, error = %e, "pong send failed, closing session");
                                state = SessionState::Closing;
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_activity = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(session_id = self.id, close_frame = ?frame, "client sent close");
                            state = SessionState::Closing;
                            break;
                        }
                        Some(Ok(Message::Frame(_))) => {
                            // Raw frames are not produced by the read half.
                        }
                        Some(Err(e)) => {
                            tracing::warn!(session_id = self.id, error = %e, "client channel error, closing session");
                            state = SessionState::Closing;
                            break;
                        }
                        None => {
                            tracing::info!(session_id = self.id, "client channel closed");
                            state = SessionState::Closing;
                            break;
                        }
                    }
                }

                // Backend data, EOF, or error.
                result = read_backend(&mut link.read, &mut read_buf) => {
                    match result {
                        Ok(0) => {
                            self.on_backend_failure("backend closed", &mut link, &mut state, &mut reconnect);
                        }
                        Ok(n) => {
                            last_activity = Instant::now();
                            link.read_deadline = Some(Instant::now() + self.config.backend_read_timeout);
                            let data = Bytes::copy_from_slice(&read_buf[..n]);
                            self.counters
                                .bytes_to_client
                                .fetch_add(n as u64, Ordering::Relaxed);

                            // The only backpressure path in the relay: the
                            // send awaits the flush, so a slow client pauses
                            // backend reads until its channel drains.
                            if let Err(e) = ws_tx.send(Message::Binary(data)).await {
                                tracing::warn!(session_id = self.id, error = %e, "client send failed, closing session");
                                state = SessionState::Closing;
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(session_id = self.id, error = %e, "backend read side failed");
                            self.on_backend_failure("backend read error", &mut link, &mut state, &mut reconnect);
                        }
                    }
                }

                // Backend silent past the read timeout; treated as a close.
                // The deadline only moves on backend reads, so keepalive
                // ticks and client traffic cannot push it out.
                _ = await_deadline(link.read_deadline) => {
                    tracing::debug!(session_id = self.id, "no backend data within read timeout");
                    self.on_backend_failure("backend read timed out", &mut link, &mut state, &mut reconnect);
                }

                // A pending connect attempt resolved.
                result = await_connect(&mut link.connecting) => {
                    link.connecting = None;
                    match result {
                        Ok(conn) => {
                            reconnect.reset();
                            state = SessionState::Connected;
                            let (read_half, write_half) = conn.into_split();
                            link.read = Some(read_half);
                            link.write = Some(write_half);
                            link.read_deadline =
                                Some(Instant::now() + self.config.backend_read_timeout);
                            tracing::info!(
                                session_id = self.id,
                                backend = %self.connector.addr(),
                                buffered_bytes = buffer.byte_count(),
                                "backend connected"
                            );

                            // Drain in FIFO order; the failing chunk is
                            // re-queued at the front by drain_buffer.
                            let drained = match link.write.as_mut() {
                                Some(writer) => drain_buffer(&mut buffer, writer).await,
                                None => Ok(()),
                            };
                            if let Err(e) = drained {
                                tracing::debug!(session_id = self.id, error = %e, "buffer drain failed");
                                self.on_backend_failure("backend write error during drain", &mut link, &mut state, &mut reconnect);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(session_id = self.id, error = %e, "backend connect failed");
                            self.on_backend_failure("backend connect failed", &mut link, &mut state, &mut reconnect);
                        }
                    }
                }

                // Reconnect timer elapsed.
                _ = await_deadline(link.reconnect_at) => {
                    link.reconnect_at = None;
                    // Closing is checked after the delay as well as before
                    // scheduling; a session that closed while the timer was
                    // pending must not reconnect.
                    if state != SessionState::Closing {
                        tracing::info!(
                            session_id = self.id,
                            attempt = reconnect.attempts(),
                            "attempting backend reconnect"
                        );
                        self.start_connect(&mut link, &mut state);
                    }
                }

                // Keepalive probe. A missing pong is tolerated: channel
                // closure is the failure signal, not probe timeout.
                _ = ping_interval.tick() => {
                    if let Err(e) = ws_tx.send(Message::Ping(Bytes::new())).await {
                        tracing::warn!(session_id = self.id, error = %e, "keepalive ping failed, closing session");
                        state = SessionState::Closing;
                        break;
                    }
                }

                // Graceful server shutdown.
                _ = recv_shutdown(&mut shutdown_rx) => {
                    tracing::info!(session_id = self.id, "shutdown signal received, closing session");
                    state = SessionState::Closing;
                    break;
                }

                // Idle sampling, observability only.
                _ = idle_interval.tick() => {
                    let idle = last_activity.elapsed();
                    if idle >= IDLE_LOG_THRESHOLD {
                        tracing::info!(
                            session_id = self.id,
                            idle_ms = idle.as_millis() as u64,
                            state = ?state,
                            reconnect_attempts = reconnect.attempts(),
                            last_attempt_ms = ?reconnect
                                .last_attempt()
                                .map(|t| t.elapsed().as_millis() as u64),
                            "session idle"
                        );
                    }
                }
            }
        }

        // Single teardown path: every exit route funnels through here once.
        debug_assert_eq!(state, SessionState::Closing);
        link.reconnect_at = None;
        link.clear();
        let _ = ws_tx.close().await;

        tracing::info!(
            session_id = self.id,
            bytes_from_client = self.counters.bytes_from_client.load(Ordering::Relaxed),
            bytes_to_client = self.counters.bytes_to_client.load(Ordering::Relaxed),
            undelivered_bytes = buffer.byte_count(),
            "session closed"
        );
        self.registry.unregister_session(self.id);
    }

    /// Handles one chunk of client data: direct write when the backend is
    /// live and nothing is queued ahead of it, buffered otherwise.
    async fn on_client_data(
        &self,
        data: Bytes,
        buffer: &mut FrameBuffer,
        link: &mut BackendLink,
        state: &mut SessionState,
        reconnect: &mut ReconnectState,
    ) {
        // Direct writes only happen when the buffer is empty, so
        // client-to-backend order is preserved across both paths.
        if link.write.is_none() || !buffer.is_empty() {
            buffer.push(data);
            tracing::trace!(
                session_id = self.id,
                buffered_bytes = buffer.byte_count(),
                "buffered client data while backend unavailable"
            );
            return;
        }

        let result = match link.write.as_mut() {
            Some(writer) => writer.write_all(&data).await,
            None => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(session_id = self.id, error = %e, "backend write failed");
            buffer.push(data);
            self.on_backend_failure("backend write error", link, state, reconnect);
        }
    }

    /// Kicks off a fresh connect attempt, releasing any previous link first.
    fn start_connect(&self, link: &mut BackendLink, state: &mut SessionState) {
        link.clear();
        let connector = self.connector.clone();
        link.connecting = Some(Box::pin(async move { connector.connect().await }));
        *state = SessionState::Connecting;
    }

    /// Shared path for every backend-side failure: connect failure, read
    /// EOF/error/timeout, and write failure. Schedules a backoff retry or
    /// degrades the session once attempts are exhausted.
    fn on_backend_failure(
        &self,
        reason: &str,
        link: &mut BackendLink,
        state: &mut SessionState,
        reconnect: &mut ReconnectState,
    ) {
        if *state == SessionState::Closing {
            return;
        }

        link.clear();
        let attempt = reconnect.record();
        self.registry.record_reconnect_attempt();

        if self.policy.should_retry(attempt) {
            let delay = self.policy.next_delay(attempt);
            tracing::warn!(
                session_id = self.id,
                reason,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backend unavailable, scheduling reconnect"
            );
            link.reconnect_at = Some(Instant::now() + delay);
            *state = SessionState::ReconnectPending;
        } else {
            tracing::error!(
                session_id = self.id,
                reason,
                attempts = reconnect.attempts(),
                "reconnect attempts exhausted, session degraded"
            );
            self.registry.record_error(format!(
                "session {}: reconnect attempts exhausted ({}): {}",
                self.id,
                reconnect.attempts(),
                reason
            ));
            link.reconnect_at = None;
            *state = SessionState::Degraded;
        }
    }
}

/// Reads from the backend when one is live; pends forever otherwise.
/// Silence is policed separately by the session's read deadline, which must
/// survive this future being dropped and recreated between loop iterations.
async fn read_backend(
    read_half: &mut Option<OwnedReadHalf>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match read_half {
        Some(reader) => {
            use tokio::io::AsyncReadExt;
            reader.read(buf).await
        }
        None => std::future::pending().await,
    }
}

/// Polls the pending connect attempt when one exists; pends forever otherwise.
async fn await_connect(connecting: &mut Option<ConnectFut>) -> std::io::Result<BackendConn> {
    match connecting {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Sleeps until the reconnect deadline when one is set; pends forever otherwise.
async fn await_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Waits for a shutdown signal when a receiver was supplied; pends forever
/// otherwise.
async fn recv_shutdown(rx: &mut Option<broadcast::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Drains the buffer to the backend in FIFO order. On a write failure the
/// chunk that could not be written goes back to the front, order preserved,
/// for a later drain.
async fn drain_buffer<W>(buffer: &mut FrameBuffer, writer: &mut W) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(chunk) = buffer.pop_front() {
        if let Err(e) = writer.write_all(&chunk).await {
            buffer.push_front(chunk);
            return Err(e);
        }
    }
    Ok(())
}
