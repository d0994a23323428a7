//! TCP Transport Implementation
//!
//! Socket connector and acceptor for remote grid nodes. Each frame is a
//! 4-byte big-endian length prefix followed by one serialized envelope.
//! Every session gets its own reader task; the write side is shared behind
//! an async mutex so concurrent senders never interleave frames.

use super::{next_session_id, Connector, EnvelopeHandler, EnvelopeWriter, SessionWriter};
use crate::address::ConnectorAddress;
use crate::message::Envelope;
use crate::{GridError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use grid_config::TransportSettings;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sessions currently managed by an acceptor
type SessionTable = Arc<DashMap<u64, Arc<TcpSession>>>;

/// One open TCP session
pub struct TcpSession {
    id: u64,
    peer_addr: SocketAddr,
    writer: tokio::sync::Mutex<WriteState>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    last_activity: Mutex<Instant>,
    max_frame_size: usize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

struct WriteState {
    stream: OwnedWriteHalf,
    /// Reusable frame buffer
    buffer: BytesMut,
}

/// TCP session statistics
#[derive(Debug, Clone)]
pub struct TcpSessionStats {
    pub peer_addr: SocketAddr,
    pub idle_for: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TcpSession {
    /// Wrap an established stream and spawn its reader task
    fn start(
        stream: TcpStream,
        handler: Arc<dyn EnvelopeHandler>,
        settings: &TransportSettings,
        table: Option<SessionTable>,
    ) -> Result<Arc<Self>> {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (closed_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            id: next_session_id(),
            peer_addr,
            writer: tokio::sync::Mutex::new(WriteState {
                stream: write_half,
                buffer: BytesMut::with_capacity(settings.read_buffer_size),
            }),
            open: AtomicBool::new(true),
            closed_tx,
            last_activity: Mutex::new(Instant::now()),
            max_frame_size: settings.max_frame_size,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        });

        if let Some(table) = &table {
            table.insert(session.id, session.clone());
        }

        tokio::spawn(run_session(
            session.clone(),
            read_half,
            handler,
            settings.clone(),
            table,
        ));

        Ok(session)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Time since the last frame in either direction
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn stats(&self) -> TcpSessionStats {
        TcpSessionStats {
            peer_addr: self.peer_addr,
            idle_for: self.idle_for(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

#[async_trait]
impl EnvelopeWriter for TcpSession {
    async fn write(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_open() {
            return Err(GridError::connection("Session is closed", Some(self.peer_addr)));
        }

        let data = envelope.to_wire_format()?;
        if data.len() > self.max_frame_size {
            return Err(GridError::protocol(format!(
                "Envelope size {} exceeds maximum {}",
                data.len(),
                self.max_frame_size
            )));
        }

        let mut state = self.writer.lock().await;
        let WriteState { stream, buffer } = &mut *state;

        buffer.clear();
        buffer.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buffer.extend_from_slice(&data);

        // Single write call per frame
        stream.write_all(&buffer[..]).await.map_err(|e| {
            GridError::connection_with_source("Failed to write envelope", Some(self.peer_addr), e)
        })?;
        stream.flush().await.map_err(|e| {
            GridError::connection_with_source("Failed to flush TCP stream", Some(self.peer_addr), e)
        })?;

        let total = self
            .bytes_sent
            .fetch_add(4 + data.len() as u64, Ordering::Relaxed);
        self.touch();

        debug!(
            session = self.id,
            peer = %self.peer_addr,
            bytes = data.len(),
            total_sent = total + 4 + data.len() as u64,
            request_id = envelope.request_id,
            response_id = envelope.response_id,
            "Sent envelope over TCP"
        );

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed_tx.send_replace(true);

        let mut state = self.writer.lock().await;
        if let Err(e) = state.stream.shutdown().await {
            warn!("Error shutting down TCP session: {}", e);
        }
        info!("Closed TCP session {} to {}", self.id, self.peer_addr);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> u64 {
        self.id
    }

    fn peer(&self) -> String {
        self.peer_addr.to_string()
    }
}

/// Read one length-prefixed frame; `None` on a clean end of stream
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_size: usize) -> Result<Option<Bytes>> {
    let frame_len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(GridError::protocol_with_source("Failed to read frame length", e)),
    };

    if frame_len > max_size {
        return Err(GridError::protocol(format!(
            "Frame size {} exceeds maximum {}",
            frame_len, max_size
        )));
    }

    let mut buffer = BytesMut::zeroed(frame_len);
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| GridError::protocol_with_source("Failed to read frame data", e))?;

    Ok(Some(buffer.freeze()))
}

/// Reader loop for one session
async fn run_session(
    session: Arc<TcpSession>,
    read_half: OwnedReadHalf,
    handler: Arc<dyn EnvelopeHandler>,
    settings: TransportSettings,
    table: Option<SessionTable>,
) {
    let writer: SessionWriter = session.clone();
    handler.session_opened(&writer).await;

    let idle_watch = tokio::spawn(watch_idle(
        session.clone(),
        handler.clone(),
        settings.idle_timeout(),
    ));

    let mut reader = BufReader::with_capacity(settings.read_buffer_size, read_half);
    let mut closed_rx = session.closed_tx.subscribe();

    while session.is_open() {
        tokio::select! {
            frame = read_frame(&mut reader, session.max_frame_size) => match frame {
                Ok(Some(bytes)) => {
                    session.bytes_received.fetch_add(4 + bytes.len() as u64, Ordering::Relaxed);
                    session.touch();

                    match Envelope::from_wire_format(&bytes) {
                        Ok(envelope) => handler.envelope_received(writer.clone(), envelope).await,
                        Err(e) => {
                            warn!(session = session.id, error = %e, "Dropping undecodable frame");
                            handler.session_error(&writer, &e.to_string()).await;
                        }
                    }
                }
                Ok(None) => {
                    debug!(session = session.id, peer = %session.peer_addr, "Peer closed TCP session");
                    break;
                }
                Err(e) => {
                    warn!(session = session.id, peer = %session.peer_addr, error = %e, "TCP session failed");
                    handler.session_error(&writer, &e.to_string()).await;
                    break;
                }
            },
            _ = closed_rx.changed() => break,
        }
    }

    session.open.store(false, Ordering::SeqCst);
    idle_watch.abort();
    if let Some(table) = &table {
        table.remove(&session.id);
    }
    handler.session_closed(&writer).await;
}

/// Report the session idle once per idle period without traffic
async fn watch_idle(session: Arc<TcpSession>, handler: Arc<dyn EnvelopeHandler>, idle: Duration) {
    if idle.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(idle);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !session.is_open() {
            break;
        }
        if session.idle_for() >= idle {
            let writer: SessionWriter = session.clone();
            handler.session_idle(&writer).await;
        }
    }
}

/// Connector for the socket scheme (`Mina:<name>:<host>:<port>`)
pub struct TcpConnector {
    settings: TransportSettings,
}

impl TcpConnector {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn scheme(&self) -> &str {
        grid_config::service::transport::REMOTE_SCHEME
    }

    async fn open(
        &self,
        address: &ConnectorAddress,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<SessionWriter> {
        let target = address.socket_target()?;
        info!("Connecting to grid node at {}", address);

        let connect_timeout = self.settings.connect_timeout();
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(target.as_str()))
            .await
            .map_err(|_| {
                GridError::connector(
                    address,
                    format!("connect timed out after {}ms", connect_timeout.as_millis()),
                )
            })?
            .map_err(|e| GridError::connector_with_source(address, "Failed to connect", e))?;

        let session = TcpSession::start(stream, handler, &self.settings, None)
            .map_err(|e| GridError::connector_with_source(address, "Failed to start session", e))?;

        info!("Connected to grid node at {} (session {})", address, session.id);
        Ok(session)
    }
}

/// Accepts TCP sessions and hands their envelopes to one handler
pub struct TcpAcceptor {
    local_addr: SocketAddr,
    sessions: SessionTable,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpAcceptor {
    /// Bind `addr` and start accepting sessions
    pub async fn bind(
        addr: SocketAddr,
        settings: TransportSettings,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            GridError::connection_with_source("Failed to bind TCP listener", Some(addr), e)
        })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Grid acceptor listening on {} (read buffer {} bytes, idle {}s)",
            local_addr, settings.read_buffer_size, settings.idle_timeout_secs
        );

        let sessions: SessionTable = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            handler,
            settings,
            sessions.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            sessions,
            shutdown_tx,
            accept_task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected sessions
    pub fn managed_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stop accepting and close every managed session
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let open: Vec<Arc<TcpSession>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in open {
            let _ = session.close().await;
        }

        info!("Grid acceptor on {} stopped", self.local_addr);
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn EnvelopeHandler>,
    settings: TransportSettings,
    sessions: SessionTable,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    match TcpSession::start(stream, handler.clone(), &settings, Some(sessions.clone())) {
                        Ok(session) => info!("Accepted TCP session {} from {}", session.id, peer),
                        Err(e) => warn!("Failed to start session for {}: {}", peer, e),
                    }
                }
                Err(e) => warn!("Failed to accept TCP connection: {}", e),
            },
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("Accept loop finished");
}
