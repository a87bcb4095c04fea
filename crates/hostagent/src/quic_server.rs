//! QUIC server for board sessions
//!
//! One task per connection reads frames into the inbound queue. A single
//! dispatcher task owns the [`HostAuthority`], so sequence assignment, state
//! updates and broadcast happen in one order. Each connection has its own
//! writer task draining a broadcast receiver; a writer that lags past the
//! channel capacity closes its connection and the client rejoins with a
//! fresh snapshot.

use anyhow::{Context, Result};
use bytes::Bytes;
use classboard_core::transport::{configure_server, TransportTuning};
use classboard_core::{BoardOp, Envelope, Frame, MessageCodec};
use quinn::{Endpoint, TokioRuntime, VarInt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::authority::{ConnId, HostAuthority};
use crate::cert::HostCert;
use crate::queue::{HostEvent, HostStatus, InboundQueue, JoinReply};
use crate::snapshot::SNAPSHOT_CHUNK;

/// Application close code: session stopped
pub const CLOSE_STOPPED: u32 = 1;
/// Application close code: receiver fell behind the broadcast
pub const CLOSE_LAGGED: u32 = 2;

/// Host configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bind: SocketAddr,
    /// Inbound queue size before move batches are shed
    pub inbound_capacity: usize,
    /// Broadcast backlog a connection may fall behind before it is dropped
    pub broadcast_capacity: usize,
    pub snapshot_chunk: usize,
    /// Start the session immediately
    pub autostart: bool,
    pub transport: TransportTuning,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8443)),
            inbound_capacity: 1024,
            broadcast_capacity: 1024,
            snapshot_chunk: SNAPSHOT_CHUNK,
            autostart: true,
            transport: TransportTuning::default(),
        }
    }
}

/// Cloneable control surface over the dispatcher
#[derive(Debug, Clone)]
pub struct HostHandle {
    queue: Arc<InboundQueue>,
}

impl HostHandle {
    pub fn new(queue: Arc<InboundQueue>) -> Self {
        Self { queue }
    }

    /// Publish a host-originated op. Returns its global sequence number.
    pub async fn publish(&self, op: BoardOp) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.queue.push(HostEvent::Publish { op, reply: Some(tx) });
        let seq = rx.await.context("Dispatcher stopped")??;
        Ok(seq)
    }

    pub fn start(&self) {
        self.queue.push(HostEvent::Start);
    }

    pub fn stop(&self) {
        self.queue.push(HostEvent::Stop);
    }

    pub async fn status(&self) -> Result<HostStatus> {
        let (tx, rx) = oneshot::channel();
        self.queue.push(HostEvent::Status { reply: tx });
        rx.await.context("Dispatcher stopped")
    }
}

/// Owns the authority and serializes every state change
pub struct Dispatcher {
    authority: HostAuthority,
    queue: Arc<InboundQueue>,
    updates: broadcast::Sender<Bytes>,
    broadcast_capacity: usize,
}

impl Dispatcher {
    pub fn new(config: &HostConfig, queue: Arc<InboundQueue>) -> Self {
        let mut authority = HostAuthority::new(config.snapshot_chunk);
        if config.autostart {
            authority.start();
        }
        let capacity = config.broadcast_capacity.max(1);
        Self {
            authority,
            queue,
            updates: broadcast::channel(capacity).0,
            broadcast_capacity: capacity,
        }
    }

    /// Process events until the queue closes
    pub async fn run(mut self) {
        while let Some(event) = self.queue.pop().await {
            self.handle(event);
        }
        debug!("Dispatcher finished");
    }

    fn handle(&mut self, event: HostEvent) {
        match event {
            HostEvent::Frame { conn, env } => {
                if let Some(stamped) = self.authority.accept(env, Some(conn)) {
                    self.broadcast(&stamped);
                }
            }
            HostEvent::Legacy { conn, op } => {
                debug!(conn, op = %op.msg_type(), "Legacy text frame");
                match Envelope::from_server(&op) {
                    Ok(env) => {
                        if let Some(stamped) = self.authority.accept(env, None) {
                            self.broadcast(&stamped);
                        }
                    }
                    Err(e) => warn!(conn, error = %e, "Failed to wrap legacy frame"),
                }
            }
            HostEvent::Join { conn, reply } => {
                if !self.authority.is_running() {
                    let _ = reply.send(None);
                    return;
                }
                let snapshot = match self.snapshot_frames() {
                    Ok(frames) => frames,
                    Err(e) => {
                        error!(conn, error = %e, "Failed to build snapshot");
                        let _ = reply.send(None);
                        return;
                    }
                };
                info!(conn, frames = snapshot.len(), "Sending snapshot");
                let updates = self.updates.subscribe();
                let _ = reply.send(Some(JoinReply { snapshot, updates }));
            }
            HostEvent::Leave { conn } => {
                let ended = self.authority.end_open_strokes(conn);
                if !ended.is_empty() {
                    debug!(conn, strokes = ended.len(), "Ended strokes left open by departed peer");
                }
                for env in &ended {
                    self.broadcast(env);
                }
                if let Some(user) = self.authority.remove_connection(conn) {
                    info!(
                        conn,
                        user = %user,
                        participants = self.authority.participants().len(),
                        "Participant left"
                    );
                }
            }
            HostEvent::Publish { op, reply } => {
                let result = self.authority.publish(&op).map(|env| {
                    self.broadcast(&env);
                    env.global_seq.unwrap_or_default()
                });
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "Publish failed");
                        }
                    }
                }
            }
            HostEvent::Start => {
                if !self.authority.start() {
                    info!("Session already running");
                }
            }
            HostEvent::Stop => {
                self.authority.stop();
                // Dropping the old sender closes every writer
                self.updates = broadcast::channel(self.broadcast_capacity).0;
            }
            HostEvent::Status { reply } => {
                let _ = reply.send(HostStatus {
                    state: self.authority.state(),
                    participants: self.authority.participants(),
                    strokes: self.authority.board().len(),
                    last_seq: self.authority.last_seq(),
                    background_page: self.authority.background().map(|bg| bg.page),
                    dropped_batches: self.queue.dropped(),
                });
            }
        }
    }

    fn snapshot_frames(&self) -> classboard_core::Result<Vec<Bytes>> {
        self.authority
            .snapshot()?
            .iter()
            .map(|env| MessageCodec::encode(env).map(Bytes::from))
            .collect()
    }

    fn broadcast(&self, env: &Envelope) {
        match MessageCodec::encode(env) {
            Ok(frame) => {
                // No receivers is fine
                let _ = self.updates.send(Bytes::from(frame));
            }
            Err(e) => warn!(error = %e, "Failed to encode broadcast"),
        }
    }
}

/// QUIC server for board connections
pub struct QuicServer {
    endpoint: Endpoint,
    queue: Arc<InboundQueue>,
    config: HostConfig,
}

impl QuicServer {
    /// Create new QUIC server with a self-signed certificate
    pub fn new(config: HostConfig) -> Result<(Self, HostCert)> {
        let cert = HostCert::generate().context("Failed to generate certificate")?;
        let server_config = configure_server(vec![cert.cert.clone()], cert.key.clone_key(), &config.transport)
            .context("Failed to configure server")?;

        let socket = std::net::UdpSocket::bind(config.bind).context("Failed to bind UDP socket")?;
        let endpoint = Endpoint::new(Default::default(), Some(server_config), socket, Arc::new(TokioRuntime))
            .context("Failed to create QUIC endpoint")?;

        info!("QUIC server listening on {}", endpoint.local_addr()?);

        let queue = Arc::new(InboundQueue::new(config.inbound_capacity));
        Ok((Self { endpoint, queue, config }, cert))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle::new(Arc::clone(&self.queue))
    }

    /// Endpoint clone, for closing from outside the accept loop
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Run server (accepts connections until the endpoint closes)
    pub async fn run(self) -> Result<()> {
        let dispatcher = tokio::spawn(Dispatcher::new(&self.config, Arc::clone(&self.queue)).run());

        let mut next_conn: ConnId = 0;
        while let Some(incoming) = self.endpoint.accept().await {
            next_conn += 1;
            let conn = next_conn;
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, conn, queue).await {
                    error!(conn, "Connection error: {:#}", e);
                }
            });
        }

        warn!("Endpoint closed");
        self.queue.close();
        dispatcher.await.context("Dispatcher panicked")?;
        Ok(())
    }
}

async fn handle_connection(incoming: quinn::Incoming, conn: ConnId, queue: Arc<InboundQueue>) -> Result<()> {
    let connection = incoming.accept()?.await?;
    info!(conn, remote = %connection.remote_address(), "Connection opened");

    let (send, recv) = connection.accept_bi().await?;

    let (reply_tx, reply_rx) = oneshot::channel();
    queue.push(HostEvent::Join { conn, reply: reply_tx });
    let Ok(Some(join)) = reply_rx.await else {
        info!(conn, "Session not running, refusing connection");
        connection.close(VarInt::from_u32(CLOSE_STOPPED), b"session stopped");
        return Ok(());
    };

    let writer = tokio::spawn(write_loop(send, join, connection.clone(), conn));
    let result = read_loop(recv, conn, &queue).await;

    queue.push(HostEvent::Leave { conn });
    writer.abort();
    info!(conn, "Connection closed");
    result
}

async fn read_loop(mut recv: quinn::RecvStream, conn: ConnId, queue: &InboundQueue) -> Result<()> {
    let mut recv_buffer = Vec::new();
    let mut read_buf = [0u8; 8192];

    loop {
        let n = match recv.read(&mut read_buf).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                debug!(conn, "Stream finished by peer");
                return Ok(());
            }
            Err(quinn::ReadError::ConnectionLost(e)) => {
                debug!(conn, reason = %e, "Connection lost");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        recv_buffer.extend_from_slice(&read_buf[..n]);

        let mut offset = 0;
        while let Some((body, consumed)) = MessageCodec::split_frame(&recv_buffer[offset..])? {
            match MessageCodec::decode_frame(body) {
                Ok(Frame::Envelope(env)) => {
                    queue.push(HostEvent::Frame { conn, env });
                }
                Ok(Frame::Legacy(op)) => {
                    queue.push(HostEvent::Legacy { conn, op });
                }
                Err(e) => warn!(conn, error = %e, "Dropping undecodable frame"),
            }
            offset += consumed;
        }
        recv_buffer.drain(..offset);
    }
}

async fn write_loop(
    mut send: quinn::SendStream,
    join: JoinReply,
    connection: quinn::Connection,
    conn: ConnId,
) -> Result<()> {
    for frame in &join.snapshot {
        send.write_all(frame).await?;
    }

    let mut updates = join.updates;
    loop {
        match updates.recv().await {
            Ok(frame) => send.write_all(&frame).await?,
            Err(RecvError::Lagged(skipped)) => {
                warn!(conn, skipped, "Peer fell behind broadcast, disconnecting");
                connection.close(VarInt::from_u32(CLOSE_LAGGED), b"lagged");
                return Ok(());
            }
            Err(RecvError::Closed) => {
                info!(conn, "Session ended, closing connection");
                connection.close(VarInt::from_u32(CLOSE_STOPPED), b"session stopped");
                return Ok(());
            }
        }
    }
}
