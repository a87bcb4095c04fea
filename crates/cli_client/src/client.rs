//! Client driver
//!
//! One task owns the board replica, the reconnect scheduler and the active
//! connection. Connection tasks, reconnect timers, the capture sink and the
//! console all talk to it over channels.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use classboard_core::transport::{client_crypto, configure_client, SERVER_NAME};
use classboard_core::types::{BgSet, Hello};
use classboard_core::{
    Applied, BoardOp, CaptureConfig, ClientSync, ConnectionState, DrawPermitFlag, Envelope, Frame,
    LocalOrigin, MessageCodec, ReconnectConfig, ReconnectScheduler, Stroke, StrokeCapture,
    TransportTuning,
};
use quinn::{Connection, Endpoint, RecvStream, SendStream, VarInt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::message_reader::MessageReader;

/// Captured ops flow to the driver through this sink
pub type OpSender = mpsc::UnboundedSender<BoardOp>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub user_id: String,
    /// Pinned host certificate; `None` skips verification
    pub fingerprint: Option<String>,
    pub reconnect: ReconnectConfig,
    pub transport: TransportTuning,
}

/// Point-in-time view of the client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub user_id: String,
    pub strokes: Vec<Stroke>,
    pub background: Option<BgSet>,
    pub last_global_seq: Option<u64>,
    pub can_draw: bool,
    /// Local ops sent since start
    pub sent: u64,
    /// Local ops dropped while disconnected
    pub dropped_offline: u64,
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Status(oneshot::Sender<ClientStatus>),
    Shutdown,
}

enum LinkEvent {
    Connected {
        link: u64,
        connection: Connection,
        send: SendStream,
        recv: RecvStream,
    },
    ConnectFailed {
        link: u64,
        error: String,
    },
    Inbound {
        link: u64,
        frame: Frame,
    },
    Closed {
        link: u64,
        reason: String,
    },
}

/// Cloneable control surface over the driver
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    ops: OpSender,
    local_origin: LocalOrigin,
    permit: DrawPermitFlag,
}

impl ClientHandle {
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub async fn status(&self) -> Result<ClientStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| anyhow::anyhow!("Client driver stopped"))?;
        rx.await.context("Client driver stopped")
    }

    /// Capture machine wired to this client
    pub fn capture(&self) -> StrokeCapture<OpSender> {
        self.capture_with(CaptureConfig::default())
    }

    pub fn capture_with(&self, config: CaptureConfig) -> StrokeCapture<OpSender> {
        StrokeCapture::with_config(config, self.ops.clone(), self.local_origin.clone(), self.permit.clone())
    }

    pub fn can_draw(&self) -> bool {
        self.permit.allowed()
    }
}

struct Link {
    id: u64,
    connection: Connection,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    tasks: [JoinHandle<()>; 2],
}

impl Link {
    fn close(self, reason: &str) {
        self.connection.close(VarInt::from_u32(0), reason.as_bytes());
        for task in self.tasks {
            task.abort();
        }
    }
}

pub struct Client {
    config: ClientConfig,
    endpoint: Endpoint,
    sync: ClientSync,
    scheduler: ReconnectScheduler,
    commands: mpsc::UnboundedReceiver<Command>,
    local_ops: mpsc::UnboundedReceiver<BoardOp>,
    fires: mpsc::UnboundedReceiver<u64>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    link: Option<Link>,
    connecting: Option<u64>,
    next_link: u64,
    sent: u64,
    dropped_offline: u64,
}

impl Client {
    /// Build the client and its handle. Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<(Self, ClientHandle)> {
        let bind: SocketAddr = if config.server.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };
        let mut endpoint = Endpoint::client(bind).context("Failed to create QUIC endpoint")?;
        let crypto = client_crypto(config.fingerprint.as_deref())?;
        endpoint.set_default_client_config(configure_client(crypto, &config.transport)?);

        let local_origin = LocalOrigin::new();
        let permit = DrawPermitFlag::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let handle = ClientHandle {
            commands: cmd_tx,
            ops: ops_tx,
            local_origin: local_origin.clone(),
            permit: permit.clone(),
        };

        let client = Self {
            sync: ClientSync::new(config.user_id.clone(), local_origin, permit),
            scheduler: ReconnectScheduler::new(config.reconnect.clone(), fire_tx),
            config,
            endpoint,
            commands: cmd_rx,
            local_ops: ops_rx,
            fires: fire_rx,
            link_tx,
            link_rx,
            link: None,
            connecting: None,
            next_link: 0,
            sent: 0,
            dropped_offline: 0,
        };
        Ok((client, handle))
    }

    /// Connect and process events until shut down
    pub async fn run(mut self) -> Result<()> {
        self.start_connect();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(op) = self.local_ops.recv() => self.on_local_op(op),
                Some(gen) = self.fires.recv() => {
                    if self.scheduler.fire(gen) {
                        self.spawn_connect();
                    }
                }
                Some(event) = self.link_rx.recv() => self.on_link_event(event),
            }
        }

        self.scheduler.disconnect();
        if let Some(link) = self.link.take() {
            link.close("client shutting down");
        }
        self.endpoint.close(VarInt::from_u32(0), b"client shutting down");
        info!("Client stopped");
        Ok(())
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.scheduler.state() == ConnectionState::Connected {
                    info!("Already connected");
                } else {
                    self.start_connect();
                }
            }
            Command::Disconnect => {
                self.scheduler.disconnect();
                self.connecting = None;
                if let Some(link) = self.link.take() {
                    link.close("user disconnect");
                }
                info!("Disconnected, auto-reconnect off");
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.scheduler.state(),
            attempt: self.scheduler.attempt(),
            user_id: self.sync.user_id().to_string(),
            strokes: self.sync.board().strokes().cloned().collect(),
            background: self.sync.background().current().cloned(),
            last_global_seq: self.sync.last_global_seq(),
            can_draw: self.sync.permit().allowed(),
            sent: self.sent,
            dropped_offline: self.dropped_offline,
        }
    }

    fn start_connect(&mut self) {
        self.scheduler.begin_connect();
        if let Some(link) = self.link.take() {
            link.close("reconnecting");
        }
        self.spawn_connect();
    }

    fn spawn_connect(&mut self) {
        self.next_link += 1;
        let link = self.next_link;
        self.connecting = Some(link);

        let endpoint = self.endpoint.clone();
        let server = self.config.server;
        let tx = self.link_tx.clone();
        info!(%server, link, "Connecting");

        tokio::spawn(async move {
            let event = match open_link(&endpoint, server).await {
                Ok((connection, send, recv)) => LinkEvent::Connected {
                    link,
                    connection,
                    send,
                    recv,
                },
                Err(e) => LinkEvent::ConnectFailed {
                    link,
                    error: format!("{:#}", e),
                },
            };
            let _ = tx.send(event);
        });
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected {
                link,
                connection,
                send,
                recv,
            } => {
                if self.connecting != Some(link) {
                    connection.close(VarInt::from_u32(0), b"superseded");
                    return;
                }
                self.connecting = None;
                self.on_connected(link, connection, send, recv);
            }
            LinkEvent::ConnectFailed { link, error } => {
                if self.connecting != Some(link) {
                    return;
                }
                self.connecting = None;
                warn!(link, error = %error, "Connect failed");
                self.scheduler.on_disconnected();
                self.scheduler.schedule();
            }
            LinkEvent::Inbound { link, frame } => {
                if self.link.as_ref().map(|l| l.id) == Some(link) {
                    self.on_inbound(frame);
                }
            }
            LinkEvent::Closed { link, reason } => {
                if self.link.as_ref().map(|l| l.id) != Some(link) {
                    return;
                }
                if let Some(link) = self.link.take() {
                    link.close("closed");
                }
                info!(reason = %reason, "Connection lost");
                self.scheduler.on_disconnected();
                self.scheduler.schedule();
            }
        }
    }

    fn on_connected(&mut self, id: u64, connection: Connection, mut send: SendStream, recv: RecvStream) {
        self.scheduler.on_connected();
        // The host replays a full snapshot
        self.sync.reset();
        info!(remote = %connection.remote_address(), link = id, "Connected");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = send.write_all(&frame).await {
                    debug!(error = %e, "Write failed");
                    return;
                }
            }
            let _ = send.finish();
        });

        let tx = self.link_tx.clone();
        let reader = tokio::spawn(async move {
            let mut reader = MessageReader::new(recv);
            loop {
                match reader.read_frame().await {
                    Ok(frame) => {
                        if tx.send(LinkEvent::Inbound { link: id, frame }).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.is_disconnect() => {
                        let _ = tx.send(LinkEvent::Closed {
                            link: id,
                            reason: e.to_string(),
                        });
                        return;
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                }
            }
        });

        self.link = Some(Link {
            id,
            connection,
            outbound: out_tx,
            tasks: [writer, reader],
        });

        let message = format!("Hi from {}", self.sync.user_id());
        self.on_local_op(BoardOp::Hello(Hello { message }));
    }

    fn on_inbound(&mut self, frame: Frame) {
        let env = match frame {
            Frame::Envelope(env) => env,
            Frame::Legacy(op) => match Envelope::from_server(&op) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "Failed to wrap legacy frame");
                    return;
                }
            },
        };

        match self.sync.apply_remote(&env) {
            Ok(Applied::Permit(allowed)) => {
                info!(allowed, "Host changed draw permit");
            }
            Ok(applied) => debug!(?applied, seq = ?env.global_seq, "Applied"),
            Err(e) => warn!(msg_type = %env.msg_type, error = %e, "Dropping undecodable payload"),
        }
    }

    fn on_local_op(&mut self, op: BoardOp) {
        let Some(link) = self.link.as_ref() else {
            self.dropped_offline += 1;
            debug!(op = %op.msg_type(), "Not connected, dropping captured op");
            return;
        };

        match self.sync.apply_local(&op).and_then(|env| MessageCodec::encode(&env)) {
            Ok(frame) => {
                if link.outbound.send(frame).is_ok() {
                    self.sent += 1;
                } else {
                    debug!("Writer gone, dropping op");
                }
            }
            Err(e) => warn!(op = %op.msg_type(), error = %e, "Failed to encode local op"),
        }
    }
}

async fn open_link(endpoint: &Endpoint, server: SocketAddr) -> Result<(Connection, SendStream, RecvStream)> {
    let connection = endpoint
        .connect(server, SERVER_NAME)?
        .await
        .context("QUIC handshake failed")?;
    let (send, recv) = connection.open_bi().await.context("Failed to open stream")?;
    Ok((connection, send, recv))
}
