//! The session actor: one task owning the socket and all chat state.
//!
//! Callers hold a [`SessionHandle`] and talk to the task over an mpsc
//! command channel; the task publishes its state back over watch
//! channels. All mutation happens inside the task, so the protocol
//! logic never needs a lock.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use parley_shared::crypto;
use parley_shared::protocol::{
    ChatMessageFrame, ConnectionFrame, Envelope, Frame, GroupKeyFrame, Knock, PingFrame,
};
use parley_shared::types::{AggregateStatus, ChatUuid, PeerConnection, PresenceStatus};

use crate::api::ApiClient;
use crate::backoff;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::group_key::{GroupKeyManager, KeyReceipt};
use crate::identity::Identity;
use crate::messages::{self, ChatMessage, MessageLog};
use crate::presence::{PresenceLedger, PresenceOutcome};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands a handle can send to its session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    SendMessage(String),
}

/// Both halves of the presence ledger, published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionsSnapshot {
    pub current_chat: Vec<PeerConnection>,
    pub other_sides: Vec<PeerConnection>,
}

/// Cheap, cloneable front for one session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    messages_rx: watch::Receiver<Vec<ChatMessage>>,
    connections_rx: watch::Receiver<ConnectionsSnapshot>,
    status_rx: watch::Receiver<AggregateStatus>,
}

impl SessionHandle {
    pub async fn connect(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Connect).await;
    }

    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Disconnect).await;
    }

    pub async fn send_message_to_user(&self, text: impl Into<String>) {
        let _ = self
            .cmd_tx
            .send(SessionCommand::SendMessage(text.into()))
            .await;
    }

    /// Reactive view of the reconciled message log.
    pub fn messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.messages_rx.clone()
    }

    /// Reactive view of the presence ledger.
    pub fn connections(&self) -> watch::Receiver<ConnectionsSnapshot> {
        self.connections_rx.clone()
    }

    /// Reactive view of the chat-wide status.
    pub fn status(&self) -> watch::Receiver<AggregateStatus> {
        self.status_rx.clone()
    }

    pub fn is_active(&self) -> bool {
        *self.status_rx.borrow() == AggregateStatus::Active
    }
}

/// Spawn a session task for one chat channel and return its handle.
pub fn spawn_session(config: SessionConfig, chat: ChatUuid) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (messages_tx, messages_rx) = watch::channel(Vec::new());
    let (connections_tx, connections_rx) = watch::channel(ConnectionsSnapshot::default());
    let (status_tx, status_rx) = watch::channel(AggregateStatus::Inactive);

    let api = ApiClient::new(config.api_base_url.clone());
    let session = Session {
        config,
        chat,
        api,
        state: SessionState::Idle,
        identity: None,
        ledger: None,
        keys: GroupKeyManager::new(),
        log: MessageLog::new(),
        socket: None,
        reconnect_attempts: 0,
        reconnect_at: None,
        messages_tx,
        connections_tx,
        status_tx,
    };
    tokio::spawn(session.run(cmd_rx));

    SessionHandle {
        cmd_tx,
        messages_rx,
        connections_rx,
        status_rx,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// No socket and no reconnect pending.
    Idle,
    /// Identity bootstrap or the websocket handshake is in flight.
    Connecting,
    /// Socket open and presence announced.
    Open,
    /// Transport lost; a reconnect may be scheduled.
    Closed,
}

struct Session {
    config: SessionConfig,
    chat: ChatUuid,
    api: ApiClient,
    state: SessionState,
    identity: Option<Identity>,
    ledger: Option<PresenceLedger>,
    keys: GroupKeyManager,
    log: MessageLog,
    socket: Option<WsStream>,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    messages_tx: watch::Sender<Vec<ChatMessage>>,
    connections_tx: watch::Sender<ConnectionsSnapshot>,
    status_tx: watch::Sender<AggregateStatus>,
}

impl Session {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Connect) => self.handle_connect().await,
                    Some(SessionCommand::Disconnect) => self.handle_disconnect().await,
                    Some(SessionCommand::SendMessage(text)) => self.handle_send_message(text).await,
                    None => {
                        // Every handle dropped; leave the chat cleanly.
                        self.handle_disconnect().await;
                        break;
                    }
                },
                incoming = next_frame(&mut self.socket) => match incoming {
                    Some(Ok(Message::Text(raw))) => self.handle_raw_frame(&raw).await,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("socket closed by server");
                        self.handle_transport_closed();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, "socket read failed");
                        self.handle_transport_closed();
                    }
                },
                _ = sleep_until_scheduled(reconnect_at) => {
                    info!(attempt = self.reconnect_attempts, "reconnecting");
                    self.reconnect_at = None;
                    self.state = SessionState::Connecting;
                    self.open_socket().await;
                }
            }
        }
    }

    async fn handle_connect(&mut self) {
        if self.state == SessionState::Open {
            debug!("already connected");
            return;
        }
        self.state = SessionState::Connecting;

        if self.identity.is_none() {
            let user_id = match &self.config.user_id {
                Some(id) => id.clone(),
                None => match self.api.fetch_user_id().await {
                    Ok(id) => id,
                    Err(err) => {
                        let err = SessionError::IdentityBootstrap(err.to_string());
                        warn!(%err, "connect aborted");
                        self.state = SessionState::Idle;
                        return;
                    }
                },
            };
            info!(user = %user_id, "session identity created");
            self.ledger = Some(PresenceLedger::new(user_id.clone()));
            self.identity = Some(Identity::new(user_id, self.config.user_name.clone()));
        }

        self.open_socket().await;
    }

    async fn open_socket(&mut self) {
        let url = self.config.chat_ws_url(&self.chat);
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(%url, "socket open");
                self.socket = Some(ws);
                self.state = SessionState::Open;
                self.reconnect_attempts = 0;
                self.reconnect_at = None;
                self.announce_presence(PresenceStatus::Connected).await;
            }
            Err(err) => {
                warn!(%url, %err, "connect failed");
                self.handle_transport_closed();
            }
        }
    }

    /// Transport is gone. Keep identity and chat state so the stream
    /// survives the gap; schedule a backoff reconnect while attempts
    /// remain.
    fn handle_transport_closed(&mut self) {
        self.socket = None;
        self.state = SessionState::Closed;

        if self.reconnect_attempts < self.config.max_reconnect_attempts {
            self.reconnect_attempts += 1;
            let delay = backoff::reconnect_delay(self.reconnect_attempts);
            info!(
                attempt = self.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            self.reconnect_at = Some(Instant::now() + delay);
        } else {
            warn!("reconnect attempts exhausted");
            self.reconnect_at = None;
        }
    }

    /// Deliberate leave: announce it, drop the socket, and forget the
    /// whole session identity so a later connect starts fresh.
    async fn handle_disconnect(&mut self) {
        self.announce_presence(PresenceStatus::Disconnected).await;
        if let Some(mut ws) = self.socket.take() {
            let _ = ws.close(None).await;
        }

        self.state = SessionState::Idle;
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.identity = None;
        self.ledger = None;
        self.keys.clear();
        self.log.clear();

        self.publish_messages();
        self.publish_connections();
        info!("session disconnected");
    }

    async fn handle_send_message(&mut self, text: String) {
        if self.state != SessionState::Open {
            warn!("dropping outgoing message while offline");
            return;
        }
        let Some(identity) = &self.identity else {
            return;
        };

        match messages::encode_outgoing(self.keys.current_key(), &identity.user_id, &text) {
            Ok((frame, local)) => {
                self.log.push_local(local);
                self.publish_messages();
                self.send_frame(Frame::ChatMessage(frame)).await;
            }
            Err(err) => warn!(%err, "message not sent"),
        }
    }

    async fn handle_raw_frame(&mut self, raw: &str) {
        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return;
            }
        };

        match envelope.data {
            Frame::Connection(frame) => self.handle_connection(frame).await,
            Frame::ChatMessage(frame) => self.handle_chat_message(frame),
            Frame::GroupKey(frame) => self.handle_group_key(frame).await,
            Frame::Ping(frame) => self.handle_ping(frame).await,
        }
    }

    async fn handle_connection(&mut self, frame: ConnectionFrame) {
        let Some(ledger) = self.ledger.as_mut() else {
            return;
        };

        match ledger.observe(&frame) {
            PresenceOutcome::SelfConfirmed => {
                // We are in. First joiner mints the group key; later
                // joiners will be handed one (or win the conflict).
                if self.keys.current().is_none() {
                    self.keys.create_new();
                    self.distribute_key_to_known_peers().await;
                }
            }
            PresenceOutcome::NewPeer(peer) => {
                // Tell the newcomer we are here, then hand them the key.
                self.announce_presence(PresenceStatus::StayingAlive).await;
                self.distribute_key_to(&peer).await;
            }
            PresenceOutcome::Removed | PresenceOutcome::NoOp => {}
        }

        self.publish_connections();
    }

    fn handle_chat_message(&mut self, frame: ChatMessageFrame) {
        let decoded = messages::decode_incoming(
            self.keys.current_key(),
            &frame,
            &self.config.decrypt_placeholder,
        );
        self.log.reconcile(decoded);
        self.publish_messages();
    }

    async fn handle_group_key(&mut self, frame: GroupKeyFrame) {
        let receipt = {
            let Some(identity) = &self.identity else {
                return;
            };
            let sender_public = match self
                .ledger
                .as_ref()
                .and_then(|ledger| ledger.find_peer(&frame.from_user_id))
                .map(|peer| crypto::import_public_key(&peer.public_key))
            {
                Some(Ok(key)) => Some(key),
                Some(Err(err)) => {
                    warn!(from = %frame.from_user_id, %err, "peer public key unusable");
                    return;
                }
                None => None,
            };

            match self.keys.receive(identity, &frame, sender_public.as_ref()) {
                Ok(receipt) => receipt,
                Err(err) => {
                    warn!(from = %frame.from_user_id, %err, "dropping group key frame");
                    return;
                }
            }
        };

        match receipt {
            KeyReceipt::Installed | KeyReceipt::Ignored => {}
            KeyReceipt::KeptNewer => {
                // The sender holds a losing key; hand them ours.
                let sender = self
                    .ledger
                    .as_ref()
                    .and_then(|ledger| ledger.find_peer(&frame.from_user_id))
                    .cloned();
                match sender {
                    Some(peer) => self.distribute_key_to(&peer).await,
                    None => self.announce_presence(PresenceStatus::StayingAlive).await,
                }
            }
            KeyReceipt::NeedsResync => {
                // Unknown sender; re-announce so the exchange restarts.
                self.announce_presence(PresenceStatus::StayingAlive).await;
            }
        }
    }

    async fn handle_ping(&mut self, frame: PingFrame) {
        if frame.ping_type == Knock::Ping {
            self.send_frame(Frame::Ping(PingFrame {
                ping_type: Knock::Pong,
            }))
            .await;
        }
    }

    async fn announce_presence(&mut self, status: PresenceStatus) {
        let frame = match &self.identity {
            Some(identity) => Frame::Connection(ConnectionFrame {
                status,
                user_id: identity.user_id.clone(),
                user_name: identity.user_name.clone(),
                public_key: identity.portable_public_key(),
            }),
            None => return,
        };
        self.send_frame(frame).await;
    }

    async fn distribute_key_to_known_peers(&mut self) {
        let peers: Vec<PeerConnection> = self
            .ledger
            .as_ref()
            .map(|ledger| ledger.other_sides().to_vec())
            .unwrap_or_default();
        for peer in &peers {
            self.distribute_key_to(peer).await;
        }
    }

    async fn distribute_key_to(&mut self, peer: &PeerConnection) {
        let Some(identity) = &self.identity else {
            return;
        };
        let frame = match self.keys.distribute_to(identity, peer) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(peer = %peer.user_id, %err, "group key not distributed");
                return;
            }
        };
        self.send_frame(Frame::GroupKey(frame)).await;
    }

    async fn send_frame(&mut self, frame: Frame) {
        let json = match Envelope::new(frame).to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "frame serialization failed");
                return;
            }
        };
        let Some(ws) = self.socket.as_mut() else {
            debug!("no socket; frame dropped");
            return;
        };
        if let Err(err) = ws.send(Message::Text(json)).await {
            warn!(%err, "socket write failed");
            self.handle_transport_closed();
        }
    }

    fn publish_messages(&self) {
        let _ = self.messages_tx.send(self.log.snapshot());
    }

    fn publish_connections(&self) {
        let snapshot = self
            .ledger
            .as_ref()
            .map(|ledger| ConnectionsSnapshot {
                current_chat: ledger.current_chat().to_vec(),
                other_sides: ledger.other_sides().to_vec(),
            })
            .unwrap_or_default();
        let status = self
            .ledger
            .as_ref()
            .map(|ledger| ledger.aggregate_status())
            .unwrap_or(AggregateStatus::Inactive);

        let _ = self.connections_tx.send(snapshot);
        let _ = self.status_tx.send(status);
    }
}

/// Read the next frame, or park forever while there is no socket.
async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

/// Sleep until the reconnect deadline, or park forever if none is set.
async fn sleep_until_scheduled(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
