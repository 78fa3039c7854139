/// Live event transport
///
/// One socket connection per user session, shared by every open
/// conversation view; each view's subscription is reference-counted
/// join/leave bookkeeping on top of that shared connection. Reconnection
/// is automatic with a fixed delay and a bounded attempt count; once
/// exhausted the status settles on `Disconnected` and the UI shows a
/// persistent indicator. Events missed during a gap are not replayed.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::events::{ClientFrame, LiveEvent};
use crate::message::{ConversationKey, EventId, UserId};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Connection state of the shared socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// Connecting or re-connecting; `attempt` is 0 for the initial dial
    Reconnecting { attempt: u32 },
    /// Reconnection attempts exhausted (or session torn down)
    Disconnected,
}

/// Socket room a conversation key maps onto. Every direct thread shares
/// the session user's DM room; each event chat has a room of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Room {
    Dm,
    Event(EventId),
}

impl Room {
    fn of(key: ConversationKey) -> Self {
        match key {
            ConversationKey::Direct(_) => Room::Dm,
            ConversationKey::Event(event_id) => Room::Event(event_id),
        }
    }
}

fn join_frame(room: Room, user_id: UserId) -> ClientFrame {
    match room {
        Room::Dm => ClientFrame::JoinDm { user_id },
        Room::Event(event_id) => ClientFrame::JoinEventChat { event_id, user_id },
    }
}

/// The push channel the session consumes. Behind a trait so tests can
/// drive events without a socket server.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Bring the shared connection up (spawns the socket task)
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down on logout
    async fn shutdown(&self);

    /// Subscribe a view to a conversation's room
    async fn join(&self, key: ConversationKey) -> Result<()>;

    /// Unsubscribe a view; the room is left once no view holds it
    async fn leave(&self, key: ConversationKey) -> Result<()>;

    /// Emit a frame (e.g. the echo of a persisted message). Dropped with
    /// a log line while the socket is down; live frames are not queued
    /// across disconnections.
    async fn send(&self, frame: ClientFrame) -> Result<()>;

    fn events(&self) -> broadcast::Receiver<LiveEvent>;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

// ─── WebSocket implementation ────────────────────────────────────────────────

pub struct WsTransport {
    url: String,
    user_id: UserId,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    rooms: Arc<RwLock<HashMap<Room, usize>>>,
    outbound_tx: mpsc::Sender<ClientFrame>,
    /// Taken by the socket task on `connect`
    outbound_rx: Mutex<Option<mpsc::Receiver<ClientFrame>>>,
    events_tx: broadcast::Sender<LiveEvent>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl WsTransport {
    pub fn new(config: &Config, user_id: UserId) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(ConnectionStatus::Reconnecting { attempt: 0 });
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            url: config.socket_url.clone(),
            user_id,
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            events_tx,
            status_tx: Arc::new(status_tx),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }

    async fn enqueue(&self, frame: ClientFrame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| ChatError::Transport("socket task not running".to_string()))
    }
}

#[async_trait]
impl LiveTransport for WsTransport {
    async fn connect(&self) -> Result<()> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ChatError::Transport("transport already started".to_string()))?;

        let runner = Runner {
            url: self.url.clone(),
            user_id: self.user_id,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            rooms: self.rooms.clone(),
            events_tx: self.events_tx.clone(),
            status_tx: self.status_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        tokio::spawn(runner.run(outbound_rx));
        Ok(())
    }

    async fn shutdown(&self) {
        info!("shutting down live transport");
        let _ = self.shutdown_tx.send(true);
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }

    async fn join(&self, key: ConversationKey) -> Result<()> {
        let room = Room::of(key);
        let first_ref = {
            let mut rooms = self.rooms.write().await;
            let count = rooms.entry(room).or_insert(0);
            *count += 1;
            *count == 1
        };
        debug!("join {:?} (room {:?}, first_ref={})", key, room, first_ref);

        // Joins while offline are replayed by the connect path, which
        // re-emits the whole room set after the socket comes up.
        if first_ref && self.is_connected() {
            self.enqueue(join_frame(room, self.user_id)).await?;
        }
        Ok(())
    }

    async fn leave(&self, key: ConversationKey) -> Result<()> {
        let room = Room::of(key);
        let last_ref = {
            let mut rooms = self.rooms.write().await;
            match rooms.get_mut(&room) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    rooms.remove(&room);
                    true
                }
                None => false,
            }
        };
        debug!("leave {:?} (room {:?}, last_ref={})", key, room, last_ref);

        // Only event rooms have an explicit leave; the DM room is bound
        // to the socket itself and dropped server-side with it.
        if last_ref && self.is_connected() {
            if let Room::Event(event_id) = room {
                self.enqueue(ClientFrame::LeaveEventChat { event_id }).await?;
            }
        }
        Ok(())
    }

    async fn send(&self, frame: ClientFrame) -> Result<()> {
        if !self.is_connected() {
            debug!("socket offline, frame dropped: {:?}", frame);
            return Ok(());
        }
        self.enqueue(frame).await
    }

    fn events(&self) -> broadcast::Receiver<LiveEvent> {
        self.events_tx.subscribe()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}

// ─── Socket task ─────────────────────────────────────────────────────────────

struct Runner {
    url: String,
    user_id: UserId,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    rooms: Arc<RwLock<HashMap<Room, usize>>>,
    events_tx: broadcast::Sender<LiveEvent>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runner {
    async fn run(mut self, mut outbound: mpsc::Receiver<ClientFrame>) {
        let mut attempt: u32 = 0;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!("socket connected to {}", self.url);
                    attempt = 0;
                    let _ = self.status_tx.send(ConnectionStatus::Connected);

                    match self.drive(stream, &mut outbound).await {
                        Ok(()) => break, // clean shutdown
                        Err(e) => warn!("socket session ended: {}", e),
                    }
                }
                Err(e) => warn!("socket connect to {} failed: {}", self.url, e),
            }

            attempt += 1;
            if attempt > self.reconnect_attempts {
                error!(
                    "giving up after {} reconnection attempts",
                    self.reconnect_attempts
                );
                let _ = self.status_tx.send(ConnectionStatus::Disconnected);
                return;
            }
            let _ = self.status_tx.send(ConnectionStatus::Reconnecting { attempt });

            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }

    /// Pump one established connection until it drops or shutdown
    async fn drive(
        &mut self,
        stream: WsStream,
        outbound: &mut mpsc::Receiver<ClientFrame>,
    ) -> Result<()> {
        let (mut sink, mut source) = stream.split();

        // Presence announce, then re-join every room views still hold so
        // a reconnect restores the subscription set.
        send_frame(
            &mut sink,
            &ClientFrame::UserOnline {
                user_id: self.user_id,
            },
        )
        .await?;
        let rooms: Vec<Room> = self.rooms.read().await.keys().copied().collect();
        for room in rooms {
            send_frame(&mut sink, &join_frame(room, self.user_id)).await?;
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
                frame = outbound.recv() => match frame {
                    Some(frame) => send_frame(&mut sink, &frame).await?,
                    None => return Ok(()), // transport dropped
                },
                msg = source.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match LiveEvent::from_bytes(text.as_bytes()) {
                            Ok(event) => {
                                debug!("live event: {:?}", event);
                                let _ = self.events_tx.send(event);
                            }
                            Err(e) => warn!("{}", e),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        return Err(ChatError::Transport("closed by server".to_string()));
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => return Err(ChatError::Transport(e.to_string())),
                    None => return Err(ChatError::Transport("stream ended".to_string())),
                },
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> Result<()> {
    let json = frame.to_json()?;
    sink.send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| ChatError::Transport(e.to_string()))
}
