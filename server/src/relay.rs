//! Session relay handling WebSocket transport and message fan-out
//!
//! The relay accepts connections, decodes each inbound JSON frame into a
//! typed message once, and rebroadcasts session traffic to the connected
//! peers. It applies no game rules of its own; the only state it maintains
//! is the name/colour/ready bookkeeping delegated to the client registry.
//!
//! All session mutation happens on one event loop, so every handler runs to
//! completion before the next message is processed. Registry updates plus
//! the broadcasts they trigger are therefore atomic per message.

use crate::registry::{ClientRegistry, ConnectionId, RegistrationError};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::Value;
use shared::{ClientMessage, ScreenSize, ServerMessage};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Events sent from connection tasks to the relay event loop
#[derive(Debug)]
pub enum SessionEvent {
    Connected {
        id: ConnectionId,
        sender: mpsc::UnboundedSender<Message>,
    },
    Inbound {
        id: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        id: ConnectionId,
    },
}

/// The relay server coordinating transport and session bookkeeping
pub struct Relay {
    listener: TcpListener,
    registry: ClientRegistry,
    /// Outbound senders keyed by connection id; ids ascend in accept order,
    /// so iteration gives the broadcast order the protocol promises.
    peers: BTreeMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    next_id: ConnectionId,

    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Relay {
    /// Binds the listening socket. Pass port 0 to let the OS pick one.
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Relay {
            listener,
            registry: ClientRegistry::new(),
            peers: BTreeMap::new(),
            next_id: 0,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main loop accepting connections and processing session events.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Relay started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let id = self.next_id;
                            self.next_id += 1;
                            spawn_connection(id, stream, addr, self.event_tx.clone());
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                },

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        // All senders gone; nothing can reach us any more.
                        None => break,
                    }
                },
            }
        }

        Ok(())
    }

    /// Applies one session event. Synchronous on purpose: the registry
    /// mutation and the resulting broadcasts form one atomic step.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { id, sender } => {
                self.registry.add(id);
                self.peers.insert(id, sender);
                self.broadcast(&ServerMessage::Connections(self.peers.len()));
            }

            SessionEvent::Inbound { id, message } => {
                self.dispatch(id, message);
            }

            SessionEvent::Disconnected { id } => {
                // After a reset the id is already gone; don't re-broadcast.
                let removed = self.peers.remove(&id).is_some();
                self.registry.remove(id);
                if removed {
                    self.broadcast(&ServerMessage::Connections(self.peers.len()));
                    self.broadcast(&ServerMessage::Roster(self.registry.roster()));
                }
            }
        }
    }

    fn dispatch(&mut self, id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::RegisterName(name) => match self.registry.register(id, &name) {
                Ok((colour, lead)) => {
                    self.send_to(id, &ServerMessage::Registration { lead, colour });
                    self.broadcast(&ServerMessage::Roster(self.registry.roster()));
                }
                Err(RegistrationError::UnknownConnection) => {
                    warn!("Registration from untracked connection {}", id);
                }
                Err(e) => {
                    info!("Connection {} registration rejected: {}", id, e);
                    self.send_to(id, &ServerMessage::InvalidName);
                }
            },

            ClientMessage::Fingerprint(payload) => {
                match extract_screen_size(&payload) {
                    Some(screen) => {
                        self.registry.record_fingerprint(id, screen);
                    }
                    None => {
                        warn!("Connection {} sent unparseable fingerprint payload", id);
                    }
                }
            }

            ClientMessage::CursorMove(delta) => {
                if self.registry.accumulate_cursor(id, delta).is_some() {
                    self.broadcast_except(id, &ServerMessage::Roster(self.registry.roster()));
                } else {
                    warn!("Cursor update from unregistered connection {}", id);
                }
            }

            ClientMessage::PlayerReady => {
                let name = self.registry.name_of(id).map(str::to_string);
                match name {
                    Some(name) => {
                        if self.registry.mark_ready(&name) {
                            let count = self.registry.ready_count();
                            info!("{} is ready ({} total)", name, count);
                            self.broadcast(&ServerMessage::UpdateReadyList(count));
                        }
                    }
                    None => warn!("Ready signal from unregistered connection {}", id),
                }
            }

            ClientMessage::NotifyAllStart => {
                self.broadcast(&ServerMessage::StartGame(self.registry.ready_count()));
            }

            ClientMessage::GridContents(data) => {
                self.broadcast(&ServerMessage::SharingGridContents(data));
            }

            ClientMessage::ClickBox(data) => {
                self.broadcast(&ServerMessage::SharingClickBox(data));
            }

            ClientMessage::LevelChange(data) => {
                self.broadcast(&ServerMessage::SharingLevelChange(data));
            }

            ClientMessage::EndGame => {
                self.broadcast(&ServerMessage::EndGame);
            }

            ClientMessage::ResetServer => {
                info!("Reset requested; dropping {} connections", self.peers.len());
                // Dropping the senders ends the writer tasks and closes the
                // sockets; the trailing Disconnected events find nothing to
                // remove and stay silent.
                self.peers.clear();
                self.registry.reset();
            }
        }
    }

    /// Sends a message to a single connection.
    fn send_to(&self, id: ConnectionId, message: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(message) {
            if let Some(sender) = self.peers.get(&id) {
                if sender.send(Message::text(json)).is_err() {
                    warn!("Connection {} outbound queue is closed", id);
                }
            }
        }
    }

    /// Fans a message out to every connection in accept order. A dead peer
    /// is logged and skipped; it never aborts delivery to the rest.
    fn broadcast(&self, message: &ServerMessage) {
        self.broadcast_filtered(message, None);
    }

    /// Fans a message out to every connection except the originator.
    fn broadcast_except(&self, skip: ConnectionId, message: &ServerMessage) {
        self.broadcast_filtered(message, Some(skip));
    }

    fn broadcast_filtered(&self, message: &ServerMessage, skip: Option<ConnectionId>) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return;
            }
        };

        for (id, sender) in &self.peers {
            if Some(*id) == skip {
                continue;
            }
            if sender.send(Message::text(json.clone())).is_err() {
                warn!("Connection {} outbound queue is closed", id);
            }
        }
    }
}

/// Spawns the reader and writer tasks for one accepted connection.
///
/// The reader decodes frames and forwards them as session events; malformed
/// frames are logged and dropped so one misbehaving client cannot take the
/// relay down. The writer drains the outbound queue into the socket and
/// stops when the relay drops its sender.
fn spawn_connection(
    id: ConnectionId,
    stream: TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };
        info!("Connection {} established from {}", id, addr);

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        if event_tx
            .send(SessionEvent::Connected { id, sender: out_tx })
            .is_err()
        {
            return;
        }

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        while let Some(frame) = ws_source.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        if event_tx
                            .send(SessionEvent::Inbound { id, message })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Connection {} sent malformed message: {}", id, e);
                    }
                },
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by the library; binary is ignored.
                Ok(_) => {}
                Err(e) => {
                    warn!("Connection {} transport error: {}", id, e);
                    break;
                }
            }
        }

        let _ = event_tx.send(SessionEvent::Disconnected { id });
        writer.abort();
        info!("Connection {} from {} closed", id, addr);
    });
}

/// Digs the screen-resolution descriptor out of a fingerprint payload.
///
/// The instrumentation source encodes the resolution either as a plain
/// `"WxH"` string or nested under the positional keys `"9"`/`"3"`. The
/// shape is undocumented, so anything else is treated as unparseable.
fn extract_screen_size(payload: &Value) -> Option<ScreenSize> {
    let descriptor = payload
        .as_str()
        .or_else(|| payload.get("9")?.get("3")?.as_str())?;
    ScreenSize::parse(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::{CursorDelta, CursorPosition, PALETTE};

    /// Builds a relay bound to an ephemeral port so handle_event can be
    /// driven directly, with channel-backed fake peers standing in for
    /// real sockets.
    async fn test_relay() -> Relay {
        Relay::bind("127.0.0.1:0").await.unwrap()
    }

    fn connect_peer(relay: &mut Relay, id: ConnectionId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        relay.handle_event(SessionEvent::Connected { id, sender: tx });
        rx
    }

    fn inbound(relay: &mut Relay, id: ConnectionId, message: ClientMessage) {
        relay.handle_event(SessionEvent::Inbound { id, message });
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let text = frame.to_text().unwrap().to_string();
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_connect_broadcasts_count() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);

        let msgs = drain(&mut rx1);
        assert!(matches!(msgs[0], ServerMessage::Connections(1)));
        assert!(matches!(msgs[1], ServerMessage::Connections(2)));

        let msgs = drain(&mut rx2);
        assert!(matches!(msgs[0], ServerMessage::Connections(2)));
    }

    #[tokio::test]
    async fn test_registration_ack_and_roster() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);
        drain(&mut rx1);
        drain(&mut rx2);

        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));

        let msgs = drain(&mut rx1);
        match &msgs[0] {
            ServerMessage::Registration { lead, colour } => {
                assert!(*lead);
                assert!(PALETTE.contains(&colour.as_str()));
            }
            other => panic!("expected registration ack, got {:?}", other),
        }
        match &msgs[1] {
            ServerMessage::Roster(roster) => {
                assert_eq!(roster.len(), 2);
                assert_eq!(roster[0].name, "ada");
                assert_eq!(roster[1].name, "anonymous");
            }
            other => panic!("expected roster, got {:?}", other),
        }

        // The peer only sees the roster, not the personal ack.
        let msgs = drain(&mut rx2);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], ServerMessage::Roster(_)));
    }

    #[tokio::test]
    async fn test_second_registration_is_not_lead() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);

        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        inbound(&mut relay, 1, ClientMessage::RegisterName("grace".into()));

        drain(&mut rx1);
        let msgs = drain(&mut rx2);
        let ack = msgs
            .iter()
            .find_map(|m| match m {
                ServerMessage::Registration { lead, .. } => Some(*lead),
                _ => None,
            })
            .expect("no registration ack");
        assert!(!ack);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_to_sender_only() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);

        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        drain(&mut rx1);
        drain(&mut rx2);

        inbound(&mut relay, 1, ClientMessage::RegisterName("ada".into()));

        let msgs = drain(&mut rx2);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], ServerMessage::InvalidName));
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        drain(&mut rx);

        inbound(&mut relay, 0, ClientMessage::RegisterName(String::new()));

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], ServerMessage::InvalidName));
    }

    #[tokio::test]
    async fn test_cursor_move_broadcasts_to_others_only() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);

        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        drain(&mut rx1);
        drain(&mut rx2);

        inbound(
            &mut relay,
            0,
            ClientMessage::CursorMove(CursorDelta { dx: 3.0, dy: 4.0 }),
        );
        inbound(
            &mut relay,
            0,
            ClientMessage::CursorMove(CursorDelta { dx: -1.0, dy: 2.0 }),
        );

        assert!(drain(&mut rx1).is_empty());
        let msgs = drain(&mut rx2);
        assert_eq!(msgs.len(), 2);
        match &msgs[1] {
            ServerMessage::Roster(roster) => {
                assert_eq!(roster[0].cursor, Some(CursorPosition { x: 2.0, y: 6.0 }));
            }
            other => panic!("expected roster, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ready_idempotence() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        drain(&mut rx);

        inbound(&mut relay, 0, ClientMessage::PlayerReady);
        inbound(&mut relay, 0, ClientMessage::PlayerReady);

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], ServerMessage::UpdateReadyList(1)));
    }

    #[tokio::test]
    async fn test_ready_from_unregistered_is_ignored() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        drain(&mut rx);

        inbound(&mut relay, 0, ClientMessage::PlayerReady);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_start_signal_carries_ready_count() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        inbound(&mut relay, 0, ClientMessage::PlayerReady);
        drain(&mut rx);

        inbound(&mut relay, 0, ClientMessage::NotifyAllStart);

        let msgs = drain(&mut rx);
        assert!(matches!(msgs[0], ServerMessage::StartGame(1)));
    }

    #[tokio::test]
    async fn test_grid_contents_relayed_verbatim() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);
        drain(&mut rx1);
        drain(&mut rx2);

        let payload = json!({"size": 3, "tiles": [null, "fraudster"]});
        inbound(&mut relay, 0, ClientMessage::GridContents(payload.clone()));

        for rx in [&mut rx1, &mut rx2] {
            let msgs = drain(rx);
            match &msgs[0] {
                ServerMessage::SharingGridContents(data) => assert_eq!(*data, payload),
                other => panic!("expected grid contents, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_end_game_broadcast_has_no_payload() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        drain(&mut rx);

        inbound(&mut relay, 0, ClientMessage::EndGame);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.to_text().unwrap(), r#"{"type":"endGame"}"#);
    }

    #[tokio::test]
    async fn test_disconnect_updates_roster() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let mut rx2 = connect_peer(&mut relay, 1);
        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        inbound(&mut relay, 1, ClientMessage::RegisterName("grace".into()));
        drain(&mut rx1);
        drain(&mut rx2);

        relay.handle_event(SessionEvent::Disconnected { id: 0 });

        let msgs = drain(&mut rx2);
        assert!(matches!(msgs[0], ServerMessage::Connections(1)));
        match &msgs[1] {
            ServerMessage::Roster(roster) => {
                assert_eq!(roster.len(), 1);
                assert_eq!(roster[0].name, "grace");
            }
            other => panic!("expected roster, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_anonymous_disconnect_removes_one_slot() {
        let mut relay = test_relay().await;
        let mut rx1 = connect_peer(&mut relay, 0);
        let _rx2 = connect_peer(&mut relay, 1);
        drain(&mut rx1);

        relay.handle_event(SessionEvent::Disconnected { id: 1 });

        let msgs = drain(&mut rx1);
        assert!(matches!(msgs[0], ServerMessage::Connections(1)));
    }

    #[tokio::test]
    async fn test_reset_clears_everything_silently() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        drain(&mut rx);

        inbound(&mut relay, 0, ClientMessage::ResetServer);

        assert!(drain(&mut rx).is_empty());
        assert!(relay.peers.is_empty());
        assert!(relay.registry.is_empty());

        // The reader task will still report the close; it must stay silent.
        relay.handle_event(SessionEvent::Disconnected { id: 0 });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_fingerprint_shapes() {
        let mut relay = test_relay().await;
        let mut rx = connect_peer(&mut relay, 0);
        inbound(&mut relay, 0, ClientMessage::RegisterName("ada".into()));
        drain(&mut rx);

        inbound(
            &mut relay,
            0,
            ClientMessage::Fingerprint(json!({"9": {"3": "1440x900"}})),
        );
        // Fingerprints never broadcast.
        assert!(drain(&mut rx).is_empty());

        let roster = relay.registry.roster();
        assert_eq!(
            roster[0].screen,
            Some(ScreenSize {
                width: 1440,
                height: 900
            })
        );
    }

    #[test]
    fn test_extract_screen_size_defensive() {
        assert_eq!(
            extract_screen_size(&json!("1920x1080")),
            Some(ScreenSize {
                width: 1920,
                height: 1080
            })
        );
        assert_eq!(
            extract_screen_size(&json!({"9": {"3": "800x600"}})),
            Some(ScreenSize {
                width: 800,
                height: 600
            })
        );
        assert_eq!(extract_screen_size(&json!({"9": "800x600"})), None);
        assert_eq!(extract_screen_size(&json!(42)), None);
        assert_eq!(extract_screen_size(&json!(null)), None);
        assert_eq!(extract_screen_size(&json!({"9": {"3": 1080}})), None);
    }
}
