//! Session network layer connecting the game state machine to the relay
//!
//! Owns the WebSocket connection and the driver loop: server messages and
//! locally scheduled game events are multiplexed through one select loop,
//! every transition's actions are turned into timers and outbound session
//! messages, and all pending timers live in a bank of owned handles so
//! superseded ones are aborted instead of firing stale events.

use crate::game::{GameAction, GameEvent, GameState, Phase};
use crate::timers::PendingTimer;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClickReport, ClientMessage, LevelReport, ServerMessage, TileEntity};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// All pending timers, keyed so a superseding transition can drop exactly
/// the handles it invalidates.
struct TimerBank {
    session: Option<PendingTimer>,
    miss: Option<PendingTimer>,
    super_appear: Option<PendingTimer>,
    expiries: HashMap<usize, PendingTimer>,
    reactions: HashMap<usize, PendingTimer>,
}

impl TimerBank {
    fn new() -> Self {
        Self {
            session: None,
            miss: None,
            super_appear: None,
            expiries: HashMap::new(),
            reactions: HashMap::new(),
        }
    }

    /// Drops the per-tile timers; called whenever the board is rebuilt.
    fn clear_board(&mut self) {
        self.expiries.clear();
        self.reactions.clear();
    }

    fn clear_all(&mut self) {
        self.session = None;
        self.miss = None;
        self.super_appear = None;
        self.clear_board();
    }
}

/// A session participant: registers a name, signals ready, runs its own
/// game round and keeps the shared session informed through the relay.
///
/// Clicking is automated: fraudsters and supers are clicked after a fixed
/// reaction delay, customers are left alone.
pub struct SessionClient {
    url: String,
    name: String,
    /// The lead client sends the start signal once this many players are
    /// ready.
    min_players: usize,
    reaction: Duration,

    game: GameState,
    timers: TimerBank,
    lead: bool,

    event_tx: mpsc::UnboundedSender<GameEvent>,
    event_rx: mpsc::UnboundedReceiver<GameEvent>,
}

impl SessionClient {
    pub fn new(server: &str, name: &str, min_players: usize, reaction: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        SessionClient {
            url: format!("ws://{}", server),
            name: name.to_string(),
            min_players,
            reaction,
            game: GameState::new(),
            timers: TimerBank::new(),
            lead: false,
            event_tx,
            event_rx,
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}", self.url);
        let (ws, _) = connect_async(&self.url).await?;
        let (mut sink, mut source) = ws.split();

        send(&mut sink, &ClientMessage::RegisterName(self.name.clone())).await?;

        loop {
            tokio::select! {
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_frame(&text, &mut sink).await? {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Relay closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("Transport error: {}", e);
                            break;
                        }
                    }
                },

                event = self.event_rx.recv() => {
                    if let Some(event) = event {
                        let actions = self.game.apply(event);
                        if !self.handle_actions(actions, &mut sink).await? {
                            break;
                        }
                    }
                },
            }
        }

        self.timers.clear_all();
        let _ = sink.close().await;
        Ok(())
    }

    /// Processes one frame from the relay. Returns false to disconnect.
    async fn handle_frame<S>(
        &mut self,
        text: &str,
        sink: &mut S,
    ) -> Result<bool, Box<dyn std::error::Error>>
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::error::Error + 'static,
    {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unrecognized frame from relay: {}", e);
                return Ok(true);
            }
        };

        match message {
            ServerMessage::Registration { lead, colour } => {
                info!("Registered as {:?} with colour {} (lead: {})", self.name, colour, lead);
                self.lead = lead;
                send(sink, &ClientMessage::PlayerReady).await?;
            }

            ServerMessage::InvalidName => {
                error!("Display name {:?} was rejected", self.name);
                return Ok(false);
            }

            ServerMessage::Connections(count) => {
                debug!("{} connections in session", count);
            }

            ServerMessage::Roster(roster) => {
                debug!("{} players in roster", roster.len());
            }

            ServerMessage::UpdateReadyList(count) => {
                info!("{} players ready", count);
                if self.lead && count >= self.min_players && self.game.phase() == Phase::Idle {
                    send(sink, &ClientMessage::NotifyAllStart).await?;
                }
            }

            ServerMessage::StartGame(ready) => {
                info!("Start signal received ({} ready)", ready);
                if self.game.phase() == Phase::Idle {
                    let actions = self.game.apply(GameEvent::StartRequested);
                    return self.handle_actions(actions, sink).await;
                }
            }

            ServerMessage::SharingGridContents(_) => {
                debug!("Peer shared a grid rebuild");
            }

            ServerMessage::SharingClickBox(data) => {
                debug!("Peer click: {}", data);
            }

            ServerMessage::SharingLevelChange(data) => {
                info!("Peer level change: {}", data);
            }

            ServerMessage::EndGame => {
                info!("A player finished their round");
            }
        }

        Ok(true)
    }

    /// Carries out the actions of one transition. Returns false once the
    /// round is over and the client should disconnect.
    async fn handle_actions<S>(
        &mut self,
        actions: Vec<GameAction>,
        sink: &mut S,
    ) -> Result<bool, Box<dyn std::error::Error>>
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::error::Error + 'static,
    {
        for action in actions {
            match action {
                GameAction::ExpiryTimersCancelled => {
                    self.timers.clear_board();
                }

                GameAction::EntitySpawned {
                    tile,
                    kind,
                    lifetime,
                } => {
                    self.timers.expiries.insert(
                        tile,
                        PendingTimer::schedule(
                            lifetime,
                            self.event_tx.clone(),
                            GameEvent::EntityExpired { tile, kind },
                        ),
                    );
                    // Click fraudsters after the reaction delay; leave
                    // customers alone.
                    if kind != TileEntity::Customer && self.reaction < lifetime {
                        self.timers.reactions.insert(
                            tile,
                            PendingTimer::schedule(
                                self.reaction,
                                self.event_tx.clone(),
                                GameEvent::TileClicked(tile),
                            ),
                        );
                    }
                }

                GameAction::GridRebuilt(snapshot) => {
                    let data = serde_json::to_value(&snapshot)?;
                    send(sink, &ClientMessage::GridContents(data)).await?;
                }

                GameAction::SuperScheduled { delay } => {
                    self.timers.super_appear = Some(PendingTimer::schedule(
                        delay,
                        self.event_tx.clone(),
                        GameEvent::SuperDue,
                    ));
                }

                GameAction::SessionTimerArmed { limit } => {
                    self.timers.session = Some(PendingTimer::schedule(
                        limit,
                        self.event_tx.clone(),
                        GameEvent::SessionTimeout,
                    ));
                }

                GameAction::MissTimerArmed { delay } => {
                    // Assigning the slot drops and aborts the old timer.
                    self.timers.miss = Some(PendingTimer::schedule(
                        delay,
                        self.event_tx.clone(),
                        GameEvent::MissTimeout,
                    ));
                }

                GameAction::TileCleared { tile, kind } => {
                    self.timers.reactions.remove(&tile);
                    let data = serde_json::to_value(ClickReport { tile, kind })?;
                    send(sink, &ClientMessage::ClickBox(data)).await?;
                }

                GameAction::ScoreChanged { score, points } => {
                    info!(
                        "Score: {} points ({} fraudsters, {} customers, {} supers)",
                        points, score.fraudsters, score.customers, score.supers
                    );
                }

                GameAction::LevelAdvanced { level, grid_size } => {
                    info!("Level {}; grid is now {}x{}", level, grid_size, grid_size);
                    let data = serde_json::to_value(LevelReport { level, grid_size })?;
                    send(sink, &ClientMessage::LevelChange(data)).await?;
                }

                GameAction::AllTimersCancelled => {
                    self.timers.clear_all();
                }

                GameAction::Ended { summary } => {
                    info!(
                        "Round over: {} points, caught the super fraudster: {}",
                        summary.points, summary.caught_super
                    );
                    send(sink, &ClientMessage::EndGame).await?;
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

async fn send<S>(sink: &mut S, message: &ClientMessage) -> Result<(), Box<dyn std::error::Error>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + 'static,
{
    let json = serde_json::to_string(message)?;
    sink.send(Message::text(json)).await?;
    Ok(())
}
