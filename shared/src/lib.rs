//! Wire protocol and game tuning shared between the relay server and clients.
//!
//! Every message on the wire is a JSON object with a `type` string and an
//! optional message-specific `data` payload. Both directions are modelled as
//! closed enums so each message kind is decoded exactly once at the boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed colour palette assigned to players without replacement.
/// Reshuffled at server start and on an explicit reset.
pub const PALETTE: [&str; 8] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
];

pub const BASE_GRID_SIZE: usize = 3;
pub const GRID_GROWTH: usize = 2;
pub const SPAWN_LIFETIME_MS: u64 = 2000;
pub const SPAWN_LIFETIME_STEP_MS: u64 = 250;
pub const SUPER_LIFETIME_MS: u64 = 3000;
pub const SUPER_MIN_DELAY_MS: u64 = 1000;
pub const SUPER_MAX_DELAY_MS: u64 = 8000;
pub const SUPER_TARGET_MAX_LEVEL: u32 = 3;
pub const MISS_TIMEOUT_MS: u64 = 5000;
pub const SESSION_LIMIT_MS: u64 = 45_000;

pub const FRAUDSTER_POINTS: i64 = 50;
pub const CUSTOMER_POINTS: i64 = -100;
pub const SUPER_POINTS: i64 = 250;

/// Points required to level up at the given grid size.
/// 350 on the opening 3x3 board, 800 at 5x5, then doubling from 1600.
pub fn level_threshold(grid_size: usize) -> i64 {
    match grid_size {
        3 => 350,
        5 => 800,
        n => 1600 << (n.saturating_sub(7) / 2),
    }
}

/// Messages sent from a client to the relay.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Claim a display name; answered with `Registration` or `InvalidName`.
    RegisterName(String),
    /// Opaque instrumentation payload carrying a screen-resolution string.
    Fingerprint(Value),
    /// Relative cursor motion since the last report.
    CursorMove(CursorDelta),
    PlayerReady,
    NotifyAllStart,
    /// Grid snapshot relayed verbatim to every connected client.
    GridContents(Value),
    /// Tile click relayed verbatim to every connected client.
    ClickBox(Value),
    /// Level change relayed verbatim to every connected client.
    LevelChange(Value),
    EndGame,
    ResetServer,
}

/// Messages sent from the relay to clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Number of live connections, sent on every accept and disconnect.
    Connections(usize),
    /// Personal registration ack carrying the lead flag and assigned colour.
    Registration { lead: bool, colour: String },
    /// The requested name was empty or already taken.
    InvalidName,
    /// Full registry snapshot in connection order.
    Roster(Vec<RosterEntry>),
    UpdateReadyList(usize),
    /// Start signal with the ready count at the moment it was sent.
    StartGame(usize),
    SharingGridContents(Value),
    SharingClickBox(Value),
    SharingLevelChange(Value),
    EndGame,
}

/// Relative cursor motion, accumulated server-side into an absolute position.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct CursorDelta {
    pub dx: f64,
    pub dy: f64,
}

/// Absolute cursor position derived from accumulated deltas.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Screen resolution reported through the fingerprint message.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    /// Parses a `"WIDTHxHEIGHT"` descriptor such as `"1920x1080"`.
    pub fn parse(descriptor: &str) -> Option<Self> {
        let (w, h) = descriptor.trim().split_once('x')?;
        Some(Self {
            width: w.parse().ok()?,
            height: h.parse().ok()?,
        })
    }
}

/// One registry entry as broadcast to all clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RosterEntry {
    pub name: String,
    pub colour: Option<String>,
    pub cursor: Option<CursorPosition>,
    pub screen: Option<ScreenSize>,
}

/// Entity kinds that can occupy a grid tile.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TileEntity {
    Fraudster,
    Customer,
    SuperFraudster,
}

/// Snapshot of the whole grid, shared whenever the board is rebuilt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GridSnapshot {
    pub size: usize,
    pub tiles: Vec<Option<TileEntity>>,
}

impl GridSnapshot {
    /// The centre tile carries the logo and is never occupied.
    pub fn logo_tile(&self) -> usize {
        self.tiles.len() / 2
    }
}

/// Payload of a `clickBox` message.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ClickReport {
    pub tile: usize,
    pub kind: TileEntity,
}

/// Payload of a `levelChange` message.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LevelReport {
    pub level: u32,
    pub grid_size: usize,
}
