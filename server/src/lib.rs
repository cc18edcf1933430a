//! # Session Relay Library
//!
//! This library implements the shared-session relay for the whack-a-fraudster
//! game. The relay lets several browser-style clients observe one game
//! session: it accepts WebSocket connections, keeps per-player display
//! metadata, and fans typed JSON messages out to every connected peer.
//!
//! ## Core Responsibilities
//!
//! ### Message Fan-Out
//! Every game-traffic message (grid contents, tile clicks, level changes,
//! end-of-game) is rebroadcast to all connected clients in arrival order.
//! The relay holds no authority over game correctness; clients run their own
//! state machines and merely stay informed through the relay.
//!
//! ### Session Bookkeeping
//! The only state the relay owns is the client registry: display names,
//! assigned colours, ready signals, screen sizes and accumulated cursor
//! positions. All of it is in-memory and rebuilt from scratch on restart.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! One loop owns all mutable session state. Per-connection reader tasks
//! decode frames into typed events and feed them through a channel, so every
//! handler runs to completion before the next event; registry mutation plus
//! the broadcasts it triggers are atomic per message without any locking.
//!
//! ### Stable Connection Handles
//! Connections are identified by monotonically increasing ids that are never
//! reused, so a disconnect can never tear down a slot that a newer
//! connection has taken over.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Authoritative per-connection metadata and session invariants:
//! - Name uniqueness and empty-name rejection
//! - Colour assignment without repeats until a reset reshuffles the palette
//! - Ready-list membership and cursor/fingerprint bookkeeping
//!
//! ### Relay Module (`relay`)
//! Transport and dispatch:
//! - WebSocket accept loop and per-connection reader/writer tasks
//! - One-shot JSON decoding at the boundary into a closed message enum
//! - Broadcast fan-out in connection order, skipping dead peers
//!
//! ## Failure Semantics
//!
//! Malformed payloads are logged and absorbed; a transport failure
//! terminates only the affected connection. Delivery is best-effort and
//! unacknowledged except for the personal registration response.

pub mod registry;
pub mod relay;
