//! # Game Client Library
//!
//! Client-side implementation of the whack-a-fraudster session game. The
//! client connects to the session relay over a WebSocket, registers a
//! display name and runs its own round of the game locally, sharing every
//! grid rebuild, click and level change with the rest of the session.
//!
//! ## Architecture Overview
//!
//! The round itself is a pure state machine: it holds the board, score and
//! level, and every transition returns the list of side effects the caller
//! must carry out. Nothing inside the machine reads the clock or touches
//! the network, which keeps every rule testable with plain synchronous
//! assertions.
//!
//! Around the machine sits a driver that owns the WebSocket connection and
//! all pending timers. Timers deliver game events back into the driver's
//! channel, so relay frames and expiring delays are serialized through one
//! select loop and every transition is applied atomically.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The state machine: grid population, scoring, level thresholds, the
//! super-fraudster window and the idle/playing/ended lifecycle.
//!
//! ### Timers Module (`timers`)
//! Owned, cancellable timer handles. Dropping or replacing a handle aborts
//! the underlying task, so superseded timers never deliver stale events.
//!
//! ### Network Module (`network`)
//! The session driver: registration, the ready handshake, translating
//! transition actions into timers and outbound session messages.

pub mod game;
pub mod network;
pub mod timers;
