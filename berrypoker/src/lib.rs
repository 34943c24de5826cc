//! # BerryPoker
//!
//! A multi-room, real-time No-Limit Texas Hold'em engine.
//!
//! The library is split along the data flow: an inbound message travels
//! from the server's session multiplexer into a [`room`] actor, mutates
//! that room's [`game::Table`], and fans back out as per-recipient
//! [`net::ServerMessage`] envelopes, with a [`db::Store`] snapshot taken
//! after every state-changing event.
//!
//! ## Core modules
//!
//! - [`game`]: cards, hand evaluation, pots, and the table state machine
//! - [`net`]: the `{type, data}` wire protocol
//! - [`room`]: per-room actors and the process-wide registry
//! - [`db`]: SQLite-backed snapshots, hand history, and statistics

pub mod db;
pub mod game;
pub mod net;
pub mod room;

pub use db::{DatabaseConfig, Store};
pub use game::{ActionKind, Chips, Phase, Table, TableError};
pub use net::{ClientMessage, ProtocolError, ServerMessage};
pub use room::{RegistryConfig, RoomHandle, RoomRegistry, RoomSettings};
