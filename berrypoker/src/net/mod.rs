//! Wire protocol types shared by the server and clients.

pub mod messages;

pub use messages::{ClientMessage, ProtocolError, ServerMessage, SignalPayload, SignalRelay};
