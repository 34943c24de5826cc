//! Room actor message types.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::game::{Chips, Phase};
use crate::net::{ClientMessage, ServerMessage};

/// Opaque per-connection id handed out by the session multiplexer.
pub type ConnectionId = u64;

/// Events delivered to a room actor. Everything a room does arrives here,
/// in strict arrival order.
#[derive(Debug)]
pub enum RoomEvent {
    /// A connection opened and wants outbound envelopes.
    Attach {
        conn_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// A connection closed.
    Detach { conn_id: ConnectionId },
    /// A parsed client message from one connection.
    Client {
        conn_id: ConnectionId,
        message: ClientMessage,
    },
    /// Settings and occupancy summary for the HTTP surface.
    GetSummary {
        response: oneshot::Sender<RoomSummary>,
    },
    /// Drain, snapshot, and stop.
    Shutdown,
}

/// One seat in the occupancy summary.
#[derive(Clone, Debug, Serialize)]
pub struct SeatSummary {
    pub seat: usize,
    pub name: String,
    pub stack: Chips,
    pub is_sitting_out: bool,
}

/// Room settings plus seat occupancy, for `GET /api/rooms/{id}`.
#[derive(Clone, Debug, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub small_blind: Chips,
    pub big_blind: Chips,
    pub min_buy_in: Chips,
    pub max_buy_in: Chips,
    pub phase: Phase,
    pub hand_number: u64,
    pub player_count: usize,
    pub connection_count: usize,
    pub seats: Vec<SeatSummary>,
}

/// Cloneable sender half for a room actor.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomEvent>,
    room_id: String,
}

impl RoomHandle {
    pub fn new(sender: mpsc::Sender<RoomEvent>, room_id: String) -> Self {
        Self { sender, room_id }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Deliver an event; fails only when the room has shut down.
    pub async fn send(&self, event: RoomEvent) -> Result<(), RoomClosed> {
        self.sender.send(event).await.map_err(|_| RoomClosed)
    }

    /// Fetch the occupancy summary.
    pub async fn summary(&self) -> Result<RoomSummary, RoomClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomEvent::GetSummary { response: tx }).await?;
        rx.await.map_err(|_| RoomClosed)
    }
}

/// The room's event queue is gone; it drained and stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("room is closed")]
pub struct RoomClosed;
