//! The wire protocol.
//!
//! Every message on the channel is a `{"type": ..., "data": ...}` envelope.
//! Inbound messages are dispatched off the `type` string so malformed or
//! unknown payloads produce a protocol error instead of dropping the
//! connection; outbound messages serialize through the adjacently tagged
//! [`ServerMessage`] enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::game::table::{ActionRecord, GameStateView, HandResult};
use crate::game::{ActionKind, Chips};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message format")]
    NotJson(#[source] serde_json::Error),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    BadPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A WebRTC signaling payload relayed to one named recipient. The body is
/// forwarded untouched.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SignalPayload {
    pub target: String,
    #[serde(flatten)]
    pub body: Value,
}

/// Parsed client-to-server messages.
#[derive(Clone, Debug)]
pub enum ClientMessage {
    Spectate {
        player_name: String,
    },
    Join {
        player_name: Option<String>,
        stack: Chips,
        seat: Option<usize>,
    },
    Leave,
    StartGame,
    Action {
        action: ActionKind,
        amount: Chips,
    },
    SitOut,
    Chat {
        message: String,
    },
    AddChips {
        amount: Chips,
    },
    RunTwiceChoice {
        run_twice: bool,
    },
    WebrtcOffer(SignalPayload),
    WebrtcAnswer(SignalPayload),
    WebrtcIce(SignalPayload),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct SpectateData {
    #[serde(default)]
    player_name: String,
}

#[derive(Debug, Deserialize)]
struct JoinData {
    player_name: Option<String>,
    #[serde(default = "default_stack")]
    stack: Chips,
    seat: Option<usize>,
}

fn default_stack() -> Chips {
    100
}

#[derive(Debug, Deserialize)]
struct ActionData {
    action: ActionKind,
    #[serde(default)]
    amount: Chips,
}

#[derive(Debug, Deserialize)]
struct ChatData {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AddChipsData {
    #[serde(default)]
    amount: Chips,
}

#[derive(Debug, Deserialize)]
struct RunTwiceChoiceData {
    #[serde(default)]
    run_twice: bool,
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    data: Value,
) -> Result<T, ProtocolError> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| ProtocolError::BadPayload { kind, source })
}

impl ClientMessage {
    /// Parse one inbound frame. Payload-free message types tolerate a
    /// missing or empty `data` object.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::NotJson)?;
        let data = envelope.data;
        match envelope.kind.as_str() {
            "spectate" => {
                let d: SpectateData = payload("spectate", data)?;
                Ok(Self::Spectate {
                    player_name: d.player_name,
                })
            }
            "join" => {
                let d: JoinData = payload("join", data)?;
                Ok(Self::Join {
                    player_name: d.player_name,
                    stack: d.stack,
                    seat: d.seat,
                })
            }
            "leave" => Ok(Self::Leave),
            "start_game" => Ok(Self::StartGame),
            "action" => {
                let d: ActionData = payload("action", data)?;
                Ok(Self::Action {
                    action: d.action,
                    amount: d.amount,
                })
            }
            "sit_out" => Ok(Self::SitOut),
            "chat" => {
                let d: ChatData = payload("chat", data)?;
                Ok(Self::Chat { message: d.message })
            }
            "add_chips" => {
                let d: AddChipsData = payload("add_chips", data)?;
                Ok(Self::AddChips { amount: d.amount })
            }
            "run_twice_choice" => {
                let d: RunTwiceChoiceData = payload("run_twice_choice", data)?;
                Ok(Self::RunTwiceChoice {
                    run_twice: d.run_twice,
                })
            }
            "webrtc_offer" => Ok(Self::WebrtcOffer(payload("webrtc_offer", data)?)),
            "webrtc_answer" => Ok(Self::WebrtcAnswer(payload("webrtc_answer", data)?)),
            "webrtc_ice" => Ok(Self::WebrtcIce(payload("webrtc_ice", data)?)),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// A relayed signaling payload with the sender identity attached.
#[derive(Clone, Debug, Serialize)]
pub struct SignalRelay {
    pub from: String,
    #[serde(flatten)]
    pub body: Value,
}

/// Server-to-client messages. Serializes as `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Spectating {
        player_name: String,
    },
    Joined {
        player_name: String,
        seat: usize,
    },
    PlayerJoined {
        player_name: String,
        seat: usize,
    },
    PlayerLeft {
        player_name: String,
    },
    PlayerDisconnected {
        player_name: String,
    },
    GameState(GameStateView),
    HandStarted {
        hand_number: u64,
    },
    PlayerAction {
        player_name: String,
        action: ActionKind,
        amount: Chips,
    },
    HandEnded(HandResult),
    RunTwicePrompt {
        eligible_players: Vec<String>,
    },
    RunTwiceChoiceMade {
        player_name: String,
        wants_twice: bool,
        waiting_for: Vec<String>,
    },
    Chat {
        player_name: String,
        message: String,
    },
    WebrtcOffer(SignalRelay),
    WebrtcAnswer(SignalRelay),
    WebrtcIce(SignalRelay),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn player_action(record: &ActionRecord) -> Self {
        Self::PlayerAction {
            player_name: record.player_name.clone(),
            action: record.action,
            amount: record.amount,
        }
    }
}
