//! Core poker engine: cards, hand evaluation, pots, and the table state
//! machine.

pub mod cards;
pub mod eval;
pub mod pots;
pub mod table;

pub use cards::{Card, Deck, Rank, Suit};
pub use eval::{HandCategory, HandRank};
pub use pots::{Chips, Pot, MAX_SEATS};
pub use table::{
    ActionKind, ActionRecord, GameStateView, HandResult, LeaveOutcome, Phase, SeatedPlayer, Table,
    TableError, TableSnapshot, ValidAction, SNAPSHOT_SCHEMA_VERSION,
};
