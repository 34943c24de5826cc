//! The table state machine.
//!
//! A [`Table`] owns the seats, deck, board, and betting state for one room
//! and applies one validated action at a time. It knows nothing about
//! connections or persistence; the room actor drives it and fans out the
//! resulting views.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

use super::cards::{Card, Deck};
use super::eval::{self, HandRank};
use super::pots::{self, Chips, Contribution, Pot, MAX_SEATS};

/// Current snapshot schema. Bumped whenever the persisted layout changes;
/// older snapshots are refused rather than migrated.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    Preflop,
    Flop,
    Turn,
    River,
    Showdown,
    WaitingRunTwice,
    HandOver,
}

impl Phase {
    /// True while a hand is live and seats are committed to pots.
    #[must_use]
    pub fn hand_active(self) -> bool {
        matches!(
            self,
            Phase::Preflop | Phase::Flop | Phase::Turn | Phase::River | Phase::WaitingRunTwice
        )
    }

    /// True while betting rounds can still take actions.
    #[must_use]
    pub fn betting_open(self) -> bool {
        matches!(self, Phase::Preflop | Phase::Flop | Phase::Turn | Phase::River)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Phase::Waiting => "waiting",
            Phase::Preflop => "preflop",
            Phase::Flop => "flop",
            Phase::Turn => "turn",
            Phase::River => "river",
            Phase::Showdown => "showdown",
            Phase::WaitingRunTwice => "waiting_run_twice",
            Phase::HandOver => "hand_over",
        };
        write!(f, "{repr}")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Fold,
    Check,
    Call,
    Raise,
    AllIn,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Fold => "fold",
            Self::Check => "check",
            Self::Call => "call",
            Self::Raise => "raise",
            Self::AllIn => "all_in",
        };
        write!(f, "{repr}")
    }
}

/// One applied action, as recorded for history and broadcast. `amount` is
/// the committed chips for a call, the raise-to total for a raise, and the
/// final round bet for an all-in.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionRecord {
    pub player_name: String,
    pub action: ActionKind,
    pub amount: Chips,
    pub phase: Phase,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum TableError {
    #[error("room is full")]
    TableFull,
    #[error("invalid seat {seat}")]
    InvalidSeat { seat: usize },
    #[error("seat {seat} is taken")]
    SeatTaken { seat: usize },
    #[error("name already taken")]
    NameTaken,
    #[error("buy-in must be between {min} and {max}")]
    BuyInOutOfRange { min: Chips, max: Chips },
    #[error("player not found")]
    UnknownPlayer,
    #[error("not your turn")]
    OutOfTurn,
    #[error("cannot act")]
    CannotAct,
    #[error("cannot check, must call or raise")]
    CannotCheck,
    #[error("minimum raise to {min}")]
    RaiseBelowMinimum { min: Chips },
    #[error("not enough chips: need {needed}, have {available}")]
    InsufficientChips { needed: Chips, available: Chips },
    #[error("need at least 2 players to start")]
    NotEnoughPlayers,
    #[error("game already in progress")]
    HandInProgress,
    #[error("no hand in progress")]
    NoActiveHand,
    #[error("max stack is {max}")]
    StackCapExceeded { max: Chips },
    #[error("deck exhausted")]
    DeckExhausted,
    #[error("not waiting for run-twice choice")]
    NotAwaitingRunTwice,
    #[error("not eligible for run-twice choice")]
    NotRunTwiceEligible,
    #[error("choice already made")]
    RunTwiceChoiceMade,
    #[error("chip conservation violated: expected {expected}, found {found}")]
    ChipConservation { expected: Chips, found: Chips },
    #[error("acting seat {seat} cannot act")]
    ActingSeatInvalid { seat: usize },
    #[error("unsupported snapshot schema version {found}")]
    UnsupportedSnapshot { found: u32 },
}

impl TableError {
    /// Fatal errors indicate a logic bug, not a bad request; the room must
    /// be aborted when one surfaces.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChipConservation { .. } | Self::ActingSeatInvalid { .. } | Self::DeckExhausted
        )
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SeatedPlayer {
    pub name: String,
    pub seat: usize,
    pub stack: Chips,
    pub hole_cards: Vec<Card>,
    /// Chips committed in the current betting round.
    pub current_bet: Chips,
    /// Chips committed across the whole hand (drives pot construction).
    pub total_bet: Chips,
    pub is_folded: bool,
    pub is_all_in: bool,
    pub is_sitting_out: bool,
    /// Whether this player has acted since the last full raise.
    pub has_acted: bool,
}

impl SeatedPlayer {
    fn new(name: String, seat: usize, stack: Chips) -> Self {
        Self {
            name,
            seat,
            stack,
            hole_cards: Vec::with_capacity(2),
            current_bet: 0,
            total_bet: 0,
            is_folded: false,
            is_all_in: false,
            is_sitting_out: false,
            has_acted: false,
        }
    }

    fn reset_for_hand(&mut self) {
        self.hole_cards.clear();
        self.current_bet = 0;
        self.total_bet = 0;
        self.is_folded = false;
        self.is_all_in = false;
        self.has_acted = false;
    }

    /// Dealt in and not folded.
    #[must_use]
    pub fn in_hand(&self) -> bool {
        !self.hole_cards.is_empty() && !self.is_folded
    }

    /// Still owes a decision this betting round.
    #[must_use]
    pub fn to_act(&self, high_bet: Chips) -> bool {
        self.in_hand() && !self.is_all_in && (!self.has_acted || self.current_bet < high_bet)
    }
}

/// An action the acting player may take, with its chip bounds.
#[derive(Clone, Debug, Serialize)]
pub struct ValidAction {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Chips>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Chips>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Chips>,
}

/// Public per-player projection inside `game_state`.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    pub name: String,
    pub seat: usize,
    pub stack: Chips,
    pub current_bet: Chips,
    pub total_bet: Chips,
    pub is_folded: bool,
    pub is_all_in: bool,
    pub is_sitting_out: bool,
    pub has_cards: bool,
    pub position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hole_cards: Option<Vec<Card>>,
}

/// The per-recipient `game_state` envelope payload.
#[derive(Clone, Debug, Serialize)]
pub struct GameStateView {
    pub room_id: String,
    pub small_blind: Chips,
    pub big_blind: Chips,
    pub min_buy_in: Chips,
    pub max_buy_in: Chips,
    pub phase: Phase,
    pub hand_number: u64,
    pub pot: Chips,
    pub current_bet: Chips,
    pub community_cards: Vec<Card>,
    pub players: Vec<PlayerView>,
    pub dealer_seat: Option<usize>,
    pub current_player_seat: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_raise: Option<Chips>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_amount: Option<Chips>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_cards: Option<Vec<Card>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_actions: Option<Vec<ValidAction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hand_result: Option<HandResult>,
}

/// A showdown line for one revealed hand.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShowdownEntry {
    pub player_name: String,
    pub description: String,
    pub hole_cards: Vec<Card>,
}

/// Outcome detail when the board was run twice.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunTwiceOutcome {
    pub first_winners: Vec<String>,
    pub second_winners: Vec<String>,
    pub first_community: Vec<Card>,
    pub second_community: Vec<Card>,
}

/// The authoritative `hand_ended` payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HandResult {
    pub winners: Vec<String>,
    pub pot: Chips,
    pub pots: Vec<Pot>,
    pub player_stacks: BTreeMap<String, Chips>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hand_results: Option<Vec<ShowdownEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_twice: Option<RunTwiceOutcome>,
}

/// Pending run-it-twice decision state, including the deck as it stood when
/// the runout was interrupted so the second board draws from the same pool.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunTwiceState {
    pub eligible: Vec<String>,
    pub choices: BTreeMap<String, bool>,
    pub saved_deck: Vec<Card>,
    pub saved_community: Vec<Card>,
}

/// Result of a leave request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LeaveOutcome {
    /// Seat freed immediately (no live hand commitment).
    Removed,
    /// Player was folded; the seat stays committed until the hand is
    /// awarded and is then released by [`Table::finalize_leaves`].
    FoldedPendingRemoval,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Table {
    pub room_id: String,
    pub small_blind: Chips,
    pub big_blind: Chips,
    pub min_buy_in: Chips,
    pub max_buy_in: Chips,
    pub seats: BTreeMap<usize, SeatedPlayer>,
    pub deck: Deck,
    pub community_cards: Vec<Card>,
    pub pots: Vec<Pot>,
    pub phase: Phase,
    pub dealer_seat: Option<usize>,
    pub small_blind_seat: Option<usize>,
    pub big_blind_seat: Option<usize>,
    pub acting_seat: Option<usize>,
    /// High bet of the current betting round.
    pub current_bet: Chips,
    /// Size of the last full raise; the next raise must be at least this
    /// much on top of the high bet.
    pub last_raise: Chips,
    pub hand_number: u64,
    /// Sum of all buy-ins currently on the table; the conservation target.
    pub chip_total: Chips,
    pub action_history: Vec<ActionRecord>,
    pub last_hand_result: Option<HandResult>,
    /// Players who left mid-hand; folded now, unseated after the award.
    pub leave_queue: BTreeSet<String>,
    pub run_twice: Option<RunTwiceState>,
}

impl Table {
    #[must_use]
    pub fn new(
        room_id: String,
        small_blind: Chips,
        big_blind: Chips,
        min_buy_in: Chips,
        max_buy_in: Chips,
    ) -> Self {
        Self {
            room_id,
            small_blind,
            big_blind,
            min_buy_in,
            max_buy_in,
            seats: BTreeMap::new(),
            deck: Deck::new_shuffled(),
            community_cards: Vec::with_capacity(5),
            pots: Vec::new(),
            phase: Phase::Waiting,
            dealer_seat: None,
            small_blind_seat: None,
            big_blind_seat: None,
            acting_seat: None,
            current_bet: 0,
            last_raise: 0,
            hand_number: 0,
            chip_total: 0,
            action_history: Vec::new(),
            last_hand_result: None,
            leave_queue: BTreeSet::new(),
            run_twice: None,
        }
    }

    // ------------------------------------------------------------------
    // Seating

    pub fn add_player(
        &mut self,
        name: &str,
        seat: usize,
        buy_in: Chips,
    ) -> Result<&SeatedPlayer, TableError> {
        if seat >= MAX_SEATS {
            return Err(TableError::InvalidSeat { seat });
        }
        if self.seats.len() >= MAX_SEATS {
            return Err(TableError::TableFull);
        }
        if self.seats.contains_key(&seat) {
            return Err(TableError::SeatTaken { seat });
        }
        if self.seats.values().any(|p| p.name == name) {
            return Err(TableError::NameTaken);
        }
        if buy_in < self.min_buy_in || buy_in > self.max_buy_in {
            return Err(TableError::BuyInOutOfRange {
                min: self.min_buy_in,
                max: self.max_buy_in,
            });
        }

        self.chip_total += buy_in;
        self.seats
            .insert(seat, SeatedPlayer::new(name.to_string(), seat, buy_in));
        Ok(&self.seats[&seat])
    }

    #[must_use]
    pub fn player_by_name(&self, name: &str) -> Option<&SeatedPlayer> {
        self.seats.values().find(|p| p.name == name)
    }

    fn seat_of(&self, name: &str) -> Option<usize> {
        self.seats
            .values()
            .find(|p| p.name == name)
            .map(|p| p.seat)
    }

    /// Remove a player. Mid-hand the seat stays committed to the pots: the
    /// player is folded and unseated only after the award.
    pub fn leave(&mut self, name: &str) -> Result<LeaveOutcome, TableError> {
        let seat = self.seat_of(name).ok_or(TableError::UnknownPlayer)?;
        // Any chips or cards in the current hand keep the seat committed
        // until the award, folded or not.
        let committed = self.phase.hand_active()
            && (self.seats[&seat].total_bet > 0 || !self.seats[&seat].hole_cards.is_empty());

        if !committed {
            if let Some(player) = self.seats.remove(&seat) {
                self.chip_total -= player.stack;
            }
            self.leave_queue.remove(name);
            return Ok(LeaveOutcome::Removed);
        }

        self.leave_queue.insert(name.to_string());
        if self.seats[&seat].in_hand() {
            let was_acting = self.acting_seat == Some(seat);
            if let Some(player) = self.seats.get_mut(&seat) {
                player.is_folded = true;
                player.has_acted = true;
            }
            self.action_history.push(ActionRecord {
                player_name: name.to_string(),
                action: ActionKind::Fold,
                amount: 0,
                phase: self.phase,
            });

            if self.phase == Phase::WaitingRunTwice {
                // A departing all-in player forfeits both the pot and
                // their say: count them as declining the second run.
                let _ = self.run_twice_choice(name, false);
            } else if self.in_hand_seats().len() <= 1 {
                self.settle_fold_win()?;
            } else if was_acting {
                self.advance_game()?;
            }
        }

        Ok(LeaveOutcome::FoldedPendingRemoval)
    }

    /// Release seats queued by mid-hand leaves. Returns the names unseated.
    pub fn finalize_leaves(&mut self) -> Vec<String> {
        let names: Vec<String> = self.leave_queue.iter().cloned().collect();
        self.leave_queue.clear();
        for name in &names {
            if let Some(seat) = self.seat_of(name) {
                if let Some(player) = self.seats.remove(&seat) {
                    self.chip_total -= player.stack;
                }
            }
        }
        names
    }

    /// Unseat players who busted. They become spectators; their connection
    /// is unaffected. Only valid between hands.
    pub fn unseat_busted(&mut self) -> Vec<String> {
        if self.phase.hand_active() {
            return Vec::new();
        }
        let busted: Vec<usize> = self
            .seats
            .values()
            .filter(|p| p.stack == 0)
            .map(|p| p.seat)
            .collect();
        busted
            .into_iter()
            .filter_map(|seat| self.seats.remove(&seat))
            .map(|p| p.name)
            .collect()
    }

    /// Toggle sitting out; takes effect at the next hand.
    pub fn toggle_sit_out(&mut self, name: &str) -> Result<bool, TableError> {
        let seat = self.seat_of(name).ok_or(TableError::UnknownPlayer)?;
        let player = self.seats.get_mut(&seat).ok_or(TableError::UnknownPlayer)?;
        player.is_sitting_out = !player.is_sitting_out;
        Ok(player.is_sitting_out)
    }

    /// Top up a stack between hands, capped at the max buy-in.
    pub fn add_chips(&mut self, name: &str, amount: Chips) -> Result<Chips, TableError> {
        if self.phase.hand_active() {
            return Err(TableError::HandInProgress);
        }
        let seat = self.seat_of(name).ok_or(TableError::UnknownPlayer)?;
        let max = self.max_buy_in;
        let player = self.seats.get_mut(&seat).ok_or(TableError::UnknownPlayer)?;
        let new_total = player.stack.saturating_add(amount);
        if new_total > max {
            return Err(TableError::StackCapExceeded { max });
        }
        player.stack = new_total;
        self.chip_total += amount;
        Ok(new_total)
    }

    // ------------------------------------------------------------------
    // Hand lifecycle

    /// Seats eligible to be dealt the next hand: not sitting out and able
    /// to cover the big blind.
    #[must_use]
    pub fn eligible_seats(&self) -> Vec<usize> {
        self.seats
            .values()
            .filter(|p| !p.is_sitting_out && p.stack >= self.big_blind)
            .map(|p| p.seat)
            .collect()
    }

    #[must_use]
    pub fn can_start_hand(&self) -> bool {
        !self.phase.hand_active() && self.eligible_seats().len() >= 2
    }

    pub fn start_hand(&mut self) -> Result<(), TableError> {
        if self.phase.hand_active() {
            return Err(TableError::HandInProgress);
        }
        let eligible = self.eligible_seats();
        if eligible.len() < 2 {
            return Err(TableError::NotEnoughPlayers);
        }

        self.hand_number += 1;
        self.deck = Deck::new_shuffled();
        self.community_cards.clear();
        self.pots.clear();
        self.action_history.clear();
        self.last_hand_result = None;
        self.run_twice = None;
        self.current_bet = 0;
        self.last_raise = self.big_blind;
        for player in self.seats.values_mut() {
            player.reset_for_hand();
        }

        let dealer = match self.dealer_seat {
            None => eligible[0],
            Some(prev) => next_in_ring(&eligible, prev),
        };
        self.dealer_seat = Some(dealer);

        let heads_up = eligible.len() == 2;
        let sb_seat = if heads_up {
            dealer
        } else {
            next_in_ring(&eligible, dealer)
        };
        let bb_seat = next_in_ring(&eligible, sb_seat);
        self.small_blind_seat = Some(sb_seat);
        self.big_blind_seat = Some(bb_seat);

        self.post_blind(sb_seat, self.small_blind);
        let bb_amount = self.post_blind(bb_seat, self.big_blind);
        self.current_bet = bb_amount;

        // Deal two hole cards per eligible player, starting left of the
        // dealer.
        let mut order = eligible.clone();
        let pivot = order.iter().position(|&s| s > dealer).unwrap_or(0);
        order.rotate_left(pivot);
        for seat in order {
            let first = self.deck.draw().ok_or(TableError::DeckExhausted)?;
            let second = self.deck.draw().ok_or(TableError::DeckExhausted)?;
            if let Some(player) = self.seats.get_mut(&seat) {
                player.hole_cards = vec![first, second];
            }
        }

        self.phase = Phase::Preflop;
        debug!(
            "room {}: hand {} started, dealer seat {}",
            self.room_id, self.hand_number, dealer
        );

        let candidate = if heads_up {
            sb_seat
        } else {
            next_in_ring(&eligible, bb_seat)
        };
        let high = self.current_bet;
        if self
            .seats
            .get(&candidate)
            .is_some_and(|p| p.to_act(high))
        {
            self.acting_seat = Some(candidate);
        } else {
            self.acting_seat = self.next_seat_where(candidate, |p| p.to_act(high));
        }

        if self.acting_seat.is_none() {
            // Everyone is all-in straight from the blinds.
            self.reset_street();
            self.run_out()?;
        }
        Ok(())
    }

    fn post_blind(&mut self, seat: usize, blind: Chips) -> Chips {
        let Some(player) = self.seats.get_mut(&seat) else {
            return 0;
        };
        let amount = blind.min(player.stack);
        player.stack -= amount;
        player.current_bet = amount;
        player.total_bet = amount;
        if player.stack == 0 {
            player.is_all_in = true;
        }
        amount
    }

    /// Park the table back in the waiting state when a scheduled next hand
    /// cannot run.
    pub fn settle_idle(&mut self) {
        if !self.phase.hand_active() {
            self.phase = Phase::Waiting;
            self.acting_seat = None;
        }
    }

    // ------------------------------------------------------------------
    // Actions

    /// Valid actions for the acting player, with chip bounds.
    #[must_use]
    pub fn valid_actions(&self, name: &str) -> Vec<ValidAction> {
        let Some(seat) = self.seat_of(name) else {
            return Vec::new();
        };
        if self.acting_seat != Some(seat) || !self.phase.betting_open() {
            return Vec::new();
        }
        let player = &self.seats[&seat];
        if player.is_folded || player.is_all_in {
            return Vec::new();
        }

        let to_call = self.current_bet - player.current_bet;
        let mut actions = vec![ValidAction {
            action: ActionKind::Fold,
            amount: None,
            min: None,
            max: None,
        }];

        if to_call == 0 {
            actions.push(ValidAction {
                action: ActionKind::Check,
                amount: None,
                min: None,
                max: None,
            });
        } else {
            actions.push(ValidAction {
                action: ActionKind::Call,
                amount: Some(to_call.min(player.stack)),
                min: None,
                max: None,
            });
        }

        // Raising requires chips beyond the call and an unexhausted right
        // to act: a short all-in leaves has_acted set and the raise closed.
        if player.stack > to_call && !player.has_acted {
            let max_raise_to = player.current_bet + player.stack;
            let min_raise_to = (self.current_bet + self.last_raise).min(max_raise_to);
            actions.push(ValidAction {
                action: ActionKind::Raise,
                amount: None,
                min: Some(min_raise_to),
                max: Some(max_raise_to),
            });
        }

        if player.stack > 0 {
            actions.push(ValidAction {
                action: ActionKind::AllIn,
                amount: Some(player.stack),
                min: None,
                max: None,
            });
        }

        actions
    }

    /// Validate and apply one action from the acting player, then advance
    /// the betting round, streets, and (possibly) the whole hand.
    pub fn apply_action(
        &mut self,
        name: &str,
        kind: ActionKind,
        amount: Chips,
    ) -> Result<ActionRecord, TableError> {
        if !self.phase.betting_open() {
            return Err(TableError::OutOfTurn);
        }
        let seat = self.seat_of(name).ok_or(TableError::UnknownPlayer)?;
        if self.acting_seat != Some(seat) {
            return Err(TableError::OutOfTurn);
        }

        let high_bet = self.current_bet;
        let last_raise = self.last_raise;

        // (recorded kind, recorded amount, new round bet if it grew, full raise?)
        let (recorded, recorded_amount, new_bet, full_raise) = {
            let player = self.seats.get_mut(&seat).ok_or(TableError::UnknownPlayer)?;
            if player.is_folded || player.is_all_in {
                return Err(TableError::CannotAct);
            }
            match kind {
                ActionKind::Fold => {
                    player.is_folded = true;
                    player.has_acted = true;
                    (ActionKind::Fold, 0, None, false)
                }
                ActionKind::Check => {
                    if player.current_bet != high_bet {
                        return Err(TableError::CannotCheck);
                    }
                    player.has_acted = true;
                    (ActionKind::Check, 0, None, false)
                }
                ActionKind::Call => {
                    let call = (high_bet - player.current_bet).min(player.stack);
                    player.stack -= call;
                    player.current_bet += call;
                    player.total_bet += call;
                    player.has_acted = true;
                    if player.stack == 0 {
                        player.is_all_in = true;
                        (ActionKind::AllIn, call, None, false)
                    } else {
                        (ActionKind::Call, call, None, false)
                    }
                }
                ActionKind::Raise => {
                    let raise_to = amount;
                    let min_raise_to = high_bet + last_raise;
                    if raise_to <= high_bet {
                        return Err(TableError::RaiseBelowMinimum { min: min_raise_to });
                    }
                    let needed = raise_to - player.current_bet;
                    if needed > player.stack {
                        return Err(TableError::InsufficientChips {
                            needed,
                            available: player.stack,
                        });
                    }
                    let increment = raise_to - high_bet;
                    if increment < last_raise && needed < player.stack {
                        // Below the minimum and not an all-in.
                        return Err(TableError::RaiseBelowMinimum { min: min_raise_to });
                    }
                    player.stack -= needed;
                    player.current_bet = raise_to;
                    player.total_bet += needed;
                    player.has_acted = true;
                    let full = increment >= last_raise;
                    if player.stack == 0 {
                        player.is_all_in = true;
                        (ActionKind::AllIn, raise_to, Some(raise_to), full)
                    } else {
                        (ActionKind::Raise, raise_to, Some(raise_to), full)
                    }
                }
                ActionKind::AllIn => {
                    let commit = player.stack;
                    if commit == 0 {
                        return Err(TableError::CannotAct);
                    }
                    player.stack = 0;
                    player.current_bet += commit;
                    player.total_bet += commit;
                    player.is_all_in = true;
                    player.has_acted = true;
                    let bet = player.current_bet;
                    if bet > high_bet {
                        (ActionKind::AllIn, bet, Some(bet), bet - high_bet >= last_raise)
                    } else {
                        (ActionKind::AllIn, bet, None, false)
                    }
                }
            }
        };

        if let Some(bet) = new_bet {
            if full_raise {
                self.last_raise = bet - self.current_bet;
            }
            self.current_bet = bet;
        }
        if full_raise {
            // A full raise re-opens the action for everyone still live.
            for (s, player) in self.seats.iter_mut() {
                if *s != seat && player.in_hand() && !player.is_all_in {
                    player.has_acted = false;
                }
            }
        }

        let record = ActionRecord {
            player_name: name.to_string(),
            action: recorded,
            amount: recorded_amount,
            phase: self.phase,
        };
        self.action_history.push(record.clone());

        self.advance_game()?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Progression

    fn in_hand_seats(&self) -> Vec<usize> {
        self.seats
            .values()
            .filter(|p| p.in_hand())
            .map(|p| p.seat)
            .collect()
    }

    fn advance_game(&mut self) -> Result<(), TableError> {
        let in_hand = self.in_hand_seats();
        if in_hand.len() <= 1 {
            return self.settle_fold_win();
        }

        let high = self.current_bet;
        let round_complete = in_hand
            .iter()
            .filter_map(|s| self.seats.get(s))
            .filter(|p| !p.is_all_in)
            .all(|p| p.has_acted && p.current_bet == high);

        if round_complete {
            self.reset_street();
            let can_act = in_hand
                .iter()
                .filter_map(|s| self.seats.get(s))
                .filter(|p| !p.is_all_in)
                .count();
            if can_act <= 1 {
                self.run_out()
            } else {
                self.advance_phase()
            }
        } else {
            let from = self.acting_seat.ok_or(TableError::NoActiveHand)?;
            self.acting_seat = self.next_seat_where(from, |p| p.to_act(high));
            Ok(())
        }
    }

    fn reset_street(&mut self) {
        for player in self.seats.values_mut() {
            player.current_bet = 0;
            player.has_acted = false;
        }
        self.current_bet = 0;
        self.last_raise = self.big_blind;
    }

    fn deal_community(&mut self, count: usize) -> Result<(), TableError> {
        self.deck.burn();
        for _ in 0..count {
            let card = self.deck.draw().ok_or(TableError::DeckExhausted)?;
            self.community_cards.push(card);
        }
        Ok(())
    }

    fn advance_phase(&mut self) -> Result<(), TableError> {
        match self.phase {
            Phase::Preflop => {
                self.deal_community(3)?;
                self.phase = Phase::Flop;
            }
            Phase::Flop => {
                self.deal_community(1)?;
                self.phase = Phase::Turn;
            }
            Phase::Turn => {
                self.deal_community(1)?;
                self.phase = Phase::River;
            }
            Phase::River => {
                return self.settle_showdown();
            }
            _ => return Err(TableError::NoActiveHand),
        }

        // First to act post-flop is the first live seat left of the dealer.
        let dealer = self.dealer_seat.ok_or(TableError::NoActiveHand)?;
        let high = self.current_bet;
        self.acting_seat = self.next_seat_where(dealer, |p| p.to_act(high));
        Ok(())
    }

    /// No more betting is possible: complete the board and show down,
    /// pausing first for run-it-twice choices when at least two players are
    /// all-in against an incomplete board.
    fn run_out(&mut self) -> Result<(), TableError> {
        self.acting_seat = None;
        let all_in: Vec<String> = self
            .seats
            .values()
            .filter(|p| p.in_hand() && p.is_all_in)
            .map(|p| p.name.clone())
            .collect();

        if all_in.len() >= 2 && self.community_cards.len() < 5 {
            self.run_twice = Some(RunTwiceState {
                eligible: all_in,
                choices: BTreeMap::new(),
                saved_deck: self.deck.remaining(),
                saved_community: self.community_cards.clone(),
            });
            self.phase = Phase::WaitingRunTwice;
            return Ok(());
        }

        self.deal_remaining()?;
        self.settle_showdown()
    }

    fn deal_remaining(&mut self) -> Result<(), TableError> {
        while self.community_cards.len() < 5 {
            match self.community_cards.len() {
                0 => {
                    self.deal_community(3)?;
                    self.phase = Phase::Flop;
                }
                3 => {
                    self.deal_community(1)?;
                    self.phase = Phase::Turn;
                }
                _ => {
                    self.deal_community(1)?;
                    self.phase = Phase::River;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Run it twice

    /// Names still owing a run-it-twice choice.
    #[must_use]
    pub fn run_twice_waiting(&self) -> Vec<String> {
        match &self.run_twice {
            Some(state) => state
                .eligible
                .iter()
                .filter(|name| !state.choices.contains_key(*name))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn run_twice_eligible(&self) -> Vec<String> {
        self.run_twice
            .as_ref()
            .map(|state| state.eligible.clone())
            .unwrap_or_default()
    }

    /// Record one player's run-it-twice choice. The board runs twice only
    /// when every eligible player opts in; the first decline settles it as
    /// a single run once all choices are in.
    pub fn run_twice_choice(
        &mut self,
        name: &str,
        wants_twice: bool,
    ) -> Result<Vec<String>, TableError> {
        if self.phase != Phase::WaitingRunTwice {
            return Err(TableError::NotAwaitingRunTwice);
        }
        let (waiting, unanimous) = {
            let state = self
                .run_twice
                .as_mut()
                .ok_or(TableError::NotAwaitingRunTwice)?;
            if !state.eligible.iter().any(|n| n == name) {
                return Err(TableError::NotRunTwiceEligible);
            }
            if state.choices.contains_key(name) {
                return Err(TableError::RunTwiceChoiceMade);
            }
            state.choices.insert(name.to_string(), wants_twice);
            let waiting: Vec<String> = state
                .eligible
                .iter()
                .filter(|n| !state.choices.contains_key(*n))
                .cloned()
                .collect();
            let unanimous = state.choices.values().all(|&v| v);
            (waiting, unanimous)
        };

        if waiting.is_empty() {
            if unanimous {
                self.run_it_twice()?;
            } else {
                self.run_twice = None;
                self.deal_remaining()?;
                self.settle_showdown()?;
            }
        }
        Ok(waiting)
    }

    fn run_it_twice(&mut self) -> Result<(), TableError> {
        let state = self
            .run_twice
            .take()
            .ok_or(TableError::NotAwaitingRunTwice)?;

        // First board continues from the live deck.
        self.deal_remaining()?;
        let first_community = self.community_cards.clone();

        // Second board replays from the deck as saved at the interruption,
        // reshuffled so the two runs are independent draws.
        let mut second_deck = Deck::from_cards(state.saved_deck);
        second_deck.shuffle_remaining();
        let mut second_community = state.saved_community.clone();
        while second_community.len() < 5 {
            second_deck.burn();
            let take = if second_community.is_empty() { 3 } else { 1 };
            for _ in 0..take {
                let card = second_deck.draw().ok_or(TableError::DeckExhausted)?;
                second_community.push(card);
            }
        }

        self.settle_run_twice(first_community, second_community)
    }

    fn settle_run_twice(
        &mut self,
        first_community: Vec<Card>,
        second_community: Vec<Card>,
    ) -> Result<(), TableError> {
        let dealer = self.dealer_seat.ok_or(TableError::NoActiveHand)?;
        let ranks_first = self.rank_hands(&first_community);
        let ranks_second = self.rank_hands(&second_community);

        let mut contributions = self.collect_contributions();
        if let Some((name, refund)) = pots::refund_uncalled(&mut contributions) {
            self.credit(&name, refund);
        }
        let built = pots::build_pots(&contributions);
        self.pots = built.clone();

        let mut winners: Vec<String> = Vec::new();
        for pot in &built {
            let first = best_among(&pot.eligible_players, &ranks_first);
            let second = best_among(&pot.eligible_players, &ranks_second);
            if first == second {
                self.award(pot.amount, &first, dealer, &mut winners);
            } else {
                // Odd chip goes to the first run.
                let first_half = pot.amount - pot.amount / 2;
                let second_half = pot.amount / 2;
                self.award(first_half, &first, dealer, &mut winners);
                self.award(second_half, &second, dealer, &mut winners);
            }
        }

        let all_in_hand: Vec<String> = self.in_hand_names();
        let outcome = RunTwiceOutcome {
            first_winners: best_among(&all_in_hand, &ranks_first),
            second_winners: best_among(&all_in_hand, &ranks_second),
            first_community,
            second_community,
        };

        let entries = self.showdown_entries(&ranks_first);
        self.finish_hand(winners, Some(entries), Some(outcome));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settlement

    fn in_hand_names(&self) -> Vec<String> {
        self.seats
            .values()
            .filter(|p| p.in_hand())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Everyone who put chips in or holds cards this hand, including folded
    /// players (they fund pots they can no longer win).
    fn collect_contributions(&self) -> Vec<Contribution> {
        self.seats
            .values()
            .filter(|p| p.total_bet > 0 || !p.hole_cards.is_empty())
            .map(|p| Contribution {
                name: p.name.clone(),
                seat: p.seat,
                total: p.total_bet,
                folded: p.is_folded || p.hole_cards.is_empty(),
            })
            .collect()
    }

    fn credit(&mut self, name: &str, amount: Chips) {
        if let Some(seat) = self.seat_of(name) {
            if let Some(player) = self.seats.get_mut(&seat) {
                player.stack += amount;
            }
        }
    }

    /// Split `amount` among `winner_names`, walking the odd chips from the
    /// first seat left of the dealer.
    fn award(
        &mut self,
        amount: Chips,
        winner_names: &[String],
        dealer: usize,
        winners_out: &mut Vec<String>,
    ) {
        if winner_names.is_empty() || amount == 0 {
            return;
        }
        let mut ordered: Vec<(usize, String)> = winner_names
            .iter()
            .filter_map(|name| self.seat_of(name).map(|seat| (seat, name.clone())))
            .collect();
        ordered.sort_unstable_by_key(|(seat, _)| pots::distance_from_dealer(*seat, dealer));

        let shares = pots::split_pot(amount, ordered.len());
        for ((_, name), share) in ordered.iter().zip(shares) {
            self.credit(name, share);
            if !winners_out.contains(name) {
                winners_out.push(name.clone());
            }
        }
    }

    fn rank_hands(&self, community: &[Card]) -> HashMap<String, HandRank> {
        self.seats
            .values()
            .filter(|p| p.in_hand())
            .filter_map(|p| {
                let mut cards = p.hole_cards.clone();
                cards.extend_from_slice(community);
                eval::best_hand(&cards).map(|rank| (p.name.clone(), rank))
            })
            .collect()
    }

    fn showdown_entries(&self, ranks: &HashMap<String, HandRank>) -> Vec<ShowdownEntry> {
        self.seats
            .values()
            .filter(|p| p.in_hand())
            .filter_map(|p| {
                ranks.get(&p.name).map(|rank| ShowdownEntry {
                    player_name: p.name.clone(),
                    description: rank.description(),
                    hole_cards: p.hole_cards.clone(),
                })
            })
            .collect()
    }

    /// Hand ends with a single player left: everyone else folded. Uncalled
    /// chips go back first, then every pot is theirs.
    fn settle_fold_win(&mut self) -> Result<(), TableError> {
        let winner = self.in_hand_names().into_iter().next();
        let mut contributions = self.collect_contributions();
        if let Some((name, refund)) = pots::refund_uncalled(&mut contributions) {
            self.credit(&name, refund);
        }
        let built = pots::build_pots(&contributions);
        self.pots = built.clone();

        let mut winners = Vec::new();
        if let Some(winner) = winner {
            let total: Chips = built.iter().map(|p| p.amount).sum();
            self.credit(&winner, total);
            winners.push(winner);
        }
        self.finish_hand(winners, None, None);
        Ok(())
    }

    fn settle_showdown(&mut self) -> Result<(), TableError> {
        if self.in_hand_seats().len() <= 1 {
            return self.settle_fold_win();
        }
        self.phase = Phase::Showdown;
        let dealer = self.dealer_seat.ok_or(TableError::NoActiveHand)?;
        let community = self.community_cards.clone();
        let ranks = self.rank_hands(&community);

        let mut contributions = self.collect_contributions();
        if let Some((name, refund)) = pots::refund_uncalled(&mut contributions) {
            self.credit(&name, refund);
        }
        let built = pots::build_pots(&contributions);
        self.pots = built.clone();

        let mut winners: Vec<String> = Vec::new();
        for pot in &built {
            let best = best_among(&pot.eligible_players, &ranks);
            self.award(pot.amount, &best, dealer, &mut winners);
        }

        let entries = self.showdown_entries(&ranks);
        self.finish_hand(winners, Some(entries), None);
        Ok(())
    }

    fn finish_hand(
        &mut self,
        winners: Vec<String>,
        hand_results: Option<Vec<ShowdownEntry>>,
        run_twice: Option<RunTwiceOutcome>,
    ) {
        let pot: Chips = self.pots.iter().map(|p| p.amount).sum();
        self.last_hand_result = Some(HandResult {
            winners,
            pot,
            pots: self.pots.clone(),
            player_stacks: self
                .seats
                .values()
                .map(|p| (p.name.clone(), p.stack))
                .collect(),
            hand_results,
            run_twice,
        });
        self.phase = Phase::HandOver;
        self.acting_seat = None;
        self.run_twice = None;
        debug!(
            "room {}: hand {} over, pot {}",
            self.room_id, self.hand_number, pot
        );
    }

    // ------------------------------------------------------------------
    // Views

    /// Position label for a seat, derived from the dealer button and the
    /// non-sitting-out seat ordering.
    #[must_use]
    pub fn position_label(&self, seat: usize) -> String {
        let Some(dealer) = self.dealer_seat else {
            return String::new();
        };
        let active: Vec<usize> = self
            .seats
            .values()
            .filter(|p| !p.is_sitting_out)
            .map(|p| p.seat)
            .collect();
        let num = active.len();
        if num < 2 || !active.contains(&seat) {
            return String::new();
        }

        let dealer_idx = active.iter().position(|&s| s == dealer).unwrap_or(0);
        let seat_idx = active.iter().position(|&s| s == seat).unwrap_or(0);
        let relative = (seat_idx + num - dealer_idx) % num;

        if num == 2 {
            return if relative == 0 { "BTN/SB" } else { "BB" }.to_string();
        }
        match relative {
            0 => return "BTN".to_string(),
            1 => return "SB".to_string(),
            2 => return "BB".to_string(),
            _ => {}
        }

        let pos_after_bb = relative - 2;
        let positions_after_bb = num - 3;
        if pos_after_bb == positions_after_bb {
            return "CO".to_string();
        }
        if positions_after_bb >= 2 && pos_after_bb == positions_after_bb - 1 {
            return "HJ".to_string();
        }
        if pos_after_bb == 1 {
            return "UTG".to_string();
        }
        if pos_after_bb == 2 && positions_after_bb >= 4 {
            return "UTG+1".to_string();
        }
        if positions_after_bb >= 5 && pos_after_bb == 3 {
            return "MP".to_string();
        }
        "MP+1".to_string()
    }

    /// Total chips currently in the middle.
    #[must_use]
    pub fn pot_total(&self) -> Chips {
        if self.pots.is_empty() {
            self.seats.values().map(|p| p.total_bet).sum()
        } else {
            self.pots.iter().map(|p| p.amount).sum()
        }
    }

    /// Render the `game_state` payload for one recipient. Hole cards are
    /// included only for the recipient's own seat, or for every live hand
    /// once the showdown has been reached.
    #[must_use]
    pub fn game_state(&self, recipient: Option<&str>) -> GameStateView {
        let reveal_all = matches!(self.phase, Phase::Showdown | Phase::HandOver);
        let players = self
            .seats
            .values()
            .map(|p| {
                let own = recipient == Some(p.name.as_str());
                let show = !p.hole_cards.is_empty()
                    && (own || (reveal_all && !p.is_folded));
                PlayerView {
                    name: p.name.clone(),
                    seat: p.seat,
                    stack: p.stack,
                    current_bet: p.current_bet,
                    total_bet: p.total_bet,
                    is_folded: p.is_folded,
                    is_all_in: p.is_all_in,
                    is_sitting_out: p.is_sitting_out,
                    has_cards: !p.hole_cards.is_empty(),
                    position: self.position_label(p.seat),
                    hole_cards: show.then(|| p.hole_cards.clone()),
                }
            })
            .collect();

        let acting_recipient = recipient
            .and_then(|name| self.seat_of(name))
            .filter(|seat| self.acting_seat == Some(*seat))
            .and_then(|seat| self.seats.get(&seat));

        let (min_raise, call_amount) = match acting_recipient {
            Some(player) => {
                let to_call = self.current_bet - player.current_bet;
                let max_to = player.current_bet + player.stack;
                (
                    Some((self.current_bet + self.last_raise).min(max_to)),
                    Some(to_call.min(player.stack)),
                )
            }
            None => (None, None),
        };

        GameStateView {
            room_id: self.room_id.clone(),
            small_blind: self.small_blind,
            big_blind: self.big_blind,
            min_buy_in: self.min_buy_in,
            max_buy_in: self.max_buy_in,
            phase: self.phase,
            hand_number: self.hand_number,
            pot: self.pot_total(),
            current_bet: self.current_bet,
            community_cards: self.community_cards.clone(),
            players,
            dealer_seat: self.dealer_seat,
            current_player_seat: self.acting_seat,
            min_raise,
            call_amount,
            your_cards: recipient
                .and_then(|name| self.player_by_name(name))
                .filter(|p| !p.hole_cards.is_empty())
                .map(|p| p.hole_cards.clone()),
            valid_actions: recipient
                .map(|name| self.valid_actions(name))
                .filter(|actions| !actions.is_empty()),
            last_hand_result: (self.phase == Phase::HandOver)
                .then(|| self.last_hand_result.clone())
                .flatten(),
        }
    }

    // ------------------------------------------------------------------
    // Invariants & snapshots

    /// Validate chip conservation and acting-seat consistency. Run by the
    /// room after every mutation; a failure is a logic bug and fatal for
    /// the room.
    pub fn check_invariants(&self) -> Result<(), TableError> {
        let stacks: Chips = self.seats.values().map(|p| p.stack).sum();
        let found = if self.phase.hand_active() || self.phase == Phase::Showdown {
            stacks + self.seats.values().map(|p| p.total_bet).sum::<Chips>()
        } else {
            stacks
        };
        if found != self.chip_total {
            return Err(TableError::ChipConservation {
                expected: self.chip_total,
                found,
            });
        }

        if let Some(seat) = self.acting_seat {
            let ok = self
                .seats
                .get(&seat)
                .is_some_and(|p| p.in_hand() && !p.is_all_in);
            if !ok {
                return Err(TableError::ActingSeatInvalid { seat });
            }
        }
        Ok(())
    }

    /// Versioned persistence record.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            table: self.clone(),
        }
    }

    pub fn from_snapshot(snapshot: TableSnapshot) -> Result<Self, TableError> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(TableError::UnsupportedSnapshot {
                found: snapshot.schema_version,
            });
        }
        Ok(snapshot.table)
    }

    /// Occupied seats clockwise after `from`, wrapping, with `from` itself
    /// last if occupied.
    fn seats_after(&self, from: usize) -> Vec<usize> {
        let mut seats: Vec<usize> = self.seats.keys().copied().collect();
        if seats.is_empty() {
            return seats;
        }
        let pivot = seats.iter().position(|&s| s > from).unwrap_or(0);
        seats.rotate_left(pivot);
        seats
    }

    fn next_seat_where<F>(&self, from: usize, pred: F) -> Option<usize>
    where
        F: Fn(&SeatedPlayer) -> bool,
    {
        self.seats_after(from)
            .into_iter()
            .find(|seat| self.seats.get(seat).is_some_and(&pred))
    }
}

/// Next element of a sorted seat ring strictly after `from`, wrapping.
fn next_in_ring(ring: &[usize], from: usize) -> usize {
    *ring.iter().find(|&&s| s > from).unwrap_or(&ring[0])
}

/// Names with the best hand rank among `candidates`, preserving order.
fn best_among(candidates: &[String], ranks: &HashMap<String, HandRank>) -> Vec<String> {
    let best = candidates
        .iter()
        .filter_map(|name| ranks.get(name))
        .max()
        .cloned();
    match best {
        Some(best) => candidates
            .iter()
            .filter(|name| ranks.get(*name) == Some(&best))
            .cloned()
            .collect(),
        None => Vec::new(),
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableSnapshot {
    pub schema_version: u32,
    pub table: Table,
}
