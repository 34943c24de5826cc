//! The room actor.
//!
//! One cooperative task per room owns the [`Table`] and serializes every
//! externally originated event: client messages, persistence ticks, and the
//! scheduled next-hand timer. Broadcast fan-out happens between events, so
//! no two table mutations ever interleave.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use super::messages::{ConnectionId, RoomEvent, RoomSummary, SeatSummary};
use crate::db::Store;
use crate::game::table::LeaveOutcome;
use crate::game::{Chips, Phase, Table, TableError};
use crate::net::messages::{SignalPayload, SignalRelay};
use crate::net::{ClientMessage, ServerMessage};

/// Runtime knobs for a room actor.
#[derive(Clone, Debug)]
pub struct RoomRuntimeConfig {
    /// Maximum age of dirty state before the periodic snapshot fires.
    pub persist_interval: Duration,
    /// Pause between a hand ending and the next one being dealt.
    pub hand_start_delay: Duration,
    /// Consecutive persistence failures tolerated before the room aborts.
    pub persist_failure_limit: u32,
}

impl Default for RoomRuntimeConfig {
    fn default() -> Self {
        Self {
            persist_interval: Duration::from_secs(30),
            hand_start_delay: Duration::from_secs(2),
            persist_failure_limit: 5,
        }
    }
}

struct Connection {
    sender: mpsc::Sender<ServerMessage>,
    /// Seated identity, when bound to a player at the table.
    player_name: Option<String>,
    /// Display name for connections watching without a seat.
    spectator_name: Option<String>,
}

impl Connection {
    fn identity(&self) -> Option<&str> {
        self.player_name
            .as_deref()
            .or(self.spectator_name.as_deref())
    }
}

pub struct RoomActor {
    table: Table,
    inbox: mpsc::Receiver<RoomEvent>,
    connections: HashMap<ConnectionId, Connection>,
    store: Store,
    config: RoomRuntimeConfig,
    /// Stacks at the latest hand start, for profit bookkeeping.
    stacks_before_hand: HashMap<String, Chips>,
    next_hand_at: Option<Instant>,
    dirty: bool,
    persist_failures: u32,
    /// Whether the current `last_hand_result` has been recorded and
    /// broadcast already.
    hand_settled: bool,
    run_twice_prompted: bool,
    closed: bool,
}

impl RoomActor {
    pub fn new(
        table: Table,
        inbox: mpsc::Receiver<RoomEvent>,
        store: Store,
        config: RoomRuntimeConfig,
    ) -> Self {
        Self {
            table,
            inbox,
            connections: HashMap::new(),
            store,
            config,
            stacks_before_hand: HashMap::new(),
            next_hand_at: None,
            dirty: false,
            persist_failures: 0,
            hand_settled: true,
            run_twice_prompted: false,
            closed: false,
        }
    }

    pub async fn run(mut self) {
        info!("room {} started", self.table.room_id);
        let mut persist_tick = tokio::time::interval(self.config.persist_interval);
        persist_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.closed {
                break;
            }
            let hand_timer = self.next_hand_at;
            tokio::select! {
                event = self.inbox.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = persist_tick.tick() => {
                    if self.dirty {
                        self.persist().await;
                    }
                }
                () = async {
                    sleep_until(hand_timer.unwrap_or_else(Instant::now)).await;
                }, if hand_timer.is_some() => {
                    self.next_hand_at = None;
                    self.start_hand_flow(None).await;
                }
            }
        }
        info!("room {} stopped", self.table.room_id);
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Attach { conn_id, sender } => {
                self.connections.insert(
                    conn_id,
                    Connection {
                        sender,
                        player_name: None,
                        spectator_name: None,
                    },
                );
                debug!("room {}: connection {} attached", self.table.room_id, conn_id);
            }
            RoomEvent::Detach { conn_id } => {
                if let Some(conn) = self.connections.remove(&conn_id) {
                    // The seat is kept so the player can reconnect and pick
                    // their live state back up between hands.
                    if let Some(name) = conn.player_name {
                        self.broadcast(ServerMessage::PlayerDisconnected { player_name: name })
                            .await;
                    }
                }
            }
            RoomEvent::Client { conn_id, message } => {
                self.handle_client(conn_id, message).await;
                if !self.closed {
                    self.enforce_invariants().await;
                }
            }
            RoomEvent::GetSummary { response } => {
                let _ = response.send(self.summary());
            }
            RoomEvent::Shutdown => {
                self.persist().await;
                self.closed = true;
            }
        }
    }

    async fn handle_client(&mut self, conn_id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Spectate { player_name } => {
                self.handle_spectate(conn_id, player_name).await;
            }
            ClientMessage::Join {
                player_name,
                stack,
                seat,
            } => {
                self.handle_join(conn_id, player_name, stack, seat).await;
            }
            ClientMessage::Leave => self.handle_leave(conn_id).await,
            ClientMessage::StartGame => self.start_hand_flow(Some(conn_id)).await,
            ClientMessage::Action { action, amount } => {
                self.handle_action(conn_id, action, amount).await;
            }
            ClientMessage::SitOut => self.handle_sit_out(conn_id).await,
            ClientMessage::Chat { message } => self.handle_chat(conn_id, message).await,
            ClientMessage::AddChips { amount } => self.handle_add_chips(conn_id, amount).await,
            ClientMessage::RunTwiceChoice { run_twice } => {
                self.handle_run_twice_choice(conn_id, run_twice).await;
            }
            ClientMessage::WebrtcOffer(signal) => {
                self.relay_signal(conn_id, signal, ServerMessage::WebrtcOffer)
                    .await;
            }
            ClientMessage::WebrtcAnswer(signal) => {
                self.relay_signal(conn_id, signal, ServerMessage::WebrtcAnswer)
                    .await;
            }
            ClientMessage::WebrtcIce(signal) => {
                self.relay_signal(conn_id, signal, ServerMessage::WebrtcIce)
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Client operations

    async fn handle_spectate(&mut self, conn_id: ConnectionId, player_name: String) {
        let name = player_name.trim().to_string();
        if name.is_empty() {
            self.send_error(conn_id, "Player name is required").await;
            return;
        }

        if let Some(seat) = self.table.player_by_name(&name).map(|p| p.seat) {
            // Reconnecting to an existing seat.
            self.bind_player(conn_id, &name);
            self.send_to(
                conn_id,
                ServerMessage::Joined {
                    player_name: name.clone(),
                    seat,
                },
            )
            .await;
        } else {
            if let Some(conn) = self.connections.get_mut(&conn_id) {
                conn.spectator_name = Some(name.clone());
            }
            self.send_to(
                conn_id,
                ServerMessage::Spectating {
                    player_name: name.clone(),
                },
            )
            .await;
        }

        let view = self.view_for(conn_id);
        self.send_to(conn_id, ServerMessage::GameState(view)).await;
    }

    async fn handle_join(
        &mut self,
        conn_id: ConnectionId,
        player_name: Option<String>,
        stack: Chips,
        seat: Option<usize>,
    ) {
        let name = player_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                self.connections
                    .get(&conn_id)
                    .and_then(|c| c.spectator_name.clone())
            });
        let Some(name) = name else {
            self.send_error(conn_id, "Player name is required").await;
            return;
        };
        let Some(seat) = seat else {
            self.send_error(conn_id, "Please select a seat").await;
            return;
        };

        if let Some(existing_seat) = self.table.player_by_name(&name).map(|p| p.seat) {
            if existing_seat != seat {
                self.send_error(conn_id, "Name already taken").await;
                return;
            }
            // Reconnecting to the same seat.
            self.bind_player(conn_id, &name);
        } else {
            if let Err(err) = self.table.add_player(&name, seat, stack) {
                self.send_table_error(conn_id, &err).await;
                return;
            }
            self.bind_player(conn_id, &name);
        }

        self.send_to(
            conn_id,
            ServerMessage::Joined {
                player_name: name.clone(),
                seat,
            },
        )
        .await;
        self.broadcast_except(
            ServerMessage::PlayerJoined {
                player_name: name,
                seat,
            },
            conn_id,
        )
        .await;
        self.broadcast_game_state().await;
        self.persist().await;
    }

    async fn handle_leave(&mut self, conn_id: ConnectionId) {
        let Some(name) = self
            .connections
            .get_mut(&conn_id)
            .and_then(|c| c.player_name.take())
        else {
            // Spectators have nothing at the table to release.
            return;
        };

        match self.table.leave(&name) {
            Ok(LeaveOutcome::Removed | LeaveOutcome::FoldedPendingRemoval) => {
                self.broadcast(ServerMessage::PlayerLeft { player_name: name })
                    .await;
                self.post_mutation().await;
                self.broadcast_game_state().await;
                self.persist().await;
            }
            Err(err) => self.send_table_error(conn_id, &err).await,
        }
    }

    async fn handle_action(&mut self, conn_id: ConnectionId, action: crate::game::ActionKind, amount: Chips) {
        let Some(name) = self.player_identity(conn_id) else {
            self.send_error(conn_id, "Not joined").await;
            return;
        };

        match self.table.apply_action(&name, action, amount) {
            Ok(record) => {
                self.broadcast(ServerMessage::player_action(&record)).await;
                self.post_mutation().await;
                self.broadcast_game_state().await;
                self.persist().await;
            }
            Err(err) if err.is_fatal() => self.fatal_close(&err.to_string()).await,
            Err(err) => self.send_table_error(conn_id, &err).await,
        }
    }

    async fn handle_sit_out(&mut self, conn_id: ConnectionId) {
        let Some(name) = self.player_identity(conn_id) else {
            self.send_error(conn_id, "Not joined").await;
            return;
        };
        match self.table.toggle_sit_out(&name) {
            Ok(_) => {
                self.broadcast_game_state().await;
                self.persist().await;
            }
            Err(err) => self.send_table_error(conn_id, &err).await,
        }
    }

    async fn handle_chat(&mut self, conn_id: ConnectionId, message: String) {
        let Some(identity) = self
            .connections
            .get(&conn_id)
            .and_then(|c| c.identity().map(str::to_string))
        else {
            return;
        };
        self.broadcast(ServerMessage::Chat {
            player_name: identity,
            message,
        })
        .await;
    }

    async fn handle_add_chips(&mut self, conn_id: ConnectionId, amount: Chips) {
        let Some(name) = self.player_identity(conn_id) else {
            self.send_error(conn_id, "Not joined").await;
            return;
        };
        match self.table.add_chips(&name, amount) {
            Ok(_) => {
                self.broadcast_game_state().await;
                self.persist().await;
            }
            Err(err) => self.send_table_error(conn_id, &err).await,
        }
    }

    async fn handle_run_twice_choice(&mut self, conn_id: ConnectionId, wants_twice: bool) {
        let Some(name) = self.player_identity(conn_id) else {
            self.send_error(conn_id, "Not joined").await;
            return;
        };
        match self.table.run_twice_choice(&name, wants_twice) {
            Ok(waiting_for) => {
                self.broadcast(ServerMessage::RunTwiceChoiceMade {
                    player_name: name,
                    wants_twice,
                    waiting_for,
                })
                .await;
                self.post_mutation().await;
                self.broadcast_game_state().await;
                self.persist().await;
            }
            Err(err) if err.is_fatal() => self.fatal_close(&err.to_string()).await,
            Err(err) => self.send_table_error(conn_id, &err).await,
        }
    }

    /// Forward a WebRTC signaling envelope to the named target without
    /// inspecting its body.
    async fn relay_signal(
        &mut self,
        conn_id: ConnectionId,
        signal: SignalPayload,
        wrap: fn(SignalRelay) -> ServerMessage,
    ) {
        let Some(from) = self
            .connections
            .get(&conn_id)
            .and_then(|c| c.identity().map(str::to_string))
        else {
            self.send_error(conn_id, "Not joined").await;
            return;
        };

        let target = self.connections.iter().find_map(|(id, conn)| {
            (conn.identity() == Some(signal.target.as_str())).then_some(*id)
        });
        match target {
            Some(target_id) => {
                self.send_to(
                    target_id,
                    wrap(SignalRelay {
                        from,
                        body: signal.body,
                    }),
                )
                .await;
            }
            None => self.send_error(conn_id, "Target not connected").await,
        }
    }

    // ------------------------------------------------------------------
    // Hand lifecycle

    /// Start a hand now, either on client request or from the scheduled
    /// next-hand timer (`origin` is `None` for the timer).
    async fn start_hand_flow(&mut self, origin: Option<ConnectionId>) {
        if self.table.phase.hand_active() {
            if let Some(conn_id) = origin {
                self.send_error(conn_id, "Game already in progress").await;
            }
            return;
        }

        for name in self.table.unseat_busted() {
            self.unbind_player(&name);
            self.broadcast(ServerMessage::PlayerLeft { player_name: name })
                .await;
        }

        self.stacks_before_hand = self
            .table
            .seats
            .values()
            .map(|p| (p.name.clone(), p.stack))
            .collect();

        match self.table.start_hand() {
            Ok(()) => {
                self.hand_settled = false;
                self.run_twice_prompted = false;
                self.broadcast(ServerMessage::HandStarted {
                    hand_number: self.table.hand_number,
                })
                .await;
                self.post_mutation().await;
                self.broadcast_game_state().await;
                self.persist().await;
                self.enforce_invariants().await;
            }
            Err(TableError::NotEnoughPlayers) => {
                self.table.settle_idle();
                if let Some(conn_id) = origin {
                    self.send_error(conn_id, "Need at least 2 players to start")
                        .await;
                } else {
                    self.broadcast_game_state().await;
                }
            }
            Err(err) if err.is_fatal() => self.fatal_close(&err.to_string()).await,
            Err(err) => {
                if let Some(conn_id) = origin {
                    self.send_table_error(conn_id, &err).await;
                }
            }
        }
    }

    /// Run the deferred consequences of a mutation: the run-it-twice prompt
    /// and the hand-ended bookkeeping.
    async fn post_mutation(&mut self) {
        if self.table.phase == Phase::WaitingRunTwice && !self.run_twice_prompted {
            self.run_twice_prompted = true;
            let eligible = self.table.run_twice_eligible();
            for name in &eligible {
                if let Some(conn_id) = self.conn_of_player(name) {
                    self.send_to(
                        conn_id,
                        ServerMessage::RunTwicePrompt {
                            eligible_players: eligible.clone(),
                        },
                    )
                    .await;
                }
            }
        }

        if self.table.phase == Phase::HandOver && !self.hand_settled {
            self.hand_settled = true;
            self.hand_ended_flow().await;
        }
    }

    async fn hand_ended_flow(&mut self) {
        let Some(result) = self.table.last_hand_result.clone() else {
            return;
        };

        if let Err(err) = self
            .store
            .record_hand(
                &self.table.room_id,
                self.table.hand_number,
                &result,
                &self.stacks_before_hand,
                &self.table.action_history,
            )
            .await
        {
            warn!(
                "room {}: failed to record hand {}: {err}",
                self.table.room_id, self.table.hand_number
            );
        }

        self.broadcast(ServerMessage::HandEnded(result)).await;

        for name in self.table.finalize_leaves() {
            self.unbind_player(&name);
            self.broadcast(ServerMessage::PlayerLeft { player_name: name })
                .await;
        }

        // The next hand deals itself after a short pause, provided enough
        // players remain.
        self.next_hand_at = Some(Instant::now() + self.config.hand_start_delay);
    }

    // ------------------------------------------------------------------
    // Fan-out and bookkeeping

    fn player_identity(&self, conn_id: ConnectionId) -> Option<String> {
        self.connections
            .get(&conn_id)
            .and_then(|c| c.player_name.clone())
    }

    fn conn_of_player(&self, name: &str) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find_map(|(id, conn)| (conn.player_name.as_deref() == Some(name)).then_some(*id))
    }

    /// Bind this connection to a seated player, displacing any stale
    /// binding for the same name (one live connection per player).
    fn bind_player(&mut self, conn_id: ConnectionId, name: &str) {
        for (id, conn) in self.connections.iter_mut() {
            if *id != conn_id && conn.player_name.as_deref() == Some(name) {
                conn.player_name = None;
            }
        }
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.player_name = Some(name.to_string());
            conn.spectator_name = None;
        }
    }

    /// Demote any connection bound to `name` back to spectating.
    fn unbind_player(&mut self, name: &str) {
        for conn in self.connections.values_mut() {
            if conn.player_name.as_deref() == Some(name) {
                conn.player_name = None;
                conn.spectator_name = Some(name.to_string());
            }
        }
    }

    fn view_for(&self, conn_id: ConnectionId) -> crate::game::GameStateView {
        let recipient = self
            .connections
            .get(&conn_id)
            .and_then(|c| c.player_name.as_deref());
        self.table.game_state(recipient)
    }

    async fn send_to(&mut self, conn_id: ConnectionId, message: ServerMessage) {
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };
        if conn.sender.send(message).await.is_err() {
            self.connections.remove(&conn_id);
        }
    }

    async fn broadcast(&mut self, message: ServerMessage) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn_id in ids {
            self.send_to(conn_id, message.clone()).await;
        }
    }

    async fn broadcast_except(&mut self, message: ServerMessage, exclude: ConnectionId) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn_id in ids {
            if conn_id != exclude {
                self.send_to(conn_id, message.clone()).await;
            }
        }
    }

    /// Fan out the authoritative state, rendered per recipient so hole
    /// cards and action bounds stay private.
    async fn broadcast_game_state(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn_id in ids {
            let view = self.view_for(conn_id);
            self.send_to(conn_id, ServerMessage::GameState(view)).await;
        }
    }

    async fn send_error(&mut self, conn_id: ConnectionId, message: &str) {
        self.send_to(conn_id, ServerMessage::error(message)).await;
    }

    async fn send_table_error(&mut self, conn_id: ConnectionId, err: &TableError) {
        self.send_to(conn_id, ServerMessage::error(err.to_string()))
            .await;
    }

    fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.table.room_id.clone(),
            small_blind: self.table.small_blind,
            big_blind: self.table.big_blind,
            min_buy_in: self.table.min_buy_in,
            max_buy_in: self.table.max_buy_in,
            phase: self.table.phase,
            hand_number: self.table.hand_number,
            player_count: self.table.seats.len(),
            connection_count: self.connections.len(),
            seats: self
                .table
                .seats
                .values()
                .map(|p| SeatSummary {
                    seat: p.seat,
                    name: p.name.clone(),
                    stack: p.stack,
                    is_sitting_out: p.is_sitting_out,
                })
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Persistence and invariants

    async fn persist(&mut self) {
        match self.store.save_room(&self.table).await {
            Ok(()) => {
                self.dirty = false;
                self.persist_failures = 0;
            }
            Err(err) => {
                self.dirty = true;
                self.persist_failures += 1;
                warn!(
                    "room {}: snapshot write failed ({}/{}): {err}",
                    self.table.room_id, self.persist_failures, self.config.persist_failure_limit
                );
                if self.persist_failures >= self.config.persist_failure_limit {
                    self.fatal_close("persistent snapshot failures").await;
                }
            }
        }
    }

    /// Post-mutation invariant check. A violation means the engine itself
    /// is wrong, so the room aborts and keeps its last good snapshot for
    /// diagnosis.
    async fn enforce_invariants(&mut self) {
        if let Err(err) = self.table.check_invariants() {
            self.fatal_close(&err.to_string()).await;
        }
    }

    async fn fatal_close(&mut self, reason: &str) {
        error!("room {} aborting: {reason}", self.table.room_id);
        self.broadcast(ServerMessage::error("internal error, room closed"))
            .await;
        self.closed = true;
    }
}
