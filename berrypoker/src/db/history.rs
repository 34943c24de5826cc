//! Hand history recording and player statistics.

use chrono::Utc;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;

use super::{Store, StoreError};
use crate::game::table::{ActionRecord, HandResult};
use crate::game::Chips;

/// A recorded hand, as returned by the room history endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct HandRecord {
    pub id: i64,
    pub room_id: String,
    pub hand_number: i64,
    pub pot_size: i64,
    pub winner_names: String,
    pub winning_hand: Option<String>,
    pub created_at: String,
}

/// Aggregate statistics for one player name.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerStatsRow {
    pub player_name: String,
    pub hands_played: i64,
    pub hands_won: i64,
    pub total_profit: i64,
    pub biggest_pot: i64,
}

impl PlayerStatsRow {
    /// The zero row reported for names that have never played a hand.
    #[must_use]
    pub fn empty(player_name: &str) -> Self {
        Self {
            player_name: player_name.to_string(),
            hands_played: 0,
            hands_won: 0,
            total_profit: 0,
            biggest_pot: 0,
        }
    }
}

impl Store {
    /// Record a completed hand: the hand row, its per-action trail, and the
    /// per-player statistic updates, in one transaction.
    pub async fn record_hand(
        &self,
        room_id: &str,
        hand_number: u64,
        result: &HandResult,
        stacks_before: &HashMap<String, Chips>,
        actions: &[ActionRecord],
    ) -> Result<i64, StoreError> {
        let now = Utc::now();
        let winner_names = result.winners.join(",");
        let winning_hand = result.hand_results.as_ref().and_then(|entries| {
            entries
                .iter()
                .find(|entry| result.winners.contains(&entry.player_name))
                .map(|entry| entry.description.clone())
        });

        let mut tx = self.pool().begin().await?;

        let hand_row = sqlx::query(
            r#"
            INSERT INTO hands (room_id, hand_number, pot_size, winner_names, winning_hand, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(room_id)
        .bind(hand_number as i64)
        .bind(i64::from(result.pot))
        .bind(&winner_names)
        .bind(&winning_hand)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let hand_id = hand_row.last_insert_rowid();

        for (sequence, action) in actions.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO action_history (hand_id, player_name, action, amount, phase, sequence)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(hand_id)
            .bind(&action.player_name)
            .bind(action.action.to_string())
            .bind(i64::from(action.amount))
            .bind(action.phase.to_string())
            .bind(sequence as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (name, &ending) in &result.player_stacks {
            let starting = stacks_before.get(name).copied().unwrap_or(ending);
            let profit = i64::from(ending) - i64::from(starting);
            let is_winner = result.winners.contains(name);
            let won = i64::from(is_winner);
            let pot_for_stats = if is_winner { i64::from(result.pot) } else { 0 };

            sqlx::query(
                r#"
                INSERT INTO player_stats (name, hands_played, hands_won, total_profit, biggest_pot, updated_at)
                VALUES (?1, 1, ?2, ?3, ?4, ?5)
                ON CONFLICT(name) DO UPDATE SET
                    hands_played = hands_played + 1,
                    hands_won = hands_won + ?2,
                    total_profit = total_profit + ?3,
                    biggest_pot = MAX(biggest_pot, ?4),
                    updated_at = ?5
                "#,
            )
            .bind(name)
            .bind(won)
            .bind(profit)
            .bind(pot_for_stats)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(hand_id)
    }

    /// Recent hands for a room, newest first.
    pub async fn room_history(
        &self,
        room_id: &str,
        limit: i64,
    ) -> Result<Vec<HandRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, room_id, hand_number, pot_size, winner_names, winning_hand, created_at
            FROM hands
            WHERE room_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HandRecord {
                id: row.get("id"),
                room_id: row.get("room_id"),
                hand_number: row.get("hand_number"),
                pot_size: row.get("pot_size"),
                winner_names: row.get("winner_names"),
                winning_hand: row.get("winning_hand"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Statistics for one player, if any hands were recorded.
    pub async fn player_stats(&self, name: &str) -> Result<Option<PlayerStatsRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT name, hands_played, hands_won, total_profit, biggest_pot
            FROM player_stats
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| PlayerStatsRow {
            player_name: row.get("name"),
            hands_played: row.get("hands_played"),
            hands_won: row.get("hands_won"),
            total_profit: row.get("total_profit"),
            biggest_pot: row.get("biggest_pot"),
        }))
    }

    /// Top players by total profit.
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<PlayerStatsRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, hands_played, hands_won, total_profit, biggest_pot
            FROM player_stats
            ORDER BY total_profit DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PlayerStatsRow {
                player_name: row.get("name"),
                hands_played: row.get("hands_played"),
                hands_won: row.get("hands_won"),
                total_profit: row.get("total_profit"),
                biggest_pot: row.get("biggest_pot"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::table::{HandResult, ShowdownEntry};
    use crate::game::{ActionKind, Phase};
    use std::collections::BTreeMap;

    fn sample_result() -> HandResult {
        HandResult {
            winners: vec!["alice".to_string()],
            pot: 200,
            pots: Vec::new(),
            player_stacks: BTreeMap::from([
                ("alice".to_string(), 300),
                ("bob".to_string(), 0),
            ]),
            hand_results: Some(vec![ShowdownEntry {
                player_name: "alice".to_string(),
                description: "Pair of Aces".to_string(),
                hole_cards: Vec::new(),
            }]),
            run_twice: None,
        }
    }

    fn sample_actions() -> Vec<ActionRecord> {
        vec![
            ActionRecord {
                player_name: "bob".to_string(),
                action: ActionKind::AllIn,
                amount: 100,
                phase: Phase::Preflop,
            },
            ActionRecord {
                player_name: "alice".to_string(),
                action: ActionKind::Call,
                amount: 98,
                phase: Phase::Preflop,
            },
        ]
    }

    #[tokio::test]
    async fn record_hand_updates_stats_and_history() {
        let store = Store::in_memory().await.unwrap();
        let stacks_before =
            HashMap::from([("alice".to_string(), 100), ("bob".to_string(), 100)]);

        let hand_id = store
            .record_hand("room1", 1, &sample_result(), &stacks_before, &sample_actions())
            .await
            .unwrap();
        assert!(hand_id > 0);

        let history = store.room_history("room1", 50).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].pot_size, 200);
        assert_eq!(history[0].winner_names, "alice");
        assert_eq!(history[0].winning_hand.as_deref(), Some("Pair of Aces"));

        let alice = store.player_stats("alice").await.unwrap().unwrap();
        assert_eq!(alice.hands_played, 1);
        assert_eq!(alice.hands_won, 1);
        assert_eq!(alice.total_profit, 200);
        assert_eq!(alice.biggest_pot, 200);

        let bob = store.player_stats("bob").await.unwrap().unwrap();
        assert_eq!(bob.hands_won, 0);
        assert_eq!(bob.total_profit, -100);
        assert_eq!(bob.biggest_pot, 0);
    }

    #[tokio::test]
    async fn stats_accumulate_across_hands() {
        let store = Store::in_memory().await.unwrap();
        let stacks_before =
            HashMap::from([("alice".to_string(), 100), ("bob".to_string(), 100)]);

        for hand_number in 1..=3 {
            store
                .record_hand(
                    "room1",
                    hand_number,
                    &sample_result(),
                    &stacks_before,
                    &sample_actions(),
                )
                .await
                .unwrap();
        }

        let alice = store.player_stats("alice").await.unwrap().unwrap();
        assert_eq!(alice.hands_played, 3);
        assert_eq!(alice.hands_won, 3);

        let board = store.leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].player_name, "alice");
    }

    #[tokio::test]
    async fn unknown_player_has_no_stats() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.player_stats("ghost").await.unwrap().is_none());
    }
}
