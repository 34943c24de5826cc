//! Process-wide room directory, recovery, and idle sweeping.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::actor::{RoomActor, RoomRuntimeConfig};
use super::messages::{RoomEvent, RoomHandle};
use crate::db::{Store, StoreError};
use crate::game::{Chips, Table};

const ROOM_INBOX_CAPACITY: usize = 128;
const ROOM_ID_LEN: usize = 8;

/// Settings accepted when creating a room.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoomSettings {
    #[serde(default = "default_small_blind")]
    pub small_blind: Chips,
    #[serde(default = "default_big_blind")]
    pub big_blind: Chips,
    #[serde(default = "default_min_buy_in")]
    pub min_buy_in: Chips,
    #[serde(default = "default_max_buy_in")]
    pub max_buy_in: Chips,
}

fn default_small_blind() -> Chips {
    1
}
fn default_big_blind() -> Chips {
    2
}
fn default_min_buy_in() -> Chips {
    40
}
fn default_max_buy_in() -> Chips {
    200
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            small_blind: default_small_blind(),
            big_blind: default_big_blind(),
            min_buy_in: default_min_buy_in(),
            max_buy_in: default_max_buy_in(),
        }
    }
}

impl RoomSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.small_blind == 0 || self.big_blind == 0 {
            return Err("blinds must be at least 1".to_string());
        }
        if self.big_blind < self.small_blind {
            return Err("big blind must be at least the small blind".to_string());
        }
        if self.min_buy_in < self.big_blind {
            return Err("min buy-in must cover the big blind".to_string());
        }
        if self.max_buy_in < self.min_buy_in {
            return Err("max buy-in must be at least the min buy-in".to_string());
        }
        Ok(())
    }
}

/// Registry-wide configuration.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Rooms idle past this window are purged and not recovered.
    pub idle_window: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
    /// Per-room runtime knobs.
    pub room: RoomRuntimeConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            room: RoomRuntimeConfig::default(),
        }
    }
}

/// The only process-wide mutable structure: room id to live actor handle.
/// Creation and deletion serialize on the inner lock; rooms themselves
/// share no state with each other.
pub struct RoomRegistry {
    store: Store,
    rooms: RwLock<HashMap<String, RoomHandle>>,
    config: RegistryConfig,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(store: Store, config: RegistryConfig) -> Self {
        Self {
            store,
            rooms: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a room, persist its initial snapshot, and spawn its actor.
    pub async fn create_room(&self, settings: RoomSettings) -> Result<RoomHandle, StoreError> {
        let room_id = new_room_id();
        let table = Table::new(
            room_id.clone(),
            settings.small_blind,
            settings.big_blind,
            settings.min_buy_in,
            settings.max_buy_in,
        );
        self.store.save_room(&table).await?;

        let handle = self.spawn_room(table).await;
        info!("created room {room_id}");
        Ok(handle)
    }

    async fn spawn_room(&self, table: Table) -> RoomHandle {
        let room_id = table.room_id.clone();
        let (sender, inbox) = mpsc::channel(ROOM_INBOX_CAPACITY);
        let actor = RoomActor::new(table, inbox, self.store.clone(), self.config.room.clone());
        tokio::spawn(actor.run());

        let handle = RoomHandle::new(sender, room_id.clone());
        let mut rooms = self.rooms.write().await;
        rooms.insert(room_id, handle.clone());
        handle
    }

    pub async fn get_room(&self, room_id: &str) -> Option<RoomHandle> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    /// Load every snapshot fresher than the idle window and bring its room
    /// back up. Stale snapshots are purged first. No connections are
    /// reattached; players rejoin over the channel.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let purged = self.store.purge_stale_rooms(self.config.idle_window).await?;
        if !purged.is_empty() {
            info!("purged {} stale room snapshot(s)", purged.len());
        }

        let tables = self.store.load_recent_rooms(self.config.idle_window).await?;
        let mut count = 0;
        for table in tables {
            let room_id = table.room_id.clone();
            self.spawn_room(table).await;
            info!("recovered room {room_id}");
            count += 1;
        }
        Ok(count)
    }

    /// Drop rooms whose snapshots have gone stale. Live rooms persist on
    /// every mutation, so anything stale has been idle for the window.
    pub async fn sweep_idle(&self) {
        let purged = match self.store.purge_stale_rooms(self.config.idle_window).await {
            Ok(purged) => purged,
            Err(err) => {
                warn!("idle sweep failed: {err}");
                return;
            }
        };

        if purged.is_empty() {
            return;
        }
        let mut rooms = self.rooms.write().await;
        for room_id in purged {
            if let Some(handle) = rooms.remove(&room_id) {
                let _ = handle.send(RoomEvent::Shutdown).await;
            }
            info!("purged idle room {room_id}");
        }
    }

    /// Close one room explicitly and delete its snapshot.
    pub async fn close_room(&self, room_id: &str) -> Result<(), StoreError> {
        let handle = {
            let mut rooms = self.rooms.write().await;
            rooms.remove(room_id)
        };
        if let Some(handle) = handle {
            let _ = handle.send(RoomEvent::Shutdown).await;
        }
        self.store.delete_room(room_id).await
    }

    /// Flush every room on shutdown. Each actor writes a final snapshot
    /// before stopping.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = {
            let mut rooms = self.rooms.write().await;
            rooms.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.send(RoomEvent::Shutdown).await;
        }
    }

    /// Spawn the background idle sweeper.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(registry.config.sweep_interval);
            // The first tick completes immediately; skip it so a fresh boot
            // does not sweep right after recovery.
            tick.tick().await;
            loop {
                tick.tick().await;
                registry.sweep_idle().await;
            }
        })
    }
}

fn new_room_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..ROOM_ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_ids_are_short_and_unique() {
        let a = new_room_id();
        let b = new_room_id();
        assert_eq!(a.len(), ROOM_ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn settings_defaults_are_valid() {
        RoomSettings::default().validate().unwrap();
    }

    #[test]
    fn settings_reject_inverted_bounds() {
        let settings = RoomSettings {
            small_blind: 10,
            big_blind: 5,
            ..RoomSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = RoomSettings {
            min_buy_in: 500,
            max_buy_in: 100,
            ..RoomSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn create_get_and_count_rooms() {
        let store = Store::in_memory().await.unwrap();
        let registry = RoomRegistry::new(store, RegistryConfig::default());

        let handle = registry.create_room(RoomSettings::default()).await.unwrap();
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.get_room(handle.room_id()).await.is_some());
        assert!(registry.get_room("nope").await.is_none());

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.room_id, handle.room_id());
        assert_eq!(summary.player_count, 0);
    }

    #[tokio::test]
    async fn recovery_restores_persisted_rooms() {
        let store = Store::in_memory().await.unwrap();
        let registry = RoomRegistry::new(store.clone(), RegistryConfig::default());
        let handle = registry.create_room(RoomSettings::default()).await.unwrap();
        let room_id = handle.room_id().to_string();

        // A second registry over the same store sees the snapshot.
        let registry2 = RoomRegistry::new(store, RegistryConfig::default());
        let recovered = registry2.recover().await.unwrap();
        assert_eq!(recovered, 1);
        assert!(registry2.get_room(&room_id).await.is_some());
    }

    #[tokio::test]
    async fn close_room_removes_snapshot_and_handle() {
        let store = Store::in_memory().await.unwrap();
        let registry = RoomRegistry::new(store.clone(), RegistryConfig::default());
        let handle = registry.create_room(RoomSettings::default()).await.unwrap();
        let room_id = handle.room_id().to_string();

        registry.close_room(&room_id).await.unwrap();
        assert!(registry.get_room(&room_id).await.is_none());
        let rooms = store
            .load_recent_rooms(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(rooms.is_empty());
    }
}
