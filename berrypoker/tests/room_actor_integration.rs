//! End-to-end room engine tests: events in, envelopes out, snapshots and
//! history behind.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use berrypoker::db::Store;
use berrypoker::game::ActionKind;
use berrypoker::net::messages::SignalPayload;
use berrypoker::net::{ClientMessage, ServerMessage};
use berrypoker::room::{
    ConnectionId, RegistryConfig, RoomEvent, RoomHandle, RoomRegistry, RoomRuntimeConfig,
    RoomSettings,
};

/// A registry whose rooms never auto-deal the next hand, so tests control
/// the pace.
async fn test_registry() -> (RoomRegistry, Store) {
    let store = Store::in_memory().await.unwrap();
    let registry = RoomRegistry::new(
        store.clone(),
        RegistryConfig {
            room: RoomRuntimeConfig {
                hand_start_delay: Duration::from_secs(600),
                ..RoomRuntimeConfig::default()
            },
            ..RegistryConfig::default()
        },
    );
    (registry, store)
}

async fn attach(handle: &RoomHandle, conn_id: ConnectionId) -> mpsc::Receiver<ServerMessage> {
    let (tx, rx) = mpsc::channel(256);
    handle
        .send(RoomEvent::Attach {
            conn_id,
            sender: tx,
        })
        .await
        .unwrap();
    rx
}

async fn send(handle: &RoomHandle, conn_id: ConnectionId, message: ClientMessage) {
    handle
        .send(RoomEvent::Client { conn_id, message })
        .await
        .unwrap();
}

async fn recv_until<F>(rx: &mut mpsc::Receiver<ServerMessage>, pred: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            let message = rx.recv().await.expect("room closed the channel");
            if pred(&message) {
                return message;
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

fn join(name: &str, seat: usize) -> ClientMessage {
    ClientMessage::Join {
        player_name: Some(name.to_string()),
        stack: 100,
        seat: Some(seat),
    }
}

#[tokio::test]
async fn spectate_join_play_and_record_a_hand() {
    let (registry, store) = test_registry().await;
    let handle = registry.create_room(RoomSettings::default()).await.unwrap();
    let room_id = handle.room_id().to_string();

    let mut alice_rx = attach(&handle, 1).await;
    let mut bob_rx = attach(&handle, 2).await;

    // Alice looks around first, then sits.
    send(
        &handle,
        1,
        ClientMessage::Spectate {
            player_name: "alice".to_string(),
        },
    )
    .await;
    recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::Spectating { .. })).await;
    recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::GameState(_))).await;

    send(&handle, 1, join("alice", 0)).await;
    let joined = recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;
    match joined {
        ServerMessage::Joined { player_name, seat } => {
            assert_eq!(player_name, "alice");
            assert_eq!(seat, 0);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    send(&handle, 2, join("bob", 1)).await;
    recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;
    recv_until(&mut alice_rx, |m| {
        matches!(m, ServerMessage::PlayerJoined { player_name, .. } if player_name == "bob")
    })
    .await;

    // Start the hand. Heads-up: seat 0 is dealer/SB and acts first.
    send(&handle, 1, ClientMessage::StartGame).await;
    let started =
        recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::HandStarted { .. })).await;
    assert!(matches!(
        started,
        ServerMessage::HandStarted { hand_number: 1 }
    ));
    // Skip to the post-start state on Alice's channel.
    recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::HandStarted { .. })).await;
    let state = recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::GameState(_))).await;
    match state {
        ServerMessage::GameState(view) => {
            assert_eq!(view.current_player_seat, Some(0));
            assert_eq!(view.your_cards.map(|c| c.len()), Some(2));
        }
        other => panic!("unexpected message: {other:?}"),
    }

    // Alice folds; Bob collects the blinds.
    send(
        &handle,
        1,
        ClientMessage::Action {
            action: ActionKind::Fold,
            amount: 0,
        },
    )
    .await;
    let ended =
        recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::HandEnded(_))).await;
    match ended {
        ServerMessage::HandEnded(result) => {
            assert_eq!(result.winners, vec!["bob".to_string()]);
            assert_eq!(result.player_stacks["alice"], 99);
            assert_eq!(result.player_stacks["bob"], 101);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    // The hand landed in history and stats, and the snapshot is current.
    let history = store.room_history(&room_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].winner_names, "bob");

    let stats = store.player_stats("bob").await.unwrap().unwrap();
    assert_eq!(stats.hands_played, 1);
    assert_eq!(stats.hands_won, 1);
    assert_eq!(stats.total_profit, 1);

    let rooms = store
        .load_recent_rooms(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].hand_number, 1);
}

#[tokio::test]
async fn policy_errors_reach_only_the_sender() {
    let (registry, _store) = test_registry().await;
    let handle = registry.create_room(RoomSettings::default()).await.unwrap();

    let mut alice_rx = attach(&handle, 1).await;
    let mut eve_rx = attach(&handle, 2).await;

    send(&handle, 1, join("alice", 0)).await;
    recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;

    // Duplicate name at a different seat.
    send(&handle, 2, join("alice", 3)).await;
    let err = recv_until(&mut eve_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
    match err {
        ServerMessage::Error { message } => assert_eq!(message, "Name already taken"),
        other => panic!("unexpected message: {other:?}"),
    }

    // Buy-in outside the room's bounds.
    send(
        &handle,
        2,
        ClientMessage::Join {
            player_name: Some("eve".to_string()),
            stack: 5,
            seat: Some(4),
        },
    )
    .await;
    let err = recv_until(&mut eve_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
    assert!(matches!(err, ServerMessage::Error { message } if message.contains("buy-in")));

    // Acting without a seat.
    send(
        &handle,
        2,
        ClientMessage::Action {
            action: ActionKind::Check,
            amount: 0,
        },
    )
    .await;
    let err = recv_until(&mut eve_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
    assert!(matches!(err, ServerMessage::Error { message } if message == "Not joined"));
}

#[tokio::test]
async fn out_of_turn_actions_are_rejected() {
    let (registry, _store) = test_registry().await;
    let handle = registry.create_room(RoomSettings::default()).await.unwrap();

    let mut alice_rx = attach(&handle, 1).await;
    let mut bob_rx = attach(&handle, 2).await;
    send(&handle, 1, join("alice", 0)).await;
    send(&handle, 2, join("bob", 1)).await;
    recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;
    recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;

    send(&handle, 1, ClientMessage::StartGame).await;
    recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::HandStarted { .. })).await;

    // Seat 0 acts first heads-up; Bob jumps the queue.
    send(
        &handle,
        2,
        ClientMessage::Action {
            action: ActionKind::Check,
            amount: 0,
        },
    )
    .await;
    let err = recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
    assert!(matches!(err, ServerMessage::Error { message } if message == "not your turn"));
}

#[tokio::test]
async fn chat_and_webrtc_relay() {
    let (registry, _store) = test_registry().await;
    let handle = registry.create_room(RoomSettings::default()).await.unwrap();

    let mut alice_rx = attach(&handle, 1).await;
    let mut bob_rx = attach(&handle, 2).await;
    send(&handle, 1, join("alice", 0)).await;
    send(&handle, 2, join("bob", 1)).await;
    recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;

    send(
        &handle,
        1,
        ClientMessage::Chat {
            message: "glhf".to_string(),
        },
    )
    .await;
    let chat = recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Chat { .. })).await;
    match chat {
        ServerMessage::Chat {
            player_name,
            message,
        } => {
            assert_eq!(player_name, "alice");
            assert_eq!(message, "glhf");
        }
        other => panic!("unexpected message: {other:?}"),
    }

    // Signaling goes only to the named target, stamped with the sender.
    send(
        &handle,
        1,
        ClientMessage::WebrtcOffer(SignalPayload {
            target: "bob".to_string(),
            body: serde_json::json!({"sdp": "v=0"}),
        }),
    )
    .await;
    let offer = recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::WebrtcOffer(_))).await;
    match offer {
        ServerMessage::WebrtcOffer(relay) => {
            assert_eq!(relay.from, "alice");
            assert_eq!(relay.body["sdp"], "v=0");
        }
        other => panic!("unexpected message: {other:?}"),
    }

    // Unknown target bounces back as an error to the sender.
    send(
        &handle,
        1,
        ClientMessage::WebrtcIce(SignalPayload {
            target: "carol".to_string(),
            body: serde_json::json!({"candidate": "x"}),
        }),
    )
    .await;
    let err = recv_until(&mut alice_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
    assert!(matches!(err, ServerMessage::Error { message } if message == "Target not connected"));
}

#[tokio::test]
async fn disconnect_keeps_the_seat_and_reconnect_rebinds() {
    let (registry, _store) = test_registry().await;
    let handle = registry.create_room(RoomSettings::default()).await.unwrap();

    let mut alice_rx = attach(&handle, 1).await;
    let mut bob_rx = attach(&handle, 2).await;
    send(&handle, 1, join("alice", 0)).await;
    send(&handle, 2, join("bob", 1)).await;
    recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;

    // Bob's connection drops; his seat survives.
    handle.send(RoomEvent::Detach { conn_id: 2 }).await.unwrap();
    recv_until(&mut alice_rx, |m| {
        matches!(m, ServerMessage::PlayerDisconnected { player_name } if player_name == "bob")
    })
    .await;
    let summary = handle.summary().await.unwrap();
    assert_eq!(summary.player_count, 2);

    // A new connection spectating under the same name rebinds the seat.
    let mut bob2_rx = attach(&handle, 3).await;
    send(
        &handle,
        3,
        ClientMessage::Spectate {
            player_name: "bob".to_string(),
        },
    )
    .await;
    let rebound = recv_until(&mut bob2_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;
    assert!(matches!(
        rebound,
        ServerMessage::Joined { seat: 1, .. }
    ));
}

#[tokio::test]
async fn leave_between_hands_frees_the_seat() {
    let (registry, _store) = test_registry().await;
    let handle = registry.create_room(RoomSettings::default()).await.unwrap();

    let mut alice_rx = attach(&handle, 1).await;
    let mut bob_rx = attach(&handle, 2).await;
    send(&handle, 1, join("alice", 0)).await;
    send(&handle, 2, join("bob", 1)).await;
    recv_until(&mut bob_rx, |m| matches!(m, ServerMessage::Joined { .. })).await;

    send(&handle, 2, ClientMessage::Leave).await;
    recv_until(&mut alice_rx, |m| {
        matches!(m, ServerMessage::PlayerLeft { player_name } if player_name == "bob")
    })
    .await;
    let summary = handle.summary().await.unwrap();
    assert_eq!(summary.player_count, 1);
}
