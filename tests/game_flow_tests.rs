//! Game flows across hub instances sharing a repository and a bus,
//! exercising the full action dispatch path as two server processes would.


use std::sync::Arc;
use std::time::Duration;

use ripple_realtime::client::Outbound;
use ripple_realtime::protocol::{GameAction, GameStatus, GameType, RoomId, UserId};
use ripple_realtime::repository::{GameRepository, GameRoom};
use test_helpers::{create_test_server, fast_config, TestBackends};

fn drain(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Frame(bytes) = item {
            frames.push(serde_json::from_slice(&bytes).unwrap());
        }
    }
    frames
}

#[tokio::test]
async fn connect_four_game_spans_two_instances() {
    let backends = TestBackends::new();
    let instance_a = create_test_server(fast_config(), &backends).await;
    let instance_b = create_test_server(fast_config(), &backends).await;

    backends
        .repo
        .create_room(GameRoom::pending(RoomId(1), GameType::ConnectFour, UserId(10)))
        .await
        .unwrap();

    // Creator's socket lands on instance A, opponent's on instance B.
    let (_creator, mut rx_creator) = instance_a.game_hub.register(RoomId(1), UserId(10)).unwrap();
    let (_opponent, mut rx_opponent) = instance_b.game_hub.register(RoomId(1), UserId(20)).unwrap();

    let mutated = instance_b
        .game_hub
        .handle_action(UserId(20), GameAction::JoinRoom { room_id: RoomId(1) })
        .await;
    assert!(mutated);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The creator, on the other instance, sees the start via the bus.
    let frames = drain(&mut rx_creator);
    assert!(frames.iter().any(|f| f["type"] == "game_started"));

    // Alternating moves, each dispatched on the actor's own instance.
    let moves = [
        (10, 0, &instance_a),
        (20, 4, &instance_b),
        (10, 1, &instance_a),
        (20, 5, &instance_b),
        (10, 2, &instance_a),
        (20, 4, &instance_b),
        (10, 3, &instance_a),
    ];
    for (user, column, instance) in moves {
        let accepted = instance
            .game_hub
            .handle_action(
                UserId(user),
                GameAction::MakeMove {
                    room_id: RoomId(1),
                    payload: serde_json::json!({ "column": column }),
                },
            )
            .await;
        assert!(accepted, "move by {user} in column {column}");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let room = backends.repo.get_room(RoomId(1)).await.unwrap().unwrap();
    assert_eq!(room.status, GameStatus::Finished);
    assert_eq!(room.winner_id, Some(UserId(10)));

    // Both sides observed the finishing snapshot.
    for rx in [&mut rx_creator, &mut rx_opponent] {
        let frames = drain(rx);
        assert!(
            frames
                .iter()
                .any(|f| f["type"] == "game_state"
                    && f["payload"]["status"] == "finished"
                    && f["payload"]["winner_id"] == 10),
            "finishing snapshot missing"
        );
    }

    let stats = backends
        .repo
        .get_stats(UserId(10), GameType::ConnectFour)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.points, 15);
}

#[tokio::test]
async fn checkers_mandatory_capture_rejected_with_error_event() {
    let backends = TestBackends::new();
    let server = create_test_server(fast_config(), &backends).await;

    backends
        .repo
        .create_room(GameRoom::pending(RoomId(2), GameType::Checkers, UserId(1)))
        .await
        .unwrap();
    let (_c, mut rx_c) = server.game_hub.register(RoomId(2), UserId(1)).unwrap();
    let (_o, _rx_o) = server.game_hub.register(RoomId(2), UserId(2)).unwrap();
    server
        .game_hub
        .handle_action(UserId(2), GameAction::JoinRoom { room_id: RoomId(2) })
        .await;

    // A jump for red exists, so a quiet step elsewhere must be refused.
    let mut board = vec![vec![String::new(); 8]; 8];
    board[4][3] = "r".to_string();
    board[3][4] = "b".to_string();
    board[6][1] = "r".to_string();
    let mut room = backends.repo.get_room(RoomId(2)).await.unwrap().unwrap();
    room.current_state = serde_json::json!({ "board": board, "must_jump_from": null });
    backends.repo.update_room(&room).await.unwrap();
    drain(&mut rx_c);

    let accepted = server
        .game_hub
        .handle_action(
            UserId(1),
            GameAction::MakeMove {
                room_id: RoomId(2),
                payload: serde_json::json!({"from": [6, 1], "to": [5, 0]}),
            },
        )
        .await;
    assert!(!accepted);

    let frames = drain(&mut rx_c);
    assert!(frames
        .iter()
        .any(|f| f["type"] == "error" && f["payload"]["message"] == "Must capture"));

    // The jump itself is accepted.
    let accepted = server
        .game_hub
        .handle_action(
            UserId(1),
            GameAction::MakeMove {
                room_id: RoomId(2),
                payload: serde_json::json!({"from": [4, 3], "to": [2, 5]}),
            },
        )
        .await;
    assert!(accepted);
}

#[tokio::test]
async fn othello_rejects_non_capturing_placement() {
    let backends = TestBackends::new();
    let server = create_test_server(fast_config(), &backends).await;

    backends
        .repo
        .create_room(GameRoom::pending(RoomId(3), GameType::Othello, UserId(1)))
        .await
        .unwrap();
    let (_c, mut rx_c) = server.game_hub.register(RoomId(3), UserId(1)).unwrap();
    let (_o, _rx_o) = server.game_hub.register(RoomId(3), UserId(2)).unwrap();
    server
        .game_hub
        .handle_action(UserId(2), GameAction::JoinRoom { room_id: RoomId(3) })
        .await;
    drain(&mut rx_c);

    let accepted = server
        .game_hub
        .handle_action(
            UserId(1),
            GameAction::MakeMove {
                room_id: RoomId(3),
                payload: serde_json::json!({"row": 0, "column": 0}),
            },
        )
        .await;
    assert!(!accepted);

    let frames = drain(&mut rx_c);
    assert!(frames
        .iter()
        .any(|f| f["type"] == "error" && f["payload"]["message"] == "Invalid move location"));

    let room = backends.repo.get_room(RoomId(3)).await.unwrap().unwrap();
    assert_eq!(room.next_turn_id, Some(UserId(1)), "turn is not consumed");
}
