use crate::utils::{find_kind, TestEnv};
use beacon_core::ServerFrameKind;
use beacon_server::config::ServerConfig;
use serde_json::json;
use std::time::Duration;

fn tight_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.message_limit.burst = 5;
    config.message_limit.refill_window = Duration::from_secs(60);
    config
}

#[tokio::test]
async fn breaching_frames_error_and_are_not_dispatched() {
    let env = TestEnv::with_config(tight_config());
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;
    alice.clear();

    // Four more fit in the bucket after the join.
    for _ in 0..4 {
        env.send(&alice, r#"{"type":"get-peers"}"#).await;
    }
    assert_eq!(alice.drain_kind(ServerFrameKind::PeersUpdated).len(), 4);

    env.send(
        &alice,
        r#"{"type":"update","roomId":"r1","text":"blocked","baseVersion":0}"#,
    )
    .await;

    let frames = alice.drain();
    let error = find_kind(&frames, ServerFrameKind::Error).expect("breach reported");
    assert_eq!(error.payload["reason"], json!("rate_limited"));
    assert!(error.payload["retryAfter"].as_u64().unwrap() >= 1);
    // The blocked frame must cause no state change.
    assert!(find_kind(&frames, ServerFrameKind::DocUpdated).is_none());
    assert_eq!(
        env.state
            .registry
            .doc_of(&beacon_core::RoomId::parse("r1").unwrap())
            .unwrap()
            .version,
        0
    );
}

#[tokio::test]
async fn breach_is_idempotent_until_refill() {
    let env = TestEnv::with_config(tight_config());
    let alice = env.connect("c-alice", Some("alice"));
    for _ in 0..5 {
        env.send(&alice, r#"{"type":"get-peers"}"#).await;
    }
    alice.clear();

    for _ in 0..3 {
        env.send(&alice, r#"{"type":"get-peers"}"#).await;
    }

    let frames = alice.drain();
    assert_eq!(
        frames
            .iter()
            .filter(|f| f.kind == ServerFrameKind::Error)
            .count(),
        3
    );
    assert!(find_kind(&frames, ServerFrameKind::PeersUpdated).is_none());
}

#[tokio::test]
async fn other_connections_are_unaffected_by_a_breach() {
    let env = TestEnv::with_config(tight_config());
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    env.join(&bob, "r1").await;
    bob.clear();

    for _ in 0..6 {
        env.send(&alice, r#"{"type":"get-peers"}"#).await;
    }

    env.send(&bob, r#"{"type":"get-peers"}"#).await;
    let reply = find_kind(&bob.drain(), ServerFrameKind::PeersUpdated);
    assert!(reply.is_some(), "bob's bucket is independent of alice's");
}
