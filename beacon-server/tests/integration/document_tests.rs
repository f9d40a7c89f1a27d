use crate::utils::{find_kind, TestEnv};
use beacon_core::ServerFrameKind;
use serde_json::json;

#[tokio::test]
async fn conflicting_update_is_rejected_for_the_loser_only() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    env.join(&alice, "r1").await;
    env.join(&bob, "r1").await;
    alice.clear();
    bob.clear();

    env.send(
        &alice,
        r#"{"type":"update","roomId":"r1","text":"hi","baseVersion":0}"#,
    )
    .await;

    for conn in [&alice, &bob] {
        let updated =
            find_kind(&conn.drain(), ServerFrameKind::DocUpdated).expect("winner broadcast");
        assert_eq!(updated.payload["version"], json!(1));
        assert_eq!(updated.payload["text"], json!("hi"));
        assert_eq!(updated.payload["author"], json!("alice"));
    }

    env.send(
        &bob,
        r#"{"type":"update","roomId":"r1","text":"yo","baseVersion":0}"#,
    )
    .await;

    let rejected = find_kind(&bob.drain(), ServerFrameKind::UpdateRejected)
        .expect("stale writer is told to rebase");
    assert_eq!(rejected.payload["currentVersion"], json!(1));
    assert_eq!(rejected.payload["text"], json!("hi"));

    assert!(
        alice.drain().is_empty(),
        "rejection must not broadcast to the room"
    );
}

#[tokio::test]
async fn update_without_base_version_always_wins() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;
    env.send(
        &alice,
        r#"{"type":"update","roomId":"r1","text":"first","baseVersion":0}"#,
    )
    .await;
    alice.clear();

    env.send(&alice, r#"{"type":"update","roomId":"r1","text":"forced"}"#)
        .await;

    let updated = find_kind(&alice.drain(), ServerFrameKind::DocUpdated).expect("applied");
    assert_eq!(updated.payload["version"], json!(2));
    assert_eq!(updated.payload["text"], json!("forced"));
}

#[tokio::test]
async fn version_moves_by_exactly_one_per_accepted_update() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;
    alice.clear();

    for expected in 1..=5u64 {
        env.send(
            &alice,
            &format!(r#"{{"type":"update","roomId":"r1","text":"v{expected}","baseVersion":{}}}"#, expected - 1),
        )
        .await;
        let updated = find_kind(&alice.drain(), ServerFrameKind::DocUpdated).expect("applied");
        assert_eq!(updated.payload["version"], json!(expected));
    }
}

#[tokio::test]
async fn get_doc_returns_the_current_state() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    env.join(&alice, "r1").await;
    env.send(
        &alice,
        r#"{"type":"update","roomId":"r1","text":"shared","baseVersion":0}"#,
    )
    .await;
    env.join(&bob, "r1").await;
    bob.clear();

    env.send(&bob, r#"{"type":"request-doc"}"#).await;

    let doc = find_kind(&bob.drain(), ServerFrameKind::Doc).expect("doc reply");
    assert_eq!(doc.payload["version"], json!(1));
    assert_eq!(doc.payload["text"], json!("shared"));
}

#[tokio::test]
async fn joiner_receives_the_existing_document() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;
    env.send(
        &alice,
        r#"{"type":"update","roomId":"r1","text":"kept","baseVersion":0}"#,
    )
    .await;

    let bob = env.connect("c-bob", Some("bob"));
    env.join(&bob, "r1").await;

    let doc = find_kind(&bob.drain(), ServerFrameKind::Doc).expect("initial doc on join");
    assert_eq!(doc.payload["version"], json!(1));
    assert_eq!(doc.payload["text"], json!("kept"));
}

#[tokio::test]
async fn update_while_unjoined_is_an_error() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));

    env.send(&alice, r#"{"type":"update","text":"hi"}"#).await;

    let error = find_kind(&alice.drain(), ServerFrameKind::Error).expect("error reply");
    assert_eq!(error.payload["reason"], json!("invalid_message"));
}

#[tokio::test]
async fn update_for_a_foreign_room_is_an_error() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;
    alice.clear();

    env.send(
        &alice,
        r#"{"type":"update","roomId":"r2","text":"hi","baseVersion":0}"#,
    )
    .await;

    let error = find_kind(&alice.drain(), ServerFrameKind::Error).expect("error reply");
    assert_eq!(error.payload["reason"], json!("invalid_message"));
}
