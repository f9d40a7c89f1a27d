use crate::utils::{find_kind, TestEnv};
use beacon_core::ServerFrameKind;
use serde_json::json;

#[tokio::test]
async fn join_replies_with_joined_doc_and_presence() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));

    env.join(&alice, "r1").await;

    let frames = alice.drain();
    let joined = find_kind(&frames, ServerFrameKind::Joined).expect("joined reply");
    assert_eq!(joined.payload["roomId"], json!("r1"));

    let doc = find_kind(&frames, ServerFrameKind::Doc).expect("initial doc");
    assert_eq!(doc.payload["version"], json!(0));
    assert_eq!(doc.payload["text"], json!(""));

    let presence = find_kind(&frames, ServerFrameKind::PeersUpdated).expect("initial presence");
    assert_eq!(presence.payload["total"], json!(1));
    assert_eq!(presence.payload["count"], json!(0));
    assert_eq!(presence.payload["peers"][0]["id"], json!("alice"));
}

#[tokio::test]
async fn second_join_updates_everyone() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    env.join(&alice, "r1").await;
    alice.clear();

    env.join(&bob, "r1").await;

    let to_alice = find_kind(&alice.drain(), ServerFrameKind::PeersUpdated)
        .expect("existing member hears about the join");
    assert_eq!(to_alice.payload["total"], json!(2));
    assert_eq!(to_alice.payload["count"], json!(1));

    let to_bob = find_kind(&bob.drain(), ServerFrameKind::PeersUpdated).expect("joiner snapshot");
    assert_eq!(to_bob.payload["total"], json!(2));
}

#[tokio::test]
async fn disconnect_notifies_the_former_room() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    env.join(&alice, "r1").await;
    env.join(&bob, "r1").await;
    bob.clear();

    env.disconnect(&alice).await;

    let presence = find_kind(&bob.drain(), ServerFrameKind::PeersUpdated)
        .expect("survivor gets a presence update");
    assert_eq!(presence.payload["total"], json!(1));
    assert_eq!(presence.payload["count"], json!(0));
    assert_eq!(presence.payload["peers"].as_array().unwrap().len(), 1);
    assert_eq!(presence.payload["peers"][0]["id"], json!("bob"));
}

#[tokio::test]
async fn switching_rooms_updates_both_rooms_and_membership_stays_single() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    let carol = env.connect("c-carol", Some("carol"));
    env.join(&alice, "r1").await;
    env.join(&bob, "r1").await;
    env.join(&carol, "r2").await;
    bob.clear();
    carol.clear();

    env.join(&alice, "r2").await;

    let to_bob = find_kind(&bob.drain(), ServerFrameKind::PeersUpdated)
        .expect("old room learns about the departure");
    assert_eq!(to_bob.payload["total"], json!(1));

    let to_carol = find_kind(&carol.drain(), ServerFrameKind::PeersUpdated)
        .expect("new room learns about the arrival");
    assert_eq!(to_carol.payload["total"], json!(2));

    assert_eq!(env.state.registry.membership_count(&alice.handle.client_id), 1);
}

#[tokio::test]
async fn leave_empties_and_removes_the_room() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;
    alice.clear();

    env.send(&alice, r#"{"type":"leave"}"#).await;

    let frames = alice.drain();
    let left = find_kind(&frames, ServerFrameKind::Left).expect("left reply");
    assert_eq!(left.payload["roomId"], json!("r1"));
    // Nobody is left in r1, so no presence frame goes anywhere.
    assert!(find_kind(&frames, ServerFrameKind::PeersUpdated).is_none());
    assert_eq!(env.state.registry.room_count(), 0);
}

#[tokio::test]
async fn get_peers_is_scoped_to_the_callers_room() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    let bob = env.connect("c-bob", Some("bob"));
    let outsider = env.connect("c-out", Some("outsider"));
    env.join(&alice, "r1").await;
    env.join(&bob, "r1").await;
    env.join(&outsider, "r2").await;
    alice.clear();

    env.send(&alice, r#"{"type":"get-peers"}"#).await;

    let reply = find_kind(&alice.drain(), ServerFrameKind::PeersUpdated).expect("snapshot reply");
    assert_eq!(reply.payload["total"], json!(2));
    let ids: Vec<String> = reply.payload["peers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect();
    assert!(ids.contains(&"alice".to_string()));
    assert!(ids.contains(&"bob".to_string()));
    assert!(!ids.contains(&"outsider".to_string()));
}

#[tokio::test]
async fn get_peers_while_unjoined_is_empty() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));

    env.send(&alice, r#"{"type":"get-peers"}"#).await;

    let reply = find_kind(&alice.drain(), ServerFrameKind::PeersUpdated).expect("empty snapshot");
    assert_eq!(reply.payload["total"], json!(0));
    assert_eq!(reply.payload["peers"], json!([]));
}

#[tokio::test]
async fn peer_descriptors_carry_transport_metadata() {
    let env = TestEnv::new();
    let alice = env.connect("c-alice", Some("alice"));
    env.join(&alice, "r1").await;

    let frames = alice.drain();
    let presence = find_kind(&frames, ServerFrameKind::PeersUpdated).unwrap();
    let peer = &presence.payload["peers"][0];
    assert_eq!(peer["origin"], json!("https://app.example"));
    assert_eq!(peer["userAgent"], json!("test-client"));
    assert_eq!(peer["remoteAddress"], json!("127.0.0.1:4242"));
    assert_eq!(peer["roomId"], json!("r1"));
}
