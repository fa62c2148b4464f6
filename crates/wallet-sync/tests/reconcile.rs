//! Reconciliation and config resolution over encrypted events (no network).

mod common;

use common::{hex_id, init_tracing, snapshot_json, TestIdentity};
use wallet_sync::{
    decrypt_and_parse, reconcile, resolve_config, Identity, Payload, RelayEvent,
    TOKEN_SNAPSHOT_KIND, WALLET_CONFIG_KIND,
};

const M1: &str = "https://mint-one.example";
const M2: &str = "https://mint-two.example";

fn wallet_history(me: &TestIdentity) -> Vec<RelayEvent> {
    vec![
        me.event(1, 100, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p1", 1), ("p2", 2)], &[])),
        me.event(2, 100, TOKEN_SNAPSHOT_KIND, &snapshot_json(M2, &[("p3", 4)], &[])),
        // Spends p1: re-narrates p2 and retires event 1.
        me.event(3, 150, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p2", 2), ("p4", 8)], &[1])),
        me.event(4, 150, TOKEN_SNAPSHOT_KIND, &snapshot_json(M2, &[("p3", 4)], &[])),
        me.event(5, 200, TOKEN_SNAPSHOT_KIND, "{ not json"),
        me.event(6, 210, WALLET_CONFIG_KIND, r#"[["mint","https://x.example"]]"#),
    ]
}

async fn render(events: &[RelayEvent], me: &TestIdentity) -> String {
    serde_json::to_string(&reconcile(events, me).await).expect("serialize state")
}

#[tokio::test]
async fn test_reconcile_is_idempotent_and_order_insensitive() {
    init_tracing();
    let me = TestIdentity::new(1);
    let events = wallet_history(&me);
    let baseline = render(&events, &me).await;
    assert_eq!(render(&events, &me).await, baseline, "idempotent");

    let mut reversed = events.clone();
    reversed.reverse();
    assert_eq!(render(&reversed, &me).await, baseline);
    for k in 1..events.len() {
        let mut rotated = events.clone();
        rotated.rotate_left(k);
        assert_eq!(render(&rotated, &me).await, baseline, "rotation {}", k);
    }

    let state = reconcile(&events, &me).await;
    assert!(state.get("p1").is_none(), "p1 retired with event 1");
    assert_eq!(state.get("p2").unwrap().event_id, hex_id(3));
    assert_eq!(state.get("p3").unwrap().event_id, hex_id(4));
    assert_eq!(state.balance(), 14);
}

#[tokio::test]
async fn test_tombstone_suppression() {
    let me = TestIdentity::new(1);
    let a = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p1", 1)], &[]));
    let b = me.event(2, 2, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[], &[1]));
    assert!(reconcile(&[a, b], &me).await.is_empty());
}

#[tokio::test]
async fn test_later_snapshot_wins_on_same_identity() {
    let me = TestIdentity::new(1);
    let a = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p", 5)], &[]));
    let b = me.event(2, 2, TOKEN_SNAPSHOT_KIND, &snapshot_json(M2, &[("p", 5)], &[]));
    let state = reconcile(&[b, a], &me).await;
    assert_eq!(state.len(), 1);
    assert_eq!(state.get("p").unwrap().mint_url, M2);
}

#[tokio::test]
async fn test_duplicate_delivery() {
    let me = TestIdentity::new(1);
    let a = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p", 5), ("q", 1)], &[]));
    let once = render(&[a.clone()], &me).await;
    let twice = render(&[a.clone(), a], &me).await;
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_foreign_and_undecryptable_events_are_dropped() {
    let me = TestIdentity::new(1);
    let stranger = TestIdentity::new(2);
    let mine = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p", 5)], &[]));
    let theirs = stranger.event(2, 2, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("x", 9)], &[1]));
    let mut corrupted = me.event(3, 3, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("y", 1)], &[]));
    corrupted.encrypted_content.push_str("zz");

    assert!(decrypt_and_parse(&theirs, &me).await.is_none());
    assert!(decrypt_and_parse(&corrupted, &me).await.is_none());
    assert!(matches!(
        decrypt_and_parse(&mine, &me).await,
        Some(Payload::TokenSnapshot(_))
    ));

    let state = reconcile(&[mine, theirs, corrupted], &me).await;
    assert_eq!(state.len(), 1, "stranger's tombstone must not retire our event");
    assert_eq!(state.balance(), 5);
}

#[tokio::test]
async fn test_stranger_encrypting_to_owner_cannot_inject_or_retire() {
    let me = TestIdentity::new(1);
    let stranger = TestIdentity::new(2);
    let mine = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("p", 5)], &[]));
    let injected = stranger.event_to(
        me.public_id(),
        2,
        2,
        TOKEN_SNAPSHOT_KIND,
        &snapshot_json(M1, &[("fake", 1000)], &[1]),
    );
    // The pairwise cipher lets the owner read it; authorship is what excludes it.
    assert!(decrypt_and_parse(&injected, &me).await.is_some());

    let state = reconcile(&[mine, injected], &me).await;
    assert!(state.get("fake").is_none());
    assert_eq!(state.get("p").unwrap().event_id, hex_id(1));

    let cfg = stranger.event_to(
        me.public_id(),
        3,
        99,
        WALLET_CONFIG_KIND,
        r#"[["privkey","attacker"],["mint","https://evil.example"]]"#,
    );
    let own_cfg = me.event(4, 10, WALLET_CONFIG_KIND, r#"[["privkey","mine"]]"#);
    let resolved = resolve_config(&[cfg, own_cfg], &me).await;
    assert_eq!(resolved.private_key.as_deref(), Some("mine"));
    assert!(resolved.mints.is_empty());
}

#[tokio::test]
async fn test_conflicting_bodies_under_one_id_resolve_independent_of_order() {
    let me = TestIdentity::new(1);
    let a = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("a", 1)], &[]));
    let b = me.event(1, 1, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[("b", 2)], &[]));
    let forward = render(&[a.clone(), b.clone()], &me).await;
    let backward = render(&[b, a], &me).await;
    assert_eq!(forward, backward);
}

#[tokio::test]
async fn test_config_resolution_latest_wins_with_id_tie_break() {
    let me = TestIdentity::new(1);
    let old = me.event(1, 50, WALLET_CONFIG_KIND, r#"[["privkey","k-old"],["mint","https://old.example"]]"#);
    let tie_low = me.event(2, 90, WALLET_CONFIG_KIND, r#"[["privkey","k-low"],["mint","https://low.example"]]"#);
    let tie_high = me.event(
        3,
        90,
        WALLET_CONFIG_KIND,
        r#"[["privkey"],["privkey","k-high"],["privkey","k-ignored"],["mint","https://high.example/"],["mint","https://high.example"]]"#,
    );
    let garbage = me.event(4, 500, WALLET_CONFIG_KIND, r#"{"privkey":"nope"}"#);
    let snapshot = me.event(5, 900, TOKEN_SNAPSHOT_KIND, &snapshot_json(M1, &[], &[]));

    let forward = vec![old.clone(), tie_low.clone(), tie_high.clone(), garbage.clone(), snapshot.clone()];
    let backward = vec![snapshot, garbage, tie_high, tie_low, old];
    let a = resolve_config(&forward, &me).await;
    let b = resolve_config(&backward, &me).await;
    assert_eq!(a, b);
    assert_eq!(a.private_key.as_deref(), Some("k-high"));
    assert_eq!(a.event_id, Some(hex_id(3)));
    assert_eq!(a.mints.into_iter().collect::<Vec<_>>(), vec!["https://high.example".to_string()]);
}

#[tokio::test]
async fn test_config_resolution_empty_is_not_an_error() {
    let me = TestIdentity::new(1);
    let cfg = resolve_config(&[], &me).await;
    assert_eq!(cfg.private_key, None);
    assert!(cfg.mints.is_empty());
}
