//! Law-level property tests over randomized operation sequences.

use std::collections::BTreeSet;

use liveq::{
    AppId, DatalogResult, InstaqlContext, OpaqueHandle, QueryDoc, ReactiveStore, ReturnType,
    SessionId, Topic, TopicPart, TxId, Value,
};
use liveq_store::{Attr, Index};
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

const APP: AppId = AppId::new(1);

fn session(n: u8) -> SessionId {
    SessionId::new(Uuid::from_u128(u128::from(n) + 1))
}

fn user_query(n: u8) -> QueryDoc {
    QueryDoc::new(json!({ "collection": n }))
}

fn datalog_query(n: u8) -> QueryDoc {
    QueryDoc::new(json!([["ea", "?e", n, "?v"]]))
}

fn topic(n: u8) -> Topic {
    Topic::new([
        TopicPart::keyword("ea"),
        TopicPart::Wildcard,
        TopicPart::set([Value::Int(i64::from(n))]),
    ])
}

#[derive(Debug, Clone)]
enum Op {
    Subscribe { session: u8, query: u8, dq: u8 },
    RemoveQuery { session: u8, query: u8 },
    RemoveSession { session: u8 },
    Invalidate { tx: u64, dq: u8 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4_u8, 0..3_u8, 0..3_u8)
            .prop_map(|(session, query, dq)| Op::Subscribe { session, query, dq }),
        (0..4_u8, 0..3_u8).prop_map(|(session, query)| Op::RemoveQuery { session, query }),
        (0..4_u8).prop_map(|session| Op::RemoveSession { session }),
        (1..64_u64, 0..3_u8).prop_map(|(tx, dq)| Op::Invalidate { tx, dq }),
    ]
}

fn run(store: &ReactiveStore, op: &Op) {
    match *op {
        Op::Subscribe { session: s, query, dq } => {
            let sid = session(s);
            let version = store
                .bump_instaql_version(sid, &user_query(query), ReturnType::JoinRows)
                .unwrap();
            let ctx = InstaqlContext {
                app_id: APP,
                session_id: sid,
                query: user_query(query),
                version,
            };
            store
                .record_datalog_query_start(&ctx, &datalog_query(dq), vec![topic(dq)])
                .unwrap();
            store
                .swap_datalog_cache_delay(APP, &datalog_query(dq), OpaqueHandle::new(dq))
                .unwrap();
            store
                .record_datalog_query_finish(&ctx, &datalog_query(dq), DatalogResult {
                    topics: vec![topic(dq)],
                })
                .unwrap();
            store.add_instaql_query(&ctx, Some("h")).unwrap();
        }
        Op::RemoveQuery { session: s, query } => {
            store.remove_query(session(s), APP, &user_query(query)).unwrap();
        }
        Op::RemoveSession { session: s } => {
            store.remove_session(session(s)).unwrap();
        }
        Op::Invalidate { tx, dq } => {
            store.mark_stale_topics(APP, TxId::new(tx), &[topic(dq)]).unwrap();
        }
    }
}

/// Structural invariants that must hold after every public operation.
fn check_invariants(store: &ReactiveStore) {
    let db = store.db();

    // Every datalog cache entry has at least one incoming subscription.
    for datom in db.datoms(Index::Eav, Attr::DatalogAppId) {
        assert!(
            db.referencing(datom.e).next().is_some(),
            "orphan datalog entry {:?}",
            datom.e
        );
    }

    // Every subscription's reference resolves to a live entity.
    for datom in db.datoms(Index::Eav, Attr::SubDatalogQuery) {
        let target = datom.v.as_ref_id().expect("ref-typed attribute");
        assert!(db.entity(target).is_some(), "dangling subscription edge");
    }

    // At most one instaql query per (session, query) identity.
    let mut identities = BTreeSet::new();
    for datom in db.datoms(Index::Eav, Attr::InstaqlSessionQuery) {
        assert!(identities.insert(datom.v.clone()), "duplicate identity");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_across_operation_sequences(
        ops in proptest::collection::vec(arb_op(), 1..24)
    ) {
        let store = ReactiveStore::new();
        for op in &ops {
            run(&store, op);
            check_invariants(&store);
        }
    }

    #[test]
    fn processed_tx_id_never_decreases(txs in proptest::collection::vec(1..100_u64, 1..16)) {
        let store = ReactiveStore::new();
        let mut seen = 0_u64;
        for &tx in &txs {
            store.mark_stale_topics(APP, TxId::new(tx), &[]).unwrap();
            seen = seen.max(tx);
            prop_assert_eq!(store.processed_tx_id(APP), Some(TxId::new(seen)));
        }
    }

    #[test]
    fn remove_session_is_idempotent_after_any_sequence(
        ops in proptest::collection::vec(arb_op(), 0..12),
        victim in 0..4_u8,
    ) {
        let store = ReactiveStore::new();
        for op in &ops {
            run(&store, op);
        }
        store.remove_session(session(victim)).unwrap();
        let entities_once = store.db().entity_count();
        store.remove_session(session(victim)).unwrap();
        prop_assert_eq!(store.db().entity_count(), entities_once);
        check_invariants(&store);
    }

    #[test]
    fn bump_version_is_strictly_monotonic(bumps in 1..12_usize) {
        let store = ReactiveStore::new();
        let sid = session(0);
        let mut last = 0;
        for _ in 0..bumps {
            let v = store
                .bump_instaql_version(sid, &user_query(0), ReturnType::Tree)
                .unwrap();
            prop_assert!(v == last + 1);
            last = v;
        }
    }
}
