//! Property tests: the AVE index always agrees with the EAV map, and
//! transactions are all-or-nothing.

use liveq_store::{Attr, ERef, Index, Store, TxOp};
use liveq_types::Value;
use proptest::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum StoreOp {
    /// Assert `instaql/session-id` on one of four entities.
    Assert { slot: u8, session: u8 },
    /// Retract the attribute from one of the entities.
    Retract { slot: u8 },
    /// Retract the whole entity.
    RetractEntity { slot: u8 },
}

fn arb_op() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (0..4_u8, 0..3_u8).prop_map(|(slot, session)| StoreOp::Assert { slot, session }),
        (0..4_u8).prop_map(|slot| StoreOp::Retract { slot }),
        (0..4_u8).prop_map(|slot| StoreOp::RetractEntity { slot }),
    ]
}

fn sid(n: u8) -> Value {
    Value::Uuid(Uuid::from_u128(u128::from(n) + 1))
}

fn slot_marker(slot: u8) -> Value {
    Value::Int(i64::from(slot))
}

/// Entities are addressed through a stable marker attribute so ops can
/// find "their" entity again across transactions.
fn resolve_slot(db: &liveq_store::Db, slot: u8) -> Option<liveq_types::EntityId> {
    db.lookup_all(Attr::DatalogAppId, &slot_marker(slot)).next()
}

fn run(store: &Store, op: &StoreOp) {
    match *op {
        StoreOp::Assert { slot, session } => {
            store
                .transact("assert", vec![TxOp::call(move |db| {
                    let subject = match resolve_slot(db, slot) {
                        Some(e) => ERef::Id(e),
                        None => ERef::Temp(0),
                    };
                    Ok(vec![
                        TxOp::Add(subject.clone(), Attr::DatalogAppId, slot_marker(slot)),
                        TxOp::Add(subject, Attr::InstaqlSessionId, sid(session)),
                    ])
                })])
                .unwrap();
        }
        StoreOp::Retract { slot } => {
            store
                .transact("retract", vec![TxOp::call(move |db| {
                    Ok(match resolve_slot(db, slot) {
                        Some(e) => vec![TxOp::Retract(ERef::Id(e), Attr::InstaqlSessionId)],
                        None => vec![],
                    })
                })])
                .unwrap();
        }
        StoreOp::RetractEntity { slot } => {
            store
                .transact("retract-entity", vec![TxOp::call(move |db| {
                    Ok(match resolve_slot(db, slot) {
                        Some(e) => vec![TxOp::RetractEntity(ERef::Id(e))],
                        None => vec![],
                    })
                })])
                .unwrap();
        }
    }
}

fn check_index_agreement(db: &liveq_store::Db) {
    for attr in [Attr::DatalogAppId, Attr::InstaqlSessionId] {
        // Every EAV datom appears in the AVE index...
        for datom in db.datoms(Index::Eav, attr) {
            assert!(
                db.lookup_all(attr, &datom.v).any(|e| e == datom.e),
                "EAV datom missing from AVE: {datom:?}"
            );
        }
        // ...and the AVE index holds nothing extra.
        for datom in db.datoms(Index::Ave, attr) {
            assert_eq!(
                db.get(datom.e, attr),
                Some(&datom.v),
                "stale AVE entry: {datom:?}"
            );
        }
        assert_eq!(
            db.datoms(Index::Eav, attr).count(),
            db.datoms(Index::Ave, attr).count()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn ave_index_always_agrees_with_eav(
        ops in proptest::collection::vec(arb_op(), 1..32)
    ) {
        let store = Store::new();
        for op in &ops {
            run(&store, op);
            check_index_agreement(&store.db());
        }
    }

    #[test]
    fn basis_counts_commits(ops in proptest::collection::vec(arb_op(), 0..16)) {
        let store = Store::new();
        for op in &ops {
            run(&store, op);
        }
        prop_assert_eq!(store.db().basis(), ops.len() as u64);
    }
}
