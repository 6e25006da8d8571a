//! The subscription graph.
//!
//! An instaql query is the user-level query one session issued; it is
//! versioned so that results from superseded evaluations can be
//! discarded. Subscriptions are the edges recording which datalog
//! queries an instaql query depended on at which version; edges from
//! older versions are garbage and are collected by the next transaction
//! that touches the identity or the session.
//!
//! Identity state machine for a `(session, query)` pair:
//! absent → fresh(v=1) on first bump; fresh → stale on invalidation;
//! stale → fresh(v+1) on re-bump; anything → absent on `remove_query`
//! or session removal.

use liveq_error::Result;
use liveq_store::{Attr, Clause, ERef, Lookup, TxOp, Var, query};
use liveq_types::{AppId, QueryDoc, SessionId, Value};
use tracing::debug;

use crate::datalog::clean_stale_datalog_op;
use crate::store::ReactiveStore;

/// Shape the client asked results in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    JoinRows,
    Tree,
}

impl ReturnType {
    fn keyword(self) -> Value {
        match self {
            Self::JoinRows => Value::keyword("join-rows"),
            Self::Tree => Value::keyword("tree"),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Keyword(k) if &**k == "join-rows" => Some(Self::JoinRows),
            Value::Keyword(k) if &**k == "tree" => Some(Self::Tree),
            _ => None,
        }
    }
}

/// Evaluation context threaded from `bump_instaql_version` through the
/// datalog evaluator and back into `add_instaql_query`.
#[derive(Debug, Clone)]
pub struct InstaqlContext {
    pub app_id: AppId,
    pub session_id: SessionId,
    pub query: QueryDoc,
    /// Instaql query version this evaluation belongs to.
    pub version: i64,
}

/// Outcome of [`ReactiveStore::add_instaql_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddQueryResult {
    /// Whether the freshly computed result differs from the one last
    /// delivered to the client — the signal to transmit.
    pub result_changed: bool,
}

/// A stale instaql query due for re-evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleQuery {
    pub query: QueryDoc,
    pub return_type: ReturnType,
    pub version: i64,
}

fn identity_pair(session_id: SessionId, query: &QueryDoc) -> Value {
    Value::pair(&Value::Uuid(session_id.get()), &Value::Json(query.clone()))
}

impl ReactiveStore {
    /// Move the `(session, query)` identity to its next version:
    /// create at version 1 on first contact, otherwise increment and
    /// clear the stale flag. Returns the new version.
    pub fn bump_instaql_version(
        &self,
        session_id: SessionId,
        query: &QueryDoc,
        return_type: ReturnType,
    ) -> Result<i64> {
        let sid = Value::Uuid(session_id.get());
        let qv = Value::Json(query.clone());
        let pair = identity_pair(session_id, query);
        let (_, version) = self.inner().transact_with("bump-instaql-version", |db| {
            let next = match db.entity(Lookup::Unique(Attr::InstaqlSessionQuery, pair.clone())) {
                Some(existing) => existing.get_int(Attr::InstaqlVersion).unwrap_or(0) + 1,
                None => 1,
            };
            let identity = ERef::Upsert(Attr::InstaqlSessionQuery, pair.clone());
            let ops = vec![
                TxOp::Add(identity.clone(), Attr::InstaqlSessionId, sid.clone()),
                TxOp::Add(identity.clone(), Attr::InstaqlQuery, qv.clone()),
                TxOp::add(identity.clone(), Attr::InstaqlVersion, next),
                TxOp::add(identity.clone(), Attr::InstaqlStale, false),
                TxOp::Add(identity, Attr::InstaqlReturnType, return_type.keyword()),
            ];
            Ok((ops, next))
        })?;
        Ok(version)
    }

    /// Record the outcome of an evaluation at `ctx.version`: retract
    /// subscriptions this version superseded, sweep datalog entries
    /// they were the last reference to, and store the result hash —
    /// one transaction.
    ///
    /// `result_changed` is true iff the previous and new hashes differ,
    /// or both are absent (a first evaluation must always be sent).
    pub fn add_instaql_query(
        &self,
        ctx: &InstaqlContext,
        result_hash: Option<&str>,
    ) -> Result<AddQueryResult> {
        let sid = Value::Uuid(ctx.session_id.get());
        let qv = Value::Json(ctx.query.clone());
        let pair = identity_pair(ctx.session_id, &ctx.query);
        let version = ctx.version;
        let hash = result_hash.map(str::to_owned);

        let set_hash_pair = pair.clone();
        let set_hash = hash.clone();
        let report = self.inner().transact("add-instaql-query", vec![
            retract_superseded_subs_op(sid, qv, version),
            clean_stale_datalog_op(),
            TxOp::call(move |db| {
                // The identity may have been removed while the
                // evaluation was in flight; then there is nothing to
                // hang the hash on.
                Ok(match db.resolve(&Lookup::Unique(Attr::InstaqlSessionQuery, set_hash_pair.clone())) {
                    Some(e) => match &set_hash {
                        Some(h) => vec![TxOp::add(ERef::Id(e), Attr::InstaqlHash, h.as_str())],
                        None => vec![TxOp::Retract(ERef::Id(e), Attr::InstaqlHash)],
                    },
                    None => vec![],
                })
            }),
        ])?;

        let previous = report
            .db_before
            .entity(Lookup::Unique(Attr::InstaqlSessionQuery, pair))
            .and_then(|e| e.get_text(Attr::InstaqlHash).map(str::to_owned));
        let result_changed = previous.as_deref() != result_hash
            || (previous.is_none() && result_hash.is_none());
        debug!(
            target: "liveq.subscription",
            session_id = %ctx.session_id,
            version,
            result_changed,
            "instaql query recorded"
        );
        Ok(AddQueryResult { result_changed })
    }

    /// Drop the `(session, query)` identity, its subscriptions, and
    /// any datalog entries they were the last reference to.
    /// Idempotent.
    pub fn remove_query(
        &self,
        session_id: SessionId,
        app_id: AppId,
        query: &QueryDoc,
    ) -> Result<()> {
        let sid = Value::Uuid(session_id.get());
        let qv = Value::Json(query.clone());
        let pair = identity_pair(session_id, query);
        self.inner()
            .transact("remove-query", vec![
                TxOp::call(move |db| {
                    let mut ops = Vec::new();
                    if let Some(e) = db.resolve(&Lookup::Unique(Attr::InstaqlSessionQuery, pair.clone()))
                    {
                        ops.push(TxOp::RetractEntity(ERef::Id(e)));
                    }
                    for sub in db.lookup_all(Attr::SubSessionId, &sid) {
                        if db.get(sub, Attr::SubInstaqlQuery) == Some(&qv) {
                            ops.push(TxOp::RetractEntity(ERef::Id(sub)));
                        }
                    }
                    Ok(ops)
                }),
                clean_stale_datalog_op(),
            ])
            .map(drop)?;
        debug!(target: "liveq.subscription", %session_id, %app_id, "query removed");
        Ok(())
    }

    /// Every instaql query of the session currently marked stale.
    #[must_use]
    pub fn get_stale_instaql_queries(&self, session_id: SessionId) -> Vec<StaleQuery> {
        let db = self.db();
        let q = Var("?q");
        query(&db, &[
            Clause::new(q, Attr::InstaqlSessionId, Value::Uuid(session_id.get())),
            Clause::new(q, Attr::InstaqlStale, Value::Bool(true)),
        ])
        .into_iter()
        .filter_map(|bindings| {
            let e = bindings.get(&q)?.as_ref_id()?;
            let entity = db.entity(e)?;
            Some(StaleQuery {
                query: entity.get(Attr::InstaqlQuery)?.as_json()?.clone(),
                return_type: entity
                    .get(Attr::InstaqlReturnType)
                    .and_then(ReturnType::from_value)?,
                version: entity.get_int(Attr::InstaqlVersion)?,
            })
        })
        .collect()
    }
}

/// Retract subscription edges for `(session, query)` recorded at a
/// version strictly below `version`.
fn retract_superseded_subs_op(sid: Value, qv: Value, version: i64) -> TxOp {
    TxOp::call(move |db| {
        let mut ops = Vec::new();
        for sub in db.lookup_all(Attr::SubSessionId, &sid) {
            if db.get(sub, Attr::SubInstaqlQuery) != Some(&qv) {
                continue;
            }
            let superseded = db
                .get(sub, Attr::SubVersion)
                .and_then(Value::as_int)
                .is_some_and(|v| v < version);
            if superseded {
                ops.push(TxOp::RetractEntity(ERef::Id(sub)));
            }
        }
        Ok(ops)
    })
}
