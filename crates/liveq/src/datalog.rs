//! The shared datalog cache.
//!
//! Datalog queries are cached per app so N subscribers to the same
//! query pay for one evaluation. The cache stores an opaque lazy
//! result holder (the store never runs or awaits it) plus the topic
//! set the evaluation read — coarse at start, refined once the real
//! result is known. Entries live exactly as long as some subscription
//! references them; the orphan sweep runs inside every transaction
//! that removes subscriptions.

use liveq_error::Result;
use liveq_store::{Attr, Db, ERef, Index, Lookup, TxOp};
use liveq_types::{AppId, OpaqueHandle, QueryDoc, Topic, Value};
use tracing::debug;

use crate::store::ReactiveStore;
use crate::subscription::InstaqlContext;

/// A completed datalog evaluation, as the store cares about it: the
/// refined (narrower) topic set the actual result justifies.
#[derive(Debug, Clone)]
pub struct DatalogResult {
    pub topics: Vec<Topic>,
}

fn cache_pair(app_id: AppId, query: &QueryDoc) -> Value {
    Value::pair(&Value::from(app_id), &Value::Json(query.clone()))
}

impl ReactiveStore {
    /// Single-flight coordination for one `(app, query)` cache slot.
    ///
    /// Atomically: return the delay already installed, or install
    /// `new_delay` and return it. The boolean reports whether this
    /// call installed. Callers execute the returned delay, so
    /// concurrent requests for the same key share one computation.
    pub fn swap_datalog_cache_delay(
        &self,
        app_id: AppId,
        query: &QueryDoc,
        new_delay: OpaqueHandle,
    ) -> Result<(OpaqueHandle, bool)> {
        let pair = cache_pair(app_id, query);
        let qv = Value::Json(query.clone());
        let (_, swapped) = self.inner().transact_with("swap-datalog-cache-delay", |db| {
            if let Some(entry) = db.entity(Lookup::Unique(Attr::DatalogAppQuery, pair.clone())) {
                if let Some(existing) = entry.get(Attr::DatalogDelay).and_then(Value::as_handle) {
                    return Ok((vec![], (existing.clone(), false)));
                }
            }
            let entry = ERef::Upsert(Attr::DatalogAppQuery, pair.clone());
            let ops = vec![
                TxOp::Add(entry.clone(), Attr::DatalogAppId, Value::from(app_id)),
                TxOp::Add(entry.clone(), Attr::DatalogQuery, qv.clone()),
                TxOp::Add(entry, Attr::DatalogDelay, Value::Handle(new_delay.clone())),
            ];
            Ok((ops, (new_delay.clone(), true)))
        })?;
        Ok(swapped)
    }

    /// Record that an evaluation started for `ctx` against
    /// `datalog_query`: ensure the cache entry exists with at least
    /// the coarse topic set, and insert the subscription edge — one
    /// transaction.
    pub fn record_datalog_query_start(
        &self,
        ctx: &InstaqlContext,
        datalog_query: &QueryDoc,
        coarse_topics: Vec<Topic>,
    ) -> Result<()> {
        let app_id = ctx.app_id;
        let session_id = ctx.session_id;
        let instaql = Value::Json(ctx.query.clone());
        let version = ctx.version;
        let pair = cache_pair(app_id, datalog_query);
        let dq = Value::Json(datalog_query.clone());

        self.inner()
            .transact("record-datalog-query-start", vec![TxOp::call(move |db| {
                let mut ops = Vec::new();
                let entry = match db.resolve(&Lookup::Unique(Attr::DatalogAppQuery, pair.clone())) {
                    Some(e) => {
                        if db.get(e, Attr::DatalogTopics).is_none() {
                            ops.push(TxOp::Add(
                                ERef::Id(e),
                                Attr::DatalogTopics,
                                Value::Topics(coarse_topics.clone().into()),
                            ));
                        }
                        ERef::Id(e)
                    }
                    None => {
                        ops.extend([
                            TxOp::Add(ERef::Temp(0), Attr::DatalogAppId, Value::from(app_id)),
                            TxOp::Add(ERef::Temp(0), Attr::DatalogQuery, dq.clone()),
                            TxOp::Add(
                                ERef::Temp(0),
                                Attr::DatalogTopics,
                                Value::Topics(coarse_topics.clone().into()),
                            ),
                        ]);
                        ERef::Temp(0)
                    }
                };
                ops.extend([
                    TxOp::Add(ERef::Temp(1), Attr::SubAppId, Value::from(app_id)),
                    TxOp::Add(ERef::Temp(1), Attr::SubSessionId, Value::Uuid(session_id.get())),
                    TxOp::Add(ERef::Temp(1), Attr::SubInstaqlQuery, instaql.clone()),
                    TxOp::add(ERef::Temp(1), Attr::SubVersion, version),
                    TxOp::AddRef(ERef::Temp(1), Attr::SubDatalogQuery, entry),
                ]);
                Ok(ops)
            })])
            .map(drop)
    }

    /// Replace the cache entry's topics with the refined set computed
    /// from the actual result. A no-op when the entry was already
    /// invalidated out from under the evaluation.
    pub fn record_datalog_query_finish(
        &self,
        ctx: &InstaqlContext,
        datalog_query: &QueryDoc,
        result: DatalogResult,
    ) -> Result<()> {
        let pair = cache_pair(ctx.app_id, datalog_query);
        let report = self
            .inner()
            .transact("record-datalog-query-finish", vec![TxOp::call(move |db| {
                Ok(match db.resolve(&Lookup::Unique(Attr::DatalogAppQuery, pair.clone())) {
                    Some(e) => vec![TxOp::Add(
                        ERef::Id(e),
                        Attr::DatalogTopics,
                        Value::Topics(result.topics.into()),
                    )],
                    None => vec![],
                })
            })])?;
        debug!(
            target: "liveq.datalog",
            app_id = %ctx.app_id,
            refined = !report.tx_data.is_empty(),
            "datalog query finished"
        );
        Ok(())
    }
}

/// The orphan sweep: retract every datalog cache entry no subscription
/// references any more. Composes as a transaction function so it
/// observes the retractions earlier ops of the same transaction made.
pub(crate) fn clean_stale_datalog_op() -> TxOp {
    TxOp::call(|db: &Db| {
        let mut ops = Vec::new();
        for datom in db.datoms(Index::Eav, Attr::DatalogAppId) {
            if db.referencing(datom.e).next().is_none() {
                ops.push(TxOp::RetractEntity(ERef::Id(datom.e)));
            }
        }
        Ok(ops)
    })
}
