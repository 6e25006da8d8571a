//! Mutation-driven invalidation.
//!
//! The mutation ingest hands the store `(app, tx id, topics)` for every
//! committed transaction. Candidate cache entries come from the AVE
//! index on the datalog app id — never a scan of all subscriptions —
//! and the topic matcher decides which of them the mutation can have
//! affected. Matched entries are evicted together with their
//! subscription edges, the instaql queries behind those edges go
//! stale, and the distinct session ids come back so the gateway can
//! schedule refreshes.

use std::collections::BTreeSet;
use std::sync::Arc;

use liveq_error::Result;
use liveq_store::{Attr, Db, ERef, Lookup, TxOp};
use liveq_types::{AppId, EntityId, SessionId, Topic, TxId, Value, topics_intersect};
use tracing::debug;

use crate::store::ReactiveStore;

impl ReactiveStore {
    /// Process one committed mutation: evict every datalog cache entry
    /// whose topics the mutation intersects, mark the instaql queries
    /// subscribed through them stale, fold `tx_id` into the app's
    /// `processed_tx_id` with `max`, and return the sessions to
    /// notify, all in one transaction.
    ///
    /// The affected-session set and the stale marks are computed on
    /// the pre-eviction state, since the eviction destroys the
    /// reference targets.
    pub fn mark_stale_topics(
        &self,
        app_id: AppId,
        tx_id: TxId,
        iv_topics: &[Topic],
    ) -> Result<(Arc<Db>, Vec<SessionId>)> {
        let topics = iv_topics.to_vec();
        let (report, (matched, sessions)) =
            self.inner().transact_with("mark-stale-topics", |db| {
                let matched = matching_cache_entries(db, app_id, &topics);

                let mut ops = Vec::new();
                let mut sessions = BTreeSet::new();
                for &entry in &matched {
                    for sub in db.lookup_all(Attr::SubDatalogQuery, &Value::Ref(entry)) {
                        if let Some(sid) = db.get(sub, Attr::SubSessionId) {
                            if let Some(uuid) = sid.as_uuid() {
                                sessions.insert(SessionId::new(uuid));
                            }
                            if let Some(qv) = db.get(sub, Attr::SubInstaqlQuery) {
                                let pair = Value::pair(sid, qv);
                                if let Some(iq) = db
                                    .resolve(&Lookup::Unique(Attr::InstaqlSessionQuery, pair))
                                {
                                    ops.push(TxOp::add(ERef::Id(iq), Attr::InstaqlStale, true));
                                }
                            }
                        }
                        // The edge goes with its cache entry, so no
                        // reference dangles after the eviction.
                        ops.push(TxOp::RetractEntity(ERef::Id(sub)));
                    }
                }

                ops.push(bump_processed_tx_op(app_id, tx_id));

                for &entry in &matched {
                    ops.push(TxOp::RetractEntity(ERef::Id(entry)));
                }

                let sessions: Vec<SessionId> = sessions.into_iter().collect();
                Ok((ops, (matched.len(), sessions)))
            })?;

        debug!(
            target: "liveq.invalidation",
            %app_id,
            %tx_id,
            evicted = matched,
            affected_sessions = sessions.len(),
            "topics marked stale"
        );
        Ok((report.db_after, sessions))
    }

    /// Highest transaction id processed for the app, if any.
    #[must_use]
    pub fn processed_tx_id(&self, app_id: AppId) -> Option<TxId> {
        let db = self.db();
        let entity = db.entity(Lookup::Unique(Attr::TxMetaAppId, Value::from(app_id)))?;
        let raw = entity.get_int(Attr::TxMetaProcessedTxId)?;
        u64::try_from(raw).ok().map(TxId::new)
    }
}

/// Datalog cache entries of the app whose topic set the invalidation
/// topics intersect.
fn matching_cache_entries(db: &Db, app_id: AppId, iv_topics: &[Topic]) -> Vec<EntityId> {
    db.lookup_all(Attr::DatalogAppId, &Value::from(app_id))
        .filter(|&entry| {
            db.get(entry, Attr::DatalogTopics)
                .and_then(Value::as_topics)
                .is_some_and(|coverage| topics_intersect(iv_topics, coverage))
        })
        .collect()
}

/// Fold `tx_id` into the app's `processed_tx_id` with `max`, creating
/// the metadata entity on first contact.
fn bump_processed_tx_op(app_id: AppId, tx_id: TxId) -> TxOp {
    TxOp::call(move |db| {
        let key = Value::from(app_id);
        let current = db
            .entity(Lookup::Unique(Attr::TxMetaAppId, key.clone()))
            .and_then(|e| e.get_int(Attr::TxMetaProcessedTxId))
            .unwrap_or(0);
        #[allow(clippy::cast_possible_wrap)]
        let incoming = tx_id.get() as i64;
        Ok(vec![TxOp::add(
            ERef::Upsert(Attr::TxMetaAppId, key),
            Attr::TxMetaProcessedTxId,
            current.max(incoming),
        )])
    })
}
