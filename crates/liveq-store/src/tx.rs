//! The serialized write path.
//!
//! Every mutation of the store is a single submission of [`TxOp`]s.
//! Ops apply in order against a staging copy of the current snapshot;
//! a [`TxOp::Call`] runs a transaction function against the *staged*
//! state (earlier ops of the same submission already visible), which is
//! what lets a compound operation like "retract superseded
//! subscriptions, then sweep the orphans that produced" compose out of
//! independent pieces.
//!
//! A submission either commits fully — publishing a fresh snapshot —
//! or aborts with state unchanged. Writers serialize on one mutex;
//! readers keep loading the previous snapshot until the commit swaps
//! the published pointer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use liveq_error::{LiveqError, Result};
use liveq_types::{EntityId, SessionId, Value};
use parking_lot::{Mutex, RwLock};

use crate::db::{Db, Lookup};
use crate::schema::Attr;

/// Entity reference within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ERef {
    /// An existing entity. Fails if it is not live.
    Id(EntityId),
    /// A fresh entity; the same temp id resolves to the same entity
    /// throughout one submission.
    Temp(u32),
    /// Resolve by unique attribute value; fails if absent.
    Lookup(Attr, Value),
    /// Resolve by unique attribute value; creates (and asserts the
    /// identity, unless the attribute is derived) if absent.
    Upsert(Attr, Value),
}

/// A transaction function: runs against the staged database and
/// returns further ops to apply.
pub type TxFn = Box<dyn FnOnce(&Db) -> Result<Vec<TxOp>> + Send>;

/// One transaction operation.
pub enum TxOp {
    /// Assert `entity.attr = value` (cardinality one: replaces).
    Add(ERef, Attr, Value),
    /// Assert a reference attribute, resolving the target reference
    /// within the same submission.
    AddRef(ERef, Attr, ERef),
    /// Retract the attribute whatever its value. No-op if absent.
    Retract(ERef, Attr),
    /// Retract the attribute only if it currently holds `value`.
    RetractValue(ERef, Attr, Value),
    /// Retract every datom of the entity. Fails while other live
    /// entities still reference it.
    RetractEntity(ERef),
    /// Transaction function over the staged state.
    Call(TxFn),
}

impl TxOp {
    /// Convenience `Add` with value coercion.
    pub fn add(e: ERef, a: Attr, v: impl Into<Value>) -> Self {
        Self::Add(e, a, v.into())
    }

    /// Convenience `Call` from a closure.
    pub fn call(f: impl FnOnce(&Db) -> Result<Vec<TxOp>> + Send + 'static) -> Self {
        Self::Call(Box::new(f))
    }
}

impl fmt::Debug for TxOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(e, a, v) => write!(f, "Add({e:?}, {}, {v})", a.name()),
            Self::AddRef(e, a, t) => write!(f, "AddRef({e:?}, {}, {t:?})", a.name()),
            Self::Retract(e, a) => write!(f, "Retract({e:?}, {})", a.name()),
            Self::RetractValue(e, a, v) => write!(f, "RetractValue({e:?}, {}, {v})", a.name()),
            Self::RetractEntity(e) => write!(f, "RetractEntity({e:?})"),
            Self::Call(_) => f.write_str("Call(..)"),
        }
    }
}

/// One datom change in a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDatom {
    pub e: EntityId,
    pub a: Attr,
    pub v: Value,
    pub added: bool,
}

/// The result of a committed transaction.
#[derive(Debug)]
pub struct TxReport {
    /// Snapshot the transaction was applied to.
    pub db_before: Arc<Db>,
    /// Snapshot the transaction produced.
    pub db_after: Arc<Db>,
    /// Datom changes, in application order (retractions before the
    /// assertion that replaced them).
    pub tx_data: Vec<TxDatom>,
}

/// The store handle: one published snapshot, one serialized write path.
///
/// Lifecycle is `Store::new()` → use → drop; a restart is a fresh
/// `new()` with every index empty.
pub struct Store {
    current: RwLock<Arc<Db>>,
    write: Mutex<()>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Db::empty())),
            write: Mutex::new(()),
        }
    }

    /// Wait-free snapshot of the current database.
    #[must_use]
    pub fn db(&self) -> Arc<Db> {
        self.current.read().clone()
    }

    /// Apply `ops` atomically under a named tracing span.
    pub fn transact(&self, tag: &'static str, ops: Vec<TxOp>) -> Result<TxReport> {
        self.transact_with(tag, move |_| Ok((ops, ())))
            .map(|(report, ())| report)
    }

    /// Run `f` against the pre-transaction state under the write lock,
    /// apply the ops it returns, and carry its second result out.
    ///
    /// The closure's reads and the ops' effects are a single atomic
    /// unit with respect to every other transaction.
    pub fn transact_with<R>(
        &self,
        tag: &'static str,
        f: impl FnOnce(&Db) -> Result<(Vec<TxOp>, R)>,
    ) -> Result<(TxReport, R)> {
        let _write = self.write.lock();
        let db_before = self.db();
        let span =
            tracing::debug_span!(target: "liveq.store", "transact", tag, basis = db_before.basis());
        let _guard = span.entered();

        let mut staging = Staging::new((*db_before).clone());
        let (ops, out) = f(&staging.db).map_err(|err| abort(tag, err))?;
        staging.apply(ops).map_err(|err| abort(tag, err))?;

        staging.db.basis += 1;
        let Staging { db, tx_data, .. } = staging;
        let db_after = Arc::new(db);
        *self.current.write() = Arc::clone(&db_after);
        tracing::trace!(target: "liveq.store", datoms = tx_data.len(), "committed");

        Ok((
            TxReport {
                db_before,
                db_after,
                tx_data,
            },
            out,
        ))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn abort(tag: &'static str, err: LiveqError) -> LiveqError {
    tracing::debug!(target: "liveq.store", tag, %err, "transaction aborted");
    err
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

struct Staging {
    db: Db,
    temps: BTreeMap<u32, EntityId>,
    upserts: BTreeMap<(Attr, Value), EntityId>,
    tx_data: Vec<TxDatom>,
}

impl Staging {
    fn new(db: Db) -> Self {
        Self {
            db,
            temps: BTreeMap::new(),
            upserts: BTreeMap::new(),
            tx_data: Vec::new(),
        }
    }

    fn apply(&mut self, ops: Vec<TxOp>) -> Result<()> {
        for op in ops {
            match op {
                TxOp::Add(er, a, v) => {
                    let e = self.resolve(er)?;
                    self.add(e, a, v)?;
                }
                TxOp::AddRef(er, a, target) => {
                    let e = self.resolve(er)?;
                    let t = self.resolve(target)?;
                    self.add(e, a, Value::Ref(t))?;
                }
                TxOp::Retract(er, a) => {
                    let e = self.resolve(er)?;
                    self.retract(e, a);
                }
                TxOp::RetractValue(er, a, v) => {
                    let e = self.resolve(er)?;
                    if self.db.get(e, a) == Some(&v) {
                        self.retract(e, a);
                    }
                }
                TxOp::RetractEntity(er) => {
                    let e = self.resolve(er)?;
                    self.retract_entity(e)?;
                }
                TxOp::Call(f) => {
                    let more = f(&self.db)?;
                    self.apply(more)?;
                }
            }
        }
        Ok(())
    }

    fn alloc(&mut self) -> EntityId {
        let raw = self.db.next_eid;
        self.db.next_eid += 1;
        // next_eid starts at 1 and only grows
        EntityId::new(raw).expect("entity id watermark is nonzero")
    }

    fn resolve(&mut self, eref: ERef) -> Result<EntityId> {
        match eref {
            ERef::Id(e) => {
                if self.db.eav.contains_key(&e) {
                    Ok(e)
                } else {
                    Err(LiveqError::MissingEntity { entity: e })
                }
            }
            ERef::Temp(t) => {
                if let Some(e) = self.temps.get(&t) {
                    return Ok(*e);
                }
                let e = self.alloc();
                self.temps.insert(t, e);
                Ok(e)
            }
            ERef::Lookup(attr, value) => self
                .db
                .resolve(&Lookup::Unique(attr, value.clone()))
                .ok_or_else(|| lookup_failure(attr, &value)),
            ERef::Upsert(attr, value) => {
                if let Some(e) = self.db.resolve(&Lookup::Unique(attr, value.clone())) {
                    return Ok(e);
                }
                if let Some(e) = self.upserts.get(&(attr, value.clone())) {
                    return Ok(*e);
                }
                let e = self.alloc();
                self.upserts.insert((attr, value.clone()), e);
                // Derived composites are asserted by the engine once
                // both underlying attributes land.
                if attr.spec().composite_of.is_none() {
                    self.add(e, attr, value)?;
                }
                Ok(e)
            }
        }
    }

    fn add(&mut self, e: EntityId, a: Attr, v: Value) -> Result<()> {
        let spec = a.spec();
        if !spec.value_type.admits(&v) {
            return Err(LiveqError::TypeMismatch {
                attr: spec.name,
                expected: spec.value_type.name(),
                actual: value_kind(&v),
            });
        }
        if let Value::Ref(target) = &v {
            if !self.db.eav.contains_key(target) {
                return Err(LiveqError::DanglingReference {
                    attr: spec.name,
                    entity: *target,
                });
            }
        }
        if spec.unique {
            if let Some(existing) = self.db.resolve(&Lookup::Unique(a, v.clone())) {
                if existing != e {
                    return Err(LiveqError::UniqueViolation {
                        attr: spec.name,
                        value: v.to_string(),
                    });
                }
            }
        }

        let prev = self.db.get(e, a).cloned();
        if prev.as_ref() == Some(&v) {
            return Ok(());
        }

        let eav = Arc::make_mut(&mut self.db.eav);
        let attrs = Arc::make_mut(eav.entry(e).or_insert_with(|| Arc::new(BTreeMap::new())));
        attrs.insert(a, v.clone());

        if spec.indexed {
            if let Some(old) = &prev {
                self.ave_remove(a, old, e);
            }
            self.ave_insert(a, &v, e);
        }

        if let Some(old) = prev {
            self.tx_data.push(TxDatom { e, a, v: old, added: false });
        }
        self.tx_data.push(TxDatom { e, a, v, added: true });
        self.refresh_composite(e, a)
    }

    fn retract(&mut self, e: EntityId, a: Attr) {
        let Some(prev) = self.db.get(e, a).cloned() else {
            return;
        };

        let eav = Arc::make_mut(&mut self.db.eav);
        let now_empty = match eav.get_mut(&e) {
            Some(attrs) => {
                let attrs = Arc::make_mut(attrs);
                attrs.remove(&a);
                attrs.is_empty()
            }
            None => false,
        };
        if now_empty {
            eav.remove(&e);
        }

        if a.spec().indexed {
            self.ave_remove(a, &prev, e);
        }
        self.tx_data.push(TxDatom { e, a, v: prev, added: false });

        // Retracting an underlying attribute takes the derived
        // composite with it; the composite itself derives nothing.
        if a.composite_owner().is_some() {
            // refresh never fails on the retraction side
            let _ = self.refresh_composite(e, a);
        }
    }

    fn retract_entity(&mut self, e: EntityId) -> Result<()> {
        for attr in Attr::REFS {
            if self.db.lookup_all(attr, &Value::Ref(e)).next().is_some() {
                return Err(LiveqError::DanglingReference {
                    attr: attr.name(),
                    entity: e,
                });
            }
        }
        let attrs: Vec<Attr> = self
            .db
            .eav
            .get(&e)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        for a in attrs {
            self.retract(e, a);
        }
        Ok(())
    }

    /// Re-derive the composite an underlying attribute belongs to:
    /// assert the pair when both sides are present, retract it when
    /// either side is gone.
    fn refresh_composite(&mut self, e: EntityId, changed: Attr) -> Result<()> {
        let Some(comp) = changed.composite_owner() else {
            return Ok(());
        };
        let Some((ua, ub)) = comp.spec().composite_of else {
            return Ok(());
        };
        let pair = match (self.db.get(e, ua), self.db.get(e, ub)) {
            (Some(x), Some(y)) => Some(Value::pair(x, y)),
            _ => None,
        };
        match pair {
            Some(p) => self.add(e, comp, p),
            None => {
                self.retract(e, comp);
                Ok(())
            }
        }
    }

    fn ave_insert(&mut self, a: Attr, v: &Value, e: EntityId) {
        let ave = Arc::make_mut(&mut self.db.ave);
        let idx = Arc::make_mut(
            ave.entry(a)
                .or_insert_with(|| Arc::new(BTreeMap::new())),
        );
        idx.entry(v.clone()).or_default().insert(e);
    }

    fn ave_remove(&mut self, a: Attr, v: &Value, e: EntityId) {
        let ave = Arc::make_mut(&mut self.db.ave);
        if let Some(entry) = ave.get_mut(&a) {
            let idx = Arc::make_mut(entry);
            if let Some(set) = idx.get_mut(v) {
                set.remove(&e);
                if set.is_empty() {
                    idx.remove(v);
                }
            }
        }
    }
}

fn lookup_failure(attr: Attr, value: &Value) -> LiveqError {
    // A failed lookup keyed by the session identity is a request-level
    // condition, not a store bug.
    if attr == Attr::SessionId {
        if let Some(uuid) = value.as_uuid() {
            return LiveqError::SessionMissing {
                session_id: SessionId::new(uuid),
            };
        }
    }
    LiveqError::MissingIdentity {
        attr: attr.name(),
        value: value.to_string(),
    }
}

const fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Keyword(_) => "keyword",
        Value::Uuid(_) => "uuid",
        Value::Ref(_) => "ref",
        Value::Json(_) => "json",
        Value::Topics(_) => "topics",
        Value::Handle(_) => "handle",
    }
}
