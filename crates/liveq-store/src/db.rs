//! Immutable database snapshots.
//!
//! A [`Db`] is a point-in-time value of the whole store: the
//! entity-attribute-value map plus the attribute-value-entity index for
//! every indexed attribute. Snapshots share structure through `Arc`s,
//! so cloning one is a handful of pointer bumps; the write path in
//! [`crate::tx`] clones-on-write only the maps it touches.
//!
//! All lookups here are read-only and lock-free. A reader holding a
//! snapshot never observes a transaction scheduled after it took the
//! snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use liveq_types::{EntityId, Value};

use crate::schema::Attr;

pub(crate) type EntityAttrs = Arc<BTreeMap<Attr, Value>>;
pub(crate) type AveEntry = Arc<BTreeMap<Value, BTreeSet<EntityId>>>;

/// One entity-attribute-value tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datom {
    pub e: EntityId,
    pub a: Attr,
    pub v: Value,
}

/// Which index to walk in [`Db::datoms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// Entity-attribute-value: every entity carrying the attribute.
    Eav,
    /// Attribute-value-entity: the inverted index (indexed attrs only).
    Ave,
}

/// Entity lookup key: a raw id or a unique attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(EntityId),
    Unique(Attr, Value),
}

impl From<EntityId> for Lookup {
    fn from(e: EntityId) -> Self {
        Self::Id(e)
    }
}

/// An immutable snapshot of the indexed store.
#[derive(Clone)]
pub struct Db {
    pub(crate) eav: Arc<BTreeMap<EntityId, EntityAttrs>>,
    pub(crate) ave: Arc<BTreeMap<Attr, AveEntry>>,
    pub(crate) next_eid: u64,
    pub(crate) basis: u64,
}

impl Db {
    pub(crate) fn empty() -> Self {
        Self {
            eav: Arc::new(BTreeMap::new()),
            ave: Arc::new(BTreeMap::new()),
            next_eid: 1,
            basis: 0,
        }
    }

    /// Transaction counter this snapshot reflects.
    #[must_use]
    pub fn basis(&self) -> u64 {
        self.basis
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.eav.len()
    }

    /// Resolve a lookup to an entity id, if the entity is live.
    #[must_use]
    pub fn resolve(&self, lookup: &Lookup) -> Option<EntityId> {
        match lookup {
            Lookup::Id(e) => self.eav.contains_key(e).then_some(*e),
            Lookup::Unique(attr, value) => {
                debug_assert!(attr.spec().unique, "lookup by non-unique {}", attr.name());
                self.ave
                    .get(attr)
                    .and_then(|idx| idx.get(value))
                    .and_then(|eids| eids.first().copied())
            }
        }
    }

    /// Fetch an entity by id or unique attribute value.
    #[must_use]
    pub fn entity(&self, lookup: impl Into<Lookup>) -> Option<EntityView<'_>> {
        let lookup = lookup.into();
        let id = self.resolve(&lookup)?;
        self.eav
            .get(&id)
            .map(|attrs| EntityView { id, attrs: attrs.as_ref() })
    }

    /// All entity ids holding `attr = value`, via the AVE index.
    pub fn lookup_all<'a>(
        &'a self,
        attr: Attr,
        value: &Value,
    ) -> impl Iterator<Item = EntityId> + 'a {
        debug_assert!(attr.spec().indexed, "AVE lookup on unindexed {}", attr.name());
        self.ave
            .get(&attr)
            .and_then(|idx| idx.get(value))
            .into_iter()
            .flat_map(|eids| eids.iter().copied())
    }

    /// Iterate `{e, a, v}` tuples for one attribute.
    ///
    /// `Eav` walks entities in id order; `Ave` walks the inverted index
    /// in value order (indexed attributes only — an unindexed attribute
    /// yields nothing there).
    pub fn datoms<'a>(&'a self, index: Index, attr: Attr) -> Box<dyn Iterator<Item = Datom> + 'a> {
        match index {
            Index::Eav => Box::new(self.eav.iter().filter_map(move |(e, attrs)| {
                attrs.get(&attr).map(|v| Datom { e: *e, a: attr, v: v.clone() })
            })),
            Index::Ave => {
                debug_assert!(attr.spec().indexed, "AVE walk on unindexed {}", attr.name());
                Box::new(self.ave.get(&attr).into_iter().flat_map(move |idx| {
                    idx.iter().flat_map(move |(v, eids)| {
                        eids.iter().map(move |e| Datom { e: *e, a: attr, v: v.clone() })
                    })
                }))
            }
        }
    }

    /// One attribute of one entity.
    #[must_use]
    pub fn get(&self, e: EntityId, attr: Attr) -> Option<&Value> {
        self.eav.get(&e).and_then(|attrs| attrs.get(&attr))
    }

    /// Entity ids referencing `target` through any reference attribute.
    /// The subscription graph is a DAG of depth two, so this AVE probe
    /// is the whole of reference GC.
    pub fn referencing<'a>(&'a self, target: EntityId) -> impl Iterator<Item = EntityId> + 'a {
        Attr::REFS
            .into_iter()
            .flat_map(move |attr| self.lookup_all(attr, &Value::Ref(target)))
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("basis", &self.basis)
            .field("entities", &self.eav.len())
            .finish_non_exhaustive()
    }
}

/// A borrowed view of one entity's attributes.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    id: EntityId,
    attrs: &'a BTreeMap<Attr, Value>,
}

impl<'a> EntityView<'a> {
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub fn get(&self, attr: Attr) -> Option<&'a Value> {
        self.attrs.get(&attr)
    }

    #[must_use]
    pub fn attrs(&self) -> impl Iterator<Item = (Attr, &'a Value)> + 'a {
        self.attrs.iter().map(|(a, v)| (*a, v))
    }

    pub fn get_int(&self, attr: Attr) -> Option<i64> {
        self.get(attr).and_then(Value::as_int)
    }

    pub fn get_bool(&self, attr: Attr) -> Option<bool> {
        self.get(attr).and_then(Value::as_bool)
    }

    pub fn get_text(&self, attr: Attr) -> Option<&'a str> {
        self.get(attr).and_then(Value::as_text)
    }

    pub fn get_uuid(&self, attr: Attr) -> Option<uuid::Uuid> {
        self.get(attr).and_then(Value::as_uuid)
    }

    pub fn get_ref(&self, attr: Attr) -> Option<EntityId> {
        self.get(attr).and_then(Value::as_ref_id)
    }
}
