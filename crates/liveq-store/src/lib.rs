//! Schema-aware indexed in-memory entity store.
//!
//! The store holds small entities with referential links in a single
//! indexed state: an EAV map per entity plus an AVE index for every
//! attribute declared indexed or unique, with derived composite tuple
//! attributes for atomic find-or-create by compound key.
//!
//! Writes flow through one serialized transaction path and publish an
//! immutable [`Db`] snapshot; readers load the current snapshot
//! wait-free and never observe a partial transaction. Transaction
//! submissions compose plain ops with transaction functions that run
//! against the staged intermediate state.

pub mod db;
pub mod query;
pub mod schema;
pub mod tx;

pub use db::{Datom, Db, EntityView, Index, Lookup};
pub use query::{Bindings, Clause, Term, Var, query};
pub use schema::{Attr, AttrSpec, ValueType};
pub use tx::{ERef, Store, TxDatom, TxFn, TxOp, TxReport};
