//! Foundation types for the liveq reactive query store.
//!
//! This crate defines the cross-cutting types shared by the entity store
//! and the reactive layer: identifier newtypes, the dynamically-typed
//! attribute [`Value`], canonical hashed query documents, opaque runtime
//! handles, and the topic model with its pure intersection matcher.
//!
//! Nothing in this crate performs I/O or holds locks; everything is a
//! plain value with a total order suitable for use as an index key.

pub mod doc;
pub mod handle;
pub mod id;
pub mod topic;
pub mod value;

pub use doc::QueryDoc;
pub use handle::OpaqueHandle;
pub use id::{AppId, EntityId, InvalidEntityId, SessionId, TxId};
pub use topic::{
    CmpOp, Topic, TopicCmp, TopicPart, like_match, match_part, match_topic, topics_intersect,
};
pub use value::Value;
