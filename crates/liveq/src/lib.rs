//! Reactive query store for a realtime database gateway.
//!
//! The store tracks what each connected client session is subscribed
//! to, caches the datalog query results those subscriptions share, and
//! — on every committed mutation — computes the minimal set of sessions
//! whose results may have changed.
//!
//! Four concerns share one indexed state (session → instaql query →
//! datalog query → topics), so they live behind one handle:
//!
//! - **caching**: datalog results are deduplicated across sessions with
//!   a single-flight guarantee ([`ReactiveStore::swap_datalog_cache_delay`]);
//! - **novelty detection**: result hashes decide whether a recomputed
//!   payload is actually new ([`ReactiveStore::add_instaql_query`]);
//! - **invalidation**: a mutation's topics select the affected cache
//!   entries and sessions without scanning all subscriptions
//!   ([`ReactiveStore::mark_stale_topics`]);
//! - **session metadata**: sockets, auth, loaders
//!   ([`ReactiveStore::add_socket`] and friends).
//!
//! Everything is in-memory: a process restart loses all state and
//! clients resubscribe.

pub mod datalog;
pub mod invalidation;
pub mod session;
pub mod socket;
pub mod store;
pub mod subscription;

pub use datalog::DatalogResult;
pub use session::{Auth, SessionProps, UserRecord};
pub use socket::{DroppedEventsSnapshot, Socket, dropped_events_snapshot, reset_dropped_events};
pub use store::ReactiveStore;
pub use subscription::{AddQueryResult, InstaqlContext, ReturnType, StaleQuery};

pub use liveq_error::{LiveqError, Result};
pub use liveq_store::{Db, TxReport};
pub use liveq_types::{
    AppId, CmpOp, OpaqueHandle, QueryDoc, SessionId, Topic, TopicCmp, TopicPart, TxId, Value,
};
