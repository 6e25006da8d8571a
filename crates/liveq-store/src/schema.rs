//! Attribute schema.
//!
//! The store's schema is closed: every attribute is a variant of
//! [`Attr`] with a static [`AttrSpec`] declaring its value type and
//! index treatment. Five entity shapes live in the store — sessions,
//! per-app transaction metadata, instaql queries, cached datalog
//! queries, and the subscription edges joining them.
//!
//! Composite attributes (`InstaqlSessionQuery`, `DatalogAppQuery`) are
//! *derived*: the transaction engine asserts them whenever both
//! underlying attributes are present on an entity and retracts them
//! when either side goes away. They carry unique-identity semantics,
//! which is what makes upsert-by-compound-key atomic.

use liveq_types::Value;

/// Every attribute the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attr {
    // Session
    SessionId,
    SessionSocket,
    SessionAuth,
    SessionCreator,
    SessionVersions,
    SessionDatalogLoader,
    // TxMeta
    TxMetaAppId,
    TxMetaProcessedTxId,
    // InstaqlQuery
    InstaqlSessionId,
    InstaqlQuery,
    InstaqlSessionQuery,
    InstaqlStale,
    InstaqlVersion,
    InstaqlHash,
    InstaqlReturnType,
    // DatalogQuery
    DatalogAppId,
    DatalogQuery,
    DatalogAppQuery,
    DatalogDelay,
    DatalogTopics,
    // Subscription
    SubAppId,
    SubSessionId,
    SubInstaqlQuery,
    SubDatalogQuery,
    SubVersion,
}

/// Value type an attribute accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Text,
    Keyword,
    Uuid,
    Ref,
    Json,
    Topics,
    Handle,
    /// Derived composite pair, encoded as a canonical JSON array.
    Tuple,
}

impl ValueType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Text => "text",
            Self::Keyword => "keyword",
            Self::Uuid => "uuid",
            Self::Ref => "ref",
            Self::Json => "json",
            Self::Topics => "topics",
            Self::Handle => "handle",
            Self::Tuple => "tuple",
        }
    }

    /// Whether `value` inhabits this type.
    #[must_use]
    pub fn admits(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Bool, Value::Bool(_))
                | (Self::Int, Value::Int(_))
                | (Self::Text, Value::Text(_))
                | (Self::Keyword, Value::Keyword(_))
                | (Self::Uuid, Value::Uuid(_))
                | (Self::Ref, Value::Ref(_))
                | (Self::Json, Value::Json(_))
                | (Self::Tuple, Value::Json(_))
                | (Self::Topics, Value::Topics(_))
                | (Self::Handle, Value::Handle(_))
        )
    }
}

/// Static description of one attribute.
#[derive(Debug, Clone, Copy)]
pub struct AttrSpec {
    /// Namespaced name, used in spans and error messages.
    pub name: &'static str,
    pub value_type: ValueType,
    /// Maintained in the AVE index.
    pub indexed: bool,
    /// Unique identity: at most one live entity per value, upsertable.
    pub unique: bool,
    /// Derived from two underlying attributes.
    pub composite_of: Option<(Attr, Attr)>,
}

impl AttrSpec {
    pub const fn is_ref(&self) -> bool {
        matches!(self.value_type, ValueType::Ref)
    }
}

macro_rules! spec {
    ($name:literal, $vt:ident) => {
        AttrSpec {
            name: $name,
            value_type: ValueType::$vt,
            indexed: false,
            unique: false,
            composite_of: None,
        }
    };
    ($name:literal, $vt:ident, indexed) => {
        AttrSpec {
            name: $name,
            value_type: ValueType::$vt,
            indexed: true,
            unique: false,
            composite_of: None,
        }
    };
    ($name:literal, $vt:ident, unique) => {
        AttrSpec {
            name: $name,
            value_type: ValueType::$vt,
            indexed: true,
            unique: true,
            composite_of: None,
        }
    };
    ($name:literal, composite($a:ident, $b:ident)) => {
        AttrSpec {
            name: $name,
            value_type: ValueType::Tuple,
            indexed: true,
            unique: true,
            composite_of: Some((Attr::$a, Attr::$b)),
        }
    };
}

impl Attr {
    /// The derived composite attributes, in retraction-sweep order.
    pub const COMPOSITES: [Attr; 2] = [Attr::InstaqlSessionQuery, Attr::DatalogAppQuery];

    /// The reference-typed attributes (incoming-reference scans).
    pub const REFS: [Attr; 1] = [Attr::SubDatalogQuery];

    #[must_use]
    pub const fn spec(self) -> AttrSpec {
        match self {
            Self::SessionId => spec!("session/id", Uuid, unique),
            Self::SessionSocket => spec!("session/socket", Handle),
            Self::SessionAuth => spec!("session/auth", Json),
            Self::SessionCreator => spec!("session/creator", Json),
            Self::SessionVersions => spec!("session/versions", Json),
            Self::SessionDatalogLoader => spec!("session/datalog-loader", Handle),
            Self::TxMetaAppId => spec!("tx-meta/app-id", Int, unique),
            Self::TxMetaProcessedTxId => spec!("tx-meta/processed-tx-id", Int),
            Self::InstaqlSessionId => spec!("instaql/session-id", Uuid, indexed),
            Self::InstaqlQuery => spec!("instaql/query", Json, indexed),
            Self::InstaqlSessionQuery => {
                spec!("instaql/session-id+query", composite(InstaqlSessionId, InstaqlQuery))
            }
            Self::InstaqlStale => spec!("instaql/stale?", Bool),
            Self::InstaqlVersion => spec!("instaql/version", Int),
            Self::InstaqlHash => spec!("instaql/hash", Text),
            Self::InstaqlReturnType => spec!("instaql/return-type", Keyword),
            Self::DatalogAppId => spec!("datalog/app-id", Int, indexed),
            Self::DatalogQuery => spec!("datalog/query", Json),
            Self::DatalogAppQuery => {
                spec!("datalog/app-id+query", composite(DatalogAppId, DatalogQuery))
            }
            Self::DatalogDelay => spec!("datalog/delayed-call", Handle),
            Self::DatalogTopics => spec!("datalog/topics", Topics),
            Self::SubAppId => spec!("subscription/app-id", Int),
            Self::SubSessionId => spec!("subscription/session-id", Uuid, indexed),
            Self::SubInstaqlQuery => spec!("subscription/instaql-query", Json, indexed),
            Self::SubDatalogQuery => spec!("subscription/datalog-query", Ref, indexed),
            Self::SubVersion => spec!("subscription/v", Int),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.spec().name
    }

    /// The composite attribute this attribute underlies, if any.
    #[must_use]
    pub fn composite_owner(self) -> Option<Attr> {
        Self::COMPOSITES
            .into_iter()
            .find(|c| match c.spec().composite_of {
                Some((a, b)) => a == self || b == self,
                None => false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveq_types::{OpaqueHandle, QueryDoc};
    use serde_json::json;

    #[test]
    fn unique_implies_indexed() {
        for attr in [
            Attr::SessionId,
            Attr::TxMetaAppId,
            Attr::InstaqlSessionQuery,
            Attr::DatalogAppQuery,
        ] {
            let spec = attr.spec();
            assert!(spec.unique && spec.indexed, "{}", spec.name);
        }
    }

    #[test]
    fn composite_wiring() {
        assert_eq!(
            Attr::InstaqlSessionId.composite_owner(),
            Some(Attr::InstaqlSessionQuery)
        );
        assert_eq!(
            Attr::DatalogQuery.composite_owner(),
            Some(Attr::DatalogAppQuery)
        );
        assert_eq!(Attr::SubVersion.composite_owner(), None);
        assert_eq!(
            Attr::InstaqlSessionQuery.spec().composite_of,
            Some((Attr::InstaqlSessionId, Attr::InstaqlQuery))
        );
    }

    #[test]
    fn value_types_admit() {
        assert!(Attr::InstaqlStale.spec().value_type.admits(&Value::Bool(true)));
        assert!(!Attr::InstaqlStale.spec().value_type.admits(&Value::Int(1)));
        assert!(
            Attr::SessionSocket
                .spec()
                .value_type
                .admits(&Value::Handle(OpaqueHandle::new(())))
        );
        assert!(
            Attr::InstaqlQuery
                .spec()
                .value_type
                .admits(&Value::Json(QueryDoc::new(json!({"todos": {}}))))
        );
    }

    #[test]
    fn ref_attrs_listed() {
        for attr in Attr::REFS {
            assert!(attr.spec().is_ref(), "{}", attr.name());
        }
        assert!(!Attr::SubSessionId.spec().is_ref());
    }
}
