//! Dynamically-typed attribute values.
//!
//! Every datom in the entity store carries a [`Value`]. Values have a
//! total order (usable directly as an index key) arranged by sort
//! class, with integers and floats sharing the numeric class and
//! comparing numerically the way SQLite orders mixed affinities.
//!
//! `Eq`, `Ord` and `Hash` agree: `Int(1)` and `Float(1.0)` are the same
//! index key. Opaque handles compare by allocation identity.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use uuid::Uuid;

use crate::doc::QueryDoc;
use crate::handle::OpaqueHandle;
use crate::id::{AppId, EntityId, TxId};
use crate::topic::Topic;

/// A dynamically-typed attribute value.
#[derive(Debug, Clone)]
pub enum Value {
    /// A boolean flag (`stale?`).
    Bool(bool),
    /// A 64-bit signed integer (app ids, tx ids, versions).
    Int(i64),
    /// A 64-bit IEEE 754 floating-point number.
    Float(f64),
    /// A UTF-8 text string (result hashes, client versions).
    Text(String),
    /// An interned-style keyword (`:ea`, `:join-rows`).
    Keyword(Arc<str>),
    /// A UUID (session identities).
    Uuid(Uuid),
    /// A reference to another entity.
    Ref(EntityId),
    /// An opaque structured document (instaql / datalog queries).
    Json(QueryDoc),
    /// A list of topic patterns (datalog query coverage).
    Topics(Arc<[Topic]>),
    /// An opaque runtime object (socket, loader, delayed call).
    Handle(OpaqueHandle),
}

impl Value {
    /// Keyword constructor.
    #[must_use]
    pub fn keyword(name: &str) -> Self {
        Self::Keyword(Arc::from(name))
    }

    /// Pair value: a two-element composite used by derived unique
    /// tuple attributes. Encoded as a canonical JSON array of the two
    /// canonical member forms so it stays an ordinary index key.
    #[must_use]
    pub fn pair(a: &Value, b: &Value) -> Self {
        Self::Json(QueryDoc::new(serde_json::Value::Array(vec![
            a.surface(),
            b.surface(),
        ])))
    }

    /// Sort class. Cross-class comparisons order by this; Int and
    /// Float share the numeric class.
    const fn sort_class(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
            Self::Keyword(_) => 3,
            Self::Uuid(_) => 4,
            Self::Ref(_) => 5,
            Self::Json(_) => 6,
            Self::Topics(_) => 7,
            Self::Handle(_) => 8,
        }
    }

    /// Compare within the same sort class; `None` when the classes
    /// differ (the topic comparators refuse cross-class comparisons
    /// rather than falling back to the arbitrary total order).
    #[must_use]
    pub fn same_class_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.sort_class() == other.sort_class() {
            Some(self.cmp(other))
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            Self::Ref(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&QueryDoc> {
        match self {
            Self::Json(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_topics(&self) -> Option<&Arc<[Topic]>> {
        match self {
            Self::Topics(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&OpaqueHandle> {
        match self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// JSON surface for logging and canonical pair encoding. Keywords
    /// keep their leading-colon text form; handles render as their
    /// identity address.
    #[must_use]
    pub fn surface(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Keyword(k) => serde_json::Value::String(format!(":{k}")),
            Self::Uuid(u) => serde_json::Value::String(u.to_string()),
            Self::Ref(e) => serde_json::json!({ "$ref": e.get() }),
            Self::Json(d) => d.json().clone(),
            Self::Topics(ts) => {
                serde_json::Value::Array(ts.iter().map(Topic::surface).collect())
            }
            Self::Handle(h) => serde_json::json!({ "$handle": format!("{h:?}") }),
        }
    }
}

/// Numeric comparison between an integer and a float, exact for the
/// full i64 range (no precision loss above 2^53).
fn int_float_cmp(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        // NaN sorts above every number.
        return Ordering::Less;
    }
    // 2^63 as f64; every float >= it exceeds i64::MAX.
    if f >= 9_223_372_036_854_775_808.0 {
        return Ordering::Less;
    }
    if f < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }
    let ft = f.trunc();
    #[allow(clippy::cast_possible_truncation)]
    let fi = ft as i64;
    match i.cmp(&fi) {
        Ordering::Equal => {
            if f == ft {
                Ordering::Equal
            } else if f > ft {
                // positive fractional part: i == trunc(f) < f
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        other => other,
    }
}

fn float_cmp(a: f64, b: f64) -> Ordering {
    // Numeric where possible so -0.0 == 0.0 stays consistent with the
    // integer bridge. Every NaN (either sign) sorts above the numeric
    // range, NaNs among themselves by bit pattern.
    match (a.is_nan(), b.is_nan()) {
        (true, true) => a.total_cmp(&b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let (ca, cb) = (self.sort_class(), other.sort_class());
        if ca != cb {
            return ca.cmp(&cb);
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => float_cmp(*a, *b),
            (Self::Int(a), Self::Float(b)) => int_float_cmp(*a, *b),
            (Self::Float(a), Self::Int(b)) => int_float_cmp(*b, *a).reverse(),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Keyword(a), Self::Keyword(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Ref(a), Self::Ref(b)) => a.cmp(b),
            (Self::Json(a), Self::Json(b)) => a.cmp(b),
            (Self::Topics(a), Self::Topics(b)) => a.cmp(b),
            (Self::Handle(a), Self::Handle(b)) => a.cmp(b),
            // Same sort class is matched exhaustively above.
            _ => unreachable!("sort classes matched but variants did not"),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.sort_class());
        match self {
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => {
                // Keep hashing consistent with Int/Float equality:
                // integral floats in range hash as their integer.
                let t = f.trunc();
                if *f == t && (-9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0).contains(f)
                {
                    #[allow(clippy::cast_possible_truncation)]
                    (t as i64).hash(state);
                } else {
                    state.write_u8(0xFF);
                    f.to_bits().hash(state);
                }
            }
            Self::Text(s) => s.hash(state),
            Self::Keyword(k) => k.hash(state),
            Self::Uuid(u) => u.hash(state),
            Self::Ref(e) => e.hash(state),
            Self::Json(d) => d.hash(state),
            Self::Topics(ts) => ts.hash(state),
            Self::Handle(h) => h.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Keyword(k) => write!(f, ":{k}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Ref(e) => write!(f, "{e}"),
            Self::Json(d) => write!(f, "{d}"),
            Self::Topics(ts) => write!(f, "<{} topics>", ts.len()),
            Self::Handle(h) => write!(f, "{h:?}"),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.surface().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<EntityId> for Value {
    fn from(e: EntityId) -> Self {
        Self::Ref(e)
    }
}

impl From<QueryDoc> for Value {
    fn from(d: QueryDoc) -> Self {
        Self::Json(d)
    }
}

impl From<AppId> for Value {
    #[allow(clippy::cast_possible_wrap)]
    fn from(id: AppId) -> Self {
        Self::Int(id.get() as i64)
    }
}

impl From<TxId> for Value {
    #[allow(clippy::cast_possible_wrap)]
    fn from(id: TxId) -> Self {
        Self::Int(id.get() as i64)
    }
}

impl From<OpaqueHandle> for Value {
    fn from(h: OpaqueHandle) -> Self {
        Self::Handle(h)
    }
}

/// Build a value set for topic parts.
#[must_use]
pub fn value_set<I: IntoIterator<Item = Value>>(values: I) -> BTreeSet<Value> {
    values.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_bridge_is_consistent() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert!(Value::Int(1) < Value::Float(1.5));
        assert!(Value::Float(0.5) < Value::Int(1));
        // -0.0 and 0 collapse to one key.
        assert_eq!(Value::Float(-0.0), Value::Int(0));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn int_float_cmp_full_range() {
        assert_eq!(int_float_cmp(i64::MAX, 9_223_372_036_854_775_808.0), Ordering::Less);
        assert_eq!(int_float_cmp(i64::MIN, -9_223_372_036_854_775_808.0), Ordering::Equal);
        assert_eq!(int_float_cmp(0, f64::NAN), Ordering::Less);
        assert_eq!(int_float_cmp(-2, -2.5), Ordering::Greater);
        assert_eq!(int_float_cmp(2, 2.5), Ordering::Less);
    }

    #[test]
    fn nan_sorts_above_numbers() {
        assert!(Value::Float(f64::NAN) > Value::Int(i64::MAX));
        assert!(Value::Float(-f64::NAN) > Value::Float(f64::INFINITY));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn cross_class_order_is_stable() {
        assert!(Value::Bool(true) < Value::Int(0));
        assert!(Value::Int(i64::MAX) < Value::from("a"));
        assert!(Value::from("z") < Value::keyword("a"));
    }

    #[test]
    fn same_class_cmp_refuses_cross_class() {
        assert!(Value::Int(3).same_class_cmp(&Value::from("3")).is_none());
        assert_eq!(
            Value::Int(3).same_class_cmp(&Value::Float(3.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn hash_agrees_with_eq_for_numerics() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Int(4));
        assert!(set.contains(&Value::Float(4.0)));
        assert!(!set.contains(&Value::Float(4.5)));
    }

    #[test]
    fn keywords_are_not_text() {
        assert_ne!(Value::keyword("title"), Value::from("title"));
    }
}
