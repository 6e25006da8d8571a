//! Topic patterns and the intersection matcher.
//!
//! A topic is a fixed-arity tuple describing which datoms a datalog
//! query read. The mutation ingest produces *invalidation* topics
//! (concrete: scalars, id sets, wildcards); cached datalog queries hold
//! *coverage* topics that may additionally carry comparator and
//! negation parts. [`topics_intersect`] decides whether a mutation can
//! possibly change a cached result — it is the inner loop of
//! invalidation, so matching is pure, deterministic, and
//! allocation-light.
//!
//! The comparator/negation forms are closed tagged variants; the
//! original wire shapes (`{"$comparator": ...}`, `{"$not": ...}`) have
//! no unknown-map escape hatch here.

use std::collections::BTreeSet;
use std::fmt;

use smallvec::SmallVec;

use crate::value::Value;

/// Comparator operators usable in a coverage topic part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
    /// Anchored pattern match: `_` is any one char, `%` any run.
    Like,
}

impl CmpOp {
    const fn surface_name(self) -> &'static str {
        match self {
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Like => "$like",
        }
    }
}

/// A comparator part: `{$comparator: {op, value}}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicCmp {
    pub op: CmpOp,
    pub value: Value,
}

impl TopicCmp {
    /// Whether a concrete value satisfies this comparator.
    ///
    /// Ordering comparators only apply within one sort class (plus the
    /// int/float numeric bridge); `Like` only to text against a text
    /// pattern. Everything else is a non-match.
    #[must_use]
    pub fn matches(&self, candidate: &Value) -> bool {
        if self.op == CmpOp::Like {
            return match (candidate, &self.value) {
                (Value::Text(s), Value::Text(pattern)) => like_match(pattern, s),
                _ => false,
            };
        }
        let Some(ord) = candidate.same_class_cmp(&self.value) else {
            return false;
        };
        match self.op {
            CmpOp::Gt => ord.is_gt(),
            CmpOp::Gte => ord.is_ge(),
            CmpOp::Lt => ord.is_lt(),
            CmpOp::Lte => ord.is_le(),
            CmpOp::Like => unreachable!("handled above"),
        }
    }
}

/// One position of a topic tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TopicPart {
    /// An exact scalar (index keywords, attribute ids).
    Scalar(Value),
    /// Matches anything.
    Wildcard,
    /// A set of concrete values; matches on intersection.
    Set(BTreeSet<Value>),
    /// Comparator constraint (coverage side only).
    Cmp(TopicCmp),
    /// Negation: matches any value other than the given one.
    Not(Value),
}

impl TopicPart {
    /// Exact-scalar part.
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::Scalar(value.into())
    }

    /// Keyword scalar part (`:ea`, `:title`, ...).
    #[must_use]
    pub fn keyword(name: &str) -> Self {
        Self::Scalar(Value::keyword(name))
    }

    /// Value-set part.
    pub fn set<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Set(values.into_iter().map(Into::into).collect())
    }

    pub fn gt(value: impl Into<Value>) -> Self {
        Self::Cmp(TopicCmp { op: CmpOp::Gt, value: value.into() })
    }

    pub fn gte(value: impl Into<Value>) -> Self {
        Self::Cmp(TopicCmp { op: CmpOp::Gte, value: value.into() })
    }

    pub fn lt(value: impl Into<Value>) -> Self {
        Self::Cmp(TopicCmp { op: CmpOp::Lt, value: value.into() })
    }

    pub fn lte(value: impl Into<Value>) -> Self {
        Self::Cmp(TopicCmp { op: CmpOp::Lte, value: value.into() })
    }

    pub fn like(pattern: &str) -> Self {
        Self::Cmp(TopicCmp { op: CmpOp::Like, value: Value::from(pattern) })
    }

    pub fn not(value: impl Into<Value>) -> Self {
        Self::Not(value.into())
    }

    fn surface(&self) -> serde_json::Value {
        match self {
            Self::Scalar(v) => v.surface(),
            Self::Wildcard => serde_json::Value::String("_".to_owned()),
            Self::Set(s) => serde_json::Value::Array(s.iter().map(Value::surface).collect()),
            Self::Cmp(c) => serde_json::json!({
                "$comparator": { "op": c.op.surface_name(), "value": c.value.surface() }
            }),
            Self::Not(v) => serde_json::json!({ "$not": v.surface() }),
        }
    }
}

/// A fixed-arity tuple of parts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Topic(SmallVec<[TopicPart; 4]>);

impl Topic {
    #[must_use]
    pub fn new(parts: impl IntoIterator<Item = TopicPart>) -> Self {
        Self(parts.into_iter().collect())
    }

    #[must_use]
    pub fn parts(&self) -> &[TopicPart] {
        &self.0
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// JSON surface form for logging and diagnostics.
    #[must_use]
    pub fn surface(&self) -> serde_json::Value {
        serde_json::Value::Array(self.0.iter().map(TopicPart::surface).collect())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.surface())
    }
}

impl FromIterator<TopicPart> for Topic {
    fn from_iter<I: IntoIterator<Item = TopicPart>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl serde::Serialize for Topic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.surface().serialize(serializer)
    }
}

/// Match one invalidation part against one coverage part.
///
/// Wildcards win on either side before anything else; this is the
/// precedence the rest of the table assumes. Comparator and negation
/// parts on the invalidation side never occur (mutation topics are
/// concrete) and never match.
#[must_use]
pub fn match_part(iv: &TopicPart, dq: &TopicPart) -> bool {
    use TopicPart::{Cmp, Not, Scalar, Set, Wildcard};
    match (iv, dq) {
        (Wildcard, _) | (_, Wildcard) => true,
        (Scalar(a), Scalar(b)) => a == b,
        (Scalar(_), Set(_) | Cmp(_) | Not(_)) => false,
        (Set(s), Scalar(k)) => s.contains(k),
        (Set(s), Set(t)) => sets_intersect(s, t),
        (Set(s), Cmp(c)) => s.iter().any(|v| c.matches(v)),
        (Set(s), Not(x)) => s.iter().any(|v| v != x),
        (Cmp(_) | Not(_), _) => false,
    }
}

/// Match full topics pairwise. Unequal arities never match.
#[must_use]
pub fn match_topic(iv: &Topic, dq: &Topic) -> bool {
    iv.arity() == dq.arity()
        && iv
            .parts()
            .iter()
            .zip(dq.parts())
            .all(|(a, b)| match_part(a, b))
}

/// Whether any invalidation topic matches any coverage topic.
/// `O(|iv| * |dq|)`, cut short at the first hit.
#[must_use]
pub fn topics_intersect(ivs: &[Topic], dqs: &[Topic]) -> bool {
    ivs.iter().any(|iv| dqs.iter().any(|dq| match_topic(iv, dq)))
}

fn sets_intersect(a: &BTreeSet<Value>, b: &BTreeSet<Value>) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().any(|v| large.contains(v))
}

/// Anchored LIKE: `_` matches any single char, `%` any run of chars.
/// Case-sensitive.
#[must_use]
pub fn like_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    like_match_inner(&pat, &txt, 0, 0)
}

fn like_match_inner(pat: &[char], txt: &[char], mut pi: usize, mut ti: usize) -> bool {
    while pi < pat.len() {
        match pat[pi] {
            '%' => {
                while pi < pat.len() && pat[pi] == '%' {
                    pi += 1;
                }
                if pi >= pat.len() {
                    return true;
                }
                for start in ti..=txt.len() {
                    if like_match_inner(pat, txt, pi, start) {
                        return true;
                    }
                }
                return false;
            }
            '_' => {
                if ti >= txt.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            c => {
                if ti >= txt.len() || txt[ti] != c {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }
    ti >= txt.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::value_set;
    use uuid::Uuid;

    fn eid(n: u64) -> Value {
        Value::Uuid(Uuid::from_u128(u128::from(n)))
    }

    #[test]
    fn wildcard_matches_either_side() {
        assert!(match_part(&TopicPart::Wildcard, &TopicPart::keyword("title")));
        assert!(match_part(&TopicPart::keyword("title"), &TopicPart::Wildcard));
        assert!(match_part(&TopicPart::Wildcard, &TopicPart::gt(3_i64)));
        assert!(match_part(&TopicPart::set([eid(1)]), &TopicPart::Wildcard));
    }

    #[test]
    fn keyword_parts_compare_exactly() {
        assert!(match_part(&TopicPart::keyword("ea"), &TopicPart::keyword("ea")));
        assert!(!match_part(&TopicPart::keyword("ea"), &TopicPart::keyword("eav")));
        assert!(!match_part(&TopicPart::keyword("ea"), &TopicPart::set([Value::keyword("ea")])));
    }

    #[test]
    fn set_intersection_short_circuits_on_hit() {
        let a = TopicPart::set([eid(1), eid(2)]);
        let b = TopicPart::set([eid(2), eid(3)]);
        let c = TopicPart::set([eid(4)]);
        assert!(match_part(&a, &b));
        assert!(!match_part(&a, &c));
    }

    #[test]
    fn set_against_scalar_is_containment() {
        let s = TopicPart::set([Value::keyword("title"), Value::keyword("owner")]);
        assert!(match_part(&s, &TopicPart::keyword("title")));
        assert!(!match_part(&s, &TopicPart::keyword("body")));
    }

    #[test]
    fn comparator_gt() {
        // match_topic([:ea, #{e1}, 5], [:ea, ?, {$comparator:{op:$gt, value:3}}]) -> true
        let iv = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(1)]),
            TopicPart::set([Value::Int(5)]),
        ]);
        let dq = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::Wildcard,
            TopicPart::gt(3_i64),
        ]);
        assert!(match_topic(&iv, &dq));

        let low = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(1)]),
            TopicPart::set([Value::Int(2)]),
        ]);
        assert!(!match_topic(&low, &dq));
    }

    #[test]
    fn comparator_like_boundaries() {
        let dq = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::Wildcard,
            TopicPart::like("ap%"),
        ]);
        let apple = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(1)]),
            TopicPart::set([Value::from("apple")]),
        ]);
        let banana = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(1)]),
            TopicPart::set([Value::from("banana")]),
        ]);
        assert!(match_topic(&apple, &dq));
        assert!(!match_topic(&banana, &dq));
    }

    #[test]
    fn comparator_refuses_cross_class() {
        let c = TopicCmp { op: CmpOp::Gt, value: Value::Int(3) };
        assert!(!c.matches(&Value::from("10")));
        assert!(c.matches(&Value::Float(3.5)));
    }

    #[test]
    fn negation_needs_one_differing_member() {
        let n = TopicPart::not(Value::keyword("title"));
        assert!(match_part(&TopicPart::set([Value::keyword("owner")]), &n));
        assert!(match_part(
            &TopicPart::set([Value::keyword("title"), Value::keyword("owner")]),
            &n
        ));
        assert!(!match_part(&TopicPart::set([Value::keyword("title")]), &n));
    }

    #[test]
    fn arity_mismatch_never_matches() {
        let two = Topic::new([TopicPart::keyword("ea"), TopicPart::Wildcard]);
        let three = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::Wildcard,
            TopicPart::Wildcard,
        ]);
        assert!(!match_topic(&two, &three));
    }

    #[test]
    fn scenario_wildcard_attribute() {
        // match_topic([:ea, #{e1}, :title], [:ea, ?, :title]) -> true
        let iv = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(1)]),
            TopicPart::keyword("title"),
        ]);
        let dq = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::Wildcard,
            TopicPart::keyword("title"),
        ]);
        assert!(match_topic(&iv, &dq));
    }

    #[test]
    fn topic_list_intersection() {
        let ivs = [Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(9)]),
            TopicPart::Wildcard,
        ])];
        let dq_hit = [
            Topic::new([TopicPart::keyword("av"), TopicPart::Wildcard, TopicPart::Wildcard]),
            Topic::new([TopicPart::keyword("ea"), TopicPart::set([eid(9)]), TopicPart::Wildcard]),
        ];
        let dq_miss = [Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::set([eid(8)]),
            TopicPart::Wildcard,
        ])];
        assert!(topics_intersect(&ivs, &dq_hit));
        assert!(!topics_intersect(&ivs, &dq_miss));
        assert!(!topics_intersect(&[], &dq_hit));
    }

    #[test]
    fn like_match_edges() {
        assert!(like_match("", ""));
        assert!(!like_match("", "a"));
        assert!(like_match("%", ""));
        assert!(like_match("a_c", "abc"));
        assert!(!like_match("a_c", "ac"));
        assert!(like_match("%bc%", "abcd"));
        assert!(like_match("a%%d", "ad"));
        assert!(!like_match("Ap%", "apple"));
        assert!(like_match("%", "anything at all"));
    }

    #[test]
    fn set_against_not_with_values() {
        let n = TopicPart::not(Value::Int(5));
        assert!(!match_part(&TopicPart::set([Value::Int(5)]), &n));
        assert!(match_part(&TopicPart::set(value_set([Value::Int(5), Value::Int(6)])), &n));
    }

    #[test]
    fn surface_round_trips_shape() {
        let t = Topic::new([
            TopicPart::keyword("ea"),
            TopicPart::Wildcard,
            TopicPart::like("ap%"),
            TopicPart::not(Value::Int(3)),
        ]);
        let s = t.surface().to_string();
        assert!(s.contains("\"_\""));
        assert!(s.contains("$comparator"));
        assert!(s.contains("$like"));
        assert!(s.contains("$not"));
    }
}
