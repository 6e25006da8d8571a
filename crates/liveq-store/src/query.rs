//! Pattern-matching queries over EAV tuples.
//!
//! A tiny conjunctive query layer for the joins the reactive side
//! needs: each [`Clause`] matches `{e, a, v}` datoms of one attribute,
//! variables join across clauses, and evaluation walks clauses left to
//! right extending a binding frontier. Clauses with a bound value on an
//! indexed attribute go through the AVE index; everything else
//! enumerates the attribute. The subscription graph is a depth-two DAG,
//! so nothing fancier than nested-loop joins is warranted.

use std::collections::BTreeMap;

use liveq_types::Value;

use crate::db::{Db, Index};
use crate::schema::Attr;

/// A named query variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(pub &'static str);

/// One term of a clause: a variable, a constant, or "don't care".
#[derive(Debug, Clone)]
pub enum Term {
    Var(Var),
    Val(Value),
    Blank,
}

impl From<Var> for Term {
    fn from(v: Var) -> Self {
        Self::Var(v)
    }
}

impl From<Value> for Term {
    fn from(v: Value) -> Self {
        Self::Val(v)
    }
}

/// An `{e, a, v}` pattern. The attribute is always concrete.
#[derive(Debug, Clone)]
pub struct Clause {
    pub e: Term,
    pub a: Attr,
    pub v: Term,
}

impl Clause {
    pub fn new(e: impl Into<Term>, a: Attr, v: impl Into<Term>) -> Self {
        Self { e: e.into(), a, v: v.into() }
    }
}

/// A complete assignment of the variables used so far. Entity
/// positions bind as [`Value::Ref`].
pub type Bindings = BTreeMap<Var, Value>;

fn term_value(term: &Term, bindings: &Bindings) -> Option<Value> {
    match term {
        Term::Val(v) => Some(v.clone()),
        Term::Var(var) => bindings.get(var).cloned(),
        Term::Blank => None,
    }
}

fn bind(term: &Term, value: Value, bindings: &mut Bindings) -> bool {
    match term {
        Term::Blank => true,
        Term::Val(v) => *v == value,
        Term::Var(var) => match bindings.get(var) {
            Some(bound) => *bound == value,
            None => {
                bindings.insert(*var, value);
                true
            }
        },
    }
}

/// Evaluate a conjunction of clauses, returning every satisfying
/// assignment.
#[must_use]
pub fn query(db: &Db, clauses: &[Clause]) -> Vec<Bindings> {
    let mut frontier = vec![Bindings::new()];
    for clause in clauses {
        let mut next = Vec::new();
        for binding in &frontier {
            let known_e = term_value(&clause.e, binding).and_then(|v| v.as_ref_id());
            let known_v = term_value(&clause.v, binding);

            match (known_e, known_v) {
                (Some(e), _) => {
                    if let Some(v) = db.get(e, clause.a) {
                        extend(clause, binding, Value::Ref(e), v.clone(), &mut next);
                    }
                }
                (None, Some(v)) if clause.a.spec().indexed => {
                    for e in db.lookup_all(clause.a, &v) {
                        extend(clause, binding, Value::Ref(e), v.clone(), &mut next);
                    }
                }
                (None, _) => {
                    for datom in db.datoms(Index::Eav, clause.a) {
                        extend(clause, binding, Value::Ref(datom.e), datom.v, &mut next);
                    }
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    frontier
}

fn extend(clause: &Clause, base: &Bindings, e: Value, v: Value, out: &mut Vec<Bindings>) {
    let mut candidate = base.clone();
    if bind(&clause.e, e, &mut candidate) && bind(&clause.v, v, &mut candidate) {
        out.push(candidate);
    }
}
