//! The lazily-evaluated expression tree: [Expr], its operator enums
//! ([Binary], [Function]), and the [Aggregator]/[Reducer] pair used by
//! the Aggregate transformer.

mod binary;
mod function;
mod infer;
mod reducer;

pub use binary::Binary;
pub use function::{Arity, Function};
pub use infer::infer;
pub use reducer::{Aggregator, Reducer, ReducerKind};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::value::{Column, Row, Value};

/// A node in the expression tree. `Comparison` evaluates as
/// `op(second, first)` — see [Binary] for the right-to-left
/// convention this preserves throughout the evaluator and SQL
/// emitter.
#[derive(Debug, Clone, EnumAsInner, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),
    /// Yields the caller-supplied `inputValue`, or Invalid when none
    /// was given — the formula language's "current cell" reference.
    Identity,
    /// `row[col]`, or Invalid if `col` is absent from the row.
    Sibling(Column),
    /// `foreignRow[col]`, or Invalid if there is no foreign row or
    /// `col` is absent from it. Used by Join expressions.
    Foreign(Column),
    Comparison {
        first: Box<Expr>,
        second: Box<Expr>,
        op: Binary,
    },
    Call {
        args: Vec<Expr>,
        function: Function,
    },
}

impl Expr {
    pub fn comparison(first: Expr, second: Expr, op: Binary) -> Expr {
        Expr::Comparison { first: Box::new(first), second: Box::new(second), op }
    }

    pub fn call(args: Vec<Expr>, function: Function) -> Expr {
        Expr::Call { args, function }
    }

    /// A cheap proxy for evaluation cost, used by `infer`'s search
    /// ceiling. Literal=10, Identity=0, Sibling=2,
    /// Comparison=first+second+5, Call=Σargs+10 (spec §3).
    pub fn complexity(&self) -> usize {
        match self {
            Expr::Literal(_) => 10,
            Expr::Identity => 0,
            Expr::Sibling(_) => 2,
            Expr::Foreign(_) => 2,
            Expr::Comparison { first, second, .. } => first.complexity() + second.complexity() + 5,
            Expr::Call { args, .. } => args.iter().map(Expr::complexity).sum::<usize>() + 10,
        }
    }

    /// `true` when this expression evaluates to the same value on
    /// every row — Literal always, Comparison iff both operands are,
    /// Call iff the function is deterministic and every argument is.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Identity | Expr::Sibling(_) | Expr::Foreign(_) => false,
            Expr::Comparison { first, second, .. } => first.is_constant() && second.is_constant(),
            Expr::Call { args, function } => {
                function.is_deterministic() && args.iter().all(Expr::is_constant)
            }
        }
    }

    /// Pure evaluation; every failure manifests as [Value::Invalid],
    /// never an out-of-band error (spec §4.2).
    pub fn apply(&self, row: &Row, foreign: Option<&Row>, input_value: Option<&Value>) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Identity => input_value.cloned().unwrap_or(Value::Invalid),
            Expr::Sibling(col) => row.get(col).clone(),
            Expr::Foreign(col) => foreign.map(|r| r.get(col).clone()).unwrap_or(Value::Invalid),
            Expr::Comparison { first, second, op } => {
                let first = first.apply(row, foreign, input_value);
                let second = second.apply(row, foreign, input_value);
                op.apply(&first, &second)
            }
            Expr::Call { args, function } => {
                let args: Vec<Value> = args.iter().map(|a| a.apply(row, foreign, input_value)).collect();
                function.apply(&args)
            }
        }
    }

    /// Structural map over immediate children, used to build
    /// `prepare` and other bottom-up rewrites without duplicating the
    /// tree-walking boilerplate per pass.
    pub fn visit(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Expr {
        match self {
            Expr::Literal(_) | Expr::Identity | Expr::Sibling(_) | Expr::Foreign(_) => f(self),
            Expr::Comparison { first, second, op } => {
                let rebuilt = Expr::Comparison {
                    first: Box::new(first.visit(f)),
                    second: Box::new(second.visit(f)),
                    op: *op,
                };
                f(&rebuilt)
            }
            Expr::Call { args, function } => {
                let rebuilt = Expr::Call {
                    args: args.iter().map(|a| a.visit(f)).collect(),
                    function: *function,
                };
                f(&rebuilt)
            }
        }
    }

    /// Bottom-up constant folding, plus the Comparison equivalence
    /// simplification from §3: a Comparison whose two (already
    /// folded) operands are structurally equivalent under one of
    /// `=`,`≠`,`≤`,`≥`,`<`,`>` collapses to the statically-known
    /// boolean. Idempotent: a prepared expression prepares to itself.
    pub fn prepare(&self) -> Expr {
        let folded = match self {
            Expr::Literal(_) | Expr::Identity | Expr::Sibling(_) | Expr::Foreign(_) => self.clone(),
            Expr::Comparison { first, second, op } => {
                let first = first.prepare();
                let second = second.prepare();
                if first.is_constant() && second.is_constant() {
                    let dummy = Row::new(std::sync::Arc::new(Default::default()), Vec::new());
                    Expr::Literal(op.apply(&first.apply(&dummy, None, None), &second.apply(&dummy, None, None)))
                } else if is_reflexive_predicate(*op) && first.is_equivalent_to(&second) {
                    Expr::Literal(Value::Bool(matches!(
                        op,
                        Binary::Equal | Binary::GreaterEqual | Binary::LesserEqual
                    )))
                } else {
                    Expr::Comparison { first: Box::new(first), second: Box::new(second), op: *op }
                }
            }
            Expr::Call { args, function } => {
                let args: Vec<Expr> = args.iter().map(Expr::prepare).collect();
                if function.is_deterministic() && args.iter().all(Expr::is_constant) {
                    let dummy = Row::new(std::sync::Arc::new(Default::default()), Vec::new());
                    let values: Vec<Value> = args.iter().map(|a| a.apply(&dummy, None, None)).collect();
                    Expr::Literal(function.apply(&values))
                } else {
                    Expr::Call { args, function: *function }
                }
            }
        };
        folded
    }

    /// Structural equivalence modulo operator mirrors and
    /// non-determinism: two Calls to the same non-deterministic
    /// function are never equivalent even with identical arguments
    /// (spec §4.2).
    pub fn is_equivalent_to(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Literal(a), Expr::Literal(b)) => a.value_eq(b),
            (Expr::Identity, Expr::Identity) => true,
            (Expr::Sibling(a), Expr::Sibling(b)) => a == b,
            (Expr::Foreign(a), Expr::Foreign(b)) => a == b,
            (
                Expr::Comparison { first: f1, second: s1, op: op1 },
                Expr::Comparison { first: f2, second: s2, op: op2 },
            ) => {
                let direct = op1 == op2 && f1.is_equivalent_to(f2) && s1.is_equivalent_to(s2);
                let mirrored = op1.mirror() == Some(*op2) && f1.is_equivalent_to(s2) && s1.is_equivalent_to(f2);
                direct || mirrored
            }
            (Expr::Call { args: a1, function: fn1 }, Expr::Call { args: a2, function: fn2 }) => {
                fn1 == fn2
                    && fn1.is_deterministic()
                    && a1.len() == a2.len()
                    && a1.iter().zip(a2).all(|(a, b)| a.is_equivalent_to(b))
            }
            _ => false,
        }
    }
}

fn is_reflexive_predicate(op: Binary) -> bool {
    matches!(
        op,
        Binary::Equal
            | Binary::NotEqual
            | Binary::Greater
            | Binary::GreaterEqual
            | Binary::Lesser
            | Binary::LesserEqual
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::OrderedSet;
    use std::sync::Arc;

    fn empty_row() -> Row {
        Row::new(Arc::new(OrderedSet::new()), Vec::new())
    }

    #[test]
    fn constant_comparison_folds_to_literal() {
        let expr = Expr::comparison(Expr::Literal(Value::Int(2)), Expr::Literal(Value::Int(3)), Binary::Addition);
        assert_eq!(expr.apply(&empty_row(), None, None), Value::Double(5.0));
        assert!(matches!(expr.prepare(), Expr::Literal(Value::Double(v)) if v == 5.0));
    }

    #[test]
    fn equal_siblings_fold_to_true() {
        let expr = Expr::comparison(Expr::Sibling(Column::new("x")), Expr::Sibling(Column::new("x")), Binary::Equal);
        assert!(matches!(expr.prepare(), Expr::Literal(Value::Bool(true))));
    }

    #[test]
    fn prepare_is_idempotent() {
        let expr = Expr::comparison(Expr::Sibling(Column::new("x")), Expr::Literal(Value::Int(1)), Binary::Addition);
        let once = expr.prepare();
        let twice = once.prepare();
        assert!(once.is_equivalent_to(&twice));
    }

    #[test]
    fn mirrored_comparisons_are_equivalent() {
        let a = Expr::comparison(Expr::Sibling(Column::new("x")), Expr::Literal(Value::Int(1)), Binary::Greater);
        let b = Expr::comparison(Expr::Literal(Value::Int(1)), Expr::Sibling(Column::new("x")), Binary::Lesser);
        assert!(a.is_equivalent_to(&b));
    }

    #[test]
    fn nondeterministic_calls_are_never_equivalent() {
        let a = Expr::call(vec![], Function::Random);
        let b = Expr::call(vec![], Function::Random);
        assert!(!a.is_equivalent_to(&b));
    }

    #[test]
    fn complexity_matches_spec_formula() {
        assert_eq!(Expr::Literal(Value::Int(1)).complexity(), 10);
        assert_eq!(Expr::Identity.complexity(), 0);
        assert_eq!(Expr::Sibling(Column::new("a")).complexity(), 2);
        let comparison = Expr::comparison(Expr::Identity, Expr::Identity, Binary::Addition);
        assert_eq!(comparison.complexity(), 5);
    }
}
