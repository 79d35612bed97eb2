//! `infer`: bounded depth-first search for an [Expr] that transforms a
//! given input into a target value (spec §4.2).

use std::collections::HashSet;

use crate::concurrency::Job;
use crate::value::{Row, Value};

use super::{Binary, Expr, Function};

/// One step of the search: an Expr built so far, paired with the
/// Value it evaluates to (against the original `row`/`input_value`).
struct Candidate {
    expr: Expr,
    value: Value,
}

/// Searches for an [Expr] `e` such that `e.apply(row, None, input_value)
/// == target`, preferring simpler expressions. Explores at most
/// `max_depth` levels of composition, never considering an expression
/// whose complexity exceeds `max_complexity` — the ceiling tightens to
/// a match's own complexity as soon as one is found, so later
/// candidates must be at least as simple (spec's tie-breaking rule).
/// Returns `None` if cancelled or nothing within budget matches.
pub fn infer(
    row: &Row,
    input_value: Option<&Value>,
    target: &Value,
    job: &Job,
    max_complexity: usize,
    max_depth: usize,
) -> Option<Expr> {
    let mut ceiling = max_complexity;
    let mut best: Option<Expr> = None;
    let mut visited: HashSet<String> = HashSet::new();

    let mut frontier = vec![Candidate { expr: Expr::Identity, value: input_value.cloned().unwrap_or(Value::Invalid) }];
    // Sibling/Literal candidates are sourced straight from the row, not
    // built on a prior step, so they're seeded once up front.
    frontier.extend(seed_candidates(row, target));

    let mut depth = 0;
    while depth < max_depth && !frontier.is_empty() {
        if job.is_cancelled() {
            return best;
        }
        let mut next_frontier = Vec::new();
        for candidate in frontier {
            if candidate.expr.complexity() > ceiling {
                continue;
            }
            for suggestion in suggest(&candidate, target) {
                if suggestion.expr.complexity() > ceiling {
                    continue;
                }
                if suggestion.value.value_eq(target) {
                    if best.is_none() || suggestion.expr.complexity() < ceiling {
                        ceiling = suggestion.expr.complexity();
                        best = Some(suggestion.expr);
                    }
                } else if let Some(key) = suggestion.value.as_string() {
                    if visited.insert(key) {
                        next_frontier.push(suggestion);
                    }
                }
            }
        }
        frontier = next_frontier;
        depth += 1;
    }
    best
}

fn seed_candidates(row: &Row, target: &Value) -> Vec<Candidate> {
    let mut out = vec![Candidate { expr: Expr::Literal(target.clone()), value: target.clone() }];
    for (i, column) in row.columns().iter().enumerate() {
        let value = row.at(i).clone();
        out.push(Candidate { expr: Expr::Sibling(column.clone()), value });
    }
    // Prioritise Siblings already equal to the target — they'll be
    // found as an immediate match in the first suggest pass regardless
    // of order, but keeping them first keeps `best` stable when two
    // Siblings tie on complexity.
    out.sort_by_key(|c| !c.value.value_eq(target));
    out
}

/// Suggestion contracts per variant (spec §4.2): Literal only applies
/// with no prior source (handled by `seed_candidates`); Sibling
/// likewise seeds directly; from here on, every suggestion composes
/// `candidate.expr` as the "source so far" inside a new node.
fn suggest(candidate: &Candidate, target: &Value) -> Vec<Candidate> {
    let mut out = Vec::new();
    suggest_comparisons(candidate, target, &mut out);
    suggest_unary_functions(candidate, target, &mut out);
    suggest_string_functions(candidate, target, &mut out);
    out
}

fn suggest_comparisons(candidate: &Candidate, target: &Value, out: &mut Vec<Candidate>) {
    let (Some(source), Some(goal)) = (candidate.value.as_double(), target.as_double()) else {
        return suggest_concat(candidate, target, out);
    };
    let gap = goal - source;
    for (op, literal) in [
        (Binary::Addition, gap),
        (Binary::Subtraction, source - goal),
        (Binary::Multiplication, if source != 0.0 { goal / source } else { f64::NAN }),
        (Binary::Division, if goal != 0.0 { source / goal } else { f64::NAN }),
    ] {
        if !literal.is_finite() {
            continue;
        }
        let expr = Expr::comparison(Expr::Literal(Value::double(literal)), candidate.expr.clone(), op);
        let value = op.apply(&Value::double(literal), &candidate.value);
        out.push(Candidate { expr, value });
    }
}

fn suggest_concat(candidate: &Candidate, target: &Value, out: &mut Vec<Candidate>) {
    let (Some(source), Some(goal)) = (candidate.value.as_string(), target.as_string()) else {
        return;
    };
    if goal.starts_with(&source) {
        let suffix = goal[source.len()..].to_string();
        let expr = Expr::comparison(Expr::Literal(Value::String(suffix.clone())), candidate.expr.clone(), Binary::Concatenation);
        out.push(Candidate { expr, value: Value::String(source.clone() + &suffix) });
    }
    if goal.ends_with(&source) {
        let prefix = goal[..goal.len() - source.len()].to_string();
        let expr = Expr::comparison(candidate.expr.clone(), Expr::Literal(Value::String(prefix.clone())), Binary::Concatenation);
        out.push(Candidate { expr, value: Value::String(prefix + &source) });
    }
}

/// Any unary deterministic Function `f` such that `f(source) == target`
/// is a one-step solution; we simply try every unary function rather
/// than special-casing, since `Function::apply` is pure and cheap.
fn suggest_unary_functions(candidate: &Candidate, _target: &Value, out: &mut Vec<Candidate>) {
    use strum::IntoEnumIterator;
    for function in Function::iter() {
        if function.arity().accepts(1) && function.is_deterministic() {
            let expr = Expr::call(vec![candidate.expr.clone()], function);
            let value = function.apply(std::slice::from_ref(&candidate.value));
            out.push(Candidate { expr, value });
        }
    }
}

/// Left/Right/Mid substrings, and whole-string Substitute, as a last
/// resort when nothing simpler bridges the gap (spec §4.2).
fn suggest_string_functions(candidate: &Candidate, target: &Value, out: &mut Vec<Candidate>) {
    let (Some(source), Some(goal)) = (candidate.value.as_string(), target.as_string()) else {
        return;
    };
    if let Some(pos) = source.find(&goal) {
        if !goal.is_empty() {
            let left_args = vec![candidate.expr.clone(), Expr::Literal(Value::Int((pos + goal.chars().count()) as i64))];
            out.push(Candidate {
                expr: Expr::call(left_args.clone(), Function::Left),
                value: Function::Left.apply(&[candidate.value.clone(), Value::Int((pos + goal.len()) as i64)]),
            });
            let right_args = vec![candidate.expr.clone(), Expr::Literal(Value::Int((source.len() - pos) as i64))];
            out.push(Candidate {
                expr: Expr::call(right_args, Function::Right),
                value: Function::Right.apply(&[candidate.value.clone(), Value::Int((source.len() - pos) as i64)]),
            });
            let mid_args = vec![
                candidate.expr.clone(),
                Expr::Literal(Value::Int(pos as i64)),
                Expr::Literal(Value::Int(goal.len() as i64)),
            ];
            out.push(Candidate {
                expr: Expr::call(mid_args, Function::Mid),
                value: Function::Mid.apply(&[candidate.value.clone(), Value::Int(pos as i64), Value::Int(goal.len() as i64)]),
            });
        }
    }
    let substitute_args = vec![
        candidate.expr.clone(),
        Expr::Literal(Value::String(source.clone())),
        Expr::Literal(Value::String(goal.clone())),
    ];
    out.push(Candidate {
        expr: Expr::call(substitute_args, Function::Substitute),
        value: Function::Substitute.apply(&[candidate.value.clone(), Value::String(source), Value::String(goal)]),
    });
}
