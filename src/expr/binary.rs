//! [Binary]: the operator set for [super::Expr::Comparison].

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};

use crate::value::Value;

/// Evaluated as `op(second, first)` — right-to-left — throughout the
/// in-process evaluator and the SQL emitter. Deviating silently would
/// invert the non-commutative operators (Subtraction, Division,
/// ContainsString).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumIter)]
pub enum Binary {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulus,
    Power,
    Concatenation,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Lesser,
    LesserEqual,
    ContainsString,
    ContainsStringStrict,
    MatchesRegex,
    MatchesRegexStrict,
}

impl Binary {
    /// The operator that yields the same result with its operands
    /// swapped, if one exists. Used by `isEquivalentTo` — arithmetic
    /// operators are deliberately excluded (spec §9): `Subtraction` and
    /// `Division` are not symmetric under operand swap, and leaving
    /// `Addition`/`Multiplication` without a declared mirror keeps the
    /// asymmetry uniform across the enum.
    pub fn mirror(self) -> Option<Binary> {
        match self {
            Binary::Equal => Some(Binary::Equal),
            Binary::NotEqual => Some(Binary::NotEqual),
            Binary::Greater => Some(Binary::Lesser),
            Binary::Lesser => Some(Binary::Greater),
            Binary::GreaterEqual => Some(Binary::LesserEqual),
            Binary::LesserEqual => Some(Binary::GreaterEqual),
            _ => None,
        }
    }

    /// `true` for the relational/string operators whose result is
    /// always a [Value::Bool] (never Invalid unless an operand is).
    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            Binary::Addition
                | Binary::Subtraction
                | Binary::Multiplication
                | Binary::Division
                | Binary::Modulus
                | Binary::Power
                | Binary::Concatenation
        )
    }

    /// Applies this operator as `op(second, first)`. `first`/`second`
    /// name-match [super::Expr::Comparison]'s fields; the evaluation
    /// order is the right-to-left convention documented on the enum.
    pub fn apply(self, first: &Value, second: &Value) -> Value {
        match self {
            Binary::Addition => second.add(first),
            Binary::Subtraction => second.sub(first),
            Binary::Multiplication => second.mul(first),
            Binary::Division => second.div(first),
            Binary::Modulus => second.modulus(first),
            Binary::Power => second.pow(first),
            Binary::Concatenation => second.concat(first),
            Binary::Equal => Value::Bool(second.value_eq(first)),
            Binary::NotEqual => Value::Bool(!second.value_eq(first) && !second.is_invalid() && !first.is_invalid()),
            Binary::Greater => bool_from_ordering(second, first, |o| o == std::cmp::Ordering::Greater),
            Binary::GreaterEqual => {
                bool_from_ordering(second, first, |o| o != std::cmp::Ordering::Less)
            }
            Binary::Lesser => bool_from_ordering(second, first, |o| o == std::cmp::Ordering::Less),
            Binary::LesserEqual => {
                bool_from_ordering(second, first, |o| o != std::cmp::Ordering::Greater)
            }
            Binary::ContainsString => contains_string(second, first, false),
            Binary::ContainsStringStrict => contains_string(second, first, true),
            Binary::MatchesRegex => matches_regex(second, first, false),
            Binary::MatchesRegexStrict => matches_regex(second, first, true),
        }
    }
}

fn bool_from_ordering(a: &Value, b: &Value, f: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    match a.partial_compare(b) {
        Some(ord) => Value::Bool(f(ord)),
        None => Value::Bool(false),
    }
}

fn contains_string(haystack: &Value, needle: &Value, case_sensitive: bool) -> Value {
    match (haystack.as_string(), needle.as_string()) {
        (Some(h), Some(n)) => {
            if case_sensitive {
                Value::Bool(h.contains(&n))
            } else {
                Value::Bool(h.to_lowercase().contains(&n.to_lowercase()))
            }
        }
        _ => Value::Invalid,
    }
}

fn matches_regex(haystack: &Value, pattern: &Value, case_sensitive: bool) -> Value {
    match (haystack.as_string(), pattern.as_string()) {
        (Some(h), Some(p)) => {
            let pattern = if case_sensitive {
                p
            } else {
                format!("(?i){p}")
            };
            match regex::Regex::new(&pattern) {
                Ok(re) => Value::Bool(re.is_match(&h)),
                Err(_) => Value::Invalid,
            }
        }
        _ => Value::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_follows_right_to_left_convention() {
        // Comparison(first=Literal(2), second=Literal(10), Subtraction)
        // means "10 - 2", not "2 - 10".
        let first = Value::Int(2);
        let second = Value::Int(10);
        assert_eq!(Binary::Subtraction.apply(&first, &second), Value::Double(8.0));
    }

    #[test]
    fn equal_and_not_equal_are_self_and_mutual_mirrors() {
        assert_eq!(Binary::Equal.mirror(), Some(Binary::Equal));
        assert_eq!(Binary::Greater.mirror(), Some(Binary::Lesser));
        assert_eq!(Binary::Addition.mirror(), None);
    }

    #[test]
    fn contains_string_is_case_insensitive_by_default() {
        let haystack = Value::String("Hello World".into());
        let needle = Value::String("world".into());
        assert_eq!(Binary::ContainsString.apply(&needle, &haystack), Value::Bool(true));
        assert_eq!(
            Binary::ContainsStringStrict.apply(&needle, &haystack),
            Value::Bool(false)
        );
    }
}
