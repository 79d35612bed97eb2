//! The dynamically-typed value model.
//!
//! [Value] is the scalar unit everything else in the crate is built from:
//! [crate::expr::Expr] evaluates to one, [Row] is an ordered tuple of them,
//! and the SQL layer translates them to literals.

mod column;
mod pack;
mod row;
mod schema;

pub use column::{Column, OrderedSet};
pub use pack::Pack;
pub use row::Row;
pub use schema::Schema;

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z, the epoch
/// [Value::Date] counts from.
pub const DATE_EPOCH_OFFSET: i64 = 978_307_200;

/// A tagged scalar value.
///
/// `Invalid` is the result of any operation that cannot be carried out
/// (type mismatch, division by zero, NaN/infinite double). It is never
/// equal to anything, including itself — see [Value::eq].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    /// Always finite: NaN/infinite results are coerced to [Value::Invalid]
    /// at construction time, see [Value::double].
    Double(f64),
    /// Seconds since 2001-01-01T00:00:00Z.
    Date(i64),
    Empty,
    Invalid,
}

impl Value {
    /// Builds a [Value::Double], collapsing NaN/infinite inputs to
    /// [Value::Invalid] per the Value invariant in spec §3.
    pub fn double(n: f64) -> Value {
        if n.is_finite() {
            Value::Double(n)
        } else {
            Value::Invalid
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Value::Invalid)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Coerces to `f64`, or `None` if there is no sensible numeric reading.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Date(secs) => Some(*secs as f64),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Empty | Value::Invalid => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            Value::Date(secs) => Some(*secs),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Double(d) => Some(*d != 0.0),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// String coercion used for concatenation, identifier suggestion and
    /// the string-containment operators. Every variant has a rendering
    /// except Invalid.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Double(d) => Some(format_double(*d)),
            Value::Date(secs) => Some(date_to_rfc3339(*secs)),
            Value::Empty => Some(String::new()),
            Value::Invalid => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Double(_) => "double",
            Value::Date(_) => "date",
            Value::Empty => "empty",
            Value::Invalid => "invalid",
        }
    }

    /// Numeric arithmetic: any operand lacking a double coercion yields
    /// Invalid (spec §3).
    fn numeric_binop(&self, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
        match (self.as_double(), rhs.as_double()) {
            (Some(a), Some(b)) => Value::double(f(a, b)),
            _ => Value::Invalid,
        }
    }

    pub fn add(&self, rhs: &Value) -> Value {
        if let (Value::String(a), _) | (_, Value::String(a)) = (self, rhs) {
            // string + anything with no numeric reading concatenates
            if self.as_double().is_none() || rhs.as_double().is_none() {
                let _ = a;
                return self.concat(rhs);
            }
        }
        self.numeric_binop(rhs, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Value) -> Value {
        self.numeric_binop(rhs, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value) -> Value {
        self.numeric_binop(rhs, |a, b| a * b)
    }

    pub fn div(&self, rhs: &Value) -> Value {
        match (self.as_double(), rhs.as_double()) {
            (Some(_), Some(b)) if b == 0.0 => Value::Invalid,
            (Some(a), Some(b)) => Value::double(a / b),
            _ => Value::Invalid,
        }
    }

    pub fn modulus(&self, rhs: &Value) -> Value {
        match (self.as_double(), rhs.as_double()) {
            (Some(_), Some(b)) if b == 0.0 => Value::Invalid,
            (Some(a), Some(b)) => Value::double(a % b),
            _ => Value::Invalid,
        }
    }

    pub fn pow(&self, rhs: &Value) -> Value {
        self.numeric_binop(rhs, |a, b| a.powf(b))
    }

    pub fn concat(&self, rhs: &Value) -> Value {
        match (self.as_string(), rhs.as_string()) {
            (Some(a), Some(b)) => Value::String(a + &b),
            _ => Value::Invalid,
        }
    }

    /// Cross-type equality: coerces via numeric comparison first, then
    /// falls back to string comparison. `Invalid` is never equal to
    /// anything, including itself.
    pub fn value_eq(&self, rhs: &Value) -> bool {
        if self.is_invalid() || rhs.is_invalid() {
            return false;
        }
        if let (Value::Empty, Value::Empty) = (self, rhs) {
            return true;
        }
        if let (Some(a), Some(b)) = (self.as_double(), rhs.as_double()) {
            return a == b;
        }
        match (self.as_string(), rhs.as_string()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering used by the comparison operators and `sort`. Returns
    /// `None` (treated as "not comparable", i.e. false for every
    /// relational operator) when either side is Invalid or has no
    /// common coercion.
    pub fn partial_compare(&self, rhs: &Value) -> Option<Ordering> {
        if self.is_invalid() || rhs.is_invalid() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.as_double(), rhs.as_double()) {
            return a.partial_cmp(&b);
        }
        match (self.as_string(), rhs.as_string()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }

    pub fn date_from_parts(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> Value {
        match Utc.with_ymd_and_hms(y, m, d, hh, mm, ss) {
            chrono::LocalResult::Single(dt) => {
                Value::Date(dt.timestamp() - DATE_EPOCH_OFFSET)
            }
            _ => Value::Invalid,
        }
    }

    pub fn date_add_seconds(&self, seconds: i64) -> Value {
        match self {
            Value::Date(secs) => Value::Date(secs + seconds),
            _ => Value::Invalid,
        }
    }
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

fn date_to_rfc3339(secs: i64) -> String {
    let unix = secs + DATE_EPOCH_OFFSET;
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// `Invalid != anything, including itself`; Empty == Empty; otherwise
/// numeric-then-string coercion, per spec §3.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.value_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Double(d) => write!(f, "{}", format_double(*d)),
            Value::Date(_) => write!(f, "{}", self.as_string().unwrap_or_default()),
            Value::Empty => write!(f, ""),
            Value::Invalid => write!(f, "#INVALID"),
        }
    }
}

/// Needed so `Value` can sit in `HashSet`/group-by keys (`unique`,
/// aggregate grouping). Uses the string rendering as the canonical
/// form; Invalid hashes to a fixed but otherwise meaningless bucket
/// since it is never looked up successfully (it never equals itself).
impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Invalid => 0u8.hash(state),
            other => {
                1u8.hash(state);
                other.as_string().unwrap_or_default().hash(state);
            }
        }
    }
}

pub fn duration_seconds(d: Duration) -> i64 {
    d.num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_never_equals_anything() {
        assert!(!(Value::Invalid == Value::Invalid));
        assert!(!(Value::Invalid == Value::Int(1)));
        assert!(!(Value::Int(1) == Value::Invalid));
    }

    #[test]
    fn empty_equals_empty() {
        assert_eq!(Value::Empty, Value::Empty);
    }

    #[test]
    fn nan_and_inf_coerce_to_invalid() {
        assert!(Value::double(f64::NAN).is_invalid());
        assert!(Value::double(f64::INFINITY).is_invalid());
        assert!(Value::double(f64::NEG_INFINITY).is_invalid());
        assert_eq!(Value::double(1.5), Value::Double(1.5));
    }

    #[test]
    fn arithmetic_with_non_numeric_operand_is_invalid() {
        assert!(Value::Int(1).add(&Value::Bool(true)).as_double().is_some());
        assert!(Value::Int(1).add(&Value::Invalid).is_invalid());
        assert_eq!(
            Value::String("abc".into()).add(&Value::Int(1)),
            Value::String("abc1".into())
        );
    }

    #[test]
    fn cross_type_equality_numeric_then_string() {
        assert_eq!(Value::Int(1), Value::Double(1.0));
        assert_eq!(Value::Int(1), Value::String("1".into()));
        assert_eq!(Value::String("abc".into()), Value::String("abc".into()));
    }

    #[test]
    fn comparison_with_invalid_is_never_ordered() {
        assert!(Value::Invalid.partial_compare(&Value::Int(1)).is_none());
    }
}
