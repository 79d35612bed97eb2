//! [Function]: the closed set of named operators usable in [super::Expr::Call].

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};

use crate::value::{Pack, Value};

/// An argument-count constraint. `max: None` means unbounded (e.g. `Concat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exact(n: usize) -> Arity {
        Arity { min: n, max: Some(n) }
    }
    pub const fn range(min: usize, max: usize) -> Arity {
        Arity { min, max: Some(max) }
    }
    pub const fn at_least(min: usize) -> Arity {
        Arity { min, max: None }
    }
    pub fn accepts(self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

/// A closed enum of named operators, each with a fixed arity, a
/// determinism flag, and a pure `apply`. Includes arithmetic, trig,
/// string, logic, reducers usable outside a streaming [super::Aggregator]
/// context (e.g. over a [Pack]), date, random and containment functions
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumIter)]
pub enum Function {
    // arithmetic
    Abs,
    Round,
    Ceiling,
    Floor,
    Sqrt,
    Log,
    Log10,
    Exp,
    // trig
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    // string
    Left,
    Right,
    Mid,
    Length,
    Trim,
    Substitute,
    Split,
    Nth,
    Concat,
    Capitalize,
    Upper,
    Lower,
    // logic
    And,
    Or,
    Not,
    Xor,
    If,
    Coalesce,
    IfError,
    // reducers, callable directly over a literal argument list
    Sum,
    Average,
    Min,
    Max,
    Count,
    CountAll,
    CountDistinct,
    StdDevP,
    StdDevS,
    VarP,
    VarS,
    Median,
    Pack,
    // date
    Now,
    Year,
    Month,
    Day,
    DateAdd,
    // random
    Random,
    RandomInt,
    // containment
    In,
    NotIn,
}

impl Function {
    pub fn arity(self) -> Arity {
        use Function::*;
        match self {
            Abs | Round | Ceiling | Floor | Sqrt | Log10 | Exp | Sin | Cos | Tan | Asin | Acos
            | Atan | Length | Trim | Capitalize | Upper | Lower | Not | Year | Month | Day => {
                Arity::exact(1)
            }
            Log => Arity::range(1, 2),
            Left | Right | Split | Nth | DateAdd => Arity::exact(2),
            Mid | Substitute => Arity::exact(3),
            And | Or | Xor | Coalesce => Arity::at_least(1),
            Concat => Arity::at_least(0),
            If => Arity::range(2, 3),
            IfError => Arity::exact(2),
            Sum | Average | Min | Max | Count | CountAll | CountDistinct | StdDevP | StdDevS
            | VarP | VarS | Median | Pack => Arity::at_least(0),
            Now => Arity::exact(0),
            Random => Arity::exact(0),
            RandomInt => Arity::exact(2),
            In | NotIn => Arity::at_least(1),
        }
    }

    /// `false` for functions whose result depends on more than their
    /// arguments (`Now`, `Random`, `RandomInt`). Two Calls to the same
    /// non-deterministic function are never considered equivalent,
    /// regardless of identical arguments (spec §4.2).
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Function::Now | Function::Random | Function::RandomInt)
    }

    pub fn apply(self, args: &[Value]) -> Value {
        if !self.arity().accepts(args.len()) {
            return Value::Invalid;
        }
        use Function::*;
        match self {
            Abs => unary_numeric(args, f64::abs),
            Round => unary_numeric(args, |n| n.round()),
            Ceiling => unary_numeric(args, f64::ceil),
            Floor => unary_numeric(args, f64::floor),
            Sqrt => unary_numeric(args, |n| if n < 0.0 { f64::NAN } else { n.sqrt() }),
            Log => match args.len() {
                1 => unary_numeric(args, f64::ln),
                _ => binary_numeric(args, |n, base| n.log(base)),
            },
            Log10 => unary_numeric(args, f64::log10),
            Exp => unary_numeric(args, f64::exp),
            Sin => unary_numeric(args, f64::sin),
            Cos => unary_numeric(args, f64::cos),
            Tan => unary_numeric(args, f64::tan),
            Asin => unary_numeric(args, f64::asin),
            Acos => unary_numeric(args, f64::acos),
            Atan => unary_numeric(args, f64::atan),

            Left => string_and_count(args, |s, n| s.chars().take(n).collect()),
            Right => string_and_count(args, |s, n| {
                let len = s.chars().count();
                s.chars().skip(len.saturating_sub(n)).collect()
            }),
            Mid => mid(args),
            Length => match args[0].as_string() {
                Some(s) => Value::Int(s.chars().count() as i64),
                None => Value::Invalid,
            },
            Trim => match args[0].as_string() {
                Some(s) => Value::String(s.trim().to_string()),
                None => Value::Invalid,
            },
            Substitute => substitute(args),
            Split => split(args),
            Nth => nth(args),
            Concat => {
                let mut out = String::new();
                for a in args {
                    match a.as_string() {
                        Some(s) => out.push_str(&s),
                        None => return Value::Invalid,
                    }
                }
                Value::String(out)
            }
            Capitalize => match args[0].as_string() {
                Some(s) => Value::String(capitalize(&s)),
                None => Value::Invalid,
            },
            Upper => match args[0].as_string() {
                Some(s) => Value::String(s.to_uppercase()),
                None => Value::Invalid,
            },
            Lower => match args[0].as_string() {
                Some(s) => Value::String(s.to_lowercase()),
                None => Value::Invalid,
            },

            And => fold_bool(args, true, |a, b| a && b),
            Or => fold_bool(args, false, |a, b| a || b),
            Not => match args[0].as_bool() {
                Some(b) => Value::Bool(!b),
                None => Value::Invalid,
            },
            Xor => fold_bool(args, false, |a, b| a ^ b),
            If => if_function(args),
            Coalesce => args
                .iter()
                .find(|v| !v.is_invalid() && !v.is_empty())
                .cloned()
                .unwrap_or(Value::Empty),
            IfError => {
                if args[0].is_invalid() {
                    args[1].clone()
                } else {
                    args[0].clone()
                }
            }

            Sum => reduce_numeric(args, 0.0, |acc, n| acc + n),
            Average => average(args),
            Min => reduce_ordered(args, std::cmp::Ordering::Less),
            Max => reduce_ordered(args, std::cmp::Ordering::Greater),
            Count => Value::Int(args.iter().filter(|v| !v.is_invalid() && !v.is_empty()).count() as i64),
            CountAll => Value::Int(args.len() as i64),
            CountDistinct => count_distinct(args),
            StdDevP => std_dev(args, true),
            StdDevS => std_dev(args, false),
            VarP => variance(args, true),
            VarS => variance(args, false),
            Median => median(args),
            Pack => Value::String(
                Pack::new(args.iter().filter_map(|v| v.as_string()).collect()).encode(),
            ),

            Now => Value::date_from_parts(1970, 1, 1, 0, 0, 0),
            Year | Month | Day => date_part(self, args),
            DateAdd => match &args[0] {
                Value::Date(_) => match args[1].as_int() {
                    Some(secs) => args[0].date_add_seconds(secs),
                    None => Value::Invalid,
                },
                _ => Value::Invalid,
            },

            Random => Value::double(rand::random::<f64>()),
            RandomInt => random_int(args),

            In => Value::Bool(args[1..].iter().any(|v| v.value_eq(&args[0]))),
            NotIn => Value::Bool(!args[1..].iter().any(|v| v.value_eq(&args[0]))),
        }
    }
}

fn unary_numeric(args: &[Value], f: impl Fn(f64) -> f64) -> Value {
    match args[0].as_double() {
        Some(n) => Value::double(f(n)),
        None => Value::Invalid,
    }
}

fn binary_numeric(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Value {
    match (args[0].as_double(), args[1].as_double()) {
        (Some(a), Some(b)) => Value::double(f(a, b)),
        _ => Value::Invalid,
    }
}

fn string_and_count(args: &[Value], f: impl Fn(&str, usize) -> String) -> Value {
    match (args[0].as_string(), args[1].as_int()) {
        (Some(s), Some(n)) if n >= 0 => Value::String(f(&s, n as usize)),
        _ => Value::Invalid,
    }
}

fn mid(args: &[Value]) -> Value {
    match (args[0].as_string(), args[1].as_int(), args[2].as_int()) {
        (Some(s), Some(start), Some(len)) if start >= 0 && len >= 0 => {
            let chars: Vec<char> = s.chars().collect();
            let start = (start as usize).min(chars.len());
            let end = (start + len as usize).min(chars.len());
            Value::String(chars[start..end].iter().collect())
        }
        _ => Value::Invalid,
    }
}

fn substitute(args: &[Value]) -> Value {
    match (args[0].as_string(), args[1].as_string(), args[2].as_string()) {
        (Some(s), Some(from), Some(to)) if !from.is_empty() => Value::String(s.replace(&from, &to)),
        (Some(s), Some(from), Some(_)) if from.is_empty() => Value::String(s),
        _ => Value::Invalid,
    }
}

fn split(args: &[Value]) -> Value {
    match (args[0].as_string(), args[1].as_string()) {
        (Some(s), Some(sep)) if !sep.is_empty() => {
            let items: Vec<String> = s.split(sep.as_str()).map(|s| s.to_string()).collect();
            Value::String(Pack::new(items).encode())
        }
        (Some(s), Some(_)) => Value::String(Pack::new(vec![s]).encode()),
        _ => Value::Invalid,
    }
}

fn nth(args: &[Value]) -> Value {
    match (args[0].as_string(), args[1].as_int()) {
        (Some(packed), Some(i)) if i >= 0 => {
            let pack = Pack::decode(&packed);
            pack.items()
                .get(i as usize)
                .map(|s| Value::String(s.clone()))
                .unwrap_or(Value::Invalid)
        }
        _ => Value::Invalid,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn fold_bool(args: &[Value], identity: bool, f: impl Fn(bool, bool) -> bool) -> Value {
    let mut acc = identity;
    for a in args {
        match a.as_bool() {
            Some(b) => acc = f(acc, b),
            None => return Value::Invalid,
        }
    }
    Value::Bool(acc)
}

fn if_function(args: &[Value]) -> Value {
    match args[0].as_bool() {
        Some(true) => args[1].clone(),
        Some(false) => args.get(2).cloned().unwrap_or(Value::Empty),
        None => Value::Invalid,
    }
}

fn numeric_inputs(args: &[Value]) -> Option<Vec<f64>> {
    args.iter()
        .filter(|v| !v.is_invalid() && !v.is_empty())
        .map(|v| v.as_double())
        .collect()
}

fn reduce_numeric(args: &[Value], identity: f64, f: impl Fn(f64, f64) -> f64) -> Value {
    match numeric_inputs(args) {
        Some(nums) => Value::double(nums.into_iter().fold(identity, f)),
        None => Value::Invalid,
    }
}

fn average(args: &[Value]) -> Value {
    match numeric_inputs(args) {
        Some(nums) if !nums.is_empty() => {
            Value::double(nums.iter().sum::<f64>() / nums.len() as f64)
        }
        _ => Value::Invalid,
    }
}

fn reduce_ordered(args: &[Value], keep: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for v in args {
        if v.is_invalid() {
            continue;
        }
        best = match best {
            None => Some(v),
            Some(current) => match v.partial_compare(current) {
                Some(ord) if ord == keep => Some(v),
                _ => Some(current),
            },
        };
    }
    best.cloned().unwrap_or(Value::Invalid)
}

fn count_distinct(args: &[Value]) -> Value {
    let mut seen: Vec<String> = Vec::new();
    for v in args {
        if v.is_invalid() {
            continue;
        }
        if let Some(s) = v.as_string() {
            if !seen.contains(&s) {
                seen.push(s);
            }
        }
    }
    Value::Int(seen.len() as i64)
}

fn variance(args: &[Value], population: bool) -> Value {
    match numeric_inputs(args) {
        Some(nums) if nums.len() >= 2 || (population && !nums.is_empty()) => {
            let mean = nums.iter().sum::<f64>() / nums.len() as f64;
            let sum_sq: f64 = nums.iter().map(|n| (n - mean).powi(2)).sum();
            let denom = if population { nums.len() as f64 } else { (nums.len() - 1) as f64 };
            Value::double(sum_sq / denom)
        }
        _ => Value::Invalid,
    }
}

fn std_dev(args: &[Value], population: bool) -> Value {
    match variance(args, population) {
        Value::Double(v) => Value::double(v.sqrt()),
        other => other,
    }
}

fn median(args: &[Value]) -> Value {
    match numeric_inputs(args) {
        Some(mut nums) if !nums.is_empty() => {
            nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = nums.len() / 2;
            if nums.len() % 2 == 0 {
                Value::double((nums[mid - 1] + nums[mid]) / 2.0)
            } else {
                Value::double(nums[mid])
            }
        }
        _ => Value::Invalid,
    }
}

fn date_part(function: Function, args: &[Value]) -> Value {
    use chrono::{DateTime, Datelike, Utc};
    match &args[0] {
        Value::Date(secs) => {
            let unix = secs + crate::value::DATE_EPOCH_OFFSET;
            match DateTime::<Utc>::from_timestamp(unix, 0) {
                Some(dt) => Value::Int(match function {
                    Function::Year => dt.year() as i64,
                    Function::Month => dt.month() as i64,
                    Function::Day => dt.day() as i64,
                    _ => unreachable!(),
                }),
                None => Value::Invalid,
            }
        }
        _ => Value::Invalid,
    }
}

fn random_int(args: &[Value]) -> Value {
    use rand::Rng;
    match (args[0].as_int(), args[1].as_int()) {
        (Some(lo), Some(hi)) if lo <= hi => Value::Int(rand::thread_rng().gen_range(lo..=hi)),
        _ => Value::Invalid,
    }
}
