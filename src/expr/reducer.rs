//! [Aggregator] and the incremental [Reducer]s it dispatches to.
//!
//! Every Reducer must be associative: splitting its input into
//! arbitrary batches and reducing each independently, then reducing
//! the partial results, must equal reducing the whole input at once
//! (spec §8, "Aggregate associativity").

use serde::{Deserialize, Serialize};

use crate::value::{Pack, Value};

use super::Expr;

/// Names a [Reducer] implementation without requiring the caller to
/// construct one; `Aggregator::new_reducer` builds a fresh instance
/// from this tag, which is how the Aggregate transformer's group
/// catalog lazily instantiates one Reducer per leaf (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReducerKind {
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
}

/// (map: Expression, reduce: Reducer) — evaluates `map` per row and
/// feeds the result into a fresh Reducer built from `reduce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregator {
    pub map: Expr,
    pub reduce: ReducerKind,
}

impl Aggregator {
    pub fn new(map: Expr, reduce: ReducerKind) -> Aggregator {
        Aggregator { map, reduce }
    }

    pub fn new_reducer(&self) -> Box<dyn Reducer> {
        self.reduce.new_reducer()
    }
}

impl ReducerKind {
    pub fn new_reducer(self) -> Box<dyn Reducer> {
        match self {
            ReducerKind::Sum => Box::new(SumReducer::default()),
            ReducerKind::Average => Box::new(AverageReducer::default()),
            ReducerKind::Min => Box::new(ExtremeReducer::min()),
            ReducerKind::Max => Box::new(ExtremeReducer::max()),
            ReducerKind::Count => Box::new(CountReducer::default()),
            ReducerKind::CountAll => Box::new(CountAllReducer::default()),
            ReducerKind::CountDistinct => Box::new(CountDistinctReducer::default()),
            ReducerKind::StdDevP => Box::new(VarianceReducer::population()),
            ReducerKind::StdDevS => Box::new(VarianceReducer::sample()),
            ReducerKind::VarP => {
                let mut r = VarianceReducer::population();
                r.as_std_dev = false;
                Box::new(r)
            }
            ReducerKind::VarS => {
                let mut r = VarianceReducer::sample();
                r.as_std_dev = false;
                Box::new(r)
            }
            ReducerKind::Median => Box::new(MedianReducer::default()),
            ReducerKind::Pack => Box::new(PackReducer::default()),
        }
    }
}

/// An incremental, associative accumulator. `add` is called once per
/// row with the value the Aggregator's `map` expression produced;
/// `result` may be read at any point (the transformer only reads it at
/// `finish`, but associativity guarantees any read is consistent with
/// the rows seen so far).
pub trait Reducer: Send {
    fn add(&mut self, value: &Value);
    fn result(&self) -> Value;
}

#[derive(Default)]
struct SumReducer {
    total: f64,
    saw_any: bool,
}
impl Reducer for SumReducer {
    fn add(&mut self, value: &Value) {
        if let Some(n) = value.as_double() {
            self.total += n;
            self.saw_any = true;
        }
    }
    fn result(&self) -> Value {
        if self.saw_any {
            Value::double(self.total)
        } else {
            Value::Int(0)
        }
    }
}

#[derive(Default)]
struct AverageReducer {
    total: f64,
    count: usize,
}
impl Reducer for AverageReducer {
    fn add(&mut self, value: &Value) {
        if let Some(n) = value.as_double() {
            self.total += n;
            self.count += 1;
        }
    }
    fn result(&self) -> Value {
        if self.count == 0 {
            Value::Invalid
        } else {
            Value::double(self.total / self.count as f64)
        }
    }
}

struct ExtremeReducer {
    keep_smaller: bool,
    current: Option<Value>,
}
impl ExtremeReducer {
    fn min() -> ExtremeReducer {
        ExtremeReducer { keep_smaller: true, current: None }
    }
    fn max() -> ExtremeReducer {
        ExtremeReducer { keep_smaller: false, current: None }
    }
}
impl Reducer for ExtremeReducer {
    fn add(&mut self, value: &Value) {
        if value.is_invalid() {
            return;
        }
        self.current = match self.current.take() {
            None => Some(value.clone()),
            Some(current) => match value.partial_compare(&current) {
                Some(std::cmp::Ordering::Less) if self.keep_smaller => Some(value.clone()),
                Some(std::cmp::Ordering::Greater) if !self.keep_smaller => Some(value.clone()),
                _ => Some(current),
            },
        };
    }
    fn result(&self) -> Value {
        self.current.clone().unwrap_or(Value::Invalid)
    }
}

#[derive(Default)]
struct CountReducer {
    count: i64,
}
impl Reducer for CountReducer {
    fn add(&mut self, value: &Value) {
        if !value.is_invalid() && !value.is_empty() {
            self.count += 1;
        }
    }
    fn result(&self) -> Value {
        Value::Int(self.count)
    }
}

#[derive(Default)]
struct CountAllReducer {
    count: i64,
}
impl Reducer for CountAllReducer {
    fn add(&mut self, _value: &Value) {
        self.count += 1;
    }
    fn result(&self) -> Value {
        Value::Int(self.count)
    }
}

#[derive(Default)]
struct CountDistinctReducer {
    seen: std::collections::HashSet<String>,
}
impl Reducer for CountDistinctReducer {
    fn add(&mut self, value: &Value) {
        if value.is_invalid() {
            return;
        }
        if let Some(s) = value.as_string() {
            self.seen.insert(s);
        }
    }
    fn result(&self) -> Value {
        Value::Int(self.seen.len() as i64)
    }
}

/// Welford's online algorithm, so variance/std-dev are genuinely
/// incremental (no buffered sample) while remaining associative under
/// parallel merge — not required here since the Aggregate transformer
/// only ever adds sequentially, but kept anyway for parity with `Sum`.
struct VarianceReducer {
    population: bool,
    as_std_dev: bool,
    count: u64,
    mean: f64,
    m2: f64,
}
impl VarianceReducer {
    fn population() -> VarianceReducer {
        VarianceReducer { population: true, as_std_dev: true, count: 0, mean: 0.0, m2: 0.0 }
    }
    fn sample() -> VarianceReducer {
        VarianceReducer { population: false, as_std_dev: true, count: 0, mean: 0.0, m2: 0.0 }
    }
}
impl Reducer for VarianceReducer {
    fn add(&mut self, value: &Value) {
        if let Some(x) = value.as_double() {
            self.count += 1;
            let delta = x - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = x - self.mean;
            self.m2 += delta * delta2;
        }
    }
    fn result(&self) -> Value {
        let denom = if self.population {
            self.count
        } else {
            self.count.saturating_sub(1)
        };
        if denom == 0 {
            return Value::Invalid;
        }
        let variance = self.m2 / denom as f64;
        Value::double(if self.as_std_dev { variance.sqrt() } else { variance })
    }
}

#[derive(Default)]
struct MedianReducer {
    values: Vec<f64>,
}
impl Reducer for MedianReducer {
    fn add(&mut self, value: &Value) {
        if let Some(n) = value.as_double() {
            if n.is_finite() {
                self.values.push(n);
            }
        }
    }
    fn result(&self) -> Value {
        if self.values.is_empty() {
            return Value::Invalid;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Value::double((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Value::double(sorted[mid])
        }
    }
}

#[derive(Default)]
struct PackReducer {
    items: Vec<String>,
}
impl Reducer for PackReducer {
    fn add(&mut self, value: &Value) {
        if let Some(s) = value.as_string() {
            self.items.push(s);
        }
    }
    fn result(&self) -> Value {
        Value::String(Pack::new(self.items.clone()).encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_is_associative_across_batches() {
        let whole: Vec<Value> = (1..=6).map(Value::Int).collect();
        let mut direct = ReducerKind::Sum.new_reducer();
        for v in &whole {
            direct.add(v);
        }

        let mut batch_a = ReducerKind::Sum.new_reducer();
        let mut batch_b = ReducerKind::Sum.new_reducer();
        for v in &whole[..3] {
            batch_a.add(v);
        }
        for v in &whole[3..] {
            batch_b.add(v);
        }
        let merged = batch_a.result().add(&batch_b.result());

        assert_eq!(direct.result(), merged);
    }

    #[test]
    fn count_distinct_ignores_invalid() {
        let mut r = ReducerKind::CountDistinct.new_reducer();
        for v in [Value::Int(1), Value::Int(1), Value::Invalid, Value::Int(2)] {
            r.add(&v);
        }
        assert_eq!(r.result(), Value::Int(2));
    }

    #[test]
    fn min_max_skip_invalid() {
        let mut min = ReducerKind::Min.new_reducer();
        let mut max = ReducerKind::Max.new_reducer();
        for v in [Value::Int(3), Value::Invalid, Value::Int(1), Value::Int(9)] {
            min.add(&v);
            max.add(&v);
        }
        assert_eq!(min.result(), Value::Int(1));
        assert_eq!(max.result(), Value::Int(9));
    }

    #[test]
    fn median_ignores_a_nan_string_instead_of_panicking() {
        let mut r = ReducerKind::Median.new_reducer();
        for v in [Value::Int(1), Value::String("nan".to_string()), Value::Int(3), Value::Int(2)] {
            r.add(&v);
        }
        assert_eq!(r.result(), Value::Double(2.0));
    }
}
