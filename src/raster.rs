//! [Raster]: the in-memory fallback table used when an operator can't
//! be satisfied by streaming alone (spec §4.7, §6) — `transpose`,
//! `pivot`, `distinct`, `sort`, and `unique` all need the whole
//! dataset in hand at once.

use std::sync::Arc;

use crate::expr::{Aggregator, Expr};
use crate::value::{Column, OrderedSet, Row, Value};

/// One sort key: evaluate `expression` per row, compare the results,
/// and reverse the comparison when `ascending` is false. `numeric`
/// forces a double comparison (missing values sort first) instead of
/// the value model's usual numeric-then-string fallback.
#[derive(Debug, Clone)]
pub struct Order {
    pub expression: Expr,
    pub ascending: bool,
    pub numeric: bool,
}

/// A fully materialised table: a schema plus every row, in order.
#[derive(Debug, Clone, Default)]
pub struct Raster {
    schema: OrderedSet<Column>,
    rows: Vec<Row>,
}

impl Raster {
    pub fn new(schema: OrderedSet<Column>, rows: Vec<Row>) -> Raster {
        Raster { schema, rows }
    }

    pub fn columns(&self) -> &OrderedSet<Column> {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// First column's values become the new column headers (labelled
    /// "field"); every other column becomes a row, named after itself.
    /// The empty schema transposes to itself.
    pub fn transpose(&self) -> Raster {
        let columns = self.schema.as_slice();
        if columns.is_empty() {
            return Raster::default();
        }
        let id_column = &columns[0];
        let value_columns = &columns[1..];

        let mut new_schema = OrderedSet::new();
        new_schema.insert(Column::new("field"));
        for row in &self.rows {
            let header = row.get(id_column).as_string().unwrap_or_default();
            new_schema.insert(Column::new(header));
        }
        let schema = Arc::new(new_schema);

        let mut rows = Vec::with_capacity(value_columns.len());
        for column in value_columns {
            let mut values = Vec::with_capacity(schema.len());
            values.push(Value::String(column.as_str().to_string()));
            for row in &self.rows {
                values.push(row.get(column).clone());
            }
            values.resize(schema.len(), Value::Empty);
            rows.push(Row::new(schema.clone(), values));
        }
        Raster { schema: (*schema).clone(), rows }
    }

    /// Groups rows by `vertical`, spreads the distinct values of
    /// `horizontal` into new columns, and fills each cell by reducing
    /// `values.map` over the rows sharing that (vertical, horizontal)
    /// pair. A pair with no matching rows gets [Value::Empty].
    pub fn pivot(&self, horizontal: &Column, vertical: &Column, values: &Aggregator) -> Raster {
        let mut vertical_keys: Vec<Value> = Vec::new();
        let mut horizontal_keys: Vec<Value> = Vec::new();
        let mut cells: Vec<Vec<Option<Box<dyn crate::expr::Reducer>>>> = Vec::new();

        for row in &self.rows {
            let v = row.get(vertical).clone();
            let h = row.get(horizontal).clone();
            let vi = find_or_push(&mut vertical_keys, v);
            if vi == cells.len() {
                cells.push(Vec::new());
            }
            let hi = find_or_push(&mut horizontal_keys, h);
            while cells[vi].len() <= hi {
                cells[vi].push(None);
            }
            let reducer = cells[vi][hi].get_or_insert_with(|| values.new_reducer());
            reducer.add(&values.map.apply(row, None, None));
        }

        let mut schema = OrderedSet::new();
        schema.insert(vertical.clone());
        let header_names: Vec<String> = horizontal_keys.iter().map(|h| h.as_string().unwrap_or_default()).collect();
        for name in &header_names {
            schema.insert(Column::new(name.clone()));
        }
        let schema = Arc::new(schema);

        let mut rows = Vec::with_capacity(vertical_keys.len());
        for (vi, key) in vertical_keys.into_iter().enumerate() {
            let mut row_values = vec![key];
            for hi in 0..header_names.len() {
                let cell = cells[vi].get(hi).and_then(|c| c.as_ref()).map(|r| r.result()).unwrap_or(Value::Empty);
                row_values.push(cell);
            }
            rows.push(Row::new(schema.clone(), row_values));
        }
        Raster { schema: (*schema).clone(), rows }
    }

    /// Keeps the first occurrence of every row, where two rows are
    /// the same row when every value pairwise [Value::value_eq]s —
    /// so a row containing Invalid never matches another, including
    /// an identical-looking one.
    pub fn distinct(&self) -> Raster {
        let mut kept: Vec<Row> = Vec::new();
        'outer: for row in &self.rows {
            for existing in &kept {
                if rows_equal(existing, row) {
                    continue 'outer;
                }
            }
            kept.push(row.clone());
        }
        Raster { schema: self.schema.clone(), rows: kept }
    }

    /// Stable multi-key sort. Ties fall through to the next [Order];
    /// an incomparable pair (either side Invalid, or no common
    /// coercion) counts as equal rather than breaking the sort.
    pub fn sort(&self, orders: &[Order]) -> Raster {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| sort_key(orders, a, b));
        Raster { schema: self.schema.clone(), rows }
    }

    /// Distinct results of evaluating `expr` per row, in first-seen
    /// order. Every Invalid result is kept as its own entry, since
    /// Invalid is never equal to another Invalid.
    pub fn unique_values(&self, expr: &Expr) -> Vec<Value> {
        let mut seen: Vec<Value> = Vec::new();
        for row in &self.rows {
            let value = expr.apply(row, None, None);
            if value.is_invalid() || !seen.iter().any(|s| s.value_eq(&value)) {
                seen.push(value);
            }
        }
        seen
    }
}

fn sort_key(orders: &[Order], a: &Row, b: &Row) -> std::cmp::Ordering {
    for order in orders {
        let va = order.expression.apply(a, None, None);
        let vb = order.expression.apply(b, None, None);
        let ord = if order.numeric {
            match (va.as_double(), vb.as_double()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        } else {
            va.partial_compare(&vb).unwrap_or(std::cmp::Ordering::Equal)
        };
        let ord = if order.ascending { ord } else { ord.reverse() };
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    a.values().len() == b.values().len() && a.values().iter().zip(b.values()).all(|(x, y)| x.value_eq(y))
}

fn find_or_push(keys: &mut Vec<Value>, value: Value) -> usize {
    if !value.is_invalid() {
        if let Some(pos) = keys.iter().position(|k| k.value_eq(&value)) {
            return pos;
        }
    }
    keys.push(value);
    keys.len() - 1
}
