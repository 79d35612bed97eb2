//! [Row]: an ordered tuple of [Value] paired with its column names.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Column, OrderedSet, Value};

/// An ordered vector of [Value] together with the [Column]s naming each
/// position. The name→index map is built lazily and shared (via `Arc`)
/// across rows produced by the same batch, since most batches share one
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    columns: Arc<OrderedSet<Column>>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<OrderedSet<Column>>, values: Vec<Value>) -> Row {
        Row { columns, values }
    }

    pub fn columns(&self) -> &OrderedSet<Column> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Direct index access — no lookup.
    pub fn at(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Invalid)
    }

    /// O(1) lookup by column name, after the name→index map has been
    /// built (it's rebuilt per distinct `Arc<OrderedSet<Column>>`
    /// pointer, not per row).
    pub fn get(&self, column: &Column) -> &Value {
        match self.columns.index_of(column) {
            Some(i) => self.at(i),
            None => &Value::Invalid,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Right-pads the row with [Value::Empty] up to `schema`'s column
    /// count, used by `Calculate` when appending new columns (spec
    /// §4.3).
    pub fn padded_to(&self, columns: Arc<OrderedSet<Column>>) -> Row {
        let mut values = self.values.clone();
        values.resize(columns.len(), Value::Empty);
        Row::new(columns, values)
    }

    pub fn with_value(&self, index: usize, value: Value) -> Row {
        let mut values = self.values.clone();
        if index < values.len() {
            values[index] = value;
        }
        Row::new(self.columns.clone(), values)
    }

    /// Projects and reorders columns by name; columns absent from this
    /// row become [Value::Invalid] (used by `Columns`/`selectColumns`).
    pub fn select(&self, target: &OrderedSet<Column>) -> Row {
        let values = target
            .iter()
            .map(|c| self.get(c).clone())
            .collect::<Vec<_>>();
        Row::new(Arc::new(target.clone()), values)
    }

    /// Builds a name→value map, mostly useful for debugging/tests.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| (c.as_str().to_string(), v.clone()))
            .collect()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().zip(other.values.iter()).all(|(a, b)| a == b)
    }
}
