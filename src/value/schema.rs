//! [Schema]: the shape of a Dataset — an ordered column list plus an
//! optional identifier key set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{Column, OrderedSet};

/// Invariant: every column in `identifier` is present in `columns`.
/// Removing a column from `columns` removes it from `identifier` too —
/// enforced by routing all mutation through [Schema::remove_column].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: OrderedSet<Column>,
    identifier: Option<HashSet<Column>>,
}

impl Schema {
    pub fn new(columns: OrderedSet<Column>) -> Schema {
        Schema {
            columns,
            identifier: None,
        }
    }

    pub fn columns(&self) -> &OrderedSet<Column> {
        &self.columns
    }

    pub fn identifier(&self) -> Option<&HashSet<Column>> {
        self.identifier.as_ref()
    }

    /// Sets the identifier key set; any column not already in `columns`
    /// is dropped from the set, preserving the invariant.
    pub fn set_identifier(&mut self, key: HashSet<Column>) {
        let key = key
            .into_iter()
            .filter(|c| self.columns.contains(c))
            .collect();
        self.identifier = Some(key);
    }

    pub fn add_column(&mut self, column: Column) -> bool {
        self.columns.insert(column)
    }

    pub fn remove_column(&mut self, column: &Column) -> bool {
        let removed = self.columns.remove(column);
        if removed {
            if let Some(identifier) = &mut self.identifier {
                identifier.remove(column);
            }
        }
        removed
    }

    pub fn contains(&self, column: &Column) -> bool {
        self.columns.contains(column)
    }

    pub fn is_identifier(&self, column: &Column) -> bool {
        self.identifier
            .as_ref()
            .map(|id| id.contains(column))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_column_drops_it_from_identifier() {
        let mut schema = Schema::new(["a", "b"].iter().map(|s| Column::new(*s)).collect());
        schema.set_identifier([Column::new("a")].into_iter().collect());
        assert!(schema.is_identifier(&Column::new("a")));

        schema.remove_column(&Column::new("a"));
        assert!(!schema.is_identifier(&Column::new("a")));
        assert!(!schema.contains(&Column::new("a")));
    }

    #[test]
    fn identifier_columns_must_be_in_columns() {
        let mut schema = Schema::new(["a"].iter().map(|s| Column::new(*s)).collect());
        schema.set_identifier([Column::new("a"), Column::new("ghost")].into_iter().collect());
        assert!(schema.is_identifier(&Column::new("a")));
        assert!(!schema.is_identifier(&Column::new("ghost")));
    }
}
