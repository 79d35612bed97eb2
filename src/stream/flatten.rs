//! [Flatten]: pivots wide rows to long form, one output row per
//! (row, column) cell (spec §4.3, §6).

use std::sync::Arc;

use super::{FetchStatus, Stream, TransformerCore};
use crate::concurrency::Job;
use crate::error::Fallible;
use crate::value::{Column, OrderedSet, Row, Value};

pub struct Flatten {
    upstream: Box<dyn Stream>,
    value_to: Column,
    column_name_to: Option<Column>,
    row_identifier: Option<Column>,
    to_flatten: OrderedSet<Column>,
    core: TransformerCore,
}

impl Flatten {
    pub fn new(
        upstream: Box<dyn Stream>,
        value_to: Column,
        column_name_to: Option<Column>,
        row_identifier: Option<Column>,
        to_flatten: OrderedSet<Column>,
    ) -> Flatten {
        Flatten { upstream, value_to, column_name_to, row_identifier, to_flatten, core: TransformerCore::new() }
    }

    fn output_schema(&self) -> OrderedSet<Column> {
        let mut schema = OrderedSet::new();
        if let Some(id) = &self.row_identifier {
            schema.insert(id.clone());
        }
        if let Some(name) = &self.column_name_to {
            schema.insert(name.clone());
        }
        schema.insert(self.value_to.clone());
        schema
    }
}

impl Stream for Flatten {
    fn columns(&self, _job: &Job) -> OrderedSet<Column> {
        self.output_schema()
    }

    fn fetch(&self, job: &Job) -> Fallible<(Vec<Row>, FetchStatus)> {
        self.core.report_start(job);
        let upstream_schema = self.upstream.columns(job);
        let schema = Arc::new(self.output_schema());
        let to_flatten: Vec<&Column> = self.to_flatten.iter().filter(|c| upstream_schema.contains(c)).collect();

        let (rows, status) = self.upstream.fetch(job)?;
        let mut out = Vec::with_capacity(rows.len() * to_flatten.len());
        for row in &rows {
            for column in &to_flatten {
                let mut values = Vec::with_capacity(schema.len());
                if let Some(id) = &self.row_identifier {
                    values.push(row.get(id).clone());
                }
                if self.column_name_to.is_some() {
                    values.push(Value::String(column.as_str().to_string()));
                }
                values.push(row.get(column).clone());
                out.push(Row::new(schema.clone(), values));
            }
        }

        if status == FetchStatus::Finished {
            self.core.report_done(job);
        }
        Ok((out, status))
    }

    fn clone_stream(&self) -> Box<dyn Stream> {
        Box::new(Flatten::new(
            self.upstream.clone_stream(),
            self.value_to.clone(),
            self.column_name_to.clone(),
            self.row_identifier.clone(),
            self.to_flatten.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RowSource;
    use std::sync::Arc as StdArc;

    #[test]
    fn emits_one_row_per_flattened_cell() {
        let columns: OrderedSet<Column> = ["id", "a", "b"].iter().map(|s| Column::new(*s)).collect();
        let shared = StdArc::new(columns.clone());
        let rows = vec![Row::new(shared.clone(), vec![Value::Int(1), Value::Int(10), Value::Int(20)])];
        let source = RowSource::new(columns, rows);

        let to_flatten: OrderedSet<Column> = ["a", "b"].iter().map(|s| Column::new(*s)).collect();
        let flatten = Flatten::new(
            Box::new(source),
            Column::new("value"),
            Some(Column::new("column")),
            Some(Column::new("id")),
            to_flatten,
        );
        let job = Job::root();

        let (out, status) = flatten.fetch(&job).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].values(), &[Value::Int(1), Value::String("a".into()), Value::Int(10)]);
        assert_eq!(out[1].values(), &[Value::Int(1), Value::String("b".into()), Value::Int(20)]);
        assert_eq!(status, FetchStatus::Finished);
    }
}
