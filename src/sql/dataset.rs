//! [SQLDataset]: a [Dataset] that composes a [SQLFragment] alongside
//! whatever the streaming engine would do, falling back to the
//! streaming engine the moment an operator can't be translated (spec
//! §4.7). Specific database drivers are out of scope for this crate
//! (spec Non-goals), so `raster`/`stream`/`columns` always answer
//! through the backing Dataset — `sql()` is this type's actual
//! deliverable, the query a caller with a real connection would run.

use std::any::Any;
use std::sync::Arc;

use crate::concurrency::Job;
use crate::dataset::{Dataset, Options};
use crate::error::Fallible;
use crate::expr::{Aggregator, Expr};
use crate::raster::{Order, Raster};
use crate::stream::{JoinKind, Stream};
use crate::value::{Column, OrderedSet, Value};

use super::dialect::Dialect;
use super::fragment::{FragmentKind, SQLFragment};
use super::gen_expr::{translate_expr, ExprContext};

/// A Dataset backed by a table/subquery that can (partially) push its
/// operators down into SQL text. `fragment` is `None` once any
/// operator along the chain couldn't be translated — once poisoned it
/// stays `None`, since a later operator can't un-fallback an earlier one.
pub struct SQLDataset {
    dialect: Dialect,
    fragment: Option<SQLFragment>,
    schema: OrderedSet<Column>,
    backing: Box<dyn Dataset>,
}

impl SQLDataset {
    pub fn new(dialect: Dialect, table: &str, schema: OrderedSet<Column>, backing: Box<dyn Dataset>) -> SQLDataset {
        let quoted = dialect.handler().quote_identifier_path(&[table]);
        SQLDataset { dialect, fragment: Some(SQLFragment::from_table(&quoted)), schema, backing }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The SQL this dataset's operator chain translates to, or `None`
    /// if any operator fell back to the streaming engine. Uses
    /// default [Options] (formatted, with a signature comment).
    pub fn sql(&self) -> Option<String> {
        self.sql_with(&Options::default())
    }

    /// Like [Self::sql], but lets the caller control formatting and
    /// the trailing signature comment (teacher: `sql::compile`'s
    /// `options.format`/`options.signature_comment` handling).
    pub fn sql_with(&self, options: &Options) -> Option<String> {
        let fragment = self.fragment.clone()?;
        let finalized = if fragment.kind() == FragmentKind::Select { fragment } else { fragment.sql_select(None) };
        let sql = finalized.sql().to_string();

        let sql = if options.format {
            sqlformat::format(&sql, &sqlformat::QueryParams::default(), sqlformat::FormatOptions::default()) + "\n"
        } else {
            sql
        };

        let sql = if options.signature_comment {
            let pre = if options.format { "\n" } else { " " };
            format!("{sql}{pre}-- Generated by tabular-core, dialect {}", self.dialect)
        } else {
            sql
        };

        Some(sql)
    }

    fn sibling(&self) -> impl Fn(&Column) -> Option<String> {
        |c: &Column| Some(format!("\"{}\"", c.as_str()))
    }

    /// Logs once, only on the transition from "still pushed down" to
    /// "fell back" — never on an already-poisoned fragment, which
    /// would just repeat the same message down the whole chain.
    fn log_fallback(&self, operator: &str) {
        if self.fragment.is_some() {
            log::debug!("SQL push-down fell back to the streaming engine at {operator}");
        }
    }
}

impl Dataset for SQLDataset {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn columns(&self, job: &Job) -> OrderedSet<Column> {
        self.backing.columns(job)
    }

    fn raster(&self, job: &Job) -> Fallible<Raster> {
        self.backing.raster(job)
    }

    fn stream(&self) -> Box<dyn Stream> {
        self.backing.stream()
    }

    fn limit(&self, n: usize) -> Box<dyn Dataset> {
        let fragment = self.fragment.clone().map(|f| f.sql_limit(n));
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing: self.backing.limit(n) })
    }

    fn offset(&self, n: usize) -> Box<dyn Dataset> {
        let fragment = self.fragment.clone().map(|f| f.sql_offset(n));
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing: self.backing.offset(n) })
    }

    fn random(&self, k: usize) -> Box<dyn Dataset> {
        // No universal SQL construct for reservoir sampling; ORDER BY
        // RANDOM() LIMIT k is the common denominator this dialect set
        // supports, so translate to that rather than falling back.
        let fragment = self.fragment.clone().map(|f| f.sql_order("RANDOM()").sql_limit(k));
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing: self.backing.random(k) })
    }

    fn filter(&self, expr: Expr) -> Box<dyn Dataset> {
        let handler = self.dialect.handler();
        let ctx = ExprContext {
            dialect: handler.as_ref(),
            resolve_sibling: &self.sibling(),
            resolve_foreign: &self.sibling(),
            input_value: None,
        };
        let predicate = translate_expr(&expr, &ctx);
        if predicate.is_none() {
            self.log_fallback("filter");
        }
        let fragment = match (self.fragment.clone(), predicate) {
            (Some(f), Some(p)) => Some(f.sql_where_or_having(&p)),
            _ => None,
        };
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing: self.backing.filter(expr) })
    }

    fn calculate(&self, targets: Vec<(Column, Expr)>) -> Box<dyn Dataset> {
        let handler = self.dialect.handler();
        let ctx = ExprContext {
            dialect: handler.as_ref(),
            resolve_sibling: &self.sibling(),
            resolve_foreign: &self.sibling(),
            input_value: None,
        };
        let translated: Option<Vec<String>> = targets
            .iter()
            .map(|(col, expr)| translate_expr(expr, &ctx).map(|sql| format!("{sql} AS \"{}\"", col.as_str())))
            .collect();
        if translated.is_none() {
            self.log_fallback("calculate");
        }
        let fragment = match (self.fragment.clone(), translated) {
            (Some(f), Some(cols)) => Some(f.sql_select(Some(&format!("*, {}", cols.join(", "))))),
            _ => None,
        };
        let mut schema = self.schema.clone();
        for (col, _) in &targets {
            schema.insert(col.clone());
        }
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema, backing: self.backing.calculate(targets) })
    }

    fn select_columns(&self, columns: OrderedSet<Column>) -> Box<dyn Dataset> {
        let list: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c.as_str())).collect();
        let fragment = self.fragment.clone().map(|f| f.sql_select(Some(&list.join(", "))));
        Box::new(SQLDataset {
            dialect: self.dialect,
            fragment,
            schema: columns.clone(),
            backing: self.backing.select_columns(columns),
        })
    }

    fn aggregate(&self, groups: Vec<(Column, Expr)>, values: Vec<(Column, Aggregator)>) -> Box<dyn Dataset> {
        let handler = self.dialect.handler();
        let ctx = ExprContext {
            dialect: handler.as_ref(),
            resolve_sibling: &self.sibling(),
            resolve_foreign: &self.sibling(),
            input_value: None,
        };
        let group_sql: Option<Vec<String>> =
            groups.iter().map(|(_, expr)| translate_expr(expr, &ctx)).collect();
        let value_sql: Option<Vec<String>> = values
            .iter()
            .map(|(col, agg)| {
                let mapped = translate_expr(&agg.map, &ctx)?;
                let reduced = handler.sql_reducer(agg.reduce, &mapped)?;
                Some(format!("{reduced} AS \"{}\"", col.as_str()))
            })
            .collect();
        if group_sql.is_none() || value_sql.is_none() {
            self.log_fallback("aggregate");
        }
        let fragment = match (self.fragment.clone(), group_sql, value_sql) {
            (Some(f), Some(groups_sql), Some(values_sql)) if !groups_sql.is_empty() => {
                let group_cols: Vec<String> =
                    groups.iter().map(|(col, _)| format!("\"{}\"", col.as_str())).collect();
                let projection = group_cols.iter().cloned().chain(values_sql).collect::<Vec<_>>().join(", ");
                Some(f.sql_group(&groups_sql.join(", ")).sql_select(Some(&projection)))
            }
            _ => None,
        };
        let mut schema = OrderedSet::new();
        for (col, _) in &groups {
            schema.insert(col.clone());
        }
        for (col, _) in &values {
            schema.insert(col.clone());
        }
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema, backing: self.backing.aggregate(groups, values) })
    }

    fn flatten(
        &self,
        value_to: Column,
        column_name_to: Option<Column>,
        row_identifier: Option<Column>,
        to: OrderedSet<Column>,
    ) -> Box<dyn Dataset> {
        // No standard-SQL unpivot; always falls back.
        self.log_fallback("flatten");
        Box::new(SQLDataset {
            dialect: self.dialect,
            fragment: None,
            schema: self.schema.clone(),
            backing: self.backing.flatten(value_to, column_name_to, row_identifier, to),
        })
    }

    fn join(&self, kind: JoinKind, foreign: Arc<dyn Dataset>, expression: Expr) -> Box<dyn Dataset> {
        let backing = self.backing.join(kind, foreign.clone(), expression.clone());
        let other = foreign.as_any().downcast_ref::<SQLDataset>();
        let fragment = match (self.fragment.clone(), other) {
            (Some(f), Some(other_sql)) if other_sql.dialect == self.dialect => {
                let handler = self.dialect.handler();
                let ctx = ExprContext {
                    dialect: handler.as_ref(),
                    resolve_sibling: &self.sibling(),
                    resolve_foreign: &self.sibling(),
                    input_value: None,
                };
                let condition = translate_expr(&expression, &ctx);
                let other_table = other_sql.fragment.as_ref().map(|of| of.sql().to_string());
                match (condition, other_table) {
                    (Some(condition), Some(other_table)) => {
                        let keyword = match kind {
                            JoinKind::Inner => "JOIN",
                            JoinKind::Left => "LEFT JOIN",
                        };
                        Some(f.sql_join(&format!("{keyword} ({other_table}) AS \"foreign\" ON {condition}")))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if fragment.is_none() {
            self.log_fallback("join");
        }
        let mut schema = self.schema.clone();
        for col in foreign.columns(&Job::root()).iter() {
            schema.insert(col.clone());
        }
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema, backing })
    }

    fn union(&self, other: Arc<dyn Dataset>) -> Box<dyn Dataset> {
        let backing = self.backing.union(other.clone());
        let other_sql = other.as_any().downcast_ref::<SQLDataset>();
        let fragment = match (self.fragment.clone(), other_sql) {
            (Some(f), Some(other_sql)) if other_sql.dialect == self.dialect => {
                other_sql.fragment.clone().map(|of| f.sql_union(&of))
            }
            _ => None,
        };
        if fragment.is_none() {
            self.log_fallback("union");
        }
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing })
    }

    fn distinct(&self) -> Box<dyn Dataset> {
        let fragment = self.fragment.clone().map(|f| f.sql_select(Some("DISTINCT *")));
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing: self.backing.distinct() })
    }

    fn sort(&self, orders: Vec<Order>) -> Box<dyn Dataset> {
        let handler = self.dialect.handler();
        let ctx = ExprContext {
            dialect: handler.as_ref(),
            resolve_sibling: &self.sibling(),
            resolve_foreign: &self.sibling(),
            input_value: None,
        };
        let translated: Option<Vec<String>> = orders
            .iter()
            .map(|o| {
                let sql = translate_expr(&o.expression, &ctx)?;
                let sql = if o.numeric { handler.force_numeric_expression(&sql) } else { sql };
                Some(format!("{sql} {}", if o.ascending { "ASC" } else { "DESC" }))
            })
            .collect();
        if translated.is_none() {
            self.log_fallback("sort");
        }
        let fragment = match (self.fragment.clone(), translated) {
            (Some(f), Some(cols)) => Some(f.sql_order(&cols.join(", "))),
            _ => None,
        };
        Box::new(SQLDataset { dialect: self.dialect, fragment, schema: self.schema.clone(), backing: self.backing.sort(orders) })
    }

    fn transpose(&self) -> Box<dyn Dataset> {
        self.log_fallback("transpose");
        Box::new(SQLDataset { dialect: self.dialect, fragment: None, schema: self.schema.clone(), backing: self.backing.transpose() })
    }

    fn pivot(&self, horizontal: Column, vertical: Column, values: Aggregator) -> Box<dyn Dataset> {
        self.log_fallback("pivot");
        Box::new(SQLDataset {
            dialect: self.dialect,
            fragment: None,
            schema: self.schema.clone(),
            backing: self.backing.pivot(horizontal, vertical, values),
        })
    }

    fn unique(&self, job: &Job, expr: Expr) -> Fallible<Vec<Value>> {
        self.backing.unique(job, expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::StreamDataset;
    use crate::expr::{Binary, ReducerKind};
    use crate::value::{Row, Value};
    use std::sync::Arc as StdArc;

    fn table(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> SQLDataset {
        let schema: OrderedSet<Column> = columns.iter().map(|s| Column::new(*s)).collect();
        let shared = StdArc::new(schema.clone());
        let rows = rows.into_iter().map(|values| Row::new(shared.clone(), values)).collect();
        let backing = Box::new(StreamDataset::from_rows(schema.clone(), rows));
        SQLDataset::new(Dialect::Generic, name, schema, backing)
    }

    #[test]
    fn filter_then_limit_composes_into_one_select() {
        let ds = table("accounts", &["balance"], vec![vec![Value::Int(100)], vec![Value::Int(5)]]);
        let filtered = ds.filter(Expr::comparison(Expr::Sibling(Column::new("balance")), Expr::Literal(Value::Int(10)), Binary::Greater));
        let limited = filtered.limit(1);
        let sql_ds = limited.as_any().downcast_ref::<SQLDataset>().unwrap();
        let sql = sql_ds.sql().unwrap();
        assert!(sql.contains("WHERE"));
        assert!(sql.contains("LIMIT"));
    }

    #[test]
    fn raster_still_answers_correctly_when_sql_is_emitted() {
        let ds = table("accounts", &["balance"], vec![vec![Value::Int(100)], vec![Value::Int(5)]]);
        let filtered = ds.filter(Expr::comparison(Expr::Sibling(Column::new("balance")), Expr::Literal(Value::Int(10)), Binary::Greater));
        let job = Job::root();
        let raster = filtered.raster(&job).unwrap();
        assert_eq!(raster.rows().len(), 1);
        assert_eq!(raster.rows()[0].get(&Column::new("balance")), &Value::Int(100));
    }

    #[test]
    fn transpose_poisons_the_fragment_into_fallback() {
        let ds = table("t", &["a"], vec![vec![Value::Int(1)]]);
        let transposed = ds.transpose();
        let sql_ds = transposed.as_any().downcast_ref::<SQLDataset>().unwrap();
        assert!(sql_ds.sql().is_none());
    }

    #[test]
    fn sql_with_options_controls_formatting_and_signature() {
        let ds = table("accounts", &["balance"], vec![vec![Value::Int(100)]]);
        let filtered = ds.filter(Expr::comparison(Expr::Sibling(Column::new("balance")), Expr::Literal(Value::Int(10)), Binary::Greater));
        let sql_ds = filtered.as_any().downcast_ref::<SQLDataset>().unwrap();

        let bare = sql_ds.sql_with(&Options::default().with_format(false).with_signature_comment(false)).unwrap();
        assert!(!bare.contains("Generated by"));

        let signed = sql_ds.sql_with(&Options::default().with_signature_comment(true)).unwrap();
        assert!(signed.contains("Generated by tabular-core, dialect generic"));
    }

    #[test]
    fn aggregate_groups_and_reduces_in_sql() {
        let ds = table("sales", &["region", "amount"], vec![vec![Value::String("east".into()), Value::Int(10)]]);
        let aggregated = ds.aggregate(
            vec![(Column::new("region"), Expr::Sibling(Column::new("region")))],
            vec![(Column::new("total"), Aggregator::new(Expr::Sibling(Column::new("amount")), ReducerKind::Sum))],
        );
        let sql_ds = aggregated.as_any().downcast_ref::<SQLDataset>().unwrap();
        let sql = sql_ds.sql().unwrap();
        assert!(sql.to_uppercase().contains("GROUP BY"));
        assert!(sql.to_uppercase().contains("SUM"));
    }
}
