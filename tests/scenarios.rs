//! End-to-end checks for the concrete input/output scenarios named in
//! spec §8, exercised through the public crate API rather than any
//! one module's internals.

use std::io::Cursor;

use tabular_core::concurrency::Job;
use tabular_core::expr::{Aggregator, Binary, Expr, ReducerKind};
use tabular_core::value::{Column, Pack, Value};
use tabular_core::{mutable, Dataset};

fn csv_dataset(csv: &str) -> Box<dyn Dataset> {
    Box::new(mutable::csv_source(Cursor::new(csv.to_string())).unwrap())
}

#[test]
fn aggregate_sums_grouped_rows() {
    let dataset = csv_dataset("a,b\n1,2\n1,3\n2,5\n");
    let grouped = dataset.aggregate(
        vec![(Column::new("g"), Expr::Sibling(Column::new("a")))],
        vec![(Column::new("s"), Aggregator::new(Expr::Sibling(Column::new("b")), ReducerKind::Sum))],
    );
    let job = Job::root();
    let raster = grouped.raster(&job).unwrap();

    let mut rows: Vec<(String, String)> = raster
        .rows()
        .iter()
        .map(|r| (r.get(&Column::new("g")).to_string(), r.get(&Column::new("s")).to_string()))
        .collect();
    rows.sort();
    assert_eq!(rows, vec![("1".to_string(), "5".to_string()), ("2".to_string(), "5".to_string())]);
}

#[test]
fn addition_comparison_evaluates_right_to_left_and_prepares_to_a_literal() {
    let expr = Expr::comparison(Expr::Literal(Value::Int(2)), Expr::Literal(Value::Int(3)), Binary::Addition);
    let row = tabular_core::value::Row::new(std::sync::Arc::new(tabular_core::value::OrderedSet::new()), Vec::new());
    assert_eq!(expr.apply(&row, None, None), Value::Double(5.0));

    let prepared = expr.prepare();
    assert!(matches!(prepared, Expr::Literal(Value::Double(v)) if v == 5.0));
}

#[test]
fn reflexive_equality_prepares_to_true() {
    let expr = Expr::comparison(Expr::Sibling(Column::new("x")), Expr::Sibling(Column::new("x")), Binary::Equal);
    let prepared = expr.prepare();
    assert!(matches!(prepared, Expr::Literal(Value::Bool(true))));
}

#[test]
fn pack_round_trips_through_its_escape_scheme() {
    let packed = Pack::new(vec!["a".to_string(), "b,".to_string(), "c$".to_string()]);
    assert_eq!(packed.encode(), "a,b$0,c$1");

    let decoded = Pack::decode("$0$0$0,$1$0,,");
    assert_eq!(decoded.items(), &[",,,".to_string(), "$,".to_string(), "".to_string(), "".to_string()]);
}

#[test]
fn sql_fragment_orders_where_limit_as_a_nested_subquery_then_appends_a_second_where() {
    use tabular_core::sql::SQLFragment;

    let fragment = SQLFragment::from_table("t")
        .sql_where_or_having("x=1")
        .sql_limit(5)
        .sql_where_or_having("y=2")
        .sql_select(None);

    let sql = fragment.sql();
    let from_t = sql.find("FROM t").unwrap();
    let where_x = sql.find("WHERE x=1").unwrap();
    let limit = sql.find("LIMIT 5").unwrap();
    let where_y = sql.find("WHERE y=2").unwrap();
    assert!(from_t < where_x && where_x < limit && limit < where_y);
}

#[test]
fn filter_then_limit_yields_at_most_the_limit_matching_rows_in_source_order() {
    let dataset = csv_dataset("x\n1\n3\n3\n3\n2\n");
    let filtered = dataset.filter(Expr::comparison(
        Expr::Sibling(Column::new("x")),
        Expr::Literal(Value::String("3".to_string())),
        Binary::Equal,
    ));
    let limited = filtered.limit(2);
    let job = Job::root();
    let raster = limited.raster(&job).unwrap();

    assert_eq!(raster.rows().len(), 2);
    for row in raster.rows() {
        assert_eq!(row.get(&Column::new("x")), &Value::String("3".to_string()));
    }
}
