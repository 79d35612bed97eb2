//! Translates an [Expr] tree to SQL text against a [SQLDialect] (spec §4.7).
//!
//! `None` anywhere in the tree means "can't express this in SQL" —
//! the caller falls back to evaluating that part in-process rather
//! than treating it as an error.

use super::dialect::SQLDialect;
use crate::expr::{Binary, Expr};
use crate::value::Column;

/// Translation context: how to resolve a [Column] reference to a
/// qualified SQL identifier, and what the "current cell" (`Identity`)
/// stands for.
pub struct ExprContext<'a> {
    pub dialect: &'a dyn SQLDialect,
    /// Resolves a sibling-row column to its identifier text — usually
    /// just the quoted column name, optionally table-qualified.
    pub resolve_sibling: &'a dyn Fn(&Column) -> Option<String>,
    /// Resolves a foreign-row column (the right side of a join) to its
    /// identifier text.
    pub resolve_foreign: &'a dyn Fn(&Column) -> Option<String>,
    /// What `Expr::Identity` stands for in this context, if anything.
    pub input_value: Option<&'a str>,
}

/// Translates `expr` to a SQL boolean/scalar expression string, or
/// `None` if any part of the tree has no SQL equivalent.
pub fn translate_expr(expr: &Expr, ctx: &ExprContext) -> Option<String> {
    match expr {
        Expr::Literal(v) => Some(ctx.dialect.value_to_sql(v)),
        Expr::Identity => Some(ctx.dialect.identity_to_sql(ctx.input_value)),
        Expr::Sibling(col) => (ctx.resolve_sibling)(col),
        Expr::Foreign(col) => (ctx.resolve_foreign)(col),
        Expr::Comparison { first, second, op } => {
            let first = translate_expr(first, ctx)?;
            let second = translate_expr(second, ctx)?;
            translate_binary(*op, &first, &second, ctx.dialect)
        }
        Expr::Call { args, function } => {
            let args: Option<Vec<String>> = args.iter().map(|a| translate_expr(a, ctx)).collect();
            ctx.dialect.sql_function(*function, &args?)
        }
    }
}

fn translate_binary(op: Binary, first: &str, second: &str, dialect: &dyn SQLDialect) -> Option<String> {
    dialect.sql_binary(op, first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::GenericDialect;
    use crate::value::Value;

    fn ctx(dialect: &GenericDialect) -> ExprContext<'_> {
        ExprContext {
            dialect,
            resolve_sibling: &|c: &Column| Some(format!("\"{}\"", c.as_str())),
            resolve_foreign: &|c: &Column| Some(format!("\"other\".\"{}\"", c.as_str())),
            input_value: None,
        }
    }

    #[test]
    fn translates_comparison_with_right_to_left_convention() {
        let dialect = GenericDialect;
        let expr = Expr::comparison(Expr::Literal(Value::Int(2)), Expr::Sibling(Column::new("x")), Binary::Subtraction);
        // first=2, second=x -> op.apply(first,second) means "second - first" i.e. "x - 2"
        let sql = translate_expr(&expr, &ctx(&dialect)).unwrap();
        assert_eq!(sql, "(\"x\" - 2)");
    }

    #[test]
    fn equality_against_invalid_literal_becomes_is_null() {
        let dialect = GenericDialect;
        let expr = Expr::comparison(Expr::Literal(Value::Invalid), Expr::Sibling(Column::new("x")), Binary::Equal);
        let sql = translate_expr(&expr, &ctx(&dialect)).unwrap();
        assert_eq!(sql, "(\"x\" IS NULL)");
    }

    #[test]
    fn untranslatable_function_propagates_none() {
        let dialect = GenericDialect;
        let expr = Expr::call(vec![Expr::Sibling(Column::new("x"))], crate::expr::Function::Sin);
        assert!(translate_expr(&expr, &ctx(&dialect)).is_none());
    }
}
