//! Feature map for SQL dialects (spec §4.7).
//!
//! The general principle is to strive to target only the generic
//! (i.e. default) dialect. Dialect-specifics are added only when the
//! generic form isn't supported, or a dialect-specific form is
//! materially better. As a consequence generated SQL favours common,
//! old-but-universal constructs over newer syntax.

use std::any::Any;
use core::fmt::Debug;

use serde::{Deserialize, Serialize};
use strum::VariantNames;

use crate::expr::{Binary, Function, ReducerKind};
use crate::value::Value;

/// SQL dialect selector. Construction of the concrete [SQLDialect]
/// handler goes through [Dialect::handler].
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::EnumVariantNames,
)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    Generic,
    Postgres,
    MySql,
    SQLite,
    MsSql,
    BigQuery,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::Generic
    }
}

impl Dialect {
    pub fn handler(&self) -> Box<dyn SQLDialect> {
        match self {
            Dialect::Generic => Box::new(GenericDialect),
            Dialect::Postgres => Box::new(PostgresDialect),
            Dialect::MySql => Box::new(MySqlDialect),
            Dialect::SQLite => Box::new(SQLiteDialect),
            Dialect::MsSql => Box::new(MsSqlDialect),
            Dialect::BigQuery => Box::new(BigQueryDialect),
        }
    }

    #[deprecated(note = "Use `Dialect::VARIANTS` instead")]
    pub fn names() -> &'static [&'static str] {
        Dialect::VARIANTS
    }
}

/// Translates the value model and the expression tree to SQL text.
///
/// Every translation method that can fail to express something in
/// this dialect returns `None` rather than an `Err` — a `None`
/// anywhere in an expression tree makes the whole expression
/// untranslatable, which callers treat as "push this part down to the
/// in-process stream instead" rather than a hard failure (spec §4.7).
pub trait SQLDialect: Any + Debug + Send + Sync {
    fn ident_quote(&self) -> char {
        '"'
    }

    /// Escapes a quote character that appears in `segment` by
    /// doubling it, then wraps the segment in the dialect's quote
    /// character. Applied once per dotted segment, so
    /// `quote_identifier_path(&["db", "my\"table"])` produces
    /// `"db"."my""table"`.
    fn quote_identifier_path(&self, segments: &[&str]) -> String {
        let q = self.ident_quote();
        segments
            .iter()
            .map(|s| format!("{q}{}{q}", s.replace(q, &format!("{q}{q}"))))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Escapes the backslash escape character first, then the quote
    /// character, so a literal escape followed by a literal quote
    /// round-trips.
    fn quote_string_literal(&self, s: &str) -> String {
        let escaped = s.replace('\\', "\\\\").replace('\'', "''");
        format!("'{escaped}'")
    }

    /// Renders a constant [Value] as a SQL literal.
    fn value_to_sql(&self, value: &Value) -> String {
        match value {
            Value::String(s) => self.quote_string_literal(s),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Bool(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            Value::Date(_) => self.quote_string_literal(&value.as_string().unwrap_or_default()),
            Value::Empty => "''".to_string(),
            Value::Invalid => "NULL".to_string(),
        }
    }

    /// What the "current cell" reference (`Expr::Identity`) renders
    /// as, given the caller-supplied column expression it stands for.
    /// No input value means there's nothing to translate against.
    fn identity_to_sql(&self, input_value: Option<&str>) -> String {
        input_value.unwrap_or("???").to_string()
    }

    /// Casts `expr` to a form the dialect will accept in a numeric
    /// comparison (identity by default; overridden for dialects that
    /// don't coerce strings implicitly).
    fn force_numeric_expression(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn force_string_expression(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn has_concat_function(&self) -> bool {
        true
    }

    /// Renders a [Binary] operator applied to already-translated
    /// operands. `first`/`second` name-match `Binary::apply`'s
    /// `(first, second)` so the right-to-left evaluation convention
    /// carries through unchanged: `op.apply(first, second)` in the
    /// in-process evaluator reads "apply `op` to `second` then
    /// `first`", and so does this.
    fn sql_binary(&self, op: Binary, first: &str, second: &str) -> Option<String> {
        let numeric = |a: &str, b: &str, symbol: &str| {
            format!("({} {symbol} {})", self.force_numeric_expression(a), self.force_numeric_expression(b))
        };
        Some(match op {
            Binary::Addition => numeric(second, first, "+"),
            Binary::Subtraction => numeric(second, first, "-"),
            Binary::Multiplication => numeric(second, first, "*"),
            Binary::Division => numeric(second, first, "/"),
            Binary::Modulus => format!("(MOD({}, {}))", self.force_numeric_expression(second), self.force_numeric_expression(first)),
            Binary::Power => format!("POWER({}, {})", self.force_numeric_expression(second), self.force_numeric_expression(first)),
            Binary::Concatenation => {
                if self.has_concat_function() {
                    format!("CONCAT({}, {})", self.force_string_expression(second), self.force_string_expression(first))
                } else {
                    format!("({} || {})", self.force_string_expression(second), self.force_string_expression(first))
                }
            }
            Binary::Equal => sql_equality(second, first, true),
            Binary::NotEqual => sql_equality(second, first, false),
            Binary::Greater => format!("({second} > {first})"),
            Binary::GreaterEqual => format!("({second} >= {first})"),
            Binary::Lesser => format!("({second} < {first})"),
            Binary::LesserEqual => format!("({second} <= {first})"),
            Binary::ContainsString => format!("({second} LIKE CONCAT('%', {}, '%'))", self.force_string_expression(first)),
            Binary::ContainsStringStrict => return None,
            Binary::MatchesRegex | Binary::MatchesRegexStrict => return None,
        })
    }

    /// Renders a [Function] call over already-translated arguments.
    /// `None` means this dialect has no translation — the reducer
    /// variants (`Sum`/`Average`/...) are handled separately via
    /// [SQLDialect::sql_reducer] since they only make sense inside an
    /// aggregate projection, not as a scalar call.
    fn sql_function(&self, function: Function, args: &[String]) -> Option<String> {
        use Function::*;
        Some(match function {
            Abs => format!("ABS({})", args.first()?),
            Round => format!("ROUND({})", args.first()?),
            Ceiling => format!("CEIL({})", args.first()?),
            Floor => format!("FLOOR({})", args.first()?),
            Sqrt => format!("SQRT({})", args.first()?),
            Exp => format!("EXP({})", args.first()?),
            Log10 => format!("LOG10({})", args.first()?),
            Upper => format!("UPPER({})", args.first()?),
            Lower => format!("LOWER({})", args.first()?),
            Trim => format!("TRIM({})", args.first()?),
            Length => format!("LENGTH({})", args.first()?),
            Concat => format!("CONCAT({})", args.join(", ")),
            And => format!("({})", args.join(" AND ")),
            Or => format!("({})", args.join(" OR ")),
            Not => format!("(NOT {})", args.first()?),
            Coalesce => format!("COALESCE({})", args.join(", ")),
            If if args.len() == 3 => format!("(CASE WHEN {} THEN {} ELSE {} END)", args[0], args[1], args[2]),
            If if args.len() == 2 => format!("(CASE WHEN {} THEN {} END)", args[0], args[1]),
            Now => "CURRENT_TIMESTAMP".to_string(),
            _ => return None,
        })
    }

    /// Renders a reducer applied to an already-translated mapping
    /// expression, for use inside a GROUP BY projection.
    fn sql_reducer(&self, reducer: ReducerKind, mapped: &str) -> Option<String> {
        Some(match reducer {
            ReducerKind::Sum => format!("SUM({mapped})"),
            ReducerKind::Average => format!("AVG({mapped})"),
            ReducerKind::Min => format!("MIN({mapped})"),
            ReducerKind::Max => format!("MAX({mapped})"),
            ReducerKind::Count => format!("COUNT({mapped})"),
            ReducerKind::CountAll => "COUNT(*)".to_string(),
            ReducerKind::CountDistinct => format!("COUNT(DISTINCT {mapped})"),
            ReducerKind::StdDevP => format!("STDDEV_POP({mapped})"),
            ReducerKind::StdDevS => format!("STDDEV_SAMP({mapped})"),
            ReducerKind::VarP => format!("VAR_POP({mapped})"),
            ReducerKind::VarS => format!("VAR_SAMP({mapped})"),
            ReducerKind::Median | ReducerKind::Pack => return None,
        })
    }

    fn supports_drop_column(&self) -> bool {
        true
    }

    fn supports_alter_column_type(&self) -> bool {
        true
    }
}

/// Rewrites `x = y` where one side is the literal NULL marker
/// (translated from [Value::Invalid]/identity checks) into
/// `IS [NOT] NULL`, since `NULL = NULL` is never true in SQL.
fn sql_equality(left: &str, right: &str, positive: bool) -> String {
    if right == "NULL" {
        return if positive { format!("({left} IS NULL)") } else { format!("({left} IS NOT NULL)") };
    }
    if left == "NULL" {
        return if positive { format!("({right} IS NULL)") } else { format!("({right} IS NOT NULL)") };
    }
    if positive {
        format!("({left} = {right})")
    } else {
        format!("({left} <> {right})")
    }
}

#[derive(Debug)]
pub struct GenericDialect;
#[derive(Debug)]
pub struct PostgresDialect;
#[derive(Debug)]
pub struct MySqlDialect;
#[derive(Debug)]
pub struct SQLiteDialect;
#[derive(Debug)]
pub struct MsSqlDialect;
#[derive(Debug)]
pub struct BigQueryDialect;

impl SQLDialect for GenericDialect {}

impl SQLDialect for PostgresDialect {
    fn sql_binary(&self, op: Binary, first: &str, second: &str) -> Option<String> {
        match op {
            Binary::MatchesRegex => Some(format!("({second} ~* {first})")),
            Binary::MatchesRegexStrict => Some(format!("({second} ~ {first})")),
            _ => GenericDialect.sql_binary(op, first, second),
        }
    }
}

impl SQLDialect for MySqlDialect {
    fn ident_quote(&self) -> char {
        '`'
    }
    fn sql_binary(&self, op: Binary, first: &str, second: &str) -> Option<String> {
        match op {
            Binary::MatchesRegex | Binary::MatchesRegexStrict => Some(format!("({second} REGEXP {first})")),
            _ => GenericDialect.sql_binary(op, first, second),
        }
    }
}

impl SQLDialect for SQLiteDialect {
    fn has_concat_function(&self) -> bool {
        false
    }
    fn supports_drop_column(&self) -> bool {
        false
    }
    fn supports_alter_column_type(&self) -> bool {
        false
    }
}

impl SQLDialect for MsSqlDialect {
    fn force_string_expression(&self, expr: &str) -> String {
        format!("CAST({expr} AS NVARCHAR(MAX))")
    }
    fn sql_binary(&self, op: Binary, first: &str, second: &str) -> Option<String> {
        match op {
            Binary::MatchesRegex | Binary::MatchesRegexStrict => None,
            _ => GenericDialect.sql_binary(op, first, second),
        }
    }
}

impl SQLDialect for BigQueryDialect {
    fn ident_quote(&self) -> char {
        '`'
    }
    fn sql_binary(&self, op: Binary, first: &str, second: &str) -> Option<String> {
        match op {
            Binary::MatchesRegex | Binary::MatchesRegexStrict => Some(format!("REGEXP_CONTAINS({second}, {first})")),
            _ => GenericDialect.sql_binary(op, first, second),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn dialect_from_str() {
        assert_eq!(Dialect::from_str("postgres"), Ok(Dialect::Postgres));
        assert!(Dialect::from_str("foo").is_err());
    }

    #[test]
    fn identifier_quoting_escapes_embedded_quote() {
        let d = GenericDialect;
        assert_eq!(d.quote_identifier_path(&["my\"table"]), "\"my\"\"table\"");
        assert_eq!(d.quote_identifier_path(&["db", "t"]), "\"db\".\"t\"");
    }

    #[test]
    fn mysql_quotes_with_backtick() {
        assert_eq!(MySqlDialect.ident_quote(), '`');
    }

    #[test]
    fn equality_with_null_becomes_is_null() {
        assert_eq!(sql_equality("x", "NULL", true), "(x IS NULL)");
        assert_eq!(sql_equality("x", "NULL", false), "(x IS NOT NULL)");
    }
}
