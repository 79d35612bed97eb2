//! Formula surface (spec §6): parses `"=..."` text into an [Expr].
//!
//! Deliberately minimal — an AST-only contract, not a spreadsheet
//! language. It covers exactly: the `=` prefix, `[@name]`/bare
//! identifiers for [Expr::Sibling], `[#name]` for [Expr::Foreign], the
//! reserved `value` identifier for [Expr::Identity], and
//! `Name(arg1{sep}arg2…)` calls with a locale-supplied separator.
//! Nothing else — no infix operators, no precedence, no ranges.

use chumsky::prelude::*;
use strum::IntoEnumIterator;

use crate::error::{Error, Reason, WithErrorInfo};
use crate::expr::{Expr, Function};
use crate::value::{Column, Value};

/// The bare identifier that denotes the current cell rather than a
/// sibling column (spec §6: "the current-cell identifier maps to
/// Identity").
const IDENTITY_KEYWORD: &str = "value";

/// Parses a formula. `input` must begin with `=`; `separator` is the
/// locale-supplied argument delimiter used inside `Name(...)` calls.
pub fn parse_formula(input: &str, separator: char) -> anyhow::Result<Expr> {
    parse_formula_inner(input, separator).map_err(Into::into)
}

fn parse_formula_inner(input: &str, separator: char) -> Result<Expr, Error> {
    let body = input.strip_prefix('=').ok_or_else(|| {
        Error::new(Reason::Expected { who: None, expected: "a leading '='".to_string(), found: input.to_string() })
    })?;
    let parsed: Result<Expr, Error> = formula(separator)
        .then_ignore(end())
        .parse(body)
        .map_err(|errors| Error::new(Reason::Unexpected { found: format_errors(&errors) }));
    let expr = parsed.with_help("check the formula's syntax")?;
    check_arity(&expr)?;
    Ok(expr)
}

fn format_errors(errors: &[Simple<char>]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Arity is a post-parse check rather than a parser constraint — a
/// wrong argument count should read as "Sum takes 0 or more
/// arguments, got ..." rather than a generic syntax error.
fn check_arity(expr: &Expr) -> Result<(), Error> {
    if let Expr::Call { args, function } = expr {
        for arg in args {
            check_arity(arg)?;
        }
        if !function.arity().accepts(args.len()) {
            return Err(Error::new(Reason::Expected {
                who: Some(function.as_ref_name().to_string()),
                expected: describe_arity(function.arity()),
                found: format!("{} argument(s)", args.len()),
            }));
        }
    } else if let Expr::Comparison { first, second, .. } = expr {
        check_arity(first)?;
        check_arity(second)?;
    }
    Ok(())
}

fn describe_arity(arity: crate::expr::Arity) -> String {
    match arity.max {
        Some(max) if max == arity.min => format!("exactly {max} argument(s)"),
        Some(max) => format!("{} to {max} argument(s)", arity.min),
        None => format!("at least {} argument(s)", arity.min),
    }
}

fn formula(separator: char) -> impl Parser<char, Expr, Error = Simple<char>> {
    whitespace().ignore_then(expr(separator)).then_ignore(whitespace())
}

fn whitespace() -> impl Parser<char, (), Error = Simple<char>> + Clone {
    filter(|c: &char| c.is_whitespace()).repeated().ignored()
}

fn expr(separator: char) -> impl Parser<char, Expr, Error = Simple<char>> {
    recursive(move |expr| {
        let literal = literal().map(Expr::Literal);

        let sibling_ref = just('[')
            .ignore_then(just('@').or_not())
            .ignore_then(ident_part())
            .then_ignore(just(']'))
            .map(|name| Expr::Sibling(Column::new(name)));

        let foreign_ref = just('[')
            .ignore_then(just('#'))
            .ignore_then(ident_part())
            .then_ignore(just(']'))
            .map(|name| Expr::Foreign(Column::new(name)));

        let args = expr
            .clone()
            .padded_by(whitespace())
            .separated_by(just(separator))
            .allow_trailing()
            .delimited_by(just('('), just(')'));

        let call_or_ident =
            ident_with_quoting().then(args.clone().or_not()).try_map(move |((name, quoted), args), span| {
                match args {
                    Some(args) => {
                        let function = Function::iter()
                            .find(|f| f.as_ref_name().eq_ignore_ascii_case(&name))
                            .ok_or_else(|| Simple::custom(span, format!("unknown function '{name}'")))?;
                        Ok(Expr::Call { args, function })
                    }
                    None if !quoted && name.eq_ignore_ascii_case(IDENTITY_KEYWORD) => Ok(Expr::Identity),
                    None => Ok(Expr::Sibling(Column::new(name))),
                }
            });

        choice((literal, sibling_ref, foreign_ref, call_or_ident)).padded_by(whitespace())
    })
}

/// A plain or backtick-quoted identifier, paired with whether it was
/// quoted — quoting opts out of the reserved `value` keyword so a
/// column genuinely named `value` stays reachable.
fn ident_with_quoting() -> impl Parser<char, (String, bool), Error = Simple<char>> + Clone {
    let plain = filter(|c: &char| c.is_alphabetic() || *c == '_')
        .chain(filter(|c: &char| c.is_alphanumeric() || *c == '_').repeated())
        .collect::<String>()
        .map(|s| (s, false));
    let quoted = just('`')
        .ignore_then(filter(|c: &char| *c != '`').repeated())
        .then_ignore(just('`'))
        .collect::<String>()
        .map(|s| (s, true));
    plain.or(quoted)
}

fn ident_part() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    ident_with_quoting().map(|(name, _)| name)
}

fn literal() -> impl Parser<char, Value, Error = Simple<char>> + Clone {
    let string = just('"')
        .ignore_then(
            filter(|c: &char| *c != '"' && *c != '\\')
                .or(just('\\').ignore_then(any()))
                .repeated(),
        )
        .then_ignore(just('"'))
        .collect::<String>()
        .map(Value::String);

    let boolean = just("true").to(Value::Bool(true)).or(just("false").to(Value::Bool(false)));

    let digits = || filter(|c: &char| c.is_ascii_digit()).repeated().at_least(1);
    let number = just('-')
        .or_not()
        .chain::<char, _, _>(digits())
        .chain::<char, _, _>(just('.').chain(digits()).or_not().flatten())
        .collect::<String>()
        .map(|text: String| {
            if text.contains('.') {
                Value::double(text.parse::<f64>().unwrap_or(f64::NAN))
            } else {
                text.parse::<i64>().map(Value::Int).unwrap_or(Value::Invalid)
            }
        });

    choice((string, boolean, number))
}

trait AsRefName {
    fn as_ref_name(&self) -> &'static str;
}

impl AsRefName for Function {
    fn as_ref_name(&self) -> &'static str {
        self.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Row;

    fn eval(formula: &str) -> Value {
        let expr = parse_formula(formula, ',').unwrap();
        let row = Row::new(std::sync::Arc::new(Default::default()), Vec::new());
        expr.apply(&row, None, None)
    }

    #[test]
    fn requires_leading_equals() {
        assert!(parse_formula("1+1", ',').is_err());
    }

    #[test]
    fn parses_a_simple_call() {
        assert_eq!(eval("=Abs(-4)"), Value::Double(4.0));
    }

    #[test]
    fn parses_nested_calls_with_separator() {
        assert_eq!(eval("=Sum(1,2,3)"), Value::Double(6.0));
    }

    #[test]
    fn value_keyword_maps_to_identity() {
        let expr = parse_formula("=value", ',').unwrap();
        assert!(matches!(expr, Expr::Identity));
        let row = Row::new(std::sync::Arc::new(Default::default()), Vec::new());
        assert_eq!(expr.apply(&row, None, Some(&Value::Int(9))), Value::Int(9));
    }

    #[test]
    fn bare_identifier_is_a_sibling_reference() {
        let expr = parse_formula("=amount", ',').unwrap();
        assert!(matches!(expr, Expr::Sibling(col) if col == Column::new("amount")));
    }

    #[test]
    fn bracketed_sibling_and_foreign_references() {
        assert!(matches!(parse_formula("=[@amount]", ',').unwrap(), Expr::Sibling(col) if col == Column::new("amount")));
        assert!(matches!(parse_formula("=[#amount]", ',').unwrap(), Expr::Foreign(col) if col == Column::new("amount")));
    }

    #[test]
    fn unknown_function_name_is_an_error() {
        assert!(parse_formula("=NotAFunction(1)", ',').is_err());
    }

    #[test]
    fn wrong_arity_is_an_error() {
        assert!(parse_formula("=Abs(1,2)", ',').is_err());
    }

    #[test]
    fn semicolon_separator_for_locales_that_use_comma_as_decimal_point() {
        let expr = parse_formula("=Sum(1;2)", ';').unwrap();
        let row = Row::new(std::sync::Arc::new(Default::default()), Vec::new());
        assert_eq!(expr.apply(&row, None, None), Value::Double(3.0));
    }

    #[test]
    fn quoted_identifiers_allow_reserved_looking_names() {
        let expr = parse_formula("=`value`", ',').unwrap();
        assert!(matches!(expr, Expr::Sibling(col) if col == Column::new("value")));
    }

    #[test]
    fn string_and_boolean_literals() {
        assert_eq!(eval(r#"=IfError("x", "y")"#), Value::String("x".into()));
        assert_eq!(eval("=Not(false)"), Value::Bool(true));
    }
}
