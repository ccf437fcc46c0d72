//! Syntax checks for rendered SQL.
//!
//! Uses `sqlparser` with the parser dialect matching the rendering
//! [`Dialect`]. Nothing here is on the execution path; rendered text is
//! checked in tests and by callers that want an early diagnostic.

use sqlparser::ast as sp;
use sqlparser::dialect::{Dialect as ParserDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser as SqlParser;

use super::dialect::Dialect;
use crate::error::{Error, Result};

fn parser_dialect(dialect: &Dialect) -> Box<dyn ParserDialect> {
    match dialect.name {
        "mysql" => Box::new(MySqlDialect {}),
        "sqlite" => Box::new(SQLiteDialect {}),
        _ => Box::new(PostgreSqlDialect {}),
    }
}

/// Parse rendered SQL text. Fails with `InvalidExpression` on a syntax error.
pub fn check_syntax(sql: &str, dialect: &Dialect) -> Result<Vec<sp::Statement>> {
    let parser_dialect = parser_dialect(dialect);
    SqlParser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| Error::invalid_expression(format!("SQL parse error: {e}")))
}

/// Parse a standalone boolean expression, e.g. a compiled predicate.
pub fn parse_expression(text: &str, dialect: &Dialect) -> Result<sp::Expr> {
    let parser_dialect = parser_dialect(dialect);
    SqlParser::new(parser_dialect.as_ref())
        .try_with_sql(text)
        .and_then(|mut parser| parser.parse_expr())
        .map_err(|e| Error::invalid_expression(format!("SQL parse error: {e}")))
}

/// Evaluate the boolean skeleton of an expression. Each `column = TRUE`
/// leaf takes its value from `truth`.
#[cfg(test)]
pub(crate) fn evaluate(expr: &sp::Expr, truth: &dyn Fn(&str) -> bool) -> bool {
    match expr {
        sp::Expr::Nested(inner) => evaluate(inner, truth),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Not,
            expr,
        } => !evaluate(expr, truth),
        sp::Expr::BinaryOp {
            left,
            op: sp::BinaryOperator::And,
            right,
        } => evaluate(left, truth) && evaluate(right, truth),
        sp::Expr::BinaryOp {
            left,
            op: sp::BinaryOperator::Or,
            right,
        } => evaluate(left, truth) || evaluate(right, truth),
        sp::Expr::BinaryOp {
            left,
            op: sp::BinaryOperator::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (sp::Expr::Identifier(ident), sp::Expr::Value(sp::ValueWithSpan { value: sp::Value::Boolean(expected), .. })) => {
                truth(&ident.value) == *expected
            }
            other => panic!("unexpected comparison {other:?}"),
        },
        other => panic!("unexpected expression {other}"),
    }
}

/// Evaluate an expression over one row with SQL three-valued logic.
/// `row` gives each column's integer value, `None` for NULL; a `None`
/// result is UNKNOWN.
#[cfg(test)]
pub(crate) fn evaluate_nullable(expr: &sp::Expr, row: &dyn Fn(&str) -> Option<i64>) -> Option<bool> {
    let operand = |e: &sp::Expr| match e {
        sp::Expr::Identifier(ident) => row(&ident.value),
        sp::Expr::Value(sp::ValueWithSpan { value: sp::Value::Null, .. }) => None,
        sp::Expr::Value(sp::ValueWithSpan { value: sp::Value::Number(n, _), .. }) => Some(n.parse::<i64>().expect("integer literal")),
        other => panic!("unexpected operand {other}"),
    };
    let same = |l: &sp::Expr, r: &sp::Expr| operand(l) == operand(r);
    match expr {
        sp::Expr::Nested(inner) => evaluate_nullable(inner, row),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Not,
            expr,
        } => evaluate_nullable(expr, row).map(|b| !b),
        sp::Expr::IsNull(e) => Some(operand(e).is_none()),
        sp::Expr::IsNotNull(e) => Some(operand(e).is_some()),
        sp::Expr::IsNotDistinctFrom(l, r) => Some(same(l, r)),
        sp::Expr::IsDistinctFrom(l, r) => Some(!same(l, r)),
        sp::Expr::BinaryOp { left, op, right } => match op {
            sp::BinaryOperator::Spaceship => Some(same(left, right)),
            sp::BinaryOperator::And => match (evaluate_nullable(left, row), evaluate_nullable(right, row)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            sp::BinaryOperator::Or => match (evaluate_nullable(left, row), evaluate_nullable(right, row)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            sp::BinaryOperator::Eq => Some(operand(left)? == operand(right)?),
            sp::BinaryOperator::NotEq => Some(operand(left)? != operand(right)?),
            other => panic!("unexpected operator {other}"),
        },
        other => panic!("unexpected expression {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::dialect::{MYSQL, POSTGRES, SQLITE};

    #[test]
    fn test_check_syntax_accepts_each_dialect() {
        assert_eq!(check_syntax("SELECT \"a\" FROM \"t\" WHERE \"a\" = $1", &POSTGRES).unwrap().len(), 1);
        assert!(check_syntax("SELECT `a` FROM `t` WHERE `a` <=> ?", &MYSQL).is_ok());
        assert!(check_syntax("SELECT \"a\" FROM \"t\" WHERE \"a\" = ?1", &SQLITE).is_ok());
    }

    #[test]
    fn test_check_syntax_rejects_garbage() {
        assert!(matches!(
            check_syntax("SELEC 1 FROM", &POSTGRES),
            Err(Error::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_evaluate_precedence() {
        let expr = parse_expression("\"a\" = TRUE OR \"b\" = TRUE AND \"c\" = TRUE", &POSTGRES).unwrap();
        let truth = |name: &str| name == "a";
        assert!(evaluate(&expr, &truth));

        let grouped = parse_expression("(\"a\" = TRUE OR \"b\" = TRUE) AND \"c\" = TRUE", &POSTGRES).unwrap();
        assert!(!evaluate(&grouped, &truth));
    }

    #[test]
    fn test_evaluate_nullable_unknowns() {
        let row = |name: &str| if name == "a" { None } else { Some(1) };
        let eq = parse_expression("\"a\" = 1", &POSTGRES).unwrap();
        assert_eq!(evaluate_nullable(&eq, &row), None);
        let either = parse_expression("\"a\" = 1 OR \"b\" = 1", &POSTGRES).unwrap();
        assert_eq!(evaluate_nullable(&either, &row), Some(true));
        let spaceship = parse_expression("`a` <=> NULL", &MYSQL).unwrap();
        assert_eq!(evaluate_nullable(&spaceship, &row), Some(true));
    }
}
