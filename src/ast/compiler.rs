//! Predicate → SQL compiler.
//!
//! Every literal becomes a bind piece; the only literal text the compiler
//! writes itself is `NULL` on the right of a null-safe comparison.

use super::builder::SqlFragment;
use super::dialect::Dialect;
use super::types::{CompareOp, LikePattern, Operand, Predicate, Range, SqlPredicate, UpperBound};
use crate::error::{Error, Result};
use crate::value::Value;

/// Columns behind the primary-key pseudo-field of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    columns: Vec<String>,
}

impl PrimaryKey {
    pub fn single(column: impl Into<String>) -> Self {
        Self {
            columns: vec![column.into()],
        }
    }

    pub fn composite<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(Error::InvalidConfiguration("primary key without columns".into()));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }
}

/// Compile a predicate. The primary-key pseudo-field resolves to the
/// dialect's row identity column, if it has one.
pub fn compile_sql(predicate: &SqlPredicate, dialect: &Dialect) -> Result<SqlFragment> {
    let mut out = SqlFragment::new();
    SqlCompiler { dialect }.predicate(predicate, &mut out)?;
    Ok(out)
}

/// Compile a predicate against a model whose primary key is `key`.
pub fn compile_sql_with_key(predicate: &SqlPredicate, dialect: &Dialect, key: &PrimaryKey) -> Result<SqlFragment> {
    let resolved = resolve_primary_key(predicate, key)?;
    compile_sql(&resolved, dialect)
}

/// Debug text of a predicate with literals inlined. Logging only.
pub fn render_inline(predicate: &SqlPredicate, dialect: &Dialect) -> Result<String> {
    Ok(compile_sql(predicate, dialect)?.render_inline(dialect))
}

fn resolve_primary_key(predicate: &SqlPredicate, key: &PrimaryKey) -> Result<SqlPredicate> {
    let rename = |operand: &Operand| -> Result<Operand> {
        match operand {
            Operand::PrimaryKey if key.is_composite() => Err(Error::invalid_expression(
                "composite primary key only supports equality and inequality",
            )),
            Operand::PrimaryKey => Ok(Operand::Key(key.columns[0].clone())),
            other => Ok(other.clone()),
        }
    };

    let resolved = match predicate {
        Predicate::Compare { left, op, right } if key.is_composite() => {
            match (left, right) {
                (Operand::PrimaryKey, Operand::Literal(v)) | (Operand::Literal(v), Operand::PrimaryKey) => {
                    expand_composite(key, *op, v)?
                }
                (Operand::PrimaryKey, _) | (_, Operand::PrimaryKey) => {
                    return Err(Error::invalid_expression(
                        "composite primary key can only be compared with a literal",
                    ))
                }
                _ => predicate.clone(),
            }
        }
        Predicate::Compare { left, op, right } => Predicate::Compare {
            left: rename(left)?,
            op: *op,
            right: rename(right)?,
        },
        Predicate::In { left, right, negated } => Predicate::In {
            left: rename(left)?,
            right: rename(right)?,
            negated: *negated,
        },
        Predicate::Between { subject, range, negated } => Predicate::Between {
            subject: rename(subject)?,
            range: Range {
                low: rename(&range.low)?,
                high: rename(&range.high)?,
                upper: range.upper,
            },
            negated: *negated,
        },
        Predicate::Pattern { subject, test, negated } => Predicate::Pattern {
            subject: rename(subject)?,
            test: LikePattern(rename(&test.0)?),
            negated: *negated,
        },
        Predicate::Not(inner) => Predicate::Not(Box::new(resolve_primary_key(inner, key)?)),
        Predicate::And(items) => Predicate::And(
            items
                .iter()
                .map(|p| resolve_primary_key(p, key))
                .collect::<Result<_>>()?,
        ),
        Predicate::Or(items) => Predicate::Or(
            items
                .iter()
                .map(|p| resolve_primary_key(p, key))
                .collect::<Result<_>>()?,
        ),
    };
    Ok(resolved)
}

// Equality on a composite key: AND of column equalities. Inequality: OR of
// column inequalities. The value is positional (array) or by name (map).
fn expand_composite(key: &PrimaryKey, op: CompareOp, value: &Value) -> Result<SqlPredicate> {
    if !op.is_equality() {
        return Err(Error::invalid_expression(
            "composite primary key only supports equality and inequality",
        ));
    }
    let parts: Vec<Value> = match value {
        Value::Array(items) if items.len() == key.columns.len() => items.clone(),
        Value::Array(items) => {
            return Err(Error::invalid_expression(format!(
                "composite primary key has {} columns, got {} values",
                key.columns.len(),
                items.len()
            )))
        }
        Value::Map(map) => key
            .columns
            .iter()
            .map(|column| {
                map.get(column)
                    .cloned()
                    .ok_or_else(|| Error::invalid_expression(format!("missing primary key column {column}")))
            })
            .collect::<Result<_>>()?,
        Value::Null => vec![Value::Null; key.columns.len()],
        other => {
            return Err(Error::invalid_expression(format!(
                "composite primary key compared with a {}",
                other.kind()
            )))
        }
    };

    let terms: Vec<SqlPredicate> = key
        .columns
        .iter()
        .zip(parts)
        .map(|(column, value)| Predicate::Compare {
            left: Operand::Key(column.clone()),
            op,
            right: Operand::Literal(value),
        })
        .collect();
    Ok(if op == CompareOp::Eq {
        Predicate::And(terms)
    } else {
        Predicate::Or(terms)
    })
}

fn flatten<'p>(items: &'p [SqlPredicate], conjunction: bool, out: &mut Vec<&'p SqlPredicate>) {
    for item in items {
        match item {
            Predicate::And(inner) if conjunction => flatten(inner, conjunction, out),
            Predicate::Or(inner) if !conjunction => flatten(inner, conjunction, out),
            other => out.push(other),
        }
    }
}

struct SqlCompiler<'d> {
    dialect: &'d Dialect,
}

impl SqlCompiler<'_> {
    fn predicate(&self, predicate: &SqlPredicate, out: &mut SqlFragment) -> Result<()> {
        match predicate {
            Predicate::Compare { left, op, right } => self.compare(left, *op, right, out),
            Predicate::In { left, right, negated } => self.membership(left, right, *negated, out),
            Predicate::Between { subject, range, negated } => self.between(subject, range, *negated, out),
            Predicate::Pattern { subject, test, negated } => {
                if !subject.is_key() && !test.0.is_key() {
                    return Err(Error::invalid_expression("LIKE without a key"));
                }
                self.operand(subject, out)?;
                out.push(if *negated { "NOT LIKE" } else { "LIKE" });
                self.operand(&test.0, out)
            }
            Predicate::Not(inner) => {
                out.push("NOT");
                if matches!(**inner, Predicate::Compare { .. }) {
                    self.predicate(inner, out)
                } else {
                    out.push("(");
                    self.predicate(inner, out)?;
                    out.glue(")");
                    Ok(())
                }
            }
            Predicate::And(items) => self.connective(items, true, out),
            Predicate::Or(items) => self.connective(items, false, out),
        }
    }

    fn connective(&self, items: &[SqlPredicate], conjunction: bool, out: &mut SqlFragment) -> Result<()> {
        let mut flat = Vec::with_capacity(items.len());
        flatten(items, conjunction, &mut flat);
        if flat.is_empty() {
            return Err(Error::invalid_expression(if conjunction { "empty AND" } else { "empty OR" }));
        }
        for (i, item) in flat.into_iter().enumerate() {
            if i > 0 {
                out.push(if conjunction { "AND" } else { "OR" });
            }
            let grouped = conjunction && matches!(item, Predicate::Or(inner) if or_width(inner) > 1);
            if grouped {
                out.push("(");
                self.predicate(item, out)?;
                out.glue(")");
            } else {
                self.predicate(item, out)?;
            }
        }
        Ok(())
    }

    fn operand(&self, operand: &Operand, out: &mut SqlFragment) -> Result<()> {
        match operand {
            Operand::Key(name) => {
                out.push_ident(name.as_str());
            }
            Operand::PrimaryKey => match self.dialect.row_identity {
                Some(column) => {
                    out.push(column);
                }
                None => return Err(Error::unsupported_operation(self.dialect.name, "row identity")),
            },
            Operand::Literal(value) => {
                out.push_bind(value.clone());
            }
        }
        Ok(())
    }

    fn compare(&self, left: &Operand, op: CompareOp, right: &Operand, out: &mut SqlFragment) -> Result<()> {
        if !left.is_key() && !right.is_key() {
            return Err(Error::invalid_expression("comparison between two literals"));
        }
        let null_side = match (left, right) {
            (_, Operand::Literal(Value::Null)) => Some(left),
            (Operand::Literal(Value::Null), _) => Some(right),
            _ => None,
        };
        let Some(subject) = null_side else {
            self.operand(left, out)?;
            out.push(op.sql());
            return self.operand(right, out);
        };
        if !op.is_equality() {
            return Err(Error::invalid_expression(format!("{} against NULL", op.sql())));
        }

        let (operator, wrap) = self.dialect.null_safe_operator(op == CompareOp::NotEq);
        if wrap {
            out.push("NOT (");
        }
        self.operand(subject, out)?;
        out.push(operator).push("NULL");
        if wrap {
            out.glue(")");
        }
        Ok(())
    }

    fn membership(&self, left: &Operand, right: &Operand, negated: bool, out: &mut SqlFragment) -> Result<()> {
        match (left, right) {
            (subject, Operand::Literal(Value::Array(items))) if subject.is_key() => {
                if items.is_empty() {
                    return Err(Error::invalid_expression("IN requires at least one value"));
                }
                self.operand(subject, out)?;
                out.push(if negated { "NOT IN" } else { "IN" }).push("(");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.glue(",");
                    }
                    out.push_bind(item.clone());
                }
                out.glue(")");
                Ok(())
            }
            (element, array) if array.is_key() => {
                if !self.dialect.array_operators {
                    return Err(Error::unsupported_operation(self.dialect.name, "array membership"));
                }
                self.operand(element, out)?;
                out.push(if negated { "<> ALL(" } else { "= ANY(" });
                self.operand(array, out)?;
                out.glue(")");
                Ok(())
            }
            _ => Err(Error::invalid_expression("IN needs a key and a list of values")),
        }
    }

    fn between(&self, subject: &Operand, range: &Range, negated: bool, out: &mut SqlFragment) -> Result<()> {
        if !subject.is_key() && !range.low.is_key() && !range.high.is_key() {
            return Err(Error::invalid_expression("BETWEEN without a key"));
        }
        if [subject, &range.low, &range.high]
            .iter()
            .any(|o| matches!(o, Operand::Literal(Value::Null)))
        {
            return Err(Error::invalid_expression("BETWEEN with a NULL bound"));
        }

        match range.upper {
            UpperBound::Inclusive => {
                self.operand(subject, out)?;
                out.push(if negated { "NOT BETWEEN" } else { "BETWEEN" });
                self.operand(&range.low, out)?;
                out.push("AND");
                self.operand(&range.high, out)
            }
            UpperBound::Exclusive => {
                let (low_op, join, high_op) = if negated { ("<", "OR", ">=") } else { (">=", "AND", "<") };
                out.push("(");
                self.operand(subject, out)?;
                out.push(low_op);
                self.operand(&range.low, out)?;
                out.push(join);
                self.operand(subject, out)?;
                out.push(high_op);
                self.operand(&range.high, out)?;
                out.glue(")");
                Ok(())
            }
        }
    }
}

/// Number of disjuncts once nested ORs are flattened.
pub(crate) fn or_width(items: &[SqlPredicate]) -> usize {
    let mut flat = Vec::new();
    flatten(items, false, &mut flat);
    flat.len()
}
