//! Predicate → MongoDB filter compiler.
//!
//! [`compile_filter`] produces a query filter document. Comparisons between
//! two fields have no filter form and go through `$expr`;
//! [`compile_expression`] exposes that aggregation-expression compiler for
//! whole predicates.

use bson::{doc, Bson, Document};

use super::types::{CompareOp, DocumentPredicate, Operand, Predicate, Range, RegexKind, RegexTest, UpperBound};
use crate::error::{Error, Result};
use crate::value::document::{primary_key_to_bson, to_bson};
use crate::value::Value;

const ID_FIELD: &str = "_id";

fn operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::NotEq => "$ne",
        CompareOp::Lt => "$lt",
        CompareOp::Gt => "$gt",
        CompareOp::LtEq => "$lte",
        CompareOp::GtEq => "$gte",
    }
}

fn field_name(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::Key(name) => Some(name),
        Operand::PrimaryKey => Some(ID_FIELD),
        Operand::Literal(_) => None,
    }
}

// Literals compared with the primary key are sent as object ids when they
// parse as one.
fn literal(value: &Value, against: &Operand) -> Result<Bson> {
    match against {
        Operand::PrimaryKey => primary_key_to_bson(value),
        _ => to_bson(value),
    }
}

/// Escape regex metacharacters so `text` matches literally.
pub fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn regex_source(test: &RegexTest) -> String {
    match test.kind {
        RegexKind::Matches => test.pattern.clone(),
        RegexKind::StartsWith => format!("^{}", escape_regex(&test.pattern)),
        RegexKind::EndsWith => format!("{}$", escape_regex(&test.pattern)),
        RegexKind::Contains => escape_regex(&test.pattern),
    }
}

fn regex_operator(test: &RegexTest) -> Document {
    let mut ops = doc! { "$regex": regex_source(test) };
    let options = test.options.to_option_string();
    if !options.is_empty() {
        ops.insert("$options", options);
    }
    ops
}

fn flatten<'p>(items: &'p [DocumentPredicate], conjunction: bool, out: &mut Vec<&'p DocumentPredicate>) {
    for item in items {
        match item {
            Predicate::And(inner) if conjunction => flatten(inner, conjunction, out),
            Predicate::Or(inner) if !conjunction => flatten(inner, conjunction, out),
            other => out.push(other),
        }
    }
}

/// Compile a predicate into a query filter.
pub fn compile_filter(predicate: &DocumentPredicate) -> Result<Document> {
    match predicate {
        Predicate::Compare { left, op, right } => compare_filter(left, *op, right),
        Predicate::In { left, right, negated } => membership_filter(left, right, *negated),
        Predicate::Between { subject, range, negated } => between_filter(subject, range, *negated),
        Predicate::Pattern { subject, test, negated } => {
            let field = field_name(subject).ok_or_else(|| Error::invalid_expression("pattern without a key"))?;
            let ops = regex_operator(test);
            Ok(if *negated {
                doc! { field: { "$not": ops } }
            } else {
                doc! { field: ops }
            })
        }
        Predicate::Not(inner) => Ok(negate(compile_filter(inner)?)),
        Predicate::And(items) => connective_filter(items, true),
        Predicate::Or(items) => connective_filter(items, false),
    }
}

fn connective_filter(items: &[DocumentPredicate], conjunction: bool) -> Result<Document> {
    let mut flat = Vec::with_capacity(items.len());
    flatten(items, conjunction, &mut flat);
    let mut clauses = flat
        .into_iter()
        .map(|item| compile_filter(item).map(Bson::Document))
        .collect::<Result<Vec<_>>>()?;
    match clauses.len() {
        0 => Err(Error::invalid_expression(if conjunction { "empty AND" } else { "empty OR" })),
        1 => match clauses.remove(0) {
            Bson::Document(single) => Ok(single),
            _ => Err(Error::invalid_expression("filter clause is not a document")),
        },
        _ => Ok(doc! { if conjunction { "$and" } else { "$or" }: clauses }),
    }
}

// `{k: {ops}}` negates in place as `{k: {$not: {ops}}}`; anything else
// (several fields, top-level operators, plain equality) goes under `$nor`.
fn negate(filter: Document) -> Document {
    if filter.len() == 1 {
        if let Some((field, Bson::Document(ops))) = filter.iter().next() {
            let pushable = !field.starts_with('$')
                && !ops.is_empty()
                && ops.keys().all(|k| k.starts_with('$'))
                && !ops.contains_key("$not");
            if pushable {
                return doc! { field.clone(): { "$not": ops.clone() } };
            }
        }
    }
    doc! { "$nor": [filter] }
}

fn compare_filter(left: &Operand, op: CompareOp, right: &Operand) -> Result<Document> {
    match (field_name(left), field_name(right)) {
        (Some(_), Some(_)) => Ok(doc! { "$expr": compare_expression(left, op, right)? }),
        (Some(field), None) => {
            let value = right.as_literal().map(|v| literal(v, left)).transpose()?.unwrap_or(Bson::Null);
            Ok(doc! { field: { operator(op): value } })
        }
        (None, Some(field)) => {
            let value = left.as_literal().map(|v| literal(v, right)).transpose()?.unwrap_or(Bson::Null);
            Ok(doc! { field: { operator(op.flipped()): value } })
        }
        (None, None) => Err(Error::invalid_expression("comparison between two literals")),
    }
}

fn literal_list(items: &[Value], against: &Operand) -> Result<Vec<Bson>> {
    if items.is_empty() {
        return Err(Error::invalid_expression("IN requires at least one value"));
    }
    items.iter().map(|v| literal(v, against)).collect()
}

fn membership_filter(left: &Operand, right: &Operand, negated: bool) -> Result<Document> {
    match (left, right) {
        (subject, Operand::Literal(Value::Array(items))) if subject.is_key() => {
            let field = field_name(subject).unwrap_or(ID_FIELD);
            let values = literal_list(items, subject)?;
            Ok(doc! { field: { if negated { "$nin" } else { "$in" }: values } })
        }
        // the array stored under the key contains the value; always under an
        // operator so a document value is never read as one
        (Operand::Literal(value), array) if array.is_key() => {
            let field = field_name(array).unwrap_or(ID_FIELD);
            let value = to_bson(value)?;
            Ok(doc! { field: { if negated { "$ne" } else { "$eq" }: value } })
        }
        (element, array) if element.is_key() && array.is_key() && !negated => Ok(doc! {
            "$expr": { "$in": [operand_expression(element)?, operand_expression(array)?] }
        }),
        _ => Err(Error::invalid_expression("unsupported IN operand pairing for documents")),
    }
}

fn between_filter(subject: &Operand, range: &Range, negated: bool) -> Result<Document> {
    let field = field_name(subject).ok_or_else(|| Error::invalid_expression("BETWEEN without a key"))?;
    let bound = |operand: &Operand| -> Result<Bson> {
        match operand {
            Operand::Literal(Value::Null) => Err(Error::invalid_expression("BETWEEN with a NULL bound")),
            Operand::Literal(value) => literal(value, subject),
            _ => Err(Error::invalid_expression("BETWEEN bounds must be literals in a filter")),
        }
    };
    let low = bound(&range.low)?;
    let high = bound(&range.high)?;
    let exclusive = range.upper == UpperBound::Exclusive;

    Ok(if negated {
        let high_op = if exclusive { "$gte" } else { "$gt" };
        doc! { "$or": [ { field: { "$lt": low } }, { field: { high_op: high } } ] }
    } else {
        let high_op = if exclusive { "$lt" } else { "$lte" };
        doc! { "$and": [ { field: { "$gte": low } }, { field: { high_op: high } } ] }
    })
}

/// Compile a predicate into an aggregation expression (the body of `$expr`).
pub fn compile_expression(predicate: &DocumentPredicate) -> Result<Bson> {
    let expr = match predicate {
        Predicate::Compare { left, op, right } => Bson::Document(compare_expression(left, *op, right)?),
        Predicate::In { left, right, negated } => {
            let haystack = match right {
                Operand::Literal(Value::Array(items)) => Bson::Array(
                    literal_list(items, left)?
                        .into_iter()
                        .map(quote_literal)
                        .collect(),
                ),
                Operand::Literal(_) => {
                    return Err(Error::invalid_expression("IN needs a key or a list of values"))
                }
                key => operand_expression(key)?,
            };
            let test = doc! { "$in": [operand_expression(left)?, haystack] };
            negate_expression(Bson::Document(test), *negated)
        }
        Predicate::Between { subject, range, negated } => {
            let s = operand_expression(subject)?;
            let high_op = match range.upper {
                UpperBound::Inclusive => "$lte",
                UpperBound::Exclusive => "$lt",
            };
            let test = doc! { "$and": [
                { "$gte": [s.clone(), operand_expression(&range.low)?] },
                { high_op: [s, operand_expression(&range.high)?] },
            ] };
            negate_expression(Bson::Document(test), *negated)
        }
        Predicate::Pattern { subject, test, negated } => {
            let mut regex = doc! {
                "input": operand_expression(subject)?,
                "regex": regex_source(test),
            };
            let options = test.options.to_option_string();
            if !options.is_empty() {
                regex.insert("options", options);
            }
            negate_expression(Bson::Document(doc! { "$regexMatch": regex }), *negated)
        }
        Predicate::Not(inner) => negate_expression(compile_expression(inner)?, true),
        Predicate::And(items) | Predicate::Or(items) => {
            let conjunction = matches!(predicate, Predicate::And(_));
            let mut flat = Vec::with_capacity(items.len());
            flatten(items, conjunction, &mut flat);
            let mut terms = flat
                .into_iter()
                .map(compile_expression)
                .collect::<Result<Vec<_>>>()?;
            match terms.len() {
                0 => return Err(Error::invalid_expression(if conjunction { "empty AND" } else { "empty OR" })),
                1 => terms.remove(0),
                _ => Bson::Document(doc! { if conjunction { "$and" } else { "$or" }: terms }),
            }
        }
    };
    Ok(expr)
}

fn negate_expression(expr: Bson, negated: bool) -> Bson {
    if negated {
        Bson::Document(doc! { "$not": [expr] })
    } else {
        expr
    }
}

fn compare_expression(left: &Operand, op: CompareOp, right: &Operand) -> Result<Document> {
    if !left.is_key() && !right.is_key() {
        return Err(Error::invalid_expression("comparison between two literals"));
    }
    let pk_side = if matches!(left, Operand::PrimaryKey) { left } else { right };
    let side = |operand: &Operand| -> Result<Bson> {
        match operand {
            Operand::Literal(value) => literal_expression(value, pk_side),
            key => operand_expression(key),
        }
    };
    Ok(doc! { operator(op): [side(left)?, side(right)?] })
}

/// `"$field"` for keys. Literals go through [`quote_literal`].
fn operand_expression(operand: &Operand) -> Result<Bson> {
    match operand {
        Operand::Key(name) => Ok(Bson::String(format!("${name}"))),
        Operand::PrimaryKey => Ok(Bson::String(format!("${ID_FIELD}"))),
        Operand::Literal(value) => literal_expression(value, operand),
    }
}

fn literal_expression(value: &Value, against: &Operand) -> Result<Bson> {
    literal(value, against).map(quote_literal)
}

// Strings starting with `$` would be field paths, and arrays or documents
// may hold either such strings or operator keys: all of them are wrapped
// in `$literal`.
fn quote_literal(bson: Bson) -> Bson {
    match bson {
        Bson::String(s) if s.starts_with('$') => Bson::Document(doc! { "$literal": s }),
        nested @ (Bson::Array(_) | Bson::Document(_)) => Bson::Document(doc! { "$literal": nested }),
        other => other,
    }
}
