//! Statement builder.
//!
//! A [`SqlFragment`] is an ordered list of pieces (text, identifiers, bind
//! values). Rendering walks the pieces once, left to right, so placeholders
//! come out in exactly the order their values were appended.

use std::borrow::Cow;
use std::fmt::Write as _;

use super::compiler::{compile_sql, or_width};
use super::dialect::{Dialect, RowLock, UpdateForm, UpdateOperator};
use super::types::{Predicate, SqlPredicate};
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Text(Cow<'static, str>),
    /// Punctuation that attaches to the previous piece (`,` `)`).
    Glue(Cow<'static, str>),
    Ident(String),
    Bind(Value),
    /// Refers back to the n-th `Bind` of the fragment (0-based).
    Reuse(usize),
    /// A clause the dialect cannot express. Rendering fails on it.
    Unsupported(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pieces: Vec<Piece>,
    bind_count: usize,
}

impl SqlFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn bind_count(&self) -> usize {
        self.bind_count
    }

    pub fn push(&mut self, text: impl Into<Cow<'static, str>>) -> &mut Self {
        self.pieces.push(Piece::Text(text.into()));
        self
    }

    pub fn glue(&mut self, text: impl Into<Cow<'static, str>>) -> &mut Self {
        self.pieces.push(Piece::Glue(text.into()));
        self
    }

    pub fn push_ident(&mut self, name: impl Into<String>) -> &mut Self {
        self.pieces.push(Piece::Ident(name.into()));
        self
    }

    /// Append a bind value. Returns its index for [`SqlFragment::push_reuse`].
    pub fn push_bind(&mut self, value: impl Into<Value>) -> usize {
        self.pieces.push(Piece::Bind(value.into()));
        self.bind_count += 1;
        self.bind_count - 1
    }

    pub fn push_reuse(&mut self, index: usize) -> &mut Self {
        self.pieces.push(Piece::Reuse(index));
        self
    }

    pub(crate) fn push_unsupported(&mut self, operation: impl Into<String>) -> &mut Self {
        self.pieces.push(Piece::Unsupported(operation.into()));
        self
    }

    /// Append another fragment. Its bind reuses keep pointing at its own binds.
    pub fn append(&mut self, other: SqlFragment) -> &mut Self {
        let offset = self.bind_count;
        self.pieces.extend(other.pieces.into_iter().map(|piece| match piece {
            Piece::Reuse(i) => Piece::Reuse(i + offset),
            other => other,
        }));
        self.bind_count += other.bind_count;
        self
    }

    /// Append `other` wrapped in parentheses.
    pub fn append_parenthesized(&mut self, other: SqlFragment) -> &mut Self {
        self.push("(");
        self.append(other);
        self.glue(")")
    }

    pub fn render(&self, dialect: &'static Dialect) -> Result<RenderedStatement> {
        let mut sql = String::new();
        let mut binds: Vec<Value> = Vec::with_capacity(self.bind_count);
        // placeholder number assigned to each Bind piece
        let mut slots: Vec<usize> = Vec::with_capacity(self.bind_count);

        for piece in &self.pieces {
            let text: Cow<'_, str> = match piece {
                Piece::Text(t) | Piece::Glue(t) => Cow::Borrowed(t.as_ref()),
                Piece::Ident(name) => Cow::Owned(dialect.quote_identifier(name)),
                Piece::Bind(value) => {
                    binds.push(value.clone());
                    slots.push(binds.len());
                    Cow::Owned(dialect.placeholder.render(binds.len()))
                }
                Piece::Reuse(index) => {
                    let slot = *slots.get(*index).ok_or_else(|| {
                        Error::invalid_expression(format!("bind reuse {index} refers to no earlier bind"))
                    })?;
                    if dialect.placeholder.is_reusable() {
                        Cow::Owned(dialect.placeholder.render(slot))
                    } else {
                        binds.push(binds[slot - 1].clone());
                        Cow::Owned(dialect.placeholder.render(binds.len()))
                    }
                }
                Piece::Unsupported(operation) => {
                    return Err(Error::unsupported_operation(dialect.name, operation.clone()))
                }
            };
            push_spaced(&mut sql, &text, matches!(piece, Piece::Glue(_)));
        }

        Ok(RenderedStatement {
            sql,
            binds,
            dialect,
            source: self.clone(),
        })
    }

    /// Text with every bind inlined as a literal. For logs only; never
    /// send the result to a server.
    pub fn render_inline(&self, dialect: &Dialect) -> String {
        let mut sql = String::new();
        let mut values: Vec<&Value> = Vec::new();
        for piece in &self.pieces {
            let text: Cow<'_, str> = match piece {
                Piece::Text(t) | Piece::Glue(t) => Cow::Borrowed(t.as_ref()),
                Piece::Ident(name) => Cow::Owned(dialect.quote_identifier(name)),
                Piece::Bind(value) => {
                    values.push(value);
                    Cow::Owned(inline_literal(value, dialect))
                }
                Piece::Reuse(index) => match values.get(*index) {
                    Some(value) => Cow::Owned(inline_literal(value, dialect)),
                    None => Cow::Borrowed("<missing bind>"),
                },
                Piece::Unsupported(operation) => Cow::Owned(format!("<unsupported {operation}>")),
            };
            push_spaced(&mut sql, &text, matches!(piece, Piece::Glue(_)));
        }
        sql
    }
}

fn push_spaced(sql: &mut String, text: &str, glue: bool) {
    if !glue && !sql.is_empty() && !sql.ends_with('(') && !sql.ends_with(char::is_whitespace) {
        sql.push(' ');
    }
    sql.push_str(text);
}

/// Literal text for [`SqlFragment::render_inline`].
pub(crate) fn inline_literal(value: &Value, dialect: &Dialect) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => dialect.bool_literal(*b).to_string(),
        Value::Int64(_) | Value::UInt64(_) | Value::Float64(_) | Value::Decimal(_) => {
            value.scalar_text().unwrap_or_default()
        }
        Value::Binary(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for b in bytes {
                let _ = write!(hex, "{b:02x}");
            }
            if dialect.fold_lowercase {
                format!("'\\x{hex}'")
            } else {
                format!("X'{hex}'")
            }
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(|v| inline_literal(v, dialect)).collect();
            if dialect.array_operators {
                format!("ARRAY[{}]", inner.join(", "))
            } else {
                format!("({})", inner.join(", "))
            }
        }
        Value::Map(_) => quote_text(
            &crate::value::json::to_json(value)
                .map(|json| json.to_string())
                .unwrap_or_default(),
        ),
        Value::Opaque(o) => format!("<{:?} {} bytes>", o.format, o.bytes.len()),
        other => quote_text(&other.scalar_text().unwrap_or_default()),
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// SQL text plus its bind values, in placeholder order.
#[derive(Debug, Clone)]
pub struct RenderedStatement {
    pub sql: String,
    pub binds: Vec<Value>,
    pub dialect: &'static Dialect,
    source: SqlFragment,
}

impl RenderedStatement {
    /// Debug text with the binds inlined.
    pub fn inline(&self) -> String {
        self.source.render_inline(self.dialect)
    }

    /// Parse the text with `sqlparser` using the matching dialect.
    pub fn check_syntax(&self) -> Result<()> {
        super::parser::check_syntax(&self.sql, self.dialect).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewOptions {
    pub replace: bool,
    pub temporary: bool,
    pub recursive: bool,
    pub if_not_exists: bool,
}

// Clauses that take a comma-separated continuation when repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListClause {
    Set,
    Values,
    OrderBy,
}

/// Fluent statement builder.
///
/// Errors raised while appending (an invalid predicate, a clause the dialect
/// lacks) are held until [`Statement::render`].
#[derive(Debug)]
pub struct Statement {
    dialect: &'static Dialect,
    fragment: SqlFragment,
    has_where: bool,
    open_list: Option<ListClause>,
    error: Option<Error>,
}

impl Clone for Statement {
    fn clone(&self) -> Self {
        Self {
            dialect: self.dialect,
            fragment: self.fragment.clone(),
            has_where: self.has_where,
            open_list: self.open_list,
            error: self.error.as_ref().map(clone_error),
        }
    }
}

impl Statement {
    pub fn new(dialect: &'static Dialect) -> Self {
        Self {
            dialect,
            fragment: SqlFragment::new(),
            has_where: false,
            open_list: None,
            error: None,
        }
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    pub fn fragment(&self) -> &SqlFragment {
        &self.fragment
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn idents(&mut self, columns: &[&str]) {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.fragment.glue(",");
            }
            self.fragment.push_ident(*column);
        }
    }

    fn list_clause(&mut self, clause: ListClause, keyword: &'static str) {
        if self.open_list == Some(clause) {
            self.fragment.glue(",");
        } else {
            self.fragment.push(keyword);
            self.open_list = Some(clause);
        }
    }

    fn close_list(&mut self) {
        self.open_list = None;
    }

    fn predicate(&mut self, predicate: &SqlPredicate) {
        match compile_sql(predicate, self.dialect) {
            // an OR root stays grouped when more conditions follow
            Ok(fragment) if matches!(predicate, Predicate::Or(items) if or_width(items) > 1) => {
                self.fragment.append_parenthesized(fragment);
            }
            Ok(fragment) => {
                self.fragment.append(fragment);
            }
            Err(err) => self.fail(err),
        }
    }

    /// `SELECT columns`; no columns selects `*`.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.close_list();
        self.fragment.push("SELECT");
        if columns.is_empty() {
            self.fragment.push("*");
        } else {
            self.idents(columns);
        }
        self
    }

    pub fn select_distinct(mut self, columns: &[&str]) -> Self {
        self.close_list();
        self.fragment.push("SELECT DISTINCT");
        if columns.is_empty() {
            self.fragment.push("*");
        } else {
            self.idents(columns);
        }
        self
    }

    pub fn delete_from(mut self, table: &str) -> Self {
        self.close_list();
        self.fragment.push("DELETE FROM").push_ident(table);
        self
    }

    pub fn update(mut self, table: &str) -> Self {
        self.close_list();
        self.fragment.push("UPDATE").push_ident(table);
        self
    }

    pub fn insert_into(mut self, table: &str, columns: &[&str]) -> Self {
        self.close_list();
        self.fragment.push("INSERT INTO").push_ident(table);
        if !columns.is_empty() {
            self.fragment.push("(");
            self.idents(columns);
            self.fragment.glue(")");
        }
        self
    }

    pub fn create_view(mut self, name: &str, options: ViewOptions) -> Self {
        self.close_list();
        let support = self.dialect.views;
        self.fragment.push("CREATE");
        if options.replace {
            if support.replace {
                self.fragment.push("OR REPLACE");
            } else {
                self.fragment.push_unsupported("CREATE OR REPLACE VIEW");
            }
        }
        if options.temporary {
            if support.temporary {
                self.fragment.push("TEMPORARY");
            } else {
                self.fragment.push_unsupported("temporary views");
            }
        }
        if options.recursive {
            if support.recursive {
                self.fragment.push("RECURSIVE");
            } else {
                self.fragment.push_unsupported("recursive views");
            }
        }
        self.fragment.push("VIEW");
        if options.if_not_exists {
            if support.if_not_exists {
                self.fragment.push("IF NOT EXISTS");
            } else {
                self.fragment.push_unsupported("CREATE VIEW IF NOT EXISTS");
            }
        }
        self.fragment.push_ident(name).push("AS");
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.close_list();
        self.fragment.push("FROM").push_ident(table);
        self
    }

    pub fn join(mut self, kind: JoinKind, table: &str, on: &SqlPredicate) -> Self {
        self.close_list();
        self.fragment.push(kind.keyword()).push_ident(table);
        if kind != JoinKind::Cross {
            self.fragment.push("ON");
            self.predicate(on);
        }
        self
    }

    pub fn join_using(mut self, kind: JoinKind, table: &str, columns: &[&str]) -> Self {
        self.close_list();
        self.fragment.push(kind.keyword()).push_ident(table).push("USING (");
        self.idents(columns);
        self.fragment.glue(")");
        self
    }

    pub fn where_(mut self, predicate: &SqlPredicate) -> Self {
        self.close_list();
        self.fragment.push(if self.has_where { "AND" } else { "WHERE" });
        self.has_where = true;
        self.predicate(predicate);
        self
    }

    /// Adds a condition to the `WHERE` clause, opening it if needed.
    pub fn and_where(self, predicate: &SqlPredicate) -> Self {
        self.where_(predicate)
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.list_clause(ListClause::Set, "SET");
        self.fragment.push_ident(column).push("=");
        self.fragment.push_bind(value);
        self
    }

    /// `column = column <op> value` (or `column = F(column, value)`).
    pub fn set_op(mut self, column: &str, op: UpdateOperator, value: impl Into<Value>) -> Self {
        self.list_clause(ListClause::Set, "SET");
        self.fragment.push_ident(column).push("=");
        match self.dialect.update_form(op) {
            Ok(UpdateForm::Infix(symbol)) => {
                self.fragment.push_ident(column).push(symbol);
                self.fragment.push_bind(value);
            }
            Ok(UpdateForm::Call(function)) => {
                self.fragment.push(format!("{function}(")).push_ident(column).glue(",");
                self.fragment.push_bind(value);
                self.fragment.glue(")");
            }
            Err(_) => {
                self.fragment.push_unsupported(op.name());
            }
        }
        self
    }

    /// One `VALUES` row. Repeated calls add rows.
    pub fn values(mut self, row: Vec<Value>) -> Self {
        self.list_clause(ListClause::Values, "VALUES");
        self.fragment.push("(");
        for (i, value) in row.into_iter().enumerate() {
            if i > 0 {
                self.fragment.glue(",");
            }
            self.fragment.push_bind(value);
        }
        self.fragment.glue(")");
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.close_list();
        self.fragment.push("GROUP BY");
        self.idents(columns);
        self
    }

    pub fn having(mut self, predicate: &SqlPredicate) -> Self {
        self.close_list();
        self.fragment.push("HAVING");
        self.predicate(predicate);
        self
    }

    pub fn order_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.list_clause(ListClause::OrderBy, "ORDER BY");
        self.fragment.push_ident(column).push(match direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.close_list();
        self.fragment.push("LIMIT").push(n.to_string());
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.close_list();
        self.fragment.push("OFFSET").push(n.to_string());
        self
    }

    pub fn lock(mut self, lock: RowLock) -> Self {
        self.close_list();
        match self.dialect.lock_clause(lock) {
            Ok(clause) => self.fragment.push(clause),
            Err(_) => self.fragment.push_unsupported("row locking"),
        };
        self
    }

    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.close_list();
        if !self.dialect.returning {
            self.fragment.push_unsupported("RETURNING");
            return self;
        }
        self.fragment.push("RETURNING");
        if columns.is_empty() {
            self.fragment.push("*");
        } else {
            self.idents(columns);
        }
        self
    }

    /// Append a complete `SELECT` (the body of a view or `INSERT ... SELECT`).
    pub fn as_select(mut self, select: Statement) -> Self {
        self.close_list();
        if !std::ptr::eq(self.dialect, select.dialect) {
            self.fail(Error::invalid_expression(format!(
                "cannot embed a {} statement in a {} statement",
                select.dialect.name, self.dialect.name
            )));
        }
        if let Some(err) = select.error {
            self.fail(err);
        }
        self.fragment.append(select.fragment);
        self
    }

    pub fn push(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.close_list();
        self.fragment.push(text);
        self
    }

    pub fn push_ident(mut self, name: &str) -> Self {
        self.fragment.push_ident(name);
        self
    }

    pub fn push_bind(mut self, value: impl Into<Value>) -> Self {
        self.fragment.push_bind(value);
        self
    }

    /// Reference the `index`-th bind (0-based) again.
    pub fn push_reuse(mut self, index: usize) -> Self {
        self.fragment.push_reuse(index);
        self
    }

    pub fn append(mut self, fragment: SqlFragment) -> Self {
        self.fragment.append(fragment);
        self
    }

    pub fn render(&self) -> Result<RenderedStatement> {
        if let Some(err) = &self.error {
            return Err(clone_error(err));
        }
        self.fragment.render(self.dialect)
    }

    pub fn render_inline(&self) -> String {
        self.fragment.render_inline(self.dialect)
    }
}

// Held builder errors are plain data variants; rendering can be repeated.
fn clone_error(err: &Error) -> Error {
    match err {
        Error::InvalidExpression(msg) => Error::InvalidExpression(msg.clone()),
        Error::UnsupportedOperation { dialect, operation } => Error::UnsupportedOperation {
            dialect,
            operation: operation.clone(),
        },
        Error::UnsupportedType { backend, type_name } => Error::UnsupportedType {
            backend,
            type_name: type_name.clone(),
        },
        other => Error::InvalidExpression(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::dialect::{Placeholder, MYSQL, POSTGRES, SQLITE};
    use crate::ast::types::key;

    fn placeholder_count(sql: &str, dialect: &Dialect) -> usize {
        let marker = match dialect.placeholder {
            Placeholder::Question => return sql.matches('?').count(),
            Placeholder::Dollar => '$',
            Placeholder::QuestionNumbered => '?',
        };
        let mut numbers: Vec<&str> = sql
            .split(marker)
            .skip(1)
            .map(|rest| rest.split(|c: char| !c.is_ascii_digit()).next().unwrap_or(""))
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers.len()
    }

    #[test]
    fn test_select_with_where_and_order() {
        let stmt = Statement::new(&POSTGRES)
            .select(&["id", "Name"])
            .from("users")
            .where_(&key("age").ge(18))
            .and_where(&key("status").eq("active").or(key("vip").eq(true)))
            .order_by("name", SortDirection::Asc)
            .order_by("id", SortDirection::Desc)
            .limit(10)
            .offset(20);
        let rendered = stmt.render().unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"age\" >= $1 AND (\"status\" = $2 OR \"vip\" = $3) \
             ORDER BY \"name\" ASC, \"id\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(rendered.binds, vec![Value::Int64(18), Value::from("active"), Value::Bool(true)]);
        rendered.check_syntax().unwrap();
    }

    #[test]
    fn test_update_with_operators() {
        let rendered = Statement::new(&SQLITE)
            .update("counters")
            .set("label", "x")
            .set_op("hits", UpdateOperator::Increment, 1)
            .set_op("peak", UpdateOperator::Max, 7)
            .where_(&key("id").eq(3))
            .render()
            .unwrap();
        assert_eq!(
            rendered.sql,
            "UPDATE \"counters\" SET \"label\" = ?1, \"hits\" = \"hits\" + ?2, \"peak\" = MAX(\"peak\", ?3) WHERE \"id\" = ?4"
        );
        assert_eq!(rendered.binds.len(), 4);
        rendered.check_syntax().unwrap();
    }

    #[test]
    fn test_insert_multiple_rows_returning() {
        let rendered = Statement::new(&POSTGRES)
            .insert_into("t", &["a", "b"])
            .values(vec![Value::Int64(1), Value::from("x")])
            .values(vec![Value::Int64(2), Value::Null])
            .returning(&["a"])
            .render()
            .unwrap();
        assert_eq!(
            rendered.sql,
            "INSERT INTO \"t\" (\"a\", \"b\") VALUES ($1, $2), ($3, $4) RETURNING \"a\""
        );
        rendered.check_syntax().unwrap();
    }

    #[test]
    fn test_unsupported_clauses_fail_at_render() {
        let lock = Statement::new(&SQLITE).select(&[]).from("t").lock(RowLock::for_update());
        assert!(matches!(
            lock.render(),
            Err(Error::UnsupportedOperation { dialect: "sqlite", .. })
        ));

        let returning = Statement::new(&MYSQL).delete_from("t").returning(&[]);
        assert!(matches!(
            returning.render(),
            Err(Error::UnsupportedOperation { dialect: "mysql", .. })
        ));

        let append = Statement::new(&MYSQL)
            .update("t")
            .set_op("tags", UpdateOperator::ArrayAppend, "x");
        assert!(append.render().is_err());

        let view = Statement::new(&SQLITE).create_view(
            "v",
            ViewOptions {
                replace: true,
                ..ViewOptions::default()
            },
        );
        assert!(view.render().is_err());
    }

    #[test]
    fn test_invalid_predicate_is_held_until_render() {
        let stmt = Statement::new(&POSTGRES)
            .select(&[])
            .from("t")
            .where_(&Predicate::Or(Vec::new()));
        assert!(matches!(stmt.render(), Err(Error::InvalidExpression(_))));
        // repeated renders report the same failure
        assert!(matches!(stmt.render(), Err(Error::InvalidExpression(_))));
    }

    #[test]
    fn test_cloned_statement_keeps_held_error() {
        let stmt = Statement::new(&SQLITE).select(&[]).from("t").lock(RowLock::for_update());
        let copy = stmt.clone();
        assert!(matches!(
            stmt.render(),
            Err(Error::UnsupportedOperation { dialect: "sqlite", .. })
        ));
        assert!(matches!(
            copy.render(),
            Err(Error::UnsupportedOperation { dialect: "sqlite", .. })
        ));

        let ok = Statement::new(&POSTGRES).select(&[]).from("t").where_(&key("a").eq(1));
        assert_eq!(ok.clone().render().unwrap().sql, ok.render().unwrap().sql);
    }

    #[test]
    fn test_nested_or_root_stays_grouped() {
        let nested: SqlPredicate = Predicate::Or(vec![Predicate::Or(vec![key("a").eq(1), key("b").eq(2)])]);
        let stmt = Statement::new(&POSTGRES)
            .select(&[])
            .from("t")
            .where_(&nested)
            .and_where(&key("c").eq(3));
        let rendered = stmt.render().unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT * FROM \"t\" WHERE (\"a\" = $1 OR \"b\" = $2) AND \"c\" = $3"
        );
        rendered.check_syntax().unwrap();

        // a lone disjunct needs no parentheses
        let single: SqlPredicate = Predicate::Or(vec![Predicate::Or(vec![key("a").eq(1)])]);
        let stmt = Statement::new(&POSTGRES).select(&[]).from("t").where_(&single);
        assert_eq!(stmt.render().unwrap().sql, "SELECT * FROM \"t\" WHERE \"a\" = $1");
    }

    #[test]
    fn test_reuse_numbering() {
        let mut fragment = SqlFragment::new();
        fragment.push("SELECT");
        let first = fragment.push_bind(5);
        fragment.glue(",");
        fragment.push_reuse(first);

        let pg = fragment.render(&POSTGRES).unwrap();
        assert_eq!(pg.sql, "SELECT $1, $1");
        assert_eq!(pg.binds.len(), 1);

        let my = fragment.render(&MYSQL).unwrap();
        assert_eq!(my.sql, "SELECT ?, ?");
        assert_eq!(my.binds, vec![Value::Int64(5), Value::Int64(5)]);

        let sqlite = fragment.render(&SQLITE).unwrap();
        assert_eq!(sqlite.sql, "SELECT ?1, ?1");
    }

    #[test]
    fn test_append_offsets_reuse() {
        let mut inner = SqlFragment::new();
        let idx = inner.push_bind("b");
        inner.push("||").push_reuse(idx);

        let mut outer = SqlFragment::new();
        outer.push("SELECT");
        outer.push_bind("a");
        outer.glue(",");
        outer.append(inner);

        let rendered = outer.render(&POSTGRES).unwrap();
        assert_eq!(rendered.sql, "SELECT $1, $2 || $2");
        assert_eq!(rendered.binds, vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn test_dangling_reuse_is_rejected() {
        let mut fragment = SqlFragment::new();
        fragment.push("SELECT").push_reuse(0);
        assert!(matches!(fragment.render(&POSTGRES), Err(Error::InvalidExpression(_))));
    }

    #[test]
    fn test_placeholder_slots_match_binds() {
        let predicate = key("a")
            .is_in(vec![1, 2, 3])
            .unwrap()
            .and(key("b").between(0, 9))
            .and(key("c").like("x%"));
        for dialect in [&POSTGRES, &MYSQL, &SQLITE] {
            let rendered = Statement::new(dialect)
                .select(&[])
                .from("t")
                .where_(&predicate)
                .render()
                .unwrap();
            assert_eq!(placeholder_count(&rendered.sql, dialect), rendered.binds.len(), "{}", rendered.sql);
            rendered.check_syntax().unwrap();
        }
    }

    #[test]
    fn test_create_view_as_select() {
        let select = Statement::new(&POSTGRES).select(&["id"]).from("users").where_(&key("active").eq(true));
        let rendered = Statement::new(&POSTGRES)
            .create_view(
                "active_users",
                ViewOptions {
                    replace: true,
                    ..ViewOptions::default()
                },
            )
            .as_select(select)
            .render()
            .unwrap();
        assert_eq!(
            rendered.sql,
            "CREATE OR REPLACE VIEW \"active_users\" AS SELECT \"id\" FROM \"users\" WHERE \"active\" = $1"
        );
    }

    #[test]
    fn test_join_and_lock() {
        let rendered = Statement::new(&POSTGRES)
            .select(&["o.id"])
            .from("orders")
            .join(JoinKind::Left, "customers", &key("orders.customer_id").eq(key("customers.id")))
            .lock(RowLock::for_update().skip_locked())
            .render()
            .unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT \"o\".\"id\" FROM \"orders\" LEFT JOIN \"customers\" ON \"orders\".\"customer_id\" = \"customers\".\"id\" FOR UPDATE SKIP LOCKED"
        );
    }

    #[test]
    fn test_render_inline_for_logs() {
        let stmt = Statement::new(&MYSQL)
            .select(&[])
            .from("t")
            .where_(&key("name").eq("O'Brien").and(key("flag").eq(true)));
        assert_eq!(
            stmt.render_inline(),
            "SELECT * FROM `t` WHERE `name` = 'O''Brien' AND `flag` = 1"
        );
    }
}
