//! Per-backend SQL rendering rules.
//!
//! A [`Dialect`] is a fixed table of syntax choices. The three supported
//! families are exposed as statics and shared by reference.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1`, `$2`, ... A number may be referenced again.
    Dollar,
    /// `?1`, `?2`, ...
    QuestionNumbered,
    /// `?`. Every occurrence consumes one bind.
    Question,
}

impl Placeholder {
    pub fn is_reusable(&self) -> bool {
        !matches!(self, Placeholder::Question)
    }

    /// Placeholder for the 1-based bind `n`.
    pub fn render(&self, n: usize) -> String {
        match self {
            Placeholder::Dollar => format!("${n}"),
            Placeholder::QuestionNumbered => format!("?{n}"),
            Placeholder::Question => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullSafeEquality {
    /// `IS NOT DISTINCT FROM` / `IS DISTINCT FROM`
    DistinctFrom,
    /// `<=>` / `NOT (a <=> b)`
    Spaceship,
    /// `IS` / `IS NOT`
    Is,
}

/// Column update performed relative to its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    Increment,
    Decrement,
    Multiply,
    Divide,
    Min,
    Max,
    ArrayAppend,
    ArrayRemove,
}

impl UpdateOperator {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateOperator::Increment => "increment",
            UpdateOperator::Decrement => "decrement",
            UpdateOperator::Multiply => "multiply",
            UpdateOperator::Divide => "divide",
            UpdateOperator::Min => "min",
            UpdateOperator::Max => "max",
            UpdateOperator::ArrayAppend => "array append",
            UpdateOperator::ArrayRemove => "array remove",
        }
    }
}

/// How an update operator combines the column with its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateForm {
    /// `column <op> value`
    Infix(&'static str),
    /// `NAME(column, value)`
    Call(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    Update,
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    #[default]
    Wait,
    NoWait,
    SkipLocked,
}

/// Row locking clause appended to a `SELECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLock {
    pub strength: LockStrength,
    pub wait: LockWait,
}

impl RowLock {
    pub fn for_update() -> Self {
        Self {
            strength: LockStrength::Update,
            wait: LockWait::Wait,
        }
    }

    pub fn for_share() -> Self {
        Self {
            strength: LockStrength::Share,
            wait: LockWait::Wait,
        }
    }

    pub fn nowait(mut self) -> Self {
        self.wait = LockWait::NoWait;
        self
    }

    pub fn skip_locked(mut self) -> Self {
        self.wait = LockWait::SkipLocked;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewSupport {
    pub replace: bool,
    pub temporary: bool,
    pub recursive: bool,
    pub if_not_exists: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Dialect {
    pub name: &'static str,
    pub quote: char,
    pub fold_lowercase: bool,
    pub placeholder: Placeholder,
    pub null_safe: NullSafeEquality,
    /// Booleans render as `1`/`0` instead of `TRUE`/`FALSE`.
    pub numeric_booleans: bool,
    pub row_identity: Option<&'static str>,
    pub row_locking: bool,
    pub returning: bool,
    /// `LEAST`/`GREATEST` or `MIN`/`MAX` as scalar functions.
    pub min_max: (&'static str, &'static str),
    pub array_operators: bool,
    pub views: ViewSupport,
}

pub static POSTGRES: Dialect = Dialect {
    name: "postgres",
    quote: '"',
    fold_lowercase: true,
    placeholder: Placeholder::Dollar,
    null_safe: NullSafeEquality::DistinctFrom,
    numeric_booleans: false,
    row_identity: Some("ctid"),
    row_locking: true,
    returning: true,
    min_max: ("LEAST", "GREATEST"),
    array_operators: true,
    views: ViewSupport {
        replace: true,
        temporary: true,
        recursive: true,
        if_not_exists: false,
    },
};

pub static MYSQL: Dialect = Dialect {
    name: "mysql",
    quote: '`',
    fold_lowercase: false,
    placeholder: Placeholder::Question,
    null_safe: NullSafeEquality::Spaceship,
    numeric_booleans: true,
    row_identity: None,
    row_locking: true,
    returning: false,
    min_max: ("LEAST", "GREATEST"),
    array_operators: false,
    views: ViewSupport {
        replace: true,
        temporary: false,
        recursive: false,
        if_not_exists: false,
    },
};

pub static SQLITE: Dialect = Dialect {
    name: "sqlite",
    quote: '"',
    fold_lowercase: false,
    placeholder: Placeholder::QuestionNumbered,
    null_safe: NullSafeEquality::Is,
    numeric_booleans: false,
    row_identity: Some("rowid"),
    row_locking: false,
    returning: true,
    min_max: ("MIN", "MAX"),
    array_operators: false,
    views: ViewSupport {
        replace: false,
        temporary: true,
        recursive: false,
        if_not_exists: true,
    },
};

impl Dialect {
    /// Quote an identifier. Dotted names are quoted part by part.
    pub fn quote_identifier(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len() + 2);
        for (i, part) in name.split('.').enumerate() {
            if i > 0 {
                out.push('.');
            }
            self.quote_part(part, &mut out);
        }
        out
    }

    fn quote_part(&self, part: &str, out: &mut String) {
        out.push(self.quote);
        for c in part.chars() {
            if c == self.quote {
                out.push(c);
            }
            if self.fold_lowercase {
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }
        out.push(self.quote);
    }

    pub fn bool_literal(&self, b: bool) -> &'static str {
        match (self.numeric_booleans, b) {
            (true, true) => "1",
            (true, false) => "0",
            (false, true) => "TRUE",
            (false, false) => "FALSE",
        }
    }

    /// Operator for a null-safe (in)equality, and whether the comparison
    /// must be wrapped in `NOT (...)` because the dialect has no negated form.
    pub fn null_safe_operator(&self, negated: bool) -> (&'static str, bool) {
        match (self.null_safe, negated) {
            (NullSafeEquality::DistinctFrom, false) => ("IS NOT DISTINCT FROM", false),
            (NullSafeEquality::DistinctFrom, true) => ("IS DISTINCT FROM", false),
            (NullSafeEquality::Spaceship, negated) => ("<=>", negated),
            (NullSafeEquality::Is, false) => ("IS", false),
            (NullSafeEquality::Is, true) => ("IS NOT", false),
        }
    }

    pub fn update_form(&self, op: UpdateOperator) -> Result<UpdateForm> {
        let form = match op {
            UpdateOperator::Increment => UpdateForm::Infix("+"),
            UpdateOperator::Decrement => UpdateForm::Infix("-"),
            UpdateOperator::Multiply => UpdateForm::Infix("*"),
            UpdateOperator::Divide => UpdateForm::Infix("/"),
            UpdateOperator::Min => UpdateForm::Call(self.min_max.0),
            UpdateOperator::Max => UpdateForm::Call(self.min_max.1),
            UpdateOperator::ArrayAppend if self.array_operators => UpdateForm::Call("array_append"),
            UpdateOperator::ArrayRemove if self.array_operators => UpdateForm::Call("array_remove"),
            UpdateOperator::ArrayAppend | UpdateOperator::ArrayRemove => {
                return Err(Error::unsupported_operation(self.name, op.name()))
            }
        };
        Ok(form)
    }

    pub fn lock_clause(&self, lock: RowLock) -> Result<&'static str> {
        if !self.row_locking {
            return Err(Error::unsupported_operation(self.name, "row locking"));
        }
        Ok(match (lock.strength, lock.wait) {
            (LockStrength::Update, LockWait::Wait) => "FOR UPDATE",
            (LockStrength::Update, LockWait::NoWait) => "FOR UPDATE NOWAIT",
            (LockStrength::Update, LockWait::SkipLocked) => "FOR UPDATE SKIP LOCKED",
            (LockStrength::Share, LockWait::Wait) => "FOR SHARE",
            (LockStrength::Share, LockWait::NoWait) => "FOR SHARE NOWAIT",
            (LockStrength::Share, LockWait::SkipLocked) => "FOR SHARE SKIP LOCKED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(POSTGRES.quote_identifier("Users"), "\"users\"");
        assert_eq!(POSTGRES.quote_identifier("public.Users"), "\"public\".\"users\"");
        assert_eq!(MYSQL.quote_identifier("Users"), "`Users`");
        assert_eq!(MYSQL.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(SQLITE.quote_identifier("Mixed\"Case"), "\"Mixed\"\"Case\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(POSTGRES.placeholder.render(3), "$3");
        assert_eq!(SQLITE.placeholder.render(3), "?3");
        assert_eq!(MYSQL.placeholder.render(3), "?");
        assert!(!MYSQL.placeholder.is_reusable());
    }

    #[test]
    fn test_null_safe_forms() {
        assert_eq!(POSTGRES.null_safe_operator(false), ("IS NOT DISTINCT FROM", false));
        assert_eq!(MYSQL.null_safe_operator(true), ("<=>", true));
        assert_eq!(SQLITE.null_safe_operator(true), ("IS NOT", false));
    }

    #[test]
    fn test_update_operators() {
        assert_eq!(POSTGRES.update_form(UpdateOperator::Max).unwrap(), UpdateForm::Call("GREATEST"));
        assert_eq!(SQLITE.update_form(UpdateOperator::Min).unwrap(), UpdateForm::Call("MIN"));
        assert!(matches!(
            MYSQL.update_form(UpdateOperator::ArrayAppend),
            Err(Error::UnsupportedOperation { dialect: "mysql", .. })
        ));
    }

    #[test]
    fn test_lock_clauses() {
        assert_eq!(POSTGRES.lock_clause(RowLock::for_update().skip_locked()).unwrap(), "FOR UPDATE SKIP LOCKED");
        assert_eq!(MYSQL.lock_clause(RowLock::for_share().nowait()).unwrap(), "FOR SHARE NOWAIT");
        assert!(SQLITE.lock_clause(RowLock::for_update()).is_err());
    }

    #[test]
    fn test_boolean_literals() {
        assert_eq!(POSTGRES.bool_literal(true), "TRUE");
        assert_eq!(MYSQL.bool_literal(false), "0");
    }
}
