//! Predicate expression tree shared by the SQL and document compilers.
//!
//! The tree is generic over its pattern test: SQL predicates carry `LIKE`
//! patterns, document predicates carry regex tests. Everything else
//! (comparisons, ranges, set membership and the connectives) is shared.
//!
//! Build predicates with the small combinator API:
//!
//! ```
//! use dbkit::ast::{key, SqlPredicate};
//!
//! let adults: SqlPredicate = key("age").ge(18).and(key("name").like("A%"));
//! ```

use std::ops::Not;

use crate::error::{Error, Result};
use crate::value::{DateComponents, Value};

/// A leaf of the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A column or document field, by name.
    Key(String),
    /// The model's primary key; compilers resolve it to real columns.
    PrimaryKey,
    Literal(Value),
}

impl Operand {
    pub fn is_key(&self) -> bool {
        matches!(self, Operand::Key(_) | Operand::PrimaryKey)
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Operand::Literal(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! operand_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Literal(Value::from(v))
                }
            }
        )*
    };
}

operand_from!(
    bool,
    &str,
    String,
    i64,
    i32,
    u64,
    u32,
    f64,
    rust_decimal::Decimal,
    uuid::Uuid,
    chrono::NaiveDate,
    chrono::NaiveDateTime,
    DateComponents,
    Vec<u8>,
    Vec<Value>,
);

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Literal(v)
    }
}

impl From<Key> for Operand {
    fn from(k: Key) -> Self {
        k.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::LtEq => "<=",
            CompareOp::GtEq => ">=",
        }
    }

    /// The operator that keeps the meaning when both sides swap.
    pub fn flipped(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::GtEq => CompareOp::LtEq,
            other => *other,
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::NotEq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpperBound {
    #[default]
    Inclusive,
    Exclusive,
}

/// Bounds of a range test.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub low: Operand,
    pub high: Operand,
    pub upper: UpperBound,
}

/// SQL `LIKE` pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct LikePattern(pub Operand);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexKind {
    /// Pattern used as written.
    Matches,
    StartsWith,
    EndsWith,
    Contains,
}

/// Regex option flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegexOptions {
    pub case_insensitive: bool,
    pub multiline: bool,
    pub dot_matches_newline: bool,
    pub unicode: bool,
    pub extended: bool,
}

impl RegexOptions {
    pub fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
            ..Self::default()
        }
    }

    /// Canonical option string: one letter per flag, sorted.
    pub fn to_option_string(&self) -> String {
        let mut letters: Vec<char> = [
            (self.case_insensitive, 'i'),
            (self.multiline, 'm'),
            (self.dot_matches_newline, 's'),
            (self.unicode, 'u'),
            (self.extended, 'x'),
        ]
        .into_iter()
        .filter_map(|(on, letter)| on.then_some(letter))
        .collect();
        letters.sort_unstable();
        letters.into_iter().collect()
    }

    /// Parse an option string in any order. Unknown letters are rejected.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for letter in options.chars() {
            match letter {
                'i' => parsed.case_insensitive = true,
                'm' => parsed.multiline = true,
                's' => parsed.dot_matches_newline = true,
                'u' => parsed.unicode = true,
                'x' => parsed.extended = true,
                other => {
                    return Err(Error::invalid_expression(format!(
                        "unknown regex option {other:?}"
                    )))
                }
            }
        }
        Ok(parsed)
    }
}

/// Document-store pattern test.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexTest {
    pub kind: RegexKind,
    pub pattern: String,
    pub options: RegexOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate<P> {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// Set membership. With a literal list on the right this is the usual
    /// `IN (...)`; other operand pairings are compiler specific.
    In {
        left: Operand,
        right: Operand,
        negated: bool,
    },
    Between {
        subject: Operand,
        range: Range,
        negated: bool,
    },
    Pattern {
        subject: Operand,
        test: P,
        negated: bool,
    },
    Not(Box<Predicate<P>>),
    And(Vec<Predicate<P>>),
    Or(Vec<Predicate<P>>),
}

pub type SqlPredicate = Predicate<LikePattern>;
pub type DocumentPredicate = Predicate<RegexTest>;

/// Start a predicate on a named key.
pub fn key(name: impl Into<String>) -> Key {
    Key(Operand::Key(name.into()))
}

/// Start a predicate on the primary key.
pub fn primary_key() -> Key {
    Key(Operand::PrimaryKey)
}

/// Left-hand side of a predicate under construction.
#[derive(Debug, Clone)]
pub struct Key(Operand);

impl Key {
    fn compare<P>(self, op: CompareOp, rhs: impl Into<Operand>) -> Predicate<P> {
        Predicate::Compare {
            left: self.0,
            op,
            right: rhs.into(),
        }
    }

    pub fn eq<P>(self, rhs: impl Into<Operand>) -> Predicate<P> {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn ne<P>(self, rhs: impl Into<Operand>) -> Predicate<P> {
        self.compare(CompareOp::NotEq, rhs)
    }

    pub fn lt<P>(self, rhs: impl Into<Operand>) -> Predicate<P> {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn gt<P>(self, rhs: impl Into<Operand>) -> Predicate<P> {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn le<P>(self, rhs: impl Into<Operand>) -> Predicate<P> {
        self.compare(CompareOp::LtEq, rhs)
    }

    pub fn ge<P>(self, rhs: impl Into<Operand>) -> Predicate<P> {
        self.compare(CompareOp::GtEq, rhs)
    }

    pub fn is_null<P>(self) -> Predicate<P> {
        self.eq(Value::Null)
    }

    pub fn is_not_null<P>(self) -> Predicate<P> {
        self.ne(Value::Null)
    }

    fn membership<P, V>(self, values: impl IntoIterator<Item = V>, negated: bool) -> Result<Predicate<P>>
    where
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(Error::invalid_expression("IN requires at least one value"));
        }
        Ok(Predicate::In {
            left: self.0,
            right: Operand::Literal(Value::Array(values)),
            negated,
        })
    }

    /// `key IN (values)`. An empty list is an error.
    pub fn is_in<P, V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Result<Predicate<P>> {
        self.membership(values, false)
    }

    pub fn not_in<P, V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Result<Predicate<P>> {
        self.membership(values, true)
    }

    /// The key holds an array that contains `element`.
    pub fn contains_element<P>(self, element: impl Into<Value>) -> Predicate<P> {
        Predicate::In {
            left: Operand::Literal(element.into()),
            right: self.0,
            negated: false,
        }
    }

    /// The key's value is an element of the array stored under `other`.
    pub fn in_key<P>(self, other: Key) -> Predicate<P> {
        Predicate::In {
            left: self.0,
            right: other.0,
            negated: false,
        }
    }

    fn range<P>(self, low: impl Into<Operand>, high: impl Into<Operand>, upper: UpperBound, negated: bool) -> Predicate<P> {
        Predicate::Between {
            subject: self.0,
            range: Range {
                low: low.into(),
                high: high.into(),
                upper,
            },
            negated,
        }
    }

    /// Closed range `low <= key <= high`.
    pub fn between<P>(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Predicate<P> {
        self.range(low, high, UpperBound::Inclusive, false)
    }

    /// Half-open range `low <= key < high`.
    pub fn between_exclusive<P>(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Predicate<P> {
        self.range(low, high, UpperBound::Exclusive, false)
    }

    pub fn not_between<P>(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Predicate<P> {
        self.range(low, high, UpperBound::Inclusive, true)
    }

    pub fn like(self, pattern: impl Into<Operand>) -> SqlPredicate {
        Predicate::Pattern {
            subject: self.0,
            test: LikePattern(pattern.into()),
            negated: false,
        }
    }

    pub fn not_like(self, pattern: impl Into<Operand>) -> SqlPredicate {
        Predicate::Pattern {
            subject: self.0,
            test: LikePattern(pattern.into()),
            negated: true,
        }
    }

    fn regex(self, kind: RegexKind, pattern: impl Into<String>, options: RegexOptions) -> DocumentPredicate {
        Predicate::Pattern {
            subject: self.0,
            test: RegexTest {
                kind,
                pattern: pattern.into(),
                options,
            },
            negated: false,
        }
    }

    /// Raw regular expression.
    pub fn matches(self, regex: impl Into<String>, options: RegexOptions) -> DocumentPredicate {
        self.regex(RegexKind::Matches, regex, options)
    }

    pub fn starts_with(self, prefix: impl Into<String>, options: RegexOptions) -> DocumentPredicate {
        self.regex(RegexKind::StartsWith, prefix, options)
    }

    pub fn ends_with(self, suffix: impl Into<String>, options: RegexOptions) -> DocumentPredicate {
        self.regex(RegexKind::EndsWith, suffix, options)
    }

    pub fn contains(self, needle: impl Into<String>, options: RegexOptions) -> DocumentPredicate {
        self.regex(RegexKind::Contains, needle, options)
    }
}

impl<P> Predicate<P> {
    /// Conjunction of `items`, flattening nested conjunctions.
    pub fn all(items: impl IntoIterator<Item = Self>) -> Result<Self> {
        Self::connective(items, true)
    }

    /// Disjunction of `items`, flattening nested disjunctions.
    pub fn any(items: impl IntoIterator<Item = Self>) -> Result<Self> {
        Self::connective(items, false)
    }

    fn connective(items: impl IntoIterator<Item = Self>, conjunction: bool) -> Result<Self> {
        let mut flat = Vec::new();
        for item in items {
            push_flattened(&mut flat, item, conjunction);
        }
        match flat.len() {
            0 => Err(Error::invalid_expression(if conjunction {
                "AND of no predicates"
            } else {
                "OR of no predicates"
            })),
            1 => Ok(flat.remove(0)),
            _ if conjunction => Ok(Predicate::And(flat)),
            _ => Ok(Predicate::Or(flat)),
        }
    }

    pub fn and(self, other: Self) -> Self {
        let mut flat = Vec::new();
        push_flattened(&mut flat, self, true);
        push_flattened(&mut flat, other, true);
        Predicate::And(flat)
    }

    pub fn or(self, other: Self) -> Self {
        let mut flat = Vec::new();
        push_flattened(&mut flat, self, false);
        push_flattened(&mut flat, other, false);
        Predicate::Or(flat)
    }

    /// Whether the tree holds an empty connective or an empty `IN` list.
    /// Compilers reject such trees.
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::And(items) | Predicate::Or(items) if items.is_empty() => {
                Err(Error::invalid_expression("empty AND/OR"))
            }
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not(inner) => inner.validate(),
            Predicate::In {
                right: Operand::Literal(Value::Array(values)),
                ..
            } if values.is_empty() => Err(Error::invalid_expression("IN requires at least one value")),
            _ => Ok(()),
        }
    }
}

fn push_flattened<P>(out: &mut Vec<Predicate<P>>, item: Predicate<P>, conjunction: bool) {
    match item {
        Predicate::And(items) if conjunction => out.extend(items),
        Predicate::Or(items) if !conjunction => out.extend(items),
        other => out.push(other),
    }
}

impl<P> Not for Predicate<P> {
    type Output = Predicate<P>;

    fn not(self) -> Self::Output {
        Predicate::Not(Box::new(self))
    }
}
