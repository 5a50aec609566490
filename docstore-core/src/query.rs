//! Filter expressions shared by every query descriptor.
//!
//! Descriptors collect [`Expr`] clauses. A backend either turns them into its own query
//! language or evaluates them in place, usually by implementing [`QueryVisitor`].
//!
//! Predicates on one field come from [`Field`]:
//!
//! | Kind       | Methods                                              |
//! |------------|------------------------------------------------------|
//! | comparison | `eq`, `ne`, `gt`, `gte`, `lt`, `lte`                 |
//! | text       | `starts_with`, `ends_with`, `contains`, `not_contains` |
//! | membership | `any_of`, `none_of`                                  |
//! | presence   | `exists`, `not_exists`                               |
//!
//! and are joined with [`Expr::and`], [`Expr::or`] and [`Expr::not`]:
//!
//! ```ignore
//! use docstore::query::Field;
//!
//! let expr = Field::new("status").eq("paid").and(Field::new("total").gt(100));
//! ```

use bson::Bson;

use crate::error::DocumentStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// `1` for ascending, `-1` for descending.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// One sort key. Several keys sort lexicographically in the order given.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Sort { field: field.into(), direction }
    }
}

/// Operator of an [`Expr::Field`] clause.
///
/// Ordering operators compare values of the same BSON type class. `Contains` and
/// `NotContains` test substrings on strings and membership on arrays. `AnyOf` and `NoneOf`
/// take an array of candidates; a single value is treated as a one-element array.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    AnyOf,
    NoneOf,
}

/// A predicate over one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Every clause holds. An empty list matches everything.
    And(Vec<Expr>),
    /// At least one clause holds.
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// The field is present (`true`) or absent (`false`).
    Exists(String, bool),
    /// `field op value`; dotted field names reach into nested documents.
    Field { field: String, op: FieldOp, value: Bson },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// `self AND other`. Appends to an existing conjunction instead of nesting.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut clauses) => {
                clauses.push(other);
                Expr::And(clauses)
            }
            lhs => Expr::And(vec![lhs, other]),
        }
    }

    /// `self OR other`. Appends to an existing disjunction instead of nesting.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut clauses) => {
                clauses.push(other);
                Expr::Or(clauses)
            }
            lhs => Expr::Or(vec![lhs, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }
}

/// Entry point for predicates on a single field.
///
/// ```ignore
/// use docstore::query::Field;
///
/// let adults = Field::new("age").gte(18);
/// let named = Field::new("name").starts_with("Al");
/// ```
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field { name: name.into() }
    }

    fn compare(self, op: FieldOp, value: impl Into<Bson>) -> Expr {
        Expr::field(self.name, op, value.into())
    }

    pub fn eq(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Eq, value)
    }

    /// Also matches documents that lack the field.
    pub fn ne(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Gt, value)
    }

    pub fn gte(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Gte, value)
    }

    pub fn lt(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Lt, value)
    }

    pub fn lte(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Lte, value)
    }

    /// Case-sensitive prefix match; the value must be a string.
    pub fn starts_with(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::StartsWith, value)
    }

    /// Case-sensitive suffix match; the value must be a string.
    pub fn ends_with(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::EndsWith, value)
    }

    pub fn contains(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Contains, value)
    }

    pub fn not_contains(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::NotContains, value)
    }

    pub fn any_of(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::AnyOf, value)
    }

    pub fn none_of(self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::NoneOf, value)
    }

    pub fn exists(self) -> Expr {
        Expr::Exists(self.name, true)
    }

    pub fn not_exists(self) -> Expr {
        Expr::Exists(self.name, false)
    }
}

/// Folds an [`Expr`] tree into a backend-specific value, one callback per node kind.
///
/// Implementors provide the leaf and combinator callbacks; [`visit_expr`](Self::visit_expr)
/// dispatches on the node.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, clauses: &[Expr]) -> Result<Self::Output, Self::Error>;

    fn visit_or(&mut self, clauses: &[Expr]) -> Result<Self::Output, Self::Error>;

    fn visit_not(&mut self, inner: &Expr) -> Result<Self::Output, Self::Error>;

    fn visit_exists(&mut self, field: &str, present: bool) -> Result<Self::Output, Self::Error>;

    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(clauses) => self.visit_and(clauses),
            Expr::Or(clauses) => self.visit_or(clauses),
            Expr::Not(inner) => self.visit_not(inner),
            Expr::Exists(field, present) => self.visit_exists(field, *present),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
