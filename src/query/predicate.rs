//! Query predicates
//!
//! Predicates name columns by their declared names. Store-managed columns
//! (`id`, `created_at`, `updated_at`) can be filtered on as well.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::model::Record;
use crate::schema::{ColumnType, TableDef, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::value::Value;

type CustomFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Filter over the records of one table
#[derive(Clone)]
pub enum Predicate {
    /// Every record
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Column equals one of the values
    In(String, Vec<Value>),
    /// Column holds no value
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Arbitrary test over the record
    Custom(CustomFn),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gte(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt(column.into(), value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lte(column.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn custom<F>(test: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(test))
    }

    /// Both predicates hold
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Either predicate holds
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against a record
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(column, expected) => value_of(record, column) == *expected,
            Predicate::Ne(column, expected) => value_of(record, column) != *expected,
            Predicate::Gt(column, bound) => compare(record, column, bound, |o| o == Ordering::Greater),
            Predicate::Gte(column, bound) => compare(record, column, bound, |o| o != Ordering::Less),
            Predicate::Lt(column, bound) => compare(record, column, bound, |o| o == Ordering::Less),
            Predicate::Lte(column, bound) => compare(record, column, bound, |o| o != Ordering::Greater),
            Predicate::In(column, values) => {
                let actual = value_of(record, column);
                values.contains(&actual)
            }
            Predicate::IsNull(column) => value_of(record, column).is_null(),
            Predicate::And(all) => all.iter().all(|p| p.matches(record)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
            Predicate::Custom(test) => test(record),
        }
    }

    /// Check every referenced column exists in `table` and every operand
    /// fits the column type
    pub fn validate(&self, table: &TableDef) -> StoreResult<()> {
        match self {
            Predicate::All | Predicate::Custom(_) => Ok(()),
            Predicate::Eq(column, value)
            | Predicate::Ne(column, value)
            | Predicate::Gt(column, value)
            | Predicate::Gte(column, value)
            | Predicate::Lt(column, value)
            | Predicate::Lte(column, value) => check_operand(table, column, value),
            Predicate::In(column, values) => values
                .iter()
                .try_for_each(|value| check_operand(table, column, value)),
            Predicate::IsNull(column) => column_type(table, column).map(|_| ()),
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().try_for_each(|p| p.validate(table))
            }
            Predicate::Not(inner) => inner.validate(table),
        }
    }
}

fn value_of(record: &Record, column: &str) -> Value {
    record.get(column).unwrap_or(Value::Null)
}

fn compare<F>(record: &Record, column: &str, bound: &Value, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    value_of(record, column)
        .compare(bound)
        .map(accept)
        .unwrap_or(false)
}

fn column_type(table: &TableDef, column: &str) -> StoreResult<ColumnType> {
    match column {
        ID_COLUMN => Ok(ColumnType::String),
        CREATED_AT_COLUMN | UPDATED_AT_COLUMN => Ok(ColumnType::Number),
        _ => table.require_column(column).map(|c| c.column_type),
    }
}

fn check_operand(table: &TableDef, column: &str, value: &Value) -> StoreResult<()> {
    let expected = column_type(table, column)?;
    match value.column_type() {
        None => Ok(()),
        Some(actual) if actual == expected => Ok(()),
        Some(_) => Err(StoreError::TypeMismatch {
            column: column.to_string(),
            expected: expected.type_name(),
            actual: value.type_name(),
        }),
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All => write!(f, "All"),
            Predicate::Eq(c, v) => write!(f, "{} = {}", c, v),
            Predicate::Ne(c, v) => write!(f, "{} != {}", c, v),
            Predicate::Gt(c, v) => write!(f, "{} > {}", c, v),
            Predicate::Gte(c, v) => write!(f, "{} >= {}", c, v),
            Predicate::Lt(c, v) => write!(f, "{} < {}", c, v),
            Predicate::Lte(c, v) => write!(f, "{} <= {}", c, v),
            Predicate::In(c, vs) => f.debug_tuple("In").field(c).field(vs).finish(),
            Predicate::IsNull(c) => write!(f, "{} IS NULL", c),
            Predicate::And(ps) => f.debug_tuple("And").field(ps).finish(),
            Predicate::Or(ps) => f.debug_tuple("Or").field(ps).finish(),
            Predicate::Not(p) => f.debug_tuple("Not").field(p).finish(),
            Predicate::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
