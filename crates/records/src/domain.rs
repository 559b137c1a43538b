//! Record filters in prefix notation.
//!
//! A domain is a JSON list of conditions `[field, operator, value]`, with
//! `"|"`, `"&"` and `"!"` prefix operators combining the conditions that
//! follow them. Adjacent conditions are implicitly and-ed.
//!
//! ```rust,ignore
//! use fleetlink_records::Domain;
//!
//! // active vehicles whose name starts with "VAN"
//! let domain = Domain::new()
//!     .eq("active", true)
//!     .like("name", "VAN%");
//! ```

use serde::{Serialize, Serializer};
use serde_json::Value;

use fleetlink_client::{Error, ErrorKind, Result};

/// Comparison operators accepted in a condition.
const OPERATORS: &[&str] = &[
    "=", "!=", "<", "<=", ">", ">=", "=like", "like", "not like", "ilike", "not ilike", "in",
    "not in", "child_of", "parent_of",
];

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Condition {
        field: String,
        operator: String,
        value: Value,
    },
    Or,
    And,
    Not,
}

/// A filter over a model's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    terms: Vec<Term>,
}

impl Domain {
    /// An empty domain, matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw condition.
    pub fn condition(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.terms.push(Term::Condition {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, "=", value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, "!=", value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, "<", value)
    }

    pub fn le(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, "<=", value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, ">", value)
    }

    pub fn ge(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, ">=", value)
    }

    /// Case-sensitive pattern match (`%` and `_` wildcards).
    pub fn like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.condition(field, "like", pattern.into())
    }

    /// Case-insensitive pattern match.
    pub fn ilike(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.condition(field, "ilike", pattern.into())
    }

    /// Field value is one of `values`.
    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.condition(field, "in", values)
    }

    pub fn not_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.condition(field, "not in", values)
    }

    /// Either of the next two terms must hold.
    pub fn or(mut self) -> Self {
        self.terms.push(Term::Or);
        self
    }

    /// Both of the next two terms must hold.
    pub fn and(mut self) -> Self {
        self.terms.push(Term::And);
        self
    }

    /// The next term must not hold.
    pub fn not(mut self) -> Self {
        self.terms.push(Term::Not);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Check field names and operators, and that every prefix operator has
    /// enough operands.
    pub fn validate(&self) -> Result<()> {
        // Operands still owed to prefix operators, walking right to left.
        let mut available: usize = 0;
        for term in self.terms.iter().rev() {
            match term {
                Term::Condition {
                    field, operator, ..
                } => {
                    if !is_safe_field_path(field) {
                        return Err(invalid(format!("Invalid field name: {field}")));
                    }
                    if !OPERATORS.contains(&operator.as_str()) {
                        return Err(invalid(format!("Unsupported operator: {operator}")));
                    }
                    available += 1;
                }
                Term::Not => {
                    if available < 1 {
                        return Err(invalid("'!' is missing its operand".to_string()));
                    }
                }
                Term::Or | Term::And => {
                    if available < 2 {
                        return Err(invalid(format!(
                            "'{}' needs two operands",
                            if matches!(term, Term::Or) { "|" } else { "&" }
                        )));
                    }
                    available -= 1;
                }
            }
        }
        Ok(())
    }

    /// The domain as the JSON list sent on the wire.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.terms
                .iter()
                .map(|term| match term {
                    Term::Condition {
                        field,
                        operator,
                        value,
                    } => Value::Array(vec![
                        Value::String(field.clone()),
                        Value::String(operator.clone()),
                        value.clone(),
                    ]),
                    Term::Or => Value::String("|".to_string()),
                    Term::And => Value::String("&".to_string()),
                    Term::Not => Value::String("!".to_string()),
                })
                .collect(),
        )
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::Validation(message))
}

/// Field paths are dotted identifiers, e.g. `driver_id.name`.
pub(crate) fn is_safe_field_path(field: &str) -> bool {
    !field.is_empty()
        && field.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Model names are dotted lowercase identifiers, e.g. `fleet.vehicle`.
pub(crate) fn is_safe_model_name(model: &str) -> bool {
    !model.is_empty()
        && model.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}
