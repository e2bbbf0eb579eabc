use std::{
    hash::{Hash, Hasher},
    rc::Rc,
};

use crate::object::Object;

/// A runtime value: a small immediate, or a shared handle to a heap
/// [`Object`].
///
/// Values copy freely; object handles share their referent by reference
/// count. Two equality quirks are part of the language: the empty string
/// compares equal to `Empty`, and an Integer compares equal to a Float with
/// the same numeric value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Empty,
    Integer(i64),
    Float(f64),
    Bool(bool),
    Object(Rc<Object>),
}

impl Value {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        self.as_string().is_some()
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric coercion to a float; integers widen.
    #[must_use]
    pub fn cast_float(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric coercion to an integer; floats truncate.
    #[must_use]
    pub fn cast_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Float(value) => Some(*value as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::Object(object) => match object.as_ref() {
                Object::String(string) => Some(string),
                _ => None,
            },
            _ => None,
        }
    }

    /// The language-level type name, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Empty => "empty".to_owned(),
            Self::Integer(_) => "integer".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Object(object) => object.type_name(),
        }
    }

    /// Plain-text rendering: what `print` writes. Strings render without
    /// quotes and `Empty` renders as the empty string (it *is* the empty
    /// string for comparison purposes).
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Object(object) => object.to_text(),
            _ => self.description(),
        }
    }

    /// Debug-ish rendering: strings are quoted, `Empty` reads `empty`.
    /// Containers describe their elements recursively; cycles render as
    /// `...`.
    #[must_use]
    pub fn description(&self) -> String {
        let mut visited = Vec::new();
        self.describe(&mut visited)
    }

    pub(crate) fn describe(&self, visited: &mut Vec<*const Object>) -> String {
        match self {
            Self::Empty => "empty".to_owned(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => ryu::Buffer::new().format(*value).to_owned(),
            Self::Bool(value) => value.to_string(),
            Self::Object(object) => object.describe(visited),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // The empty string collapses to Empty.
        if let Some(string) = self.as_string()
            && string.is_empty()
            && other.is_empty()
        {
            return true;
        }
        if let Some(string) = other.as_string()
            && string.is_empty()
            && self.is_empty()
        {
            return true;
        }
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Integer(lhs), Self::Integer(rhs)) => lhs == rhs,
            (Self::Float(lhs), Self::Float(rhs)) => lhs == rhs,
            (Self::Bool(lhs), Self::Bool(rhs)) => lhs == rhs,
            (Self::Object(lhs), Self::Object(rhs)) => lhs.equals(rhs),
            _ => {
                if self.is_number() && other.is_number() {
                    // Cross-type numeric comparison happens as floats.
                    return self.cast_float() == other.cast_float();
                }
                false
            }
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Empty => state.write_u64(0),
            // Integers hash through their float value so that 1 and 1.0
            // land in the same bucket, consistent with equality.
            Self::Integer(value) => state.write_u64((*value as f64).to_bits()),
            Self::Float(value) => state.write_u64(value.to_bits()),
            Self::Bool(value) => value.hash(state),
            Self::Object(object) => {
                if let Object::String(string) = object.as_ref()
                    && string.is_empty()
                {
                    state.write_u64(0);
                    return;
                }
                object.hash_into(state);
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Object(Rc::new(Object::String(value.to_owned())))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Object(Rc::new(Object::String(value)))
    }
}

impl From<Rc<Object>> for Value {
    fn from(object: Rc<Object>) -> Self {
        Self::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_collapses_to_empty() {
        assert_eq!(Value::from(""), Value::Empty);
        assert_eq!(Value::Empty, Value::from(""));
        assert_ne!(Value::from("x"), Value::Empty);
    }

    #[test]
    fn numbers_compare_across_types() {
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Integer(3), Value::Float(3.5));
    }

    #[test]
    fn float_description_round_trips() {
        assert_eq!(Value::Float(1.5).description(), "1.5");
        assert_eq!(Value::Integer(15).description(), "15");
    }
}
