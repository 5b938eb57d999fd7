// src/core/attributes.rs

//! Normalizes the "scalar or array" shape in which directory attributes are
//! reported into a single deterministic shape.

/// The three shapes an attribute can take in a raw search entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttrValue {
    /// The attribute was not returned.
    #[default]
    Absent,
    /// The attribute has exactly one value.
    Scalar(String),
    /// The attribute has several values (or, rarely, an explicit empty set).
    Array(Vec<String>),
}

impl AttrValue {
    /// Builds the raw shape from a list of values: one value becomes a scalar,
    /// anything else stays an array.
    pub fn from_values(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            AttrValue::Scalar(values.remove(0))
        } else {
            AttrValue::Array(values)
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, AttrValue::Absent)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Scalar(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Scalar(s)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::Array(v)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(v: Vec<&str>) -> Self {
        AttrValue::Array(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for AttrValue {
    fn from(v: [&str; N]) -> Self {
        AttrValue::Array(v.iter().map(|s| s.to_string()).collect())
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(AttrValue::Absent, Into::into)
    }
}

/// Returns the single value of an attribute: the scalar itself, or the first
/// element of an array. `None` when the attribute is absent or empty.
pub fn first_value(value: &AttrValue) -> Option<&str> {
    match value {
        AttrValue::Absent => None,
        AttrValue::Scalar(s) => Some(s),
        AttrValue::Array(values) => values.first().map(String::as_str),
    }
}

/// Returns every value of an attribute as an array. Absent attributes yield an
/// empty array and a scalar is wrapped in a one-element array.
pub fn as_array(value: &AttrValue) -> Vec<String> {
    match value {
        AttrValue::Absent => Vec::new(),
        AttrValue::Scalar(s) => vec![s.clone()],
        AttrValue::Array(values) => values.clone(),
    }
}

/// Owned variant of [`as_array`] that avoids cloning the values.
pub fn into_array(value: AttrValue) -> Vec<String> {
    match value {
        AttrValue::Absent => Vec::new(),
        AttrValue::Scalar(s) => vec![s],
        AttrValue::Array(values) => values,
    }
}
