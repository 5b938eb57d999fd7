// src/core/entry.rs

//! Search result records in their raw and normalized forms.

use super::attributes::{AttrValue, first_value, into_array};
use bytes::Bytes;
use indexmap::IndexMap;

static ABSENT: AttrValue = AttrValue::Absent;

/// One directory record as delivered by the transport, with attributes in
/// their "scalar or array" form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    pub dn: String,
    pub attrs: IndexMap<String, AttrValue>,
    /// Values the server returned as binary (`;binary` or non-UTF-8 data).
    pub binary: IndexMap<String, Vec<Bytes>>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Builder-style helper that sets one attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Looks up an attribute. Attribute descriptions are case-insensitive, so an
    /// exact match is tried first and then a case-insensitive one.
    pub fn get(&self, name: &str) -> &AttrValue {
        lookup(&self.attrs, name).map_or(&ABSENT, |(_, v)| v)
    }

    /// Returns the raw binary values of an attribute, if any were returned.
    pub fn binary(&self, name: &str) -> Option<&[Bytes]> {
        lookup(&self.binary, name).map(|(_, v)| v.as_slice())
    }

    /// Projects this entry into a [`NormalizedRecord`]. Every requested
    /// attribute is present in the result, keyed by the requested spelling,
    /// even when the server did not return it.
    pub fn normalize<S: AsRef<str>>(mut self, requested: &[S]) -> NormalizedRecord {
        let mut attrs: IndexMap<String, Vec<String>> =
            IndexMap::with_capacity(self.attrs.len().max(requested.len()));
        for name in requested {
            let name = name.as_ref();
            if lookup(&attrs, name).is_some() {
                continue;
            }
            let returned_key = lookup(&self.attrs, name).map(|(key, _)| key.clone());
            let values = match returned_key {
                Some(key) => self.attrs.shift_remove(&key).map(into_array).unwrap_or_default(),
                None => Vec::new(),
            };
            attrs.insert(name.to_string(), values);
        }
        // Attributes the server sent without being asked (operational ones, or
        // everything when `*` was requested) are kept as well.
        for (name, value) in self.attrs {
            attrs.entry(name).or_insert_with(|| into_array(value));
        }
        NormalizedRecord {
            dn: self.dn,
            attrs,
        }
    }
}

/// A search entry whose attributes are always arrays, safe to iterate without
/// branching on shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedRecord {
    pub dn: String,
    pub attrs: IndexMap<String, Vec<String>>,
}

impl NormalizedRecord {
    /// All values of an attribute; empty when absent.
    pub fn all(&self, name: &str) -> &[String] {
        lookup(&self.attrs, name).map_or(&[], |(_, v)| v.as_slice())
    }

    /// The first value of an attribute, for single-valued attributes.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.all(name).first().map(String::as_str)
    }

    /// The attribute re-expressed in raw shape, so it can be fed to
    /// [`first_value`] and friends.
    pub fn value(&self, name: &str) -> AttrValue {
        match lookup(&self.attrs, name) {
            Some((_, values)) => AttrValue::Array(values.clone()),
            None => AttrValue::Absent,
        }
    }

    /// Shorthand for `first_value(&record.value(name))` returning an owned string.
    pub fn first_owned(&self, name: &str) -> Option<String> {
        first_value(&self.value(name)).map(str::to_string)
    }
}

fn lookup<'a, V>(map: &'a IndexMap<String, V>, name: &str) -> Option<(&'a String, &'a V)> {
    map.get_key_value(name)
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)))
}
