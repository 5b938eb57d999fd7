// src/core/mutation.rs

//! Add, delete and modify operations over the shared connection.
//!
//! Each operation acquires the ready connection exactly like a search does and
//! forwards the call. Failures are returned as-is; nothing is retried.

use super::attributes::{AttrValue, into_array};
use super::client::DirectoryClient;
use super::errors::DirResult;
use tracing::debug;

/// One change of a modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Adds values to an attribute.
    Add { attr: String, values: Vec<String> },
    /// Removes the given values, or the whole attribute when `values` is empty.
    Delete { attr: String, values: Vec<String> },
    /// Replaces all values of an attribute. An empty list removes it.
    Replace { attr: String, values: Vec<String> },
    /// Increments an integer attribute.
    Increment { attr: String, by: String },
}

impl Modification {
    pub fn add(attr: impl Into<String>, values: impl Into<AttrValue>) -> Self {
        Modification::Add {
            attr: attr.into(),
            values: into_array(values.into()),
        }
    }

    pub fn delete(attr: impl Into<String>, values: impl Into<AttrValue>) -> Self {
        Modification::Delete {
            attr: attr.into(),
            values: into_array(values.into()),
        }
    }

    pub fn replace(attr: impl Into<String>, values: impl Into<AttrValue>) -> Self {
        Modification::Replace {
            attr: attr.into(),
            values: into_array(values.into()),
        }
    }

    pub fn increment(attr: impl Into<String>, by: i64) -> Self {
        Modification::Increment {
            attr: attr.into(),
            by: by.to_string(),
        }
    }

    pub fn attr(&self) -> &str {
        match self {
            Modification::Add { attr, .. }
            | Modification::Delete { attr, .. }
            | Modification::Replace { attr, .. }
            | Modification::Increment { attr, .. } => attr,
        }
    }
}

impl DirectoryClient {
    /// Adds an entry. Attribute values may be given in any of the raw shapes;
    /// absent values are dropped.
    pub async fn add<K, V, I>(&self, dn: &str, entry: I) -> DirResult<()>
    where
        K: Into<String>,
        V: Into<AttrValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let attributes: Vec<(String, Vec<String>)> = entry
            .into_iter()
            .map(|(name, value)| (name.into(), into_array(value.into())))
            .filter(|(_, values)| !values.is_empty())
            .collect();

        let conn = self.acquire().await?;
        debug!(dn, attributes = attributes.len(), "LDAP add");
        let result = conn.session().add(dn, attributes).await;
        self.checked(&conn, result).await
    }

    /// Deletes the entry named by `dn`.
    pub async fn delete(&self, dn: &str) -> DirResult<()> {
        let conn = self.acquire().await?;
        debug!(dn, "LDAP delete");
        let result = conn.session().delete(dn).await;
        self.checked(&conn, result).await
    }

    /// Applies one or more changes to the entry named by `dn`.
    pub async fn modify<I>(&self, dn: &str, changes: I) -> DirResult<()>
    where
        I: IntoIterator<Item = Modification>,
    {
        let changes: Vec<Modification> = changes.into_iter().collect();
        let conn = self.acquire().await?;
        debug!(dn, changes = changes.len(), "LDAP modify");
        let result = conn.session().modify(dn, changes).await;
        self.checked(&conn, result).await
    }
}
