// src/global.rs

//! The process-wide client behind the crate's free functions.
//!
//! `configure()` must be called before any operation that needs the
//! connection; until then those operations fail with
//! [`DirError::NotConfigured`](crate::core::DirError::NotConfigured).

use crate::config::Config;
use crate::core::attributes::AttrValue;
use crate::core::entry::{NormalizedRecord, RawEntry};
use crate::core::errors::DirResult;
use crate::core::mutation::Modification;
use crate::core::search::SearchOptions;
use crate::core::transport::LdapTransport;
use crate::core::{ConnectionState, DirectoryClient};
use once_cell::sync::Lazy;
use std::sync::Arc;

static CLIENT: Lazy<DirectoryClient> =
    Lazy::new(|| DirectoryClient::new(Arc::new(LdapTransport::new())));

/// The shared client instance.
pub fn client() -> &'static DirectoryClient {
    &CLIENT
}

pub fn configure(config: Config) -> DirResult<()> {
    CLIENT.configure(config)
}

pub async fn shutdown() {
    CLIENT.shutdown().await
}

pub fn force_reconnect() -> DirResult<()> {
    CLIENT.force_reconnect()
}

pub fn state() -> ConnectionState {
    CLIENT.state()
}

pub async fn search_raw<S: AsRef<str>>(
    base: &str,
    filter: &str,
    attributes: &[S],
    options: SearchOptions,
) -> DirResult<Vec<RawEntry>> {
    CLIENT.search_raw(base, filter, attributes, options).await
}

pub async fn search<S: AsRef<str>>(
    base: &str,
    filter: &str,
    attributes: &[S],
    options: SearchOptions,
) -> DirResult<Vec<NormalizedRecord>> {
    CLIENT.search(base, filter, attributes, options).await
}

pub async fn add<K, V, I>(dn: &str, entry: I) -> DirResult<()>
where
    K: Into<String>,
    V: Into<AttrValue>,
    I: IntoIterator<Item = (K, V)>,
{
    CLIENT.add(dn, entry).await
}

pub async fn delete(dn: &str) -> DirResult<()> {
    CLIENT.delete(dn).await
}

pub async fn modify<I>(dn: &str, changes: I) -> DirResult<()>
where
    I: IntoIterator<Item = Modification>,
{
    CLIENT.modify(dn, changes).await
}
