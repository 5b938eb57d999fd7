// src/core/transport/mod.rs

//! The seam between the connection manager and the directory client library.
//!
//! A [`Transport`] opens sessions; a [`Session`] performs protocol operations.
//! Asynchronous lifecycle signals (connect errors, transport errors, idleness)
//! are pushed through an [`EventSink`] that the manager creates, and starts
//! listening on, before it asks the transport to connect.

pub mod idle;
pub mod ldap;

use crate::config::Config;
use crate::core::entry::RawEntry;
use crate::core::errors::{DirError, DirResult};
use crate::core::filter::Filter;
use crate::core::mutation::Modification;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tokio::sync::mpsc;

pub use self::idle::{ActivityGuard, IdleWatchdog};
pub use self::ldap::LdapTransport;

/// Signals a transport emits outside of any single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One endpoint could not be reached. Connection may still succeed through
    /// another endpoint.
    ConnectError(String),
    /// The established connection failed.
    Error(String),
    /// Nothing has been in flight for the configured idle duration.
    Idle,
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Everything a transport needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Endpoints in failover order.
    pub uris: Vec<String>,
    pub idle_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub starttls: bool,
}

impl From<&Config> for ConnectOptions {
    fn from(config: &Config) -> Self {
        Self {
            uris: config.uri.to_vec(),
            idle_timeout: config.disconnect_when_idle,
            connect_timeout: config.connect_timeout,
            starttls: config.starttls,
        }
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[strum(to_string = "base")]
    Base,
    #[strum(to_string = "one", serialize = "onelevel")]
    #[serde(alias = "onelevel")]
    One,
    #[default]
    #[strum(to_string = "sub", serialize = "subtree")]
    #[serde(alias = "subtree")]
    Sub,
}

/// Alias dereferencing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DerefAliases {
    #[default]
    Never,
    Search,
    Find,
    Always,
}

/// A fully resolved search, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub filter: Filter,
    pub attributes: Vec<String>,
    pub size_limit: Option<i32>,
    pub time_limit: Option<i32>,
    pub deref: DerefAliases,
    pub types_only: bool,
}

/// Items of a search response stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Entry(RawEntry),
    /// A search continuation reference, carrying referral URIs.
    Referral(Vec<String>),
    /// The final result of the search.
    Done { rc: u32, text: String },
    /// The search failed before a final result arrived.
    Error(DirError),
}

/// Opens sessions against the configured endpoints.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Resolves once a session is connected. The transport reports anything
    /// that happens afterwards, including idleness, on `events`.
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> DirResult<Arc<dyn Session>>;
}

/// A live protocol session.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    async fn simple_bind(&self, dn: &str, password: &str) -> DirResult<()>;

    async fn search(&self, request: SearchRequest) -> DirResult<BoxStream<'static, SearchEvent>>;

    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<String>)>) -> DirResult<()>;

    async fn delete(&self, dn: &str) -> DirResult<()>;

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirResult<()>;

    /// Closes the session. Further operations fail.
    async fn close(&self) -> DirResult<()>;
}
