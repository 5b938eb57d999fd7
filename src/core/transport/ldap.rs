// src/core/transport/ldap.rs

//! The production transport, built on the `ldap3` client.
//!
//! `ldap3` has no notion of an idle connection, so each session carries an
//! [`IdleWatchdog`] that emits [`TransportEvent::Idle`] once nothing has been
//! in flight for the configured duration.

use super::idle::IdleWatchdog;
use super::{
    ConnectOptions, DerefAliases, EventSink, Scope, SearchEvent, SearchRequest, Session,
    Transport, TransportEvent,
};
use crate::core::attributes::AttrValue;
use crate::core::entry::RawEntry;
use crate::core::errors::{DirError, DirResult, RC_SUCCESS};
use crate::core::mutation::Modification;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, ResultEntry, SearchEntry};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens `ldap3` sessions, trying each configured URI in order.
#[derive(Debug, Default, Clone)]
pub struct LdapTransport;

impl LdapTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LdapTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> DirResult<Arc<dyn Session>> {
        let mut last_error = None;

        for uri in &options.uris {
            let settings = LdapConnSettings::new()
                .set_conn_timeout(options.connect_timeout)
                .set_starttls(options.starttls);

            match LdapConnAsync::with_settings(settings, uri).await {
                Ok((conn, ldap)) => {
                    let watchdog = Arc::new(IdleWatchdog::new());

                    // The driver owns the socket; when it stops, the session is dead.
                    let driver_events = events.clone();
                    let driver_watchdog = watchdog.clone();
                    let driver_uri = uri.clone();
                    tokio::spawn(async move {
                        let outcome = conn.drive().await;
                        if driver_watchdog.is_closed() {
                            return;
                        }
                        driver_watchdog.close();
                        let message = match outcome {
                            Ok(()) => format!("connection to {driver_uri} closed by server"),
                            Err(e) => format!("connection to {driver_uri} failed: {e}"),
                        };
                        let _ = driver_events.send(TransportEvent::Error(message));
                    });

                    if let Some(idle_timeout) = options.idle_timeout {
                        watchdog.spawn(idle_timeout, events.clone());
                    }

                    debug!(uri = %uri, "LDAP transport connected");
                    return Ok(Arc::new(LdapSession {
                        ldap,
                        uri: uri.clone(),
                        watchdog,
                    }));
                }
                Err(e) => {
                    let message = format!("{uri}: {e}");
                    let _ = events.send(TransportEvent::ConnectError(message.clone()));
                    last_error = Some(message);
                }
            }
        }

        Err(DirError::Connect(
            last_error.unwrap_or_else(|| "no LDAP URI configured".to_string()),
        ))
    }
}

/// A connected `ldap3` handle.
pub struct LdapSession {
    ldap: Ldap,
    uri: String,
    watchdog: Arc<IdleWatchdog>,
}

impl LdapSession {
    fn ensure_open(&self) -> DirResult<()> {
        if self.watchdog.is_closed() {
            Err(DirError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

fn mutation_result(op: &'static str, result: ldap3::LdapResult) -> DirResult<()> {
    if result.rc == RC_SUCCESS {
        Ok(())
    } else {
        Err(DirError::Mutation {
            op,
            rc: result.rc,
            text: result.text,
        })
    }
}

fn transport_error(e: ldap3::LdapError) -> DirError {
    DirError::Transport(e.to_string())
}

fn to_value_set(values: Vec<String>) -> HashSet<String> {
    values.into_iter().collect()
}

impl From<Scope> for ldap3::Scope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::One => ldap3::Scope::OneLevel,
            Scope::Sub => ldap3::Scope::Subtree,
        }
    }
}

impl From<DerefAliases> for ldap3::DerefAliases {
    fn from(deref: DerefAliases) -> Self {
        match deref {
            DerefAliases::Never => ldap3::DerefAliases::Never,
            DerefAliases::Search => ldap3::DerefAliases::Searching,
            DerefAliases::Find => ldap3::DerefAliases::Finding,
            DerefAliases::Always => ldap3::DerefAliases::Always,
        }
    }
}

impl From<Modification> for Mod<String> {
    fn from(change: Modification) -> Self {
        match change {
            Modification::Add { attr, values } => Mod::Add(attr, to_value_set(values)),
            Modification::Delete { attr, values } => Mod::Delete(attr, to_value_set(values)),
            Modification::Replace { attr, values } => Mod::Replace(attr, to_value_set(values)),
            Modification::Increment { attr, by } => Mod::Increment(attr, by),
        }
    }
}

/// Converts an `ldap3` entry into the raw "scalar or array" shape, with
/// attributes in a stable (sorted) order.
fn raw_entry(result: ResultEntry) -> RawEntry {
    let entry = SearchEntry::construct(result);

    let mut attrs: Vec<(String, Vec<String>)> = entry.attrs.into_iter().collect();
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut binary: Vec<(String, Vec<Vec<u8>>)> = entry.bin_attrs.into_iter().collect();
    binary.sort_by(|a, b| a.0.cmp(&b.0));

    RawEntry {
        dn: entry.dn,
        attrs: attrs
            .into_iter()
            .map(|(name, values)| (name, AttrValue::from_values(values)))
            .collect(),
        binary: binary
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().map(Bytes::from).collect()))
            .collect(),
    }
}

#[async_trait]
impl Session for LdapSession {
    async fn simple_bind(&self, dn: &str, password: &str) -> DirResult<()> {
        self.ensure_open()?;
        let _guard = self.watchdog.begin();
        let mut ldap = self.ldap.clone();
        let result = ldap
            .simple_bind(dn, password)
            .await
            .map_err(transport_error)?;
        if result.rc == RC_SUCCESS {
            Ok(())
        } else {
            Err(DirError::Bind {
                rc: result.rc,
                text: result.text,
            })
        }
    }

    async fn search(&self, request: SearchRequest) -> DirResult<BoxStream<'static, SearchEvent>> {
        self.ensure_open()?;
        let guard = self.watchdog.begin();
        let mut ldap = self.ldap.clone();

        let mut options = ldap3::SearchOptions::new()
            .deref(request.deref.into())
            .typesonly(request.types_only);
        if let Some(size_limit) = request.size_limit {
            options = options.sizelimit(size_limit);
        }
        if let Some(time_limit) = request.time_limit {
            options = options.timelimit(time_limit);
        }
        ldap.with_search_options(options);

        let filter = request.filter.to_string();
        let mut stream = ldap
            .streaming_search(
                &request.base,
                request.scope.into(),
                &filter,
                request.attributes,
            )
            .await?;

        Ok(Box::pin(async_stream::stream! {
            // Keeps the session busy (and not idle) until the stream is done.
            let _guard = guard;
            loop {
                match stream.next().await {
                    Ok(Some(entry)) if entry.is_ref() => {
                        yield SearchEvent::Referral(ldap3::parse_refs(entry.0));
                    }
                    Ok(Some(entry)) if entry.is_intermediate() => {}
                    Ok(Some(entry)) => yield SearchEvent::Entry(raw_entry(entry)),
                    Ok(None) => break,
                    Err(e) => {
                        yield SearchEvent::Error(e.into());
                        return;
                    }
                }
            }
            let result = stream.finish().await;
            yield SearchEvent::Done { rc: result.rc, text: result.text };
        }))
    }

    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<String>)>) -> DirResult<()> {
        self.ensure_open()?;
        let _guard = self.watchdog.begin();
        let mut ldap = self.ldap.clone();
        let attributes: Vec<(String, HashSet<String>)> = attributes
            .into_iter()
            .map(|(name, values)| (name, to_value_set(values)))
            .collect();
        let result = ldap.add(dn, attributes).await.map_err(transport_error)?;
        mutation_result("add", result)
    }

    async fn delete(&self, dn: &str) -> DirResult<()> {
        self.ensure_open()?;
        let _guard = self.watchdog.begin();
        let mut ldap = self.ldap.clone();
        let result = ldap.delete(dn).await.map_err(transport_error)?;
        mutation_result("delete", result)
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirResult<()> {
        self.ensure_open()?;
        let _guard = self.watchdog.begin();
        let mut ldap = self.ldap.clone();
        let changes: Vec<Mod<String>> = changes.into_iter().map(Mod::from).collect();
        let result = ldap.modify(dn, changes).await.map_err(transport_error)?;
        mutation_result("modify", result)
    }

    async fn close(&self) -> DirResult<()> {
        if self.watchdog.is_closed() {
            return Ok(());
        }
        self.watchdog.close();
        let mut ldap = self.ldap.clone();
        if let Err(e) = ldap.unbind().await {
            warn!(uri = %self.uri, error = %e, "LDAP unbind failed");
            return Err(transport_error(e));
        }
        Ok(())
    }
}
