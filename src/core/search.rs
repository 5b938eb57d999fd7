// src/core/search.rs

//! Issues searches over the shared connection and classifies how they end.

use super::client::DirectoryClient;
use super::entry::{NormalizedRecord, RawEntry};
use super::errors::{DirError, DirResult, RC_SIZE_LIMIT_EXCEEDED, RC_SUCCESS};
use super::filter::{Filter, MATCH_ALL, MATCH_NOTHING};
use super::lifecycle::Connection;
use super::transport::{DerefAliases, Scope, SearchEvent, SearchRequest};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Requested when the caller asks for no attributes at all. Sending an empty
/// attribute list means "all user attributes" on the wire, which is not what
/// an empty list means here.
pub const SENTINEL_ATTRIBUTE: &str = "objectClass";

/// Caller-tunable search parameters. Unset fields fall back to the defaults
/// (`scope = sub`, no limits, never dereference aliases).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default)]
    pub scope: Option<Scope>,
    /// Maximum number of entries the server should return.
    #[serde(default)]
    pub size_limit: Option<i32>,
    /// Server-side time limit in seconds.
    #[serde(default)]
    pub time_limit: Option<i32>,
    #[serde(default)]
    pub deref: Option<DerefAliases>,
    #[serde(default)]
    pub types_only: Option<bool>,
}

impl SearchOptions {
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn size_limit(mut self, limit: i32) -> Self {
        self.size_limit = Some(limit);
        self
    }

    pub fn time_limit(mut self, seconds: i32) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    pub fn deref(mut self, deref: DerefAliases) -> Self {
        self.deref = Some(deref);
        self
    }

    pub fn types_only(mut self, types_only: bool) -> Self {
        self.types_only = Some(types_only);
        self
    }

    /// Lays these options over `defaults`: every field set here wins.
    pub fn merged_over(self, defaults: SearchOptions) -> SearchOptions {
        SearchOptions {
            scope: self.scope.or(defaults.scope),
            size_limit: self.size_limit.or(defaults.size_limit),
            time_limit: self.time_limit.or(defaults.time_limit),
            deref: self.deref.or(defaults.deref),
            types_only: self.types_only.or(defaults.types_only),
        }
    }

    /// The defaults every search starts from.
    pub fn defaults() -> SearchOptions {
        SearchOptions {
            scope: Some(Scope::Sub),
            ..Default::default()
        }
    }
}

/// Rewrites an empty attribute list to the sentinel attribute.
pub fn requested_attributes<S: AsRef<str>>(attributes: &[S]) -> Vec<String> {
    if attributes.is_empty() {
        vec![SENTINEL_ATTRIBUTE.to_string()]
    } else {
        attributes.iter().map(|a| a.as_ref().to_string()).collect()
    }
}

/// Parses a filter string. `None` means the filter can never match, so the
/// search does not need to be sent at all.
pub fn prepare_filter(filter: &str) -> DirResult<Option<Filter>> {
    let filter = filter.trim();
    if filter == MATCH_NOTHING {
        return Ok(None);
    }
    let source = if filter.is_empty() { MATCH_ALL } else { filter };
    let parsed = Filter::parse(source).map_err(|e| DirError::FilterSyntax(e.to_string()))?;
    if parsed.is_match_nothing() {
        return Ok(None);
    }
    Ok(Some(parsed))
}

impl DirectoryClient {
    /// Searches `base` and returns the entries exactly as the transport
    /// delivered them.
    ///
    /// A search truncated by the server's size limit is not an error: the
    /// entries received before the limit was hit are returned.
    pub async fn search_raw<S: AsRef<str>>(
        &self,
        base: &str,
        filter: &str,
        attributes: &[S],
        options: SearchOptions,
    ) -> DirResult<Vec<RawEntry>> {
        let attributes = requested_attributes(attributes);
        let Some(filter) = prepare_filter(filter)? else {
            debug!(base, "filter can never match; skipping search");
            return Ok(Vec::new());
        };
        let options = options.merged_over(SearchOptions::defaults());

        let request = SearchRequest {
            base: base.to_string(),
            scope: options.scope.unwrap_or_default(),
            filter,
            attributes,
            size_limit: options.size_limit,
            time_limit: options.time_limit,
            deref: options.deref.unwrap_or_default(),
            types_only: options.types_only.unwrap_or(false),
        };

        let conn = self.acquire().await?;
        debug!(base, filter = %request.filter, scope = %request.scope, "LDAP search");
        let result = run_search(&conn, base, request).await;
        self.checked(&conn, result).await
    }

    /// Like [`search_raw`](Self::search_raw), with every record normalized so
    /// that each requested attribute is an array.
    pub async fn search<S: AsRef<str>>(
        &self,
        base: &str,
        filter: &str,
        attributes: &[S],
        options: SearchOptions,
    ) -> DirResult<Vec<NormalizedRecord>> {
        let requested = requested_attributes(attributes);
        let entries = self.search_raw(base, filter, &requested, options).await?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.normalize(&requested))
            .collect())
    }
}

/// Sends one search and collects its entries until the final result.
async fn run_search(
    conn: &Connection,
    base: &str,
    request: SearchRequest,
) -> DirResult<Vec<RawEntry>> {
    let mut events = conn.session().search(request).await?;

    let mut entries = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            SearchEvent::Entry(entry) => entries.push(entry),
            SearchEvent::Referral(uris) => {
                lifecycle_event!(conn.verbose(), referral = %uris.join(","), "LDAP referral");
            }
            SearchEvent::Done { rc, .. } if rc == RC_SUCCESS => return Ok(entries),
            SearchEvent::Done { rc, .. } if rc == RC_SIZE_LIMIT_EXCEEDED => {
                debug!(base, returned = entries.len(), "LDAP search hit the size limit");
                return Ok(entries);
            }
            SearchEvent::Done { rc, text } => {
                let e = DirError::Search { rc, text };
                if conn.verbose() {
                    warn!(base, error = %e, "LDAP search failed");
                }
                return Err(e);
            }
            SearchEvent::Error(e) if e.is_size_limit_exceeded() => {
                debug!(base, returned = entries.len(), "LDAP search hit the size limit");
                return Ok(entries);
            }
            SearchEvent::Error(e) => {
                if conn.verbose() {
                    warn!(base, error = %e, "LDAP search failed");
                }
                return Err(e);
            }
        }
    }

    // The stream ended without a final result: the connection went away.
    Err(DirError::ConnectionClosed)
}
