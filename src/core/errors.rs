// src/core/errors.rs

//! Defines the error type shared by the connection manager and the executors.

use thiserror::Error;

/// LDAP result code for a successful operation.
pub const RC_SUCCESS: u32 = 0;
/// LDAP result code returned when the server truncated a search at its size limit.
pub const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// LDAP result code for a missing target entry.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code for a rejected bind.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for an add against an existing entry.
pub const RC_ENTRY_ALREADY_EXISTS: u32 = 68;

/// Every failure a caller of this crate can observe.
///
/// The type is `Clone` because a single connection attempt is awaited by many
/// callers at once and each of them receives its own copy of the outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirError {
    #[error("dirconn: call configure() first")]
    NotConfigured,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not connect to LDAP server: {0}")]
    Connect(String),

    #[error("{}", bind_message(*rc, text))]
    Bind { rc: u32, text: String },

    #[error("Error parsing LDAP filter: {0}")]
    FilterSyntax(String),

    #[error("LDAP search failed with code {rc}: {text}")]
    Search { rc: u32, text: String },

    #[error("LDAP {op} failed with code {rc}: {text}")]
    Mutation {
        op: &'static str,
        rc: u32,
        text: String,
    },

    #[error("LDAP transport error: {0}")]
    Transport(String),

    #[error("LDAP connection was closed")]
    ConnectionClosed,
}

fn bind_message(rc: u32, text: &str) -> String {
    if rc == RC_INVALID_CREDENTIALS {
        format!("LDAP bind rejected: invalid credentials ({text})")
    } else {
        format!("LDAP bind failed with code {rc}: {text}")
    }
}

impl DirError {
    /// Returns true for the size-limit condition, which searches treat as a
    /// successful partial result.
    pub fn is_size_limit_exceeded(&self) -> bool {
        matches!(
            self,
            DirError::Search { rc, .. } if *rc == RC_SIZE_LIMIT_EXCEEDED
        )
    }
}

impl From<ldap3::LdapError> for DirError {
    fn from(e: ldap3::LdapError) -> Self {
        match e {
            ldap3::LdapError::LdapResult { result } => DirError::Search {
                rc: result.rc,
                text: result.text,
            },
            other => DirError::Transport(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate.
pub type DirResult<T> = Result<T, DirError>;
