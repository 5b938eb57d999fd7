// src/core/mod.rs

//! The connection lifecycle manager, the executors built on it, and the types
//! they exchange.

/// Logs a connection lifecycle event at `info` when the connection was
/// configured as verbose, and at `debug` otherwise.
macro_rules! lifecycle_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

pub mod attributes;
pub mod client;
pub mod entry;
pub mod errors;
pub mod filter;
pub mod lifecycle;
pub mod mutation;
pub mod search;
pub mod transport;

pub use attributes::{AttrValue, as_array, first_value};
pub use client::DirectoryClient;
pub use entry::{NormalizedRecord, RawEntry};
pub use errors::{DirError, DirResult};
pub use filter::Filter;
pub use lifecycle::{Connection, ConnectionManager, ConnectionState};
pub use mutation::Modification;
pub use search::SearchOptions;
