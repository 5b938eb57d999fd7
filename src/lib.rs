// src/lib.rs

pub mod config;
pub mod core;
pub mod global;

// Re-export
pub use crate::config::Config;
pub use crate::core::attributes::{as_array, first_value};
pub use crate::core::{
    AttrValue, DirError, DirResult, DirectoryClient, Modification, NormalizedRecord, RawEntry,
    SearchOptions,
};
pub use crate::global::{
    add, configure, delete, force_reconnect, modify, search, search_raw, shutdown,
};
