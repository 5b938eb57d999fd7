// src/core/client.rs

//! `DirectoryClient` ties the connection manager to the search and mutation
//! executors. It is the owned state object behind the process-wide facade;
//! any number of independent clients can coexist.

use super::errors::{DirError, DirResult};
use super::lifecycle::{Connection, ConnectionManager, ConnectionState};
use super::transport::{LdapTransport, Transport};
use crate::config::Config;
use std::sync::Arc;

/// A directory client sharing one lazily-opened connection between callers.
#[derive(Clone)]
pub struct DirectoryClient {
    manager: ConnectionManager,
}

impl DirectoryClient {
    /// Creates an unconfigured client over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            manager: ConnectionManager::new(transport),
        }
    }

    /// Creates a client over the `ldap3` transport and configures it.
    pub fn with_config(config: Config) -> DirResult<Self> {
        let client = Self::new(Arc::new(LdapTransport::new()));
        client.configure(config)?;
        Ok(client)
    }

    pub fn configure(&self, config: Config) -> DirResult<()> {
        self.manager.configure(config)
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await
    }

    pub fn force_reconnect(&self) -> DirResult<()> {
        self.manager.force_reconnect()
    }

    /// Waits for the shared connection. Exposed mostly for callers that need a
    /// protocol operation the executors do not cover.
    pub async fn acquire(&self) -> DirResult<Connection> {
        self.manager.acquire().await
    }

    /// Passes `result` through, dropping the cached connection first when the
    /// operation found its session closed. The next caller reconnects.
    pub(crate) async fn checked<T>(
        &self,
        conn: &Connection,
        result: DirResult<T>,
    ) -> DirResult<T> {
        if let Err(DirError::ConnectionClosed) = &result {
            self.manager
                .invalidate(conn.generation(), "connection closed under an operation")
                .await;
        }
        result
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn connect_attempts(&self) -> u64 {
        self.manager.connect_attempts()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}
