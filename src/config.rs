// src/config.rs

//! Connection configuration: the data model, TOML loading, and validation.

use crate::core::errors::{DirError, DirResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// One endpoint, or several tried in order for failover.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum UriList {
    One(String),
    Many(Vec<String>),
}

impl UriList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            UriList::One(uri) => vec![uri.clone()],
            UriList::Many(uris) => uris.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            UriList::One(uri) => uri.trim().is_empty(),
            UriList::Many(uris) => uris.is_empty(),
        }
    }
}

impl fmt::Display for UriList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_vec().join(","))
    }
}

impl From<&str> for UriList {
    fn from(uri: &str) -> Self {
        UriList::One(uri.to_string())
    }
}

impl From<Vec<&str>> for UriList {
    fn from(uris: Vec<&str>) -> Self {
        UriList::Many(uris.into_iter().map(str::to_string).collect())
    }
}

/// Settings for the shared directory connection.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub uri: UriList,
    /// Bind DN. Without it the session stays anonymous.
    #[serde(default)]
    pub dn: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Inactivity after which the connection is torn down. `None` keeps it open.
    /// Accepts a humantime string (`"30s"`) or an integer in milliseconds.
    #[serde(
        default,
        deserialize_with = "millis_or_humantime::deserialize",
        serialize_with = "humantime_serde::serialize",
        alias = "disconnectWhenIdle_duration"
    )]
    pub disconnect_when_idle: Option<Duration>,
    /// Logs connection lifecycle events at `info` instead of `debug`.
    #[serde(default)]
    pub verbose: bool,
    /// Per-endpoint connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

mod millis_or_humantime {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(humantime_serde::Serde<Duration>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
            Raw::Millis(ms) => Duration::from_millis(ms),
            Raw::Text(text) => text.into_inner(),
        }))
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_log_level() -> String {
    "info".to_string()
}

// The password never shows up in logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("uri", &self.uri)
            .field("dn", &self.dn)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("disconnect_when_idle", &self.disconnect_when_idle)
            .field("verbose", &self.verbose)
            .field("connect_timeout", &self.connect_timeout)
            .field("starttls", &self.starttls)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// A configuration for an anonymous session with every other setting at
    /// its default.
    pub fn new(uri: impl Into<UriList>) -> Self {
        Self {
            uri: uri.into(),
            dn: None,
            password: None,
            disconnect_when_idle: None,
            verbose: false,
            connect_timeout: default_connect_timeout(),
            starttls: false,
            log_level: default_log_level(),
        }
    }

    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.disconnect_when_idle = Some(idle);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for logical consistency.
    pub fn validate(&self) -> DirResult<()> {
        if self.uri.is_empty() {
            return Err(DirError::InvalidConfig("uri cannot be empty".to_string()));
        }
        for uri in self.uri.to_vec() {
            let parsed = Url::parse(&uri)
                .map_err(|e| DirError::InvalidConfig(format!("invalid uri '{uri}': {e}")))?;
            if !matches!(parsed.scheme(), "ldap" | "ldaps" | "ldapi") {
                return Err(DirError::InvalidConfig(format!(
                    "unsupported scheme '{}' in uri '{uri}'",
                    parsed.scheme()
                )));
            }
            if self.starttls && parsed.scheme() == "ldaps" {
                warn!(uri = %uri, "starttls is ignored for ldaps:// endpoints");
            }
        }

        if self.password.is_some() && self.dn.is_none() {
            return Err(DirError::InvalidConfig(
                "password is set but dn is not".to_string(),
            ));
        }
        if let Some(dn) = &self.dn
            && dn.trim().is_empty()
        {
            return Err(DirError::InvalidConfig("dn cannot be blank".to_string()));
        }

        if self.disconnect_when_idle == Some(Duration::ZERO) {
            return Err(DirError::InvalidConfig(
                "disconnect_when_idle cannot be 0; omit it to disable idle teardown".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(DirError::InvalidConfig(
                "connect_timeout cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}
