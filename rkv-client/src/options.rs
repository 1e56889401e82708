//! Store options: the pass-through configuration bag and its interpretation.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use rkv_common::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Opaque string options forwarded verbatim from the adapter to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreOptions(BTreeMap<String, String>);

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StoreOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        StoreOptions(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Connection settings understood by the RESP client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
}

impl ConnectionSettings {
    /// Interprets the recognized keys of `options`.
    ///
    /// Unknown keys are logged and ignored; a recognized key with a value
    /// that does not parse is a `Config` error.
    pub fn from_options(options: &StoreOptions) -> StoreResult<Self> {
        let mut settings = ConnectionSettings::default();
        for (key, value) in options.iter() {
            match key {
                "connect_timeout_ms" => settings.connect_timeout = Some(millis(key, value)?),
                "read_timeout_ms" => settings.read_timeout = Some(millis(key, value)?),
                "write_timeout_ms" => settings.write_timeout = Some(millis(key, value)?),
                "username" => settings.username = Some(value.to_owned()),
                "password" => settings.password = Some(value.to_owned()),
                "db" => settings.db = Some(parse(key, value)?),
                _ => warn!(option = key, "ignoring unrecognized store option"),
            }
        }
        if settings.username.is_some() && settings.password.is_none() {
            return Err(StoreError::config("store option `username` requires `password`"));
        }
        Ok(settings)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> StoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::config(format!("store option `{key}` has invalid value {value:?}")))
}

fn millis(key: &str, value: &str) -> StoreResult<Duration> {
    match parse::<u64>(key, value)? {
        // The socket API rejects zero timeouts.
        0 => Err(StoreError::config(format!("store option `{key}` must be greater than zero"))),
        ms => Ok(Duration::from_millis(ms)),
    }
}
