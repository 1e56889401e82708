//! Adapter configuration and the builder that turns it into an adapter.

use rkv_client::{RespClient, RespConnection, StoreOptions};
use rkv_common::{Error, RkvResult, StoreError};
use rkv_engine::KvStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::adapter::{checked_scan_count, KeyValueAdapter, DEFAULT_SCAN_COUNT};
use crate::key::{KeyFormatter, DEFAULT_KEY_TEMPLATE};
use crate::serializer::{Serializer, SerializerKind};

/// Declarative adapter configuration, loadable from JSON.
///
/// ```json
/// {
///   "address": "127.0.0.1:6379",
///   "key_template": "rec:{record_id}",
///   "serializer": "msgpack",
///   "store_options": { "read_timeout_ms": "500" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// Store connection target, e.g. `host:port`.
    pub address: String,
    #[serde(default = "default_key_template")]
    pub key_template: String,
    #[serde(default)]
    pub serializer: SerializerKind,
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    /// Forwarded verbatim to the store client.
    #[serde(default)]
    pub store_options: StoreOptions,
}

fn default_key_template() -> String {
    DEFAULT_KEY_TEMPLATE.to_string()
}

fn default_scan_count() -> usize {
    DEFAULT_SCAN_COUNT
}

impl AdapterConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(address: impl Into<String>) -> Self {
        AdapterConfig {
            address: address.into(),
            key_template: default_key_template(),
            serializer: SerializerKind::default(),
            scan_count: DEFAULT_SCAN_COUNT,
            store_options: StoreOptions::default(),
        }
    }

    pub fn from_json(text: &str) -> RkvResult<Self> {
        serde_json::from_str(text).map_err(|e| Error::configuration("adapter config", e.to_string()))
    }
}

/// Builds a [`KeyValueAdapter`] step by step.
///
/// Validation order is fixed: key template, scan count, then store options.
/// No step touches the network; the RESP backends connect on first use.
pub struct AdapterBuilder<R> {
    config: AdapterConfig,
    serializer: Option<Box<dyn Serializer<R>>>,
}

impl<R: Serialize + DeserializeOwned + 'static> AdapterBuilder<R> {
    pub fn new(address: impl Into<String>) -> Self {
        Self::from_config(AdapterConfig::new(address))
    }

    pub fn from_config(config: AdapterConfig) -> Self {
        AdapterBuilder {
            config,
            serializer: None,
        }
    }

    /// Uses a custom serializer instead of the configured kind.
    pub fn serializer(mut self, serializer: impl Serializer<R> + 'static) -> Self {
        self.serializer = Some(Box::new(serializer));
        self
    }

    pub fn serializer_kind(mut self, kind: SerializerKind) -> Self {
        self.config.serializer = kind;
        self.serializer = None;
        self
    }

    pub fn key_template(mut self, template: impl Into<String>) -> Self {
        self.config.key_template = template.into();
        self
    }

    pub fn scan_count(mut self, scan_count: usize) -> Self {
        self.config.scan_count = scan_count;
        self
    }

    /// Adds one pass-through store option.
    pub fn store_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.store_options.insert(key, value);
        self
    }

    pub fn store_options(mut self, options: StoreOptions) -> Self {
        self.config.store_options = options;
        self
    }

    /// Builds an adapter over a shareable [`RespClient`].
    pub fn connect(self) -> RkvResult<KeyValueAdapter<R, RespClient>> {
        self.build_with_opener(RespClient::open)
    }

    /// Builds an adapter over a single-caller [`RespConnection`].
    pub fn connect_unshared(self) -> RkvResult<KeyValueAdapter<R, RespConnection>> {
        self.build_with_opener(RespConnection::open)
    }

    /// Builds an adapter over an existing store; the address and store
    /// options are ignored.
    pub fn build_with<S: KvStore>(self, store: S) -> RkvResult<KeyValueAdapter<R, S>> {
        self.build_with_opener(|_, _| Ok(store))
    }

    fn build_with_opener<S: KvStore>(
        self,
        open: impl FnOnce(&str, &StoreOptions) -> Result<S, StoreError>,
    ) -> RkvResult<KeyValueAdapter<R, S>> {
        let keys = KeyFormatter::new(&self.config.key_template)?;
        let scan_count = checked_scan_count(self.config.scan_count)?;
        let store = open(&self.config.address, &self.config.store_options).map_err(|e| {
            Error::configuration(format!("store {:?}", self.config.address), e.to_string())
        })?;
        let serializer = match self.serializer {
            Some(serializer) => serializer,
            None => self.config.serializer.build(),
        };
        KeyValueAdapter::from_parts(store, serializer, keys).with_scan_count(scan_count)
    }
}
