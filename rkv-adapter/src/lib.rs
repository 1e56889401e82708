//! RecordKV adapter - persist serde records in a key-value store.
//!
//! A [`KeyValueAdapter`] combines three pieces:
//!
//! - a [`Serializer`] turning records into bytes (MessagePack by default),
//! - a [`KeyFormatter`] turning record ids into keys (`"{record_id}"` by default),
//! - a [`KvStore`] doing the actual GET/SET/SCAN work.
//!
//! # Example
//!
//! ```ignore
//! use rkv_adapter::AdapterBuilder;
//!
//! let adapter = AdapterBuilder::<Person>::new("127.0.0.1:6379")
//!     .key_template("person:{record_id}")
//!     .store_option("read_timeout_ms", "500")
//!     .connect()?;
//!
//! adapter.set("ada", &ada)?;
//! let back = adapter.get("ada")?;
//! for person in adapter.iterate() {
//!     println!("{:?}", person?);
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod key;
pub mod serializer;

pub use adapter::{Entries, KeyValueAdapter, Record, Records, DEFAULT_SCAN_COUNT};
pub use config::{AdapterBuilder, AdapterConfig};
pub use key::{KeyFormatter, DEFAULT_KEY_TEMPLATE, RECORD_ID_PLACEHOLDER};
pub use serializer::{JsonSerializer, MessagePackSerializer, Serializer, SerializerKind};

pub use rkv_client::{RespClient, RespConnection, StoreOptions};
pub use rkv_common::{CodecError, Error, RkvResult, StoreError, StoreErrorKind};
pub use rkv_engine::{KvStore, MemoryStore};
