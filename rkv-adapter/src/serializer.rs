//! # Record Serializers
//!
//! ## Design Principles
//!
//! 1. **Capability Interface**: The adapter only sees `dyn Serializer<R>`, so
//!    a new format never touches adapter code.
//! 2. **Self-Describing Default**: MessagePack with named fields stores any
//!    serde record without a schema registered up front.
//! 3. **All or Nothing**: Decoding either yields a complete record or a
//!    `CodecError`; trailing bytes after a complete value are an error too.

use rkv_common::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Converts records to and from opaque byte payloads.
pub trait Serializer<R>: Send + Sync {
    /// Short format name used in logs.
    fn name(&self) -> &'static str;

    /// Encodes a record into a payload.
    fn encode(&self, record: &R) -> Result<Vec<u8>, CodecError>;

    /// Decodes a payload produced by `encode`.
    fn decode(&self, payload: &[u8]) -> Result<R, CodecError>;
}

/// Default binary serializer: MessagePack with field names (rmp-serde).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackSerializer;

impl<R: Serialize + DeserializeOwned> Serializer<R> for MessagePackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, record: &R) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(record).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<R, CodecError> {
        let mut de = rmp_serde::Deserializer::new(payload);
        let record = R::deserialize(&mut de).map_err(|e| CodecError::Decode(e.to_string()))?;
        let rest = de.into_inner();
        if !rest.is_empty() {
            return Err(CodecError::Decode(format!(
                "{} trailing bytes after record",
                rest.len()
            )));
        }
        Ok(record)
    }
}

/// Text serializer: JSON (serde_json).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<R: Serialize + DeserializeOwned> Serializer<R> for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, record: &R) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(record).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<R, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Serializer selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    MsgPack,
    Json,
}

impl SerializerKind {
    /// Instantiates the serializer for records of type `R`.
    pub fn build<R: Serialize + DeserializeOwned>(self) -> Box<dyn Serializer<R>> {
        match self {
            SerializerKind::MsgPack => Box::new(MessagePackSerializer),
            SerializerKind::Json => Box::new(JsonSerializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        record_id: String,
        name: String,
        age: Option<u32>,
        tags: Vec<String>,
        scores: BTreeMap<String, f64>,
    }

    fn person() -> Person {
        Person {
            record_id: "p-1".into(),
            name: "Ada Lovelace".into(),
            age: Some(36),
            tags: vec!["math".into(), "poetry".into()],
            scores: BTreeMap::from([("analysis".to_string(), 9.5)]),
        }
    }

    /// A record whose `Serialize` impl always fails.
    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("handle cannot be serialized"))
        }
    }

    impl<'de> Deserialize<'de> for Unencodable {
        fn deserialize<D: serde::Deserializer<'de>>(_: D) -> Result<Self, D::Error> {
            Ok(Unencodable)
        }
    }

    #[test]
    fn round_trips_with_every_kind() {
        for kind in [SerializerKind::MsgPack, SerializerKind::Json] {
            let serializer = kind.build::<Person>();
            let payload = serializer.encode(&person()).unwrap();
            assert_eq!(serializer.decode(&payload).unwrap(), person(), "{}", serializer.name());
        }
    }

    #[test]
    fn msgpack_keeps_field_names() {
        let payload = Serializer::<Person>::encode(&MessagePackSerializer, &person()).unwrap();
        let needle = b"record_id";
        assert!(payload.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let serializer = MessagePackSerializer;
        let payload = Serializer::<Person>::encode(&serializer, &person()).unwrap();
        for cut in [0, 1, payload.len() / 2, payload.len() - 1] {
            let result: Result<Person, _> = serializer.decode(&payload[..cut]);
            assert!(matches!(result, Err(CodecError::Decode(_))), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = Serializer::<Person>::encode(&MessagePackSerializer, &person()).unwrap();
        payload.push(0xc0);
        let result: Result<Person, _> = MessagePackSerializer.decode(&payload);
        assert!(matches!(result, Err(CodecError::Decode(_))));

        let mut text = Serializer::<Person>::encode(&JsonSerializer, &person()).unwrap();
        text.extend_from_slice(b" x");
        let result: Result<Person, _> = JsonSerializer.decode(&text);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        let payload = Serializer::<Vec<u32>>::encode(&MessagePackSerializer, &vec![1, 2, 3]).unwrap();
        let result: Result<Person, _> = MessagePackSerializer.decode(&payload);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn unencodable_record_is_an_encode_error() {
        for kind in [SerializerKind::MsgPack, SerializerKind::Json] {
            let err = kind.build::<Unencodable>().encode(&Unencodable).unwrap_err();
            assert!(matches!(err, CodecError::Encode(ref msg) if msg.contains("handle")));
        }
    }

    #[test]
    fn kind_names_in_config() {
        let kind: SerializerKind = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(kind, SerializerKind::Json);
        let kind: SerializerKind = serde_json::from_str("\"msgpack\"").unwrap();
        assert_eq!(kind, SerializerKind::MsgPack);
    }
}
