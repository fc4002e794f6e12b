//! Envelope: the wire unit exchanged over the message stream.
//!
//! Envelopes are encoded as deterministic CBOR (RFC 8949 core deterministic
//! encoding):
//! - Map keys are small integers, sorted by encoded byte comparison
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Decoding is lenient about form: any well-formed CBOR map with the right
//! fields and no repeated keys is accepted, whatever its key order or integer
//! widths. The event id travels explicitly, so nothing hashes the bytes.

use std::io::Cursor;

use bytes::Bytes;
use ciborium::value::{Integer, Value};

use crate::error::CoreError;
use crate::event::CreditEvent;
use crate::types::{Email, EventId};

/// Current envelope schema version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Envelope field keys.
mod keys {
    pub const VERSION: u64 = 0;
    pub const TOPIC: u64 = 1;
    pub const KEY: u64 = 2;
    pub const EVENT_ID: u64 = 3;
    pub const PAYLOAD: u64 = 4;
}

/// Payload (CreditEvent) field keys.
mod payload_keys {
    pub const EMAIL: u64 = 0;
    pub const CREDITS: u64 = 1;
    pub const EVENT_ID: u64 = 2;
    pub const PRODUCED_AT: u64 = 3;
}

/// A serializable unit that crosses the service boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub topic: String,
    /// Partition key. Always the payload email.
    pub key: String,
    pub event_id: EventId,
    pub payload: CreditEvent,
}

impl Envelope {
    /// Wrap an event for the given topic.
    pub fn new(topic: impl Into<String>, payload: CreditEvent) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            topic: topic.into(),
            key: payload.email.as_str().to_string(),
            event_id: payload.event_id,
            payload,
        }
    }

    /// Encode to canonical bytes.
    pub fn encode(&self) -> Bytes {
        encode_envelope(self)
    }
}

/// Encode an envelope to canonical CBOR bytes.
pub fn encode_envelope(envelope: &Envelope) -> Bytes {
    let value = envelope_to_cbor_value(envelope);
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value);
    Bytes::from(buf)
}

/// Decode an envelope from bytes.
///
/// Fails with [`CoreError::MalformedEnvelope`] when the bytes are not a
/// single CBOR item, carry another schema version, miss or mistype a field,
/// repeat a map key, or disagree between envelope and payload.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CoreError> {
    let mut cursor = Cursor::new(bytes);
    let value: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| CoreError::MalformedEnvelope(format!("not CBOR: {}", e)))?;

    if cursor.position() != bytes.len() as u64 {
        return Err(malformed("trailing bytes after envelope"));
    }

    cbor_value_to_envelope(&value)
}

fn malformed(reason: &str) -> CoreError {
    CoreError::MalformedEnvelope(reason.to_string())
}

fn int_key(key: u64) -> Value {
    Value::Integer(key.into())
}

fn envelope_to_cbor_value(envelope: &Envelope) -> Value {
    Value::Map(vec![
        (int_key(keys::VERSION), Value::Integer(envelope.version.into())),
        (int_key(keys::TOPIC), Value::Text(envelope.topic.clone())),
        (int_key(keys::KEY), Value::Text(envelope.key.clone())),
        (
            int_key(keys::EVENT_ID),
            Value::Bytes(envelope.event_id.0.to_vec()),
        ),
        (int_key(keys::PAYLOAD), event_to_cbor_value(&envelope.payload)),
    ])
}

fn event_to_cbor_value(event: &CreditEvent) -> Value {
    Value::Map(vec![
        (
            int_key(payload_keys::EMAIL),
            Value::Text(event.email.as_str().to_string()),
        ),
        (
            int_key(payload_keys::CREDITS),
            Value::Integer(event.credits.into()),
        ),
        (
            int_key(payload_keys::EVENT_ID),
            Value::Bytes(event.event_id.0.to_vec()),
        ),
        (
            int_key(payload_keys::PRODUCED_AT),
            Value::Integer(event.produced_at.into()),
        ),
    ])
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoder
// ─────────────────────────────────────────────────────────────────────────────

/// Recursively encode a CBOR value.
///
/// Only the value kinds produced by this module are supported.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        _ => unreachable!("envelope encoder only emits integers, strings, arrays and maps"),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n = i128::from(i);

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map with keys sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoder
// ─────────────────────────────────────────────────────────────────────────────

/// Integer-keyed view over a decoded CBOR map.
struct Fields<'a>(&'a [(Value, Value)]);

impl<'a> Fields<'a> {
    fn from_value(value: &'a Value, what: &str) -> Result<Self, CoreError> {
        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err(CoreError::MalformedEnvelope(format!("{} is not a map", what))),
        };

        let mut keys: Vec<i128> = entries
            .iter()
            .filter_map(|(k, _)| match k {
                Value::Integer(i) => Some(i128::from(*i)),
                _ => None,
            })
            .collect();
        keys.sort_unstable();
        if keys.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(CoreError::MalformedEnvelope(format!(
                "{} repeats a key",
                what
            )));
        }

        Ok(Self(entries))
    }

    fn get(&self, key: u64) -> Option<&'a Value> {
        self.0
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
    }

    fn int(&self, key: u64, name: &str) -> Result<i128, CoreError> {
        match self.get(key) {
            Some(Value::Integer(i)) => Ok(i128::from(*i)),
            _ => Err(CoreError::MalformedEnvelope(format!("missing or invalid {}", name))),
        }
    }

    fn text(&self, key: u64, name: &str) -> Result<&'a str, CoreError> {
        match self.get(key) {
            Some(Value::Text(s)) => Ok(s.as_str()),
            _ => Err(CoreError::MalformedEnvelope(format!("missing or invalid {}", name))),
        }
    }

    fn event_id(&self, key: u64, name: &str) -> Result<EventId, CoreError> {
        match self.get(key) {
            Some(Value::Bytes(b)) => EventId::try_from(b.as_slice())
                .map_err(|_| CoreError::MalformedEnvelope(format!("{} must be 32 bytes", name))),
            _ => Err(CoreError::MalformedEnvelope(format!("missing or invalid {}", name))),
        }
    }
}

fn cbor_value_to_envelope(value: &Value) -> Result<Envelope, CoreError> {
    let fields = Fields::from_value(value, "envelope")?;

    let version = fields.int(keys::VERSION, "version")?;
    if version != ENVELOPE_VERSION as i128 {
        return Err(CoreError::MalformedEnvelope(format!(
            "unsupported schema version {} (expected {})",
            version, ENVELOPE_VERSION
        )));
    }

    let topic = fields.text(keys::TOPIC, "topic")?.to_string();
    let key = fields.text(keys::KEY, "key")?.to_string();
    let event_id = fields.event_id(keys::EVENT_ID, "event_id")?;

    let payload_value = fields
        .get(keys::PAYLOAD)
        .ok_or_else(|| malformed("missing payload"))?;
    let payload = cbor_value_to_event(payload_value)?;

    if payload.event_id != event_id {
        return Err(malformed("envelope event_id does not match payload"));
    }
    if payload.email.as_str() != key {
        return Err(malformed("envelope key does not match payload email"));
    }

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        topic,
        key,
        event_id,
        payload,
    })
}

fn cbor_value_to_event(value: &Value) -> Result<CreditEvent, CoreError> {
    let fields = Fields::from_value(value, "payload")?;

    let email = Email::parse(fields.text(payload_keys::EMAIL, "email")?)
        .map_err(|e| CoreError::MalformedEnvelope(e.to_string()))?;

    let credits = i64::try_from(fields.int(payload_keys::CREDITS, "credits")?)
        .map_err(|_| malformed("credits out of range"))?;
    let produced_at = i64::try_from(fields.int(payload_keys::PRODUCED_AT, "produced_at")?)
        .map_err(|_| malformed("produced_at out of range"))?;
    let event_id = fields.event_id(payload_keys::EVENT_ID, "payload event_id")?;

    Ok(CreditEvent {
        email,
        credits,
        event_id,
        produced_at,
    })
}
