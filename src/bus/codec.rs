//! Wire codec for bus payloads.
//!
//! Risk signals and decisions always travel as JSON. Action events travel as
//! JSON by default, or as Avro binary behind the Confluent wire framing
//! (`[0x00][schema_id: u32 big-endian][avro body]`) when configured. Decode
//! sniffs the magic byte, so a consumer accepts either encoding regardless
//! of its own configuration; encode falls back to JSON (with one warning per
//! failure) if the Avro body cannot be produced.
//!
//! The Avro body is the `ActionEvent` record with fields in declaration
//! order: three strings, an int, a boolean, a long, and two more strings.
//! Primitive encodings follow the Avro spec: zig-zag varints for int/long,
//! length-prefixed UTF-8 for strings, one byte for booleans.

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::BusConfig;
use crate::types::{ActionEvent, Sensitivity};

/// Confluent wire-format magic byte.
const MAGIC: u8 = 0x00;

/// Wire prefix length: magic + u32 schema id.
const PREFIX_LEN: usize = 5;

/// Codec failures. Always recoverable at the stage level (log + skip).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Avro decode failed: {0}")]
    Avro(String),

    #[error("payload truncated ({0} bytes)")]
    Truncated(usize),
}

/// Event encoding selected for the events topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCodec {
    Json,
    /// Confluent wire framing with the given schema id.
    ConfluentAvro { schema_id: u32 },
}

impl EventCodec {
    /// Pick the codec from bus configuration (`wire_format` key).
    pub fn from_config(bus: &BusConfig) -> Self {
        match bus.wire_format.as_str() {
            "avro" => EventCodec::ConfluentAvro {
                schema_id: bus.avro_schema_id,
            },
            _ => EventCodec::Json,
        }
    }

    /// Encode an event for the wire.
    ///
    /// Avro encode failures degrade to JSON so the event is never lost;
    /// each failure logs exactly one warning.
    pub fn encode(&self, event: &ActionEvent) -> Result<Vec<u8>, CodecError> {
        match self {
            EventCodec::Json => Ok(serde_json::to_vec(event)?),
            EventCodec::ConfluentAvro { schema_id } => match encode_avro_event(event) {
                Ok(body) => {
                    let mut payload = Vec::with_capacity(PREFIX_LEN + body.len());
                    payload.push(MAGIC);
                    payload.extend_from_slice(&schema_id.to_be_bytes());
                    payload.extend_from_slice(&body);
                    Ok(payload)
                }
                Err(e) => {
                    warn!(error = %e, "Avro encode failed, falling back to JSON");
                    Ok(serde_json::to_vec(event)?)
                }
            },
        }
    }

    /// Decode an event, accepting either framing.
    pub fn decode(payload: &[u8]) -> Result<ActionEvent, CodecError> {
        if payload.first() == Some(&MAGIC) {
            if payload.len() < PREFIX_LEN {
                return Err(CodecError::Truncated(payload.len()));
            }
            return decode_avro_event(&payload[PREFIX_LEN..]);
        }
        Ok(serde_json::from_slice(payload)?)
    }

    /// Schema id carried in a Confluent-framed payload, if any.
    pub fn sniff_schema_id(payload: &[u8]) -> Option<u32> {
        if payload.first() == Some(&MAGIC) && payload.len() >= PREFIX_LEN {
            let mut id = [0u8; 4];
            id.copy_from_slice(&payload[1..PREFIX_LEN]);
            return Some(u32::from_be_bytes(id));
        }
        None
    }
}

// ============================================================================
// Avro Binary Body
// ============================================================================

fn encode_avro_event(event: &ActionEvent) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(96);
    write_str(&mut out, &event.actor_id);
    write_str(&mut out, &event.action);
    write_str(&mut out, &event.role);
    write_long(&mut out, i64::from(event.frequency_last_60s));
    out.push(u8::from(event.geo_change));
    write_long(&mut out, event.timestamp);
    write_str(&mut out, &event.session_id.to_string());
    write_str(&mut out, event.resource_sensitivity.as_str());
    Ok(out)
}

fn decode_avro_event(body: &[u8]) -> Result<ActionEvent, CodecError> {
    let mut cursor = Cursor { body, pos: 0 };
    let actor_id = cursor.read_str()?;
    let action = cursor.read_str()?;
    let role = cursor.read_str()?;
    let frequency = cursor.read_long()?;
    let geo_change = cursor.read_bool()?;
    let timestamp = cursor.read_long()?;
    let session_raw = cursor.read_str()?;
    let sensitivity_raw = cursor.read_str()?;

    let session_id = Uuid::parse_str(&session_raw)
        .map_err(|e| CodecError::Avro(format!("bad session_id: {e}")))?;
    let resource_sensitivity = match sensitivity_raw.as_str() {
        "low" => Sensitivity::Low,
        "medium" => Sensitivity::Medium,
        "high" => Sensitivity::High,
        "critical" => Sensitivity::Critical,
        _ => Sensitivity::Unknown,
    };

    Ok(ActionEvent {
        actor_id,
        action,
        role,
        frequency_last_60s: u32::try_from(frequency.max(0)).unwrap_or(u32::MAX),
        geo_change,
        timestamp,
        session_id,
        resource_sensitivity,
    })
}

/// Zig-zag + varint encode (Avro int/long).
fn write_long(out: &mut Vec<u8>, value: i64) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        let byte = (zigzag & 0x7f) as u8;
        zigzag >>= 7;
        if zigzag == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    write_long(out, value.len() as i64);
    out.extend_from_slice(value.as_bytes());
}

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self
            .body
            .get(self.pos)
            .ok_or(CodecError::Truncated(self.body.len()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_long(&mut self) -> Result<i64, CodecError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 64 {
                return Err(CodecError::Avro("varint overflow".to_string()));
            }
        }
        Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::Avro(format!("bad boolean byte {other}"))),
        }
    }

    fn read_str(&mut self) -> Result<String, CodecError> {
        let len = self.read_long()?;
        let len = usize::try_from(len).map_err(|_| CodecError::Avro("negative length".into()))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.body.len())
            .ok_or(CodecError::Truncated(self.body.len()))?;
        let raw = &self.body[self.pos..end];
        self.pos = end;
        String::from_utf8(raw.to_vec()).map_err(|e| CodecError::Avro(format!("bad utf8: {e}")))
    }
}
