use crate::event::{FieldLimits, TelemetryEvent, TransportMeta};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    // Permitted characters for every string field, checked after
    // truncation. A non-match is a validation failure, never a
    // sanitization.
    static ref FIELD_CHARSET: Regex = Regex::new(r"^[-A-Za-z0-9_. ]*$").expect("static regex");
}

/// The outcome of decoding one raw record. The processor's inner loop
/// matches on the tag and updates per-batch counters; it never aborts
/// the batch for a single bad record.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The record decoded cleanly. `processed` is the enriched JSON
    /// object, newline-terminated.
    Valid {
        event: TelemetryEvent,
        processed: Bytes,
    },
    /// The record decoded, but one or more fields required repair.
    /// `event.sanitized_fields` names them.
    Sanitized {
        event: TelemetryEvent,
        processed: Bytes,
    },
    /// The input was not a JSON object.
    ParseFailure,
    /// A required field was missing, or a string field violated the
    /// permitted character set.
    ValidationFailure { field: String },
    /// The enriched tree could not be re-serialized.
    SerializationFailure,
}

/// Decodes raw record payloads: parse, validate and sanitize, enrich
/// with the server arrival timestamp, and re-serialize.
#[derive(Debug, Clone, Default)]
pub struct EventCodec {
    limits: FieldLimits,
}

struct ValidationFailed {
    field: &'static str,
}

impl EventCodec {
    pub fn new(limits: FieldLimits) -> Self {
        Self { limits }
    }

    pub fn decode(&self, raw: &[u8], meta: &TransportMeta) -> Decoded {
        let Ok(parsed) = serde_json::from_slice::<Value>(raw) else {
            return Decoded::ParseFailure;
        };
        let Value::Object(mut tree) = parsed else {
            return Decoded::ParseFailure;
        };

        let mut sanitized = Vec::new();
        let fields = match validate_and_sanitize(&mut tree, &self.limits, &mut sanitized) {
            Ok(fields) => fields,
            Err(failed) => {
                return Decoded::ValidationFailure {
                    field: failed.field.to_string(),
                }
            }
        };

        // Enrichment: the server arrival time rides along with the event.
        tree.insert(
            "server_timestamp".to_string(),
            Value::from(meta.server_timestamp),
        );

        let Ok(mut processed) = serde_json::to_vec(&Value::Object(tree)) else {
            return Decoded::SerializationFailure;
        };
        if processed.last() != Some(&b'\n') {
            processed.push(b'\n');
        }

        let event = TelemetryEvent {
            event_version: fields.event_version,
            app_name: fields.app_name,
            client_id: fields.client_id,
            event_id: fields.event_id,
            event_type: fields.event_type,
            event_timestamp: fields.event_timestamp,
            app_version: fields.app_version,
            level_id: fields.level_id,
            position_x: fields.position_x,
            position_y: fields.position_y,
            shard_id: meta.shard_id.clone(),
            sequence_number: meta.sequence_number.clone(),
            partition_key: meta.partition_key.clone(),
            server_timestamp: meta.server_timestamp,
            required_sanitization: !sanitized.is_empty(),
            sanitized_fields: sanitized,
        };

        let processed = Bytes::from(processed);
        if event.required_sanitization {
            Decoded::Sanitized { event, processed }
        } else {
            Decoded::Valid { event, processed }
        }
    }
}

#[derive(Default)]
struct ExtractedFields {
    event_version: String,
    app_name: String,
    client_id: String,
    event_id: String,
    event_type: String,
    event_timestamp: i64,
    app_version: Option<String>,
    level_id: Option<String>,
    position_x: Option<f64>,
    position_y: Option<f64>,
}

fn validate_and_sanitize(
    tree: &mut Map<String, Value>,
    limits: &FieldLimits,
    sanitized: &mut Vec<String>,
) -> Result<ExtractedFields, ValidationFailed> {
    let mut fields = ExtractedFields::default();

    fields.event_version = required_string(tree, "event_version", limits.event_version, sanitized)?;
    fields.app_name = required_string(tree, "app_name", limits.app_name, sanitized)?;
    fields.client_id = required_string(tree, "client_id", limits.client_id, sanitized)?;
    fields.event_id = required_string(tree, "event_id", limits.event_id, sanitized)?;
    fields.event_type = required_string(tree, "event_type", limits.event_type, sanitized)?;
    fields.event_timestamp = required_timestamp(tree, "event_timestamp", sanitized)?;

    fields.app_version = optional_string(tree, "app_version", limits.app_version, sanitized)?;
    fields.level_id = optional_string(tree, "level_id", limits.level_id, sanitized)?;
    fields.position_x = optional_position(tree, "position_x", sanitized);
    fields.position_y = optional_position(tree, "position_y", sanitized);

    Ok(fields)
}

fn required_string(
    tree: &mut Map<String, Value>,
    field: &'static str,
    limit: usize,
    sanitized: &mut Vec<String>,
) -> Result<String, ValidationFailed> {
    optional_string(tree, field, limit, sanitized)?.ok_or(ValidationFailed { field })
}

// A present-but-null value is treated exactly like an absent one.
// Overlong strings are truncated (and the truncation written back into
// the tree, so the archived JSON matches what was validated); the
// character-set check runs after truncation.
fn optional_string(
    tree: &mut Map<String, Value>,
    field: &'static str,
    limit: usize,
    sanitized: &mut Vec<String>,
) -> Result<Option<String>, ValidationFailed> {
    let value = match tree.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(_) => return Err(ValidationFailed { field }),
    };

    let value = if value.chars().count() > limit {
        let truncated: String = value.chars().take(limit).collect();
        tree.insert(field.to_string(), Value::String(truncated.clone()));
        sanitized.push(field.to_string());
        truncated
    } else {
        value
    };

    if !FIELD_CHARSET.is_match(&value) {
        return Err(ValidationFailed { field });
    }
    Ok(Some(value))
}

// Negative and non-numeric timestamps are repaired to 0. A string
// holding an integer is accepted as-is.
fn required_timestamp(
    tree: &mut Map<String, Value>,
    field: &'static str,
    sanitized: &mut Vec<String>,
) -> Result<i64, ValidationFailed> {
    let parsed = match tree.get(field) {
        None | Some(Value::Null) => return Err(ValidationFailed { field }),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };

    let repaired = match parsed {
        Some(millis) if millis >= 0 => return Ok(millis),
        _ => 0,
    };
    tree.insert(field.to_string(), Value::from(repaired));
    sanitized.push(field.to_string());
    Ok(repaired)
}

// Positions are optional; present-but-unparseable values become 0.0.
fn optional_position(
    tree: &mut Map<String, Value>,
    field: &'static str,
    sanitized: &mut Vec<String>,
) -> Option<f64> {
    let parsed = match tree.get(field) {
        None | Some(Value::Null) => return None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(position) => Some(position),
        None => {
            tree.insert(field.to_string(), Value::from(0.0));
            sanitized.push(field.to_string());
            Some(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TransportMeta {
        TransportMeta {
            shard_id: "shardId-000000000000".to_string(),
            partition_key: "pk".to_string(),
            sequence_number: "49568167373333333".to_string(),
            server_timestamp: 1508872164000,
        }
    }

    fn decode(raw: &str) -> Decoded {
        EventCodec::default().decode(raw.as_bytes(), &meta())
    }

    #[test]
    fn non_json_input_is_a_parse_failure() {
        assert_eq!(decode("not json at all"), Decoded::ParseFailure);
        assert_eq!(decode("[1, 2, 3]"), Decoded::ParseFailure);
    }

    #[test]
    fn null_required_field_is_treated_as_missing() {
        let raw = r#"{"event_version":"1.0","app_name":"G","client_id":"c","event_id":"e",
                      "event_type":null,"event_timestamp":1}"#;
        assert_eq!(
            decode(raw),
            Decoded::ValidationFailure {
                field: "event_type".to_string()
            }
        );
    }

    #[test]
    fn string_encoded_timestamp_is_accepted_without_sanitization() {
        let raw = r#"{"event_version":"1.0","app_name":"G","client_id":"c","event_id":"e",
                      "event_type":"t","event_timestamp":"1508872163135"}"#;
        match decode(raw) {
            Decoded::Valid { event, .. } => assert_eq!(event.event_timestamp, 1508872163135),
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn negative_timestamp_is_repaired_to_zero() {
        let raw = r#"{"event_version":"1.0","app_name":"G","client_id":"c","event_id":"e",
                      "event_type":"t","event_timestamp":-5}"#;
        match decode(raw) {
            Decoded::Sanitized { event, .. } => {
                assert_eq!(event.event_timestamp, 0);
                assert_eq!(event.sanitized_fields, vec!["event_timestamp"]);
            }
            other => panic!("expected Sanitized, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_position_becomes_zero() {
        let raw = r#"{"event_version":"1.0","app_name":"G","client_id":"c","event_id":"e",
                      "event_type":"t","event_timestamp":1,"position_x":"over there","position_y":2.5}"#;
        match decode(raw) {
            Decoded::Sanitized { event, .. } => {
                assert_eq!(event.position_x, Some(0.0));
                assert_eq!(event.position_y, Some(2.5));
                assert_eq!(event.sanitized_fields, vec!["position_x"]);
            }
            other => panic!("expected Sanitized, got {other:?}"),
        }
    }

    #[test]
    fn sanitization_is_idempotent() {
        let long_name: String = std::iter::repeat('a').take(100).collect();
        let raw = serde_json::json!({
            "event_version": "1.0",
            "app_name": long_name,
            "client_id": "c",
            "event_id": "e",
            "event_type": "t",
            "event_timestamp": -3,
        })
        .to_string();

        let Decoded::Sanitized { processed, .. } = decode(&raw) else {
            panic!("expected Sanitized");
        };

        // Re-decoding the sanitized output sanitizes nothing further
        // beyond the repairs already applied.
        let again = EventCodec::default().decode(&processed, &meta());
        match again {
            Decoded::Valid { event, .. } => {
                assert_eq!(event.app_name.len(), 64);
                assert_eq!(event.event_timestamp, 0);
            }
            other => panic!("expected Valid on re-decode, got {other:?}"),
        }
    }
}
