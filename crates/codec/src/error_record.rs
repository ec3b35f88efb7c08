use crate::decode::Decoded;
use bytes::Bytes;
use serde::Serialize;

/// Why a record was routed to the error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    Sanitization,
    Validation,
    Parse,
    Serialization,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::Sanitization => "SanitizationException",
            ErrorReason::Validation => "TelemetryEventValidationException",
            ErrorReason::Parse => "TelemetryEventParseException",
            ErrorReason::Serialization => "TelemetryEventSerializationException",
        }
    }
}

impl Serialize for ErrorReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The record written to the error archive when decoding fails or
/// sanitization was required. `json` carries the raw input when it is
/// valid UTF-8; `hex` carries it otherwise; `fields` names the
/// sanitized fields when the reason is sanitization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorRecord {
    pub reason: ErrorReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

impl ErrorRecord {
    /// Build the error record for a decode outcome, or None when the
    /// outcome has no error to report.
    pub fn for_outcome(raw: &[u8], outcome: &Decoded) -> Option<ErrorRecord> {
        let record = match outcome {
            Decoded::Valid { .. } => return None,
            Decoded::Sanitized { event, .. } => ErrorRecord {
                reason: ErrorReason::Sanitization,
                json: utf8(raw),
                fields: Some(event.sanitized_fields.clone()),
                hex: None,
            },
            Decoded::ParseFailure => match utf8(raw) {
                Some(text) => ErrorRecord {
                    reason: ErrorReason::Parse,
                    json: Some(text),
                    fields: None,
                    hex: None,
                },
                None => ErrorRecord {
                    reason: ErrorReason::Parse,
                    json: None,
                    fields: None,
                    hex: Some(crate::hex::to_hex(raw)),
                },
            },
            Decoded::ValidationFailure { .. } => ErrorRecord {
                reason: ErrorReason::Validation,
                json: utf8(raw),
                fields: None,
                hex: None,
            },
            Decoded::SerializationFailure => ErrorRecord {
                reason: ErrorReason::Serialization,
                json: utf8(raw),
                fields: None,
                hex: None,
            },
        };
        Some(record)
    }

    /// Serialize as a newline-terminated JSON line.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }
}

fn utf8(raw: &[u8]) -> Option<String> {
    std::str::from_utf8(raw).ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_of_binary_input_reports_hex() {
        let raw = [0x0a_u8, 0xff, 0x12, 0x38];
        let record = ErrorRecord::for_outcome(&raw, &Decoded::ParseFailure).unwrap();
        assert_eq!(record.hex.as_deref(), Some("0aff1238"));
        assert_eq!(record.json, None);

        let line = record.to_bytes().unwrap();
        assert_eq!(
            &line[..],
            br#"{"reason":"TelemetryEventParseException","hex":"0aff1238"}
"#
        );
    }

    #[test]
    fn validation_failure_carries_the_raw_json() {
        let raw = br#"{"app_name":"G"}"#;
        let outcome = Decoded::ValidationFailure {
            field: "event_type".to_string(),
        };
        let record = ErrorRecord::for_outcome(raw, &outcome).unwrap();
        assert_eq!(record.reason, ErrorReason::Validation);
        assert_eq!(record.json.as_deref(), Some(r#"{"app_name":"G"}"#));
    }
}
