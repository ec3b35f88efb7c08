//! Decoding of raw telemetry records into validated, sanitized, and
//! enriched JSON events, plus the error-path record format for records
//! which fail to decode.

mod decode;
mod error_record;
mod event;
pub mod hex;

pub use self::decode::{Decoded, EventCodec};
pub use self::error_record::{ErrorReason, ErrorRecord};
pub use self::event::{FieldLimits, TelemetryEvent, TransportMeta};
