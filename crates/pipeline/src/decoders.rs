use crate::pointer::ObjectPointerEvent;
use crate::StreamRecord;
use bytes::Bytes;
use codec::{Decoded, ErrorRecord, EventCodec};

/// Classification of one record's decode, used for per-batch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeClass {
    Valid,
    Sanitized,
    ParseFailure,
    ValidationFailure,
    SerializationFailure,
}

/// What the processor should do with one decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Buffer `data` for the next emit.
    Append {
        data: Bytes,
        class: DecodeClass,
        event_timestamp: i64,
    },
    /// Count it and move on.
    Skip { class: DecodeClass },
}

/// Turns raw stream records into buffered payloads. The event and
/// error-handler processors run the same decode pipeline but keep
/// opposite halves of the outcome.
pub trait RecordDecoder: Send {
    /// Decode one record. An `Err` is an unexpected internal failure,
    /// counted separately from the decode classes; it never aborts the
    /// batch.
    fn decode(&self, shard_id: &str, record: &StreamRecord) -> anyhow::Result<Disposition>;
}

fn classify(outcome: &Decoded) -> DecodeClass {
    match outcome {
        Decoded::Valid { .. } => DecodeClass::Valid,
        Decoded::Sanitized { .. } => DecodeClass::Sanitized,
        Decoded::ParseFailure => DecodeClass::ParseFailure,
        Decoded::ValidationFailure { .. } => DecodeClass::ValidationFailure,
        Decoded::SerializationFailure => DecodeClass::SerializationFailure,
    }
}

/// Buffers the processed JSON of valid (including sanitized) events;
/// failed records are counted and dropped, to be picked up by the
/// error-handler processor co-running on the same worker.
pub struct EventDecoder {
    codec: EventCodec,
}

impl EventDecoder {
    pub fn new(codec: EventCodec) -> Self {
        Self { codec }
    }
}

impl RecordDecoder for EventDecoder {
    fn decode(&self, shard_id: &str, record: &StreamRecord) -> anyhow::Result<Disposition> {
        let meta = record.transport_meta(shard_id);
        let outcome = self.codec.decode(&record.data, &meta);
        let class = classify(&outcome);

        Ok(match outcome {
            Decoded::Valid { event, processed } | Decoded::Sanitized { event, processed } => {
                Disposition::Append {
                    data: processed,
                    class,
                    event_timestamp: event.event_timestamp,
                }
            }
            Decoded::ValidationFailure { ref field } => {
                tracing::debug!(sequence = %record.sequence_number, field = %field, "record failed validation");
                Disposition::Skip { class }
            }
            _ => {
                tracing::debug!(sequence = %record.sequence_number, ?class, "record failed to decode");
                Disposition::Skip { class }
            }
        })
    }
}

/// The inverse of [`EventDecoder`]: buffers an [`ErrorRecord`] line for
/// every record which failed to decode or required sanitization, and
/// skips clean records.
pub struct ErrorDecoder {
    codec: EventCodec,
}

impl ErrorDecoder {
    pub fn new(codec: EventCodec) -> Self {
        Self { codec }
    }
}

impl RecordDecoder for ErrorDecoder {
    fn decode(&self, shard_id: &str, record: &StreamRecord) -> anyhow::Result<Disposition> {
        let meta = record.transport_meta(shard_id);
        let outcome = self.codec.decode(&record.data, &meta);
        let class = classify(&outcome);

        match ErrorRecord::for_outcome(&record.data, &outcome) {
            None => Ok(Disposition::Skip { class }),
            Some(error_record) => Ok(Disposition::Append {
                data: error_record.to_bytes()?,
                class,
                event_timestamp: record.server_timestamp(),
            }),
        }
    }
}

/// Decodes object-pointer records on the warehouse side of the file
/// stream. Malformed pointers are counted as parse failures; pointers
/// whose filename is empty after trimming are validation failures.
pub struct PointerDecoder;

impl RecordDecoder for PointerDecoder {
    fn decode(&self, _shard_id: &str, record: &StreamRecord) -> anyhow::Result<Disposition> {
        match ObjectPointerEvent::parse(&record.data) {
            Some(pointer) => Ok(Disposition::Append {
                data: Bytes::from(pointer.filename),
                class: DecodeClass::Valid,
                event_timestamp: record.server_timestamp(),
            }),
            None if serde_json::from_slice::<serde_json::Value>(&record.data).is_ok() => {
                tracing::warn!(sequence = %record.sequence_number, "pointer record has no usable filename");
                Ok(Disposition::Skip {
                    class: DecodeClass::ValidationFailure,
                })
            }
            None => {
                tracing::warn!(sequence = %record.sequence_number, "pointer record is not valid JSON");
                Ok(Disposition::Skip {
                    class: DecodeClass::ParseFailure,
                })
            }
        }
    }
}
