//! The shard-scoped record pipeline: decode, buffer, emit, checkpoint.
//!
//! Records flow `Stream(shard) → RecordProcessor → decoder → Buffer →
//! Emitter → sink → Checkpoint`, with at-least-once semantics. The
//! stream transport, object store, and checkpoint coordinator are
//! external collaborators consumed through the traits in
//! [`connectors`].

mod archive;
mod buffer;
mod compound;
mod connectors;
mod decoders;
mod emitter;
mod pointer;
mod processor;
mod retry;
mod settings;

pub use archive::{object_key, ArchivalEmitter};
pub use buffer::{Buffer, BufferConfig, BufferSnapshot};
pub use compound::{CompoundProcessor, ProcessorRegistry};
pub use connectors::{Checkpointer, ObjectStore, StreamPublisher};
pub use decoders::{DecodeClass, Disposition, ErrorDecoder, EventDecoder, PointerDecoder, RecordDecoder};
pub use emitter::{EmitError, Emitter};
pub use pointer::{ObjectPointerEvent, PointerPublishingEmitter};
pub use processor::{Processor, ProcessorConfig, ProcessorState, RecordProcessor, ShutdownReason};
pub use retry::RetryPolicy;
pub use settings::{StreamPosition, StreamSettings};

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One record as handed over by the stream transport client.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub data: Bytes,
    pub partition_key: String,
    pub sequence_number: String,
    /// Server-side arrival time of the record.
    pub arrival: DateTime<Utc>,
}

impl StreamRecord {
    /// Arrival time as unix millis, the form in which it is attached to
    /// decoded events.
    pub fn server_timestamp(&self) -> i64 {
        self.arrival.timestamp_millis()
    }

    pub fn transport_meta(&self, shard_id: &str) -> codec::TransportMeta {
        codec::TransportMeta {
            shard_id: shard_id.to_string(),
            partition_key: self.partition_key.clone(),
            sequence_number: self.sequence_number.clone(),
            server_timestamp: self.server_timestamp(),
        }
    }
}
