use crate::archive::ArchivalEmitter;
use crate::buffer::BufferSnapshot;
use crate::connectors::StreamPublisher;
use crate::emitter::{EmitError, Emitter};
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pointer to a previously written archival object, published to the
/// downstream file stream and consumed by the warehouse loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPointerEvent {
    pub filename: String,
}

impl ObjectPointerEvent {
    /// Parse a pointer record. Returns None for malformed JSON or a
    /// filename which is empty after trimming.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed: Self = serde_json::from_slice(raw).ok()?;
        let filename = parsed.filename.trim();
        if filename.is_empty() {
            return None;
        }
        Some(Self {
            filename: filename.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Composition over [`ArchivalEmitter`]: after a successful archival
/// upload, publish a pointer to the written object onto the downstream
/// stream. The pointer uses a random partition key, deliberately
/// spreading the warehouse load across that stream's shards.
///
/// A publish failure fails the whole batch. The subsequent retry
/// re-uploads the archival object to the same sequence-derived key, so
/// the object store converges on identical content.
pub struct PointerPublishingEmitter {
    inner: ArchivalEmitter,
    publisher: Arc<dyn StreamPublisher>,
    stream: String,
}

impl PointerPublishingEmitter {
    pub fn new(
        inner: ArchivalEmitter,
        publisher: Arc<dyn StreamPublisher>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            publisher,
            stream: stream.into(),
        }
    }
}

#[async_trait::async_trait]
impl Emitter<Bytes> for PointerPublishingEmitter {
    async fn emit(&mut self, batch: &BufferSnapshot<'_, Bytes>) -> Result<Vec<Bytes>, EmitError> {
        if batch.records.is_empty() {
            return Ok(Vec::new());
        }

        let failed = self.inner.emit(batch).await?;
        if !failed.is_empty() {
            return Ok(failed);
        }

        let key = self.inner.object_key(batch);
        let pointer = ObjectPointerEvent {
            filename: key.clone(),
        };
        let data = pointer
            .to_bytes()
            .map_err(|err| EmitError::Other(err.into()))?;

        let partition_key: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();

        match self
            .publisher
            .publish(&self.stream, &partition_key, data)
            .await
        {
            Ok(()) => {
                tracing::debug!(stream = %self.stream, %key, "published object pointer");
                Ok(Vec::new())
            }
            Err(source) => Err(EmitError::Publish { key, source }),
        }
    }

    async fn fail(&mut self, records: Vec<Bytes>) {
        self.inner.fail(records).await;
    }

    async fn shutdown(&mut self) {
        self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_trims_pointers() {
        let pointer = ObjectPointerEvent::parse(br#"{"filename":"  events/2017/10/24/18/S1-S2.gzip "}"#);
        assert_eq!(
            pointer,
            Some(ObjectPointerEvent {
                filename: "events/2017/10/24/18/S1-S2.gzip".to_string()
            })
        );

        assert_eq!(ObjectPointerEvent::parse(br#"{"filename":"   "}"#), None);
        assert_eq!(ObjectPointerEvent::parse(b"not json"), None);
    }
}
