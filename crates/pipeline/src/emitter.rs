use crate::buffer::BufferSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("compressing batch: {0}")]
    Compress(#[source] std::io::Error),

    #[error("uploading object '{key}': {source}")]
    Upload {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("publishing pointer for '{key}': {source}")]
    Publish {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Pushes a buffer snapshot to a durable sink.
///
/// `emit` returns the records which failed (empty on success); an `Err`
/// means the entire batch failed. Emitters must be idempotent at the
/// destination, because the retry loop re-emits the whole buffer.
#[async_trait::async_trait]
pub trait Emitter<T>: Send {
    async fn emit(&mut self, batch: &BufferSnapshot<'_, T>) -> Result<Vec<T>, EmitError>;

    /// Terminal notification: these records exhausted their retries and
    /// will not be emitted.
    async fn fail(&mut self, records: Vec<T>);

    /// Release held resources.
    async fn shutdown(&mut self);
}
