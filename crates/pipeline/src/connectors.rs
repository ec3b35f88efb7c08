//! Traits for the external collaborators of the pipeline. Concrete
//! implementations (the object-store client, the stream transport, the
//! checkpoint coordinator) live with the deployment, not here.

use bytes::Bytes;

/// Durable object storage. A `put` replaces any existing object at the
/// same key, which is what makes emit retries idempotent.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> anyhow::Result<()>;
}

/// A partitioned, ordered stream accepting single-record publishes.
#[async_trait::async_trait]
pub trait StreamPublisher: Send + Sync {
    async fn publish(&self, stream: &str, partition_key: &str, data: Bytes) -> anyhow::Result<()>;
}

/// The per-shard checkpoint store owned by the stream coordinator.
/// Checkpoints advance monotonically within a shard.
#[async_trait::async_trait]
pub trait Checkpointer: Send {
    async fn checkpoint(&mut self, sequence_number: &str) -> anyhow::Result<()>;
}
