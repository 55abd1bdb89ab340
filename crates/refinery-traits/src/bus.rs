//! Event-bus consumer/producer capability traits.
//!
//! Every event bus topic envelope carries `event_id`, `event_time`,
//! `tenant_id`, `source`, and `schema_version` regardless of payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use refinery_core::TenantId;

use crate::error::TraitError;

mod uuid_like {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// A process-unique event identifier. Not a full UUID implementation —
    /// callers supply their own generation strategy (random, sequence, hash).
    #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
    pub struct EventId(pub String);

    impl fmt::Display for EventId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
}

pub use uuid_like::EventId;

/// Envelope wrapping every message on every topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier.
    pub event_id: EventId,
    /// Time the event was produced.
    pub event_time: DateTime<Utc>,
    /// Logical data owner.
    pub tenant_id: TenantId,
    /// Producing component (e.g. `"normalizer"`).
    pub source: String,
    /// Schema version of `payload`.
    pub schema_version: u32,
    /// Routing key: messages sharing a key are pinned to the same partition.
    pub key: String,
    /// Topic-specific payload.
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Wraps a payload with the given routing key, stamping `event_time` to now.
    pub fn new(source: impl Into<String>, tenant_id: TenantId, key: impl Into<String>, payload: T) -> Self {
        let source = source.into();
        let event_id = EventId(format!("{}-{}-{}", source, key_hash(&tenant_id), Utc::now().timestamp_nanos_opt().unwrap_or_default()));
        Self {
            event_id,
            event_time: Utc::now(),
            tenant_id,
            source,
            schema_version: 1,
            key: key.into(),
            payload,
        }
    }
}

fn key_hash(tenant_id: &TenantId) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    tenant_id.hash(&mut hasher);
    hasher.finish()
}

/// A handle to one polled batch plus the means to acknowledge it.
///
/// Offset commit policy: the caller must only call [`EventConsumer::commit`]
/// after the processor succeeded AND any produced outbound messages were
/// acknowledged AND the analytical writer accepted the record into its batch.
#[async_trait]
pub trait EventConsumer<T>: Send + Sync
where
    T: Send + Sync,
{
    /// Polls up to `max_records` messages without advancing the commit point.
    async fn poll(&mut self, max_records: usize) -> Result<Vec<EventEnvelope<T>>, TraitError>;

    /// Commits progress up through the most recently polled batch.
    async fn commit(&mut self) -> Result<(), TraitError>;
}

/// A batched, acknowledged producer for an outbound topic.
#[async_trait]
pub trait EventProducer<T>: Send + Sync
where
    T: Send + Sync,
{
    /// Publishes one event, resolving only once the bus has acknowledged it.
    async fn publish(&self, envelope: EventEnvelope<T>) -> Result<(), TraitError>;
}

/// Sink for the poison-message path: after `retry.max_attempts` in-place
/// retries, the original payload is written here with its error class and a
/// traceback token, then the offset is committed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Writes one failed message to `processing.deadletter.<stage>.v1`.
    async fn send(
        &self,
        stage: &str,
        original_payload: Vec<u8>,
        error_class: &str,
        traceback_token: &str,
    ) -> Result<(), TraitError>;
}
