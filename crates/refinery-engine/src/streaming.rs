//! In-memory event bus connecting the four workers.
//!
//! Each topic is a [`tokio::sync::broadcast`] channel wrapped in
//! [`EventProducer`]/[`EventConsumer`]. There is no durable offset: a
//! subscriber that falls behind the channel's capacity silently misses the
//! oldest messages, surfaced as [`TraitError::Transient`] on its next poll so
//! the caller can treat it like any other retryable gap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use refinery_traits::{DeadLetterSink, EventConsumer, EventEnvelope, EventProducer, TraitError};

/// A named broadcast topic. Cloning shares the same underlying channel.
pub struct Topic<T> {
    name: String,
    sender: broadcast::Sender<EventEnvelope<T>>,
    published: Arc<AtomicU64>,
}

impl<T: Clone + Send + Sync + 'static> Topic<T> {
    /// Creates a topic with the given channel capacity.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a producer handle bound to this topic.
    pub fn producer(&self) -> StreamProducer<T> {
        StreamProducer {
            name: self.name.clone(),
            sender: self.sender.clone(),
            published: self.published.clone(),
        }
    }

    /// Returns a fresh consumer subscribed from this point forward.
    pub fn consumer(&self) -> StreamConsumer<T> {
        StreamConsumer {
            name: self.name.clone(),
            receiver: self.sender.subscribe(),
            pending_commit: Vec::new(),
        }
    }

    /// Total messages ever published to this topic.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Current number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Producer side of a [`Topic`].
pub struct StreamProducer<T> {
    name: String,
    sender: broadcast::Sender<EventEnvelope<T>>,
    published: Arc<AtomicU64>,
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> EventProducer<T> for StreamProducer<T> {
    async fn publish(&self, envelope: EventEnvelope<T>) -> Result<(), TraitError> {
        if self.sender.receiver_count() == 0 {
            tracing::debug!(topic = %self.name, "publishing with no subscribers attached");
        }
        self.sender
            .send(envelope)
            .map_err(|_| TraitError::PublishFailed(format!("topic {} has no receivers", self.name)))?;
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer side of a [`Topic`]. Each instance tracks its own lag; there is
/// no shared commit point across consumers of the same topic.
pub struct StreamConsumer<T> {
    name: String,
    receiver: broadcast::Receiver<EventEnvelope<T>>,
    pending_commit: Vec<EventEnvelope<T>>,
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> EventConsumer<T> for StreamConsumer<T> {
    async fn poll(&mut self, max_records: usize) -> Result<Vec<EventEnvelope<T>>, TraitError> {
        let mut batch = Vec::with_capacity(max_records.min(64));
        while batch.len() < max_records {
            match self.receiver.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(TraitError::Transient(format!(
                        "consumer for topic {} lagged and skipped {} messages",
                        self.name, skipped
                    )));
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(TraitError::ConnectionFailed(format!(
                        "topic {} closed",
                        self.name
                    )));
                }
            }
        }
        if batch.is_empty() {
            // Block for at least one message so callers don't busy-poll an idle topic.
            match self.receiver.recv().await {
                Ok(envelope) => batch.push(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(TraitError::Transient(format!(
                        "consumer for topic {} lagged and skipped {} messages",
                        self.name, skipped
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TraitError::ConnectionFailed(format!(
                        "topic {} closed",
                        self.name
                    )));
                }
            }
        }
        self.pending_commit.extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn commit(&mut self) -> Result<(), TraitError> {
        self.pending_commit.clear();
        Ok(())
    }
}

/// In-memory dead-letter sink: retains entries per stage for inspection and
/// for the reconciliation sweep's quarantine reporting.
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

/// One quarantined message.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// Stage that gave up on this message (e.g. `"normalizer"`).
    pub stage: String,
    /// Original wire payload, preserved byte-for-byte.
    pub original_payload: Vec<u8>,
    /// Machine-readable error class.
    pub error_class: String,
    /// Opaque token correlating this entry to a traced error.
    pub traceback_token: String,
}

impl InMemoryDeadLetterSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all quarantined entries, most recent last.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    /// Number of quarantined entries for one stage.
    pub fn count_for_stage(&self, stage: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.stage == stage).count()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(
        &self,
        stage: &str,
        original_payload: Vec<u8>,
        error_class: &str,
        traceback_token: &str,
    ) -> Result<(), TraitError> {
        self.entries.lock().push(DeadLetterEntry {
            stage: stage.to_string(),
            original_payload,
            error_class: error_class.to_string(),
            traceback_token: traceback_token.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_core::TenantId;

    #[tokio::test]
    async fn publish_then_poll_delivers_in_order() {
        let topic: Topic<u32> = Topic::new("ticks.raw.v1", 16);
        let producer = topic.producer();
        let mut consumer = topic.consumer();

        for i in 0..3 {
            let envelope = EventEnvelope::new("normalizer", TenantId::new("acme"), "k", i);
            producer.publish(envelope).await.unwrap();
        }

        let batch = consumer.poll(10).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.payload).collect::<Vec<_>>(), vec![0, 1, 2]);
        consumer.commit().await.unwrap();
    }

    #[tokio::test]
    async fn lagged_consumer_reports_transient_error() {
        let topic: Topic<u32> = Topic::new("ticks.raw.v1", 2);
        let producer = topic.producer();
        let mut consumer = topic.consumer();

        for i in 0..5 {
            let envelope = EventEnvelope::new("normalizer", TenantId::new("acme"), "k", i);
            producer.publish(envelope).await.unwrap();
        }

        let result = consumer.poll(10).await;
        assert!(matches!(result, Err(TraitError::Transient(_))));
    }

    #[tokio::test]
    async fn dead_letter_sink_tracks_per_stage_counts() {
        let sink = InMemoryDeadLetterSink::new();
        sink.send("normalizer", b"bad".to_vec(), "schema_violation", "tok-1")
            .await
            .unwrap();
        assert_eq!(sink.count_for_stage("normalizer"), 1);
        assert_eq!(sink.count_for_stage("enricher"), 0);
    }
}
