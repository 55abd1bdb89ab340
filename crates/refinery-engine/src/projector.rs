//! Maintains hot "served" views (latest price, curve snapshot) and
//! propagates invalidations, reconciling the cache against the analytical
//! store on a periodic sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use refinery_core::{
    Bar, BuiltCurve, CurveSnapshotEntry, Horizon, InstrumentId, LatestPriceEntry, SourceId,
    TenantId,
};
use refinery_traits::{EventEnvelope, EventProducer, HotCache, ServedStore};

use crate::error::PipelineError;
use crate::streaming::StreamProducer;

fn latest_price_cache_key(tenant_id: &TenantId, instrument_id: &InstrumentId) -> String {
    format!("served:latest_price:{}:{}", tenant_id.as_str(), instrument_id.as_str())
}

fn curve_snapshot_cache_key(tenant_id: &TenantId, instrument_id: &InstrumentId, horizon: &Horizon) -> String {
    format!(
        "served:curve_snapshot:{}:{}:{}",
        tenant_id.as_str(),
        instrument_id.as_str(),
        horizon.as_str()
    )
}

/// Maintains the served latest-price and curve-snapshot projections.
pub struct Projector {
    store: Arc<dyn ServedStore>,
    cache: Arc<dyn HotCache>,
    cache_ttl: Duration,
    latest_price_producer: StreamProducer<LatestPriceEntry>,
}

impl Projector {
    /// Builds a projector over the given served store and hot cache, emitting
    /// accepted latest-price updates to `latest_price_producer`
    /// (`served.market.latest_prices.v1`).
    pub fn new(
        store: Arc<dyn ServedStore>,
        cache: Arc<dyn HotCache>,
        cache_ttl: Duration,
        latest_price_producer: StreamProducer<LatestPriceEntry>,
    ) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
            latest_price_producer,
        }
    }

    /// Derives a candidate latest price from a closed bar and applies it
    /// under the monotonic write rule: accepted iff newer than what is
    /// currently served, or nothing is currently served.
    pub async fn on_bar(&self, tenant_id: &TenantId, source: &SourceId, bar: &Bar) -> Result<bool, PipelineError> {
        let candidate = LatestPriceEntry {
            tenant_id: tenant_id.clone(),
            instrument_id: bar.key.instrument_id.clone(),
            price: bar.close,
            volume: bar.volume,
            event_time: bar.close_time,
            source: source.clone(),
            quality_flags: Default::default(),
            snapshot_at: Utc::now(),
        };

        let accepted = self
            .store
            .record_latest_price(&candidate)
            .await
            .map_err(PipelineError::Dependency)?;

        if accepted {
            let key = latest_price_cache_key(tenant_id, &bar.key.instrument_id);
            let bytes = serde_json::to_vec(&candidate).map_err(|e| PipelineError::Internal(e.to_string()))?;
            self.cache
                .set(&key, bytes, self.cache_ttl)
                .await
                .map_err(PipelineError::Dependency)?;

            let envelope = EventEnvelope::new("projector", tenant_id.clone(), bar.key.instrument_id.as_str(), candidate);
            if let Err(e) = self.latest_price_producer.publish(envelope).await {
                // A tick already folded and persisted must not be retried just
                // because nothing is subscribed to the served topic yet.
                tracing::warn!(error = %e, "failed to publish served.market.latest_prices.v1");
            }
        }

        Ok(accepted)
    }

    /// Applies a curve update under the same monotonic discipline, keyed by
    /// `(tenant, instrument, horizon)` and ordered by `snapshot_at`.
    pub async fn on_curve_update(
        &self,
        tenant_id: &TenantId,
        instrument_id: &InstrumentId,
        horizon: &Horizon,
        curve: BuiltCurve,
    ) -> Result<bool, PipelineError> {
        let candidate = CurveSnapshotEntry {
            tenant_id: tenant_id.clone(),
            instrument_id: instrument_id.clone(),
            horizon: horizon.clone(),
            interpolation_method: curve.interpolation_method.clone(),
            curve,
            snapshot_at: Utc::now(),
        };

        let accepted = self
            .store
            .record_curve_snapshot(&candidate)
            .await
            .map_err(PipelineError::Dependency)?;

        if accepted {
            let key = curve_snapshot_cache_key(tenant_id, instrument_id, horizon);
            let bytes = serde_json::to_vec(&candidate).map_err(|e| PipelineError::Internal(e.to_string()))?;
            self.cache
                .set(&key, bytes, self.cache_ttl)
                .await
                .map_err(PipelineError::Dependency)?;
        }

        Ok(accepted)
    }

    /// Removes the cached latest-price entry for an instrument. Invalidation
    /// is at-least-once and idempotent: repeating it is always safe, since the
    /// next read simply falls through and repopulates from the analytical store.
    pub async fn on_invalidate(&self, tenant_id: &TenantId, instrument_id: &InstrumentId) -> Result<(), PipelineError> {
        let key = latest_price_cache_key(tenant_id, instrument_id);
        self.cache.remove(&key).await.map_err(PipelineError::Dependency)
    }

    /// Reads the latest price, falling back to the analytical store and
    /// repopulating the cache on a miss.
    pub async fn get_latest_price(
        &self,
        tenant_id: &TenantId,
        instrument_id: &InstrumentId,
    ) -> Result<Option<LatestPriceEntry>, PipelineError> {
        let key = latest_price_cache_key(tenant_id, instrument_id);
        if let Some(bytes) = self.cache.get(&key).await.map_err(PipelineError::Dependency)? {
            let entry: LatestPriceEntry =
                serde_json::from_slice(&bytes).map_err(|e| PipelineError::Internal(e.to_string()))?;
            return Ok(Some(entry));
        }

        let entry = self
            .store
            .get_latest_price(tenant_id, instrument_id)
            .await
            .map_err(PipelineError::Dependency)?;

        if let Some(ref entry) = entry {
            let bytes = serde_json::to_vec(entry).map_err(|e| PipelineError::Internal(e.to_string()))?;
            self.cache
                .set(&key, bytes, self.cache_ttl)
                .await
                .map_err(PipelineError::Dependency)?;
        }

        Ok(entry)
    }
}

/// One repaired drift found by the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct DriftRepair {
    /// Tenant the repaired key belongs to.
    pub tenant_id: TenantId,
    /// Instrument the repaired key belongs to.
    pub instrument_id: InstrumentId,
}

/// Scans a sampled set of `(tenant, instrument)` keys, comparing the cached
/// latest price with the analytical store's and repairing the cache whenever
/// it is missing or stale relative to the store — the store is the source of
/// truth, the cache is eventually consistent with bounded staleness.
pub async fn reconcile_sample(
    projector: &Projector,
    keys: &[(TenantId, InstrumentId)],
) -> Result<Vec<DriftRepair>, PipelineError> {
    let mut repairs = Vec::new();
    for (tenant_id, instrument_id) in keys {
        let authoritative = projector
            .store
            .get_latest_price(tenant_id, instrument_id)
            .await
            .map_err(PipelineError::Dependency)?;
        let Some(authoritative) = authoritative else {
            continue;
        };

        let cache_key = latest_price_cache_key(tenant_id, instrument_id);
        let cached = projector.cache.get(&cache_key).await.map_err(PipelineError::Dependency)?;
        let drifted = match &cached {
            None => true,
            Some(bytes) => serde_json::from_slice::<LatestPriceEntry>(bytes)
                .map(|cached_entry| cached_entry.event_time < authoritative.event_time)
                .unwrap_or(true),
        };

        if drifted {
            let bytes = serde_json::to_vec(&authoritative).map_err(|e| PipelineError::Internal(e.to_string()))?;
            projector
                .cache
                .set(&cache_key, bytes, projector.cache_ttl)
                .await
                .map_err(PipelineError::Dependency)?;
            repairs.push(DriftRepair {
                tenant_id: tenant_id.clone(),
                instrument_id: instrument_id.clone(),
            });
        }
    }
    Ok(repairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use refinery_core::WindowKey;
    use refinery_storage::{InMemoryHotCache, InMemoryServedStore};
    use refinery_traits::EventConsumer;
    use rust_decimal_macros::dec;

    fn sample_bar(close: i64, close_time_secs: u32) -> Bar {
        Bar {
            key: WindowKey {
                tenant_id: TenantId::new("t1"),
                instrument_id: InstrumentId::new("NG"),
                interval: refinery_core::Interval::ONE_MINUTE,
                window_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            },
            open: rust_decimal::Decimal::from(close),
            high: rust_decimal::Decimal::from(close),
            low: rust_decimal::Decimal::from(close),
            close: rust_decimal::Decimal::from(close),
            volume: dec!(1000),
            trade_count: 1,
            open_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, close_time_secs).unwrap(),
            close_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, close_time_secs).unwrap(),
            revision: 1,
        }
    }

    fn projector() -> Projector {
        let (projector, _topic) = projector_with_topic();
        projector
    }

    fn projector_with_topic() -> (Projector, crate::streaming::Topic<LatestPriceEntry>) {
        let store: Arc<dyn ServedStore> = Arc::new(InMemoryServedStore::default());
        let cache: Arc<dyn HotCache> = Arc::new(InMemoryHotCache::default());
        let topic: crate::streaming::Topic<LatestPriceEntry> = crate::streaming::Topic::new("served.market.latest_prices.v1", 64);
        let projector = Projector::new(store, cache, Duration::from_secs(60), topic.producer());
        (projector, topic)
    }

    #[tokio::test]
    async fn accepted_bar_emits_served_latest_price() {
        let (p, topic) = projector_with_topic();
        let mut consumer = topic.consumer();

        p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(120, 0)).await.unwrap();

        let batch = consumer.poll(1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload.price, dec!(120));
        assert_eq!(batch[0].key, "NG");
    }

    #[tokio::test]
    async fn stale_bar_does_not_emit() {
        let (p, topic) = projector_with_topic();
        let _consumer = topic.consumer();

        p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(120, 30)).await.unwrap();
        assert_eq!(topic.published_count(), 1);

        let accepted = p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(999, 10)).await.unwrap();
        assert!(!accepted);
        assert_eq!(topic.published_count(), 1);
    }

    #[tokio::test]
    async fn on_bar_populates_cache_and_store() {
        let p = projector();
        let accepted = p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(120, 0)).await.unwrap();
        assert!(accepted);

        let entry = p.get_latest_price(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap().unwrap();
        assert_eq!(entry.price, dec!(120));
    }

    #[tokio::test]
    async fn monotonic_rule_rejects_stale_bar() {
        let p = projector();
        p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(120, 30)).await.unwrap();
        let accepted = p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(999, 10)).await.unwrap();
        assert!(!accepted);

        let entry = p.get_latest_price(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap().unwrap();
        assert_eq!(entry.price, dec!(120));
    }

    #[tokio::test]
    async fn invalidate_then_read_falls_through_and_repopulates() {
        let p = projector();
        p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(120, 0)).await.unwrap();
        p.on_invalidate(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap();

        let entry = p.get_latest_price(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap();
        assert!(entry.is_some());
        assert_eq!(entry.unwrap().price, dec!(120));
    }

    #[tokio::test]
    async fn repeated_invalidation_is_idempotent() {
        let p = projector();
        p.on_bar(&TenantId::new("t1"), &SourceId::new("s1"), &sample_bar(120, 0)).await.unwrap();
        p.on_invalidate(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap();
        p.on_invalidate(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap();

        let entry = p.get_latest_price(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap();
        assert_eq!(entry.unwrap().price, dec!(120));
    }

    #[tokio::test]
    async fn reconcile_repairs_missing_cache_entry() {
        let p = projector();
        let bar = sample_bar(120, 0);
        p.store.record_latest_price(&LatestPriceEntry {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new("NG"),
            price: bar.close,
            volume: bar.volume,
            event_time: bar.close_time,
            source: SourceId::new("s1"),
            quality_flags: Default::default(),
            snapshot_at: Utc::now(),
        }).await.unwrap();

        let repairs = reconcile_sample(&p, &[(TenantId::new("t1"), InstrumentId::new("NG"))]).await.unwrap();
        assert_eq!(repairs.len(), 1);

        let entry = p.get_latest_price(&TenantId::new("t1"), &InstrumentId::new("NG")).await.unwrap().unwrap();
        assert_eq!(entry.price, dec!(120));
    }

    proptest! {
        /// Projection monotonicity (§8): for any sequence of bar events for one
        /// key, the served latest price's `event_time` never moves backward,
        /// regardless of the order close times arrive in.
        #[test]
        fn served_event_time_is_non_decreasing_across_any_bar_sequence(
            close_times_secs in prop::collection::vec(0u32..60u32, 1..30),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let p = projector();
                let tenant_id = TenantId::new("t1");
                let instrument_id = InstrumentId::new("NG");
                let source = SourceId::new("s1");

                let mut last_seen = None;
                for (i, secs) in close_times_secs.iter().enumerate() {
                    p.on_bar(&tenant_id, &source, &sample_bar(100 + i as i64, *secs)).await.unwrap();

                    let entry = p.get_latest_price(&tenant_id, &instrument_id).await.unwrap().unwrap();
                    if let Some(previous) = last_seen {
                        prop_assert!(entry.event_time >= previous);
                    }
                    last_seen = Some(entry.event_time);
                }

                let expected_max = close_times_secs
                    .iter()
                    .map(|secs| Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, *secs).unwrap())
                    .max()
                    .unwrap();
                prop_assert_eq!(last_seen.unwrap(), expected_max);
                Ok(())
            })?;
        }
    }
}
