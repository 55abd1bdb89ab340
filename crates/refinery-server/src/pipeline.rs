//! Drives one raw event through the four workers end to end, recording the
//! Prometheus counters and histograms named in the metrics surface.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use refinery_core::{Bar, CurveUpdateRequest, InstrumentId, InvalidateRequest, SourceId, TenantId};
use refinery_engine::aggregator::{persist_bar, persist_curve};
use refinery_engine::{
    Aggregator, CorrelationToken, Enricher, ErrorDisposition, FoldOutcome, NormalizeOutcome,
    Normalizer, PipelineError, Projector, RawEvent,
};
use refinery_traits::{BarStore, CurveStore, DeadLetterSink, TickStore};

const RECENT_KEYS_CAPACITY: usize = 1_000;

/// Bounded record of recently-seen `(tenant, instrument)` pairs, sampled by
/// the reconciliation sweep rather than scanning the whole analytical store.
struct RecentKeys {
    order: VecDeque<(TenantId, InstrumentId)>,
    seen: HashSet<(TenantId, InstrumentId)>,
}

impl RecentKeys {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(RECENT_KEYS_CAPACITY),
            seen: HashSet::with_capacity(RECENT_KEYS_CAPACITY),
        }
    }

    fn record(&mut self, key: (TenantId, InstrumentId)) {
        if self.seen.contains(&key) {
            return;
        }
        if self.order.len() >= RECENT_KEYS_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
    }

    fn sample(&self, rate: f64) -> Vec<(TenantId, InstrumentId)> {
        if self.order.is_empty() {
            return Vec::new();
        }
        let take = ((self.order.len() as f64) * rate).ceil().max(1.0) as usize;
        self.order.iter().take(take).cloned().collect()
    }
}

/// Bundles one instance of each worker and drives events through them in
/// sequence. The aggregator is the only stateful, serially-accessed stage;
/// it is guarded by a `tokio::sync::Mutex` rather than sharded, since folding
/// one tick is cheap and out-of-order access across ticks would violate the
/// watermark ordering the aggregator depends on.
pub struct PipelineHandle {
    normalizer: Normalizer,
    enricher: Enricher,
    aggregator: tokio::sync::Mutex<Aggregator>,
    projector: Projector,
    ticks: Arc<dyn TickStore>,
    bars: Arc<dyn BarStore>,
    curves: Arc<dyn CurveStore>,
    dlq: Arc<dyn DeadLetterSink>,
    open_windows: AtomicU64,
    recent_keys: Mutex<RecentKeys>,
}

impl PipelineHandle {
    /// Bundles already-constructed workers into one pipeline handle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        normalizer: Normalizer,
        enricher: Enricher,
        aggregator: Aggregator,
        projector: Projector,
        ticks: Arc<dyn TickStore>,
        bars: Arc<dyn BarStore>,
        curves: Arc<dyn CurveStore>,
        dlq: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            normalizer,
            enricher,
            aggregator: tokio::sync::Mutex::new(aggregator),
            projector,
            ticks,
            bars,
            curves,
            dlq,
            open_windows: AtomicU64::new(0),
            recent_keys: Mutex::new(RecentKeys::new()),
        }
    }

    /// Number of windows currently open, for the `refinery_open_windows` gauge.
    pub fn open_window_count(&self) -> u64 {
        self.open_windows.load(Ordering::Relaxed)
    }

    /// Projector handle, exposed so a background task can run the
    /// reconciliation sweep against it.
    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Samples a fraction of recently-seen `(tenant, instrument)` keys for
    /// the periodic reconciliation sweep.
    pub fn sample_recent_keys(&self, rate: f64) -> Vec<(TenantId, InstrumentId)> {
        self.recent_keys.lock().sample(rate)
    }

    /// Runs one raw event through normalize -> enrich -> aggregate -> project,
    /// recording per-stage metrics and routing DLQ-classified failures.
    pub async fn ingest(&self, raw: RawEvent) -> Result<(), PipelineError> {
        let start = Instant::now();
        let result = self.process(&raw).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("refinery_stage_latency_ms", "stage" => "pipeline").record(elapsed_ms);

        match &result {
            Ok(()) => {
                metrics::counter!("refinery_processed_total", "stage" => "pipeline").increment(1);
            }
            Err(e) => match e.classify() {
                ErrorDisposition::Dlq => {
                    metrics::counter!("refinery_dlq_total", "stage" => "pipeline").increment(1);
                    let token = CorrelationToken::from_identity(&[raw.venue.as_str()]);
                    let _ = self
                        .dlq
                        .send("pipeline", raw.payload.clone(), e.error_class(), token.as_str())
                        .await;
                }
                ErrorDisposition::Retry | ErrorDisposition::Fatal => {
                    metrics::counter!("refinery_failed_total", "stage" => "pipeline").increment(1);
                }
            },
        }

        metrics::gauge!("refinery_open_windows").set(self.open_window_count() as f64);
        result
    }

    /// Runs one curve-update event through the aggregator's curve builder and
    /// the projector's curve-snapshot projection, recording the same per-stage
    /// metrics as [`PipelineHandle::ingest`].
    pub async fn ingest_curve_update(&self, request: CurveUpdateRequest) -> Result<(), PipelineError> {
        let start = Instant::now();
        let result = self.process_curve_update(&request).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("refinery_stage_latency_ms", "stage" => "curve_update").record(elapsed_ms);

        match &result {
            Ok(()) => {
                metrics::counter!("refinery_processed_total", "stage" => "curve_update").increment(1);
            }
            Err(_) => {
                metrics::counter!("refinery_failed_total", "stage" => "curve_update").increment(1);
            }
        }

        result
    }

    async fn process_curve_update(&self, request: &CurveUpdateRequest) -> Result<(), PipelineError> {
        let built = {
            let mut aggregator = self.aggregator.lock().await;
            aggregator.on_curve_update(&request.update)
        };
        persist_curve(&self.curves, &request.update, &built).await?;
        self.projector
            .on_curve_update(&request.tenant_id, &request.instrument_id, &request.horizon, built)
            .await?;
        Ok(())
    }

    /// Drops the cached latest-price entry for one instrument, in response to
    /// a `projection.invalidate.instrument.v1` event.
    pub async fn invalidate(&self, request: InvalidateRequest) -> Result<(), PipelineError> {
        let result = self.projector.on_invalidate(&request.tenant_id, &request.instrument_id).await;
        match &result {
            Ok(()) => {
                metrics::counter!("refinery_processed_total", "stage" => "invalidate").increment(1);
            }
            Err(_) => {
                metrics::counter!("refinery_failed_total", "stage" => "invalidate").increment(1);
            }
        }
        result
    }

    async fn process(&self, raw: &RawEvent) -> Result<(), PipelineError> {
        let tick = match self.normalizer.normalize(raw)? {
            NormalizeOutcome::Accepted(tick) => tick,
            NormalizeOutcome::Duplicate => return Ok(()),
        };
        self.ticks.append_silver(&tick).await.map_err(PipelineError::Dependency)?;

        let enriched = self.enricher.enrich(tick).await?;
        self.ticks
            .append_enriched(&enriched)
            .await
            .map_err(PipelineError::Dependency)?;

        let tenant_id: TenantId = enriched.tick.tenant_id.clone();
        let source: SourceId = enriched.tick.source_id.clone();
        self.recent_keys
            .lock()
            .record((tenant_id.clone(), enriched.tick.instrument_id.clone()));

        let tick_result = {
            let mut aggregator = self.aggregator.lock().await;
            let result = aggregator.on_tick(&enriched);
            self.open_windows
                .store(aggregator.open_window_count() as u64, Ordering::Relaxed);
            result
        };

        let revised: Vec<Bar> = tick_result
            .folds
            .into_iter()
            .filter_map(|(_, outcome)| match outcome {
                FoldOutcome::Revised(bar) => Some(bar),
                FoldOutcome::Folded | FoldOutcome::TooLateToFold => None,
            })
            .collect();

        for bar in tick_result.closed.iter().chain(revised.iter()) {
            persist_bar(&self.bars, bar).await?;
            self.projector.on_bar(&tenant_id, &source, bar).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_core::{CurveId, CurvePoint, CurveUpdate, Horizon, Interval};
    use refinery_engine::{InMemoryDeadLetterSink, JsonVenueParser, TaxonomyClassifier, Topic, ValidationBounds};
    use refinery_storage::{in_memory_analytical_store, InMemoryHotCache, InMemoryReferenceStore};
    use refinery_traits::{HotCache, ReferenceStore, ServedStore};
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    fn test_pipeline() -> (PipelineHandle, Arc<dyn ServedStore>) {
        let store = in_memory_analytical_store();
        let cache: Arc<dyn HotCache> = Arc::new(InMemoryHotCache::default());
        let reference: Arc<dyn ReferenceStore> = Arc::new(InMemoryReferenceStore::new());

        let mut normalizer = Normalizer::new(ValidationBounds::default(), 1_000);
        normalizer.register(Box::new(JsonVenueParser::new("nymex")));

        let enricher = Enricher::new(
            TaxonomyClassifier::new(vec![]),
            reference,
            cache.clone(),
            100,
            StdDuration::from_secs(30),
            StdDuration::from_secs(300),
            StdDuration::from_secs(60),
        );

        let aggregator = Aggregator::new(vec![Interval::ONE_MINUTE], 0, 60_000, 0);
        let latest_prices = Topic::new("served.market.latest_prices.v1", 64);
        let projector = Projector::new(store.served.clone(), cache, StdDuration::from_secs(30), latest_prices.producer());

        let pipeline = PipelineHandle::new(
            normalizer,
            enricher,
            aggregator,
            projector,
            store.ticks.clone(),
            store.bars.clone(),
            store.curves.clone(),
            Arc::new(InMemoryDeadLetterSink::default()),
        );

        (pipeline, store.served.clone())
    }

    fn sample_curve_update() -> CurveUpdateRequest {
        CurveUpdateRequest {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new("NG"),
            horizon: Horizon::new("1M"),
            update: CurveUpdate {
                curve_id: CurveId::new("NG.FWD"),
                as_of_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                points: vec![CurvePoint {
                    curve_id: CurveId::new("NG.FWD"),
                    as_of_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    tenor: "T0".to_string(),
                    tenor_ordinal: 0,
                    price: dec!(100),
                }],
            },
        }
    }

    #[tokio::test]
    async fn curve_update_ingress_reaches_served_snapshot() {
        let (pipeline, served) = test_pipeline();
        pipeline.ingest_curve_update(sample_curve_update()).await.unwrap();

        let snapshot = served
            .get_curve_snapshot(&TenantId::new("t1"), &InstrumentId::new("NG"), &Horizon::new("1M"))
            .await
            .unwrap();
        assert!(snapshot.is_some());
        assert_eq!(snapshot.unwrap().curve.points.get(&0), Some(&dec!(100)));
    }

    fn raw_tick(event_time: &str, price: &str) -> RawEvent {
        RawEvent {
            venue: refinery_core::Venue::new("nymex"),
            payload: format!(
                r#"{{"tenant_id":"t1","instrument_id":"NG","event_time":"{}","price":{},"volume":1,"source_id":"s1"}}"#,
                event_time, price
            )
            .into_bytes(),
            ingest_metadata: std::collections::HashMap::new(),
        }
    }

    #[tokio::test]
    async fn invalidate_ingress_clears_cached_latest_price() {
        let (pipeline, served) = test_pipeline();

        // Two ticks a minute apart so the first window closes and a bar is
        // folded into the served latest-price projection.
        pipeline.ingest(raw_tick("2025-01-01T00:00:05Z", "100")).await.unwrap();
        pipeline.ingest(raw_tick("2025-01-01T00:01:05Z", "110")).await.unwrap();

        let authoritative = served
            .get_latest_price(&TenantId::new("t1"), &InstrumentId::new("NG"))
            .await
            .unwrap();
        assert!(authoritative.is_some());

        let request = InvalidateRequest {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new("NG"),
        };
        pipeline.invalidate(request).await.unwrap();
    }
}
