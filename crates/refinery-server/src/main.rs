//! Refinery pipeline entry point: wires the four workers to in-memory (or
//! redb-backed) storage and serves the health/metrics surface.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusBuilder;

use refinery_core::{CurveUpdateRequest, Interval, InvalidateRequest, LatestPriceEntry, ReferenceRecord, TaxonomyRule};
use refinery_engine::{
    refresh_shared_cache, reconcile_sample, Aggregator, Enricher, GracefulShutdown,
    InMemoryDeadLetterSink, IntervalScheduler, JsonVenueParser, Normalizer, Projector, RawEvent,
    TaxonomyClassifier, Topic, ValidationBounds,
};
use refinery_server::{AppState, PipelineHandle, Server, ServerConfig};
use refinery_storage::{in_memory_analytical_store, InMemoryHotCache, InMemoryReferenceStore, RedbHotCache};
use refinery_traits::config::WorkerConfig;
use refinery_traits::{EventConsumer, HotCache, ReferenceStore};

const TOPIC_CAPACITY: usize = 10_000;

fn seed_reference_data() -> InMemoryReferenceStore {
    InMemoryReferenceStore::new()
}

async fn seed_taxonomy(reference: &InMemoryReferenceStore) {
    let _ = reference
        .put(ReferenceRecord {
            instrument_id: refinery_core::InstrumentId::new("NG"),
            commodity: "natural_gas".to_string(),
            region: "north_america".to_string(),
            product_tier: "futures".to_string(),
            unit: "mmbtu".to_string(),
            contract_size: rust_decimal::Decimal::from(10_000),
            tick_size: rust_decimal::Decimal::new(1, 3),
            updated_at: chrono::Utc::now(),
        })
        .await;
}

fn taxonomy_rules() -> Vec<TaxonomyRule> {
    vec![TaxonomyRule {
        pattern: "NG".to_string(),
        commodity: "natural_gas".to_string(),
        region: "north_america".to_string(),
        product_tier: "futures".to_string(),
        priority: 10,
        weight: 0.9,
    }]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,refinery=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("refinery-server v{}", env!("CARGO_PKG_VERSION"));

    let server_config = ServerConfig::from_env();

    let store = in_memory_analytical_store();
    let cache: Arc<dyn HotCache> = match &server_config.cache_path {
        Some(path) => Arc::new(RedbHotCache::open(path)?),
        None => Arc::new(InMemoryHotCache::default()),
    };
    let reference_impl = seed_reference_data();
    seed_taxonomy(&reference_impl).await;
    let reference: Arc<dyn ReferenceStore> = Arc::new(reference_impl);

    let normalizer_config = WorkerConfig::named("normalizer");
    normalizer_config.validate()?;
    let enricher_config = WorkerConfig::named("enricher");
    enricher_config.validate()?;
    let aggregator_config = WorkerConfig::named("aggregator");
    aggregator_config.validate()?;
    let projector_config = WorkerConfig::named("projector");
    projector_config.validate()?;

    let mut normalizer = Normalizer::new(ValidationBounds::default(), 10_000);
    normalizer.register(Box::new(JsonVenueParser::new("nymex")));

    let enricher = Enricher::new(
        TaxonomyClassifier::new(taxonomy_rules()),
        reference.clone(),
        cache.clone(),
        enricher_config.cache.local_capacity,
        Duration::from_millis(enricher_config.cache.local_ttl_ms),
        Duration::from_millis(enricher_config.cache.shared_ttl_ms),
        Duration::from_millis(enricher_config.cache.negative_ttl_ms),
    );

    let intervals: Vec<Interval> = aggregator_config
        .window
        .intervals
        .iter()
        .map(|raw| Interval::parse(raw))
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!(e))?;
    let aggregator = Aggregator::new(
        intervals,
        aggregator_config.window.max_out_of_order_ms,
        aggregator_config.window.late_lookback_ms,
        aggregator_config.window.grace_ms,
    );

    let latest_prices: Topic<LatestPriceEntry> = Topic::new("served.market.latest_prices.v1", TOPIC_CAPACITY);
    let projector = Projector::new(
        store.served.clone(),
        cache.clone(),
        Duration::from_millis(projector_config.projection.ttl_ms),
        latest_prices.producer(),
    );

    let dlq = Arc::new(InMemoryDeadLetterSink::default());

    let pipeline = Arc::new(PipelineHandle::new(
        normalizer,
        enricher,
        aggregator,
        projector,
        store.ticks.clone(),
        store.bars.clone(),
        store.curves.clone(),
        dlq,
    ));

    // Ingress topics: the Normalizer's raw feed, the Aggregator's secondary
    // curve-update input, and the Projector's explicit invalidation input
    // (§6). Each has a consumer loop driving events into the assembled
    // pipeline; the matching producer handle is where an external feed
    // adapter (a Kafka bridge, a backfill job) would attach.
    let raw_events: Topic<RawEvent> = Topic::new("ingestion.nymex.raw.v1", TOPIC_CAPACITY);
    let curve_updates: Topic<CurveUpdateRequest> = Topic::new("pricing.curve.updates.v1", TOPIC_CAPACITY);
    let invalidations: Topic<InvalidateRequest> = Topic::new("projection.invalidate.instrument.v1", TOPIC_CAPACITY);

    {
        let pipeline = pipeline.clone();
        let mut consumer = raw_events.consumer();
        tokio::spawn(async move {
            loop {
                match consumer.poll(64).await {
                    Ok(batch) => {
                        for envelope in batch {
                            if let Err(e) = pipeline.ingest(envelope.payload).await {
                                tracing::warn!(error = %e, "raw event ingest failed");
                            }
                        }
                        let _ = consumer.commit().await;
                    }
                    Err(e) => tracing::warn!(error = %e, "raw event consumer poll failed"),
                }
            }
        });
    }

    {
        let pipeline = pipeline.clone();
        let mut consumer = curve_updates.consumer();
        tokio::spawn(async move {
            loop {
                match consumer.poll(64).await {
                    Ok(batch) => {
                        for envelope in batch {
                            if let Err(e) = pipeline.ingest_curve_update(envelope.payload).await {
                                tracing::warn!(error = %e, "curve update ingest failed");
                            }
                        }
                        let _ = consumer.commit().await;
                    }
                    Err(e) => tracing::warn!(error = %e, "curve update consumer poll failed"),
                }
            }
        });
    }

    {
        let pipeline = pipeline.clone();
        let mut consumer = invalidations.consumer();
        tokio::spawn(async move {
            loop {
                match consumer.poll(64).await {
                    Ok(batch) => {
                        for envelope in batch {
                            if let Err(e) = pipeline.invalidate(envelope.payload).await {
                                tracing::warn!(error = %e, "invalidation ingest failed");
                            }
                        }
                        let _ = consumer.commit().await;
                    }
                    Err(e) => tracing::warn!(error = %e, "invalidation consumer poll failed"),
                }
            }
        });
    }

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let state = Arc::new(AppState {
        store: store.clone(),
        cache: cache.clone(),
        reference: reference.clone(),
        pipeline,
        prometheus,
    });

    let shutdown = Arc::new(GracefulShutdown::new(Duration::from_secs(30)));
    let scheduler = IntervalScheduler::new();

    {
        let reference = reference.clone();
        let cache = cache.clone();
        scheduler.spawn(
            "reference-cache-refresh",
            Duration::from_millis(enricher_config.reconcile.interval_ms),
            move || {
                let reference = reference.clone();
                let cache = cache.clone();
                async move {
                    if let Err(e) = refresh_shared_cache(&reference, &cache).await {
                        tracing::warn!(error = %e, "reference cache refresh failed");
                    }
                }
            },
        );
    }

    {
        let state = state.clone();
        let sample_rate = projector_config.reconcile.sample_rate;
        scheduler.spawn(
            "served-view-reconcile",
            Duration::from_millis(projector_config.reconcile.interval_ms),
            move || {
                let state = state.clone();
                async move {
                    let keys = state.pipeline.sample_recent_keys(sample_rate);
                    match reconcile_sample(state.pipeline.projector(), &keys).await {
                        Ok(repairs) if !repairs.is_empty() => {
                            tracing::warn!(count = repairs.len(), "reconciliation repaired drifted cache entries");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "reconciliation sweep failed"),
                    }
                }
            },
        );
    }

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown_signal.shutdown();
    });

    let server = Server::new(server_config, state);
    let mut shutdown_rx = shutdown.subscribe();
    tokio::select! {
        result = server.start() => result.map_err(anyhow::Error::from)?,
        _ = shutdown_rx.recv() => {
            scheduler.shutdown();
            shutdown.wait_for_completion().await;
        }
    }

    Ok(())
}
