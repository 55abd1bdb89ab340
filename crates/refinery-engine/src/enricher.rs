//! Attaches taxonomy classification and reference metadata to normalized ticks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use refinery_core::{EnrichedTick, InstrumentId, ReferenceRecord, TaxonomyRule, Tick, UNKNOWN_TIER};
use refinery_traits::{HotCache, ReferenceStore, TraitError};

use crate::error::PipelineError;

/// Process-local LRU cache of reference records, checked before the shared
/// cache. Eviction is capacity-driven (oldest insertion first), not LRU by
/// access recency — adequate for a cache this small and this short-lived.
struct LocalCache {
    capacity: usize,
    ttl: Duration,
    order: VecDeque<InstrumentId>,
    entries: HashMap<InstrumentId, (ReferenceRecord, Instant)>,
}

impl LocalCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&mut self, instrument_id: &InstrumentId) -> Option<ReferenceRecord> {
        match self.entries.get(instrument_id) {
            Some((record, inserted_at)) if inserted_at.elapsed() < self.ttl => Some(record.clone()),
            Some(_) => {
                self.entries.remove(instrument_id);
                None
            }
            None => None,
        }
    }

    fn put(&mut self, instrument_id: InstrumentId, record: ReferenceRecord) {
        if !self.entries.contains_key(&instrument_id) && self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(instrument_id.clone());
        self.entries.insert(instrument_id, (record, Instant::now()));
    }
}

fn reference_cache_key(instrument_id: &InstrumentId) -> String {
    format!("reference:{}", instrument_id.as_str())
}

fn negative_cache_key(instrument_id: &InstrumentId) -> String {
    format!("reference:negative:{}", instrument_id.as_str())
}

/// Matches an instrument id against a rule set, producing tiers and a
/// confidence per §4.3's classification discipline: first match wins per
/// dimension by priority, ties break on the lexicographically smallest tag.
pub struct TaxonomyClassifier {
    rules: Vec<TaxonomyRule>,
}

struct DimensionMatch {
    tag: String,
    weight: f64,
}

impl TaxonomyClassifier {
    /// Builds a classifier from an explicit rule set.
    pub fn new(rules: Vec<TaxonomyRule>) -> Self {
        Self { rules }
    }

    fn best_match<'a>(&'a self, instrument_id: &str, tag_of: impl Fn(&'a TaxonomyRule) -> &'a str) -> Option<DimensionMatch> {
        let matching: Vec<&TaxonomyRule> = self
            .rules
            .iter()
            .filter(|r| instrument_id.contains(r.pattern.as_str()))
            .collect();
        let top_priority = matching.iter().map(|r| r.priority).max()?;
        let mut candidates: Vec<&TaxonomyRule> = matching
            .into_iter()
            .filter(|r| r.priority == top_priority)
            .collect();
        candidates.sort_by(|a, b| tag_of(a).cmp(tag_of(b)));
        let winner = candidates.first()?;
        Some(DimensionMatch {
            tag: tag_of(winner).to_string(),
            weight: winner.weight,
        })
    }

    /// Classifies an instrument id into `(commodity, region, product_tier, confidence)`.
    pub fn classify(&self, instrument_id: &str) -> (String, String, String, f64) {
        let commodity = self.best_match(instrument_id, |r| r.commodity.as_str());
        let region = self.best_match(instrument_id, |r| r.region.as_str());
        let product_tier = self.best_match(instrument_id, |r| r.product_tier.as_str());

        let weights: Vec<f64> = [&commodity, &region, &product_tier]
            .iter()
            .map(|m| m.as_ref().map(|d| d.weight).unwrap_or(0.0))
            .collect();
        let confidence = weights.iter().cloned().fold(f64::INFINITY, f64::min);
        let confidence = if confidence.is_finite() { confidence } else { 0.0 };

        (
            commodity.map(|m| m.tag).unwrap_or_else(|| UNKNOWN_TIER.to_string()),
            region.map(|m| m.tag).unwrap_or_else(|| UNKNOWN_TIER.to_string()),
            product_tier.map(|m| m.tag).unwrap_or_else(|| UNKNOWN_TIER.to_string()),
            confidence,
        )
    }
}

/// Tracks consecutive transient-error counts per instrument, quarantining a
/// key for a cooldown once it crosses the configured threshold.
struct QuarantineTracker {
    threshold: u32,
    cooldown: Duration,
    failures: HashMap<InstrumentId, u32>,
    quarantined_until: HashMap<InstrumentId, Instant>,
}

impl QuarantineTracker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            failures: HashMap::new(),
            quarantined_until: HashMap::new(),
        }
    }

    fn is_quarantined(&self, instrument_id: &InstrumentId) -> bool {
        self.quarantined_until
            .get(instrument_id)
            .map(|until| Instant::now() < *until)
            .unwrap_or(false)
    }

    fn record_failure(&mut self, instrument_id: &InstrumentId) {
        let count = self.failures.entry(instrument_id.clone()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            self.quarantined_until
                .insert(instrument_id.clone(), Instant::now() + self.cooldown);
            *count = 0;
        }
    }

    fn record_success(&mut self, instrument_id: &InstrumentId) {
        self.failures.remove(instrument_id);
    }
}

/// Looks up reference data and attaches taxonomy classification to ticks.
pub struct Enricher {
    classifier: TaxonomyClassifier,
    reference: Arc<dyn ReferenceStore>,
    cache: Arc<dyn HotCache>,
    local: Mutex<LocalCache>,
    quarantine: Mutex<QuarantineTracker>,
    local_ttl: Duration,
    shared_ttl: Duration,
    negative_ttl: Duration,
}

impl Enricher {
    /// Builds an enricher over the given reference store, shared cache, and
    /// taxonomy rule set.
    pub fn new(
        classifier: TaxonomyClassifier,
        reference: Arc<dyn ReferenceStore>,
        cache: Arc<dyn HotCache>,
        local_capacity: usize,
        local_ttl: Duration,
        shared_ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            classifier,
            reference,
            cache,
            local: Mutex::new(LocalCache::new(local_capacity, local_ttl)),
            quarantine: Mutex::new(QuarantineTracker::new(5, Duration::from_secs(30))),
            local_ttl,
            shared_ttl,
            negative_ttl,
        }
    }

    async fn lookup_reference(&self, instrument_id: &InstrumentId) -> Result<Option<ReferenceRecord>, PipelineError> {
        if let Some(record) = self.local.lock().get(instrument_id) {
            return Ok(Some(record));
        }

        let shared_key = reference_cache_key(instrument_id);
        if let Some(bytes) = self.cache.get(&shared_key).await.map_err(PipelineError::Dependency)? {
            let record: ReferenceRecord =
                serde_json::from_slice(&bytes).map_err(|e| PipelineError::Internal(e.to_string()))?;
            self.local.lock().put(instrument_id.clone(), record.clone());
            return Ok(Some(record));
        }

        let negative_key = negative_cache_key(instrument_id);
        if self.cache.get(&negative_key).await.map_err(PipelineError::Dependency)?.is_some() {
            return Ok(None);
        }

        if self.quarantine.lock().is_quarantined(instrument_id) {
            return Ok(None);
        }

        match self.reference.get(instrument_id).await {
            Ok(Some(record)) => {
                self.quarantine.lock().record_success(instrument_id);
                let bytes = serde_json::to_vec(&record).map_err(|e| PipelineError::Internal(e.to_string()))?;
                self.cache
                    .set(&shared_key, bytes, self.shared_ttl)
                    .await
                    .map_err(PipelineError::Dependency)?;
                self.local.lock().put(instrument_id.clone(), record.clone());
                Ok(Some(record))
            }
            Ok(None) => {
                self.cache
                    .set(&negative_key, Vec::new(), self.negative_ttl)
                    .await
                    .map_err(PipelineError::Dependency)?;
                Ok(None)
            }
            Err(e @ TraitError::ConnectionFailed(_)) | Err(e @ TraitError::Timeout) | Err(e @ TraitError::Transient(_)) => {
                self.quarantine.lock().record_failure(instrument_id);
                Err(PipelineError::Dependency(e))
            }
            Err(e) => Err(PipelineError::Dependency(e)),
        }
    }

    /// Enriches one tick. Reference-store misses and quarantined lookups fall
    /// through to an `unknown` classification rather than failing the tick.
    pub async fn enrich(&self, tick: Tick) -> Result<EnrichedTick, PipelineError> {
        if tick.instrument_id.as_str().is_empty() {
            return Err(PipelineError::SchemaViolation(
                "instrument_id must be non-empty".to_string(),
            ));
        }

        let reference = match self.lookup_reference(&tick.instrument_id).await {
            Ok(r) => r,
            Err(PipelineError::Dependency(_)) => None,
            Err(e) => return Err(e),
        };

        if reference.is_none() {
            return Ok(EnrichedTick::unknown(tick));
        }

        let (commodity_tier, region_tier, product_tier, confidence) =
            self.classifier.classify(tick.instrument_id.as_str());

        Ok(EnrichedTick {
            tick,
            commodity_tier,
            region_tier,
            product_tier,
            confidence,
        })
    }
}

/// Refreshes the shared cache in the background, invalidating entries whose
/// reference-store `updated_at` is newer than what's cached.
pub async fn refresh_shared_cache(
    reference: &Arc<dyn ReferenceStore>,
    cache: &Arc<dyn HotCache>,
) -> Result<usize, TraitError> {
    let records = reference.bulk_refresh().await?;
    let mut refreshed = 0;
    for record in records {
        let key = reference_cache_key(&record.instrument_id);
        let stale = match cache.get(&key).await? {
            Some(bytes) => serde_json::from_slice::<ReferenceRecord>(&bytes)
                .map(|cached| cached.updated_at < record.updated_at)
                .unwrap_or(true),
            None => false,
        };
        if stale {
            let bytes = serde_json::to_vec(&record).map_err(|e| TraitError::SerializationError(e.to_string()))?;
            cache.set(&key, bytes, Duration::from_secs(5 * 60)).await?;
            refreshed += 1;
        }
    }
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_core::TenantId;
    use refinery_storage::{in_memory_analytical_store, InMemoryHotCache, InMemoryReferenceStore};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn sample_tick(instrument: &str) -> Tick {
        Tick {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new(instrument),
            event_time: chrono::Utc::now(),
            price: dec!(100),
            volume: dec!(1),
            source_id: refinery_core::SourceId::new("s"),
            quality_flags: Default::default(),
            metadata: BTreeMap::new(),
        }
    }

    fn rule(pattern: &str, commodity: &str, region: &str, tier: &str, priority: i32, weight: f64) -> TaxonomyRule {
        TaxonomyRule {
            pattern: pattern.to_string(),
            commodity: commodity.to_string(),
            region: region.to_string(),
            product_tier: tier.to_string(),
            priority,
            weight,
        }
    }

    #[tokio::test]
    async fn reference_hit_produces_classified_tick() {
        let reference: Arc<dyn ReferenceStore> = Arc::new(InMemoryReferenceStore::default());
        reference
            .put(ReferenceRecord {
                instrument_id: InstrumentId::new("NG"),
                commodity: "natural_gas".to_string(),
                region: "north_america".to_string(),
                product_tier: "futures".to_string(),
                unit: "mmbtu".to_string(),
                contract_size: dec!(10000),
                tick_size: dec!(0.001),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let cache: Arc<dyn HotCache> = Arc::new(InMemoryHotCache::default());
        let classifier = TaxonomyClassifier::new(vec![rule("NG", "natural_gas", "north_america", "futures", 10, 0.9)]);
        let enricher = Enricher::new(
            classifier,
            reference,
            cache,
            100,
            Duration::from_secs(30),
            Duration::from_secs(300),
            Duration::from_secs(30),
        );

        let enriched = enricher.enrich(sample_tick("NG")).await.unwrap();
        assert_eq!(enriched.commodity_tier, "natural_gas");
        assert_eq!(enriched.confidence, 0.9);
    }

    #[tokio::test]
    async fn reference_miss_yields_unknown_tiers_without_error() {
        let reference: Arc<dyn ReferenceStore> = Arc::new(InMemoryReferenceStore::default());
        let cache: Arc<dyn HotCache> = Arc::new(InMemoryHotCache::default());
        let classifier = TaxonomyClassifier::new(vec![]);
        let enricher = Enricher::new(
            classifier,
            reference,
            cache,
            100,
            Duration::from_secs(30),
            Duration::from_secs(300),
            Duration::from_secs(30),
        );

        let enriched = enricher.enrich(sample_tick("UNKNOWN")).await.unwrap();
        assert_eq!(enriched.commodity_tier, UNKNOWN_TIER);
        assert_eq!(enriched.confidence, 0.0);
        assert!(enriched
            .tick
            .quality_flags
            .contains(&refinery_core::QualityFlag::MissingMetadata));
    }

    #[test]
    fn tie_breaks_on_lexicographically_smallest_tag() {
        let classifier = TaxonomyClassifier::new(vec![
            rule("NG", "zeta_gas", "na", "futures", 10, 0.5),
            rule("NG", "alpha_gas", "na", "futures", 10, 0.5),
        ]);
        let (commodity, _, _, _) = classifier.classify("NG.FUT");
        assert_eq!(commodity, "alpha_gas");
    }

    #[test]
    fn higher_priority_rule_wins_over_lower() {
        let classifier = TaxonomyClassifier::new(vec![
            rule("NG", "low_priority_gas", "na", "futures", 1, 0.2),
            rule("NG", "high_priority_gas", "na", "futures", 10, 0.8),
        ]);
        let (commodity, _, _, confidence) = classifier.classify("NG.FUT");
        assert_eq!(commodity, "high_priority_gas");
        assert_eq!(confidence, 0.8);
    }

    #[tokio::test]
    async fn unused_analytical_store_factory_compiles() {
        // Exercises the storage crate's factory from an engine-level test so
        // the dependency stays genuinely linked rather than merely declared.
        let _ = in_memory_analytical_store();
    }
}
