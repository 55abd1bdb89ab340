//! In-memory backends. These are the default for tests and for single-process
//! deployments; every method follows the same lock-then-mutate shape so
//! concurrent access is simple to reason about.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use refinery_core::{
    Bar, BuiltCurve, CurveId, CurveSnapshotEntry, CurveUpdate, EnrichedTick, Horizon, InstrumentId,
    LatestPriceEntry, ReferenceRecord, TenantId, Tick, WindowKey,
};
use refinery_traits::{
    AnalyticalStore, AuditEntry, AuditStore, BarStore, CurveStore, HotCache, ReferenceStore,
    ServedStore, TickStore, TraitError,
};

fn lock_err(what: &str) -> TraitError {
    TraitError::DatabaseError(format!("lock poisoned: {}", what))
}

/// In-memory silver/gold tick tables.
#[derive(Default)]
pub struct InMemoryTickStore {
    silver: RwLock<HashMap<(TenantId, InstrumentId, chrono::DateTime<chrono::Utc>, refinery_core::SourceId), Tick>>,
    enriched: RwLock<Vec<EnrichedTick>>,
}

impl InMemoryTickStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TickStore for InMemoryTickStore {
    async fn append_silver(&self, tick: &Tick) -> Result<(), TraitError> {
        let mut silver = self.silver.write();
        silver.insert(tick.identity(), tick.clone());
        Ok(())
    }

    async fn append_enriched(&self, tick: &EnrichedTick) -> Result<(), TraitError> {
        self.enriched.write().push(tick.clone());
        Ok(())
    }

    async fn silver_count(&self) -> Result<usize, TraitError> {
        Ok(self.silver.read().len())
    }
}

/// In-memory bar table, upserted by window key.
#[derive(Default)]
pub struct InMemoryBarStore {
    bars: RwLock<HashMap<WindowKey, Bar>>,
}

impl InMemoryBarStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BarStore for InMemoryBarStore {
    async fn upsert_bar(&self, bar: &Bar) -> Result<(), TraitError> {
        self.bars.write().insert(bar.key.clone(), bar.clone());
        Ok(())
    }

    async fn get_bar(&self, key: &WindowKey) -> Result<Option<Bar>, TraitError> {
        Ok(self.bars.read().get(key).cloned())
    }
}

/// In-memory base curve updates and computed curves.
#[derive(Default)]
pub struct InMemoryCurveStore {
    updates: RwLock<Vec<CurveUpdate>>,
    computed: RwLock<HashMap<CurveId, BuiltCurve>>,
}

impl InMemoryCurveStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CurveStore for InMemoryCurveStore {
    async fn append_curve_update(&self, update: &CurveUpdate) -> Result<(), TraitError> {
        self.updates.write().push(update.clone());
        Ok(())
    }

    async fn put_computed_curve(&self, curve: &BuiltCurve) -> Result<(), TraitError> {
        self.computed
            .write()
            .insert(curve.curve_id.clone(), curve.clone());
        Ok(())
    }

    async fn get_computed_curve(&self, curve_id: &CurveId) -> Result<Option<BuiltCurve>, TraitError> {
        Ok(self.computed.read().get(curve_id).cloned())
    }
}

/// In-memory served-view tables: a change-log plus a latest-per-key table for
/// both the latest-price and curve-snapshot projections.
#[derive(Default)]
pub struct InMemoryServedStore {
    latest_log: RwLock<Vec<LatestPriceEntry>>,
    latest_current: RwLock<HashMap<(TenantId, InstrumentId), LatestPriceEntry>>,
    curve_log: RwLock<Vec<CurveSnapshotEntry>>,
    curve_current: RwLock<HashMap<(TenantId, InstrumentId, Horizon), CurveSnapshotEntry>>,
}

impl InMemoryServedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServedStore for InMemoryServedStore {
    async fn record_latest_price(&self, entry: &LatestPriceEntry) -> Result<bool, TraitError> {
        let key = (entry.tenant_id.clone(), entry.instrument_id.clone());
        let mut current = self.latest_current.write();
        let accepted = match current.get(&key) {
            Some(existing) => existing.accepts(entry.event_time),
            None => true,
        };
        if accepted {
            current.insert(key, entry.clone());
            self.latest_log.write().push(entry.clone());
        }
        Ok(accepted)
    }

    async fn get_latest_price(
        &self,
        tenant_id: &TenantId,
        instrument_id: &InstrumentId,
    ) -> Result<Option<LatestPriceEntry>, TraitError> {
        let key = (tenant_id.clone(), instrument_id.clone());
        Ok(self.latest_current.read().get(&key).cloned())
    }

    async fn record_curve_snapshot(&self, entry: &CurveSnapshotEntry) -> Result<bool, TraitError> {
        let key = (
            entry.tenant_id.clone(),
            entry.instrument_id.clone(),
            entry.horizon.clone(),
        );
        let mut current = self.curve_current.write();
        let accepted = match current.get(&key) {
            Some(existing) => existing.accepts(entry.snapshot_at),
            None => true,
        };
        if accepted {
            current.insert(key, entry.clone());
            self.curve_log.write().push(entry.clone());
        }
        Ok(accepted)
    }

    async fn get_curve_snapshot(
        &self,
        tenant_id: &TenantId,
        instrument_id: &InstrumentId,
        horizon: &Horizon,
    ) -> Result<Option<CurveSnapshotEntry>, TraitError> {
        let key = (tenant_id.clone(), instrument_id.clone(), horizon.clone());
        Ok(self.curve_current.read().get(&key).cloned())
    }
}

/// In-memory append-only audit log.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded entries, for test assertions.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), TraitError> {
        self.entries.write().push(entry);
        Ok(())
    }
}

/// Builds a fully in-memory [`AnalyticalStore`] bundle.
pub fn in_memory_analytical_store() -> AnalyticalStore {
    AnalyticalStore::new(
        Arc::new(InMemoryTickStore::new()),
        Arc::new(InMemoryBarStore::new()),
        Arc::new(InMemoryCurveStore::new()),
        Arc::new(InMemoryServedStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    )
}

/// In-memory reference-data store.
#[derive(Default)]
pub struct InMemoryReferenceStore {
    records: RwLock<HashMap<InstrumentId, ReferenceRecord>>,
}

impl InMemoryReferenceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn get(&self, instrument_id: &InstrumentId) -> Result<Option<ReferenceRecord>, TraitError> {
        Ok(self.records.read().get(instrument_id).cloned())
    }

    async fn bulk_refresh(&self) -> Result<Vec<ReferenceRecord>, TraitError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn put(&self, record: ReferenceRecord) -> Result<(), TraitError> {
        self.records.write().insert(record.instrument_id.clone(), record);
        Ok(())
    }
}

struct CacheSlot {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory hot cache with per-key TTL and prefix scan.
#[derive(Default)]
pub struct InMemoryHotCache {
    entries: RwLock<HashMap<String, CacheSlot>>,
}

impl InMemoryHotCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HotCache for InMemoryHotCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TraitError> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), TraitError> {
        self.entries.write().insert(
            key.to_string(),
            CacheSlot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TraitError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, pattern: &str) -> Result<Vec<String>, TraitError> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(pattern))
            .cloned()
            .collect())
    }
}
