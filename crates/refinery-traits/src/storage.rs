//! Analytical store capability traits.
//!
//! Tables: `silver_ticks`, `enriched_ticks`, `bars_<I>` (upsert by window key
//! with a `revision` column), `curves_base`/`curves_computed`, `served_latest`
//! (change-log), `served_latest_current`, `served_curve_snapshots`/`_current`,
//! `audit_events`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use refinery_core::{Bar, CurveSnapshotEntry, EnrichedTick, LatestPriceEntry, Tick, WindowKey};

use crate::error::TraitError;

/// An append-only audit row recording a noteworthy pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Wall-clock time the event was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Stage that recorded this event (e.g. `"aggregator"`).
    pub stage: String,
    /// Free-form event kind (e.g. `"bar_revision"`, `"reconcile_drift"`).
    pub kind: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Appends and reads the silver (normalized) and gold (enriched) tick tables.
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Appends a normalized tick. Replaces any existing row sharing the same
    /// `(tenant, instrument, event_time, source_id)` identity within the
    /// short dedup window, making repeated appends idempotent.
    async fn append_silver(&self, tick: &Tick) -> Result<(), TraitError>;

    /// Appends an enriched tick to the gold table.
    async fn append_enriched(&self, tick: &EnrichedTick) -> Result<(), TraitError>;

    /// Returns the number of silver rows recorded, for test assertions.
    async fn silver_count(&self) -> Result<usize, TraitError>;
}

/// Upserts and reads OHLC bars.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Upserts a bar keyed by its window, bumping the stored revision to
    /// `bar.revision` (which must be monotonically non-decreasing for a key).
    async fn upsert_bar(&self, bar: &Bar) -> Result<(), TraitError>;

    /// Reads the current bar for a window key, if one has been emitted.
    async fn get_bar(&self, key: &WindowKey) -> Result<Option<Bar>, TraitError>;
}

/// Stores base curve updates and computed (interpolated) curves.
#[async_trait]
pub trait CurveStore: Send + Sync {
    /// Records a base curve update (pre-interpolation).
    async fn append_curve_update(
        &self,
        update: &refinery_core::CurveUpdate,
    ) -> Result<(), TraitError>;

    /// Stores the computed curve derived from accumulated base points.
    async fn put_computed_curve(&self, curve: &refinery_core::BuiltCurve) -> Result<(), TraitError>;

    /// Reads the most recently computed curve for `curve_id`.
    async fn get_computed_curve(
        &self,
        curve_id: &refinery_core::CurveId,
    ) -> Result<Option<refinery_core::BuiltCurve>, TraitError>;
}

/// Served-view analytical tables: a change-log plus a latest-per-key table,
/// for both the latest-price and curve-snapshot projections.
#[async_trait]
pub trait ServedStore: Send + Sync {
    /// Appends a row to the latest-price change-log and updates the
    /// latest-per-key table if `entry` is newer than what's stored.
    async fn record_latest_price(&self, entry: &LatestPriceEntry) -> Result<bool, TraitError>;

    /// Reads the current latest-price entry for `(tenant, instrument)`.
    async fn get_latest_price(
        &self,
        tenant_id: &refinery_core::TenantId,
        instrument_id: &refinery_core::InstrumentId,
    ) -> Result<Option<LatestPriceEntry>, TraitError>;

    /// Appends a row to the curve-snapshot change-log and updates the
    /// latest-per-key table if `entry` is newer than what's stored.
    async fn record_curve_snapshot(&self, entry: &CurveSnapshotEntry) -> Result<bool, TraitError>;

    /// Reads the current curve-snapshot entry for `(tenant, instrument, horizon)`.
    async fn get_curve_snapshot(
        &self,
        tenant_id: &refinery_core::TenantId,
        instrument_id: &refinery_core::InstrumentId,
        horizon: &refinery_core::Horizon,
    ) -> Result<Option<CurveSnapshotEntry>, TraitError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends one audit row.
    async fn append(&self, entry: AuditEntry) -> Result<(), TraitError>;
}

/// Bundles the analytical store capabilities behind a single handle, mirroring
/// the combined-adapter shape used for storage composition.
#[derive(Clone)]
pub struct AnalyticalStore {
    /// Tick tables (silver/gold).
    pub ticks: Arc<dyn TickStore>,
    /// Bar tables.
    pub bars: Arc<dyn BarStore>,
    /// Curve tables.
    pub curves: Arc<dyn CurveStore>,
    /// Served-view tables.
    pub served: Arc<dyn ServedStore>,
    /// Audit log.
    pub audit: Arc<dyn AuditStore>,
}

impl AnalyticalStore {
    /// Bundles the five table-level capabilities into one handle.
    pub fn new(
        ticks: Arc<dyn TickStore>,
        bars: Arc<dyn BarStore>,
        curves: Arc<dyn CurveStore>,
        served: Arc<dyn ServedStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            ticks,
            bars,
            curves,
            served,
            audit,
        }
    }
}
