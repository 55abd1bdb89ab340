//! Served-view projection entries maintained by the projector.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::curve::BuiltCurve;
use crate::ids::{Horizon, InstrumentId, SourceId, TenantId};
use crate::tick::QualityFlags;

/// A served "latest price" entry, monotonic in `event_time`: a received event
/// older than the stored `event_time` does not overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestPriceEntry {
    /// Logical data owner.
    pub tenant_id: TenantId,
    /// Instrument this entry is for.
    pub instrument_id: InstrumentId,
    /// Latest known price.
    pub price: Decimal,
    /// Volume associated with the bar that produced this price.
    pub volume: Decimal,
    /// Event time backing the monotonic ordering rule.
    pub event_time: DateTime<Utc>,
    /// Source of the underlying bar.
    pub source: SourceId,
    /// Quality flags carried from the underlying bar/tick.
    pub quality_flags: QualityFlags,
    /// Wall-clock time this entry was written.
    pub snapshot_at: DateTime<Utc>,
}

impl LatestPriceEntry {
    /// True if `candidate_event_time` would be accepted as a newer observation
    /// than this entry (used for the monotonic overwrite rule).
    pub fn accepts(&self, candidate_event_time: DateTime<Utc>) -> bool {
        candidate_event_time > self.event_time
    }
}

/// A served "curve snapshot" entry, monotonic in `snapshot_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveSnapshotEntry {
    /// Logical data owner.
    pub tenant_id: TenantId,
    /// Instrument (or curve subject) this snapshot represents.
    pub instrument_id: InstrumentId,
    /// Forward-time bucket identifier.
    pub horizon: Horizon,
    /// Curve points backing this snapshot.
    pub curve: BuiltCurve,
    /// Interpolation method used to build `curve`.
    pub interpolation_method: String,
    /// Wall-clock time this snapshot was produced; the monotonic ordering key.
    pub snapshot_at: DateTime<Utc>,
}

impl CurveSnapshotEntry {
    /// True if `candidate_snapshot_at` would be accepted as newer than this entry.
    pub fn accepts(&self, candidate_snapshot_at: DateTime<Utc>) -> bool {
        candidate_snapshot_at > self.snapshot_at
    }
}

/// An explicit request to drop the cached latest-price entry for one
/// instrument, carried on `projection.invalidate.instrument.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    /// Tenant the invalidation applies to.
    pub tenant_id: TenantId,
    /// Instrument whose cached entry should be dropped.
    pub instrument_id: InstrumentId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn entry_at(secs: u32) -> LatestPriceEntry {
        LatestPriceEntry {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new("NG"),
            price: dec!(100),
            volume: dec!(1),
            event_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, secs).unwrap(),
            source: SourceId::new("s"),
            quality_flags: QualityFlags::new(),
            snapshot_at: Utc::now(),
        }
    }

    #[test]
    fn monotonic_rule_rejects_older_event_time() {
        let entry = entry_at(30);
        assert!(!entry.accepts(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 10).unwrap()));
        assert!(entry.accepts(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 40).unwrap()));
    }
}
