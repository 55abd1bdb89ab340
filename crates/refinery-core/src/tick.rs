//! Canonical tick types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{InstrumentId, SourceId, TenantId};

/// Closed vocabulary of data-quality flags a tick may carry.
///
/// A tick always carries at least one flag; absence of non-`Valid` flags implies `Valid`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum QualityFlag {
    /// No quality issue detected.
    Valid,
    /// Price was negative.
    PriceNegative,
    /// Price fell outside the configured per-commodity band.
    PriceOutOfRange,
    /// Volume looked anomalously large relative to recent history.
    VolumeSpike,
    /// Event time was older than the configured lateness bound at arrival.
    LateArrival,
    /// Reference metadata lookup failed or returned nothing.
    MissingMetadata,
    /// Exact reemit suppressed by the dedup window.
    Duplicate,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityFlag::Valid => "VALID",
            QualityFlag::PriceNegative => "PRICE_NEGATIVE",
            QualityFlag::PriceOutOfRange => "PRICE_OUT_OF_RANGE",
            QualityFlag::VolumeSpike => "VOLUME_SPIKE",
            QualityFlag::LateArrival => "LATE_ARRIVAL",
            QualityFlag::MissingMetadata => "MISSING_METADATA",
            QualityFlag::Duplicate => "DUPLICATE",
        };
        write!(f, "{}", s)
    }
}

/// A set of quality flags, normalized so that `Valid` only appears alone.
pub type QualityFlags = BTreeSet<QualityFlag>;

/// Inserts flags into a set per the vocabulary's normalization rule: once any
/// non-`Valid` flag is present, `Valid` is removed; if the set ends up empty,
/// `Valid` is the implied default.
pub fn normalize_flags(flags: &mut QualityFlags) {
    if flags.len() > 1 {
        flags.remove(&QualityFlag::Valid);
    }
    if flags.is_empty() {
        flags.insert(QualityFlag::Valid);
    }
}

/// Canonical tick produced by the normalizer.
///
/// `(tenant_id, instrument_id, event_time, source_id)` uniquely identifies a
/// tick across the pipeline; duplicates must be idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    /// Logical data owner.
    pub tenant_id: TenantId,
    /// Instrument this observation is for.
    pub instrument_id: InstrumentId,
    /// Millisecond-precision UTC event time.
    pub event_time: DateTime<Utc>,
    /// Observed price. Expected finite; validity is tracked via `quality_flags`.
    pub price: Decimal,
    /// Observed volume. Expected non-negative; validity is tracked via `quality_flags`.
    pub volume: Decimal,
    /// Opaque origin marker.
    pub source_id: SourceId,
    /// Data-quality flags drawn from the closed vocabulary.
    pub quality_flags: QualityFlags,
    /// Small free-form metadata map carried from the raw payload.
    pub metadata: BTreeMap<String, String>,
}

impl Tick {
    /// Returns the identity tuple used for idempotent dedup and upserts.
    pub fn identity(&self) -> (TenantId, InstrumentId, DateTime<Utc>, SourceId) {
        (
            self.tenant_id.clone(),
            self.instrument_id.clone(),
            self.event_time,
            self.source_id.clone(),
        )
    }

    /// True if the tick carries no non-`Valid` flag.
    pub fn is_valid(&self) -> bool {
        self.quality_flags.len() == 1 && self.quality_flags.contains(&QualityFlag::Valid)
    }
}

/// Sentinel tier value used when reference lookup fails.
pub const UNKNOWN_TIER: &str = "unknown";

/// A canonical tick enriched with taxonomy classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTick {
    /// The underlying canonical tick (quality flags may gain `MissingMetadata` here).
    pub tick: Tick,
    /// Commodity tier from the reference taxonomy (or `unknown`).
    pub commodity_tier: String,
    /// Region tier from the reference taxonomy (or `unknown`).
    pub region_tier: String,
    /// Product tier from the reference taxonomy (or `unknown`).
    pub product_tier: String,
    /// Confidence in the classification, in `[0, 1]`.
    pub confidence: f64,
}

impl EnrichedTick {
    /// Builds an enriched tick with all tiers set to the `unknown` sentinel and
    /// zero confidence, flagging the underlying tick `MissingMetadata`.
    pub fn unknown(mut tick: Tick) -> Self {
        tick.quality_flags.insert(QualityFlag::MissingMetadata);
        normalize_flags(&mut tick.quality_flags);
        Self {
            tick,
            commodity_tier: UNKNOWN_TIER.to_string(),
            region_tier: UNKNOWN_TIER.to_string(),
            product_tier: UNKNOWN_TIER.to_string(),
            confidence: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_tick() -> Tick {
        Tick {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new("NG"),
            event_time: Utc::now(),
            price: dec!(120.50),
            volume: dec!(1000),
            source_id: SourceId::new("s"),
            quality_flags: QualityFlags::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_flags_normalize_to_valid() {
        let mut flags = QualityFlags::new();
        normalize_flags(&mut flags);
        assert_eq!(flags, BTreeSet::from([QualityFlag::Valid]));
    }

    #[test]
    fn non_valid_flag_displaces_valid() {
        let mut flags = QualityFlags::from([QualityFlag::Valid, QualityFlag::PriceNegative]);
        normalize_flags(&mut flags);
        assert_eq!(flags, BTreeSet::from([QualityFlag::PriceNegative]));
    }

    #[test]
    fn unknown_enrichment_flags_missing_metadata() {
        let enriched = EnrichedTick::unknown(sample_tick());
        assert_eq!(enriched.commodity_tier, UNKNOWN_TIER);
        assert_eq!(enriched.confidence, 0.0);
        assert!(enriched
            .tick
            .quality_flags
            .contains(&QualityFlag::MissingMetadata));
    }

    #[test]
    fn identity_tuple_is_stable() {
        let tick = sample_tick();
        let id1 = tick.identity();
        let id2 = tick.identity();
        assert_eq!(id1, id2);
    }
}
