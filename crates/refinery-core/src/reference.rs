//! Reference (instrument metadata) records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::InstrumentId;

/// Instrument metadata owned by an external reference store.
///
/// The enricher caches snapshots of this record with an age bound; `updated_at`
/// is the cache-coherence column used to detect staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Instrument this record describes.
    pub instrument_id: InstrumentId,
    /// Commodity classification (e.g. `natural_gas`).
    pub commodity: String,
    /// Region classification (e.g. `north_america`).
    pub region: String,
    /// Product tier (e.g. `futures`, `physical`).
    pub product_tier: String,
    /// Unit of measure (e.g. `mmbtu`).
    pub unit: String,
    /// Contract size in `unit`s.
    pub contract_size: Decimal,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Last time this record changed at the source of truth.
    pub updated_at: DateTime<Utc>,
}

/// A rule mapping keyword/regex patterns on a tick field to taxonomy tags.
///
/// Rules are evaluated in priority order; first match wins per dimension. Ties
/// at equal priority resolve to the lexicographically smallest tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyRule {
    /// Substring or regex pattern matched against `instrument_id`.
    pub pattern: String,
    /// Commodity tag produced on match.
    pub commodity: String,
    /// Region tag produced on match.
    pub region: String,
    /// Product tier tag produced on match.
    pub product_tier: String,
    /// Evaluation priority; higher is evaluated first.
    pub priority: i32,
    /// Confidence weight applied when this rule matches.
    pub weight: f64,
}
