//! Translates venue-specific raw payloads into canonical ticks.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use refinery_core::{normalize_flags, InstrumentId, QualityFlag, SourceId, TenantId, Tick, Venue};

use crate::error::PipelineError;

/// A raw, venue-tagged payload as delivered by an upstream feed handler.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Which venue produced this payload.
    pub venue: Venue,
    /// Opaque wire bytes, format defined by the venue's parser.
    pub payload: Vec<u8>,
    /// Small metadata carried alongside the payload (e.g. partition, offset).
    pub ingest_metadata: HashMap<String, String>,
}

/// Capability a venue-specific parser implements; new venues register one of
/// these at startup rather than being matched on by name throughout the code.
pub trait VenueParser: Send + Sync {
    /// Venue this parser handles.
    fn name(&self) -> &str;
    /// Parses one raw payload into a canonical tick, or a classified failure.
    fn parse(&self, payload: &[u8]) -> Result<Tick, PipelineError>;
}

/// Wire shape expected by [`JsonVenueParser`]: a flat JSON object with the
/// canonical tick fields, no venue-specific nesting.
#[derive(Debug, Deserialize)]
struct JsonTickPayload {
    tenant_id: String,
    instrument_id: String,
    event_time: DateTime<Utc>,
    price: Decimal,
    volume: Decimal,
    source_id: String,
    #[serde(default)]
    metadata: std::collections::BTreeMap<String, String>,
}

/// Default parser for venues that emit flat JSON ticks.
pub struct JsonVenueParser {
    venue_name: String,
}

impl JsonVenueParser {
    /// Builds a JSON parser registered under `venue_name`.
    pub fn new(venue_name: impl Into<String>) -> Self {
        Self {
            venue_name: venue_name.into(),
        }
    }
}

impl VenueParser for JsonVenueParser {
    fn name(&self) -> &str {
        &self.venue_name
    }

    fn parse(&self, payload: &[u8]) -> Result<Tick, PipelineError> {
        let parsed: JsonTickPayload = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::SchemaViolation(e.to_string()))?;
        Ok(Tick {
            tenant_id: TenantId::new(parsed.tenant_id),
            instrument_id: InstrumentId::new(parsed.instrument_id),
            event_time: parsed.event_time,
            price: parsed.price,
            volume: parsed.volume,
            source_id: SourceId::new(parsed.source_id),
            quality_flags: Default::default(),
            metadata: parsed.metadata,
        })
    }
}

/// Bounds applied during validation. A single process-wide band is used
/// rather than a per-commodity lookup, since commodity classification is not
/// yet known at normalize time (it is assigned downstream by the enricher).
#[derive(Debug, Clone)]
pub struct ValidationBounds {
    /// Acceptable price range; outside this, `PriceOutOfRange` is added.
    pub price_min: Decimal,
    /// See `price_min`.
    pub price_max: Decimal,
    /// Ticks timestamped further in the future than this are schema-invalid.
    pub max_clock_skew: Duration,
    /// Ticks older than this (relative to processing wall-clock) get `LateArrival`.
    pub max_lateness: Duration,
}

impl Default for ValidationBounds {
    fn default() -> Self {
        Self {
            price_min: Decimal::ZERO,
            price_max: Decimal::from(1_000_000),
            max_clock_skew: Duration::from_secs(60),
            max_lateness: Duration::from_secs(5 * 60),
        }
    }
}

/// Applies the normalization validation rules in order, mutating the tick's
/// quality flags. Returns `Err` only for the fatal `SchemaViolation` case;
/// every other outcome is expressed as a flag.
fn validate(tick: &mut Tick, bounds: &ValidationBounds, now: DateTime<Utc>) -> Result<(), PipelineError> {
    if tick.instrument_id.as_str().is_empty() || tick.tenant_id.as_str().is_empty() {
        return Err(PipelineError::SchemaViolation(
            "tenant_id and instrument_id must be non-empty".to_string(),
        ));
    }

    if tick.price < Decimal::ZERO {
        tick.quality_flags.insert(QualityFlag::PriceNegative);
    }
    if tick.price < bounds.price_min || tick.price > bounds.price_max {
        tick.quality_flags.insert(QualityFlag::PriceOutOfRange);
    }

    if tick.volume < Decimal::ZERO {
        tick.quality_flags.insert(QualityFlag::VolumeSpike);
    }

    let skew = now.signed_duration_since(tick.event_time);
    if skew < -chrono::Duration::from_std(bounds.max_clock_skew).unwrap_or_default() {
        return Err(PipelineError::SchemaViolation(
            "event_time too far in the future".to_string(),
        ));
    }
    if skew > chrono::Duration::from_std(bounds.max_lateness).unwrap_or_default() {
        tick.quality_flags.insert(QualityFlag::LateArrival);
    }

    normalize_flags(&mut tick.quality_flags);
    Ok(())
}

/// Small fixed-capacity dedup ring keyed by tick identity, suppressing exact
/// reemits within the tracked window. Best-effort: entries age out by
/// insertion order, not wall-clock.
struct DedupRing {
    capacity: usize,
    order: VecDeque<(TenantId, InstrumentId, DateTime<Utc>, SourceId)>,
    seen: std::collections::HashSet<(TenantId, InstrumentId, DateTime<Utc>, SourceId)>,
}

impl DedupRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: std::collections::HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` if this identity was already seen (i.e. is a duplicate).
    fn check_and_insert(&mut self, identity: (TenantId, InstrumentId, DateTime<Utc>, SourceId)) -> bool {
        if self.seen.contains(&identity) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(identity.clone());
        self.seen.insert(identity);
        false
    }
}

/// Outcome of normalizing one raw event.
#[derive(Debug)]
pub enum NormalizeOutcome {
    /// Accepted tick, ready to persist and emit downstream.
    Accepted(Tick),
    /// Exact reemit suppressed by the dedup window; not emitted downstream,
    /// but the identity was already persisted by the original delivery.
    Duplicate,
}

/// Validates and dedups ticks, dispatching to venue-registered parsers.
pub struct Normalizer {
    parsers: HashMap<String, Box<dyn VenueParser>>,
    bounds: ValidationBounds,
    dedup: parking_lot::Mutex<DedupRing>,
}

impl Normalizer {
    /// Builds a normalizer with no venues registered yet.
    pub fn new(bounds: ValidationBounds, dedup_capacity: usize) -> Self {
        Self {
            parsers: HashMap::new(),
            bounds,
            dedup: parking_lot::Mutex::new(DedupRing::new(dedup_capacity)),
        }
    }

    /// Registers a parser for a venue. Re-registering a venue replaces its parser.
    pub fn register(&mut self, parser: Box<dyn VenueParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    /// Runs one raw event through parsing, validation, and dedup.
    pub fn normalize(&self, raw: &RawEvent) -> Result<NormalizeOutcome, PipelineError> {
        let parser = self
            .parsers
            .get(raw.venue.as_str())
            .ok_or_else(|| PipelineError::UnknownVenue(raw.venue.as_str().to_string()))?;

        let mut tick = parser.parse(&raw.payload)?;
        validate(&mut tick, &self.bounds, Utc::now())?;

        let is_duplicate = self.dedup.lock().check_and_insert(tick.identity());
        if is_duplicate {
            tick.quality_flags.insert(QualityFlag::Duplicate);
            normalize_flags(&mut tick.quality_flags);
            return Ok(NormalizeOutcome::Duplicate);
        }

        Ok(NormalizeOutcome::Accepted(tick))
    }
}
