//! Core domain types for the streaming market-data refinement pipeline.
//!
//! This crate has no I/O and no async dependency: it defines the entities and
//! invariants shared by every stage (Normalizer, Enricher, Aggregator,
//! Projector) without prescribing how they are transported or stored.

pub mod curve;
pub mod ids;
pub mod interval;
pub mod projection;
pub mod reference;
pub mod tick;
pub mod window;

pub use curve::{BuiltCurve, CurvePoint, CurveUpdate, CurveUpdateRequest};
pub use ids::{CurveId, Horizon, InstrumentId, SourceId, TenantId, Venue};
pub use interval::Interval;
pub use projection::{CurveSnapshotEntry, InvalidateRequest, LatestPriceEntry};
pub use reference::{ReferenceRecord, TaxonomyRule};
pub use tick::{normalize_flags, EnrichedTick, QualityFlag, QualityFlags, Tick, UNKNOWN_TIER};
pub use window::{Bar, WindowKey, WindowState};
