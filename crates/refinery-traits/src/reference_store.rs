//! Reference-data store capability trait.

use async_trait::async_trait;

use refinery_core::{InstrumentId, ReferenceRecord};

use crate::error::TraitError;

/// Key-value lookups by `instrument_id`, plus a bulk-refresh endpoint for
/// cache warmers. `updated_at` on [`ReferenceRecord`] is the cache-coherence
/// column consumers use to detect staleness.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Looks up one instrument's reference record.
    async fn get(&self, instrument_id: &InstrumentId) -> Result<Option<ReferenceRecord>, TraitError>;

    /// Bulk-loads reference records, used by cache warmers.
    async fn bulk_refresh(&self) -> Result<Vec<ReferenceRecord>, TraitError>;

    /// Upserts a reference record (test/seed helper; production systems own
    /// this store externally).
    async fn put(&self, record: ReferenceRecord) -> Result<(), TraitError>;
}
