//! Destination for normalized catalog records.

use async_trait::async_trait;

use fmtlib_core::{Format, FormatRepository, Record, Result};

/// Receives one normalized format record at a time.
///
/// Every [`FormatRepository`] is a sink that upserts by uid, so ingestion
/// writes exclusively through the entity store's upsert.
#[async_trait]
pub trait FormatSink: Send + Sync {
    async fn put(&self, record: Record) -> Result<Format>;
}

#[async_trait]
impl<R> FormatSink for R
where
    R: FormatRepository + ?Sized,
{
    async fn put(&self, record: Record) -> Result<Format> {
        self.upsert(record, None).await
    }
}
