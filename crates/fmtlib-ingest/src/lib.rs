//! # fmtlib-ingest
//!
//! Catalog ingestion for the format library.
//!
//! Two independent pipelines normalize external signature catalogs into
//! format records and upsert them one by one through a [`FormatSink`]:
//!
//! - **PRONOM**: the latest DROID signature file listed on the National
//!   Archives index page, streamed and parsed in a single pass.
//! - **LOC**: the Library of Congress FDD zip archive, one XML document per
//!   format. The archive URL is fixed unless an index page is configured, in
//!   which case the latest listed archive is used.
//!
//! Both runs are fatal on the first network or parse failure. Records upserted
//! before the failure stay committed and the run is not resumable; the error
//! log of a failed run states how many records were committed.
//!
//! ```rust,ignore
//! let ingestor = Ingestor::new(IngestConfig::from_env()?)?;
//! let report = ingestor.load_pronom_signatures(&db.formats).await?;
//! ```

pub mod config;
pub mod date;
pub mod http;
pub mod loc;
pub mod pronom;
pub mod sink;

use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use tracing::{error, info};

use fmtlib_core::{defaults, Result};

pub use config::{ConfigError, IngestConfig};
pub use http::Fetcher;
pub use sink::FormatSink;

/// Summary of a completed ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Source label stored on the ingested formats.
    pub source: String,
    /// The catalog file that was read.
    pub link: String,
    /// Records upserted.
    pub records: usize,
    pub duration_ms: u64,
}

/// Runs the catalog pipelines.
#[derive(Debug, Clone)]
pub struct Ingestor {
    config: IngestConfig,
    fetcher: Fetcher,
    pronom_links: Regex,
    loc_links: Regex,
    loc_members: Regex,
}

impl Ingestor {
    /// Validate the configuration and build the HTTP client.
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher: Fetcher::new(&config)?,
            pronom_links: config.pronom_link_regex()?,
            loc_links: config.loc_link_regex()?,
            loc_members: config.loc_member_regex()?,
            config,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// The newest signature file listed on the PRONOM index page.
    pub async fn latest_pronom_link(&self) -> Result<String> {
        self.fetcher
            .latest_link(&self.config.pronom_index_url, &self.pronom_links)
            .await
    }

    /// The FDD archive to read: the latest on the index page if one is
    /// configured, else the fixed archive URL.
    pub async fn loc_archive_link(&self) -> Result<String> {
        match &self.config.loc_index_url {
            Some(index) => self.fetcher.latest_link(index, &self.loc_links).await,
            None => Ok(self.config.loc_archive_url.clone()),
        }
    }

    /// Ingest the latest DROID signature file.
    pub async fn load_pronom_signatures<S>(&self, sink: &S) -> Result<IngestReport>
    where
        S: FormatSink + ?Sized,
    {
        let start = Instant::now();
        let link = self.latest_pronom_link().await?;
        info!(
            subsystem = "ingest",
            component = "pronom",
            op = "start",
            link = %link,
            "Ingesting PRONOM signature file"
        );

        let mut committed = 0;
        let outcome = async {
            let reader = self.fetcher.get_stream(&link).await?;
            pronom::ingest_signature_file(reader, sink, &mut committed).await
        }
        .await;

        finish(defaults::PRONOM_SOURCE, link, committed, start, outcome)
    }

    /// Ingest the Library of Congress FDD archive.
    pub async fn load_loc_signatures<S>(&self, sink: &S) -> Result<IngestReport>
    where
        S: FormatSink + ?Sized,
    {
        let start = Instant::now();
        let link = self.loc_archive_link().await?;
        info!(
            subsystem = "ingest",
            component = "loc",
            op = "start",
            link = %link,
            "Ingesting LOC FDD archive"
        );

        let mut committed = 0;
        let outcome = async {
            let archive = self.fetcher.get_bytes(&link).await?;
            loc::ingest_archive(archive, &self.loc_members, sink, &mut committed).await
        }
        .await;

        finish(defaults::LOC_SOURCE, link, committed, start, outcome)
    }
}

fn finish(
    source: &str,
    link: String,
    committed: usize,
    start: Instant,
    outcome: Result<()>,
) -> Result<IngestReport> {
    let duration_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(()) => {
            info!(
                subsystem = "ingest",
                source,
                op = "complete",
                record_count = committed,
                duration_ms,
                "Catalog ingested"
            );
            Ok(IngestReport {
                source: source.to_string(),
                link,
                records: committed,
                duration_ms,
            })
        }
        Err(e) => {
            error!(
                subsystem = "ingest",
                source,
                op = "abort",
                record_count = committed,
                duration_ms,
                error = %e,
                "Catalog ingestion aborted; {} records from this run remain committed",
                committed
            );
            Err(e)
        }
    }
}
