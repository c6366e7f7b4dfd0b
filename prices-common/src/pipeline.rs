//! Orchestrate one ingestion request from uploaded bytes to summary.
//!
//! Stages run in order: Extracting, Parsing, Validating, Deduplicating, Persisting, Aggregating
//! and finally Done. Any stage up to Persisting can fail the request; Validating only filters
//! rows and Aggregating only degrades the summary. The pipeline holds no state between requests:
//! everything lives in the store.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::archive::{self, ArchiveError, ArchiveKind};
use crate::dedup::{dedupe, DedupKey, Deduplicated};
use crate::export::{self, ExportError};
use crate::item::{FilterParams, IdPolicy, Item};
use crate::store::{ItemStore, StoreError};
use crate::summary::{Aggregates, IngestionSummary};
use crate::validation::{self, Clock, ParseError, ValidatedBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Extracting,
    Parsing,
    Validating,
    Deduplicating,
    Persisting,
    Aggregating,
    Done,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Extracting => "extracting",
            IngestStage::Parsing => "parsing",
            IngestStage::Validating => "validating",
            IngestStage::Deduplicating => "deduplicating",
            IngestStage::Persisting => "persisting",
            IngestStage::Aggregating => "aggregating",
            IngestStage::Done => "done",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumeration of errors that fail an ingestion request.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to unpack upload: {0}")]
    Archive(#[from] ArchiveError),
    #[error("failed to decode csv: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to persist items: {0}")]
    Store(#[from] StoreError),
    #[error("{stage} task failed: {reason}")]
    Internal { stage: IngestStage, reason: String },
}

impl IngestError {
    /// The stage the request was in when it failed.
    pub fn stage(&self) -> IngestStage {
        match self {
            IngestError::Archive(_) => IngestStage::Extracting,
            IngestError::Parse(_) => IngestStage::Parsing,
            IngestError::Store(_) => IngestStage::Persisting,
            IngestError::Internal { stage, .. } => *stage,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("deduplicating by id requires caller supplied ids")]
    IdKeyWithStoreAssignedIds,
    #[error("deduplicating by tuple requires store assigned ids")]
    TupleKeyWithCallerIds,
}

/// Deployment-wide ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    dedup_key: DedupKey,
    id_policy: IdPolicy,
    store_timeout: Duration,
}

impl IngestConfig {
    /// The key and the id policy must agree. Store-assigned ids never match the ids of incoming
    /// rows, so they cannot be the identity key. With caller ids the id column stays unique, so a
    /// re-priced row reusing an id would be new by tuple but rejected by the store.
    pub fn new(
        dedup_key: DedupKey,
        id_policy: IdPolicy,
        store_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mismatch = match (dedup_key, id_policy) {
            (DedupKey::Id, IdPolicy::StoreAssigned) => Some(ConfigError::IdKeyWithStoreAssignedIds),
            (DedupKey::Tuple, IdPolicy::CallerSupplied) => Some(ConfigError::TupleKeyWithCallerIds),
            _ => None,
        };
        if let Some(e) = mismatch {
            return Err(e);
        }

        Ok(Self {
            dedup_key,
            id_policy,
            store_timeout,
        })
    }

    pub fn dedup_key(&self) -> DedupKey {
        self.dedup_key
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}

/// An uploaded archive as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    /// The raw `type` form value, empty when absent.
    pub declared_kind: String,
    pub payload: Vec<u8>,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn ItemStore>,
    clock: Arc<dyn Clock + Send + Sync>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ItemStore>,
        clock: Arc<dyn Clock + Send + Sync>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Run one ingestion request. Nothing is committed unless every insert succeeds.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestionSummary, IngestError> {
        let span = info_span!(
            "ingest",
            file_name = %upload.file_name,
            declared_kind = %upload.declared_kind
        );
        let result = self.run(upload).instrument(span).await;

        match &result {
            Ok(summary) => {
                info!("ingestion done: {:?}", summary);
                metrics::counter!(
                    "prices_ingestions_total",
                    "outcome" => "done",
                    "stage" => IngestStage::Done.as_str()
                )
                .increment(1);
            }
            Err(e) => {
                error!("ingestion failed while {}: {}", e.stage(), e);
                metrics::counter!(
                    "prices_ingestions_total",
                    "outcome" => "failed",
                    "stage" => e.stage().as_str()
                )
                .increment(1);
            }
        }

        result
    }

    async fn run(&self, upload: Upload) -> Result<IngestionSummary, IngestError> {
        let today = self.clock.today();
        let batch = tokio::task::spawn_blocking(move || decode_upload(upload, today))
            .await
            .map_err(|e| IngestError::Internal {
                stage: IngestStage::Parsing,
                reason: e.to_string(),
            })??;

        let rows_read = batch.rows_read;
        let rejected = batch.rejected();

        let timeout = self.config.store_timeout;
        let deduplicated = tokio::time::timeout(timeout, self.persist(batch.items))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        debug!("stage: {}", IngestStage::Aggregating);
        let aggregates =
            match tokio::time::timeout(timeout, Aggregates::collect(self.store.as_ref())).await {
                Ok(aggregates) => aggregates,
                Err(_) => {
                    warn!("aggregate queries timed out after {:?}", timeout);
                    metrics::counter!("prices_aggregate_failures_total", "aggregate" => "timeout")
                        .increment(1);
                    Aggregates::default()
                }
            };

        Ok(IngestionSummary {
            total_count: rows_read,
            duplicates_count: deduplicated.duplicate_count,
            total_items: deduplicated.unique.len(),
            invalid_count: rejected,
            total_categories: aggregates.total_categories,
            total_price: aggregates.total_price,
        })
    }

    /// Ping, dedupe against the stored rows and insert, all in one transaction.
    async fn persist(&self, candidates: Vec<Item>) -> Result<Deduplicated, StoreError> {
        debug!("stage: {}", IngestStage::Deduplicating);
        self.store.ping().await?;

        let mut txn = self.store.begin().await?;
        let existing = txn.load_all().await?;
        let deduplicated = dedupe(candidates, &existing, self.config.dedup_key);
        info!(
            "{} new items, {} duplicates against {} stored",
            deduplicated.unique.len(),
            deduplicated.duplicate_count,
            existing.len()
        );

        debug!("stage: {}", IngestStage::Persisting);
        for item in &deduplicated.unique {
            if let Err(e) = txn.insert(item, self.config.id_policy).await {
                if let Err(rollback_error) = txn.rollback().await {
                    warn!("failed to roll back transaction: {}", rollback_error);
                }
                return Err(e);
            }
        }

        txn.commit().await?;
        metrics::counter!("prices_items_inserted_total")
            .increment(deduplicated.unique.len() as u64);

        Ok(deduplicated)
    }

    /// Read the items matching `filter` and package them as a zipped `data.csv`.
    pub async fn export(&self, filter: &FilterParams) -> Result<Vec<u8>, ExportError> {
        let timeout = self.config.store_timeout;
        let items = tokio::time::timeout(timeout, self.fetch(filter))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        info!("exporting {} items for {:?}", items.len(), filter);

        let csv = export::write_csv(&items)?;
        export::package_zip(&csv)
    }

    async fn fetch(&self, filter: &FilterParams) -> Result<Vec<Item>, StoreError> {
        self.store.ping().await?;
        self.store.fetch_filtered(filter).await
    }
}

/// Extracting, Parsing and Validating: CPU-bound work run off the async runtime.
fn decode_upload(upload: Upload, today: NaiveDate) -> Result<ValidatedBatch, IngestError> {
    debug!("stage: {}", IngestStage::Extracting);
    let kind = ArchiveKind::from_declared(&upload.declared_kind)?;
    let entries = archive::extract(&upload.payload, &upload.file_name, kind)?;
    let (name, content) = archive::select_csv_entry(&entries)?;

    debug!("stage: {} {}", IngestStage::Parsing, name);
    let records = validation::read_records(content)?;

    debug!("stage: {}", IngestStage::Validating);
    Ok(validation::validate_records(&records, today))
}
