//! Ingestion reconciliation pipeline.
//!
//! Per year: fetch the two SIDRA metric tables, normalize them into numeric
//! rows, inner-join on municipality, then converge the persisted rows for
//! that year through an insert-or-update plan applied in one transaction.
//! [`IngestPipeline::process_range`] drives this across a year range and
//! reports partial failure precisely.
//!
//! Concurrent ingestions of the same year are not coordinated here; callers
//! that need that must serialize per year themselves.

use std::collections::HashMap;

use lavoura_core::{
    JoinedProductionRow, Metric, NormalizedMetricRow, ProductionRecord, RawMetricRow,
    ReconcileOutcome, ReconcilePlan, FIRST_SUPPORTED_YEAR,
};
use lavoura_sidra::{MetricSource, SourceError};
use lavoura_store::{ProductionStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "lavoura-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    /// Transport or remote failure for one metric fetch. Fatal for the batch.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The fetched payload carried no data rows: either empty outright or
    /// nothing beyond the header pseudo-row. Fatal.
    #[error("malformed source payload for {metric}: no data rows")]
    MalformedSource { metric: Metric },

    /// The joined dataset for a year is empty. Recovered as a per-year skip
    /// by `process_range`; surfaced directly by `process_year`.
    #[error("not enough data to process year {year}")]
    InsufficientData { year: i32 },

    /// One or more years were skipped during a range pass.
    #[error("{}", batch_failure_message(.processed, .skipped))]
    BatchPartialFailure {
        processed: Vec<i32>,
        skipped: Vec<i32>,
    },

    /// Persistence failure; the year's transaction was rolled back. Fatal.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

fn batch_failure_message(processed: &[i32], skipped: &[i32]) -> String {
    let base = format!("not enough data to process year(s) {skipped:?}");
    if processed.is_empty() {
        base
    } else {
        format!("{base}; year(s) {processed:?} were processed successfully")
    }
}

/// Successful range pass: every year in the range was reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: Vec<i32>,
}

/// Year bounds for full-range ingestion, injected so tests can pin a window.
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub first_year: i32,
    /// Exclusive upper bound.
    pub end_year: i32,
}

impl IngestConfig {
    /// Default window: 2018 up to (but not including) the current year.
    pub fn from_env() -> Self {
        Self {
            first_year: std::env::var("INGEST_FIRST_YEAR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(FIRST_SUPPORTED_YEAR),
            end_year: std::env::var("INGEST_END_YEAR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| lavoura_core::latest_supported_year() + 1),
        }
    }
}

/// Coerce a SIDRA string field to an integer; anything unparsable becomes 0.
///
/// SIDRA uses placeholders ("-", "..", "X") for suppressed or absent values
/// and existing consumers rely on those landing as zero, so rows are never
/// dropped for a parse failure.
fn lenient_i64(field: &str) -> i64 {
    field.trim().parse().unwrap_or(0)
}

fn lenient_i32(field: &str) -> i32 {
    field.trim().parse().unwrap_or(0)
}

/// Drop the header pseudo-row and coerce the rest to numeric rows.
///
/// Input order is preserved and duplicates pass through untouched.
pub fn normalize(
    metric: Metric,
    raw: &[RawMetricRow],
) -> Result<Vec<NormalizedMetricRow>, IngestError> {
    if raw.len() < 2 {
        return Err(IngestError::MalformedSource { metric });
    }
    Ok(raw
        .iter()
        .skip(1)
        .map(|row| NormalizedMetricRow {
            municipality_id: lenient_i64(&row.municipality_code),
            year: lenient_i32(&row.year_code),
            value: lenient_i64(&row.value),
        })
        .collect())
}

/// Inner-join the two metric sets on municipality id.
///
/// The joined row's year comes from the area row, not a recomputed constant.
/// A municipality present in only one set is dropped: without both metrics
/// the row is not actionable. An empty result is the "insufficient data"
/// sentinel the orchestrator checks, not an error.
pub fn join(
    area: &[NormalizedMetricRow],
    quantity: &[NormalizedMetricRow],
) -> Vec<JoinedProductionRow> {
    if area.is_empty() || quantity.is_empty() {
        return Vec::new();
    }
    let quantity_by_municipality: HashMap<i64, i64> = quantity
        .iter()
        .map(|row| (row.municipality_id, row.value))
        .collect();

    area.iter()
        .filter_map(|row| {
            quantity_by_municipality
                .get(&row.municipality_id)
                .map(|quantity_produced| JoinedProductionRow {
                    municipality_id: row.municipality_id,
                    year: row.year,
                    harvested_area: row.value,
                    quantity_produced: *quantity_produced,
                })
        })
        .collect()
}

/// Compute the minimal insert/update set that converges storage to `joined`.
///
/// Key-partitioned on municipality id: rows absent from `existing` are
/// inserts, rows whose `(area, quantity)` differ are updates, identical rows
/// are left untouched. Municipalities persisted but absent from `joined` are
/// never deleted.
pub fn plan_reconcile(
    joined: &[JoinedProductionRow],
    existing: &[ProductionRecord],
) -> ReconcilePlan {
    if existing.is_empty() {
        return ReconcilePlan {
            inserts: joined.to_vec(),
            updates: Vec::new(),
        };
    }

    let existing_by_municipality: HashMap<i64, &ProductionRecord> = existing
        .iter()
        .map(|record| (record.municipality_id, record))
        .collect();

    let mut plan = ReconcilePlan::default();
    for row in joined {
        match existing_by_municipality.get(&row.municipality_id) {
            None => plan.inserts.push(*row),
            Some(record) => {
                if record.area != row.harvested_area || record.quantity != row.quantity_produced {
                    plan.updates.push(*row);
                }
            }
        }
    }
    plan
}

/// Drives fetch -> normalize -> join -> reconcile, per year and across ranges.
pub struct IngestPipeline<S, P> {
    source: S,
    store: P,
}

impl<S: MetricSource, P: ProductionStore> IngestPipeline<S, P> {
    pub fn new(source: S, store: P) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Ingest a single year. Fails with [`IngestError::InsufficientData`]
    /// when the joined dataset is empty.
    pub async fn process_year(&self, year: i32) -> Result<ReconcileOutcome, IngestError> {
        info!(year, "processing year");
        let raw_area = self.source.fetch(Metric::HarvestedArea, year).await?;
        let raw_quantity = self.source.fetch(Metric::QuantityProduced, year).await?;

        let area = normalize(Metric::HarvestedArea, &raw_area)?;
        let quantity = normalize(Metric::QuantityProduced, &raw_quantity)?;
        let joined = join(&area, &quantity);
        if joined.is_empty() {
            return Err(IngestError::InsufficientData { year });
        }

        let existing = self.store.rows_for_year(year).await?;
        let plan = plan_reconcile(&joined, &existing);
        let outcome = self.store.apply_plan(year, &plan).await?;
        info!(
            year,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = joined.len() - outcome.inserted - outcome.updated,
            "year reconciled"
        );
        Ok(outcome)
    }

    /// Ingest every year in `[start_year, end_year)` in ascending order.
    ///
    /// Years with insufficient data are skipped and reported together at the
    /// end as [`IngestError::BatchPartialFailure`]; any other failure aborts
    /// the batch immediately, leaving earlier years committed.
    pub async fn process_range(
        &self,
        start_year: i32,
        end_year: i32,
    ) -> Result<BatchSummary, IngestError> {
        let mut processed = Vec::new();
        let mut skipped = Vec::new();

        for year in start_year..end_year {
            match self.process_year(year).await {
                Ok(_) => processed.push(year),
                Err(IngestError::InsufficientData { year }) => {
                    info!(year, "skipping year: insufficient data");
                    skipped.push(year);
                }
                Err(err) => return Err(err),
            }
        }

        if skipped.is_empty() {
            Ok(BatchSummary { processed })
        } else {
            Err(IngestError::BatchPartialFailure { processed, skipped })
        }
    }
}
