//! Ingestion scheduler.
//!
//! ```text
//! Source ──list_metadata──▶ partition into R chunks
//!                               │
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!     (sink, chunk 0)    (sink, chunk 1)  ...  (sink, chunk R-1)
//!     fetch_records → sink.upsert → buffer.enqueue_batch
//! ```
//!
//! Workers are best effort: a failing worker is logged and counted, and
//! [`IngestionManager::run`] returns once every worker has finished.

use std::ops::Range;
use std::sync::Arc;

use domain_vector::{Metadata, Sink};
use messaging::Buffer;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::PipelineResult;
use crate::metrics::PipelineMetrics;
use crate::source::Source;

/// Split `0..len` into at most `routines` contiguous chunks of
/// `ceil(len / routines)` items. Empty chunks are not returned.
pub fn partition(len: usize, routines: usize) -> Vec<Range<usize>> {
    if len == 0 || routines == 0 {
        return Vec::new();
    }

    let chunk = len.div_ceil(routines);
    (0..routines)
        .map(|i| i * chunk)
        .take_while(|&start| start < len)
        .map(|start| start..(start + chunk).min(len))
        .collect()
}

/// Totals of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub sources_failed: usize,
    pub listed: usize,
    pub batches: usize,
    pub batches_failed: usize,
    pub upserted: usize,
    pub enqueued: usize,
}

struct BatchOutcome {
    upserted: usize,
    enqueued: usize,
}

pub struct IngestionManager {
    sources: Vec<Arc<dyn Source>>,
    sinks: Vec<Arc<dyn Sink>>,
    buffer: Arc<dyn Buffer>,
    routines: usize,
    embedding_size: u64,
    metrics: PipelineMetrics,
}

impl IngestionManager {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        sinks: Vec<Arc<dyn Sink>>,
        buffer: Arc<dyn Buffer>,
        routines: usize,
        embedding_size: u64,
    ) -> Self {
        Self {
            sources,
            sinks,
            buffer,
            routines: routines.max(1),
            embedding_size,
            metrics: PipelineMetrics::new("ingestion"),
        }
    }

    pub async fn run(&self) -> IngestionReport {
        let mut report = IngestionReport::default();
        let mut workers = JoinSet::new();

        for source in &self.sources {
            let metadata = match source.list_metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    error!(collection = source.collection(), error = %e, "Could not list metadata, skipping source");
                    self.metrics.work_failed(e.category());
                    report.sources_failed += 1;
                    continue;
                }
            };
            report.listed += metadata.len();

            let chunks = partition(metadata.len(), self.routines);
            info!(
                collection = source.collection(),
                items = metadata.len(),
                chunks = chunks.len(),
                sinks = self.sinks.len(),
                "Scheduling ingestion batches"
            );

            for sink in &self.sinks {
                for range in &chunks {
                    let batch = metadata[range.clone()].to_vec();
                    let source = source.clone();
                    let sink = sink.clone();
                    let buffer = self.buffer.clone();
                    let metrics = self.metrics.clone();
                    let embedding_size = self.embedding_size;

                    report.batches += 1;
                    workers.spawn(async move {
                        ingest_batch(
                            source.as_ref(),
                            sink.as_ref(),
                            buffer.as_ref(),
                            &metrics,
                            batch,
                            embedding_size,
                        )
                        .await
                    });
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    report.upserted += outcome.upserted;
                    report.enqueued += outcome.enqueued;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, category = %e.category(), "Ingestion batch failed");
                    self.metrics.work_failed(e.category());
                    report.batches_failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Ingestion worker panicked");
                    report.batches_failed += 1;
                }
            }
        }

        info!(?report, "Ingestion finished");
        report
    }
}

async fn ingest_batch(
    source: &dyn Source,
    sink: &dyn Sink,
    buffer: &dyn Buffer,
    metrics: &PipelineMetrics,
    batch: Vec<Metadata>,
    embedding_size: u64,
) -> PipelineResult<BatchOutcome> {
    let records = source.fetch_records(&batch).await?;
    let stored = sink.upsert(&records, embedding_size).await?;
    metrics.records_upserted(sink.collection(), stored.len());

    let ids: Vec<String> = stored.iter().map(ToString::to_string).collect();
    let enqueued = buffer.enqueue_batch(&ids).await?;
    metrics.messages_published(buffer.name(), enqueued);

    Ok(BatchOutcome {
        upserted: stored.len(),
        enqueued,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_partition(len: usize, routines: usize) {
        let chunks = partition(len, routines);
        let covered: Vec<usize> = chunks.iter().flat_map(|r| r.clone()).collect();
        assert_eq!(covered, (0..len).collect::<Vec<_>>(), "len={len} routines={routines}");
        assert!(chunks.len() <= routines.max(1));
        assert!(chunks.iter().all(|r| !r.is_empty()));
    }

    #[test]
    fn test_partition_even_split() {
        assert_eq!(partition(10, 2), vec![0..5, 5..10]);
    }

    #[test]
    fn test_partition_uneven_split() {
        assert_eq!(partition(10, 3), vec![0..4, 4..8, 8..10]);
        // ceil(5/4) = 2 leaves the fourth chunk empty.
        assert_eq!(partition(5, 4), vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn test_partition_degenerate() {
        assert!(partition(0, 4).is_empty());
        assert!(partition(4, 0).is_empty());
        assert_eq!(partition(3, 8), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_partition_covers_every_item_once() {
        for len in 0..40 {
            for routines in 1..12 {
                assert_is_partition(len, routines);
            }
        }
    }
}
