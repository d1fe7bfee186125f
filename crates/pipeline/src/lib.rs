//! Concurrent ingestion: extraction fans out per document, graph mutation
//! funnels through a single consumer.

pub mod config;
pub mod metrics;
pub mod retry;

pub use config::{ConcurrencyConfig, ErrorBudgetConfig, OperationMode, PipelineConfig, RetryConfig};
pub use metrics::{ErrorKind, RunMetrics, RunSummary, TimedOperation};
pub use retry::RetryPolicy;

use extract::{ChunkInput, ExtractionBatch, ExtractionClient, ExtractionError};
use graph::KnowledgeGraph;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("error budget exceeded: {failures} of {attempted} items failed")]
    ErrorBudgetExceeded {
        failures: usize,
        attempted: usize,
        summary: Box<RunSummary>,
    },
}

impl PipelineError {
    pub fn summary(&self) -> &RunSummary {
        match self {
            PipelineError::ErrorBudgetExceeded { summary, .. } => summary,
        }
    }
}

/// Drop in-range mentions and relationships below `min_confidence`.
/// Returns the kept batch and how many items were dropped.
pub fn filter_batch(batch: ExtractionBatch, min_confidence: f64) -> (ExtractionBatch, usize) {
    let below = |confidence: f64| (0.0..min_confidence).contains(&confidence);
    let before = batch.entities.len() + batch.relationships.len();

    let kept = ExtractionBatch {
        entities: batch
            .entities
            .into_iter()
            .filter(|mention| !below(mention.confidence))
            .collect(),
        relationships: batch
            .relationships
            .into_iter()
            .filter(|relationship| !below(relationship.confidence))
            .collect(),
    };
    let dropped = before - kept.entities.len() - kept.relationships.len();
    (kept, dropped)
}

struct ChunkOutcome {
    chunk: ChunkInput,
    result: Result<Value, ExtractionError>,
}

pub struct IngestionPipeline {
    graph: Arc<Mutex<KnowledgeGraph>>,
    client: Arc<dyn ExtractionClient>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        graph: Arc<Mutex<KnowledgeGraph>>,
        client: Arc<dyn ExtractionClient>,
        config: PipelineConfig,
    ) -> Self {
        Self { graph, client, config }
    }

    pub fn graph(&self) -> Arc<Mutex<KnowledgeGraph>> {
        self.graph.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, chunks: Vec<ChunkInput>) -> Result<RunSummary, PipelineError> {
        self.run_with_cancel(chunks, CancellationToken::new()).await
    }

    /// Extract and apply `chunks`. Cancelling `cancel` stops dispatch; the
    /// consumer finishes the batch in hand and everything applied so far stays.
    pub async fn run_with_cancel(
        &self,
        chunks: Vec<ChunkInput>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let metrics = RunMetrics::new(chunks.len());
        let documents = group_by_document(chunks);
        info!(
            run_id = %metrics.run_id(),
            documents = documents.len(),
            max_concurrent = self.config.concurrency.max_concurrent_extractions,
            "Starting ingestion run"
        );

        let workers = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(
            self.config.concurrency.max_concurrent_extractions.max(1),
        ));
        let (tx, mut rx) = mpsc::channel::<ChunkOutcome>(self.config.concurrency.channel_capacity.max(1));
        let policy = self.config.retry_policy();
        let mut tasks = JoinSet::new();

        for (document_id, document_chunks) in documents {
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let policy = policy.clone();
            let token = workers.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = token.cancelled() => return,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                debug!(document_id = %document_id, chunks = document_chunks.len(), "Extracting document");

                for chunk in document_chunks {
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        result = policy.retry("extract", || client.extract(&chunk)) => result,
                    };
                    if tx.send(ChunkOutcome { chunk, result }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut breach = None;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    metrics.mark_cancelled();
                    break;
                }
                outcome = rx.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => break,
                },
            };

            {
                let mut graph = self.graph.lock().await;
                match outcome.result {
                    Ok(value) => self.apply_value(&mut graph, &metrics, &outcome.chunk, &value),
                    Err(error) => {
                        warn!(
                            run_id = %metrics.run_id(),
                            document_id = %outcome.chunk.document_id,
                            page = ?outcome.chunk.page_number,
                            chunk_id = %outcome.chunk.chunk_id(),
                            %error,
                            "Chunk extraction failed"
                        );
                        metrics.record_chunk_failure(ErrorKind::from(&error));
                    }
                }
            }

            if let Some(exceeded) = metrics.budget_exceeded(&self.config.budget) {
                breach = Some(exceeded);
                break;
            }
        }

        workers.cancel();
        drop(rx);
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(run_id = %metrics.run_id(), %error, "Extraction worker aborted");
            }
        }

        self.finish(metrics, breach)
    }

    /// Apply already-extracted responses in order, without calling the extractor.
    pub async fn apply_batches(&self, batches: Vec<(ChunkInput, Value)>) -> Result<RunSummary, PipelineError> {
        let metrics = RunMetrics::new(batches.len());
        let mut breach = None;
        {
            let mut graph = self.graph.lock().await;
            for (chunk, value) in &batches {
                self.apply_value(&mut graph, &metrics, chunk, value);
                if let Some(exceeded) = metrics.budget_exceeded(&self.config.budget) {
                    breach = Some(exceeded);
                    break;
                }
            }
        }
        self.finish(metrics, breach)
    }

    fn apply_value(&self, graph: &mut KnowledgeGraph, metrics: &RunMetrics, chunk: &ChunkInput, value: &Value) {
        let validated = match ExtractionBatch::from_value(value) {
            Ok(validated) => validated,
            Err(error) => {
                warn!(
                    run_id = %metrics.run_id(),
                    document_id = %chunk.document_id,
                    chunk_id = %chunk.chunk_id(),
                    %error,
                    "Discarding malformed extraction response"
                );
                metrics.record_chunk_failure(ErrorKind::MalformedMention);
                return;
            }
        };

        for rejected in &validated.rejected {
            warn!(document_id = %chunk.document_id, error = %rejected, "Rejected extracted item");
        }
        metrics.record_rejected(&validated.rejected);

        let (batch, filtered) = filter_batch(validated.batch, self.config.min_confidence);
        metrics.record_filtered(filtered);

        let attempted = batch.entities.len() + batch.relationships.len();
        let report = graph.ingest_batch(chunk, &batch);
        metrics.record_batch(attempted, &report);
    }

    fn finish(&self, metrics: RunMetrics, breach: Option<(usize, usize)>) -> Result<RunSummary, PipelineError> {
        let summary = metrics.summary();
        if let Some((failures, attempted)) = breach {
            warn!(
                run_id = %summary.run_id,
                failures,
                attempted,
                max_failure_rate = self.config.budget.max_failure_rate,
                "Error budget exceeded, run aborted"
            );
            return Err(PipelineError::ErrorBudgetExceeded {
                failures,
                attempted,
                summary: Box::new(summary),
            });
        }

        info!(
            run_id = %summary.run_id,
            chunks_succeeded = summary.chunks_succeeded,
            chunks_failed = summary.chunks_failed,
            entities_created = summary.entities_created,
            entities_merged = summary.entities_merged,
            relationships_created = summary.relationships_created,
            errors = summary.total_errors(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed_ms,
            "Ingestion run finished"
        );
        Ok(summary)
    }
}

/// Group chunks by document, keeping first-seen document order and
/// submission order within each document.
fn group_by_document(chunks: Vec<ChunkInput>) -> Vec<(String, Vec<ChunkInput>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<ChunkInput>)> = Vec::new();
    for chunk in chunks {
        match index.get(&chunk.document_id) {
            Some(&slot) => groups[slot].1.push(chunk),
            None => {
                index.insert(chunk.document_id.clone(), groups.len());
                groups.push((chunk.document_id.clone(), vec![chunk]));
            }
        }
    }
    groups
}
