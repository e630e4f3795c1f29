//! Background ingestion worker.
//!
//! Uploads are staged to a temp file and handed to a single worker task; the
//! submitter returns as soon as the job is queued. Results (including
//! failures) are published on an outcome channel.

use std::sync::Arc;

use tempfile::TempPath;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::embedder::Embedder;
use crate::generator::Generator;
use crate::pdf::PageExtractor;
use crate::pipeline::{IngestReport, Pipeline};
use crate::store::{DocumentId, DocumentStore, VectorStore};

/// A staged upload waiting to be ingested. The file is removed when the job is
/// dropped, whether or not ingestion succeeded.
#[derive(Debug)]
pub struct IngestJob {
    /// Document row the chunks belong to.
    pub document_id: DocumentId,
    /// Staged PDF.
    pub file: TempPath,
}

/// Result of one background ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// All chunks were stored.
    Completed(IngestReport),
    /// Ingestion stopped; no chunks remain for the document.
    Failed {
        /// Document that failed.
        document_id: DocumentId,
        /// Rendered error.
        error: String,
    },
}

impl IngestOutcome {
    /// Document the outcome refers to.
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::Completed(report) => report.document_id,
            Self::Failed { document_id, .. } => *document_id,
        }
    }
}

/// Reasons a job could not be queued. The staged file is already gone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is at capacity.
    #[error("ingestion queue is full; document {0} was not queued")]
    Full(DocumentId),
    /// The worker has stopped.
    #[error("ingestion worker stopped; document {0} was not queued")]
    Closed(DocumentId),
}

/// Receiving side of the outcome channel.
pub type IngestOutcomes = mpsc::UnboundedReceiver<IngestOutcome>;

/// Cloneable handle for submitting jobs to the worker.
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<IngestJob>,
}

impl IngestQueue {
    /// Starts the worker on the current runtime.
    ///
    /// Returns the submit handle, the outcome receiver and the worker's join
    /// handle; the worker exits once every handle has been dropped and the
    /// queue is drained.
    pub fn spawn<E, S, G, X>(
        pipeline: Arc<Pipeline<E, S, G>>,
        extractor: X,
        capacity: usize,
    ) -> (Self, IngestOutcomes, JoinHandle<()>)
    where
        E: Embedder + 'static,
        S: DocumentStore + VectorStore + 'static,
        G: Generator + 'static,
        X: PageExtractor + Clone + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(pipeline, extractor, receiver, outcome_tx));
        (Self { sender }, outcome_rx, worker)
    }

    /// Queues a job without waiting for capacity.
    pub fn submit(&self, job: IngestJob) -> Result<(), SubmitError> {
        let document_id = job.document_id;
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full(document_id),
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed(document_id),
        })
    }
}

async fn worker_loop<E, S, G, X>(
    pipeline: Arc<Pipeline<E, S, G>>,
    extractor: X,
    mut receiver: mpsc::Receiver<IngestJob>,
    outcomes: mpsc::UnboundedSender<IngestOutcome>,
) where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
    X: PageExtractor + Clone + 'static,
{
    while let Some(job) = receiver.recv().await {
        let IngestJob { document_id, file } = job;
        tracing::info!(document_id, "ingestion started");
        let outcome = match pipeline.ingest_file(document_id, &file, &extractor).await {
            Ok(report) => IngestOutcome::Completed(report),
            Err(err) => {
                tracing::error!(document_id, error = %err, "ingestion failed");
                IngestOutcome::Failed {
                    document_id,
                    error: err.to_string(),
                }
            }
        };
        if let Err(err) = file.close() {
            tracing::warn!(document_id, error = %err, "failed to remove staged upload");
        }
        if outcomes.send(outcome).is_err() {
            tracing::debug!(document_id, "outcome receiver dropped");
        }
    }
    tracing::debug!("ingestion worker stopped");
}
