//! 📦 BulkWorker: pops a batch, renders it, ships it, reports how it went.
//!
//! One batch in flight per worker, so `workers` is also the in-flight ceiling.
//! The worker never decides whether a failure is fatal for the run; it just says
//! what happened and the Supervisor pulls the tripwire.

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Tripwire, Worker};
use crate::app_config::{Configuration, ItemErrorPolicy};
use crate::backends::{BulkTally, CallError, ElasticsearchClient, excerpt};
use crate::batcher::{Batch, render_bulk_payload};
use crate::error::BulkError;

/// 🧾 One batch, one verdict.
#[derive(Debug)]
pub(crate) struct SubmissionResult {
    pub(crate) sequence: u64,
    pub(crate) documents: u64,
    pub(crate) attempts: u32,
    pub(crate) outcome: SubmissionOutcome,
}

#[derive(Debug)]
pub(crate) enum SubmissionOutcome {
    /// 2xx. `item_errors` of the documents were still rejected one by one.
    Indexed { item_errors: u64 },
    /// Fatal for the run.
    Failed(BulkError),
    /// The run was cancelled while this batch waited for a retry.
    Abandoned,
}

pub(crate) struct BulkWorker {
    id: usize,
    rx: Receiver<Batch>,
    results: Sender<SubmissionResult>,
    client: Arc<ElasticsearchClient>,
    configuration: Arc<Configuration>,
    tripwire: Tripwire,
}

impl BulkWorker {
    pub(crate) fn new(
        id: usize,
        rx: Receiver<Batch>,
        results: Sender<SubmissionResult>,
        client: Arc<ElasticsearchClient>,
        configuration: Arc<Configuration>,
        tripwire: Tripwire,
    ) -> Self {
        Self {
            id,
            rx,
            results,
            client,
            configuration,
            tripwire,
        }
    }

    async fn run(self) {
        let token = self.tripwire.token().clone();
        loop {
            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("🛑 BulkWorker {}: run cancelled", self.id);
                    break;
                }
                received = self.rx.recv() => match received {
                    Ok(batch) => batch,
                    Err(_) => {
                        debug!("🏁 BulkWorker {}: queue drained and closed", self.id);
                        break;
                    }
                },
            };
            let result = self.submit(batch).await;
            if self.results.send(result).await.is_err() {
                break;
            }
        }
    }

    async fn submit(&self, batch: Batch) -> SubmissionResult {
        let sequence = batch.sequence;
        let documents = batch.len() as u64;
        let rendered = render_bulk_payload(
            &batch,
            &self.configuration.index,
            &self.configuration.doc_type,
        );
        drop(batch);
        let payload = match rendered {
            Ok(payload) => payload,
            Err(err) => {
                // 🚫 nothing went on the wire
                return SubmissionResult {
                    sequence,
                    documents,
                    attempts: 0,
                    outcome: SubmissionOutcome::Failed(BulkError::Submission {
                        batch: sequence,
                        attempts: 0,
                        reason: format!("could not render the bulk payload: {err}"),
                    }),
                };
            }
        };
        trace!(
            "📡 BulkWorker {}: batch #{sequence}, {documents} docs, {} bytes",
            self.id,
            payload.len()
        );

        let reply = self
            .client
            .bulk(
                payload,
                self.configuration.pipeline.as_deref(),
                self.tripwire.token(),
            )
            .await;

        let (attempts, outcome) = match reply {
            Ok(reply) if reply.is_success() => {
                let tally = BulkTally::from_response_body(&reply.body).unwrap_or_else(|| {
                    debug!("🤷 batch #{sequence}: 2xx body is not a bulk response, trusting the status");
                    BulkTally {
                        items: documents,
                        ..BulkTally::default()
                    }
                });
                (reply.attempts, self.judge_items(sequence, tally))
            }
            Ok(reply) => (
                reply.attempts,
                SubmissionOutcome::Failed(BulkError::Submission {
                    batch: sequence,
                    attempts: reply.attempts,
                    reason: format!(
                        "{} answered HTTP {}: {}",
                        reply.server,
                        reply.status,
                        excerpt(&reply.body)
                    ),
                }),
            ),
            Err(err) => {
                let attempts = err.attempts();
                match err {
                    CallError::Cancelled { .. } => (attempts, SubmissionOutcome::Abandoned),
                    CallError::Failed { reason, .. } => (
                        attempts,
                        SubmissionOutcome::Failed(BulkError::Submission {
                            batch: sequence,
                            attempts,
                            reason,
                        }),
                    ),
                }
            }
        };

        SubmissionResult {
            sequence,
            documents,
            attempts,
            outcome,
        }
    }

    fn judge_items(&self, sequence: u64, tally: BulkTally) -> SubmissionOutcome {
        if tally.failed == 0 {
            return SubmissionOutcome::Indexed { item_errors: 0 };
        }
        let first_reason = tally
            .first_error
            .unwrap_or_else(|| "no reason given".to_string());
        match self.configuration.item_errors {
            ItemErrorPolicy::Count => {
                warn!(
                    "⚠️ batch #{sequence}: {} of {} item(s) rejected, first: {first_reason}",
                    tally.failed, tally.items
                );
                SubmissionOutcome::Indexed {
                    item_errors: tally.failed,
                }
            }
            ItemErrorPolicy::Fail => SubmissionOutcome::Failed(BulkError::ItemErrors {
                batch: sequence,
                failed: tally.failed,
                first_reason,
            }),
        }
    }
}

impl Worker for BulkWorker {
    type Output = ();

    fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
