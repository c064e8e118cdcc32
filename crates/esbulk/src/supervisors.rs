//! 🎬 *[a single reader thread stares at a mountain of NDJSON]*
//! 🎬 *[eight bulk workers stretch in the corner]*
//! 🎬 "This time... it's batched." 🦆
//!
//! 📦 The Supervisor: prepares the index, wires the reader to the bulk workers through
//! one bounded queue, tallies every verdict, cleans up the index, and hands back
//! a [`RunSummary`] or the first thing that went fatally wrong.
//!
//! ⚠️ The workers stay private. The Supervisor is the only one allowed to talk to them.
//! 🔒 It is also the only one allowed to write the summary. One writer, zero races.

mod workers;

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::app_config::Configuration;
use crate::backends::ElasticsearchClient;
use crate::batcher::Batcher;
use crate::decoder::DocumentDecoder;
use crate::error::{BulkError, RunError};
use crate::lifecycle::{IndexLifecycle, PreparedIndex};
use crate::lines::LineSource;
use crate::progress::{ProgressMetrics, format_number};
use crate::summary::RunSummary;
use workers::{
    BulkWorker, SourceCounters, SourceWorker, SubmissionOutcome, SubmissionResult, Tripwire,
    Worker,
};

/// 🧑‍💼 Runs one bulk load, start to finish.
#[derive(Debug)]
pub(crate) struct Supervisor {
    configuration: Arc<Configuration>,
    client: Arc<ElasticsearchClient>,
}

impl Supervisor {
    /// 🏗️ No network traffic yet, just a client with its timeouts set.
    pub(crate) fn new(configuration: Configuration) -> Result<Self, BulkError> {
        let client = ElasticsearchClient::new(&configuration)?;
        Ok(Self {
            configuration: Arc::new(configuration),
            client: Arc::new(client),
        })
    }

    /// 🚀 Prepare, transfer, clean up, report.
    pub(crate) async fn run<R>(&self, input: R) -> Result<RunSummary, RunError>
    where
        R: Read + Send + 'static,
    {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let lifecycle = IndexLifecycle::new(&self.client, &self.configuration);

        let mut prepared = PreparedIndex::default();
        if let Err(error) = lifecycle.prepare(&mut prepared).await {
            error!("💀 index preparation failed, nothing was indexed: {error}");
            if prepared.touched() {
                summary.post_run_errors = lifecycle.finish(&prepared).await;
            }
            summary.elapsed = started.elapsed();
            return Err(RunError { error, summary });
        }

        let tripwire = Tripwire::new();
        self.transfer(input, &tripwire, &mut summary).await;

        summary.post_run_errors = lifecycle.finish(&prepared).await;
        summary.elapsed = started.elapsed();

        match tripwire.take() {
            Some(error) => Err(RunError { error, summary }),
            None => {
                summary.success = true;
                info!(
                    "📦 {} docs indexed in {:.3}s at {:.1} docs/s with {} workers",
                    format_number(summary.documents_indexed),
                    summary.elapsed.as_secs_f64(),
                    summary.docs_per_sec(),
                    self.configuration.workers
                );
                Ok(summary)
            }
        }
    }

    /// 🔀 The pipeline proper. Returns once every stage has stopped.
    async fn transfer<R>(&self, input: R, tripwire: &Tripwire, summary: &mut RunSummary)
    where
        R: Read + Send + 'static,
    {
        let configuration = &self.configuration;
        let (batch_tx, batch_rx) = async_channel::bounded(configuration.queue_capacity);
        let (result_tx, result_rx) = async_channel::unbounded::<SubmissionResult>();
        let counters = Arc::new(SourceCounters::default());

        let source = SourceWorker::new(
            LineSource::new(input, configuration.gzipped),
            DocumentDecoder::new(configuration.id_field.as_deref()),
            Batcher::new(configuration.batch_size),
            configuration.skip_broken,
            batch_tx,
            counters.clone(),
            tripwire.clone(),
        )
        .start();

        let bulk_workers: Vec<_> = (0..configuration.workers)
            .map(|id| {
                BulkWorker::new(
                    id,
                    batch_rx.clone(),
                    result_tx.clone(),
                    self.client.clone(),
                    self.configuration.clone(),
                    tripwire.clone(),
                )
                .start()
            })
            .collect();
        // -- the workers hold the only receivers and senders now. when they go, the channels close.
        drop(batch_rx);
        drop(result_tx);
        debug!(
            "🧵 {} bulk workers started, queue capacity {}",
            configuration.workers, configuration.queue_capacity
        );

        let progress = ProgressMetrics::new(configuration.verbose);
        while let Ok(result) = result_rx.recv().await {
            record(summary, result, tripwire);
            progress.update(summary.documents_indexed, counters.skipped());
        }
        progress.finish();

        for outcome in futures::future::join_all(bulk_workers).await {
            if let Err(join_error) = outcome {
                tripwire.trip(BulkError::Submission {
                    batch: 0,
                    attempts: 0,
                    reason: format!("a bulk worker died: {join_error}"),
                });
            }
        }
        if let Err(join_error) = source.await {
            tripwire.trip(BulkError::Io(std::io::Error::other(format!(
                "the reader thread died: {join_error}"
            ))));
        }

        summary.documents_read = counters.read();
        summary.documents_skipped = counters.skipped();
        debug!(
            "🏁 transfer done: {} read, {} skipped, {} batches queued, {} submitted",
            counters.read(),
            counters.skipped(),
            counters.emitted(),
            summary.batches_submitted
        );
    }
}

/// 🧾 Fold one verdict into the summary. Fatal verdicts pull the tripwire.
fn record(summary: &mut RunSummary, result: SubmissionResult, tripwire: &Tripwire) {
    summary.batches_submitted += 1;
    summary.retries += u64::from(result.attempts.saturating_sub(1));
    match result.outcome {
        SubmissionOutcome::Indexed { item_errors } => {
            summary.documents_indexed += result.documents;
            summary.item_errors += item_errors;
            debug!(
                "✅ batch #{} done: {} docs, {} attempt(s)",
                result.sequence, result.documents, result.attempts
            );
        }
        SubmissionOutcome::Failed(error) => {
            summary.batches_failed += 1;
            tripwire.trip(error);
        }
        SubmissionOutcome::Abandoned => {
            summary.batches_failed += 1;
            debug!("🛑 batch #{} abandoned mid-retry", result.sequence);
        }
    }
}
