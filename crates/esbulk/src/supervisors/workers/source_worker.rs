//! 🚰 SourceWorker: the single-file stage: read → decode → batch → enqueue.
//!
//! Runs on a blocking thread because the line source is plain `std::io` (gzip included).
//! `send_blocking` on the bounded queue is the backpressure: when the workers fall
//! behind, this thread waits. When the run is cancelled, the next push sees it and
//! the thread goes home.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{Tripwire, Worker};
use crate::batcher::{Batch, Batcher};
use crate::decoder::DocumentDecoder;
use crate::error::BulkError;
use crate::lines::LineSource;

/// 📊 Live counters for the source stage. Written by the source thread, read by the supervisor.
#[derive(Debug, Default)]
pub(crate) struct SourceCounters {
    pub(crate) documents_read: AtomicU64,
    pub(crate) documents_skipped: AtomicU64,
    pub(crate) batches_emitted: AtomicU64,
}

impl SourceCounters {
    pub(crate) fn read(&self) -> u64 {
        self.documents_read.load(Ordering::Relaxed)
    }

    pub(crate) fn skipped(&self) -> u64 {
        self.documents_skipped.load(Ordering::Relaxed)
    }

    pub(crate) fn emitted(&self) -> u64 {
        self.batches_emitted.load(Ordering::Relaxed)
    }
}

pub(crate) struct SourceWorker {
    source: LineSource,
    decoder: DocumentDecoder,
    batcher: Batcher,
    skip_broken: bool,
    tx: Sender<Batch>,
    counters: Arc<SourceCounters>,
    tripwire: Tripwire,
}

impl std::fmt::Debug for SourceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWorker")
            .field("source", &self.source)
            .field("skip_broken", &self.skip_broken)
            .field("counters", &self.counters)
            .finish()
    }
}

impl SourceWorker {
    pub(crate) fn new(
        source: LineSource,
        decoder: DocumentDecoder,
        batcher: Batcher,
        skip_broken: bool,
        tx: Sender<Batch>,
        counters: Arc<SourceCounters>,
        tripwire: Tripwire,
    ) -> Self {
        Self {
            source,
            decoder,
            batcher,
            skip_broken,
            tx,
            counters,
            tripwire,
        }
    }

    /// 🔁 The whole stage, start to finish, on the current (blocking) thread.
    fn run(mut self) {
        loop {
            if self.tripwire.is_tripped() {
                debug!("🛑 SourceWorker: run cancelled, no more reading");
                return;
            }
            let raw = match self.source.next_line() {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(err) => {
                    self.tripwire.trip(BulkError::Io(err));
                    return;
                }
            };
            self.counters.documents_read.fetch_add(1, Ordering::Relaxed);

            match self.decoder.decode(raw) {
                Ok(document) => {
                    if let Some(batch) = self.batcher.push(document) {
                        if !self.enqueue(batch) {
                            return;
                        }
                    }
                }
                Err(failure) if self.skip_broken => {
                    self.counters
                        .documents_skipped
                        .fetch_add(1, Ordering::Relaxed);
                    debug!("🗑️ skipped broken line {}: {}", failure.line, failure.reason);
                }
                Err(failure) => {
                    // 💀 the half-built batch dies here too. nothing after a broken line ships.
                    self.tripwire.trip(BulkError::Decode {
                        line: failure.line,
                        reason: failure.reason,
                    });
                    return;
                }
            }
        }

        let bytes_read = self.source.bytes_read();
        let Self {
            batcher, tx, counters, tripwire, ..
        } = self;
        if let Some(last) = batcher.finish() {
            enqueue_on(&tx, &counters, &tripwire, last);
        }
        debug!(
            "🏁 SourceWorker: input exhausted after {bytes_read} bytes, {} batches emitted",
            counters.emitted()
        );
    }

    fn enqueue(&mut self, batch: Batch) -> bool {
        enqueue_on(&self.tx, &self.counters, &self.tripwire, batch)
    }
}

/// 📬 Push one batch, blocking while the queue is full. `false` = stop producing.
fn enqueue_on(
    tx: &Sender<Batch>,
    counters: &SourceCounters,
    tripwire: &Tripwire,
    batch: Batch,
) -> bool {
    if tripwire.is_tripped() {
        return false;
    }
    let sequence = batch.sequence;
    let size = batch.len();
    match tx.send_blocking(batch) {
        Ok(()) => {
            counters.batches_emitted.fetch_add(1, Ordering::Relaxed);
            trace!("📬 batch #{sequence} ({size} docs) queued");
            true
        }
        Err(_) => {
            // -- every worker is gone. nobody left to hand batches to.
            debug!("🚪 SourceWorker: queue closed, batch #{sequence} not queued");
            false
        }
    }
}

impl Worker for SourceWorker {
    type Output = ();

    fn start(self) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(
        input: &str,
        batch_size: usize,
        skip_broken: bool,
        capacity: usize,
    ) -> (
        SourceWorker,
        async_channel::Receiver<Batch>,
        Arc<SourceCounters>,
        Tripwire,
    ) {
        let (tx, rx) = async_channel::bounded(capacity);
        let counters = Arc::new(SourceCounters::default());
        let tripwire = Tripwire::new();
        let worker = SourceWorker::new(
            LineSource::new(std::io::Cursor::new(input.as_bytes().to_vec()), false),
            DocumentDecoder::new(None),
            Batcher::new(batch_size),
            skip_broken,
            tx,
            counters.clone(),
            tripwire.clone(),
        );
        (worker, rx, counters, tripwire)
    }

    fn drain(rx: &async_channel::Receiver<Batch>) -> Vec<Batch> {
        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        batches
    }

    #[tokio::test]
    async fn the_one_where_three_lines_make_two_batches() {
        let (worker, rx, counters, tripwire) = worker("{\"a\":1}\n{\"a\":2}\n{\"a\":3}", 2, false, 8);
        worker.start().await.expect("💀 source thread");

        let batches = drain(&rx);
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(counters.read(), 3);
        assert_eq!(counters.emitted(), 2);
        assert!(tripwire.take().is_none());
    }

    #[tokio::test]
    async fn the_one_where_skip_broken_drops_exactly_the_broken_line() {
        let (worker, rx, counters, tripwire) =
            worker("{\"a\":1}\nnot-json\n{\"a\":3}\n", 2, true, 8);
        worker.start().await.expect("💀 source thread");

        let batches = drain(&rx);
        assert_eq!(batches.len(), 1);
        let lines: Vec<u64> = batches[0].documents.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![1, 3]);
        assert_eq!(counters.skipped(), 1);
        assert!(tripwire.take().is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_broken_line_stops_everything_after_it() {
        let (worker, rx, counters, tripwire) =
            worker("{\"a\":1}\nnot-json\n{\"a\":3}\n", 2, false, 8);
        worker.start().await.expect("💀 source thread");

        assert!(drain(&rx).is_empty());
        assert_eq!(counters.emitted(), 0);
        assert!(matches!(tripwire.take(), Some(BulkError::Decode { line: 2, .. })));
    }

    #[tokio::test]
    async fn the_one_where_a_closed_queue_sends_the_reader_home() {
        let (worker, rx, counters, _tripwire) = worker("{}\n{}\n{}\n{}\n", 1, false, 1);
        drop(rx);
        worker.start().await.expect("💀 source thread");
        assert_eq!(counters.emitted(), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_full_queue_holds_the_reader_until_the_run_gives_up() {
        let (worker, rx, counters, tripwire) = worker("{}\n{}\n{}\n{}\n", 1, false, 1);
        let handle = worker.start();

        // ⏳ batch #1 fills the queue, batch #2 waits for room that never comes
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert_eq!(counters.emitted(), 1);
        assert_eq!(rx.len(), 1);

        tripwire.trip(BulkError::Config("workers gave up".to_string()));
        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("💀 the reader should let go once the queue closes")
            .expect("💀 source thread");

        assert_eq!(counters.emitted(), 1);
        assert_eq!(counters.read(), 2);
        assert!(matches!(tripwire.take(), Some(BulkError::Config(_))));
    }
}
