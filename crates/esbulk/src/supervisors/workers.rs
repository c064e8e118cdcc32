//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all
//! the credit in the sprint retro.
//!
//! Two kinds:
//! - [`SourceWorker`]: one, on a blocking thread. Reads lines, decodes them, batches
//!   them, pushes batches into the bounded queue. Order-preserving, single file.
//! - [`BulkWorker`]: exactly `workers` of them, async. Each pops one batch at a time,
//!   renders it, sends it, reports back.
//!
//! Shared between all of them: the [`Tripwire`]. First fatal error trips it, everyone
//! notices at their next queue push/pop or retry wait, and nobody starts new work.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::BulkError;

mod bulk_worker;
mod source_worker;

pub(crate) use bulk_worker::{BulkWorker, SubmissionOutcome, SubmissionResult};
pub(crate) use source_worker::{SourceCounters, SourceWorker};

/// 🏗️ A background worker, that does work. duh.
pub(crate) trait Worker {
    type Output;
    /// 🚀 Start the worker. Returns a JoinHandle because we trust but verify.
    fn start(self) -> JoinHandle<Self::Output>;
}

/// 🪤 One cancellation token plus a slot for the first fatal error.
///
/// Cheap to clone. Every clone trips the same wire.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tripwire {
    token: CancellationToken,
    first: Arc<Mutex<Option<BulkError>>>,
}

impl Tripwire {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 💥 Record `err` if it is the first, then cancel. Later errors are logged and dropped.
    pub(crate) fn trip(&self, err: BulkError) {
        let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        if first.is_none() {
            error!("🛑 {} stopped the pipeline: {err}", err.class());
            *first = Some(err);
        } else {
            warn!("🤐 another fatal error, the first one already won: {err}");
        }
        drop(first);
        self.token.cancel();
    }

    /// 🎁 Take the first fatal error, if any.
    pub(crate) fn take(&self) -> Option<BulkError> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_the_first_error_gets_the_trophy() {
        let tripwire = Tripwire::new();
        let clone = tripwire.clone();
        assert!(!tripwire.is_tripped());

        clone.trip(BulkError::Decode {
            line: 2,
            reason: "nope".to_string(),
        });
        tripwire.trip(BulkError::Config("second".to_string()));

        assert!(tripwire.is_tripped());
        assert!(clone.token().is_cancelled());
        assert!(matches!(
            tripwire.take(),
            Some(BulkError::Decode { line: 2, .. })
        ));
        assert!(tripwire.take().is_none());
    }
}
