//! 📦 esbulk: newline-delimited JSON in, Elasticsearch `_bulk` requests out.
//!
//! 🎬 *[narrator voice]* "One file. Millions of lines. A cluster that may or may not
//! be awake. And a batch size someone picked in 2017 and never touched again." 🦆
//!
//! The flow, top to bottom:
//! 1. 🔧 [`AppConfig`] gets validated into a frozen [`Configuration`].
//! 2. 🏗️ The index is prepared: purge or create, mapping, zero-replica mode.
//! 3. 🚰 One reader stage turns lines into documents into batches.
//! 4. 📡 A fixed pool of bulk workers ships the batches, retrying transient failures.
//! 5. 🧹 The index settings are put back and the index is refreshed.
//! 6. 🧾 You get a [`RunSummary`], or a [`RunError`] carrying the first fatal error
//!    and the partial summary.

use std::fs::File;
use std::io::Read;

use tracing::info;

pub mod app_config;
mod backends;
pub mod backoff;
pub mod batcher;
pub mod decoder;
pub mod endpoints;
pub mod error;
mod lifecycle;
pub mod lines;
mod progress;
pub mod summary;
mod supervisors;

pub use app_config::{AppConfig, Configuration, load_config, load_config_with_overrides};
pub use batcher::{Batch, Batcher, render_bulk_payload};
pub use decoder::{DecodeFailure, Document, DocumentDecoder};
pub use error::{BulkError, RunError};
pub use lines::{LineSource, RawLine};
pub use summary::RunSummary;

use crate::supervisors::Supervisor;

/// 🚀 Run one bulk load from the configured input file, or stdin when there is none.
pub async fn run(app_config: AppConfig) -> Result<RunSummary, RunError> {
    let configuration = app_config.into_configuration().map_err(RunError::from)?;
    match configuration.input.clone() {
        Some(path) => {
            let file = File::open(&path).map_err(|err| {
                RunError::from(BulkError::Io(std::io::Error::new(
                    err.kind(),
                    format!("cannot open input '{}': {err}", path.display()),
                )))
            })?;
            run_with_reader(configuration, file).await
        }
        None => run_with_reader(configuration, std::io::stdin()).await,
    }
}

/// 🚀 Run one bulk load from any reader. Gzip, if configured, is undone here too.
pub async fn run_with_reader<R>(configuration: Configuration, input: R) -> Result<RunSummary, RunError>
where
    R: Read + Send + 'static,
{
    info!(
        "🚀 bulk loading into '{}' on {} server(s): batch size {}, {} workers",
        configuration.index,
        configuration.servers.len(),
        configuration.batch_size,
        configuration.workers
    );
    let supervisor = Supervisor::new(configuration).map_err(RunError::from)?;
    supervisor.run(input).await
}
