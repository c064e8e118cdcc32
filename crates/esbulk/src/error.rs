//! 💀 Errors: the taxonomy of things that go wrong between a file and a cluster.
//!
//! Every fatal outcome of a run is one of these. The supervisor keeps the FIRST one
//! it sees and hands it back wrapped in a [`RunError`], together with whatever the
//! counters managed to tally before the lights went out. 🦆

use thiserror::Error;

use crate::summary::RunSummary;

/// 🏷️ Every way a bulk load can die, with a name tag on each.
#[derive(Debug, Error)]
pub enum BulkError {
    /// 🔧 Bad configuration. Caught before a single byte leaves the process.
    #[error("💀 configuration error: {0}")]
    Config(String),

    /// 📂 The input stream broke: read failure, or a gzip stream with a sense of humor.
    #[error("💀 input stream error: {0}")]
    Io(#[from] std::io::Error),

    /// 🧩 A line that is not JSON, and skip-broken was not there to save it.
    #[error("💀 line {line} is not valid JSON: {reason}")]
    Decode { line: u64, reason: String },

    /// ⚙️ An index lifecycle call (settings, purge, mapping, refresh) failed.
    #[error("💀 index settings call '{operation}' failed: {reason}")]
    Settings { operation: String, reason: String },

    /// 📡 A bulk request ran out of retries, or hit a non-transient status.
    #[error("💀 bulk submission of batch #{batch} failed after {attempts} attempt(s): {reason}")]
    Submission {
        batch: u64,
        attempts: u32,
        reason: String,
    },

    /// 🧾 The bulk request landed, but items inside it were rejected, and the
    /// item-error policy says that is fatal.
    #[error("💀 batch #{batch} was accepted but {failed} item(s) were rejected: {first_reason}")]
    ItemErrors {
        batch: u64,
        failed: u64,
        first_reason: String,
    },
}

impl BulkError {
    /// 🏷️ Short class name, for logs and the summary table.
    pub fn class(&self) -> &'static str {
        match self {
            BulkError::Config(_) => "ConfigError",
            BulkError::Io(_) => "IOError",
            BulkError::Decode { .. } => "DecodeError",
            BulkError::Settings { .. } => "SettingsError",
            BulkError::Submission { .. } => "SubmissionError",
            BulkError::ItemErrors { .. } => "ItemErrors",
        }
    }
}

/// 🪦 A run that ended badly: the first fatal error plus the partial counts.
///
/// The counts are still worth printing. "We got 9 out of 10 million in" is a very
/// different 3am than "we got nothing in".
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunError {
    #[source]
    pub error: BulkError,
    pub summary: RunSummary,
}

impl From<BulkError> for RunError {
    /// 🔧 For failures before anything ran: the summary is all zeros.
    fn from(error: BulkError) -> Self {
        RunError {
            error,
            summary: RunSummary::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_every_error_knows_its_class_name() {
        let decode = BulkError::Decode {
            line: 2,
            reason: "expected value".to_string(),
        };
        assert_eq!(decode.class(), "DecodeError");
        assert!(decode.to_string().contains("line 2"));

        let io = BulkError::from(std::io::Error::other("gzip said no"));
        assert_eq!(io.class(), "IOError");
    }

    #[test]
    fn the_one_where_the_run_error_displays_the_inner_error() {
        let run_error = RunError {
            error: BulkError::Config("index name required".to_string()),
            summary: RunSummary::default(),
        };
        assert!(run_error.to_string().contains("index name required"));
        assert!(std::error::Error::source(&run_error).is_some());
    }
}
