//! 🚀 esbulk: the front door. Parses flags, sets up logging, hands a config to the
//! library, prints the summary, and picks the exit code.
//!
//! 🎬 *[narrator voice]* "It all started with `cat dump.ndjson | esbulk -index papers`..."
//! The real work lives in the `esbulk` crate. This file is the receptionist. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::Serialized;
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 📦 Bulk index newline-delimited JSON into Elasticsearch.
#[derive(Debug, Parser)]
#[command(name = "esbulk", version, about)]
struct Cli {
    /// Elasticsearch base URL. Repeat for more than one server.
    #[arg(long = "server")]
    servers: Vec<String>,

    /// Index name.
    #[arg(long)]
    index: Option<String>,

    /// Document type for the action line. Empty string leaves it out.
    #[arg(long = "type")]
    doc_type: Option<String>,

    /// Documents per bulk request.
    #[arg(long = "size")]
    batch_size: Option<usize>,

    /// Number of bulk workers.
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Document field to use as the `_id`. Dotted paths reach into nested objects.
    #[arg(long = "id")]
    id_field: Option<String>,

    /// Ingest pipeline to run documents through.
    #[arg(short = 'p', long)]
    pipeline: Option<String>,

    /// Mapping as inline JSON or a path to a file holding it.
    #[arg(long)]
    mapping: Option<String>,

    /// Delete and recreate the index before indexing.
    #[arg(long)]
    purge: bool,

    /// Drop replicas to 0 and disable refresh while indexing.
    #[arg(short = '0', long = "zero-replica")]
    zero_replica: bool,

    /// Skip lines that are not valid JSON instead of failing.
    #[arg(long = "skipbroken")]
    skip_broken: bool,

    /// Input is gzip compressed.
    #[arg(short = 'z', long = "gzip")]
    gzipped: bool,

    /// refresh_interval to apply once indexing is done.
    #[arg(short = 'r', long = "refresh-interval")]
    refresh_interval: Option<String>,

    /// Basic auth as `username:password`.
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Show a progress spinner and info-level logs.
    #[arg(long)]
    verbose: bool,

    /// TOML config file. Flags win over it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input file. Reads stdin when absent.
    input: Option<PathBuf>,
}

/// 🧩 Only what the user actually typed. Everything else falls through to env, file, defaults.
#[derive(Debug, Default, Serialize)]
struct FlagOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    servers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mapping: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zero_replica: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_broken: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gzipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
}

impl From<Cli> for FlagOverrides {
    fn from(cli: Cli) -> Self {
        // -- a switch that was not passed says nothing, it does not say "false"
        let switch = |on: bool| on.then_some(true);
        FlagOverrides {
            servers: (!cli.servers.is_empty()).then_some(cli.servers),
            index: cli.index,
            doc_type: cli.doc_type,
            batch_size: cli.batch_size,
            workers: cli.workers,
            id_field: cli.id_field,
            pipeline: cli.pipeline,
            mapping: cli.mapping,
            purge: switch(cli.purge),
            zero_replica: switch(cli.zero_replica),
            skip_broken: switch(cli.skip_broken),
            gzipped: switch(cli.gzipped),
            refresh_interval: cli.refresh_interval,
            user: cli.user,
            input: cli.input,
            verbose: switch(cli.verbose),
        }
    }
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose { "info" } else { "warn" }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let config_file = cli.config.take();
    if let Some(path) = &config_file {
        let exists = path.try_exists().with_context(|| {
            format!("💀 could not check whether config file '{}' exists", path.display())
        })?;
        anyhow::ensure!(
            exists,
            "💀 config file '{}' does not exist. Relative paths resolve against the current directory.",
            path.display()
        );
    }

    let app_config = esbulk::load_config_with_overrides(
        config_file.as_deref(),
        Serialized::globals(FlagOverrides::from(cli)),
    )
    .context("💀 could not assemble a configuration from flags, env and file")?;

    // 📡 RUST_LOG wins. Otherwise verbose (from any layer) means info, quiet means warnings.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter(app_config.verbose))),
        )
        .with_writer(std::io::stderr)
        .init();

    match esbulk::run(app_config).await {
        Ok(summary) => {
            println!("{}", summary.to_table());
            Ok(())
        }
        Err(run_error) => {
            println!("{}", run_error.summary.to_table());
            error!("💀 {}: {}", run_error.error.class(), run_error.error);
            if matches!(run_error.error, esbulk::BulkError::Submission { .. }) {
                error!(
                    "🔧 hint: the cluster did not take the batch. Check that it is up and reachable \
                     from here (`curl <server>/_cluster/health`), then try again."
                );
            }
            // 🗑️ Exit with prejudice.
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::Format;

    #[test]
    fn the_one_where_only_typed_flags_override() {
        let cli = Cli::parse_from([
            "esbulk",
            "--index",
            "papers",
            "--server",
            "http://a:9200",
            "--server",
            "http://b:9200",
            "-w",
            "8",
            "--skipbroken",
            "dump.ndjson",
        ]);
        let overrides = FlagOverrides::from(cli);
        assert_eq!(overrides.index.as_deref(), Some("papers"));
        assert_eq!(overrides.workers, Some(8));
        assert_eq!(overrides.skip_broken, Some(true));
        assert_eq!(overrides.purge, None);
        assert_eq!(
            overrides.servers,
            Some(vec!["http://a:9200".to_string(), "http://b:9200".to_string()])
        );
        assert_eq!(overrides.input, Some(PathBuf::from("dump.ndjson")));
    }

    #[test]
    fn the_one_where_flags_beat_the_file_but_leave_the_rest_alone() {
        let overrides = FlagOverrides::from(Cli::parse_from(["esbulk", "--size", "50"]));
        let merged: esbulk::AppConfig = Figment::new()
            .merge(figment::providers::Toml::string(
                "index = \"from-file\"\nbatch_size = 10\nzero_replica = true\n",
            ))
            .merge(Serialized::globals(overrides))
            .extract()
            .expect("💀 merged config");
        assert_eq!(merged.index, "from-file");
        assert_eq!(merged.batch_size, 50);
        assert!(merged.zero_replica);
    }

    #[test]
    fn the_one_where_a_verbose_config_file_turns_the_logs_up() {
        let overrides = FlagOverrides::from(Cli::parse_from(["esbulk", "--index", "papers"]));
        let merged: esbulk::AppConfig = Figment::new()
            .merge(figment::providers::Toml::string("verbose = true\n"))
            .merge(Serialized::globals(overrides))
            .extract()
            .expect("💀 merged config");
        assert!(merged.verbose);
        assert_eq!(default_filter(merged.verbose), "info");
        assert_eq!(default_filter(false), "warn");
    }
}
