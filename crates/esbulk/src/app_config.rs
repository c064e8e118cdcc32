//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, now with flags on top.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." said every developer at 3am 🦆
//!
//! 🏗️ Two shapes live here:
//! - [`AppConfig`]: the raw, layered, deserialized input. Defaults, then `ESBULK_*` env vars,
//!   then an optional TOML file, then whatever the CLI passed explicitly.
//! - [`Configuration`]: the validated, immutable value the pipeline actually runs on.
//!   Built exactly once by [`AppConfig::into_configuration`]. Read-only afterwards.
//!   Shared behind an `Arc`. Nobody gets to flip a global flag mid-run. Not even Kevin.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment, Provider,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backoff::RetryPolicy;
use crate::endpoints::EndpointSelection;
use crate::error::BulkError;

const DEFAULT_SERVER: &str = "http://localhost:9200";

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Base URLs of the cluster nodes. Each batch picks one.
    #[serde(default = "default_servers", alias = "server")]
    pub servers: Vec<String>,
    /// 🎯 Target index. Required. An empty string fails validation.
    #[serde(default)]
    pub index: String,
    /// 🏷️ The `_type` label. Empty string = leave `_type` out of the action line.
    #[serde(default = "default_doc_type", alias = "type")]
    pub doc_type: String,
    #[serde(default = "default_batch_size", alias = "size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 🔑 Field holding the document id. Dotted paths reach into nested objects.
    #[serde(default, alias = "id")]
    pub id_field: Option<String>,
    /// 🧪 Ingest pipeline name, appended as `?pipeline=`.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// 🗺️ Mapping: either inline JSON, or a path to a file with the JSON in it.
    #[serde(default)]
    pub mapping: Option<String>,
    #[serde(default)]
    pub purge: bool,
    #[serde(default)]
    pub zero_replica: bool,
    #[serde(default, alias = "skipbroken")]
    pub skip_broken: bool,
    #[serde(default)]
    pub gzipped: bool,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    /// 🔒 `username:password`, like curl -u. Split on the first colon.
    #[serde(default)]
    pub user: Option<String>,
    /// 📂 Input file. None = stdin.
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// 📊 Show the live progress spinner.
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            index: String::new(),
            doc_type: default_doc_type(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            id_field: None,
            pipeline: None,
            mapping: None,
            purge: false,
            zero_replica: false,
            skip_broken: false,
            gzipped: false,
            refresh_interval: default_refresh_interval(),
            user: None,
            input: None,
            verbose: false,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// 🧾 What to do when a 2xx bulk response still reports rejected items.
///
/// `Count` keeps going and tallies them. `Fail` treats the first such batch as fatal.
/// Neither is "right". Pick the one your data deserves.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorPolicy {
    #[default]
    Count,
    Fail,
}

/// ⚙️ The knobs that shape the pipeline itself: queue depth, retries, timeouts.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📬 Bounded work queue depth. Unset = twice the worker count.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// 🔄 Total attempts per HTTP call, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// ⏱️ Per attempt, never per run.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub endpoint_selection: EndpointSelection,
    #[serde(default)]
    pub item_errors: ItemErrorPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            endpoint_selection: EndpointSelection::default(),
            item_errors: ItemErrorPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

fn default_servers() -> Vec<String> {
    vec![DEFAULT_SERVER.to_string()]
}

fn default_doc_type() -> String {
    "default".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    // -- 🧵 one worker per core. the cores did not consent.
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_refresh_interval() -> String {
    "1s".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// 🔒 Basic-auth credentials. The password stays out of Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// 🔪 Split `username:password` on the FIRST colon. Passwords may contain colons.
    /// Usernames may not be empty. No colon at all is a hard no.
    pub fn parse(raw: &str) -> Result<Self, BulkError> {
        match raw.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Self {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(BulkError::Config(
                "http basic auth syntax is: username:password".to_string(),
            )),
        }
    }
}

/// 🧊 The validated, frozen configuration. Built once, read by everyone, written by no one.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub servers: Vec<String>,
    pub index: String,
    pub doc_type: String,
    pub batch_size: usize,
    pub workers: usize,
    pub id_field: Option<String>,
    pub pipeline: Option<String>,
    /// 🗺️ Already resolved: file contents if `mapping` named a file, the inline string otherwise.
    pub mapping: Option<String>,
    pub purge: bool,
    pub zero_replica: bool,
    pub skip_broken: bool,
    pub gzipped: bool,
    pub refresh_interval: String,
    pub credentials: Option<Credentials>,
    pub input: Option<PathBuf>,
    pub verbose: bool,
    pub queue_capacity: usize,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub endpoint_selection: EndpointSelection,
    pub item_errors: ItemErrorPolicy,
}

impl AppConfig {
    /// ✅ Validate everything that can be validated without touching the network,
    /// and freeze the result. Every failure here is a `ConfigError`.
    pub fn into_configuration(self) -> Result<Configuration, BulkError> {
        let index = self.index.trim().to_string();
        if index.is_empty() {
            return Err(BulkError::Config("index name required".to_string()));
        }
        if self.batch_size == 0 {
            return Err(BulkError::Config("batch size must be greater than zero".to_string()));
        }
        if self.workers == 0 {
            return Err(BulkError::Config("need at least one worker".to_string()));
        }
        if self.runtime.max_attempts == 0 {
            return Err(BulkError::Config(
                "runtime.max_attempts must be at least 1".to_string(),
            ));
        }

        // 📡 Trailing slashes out. `http://host//_bulk` is a URL only a mother could love.
        let mut servers: Vec<String> = self
            .servers
            .iter()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if servers.is_empty() {
            servers = default_servers();
        }
        if let Some(bad) = servers
            .iter()
            .find(|s| !(s.starts_with("http://") || s.starts_with("https://")))
        {
            return Err(BulkError::Config(format!(
                "server '{bad}' must start with http:// or https://"
            )));
        }

        let credentials = match self.user.as_deref() {
            Some(raw) if !raw.is_empty() => Some(Credentials::parse(raw)?),
            _ => None,
        };

        let mapping = match self.mapping.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(resolve_mapping(raw)?),
            _ => None,
        };

        let queue_capacity = self
            .runtime
            .queue_capacity
            .filter(|c| *c > 0)
            .unwrap_or(self.workers * 2);

        Ok(Configuration {
            servers,
            index,
            doc_type: self.doc_type,
            batch_size: self.batch_size,
            workers: self.workers,
            id_field: self.id_field.filter(|f| !f.is_empty()),
            pipeline: self.pipeline.filter(|p| !p.is_empty()),
            mapping,
            purge: self.purge,
            zero_replica: self.zero_replica,
            skip_broken: self.skip_broken,
            gzipped: self.gzipped,
            refresh_interval: self.refresh_interval,
            credentials,
            input: self.input,
            verbose: self.verbose,
            queue_capacity,
            retry_policy: self.runtime.retry_policy(),
            request_timeout: Duration::from_secs(self.runtime.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.runtime.connect_timeout_secs),
            endpoint_selection: self.runtime.endpoint_selection,
            item_errors: self.runtime.item_errors,
        })
    }
}

/// 🗺️ A mapping is a filename if a file by that name exists, otherwise it is the mapping itself.
fn resolve_mapping(raw: &str) -> Result<String, BulkError> {
    let candidate = Path::new(raw);
    if candidate.is_file() {
        std::fs::read_to_string(candidate).map_err(|err| {
            BulkError::Config(format!(
                "could not read mapping file '{}': {err}",
                candidate.display()
            ))
        })
    } else {
        Ok(raw.to_string())
    }
}

/// 🏗️ The base figment: env vars (`ESBULK_*`, `__` for nesting), then the TOML file if given.
fn base_figment(config_file_name: Option<&Path>) -> Figment {
    let config = Figment::new().merge(Env::prefixed("ESBULK_").split("__"));
    match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    }
}

/// 🚀 Load the config from env vars and an optional TOML file.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    extract(base_figment(config_file_name), config_file_name)
}

/// 🚀 Same as [`load_config`], with one more layer on top: usually the CLI flags.
/// The overrides win every conflict. They were typed by a human, seconds ago. Respect that.
pub fn load_config_with_overrides<P: Provider>(
    config_file_name: Option<&Path>,
    overrides: P,
) -> anyhow::Result<AppConfig> {
    extract(
        base_figment(config_file_name).merge(overrides),
        config_file_name,
    )
}

fn extract(figment: Figment, config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 💬 Say WHERE we looked. "error: error" is not a message, it's a mood.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESBULK_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESBULK_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    figment.extract().context(context_msg)
}
