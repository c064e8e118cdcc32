//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! The monitoring dashboard glows amber in the dark. One engineer, alone,
//! stares into the abyss of a RED cluster. The abyss stares back and
//! offers a 503. "I'll just retry it," they whispered.
//!
//! 🚀 This module is the HTTP half of the loader. It owns the `reqwest::Client`,
//! the server list, the credentials and the endpoint selector, and it runs every
//! request through one retry loop:
//! - transient failures (connect, timeout, 5xx, 429) back off and try again, maybe on
//!   a different server, until the attempt budget is spent;
//! - everything else comes straight back to the caller as an [`HttpReply`] so the caller
//!   can decide what a 404 means to it.
//!
//! ⚠️ Cancellation is checked between attempts only. A request already on the wire
//! finishes. We are not monsters.

use std::collections::HashMap;
use std::fmt;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::app_config::{Configuration, Credentials};
use crate::backoff::{FailureClass, RetryPolicy, is_transient};
use crate::endpoints::{EndpointSelector, Selector};
use crate::error::BulkError;

// 📏 how much of an error body ends up in an error message. the rest is between you and the cluster log.
const BODY_EXCERPT_CHARS: usize = 512;

/// 📬 A response that was not worth retrying: any 1xx-4xx, or any 2xx.
#[derive(Debug, Clone)]
pub(crate) struct HttpReply {
    pub(crate) status: u16,
    pub(crate) body: String,
    pub(crate) attempts: u32,
    pub(crate) server: String,
}

impl HttpReply {
    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 💀 A call that never produced a usable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallError {
    /// Out of attempts, or a failure retrying cannot fix.
    Failed { reason: String, attempts: u32 },
    /// The run was cancelled while we were waiting to retry.
    Cancelled { attempts: u32 },
}

impl CallError {
    pub(crate) fn attempts(&self) -> u32 {
        match self {
            CallError::Failed { attempts, .. } | CallError::Cancelled { attempts } => *attempts,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Failed { reason, .. } => write!(f, "{reason}"),
            CallError::Cancelled { attempts } => {
                write!(f, "cancelled after {attempts} attempt(s)")
            }
        }
    }
}

/// 🧾 What a 2xx bulk response said about the items inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BulkTally {
    pub(crate) items: u64,
    pub(crate) failed: u64,
    pub(crate) first_error: Option<String>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Deserialize)]
struct BulkItemResult {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkTally {
    /// 🔍 Parse a bulk response body. `None` when the body is not a bulk response at all.
    pub(crate) fn from_response_body(body: &str) -> Option<Self> {
        let response: BulkResponse = serde_json::from_str(body).ok()?;
        let mut tally = BulkTally {
            items: response.items.len() as u64,
            ..BulkTally::default()
        };
        if !response.errors {
            return Some(tally);
        }
        for result in response.items.iter().flat_map(HashMap::values) {
            if result.error.is_some() || result.status >= 300 {
                tally.failed += 1;
                if tally.first_error.is_none() {
                    tally.first_error = Some(describe_item_error(result));
                }
            }
        }
        Some(tally)
    }
}

fn describe_item_error(result: &BulkItemResult) -> String {
    match &result.error {
        Some(Value::Object(error)) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("");
            format!("{} {kind}: {reason}", result.status)
        }
        Some(other) => format!("{} {other}", result.status),
        None => format!("status {}", result.status),
    }
}

/// 📡 The envoy we send into the HTTP wilderness. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub(crate) struct ElasticsearchClient {
    client: Client,
    servers: Vec<String>,
    credentials: Option<Credentials>,
    selector: Selector,
    retry: RetryPolicy,
}

impl ElasticsearchClient {
    /// 🏗️ Build the client with per-attempt timeouts. No network traffic happens here.
    pub(crate) fn new(configuration: &Configuration) -> Result<Self, BulkError> {
        let client = Client::builder()
            .connect_timeout(configuration.connect_timeout)
            .timeout(configuration.request_timeout)
            .build()
            .map_err(|err| {
                BulkError::Config(format!(
                    "the HTTP client refused to be born, the TLS stack wept: {}",
                    error_chain(&err)
                ))
            })?;
        Ok(Self {
            client,
            servers: configuration.servers.clone(),
            credentials: configuration.credentials.clone(),
            selector: Selector::from(configuration.endpoint_selection),
            retry: configuration.retry_policy,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => request,
        }
    }

    /// 🔄 The one retry loop. `build` gets the chosen server and returns the request to send.
    async fn call<F>(
        &self,
        label: &str,
        cancel: Option<&CancellationToken>,
        build: F,
    ) -> Result<HttpReply, CallError>
    where
        F: Fn(&Client, &str) -> Result<RequestBuilder, String>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let server = self.selector.select(&self.servers);
            let request = build(&self.client, server)
                .map_err(|reason| CallError::Failed { reason, attempts })?;

            let (class, reason) = match self.authorize(request).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match response.text().await {
                        Ok(body) if is_transient(&FailureClass::Status(status)) => (
                            FailureClass::Status(status),
                            format!("HTTP {status}: {}", excerpt(&body)),
                        ),
                        Ok(body) => {
                            trace!("📬 {label} against {server} answered {status}");
                            return Ok(HttpReply {
                                status,
                                body,
                                attempts,
                                server: server.to_string(),
                            });
                        }
                        // 🔌 headers arrived, the body did not. counts as a broken connection.
                        Err(err) => (classify(&err), error_chain(&err)),
                    }
                }
                Err(err) => (classify(&err), error_chain(&err)),
            };

            if !self.retry.should_retry(&class, attempts) {
                return Err(CallError::Failed {
                    reason: format!("{label} against {server}: {reason}"),
                    attempts,
                });
            }

            let delay = self.retry.next_delay(attempts);
            warn!(
                "🔄 {label} attempt {attempts}/{} against {server} failed ({reason}), retrying in {delay:?}",
                self.retry.max_attempts
            );
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(CallError::Cancelled { attempts }),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// 📦 `POST <server>/_bulk[?pipeline=<name>]` with an NDJSON body.
    pub(crate) async fn bulk(
        &self,
        payload: String,
        pipeline: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<HttpReply, CallError> {
        self.call("bulk", Some(cancel), |client, server| {
            let url = bulk_url(server, pipeline)?;
            Ok(client
                .post(url)
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(payload.clone()))
        })
        .await
    }

    /// ⚙️ Single settings-style call; non-2xx replies come back for the caller to judge.
    async fn admin_call(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<HttpReply, BulkError> {
        let reply = self
            .call(operation, None, |client, server| {
                let mut request = client.request(method.clone(), format!("{server}/{path}"));
                if let Some(body) = body {
                    request = request
                        .header(CONTENT_TYPE, "application/json")
                        .body(body.to_string());
                }
                Ok(request)
            })
            .await
            .map_err(|err| BulkError::Settings {
                operation: operation.to_string(),
                reason: err.to_string(),
            })?;
        debug!(
            "⚙️ {operation} ({method} /{path}) on {} answered {}",
            reply.server, reply.status
        );
        Ok(reply)
    }

    /// 🔍 `HEAD <server>/<index>`: 2xx = exists, 404 = does not.
    pub(crate) async fn index_exists(&self, index: &str) -> Result<bool, BulkError> {
        let operation = "index exists";
        let reply = self.admin_call(operation, Method::HEAD, index, None).await?;
        match reply.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(settings_error(operation, &reply)),
        }
    }

    /// 🗑️ `DELETE <server>/<index>`. Already gone counts as done.
    pub(crate) async fn delete_index(&self, index: &str) -> Result<(), BulkError> {
        let operation = "delete index";
        let reply = self
            .admin_call(operation, Method::DELETE, index, None)
            .await?;
        if reply.is_success() || reply.status == 404 {
            Ok(())
        } else {
            Err(settings_error(operation, &reply))
        }
    }

    /// 🏗️ `PUT <server>/<index>`. Losing a creation race to someone else is fine.
    pub(crate) async fn create_index(&self, index: &str) -> Result<(), BulkError> {
        let operation = "create index";
        let reply = self.admin_call(operation, Method::PUT, index, None).await?;
        if reply.is_success()
            || (reply.status == 400 && reply.body.contains("resource_already_exists_exception"))
        {
            Ok(())
        } else {
            Err(settings_error(operation, &reply))
        }
    }

    /// 🗺️ `PUT <server>/<index>/_mapping`.
    pub(crate) async fn put_mapping(&self, index: &str, mapping: &str) -> Result<(), BulkError> {
        let operation = "put mapping";
        let path = format!("{index}/_mapping");
        let reply = self
            .admin_call(operation, Method::PUT, &path, Some(mapping))
            .await?;
        expect_success(operation, &reply)
    }

    /// 🔢 `GET <server>/<index>/_settings` → current `number_of_replicas`, if readable.
    pub(crate) async fn number_of_replicas(&self, index: &str) -> Result<Option<u64>, BulkError> {
        let operation = "get settings";
        let path = format!("{index}/_settings");
        let reply = self.admin_call(operation, Method::GET, &path, None).await?;
        expect_success(operation, &reply)?;
        Ok(parse_replicas(&reply.body))
    }

    /// ⚙️ `PUT <server>/<index>/_settings` with the given body.
    pub(crate) async fn put_settings(&self, index: &str, body: &str) -> Result<(), BulkError> {
        let operation = "put settings";
        let path = format!("{index}/_settings");
        let reply = self
            .admin_call(operation, Method::PUT, &path, Some(body))
            .await?;
        expect_success(operation, &reply)?;
        debug!("✅ applied setting {body} to {index}");
        Ok(())
    }

    /// 🔄 `POST <server>/<index>/_refresh`.
    pub(crate) async fn refresh(&self, index: &str) -> Result<(), BulkError> {
        let operation = "refresh";
        let path = format!("{index}/_refresh");
        let reply = self.admin_call(operation, Method::POST, &path, None).await?;
        expect_success(operation, &reply)
    }
}

fn bulk_url(server: &str, pipeline: Option<&str>) -> Result<Url, String> {
    let base = format!("{server}/_bulk");
    let parsed = match pipeline {
        Some(pipeline) => Url::parse_with_params(&base, &[("pipeline", pipeline)]),
        None => Url::parse(&base),
    };
    parsed.map_err(|err| format!("bad bulk url '{base}': {err}"))
}

fn parse_replicas(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.as_object()?.values().find_map(|entry| {
        match entry.pointer("/settings/index/number_of_replicas")? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    })
}

fn classify(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() {
        FailureClass::Timeout
    } else if err.is_builder() {
        FailureClass::Other
    } else {
        FailureClass::Connect
    }
}

/// 🧅 reqwest's Display hides the interesting part in the source chain. Peel it.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub(crate) fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

fn settings_error(operation: &str, reply: &HttpReply) -> BulkError {
    BulkError::Settings {
        operation: operation.to_string(),
        reason: format!(
            "{} answered HTTP {}: {}",
            reply.server,
            reply.status,
            excerpt(&reply.body)
        ),
    }
}

fn expect_success(operation: &str, reply: &HttpReply) -> Result<(), BulkError> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(settings_error(operation, reply))
    }
}
