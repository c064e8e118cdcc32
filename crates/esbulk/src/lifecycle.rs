//! ⚙️ Index Lifecycle: the stagehands who set up before the show and sweep up after.
//!
//! Before: purge (delete + recreate) or make sure the index exists, push the mapping,
//! and, with zero-replica, remember the replica count, drop it to 0 and switch refresh
//! off. Any failure here is fatal and nothing gets indexed.
//!
//! After (success or not): put the replica count back, apply the configured refresh
//! interval, and refresh so the documents show up in search. Best effort: failures
//! are logged and returned as strings for the summary, never raised.

use tracing::{info, warn};

use crate::app_config::Configuration;
use crate::backends::ElasticsearchClient;
use crate::error::BulkError;

const ZERO_REPLICAS: &str = r#"{"index":{"number_of_replicas":0}}"#;
const REFRESH_DISABLED: &str = r#"{"index":{"refresh_interval":"-1"}}"#;
// -- 🤷 what we assume when the cluster will not tell us the replica count
const FALLBACK_REPLICAS: u64 = 1;

/// 📋 What the pre-run phase changed, so the post-run phase knows what to undo.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PreparedIndex {
    /// Some(n) once replicas were dropped to 0; n is what to restore.
    pub(crate) original_replicas: Option<u64>,
    pub(crate) refresh_disabled: bool,
}

impl PreparedIndex {
    pub(crate) fn touched(&self) -> bool {
        self.original_replicas.is_some() || self.refresh_disabled
    }
}

/// 🎭 Lifecycle manager for one index, borrowing the client and the config.
#[derive(Debug)]
pub(crate) struct IndexLifecycle<'a> {
    client: &'a ElasticsearchClient,
    configuration: &'a Configuration,
}

impl<'a> IndexLifecycle<'a> {
    pub(crate) fn new(client: &'a ElasticsearchClient, configuration: &'a Configuration) -> Self {
        Self {
            client,
            configuration,
        }
    }

    /// 🏗️ Pre-run. Records every change in `state` as it happens, so a failure halfway
    /// still leaves an accurate list of what to undo.
    pub(crate) async fn prepare(&self, state: &mut PreparedIndex) -> Result<(), BulkError> {
        let index = self.configuration.index.as_str();

        if self.configuration.purge {
            if self.client.index_exists(index).await? {
                info!("🗑️ purging index '{index}'");
                self.client.delete_index(index).await?;
            }
            self.client.create_index(index).await?;
            info!("🏗️ index '{index}' recreated");
        } else if !self.client.index_exists(index).await? {
            self.client.create_index(index).await?;
            info!("🏗️ index '{index}' created");
        }

        if let Some(mapping) = &self.configuration.mapping {
            self.client.put_mapping(index, mapping).await?;
            info!("🗺️ mapping applied to '{index}'");
        }

        if self.configuration.zero_replica {
            let original = match self.client.number_of_replicas(index).await? {
                Some(replicas) => replicas,
                None => {
                    warn!(
                        "⚠️ could not read number_of_replicas of '{index}', will restore {FALLBACK_REPLICAS}"
                    );
                    FALLBACK_REPLICAS
                }
            };
            self.client.put_settings(index, ZERO_REPLICAS).await?;
            state.original_replicas = Some(original);
            info!("⚡ replicas of '{index}' set to 0 (was {original})");

            self.client.put_settings(index, REFRESH_DISABLED).await?;
            state.refresh_disabled = true;
        }
        Ok(())
    }

    /// 🧹 Post-run. Returns the problems it ran into, already logged.
    pub(crate) async fn finish(&self, state: &PreparedIndex) -> Vec<String> {
        let index = self.configuration.index.as_str();
        let mut problems = Vec::new();

        if let Some(replicas) = state.original_replicas {
            let body = format!(r#"{{"index":{{"number_of_replicas":{replicas}}}}}"#);
            match self.client.put_settings(index, &body).await {
                Ok(()) => info!("🔁 replicas of '{index}' restored to {replicas}"),
                Err(err) => note(&mut problems, err),
            }
        }

        let refresh_body = serde_json::json!({
            "index": { "refresh_interval": self.configuration.refresh_interval }
        })
        .to_string();
        match self.client.put_settings(index, &refresh_body).await {
            Ok(()) => info!(
                "⏱️ refresh_interval of '{index}' set to {}",
                self.configuration.refresh_interval
            ),
            Err(err) => note(&mut problems, err),
        }

        match self.client.refresh(index).await {
            Ok(()) => info!("🔄 index '{index}' refreshed"),
            Err(err) => note(&mut problems, err),
        }
        problems
    }
}

fn note(problems: &mut Vec<String>, err: BulkError) {
    warn!("⚠️ post-run step failed: {err}");
    problems.push(err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{AppConfig, RuntimeConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn configuration(server: &MockServer, tweak: impl FnOnce(&mut AppConfig)) -> Configuration {
        let mut app_config = AppConfig {
            servers: vec![server.uri()],
            index: "papers".to_string(),
            refresh_interval: "30s".to_string(),
            runtime: RuntimeConfig {
                max_attempts: 1,
                ..RuntimeConfig::default()
            },
            ..AppConfig::default()
        };
        tweak(&mut app_config);
        app_config
            .into_configuration()
            .expect("💀 test configuration")
    }

    async fn settings_bodies(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT" && r.url.path() == "/papers/_settings")
            .map(|r| String::from_utf8_lossy(&r.body).to_string())
            .collect()
    }

    async fn mount_ok(server: &MockServer, verb: &str, route: &str) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_zero_replica_is_undone_to_the_original_count() {
        let server = MockServer::start().await;
        mount_ok(&server, "HEAD", "/papers").await;
        Mock::given(method("GET"))
            .and(path("/papers/_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"papers":{"settings":{"index":{"number_of_replicas":"2"}}}}"#,
            ))
            .mount(&server)
            .await;
        mount_ok(&server, "PUT", "/papers/_settings").await;
        mount_ok(&server, "POST", "/papers/_refresh").await;

        let configuration = configuration(&server, |c| c.zero_replica = true);
        let client = ElasticsearchClient::new(&configuration).expect("💀 client");
        let lifecycle = IndexLifecycle::new(&client, &configuration);

        let mut state = PreparedIndex::default();
        lifecycle.prepare(&mut state).await.expect("💀 prepare");
        assert_eq!(state.original_replicas, Some(2));

        let problems = lifecycle.finish(&state).await;
        assert!(problems.is_empty(), "{problems:?}");
        assert_eq!(
            settings_bodies(&server).await,
            vec![
                r#"{"index":{"number_of_replicas":0}}"#.to_string(),
                r#"{"index":{"refresh_interval":"-1"}}"#.to_string(),
                r#"{"index":{"number_of_replicas":2}}"#.to_string(),
                r#"{"index":{"refresh_interval":"30s"}}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_purge_deletes_then_recreates_then_maps() {
        let server = MockServer::start().await;
        mount_ok(&server, "HEAD", "/papers").await;
        Mock::given(method("DELETE"))
            .and(path("/papers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/papers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/papers/_mapping"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let configuration = configuration(&server, |c| {
            c.purge = true;
            c.mapping = Some(r#"{"properties":{"title":{"type":"text"}}}"#.to_string());
        });
        let client = ElasticsearchClient::new(&configuration).expect("💀 client");
        let mut state = PreparedIndex::default();
        IndexLifecycle::new(&client, &configuration)
            .prepare(&mut state)
            .await
            .expect("💀 prepare");
        assert!(!state.touched());

        let order: Vec<String> = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| format!("{} {}", r.method, r.url.path()))
            .collect();
        assert_eq!(
            order,
            vec!["HEAD /papers", "DELETE /papers", "PUT /papers", "PUT /papers/_mapping"]
        );
    }

    #[tokio::test]
    async fn the_one_where_a_missing_index_is_created_without_purge() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/papers"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/papers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let configuration = configuration(&server, |_| {});
        let client = ElasticsearchClient::new(&configuration).expect("💀 client");
        IndexLifecycle::new(&client, &configuration)
            .prepare(&mut PreparedIndex::default())
            .await
            .expect("💀 prepare");
    }

    #[tokio::test]
    async fn the_one_where_post_run_failures_are_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/papers/_settings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_ok(&server, "POST", "/papers/_refresh").await;

        let configuration = configuration(&server, |_| {});
        let client = ElasticsearchClient::new(&configuration).expect("💀 client");
        let problems = IndexLifecycle::new(&client, &configuration)
            .finish(&PreparedIndex::default())
            .await;
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("put settings"));
    }
}
