//! Consul-backed directory.
//!
//! Registration goes through the local agent API with an HTTP health check
//! against the instance's `/health` endpoint. `watch` long-polls the health
//! endpoint with blocking queries and reports the passing instances whenever
//! the `X-Consul-Index` moves and the list actually changed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::domain::{Directory, DirectoryError, InstanceId, ServiceInstance};

const INDEX_HEADER: &str = "X-Consul-Index";
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Connection and health-check settings for the Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulSettings {
    /// Agent address, e.g. `http://127.0.0.1:8500`
    pub addr: String,
    pub service_name: String,
    pub tags: Vec<String>,
    pub check_interval: String,
    pub check_timeout: String,
    pub deregister_after: String,
    /// Upper bound of one blocking query, e.g. `30s`
    pub watch_wait: String,
}

#[derive(Clone)]
pub struct ConsulDirectory {
    settings: ConsulSettings,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterRequest<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: &'a str,
    port: u16,
    check: CheckRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckRequest {
    #[serde(rename = "HTTP")]
    http: String,
    interval: String,
    timeout: String,
    deregister_critical_service_after: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: HealthNode,
    service: HealthService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    address: String,
    port: u16,
}

/// Service address falls back to the node address when the service did not
/// register one.
fn to_instances(entries: Vec<HealthEntry>) -> Vec<ServiceInstance> {
    let mut instances: Vec<ServiceInstance> = entries
        .into_iter()
        .map(|e| {
            let address = if e.service.address.is_empty() {
                e.node.address
            } else {
                e.service.address
            };
            ServiceInstance::new(e.service.id, address, e.service.port)
        })
        .collect();
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    instances
}

impl ConsulDirectory {
    pub fn new(settings: ConsulSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.addr.trim_end_matches('/'), path)
    }

    /// One health query. With `index > 0` this blocks until the index moves or
    /// `watch_wait` elapses.
    async fn query_passing(
        &self,
        index: u64,
    ) -> Result<(u64, Vec<ServiceInstance>), DirectoryError> {
        let url = self.url(&format!("/v1/health/service/{}", self.settings.service_name));
        let mut request = self.client.get(url).query(&[("passing", "true")]);
        if index > 0 {
            request = request.query(&[
                ("index", index.to_string()),
                ("wait", self.settings.watch_wait.clone()),
            ]);
        }

        let resp = request.send().await?;
        if resp.status() != StatusCode::OK {
            return Err(DirectoryError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let next_index = resp
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let entries: Vec<HealthEntry> = resp.json().await?;
        Ok((next_index, to_instances(entries)))
    }
}

async fn expect_ok(resp: reqwest::Response) -> Result<(), DirectoryError> {
    if resp.status().is_success() {
        return Ok(());
    }
    Err(DirectoryError::Status {
        status: resp.status().as_u16(),
        body: resp.text().await.unwrap_or_default(),
    })
}

#[async_trait]
impl Directory for ConsulDirectory {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), DirectoryError> {
        let body = RegisterRequest {
            id: instance.id.as_str(),
            name: &self.settings.service_name,
            tags: &self.settings.tags,
            address: &instance.address,
            port: instance.port,
            check: CheckRequest {
                http: format!("http://{}/health", instance.authority()),
                interval: self.settings.check_interval.clone(),
                timeout: self.settings.check_timeout.clone(),
                deregister_critical_service_after: self.settings.deregister_after.clone(),
            },
        };

        let resp = self
            .client
            .put(self.url("/v1/agent/service/register"))
            .json(&body)
            .send()
            .await?;
        expect_ok(resp).await?;
        tracing::info!(
            "Registered instance {} ({}) with directory",
            instance.id,
            instance.authority()
        );
        Ok(())
    }

    async fn deregister(&self, instance_id: &InstanceId) -> Result<(), DirectoryError> {
        let resp = self
            .client
            .put(self.url(&format!("/v1/agent/service/deregister/{}", instance_id)))
            .send()
            .await?;
        expect_ok(resp).await?;
        tracing::info!("Deregistered instance {} from directory", instance_id);
        Ok(())
    }

    async fn healthy_instances(&self) -> Result<Vec<ServiceInstance>, DirectoryError> {
        let (_, instances) = self.query_passing(0).await?;
        Ok(instances)
    }

    fn watch(&self, on_change: mpsc::Sender<Vec<ServiceInstance>>) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            let mut index = 0u64;
            let mut last: Option<Vec<ServiceInstance>> = None;
            loop {
                let (next_index, instances) = match directory.query_passing(index).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!("Directory watch query failed: {}", e);
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                };

                // An index that goes backwards means the agent state was reset.
                index = if next_index < index { 0 } else { next_index };

                if last.as_ref() == Some(&instances) {
                    continue;
                }
                last = Some(instances.clone());
                if on_change.send(instances).await.is_err() {
                    tracing::debug!("Directory watch receiver dropped, stopping watch");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_maps_to_instances() {
        // テスト項目: Consul の health レスポンスから ServiceInstance が組み立てられる
        // given (前提条件):
        let body = r#"[
            {"Node":{"Address":"10.0.0.9"},"Service":{"ID":"hiroba_b","Address":"","Port":8081}},
            {"Node":{"Address":"10.0.0.8"},"Service":{"ID":"hiroba_a","Address":"10.0.0.1","Port":8080}}
        ]"#;

        // when (操作):
        let entries: Vec<HealthEntry> = serde_json::from_str(body).unwrap();
        let instances = to_instances(entries);

        // then (期待する結果): ID 昇順、サービスアドレスが空ならノードアドレスを使う
        assert_eq!(
            instances,
            vec![
                ServiceInstance::new("hiroba_a", "10.0.0.1", 8080),
                ServiceInstance::new("hiroba_b", "10.0.0.9", 8081),
            ]
        );
    }

    #[test]
    fn test_register_request_uses_consul_field_names() {
        // テスト項目: 登録リクエストが Consul のフィールド名でシリアライズされる
        // given (前提条件):
        let tags = vec!["im".to_string()];
        let body = RegisterRequest {
            id: "hiroba_a",
            name: "hiroba",
            tags: &tags,
            address: "10.0.0.1",
            port: 8080,
            check: CheckRequest {
                http: "http://10.0.0.1:8080/health".to_string(),
                interval: "5s".to_string(),
                timeout: "3s".to_string(),
                deregister_critical_service_after: "30s".to_string(),
            },
        };

        // when (操作):
        let value = serde_json::to_value(&body).unwrap();

        // then (期待する結果):
        assert_eq!(value["ID"], "hiroba_a");
        assert_eq!(value["Port"], 8080);
        assert_eq!(value["Check"]["HTTP"], "http://10.0.0.1:8080/health");
        assert_eq!(value["Check"]["DeregisterCriticalServiceAfter"], "30s");
    }
}
