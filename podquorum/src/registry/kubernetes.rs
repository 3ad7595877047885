use reqwest::{Certificate, Client};
use serde::{de::DeserializeOwned, Deserialize};
use std::{collections::HashMap, fs, path::Path, time::Duration};

use super::{LabelSelector, PodInfo, PodRegistry};
use crate::{
    config::Environment,
    error::{Error, Result},
};

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// `PodRegistry` backed by the Kubernetes API server, scoped to one namespace.
#[derive(Debug, Clone)]
pub struct KubernetesRegistry {
    client: Client,
    base_url: String,
    token: String,
    namespace: String,
    pod_name: String,
}

impl KubernetesRegistry {
    /// Builds a registry from the service account mounted into the pod.
    pub fn in_cluster(
        env: &Environment,
        pod_name: &str,
        namespace: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let account_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = read_account_file(&account_dir.join("token"))?;
        let ca_pem = fs::read(account_dir.join("ca.crt"))
            .map_err(|e| Error::Config(format!("can't read the cluster CA bundle: {}", e)))?;
        let namespace = match namespace {
            Some(namespace) => namespace.to_owned(),
            None => read_account_file(&account_dir.join("namespace"))?,
        };

        Self::new(
            env.api_server_url(),
            token,
            namespace,
            pod_name.to_owned(),
            Some(&ca_pem),
            request_timeout,
        )
    }

    pub fn new(
        base_url: String,
        token: String,
        namespace: String,
        pod_name: String,
        ca_pem: Option<&[u8]>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut builder = Client::builder().timeout(request_timeout);
        if let Some(pem) = ca_pem {
            let certificate = Certificate::from_pem(pem)
                .map_err(|e| Error::Config(format!("invalid cluster CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("can't build the API client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
            namespace,
            pod_name,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Registry(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registry(format!(
                "GET {} returned {}: {}",
                path, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Registry(format!("can't decode the response of {}: {}", path, e)))
    }

    async fn self_pod(&self) -> Result<Pod> {
        let path = format!(
            "/api/v1/namespaces/{}/pods/{}",
            self.namespace, self.pod_name
        );
        self.get_json(&path, &[]).await
    }
}

#[async_trait]
impl PodRegistry for KubernetesRegistry {
    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<PodInfo>> {
        let path = format!("/api/v1/namespaces/{}/pods", self.namespace);
        let selector = selector.to_string();
        let pods: PodList = self
            .get_json(&path, &[("labelSelector", selector.as_str())])
            .await?;

        Ok(pods.items.into_iter().map(PodInfo::from).collect())
    }

    async fn self_ip(&self) -> Result<Option<String>> {
        Ok(PodInfo::from(self.self_pod().await?).ip)
    }

    async fn self_label(&self, key: &str) -> Result<Option<String>> {
        let mut pod = self.self_pod().await?;
        Ok(pod.metadata.labels.remove(key))
    }
}

fn read_account_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|content| content.trim().to_owned())
        .map_err(|e| Error::Config(format!("can't read {}: {}", path.display(), e)))
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl From<Pod> for PodInfo {
    fn from(pod: Pod) -> Self {
        let ready = pod
            .status
            .conditions
            .iter()
            .any(|condition| condition.kind == "Ready" && condition.status == "True");

        PodInfo::new(pod.metadata.name, pod.status.pod_ip.as_deref(), ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_list_conversion() {
        let body = r#"{
            "kind": "PodList",
            "items": [
                {
                    "metadata": {"name": "kv-0", "labels": {"app": "kv"}},
                    "status": {
                        "podIP": "10.0.0.2",
                        "conditions": [{"type": "Ready", "status": "True"}]
                    }
                },
                {
                    "metadata": {"name": "kv-1", "labels": {"app": "kv"}},
                    "status": {"phase": "Pending"}
                }
            ]
        }"#;
        let pods: PodList = serde_json::from_str(body).unwrap();
        let pods: Vec<PodInfo> = pods.items.into_iter().map(PodInfo::from).collect();

        assert_eq!(
            pods,
            vec![
                PodInfo::new("kv-0", Some("10.0.0.2"), true),
                PodInfo::new("kv-1", None, false),
            ]
        );
    }
}
