use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, Config};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::model::{ClusterSnapshot, ItemList, Metrics, NodeMetric, PodMetric};
use crate::quantity;

pub const NODES_PATH: &str = "nodes";
pub const NODE_METRICS_PATH: &str = "metrics/nodes";
pub const PODS_PATH: &str = "pods";
pub const POD_METRICS_PATH: &str = "metrics/pods";

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Dashboard API serving `{ items }` collections
    #[default]
    Api,
    /// Kubernetes API server and metrics.k8s.io, via kubeconfig or in-cluster config
    Kube,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(4),
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[derive(Clone)]
pub enum ClusterSource {
    Api(ApiSource),
    Kube(KubeSource),
}

impl ClusterSource {
    pub async fn connect(kind: SourceKind, base_url: &str, token: &str) -> Result<Self> {
        match kind {
            SourceKind::Api => ApiSource::new(base_url, token).map(Self::Api),
            SourceKind::Kube => KubeSource::infer().await.map(Self::Kube),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Api(source) => format!("api {}", source.base_url),
            Self::Kube(source) => format!("kube {}", source.cluster),
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<ClusterSnapshot> {
        match self {
            Self::Api(source) => source.fetch_snapshot().await,
            Self::Kube(source) => source.fetch_snapshot().await,
        }
    }
}

/// Fetches one snapshot, bounding each attempt by `policy.timeout` and backing
/// off exponentially between attempts.
pub async fn fetch_with_retry(
    source: &ClusterSource,
    policy: &RetryPolicy,
) -> Result<ClusterSnapshot> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match timeout(policy.timeout, source.fetch_snapshot()).await {
            Ok(Ok(snapshot)) => {
                debug!(
                    attempt,
                    nodes = snapshot.nodes.len(),
                    pods = snapshot.pods.len(),
                    "cluster snapshot fetched"
                );
                return Ok(snapshot);
            }
            Ok(Err(error)) => {
                warn!(attempt, "cluster fetch failed: {error:#}");
                last_error = Some(error);
            }
            Err(_) => {
                warn!(attempt, "cluster fetch timed out");
                last_error = Some(anyhow!(
                    "cluster fetch timed out after {}ms",
                    policy.timeout.as_millis()
                ));
            }
        }

        if attempt < attempts {
            sleep(policy.backoff(attempt)).await;
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("cluster fetch was not attempted"))
        .context(format!("giving up after {attempts} attempts")))
}

#[derive(Clone)]
pub struct ApiSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiSource {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET {base_url}/{path}` and return the body's `items`.
    pub async fn fetch_items<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let mut request = self.client.get(&url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} answered with an error status"))?;
        let list = response
            .json::<ItemList<T>>()
            .await
            .with_context(|| format!("failed to decode items from {url}"))?;
        Ok(list.into_items())
    }

    pub async fn fetch_snapshot(&self) -> Result<ClusterSnapshot> {
        let (nodes, node_metrics, pods, pod_metrics) = tokio::try_join!(
            self.fetch_items::<Node>(NODES_PATH),
            self.fetch_items::<NodeMetric>(NODE_METRICS_PATH),
            self.fetch_items::<Pod>(PODS_PATH),
            self.fetch_items::<PodMetric>(POD_METRICS_PATH),
        )?;

        Ok(ClusterSnapshot {
            nodes,
            node_metrics,
            pods,
            pod_metrics,
        })
    }
}

#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    cluster: String,
}

impl KubeSource {
    pub async fn infer() -> Result<Self> {
        let config = Config::infer()
            .await
            .context("failed to infer Kubernetes configuration")?;
        let cluster = config.cluster_url.to_string();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        Ok(Self { client, cluster })
    }

    pub async fn fetch_snapshot(&self) -> Result<ClusterSnapshot> {
        let nodes_api: Api<Node> = Api::all(self.client.clone());
        let pods_api: Api<Pod> = Api::all(self.client.clone());

        let (nodes, pods, node_usage, pod_usage) = tokio::try_join!(
            async {
                nodes_api
                    .list(&ListParams::default())
                    .await
                    .context("failed to list nodes")
            },
            async {
                pods_api
                    .list(&ListParams::default())
                    .await
                    .context("failed to list pods")
            },
            self.list_metrics("NodeMetrics", "nodes"),
            self.list_metrics("PodMetrics", "pods"),
        )?;
        let nodes = nodes.items;

        let node_metrics = node_usage
            .iter()
            .filter_map(|object| {
                let name = object.metadata.name.as_deref()?;
                let node = nodes
                    .iter()
                    .find(|node| node.metadata.name.as_deref() == Some(name));
                Some(shape_node_metric(name, &object.data["usage"], node))
            })
            .collect::<Vec<_>>();
        let pod_metrics = pod_usage
            .iter()
            .filter_map(|object| {
                serde_json::to_value(object)
                    .and_then(serde_json::from_value::<PodMetric>)
                    .map_err(|error| debug!("skipping malformed pod metrics: {error}"))
                    .ok()
            })
            .collect::<Vec<_>>();

        Ok(ClusterSnapshot {
            nodes,
            node_metrics,
            pods: pods.items,
            pod_metrics,
        })
    }

    /// Lists a metrics.k8s.io resource. A cluster without metrics-server yields
    /// an empty list so topology still renders.
    async fn list_metrics(&self, kind: &str, plural: &str) -> Result<Vec<DynamicObject>> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(error) => {
                warn!("metrics API unavailable for {plural}: {error}");
                Ok(Vec::new())
            }
        }
    }
}

/// Node usage in the dashboard API's shape: cpu as millicore counts, memory
/// in Ki, totals taken from the node's allocatable resources.
fn shape_node_metric(name: &str, usage: &Value, node: Option<&Node>) -> NodeMetric {
    let allocatable = node
        .and_then(|node| node.status.as_ref())
        .and_then(|status| status.allocatable.as_ref());
    let usage_field = |key: &str| usage.get(key).and_then(Value::as_str);
    let allocatable_field =
        |key: &str| allocatable.and_then(|map| map.get(key)).map(|q| q.0.as_str());

    let millicores =
        |raw: Option<&str>| raw.and_then(|value| quantity::parse_cpu_millicores(value).ok());
    let kibibytes = |raw: Option<&str>| {
        raw.and_then(|value| quantity::parse_memory_bytes(value).ok())
            .map(quantity::kibibytes_quantity)
    };

    NodeMetric {
        name: name.to_string(),
        metrics: Metrics {
            cpu: millicores(usage_field("cpu")).map(|value| value.to_string()),
            cpu_total: millicores(allocatable_field("cpu")).map(|value| value.to_string()),
            memory: kibibytes(usage_field("memory")),
            memory_total: kibibytes(allocatable_field("memory")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiSource, ClusterSource, RetryPolicy, fetch_with_retry, shape_node_metric};
    use k8s_openapi::api::core::v1::Node;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn serve(
        bodies: HashMap<&'static str, String>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        serve_after_failures(bodies, 0).await
    }

    /// Serves canned JSON bodies by request path and reports each request head.
    /// The first `failures` requests are answered with a 503.
    async fn serve_after_failures(
        bodies: HashMap<&'static str, String>,
        failures: usize,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let served = Arc::new(AtomicUsize::new(0));

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let bodies = bodies.clone();
                let tx = tx.clone();
                let served = served.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buffer = [0u8; 1024];
                    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
                        let Ok(read) = stream.read(&mut buffer).await else {
                            return;
                        };
                        if read == 0 {
                            return;
                        }
                        head.extend_from_slice(&buffer[..read]);
                    }
                    let head = String::from_utf8_lossy(&head).to_string();
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let _ = tx.send(head);

                    let failing = served.fetch_add(1, Ordering::SeqCst) < failures;
                    let response = match bodies.get(path.as_str()) {
                        _ if failing => "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_string(),
                        Some(body) => format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                            body.len()
                        ),
                        None => "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_string(),
                    };
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (format!("http://{address}"), rx)
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let source = ApiSource::new("http://localhost:8282/", "token").unwrap();
        assert_eq!(source.endpoint("metrics/nodes"), "http://localhost:8282/metrics/nodes");
        assert_eq!(source.endpoint("/pods"), "http://localhost:8282/pods");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 10,
            timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(20), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn snapshot_reads_all_four_collections() {
        let mut bodies = HashMap::new();
        bodies.insert(
            "/nodes",
            json!({ "items": [{ "metadata": { "name": "node-a" } }] }).to_string(),
        );
        bodies.insert(
            "/metrics/nodes",
            json!({ "items": [{ "name": "node-a", "cpu": "250", "cpu_total": "4000" }] })
                .to_string(),
        );
        bodies.insert(
            "/pods",
            json!({ "items": [{
                "metadata": { "name": "api-0", "namespace": "default" },
                "spec": { "nodeName": "node-a", "containers": [{ "name": "app" }] }
            }] })
            .to_string(),
        );
        bodies.insert("/metrics/pods", json!({ "items": null }).to_string());
        let (base_url, mut requests) = serve(bodies).await;

        let source = ApiSource::new(&base_url, "secret").unwrap();
        let snapshot = source.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.node_metrics[0].name, "node-a");
        assert_eq!(snapshot.pods.len(), 1);
        assert!(snapshot.pod_metrics.is_empty());

        let head = requests.recv().await.unwrap().to_ascii_lowercase();
        assert!(head.contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn error_status_fails_after_retries() {
        let (base_url, _requests) = serve(HashMap::new()).await;
        let source = ClusterSource::Api(ApiSource::new(&base_url, "").unwrap());
        let policy = RetryPolicy {
            attempts: 2,
            timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(1),
        };

        let error = fetch_with_retry(&source, &policy).await.unwrap_err();
        assert!(format!("{error:#}").contains("giving up after 2 attempts"));
    }

    fn cluster_bodies() -> HashMap<&'static str, String> {
        let mut bodies = HashMap::new();
        bodies.insert(
            "/nodes",
            json!({ "items": [{ "metadata": { "name": "node-a" } }] }).to_string(),
        );
        bodies.insert("/metrics/nodes", json!({ "items": [] }).to_string());
        bodies.insert("/pods", json!({ "items": [] }).to_string());
        bodies.insert("/metrics/pods", json!({ "items": null }).to_string());
        bodies
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_next_attempt() {
        let (base_url, _requests) = serve_after_failures(cluster_bodies(), 1).await;
        let source = ClusterSource::Api(ApiSource::new(&base_url, "").unwrap());
        let policy = RetryPolicy {
            attempts: 3,
            timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(1),
        };

        let snapshot = fetch_with_retry(&source, &policy).await.unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
    }

    #[tokio::test]
    async fn silent_server_times_out_each_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let source = ClusterSource::Api(ApiSource::new(&format!("http://{address}"), "").unwrap());
        let policy = RetryPolicy {
            attempts: 2,
            timeout: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(1),
        };

        let error = format!("{:#}", fetch_with_retry(&source, &policy).await.unwrap_err());
        assert!(error.contains("giving up after 2 attempts"));
        assert!(error.contains("timed out after 50ms"));
    }

    #[tokio::test]
    async fn body_without_items_is_a_failed_fetch() {
        let status = json!({ "kind": "Status", "message": "forbidden" }).to_string();
        let bodies = ["/nodes", "/metrics/nodes", "/pods", "/metrics/pods"]
            .into_iter()
            .map(|path| (path, status.clone()))
            .collect::<HashMap<_, _>>();
        let (base_url, _requests) = serve(bodies).await;
        let source = ClusterSource::Api(ApiSource::new(&base_url, "").unwrap());
        let policy = RetryPolicy {
            attempts: 1,
            timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(1),
        };

        let error = format!("{:#}", fetch_with_retry(&source, &policy).await.unwrap_err());
        assert!(error.contains("failed to decode items"));
    }

    #[test]
    fn node_metric_totals_come_from_allocatable() {
        let node: Node = serde_json::from_value(json!({
            "metadata": { "name": "node-a" },
            "status": { "allocatable": { "cpu": "3920m", "memory": "16Gi" } }
        }))
        .unwrap();

        let metric = shape_node_metric(
            "node-a",
            &json!({ "cpu": "153421875n", "memory": "2048Ki" }),
            Some(&node),
        );
        assert_eq!(metric.metrics.cpu.as_deref(), Some("153"));
        assert_eq!(metric.metrics.cpu_total.as_deref(), Some("3920"));
        assert_eq!(metric.metrics.memory.as_deref(), Some("2048Ki"));
        assert_eq!(metric.metrics.memory_total.as_deref(), Some("16777216Ki"));
    }
}
