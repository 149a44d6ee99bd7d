use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::quantity;

/// Body shape of every upstream collection endpoint. `items` may be `null`
/// but must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ItemList<T> {
    #[serde(deserialize_with = "null_as_default")]
    items: Vec<T>,
}

impl<T> ItemList<T> {
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Current usage and baseline for one entity, as raw magnitude strings.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Metrics {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub cpu_total: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub memory: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub memory_total: Option<String>,
}

/// One entry of the `metrics/nodes` collection.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct NodeMetric {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// One entry of the `metrics/pods` collection (`metrics.k8s.io/v1beta1` PodMetrics).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PodMetric {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default = "Vec::new", deserialize_with = "null_as_default")]
    pub containers: Vec<ContainerMetric>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerMetric {
    #[serde(default)]
    pub name: String,
    #[serde(default = "BTreeMap::new", deserialize_with = "null_as_default")]
    pub usage: BTreeMap<String, String>,
}

impl PodMetric {
    /// Sums container usage into a `Metrics` record with cpu in millicores and
    /// memory in Ki. Containers whose usage does not parse are left out.
    pub fn usage(&self) -> Metrics {
        if self.containers.is_empty() {
            return Metrics::default();
        }

        let mut cpu_millicores = 0u64;
        let mut memory_bytes = 0u64;
        for container in &self.containers {
            if let Some(cpu) = container.usage.get("cpu") {
                match quantity::parse_cpu_millicores(cpu) {
                    Ok(value) => cpu_millicores = cpu_millicores.saturating_add(value),
                    Err(error) => tracing::debug!(container = %container.name, "{error}"),
                }
            }
            if let Some(memory) = container.usage.get("memory") {
                match quantity::parse_memory_bytes(memory) {
                    Ok(value) => memory_bytes = memory_bytes.saturating_add(value),
                    Err(error) => tracing::debug!(container = %container.name, "{error}"),
                }
            }
        }

        Metrics {
            cpu: Some(quantity::millicores_quantity(cpu_millicores)),
            cpu_total: None,
            memory: Some(quantity::kibibytes_quantity(memory_bytes)),
            memory_total: None,
        }
    }
}

/// The four raw collections of one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub node_metrics: Vec<NodeMetric>,
    pub pods: Vec<Pod>,
    pub pod_metrics: Vec<PodMetric>,
}

#[derive(Debug, Clone)]
pub struct PodView {
    pub pod: Pod,
    pub metrics: Option<Metrics>,
}

impl PodView {
    pub fn name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.pod.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn node_name(&self) -> Option<&str> {
        self.pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.as_deref())
    }

    pub fn is_system(&self) -> bool {
        is_system_namespace(self.namespace())
    }

    /// Requests and limits of the first container, only when both are declared.
    pub fn first_container_resources(&self) -> Option<ContainerResources> {
        let container = self.pod.spec.as_ref()?.containers.first()?;
        let resources = container.resources.as_ref()?;
        let requests = resources.requests.as_ref()?;
        let limits = resources.limits.as_ref()?;
        let pick = |map: &BTreeMap<String, Quantity>, key: &str| {
            map.get(key).map(|quantity| quantity.0.clone())
        };

        Some(ContainerResources {
            cpu_request: pick(requests, "cpu"),
            memory_request: pick(requests, "memory"),
            cpu_limit: pick(limits, "cpu"),
            memory_limit: pick(limits, "memory"),
        })
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ContainerResources {
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeView {
    pub node: Node,
    pub metrics: Option<Metrics>,
    pub pods: Vec<PodView>,
}

impl NodeView {
    pub fn name(&self) -> &str {
        self.node.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn allocatable(&self, resource: &str) -> Option<&str> {
        self.node
            .status
            .as_ref()
            .and_then(|status| status.allocatable.as_ref())
            .and_then(|allocatable| allocatable.get(resource))
            .map(|quantity| quantity.0.as_str())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    pub show_name: bool,
    pub show_metrics: bool,
    pub hide_system_pods: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            show_name: false,
            show_metrics: false,
            hide_system_pods: true,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

pub fn is_system_namespace(namespace: &str) -> bool {
    namespace.contains("system")
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|raw| !raw.trim().is_empty()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::{ItemList, Metrics, NodeMetric, PodMetric, PodView, is_system_namespace};
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    #[test]
    fn null_items_become_empty() {
        let list: ItemList<NodeMetric> = serde_json::from_value(json!({ "items": null })).unwrap();
        assert!(list.into_items().is_empty());

    }

    #[test]
    fn missing_items_key_is_rejected() {
        let error = serde_json::from_value::<ItemList<NodeMetric>>(json!({
            "kind": "Status",
            "message": "forbidden"
        }))
        .unwrap_err();
        assert!(error.to_string().contains("missing field `items`"));
    }

    #[test]
    fn node_metric_blank_fields_are_absent() {
        let metric: NodeMetric = serde_json::from_value(json!({
            "name": "node-a",
            "cpu": "250",
            "cpu_total": "",
            "memory": "2048Ki",
            "memory_total": "8192Ki"
        }))
        .unwrap();

        assert_eq!(metric.name, "node-a");
        assert_eq!(
            metric.metrics,
            Metrics {
                cpu: Some("250".to_string()),
                cpu_total: None,
                memory: Some("2048Ki".to_string()),
                memory_total: Some("8192Ki".to_string()),
            }
        );
    }

    #[test]
    fn pod_metric_usage_sums_containers() {
        let metric: PodMetric = serde_json::from_value(json!({
            "metadata": { "name": "api-0", "namespace": "default" },
            "containers": [
                { "name": "app", "usage": { "cpu": "250m", "memory": "1Mi" } },
                { "name": "sidecar", "usage": { "cpu": "2000000n", "memory": "1024Ki" } }
            ]
        }))
        .unwrap();

        let usage = metric.usage();
        assert_eq!(usage.cpu.as_deref(), Some("252m"));
        assert_eq!(usage.memory.as_deref(), Some("2048Ki"));
        assert_eq!(usage.cpu_total, None);
    }

    #[test]
    fn first_container_resources_requires_requests_and_limits() {
        let with_both: Pod = serde_json::from_value(json!({
            "metadata": { "name": "api-0", "namespace": "default" },
            "spec": { "containers": [{
                "name": "app",
                "resources": {
                    "requests": { "cpu": "100m", "memory": "64Mi" },
                    "limits": { "cpu": "1", "memory": "128Mi" }
                }
            }]}
        }))
        .unwrap();
        let view = PodView {
            pod: with_both,
            metrics: None,
        };
        let resources = view.first_container_resources().unwrap();
        assert_eq!(resources.cpu_request.as_deref(), Some("100m"));
        assert_eq!(resources.memory_limit.as_deref(), Some("128Mi"));

        let requests_only: Pod = serde_json::from_value(json!({
            "metadata": { "name": "api-1", "namespace": "default" },
            "spec": { "containers": [{
                "name": "app",
                "resources": { "requests": { "cpu": "100m" } }
            }]}
        }))
        .unwrap();
        let view = PodView {
            pod: requests_only,
            metrics: None,
        };
        assert_eq!(view.first_container_resources(), None);
    }

    #[test]
    fn system_namespace_is_substring_match() {
        assert!(is_system_namespace("kube-system"));
        assert!(is_system_namespace("system-monitoring"));
        assert!(!is_system_namespace("default"));
    }
}
