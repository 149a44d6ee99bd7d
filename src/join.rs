use k8s_openapi::api::core::v1::{Node, Pod};

use crate::model::{ClusterSnapshot, Metrics, NodeMetric, NodeView, PodMetric, PodView};
use crate::quantity;

impl ClusterSnapshot {
    pub fn join(self) -> Vec<NodeView> {
        join(self.nodes, &self.node_metrics, self.pods, &self.pod_metrics)
    }
}

/// Attaches pod metrics to pods, then pods and node metrics to their nodes.
///
/// Node order and pod order follow the input collections. Pods whose
/// `spec.nodeName` names no node are dropped.
pub fn join(
    nodes: Vec<Node>,
    node_metrics: &[NodeMetric],
    pods: Vec<Pod>,
    pod_metrics: &[PodMetric],
) -> Vec<NodeView> {
    let pods = pods
        .into_iter()
        .map(|pod| {
            let metrics = pod_metrics
                .iter()
                .find(|metric| {
                    metric.metadata.name.is_some() && metric.metadata.name == pod.metadata.name
                })
                .map(|metric| with_pod_limits(metric.usage(), &pod));
            PodView { pod, metrics }
        })
        .collect::<Vec<_>>();

    let views = nodes
        .into_iter()
        .map(|node| {
            let name = node.metadata.name.clone();
            let pods = pods
                .iter()
                .filter(|pod| name.is_some() && pod.node_name() == name.as_deref())
                .cloned()
                .collect::<Vec<_>>();
            let metrics = node_metrics
                .iter()
                .find(|metric| name.as_deref() == Some(metric.name.as_str()))
                .map(|metric| metric.metrics.clone());
            NodeView {
                node,
                metrics,
                pods,
            }
        })
        .collect::<Vec<_>>();

    let placed = views.iter().map(|view| view.pods.len()).sum::<usize>();
    let orphaned = pods.len().saturating_sub(placed);
    if orphaned > 0 {
        tracing::debug!(orphaned, "pods without a matching node were dropped");
    }

    views
}

fn with_pod_limits(mut metrics: Metrics, pod: &Pod) -> Metrics {
    let limits = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.resources.as_ref())
        .and_then(|resources| resources.limits.as_ref());
    let Some(limits) = limits else {
        return metrics;
    };

    metrics.cpu_total = limits
        .get("cpu")
        .and_then(|quantity| quantity::parse_cpu_millicores(&quantity.0).ok())
        .map(quantity::millicores_quantity);
    metrics.memory_total = limits
        .get("memory")
        .and_then(|quantity| quantity::parse_memory_bytes(&quantity.0).ok())
        .map(quantity::kibibytes_quantity);
    metrics
}

#[cfg(test)]
mod tests {
    use super::join;
    use crate::model::{ClusterSnapshot, NodeMetric, PodMetric};
    use k8s_openapi::api::core::v1::{Node, Pod};
    use serde_json::json;

    fn node(name: &str) -> Node {
        serde_json::from_value(json!({
            "metadata": { "name": name },
            "status": { "allocatable": { "cpu": "4", "memory": "8192Ki" } }
        }))
        .unwrap()
    }

    fn pod(name: &str, node_name: &str) -> Pod {
        serde_json::from_value(json!({
            "metadata": { "name": name, "namespace": "default" },
            "spec": {
                "nodeName": node_name,
                "containers": [{
                    "name": "app",
                    "resources": { "limits": { "cpu": "500m", "memory": "64Mi" } }
                }]
            }
        }))
        .unwrap()
    }

    fn node_metric(name: &str) -> NodeMetric {
        serde_json::from_value(json!({
            "name": name,
            "cpu": "250",
            "cpu_total": "4000",
            "memory": "2048Ki",
            "memory_total": "8192Ki"
        }))
        .unwrap()
    }

    fn pod_metric(name: &str) -> PodMetric {
        serde_json::from_value(json!({
            "metadata": { "name": name, "namespace": "default" },
            "containers": [{ "name": "app", "usage": { "cpu": "100m", "memory": "16Mi" } }]
        }))
        .unwrap()
    }

    #[test]
    fn two_nodes_three_pods_one_orphan() {
        let snapshot = ClusterSnapshot {
            nodes: vec![node("node-a"), node("node-b")],
            node_metrics: vec![node_metric("node-b"), node_metric("node-a")],
            pods: vec![
                pod("api-0", "node-a"),
                pod("ghost-0", "node-zz"),
                pod("api-1", "node-a"),
            ],
            pod_metrics: vec![pod_metric("api-0"), pod_metric("ghost-0")],
        };

        let views = snapshot.join();
        assert_eq!(views.len(), 2);

        let node_a = &views[0];
        assert_eq!(node_a.name(), "node-a");
        assert!(node_a.metrics.is_some());
        let names = node_a.pods.iter().map(|pod| pod.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["api-0", "api-1"]);
        assert!(node_a.pods[0].metrics.is_some());
        assert!(node_a.pods[1].metrics.is_none());

        let node_b = &views[1];
        assert_eq!(node_b.name(), "node-b");
        assert!(node_b.metrics.is_some());
        assert!(node_b.pods.is_empty());

        assert!(
            views
                .iter()
                .flat_map(|view| view.pods.iter())
                .all(|pod| pod.name() != "ghost-0")
        );
    }

    #[test]
    fn metrics_attach_only_on_name_match() {
        let views = join(
            vec![node("node-a")],
            &[node_metric("node-x")],
            vec![pod("api-0", "node-a")],
            &[pod_metric("api-9")],
        );

        assert!(views[0].metrics.is_none());
        assert!(views[0].pods[0].metrics.is_none());
    }

    #[test]
    fn first_duplicate_metric_wins() {
        let mut second = node_metric("node-a");
        second.metrics.cpu = Some("999".to_string());

        let views = join(
            vec![node("node-a")],
            &[node_metric("node-a"), second],
            Vec::new(),
            &[],
        );

        assert_eq!(
            views[0]
                .metrics
                .as_ref()
                .and_then(|metrics| metrics.cpu.as_deref()),
            Some("250")
        );
    }

    #[test]
    fn pod_metrics_carry_normalized_limits() {
        let views = join(
            vec![node("node-a")],
            &[],
            vec![pod("api-0", "node-a")],
            &[pod_metric("api-0")],
        );

        let metrics = views[0].pods[0].metrics.clone().unwrap();
        assert_eq!(metrics.cpu.as_deref(), Some("100m"));
        assert_eq!(metrics.cpu_total.as_deref(), Some("500m"));
        assert_eq!(metrics.memory.as_deref(), Some("16384Ki"));
        assert_eq!(metrics.memory_total.as_deref(), Some("65536Ki"));
    }

    #[test]
    fn node_without_pods_has_empty_list() {
        let views = join(vec![node("lonely")], &[], Vec::new(), &[]);
        assert!(views[0].pods.is_empty());
    }
}
