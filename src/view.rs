use rand_core::RngCore;
use serde::Serialize;

use crate::color::{ColorAssigner, Rgb};
use crate::model::{ContainerResources, DisplayOptions, Metrics, NodeView, PodView};
use crate::quantity::{self, MetricParseError};

pub const POD_NAME_MAX_CHARS: usize = 24;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub options: DisplayOptions,
    pub nodes: Vec<NodeCard>,
}

impl DashboardView {
    pub fn visible_pods(&self) -> usize {
        self.nodes.iter().map(|node| node.pods.len()).sum()
    }

    pub fn hidden_pods(&self) -> usize {
        self.nodes.iter().map(|node| node.hidden_pods).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCard {
    pub name: String,
    pub total_cpu: MetricLine,
    pub current_cpu: MetricLine,
    pub cpu_usage: MetricLine,
    pub total_memory: MetricLine,
    pub current_memory: MetricLine,
    pub memory_usage: MetricLine,
    pub pods: Vec<PodTile>,
    pub hidden_pods: usize,
}

/// A derived value, or the reason it could not be computed for this entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum MetricLine {
    Value(String),
    Unavailable(String),
}

impl MetricLine {
    pub fn display(&self) -> &str {
        match self {
            Self::Value(value) => value,
            Self::Unavailable(_) => "n/a",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Value(_) => None,
            Self::Unavailable(reason) => Some(reason),
        }
    }
}

impl From<Result<String, MetricParseError>> for MetricLine {
    fn from(value: Result<String, MetricParseError>) -> Self {
        match value {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Unavailable(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PodTile {
    pub name: String,
    pub namespace: String,
    pub color: Rgb,
    pub label: Option<String>,
    pub resources: Option<ContainerResources>,
    pub usage: Option<String>,
}

pub fn build_dashboard<R: RngCore>(
    nodes: &[NodeView],
    options: &DisplayOptions,
    colors: &mut ColorAssigner<R>,
) -> DashboardView {
    DashboardView {
        options: *options,
        nodes: nodes
            .iter()
            .map(|node| node_card(node, options, colors))
            .collect(),
    }
}

pub fn is_pod_visible(pod: &PodView, options: &DisplayOptions) -> bool {
    !(options.hide_system_pods && pod.is_system())
}

fn node_card<R: RngCore>(
    node: &NodeView,
    options: &DisplayOptions,
    colors: &mut ColorAssigner<R>,
) -> NodeCard {
    let metrics = node.metrics.as_ref();
    let cpu = required(metrics, "cpu", |m| m.cpu.as_deref());
    let cpu_total = required(metrics, "cpu_total", |m| m.cpu_total.as_deref());
    let memory = required(metrics, "memory", |m| m.memory.as_deref());
    let memory_total = required(metrics, "memory_total", |m| m.memory_total.as_deref());

    let pods = node
        .pods
        .iter()
        .filter(|pod| is_pod_visible(pod, options))
        .map(|pod| pod_tile(pod, options, colors))
        .collect::<Vec<_>>();

    NodeCard {
        name: node.name().to_string(),
        total_cpu: node
            .allocatable("cpu")
            .map(str::to_string)
            .ok_or(MetricParseError::Missing {
                field: "allocatable.cpu",
            })
            .into(),
        current_cpu: cpu.clone().map(str::to_string).into(),
        cpu_usage: usage_percent(cpu_total, cpu).into(),
        total_memory: memory_total.clone().and_then(quantity::to_gb).into(),
        current_memory: memory.clone().and_then(quantity::to_gb).into(),
        memory_usage: usage_percent(memory_total, memory).into(),
        hidden_pods: node.pods.len() - pods.len(),
        pods,
    }
}

fn pod_tile<R: RngCore>(
    pod: &PodView,
    options: &DisplayOptions,
    colors: &mut ColorAssigner<R>,
) -> PodTile {
    let label = options
        .show_name
        .then(|| pod.name().chars().take(POD_NAME_MAX_CHARS).collect());
    let resources = options
        .show_metrics
        .then(|| pod.first_container_resources())
        .flatten();
    let usage = options
        .show_metrics
        .then(|| pod.metrics.as_ref().map(pod_usage_summary))
        .flatten();

    PodTile {
        name: pod.name().to_string(),
        namespace: pod.namespace().to_string(),
        color: colors.color_for(&pod.pod.metadata),
        label,
        resources,
        usage,
    }
}

fn pod_usage_summary(metrics: &Metrics) -> String {
    let metrics = Some(metrics);
    let cpu = MetricLine::from(usage_percent(
        required(metrics, "cpu_total", |m| m.cpu_total.as_deref()),
        required(metrics, "cpu", |m| m.cpu.as_deref()),
    ));
    let memory = MetricLine::from(usage_percent(
        required(metrics, "memory_total", |m| m.memory_total.as_deref()),
        required(metrics, "memory", |m| m.memory.as_deref()),
    ));
    format!("cpu {} mem {}", cpu.display(), memory.display())
}

fn usage_percent(
    total: Result<&str, MetricParseError>,
    current: Result<&str, MetricParseError>,
) -> Result<String, MetricParseError> {
    quantity::percent_of(total?, current?).map(quantity::format_percent)
}

fn required<'a>(
    metrics: Option<&'a Metrics>,
    field: &'static str,
    pick: impl Fn(&'a Metrics) -> Option<&'a str>,
) -> Result<&'a str, MetricParseError> {
    metrics
        .and_then(pick)
        .ok_or(MetricParseError::Missing { field })
}
