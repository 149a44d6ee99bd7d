use clap::Parser;
use std::path::PathBuf;

use crate::fetch::SourceKind;

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "kubeboxes",
    version,
    about = "Live boxes of cluster nodes and their pods, sized by capacity and usage."
)]
pub struct CliArgs {
    /// Base URL of the dashboard API
    #[arg(long)]
    pub url: Option<String>,

    /// Credential passed to the dashboard API as a bearer token
    #[arg(long)]
    pub token: Option<String>,

    /// Where cluster data comes from
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Per-attempt fetch timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Fetch attempts per refresh before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    /// Start with pod names visible
    #[arg(long)]
    pub show_names: bool,

    /// Start with container requests/limits visible
    #[arg(long)]
    pub show_metrics: bool,

    /// Start with pods from system namespaces visible
    #[arg(long)]
    pub show_system_pods: bool,

    /// Fetch once, print the view model as JSON and exit
    #[arg(long)]
    pub snapshot: bool,

    /// Config file (defaults to KUBEBOXES_CONFIG or kubeboxes.yaml lookup)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file while the dashboard owns the terminal
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
