use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::CliArgs;
use crate::fetch::{RetryPolicy, SourceKind};
use crate::model::DisplayOptions;

pub const DEFAULT_URL: &str = "http://localhost:8282";
pub const DEFAULT_TOKEN: &str = "token";
const DEFAULT_REFRESH_MS: u64 = 5_000;
const MIN_REFRESH_MS: u64 = 500;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    pub url: String,
    pub token: String,
    pub source: SourceKind,
    pub refresh: Duration,
    pub retry: RetryPolicy,
    pub display: DisplayOptions,
    pub config_source: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    source: Option<SourceKind>,
    #[serde(default, alias = "refresh")]
    refresh_ms: Option<u64>,
    #[serde(default, alias = "timeout")]
    timeout_ms: Option<u64>,
    #[serde(default, alias = "attempts")]
    retries: Option<u32>,
    #[serde(default)]
    display: DisplaySpec,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DisplaySpec {
    #[serde(default, alias = "show_names")]
    show_name: Option<bool>,
    #[serde(default)]
    show_metrics: Option<bool>,
    #[serde(default, alias = "hide_system_pod")]
    hide_system_pods: Option<bool>,
}

/// Merges defaults, the discovered config file and command line flags, in
/// increasing order of precedence.
pub fn load_settings(args: &CliArgs) -> Result<Settings> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let path = args.config.clone().or_else(|| {
        discover_config_path(
            std::env::var("KUBEBOXES_CONFIG").ok(),
            Path::new("."),
            home.as_deref(),
        )
    });

    let file = match &path {
        Some(path) => read_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(
        args,
        file,
        path.map(|path| path.display().to_string()),
    ))
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

fn resolve(args: &CliArgs, file: ConfigFile, config_source: Option<String>) -> Settings {
    let defaults = RetryPolicy::default();
    let display_defaults = DisplayOptions::default();

    let refresh_ms = args
        .refresh_ms
        .or(file.refresh_ms)
        .unwrap_or(DEFAULT_REFRESH_MS)
        .max(MIN_REFRESH_MS);
    let retry = RetryPolicy {
        attempts: args.retries.or(file.retries).unwrap_or(defaults.attempts).max(1),
        timeout: args
            .timeout_ms
            .or(file.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
        initial_backoff: defaults.initial_backoff,
    };

    let display = DisplayOptions {
        show_name: args.show_names
            || file.display.show_name.unwrap_or(display_defaults.show_name),
        show_metrics: args.show_metrics
            || file
                .display
                .show_metrics
                .unwrap_or(display_defaults.show_metrics),
        hide_system_pods: !args.show_system_pods
            && file
                .display
                .hide_system_pods
                .unwrap_or(display_defaults.hide_system_pods),
    };

    Settings {
        url: args
            .url
            .clone()
            .or(file.url)
            .unwrap_or_else(|| DEFAULT_URL.to_string()),
        token: args
            .token
            .clone()
            .or(file.token)
            .unwrap_or_else(|| DEFAULT_TOKEN.to_string()),
        source: args.source.or(file.source).unwrap_or_default(),
        refresh: Duration::from_millis(refresh_ms),
        retry,
        display,
        config_source,
    }
}

fn discover_config_path(
    env_path: Option<String>,
    cwd: &Path,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = env_path
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [cwd.join("kubeboxes.yaml"), cwd.join(".kubeboxes.yaml")];
    if let Some(candidate) = cwd_candidates.into_iter().find(|path| path.exists()) {
        return Some(candidate);
    }

    let home = home?;
    [
        home.join(".config/kubeboxes/config.yaml"),
        home.join(".config/kubeboxes/config.yml"),
    ]
    .into_iter()
    .find(|path| path.exists())
}
