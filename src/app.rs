use chrono::{DateTime, Local};

use crate::color::ColorAssigner;
use crate::input::Action;
use crate::model::{DisplayOptions, LoadState, NodeView};
use crate::view::{self, DashboardView};

const PAGE_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Refresh,
}

pub struct App {
    pub running: bool,
    pub source_label: String,
    pub options: DisplayOptions,
    pub load_state: LoadState,
    pub nodes: Vec<NodeView>,
    pub status: String,
    pub show_help: bool,
    pub scroll: usize,
    pub last_refreshed: Option<DateTime<Local>>,
    pub refreshing: bool,
    colors: ColorAssigner,
    generation: u64,
}

impl App {
    pub fn new(source_label: impl Into<String>, options: DisplayOptions) -> Self {
        Self {
            running: true,
            source_label: source_label.into(),
            options,
            load_state: LoadState::Loading,
            nodes: Vec::new(),
            status: "Loading cluster data".to_string(),
            show_help: false,
            scroll: 0,
            last_refreshed: None,
            refreshing: false,
            colors: ColorAssigner::new(),
            generation: 0,
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if self.show_help && !matches!(action, Action::ToggleHelp | Action::Quit) {
            self.show_help = false;
            if matches!(action, Action::Cancel) {
                return AppCommand::None;
            }
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::ToggleNames => {
                self.options.show_name = !self.options.show_name;
                self.set_status(format!("Pod names {}", on_off(self.options.show_name)));
                AppCommand::None
            }
            Action::ToggleMetrics => {
                self.options.show_metrics = !self.options.show_metrics;
                self.set_status(format!(
                    "Pod resources {}",
                    on_off(self.options.show_metrics)
                ));
                AppCommand::None
            }
            Action::ToggleSystemPods => {
                self.options.hide_system_pods = !self.options.hide_system_pods;
                self.set_status(format!(
                    "System pods {}",
                    on_off(!self.options.hide_system_pods)
                ));
                AppCommand::None
            }
            Action::Refresh => AppCommand::Refresh,
            Action::Down => {
                self.scroll = self.scroll.saturating_add(1);
                AppCommand::None
            }
            Action::Up => {
                self.scroll = self.scroll.saturating_sub(1);
                AppCommand::None
            }
            Action::PageDown => {
                self.scroll = self.scroll.saturating_add(PAGE_LINES);
                AppCommand::None
            }
            Action::PageUp => {
                self.scroll = self.scroll.saturating_sub(PAGE_LINES);
                AppCommand::None
            }
            Action::Top => {
                self.scroll = 0;
                AppCommand::None
            }
            Action::Bottom => {
                self.scroll = usize::MAX;
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::Cancel => AppCommand::None,
        }
    }

    /// Marks a refresh as in flight and returns the generation its result
    /// must carry. Any earlier generation becomes stale.
    pub fn begin_refresh(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.refreshing = true;
        self.generation
    }

    /// Applies a refresh result. Returns `false` when the result belongs to a
    /// superseded refresh and was dropped.
    pub fn finish_refresh(
        &mut self,
        generation: u64,
        outcome: Result<Vec<NodeView>, String>,
    ) -> bool {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "dropping stale refresh");
            return false;
        }
        self.refreshing = false;

        match outcome {
            Ok(nodes) => {
                let pods = nodes.iter().map(|node| node.pods.len()).sum::<usize>();
                self.set_status(format!("Loaded {} nodes, {pods} pods", nodes.len()));
                self.nodes = nodes;
                self.load_state = LoadState::Ready;
                self.last_refreshed = Some(Local::now());
                tracing::debug!(owners = self.colors.len(), "refresh applied");
            }
            Err(error) => {
                if self.load_state == LoadState::Ready {
                    self.set_status(format!("Refresh failed, showing previous data: {error}"));
                } else {
                    self.set_status(format!("Refresh failed: {error}"));
                    self.load_state = LoadState::Failed(error);
                }
            }
        }
        true
    }

    pub fn dashboard(&mut self) -> DashboardView {
        view::build_dashboard(&self.nodes, &self.options, &mut self.colors)
    }

    pub fn clamp_scroll(&mut self, max: usize) {
        self.scroll = self.scroll.min(max);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "shown" } else { "hidden" }
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    let status = status.replace(['\n', '\r'], " ");
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}
