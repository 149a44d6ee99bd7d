mod app;
mod cli;
mod color;
mod config;
mod fetch;
mod input;
mod join;
mod model;
mod quantity;
mod ui;
mod view;

use anyhow::{Context, Result};
use app::{App, AppCommand};
use clap::Parser;
use cli::CliArgs;
use color::ColorAssigner;
use config::Settings;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use fetch::{ClusterSource, RetryPolicy};
use futures::StreamExt;
use model::NodeView;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

struct RefreshOutcome {
    generation: u64,
    result: std::result::Result<Vec<NodeView>, String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref(), args.snapshot)?;

    let settings = config::load_settings(&args)?;
    if let Some(path) = &settings.config_source {
        info!(config = %path, "loaded config file");
    }

    let source = ClusterSource::connect(settings.source, &settings.url, &settings.token).await?;
    info!(source = %source.describe(), "cluster source ready");

    if args.snapshot {
        return print_snapshot(&source, &settings).await;
    }

    let mut app = App::new(source.describe(), settings.display);
    run(&mut app, source, &settings).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    // The dashboard owns stdout, so logs go to a file, stderr or nowhere.
    let _ = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None if to_stderr => builder.with_writer(io::stderr).try_init(),
        None => builder.with_writer(io::sink).try_init(),
    };

    Ok(())
}

async fn print_snapshot(source: &ClusterSource, settings: &Settings) -> Result<()> {
    let nodes = fetch::fetch_with_retry(source, &settings.retry)
        .await?
        .join();
    let mut colors = ColorAssigner::new();
    let dashboard = view::build_dashboard(&nodes, &settings.display, &mut colors);
    let rendered =
        serde_json::to_string_pretty(&dashboard).context("failed to serialize dashboard")?;
    println!("{rendered}");
    Ok(())
}

async fn run(app: &mut App, source: ClusterSource, settings: &Settings) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, source, settings).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    source: ClusterSource,
    settings: &Settings,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(settings.refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<RefreshOutcome>();
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(key) {
                            debug!("action={action:?}");
                            if app.apply_action(action) == AppCommand::Refresh {
                                start_refresh(app, &source, &settings.retry, &refresh_tx, &mut in_flight);
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if refresh_pending(app.refreshing, in_flight.as_ref()) {
                    debug!("refresh still in flight, skipping poll");
                } else {
                    start_refresh(app, &source, &settings.retry, &refresh_tx, &mut in_flight);
                }
            }
            maybe_outcome = refresh_rx.recv() => {
                if let Some(outcome) = maybe_outcome
                    && app.finish_refresh(outcome.generation, outcome.result)
                {
                    in_flight = None;
                }
            }
        }
    }

    if let Some(task) = in_flight.take() {
        task.abort();
    }
    Ok(())
}

/// A refresh task that ended without reporting does not hold back polling.
fn refresh_pending(refreshing: bool, in_flight: Option<&JoinHandle<()>>) -> bool {
    refreshing && !in_flight.is_none_or(JoinHandle::is_finished)
}

/// Starts a refresh, aborting any refresh that is still running.
fn start_refresh(
    app: &mut App,
    source: &ClusterSource,
    retry: &RetryPolicy,
    tx: &mpsc::UnboundedSender<RefreshOutcome>,
    in_flight: &mut Option<JoinHandle<()>>,
) {
    if let Some(task) = in_flight.take() {
        debug!("superseding in-flight refresh");
        task.abort();
    }

    let generation = app.begin_refresh();
    let source = source.clone();
    let retry = *retry;
    let tx = tx.clone();
    *in_flight = Some(tokio::spawn(async move {
        let result = fetch::fetch_with_retry(&source, &retry)
            .await
            .map(|snapshot| snapshot.join())
            .map_err(|error| compact_error(&error));
        let _ = tx.send(RefreshOutcome { generation, result });
    }));
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}
