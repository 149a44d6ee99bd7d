use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::app::App;
use crate::model::LoadState;
use crate::view::{DashboardView, MetricLine, NodeCard, PodTile};

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);

const CARD_MIN_WIDTH: u16 = 46;
const TILE: &str = "██";

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let dashboard = app.dashboard();
    render_header(frame, root[0], app, &dashboard);
    render_body(frame, root[1], app, &dashboard);
    render_footer(frame, root[2], app);

    if app.show_help {
        render_help_modal(frame);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App, dashboard: &DashboardView) {
    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, " kubeboxes ", Color::White, PL_A, PL_B);
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&app.source_label, 48)),
        Color::White,
        PL_B,
        BG,
    );
    spans.push(Span::raw(" "));
    spans.extend(toggle_spans("names", app.options.show_name));
    spans.extend(toggle_spans("metrics", app.options.show_metrics));
    spans.extend(toggle_spans("system", !app.options.hide_system_pods));

    let refreshed = match (&app.last_refreshed, app.refreshing) {
        (_, true) => "refreshing…".to_string(),
        (Some(at), false) => format!("updated {}", at.format("%H:%M:%S")),
        (None, false) => "never updated".to_string(),
    };
    let hidden = match dashboard.hidden_pods() {
        0 => String::new(),
        count => format!(" ({count} hidden)"),
    };
    let right = Line::from(vec![Span::styled(
        format!(
            "{} nodes  {} pods{hidden}  {refreshed} ",
            dashboard.nodes.len(),
            dashboard.visible_pods()
        ),
        Style::default().fg(MUTED),
    )]);
    let right_width = spans_width(&right.spans) as u16;

    if right_width == 0 || right_width + 42 >= area.width {
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right)
            .alignment(Alignment::Right)
            .style(Style::default().bg(BG)),
        chunks[1],
    );
}

fn toggle_spans(label: &'static str, enabled: bool) -> Vec<Span<'static>> {
    let style = if enabled {
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(MUTED)
    };
    vec![
        Span::styled(if enabled { "● " } else { "○ " }, style),
        Span::styled(label, style),
        Span::raw("  "),
    ]
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App, dashboard: &DashboardView) {
    match &app.load_state {
        LoadState::Loading => {
            render_notice(frame, area, "Loading cluster data…", MUTED);
            return;
        }
        LoadState::Failed(error) => {
            render_notice(
                frame,
                area,
                &format!("Could not load cluster data\n\n{error}\n\npress r to retry"),
                ERROR,
            );
            return;
        }
        LoadState::Ready => {}
    }

    if dashboard.nodes.is_empty() {
        render_notice(frame, area, "No nodes reported", MUTED);
        return;
    }

    let columns = (area.width / CARD_MIN_WIDTH).max(1) as usize;
    let card_width = area.width / columns as u16;
    let inner_width = card_width.saturating_sub(2) as usize;
    let rows = dashboard.nodes.chunks(columns).collect::<Vec<_>>();

    app.clamp_scroll(rows.len().saturating_sub(1));
    let mut top = area.y;
    let bottom = area.y + area.height;

    for row in rows.iter().skip(app.scroll) {
        if top >= bottom {
            break;
        }
        let cards = row
            .iter()
            .map(|card| card_lines(card, dashboard.options.show_metrics, inner_width))
            .collect::<Vec<_>>();
        let height = cards
            .iter()
            .map(|lines| lines.len() as u16 + 2)
            .max()
            .unwrap_or(2)
            .min(bottom - top);
        let row_area = Rect::new(area.x, top, area.width, height);
        let slots = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Ratio(1, columns as u32); columns])
            .split(row_area);

        for ((card, lines), slot) in row.iter().zip(cards).zip(slots.iter()) {
            let block = Block::default()
                .title(Span::styled(
                    format!(" {} ", card.name),
                    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(MUTED))
                .style(Style::default().bg(PANEL));
            frame.render_widget(Paragraph::new(lines).block(block), *slot);
        }
        top += height;
    }
}

fn render_notice(frame: &mut Frame, area: Rect, message: &str, color: Color) {
    frame.render_widget(
        Paragraph::new(message.to_string())
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(color).bg(BG)),
        centered_rect(70, 40, area),
    );
}

fn card_lines(card: &NodeCard, show_metrics: bool, width: usize) -> Vec<Line<'static>> {
    let mut lines = vec![
        metric_row(
            "cpu",
            &card.current_cpu,
            &card.total_cpu,
            &card.cpu_usage,
        ),
        metric_row(
            "mem",
            &card.current_memory,
            &card.total_memory,
            &card.memory_usage,
        ),
    ];

    if let Some(error) = first_metric_error(card) {
        lines.push(Line::from(Span::styled(
            compact_text(error, width.max(8)),
            Style::default().fg(ERROR),
        )));
    }

    if card.pods.is_empty() {
        lines.push(Line::from(Span::styled(
            "no pods",
            Style::default().fg(MUTED),
        )));
    } else if show_metrics {
        lines.extend(card.pods.iter().map(|pod| pod_detail_line(pod, width)));
    } else {
        lines.extend(wrap_tiles(&card.pods, width));
    }

    if card.hidden_pods > 0 {
        lines.push(Line::from(Span::styled(
            format!("+{} system pods hidden", card.hidden_pods),
            Style::default().fg(MUTED).add_modifier(Modifier::ITALIC),
        )));
    }
    lines
}

fn metric_row(
    label: &'static str,
    current: &MetricLine,
    total: &MetricLine,
    usage: &MetricLine,
) -> Line<'static> {
    let usage_color = match usage {
        MetricLine::Value(_) => WARN,
        MetricLine::Unavailable(_) => MUTED,
    };
    Line::from(vec![
        Span::styled(format!("{label:<4}"), Style::default().fg(MUTED)),
        Span::styled(
            format!("{} / {}", current.display(), total.display()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  "),
        Span::styled(
            usage.display().to_string(),
            Style::default().fg(usage_color).add_modifier(Modifier::BOLD),
        ),
    ])
}

fn first_metric_error(card: &NodeCard) -> Option<&str> {
    [
        &card.total_cpu,
        &card.current_cpu,
        &card.cpu_usage,
        &card.total_memory,
        &card.current_memory,
        &card.memory_usage,
    ]
    .into_iter()
    .find_map(MetricLine::error)
}

/// Lays pod tiles out left to right, breaking lines at `width` columns.
fn wrap_tiles(pods: &[PodTile], width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut used = 0usize;

    for pod in pods {
        let tile = tile_span(pod);
        let tile_width = tile.content.chars().count() + 1;
        if used > 0 && used + tile_width > width {
            lines.push(Line::from(std::mem::take(&mut current)));
            used = 0;
        }
        current.push(tile);
        current.push(Span::raw(" "));
        used += tile_width;
    }
    if !current.is_empty() {
        lines.push(Line::from(current));
    }
    lines
}

fn tile_span(pod: &PodTile) -> Span<'static> {
    match &pod.label {
        Some(label) => Span::styled(
            format!(" {label} "),
            Style::default().fg(pod.color.contrast()).bg(pod.color.into()),
        ),
        None => Span::styled(TILE, Style::default().fg(pod.color.into())),
    }
}

fn pod_detail_line(pod: &PodTile, width: usize) -> Line<'static> {
    let mut spans = vec![
        Span::styled(TILE, Style::default().fg(pod.color.into())),
        Span::raw(" "),
    ];
    let name = pod.label.as_deref().unwrap_or(pod.name.as_str());
    spans.push(Span::styled(
        compact_text(name, 24),
        Style::default().fg(Color::White),
    ));

    let mut detail = String::new();
    if let Some(resources) = &pod.resources {
        detail.push_str(&format!(
            "  req {}/{} lim {}/{}",
            resources.cpu_request.as_deref().unwrap_or("-"),
            resources.memory_request.as_deref().unwrap_or("-"),
            resources.cpu_limit.as_deref().unwrap_or("-"),
            resources.memory_limit.as_deref().unwrap_or("-"),
        ));
    }
    if let Some(usage) = &pod.usage {
        detail.push_str(&format!("  {usage}"));
    }
    if !detail.is_empty() {
        let used = spans_width(&spans);
        spans.push(Span::styled(
            compact_text(&detail, width.saturating_sub(used).max(1)),
            Style::default().fg(MUTED),
        ));
    }
    Line::from(spans)
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let status_bg = if footer_has_failure(&app.status) {
        ERROR
    } else {
        PL_B
    };
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(
            " {} ",
            compact_text(&app.status, area.width.saturating_sub(40).max(24) as usize)
        ),
        Color::White,
        status_bg,
        BG,
    );
    spans.push(Span::styled(
        " q quit  n names  m metrics  s system  r refresh  ? help",
        Style::default().fg(MUTED),
    ));

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn footer_has_failure(status_text: &str) -> bool {
    let status = status_text.to_ascii_lowercase();
    ["failed", "error", "timed out", "refused", "forbidden"]
        .iter()
        .any(|needle| status.contains(needle))
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn render_help_modal(frame: &mut Frame) {
    let area = centered_rect(60, 60, frame.area());
    frame.render_widget(Clear, area);

    let lines = [
        "Toggles: n pod names  m requests/limits and usage  s system pods",
        "Data: r refresh now (cancels a refresh in flight)",
        "Scroll: j/k or arrows  PgUp/PgDn  g top  G bottom",
        "Other: ? toggle help  Esc close  q quit",
        "",
        "Pods sharing an owner share a color. System namespace pods are grey.",
    ]
    .into_iter()
    .map(Line::from)
    .collect::<Vec<_>>();

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
