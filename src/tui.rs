//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on
//! exit, and painting a `Snapshot` with `ratatui`. Rendering is a pure read of
//! the snapshot; every color comes from the `Theme` passed in.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};

use crate::app::Snapshot;
use crate::output::strip_ansi;
use crate::process::{Capture, ProcessState, ProcessView};

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// How recently a shortcut command must have printed to get a check mark.
const COMMAND_ACTIVE_WINDOW: Duration = Duration::from_secs(3);

/// Colors and text styles for every part of the frame.
#[derive(Debug, Clone)]
pub struct Theme {
    pub border: Style,
    pub tab_active: Style,
    pub tab_inactive: Style,
    pub notification: Style,
    pub tab_status: Style,
    pub command: Style,
    pub description: Style,
    pub divider: Style,
    pub output: Style,
    pub muted: Style,
    pub selected: Style,
    pub success: Style,
    pub warning: Style,
    pub use_symbols: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            border: Style::default().fg(Color::DarkGray),
            tab_active: Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED),
            tab_inactive: Style::default().fg(Color::Gray),
            notification: Style::default().fg(Color::Magenta),
            tab_status: Style::default().fg(Color::DarkGray),
            command: Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
            description: Style::default().fg(Color::Green),
            divider: Style::default().fg(Color::DarkGray),
            output: Style::default(),
            muted: Style::default().fg(Color::DarkGray),
            selected: Style::default().fg(Color::Magenta),
            success: Style::default().fg(Color::Green),
            warning: Style::default().fg(Color::Yellow),
            use_symbols: true,
        }
    }
}

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, and creates a `ratatui` Terminal instance.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, SetTitle("ren"))?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws one frame from the snapshot.
pub fn draw<B: Backend>(
    terminal: &mut Terminal<B>,
    snapshot: &Snapshot,
    theme: &Theme,
) -> io::Result<()> {
    terminal.draw(|frame| render(frame, snapshot, theme))?;
    Ok(())
}

fn render(frame: &mut Frame, snapshot: &Snapshot, theme: &Theme) {
    let area = frame.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);

    frame.render_widget(tab_bar(snapshot, theme, chunks[0].width), chunks[0]);
    match snapshot.active_process() {
        Some(process) => render_process(frame, process, theme, chunks[1]),
        None => render_overview(frame, snapshot, theme, chunks[1]),
    }
    frame.render_widget(footer(snapshot, theme), chunks[2]);
}

fn tab_bar(snapshot: &Snapshot, theme: &Theme, width: u16) -> Paragraph<'static> {
    let count = snapshot.tabs.len().max(1);
    let inner = (width as usize).saturating_sub(2);
    // One separator between neighbours.
    let per_tab = inner.saturating_sub(count - 1) / count;
    let dot = if theme.use_symbols { "● " } else { "* " };

    let mut spans = Vec::new();
    for (idx, tab) in snapshot.tabs.iter().enumerate() {
        if idx > 0 {
            spans.push(Span::styled("│", theme.border));
        }
        let mut label = String::new();
        if tab.notification {
            label.push_str(dot);
        }
        label.push_str(&tab.name);
        if !tab.status.is_empty() {
            label.push_str(&format!(" [{}]", tab.status));
        }
        let label = smart_truncate(&label, per_tab.saturating_sub(2), "…");
        let padded = format!(" {:<width$} ", label, width = per_tab.saturating_sub(2));
        let style = if idx == snapshot.active_tab {
            theme.tab_active
        } else if tab.notification {
            theme.notification
        } else if !tab.status.is_empty() {
            theme.tab_status
        } else {
            theme.tab_inactive
        };
        spans.push(Span::styled(padded, style));
    }

    Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(theme.border),
    )
}

fn render_process(frame: &mut Frame, process: &ProcessView, theme: &Theme, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(theme.border);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    if inner.height == 0 {
        return;
    }

    let mut lines = vec![
        Line::from(Span::styled(format!("$ {}", process.command), theme.command)),
        Line::from(Span::styled(process.description.clone(), theme.description)),
        Line::from(Span::styled(
            "─".repeat(inner.width as usize),
            theme.divider,
        )),
    ];
    if let Capture::Failed(err) = &process.capture {
        lines.push(Line::from(Span::styled(
            format!("output capture stopped: {}", err),
            theme.warning,
        )));
    }
    let room = (inner.height as usize).saturating_sub(lines.len());
    let output = strip_ansi(&process.output);
    if output.trim().is_empty() {
        lines.push(Line::from(Span::styled("No output yet...", theme.muted)));
    } else {
        let all: Vec<&str> = output.lines().collect();
        let start = all.len().saturating_sub(room);
        lines.extend(
            all[start..]
                .iter()
                .map(|l| Line::from(Span::styled(l.to_string(), theme.output))),
        );
    }
    frame.render_widget(Paragraph::new(Text::from(lines)), inner);
}

fn render_overview(frame: &mut Frame, snapshot: &Snapshot, theme: &Theme, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(theme.border);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let shortcut_height = (snapshot.commands.len().max(1) + 2) as u16;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(shortcut_height), Constraint::Min(1)])
        .split(inner);

    frame.render_widget(command_list(snapshot, theme), chunks[0]);
    frame.render_widget(process_table(snapshot, theme), chunks[1]);
}

fn command_list(snapshot: &Snapshot, theme: &Theme) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled("shortcuts:", theme.muted))];
    if snapshot.commands.is_empty() {
        lines.push(Line::from(Span::styled(
            "consider adding a command so you can easily ren it",
            theme.muted.add_modifier(Modifier::ITALIC),
        )));
    }
    let (marker, done) = if theme.use_symbols {
        ("›", "✓")
    } else {
        (">", "+")
    };
    let now = std::time::Instant::now();
    for (idx, command) in snapshot.commands.iter().enumerate() {
        let selected = idx == snapshot.selected_command;
        let recent = command.active_within(COMMAND_ACTIVE_WINDOW, now);
        let status = if recent { done } else { "•" };
        let style = if recent {
            theme.success
        } else if selected {
            theme.muted
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} ", if selected { marker } else { " " }),
                theme.selected,
            ),
            Span::styled(format!("{} {}", status, command.shortname), style),
        ]));
    }
    Paragraph::new(Text::from(lines))
}

fn process_table(snapshot: &Snapshot, theme: &Theme) -> Table<'static> {
    let header = Row::new(vec!["command / process", "output", "status"]).style(theme.muted);
    let rows: Vec<Row> = snapshot
        .processes
        .iter()
        .map(|p| {
            Row::new(vec![
                Cell::from(p.shortname.clone()),
                Cell::from(strip_ansi(p.last_line())),
                Cell::from(process_status(p)),
            ])
        })
        .collect();
    Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Min(10),
            Constraint::Length(12),
        ],
    )
    .header(header)
}

fn process_status(process: &ProcessView) -> String {
    match (process.state, process.started_at) {
        (ProcessState::Stopped, _) => "stopped".to_string(),
        (ProcessState::Stopping, _) => "stopping".to_string(),
        _ if process.capture.is_lost() => "output lost".to_string(),
        (_, Some(started)) => relative_time(started.elapsed()),
        (_, None) => ProcessState::Idle.label().to_string(),
    }
}

fn footer(snapshot: &Snapshot, theme: &Theme) -> Paragraph<'static> {
    if snapshot.shutting_down {
        return Paragraph::new("Shutting down: stopping all processes...").style(theme.warning);
    }
    let hint = if snapshot.is_overview() {
        if theme.use_symbols {
            "←/→ tabs · ↑/↓ pick · enter run · q quit all"
        } else {
            "left/right tabs | up/down pick | enter run | q quit all"
        }
    } else if theme.use_symbols {
        "←/→ tabs · x stop · r restart · c clear · q quit all"
    } else {
        "left/right tabs | x stop | r restart | c clear | q quit all"
    };
    Paragraph::new(Line::from(vec![
        Span::styled(hint.to_string(), theme.muted),
        Span::styled(
            format!("  up {}", relative_time(snapshot.uptime)),
            theme.muted,
        ),
    ]))
    .alignment(Alignment::Left)
}

/// Coarse human duration: `42s`, `5m`, `3h`, `2d`.
pub fn relative_time(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3_599 => format!("{}m", secs / 60),
        3_600..=86_399 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// Shortens `text` to `limit` characters.
///
/// Inner vowels are dropped first, working outwards from the middle and
/// keeping two characters at each end. Only if that is not enough is the
/// tail cut and `ellipsis` appended.
pub fn smart_truncate(text: &str, limit: usize, ellipsis: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }
    let ellipsis_len = ellipsis.chars().count();
    if limit <= ellipsis_len {
        return chars.into_iter().take(limit).collect();
    }

    if chars.len() > 4 {
        let center = chars.len() / 2;
        let mut vowels: Vec<usize> = (2..chars.len() - 2)
            .filter(|&i| "aeiouAEIOU".contains(chars[i]))
            .collect();
        vowels.sort_by_key(|&i| i.abs_diff(center));
        let drop_count = (chars.len() - limit).min(vowels.len());
        let mut dropped: Vec<usize> = vowels.into_iter().take(drop_count).collect();
        dropped.sort_unstable_by(|a, b| b.cmp(a));
        for idx in dropped {
            chars.remove(idx);
        }
    }

    if chars.len() <= limit {
        return chars.into_iter().collect();
    }
    let mut cut: String = chars.into_iter().take(limit - ellipsis_len).collect();
    cut.push_str(ellipsis);
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Tab, OVERVIEW_TAB};
    use ratatui::backend::TestBackend;

    fn view(name: &str, output: &str, state: ProcessState) -> ProcessView {
        ProcessView {
            shortname: name.to_string(),
            command: format!("run-{}", name),
            description: format!("{} service", name),
            output: output.to_string(),
            state,
            capture: Capture::Capturing,
            started_at: None,
            last_activity: None,
        }
    }

    fn snapshot(active_tab: usize) -> Snapshot {
        let tab = |name: &str, notification: bool, status: &str| Tab {
            name: name.to_string(),
            notification,
            status: status.to_string(),
        };
        Snapshot {
            processes: vec![
                view("api", "listening on :8080\n\x1b[32mGET /\x1b[0m 200\n", ProcessState::Running),
                view("worker", "", ProcessState::Stopped),
            ],
            commands: vec![view("migrate", "", ProcessState::Idle)],
            tabs: vec![
                tab(OVERVIEW_TAB, false, ""),
                tab("api", true, ""),
                tab("worker", false, "stopped"),
            ],
            active_tab,
            selected_command: 0,
            width: 80,
            height: 20,
            uptime: Duration::from_secs(125),
            shutting_down: false,
        }
    }

    fn render_to_string(snapshot: &Snapshot) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        draw(&mut terminal, snapshot, &Theme::default()).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer.get(x, y).symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn overview_lists_tabs_commands_and_processes() {
        let screen = render_to_string(&snapshot(0));
        assert!(screen.contains("overview"));
        assert!(screen.contains("● api"));
        assert!(screen.contains("worker [stopped]"));
        assert!(screen.contains("shortcuts:"));
        assert!(screen.contains("migrate"));
        assert!(screen.contains("GET / 200"));
        assert!(screen.contains("stopped"));
        assert!(screen.contains("up 2m"));
    }

    #[test]
    fn process_tab_shows_header_and_clean_output() {
        let screen = render_to_string(&snapshot(1));
        assert!(screen.contains("$ run-api"));
        assert!(screen.contains("api service"));
        assert!(screen.contains("listening on :8080"));
        assert!(!screen.contains("\x1b"));

        let screen = render_to_string(&snapshot(2));
        assert!(screen.contains("No output yet..."));
    }

    #[test]
    fn failed_capture_is_shown_on_overview_and_tab() {
        let mut snap = snapshot(0);
        snap.processes[0].capture = Capture::Failed("broken pipe".to_string());
        let screen = render_to_string(&snap);
        assert!(screen.contains("output lost"));

        snap.active_tab = 1;
        let screen = render_to_string(&snap);
        assert!(screen.contains("output capture stopped: broken pipe"));
        assert!(screen.contains("listening on :8080"));
    }

    #[test]
    fn shutdown_footer_replaces_hints() {
        let mut snap = snapshot(0);
        snap.shutting_down = true;
        let screen = render_to_string(&snap);
        assert!(screen.contains("Shutting down"));
    }

    #[test]
    fn smart_truncate_drops_vowels_before_cutting() {
        assert_eq!(smart_truncate("api", 10, "…"), "api");
        assert_eq!(smart_truncate("frontend", 7, "…"), "frontnd");
        assert_eq!(smart_truncate("frontend", 6, "…"), "frntnd");
        let cut = smart_truncate("background-worker", 8, "…");
        assert_eq!(cut, "backgrn…");
        assert_eq!(smart_truncate("abcdef", 1, "…"), "a");
    }

    #[test]
    fn relative_time_picks_coarsest_unit() {
        assert_eq!(relative_time(Duration::from_secs(5)), "5s");
        assert_eq!(relative_time(Duration::from_secs(125)), "2m");
        assert_eq!(relative_time(Duration::from_secs(7_200)), "2h");
        assert_eq!(relative_time(Duration::from_secs(200_000)), "2d");
    }
}
