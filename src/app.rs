//! Application state and UI logic.
//!
//! This module holds the `App` struct: the tab list, the active tab, the
//! command picker selection and the terminal size. `App::update` is the single
//! dispatcher for every `Event`; it mutates this state, performs the cheap
//! synchronous supervisor calls itself, and hands anything that has to wait on
//! a child process back to the event loop as an `AppAction`.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{debug, info, warn};

use crate::events::{Event, Target};
use crate::process::ProcessView;
use crate::runner::{Supervisor, SupervisorSet};

/// Name of the fixed first tab.
pub const OVERVIEW_TAB: &str = "overview";
/// Status text shown on a tab whose process the operator stopped.
pub const STATUS_STOPPED: &str = "stopped";
/// Status text shown on a tab whose process failed to start.
pub const STATUS_FAILED: &str = "failed";

/// One entry of the tab bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    /// Process shortname, or [`OVERVIEW_TAB`].
    pub name: String,
    /// Unseen recent output on a tab that is not being looked at.
    pub notification: bool,
    pub status: String,
}

impl Tab {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notification: false,
            status: String::new(),
        }
    }
}

/// Follow-up work that must not block the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Stop a process in the background.
    Stop(Target),
    /// Restart a process or run a command in the background.
    Restart(Target),
    /// Stop everything, then exit.
    Quit,
}

/// The main application state container.
#[derive(Debug)]
pub struct App {
    /// Overview first, then one tab per process in configuration order.
    pub tabs: Vec<Tab>,
    pub active_tab: usize,
    /// Highlighted entry of the command picker.
    pub selected_command: usize,
    pub width: u16,
    pub height: u16,
    pub started_at: Instant,
    /// Set while every process is being asked to stop.
    pub shutting_down: bool,
    command_count: usize,
}

/// Read-only view handed to the renderer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub processes: Vec<ProcessView>,
    pub commands: Vec<ProcessView>,
    pub tabs: Vec<Tab>,
    pub active_tab: usize,
    pub selected_command: usize,
    pub width: u16,
    pub height: u16,
    pub uptime: Duration,
    pub shutting_down: bool,
}

impl Snapshot {
    pub fn is_overview(&self) -> bool {
        self.active_tab == 0
    }

    pub fn active_tab_name(&self) -> &str {
        self.tabs
            .get(self.active_tab)
            .map(|t| t.name.as_str())
            .unwrap_or(OVERVIEW_TAB)
    }

    pub fn active_process(&self) -> Option<&ProcessView> {
        if self.is_overview() {
            return None;
        }
        let name = self.active_tab_name();
        self.processes.iter().find(|p| p.shortname == name)
    }
}

impl App {
    /// Creates a new `App` with one tab per supervised process.
    pub fn new(supervisors: &SupervisorSet) -> Self {
        let tabs = std::iter::once(Tab::new(OVERVIEW_TAB))
            .chain(
                supervisors
                    .processes()
                    .iter()
                    .map(|p| Tab::new(p.shortname())),
            )
            .collect();
        Self {
            tabs,
            active_tab: 0,
            selected_command: 0,
            width: 0,
            height: 0,
            started_at: Instant::now(),
            shutting_down: false,
            command_count: supervisors.commands().len(),
        }
    }

    pub fn is_overview(&self) -> bool {
        self.active_tab == 0
    }

    /// Supervisor behind the active tab, looked up by shortname.
    pub fn active_process<'a>(&self, supervisors: &'a SupervisorSet) -> Option<&'a Supervisor> {
        if self.is_overview() {
            return None;
        }
        self.tabs
            .get(self.active_tab)
            .and_then(|tab| supervisors.find(&tab.name))
    }

    /// Applies one event. Events are processed strictly one at a time.
    pub fn update(&mut self, event: Event, supervisors: &SupervisorSet) -> AppAction {
        match event {
            Event::Key(key) => self.handle_key(key, supervisors),
            Event::Resize { width, height } => {
                self.width = width;
                self.height = height;
                AppAction::None
            }
            Event::ProcessStarted { target } => {
                if let Some(sup) = supervisors.get(target) {
                    info!(process = %sup.shortname(), "process started");
                }
                self.refresh_notifications(supervisors);
                AppAction::None
            }
            Event::ProcessStartFailed { target, error } => {
                if let Some(sup) = supervisors.get(target) {
                    warn!(process = %sup.shortname(), %error, "error starting process");
                    if let Some(tab) = self.tab_mut(sup.shortname()) {
                        tab.status = STATUS_FAILED.to_string();
                    }
                }
                self.refresh_notifications(supervisors);
                AppAction::None
            }
            Event::ProcessUpdated { .. } | Event::Tick => {
                self.refresh_notifications(supervisors);
                AppAction::None
            }
            Event::Shutdown => AppAction::Quit,
        }
    }

    fn handle_key(&mut self, key: KeyEvent, supervisors: &SupervisorSet) -> AppAction {
        if key.kind == KeyEventKind::Release {
            return AppAction::None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => AppAction::Quit,
            KeyCode::Char('q') => AppAction::Quit,
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('l') => {
                self.active_tab = (self.active_tab + 1) % self.tabs.len();
                self.arrive(supervisors);
                AppAction::None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('h') => {
                self.active_tab = (self.active_tab + self.tabs.len() - 1) % self.tabs.len();
                self.arrive(supervisors);
                AppAction::None
            }
            KeyCode::Char('x') => {
                let Some(target) = self.active_process(supervisors).map(Supervisor::target) else {
                    return AppAction::None;
                };
                if let Some(tab) = self.tabs.get_mut(self.active_tab) {
                    tab.status = STATUS_STOPPED.to_string();
                    tab.notification = false;
                }
                AppAction::Stop(target)
            }
            KeyCode::Char('r') => {
                let Some(target) = self.active_process(supervisors).map(Supervisor::target) else {
                    return AppAction::None;
                };
                if let Some(tab) = self.tabs.get_mut(self.active_tab) {
                    tab.status.clear();
                }
                AppAction::Restart(target)
            }
            KeyCode::Char('c') => {
                if let Some(sup) = self.active_process(supervisors) {
                    sup.clear_output();
                }
                AppAction::None
            }
            KeyCode::Up if self.is_overview() && self.command_count > 0 => {
                self.selected_command =
                    (self.selected_command + self.command_count - 1) % self.command_count;
                AppAction::None
            }
            KeyCode::Down if self.is_overview() && self.command_count > 0 => {
                self.selected_command = (self.selected_command + 1) % self.command_count;
                AppAction::None
            }
            KeyCode::Enter if self.is_overview() && self.command_count > 0 => {
                AppAction::Restart(Target::Command(self.selected_command))
            }
            _ => AppAction::None,
        }
    }

    // Clears the arrived-at tab's notification and makes its process read as
    // inactive, so output already in flight does not flag it again.
    fn arrive(&mut self, supervisors: &SupervisorSet) {
        let Some(tab) = self.tabs.get_mut(self.active_tab) else {
            return;
        };
        tab.notification = false;
        if let Some(sup) = supervisors.find(&tab.name) {
            debug!(process = %sup.shortname(), "clearing notification");
            sup.mark_seen();
        }
    }

    /// Recomputes every tab's notification from live process activity.
    ///
    /// Each process lock is taken and released on its own inside
    /// `is_active`; no two are ever held together.
    pub fn refresh_notifications(&mut self, supervisors: &SupervisorSet) {
        let active_tab = self.active_tab;
        for (idx, tab) in self.tabs.iter_mut().enumerate().skip(1) {
            tab.notification = match supervisors.find(&tab.name) {
                Some(sup) => idx != active_tab && sup.is_active(),
                None => false,
            };
        }
    }

    fn tab_mut(&mut self, name: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().skip(1).find(|t| t.name == name)
    }

    pub fn snapshot(&self, supervisors: &SupervisorSet) -> Snapshot {
        Snapshot {
            processes: supervisors.processes().iter().map(Supervisor::snapshot).collect(),
            commands: supervisors.commands().iter().map(Supervisor::snapshot).collect(),
            tabs: self.tabs.clone(),
            active_tab: self.active_tab,
            selected_command: self.selected_command,
            width: self.width,
            height: self.height,
            uptime: self.started_at.elapsed(),
            shutting_down: self.shutting_down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessSpec;
    use crate::runner::SupervisorConfig;
    use tokio::sync::mpsc;

    fn spec(name: &str, command: &str) -> ProcessSpec {
        ProcessSpec {
            shortname: name.to_string(),
            command: command.to_string(),
            description: String::new(),
        }
    }

    fn make_set(processes: &[(&str, &str)], commands: &[(&str, &str)]) -> SupervisorSet {
        let (tx, _rx) = mpsc::channel(1024);
        SupervisorSet::new(
            processes.iter().map(|(n, c)| spec(n, c)).collect(),
            commands.iter().map(|(n, c)| spec(n, c)).collect(),
            SupervisorConfig::default(),
            tx,
        )
    }

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    async fn wait_until_active(sup: &Supervisor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sup.is_active() {
            assert!(Instant::now() < deadline, "process never produced output");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn tabs_mirror_processes_with_overview_first() {
        let set = make_set(&[("api", "true"), ("web", "true")], &[("migrate", "true")]);
        let app = App::new(&set);
        assert_eq!(app.tabs.len(), set.processes().len() + 1);
        let names: Vec<_> = app.tabs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec![OVERVIEW_TAB, "api", "web"]);
        assert_eq!(app.active_tab, 0);
    }

    #[test]
    fn navigation_wraps_both_ways() {
        let set = make_set(&[("api", "true"), ("web", "true")], &[]);
        let mut app = App::new(&set);
        for _ in 0..3 {
            app.update(key(KeyCode::Tab), &set);
        }
        assert_eq!(app.active_tab, 0);

        app.update(key(KeyCode::Left), &set);
        assert_eq!(app.active_tab, 2);
        app.update(key(KeyCode::BackTab), &set);
        app.update(key(KeyCode::Char('h')), &set);
        assert_eq!(app.active_tab, 0);

        let single = make_set(&[("api", "true")], &[]);
        let mut app = App::new(&single);
        app.update(key(KeyCode::Right), &single);
        app.update(key(KeyCode::Char('l')), &single);
        assert_eq!(app.active_tab, 0);
        assert_eq!(app.tabs.len(), 2);
    }

    #[test]
    fn overview_only_keys_are_ignored_elsewhere() {
        let set = make_set(&[("api", "true")], &[("a", "true"), ("b", "true")]);
        let mut app = App::new(&set);
        assert_eq!(app.update(key(KeyCode::Char('x')), &set), AppAction::None);
        assert_eq!(app.update(key(KeyCode::Char('r')), &set), AppAction::None);

        app.update(key(KeyCode::Up), &set);
        assert_eq!(app.selected_command, 1);
        app.update(key(KeyCode::Down), &set);
        app.update(key(KeyCode::Down), &set);
        assert_eq!(app.selected_command, 1);
        assert_eq!(
            app.update(key(KeyCode::Enter), &set),
            AppAction::Restart(Target::Command(1))
        );

        app.update(key(KeyCode::Tab), &set);
        app.update(key(KeyCode::Down), &set);
        assert_eq!(app.selected_command, 1);
        assert_eq!(app.update(key(KeyCode::Enter), &set), AppAction::None);
    }

    #[test]
    fn stop_and_restart_keys_mark_tab_status() {
        let set = make_set(&[("api", "true"), ("web", "true")], &[]);
        let mut app = App::new(&set);
        app.update(key(KeyCode::Tab), &set);
        app.update(key(KeyCode::Tab), &set);
        app.tabs[2].notification = true;

        let action = app.update(key(KeyCode::Char('x')), &set);
        assert_eq!(action, AppAction::Stop(Target::Process(1)));
        assert_eq!(app.tabs[2].status, STATUS_STOPPED);
        assert!(!app.tabs[2].notification);

        let action = app.update(key(KeyCode::Char('r')), &set);
        assert_eq!(action, AppAction::Restart(Target::Process(1)));
        assert_eq!(app.tabs[2].status, "");
    }

    #[test]
    fn quit_keys_and_signals_request_shutdown() {
        let set = make_set(&[("api", "true")], &[]);
        let mut app = App::new(&set);
        assert_eq!(app.update(key(KeyCode::Char('q')), &set), AppAction::Quit);
        let ctrl_c = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(app.update(ctrl_c, &set), AppAction::Quit);
        assert_eq!(app.update(Event::Shutdown, &set), AppAction::Quit);
    }

    #[test]
    fn resize_records_terminal_size() {
        let set = make_set(&[("api", "true")], &[]);
        let mut app = App::new(&set);
        app.update(Event::Resize { width: 120, height: 40 }, &set);
        let snap = app.snapshot(&set);
        assert_eq!((snap.width, snap.height), (120, 40));
        assert!(snap.active_process().is_none());
        assert_eq!(snap.active_tab_name(), OVERVIEW_TAB);
    }

    #[test]
    fn start_failure_marks_tab_without_notification() {
        let set = make_set(&[("api", "true")], &[]);
        let mut app = App::new(&set);
        app.update(
            Event::ProcessStartFailed {
                target: Target::Process(0),
                error: "boom".to_string(),
            },
            &set,
        );
        assert_eq!(app.tabs[1].status, STATUS_FAILED);
        assert!(!app.tabs[1].notification);
        assert!(!app.tabs[0].notification);
    }

    #[tokio::test]
    async fn arriving_clears_notification_despite_recent_output() {
        let set = make_set(&[("api", "echo hi; exec sleep 30"), ("web", "exec sleep 30")], &[]);
        let mut app = App::new(&set);
        set.start_all();
        wait_until_active(&set.processes()[0]).await;

        app.update(Event::Tick, &set);
        assert!(app.tabs[1].notification);
        assert!(!app.tabs[2].notification);
        assert!(!app.tabs[0].notification);

        app.update(key(KeyCode::Tab), &set);
        assert_eq!(app.active_tab, 1);
        assert!(!app.tabs[1].notification);
        assert!(!set.processes()[0].is_active());

        app.update(Event::Tick, &set);
        assert!(!app.tabs[1].notification);

        let snap = app.snapshot(&set);
        assert_eq!(snap.active_process().map(|p| p.shortname.as_str()), Some("api"));
        assert_eq!(snap.tabs.len(), snap.processes.len() + 1);

        set.shutdown_all().await;
    }

    #[tokio::test]
    async fn leaving_a_busy_tab_renotifies_until_return() {
        let set = make_set(
            &[("api", "while true; do echo x; sleep 0.05; done")],
            &[],
        );
        let mut app = App::new(&set);
        set.start_all();
        let api = set.processes()[0].clone();

        app.update(key(KeyCode::Tab), &set);
        wait_until_active(&api).await;
        app.update(Event::Tick, &set);
        assert!(!app.tabs[1].notification, "active tab never notifies");

        app.update(key(KeyCode::Tab), &set);
        assert_eq!(app.active_tab, 0);
        wait_until_active(&api).await;
        app.update(Event::ProcessUpdated { target: api.target() }, &set);
        assert!(app.tabs[1].notification);

        app.update(key(KeyCode::BackTab), &set);
        assert_eq!(app.active_tab, 1);
        assert!(!app.tabs[1].notification);

        set.shutdown_all().await;
    }
}
