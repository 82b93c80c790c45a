use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::context::AppContext;
use crate::event::Completion;
use crate::navigation::{NavigationStack, ViewMode};
use crate::screen::{Effect, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{dim_line, highlight, panel, render_popup};

pub const STATUS_TTL: Duration = Duration::from_secs(3);

const GLOBAL_HELP: [(&str, &str); 4] = [
    ("Ctrl+C", "quit"),
    ("Tab", "next view"),
    ("?", "toggle help"),
    ("Esc", "back / cancel"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub message: String,
    /// View active when the error was raised; picks the dismiss fallback.
    pub origin: ViewMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub id: u64,
    pub text: String,
}

/// Owns the registered screens and decides which one sees each event.
pub struct ViewController {
    mode: ViewMode,
    navigation: NavigationStack,
    screens: HashMap<ViewMode, Box<dyn Screen>>,
    fatal: Option<FatalError>,
    status: Option<StatusMessage>,
    status_seq: u64,
    show_help: bool,
    should_quit: bool,
}

impl ViewController {
    pub fn new(screens: impl IntoIterator<Item = Box<dyn Screen>>, initial: ViewMode) -> Self {
        Self {
            mode: initial,
            navigation: NavigationStack::new(),
            screens: screens
                .into_iter()
                .map(|screen| (screen.mode(), screen))
                .collect(),
            fatal: None,
            status: None,
            status_seq: 0,
            show_help: false,
            should_quit: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    #[must_use]
    pub fn navigation(&self) -> &NavigationStack {
        &self.navigation
    }

    #[must_use]
    pub fn fatal(&self) -> Option<&FatalError> {
        self.fatal.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    #[must_use]
    pub fn show_help(&self) -> bool {
        self.show_help
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Suspends view dispatch until the user dismisses or quits.
    pub fn set_fatal(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, view = ?self.mode, "fatal error");
        self.fatal = Some(FatalError {
            message,
            origin: self.mode,
        });
    }

    /// Enters the initial view.
    pub fn start(&mut self, ctx: &mut AppContext) -> Vec<Task> {
        let reaction = self.enter(ctx);
        self.apply(reaction, ctx)
    }

    /// Applies a reaction produced outside normal dispatch, such as a
    /// startup connect.
    pub fn react(&mut self, reaction: Reaction, ctx: &mut AppContext) -> Vec<Task> {
        self.apply(reaction, ctx)
    }

    pub fn dispatch_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Vec<Task> {
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');

        if let Some(origin) = self.fatal.as_ref().map(|fatal| fatal.origin) {
            match key.code {
                _ if ctrl_c => self.should_quit = true,
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Esc => {
                    self.fatal = None;
                    if let Some(fallback) = origin.dismiss_fallback() {
                        self.navigation.clear();
                        self.mode = fallback;
                        let reaction = self.enter(ctx);
                        return self.apply(reaction, ctx);
                    }
                }
                _ => {}
            }
            return Vec::new();
        }

        if ctrl_c {
            self.should_quit = true;
            return Vec::new();
        }

        if self.show_help {
            self.show_help = false;
            return Vec::new();
        }

        let (claimed, captures_text, prompting) = match self.screens.get(&self.mode) {
            Some(screen) => (
                screen.claims_key(&key),
                screen.captures_text(),
                screen.retry_prompt_active(),
            ),
            None => return Vec::new(),
        };

        if key.code == KeyCode::Tab && key.modifiers.is_empty() && !claimed {
            if !ctx.is_connected() {
                return Vec::new();
            }
            self.navigation.clear();
            self.mode = self.mode.next_tab();
            let reaction = self.enter(ctx);
            return self.apply(reaction, ctx);
        }

        if key.code == KeyCode::Char('?') && !captures_text && !prompting {
            self.show_help = true;
            return Vec::new();
        }

        let reaction = match self.screens.get_mut(&self.mode) {
            Some(screen) => screen.handle_key(key, ctx),
            None => return Vec::new(),
        };
        self.apply(reaction, ctx)
    }

    pub fn dispatch_mouse(&mut self, mouse: MouseEvent, ctx: &mut AppContext) -> Vec<Task> {
        if self.fatal.is_some() || self.show_help {
            return Vec::new();
        }
        let reaction = match self.screens.get_mut(&self.mode) {
            Some(screen) => screen.handle_mouse(mouse, ctx),
            None => return Vec::new(),
        };
        self.apply(reaction, ctx)
    }

    /// Routes a completion to its owning view, active or not.
    pub fn dispatch_completion(
        &mut self,
        completion: Completion,
        ctx: &mut AppContext,
    ) -> Vec<Task> {
        let Some(target) = completion.target() else {
            if let Completion::StatusExpired(id) = completion {
                if self.status.as_ref().is_some_and(|status| status.id == id) {
                    self.status = None;
                }
            }
            return Vec::new();
        };

        let reaction = match self.screens.get_mut(&target) {
            Some(screen) => screen.handle_completion(completion, ctx),
            None => {
                tracing::debug!(?target, "dropping completion for unregistered view");
                return Vec::new();
            }
        };
        self.apply(reaction, ctx)
    }

    /// Records the current mode and activates `mode`.
    pub fn push_view(&mut self, mode: ViewMode) {
        self.navigation.push(self.mode);
        self.mode = mode;
    }

    /// Restores the previous mode; `false` when there is none.
    pub fn pop_view(&mut self) -> bool {
        match self.navigation.pop() {
            Some(mode) => {
                self.mode = mode;
                true
            }
            None => false,
        }
    }

    fn enter(&mut self, ctx: &mut AppContext) -> Reaction {
        match self.screens.get_mut(&self.mode) {
            Some(screen) => screen.on_enter(ctx),
            None => Reaction::none(),
        }
    }

    fn apply(&mut self, reaction: Reaction, ctx: &mut AppContext) -> Vec<Task> {
        let Reaction { mut tasks, effects } = reaction;
        let mut pending = VecDeque::from(effects);

        while let Some(effect) = pending.pop_front() {
            let follow_up = match effect {
                Effect::Push(mode) => {
                    self.push_view(mode);
                    self.enter(ctx)
                }
                Effect::Pop { fallback } => {
                    if !self.pop_view() {
                        self.mode = fallback;
                    }
                    self.enter(ctx)
                }
                Effect::Switch(mode) => {
                    self.navigation.clear();
                    self.mode = mode;
                    self.enter(ctx)
                }
                Effect::Handoff(mode, handoff) => match self.screens.get_mut(&mode) {
                    Some(screen) => screen.accept(handoff, ctx),
                    None => Reaction::none(),
                },
                Effect::Status(text) => {
                    self.status_seq += 1;
                    self.status = Some(StatusMessage {
                        id: self.status_seq,
                        text,
                    });
                    Reaction::task(Task::after(
                        STATUS_TTL,
                        Completion::StatusExpired(self.status_seq),
                    ))
                }
                Effect::Fatal(message) => {
                    self.set_fatal(message);
                    Reaction::none()
                }
                Effect::Quit => {
                    self.should_quit = true;
                    Reaction::none()
                }
            };
            tasks.extend(follow_up.tasks);
            pending.extend(follow_up.effects);
        }
        tasks
    }

    pub fn render(&self, frame: &mut Frame<'_>, ctx: &AppContext) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(3),
            ])
            .split(frame.area());

        let connection = ctx.session().map_or_else(
            || "not connected".to_string(),
            |session| {
                let schema = session.schema.as_deref().unwrap_or("-");
                format!("{} ({schema})", session.profile.name)
            },
        );
        let header = Paragraph::new(Line::from(vec![
            Span::styled("dbrowse", highlight()),
            Span::raw(" | "),
            Span::raw(self.mode.title()),
            Span::raw(" | "),
            Span::raw(connection),
        ]))
        .block(panel("Session"));
        frame.render_widget(header, chunks[0]);

        if let Some(screen) = self.screens.get(&self.mode) {
            screen.render(frame, chunks[1], ctx);
        }

        let hints = self
            .screens
            .get(&self.mode)
            .map(|screen| screen.help())
            .unwrap_or_default()
            .iter()
            .take(6)
            .map(|(key, action)| format!("{key}: {action}"))
            .collect::<Vec<_>>()
            .join(" | ");
        let status = match &self.status {
            Some(status) => Line::from(Span::styled(
                status.text.clone(),
                Style::default().fg(Color::Green),
            )),
            None => dim_line(hints),
        };
        frame.render_widget(Paragraph::new(status).block(panel("Keys")), chunks[2]);

        if self.show_help {
            self.render_help(frame);
        }
        if let Some(fatal) = &self.fatal {
            render_popup(
                frame,
                (60, 30),
                "Error",
                vec![
                    Line::from(Span::styled(
                        fatal.message.clone(),
                        Style::default().fg(Color::Red),
                    )),
                    Line::from(""),
                    dim_line("Esc: dismiss | q / Ctrl+C: quit"),
                ],
            );
        }
    }

    fn render_help(&self, frame: &mut Frame<'_>) {
        let mut lines = vec![Line::from(Span::styled("Global", highlight()))];
        lines.extend(
            GLOBAL_HELP
                .iter()
                .map(|(key, action)| Line::from(format!("{key:>10}  {action}"))),
        );
        if let Some(screen) = self.screens.get(&self.mode) {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(self.mode.title(), highlight())));
            lines.extend(
                screen
                    .help()
                    .iter()
                    .map(|(key, action)| Line::from(format!("{key:>10}  {action}"))),
            );
        }
        render_popup(frame, (70, 60), "Help", lines);
    }
}
