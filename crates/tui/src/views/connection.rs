use crossterm::event::{KeyCode, KeyEvent};
use dbrowse_core::config::{ConnectionProfile, DatabaseKind};
use dbrowse_core::data_access::DataAccessError;
use dbrowse_core::operation::Outcome;
use dbrowse_core::retry::{OperationSlot, Settled};
use ratatui::layout::Rect;
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, step_selection};
use crate::context::AppContext;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::screen::{typed_char, Effect, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{busy_line, dim_line, error_line, highlight, list_line, panel, visible_window};

const HELP: &[(&str, &str)] = &[
    ("Enter", "connect"),
    ("n", "new profile"),
    ("e", "edit"),
    ("d", "delete"),
    ("q", "quit"),
    ("Esc", "cancel / quit"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Name,
    Kind,
    Host,
    Port,
    User,
    Database,
    Schema,
}

impl FormField {
    const ALL: [Self; 7] = [
        Self::Name,
        Self::Kind,
        Self::Host,
        Self::Port,
        Self::User,
        Self::Database,
        Self::Schema,
    ];

    fn label(self, kind: DatabaseKind) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Kind => "Kind",
            Self::Host => "Host",
            Self::Port => "Port",
            Self::User => "User",
            Self::Database if kind == DatabaseKind::Sqlite => "Path",
            Self::Database => "Database",
            Self::Schema => "Schema",
        }
    }
}

/// Profile being created or edited.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProfileForm {
    original: Option<ConnectionProfile>,
    kind: DatabaseKind,
    name: String,
    host: String,
    port: String,
    user: String,
    database: String,
    schema: String,
    focus: usize,
    error: Option<String>,
}

impl ProfileForm {
    fn blank() -> Self {
        Self {
            original: None,
            kind: DatabaseKind::Mysql,
            name: String::new(),
            host: "127.0.0.1".to_string(),
            port: DatabaseKind::Mysql.default_port().to_string(),
            user: "root".to_string(),
            database: String::new(),
            schema: String::new(),
            focus: 0,
            error: None,
        }
    }

    fn edit(profile: &ConnectionProfile) -> Self {
        Self {
            original: Some(profile.clone()),
            kind: profile.kind,
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: profile.port.to_string(),
            user: profile.user.clone(),
            database: profile.database.clone().unwrap_or_default(),
            schema: profile.schema.clone().unwrap_or_default(),
            focus: 0,
            error: None,
        }
    }

    fn field(&self) -> FormField {
        FormField::ALL[self.focus]
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self.field() {
            FormField::Name => Some(&mut self.name),
            FormField::Kind => None,
            FormField::Host => Some(&mut self.host),
            FormField::Port => Some(&mut self.port),
            FormField::User => Some(&mut self.user),
            FormField::Database => Some(&mut self.database),
            FormField::Schema => Some(&mut self.schema),
        }
    }

    fn value(&self, field: FormField) -> String {
        match field {
            FormField::Name => self.name.clone(),
            FormField::Kind => format!("< {} >", self.kind.label()),
            FormField::Host => self.host.clone(),
            FormField::Port => self.port.clone(),
            FormField::User => self.user.clone(),
            FormField::Database => self.database.clone(),
            FormField::Schema => self.schema.clone(),
        }
    }

    fn cycle_kind(&mut self) {
        let previous_default = self.kind.default_port().to_string();
        self.kind = self.kind.next();
        if self.port.is_empty() || self.port == previous_default {
            self.port = self.kind.default_port().to_string();
        }
    }

    fn to_profile(&self) -> Result<ConnectionProfile, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Profile name is required".to_string());
        }
        let non_empty = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };

        let mut profile = match self.kind {
            DatabaseKind::Sqlite => {
                let path = non_empty(&self.database)
                    .ok_or_else(|| "SQLite profiles need a file path".to_string())?;
                ConnectionProfile::sqlite(name, path)
            }
            DatabaseKind::Mysql => {
                let mut profile =
                    ConnectionProfile::mysql(name, self.host.trim(), self.user.trim());
                if !self.port.trim().is_empty() {
                    profile.port = self
                        .port
                        .trim()
                        .parse()
                        .map_err(|_| format!("Invalid port: {}", self.port.trim()))?;
                }
                profile.database = non_empty(&self.database);
                profile
            }
        };
        profile.schema = non_empty(&self.schema);

        if let Some(original) = &self.original {
            profile.password_source = original.password_source;
            profile.keyring_service.clone_from(&original.keyring_service);
            profile.keyring_account.clone_from(&original.keyring_account);
        }
        Ok(profile)
    }
}

/// Saved profiles and the connect slot.
#[derive(Debug, Default)]
pub struct ConnectionView {
    selected: usize,
    form: Option<ProfileForm>,
    slot: OperationSlot<ConnectionProfile>,
}

impl ConnectionView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts connecting to `profile`. No-op while a connect is running.
    pub fn connect(&mut self, profile: ConnectionProfile, ctx: &AppContext) -> Reaction {
        let Some(token) = self.slot.begin(ctx.initial_timeout()) else {
            return Reaction::none();
        };
        tracing::info!(profile = %profile.name, target = %profile.target(), "connecting");
        Reaction::task(connect_task(token, profile, ctx))
    }

    fn handle_form_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        let Some(form) = self.form.as_mut() else {
            return Reaction::none();
        };
        form.error = None;

        match key.code {
            KeyCode::Esc => self.form = None,
            KeyCode::Tab | KeyCode::Down => form.focus = (form.focus + 1) % FormField::ALL.len(),
            KeyCode::BackTab | KeyCode::Up => {
                form.focus = form.focus.checked_sub(1).unwrap_or(FormField::ALL.len() - 1);
            }
            KeyCode::Left | KeyCode::Right if form.field() == FormField::Kind => {
                form.cycle_kind();
            }
            KeyCode::Backspace => {
                if let Some(text) = form.text_mut() {
                    text.pop();
                }
            }
            KeyCode::Enter => return self.save_form(ctx),
            _ => {
                if let (Some(c), Some(text)) = (typed_char(&key), form.text_mut()) {
                    text.push(c);
                }
            }
        }
        Reaction::none()
    }

    fn save_form(&mut self, ctx: &mut AppContext) -> Reaction {
        let Some(form) = self.form.as_mut() else {
            return Reaction::none();
        };
        let profile = match form.to_profile() {
            Ok(profile) => profile,
            Err(message) => {
                form.error = Some(message);
                return Reaction::none();
            }
        };

        if let Some(original) = &form.original {
            if original.name != profile.name {
                let _ = ctx.config.delete_profile(&original.name);
            }
        }
        let name = profile.name.clone();
        ctx.config.upsert_profile(profile);
        self.form = None;
        self.selected = ctx
            .config
            .profiles()
            .iter()
            .position(|profile| profile.name == name)
            .unwrap_or(0);

        match ctx.config.persist() {
            Ok(()) => Reaction::status(format!("Saved profile {name}")),
            Err(error) => {
                tracing::warn!(%error, "failed to persist connection profile");
                self.slot.set_error(error.to_string());
                Reaction::none()
            }
        }
    }

    fn delete_selected(&mut self, ctx: &mut AppContext) -> Reaction {
        let Some(name) = ctx
            .config
            .profiles()
            .get(self.selected)
            .map(|profile| profile.name.clone())
        else {
            return Reaction::none();
        };
        if !ctx.config.delete_profile(&name) {
            return Reaction::none();
        }
        self.selected = step_selection(self.selected, ctx.config.profiles().len(), 0);
        if let Err(error) = ctx.config.persist() {
            tracing::warn!(%error, "failed to persist profile deletion");
            self.slot.set_error(error.to_string());
        }
        Reaction::status(format!("Deleted profile {name}"))
    }

    fn render_form(&self, form: &ProfileForm) -> Vec<Line<'static>> {
        let title = if form.original.is_some() {
            "Edit profile"
        } else {
            "New profile"
        };
        let mut lines = vec![Line::styled(title, highlight()), Line::from("")];
        for (index, field) in FormField::ALL.iter().enumerate() {
            let sqlite_only_path = form.kind == DatabaseKind::Sqlite
                && matches!(field, FormField::Host | FormField::Port | FormField::User);
            if sqlite_only_path {
                continue;
            }
            lines.push(list_line(
                format!("{:<9} {}", field.label(form.kind), form.value(*field)),
                index == form.focus,
            ));
        }
        lines.push(Line::from(""));
        if let Some(error) = &form.error {
            lines.push(error_line(error));
        }
        lines.push(dim_line(
            "Tab/Up/Down: field | Left/Right: kind | Enter: save | Esc: cancel",
        ));
        lines.push(dim_line(
            "Passwords come from DBROWSE_DB_PASSWORD or the OS keyring.",
        ));
        lines
    }
}

fn connect_task(
    token: dbrowse_core::operation::CancellationToken,
    profile: ConnectionProfile,
    ctx: &AppContext,
) -> Task {
    let connector = std::sync::Arc::clone(&ctx.connector);
    let target = profile.clone();
    Task::operation(
        token,
        async move { connector.connect(&target).await },
        move |outcome| Completion::Connected {
            profile: profile.clone(),
            outcome,
        },
    )
}

impl Screen for ConnectionView {
    fn mode(&self) -> ViewMode {
        ViewMode::Connection
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        if self.form.is_some() {
            return self.handle_form_key(key, ctx);
        }

        if let Some(step) = list_step(&key) {
            self.selected = step_selection(self.selected, ctx.config.profiles().len(), step);
            return Reaction::none();
        }

        match key.code {
            KeyCode::Esc if self.slot.is_busy() => {
                self.slot.cancel();
                Reaction::none()
            }
            KeyCode::Esc | KeyCode::Char('q') => Reaction::effect(Effect::Quit),
            KeyCode::Enter => match ctx.config.profiles().get(self.selected).cloned() {
                Some(profile) => self.connect(profile, ctx),
                None => Reaction::none(),
            },
            KeyCode::Char('n') => {
                self.form = Some(ProfileForm::blank());
                Reaction::none()
            }
            KeyCode::Char('e') => {
                self.form = ctx.config.profiles().get(self.selected).map(ProfileForm::edit);
                Reaction::none()
            }
            KeyCode::Char('d') => self.delete_selected(ctx),
            _ => Reaction::none(),
        }
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        let Completion::Connected { profile, outcome } = completion else {
            return Reaction::none();
        };
        // A connect never offers the retry menu.
        let outcome = match outcome {
            Outcome::TimedOut => Outcome::Failed(DataAccessError::DeadlineExceeded),
            other => other,
        };

        let name = profile.name.clone();
        let connected = profile.clone();
        match self.slot.settle(outcome, profile, &ctx.config) {
            Settled::Completed(data) => {
                ctx.open_session(connected, data);
                Reaction::effect(Effect::Switch(ViewMode::Browser))
                    .with_effect(Effect::Status(format!("Connected to {name}")))
            }
            Settled::Failed(error) => {
                tracing::warn!(%error, "connection failed");
                Reaction::none()
            }
            Settled::Cancelled | Settled::Retrying { .. } | Settled::PromptShown => {
                Reaction::none()
            }
        }
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, ctx: &AppContext) {
        let lines = if let Some(form) = &self.form {
            self.render_form(form)
        } else {
            let profiles = ctx.config.profiles();
            let mut lines = Vec::new();
            if profiles.is_empty() {
                lines.push(dim_line("No saved connections. Press n to add one."));
            }
            let height = usize::from(area.height.saturating_sub(5));
            for index in visible_window(self.selected, profiles.len(), height) {
                let profile = &profiles[index];
                lines.push(list_line(
                    format!(
                        "{:<20} {:<7} {}",
                        profile.name,
                        profile.kind.label(),
                        profile.target()
                    ),
                    index == self.selected,
                ));
            }
            lines.push(Line::from(""));
            if let Some(line) = busy_line(self.slot.state(), "Connecting") {
                lines.push(line);
            }
            if let Some(error) = self.slot.error() {
                lines.push(error_line(error));
            }
            lines
        };
        frame.render_widget(Paragraph::new(lines).block(panel("Connections")), area);
    }

    fn captures_text(&self) -> bool {
        self.form.is_some()
    }

    fn claims_key(&self, key: &KeyEvent) -> bool {
        self.form.is_some() && matches!(key.code, KeyCode::Tab | KeyCode::BackTab)
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::KeyCode;
    use dbrowse_core::config::{ConnectionProfile, DatabaseKind};
    use dbrowse_core::data_access::DataAccessError;
    use dbrowse_core::operation::Outcome;

    use super::ConnectionView;
    use crate::event::Completion;
    use crate::navigation::ViewMode;
    use crate::screen::{Effect, Screen};
    use crate::testing::{chr, context, key};

    #[tokio::test]
    async fn enter_connects_and_switches_to_browser() {
        let (mut ctx, _dir) = context();
        ctx.config
            .upsert_profile(ConnectionProfile::sqlite("local", "shop.db"));
        let mut view = ConnectionView::new();

        let mut reaction = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert_eq!(reaction.tasks.len(), 1);
        let completion = reaction.tasks.remove(0).run().await;

        let reaction = view.handle_completion(completion, &mut ctx);
        assert!(ctx.is_connected());
        assert_eq!(reaction.effects[0], Effect::Switch(ViewMode::Browser));
        assert_eq!(
            reaction.effects[1],
            Effect::Status("Connected to local".to_string())
        );
    }

    #[tokio::test]
    async fn failed_connect_stays_with_an_error() {
        let (mut ctx, _dir) = context();
        ctx.config
            .upsert_profile(ConnectionProfile::mysql("broken", "db", "root"));
        let mut view = ConnectionView::new();

        let mut reaction = view.handle_key(key(KeyCode::Enter), &mut ctx);
        let completion = reaction.tasks.remove(0).run().await;
        let reaction = view.handle_completion(completion, &mut ctx);

        assert!(reaction.effects.is_empty());
        assert!(!ctx.is_connected());
        assert_eq!(view.slot.error(), Some("access denied"));
    }

    #[test]
    fn connect_timeouts_are_failures_without_retry_menu() {
        let (mut ctx, _dir) = context();
        let mut view = ConnectionView::new();
        let profile = ConnectionProfile::mysql("slow", "db", "root");
        let _ = view.connect(profile.clone(), &ctx);

        let _ = view.handle_completion(
            Completion::Connected {
                profile,
                outcome: Outcome::TimedOut,
            },
            &mut ctx,
        );
        assert!(!view.slot.prompt().is_active());
        assert_eq!(
            view.slot.error(),
            Some(DataAccessError::DeadlineExceeded.to_string().as_str())
        );
        assert!(!view.slot.is_busy());
    }

    #[test]
    fn form_saves_a_sqlite_profile() {
        let (mut ctx, _dir) = context();
        let mut view = ConnectionView::new();

        let _ = view.handle_key(chr('n'), &mut ctx);
        assert!(view.captures_text());
        for c in "local".chars() {
            let _ = view.handle_key(chr(c), &mut ctx);
        }
        let _ = view.handle_key(key(KeyCode::Tab), &mut ctx);
        let _ = view.handle_key(key(KeyCode::Right), &mut ctx);
        for _ in 0..4 {
            let _ = view.handle_key(key(KeyCode::Down), &mut ctx);
        }
        for c in "shop.db".chars() {
            let _ = view.handle_key(chr(c), &mut ctx);
        }
        let reaction = view.handle_key(key(KeyCode::Enter), &mut ctx);

        assert!(view.form.is_none());
        assert_eq!(
            reaction.effects,
            [Effect::Status("Saved profile local".to_string())]
        );
        let saved = ctx.config.profile("local").expect("profile should be saved");
        assert_eq!(saved.kind, DatabaseKind::Sqlite);
        assert_eq!(saved.database.as_deref(), Some("shop.db"));
        assert!(ctx.config.path().exists());
    }

    #[test]
    fn form_rejects_missing_name_and_escape_quits_when_idle() {
        let (mut ctx, _dir) = context();
        let mut view = ConnectionView::new();
        let _ = view.handle_key(chr('n'), &mut ctx);
        let _ = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert_eq!(
            view.form.as_ref().and_then(|form| form.error.as_deref()),
            Some("Profile name is required")
        );

        let _ = view.handle_key(key(KeyCode::Esc), &mut ctx);
        assert!(view.form.is_none());
        let reaction = view.handle_key(key(KeyCode::Esc), &mut ctx);
        assert_eq!(reaction.effects, [Effect::Quit]);
    }
}
