use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use dbrowse_core::chat::{
    extract_sql_block, schema_prompt, ChatAssistant, ChatMessage, ChatRole,
};
use dbrowse_core::operation::CancellationToken;
use dbrowse_core::retry::{OperationSlot, PromptResolution, Settled};
use dbrowse_core::suggestions::MetadataSource;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Paragraph, Wrap};
use ratatui::Frame;

use crate::context::AppContext;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::screen::{prompt_key, typed_char, Effect, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{busy_line, dim_line, error_line, panel, render_retry_prompt};

const HELP: &[(&str, &str)] = &[
    ("Enter", "send"),
    ("Ctrl+N/P", "next / previous model"),
    ("Ctrl+E", "copy SQL to editor"),
    ("Ctrl+R", "revoke consent"),
    ("Esc", "cancel / back"),
];

/// Conversation with a local model about the connected database.
#[derive(Debug, Default)]
pub struct ChatView {
    models: Vec<String>,
    model: usize,
    transcript: Vec<ChatMessage>,
    input: String,
    models_slot: OperationSlot<()>,
    chat_slot: OperationSlot<String>,
}

impl ChatView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn selected_model(&self) -> Option<&str> {
        self.models.get(self.model).map(String::as_str)
    }

    fn load_models(&mut self, ctx: &AppContext) -> Reaction {
        let Some(assistant) = ctx.assistant.clone() else {
            return Reaction::none();
        };
        let Some(token) = self.models_slot.begin(ctx.initial_timeout()) else {
            return Reaction::none();
        };
        Reaction::task(models_task(token, assistant))
    }

    /// Schema prompt followed by the transcript so far.
    fn conversation(&self, ctx: &AppContext) -> Vec<ChatMessage> {
        let database = ctx
            .session()
            .map(|session| session.data.database_name())
            .unwrap_or_default();
        let schema = ctx.current_schema().unwrap_or_default();
        let tables = ctx.catalog.tables(&schema).unwrap_or_default();

        let mut conversation = Vec::with_capacity(self.transcript.len() + 1);
        conversation.push(schema_prompt(&database, &schema, &tables));
        conversation.extend(self.transcript.iter().cloned());
        conversation
    }

    fn send(&mut self, ctx: &AppContext) -> Reaction {
        let prompt = self.input.trim().to_string();
        if prompt.is_empty() {
            return Reaction::none();
        }
        let (Some(assistant), Some(model)) = (ctx.assistant.clone(), self.selected_model()) else {
            return Reaction::status("No model selected");
        };
        let model = model.to_string();
        let Some(token) = self.chat_slot.begin(ctx.initial_timeout()) else {
            return Reaction::status("Waiting for the previous reply");
        };

        self.input.clear();
        self.transcript.push(ChatMessage::user(prompt.clone()));
        let conversation = self.conversation(ctx);
        tracing::debug!(%model, messages = conversation.len(), "sending chat prompt");
        Reaction::task(chat_task(token, assistant, model, conversation, prompt))
    }

    fn resend(&self, token: CancellationToken, prompt: String, ctx: &AppContext) -> Reaction {
        match (ctx.assistant.clone(), self.selected_model()) {
            (Some(assistant), Some(model)) => Reaction::task(chat_task(
                token,
                assistant,
                model.to_string(),
                self.conversation(ctx),
                prompt,
            )),
            _ => Reaction::none(),
        }
    }

    fn cycle_model(&mut self, forward: bool, ctx: &mut AppContext) -> Reaction {
        if self.models.is_empty() {
            return Reaction::none();
        }
        let len = self.models.len();
        self.model = if forward {
            (self.model + 1) % len
        } else {
            (self.model + len - 1) % len
        };
        let chosen = self.models[self.model].clone();
        ctx.config.config_mut().ai.model = Some(chosen.clone());
        if let Err(error) = ctx.config.persist() {
            tracing::warn!(%error, "failed to save chosen model");
        }
        Reaction::status(format!("Model: {chosen}"))
    }

    fn set_consent(&mut self, consent: bool, ctx: &mut AppContext) {
        ctx.config.config_mut().ai.consent = consent;
        if let Err(error) = ctx.config.persist() {
            tracing::warn!(%error, "failed to save AI consent");
        }
    }

    fn copy_sql(&self) -> Reaction {
        let sql = self
            .transcript
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::Assistant)
            .and_then(|message| extract_sql_block(&message.content));
        match sql {
            Some(sql) => Reaction::effect(Effect::Handoff(ViewMode::Editor, Handoff::EditorText(sql)))
                .with_effect(Effect::Push(ViewMode::Editor)),
            None => Reaction::status("No SQL in the last reply"),
        }
    }

    fn handle_consent_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match key.code {
            KeyCode::Char('y') => {
                self.set_consent(true, ctx);
                tracing::info!("AI consent granted");
                self.load_models(ctx)
            }
            KeyCode::Char('n') | KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Browser,
            }),
            _ => Reaction::none(),
        }
    }

    fn render_transcript(&self) -> Vec<Line<'static>> {
        let mut lines = Vec::new();
        for message in &self.transcript {
            let (who, color) = match message.role {
                ChatRole::User => ("you", Color::Cyan),
                ChatRole::Assistant => ("ai", Color::Green),
                ChatRole::System => continue,
            };
            lines.push(Line::from(Span::styled(
                format!("{who}:"),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )));
            lines.extend(message.content.lines().map(|line| Line::from(line.to_string())));
            lines.push(Line::from(""));
        }
        lines
    }
}

fn models_task(token: CancellationToken, assistant: Arc<dyn ChatAssistant>) -> Task {
    Task::operation(
        token,
        async move { assistant.list_models().await },
        |outcome| Completion::ModelsLoaded { outcome },
    )
}

fn chat_task(
    token: CancellationToken,
    assistant: Arc<dyn ChatAssistant>,
    model: String,
    conversation: Vec<ChatMessage>,
    prompt: String,
) -> Task {
    Task::operation(
        token,
        async move { assistant.send(&model, &conversation).await },
        move |outcome| Completion::ChatResponse {
            prompt: prompt.clone(),
            outcome,
        },
    )
}

impl Screen for ChatView {
    fn mode(&self) -> ViewMode {
        ViewMode::Chat
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match self.models_slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { token, .. } => {
                return match ctx.assistant.clone() {
                    Some(assistant) => Reaction::task(models_task(token, assistant)),
                    None => Reaction::none(),
                };
            }
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }
        match self.chat_slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { input, token, .. } => return self.resend(token, input, ctx),
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }

        if ctx.assistant.is_none() {
            return match key.code {
                KeyCode::Esc => Reaction::effect(Effect::Pop {
                    fallback: ViewMode::Browser,
                }),
                _ => Reaction::none(),
            };
        }
        if !ctx.config.config().ai.consent {
            return self.handle_consent_key(key, ctx);
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('n') => self.cycle_model(true, ctx),
                KeyCode::Char('p') => self.cycle_model(false, ctx),
                KeyCode::Char('e') => self.copy_sql(),
                KeyCode::Char('r') => {
                    self.set_consent(false, ctx);
                    self.transcript.clear();
                    tracing::info!("AI consent revoked");
                    Reaction::status("AI consent revoked")
                }
                _ => Reaction::none(),
            };
        }

        match key.code {
            KeyCode::Esc if self.chat_slot.is_busy() => {
                self.chat_slot.cancel();
                Reaction::none()
            }
            KeyCode::Esc if self.models_slot.is_busy() => {
                self.models_slot.cancel();
                Reaction::none()
            }
            KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Browser,
            }),
            KeyCode::Enter => self.send(ctx),
            KeyCode::Backspace => {
                self.input.pop();
                Reaction::none()
            }
            _ => {
                if let Some(c) = typed_char(&key) {
                    self.input.push(c);
                }
                Reaction::none()
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        match completion {
            Completion::ModelsLoaded { outcome } => {
                match self.models_slot.settle(outcome, (), &ctx.config) {
                    Settled::Completed(models) => {
                        let saved = ctx.config.config().ai.model.clone();
                        self.model = saved
                            .and_then(|saved| models.iter().position(|model| *model == saved))
                            .unwrap_or(0);
                        if models.is_empty() {
                            self.models_slot.set_error("No models are installed");
                        }
                        self.models = models;
                        Reaction::none()
                    }
                    Settled::Retrying { token, .. } => match ctx.assistant.clone() {
                        Some(assistant) => Reaction::task(models_task(token, assistant)),
                        None => Reaction::none(),
                    },
                    Settled::Failed(error) => {
                        tracing::warn!(%error, "listing models failed");
                        Reaction::none()
                    }
                    Settled::Cancelled | Settled::PromptShown => Reaction::none(),
                }
            }
            Completion::ChatResponse { prompt, outcome } => {
                match self.chat_slot.settle(outcome, prompt, &ctx.config) {
                    Settled::Completed(reply) => {
                        self.transcript.push(ChatMessage::assistant(reply));
                        Reaction::none()
                    }
                    Settled::Retrying { input, token } => self.resend(token, input, ctx),
                    Settled::Failed(error) => {
                        tracing::warn!(%error, "chat request failed");
                        Reaction::none()
                    }
                    Settled::Cancelled | Settled::PromptShown => Reaction::none(),
                }
            }
            _ => Reaction::none(),
        }
    }

    fn on_enter(&mut self, ctx: &mut AppContext) -> Reaction {
        let ready = ctx.assistant.is_some() && ctx.config.config().ai.consent;
        if ready && self.models.is_empty() && !self.models_slot.is_busy() {
            self.load_models(ctx)
        } else {
            Reaction::none()
        }
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, ctx: &AppContext) {
        if ctx.assistant.is_none() {
            let lines = vec![error_line("The AI assistant is not configured")];
            frame.render_widget(Paragraph::new(lines).block(panel("Chat")), area);
            return;
        }
        if !ctx.config.config().ai.consent {
            let lines = vec![
                Line::from("The assistant sends your schema and table names to"),
                Line::from(format!("the model server at {}.", ctx.config.config().ai.endpoint)),
                Line::from(""),
                Line::from("Allow this? (y/n)"),
            ];
            frame.render_widget(Paragraph::new(lines).block(panel("Chat")), area);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(3)])
            .split(area);

        let mut lines = self.render_transcript();
        if let Some(line) = busy_line(self.models_slot.state(), "Loading models") {
            lines.push(line);
        }
        if let Some(line) = busy_line(self.chat_slot.state(), "Waiting for the model") {
            lines.push(line);
        }
        for slot_error in [self.models_slot.error(), self.chat_slot.error()]
            .into_iter()
            .flatten()
        {
            lines.push(error_line(slot_error));
        }
        if lines.is_empty() {
            lines.push(dim_line("Ask a question about your data"));
        }
        let visible = usize::from(chunks[0].height.saturating_sub(2));
        let skip = lines.len().saturating_sub(visible);
        let lines = lines.into_iter().skip(skip).collect::<Vec<_>>();

        let title = match self.selected_model() {
            Some(model) => format!("Chat ({model})"),
            None => "Chat".to_string(),
        };
        frame.render_widget(
            Paragraph::new(lines)
                .block(panel(&title))
                .wrap(Wrap { trim: false }),
            chunks[0],
        );
        frame.render_widget(
            Paragraph::new(format!("> {}", self.input)).block(panel("Prompt")),
            chunks[1],
        );

        if self.models_slot.prompt().is_active() {
            render_retry_prompt(frame, self.models_slot.error());
        } else if self.chat_slot.prompt().is_active() {
            render_retry_prompt(frame, self.chat_slot.error());
        }
    }

    fn captures_text(&self) -> bool {
        true
    }

    fn retry_prompt_active(&self) -> bool {
        self.models_slot.prompt().is_active() || self.chat_slot.prompt().is_active()
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::KeyCode;
    use dbrowse_core::chat::ChatRole;

    use super::ChatView;
    use crate::context::AppContext;
    use crate::navigation::ViewMode;
    use crate::screen::{Effect, Handoff, Reaction, Screen};
    use crate::testing::{chr, connected, context, ctrl, key};

    async fn settle_first(view: &mut ChatView, ctx: &mut AppContext, mut reaction: Reaction) {
        let completion = reaction.tasks.remove(0).run().await;
        let _ = view.handle_completion(completion, ctx);
    }

    #[tokio::test]
    async fn consent_is_persisted_and_loads_models() {
        let (mut ctx, _dir) = context();
        let mut view = ChatView::new();
        assert!(view.on_enter(&mut ctx).is_empty());

        let reaction = view.handle_key(chr('y'), &mut ctx);
        settle_first(&mut view, &mut ctx, reaction).await;

        assert!(ctx.config.config().ai.consent);
        let saved = std::fs::read_to_string(ctx.config.path()).expect("config written");
        assert!(saved.contains("consent = true"));
        assert_eq!(view.models, ["llama3", "sqlcoder"]);
    }

    #[tokio::test]
    async fn sending_includes_the_schema_prompt() {
        let (mut ctx, _dir, _data) = connected();
        ctx.config.config_mut().ai.consent = true;
        let mut view = ChatView::new();
        let reaction = view.on_enter(&mut ctx);
        settle_first(&mut view, &mut ctx, reaction).await;

        for c in "top users?".chars() {
            let _ = view.handle_key(chr(c), &mut ctx);
        }
        let reaction = view.handle_key(key(KeyCode::Enter), &mut ctx);
        settle_first(&mut view, &mut ctx, reaction).await;

        assert!(view.input.is_empty());
        assert_eq!(view.transcript.len(), 2);
        assert_eq!(view.transcript[1].role, ChatRole::Assistant);
        assert!(view.transcript[1].content.starts_with("llama3 read 2 messages."));
    }

    #[tokio::test]
    async fn last_sql_block_goes_to_the_editor() {
        let (mut ctx, _dir, _data) = connected();
        ctx.config.config_mut().ai.consent = true;
        let mut view = ChatView::new();
        let reaction = view.on_enter(&mut ctx);
        settle_first(&mut view, &mut ctx, reaction).await;
        assert_eq!(
            view.handle_key(ctrl('e'), &mut ctx).effects,
            [Effect::Status("No SQL in the last reply".to_string())]
        );

        let _ = view.handle_key(chr('?'), &mut ctx);
        let reaction = view.handle_key(key(KeyCode::Enter), &mut ctx);
        settle_first(&mut view, &mut ctx, reaction).await;

        let reaction = view.handle_key(ctrl('e'), &mut ctx);
        assert_eq!(
            reaction.effects,
            [
                Effect::Handoff(
                    ViewMode::Editor,
                    Handoff::EditorText("SELECT id FROM users;".to_string())
                ),
                Effect::Push(ViewMode::Editor),
            ]
        );
    }

    #[tokio::test]
    async fn model_choice_is_saved() {
        let (mut ctx, _dir) = context();
        ctx.config.config_mut().ai.consent = true;
        ctx.config.config_mut().ai.model = Some("sqlcoder".to_string());
        let mut view = ChatView::new();
        let reaction = view.on_enter(&mut ctx);
        settle_first(&mut view, &mut ctx, reaction).await;
        assert_eq!(view.selected_model(), Some("sqlcoder"));

        let _ = view.handle_key(ctrl('n'), &mut ctx);
        assert_eq!(ctx.config.config().ai.model.as_deref(), Some("llama3"));
    }

    #[test]
    fn revoking_consent_clears_the_transcript() {
        let (mut ctx, _dir) = context();
        ctx.config.config_mut().ai.consent = true;
        let mut view = ChatView::new();
        view.transcript
            .push(dbrowse_core::chat::ChatMessage::user("hello"));

        let _ = view.handle_key(ctrl('r'), &mut ctx);
        assert!(!ctx.config.config().ai.consent);
        assert!(view.transcript.is_empty());
        assert_eq!(
            view.handle_key(key(KeyCode::Esc), &mut ctx).effects,
            [Effect::Pop {
                fallback: ViewMode::Browser
            }]
        );
    }
}
