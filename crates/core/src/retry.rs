use std::fmt;
use std::time::Duration;

use crate::data_access::DataAccessError;
use crate::operation::{CancellationToken, Operation, OperationState, Outcome};

/// Persisted timeout preference consulted by the retry policy.
pub trait TimeoutPreferences {
    type Error: fmt::Display;

    /// `None` when no positive preference has been saved.
    fn preferred_timeout(&self) -> Option<Duration>;

    fn set_preferred_timeout(&mut self, timeout: Duration);

    fn save(&self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryChoice {
    OneMinute,
    TwoMinutes,
    FiveMinutes,
    Unlimited,
}

impl RetryChoice {
    pub const ALL: [Self; 4] = [
        Self::OneMinute,
        Self::TwoMinutes,
        Self::FiveMinutes,
        Self::Unlimited,
    ];

    #[must_use]
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(Self::OneMinute),
            '2' => Some(Self::TwoMinutes),
            '3' => Some(Self::FiveMinutes),
            '4' => Some(Self::Unlimited),
            _ => None,
        }
    }

    /// `None` for unlimited.
    #[must_use]
    pub fn timeout(self) -> Option<Duration> {
        match self {
            Self::OneMinute => Some(Duration::from_secs(60)),
            Self::TwoMinutes => Some(Duration::from_secs(120)),
            Self::FiveMinutes => Some(Duration::from_secs(300)),
            Self::Unlimited => None,
        }
    }

    #[must_use]
    pub fn persists(self) -> bool {
        !matches!(self, Self::Unlimited)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OneMinute => "60 seconds",
            Self::TwoMinutes => "2 minutes",
            Self::FiveMinutes => "5 minutes",
            Self::Unlimited => "No limit",
        }
    }
}

/// Key input as seen by an active retry prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKey {
    Char(char),
    Escape,
    Other,
}

/// Pending decision after a timeout. Active exactly while it holds the
/// timed-out input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPrompt<I> {
    pending: Option<I>,
}

impl<I> Default for RetryPrompt<I> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<I> RetryPrompt<I> {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn pending_input(&self) -> Option<&I> {
        self.pending.as_ref()
    }

    pub fn show(&mut self, input: I) {
        self.pending = Some(input);
    }

    pub fn take(&mut self) -> Option<I> {
        self.pending.take()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// What the owning view should do after a task reported back.
#[derive(Debug, PartialEq, Eq)]
pub enum Settled<T, I> {
    Completed(T),
    Cancelled,
    Failed(DataAccessError),
    /// The slot restarted itself with the saved preference; run `input`
    /// again under `token`.
    Retrying {
        input: I,
        token: CancellationToken,
    },
    PromptShown,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PromptResolution<I> {
    /// No prompt is showing; the key belongs to the view.
    Inactive,
    Swallowed,
    Dismissed,
    Retry {
        input: I,
        token: CancellationToken,
        choice: RetryChoice,
    },
}

/// An [`Operation`] paired with its [`RetryPrompt`] and the shared
/// timeout/retry policy. `I` is the input needed to re-issue the call.
#[derive(Debug)]
pub struct OperationSlot<I> {
    operation: Operation,
    prompt: RetryPrompt<I>,
    auto_retried: bool,
    error: Option<String>,
}

impl<I> Default for OperationSlot<I> {
    fn default() -> Self {
        Self {
            operation: Operation::new(),
            prompt: RetryPrompt::default(),
            auto_retried: false,
            error: None,
        }
    }
}

impl<I: Clone> OperationSlot<I> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// User-initiated start for a new input. Resets the auto-retry flag,
    /// the prompt and any previous error.
    pub fn begin(&mut self, timeout: Option<Duration>) -> Option<CancellationToken> {
        let token = self.operation.start(timeout)?;
        self.auto_retried = false;
        self.prompt.clear();
        self.error = None;
        Some(token)
    }

    pub fn cancel(&mut self) -> bool {
        self.operation.cancel()
    }

    pub fn settle<T, P: TimeoutPreferences>(
        &mut self,
        outcome: Outcome<T>,
        input: I,
        prefs: &P,
    ) -> Settled<T, I> {
        let timeout = self.operation.timeout();
        self.operation.finish();

        match outcome {
            Outcome::Success(value) => {
                self.error = None;
                Settled::Completed(value)
            }
            Outcome::Cancelled => Settled::Cancelled,
            Outcome::Failed(error) => {
                self.error = Some(error.to_string());
                Settled::Failed(error)
            }
            Outcome::TimedOut => {
                let first_timeout = !self.auto_retried;
                self.auto_retried = true;

                if first_timeout {
                    if let Some(preferred) = prefs.preferred_timeout() {
                        if let Some(token) = self.operation.start(Some(preferred)) {
                            tracing::info!(
                                timeout_secs = preferred.as_secs(),
                                "timed out, retrying once with saved timeout"
                            );
                            return Settled::Retrying { input, token };
                        }
                    }
                }

                self.error = Some(timeout_message(timeout));
                self.prompt.show(input);
                Settled::PromptShown
            }
        }
    }

    pub fn resolve_prompt<P: TimeoutPreferences>(
        &mut self,
        key: PromptKey,
        prefs: &mut P,
    ) -> PromptResolution<I> {
        if !self.prompt.is_active() {
            return PromptResolution::Inactive;
        }

        let choice = match key {
            PromptKey::Escape => {
                self.prompt.clear();
                self.error = None;
                return PromptResolution::Dismissed;
            }
            PromptKey::Char(key) => match RetryChoice::from_key(key) {
                Some(choice) => choice,
                None => return PromptResolution::Swallowed,
            },
            PromptKey::Other => return PromptResolution::Swallowed,
        };

        if self.operation.is_busy() {
            return PromptResolution::Swallowed;
        }
        let Some(input) = self.prompt.take() else {
            return PromptResolution::Swallowed;
        };

        if let (true, Some(timeout)) = (choice.persists(), choice.timeout()) {
            prefs.set_preferred_timeout(timeout);
            if let Err(error) = prefs.save() {
                tracing::warn!(%error, "failed to persist preferred timeout");
            }
        }

        self.error = None;
        match self.operation.start(choice.timeout()) {
            Some(token) => PromptResolution::Retry {
                input,
                token,
                choice,
            },
            None => PromptResolution::Swallowed,
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.operation.is_busy()
    }

    #[must_use]
    pub fn state(&self) -> OperationState {
        self.operation.state()
    }

    /// Timeout of the most recent start; `None` when unlimited.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.operation.timeout()
    }

    #[must_use]
    pub fn prompt(&self) -> &RetryPrompt<I> {
        &self.prompt
    }

    #[must_use]
    pub fn auto_retried(&self) -> bool {
        self.auto_retried
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

fn timeout_message(timeout: Option<Duration>) -> String {
    match timeout {
        Some(timeout) => format!("Timed out after {}s", timeout.as_secs()),
        None => "Timed out".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::time::Duration;

    use super::{
        OperationSlot, PromptKey, PromptResolution, RetryChoice, Settled, TimeoutPreferences,
    };
    use crate::data_access::DataAccessError;
    use crate::operation::{OperationState, Outcome};

    #[derive(Debug, Default)]
    struct FakePreferences {
        preferred: Option<Duration>,
        saves: Cell<usize>,
    }

    impl FakePreferences {
        fn with_preferred(secs: u64) -> Self {
            Self {
                preferred: Some(Duration::from_secs(secs)),
                saves: Cell::new(0),
            }
        }
    }

    impl TimeoutPreferences for FakePreferences {
        type Error = Infallible;

        fn preferred_timeout(&self) -> Option<Duration> {
            self.preferred
        }

        fn set_preferred_timeout(&mut self, timeout: Duration) {
            self.preferred = Some(timeout);
        }

        fn save(&self) -> Result<(), Infallible> {
            self.saves.set(self.saves.get() + 1);
            Ok(())
        }
    }

    fn running_slot() -> OperationSlot<String> {
        let mut slot = OperationSlot::new();
        slot.begin(Some(Duration::from_secs(30)))
            .expect("idle slot should start");
        slot
    }

    #[test]
    fn first_timeout_with_saved_preference_retries_silently_once() {
        let prefs = FakePreferences::with_preferred(120);
        let mut slot = running_slot();

        let settled = slot.settle(Outcome::<()>::TimedOut, "SELECT 1".to_string(), &prefs);
        let Settled::Retrying { input, token } = settled else {
            panic!("expected silent retry, got {settled:?}");
        };
        assert_eq!(input, "SELECT 1");
        assert!(token.deadline().is_some());
        assert!(!slot.prompt().is_active());
        assert!(slot.error().is_none());
        assert_eq!(slot.state(), OperationState::Running);

        let settled = slot.settle(Outcome::<()>::TimedOut, "SELECT 1".to_string(), &prefs);
        assert_eq!(settled, Settled::PromptShown);
        assert_eq!(
            slot.prompt().pending_input().map(String::as_str),
            Some("SELECT 1")
        );
        assert_eq!(slot.state(), OperationState::Idle);
    }

    #[test]
    fn timeout_without_preference_shows_prompt() {
        let prefs = FakePreferences::default();
        let mut slot = running_slot();

        let settled = slot.settle(Outcome::<()>::TimedOut, "SELECT 2".to_string(), &prefs);
        assert_eq!(settled, Settled::PromptShown);
        assert!(slot.prompt().is_active());
        assert_eq!(slot.error(), Some("Timed out after 30s"));
    }

    #[test]
    fn new_input_resets_auto_retry_flag() {
        let prefs = FakePreferences::with_preferred(60);
        let mut slot = running_slot();
        let _ = slot.settle(Outcome::<()>::TimedOut, "a".to_string(), &prefs);
        assert!(slot.auto_retried());
        let _ = slot.settle(Outcome::<()>::Success(()), "a".to_string(), &prefs);

        slot.begin(Some(Duration::from_secs(60)))
            .expect("slot should be idle");
        assert!(!slot.auto_retried());
        assert!(matches!(
            slot.settle(Outcome::<()>::TimedOut, "b".to_string(), &prefs),
            Settled::Retrying { .. }
        ));
    }

    #[test]
    fn cancellation_never_sets_an_error() {
        let prefs = FakePreferences::default();
        let mut slot = running_slot();
        assert!(slot.cancel());

        let settled = slot.settle(Outcome::<()>::Cancelled, "q".to_string(), &prefs);
        assert_eq!(settled, Settled::Cancelled);
        assert!(slot.error().is_none());
        assert!(!slot.prompt().is_active());
        assert!(!slot.is_busy());
    }

    #[test]
    fn failures_are_surfaced_without_prompt() {
        let prefs = FakePreferences::default();
        let mut slot = running_slot();

        let settled = slot.settle(
            Outcome::<()>::Failed(DataAccessError::backend("syntax error near FROM")),
            "q".to_string(),
            &prefs,
        );
        assert!(matches!(settled, Settled::Failed(_)));
        assert_eq!(slot.error(), Some("syntax error near FROM"));
        assert!(!slot.prompt().is_active());
    }

    #[test]
    fn bounded_choices_persist_and_unlimited_does_not() {
        let mut prefs = FakePreferences::default();
        let mut slot = running_slot();
        let _ = slot.settle(Outcome::<()>::TimedOut, "q".to_string(), &prefs);

        let resolution = slot.resolve_prompt(PromptKey::Char('2'), &mut prefs);
        let PromptResolution::Retry {
            input,
            token,
            choice,
        } = resolution
        else {
            panic!("expected retry, got {resolution:?}");
        };
        assert_eq!(input, "q");
        assert_eq!(choice, RetryChoice::TwoMinutes);
        assert!(token.deadline().is_some());
        assert_eq!(prefs.preferred, Some(Duration::from_secs(120)));
        assert_eq!(prefs.saves.get(), 1);

        let _ = slot.settle(Outcome::<()>::TimedOut, "q".to_string(), &prefs);
        assert!(slot.prompt().is_active());
        let resolution = slot.resolve_prompt(PromptKey::Char('4'), &mut prefs);
        let PromptResolution::Retry { token, .. } = resolution else {
            panic!("expected unlimited retry, got {resolution:?}");
        };
        assert!(token.deadline().is_none());
        assert_eq!(prefs.saves.get(), 1);
        assert_eq!(prefs.preferred, Some(Duration::from_secs(120)));
    }

    #[test]
    fn escape_clears_prompt_without_retry_or_persist() {
        let mut prefs = FakePreferences::default();
        let mut slot = running_slot();
        let _ = slot.settle(Outcome::<()>::TimedOut, "q".to_string(), &prefs);

        assert_eq!(
            slot.resolve_prompt(PromptKey::Escape, &mut prefs),
            PromptResolution::Dismissed
        );
        assert!(!slot.prompt().is_active());
        assert!(slot.prompt().pending_input().is_none());
        assert!(!slot.is_busy());
        assert_eq!(prefs.saves.get(), 0);
    }

    #[test]
    fn other_keys_are_swallowed_while_prompt_is_active() {
        let mut prefs = FakePreferences::default();
        let mut slot = running_slot();
        assert_eq!(
            slot.resolve_prompt(PromptKey::Char('x'), &mut prefs),
            PromptResolution::Inactive
        );

        let _ = slot.settle(Outcome::<()>::TimedOut, "q".to_string(), &prefs);
        assert_eq!(
            slot.resolve_prompt(PromptKey::Char('x'), &mut prefs),
            PromptResolution::Swallowed
        );
        assert_eq!(
            slot.resolve_prompt(PromptKey::Other, &mut prefs),
            PromptResolution::Swallowed
        );
        assert!(slot.prompt().is_active());
    }

    #[test]
    fn automatic_retry_uses_the_saved_timeout_not_the_first_one() {
        let prefs = FakePreferences::with_preferred(120);
        let mut slot = running_slot();
        assert_eq!(slot.timeout(), Some(Duration::from_secs(30)));

        let _ = slot.settle(Outcome::<()>::TimedOut, "SELECT 1".to_string(), &prefs);
        assert_eq!(slot.timeout(), Some(Duration::from_secs(120)));
    }
}
