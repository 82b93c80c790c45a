use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::data_access::DataAccessError;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation handle shared between an [`Operation`] slot and the
/// background task it started. Carries the task's deadline, if any.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// `None` means no deadline.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: Arc::default(),
            deadline: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        }
    }

    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            self.state.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once [`CancellationToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl PartialEq for CancellationToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for CancellationToken {}

/// Terminal condition of one background call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    TimedOut,
    Cancelled,
    Failed(DataAccessError),
}

impl<T> Outcome<T> {
    /// Sorts an error into the timeout and cancellation sentinels, or a
    /// plain failure.
    #[must_use]
    pub fn from_result(result: Result<T, DataAccessError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(DataAccessError::DeadlineExceeded) => Self::TimedOut,
            Err(DataAccessError::Cancelled) => Self::Cancelled,
            Err(error) => Self::Failed(error),
        }
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::TimedOut => Outcome::TimedOut,
            Self::Cancelled => Outcome::Cancelled,
            Self::Failed(error) => Outcome::Failed(error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Folds the outcome back into a result, with the sentinels as errors.
    pub fn into_result(self) -> Result<T, DataAccessError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::TimedOut => Err(DataAccessError::DeadlineExceeded),
            Self::Cancelled => Err(DataAccessError::Cancelled),
            Self::Failed(error) => Err(error),
        }
    }
}

/// Runs `call` until it finishes, the token is cancelled or its deadline
/// passes. A losing `call` future is dropped at its current await point.
pub async fn guarded<T, F>(token: CancellationToken, call: F) -> Outcome<T>
where
    F: Future<Output = Result<T, DataAccessError>>,
{
    if token.is_cancelled() {
        return Outcome::Cancelled;
    }

    let deadline = token.deadline();
    let expiry = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        () = token.cancelled() => Outcome::Cancelled,
        () = expiry => Outcome::TimedOut,
        result = call => Outcome::from_result(result),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    Running,
    Cancelling,
}

/// One logical call slot: at most one task in flight at a time.
#[derive(Debug, Default)]
pub struct Operation {
    state: OperationState,
    token: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl Operation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// True while Running or Cancelling.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != OperationState::Idle
    }

    /// Timeout used by the most recent start; `None` when unlimited.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Idle -> Running. Returns `None` (and changes nothing) if the slot is
    /// already busy.
    pub fn start(&mut self, timeout: Option<Duration>) -> Option<CancellationToken> {
        if self.is_busy() {
            tracing::debug!(state = ?self.state, "operation start ignored, slot busy");
            return None;
        }

        let token = CancellationToken::new(timeout);
        self.state = OperationState::Running;
        self.timeout = timeout;
        self.token = Some(token.clone());
        Some(token)
    }

    /// Running -> Cancelling. The slot stays busy until the task reports.
    pub fn cancel(&mut self) -> bool {
        if self.state != OperationState::Running {
            return false;
        }
        if let Some(token) = &self.token {
            token.cancel();
        }
        self.state = OperationState::Cancelling;
        true
    }

    pub fn finish(&mut self) {
        self.state = OperationState::Idle;
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{guarded, CancellationToken, Operation, OperationState, Outcome};
    use crate::data_access::DataAccessError;

    #[test]
    fn second_start_while_running_is_a_no_op() {
        let mut operation = Operation::new();
        let first = operation.start(Some(Duration::from_secs(30)));
        assert!(first.is_some());
        assert_eq!(operation.state(), OperationState::Running);

        assert!(operation.start(Some(Duration::from_secs(5))).is_none());
        assert_eq!(operation.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn cancel_marks_token_and_waits_for_finish() {
        let mut operation = Operation::new();
        let token = operation.start(None).expect("idle slot should start");

        assert!(operation.cancel());
        assert!(token.is_cancelled());
        assert_eq!(operation.state(), OperationState::Cancelling);
        assert!(operation.is_busy());
        assert!(!operation.cancel());

        operation.finish();
        assert_eq!(operation.state(), OperationState::Idle);
        assert!(operation.start(None).is_some());
    }

    #[test]
    fn cancel_on_idle_slot_does_nothing() {
        let mut operation = Operation::new();
        assert!(!operation.cancel());
        assert_eq!(operation.state(), OperationState::Idle);
    }

    #[test]
    fn sentinel_errors_are_classified() {
        assert_eq!(
            Outcome::<()>::from_result(Err(DataAccessError::DeadlineExceeded)),
            Outcome::TimedOut
        );
        assert_eq!(
            Outcome::<()>::from_result(Err(DataAccessError::Cancelled)),
            Outcome::Cancelled
        );
        assert_eq!(
            Outcome::<()>::from_result(Err(DataAccessError::backend("syntax error"))),
            Outcome::Failed(DataAccessError::backend("syntax error"))
        );
        assert_eq!(Outcome::from_result(Ok(3)).map(|n| n * 2), Outcome::Success(6));
        assert_eq!(
            Outcome::<()>::TimedOut.into_result(),
            Err(DataAccessError::DeadlineExceeded)
        );
    }

    #[tokio::test]
    async fn guarded_returns_call_result() {
        let token = CancellationToken::new(Some(Duration::from_secs(1)));
        let outcome = guarded(token, async { Ok::<_, DataAccessError>(42) }).await;
        assert_eq!(outcome, Outcome::Success(42));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_times_out_at_deadline() {
        let token = CancellationToken::new(Some(Duration::from_secs(5)));
        let outcome = guarded(token, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, DataAccessError>(())
        })
        .await;
        assert_eq!(outcome, Outcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_reports_cancellation() {
        let token = CancellationToken::new(None);
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let outcome = guarded(token, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, DataAccessError>(())
        })
        .await;
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn guarded_short_circuits_pre_cancelled_token() {
        let token = CancellationToken::new(None);
        token.cancel();
        let outcome = guarded(token, async { Ok::<_, DataAccessError>(1) }).await;
        assert_eq!(outcome, Outcome::Cancelled);
    }
}
