use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use dbrowse_core::data_access::DataAccessError;
use dbrowse_core::operation::{guarded, CancellationToken, Outcome};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::event::Completion;

/// Work to run off the UI loop. Produces exactly one [`Completion`]; if the
/// future panics, `fallback` is posted instead.
pub struct Task {
    future: BoxFuture<'static, Completion>,
    fallback: Completion,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new<F>(future: F, fallback: Completion) -> Self
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            fallback,
        }
    }

    /// Races `call` against `token` and wraps the outcome with `wrap`. A
    /// panic becomes a `Failed` outcome for the same owner.
    pub fn operation<T, F, W>(token: CancellationToken, call: F, wrap: W) -> Self
    where
        T: Send + 'static,
        F: Future<Output = Result<T, DataAccessError>> + Send + 'static,
        W: Fn(Outcome<T>) -> Completion + Send + 'static,
    {
        let fallback = wrap(Outcome::Failed(DataAccessError::backend(
            "background task panicked",
        )));
        Self::new(
            async move {
                let outcome = guarded(token, call).await;
                wrap(outcome)
            },
            fallback,
        )
    }

    /// Posts `completion` after `delay`.
    #[must_use]
    pub fn after(delay: Duration, completion: Completion) -> Self {
        let fallback = completion.clone();
        Self::new(
            async move {
                tokio::time::sleep(delay).await;
                completion
            },
            fallback,
        )
    }

    /// Drives the task to its completion, catching a panic.
    pub async fn run(self) -> Completion {
        let Self { future, fallback } = self;
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(completion) => completion,
            Err(_) => {
                tracing::error!(?fallback, "background task panicked");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use dbrowse_core::data_access::{DataAccessError, QueryResult};
    use dbrowse_core::operation::{CancellationToken, Outcome};

    use super::Task;
    use crate::event::Completion;

    fn executed(sql: &'static str) -> impl Fn(Outcome<QueryResult>) -> Completion {
        move |outcome| Completion::QueryExecuted {
            sql: sql.to_string(),
            outcome,
        }
    }

    #[tokio::test]
    async fn operation_wraps_the_guarded_outcome() {
        let token = CancellationToken::new(Some(Duration::from_secs(5)));
        let task = Task::operation(
            token,
            async { Ok::<_, DataAccessError>(QueryResult::default()) },
            executed("SELECT 1"),
        );

        let Completion::QueryExecuted { sql, outcome } = task.run().await else {
            panic!("expected query completion");
        };
        assert_eq!(sql, "SELECT 1");
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn wrapper_needs_only_send_to_run_on_the_runtime() {
        let calls = Cell::new(0_u8);
        let task = Task::operation(
            CancellationToken::new(None),
            async { Ok::<_, DataAccessError>(QueryResult::default()) },
            move |outcome| {
                calls.set(calls.get() + 1);
                Completion::QueryExecuted {
                    sql: format!("call {}", calls.get()),
                    outcome,
                }
            },
        );

        let completion = tokio::spawn(task.run()).await.expect("task should join");
        let Completion::QueryExecuted { sql, outcome } = completion else {
            panic!("expected query completion");
        };
        assert_eq!(sql, "call 2");
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn panicking_task_reports_failure_to_its_owner() {
        let token = CancellationToken::new(None);
        let task = Task::operation(
            token,
            async {
                if true {
                    panic!("driver blew up");
                }
                Ok::<_, DataAccessError>(QueryResult::default())
            },
            executed("SELECT 2"),
        );

        let Completion::QueryExecuted { sql, outcome } = task.run().await else {
            panic!("expected query completion");
        };
        assert_eq!(sql, "SELECT 2");
        assert!(matches!(outcome, Outcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_posts_after_its_delay() {
        let started = tokio::time::Instant::now();
        let completion = Task::after(Duration::from_secs(3), Completion::StatusExpired(9))
            .run()
            .await;
        assert!(matches!(completion, Completion::StatusExpired(9)));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
