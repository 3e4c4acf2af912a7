use std::fmt;
use std::future::Future;

use super::{StateError, StateGuard, StateToken};

/// Per-operation state metadata. Looked up on every call and applied by
/// [`StateGuard::intercept`] around the operation body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement<S: 'static> {
    /// Lifecycle-agnostic; runs without touching the lock.
    Unguarded,
    /// Shared lock, state must be one of the listed states.
    Guard(&'static [S]),
    /// Exclusive lock, moves to `to`. `from: None` accepts any source state.
    Transition {
        from: Option<&'static [S]>,
        to: S,
        silent: bool,
    },
    /// Only valid from `allowed`, and on success moves to `to`.
    GuardedTransition { allowed: &'static [S], to: S },
}

impl<S: StateToken> StateGuard<S> {
    /// Run `action` under whatever `requirement` asks for. Errors from the
    /// action are returned unchanged; they only decide the resulting state.
    pub async fn intercept<T, E, F, Fut>(&self, requirement: Requirement<S>, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StateError> + fmt::Display,
    {
        match requirement {
            Requirement::Unguarded => action().await,
            Requirement::Guard(allowed) => self.guard(allowed).run(action).await,
            Requirement::Transition { from, to, silent } => {
                let mut transition = self.transition(to);
                if let Some(from) = from {
                    transition = transition.from(from);
                }
                if silent {
                    transition = transition.silent();
                }
                transition.run(action).await
            }
            Requirement::GuardedTransition { allowed, to } => {
                // Fail fast on the shared lock, then re-check under the exclusive one.
                self.ensure(allowed).await?;
                self.transition(to).from(allowed).run(action).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState::{self, *};
    use crate::state_guard::StateError;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error(transparent)]
        State(#[from] StateError),
        #[error("failed")]
        Failed,
    }

    fn guard() -> StateGuard<LifecycleState> {
        StateGuard::builder(New).failure(Failed).build()
    }

    #[tokio::test]
    async fn test_unguarded_runs_in_any_state() {
        let guard = guard();
        let result: Result<u8, TestError> =
            guard.intercept(Requirement::Unguarded, || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_guard_requirement() {
        let guard = guard();
        let result: Result<(), TestError> = guard
            .intercept(Requirement::Guard(&[Started]), || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(TestError::State(_))));
    }

    #[tokio::test]
    async fn test_transition_requirement() {
        let guard = guard();
        let start = Requirement::Transition {
            from: Some(&[New, Stopped]),
            to: Started,
            silent: false,
        };
        guard
            .intercept(start, || async { Ok::<_, TestError>(()) })
            .await
            .unwrap();
        assert_eq!(guard.current().await, Started);

        let again = guard
            .intercept(start, || async { Ok::<_, TestError>(()) })
            .await;
        assert!(matches!(again, Err(TestError::State(_))));
    }

    #[tokio::test]
    async fn test_guarded_transition_checks_then_moves() {
        let guard = guard();
        let requirement = Requirement::GuardedTransition {
            allowed: &[Started],
            to: Stopped,
        };
        let rejected = guard
            .intercept(requirement, || async { Ok::<_, TestError>(()) })
            .await;
        assert!(matches!(rejected, Err(TestError::State(_))));
        assert_eq!(guard.current().await, New);

        guard
            .transition(Started)
            .run(|| async { Ok::<_, TestError>(()) })
            .await
            .unwrap();
        guard
            .intercept(requirement, || async { Ok::<_, TestError>(()) })
            .await
            .unwrap();
        assert_eq!(guard.current().await, Stopped);
    }

    #[tokio::test]
    async fn test_failed_transition_is_rethrown() {
        let guard = guard();
        let requirement = Requirement::Transition {
            from: None,
            to: Started,
            silent: true,
        };
        let result: Result<(), TestError> = guard
            .intercept(requirement, || async { Err(TestError::Failed) })
            .await;
        assert!(matches!(result, Err(TestError::Failed)));
        assert_eq!(guard.current().await, Failed);
    }
}
