//! Lifecycle state guard: one read/write lock per component instance.
//!
//! Guarded calls take the shared side of the lock and only check that the
//! current state is allowed; many may run at once. Transitions take the
//! exclusive side, so they wait for in-flight guarded calls to drain and hold
//! off new ones until the state change is complete. The lock is FIFO-fair: a
//! guarded call issued while a transition is waiting queues behind it and is
//! checked against the state the transition leaves behind.

mod guarded;
mod intercept;

pub use guarded::GuardedStore;
pub use intercept::Requirement;

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tokio::sync::RwLock;

/// Anything usable as a state token.
pub trait StateToken: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> StateToken for T where T: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid state: {current}; allowed: [{}]", .allowed.join(", "))]
pub struct StateError {
    pub current: String,
    pub allowed: Vec<String>,
}

impl StateError {
    fn new<S: StateToken>(current: S, allowed: &[S]) -> Self {
        Self {
            current: current.to_string(),
            allowed: allowed.iter().map(ToString::to_string).collect(),
        }
    }
}

pub struct StateGuard<S> {
    name: String,
    state: RwLock<S>,
    failure: Option<S>,
}

pub struct StateGuardBuilder<S> {
    name: String,
    initial: S,
    failure: Option<S>,
}

impl<S: StateToken> StateGuardBuilder<S> {
    /// Name used in log events for this guard.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// State entered when a transition action fails.
    pub fn failure(mut self, state: S) -> Self {
        self.failure = Some(state);
        self
    }

    pub fn build(self) -> StateGuard<S> {
        StateGuard {
            name: self.name,
            state: RwLock::new(self.initial),
            failure: self.failure,
        }
    }
}

impl<S: StateToken> StateGuard<S> {
    pub fn builder(initial: S) -> StateGuardBuilder<S> {
        StateGuardBuilder {
            name: String::new(),
            initial,
            failure: None,
        }
    }

    /// Snapshot of the current state. May be stale as soon as it returns.
    pub async fn current(&self) -> S {
        *self.state.read().await
    }

    pub async fn is(&self, state: S) -> bool {
        *self.state.read().await == state
    }

    /// Fail unless the current state is one of `allowed`. Not atomic with
    /// whatever the caller does next; use [`StateGuard::guard`] for that.
    pub async fn ensure(&self, allowed: &[S]) -> Result<(), StateError> {
        let current = *self.state.read().await;
        check(current, allowed)
    }

    pub fn guard<'a>(&'a self, allowed: &'a [S]) -> Guard<'a, S> {
        Guard {
            owner: self,
            allowed,
        }
    }

    pub fn transition(&self, to: S) -> Transition<'_, S> {
        Transition {
            owner: self,
            to,
            from: None,
            silent: false,
            ignore: NoIgnore,
        }
    }
}

fn check<S: StateToken>(current: S, allowed: &[S]) -> Result<(), StateError> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(StateError::new(current, allowed))
    }
}

/// Runs an action under the shared lock while the state is one of `allowed`.
pub struct Guard<'a, S> {
    owner: &'a StateGuard<S>,
    allowed: &'a [S],
}

impl<S: StateToken> Guard<'_, S> {
    pub async fn run<T, E, F, Fut>(self, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StateError>,
    {
        let current = self.owner.state.read().await;
        check(*current, self.allowed)?;
        action().await
    }
}

/// Decides which action errors still count as a completed transition.
pub trait IgnoreFilter<E> {
    fn ignores(&self, error: &E) -> bool;
}

pub struct NoIgnore;

impl<E> IgnoreFilter<E> for NoIgnore {
    fn ignores(&self, _error: &E) -> bool {
        false
    }
}

pub struct IgnoreWhen<F>(F);

impl<E, F> IgnoreFilter<E> for IgnoreWhen<F>
where
    F: Fn(&E) -> bool,
{
    fn ignores(&self, error: &E) -> bool {
        (self.0)(error)
    }
}

/// Runs an action under the exclusive lock and moves to `to` on success.
pub struct Transition<'a, S, P = NoIgnore> {
    owner: &'a StateGuard<S>,
    to: S,
    from: Option<&'a [S]>,
    silent: bool,
    ignore: P,
}

impl<'a, S: StateToken, P> Transition<'a, S, P> {
    /// Restrict the source states. Without this any state is accepted.
    pub fn from(mut self, allowed: &'a [S]) -> Self {
        self.from = Some(allowed);
        self
    }

    /// Log action failures at debug instead of error.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Errors matching `predicate` still complete the transition; the error
    /// is returned to the caller after the state has changed.
    pub fn ignore<F>(self, predicate: F) -> Transition<'a, S, IgnoreWhen<F>> {
        Transition {
            owner: self.owner,
            to: self.to,
            from: self.from,
            silent: self.silent,
            ignore: IgnoreWhen(predicate),
        }
    }

    pub async fn run<T, E, F, Fut>(self, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StateError> + fmt::Display,
        P: IgnoreFilter<E>,
    {
        let owner = self.owner;
        let mut state = owner.state.write().await;
        if let Some(from) = self.from {
            check(*state, from)?;
        }
        let previous = *state;

        match action().await {
            Ok(value) => {
                *state = self.to;
                tracing::debug!(guard = %owner.name, from = %previous, to = %self.to, "State transition");
                Ok(value)
            }
            Err(e) if self.ignore.ignores(&e) => {
                *state = self.to;
                drop(state);
                tracing::debug!(
                    guard = %owner.name,
                    from = %previous,
                    to = %self.to,
                    error = %e,
                    "State transition completed with ignored error"
                );
                Err(e)
            }
            Err(e) => {
                if self.silent {
                    tracing::debug!(guard = %owner.name, from = %previous, to = %self.to, error = %e, "State transition failed");
                } else {
                    tracing::error!(guard = %owner.name, from = %previous, to = %self.to, error = %e, "State transition failed");
                }
                if let Some(failure) = owner.failure {
                    *state = failure;
                }
                Err(e)
            }
        }
    }
}
