//! Restore rate limiting
//!
//! One [`RestoreAuthenticator`] guards one restore session:
//!
//! Idle -> Attempting -> Authenticated
//!                    -> Locked --(cooldown timer)--> Idle
//!
//! Only credential failures count. Attempts run one at a time, so parallel
//! callers cannot get more guesses than the limit. When the limit is hit the
//! session locks and a timer task unlocks it once the cooldown elapses. All times come
//! from `tokio::time::Instant`. Dropping the authenticator aborts the timer.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Result, VaultError};

/// Default number of failed attempts before lockout
pub const MAX_ATTEMPTS: u32 = 3;

/// Default lockout duration
pub const COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            cooldown: COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Attempting,
    Authenticated,
    Locked,
}

struct Session {
    state: AuthState,
    failed_attempts: u32,
    locked_until: Option<Instant>,
    /// Bumped on every lock so a stale timer never unlocks a newer lockout
    lock_epoch: u64,
}

impl Session {
    fn unlock(&mut self) {
        self.state = AuthState::Idle;
        self.failed_attempts = 0;
        self.locked_until = None;
    }

    /// Apply a cooldown expiry the timer task has not processed yet
    fn settle(&mut self, now: Instant) {
        if self.state == AuthState::Locked && self.locked_until.map_or(true, |t| now >= t) {
            self.unlock();
        }
    }
}

pub struct RestoreAuthenticator {
    policy: AuthPolicy,
    session: Arc<Mutex<Session>>,
    /// Held for the whole of one attempt
    turn: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RestoreAuthenticator {
    pub fn new(policy: AuthPolicy) -> Self {
        Self {
            policy,
            session: Arc::new(Mutex::new(Session {
                state: AuthState::Idle,
                failed_attempts: 0,
                locked_until: None,
                lock_epoch: 0,
            })),
            turn: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.settle(Instant::now());
        session
    }

    pub fn state(&self) -> AuthState {
        self.session().state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.session().failed_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.policy.max_attempts.saturating_sub(self.failed_attempts())
    }

    /// Time left in the current lockout
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let session = self.session();
        match (session.state, session.locked_until) {
            (AuthState::Locked, Some(until)) => Some(until.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }

    /// Run `verify` under the rate limit
    ///
    /// While locked, returns `Cooldown` without calling `verify`. A
    /// credential failure from `verify` is counted and reported as
    /// `AuthenticationFailed`; every other error passes through uncounted.
    /// Concurrent calls wait for each other.
    pub async fn attempt<T, F, Fut>(&self, verify: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _turn = self.turn.lock().await;
        {
            let mut session = self.session();
            match session.state {
                AuthState::Locked => {
                    let remaining = session
                        .locked_until
                        .map(|t| t.saturating_duration_since(Instant::now()))
                        .unwrap_or_default();
                    return Err(VaultError::Cooldown { remaining });
                }
                AuthState::Authenticated => {
                    return Err(VaultError::Other("Restore session already completed".into()));
                }
                AuthState::Idle | AuthState::Attempting => session.state = AuthState::Attempting,
            }
        }

        let result = verify().await;

        let mut session = self.session();
        match result {
            Ok(value) => {
                session.state = AuthState::Authenticated;
                session.failed_attempts = 0;
                Ok(value)
            }
            Err(e) if e.is_credential_failure() => {
                session.failed_attempts += 1;
                let attempts_left = self.policy.max_attempts.saturating_sub(session.failed_attempts);

                if attempts_left == 0 {
                    let until = Instant::now() + self.policy.cooldown;
                    session.state = AuthState::Locked;
                    session.locked_until = Some(until);
                    session.lock_epoch += 1;
                    let epoch = session.lock_epoch;
                    drop(session);

                    tracing::warn!(
                        "restore locked for {:?} after {} failed attempts",
                        self.policy.cooldown,
                        self.policy.max_attempts
                    );
                    self.schedule_unlock(until, epoch);
                } else {
                    tracing::debug!("restore credential rejected, {} attempts left", attempts_left);
                }

                Err(VaultError::AuthenticationFailed { attempts_left })
            }
            Err(e) => {
                if session.failed_attempts == 0 {
                    session.state = AuthState::Idle;
                }
                Err(e)
            }
        }
    }

    fn schedule_unlock(&self, until: Instant, epoch: u64) {
        let session: Weak<Mutex<Session>> = Arc::downgrade(&self.session);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            if let Some(session) = session.upgrade() {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                if session.state == AuthState::Locked && session.lock_epoch == epoch {
                    session.unlock();
                    tracing::debug!("restore cooldown elapsed");
                }
            }
        });

        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Whether a cooldown timer is still pending
    pub fn has_pending_timer(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }
}

impl Default for RestoreAuthenticator {
    fn default() -> Self {
        Self::new(AuthPolicy::default())
    }
}

impl Drop for RestoreAuthenticator {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}
