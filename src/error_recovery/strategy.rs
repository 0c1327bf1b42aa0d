// =============================================================================
// Recovery strategies — retry and reconnect with shared backoff
// =============================================================================
//
// Every `execute` gets the full attempt budget of its policy; a run that
// exhausts it leaves nothing behind, so the next fault is retried afresh.
// Backoff is `base * multiplier^attempt`, capped.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use super::handler::ErrorRecord;
use crate::runtime_config::RetryPolicy;

/// Async hook invoked by a strategy (re-send a request, open a socket, ...).
pub type RecoveryAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`RecoveryAction`].
pub fn recovery_action<F, Fut>(f: F) -> RecoveryAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f()) })
}

/// Re-invokes an action, sleeping between failed attempts.
pub struct RetryStrategy {
    policy: RetryPolicy,
    action: RecoveryAction,
    attempts: AtomicU32,
}

impl RetryStrategy {
    pub fn new(policy: RetryPolicy, action: RecoveryAction) -> Self {
        Self {
            policy,
            action,
            attempts: AtomicU32::new(0),
        }
    }

    async fn execute(&self, record: &ErrorRecord) -> bool {
        self.attempts.store(0, Ordering::SeqCst);
        for attempt in 1..=self.policy.max_attempts {
            match (self.action)().await {
                Ok(()) => {
                    info!(error_id = %record.id, category = %record.category, attempt, "retry succeeded");
                    return true;
                }
                Err(e) => {
                    self.attempts.store(attempt, Ordering::SeqCst);
                    warn!(
                        error_id = %record.id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "retry attempt failed"
                    );
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay(attempt - 1);
                        debug!(delay_ms = delay.as_millis() as u64, "retry backoff");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        false
    }
}

/// Tears a connection down (best effort) and brings it back up.
pub struct ReconnectStrategy {
    policy: RetryPolicy,
    connect: RecoveryAction,
    disconnect: Option<RecoveryAction>,
    attempts: AtomicU32,
}

impl ReconnectStrategy {
    pub fn new(policy: RetryPolicy, connect: RecoveryAction, disconnect: Option<RecoveryAction>) -> Self {
        Self {
            policy,
            connect,
            disconnect,
            attempts: AtomicU32::new(0),
        }
    }

    async fn execute(&self, record: &ErrorRecord) -> bool {
        self.attempts.store(0, Ordering::SeqCst);
        for attempt in 0..self.policy.max_attempts {
            if let Some(disconnect) = &self.disconnect {
                if let Err(e) = disconnect().await {
                    debug!(error = %e, "disconnect hook failed (ignored)");
                }
            }

            tokio::time::sleep(self.policy.delay(attempt)).await;

            match (self.connect)().await {
                Ok(()) => {
                    info!(error_id = %record.id, attempt = attempt + 1, "reconnect succeeded");
                    return true;
                }
                Err(e) => {
                    self.attempts.store(attempt + 1, Ordering::SeqCst);
                    warn!(
                        error_id = %record.id,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }
        false
    }
}

/// A recovery strategy registered for one error category.
pub enum RecoveryStrategy {
    Retry(RetryStrategy),
    Reconnect(ReconnectStrategy),
}

impl RecoveryStrategy {
    pub fn retry(policy: RetryPolicy, action: RecoveryAction) -> Self {
        RecoveryStrategy::Retry(RetryStrategy::new(policy, action))
    }

    pub fn reconnect(policy: RetryPolicy, connect: RecoveryAction, disconnect: Option<RecoveryAction>) -> Self {
        RecoveryStrategy::Reconnect(ReconnectStrategy::new(policy, connect, disconnect))
    }

    /// Run the strategy; `true` when the fault was recovered.
    pub async fn execute(&self, record: &ErrorRecord) -> bool {
        match self {
            RecoveryStrategy::Retry(s) => s.execute(record).await,
            RecoveryStrategy::Reconnect(s) => s.execute(record).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry(_) => "retry",
            RecoveryStrategy::Reconnect(_) => "reconnect",
        }
    }

    /// Failed attempts of the most recent run.
    pub fn attempts(&self) -> u32 {
        match self {
            RecoveryStrategy::Retry(s) => s.attempts.load(Ordering::SeqCst),
            RecoveryStrategy::Reconnect(s) => s.attempts.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::{ErrorCategory, ErrorSeverity};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_secs: 1.0,
            multiplier: 2.0,
            max_delay_secs: 60.0,
        }
    }

    fn record() -> ErrorRecord {
        ErrorRecord::new(
            ErrorCategory::Network,
            ErrorSeverity::Medium,
            "boom".into(),
            Default::default(),
        )
    }

    /// Action that fails `failures` times, then succeeds.
    fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> RecoveryAction {
        recovery_action(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    anyhow::bail!("still down ({n})")
                }
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_and_exhausts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = RecoveryStrategy::retry(policy(3), flaky(usize::MAX, calls.clone()));

        let start = Instant::now();
        assert!(!strategy.execute(&record()).await);
        // sleeps of 1s and 2s between three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(strategy.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retry_still_recovers_the_next_fault() {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = RecoveryStrategy::retry(policy(3), flaky(3, calls.clone()));

        assert!(!strategy.execute(&record()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let start = Instant::now();
        assert!(strategy.execute(&record()).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(strategy.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_success_resets_counter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = RecoveryStrategy::retry(policy(3), flaky(1, calls.clone()));

        let start = Instant::now();
        assert!(strategy.execute(&record()).await);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(strategy.attempts(), 0);
        assert_eq!(strategy.name(), "retry");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_sleeps_before_each_connect() {
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let d = disconnects.clone();
        let disconnect = recovery_action(move || {
            let d = d.clone();
            async move {
                d.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("already closed"))
            }
        });
        let strategy =
            RecoveryStrategy::reconnect(policy(3), flaky(usize::MAX, connects.clone()), Some(disconnect));

        let start = Instant::now();
        assert!(!strategy.execute(&record()).await);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4));
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(disconnects.load(Ordering::SeqCst), 3);

        // A fresh budget on the next fault.
        assert!(!strategy.execute(&record()).await);
        assert_eq!(connects.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_recovers_after_failure() {
        let connects = Arc::new(AtomicUsize::new(0));
        let strategy = RecoveryStrategy::reconnect(policy(5), flaky(2, connects.clone()), None);

        let start = Instant::now();
        assert!(strategy.execute(&record()).await);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4));
        assert_eq!(strategy.attempts(), 0);
        assert_eq!(strategy.name(), "reconnect");
    }
}
