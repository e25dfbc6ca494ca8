//! Retry supervision for whole migration passes.
//!
//! Serverless databases can be paused or still provisioning when the
//! migrator starts. The [`RetrySupervisor`] re-runs the entire pass after a
//! transient failure, waiting according to a fixed schedule. Because each pass
//! rebuilds its plan from the ledger, versions committed before the failure
//! are not executed again.

mod classify;

pub use classify::{TransientClassifier, TransientFault};

use crate::config::MigratorConfig;
use crate::db::Dialect;
use crate::migration::MigrationError;
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Blocking wait between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Backoff schedule plus the rule deciding which errors are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
    classifier: TransientClassifier,
}

impl RetryPolicy {
    pub fn new(schedule: Vec<Duration>, classifier: TransientClassifier) -> Self {
        Self {
            schedule,
            classifier,
        }
    }

    pub fn from_config(config: &MigratorConfig, dialect: Dialect) -> Self {
        Self::new(
            config.backoff_schedule(),
            TransientClassifier::new(dialect, &config.paused_markers),
        )
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    pub fn classifier(&self) -> &TransientClassifier {
        &self.classifier
    }

    /// Wait to apply after failed attempt number `attempt` (1-based), or
    /// `None` once the schedule is exhausted.
    pub fn backoff_after(&self, attempt: usize) -> Option<Duration> {
        attempt
            .checked_sub(1)
            .and_then(|index| self.schedule.get(index))
            .copied()
    }
}

/// State of one supervised run. Dropped when the run ends.
#[derive(Debug, Default)]
struct RetryContext {
    attempt_number: usize,
    last_fault: Option<TransientFault>,
    next_backoff: Option<Duration>,
}

/// Runs an operation, retrying transient failures on a fixed schedule.
pub struct RetrySupervisor<S = TokioSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl RetrySupervisor<TokioSleeper> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: TokioSleeper,
        }
    }
}

impl<S: Sleeper> RetrySupervisor<S> {
    /// Replace the sleeper, e.g. with one that records waits in tests.
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> RetrySupervisor<T> {
        RetrySupervisor {
            policy: self.policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or the backoff
    /// schedule runs out.
    ///
    /// Permanent errors propagate immediately. After the last scheduled wait
    /// the next transient error propagates as-is.
    pub async fn run_with_retries<T, F, Fut>(&self, mut operation: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let mut context = RetryContext::default();

        loop {
            context.attempt_number += 1;

            let err = match operation().await {
                Ok(value) => {
                    if let Some(fault) = context.last_fault {
                        info!(
                            attempts = context.attempt_number,
                            recovered_from = %fault,
                            "Migration succeeded after retrying"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let Some(fault) = self.policy.classifier.classify(&err) else {
                error!(
                    attempt = context.attempt_number,
                    error = %err,
                    "Migration failed with a non-transient error"
                );
                return Err(err);
            };

            context.last_fault = Some(fault);
            context.next_backoff = self.policy.backoff_after(context.attempt_number);

            let Some(wait) = context.next_backoff else {
                error!(
                    attempts = context.attempt_number,
                    fault = %fault,
                    error = %err,
                    "Migration retries exhausted"
                );
                return Err(err);
            };

            let resume_at = chrono::Duration::from_std(wait)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta))
                .map(|at| at.to_rfc3339())
                .unwrap_or_default();

            warn!(
                attempt = context.attempt_number,
                fault = %fault,
                wait_minutes = wait.as_secs_f64() / 60.0,
                resume_at = %resume_at,
                error = %err,
                "Failed to migrate database; migration will be re-attempted"
            );

            self.sleeper.sleep(wait).await;
        }
    }
}
