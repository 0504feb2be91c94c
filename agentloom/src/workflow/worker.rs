//! Activity worker: bounded concurrency, timeouts, retries.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::error::ErrorKind;

use super::activity::{ActivityError, ActivityOptions, ActivityRegistry};

/// Executes activities on a semaphore-bounded pool with per-attempt
/// timeouts and the caller's retry policy.
pub struct ActivityWorker {
    registry: Arc<ActivityRegistry>,
    slots: Arc<Semaphore>,
}

impl ActivityWorker {
    /// `concurrency` caps simultaneously running activity attempts.
    #[must_use]
    pub fn new(registry: Arc<ActivityRegistry>, concurrency: usize) -> Self {
        Self {
            registry,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Run one activity to a terminal outcome under `options`.
    ///
    /// Returns the final result after retries; the last error is returned
    /// when the policy is exhausted or the error is not retryable.
    #[instrument(skip(self, input, options), err)]
    pub async fn run(
        &self,
        name: &str,
        input: Value,
        options: &ActivityOptions,
    ) -> Result<Value, ActivityError> {
        let activity = self.registry.get(name).ok_or_else(|| {
            ActivityError::new(ErrorKind::NotFound, format!("unknown activity: {name}"))
        })?;

        let mut attempt: u32 = 1;
        loop {
            let permit = match options.schedule_to_start {
                Some(bound) => {
                    match tokio::time::timeout(bound, self.slots.clone().acquire_owned()).await {
                        Ok(Ok(permit)) => permit,
                        Ok(Err(_)) => {
                            return Err(ActivityError::new(
                                ErrorKind::Internal,
                                "worker pool closed",
                            ))
                        }
                        Err(_) => {
                            return Err(ActivityError::new(
                                ErrorKind::Timeout,
                                format!("schedule_to_start exceeded for {name}"),
                            ))
                        }
                    }
                }
                None => self.slots.clone().acquire_owned().await.map_err(|_| {
                    ActivityError::new(ErrorKind::Internal, "worker pool closed")
                })?,
            };

            let outcome =
                tokio::time::timeout(options.attempt_timeout(), activity.execute(input.clone()))
                    .await;
            drop(permit);

            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ActivityError::new(
                    ErrorKind::Timeout,
                    format!(
                        "start_to_close exceeded ({:?}) for {name}",
                        options.attempt_timeout()
                    ),
                ),
            };

            if !options.retry.should_retry(&error, attempt) {
                return Err(error);
            }
            let delay = jittered(options.retry.backoff_delay(attempt), attempt);
            tracing::warn!(
                activity = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying activity"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Up to 10% deterministic jitter so simultaneous retries fan out.
fn jittered(delay: Duration, attempt: u32) -> Duration {
    let spread = crate::utils::sha256(&attempt.to_le_bytes())[0] as u64 % 100;
    let extra = delay.as_millis() as u64 * spread / 1000;
    delay + Duration::from_millis(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyActivity {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl super::super::Activity for FlakyActivity {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _input: Value) -> Result<Value, ActivityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.succeed_on {
                Err(ActivityError::transient("not yet"))
            } else {
                Ok(json!({"attempt": n}))
            }
        }
    }

    struct SlowActivity;

    #[async_trait]
    impl super::super::Activity for SlowActivity {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _input: Value) -> Result<Value, ActivityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({}))
        }
    }

    fn worker_with(activity: Arc<dyn super::super::Activity>) -> ActivityWorker {
        let mut registry = ActivityRegistry::new();
        registry.register(activity);
        ActivityWorker::new(Arc::new(registry), 4)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let worker = worker_with(Arc::new(FlakyActivity {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        }));
        let options = ActivityOptions::default();
        let out = worker.run("flaky", json!({}), &options).await.unwrap();
        assert_eq!(out["attempt"], json!(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let worker = worker_with(Arc::new(FlakyActivity {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        }));
        let options = ActivityOptions::default();
        let err = worker.run("flaky", json!({}), &options).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn start_to_close_times_out() {
        let worker = worker_with(Arc::new(SlowActivity));
        let options = ActivityOptions {
            start_to_close: Duration::from_secs(1),
            retry: super::super::RetryPolicy::no_retries(),
            ..Default::default()
        };
        let err = worker.run("slow", json!({}), &options).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn unknown_activity_is_not_found() {
        let worker = worker_with(Arc::new(SlowActivity));
        let err = worker
            .run("missing", json!({}), &ActivityOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
