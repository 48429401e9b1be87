//! Restart-forever wrapper for long-running workers.
//!
//! A supervised worker is rebuilt from scratch every time it returns, whether
//! it failed or not. Failures are logged and sent to the alert sink; a failed
//! alert is only logged. Restarts are spaced by a capped exponential backoff
//! that resets once a worker has stayed up for a while.

use crate::config::SyncConfig;
use crate::error::AppError;
use crate::services::alert::{format_error_alert, AlertSink};
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A run that lasts this long counts as healthy and resets the backoff.
const HEALTHY_RUN: Duration = Duration::from_secs(300);

pub type WorkerFuture = BoxFuture<'static, Result<(), AppError>>;

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    /// Zero disables the delay entirely.
    pub max_delay: Duration,
    pub healthy_after: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.restart_backoff_initial_secs),
            max_delay: Duration::from_secs(config.restart_backoff_max_secs),
            healthy_after: HEALTHY_RUN,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct Supervisor {
    alert: Arc<dyn AlertSink>,
    cancel: CancellationToken,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(alert: Arc<dyn AlertSink>, cancel: CancellationToken, policy: RestartPolicy) -> Self {
        Self {
            alert,
            cancel,
            policy,
        }
    }

    /// Run `make_worker()` forever until the cancellation token fires.
    pub fn spawn<F>(&self, name: String, make_worker: F) -> JoinHandle<()>
    where
        F: Fn() -> WorkerFuture + Send + Sync + 'static,
    {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run_forever(name, make_worker).await })
    }

    async fn run_forever<F>(self, name: String, make_worker: F)
    where
        F: Fn() -> WorkerFuture + Send + Sync + 'static,
    {
        let mut backoff = self.policy.backoff();

        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("[supervisor] {} stopped", name);
                    return;
                }
                outcome = make_worker() => outcome,
            };

            match outcome {
                Ok(()) => log::info!("[supervisor] {} finished, restarting", name),
                Err(err) => {
                    if err.is_transient() {
                        log::warn!("[supervisor] {} interrupted: {}", name, err);
                    } else {
                        log::error!("[supervisor] {} failed: {}", name, err);
                    }
                    self.report(&name, &err).await;
                }
            }

            if started.elapsed() >= self.policy.healthy_after {
                backoff.reset();
            }

            let delay = if self.policy.max_delay.is_zero() {
                Duration::ZERO
            } else {
                backoff
                    .next_backoff()
                    .unwrap_or(self.policy.max_delay)
                    .min(self.policy.max_delay)
            };
            log::debug!("[supervisor] Restarting {} in {:?}", name, delay);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("[supervisor] {} stopped", name);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn report(&self, name: &str, err: &AppError) {
        if let Err(alert_err) = self.alert.send(&format_error_alert(name, err)).await {
            log::warn!("[alert] Failed to deliver alert for {}: {}", name, alert_err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, text: &str) -> Result<(), AppError> {
            self.messages.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(AppError::alert("webhook down"));
            }
            Ok(())
        }
    }

    fn policy(max_secs: u64) -> RestartPolicy {
        RestartPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(max_secs),
            healthy_after: HEALTHY_RUN,
        }
    }

    /// Worker that fails `failures` times, then runs until cancelled.
    fn flaky_worker(
        runs: Arc<AtomicUsize>,
        failures: usize,
    ) -> impl Fn() -> WorkerFuture + Send + Sync + 'static {
        move || {
            let run = runs.fetch_add(1, Ordering::SeqCst);
            async move {
                if run < failures {
                    Err(AppError::network("boom"))
                } else {
                    futures::future::pending::<Result<(), AppError>>().await
                }
            }
            .boxed()
        }
    }

    async fn wait_for_runs(runs: &AtomicUsize, expected: usize) {
        timeout(Duration::from_secs(600), async {
            while runs.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_worker_restarted_and_alerted() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(sink.clone(), cancel.clone(), policy(60));
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = supervisor.spawn("sync test".to_string(), flaky_worker(runs.clone(), 2));
        wait_for_runs(&runs, 3).await;

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("sync test: Network error: boom"));

        cancel.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_failure_is_not_fatal() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(sink.clone(), cancel.clone(), policy(60));
        let runs = Arc::new(AtomicUsize::new(0));

        let _handle = supervisor.spawn("sync test".to_string(), flaky_worker(runs.clone(), 3));
        wait_for_runs(&runs, 4).await;
        assert_eq!(sink.messages.lock().unwrap().len(), 3);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cap_restarts_immediately() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(sink, cancel.clone(), policy(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let _handle = supervisor.spawn("sync test".to_string(), flaky_worker(runs.clone(), 5));
        wait_for_runs(&runs, 6).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_healthy_run() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(
            sink,
            cancel.clone(),
            RestartPolicy {
                initial_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(3600),
                healthy_after: HEALTHY_RUN,
            },
        );
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        // Five quick failures grow the delay, the sixth run is healthy then fails
        let recorded = starts.clone();
        let _handle = supervisor.spawn("sync test".to_string(), move || {
            let run = {
                let mut starts = recorded.lock().unwrap();
                starts.push(Instant::now());
                starts.len() - 1
            };
            async move {
                match run {
                    0..=4 => Err(AppError::network("boom")),
                    5 => {
                        tokio::time::sleep(HEALTHY_RUN + Duration::from_secs(100)).await;
                        Err(AppError::network("boom"))
                    }
                    _ => futures::future::pending::<Result<(), AppError>>().await,
                }
            }
            .boxed()
        });

        timeout(Duration::from_secs(7200), async {
            while starts.lock().unwrap().len() < 7 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .unwrap();

        let starts = starts.lock().unwrap().clone();
        // Randomized around 50.6s before the healthy run, around 10s after it
        let grown = starts[5] - starts[4];
        let reset = starts[6] - starts[5] - (HEALTHY_RUN + Duration::from_secs(100));
        assert!(grown >= Duration::from_secs(25), "grown delay {:?}", grown);
        assert!(reset <= Duration::from_secs(16), "reset delay {:?}", reset);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_running_worker() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(sink.clone(), cancel.clone(), policy(60));
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = supervisor.spawn("sync test".to_string(), flaky_worker(runs.clone(), 0));
        wait_for_runs(&runs, 1).await;

        cancel.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(sink.messages.lock().unwrap().is_empty());
    }
}
