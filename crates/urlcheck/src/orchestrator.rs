//! Tick scheduling, per-target fan-out and retry policy.

use crate::backoff::{Backoff, LinearBackoff};
use crate::checkers::CheckerRegistry;
use crate::types::{CheckConfig, CheckResult, Target};
use common::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the scheduling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// `start` has not been called yet
    Idle,
    /// The ticker loop is active
    Running,
    /// The loop exited, or `shutdown` ran first; the result queue is closed
    Stopped,
}

/// Runs one round of checks per tick and publishes the outcomes.
pub struct Orchestrator {
    targets: Arc<[Arc<Target>]>,
    config: CheckConfig,
    registry: Arc<CheckerRegistry>,
    backoff: Arc<dyn Backoff>,
    results_tx: Mutex<Option<mpsc::Sender<CheckResult>>>,
    results_rx: Mutex<Option<mpsc::Receiver<CheckResult>>>,
    shutdown: CancellationToken,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    /// Create an orchestrator for a fixed target list.
    pub fn new<I, S>(targets: I, config: CheckConfig, registry: Arc<CheckerRegistry>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets: Arc<[Arc<Target>]> = targets
            .into_iter()
            .map(|raw| Arc::new(Target::parse(raw)))
            .collect();

        if targets.is_empty() {
            return Err(Error::config("no targets specified"));
        }
        if config.check_interval.is_zero() {
            return Err(Error::config("check interval must be greater than zero"));
        }

        // Room for two ticks so a slow consumer does not stall the next round.
        let (results_tx, results_rx) = mpsc::channel(targets.len() * 2);
        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            targets,
            config,
            registry,
            backoff: Arc::new(LinearBackoff::default()),
            results_tx: Mutex::new(Some(results_tx)),
            results_rx: Mutex::new(Some(results_rx)),
            shutdown: CancellationToken::new(),
            state,
        })
    }

    /// Replace the wait strategy between retries.
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Configured targets, in order
    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn config(&self) -> CheckConfig {
        self.config
    }

    /// Hand out the receive side of the result queue.
    ///
    /// Returns `None` after the first call.
    pub fn results(&self) -> Option<mpsc::Receiver<CheckResult>> {
        self.results_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Run the ticker loop until `cancel` or [`Orchestrator::shutdown`] fires.
    ///
    /// The first tick runs immediately. The result queue is closed when this
    /// returns. Only the first call does any work.
    pub async fn start(&self, cancel: CancellationToken) {
        // Claim the sender and enter Running under the same lock `shutdown` takes.
        let results_tx = {
            let mut slot = self.results_tx.lock().unwrap_or_else(PoisonError::into_inner);
            let results_tx = slot.take();
            if results_tx.is_some() {
                self.state.send_replace(RunState::Running);
            }
            results_tx
        };
        let Some(results_tx) = results_tx else {
            warn!("Orchestrator already started or shut down");
            return;
        };

        let token = self.shutdown.clone();
        let link = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => token.cancel(),
                    _ = token.cancelled() => {}
                }
            }
        });

        info!(
            targets = self.targets.len(),
            interval = ?self.config.check_interval,
            timeout = ?self.config.timeout,
            retries = self.config.retries,
            "Orchestrator started"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.run_tick(&results_tx, &token).await {
                        break;
                    }
                }
            }
        }

        drop(results_tx);
        link.abort();
        self.state.send_replace(RunState::Stopped);
        info!("Orchestrator stopped");
    }

    /// Cancel the loop and wait up to `wait` for it to stop.
    ///
    /// Safe to call repeatedly and before `start`. A later `start` does
    /// nothing and the result queue is closed.
    pub async fn shutdown(&self, wait: Duration) -> Result<()> {
        self.shutdown.cancel();

        let mut state = self.state.subscribe();
        let running = {
            let mut slot = self.results_tx.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.take().is_some() {
                self.state.send_replace(RunState::Stopped);
            }
            *state.borrow_and_update() == RunState::Running
        };
        if !running {
            return Ok(());
        }

        match timeout(wait, state.wait_for(|s| *s != RunState::Running)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::shutdown(format!(
                "orchestrator did not stop within {:?}",
                wait
            ))),
        }
    }

    /// Fan out one task per target, wait for all of them, then publish.
    ///
    /// Returns false when the loop should stop.
    async fn run_tick(
        &self,
        results_tx: &mpsc::Sender<CheckResult>,
        token: &CancellationToken,
    ) -> bool {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for target in self.targets.iter() {
            let target = target.clone();
            let registry = self.registry.clone();
            let backoff = self.backoff.clone();
            let config = self.config;
            let token = token.clone();
            tasks.spawn(async move {
                check_target(&target, &registry, backoff.as_ref(), config, &token).await
            });
        }

        let mut results = Vec::with_capacity(self.targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Check task failed"),
            }
        }

        if token.is_cancelled() {
            debug!(discarded = results.len(), "Tick cancelled");
            return false;
        }

        for result in results {
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                sent = results_tx.send(result) => {
                    if sent.is_err() {
                        warn!("Result queue closed, stopping");
                        return false;
                    }
                }
            }
        }

        debug!(
            targets = self.targets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tick complete"
        );
        true
    }
}

/// Check one target, retrying connection-level failures.
///
/// Returns `None` if cancelled before an outcome was reached.
pub(crate) async fn check_target(
    target: &Target,
    registry: &CheckerRegistry,
    backoff: &dyn Backoff,
    config: CheckConfig,
    cancel: &CancellationToken,
) -> Option<CheckResult> {
    let max_attempts = config.retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = backoff.delay(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(delay) => {}
            }
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return None,
            outcome = registry.check(target, config.timeout) => outcome,
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(status_code) => {
                debug!(
                    url = %target,
                    status_code,
                    response_time_ms = elapsed.as_millis() as u64,
                    "URL check successful"
                );
                return Some(CheckResult::success(target, status_code, elapsed));
            }
            Err(e) if e.is_retryable() && attempt < config.retries => {
                warn!(
                    url = %target,
                    error = %e,
                    attempt = attempt + 1,
                    max_attempts,
                    "URL check failed"
                );
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    error!(url = %target, error = %e, attempts = attempt + 1, "URL check failed after all retries");
                } else {
                    error!(url = %target, error = %e, "URL check failed");
                }
                return Some(CheckResult::failure(target, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::{MockProtocolChecker, ProtocolChecker};
    use crate::types::CheckError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Never answers
    struct StallingChecker;

    #[async_trait]
    impl ProtocolChecker for StallingChecker {
        async fn check(&self, _target: &Target, _timeout: Duration) -> std::result::Result<u16, CheckError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stall"
        }
    }

    fn registry_with(scheme: &str, checker: Arc<dyn ProtocolChecker>) -> Arc<CheckerRegistry> {
        let mut registry = CheckerRegistry::new();
        registry.register(scheme, checker);
        Arc::new(registry)
    }

    fn config(retries: u32) -> CheckConfig {
        CheckConfig {
            check_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
            retries,
        }
    }

    #[test]
    fn test_new_rejects_empty_targets() {
        let result = Orchestrator::new(Vec::<String>::new(), config(0), Arc::new(CheckerRegistry::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_new_rejects_zero_interval() {
        let mut cfg = config(0);
        cfg.check_interval = Duration::ZERO;
        let result = Orchestrator::new(["http://a"], cfg, Arc::new(CheckerRegistry::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_results_handed_out_once() {
        let orchestrator =
            Orchestrator::new(["http://a", "http://b"], config(0), Arc::new(CheckerRegistry::new()))
                .unwrap();
        assert_eq!(orchestrator.targets().len(), 2);
        assert_eq!(orchestrator.state(), RunState::Idle);

        let rx = orchestrator.results().expect("first call returns the queue");
        assert_eq!(rx.max_capacity(), 4);
        assert!(orchestrator.results().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_retries_with_linear_backoff() {
        let mut mock = MockProtocolChecker::new();
        mock.expect_check()
            .times(3)
            .returning(|_, _| Err(CheckError::Network("connection refused".into())));
        let registry = registry_with("tcp", Arc::new(mock));

        let target = Target::parse("tcp://127.0.0.1:1");
        let started = Instant::now();
        let result = check_target(
            &target,
            &registry,
            &LinearBackoff::default(),
            config(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(result.error, Some(CheckError::Network("connection refused".into())));
        assert_eq!(result.status_code, 0);
        assert_eq!(result.status_label(), "error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_status_is_not_retried() {
        let mut mock = MockProtocolChecker::new();
        mock.expect_check().times(1).returning(|_, _| Ok(500));
        let registry = registry_with("https", Arc::new(mock));

        let result = check_target(
            &Target::parse("https://example.com"),
            &registry,
            &LinearBackoff::default(),
            config(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(result.error.is_none());
        assert_eq!(result.status_code, 500);
        assert!(!result.is_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_protocol_skips_retry_budget() {
        let registry = Arc::new(CheckerRegistry::new());
        let started = Instant::now();

        let result = check_target(
            &Target::parse("gopher://example.com"),
            &registry,
            &LinearBackoff::default(),
            config(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            result.error,
            Some(CheckError::UnsupportedProtocol("gopher".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut mock = MockProtocolChecker::new();
        mock.expect_check().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CheckError::Network("reset".into()))
            } else {
                Ok(200)
            }
        });
        let registry = registry_with("http", Arc::new(mock));

        let result = check_target(
            &Target::parse("http://flaky.local"),
            &registry,
            &LinearBackoff::default(),
            config(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result.is_up());
    }

    #[tokio::test]
    async fn test_cancelled_check_yields_nothing() {
        let registry = registry_with("tcp", Arc::new(StallingChecker));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                check_target(
                    &Target::parse("tcp://10.0.0.1:9"),
                    &registry,
                    &LinearBackoff::default(),
                    config(1),
                    &cancel,
                )
                .await
            }
        });

        sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_fires_immediately() {
        let mut mock = MockProtocolChecker::new();
        mock.expect_check().returning(|_, _| Ok(200));
        let registry = registry_with("http", Arc::new(mock));

        let mut cfg = config(0);
        cfg.check_interval = Duration::from_secs(3600);
        let orchestrator =
            Arc::new(Orchestrator::new(["http://a", "http://b"], cfg, registry).unwrap());
        let mut rx = orchestrator.results().unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            async move { orchestrator.start(cancel).await }
        });

        let mut urls = vec![rx.recv().await.unwrap().url, rx.recv().await.unwrap().url];
        urls.sort();
        assert_eq!(urls, vec!["http://a", "http://b"]);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(orchestrator.state(), RunState::Stopped);
        // Terminates only once the queue is closed
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_cancel_mid_tick_emits_nothing() {
        let registry = registry_with("tcp", Arc::new(StallingChecker));
        let orchestrator = Arc::new(
            Orchestrator::new(["tcp://10.0.0.1:9", "tcp://10.0.0.2:9"], config(2), registry).unwrap(),
        );
        let mut rx = orchestrator.results().unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            async move { orchestrator.start(cancel).await }
        });

        sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.is_running());
        cancel.cancel();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("start returns promptly")
            .unwrap();
        assert!(rx.recv().await.is_none());

        orchestrator.shutdown(Duration::from_secs(1)).await.unwrap();
        orchestrator.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_loop() {
        let mut mock = MockProtocolChecker::new();
        mock.expect_check().returning(|_, _| Ok(204));
        let registry = registry_with("http", Arc::new(mock));
        let orchestrator =
            Arc::new(Orchestrator::new(["http://a"], config(0), registry).unwrap());
        let mut rx = orchestrator.results().unwrap();

        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.start(CancellationToken::new()).await }
        });

        assert_eq!(rx.recv().await.unwrap().status_code, 204);

        orchestrator.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(orchestrator.state(), RunState::Stopped);
        handle.await.unwrap();

        // Drain whatever was queued before the stop, then the queue reports closed.
        while rx.recv().await.is_some() {}
        orchestrator.shutdown(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let orchestrator =
            Orchestrator::new(["http://a"], config(0), Arc::new(CheckerRegistry::new())).unwrap();
        let mut rx = orchestrator.results().unwrap();

        orchestrator.shutdown(Duration::from_millis(10)).await.unwrap();
        timeout(Duration::from_secs(1), orchestrator.start(CancellationToken::new()))
            .await
            .expect("start exits at once after shutdown");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_racing_start_never_leaves_loop_running() {
        for _ in 0..200 {
            let mut mock = MockProtocolChecker::new();
            mock.expect_check().returning(|_, _| Ok(200));
            let registry = registry_with("http", Arc::new(mock));
            let orchestrator = Arc::new(Orchestrator::new(["http://a"], config(0), registry).unwrap());
            let _rx = orchestrator.results().unwrap();

            let handle = tokio::spawn({
                let orchestrator = orchestrator.clone();
                async move { orchestrator.start(CancellationToken::new()).await }
            });

            orchestrator.shutdown(Duration::from_secs(2)).await.unwrap();
            assert_eq!(orchestrator.state(), RunState::Stopped);

            timeout(Duration::from_secs(2), handle)
                .await
                .expect("start returns after shutdown")
                .unwrap();
            assert_eq!(orchestrator.state(), RunState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_timestamps_non_decreasing_across_ticks() {
        let mut mock = MockProtocolChecker::new();
        mock.expect_check().returning(|_, _| Ok(200));
        let registry = registry_with("http", Arc::new(mock));

        let mut cfg = config(0);
        cfg.check_interval = Duration::from_millis(10);
        let orchestrator = Arc::new(Orchestrator::new(["http://a"], cfg, registry).unwrap());
        let mut rx = orchestrator.results().unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            async move { orchestrator.start(cancel).await }
        });

        let mut previous = None;
        for _ in 0..4 {
            let result = rx.recv().await.unwrap();
            if let Some(previous) = previous {
                assert!(result.timestamp >= previous);
            }
            previous = Some(result.timestamp);
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
