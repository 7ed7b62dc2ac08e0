//! Concurrent execution of batches against a backend.
//!
//! Each batch runs in its own task behind a semaphore permit and walks an
//! explicit state machine:
//!
//! ```text
//! Pending -> InFlight -> Succeeded
//!                     -> RetryScheduled -> InFlight
//!                     -> Aborted
//! ```
//!
//! Finished batches are sent back over a channel to the coordinating task,
//! which is the only place outcomes are recorded and handed to the caller.

use super::batcher::Batch;
use super::JobContext;
use crate::backend::{Backend, BackendResult};
use crate::error::BackendError;
use futures::FutureExt;
use rand::Rng;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// How many times and how patiently a batch is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): exponential growth with up
    /// to 50% random jitter on top, never above `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(self.max_delay);
        let jitter_cap = exp.as_millis() as u64 / 2;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        (exp + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Lifecycle of one batch inside a worker.
#[derive(Debug)]
pub enum BatchState {
    Pending,
    InFlight { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Succeeded(BackendResult),
    Aborted(BackendError),
}

/// A batch returned to the coordinator with its terminal result.
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch: Batch,
    /// Number of backend calls made.
    pub attempts: u32,
    pub result: Result<BackendResult, BackendError>,
}

/// What the dispatcher did with the batches it was given.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: usize,
    /// Batches never submitted because of cancellation or an auth failure.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// First authentication failure; credentials are job-wide so it stops submission.
    pub auth_failure: Option<BackendError>,
}

/// Spaces backend calls to honour a requests-per-second limit across workers.
#[derive(Debug)]
struct Pacer {
    interval: Option<Duration>,
    next: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(requests_per_second: Option<f64>) -> Self {
        let interval = requests_per_second
            .filter(|rps| rps.is_finite() && *rps > 0.0)
            .map(|rps| Duration::from_secs_f64(1.0 / rps));
        Self {
            interval,
            next: Mutex::new(None),
        }
    }

    /// Reserve the next free slot and sleep until it arrives.
    async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };
        let slot = {
            let mut next = self.next.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// Runs batches against one backend with bounded concurrency and retries.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    concurrency: usize,
    retry: RetryPolicy,
    pacer: Arc<Pacer>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, concurrency: usize, retry: RetryPolicy) -> Self {
        let pacer = Arc::new(Pacer::new(backend.limits().requests_per_second));
        Self {
            backend,
            concurrency: concurrency.max(1),
            retry,
            pacer,
        }
    }

    /// Execute `batches`, handing every terminal outcome to `on_outcome` on
    /// the calling task as soon as it arrives.
    /// The way this works is by acquiring a permit before each submission,
    /// checking for cancellation once the permit is held, and draining the
    /// result channel until no batch is left in flight.
    pub async fn run<F>(&self, batches: Vec<Batch>, ctx: &JobContext, mut on_outcome: F) -> DispatchSummary
    where
        F: FnMut(BatchOutcome),
    {
        trace!(
            "Dispatcher::run batches={} concurrency={} backend={}",
            batches.len(),
            self.concurrency,
            self.backend.name()
        );
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<BatchOutcome>(self.concurrency);
        let mut queue: VecDeque<Batch> = batches.into();
        let mut summary = DispatchSummary::default();
        let mut in_flight = 0usize;

        loop {
            let can_submit = !queue.is_empty()
                && summary.auth_failure.is_none()
                && !ctx.cancel.is_cancelled();
            tokio::select! {
                biased;
                Some(outcome) = rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    self.settle(&outcome, &mut summary);
                    on_outcome(outcome);
                }
                permit = semaphore.clone().acquire_owned(), if can_submit => {
                    let Ok(permit) = permit else { break };
                    if ctx.cancel.is_cancelled() || summary.auth_failure.is_some() {
                        continue;
                    }
                    let Some(batch) = queue.pop_front() else { continue };
                    debug!("submitting batch {} ({} units)", batch.id, batch.units.len());
                    self.spawn_batch(batch, permit, tx.clone());
                    in_flight += 1;
                    summary.submitted += 1;
                }
                else => break,
            }
        }

        summary.skipped = queue.len();
        summary.cancelled = ctx.cancel.is_cancelled();
        if summary.cancelled {
            ctx.progress.mark_cancelled();
            info!(
                "cancelled: {} batches finished, {} never submitted",
                summary.submitted, summary.skipped
            );
        }
        summary
    }

    /// Spawn a worker for one batch; the permit is released when it finishes.
    fn spawn_batch(
        &self,
        batch: Batch,
        permit: tokio::sync::OwnedSemaphorePermit,
        tx: mpsc::Sender<BatchOutcome>,
    ) {
        let backend = self.backend.clone();
        let retry = self.retry.clone();
        let pacer = self.pacer.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let driven = AssertUnwindSafe(drive_batch(backend.as_ref(), &batch, &retry, &pacer))
                .catch_unwind()
                .await;
            let (attempts, result) = driven.unwrap_or_else(|_| {
                (0, Err(BackendError::Provider("backend panicked".into())))
            });
            let _ = tx.send(BatchOutcome { batch, attempts, result }).await;
        });
    }

    /// Batch-level bookkeeping; unit counts are left to whoever applies
    /// the outcome.
    fn settle(&self, outcome: &BatchOutcome, summary: &mut DispatchSummary) {
        let units = outcome.batch.units.len();
        match &outcome.result {
            Ok(result) => {
                let ok = result.per_unit.iter().filter(|u| u.result.is_ok()).count();
                summary.succeeded += 1;
                debug!(
                    "batch {} finished after {} attempt(s): {}/{} units returned text",
                    outcome.batch.id, outcome.attempts, ok, units
                );
            }
            Err(err) => {
                summary.failed += 1;
                warn!(
                    "batch {} failed after {} attempt(s): {}",
                    outcome.batch.id, outcome.attempts, err
                );
                if matches!(err, BackendError::Auth(_)) && summary.auth_failure.is_none() {
                    summary.auth_failure = Some(err.clone());
                }
            }
        }
    }
}

/// Walk one batch through its state machine until it is terminal.
async fn drive_batch(
    backend: &dyn Backend,
    batch: &Batch,
    retry: &RetryPolicy,
    pacer: &Pacer,
) -> (u32, Result<BackendResult, BackendError>) {
    let mut state = BatchState::Pending;
    let mut attempts = 0;
    loop {
        state = match state {
            BatchState::Pending => BatchState::InFlight { attempt: 1 },
            BatchState::InFlight { attempt } => {
                attempts = attempt;
                pacer.wait().await;
                trace!("batch {} attempt {} via {}", batch.id, attempt, backend.name());
                match backend.translate(batch).await {
                    Ok(result) if result.is_aligned_with(batch) => BatchState::Succeeded(result),
                    Ok(result) => BatchState::Aborted(BackendError::Provider(format!(
                        "{} returned {} results for {} units",
                        backend.name(),
                        result.per_unit.len(),
                        batch.units.len()
                    ))),
                    Err(err) if err.is_retryable() && attempt <= retry.max_retries => {
                        let delay = retry.backoff(attempt);
                        debug!(
                            "batch {} attempt {} failed ({}); retrying in {:?}",
                            batch.id, attempt, err, delay
                        );
                        BatchState::RetryScheduled { attempt, delay }
                    }
                    Err(err) => BatchState::Aborted(err),
                }
            }
            BatchState::RetryScheduled { attempt, delay } => {
                tokio::time::sleep(delay).await;
                BatchState::InFlight {
                    attempt: attempt + 1,
                }
            }
            BatchState::Succeeded(result) => return (attempts, Ok(result)),
            BatchState::Aborted(err) => return (attempts, Err(err)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{translate_with, MockBackend};
    use crate::backend::BackendLimits;
    use crate::translate::unit::TranslationUnit;
    use crate::translate::CancelHandle;

    fn batches(n: usize) -> Vec<Batch> {
        (0..n)
            .map(|id| Batch {
                id,
                units: (0..2)
                    .map(|k| TranslationUnit {
                        cue_index: id * 2 + k,
                        source_text: format!("text {}", id * 2 + k),
                        placeholders: Vec::new(),
                        line_count: 1,
                    })
                    .collect(),
                source_lang: "en".into(),
                target_lang: "fr".into(),
                oversized: false,
            })
            .collect()
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    async fn run(
        backend: Arc<MockBackend>,
        concurrency: usize,
        retry: RetryPolicy,
        input: Vec<Batch>,
        ctx: &JobContext,
    ) -> (DispatchSummary, Vec<BatchOutcome>) {
        let dispatcher = Dispatcher::new(backend, concurrency, retry);
        let mut outcomes = Vec::new();
        let summary = dispatcher.run(input, ctx, |o| outcomes.push(o)).await;
        (summary, outcomes)
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let retry = policy(5);
        for _ in 0..20 {
            let first = retry.backoff(1);
            assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
            let third = retry.backoff(3);
            assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
            assert!(retry.backoff(20) <= Duration::from_secs(10));
        }
    }

    /// Cancelling during batch 1 of 5 lets it finish and submits nothing else.
    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_new_submissions() {
        let cancel = CancelHandle::new();
        let ctx = JobContext::new(cancel.clone());
        let trigger = cancel.clone();
        let backend = Arc::new(MockBackend::new(move |batch, _| {
            if batch.id == 0 {
                trigger.cancel();
            }
            translate_with(batch, |t| format!("fr:{t}"))
        }));
        let (summary, outcomes) = run(backend.clone(), 1, policy(3), batches(5), &ctx).await;
        assert!(summary.cancelled);
        assert!(ctx.progress.is_cancelled());
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.skipped, 4);
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].batch.id, 0);
        assert!(outcomes[0].result.is_ok());
    }

    /// A throttled batch is retried exactly `max_retries` times with growing
    /// delays while its siblings succeed.
    #[tokio::test(start_paused = true)]
    async fn rate_limited_batch_exhausts_retries() {
        let backend = Arc::new(MockBackend::new(|batch, _| {
            if batch.id == 1 {
                Err(BackendError::RateLimit("429".into()))
            } else {
                translate_with(batch, |t| t.to_uppercase())
            }
        }));
        let ctx = JobContext::new(CancelHandle::new());
        let (summary, outcomes) = run(backend.clone(), 2, policy(3), batches(3), &ctx).await;

        let calls = backend.calls_for(1);
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
        for (i, gap) in gaps.iter().enumerate() {
            assert!(*gap >= Duration::from_millis(100 << i), "gap {i} was {gap:?}");
        }
        assert!(gaps.windows(2).all(|w| w[1] > w[0]));

        let failed = outcomes.iter().find(|o| o.batch.id == 1).unwrap();
        assert_eq!(failed.attempts, 4);
        assert!(matches!(failed.result, Err(BackendError::RateLimit(_))));
        for ok in outcomes.iter().filter(|o| o.batch.id != 1) {
            assert!(ok.result.is_ok());
            assert_eq!(backend.calls_for(ok.batch.id).len(), 1);
        }
        assert_eq!((summary.succeeded, summary.failed), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers() {
        let backend = Arc::new(MockBackend::new(|batch, attempt| {
            if attempt == 1 {
                Err(BackendError::Transient("timeout".into()))
            } else {
                translate_with(batch, |t| t.to_string())
            }
        }));
        let ctx = JobContext::new(CancelHandle::new());
        let (summary, outcomes) = run(backend, 1, policy(3), batches(1), &ctx).await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(outcomes[0].attempts, 2);
    }

    /// Provider errors abort at once and do not disturb sibling batches.
    #[tokio::test(start_paused = true)]
    async fn provider_error_is_not_retried() {
        let backend = Arc::new(MockBackend::new(|batch, _| {
            if batch.id == 0 {
                Err(BackendError::Provider("unsupported language".into()))
            } else {
                translate_with(batch, |t| t.to_string())
            }
        }));
        let ctx = JobContext::new(CancelHandle::new());
        let (summary, outcomes) = run(backend.clone(), 2, policy(3), batches(2), &ctx).await;
        assert_eq!(backend.calls_for(0).len(), 1);
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert!(summary.auth_failure.is_none());
        assert_eq!(outcomes.len(), 2);
    }

    /// Bad credentials stop further submissions.
    #[tokio::test(start_paused = true)]
    async fn auth_error_halts_submission() {
        let backend = Arc::new(MockBackend::new(|_, _| Err(BackendError::Auth("bad key".into()))));
        let ctx = JobContext::new(CancelHandle::new());
        let (summary, _) = run(backend.clone(), 1, policy(3), batches(4), &ctx).await;
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.auth_failure, Some(BackendError::Auth("bad key".into())));
        assert!(!summary.cancelled);
    }

    /// No more than `concurrency` calls overlap.
    #[tokio::test(start_paused = true)]
    async fn respects_concurrency_cap() {
        let backend = Arc::new(
            MockBackend::new(|batch, _| translate_with(batch, |t| t.to_string()))
                .with_delay(Duration::from_millis(100)),
        );
        let ctx = JobContext::new(CancelHandle::new());
        let started = Instant::now();
        let (summary, _) = run(backend.clone(), 2, policy(0), batches(6), &ctx).await;
        assert_eq!(summary.succeeded, 6);
        let calls = backend.calls();
        for call in &calls {
            let overlapping = calls
                .iter()
                .filter(|c| c.at >= call.at && c.at < call.at + Duration::from_millis(100))
                .count();
            assert!(overlapping <= 2);
        }
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn paces_requests_per_second() {
        let backend = Arc::new(MockBackend::echo().with_limits(BackendLimits {
            max_batch_chars: 100,
            max_batch_items: 10,
            requests_per_second: Some(2.0),
        }));
        let ctx = JobContext::new(CancelHandle::new());
        run(backend.clone(), 4, policy(0), batches(3), &ctx).await;
        let mut times: Vec<Instant> = backend.calls().iter().map(|c| c.at).collect();
        times.sort();
        assert!(times[1] - times[0] >= Duration::from_millis(500));
        assert!(times[2] - times[1] >= Duration::from_millis(500));
    }

    /// A result that does not line up with the batch is a provider error.
    #[tokio::test(start_paused = true)]
    async fn misaligned_result_aborts_batch() {
        let backend = Arc::new(MockBackend::new(|batch, _| {
            let mut result = translate_with(batch, |t| t.to_string())?;
            result.per_unit.pop();
            Ok(result)
        }));
        let ctx = JobContext::new(CancelHandle::new());
        let (_, outcomes) = run(backend.clone(), 1, policy(3), batches(1), &ctx).await;
        assert!(matches!(outcomes[0].result, Err(BackendError::Provider(_))));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_backend_fails_batch() {
        let backend = Arc::new(MockBackend::new(|batch, _| {
            if batch.id == 0 {
                panic!("adapter bug");
            }
            translate_with(batch, |t| t.to_string())
        }));
        let ctx = JobContext::new(CancelHandle::new());
        let (summary, outcomes) = run(backend, 2, policy(0), batches(2), &ctx).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
    }

    #[tokio::test]
    async fn empty_input_finishes_immediately() {
        let ctx = JobContext::new(CancelHandle::new());
        let (summary, outcomes) = run(Arc::new(MockBackend::echo()), 2, policy(3), Vec::new(), &ctx).await;
        assert_eq!(summary, DispatchSummary::default());
        assert!(outcomes.is_empty());
    }
}
