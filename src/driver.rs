//! Bounded worker pool with a windowed circuit breaker.

use std::any::Any;
use std::ops::RangeInclusive;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::Rng;
use tracing::{debug, error, info};

/// Sliding-window failure limit checked every `window` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Results per window.
    pub window: usize,
    /// Failures within a window that stop dispatch.
    pub threshold: usize,
}

impl CircuitBreakerConfig {
    /// Default for player collection.
    pub const PLAYERS: Self = Self {
        window: 30,
        threshold: 10,
    };
    /// Default for team collection.
    pub const TEAMS: Self = Self {
        window: 10,
        threshold: 5,
    };

    /// Builds a config; both values are at least 1.
    pub fn new(window: usize, threshold: usize) -> Self {
        Self {
            window: window.max(1),
            threshold: threshold.max(1),
        }
    }
}

/// Tally of one bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Items handed to a worker.
    pub dispatched: usize,
    /// Items that returned `Ok`.
    pub succeeded: usize,
    /// Items that returned an error or panicked.
    pub failed: usize,
    /// True when the breaker stopped dispatch before the input ran out.
    pub aborted: bool,
}

/// Runs per-item work on a fixed number of threads.
#[derive(Debug, Clone)]
pub struct BulkDriver {
    workers: usize,
    jitter: RangeInclusive<Duration>,
    breaker: CircuitBreakerConfig,
}

/// Default worker thread count.
pub const DEFAULT_WORKERS: usize = 2;

/// Default per-item jitter, 1.0 to 2.5 seconds.
pub fn default_jitter() -> RangeInclusive<Duration> {
    Duration::from_millis(1_000)..=Duration::from_millis(2_500)
}

impl BulkDriver {
    /// Builds a pool of `workers` threads; the jitter bounds are swapped if reversed.
    pub fn new(
        workers: usize,
        jitter: RangeInclusive<Duration>,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let (lo, hi) = jitter.into_inner();
        let jitter = if lo <= hi { lo..=hi } else { hi..=lo };
        Self {
            workers: workers.max(1),
            jitter,
            breaker,
        }
    }

    /// Current breaker config.
    pub fn breaker(&self) -> CircuitBreakerConfig {
        self.breaker
    }

    /// Same pool settings with a different breaker.
    pub fn with_breaker(&self, breaker: CircuitBreakerConfig) -> Self {
        Self {
            breaker,
            ..self.clone()
        }
    }

    /// Processes `items`, keeping at most `workers` of them in flight.
    ///
    /// The next item is only dispatched after a result comes back, so the
    /// breaker sees results in the order it counts them. Tripping the breaker
    /// stops dispatch and waits for in-flight items; it never panics or errors.
    pub fn run<T, F>(&self, items: Vec<T>, process: F) -> BulkOutcome
    where
        T: Send,
        F: Fn(&T) -> Result<()> + Sync,
    {
        let total = items.len();
        let mut outcome = BulkOutcome::default();
        if total == 0 {
            return outcome;
        }

        let (task_tx, task_rx) = bounded::<(usize, T)>(self.workers);
        let (result_tx, result_rx) = bounded::<(usize, Result<()>)>(self.workers);

        thread::scope(|scope| {
            for worker_id in 0..self.workers.min(total) {
                let receiver = task_rx.clone();
                let sender = result_tx.clone();
                let process = &process;
                let jitter = self.jitter.clone();
                scope.spawn(move || worker_loop(worker_id, receiver, sender, jitter, process));
            }
            drop(task_rx);
            drop(result_tx);

            let mut pending = items.into_iter().enumerate();
            let mut inflight = 0usize;
            let mut window_seen = 0usize;
            let mut window_errors = 0usize;

            for _ in 0..self.workers {
                if !dispatch_next(&mut pending, &task_tx, &mut inflight, &mut outcome) {
                    break;
                }
            }

            while inflight > 0 {
                let Ok((index, result)) = result_rx.recv() else {
                    error!(inflight, "bulk worker channel closed unexpectedly");
                    break;
                };
                inflight -= 1;
                match result {
                    Ok(()) => outcome.succeeded += 1,
                    Err(err) => {
                        outcome.failed += 1;
                        window_errors += 1;
                        debug!(index, "item failed: {err:#}");
                    }
                }

                if !outcome.aborted {
                    window_seen += 1;
                    if window_seen >= self.breaker.window {
                        if window_errors >= self.breaker.threshold {
                            error!(
                                errors = window_errors,
                                window = self.breaker.window,
                                processed = outcome.succeeded + outcome.failed,
                                "too many errors, stopping collection"
                            );
                            outcome.aborted = true;
                        }
                        window_seen = 0;
                        window_errors = 0;
                    }
                }

                if !outcome.aborted {
                    dispatch_next(&mut pending, &task_tx, &mut inflight, &mut outcome);
                }

                let done = outcome.succeeded + outcome.failed;
                if done % 10 == 0 {
                    info!(done, total, "bulk progress");
                }
            }
            drop(task_tx);
        });

        info!(
            dispatched = outcome.dispatched,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            aborted = outcome.aborted,
            "bulk run finished"
        );
        outcome
    }
}

impl Default for BulkDriver {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS, default_jitter(), CircuitBreakerConfig::PLAYERS)
    }
}

fn dispatch_next<T>(
    pending: &mut impl Iterator<Item = (usize, T)>,
    sender: &Sender<(usize, T)>,
    inflight: &mut usize,
    outcome: &mut BulkOutcome,
) -> bool {
    let Some(task) = pending.next() else {
        return false;
    };
    if sender.send(task).is_err() {
        error!("bulk task channel closed");
        return false;
    }
    *inflight += 1;
    outcome.dispatched += 1;
    true
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn worker_loop<T, F>(
    worker_id: usize,
    receiver: Receiver<(usize, T)>,
    sender: Sender<(usize, Result<()>)>,
    jitter: RangeInclusive<Duration>,
    process: &F,
) where
    F: Fn(&T) -> Result<()>,
{
    let mut rng = rand::thread_rng();
    for (index, item) in receiver.iter() {
        let delay = if jitter.start() < jitter.end() {
            rng.gen_range(jitter.clone())
        } else {
            *jitter.start()
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        debug!(worker_id, index, "processing item");
        let result = panic::catch_unwind(AssertUnwindSafe(|| process(&item)))
            .unwrap_or_else(|payload| Err(anyhow!("item panicked: {}", panic_message(&*payload))));
        if sender.send((index, result)).is_err() {
            break;
        }
    }
}
