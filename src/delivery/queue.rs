//! Delivery queue — one FIFO worker that throttles every outbound send.
//!
//! The worker pulls the oldest job, waits a jittered delay drawn from
//! `[min_delay, max_delay]`, runs the job, and records the completion time
//! in a sliding 60-second window. While the window holds `max_per_minute`
//! entries it re-checks every `poll_interval` instead of dequeuing.
//!
//! A failed or panicking job still counts against the window. Nothing is
//! retried and nothing is reported back to whoever enqueued the job.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default per-send delay floor.
pub const DEFAULT_MIN_DELAY_MS: u64 = 1000;

/// Default sliding-window cap.
pub const DEFAULT_MAX_PER_MINUTE: usize = 10;

/// Length of the sliding rate window.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Recheck interval while the rate window is full.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Throttling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_per_minute: usize,
    pub poll_interval: Duration,
}

impl DeliveryConfig {
    /// Build from millisecond settings. `max_delay_ms` below the floor (or
    /// unset) collapses to the floor; a zero cap is raised to one.
    pub fn from_millis(min_delay_ms: u64, max_delay_ms: Option<u64>, max_per_minute: usize) -> Self {
        let max_delay_ms = max_delay_ms.unwrap_or(min_delay_ms).max(min_delay_ms);
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            max_per_minute: max_per_minute.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Draw one send delay uniformly from `[min_delay, max_delay]`.
    fn jitter(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::from_millis(DEFAULT_MIN_DELAY_MS, None, DEFAULT_MAX_PER_MINUTE)
    }
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    /// Completion instants inside the trailing window, oldest first.
    completed: VecDeque<Instant>,
    running: bool,
}

impl QueueState {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.completed.front() {
            if now.duration_since(oldest) > RATE_WINDOW {
                self.completed.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Rate-limited, jittered FIFO of outbound sends.
pub struct DeliveryQueue {
    config: DeliveryConfig,
    state: Mutex<QueueState>,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job and return immediately. Starts the worker if it is idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<F, Fut, E>(self: &Arc<Self>, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let job: Job = Box::new(move || {
            async move { job().await.map_err(|e| e.to_string()) }.boxed()
        });

        let start_worker = {
            let mut state = self.lock();
            state.jobs.push_back(job);
            debug!(pending = state.jobs.len(), "Delivery job enqueued");
            !std::mem::replace(&mut state.running, true)
        };

        if start_worker {
            debug!("Starting delivery worker");
            tokio::spawn(Arc::clone(self).run());
        }
    }

    /// Jobs accepted but not yet started.
    pub fn pending_count(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Sends completed inside the trailing window.
    pub fn sent_in_window(&self) -> usize {
        let mut state = self.lock();
        state.prune(Instant::now());
        state.completed.len()
    }

    async fn run(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.lock();
                if state.jobs.is_empty() {
                    state.running = false;
                    debug!("Delivery queue drained, worker idle");
                    return;
                }
                state.prune(Instant::now());
                if state.completed.len() >= self.config.max_per_minute {
                    None
                } else {
                    state.jobs.pop_front()
                }
            };

            let Some(job) = next else {
                debug!(
                    limit = self.config.max_per_minute,
                    "Rate window full, waiting"
                );
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };

            let delay = self.config.jitter();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = AssertUnwindSafe(async move { job().await })
                .catch_unwind()
                .await;

            let remaining = {
                let mut state = self.lock();
                state.completed.push_back(Instant::now());
                state.jobs.len()
            };

            match outcome {
                Ok(Ok(())) => info!(delay_ms = delay.as_millis() as u64, remaining, "Delivery job completed"),
                Ok(Err(e)) => warn!(error = %e, remaining, "Delivery job failed"),
                Err(_) => error!(remaining, "Delivery job panicked"),
            }
        }
    }
}
