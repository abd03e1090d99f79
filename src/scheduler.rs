//! Serialized, rate-limited render scheduling

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::trace;

use crate::request::{RenderOutcome, RequestId};

/// What the scheduler's worker is doing right now
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// No work submitted
    Idle = 0,
    /// A job has been adopted and is sitting out the throttle window
    Waiting = 1,
    /// A job is executing
    Running = 2,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Waiting,
            2 => Self::Running,
            _ => Self::Idle,
        }
    }
}

struct Shared {
    min_delay_nanos: AtomicU64,
    phase: AtomicU8,
    shutdown: AtomicBool,
}

impl Shared {
    fn min_delay(&self) -> Duration {
        Duration::from_nanos(self.min_delay_nanos.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

/// One unit of render work travelling to the worker
struct Job<T> {
    id: RequestId,
    cancelled: Arc<AtomicBool>,
    work: Box<dyn FnOnce() -> T + Send>,
    outcome_tx: Sender<RenderOutcome<T>>,
}

impl<T> Job<T> {
    fn resolve(self, outcome: RenderOutcome<T>) {
        let _ = self.outcome_tx.send(outcome);
    }
}

/// Handle to one enqueued unit of work.
///
/// Resolves exactly once, to [`RenderOutcome::Completed`] if the work ran, or
/// to `Superseded`/`Cancelled` if it never got the chance.
pub struct Ticket<T> {
    id: RequestId,
    cancelled: Arc<AtomicBool>,
    outcome_rx: Receiver<RenderOutcome<T>>,
}

impl<T> Ticket<T> {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Withdraw the request. Prevents work that has not yet started from
    /// running; work already executing finishes regardless.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Non-blocking check for the outcome
    #[must_use]
    pub fn poll(&self) -> Option<RenderOutcome<T>> {
        match self.outcome_rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(RenderOutcome::Cancelled),
        }
    }

    /// Block until the request resolves
    #[must_use]
    pub fn wait(self) -> RenderOutcome<T> {
        self.outcome_rx.recv().unwrap_or(RenderOutcome::Cancelled)
    }
}

/// A mutual-exclusion, rate-limited queue of at most one pending render.
///
/// Work runs on a single dedicated worker thread. Enqueuing replaces
/// whatever was pending or still waiting to start; the replaced caller sees
/// [`RenderOutcome::Superseded`]. Successive run-starts are spaced at least
/// `min_delay` apart, and only work that actually starts consumes that
/// window, so a storm of superseded requests cannot starve a real render.
pub struct RenderScheduler<T> {
    job_tx: Sender<Job<T>>,
    shared: Arc<Shared>,
    next_request_id: u64,
}

impl<T: Send + 'static> RenderScheduler<T> {
    #[must_use]
    pub fn new(min_delay: Duration) -> Self {
        let shared = Arc::new(Shared {
            min_delay_nanos: AtomicU64::new(delay_nanos(min_delay)),
            phase: AtomicU8::new(Phase::Idle as u8),
            shutdown: AtomicBool::new(false),
        });

        let (job_tx, job_rx) = flume::unbounded();
        let worker_shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            scheduler_worker(&job_rx, &worker_shared);
        });

        Self {
            job_tx,
            shared,
            next_request_id: 1,
        }
    }

    /// Submit work, replacing anything not yet running.
    ///
    /// The returned ticket resolves once the work completes or once a newer
    /// enqueue (or [`Ticket::cancel`]) makes it irrelevant.
    pub fn enqueue(&mut self, work: impl FnOnce() -> T + Send + 'static) -> Ticket<T> {
        let id = self.next_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (outcome_tx, outcome_rx) = flume::bounded(1);

        let job = Job {
            id,
            cancelled: Arc::clone(&cancelled),
            work: Box::new(work),
            outcome_tx,
        };
        if let Err(refused) = self.job_tx.send(job) {
            // worker already gone
            refused.into_inner().resolve(RenderOutcome::Cancelled);
        }

        Ticket {
            id,
            cancelled,
            outcome_rx,
        }
    }

    /// Set the minimum spacing between run-starts. Applies to subsequent
    /// starts; work already running is unaffected.
    pub fn set_min_delay(&self, min_delay: Duration) {
        self.shared
            .min_delay_nanos
            .store(delay_nanos(min_delay), Ordering::Release);
    }

    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.shared.min_delay()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.shared.phase.load(Ordering::Acquire))
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl<T> Drop for RenderScheduler<T> {
    fn drop(&mut self) {
        // the worker drains and cancels whatever is still queued once the
        // job sender disconnects
        self.shared.shutdown.store(true, Ordering::Release);
    }
}

fn delay_nanos(delay: Duration) -> u64 {
    u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX)
}

fn scheduler_worker<T>(jobs: &Receiver<Job<T>>, shared: &Shared) {
    let mut next_eligible = Instant::now();

    // Idle: block until a job arrives
    while let Ok(mut job) = jobs.recv() {
        shared.set_phase(Phase::Waiting);

        // Waiting: sit out the throttle window. A newer enqueue arriving
        // during the wait supersedes the job in hand without consuming the
        // window.
        let mut disconnected = false;
        while Instant::now() < next_eligible {
            match jobs.recv_deadline(next_eligible) {
                Ok(newer) => {
                    trace!("render {:?} superseded by {:?} while throttled", job.id, newer.id);
                    job.resolve(RenderOutcome::Superseded);
                    job = newer;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        // adopt anything that raced the end of the wait; the newest wins
        while let Ok(newer) = jobs.try_recv() {
            trace!("render {:?} superseded by {:?} before start", job.id, newer.id);
            job.resolve(RenderOutcome::Superseded);
            job = newer;
        }

        if disconnected || shared.shutdown.load(Ordering::Acquire) {
            job.resolve(RenderOutcome::Cancelled);
            shared.set_phase(Phase::Idle);
            continue;
        }
        if job.cancelled.load(Ordering::Acquire) {
            trace!("render {:?} cancelled before start", job.id);
            job.resolve(RenderOutcome::Cancelled);
            shared.set_phase(Phase::Idle);
            continue;
        }

        // Running: only an actual run-start advances the rate limiter
        next_eligible = Instant::now() + shared.min_delay();
        shared.set_phase(Phase::Running);
        let Job {
            work, outcome_tx, ..
        } = job;
        let result = work();
        let _ = outcome_tx.send(RenderOutcome::Completed(result));
        shared.set_phase(Phase::Idle);
    }

    shared.set_phase(Phase::Idle);
}
