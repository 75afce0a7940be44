//! Progress primitives for long-running acquisitions.
//!
//! Two independent signals describe how far along an image save is:
//!
//! - [`TimedProgress`]: a wall-clock estimate derived from an expected
//!   duration, useful while the daemon has not produced any bytes yet.
//! - [`ByteCounter`]: the exact number of bytes copied so far.
//!
//! [`Aggregator`] folds both into a single fraction that never goes
//! backwards, and [`StagedProgress`] pairs it with a [`Stage`] label so
//! renderers can show which phase is active.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The timed estimate alone never claims the work is done.
const ESTIMATE_CEILING: f64 = 0.99;

/// Resolution used when an aggregate fraction is reported as a [`Progress`].
const AGGREGATE_RESOLUTION: u64 = 10_000;

/// Point-in-time view of a progress signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub current: u64,
    pub size: u64,
    pub completed: bool,
}

impl Progress {
    /// Completed fraction in `[0, 1]`.
    pub fn ratio(&self) -> f64 {
        if self.completed {
            return 1.0;
        }
        if self.size == 0 {
            return 0.0;
        }
        (self.current as f64 / self.size as f64).clamp(0.0, 1.0)
    }
}

/// Anything that can report a [`Progress`] snapshot.
pub trait Progressable: Send + Sync {
    fn progress(&self) -> Progress;
}

/// Estimate that advances with wall-clock time towards an expected duration.
#[derive(Debug)]
pub struct TimedProgress {
    started: Instant,
    expected: Duration,
    completed: AtomicBool,
}

impl TimedProgress {
    /// Start the clock now.
    pub fn new(expected: Duration) -> Self {
        Self {
            started: Instant::now(),
            expected,
            completed: AtomicBool::new(false),
        }
    }

    /// Estimate for moving `total_bytes` at `bytes_per_sec`.
    pub fn for_transfer(total_bytes: u64, bytes_per_sec: u64) -> Self {
        let secs = total_bytes as f64 / bytes_per_sec.max(1) as f64;
        Self::new(Duration::from_millis((secs * 1000.0) as u64))
    }

    pub fn expected(&self) -> Duration {
        self.expected
    }

    pub fn set_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

impl Progressable for TimedProgress {
    fn progress(&self) -> Progress {
        let size = (self.expected.as_millis() as u64).max(1);
        if self.is_completed() {
            return Progress {
                current: size,
                size,
                completed: true,
            };
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        Progress {
            current: elapsed.min(size),
            size,
            completed: false,
        }
    }
}

/// Exact count of bytes moved so far against an expected total.
#[derive(Debug, Default)]
pub struct ByteCounter {
    current: AtomicU64,
    size: AtomicU64,
    completed: AtomicBool,
}

impl ByteCounter {
    pub fn new(size: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            size: AtomicU64::new(size),
            completed: AtomicBool::new(false),
        }
    }

    /// Record `n` more bytes. The expected total grows if the copy overshoots it.
    pub fn record(&self, n: u64) {
        let current = self.current.fetch_add(n, Ordering::AcqRel) + n;
        self.size.fetch_max(current, Ordering::AcqRel);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn set_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }
}

impl Progressable for ByteCounter {
    fn progress(&self) -> Progress {
        Progress {
            current: self.current.load(Ordering::Acquire),
            size: self.size.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
        }
    }
}

/// Folds an estimate and a measurement into one non-decreasing fraction.
///
/// Until the measured signal moves, the aggregate follows the estimate,
/// capped below 1.0. A completed estimate freezes at the last value it
/// produced rather than jumping ahead. Once bytes are counted the aggregate
/// is the byte fraction, held at the highest value reported so far until
/// the bytes catch up with it, so it reaches 1.0 exactly when the
/// measurement does.
pub struct Aggregator {
    estimate: Arc<dyn Progressable>,
    measured: Arc<dyn Progressable>,
    reported: Mutex<f64>,
}

impl Aggregator {
    pub fn new(estimate: Arc<dyn Progressable>, measured: Arc<dyn Progressable>) -> Self {
        Self {
            estimate,
            measured,
            reported: Mutex::new(0.0),
        }
    }

    /// Current aggregate fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        let measured = self.measured.progress();
        let mut reported = self.reported.lock();

        let candidate = if measured.completed {
            1.0
        } else if measured.current > 0 {
            measured.ratio()
        } else {
            let estimate = self.estimate.progress();
            if estimate.completed {
                *reported
            } else {
                estimate.ratio().min(ESTIMATE_CEILING)
            }
        };

        if candidate > *reported {
            *reported = candidate.min(1.0);
        }
        *reported
    }

    pub fn is_completed(&self) -> bool {
        self.measured.progress().completed
    }
}

impl Progressable for Aggregator {
    fn progress(&self) -> Progress {
        let fraction = self.fraction();
        Progress {
            current: (fraction * AGGREGATE_RESOLUTION as f64).round() as u64,
            size: AGGREGATE_RESOLUTION,
            completed: self.is_completed(),
        }
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("reported", &*self.reported.lock())
            .finish()
    }
}

/// Name of the currently active phase.
#[derive(Debug, Default)]
pub struct Stage {
    current: RwLock<String>,
    transitions: AtomicUsize,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>) {
        *self.current.write() = name.into();
        self.transitions.fetch_add(1, Ordering::AcqRel);
    }

    pub fn current(&self) -> String {
        self.current.read().clone()
    }

    /// Number of times the label has been set.
    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::Acquire)
    }
}

/// Shared handle to a stage label and its aggregate progress.
#[derive(Debug, Clone)]
pub struct StagedProgress {
    stage: Arc<Stage>,
    progress: Arc<Aggregator>,
}

impl StagedProgress {
    pub fn new(stage: Arc<Stage>, progress: Arc<Aggregator>) -> Self {
        Self { stage, progress }
    }

    pub fn stage(&self) -> String {
        self.stage.current()
    }

    /// Number of stage changes so far.
    pub fn transitions(&self) -> usize {
        self.stage.transitions()
    }

    pub fn fraction(&self) -> f64 {
        self.progress.fraction()
    }

    pub fn is_completed(&self) -> bool {
        self.progress.is_completed()
    }
}
