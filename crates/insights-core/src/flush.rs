//! Bounded shutdown of buffered telemetry.
//!
//! Every backend that buffers (GELF worker, StatsD queue, Sentry transport,
//! OTLP batch processor, buffered log file) contributes a named step. Steps
//! run in order, each on its own thread, and the caller waits at most the
//! step's timeout before moving on. A hung collector can delay shutdown by
//! its timeout and no more.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

type StepFn = Box<dyn FnOnce() + Send + 'static>;

pub struct FlushStep {
    pub name: String,
    pub timeout: Duration,
    run: StepFn,
}

impl fmt::Debug for FlushStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushStep")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Outcome of [`Flusher::flush`], by step name.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FlushReport {
    pub completed: Vec<String>,
    pub timed_out: Vec<String>,
    /// Steps that panicked or whose thread could not be started.
    pub failed: Vec<String>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty()
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} timed out, {} failed",
            self.completed.len(),
            self.timed_out.len(),
            self.failed.len()
        )
    }
}

/// Ordered flush steps. Consumed by [`flush`](Flusher::flush), so it runs once.
#[derive(Debug, Default)]
#[must_use = "buffered telemetry is lost unless the flusher runs"]
pub struct Flusher {
    steps: Vec<FlushStep>,
}

impl Flusher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, timeout: Duration, f: impl FnOnce() + Send + 'static) {
        self.steps.push(FlushStep {
            name: name.to_owned(),
            timeout,
            run: Box::new(f),
        });
    }

    /// Chained form of [`push`](Flusher::push).
    pub fn then(mut self, name: &str, timeout: Duration, f: impl FnOnce() + Send + 'static) -> Self {
        self.push(name, timeout, f);
        self
    }

    /// Append another flusher's steps after this one's.
    pub fn extend(&mut self, other: Flusher) {
        self.steps.extend(other.steps);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Upper bound on how long [`flush`](Flusher::flush) can take.
    pub fn deadline(&self) -> Duration {
        self.steps.iter().map(|s| s.timeout).sum()
    }

    pub fn flush(self) -> FlushReport {
        let mut report = FlushReport::default();
        for step in self.steps {
            let started = Instant::now();
            let (tx, rx) = flume::bounded::<()>(1);
            let run = step.run;
            let spawned = thread::Builder::new()
                .name(format!("flush-{}", step.name))
                .spawn(move || {
                    run();
                    let _ = tx.send(());
                });
            if let Err(e) = spawned {
                tracing::warn!(step = %step.name, error = %e, "cannot start flush step");
                report.failed.push(step.name);
                continue;
            }

            match rx.recv_timeout(step.timeout) {
                Ok(()) => {
                    tracing::debug!(step = %step.name, elapsed_ms = started.elapsed().as_millis() as u64, "flushed");
                    report.completed.push(step.name);
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    tracing::warn!(step = %step.name, timeout_ms = step.timeout.as_millis() as u64, "flush timed out");
                    report.timed_out.push(step.name);
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    tracing::warn!(step = %step.name, "flush step panicked");
                    report.failed.push(step.name);
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
