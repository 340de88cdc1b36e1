//! Elapsed time and linear ETA for progress log lines

use std::fmt;
use std::time::{Duration, Instant};

/// Progress of a run over a known amount of work
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    total: u64,
    started: Instant,
}

impl Progress {
    pub fn start(total: u64) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// State after `done` units of work, measured now
    pub fn snapshot(&self, done: u64) -> Snapshot {
        Snapshot::compute(self.total, done, self.started.elapsed())
    }
}

/// Point-in-time progress figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub percent: f64,
    pub elapsed: Duration,
    /// `None` until some work is done
    pub eta: Option<Duration>,
}

impl Snapshot {
    /// ETA extrapolates the rate so far: `total * elapsed / done - elapsed`
    pub fn compute(total: u64, done: u64, elapsed: Duration) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (done.min(total) as f64) * 100.0 / total as f64
        };
        let eta = (done > 0).then(|| {
            let projected = elapsed.as_secs_f64() * total as f64 / done as f64;
            Duration::from_secs_f64((projected - elapsed.as_secs_f64()).max(0.0))
        });
        Self {
            percent,
            elapsed,
            eta,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0}% elapsed {} s",
            self.percent,
            self.elapsed.as_secs()
        )?;
        match self.eta {
            Some(eta) => write!(f, " ETA {} s", eta.as_secs()),
            None => write!(f, " ETA ? s"),
        }
    }
}
