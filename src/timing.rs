//! Per-stage timing, for logging only.

use std::fmt;
use std::time::{Duration, Instant};

/// Named stage durations from one pass through a loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingSample {
    stages: Vec<(&'static str, Duration)>,
}

impl TimingSample {
    pub fn record(&mut self, stage: &'static str, duration: Duration) {
        match self.stages.iter_mut().find(|(name, _)| *name == stage) {
            Some((_, slot)) => *slot = duration,
            None => self.stages.push((stage, duration)),
        }
    }

    pub fn get(&self, stage: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, duration)| *duration)
    }

    pub fn stages(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.stages.iter().copied()
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, duration)| *duration).sum()
    }

    pub fn clear(&mut self) {
        self.stages.clear();
    }
}

impl fmt::Display for TimingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, duration)) in self.stages.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}:{:.2}ms", name, duration.as_secs_f64() * 1000.0)?;
        }
        Ok(())
    }
}

/// Records the time since the previous lap under a stage name.
#[derive(Debug)]
pub struct Stopwatch {
    last: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    pub fn lap(&mut self, sample: &mut TimingSample, stage: &'static str) {
        let now = Instant::now();
        sample.record(stage, now - self.last);
        self.last = now;
    }
}

/// Running per-stage totals, reported as averages every `interval` samples.
#[derive(Debug)]
pub struct TimingStats {
    interval: u64,
    count: u64,
    totals: TimingSample,
}

impl TimingStats {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            count: 0,
            totals: TimingSample::default(),
        }
    }

    /// Add a sample; returns the averages once per interval, then starts over.
    pub fn add(&mut self, sample: &TimingSample) -> Option<TimingSample> {
        for (stage, duration) in sample.stages() {
            let sum = self.totals.get(stage).unwrap_or_default() + duration;
            self.totals.record(stage, sum);
        }
        self.count += 1;

        if self.count < self.interval {
            return None;
        }

        let mut averages = TimingSample::default();
        for (stage, total) in self.totals.stages() {
            averages.record(stage, total / self.count as u32);
        }
        self.count = 0;
        self.totals.clear();
        Some(averages)
    }
}

/// Frames per second for one loop iteration of `duration`.
pub fn fps(duration: Duration) -> f64 {
    if duration.is_zero() {
        0.0
    } else {
        1.0 / duration.as_secs_f64()
    }
}
