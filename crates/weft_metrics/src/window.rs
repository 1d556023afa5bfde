//! Rolling window of duration samples

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct SampleWindow {
    samples: Vec<Duration>,
    capacity: usize,
    index: usize,
}

impl SampleWindow {
    /// A window keeping the last `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.index] = sample;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    /// Run `f` and record how long it took.
    pub fn time<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.push(start.elapsed());
        result
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.samples.iter().sum();
        sum / self.samples.len() as u32
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        let min = self.samples.iter().min().copied();
        let max = self.samples.iter().max().copied();
        match (min, max) {
            (Some(min), Some(max)) => (min, max),
            _ => (Duration::ZERO, Duration::ZERO),
        }
    }
}
