use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// A decoded temperature/humidity pair, not yet placed in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
}

impl Reading {
    pub fn at(self, timestamp: f64) -> Sample {
        Sample {
            timestamp,
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    pub temperature: f64,
    pub humidity: f64,
}

impl Sample {
    pub fn reading(&self) -> Reading {
        Reading {
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Offsets of each sample from the first one, for plotting on a zero-based
/// axis. The buffer keeps raw timestamps so every consumer normalizes alike.
pub fn relative_times(samples: &[Sample]) -> Vec<f64> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    samples.iter().map(|s| s.timestamp - first.timestamp).collect()
}

/// Fixed-capacity rolling window of samples, shared between the control loop
/// (writer) and any number of readers. Cloning shares the same window.
#[derive(Debug, Clone)]
pub struct SampleRing {
    inner: Arc<Mutex<VecDeque<Sample>>>,
    capacity: usize,
}

impl SampleRing {
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sample ring capacity must be non-zero");
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        // Samples are plain data, a poisoned lock still holds a valid window.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, sample: Sample) {
        let mut buf = self.lock();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(sample);
    }

    /// Copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().iter().copied().collect()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.lock().back().copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CAPACITY)
    }
}
