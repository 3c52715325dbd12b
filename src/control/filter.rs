//! Per-sensor moving-average smoothing

use crate::config::Purpose;
use std::collections::{HashMap, VecDeque};

/// Bounded FIFO of past readings for one sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryBuffer {
    values: VecDeque<f64>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading and drop the oldest ones beyond `limit`
    pub fn push(&mut self, value: f64, limit: usize) {
        self.values.push_back(value);
        // A shrunk limit drops several entries at once.
        while self.values.len() > limit.max(1) {
            self.values.pop_front();
        }
    }

    /// Arithmetic mean of the buffered readings
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Readings in insertion order, oldest first
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Moving-average filter keeping one history per active sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovingAverageFilter {
    histories: HashMap<String, HistoryBuffer>,
}

impl MovingAverageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw reading and return the sensor's smoothed value
    pub fn smooth(&mut self, uid: &str, raw: f64, limit: usize) -> f64 {
        let history = self.histories.entry(uid.to_string()).or_default();
        history.push(raw, limit);
        history.mean().unwrap_or(raw)
    }

    /// Drop histories of sensors no longer sampled (removed or reclassified to NONE)
    pub fn retain_active<'a, I>(&mut self, active: I)
    where
        I: IntoIterator<Item = (&'a str, Purpose)>,
    {
        let keep: Vec<&str> = active
            .into_iter()
            .filter(|(_, purpose)| *purpose != Purpose::None)
            .map(|(uid, _)| uid)
            .collect();
        self.histories.retain(|uid, _| keep.contains(&uid.as_str()));
    }

    pub fn history(&self, uid: &str) -> Option<&HistoryBuffer> {
        self.histories.get(uid)
    }

    pub fn tracked_sensors(&self) -> usize {
        self.histories.len()
    }
}
