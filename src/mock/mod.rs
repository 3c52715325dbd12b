//! Mock implementations for testing
//!
//! This module provides a scripted sampler so the control loop can be driven
//! without 1-Wire hardware.

use crate::error::{BoilerError, Result};
use crate::sampler::Sampler;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Script {
    /// Pending readings per sensor; the last one repeats once drained
    readings: HashMap<String, VecDeque<f64>>,
    /// Sensors that fail until cleared
    failing: HashMap<String, String>,
}

/// Mock sampler returning scripted readings
#[derive(Debug, Default)]
pub struct MockSampler {
    script: Mutex<Script>,
    reads: AtomicUsize,
}

impl MockSampler {
    /// Create new mock sampler
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a constant reading for a sensor
    pub fn with_reading(mut self, uid: &str, value: f64) -> Self {
        self.script
            .get_mut()
            .readings
            .insert(uid.to_string(), VecDeque::from([value]));
        self
    }

    /// Replace the reading of a sensor
    pub async fn set_reading(&self, uid: &str, value: f64) {
        let mut script = self.script.lock().await;
        script
            .readings
            .insert(uid.to_string(), VecDeque::from([value]));
    }

    /// Queue readings returned in order, the last one repeating
    pub async fn queue_readings(&self, uid: &str, values: &[f64]) {
        let mut script = self.script.lock().await;
        script
            .readings
            .entry(uid.to_string())
            .or_default()
            .extend(values.iter().copied());
    }

    /// Make a sensor fail with the given reason until cleared
    pub async fn fail(&self, uid: &str, reason: &str) {
        let mut script = self.script.lock().await;
        script.failing.insert(uid.to_string(), reason.to_string());
    }

    /// Let a failing sensor read again
    pub async fn recover(&self, uid: &str) {
        let mut script = self.script.lock().await;
        script.failing.remove(uid);
    }

    /// Total number of raw reads served, failures included
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sampler for MockSampler {
    async fn read_raw(&self, uid: &str) -> Result<f64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;

        if let Some(reason) = script.failing.get(uid) {
            return Err(BoilerError::sensor_read(uid, reason.clone()));
        }

        let queue = script
            .readings
            .get_mut(uid)
            .ok_or_else(|| BoilerError::sensor_read(uid, "no such sensor in mock"))?;
        let value = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };

        value.ok_or_else(|| BoilerError::sensor_read(uid, "no reading scripted"))
    }
}
