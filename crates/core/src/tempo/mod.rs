use serde::{Deserialize, Serialize};

use crate::{EchoError, Result};

/// How raw event throughput is turned into a groove tempo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Events per second are divided by this to get beats per minute.
    pub bpm_divider: f64,
    /// Floor applied when the stream is quiet, so the transport never stalls.
    pub min_bpm: f64,
    pub max_bpm: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            bpm_divider: 5.0,
            min_bpm: 30.0,
            max_bpm: 300.0,
        }
    }
}

impl TempoConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.bpm_divider.is_finite() && self.bpm_divider > 0.0) {
            return Err(EchoError::config("tempo.bpm_divider must be positive"));
        }
        if !(self.min_bpm.is_finite() && self.min_bpm > 0.0) {
            return Err(EchoError::config("tempo.min_bpm must be positive"));
        }
        if !(self.max_bpm.is_finite() && self.max_bpm >= self.min_bpm) {
            return Err(EchoError::config("tempo.max_bpm must be at least tempo.min_bpm"));
        }
        Ok(())
    }
}

/// Latest tempo estimate, exposed to the transport and the BPM indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoState {
    pub events_this_cycle: u64,
    pub events_per_second: f64,
    pub current_bpm: f64,
}

/// Derives the transport tempo from the number of events seen per cycle.
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    config: TempoConfig,
    state: TempoState,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        Self {
            config,
            state: TempoState::default(),
        }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    pub fn state(&self) -> &TempoState {
        &self.state
    }

    /// Records one cycle worth of events and returns the new estimate.
    ///
    /// The returned BPM is always finite and inside
    /// `[min_bpm, max_bpm]`; an empty or zero length cycle lands on the floor.
    pub fn estimate(&mut self, event_count: u64, cycle_seconds: f64) -> TempoState {
        let events_per_second = if cycle_seconds.is_finite() && cycle_seconds > f64::EPSILON {
            event_count as f64 / cycle_seconds
        } else {
            0.0
        };

        let raw_bpm = events_per_second / self.config.bpm_divider;
        let current_bpm = if raw_bpm.is_finite() {
            raw_bpm.clamp(self.config.min_bpm, self.config.max_bpm)
        } else {
            self.config.min_bpm
        };

        self.state = TempoState {
            events_this_cycle: event_count,
            events_per_second,
            current_bpm,
        };
        self.state
    }
}
