//! Turns one cycle of raw event timestamps into quantized, pitched notes.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{EchoError, MusicalTime, Platform, Result};

/// Letter names of the scale the pitch walk moves over.
pub const SCALE: [&str; 7] = ["C", "D", "E", "F", "G", "A", "B"];

/// Per-platform layout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Grid every event offset is snapped to.
    pub quantize_to: MusicalTime,
    /// Duration of a note carrying `count_division` events.
    pub note_length: MusicalTime,
    pub count_division: u32,
    /// Shift applied to every note when it is placed on the transport.
    pub offset: MusicalTime,
    pub start_muted: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            quantize_to: MusicalTime::from_ticks(48),
            note_length: MusicalTime::from_ticks(48),
            count_division: 1,
            offset: MusicalTime::ZERO,
            start_muted: false,
        }
    }
}

impl SequenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quantize_to.ticks() <= 0 {
            return Err(EchoError::InvalidInput("quantize_to must be longer than zero"));
        }
        if self.note_length.ticks() <= 0 {
            return Err(EchoError::InvalidInput("note_length must be longer than zero"));
        }
        if self.count_division == 0 {
            return Err(EchoError::InvalidInput("count_division must be at least one"));
        }
        Ok(())
    }
}

/// A note laid out for the upcoming loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedNote {
    /// Grid slot within the cycle.
    pub relative_time: MusicalTime,
    /// Transport tick the note starts on.
    pub absolute_time: MusicalTime,
    pub duration: MusicalTime,
    /// Index into [`SCALE`].
    pub pitch_index: usize,
    /// Number of events that landed on this slot.
    pub group_size: usize,
}

impl QuantizedNote {
    /// Tick within the cycle at which the note stops sounding.
    pub fn relative_end(&self) -> MusicalTime {
        self.relative_time + self.duration
    }

    pub fn letter(&self) -> &'static str {
        SCALE[self.pitch_index % SCALE.len()]
    }
}

/// Lays out one platform's events every cycle.
#[derive(Debug, Clone)]
pub struct SequenceProcessor {
    platform: Platform,
    config: SequenceConfig,
    loop_cycle: MusicalTime,
}

impl SequenceProcessor {
    pub fn new(platform: Platform, config: SequenceConfig, loop_cycle: MusicalTime) -> Self {
        Self {
            platform,
            config,
            loop_cycle,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Builds the notes for the cycle starting at `cycle_start`.
    ///
    /// `timestamps` are the raw millisecond timestamps drained for this
    /// platform, in any order. Offsets between events are converted to
    /// musical time at `bpm`, snapped to the grid, and slots at or past the
    /// end of the cycle are dropped before events sharing a slot are merged
    /// into one note.
    pub fn process<R: Rng + ?Sized>(
        &self,
        timestamps: &[f64],
        bpm: f64,
        cycle_start: MusicalTime,
        rng: &mut R,
    ) -> Vec<QuantizedNote> {
        let offsets = normalize(timestamps, bpm);
        if offsets.is_empty() {
            return Vec::new();
        }

        let total = offsets.len();
        let slots: Vec<MusicalTime> = offsets
            .into_iter()
            .map(|offset| offset.quantize(self.config.quantize_to))
            .filter(|slot| *slot < self.loop_cycle)
            .collect();
        if slots.len() < total {
            tracing::debug!(
                platform = %self.platform,
                dropped = total - slots.len(),
                "events past the end of the cycle dropped"
            );
        }

        let mut notes: Vec<QuantizedNote> = Vec::new();
        for (slot, group_size) in coalesce(&slots) {
            let duration =
                note_duration(self.config.note_length, group_size, self.config.count_division);
            let pitch_index = match notes.last() {
                None => rng.random_range(0..SCALE.len()),
                Some(previous) if slot < previous.relative_end() => {
                    step_pitch(previous.pitch_index, rng)
                }
                Some(previous) => previous.pitch_index,
            };

            notes.push(QuantizedNote {
                relative_time: slot,
                absolute_time: slot + self.config.offset + cycle_start,
                duration,
                pitch_index,
                group_size,
            });
        }

        notes
    }
}

/// Sorts the timestamps and expresses each as musical time since the
/// earliest one. Non-finite timestamps are discarded.
pub fn normalize(timestamps: &[f64], bpm: f64) -> Vec<MusicalTime> {
    let mut sorted: Vec<f64> = timestamps
        .iter()
        .copied()
        .filter(|ts| ts.is_finite())
        .collect();
    sorted.sort_by(f64::total_cmp);

    let Some(&earliest) = sorted.first() else {
        return Vec::new();
    };

    sorted
        .into_iter()
        .map(|ts| MusicalTime::from_seconds((ts - earliest) / 1000.0, bpm))
        .collect()
}

/// Counts how many slots share each position, in ascending order.
pub fn coalesce(slots: &[MusicalTime]) -> Vec<(MusicalTime, usize)> {
    let mut groups: BTreeMap<MusicalTime, usize> = BTreeMap::new();
    for slot in slots {
        *groups.entry(*slot).or_default() += 1;
    }
    groups.into_iter().collect()
}

/// `unit * group_size / count_division`, rounded to the nearest tick and
/// never shorter than one tick.
pub fn note_duration(unit: MusicalTime, group_size: usize, count_division: u32) -> MusicalTime {
    let division = i64::from(count_division.max(1));
    let scaled = (unit.ticks() * group_size as i64 + division / 2) / division;
    MusicalTime::from_ticks(scaled.max(1))
}

fn step_pitch<R: Rng + ?Sized>(index: usize, rng: &mut R) -> usize {
    let len = SCALE.len();
    if rng.random_bool(0.5) {
        (index + 1) % len
    } else {
        (index + len - 1) % len
    }
}
