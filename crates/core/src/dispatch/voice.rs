use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde::Serialize;

use crate::{EchoError, Result, SCALE};

const SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// A scale letter in a concrete octave, e.g. `E4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pitch {
    pub letter: &'static str,
    pub octave: i8,
    #[serde(skip)]
    degree: usize,
}

impl Pitch {
    /// Pitch for a scale index, wrapping indices past the end of the scale.
    pub fn from_scale(index: usize, octave: i8) -> Self {
        let degree = index % SCALE.len();
        Self {
            letter: SCALE[degree],
            octave,
            degree,
        }
    }

    pub fn midi_number(&self) -> i32 {
        (i32::from(self.octave) + 1) * 12 + SEMITONES[self.degree]
    }

    pub fn frequency_hz(&self) -> f64 {
        440.0 * 2f64.powf(f64::from(self.midi_number() - 69) / 12.0)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter, self.octave)
    }
}

/// Synthesizer voice shared by one instrument group.
///
/// Times are wall-clock seconds on the clock driving the transport.
pub trait Voice {
    fn note_on(&mut self, pitch: Pitch, gain: f32, at_seconds: f64) -> Result<()>;
    fn note_off(&mut self, pitch: Pitch, at_seconds: f64) -> Result<()>;
}

/// Voice that only reports what it would play.
#[derive(Debug, Clone)]
pub struct TraceVoice {
    name: String,
}

impl TraceVoice {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Voice for TraceVoice {
    fn note_on(&mut self, pitch: Pitch, gain: f32, at_seconds: f64) -> Result<()> {
        tracing::debug!(voice = %self.name, %pitch, gain, at_seconds, "note on");
        Ok(())
    }

    fn note_off(&mut self, pitch: Pitch, at_seconds: f64) -> Result<()> {
        tracing::trace!(voice = %self.name, %pitch, at_seconds, "note off");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoiceTrigger {
    NoteOn { pitch: Pitch, gain: f32, at_seconds: f64 },
    NoteOff { pitch: Pitch, at_seconds: f64 },
}

/// Voice that keeps every trigger. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingVoice {
    log: Arc<Mutex<Vec<VoiceTrigger>>>,
}

impl RecordingVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggers(&self) -> Result<Vec<VoiceTrigger>> {
        let log = self
            .log
            .lock()
            .map_err(|_| EchoError::msg("voice log has been poisoned"))?;
        Ok(log.clone())
    }

    fn record(&self, trigger: VoiceTrigger) -> Result<()> {
        self.log
            .lock()
            .map_err(|_| EchoError::msg("voice log has been poisoned"))?
            .push(trigger);
        Ok(())
    }
}

impl Voice for RecordingVoice {
    fn note_on(&mut self, pitch: Pitch, gain: f32, at_seconds: f64) -> Result<()> {
        self.record(VoiceTrigger::NoteOn {
            pitch,
            gain,
            at_seconds,
        })
    }

    fn note_off(&mut self, pitch: Pitch, at_seconds: f64) -> Result<()> {
        self.record(VoiceTrigger::NoteOff { pitch, at_seconds })
    }
}
