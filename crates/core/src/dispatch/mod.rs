//! Routes quantized notes to the voice of each platform's instrument group.

mod voice;

use std::collections::{BTreeSet, HashMap};

pub use voice::{Pitch, RecordingVoice, TraceVoice, Voice, VoiceTrigger};

use crate::{MusicalTime, Platform, QuantizedNote, Transport};

/// Gain used for notes of unmuted platforms.
const FULL_GAIN: f32 = 1.0;

struct InstrumentGroup {
    name: String,
    octave: i8,
    voice: Box<dyn Voice>,
}

/// Outcome of handing one cycle of notes to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub scheduled: usize,
    /// Notes whose onset had already passed and were dropped.
    pub late: usize,
}

/// Owns the instrument voices and the platform to group assignment.
///
/// Muting only changes the gain a note fires with. Muted platforms keep
/// scheduling so indicators stay in sync with what would be heard.
#[derive(Default)]
pub struct InstrumentDispatch {
    groups: Vec<InstrumentGroup>,
    assignments: HashMap<Platform, usize>,
    muted: BTreeSet<Platform>,
    late_tolerance_seconds: Option<f64>,
}

impl InstrumentDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group and returns its index. Platforms already assigned
    /// to an earlier group move to this one.
    pub fn add_group(
        &mut self,
        name: impl Into<String>,
        octave: i8,
        platforms: &[Platform],
        voice: Box<dyn Voice>,
    ) -> usize {
        let index = self.groups.len();
        self.groups.push(InstrumentGroup {
            name: name.into(),
            octave,
            voice,
        });
        for platform in platforms {
            self.assignments.insert(*platform, index);
        }
        index
    }

    pub fn group_of(&self, platform: Platform) -> Option<usize> {
        self.assignments.get(&platform).copied()
    }

    pub fn group_name(&self, platform: Platform) -> Option<&str> {
        self.group_of(platform)
            .map(|index| self.groups[index].name.as_str())
    }

    /// Letter name plus the group's octave.
    pub fn pitch_for(&self, platform: Platform, pitch_index: usize) -> Option<Pitch> {
        self.group_of(platform)
            .map(|index| Pitch::from_scale(pitch_index, self.groups[index].octave))
    }

    pub fn set_muted(&mut self, platform: Platform, muted: bool) {
        if muted {
            self.muted.insert(platform);
        } else {
            self.muted.remove(&platform);
        }
    }

    pub fn is_muted(&self, platform: Platform) -> bool {
        self.muted.contains(&platform)
    }

    /// How far behind the wall clock a note may start and still be played.
    /// Overdue notes within the tolerance fire immediately; later ones are
    /// dropped. Without a tolerance only the transport position counts.
    pub fn set_late_tolerance(&mut self, seconds: Option<f64>) {
        self.late_tolerance_seconds = seconds;
    }

    fn is_late<C>(&self, transport: &Transport<C>, at: MusicalTime) -> bool {
        if at < transport.position() {
            return true;
        }
        self.late_tolerance_seconds.is_some_and(|tolerance| {
            transport.seconds_at(transport.wall_position()) - transport.seconds_at(at) > tolerance
        })
    }

    /// Schedules a note-on at each note's absolute time and a note-off once
    /// its duration has passed.
    ///
    /// Notes starting before the transport position, or further behind the
    /// wall clock than the late tolerance, are dropped rather than played
    /// out of time.
    pub fn schedule<C>(
        &self,
        transport: &mut Transport<C>,
        platform: Platform,
        notes: &[QuantizedNote],
    ) -> DispatchReport
    where
        C: AsMut<InstrumentDispatch> + 'static,
    {
        let mut report = DispatchReport::default();

        for note in notes {
            let Some(pitch) = self.pitch_for(platform, note.pitch_index) else {
                tracing::debug!(%platform, "platform has no instrument group");
                return report;
            };

            if self.is_late(transport, note.absolute_time) {
                tracing::debug!(
                    %platform,
                    at = note.absolute_time.ticks(),
                    position = transport.position().ticks(),
                    wall_position = transport.wall_position().ticks(),
                    "dropping late note"
                );
                report.late += 1;
                continue;
            }

            let note_on = transport.schedule_once(
                note.absolute_time,
                move |transport, ctx: &mut C, at| {
                    let at_seconds = transport.seconds_at(at);
                    ctx.as_mut().note_on(platform, pitch, at_seconds);
                },
            );
            let note_off = transport.schedule_once(
                note.absolute_time + note.duration,
                move |transport, ctx: &mut C, at| {
                    let at_seconds = transport.seconds_at(at);
                    ctx.as_mut().note_off(platform, pitch, at_seconds);
                },
            );

            match note_on.and(note_off) {
                Ok(_) => report.scheduled += 1,
                Err(err) => tracing::warn!(%platform, %err, "failed to schedule note"),
            }
        }

        report
    }

    /// Triggers the platform's group voice, attenuated to silence when the
    /// platform is muted.
    pub fn note_on(&mut self, platform: Platform, pitch: Pitch, at_seconds: f64) {
        let gain = if self.is_muted(platform) { 0.0 } else { FULL_GAIN };
        if let Some(group) = self.group_mut(platform) {
            if let Err(err) = group.voice.note_on(pitch, gain, at_seconds) {
                tracing::warn!(group = %group.name, %err, "voice rejected note on");
            }
        }
    }

    pub fn note_off(&mut self, platform: Platform, pitch: Pitch, at_seconds: f64) {
        if let Some(group) = self.group_mut(platform) {
            if let Err(err) = group.voice.note_off(pitch, at_seconds) {
                tracing::warn!(group = %group.name, %err, "voice rejected note off");
            }
        }
    }

    fn group_mut(&mut self, platform: Platform) -> Option<&mut InstrumentGroup> {
        let index = self.group_of(platform)?;
        self.groups.get_mut(index)
    }
}

impl std::fmt::Debug for InstrumentDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups: Vec<&str> = self.groups.iter().map(|group| group.name.as_str()).collect();
        f.debug_struct("InstrumentDispatch")
            .field("groups", &groups)
            .field("assignments", &self.assignments.len())
            .field("muted", &self.muted)
            .field("late_tolerance_seconds", &self.late_tolerance_seconds)
            .finish()
    }
}
