use std::collections::BTreeMap;

use serde::Serialize;

use crate::{MusicalTime, Platform, QuantizedNote, TempoState};

/// Everything the presentation layer needs to draw one platform's cycle:
/// a piano roll of `notes` and a playhead sweeping from `loop_start_seconds`
/// for `loop_duration_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackPlan {
    pub platform: Platform,
    pub group: String,
    pub notes: Vec<QuantizedNote>,
    pub loop_start: MusicalTime,
    pub loop_start_seconds: f64,
    pub loop_duration_seconds: f64,
    pub muted: bool,
}

impl PlaybackPlan {
    /// Position of the playhead in `[0, 1]` at `seconds`.
    pub fn playhead_fraction(&self, seconds: f64) -> f64 {
        if self.loop_duration_seconds <= 0.0 {
            return 0.0;
        }
        ((seconds - self.loop_start_seconds) / self.loop_duration_seconds).clamp(0.0, 1.0)
    }
}

/// Data for the BPM indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoReport {
    pub current_bpm: f64,
    pub events_per_second: f64,
    pub events_this_cycle: u64,
    pub bpm_divider: f64,
    /// Wall-clock second the tempo takes effect.
    pub at_seconds: f64,
}

impl TempoReport {
    pub fn new(state: &TempoState, bpm_divider: f64, at_seconds: f64) -> Self {
        Self {
            current_bpm: state.current_bpm,
            events_per_second: state.events_per_second,
            events_this_cycle: state.events_this_cycle,
            bpm_divider,
            at_seconds,
        }
    }
}

/// Messages handed to the presentation layer, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// The first cycle boundary was reached; until then the UI shows a
    /// waiting message.
    Ready { waited_seconds: f64 },
    Tempo(TempoReport),
    Plan(PlaybackPlan),
}

/// Outbox between the scheduling core and the presentation collaborator.
#[derive(Debug, Default)]
pub struct PlaybackBridge {
    pending: Vec<BridgeEvent>,
    latest: BTreeMap<Platform, PlaybackPlan>,
    tempo: Option<TempoReport>,
    ready: bool,
}

impl PlaybackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, event: BridgeEvent) {
        match &event {
            BridgeEvent::Ready { .. } => self.ready = true,
            BridgeEvent::Tempo(report) => self.tempo = Some(*report),
            BridgeEvent::Plan(plan) => {
                self.latest.insert(plan.platform, plan.clone());
            }
        }
        self.pending.push(event);
    }

    /// Takes every event published since the previous call.
    pub fn drain(&mut self) -> Vec<BridgeEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn latest_plan(&self, platform: Platform) -> Option<&PlaybackPlan> {
        self.latest.get(&platform)
    }

    pub fn tempo(&self) -> Option<&TempoReport> {
        self.tempo.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(platform: Platform, muted: bool) -> PlaybackPlan {
        PlaybackPlan {
            platform,
            group: "Kick Drum".to_string(),
            notes: Vec::new(),
            loop_start: MusicalTime::from_bars(4),
            loop_start_seconds: 10.0,
            loop_duration_seconds: 8.0,
            muted,
        }
    }

    #[test]
    fn keeps_latest_plan_and_drains_in_order() {
        let mut bridge = PlaybackBridge::new();
        assert!(!bridge.is_ready());

        bridge.publish(BridgeEvent::Ready { waited_seconds: 7.0 });
        bridge.publish(BridgeEvent::Plan(plan(Platform::Go, false)));
        bridge.publish(BridgeEvent::Plan(plan(Platform::Go, true)));

        assert!(bridge.is_ready());
        assert!(bridge.latest_plan(Platform::Go).unwrap().muted);
        assert_eq!(bridge.drain().len(), 3);
        assert!(bridge.drain().is_empty());
        assert!(bridge.latest_plan(Platform::Go).is_some());
    }

    #[test]
    fn playhead_sweeps_the_cycle() {
        let plan = plan(Platform::Php, false);
        assert_eq!(plan.playhead_fraction(9.0), 0.0);
        assert_eq!(plan.playhead_fraction(14.0), 0.5);
        assert_eq!(plan.playhead_fraction(30.0), 1.0);
    }

    #[test]
    fn serializes_with_a_type_tag() {
        let json = serde_json::to_value(BridgeEvent::Ready { waited_seconds: 1.5 }).unwrap();
        assert_eq!(json["type"], "ready");
        assert_eq!(json["waited_seconds"], 1.5);

        let json = serde_json::to_value(BridgeEvent::Plan(plan(Platform::C, false))).unwrap();
        assert_eq!(json["type"], "plan");
        assert_eq!(json["platform"], "c");
        assert_eq!(json["loop_start"], "4m");
    }
}
