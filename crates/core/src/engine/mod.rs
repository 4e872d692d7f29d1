use std::{collections::BTreeMap, fmt};

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::{
    AppConfig, BridgeEvent, CycleBatch, EchoError, EventBuffer, InstrumentDispatch, InstrumentGroupConfig,
    Ingestor, MusicalTime, PlaybackBridge, PlaybackPlan, Platform, Result, SequenceProcessor,
    TempoEstimator, TempoReport, TempoState, TraceVoice, Transport, Voice,
};

/// How far ahead of each cycle boundary the tempo estimate lands, so every
/// sequence lays out its cycle against the fresh tempo.
pub const TEMPO_LEAD: MusicalTime = MusicalTime::from_ticks(1);

/// State reachable from transport callbacks.
pub struct EchoState {
    buffer: EventBuffer,
    /// Events taken at the last tempo estimate, waiting for their sequences.
    batch: CycleBatch,
    estimator: TempoEstimator,
    processors: BTreeMap<Platform, SequenceProcessor>,
    dispatch: InstrumentDispatch,
    bridge: PlaybackBridge,
    rng: Box<dyn RngCore + Send>,
    loop_cycle: MusicalTime,
    started_at: f64,
}

impl EchoState {
    fn mark_ready(&mut self, transport: &mut Transport<EchoState>, at: MusicalTime) {
        let waited_seconds = transport.seconds_at(at) - self.started_at;
        tracing::info!(waited_seconds, "first sequence ready");
        self.bridge.publish(BridgeEvent::Ready { waited_seconds });
    }

    fn estimate_tempo(&mut self, transport: &mut Transport<EchoState>, at: MusicalTime) {
        self.batch = self.buffer.drain_cycle().unwrap_or_else(|err| {
            tracing::warn!(%err, "could not drain the event buffer");
            CycleBatch::default()
        });
        let event_count = self.batch.event_count;

        let boundary = at + TEMPO_LEAD;
        let window_start = (boundary - self.loop_cycle).max(MusicalTime::ZERO);
        let cycle_seconds = transport.tempo_map().span_seconds(window_start, boundary);
        let state = self.estimator.estimate(event_count, cycle_seconds);

        transport.set_tempo(state.current_bpm, at);
        transport.forget_tempo_before(at);
        tracing::info!(
            bpm = state.current_bpm,
            events = event_count,
            events_per_second = state.events_per_second,
            "tempo updated"
        );

        let report = TempoReport::new(
            &state,
            self.estimator.config().bpm_divider,
            transport.seconds_at(at),
        );
        self.bridge.publish(BridgeEvent::Tempo(report));
    }

    fn run_sequence(
        &mut self,
        platform: Platform,
        transport: &mut Transport<EchoState>,
        at: MusicalTime,
    ) {
        let timestamps = self.batch.take(platform);
        let Some(processor) = self.processors.get(&platform) else {
            return;
        };

        let notes = processor.process(&timestamps, transport.bpm_at(at), at, self.rng.as_mut());
        if !notes.is_empty() {
            let report = self.dispatch.schedule(transport, platform, &notes);
            tracing::debug!(
                %platform,
                events = timestamps.len(),
                notes = notes.len(),
                scheduled = report.scheduled,
                late = report.late,
                "cycle laid out"
            );
        }

        let plan = PlaybackPlan {
            platform,
            group: self
                .dispatch
                .group_name(platform)
                .unwrap_or_default()
                .to_string(),
            notes,
            loop_start: at,
            loop_start_seconds: transport.seconds_at(at),
            loop_duration_seconds: transport
                .tempo_map()
                .span_seconds(at, at + self.loop_cycle),
            muted: self.dispatch.is_muted(platform),
        };
        self.bridge.publish(BridgeEvent::Plan(plan));
    }
}

impl AsMut<InstrumentDispatch> for EchoState {
    fn as_mut(&mut self) -> &mut InstrumentDispatch {
        &mut self.dispatch
    }
}

impl fmt::Debug for EchoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoState")
            .field("estimator", &self.estimator)
            .field("processors", &self.processors.len())
            .field("dispatch", &self.dispatch)
            .field("loop_cycle", &self.loop_cycle)
            .finish()
    }
}

/// Application root: owns the transport and everything scheduled on it.
///
/// The engine never reads a clock itself. The owner calls
/// [`EchoEngine::advance_to`] with its own notion of wall-clock seconds,
/// which keeps live playback and offline simulation on the same code path.
pub struct EchoEngine {
    transport: Transport<EchoState>,
    state: EchoState,
    start_delay_seconds: f64,
}

impl EchoEngine {
    /// Builds an engine whose voices only log what they play.
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_voices(config, |group| {
            Box::new(TraceVoice::new(group.name.clone())) as Box<dyn Voice>
        })
    }

    /// Builds an engine, asking `make_voice` for one voice per instrument
    /// group.
    pub fn with_voices<F>(config: AppConfig, mut make_voice: F) -> Result<Self>
    where
        F: FnMut(&InstrumentGroupConfig) -> Box<dyn Voice>,
    {
        config.validate()?;

        let platforms = config.grouped_platforms();
        let buffer = EventBuffer::new(platforms.iter().copied());

        let mut dispatch = InstrumentDispatch::new();
        dispatch.set_late_tolerance(Some(config.transport.late_tolerance_seconds));
        for group in &config.groups {
            dispatch.add_group(group.name.clone(), group.octave, &group.platforms, make_voice(group));
        }

        let mut processors = BTreeMap::new();
        for platform in platforms {
            let sequence = config.sequence_for(platform).clone();
            if sequence.start_muted {
                dispatch.set_muted(platform, true);
            }
            processors.insert(
                platform,
                SequenceProcessor::new(platform, sequence, config.loop_cycle),
            );
        }

        let rng: Box<dyn RngCore + Send> = match config.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_os_rng()),
        };

        tracing::info!(
            platforms = processors.len(),
            groups = config.groups.len(),
            loop_cycle = %config.loop_cycle,
            "engine configured"
        );

        Ok(Self {
            transport: Transport::new(config.transport.initial_bpm),
            state: EchoState {
                buffer,
                batch: CycleBatch::default(),
                estimator: TempoEstimator::new(config.tempo.clone()),
                processors,
                dispatch,
                bridge: PlaybackBridge::new(),
                rng,
                loop_cycle: config.loop_cycle,
                started_at: 0.0,
            },
            start_delay_seconds: config.transport.start_delay_seconds,
        })
    }

    /// Replaces the pitch-walk random source.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.state.rng = Box::new(rng);
        self
    }

    /// Handle for the ingestion side.
    pub fn buffer(&self) -> EventBuffer {
        self.state.buffer.clone()
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.buffer())
    }

    /// Starts the transport `start_delay_seconds` after `now_seconds` and
    /// schedules the recurring work.
    ///
    /// The first cycle boundary is one loop cycle after tick zero: the first
    /// cycle only collects events. The tempo estimator fires one tick before
    /// every boundary and takes the whole cycle's events with their count;
    /// the sequences fire on the boundary in group order and play exactly
    /// those events. Anything arriving in between belongs to the next cycle.
    pub fn start(&mut self, now_seconds: f64) -> Result<()> {
        if self.transport.is_started() {
            return Err(EchoError::InvalidInput("engine already started"));
        }

        self.state.started_at = now_seconds;
        self.transport.start(now_seconds + self.start_delay_seconds);

        let cycle = self.state.loop_cycle;
        self.transport.schedule_once(cycle, |transport, state: &mut EchoState, at| {
            state.mark_ready(transport, at)
        })?;
        self.transport.schedule_repeating(
            |transport, state: &mut EchoState, at| state.estimate_tempo(transport, at),
            cycle,
            cycle - TEMPO_LEAD,
        )?;

        let platforms: Vec<Platform> = self.state.processors.keys().copied().collect();
        for platform in platforms {
            self.transport.schedule_repeating(
                move |transport, state: &mut EchoState, at| {
                    state.run_sequence(platform, transport, at)
                },
                cycle,
                cycle,
            )?;
        }

        Ok(())
    }

    /// Fires everything due by `wall_seconds`. Returns the number of
    /// callbacks that ran.
    pub fn advance_to(&mut self, wall_seconds: f64) -> usize {
        self.transport.advance_to(&mut self.state, wall_seconds)
    }

    pub fn next_due_seconds(&self) -> Option<f64> {
        self.transport.next_due_seconds()
    }

    pub fn set_muted(&mut self, platform: Platform, muted: bool) {
        self.state.dispatch.set_muted(platform, muted);
    }

    pub fn is_muted(&self, platform: Platform) -> bool {
        self.state.dispatch.is_muted(platform)
    }

    /// Takes everything published for the presentation layer since the
    /// previous call.
    pub fn drain_events(&mut self) -> Vec<BridgeEvent> {
        self.state.bridge.drain()
    }

    pub fn bridge(&self) -> &PlaybackBridge {
        &self.state.bridge
    }

    pub fn tempo(&self) -> &TempoState {
        self.state.estimator.state()
    }

    pub fn transport(&self) -> &Transport<EchoState> {
        &self.transport
    }

    pub fn loop_cycle(&self) -> MusicalTime {
        self.state.loop_cycle
    }

    /// Platforms that get a sequence, in a stable order.
    pub fn platforms(&self) -> Vec<Platform> {
        self.state.processors.keys().copied().collect()
    }
}

impl fmt::Debug for EchoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoEngine")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("start_delay_seconds", &self.start_delay_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordingVoice, VoiceTrigger};

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.loop_cycle = MusicalTime::from_bars(1);
        config.tempo.min_bpm = 60.0;
        config.seed = Some(7);
        config
    }

    fn engine(config: AppConfig) -> (EchoEngine, BTreeMap<String, RecordingVoice>) {
        let mut voices = BTreeMap::new();
        let engine = EchoEngine::with_voices(config, |group| {
            let voice = RecordingVoice::new();
            voices.insert(group.name.clone(), voice.clone());
            Box::new(voice) as Box<dyn Voice>
        })
        .unwrap();
        (engine, voices)
    }

    /// Drives the engine the way the live loop does, in 10 ms steps.
    fn run_until(engine: &mut EchoEngine, seconds: f64) {
        let steps = (seconds * 100.0).round() as i64;
        for step in 1..=steps {
            engine.advance_to(step as f64 / 100.0);
        }
    }

    fn plan_for(events: &[BridgeEvent], platform: Platform) -> &PlaybackPlan {
        plans(events)
            .into_iter()
            .find(|plan| plan.platform == platform)
            .unwrap()
    }

    fn plans(events: &[BridgeEvent]) -> Vec<&PlaybackPlan> {
        events
            .iter()
            .filter_map(|event| match event {
                BridgeEvent::Plan(plan) => Some(plan),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn error_clusters_become_scheduled_notes() {
        let (mut engine, voices) = engine(config());
        engine.start(0.0).unwrap();
        let buffer = engine.buffer();
        for ts in [1000.0, 1020.0, 1050.0, 3000.0] {
            assert!(buffer.append(Platform::Go, ts).unwrap());
        }

        // 160 bpm until the estimate clamps the quiet stream to 60 bpm one
        // tick before the first boundary at 2.5 s.
        run_until(&mut engine, 5.0);
        assert_eq!(engine.tempo().current_bpm, 60.0);
        assert_eq!(engine.tempo().events_this_cycle, 4);

        let events = engine.drain_events();
        assert!(matches!(events[0], BridgeEvent::Tempo(report) if report.current_bpm == 60.0));
        assert!(matches!(events[1], BridgeEvent::Ready { waited_seconds } if waited_seconds > 2.5));

        let plans = plans(&events);
        assert_eq!(plans.len(), engine.platforms().len());
        let go = plan_for(&events, Platform::Go);
        assert_eq!(go.group, "Kick Drum");
        assert_eq!(go.loop_start, MusicalTime::from_bars(1));
        assert!((go.loop_duration_seconds - 4.0).abs() < 1e-9);
        let sizes: Vec<usize> = go.notes.iter().map(|note| note.group_size).collect();
        assert_eq!(sizes, vec![3, 1]);
        assert!(go.notes[0].duration > go.notes[1].duration);

        let triggers = voices["Kick Drum"].triggers().unwrap();
        let ons: Vec<f64> = triggers
            .iter()
            .filter_map(|trigger| match trigger {
                VoiceTrigger::NoteOn { at_seconds, pitch, .. } => {
                    assert_eq!(pitch.octave, 1);
                    Some(*at_seconds)
                }
                VoiceTrigger::NoteOff { .. } => None,
            })
            .collect();
        assert_eq!(ons.len(), 2);
        assert!((ons[1] - ons[0] - 2.0).abs() < 1e-9);
        assert_eq!(triggers.len(), 4);
        assert!(voices["Lead Synth"].triggers().unwrap().is_empty());
    }

    #[test]
    fn quiet_cycles_publish_empty_plans_and_hold_a_floor_tempo() {
        let (mut engine, voices) = engine(config());
        engine.start(0.0).unwrap();
        run_until(&mut engine, 5.0);

        let events = engine.drain_events();
        assert!(plans(&events).iter().all(|plan| plan.notes.is_empty()));
        assert_eq!(engine.tempo().current_bpm, 60.0);
        assert_eq!(engine.transport().bpm(), 60.0);
        assert!(voices.values().all(|voice| voice.triggers().unwrap().is_empty()));
        // Only the recurring jobs remain queued.
        assert_eq!(engine.transport().pending(), 1 + engine.platforms().len());
    }

    #[test]
    fn tempo_lands_before_every_cycle_is_laid_out() {
        let (mut engine, _) = engine(config());
        engine.start(0.0).unwrap();
        run_until(&mut engine, 20.0);

        let events = engine.drain_events();
        let mut saw_tempo_for_cycle = false;
        for event in &events {
            match event {
                BridgeEvent::Tempo(_) => saw_tempo_for_cycle = true,
                BridgeEvent::Plan(_) => assert!(saw_tempo_for_cycle),
                BridgeEvent::Ready { .. } => {}
            }
        }
        let cycles = events
            .iter()
            .filter(|event| matches!(event, BridgeEvent::Tempo(_)))
            .count();
        assert!(cycles >= 4);
        assert_eq!(plans(&events).len(), cycles * engine.platforms().len());
    }

    #[test]
    fn muted_platforms_still_schedule_silently() {
        let mut config = config();
        config.sequences.insert(
            Platform::Ruby,
            crate::SequenceConfig {
                start_muted: true,
                ..Default::default()
            },
        );
        let (mut engine, voices) = engine(config);
        assert!(engine.is_muted(Platform::Ruby));
        engine.start(0.0).unwrap();
        engine.buffer().append(Platform::Ruby, 1.0).unwrap();
        run_until(&mut engine, 5.0);

        let events = engine.drain_events();
        let ruby = plan_for(&events, Platform::Ruby);
        assert!(ruby.muted);
        assert_eq!(ruby.notes.len(), 1);

        let triggers = voices["Lead Synth"].triggers().unwrap();
        assert!(matches!(triggers[0], VoiceTrigger::NoteOn { gain, .. } if gain == 0.0));

        engine.set_muted(Platform::Ruby, false);
        assert!(!engine.is_muted(Platform::Ruby));
    }

    #[test]
    fn malformed_frames_never_reach_the_buffer() {
        let (engine, _) = engine(config());
        let mut ingestor = engine.ingestor();
        ingestor.handle_frame(r#"[1.0, 2.0, 1000]"#);
        ingestor.handle_frame(r#"[1.0, 2.0, 1000, "cocoa"]"#);

        let buffer = engine.buffer();
        for platform in Platform::ALL {
            assert_eq!(buffer.len(platform).unwrap(), 0);
        }
        assert_eq!(buffer.take_event_count().unwrap(), 0);
    }

    #[test]
    fn keeps_running_across_many_cycles() {
        let (mut engine, _) = engine(config());
        engine.start(0.0).unwrap();
        let buffer = engine.buffer();

        let mut now = 0.0;
        let mut timestamp = 0.0;
        while now < 1000.0 {
            for _ in 0..25 {
                timestamp += 4.0;
                buffer.append(Platform::Javascript, timestamp).unwrap();
            }
            now += 0.1;
            engine.advance_to(now);
        }

        let events = engine.drain_events();
        assert!(!plans(&events).is_empty());
        let tempo = engine.tempo();
        assert!(tempo.current_bpm.is_finite());
        assert!(tempo.current_bpm >= 60.0 && tempo.current_bpm <= 300.0);
        assert!(engine.next_due_seconds().unwrap() > now);
        assert!(engine.transport().tempo_map().len() <= 2);
    }

    #[test]
    fn events_are_counted_in_the_cycle_that_plays_them() {
        let (mut engine, _) = engine(config());
        engine.start(0.0).unwrap();
        let buffer = engine.buffer();
        buffer.append(Platform::Go, 1000.0).unwrap();
        buffer.append(Platform::Go, 1020.0).unwrap();

        // Stop between the tempo estimate and the boundary it prepares.
        let estimate_at = engine
            .transport()
            .seconds_at(engine.loop_cycle() - TEMPO_LEAD);
        engine.advance_to(estimate_at);
        assert_eq!(engine.tempo().events_this_cycle, 2);
        buffer.append(Platform::Go, 1500.0).unwrap();

        run_until(&mut engine, 5.0);
        let events = engine.drain_events();
        let go = plan_for(&events, Platform::Go);
        assert_eq!(go.notes.len(), 1);
        assert_eq!(go.notes[0].group_size, 2);

        run_until(&mut engine, 9.0);
        assert_eq!(engine.tempo().events_this_cycle, 1);
        let events = engine.drain_events();
        let go = plan_for(&events, Platform::Go);
        assert_eq!(go.notes.len(), 1);
        assert_eq!(go.notes[0].group_size, 1);
    }

    #[test]
    fn a_stalled_clock_drops_notes_it_can_no_longer_play() {
        let (mut engine, voices) = engine(config());
        engine.start(0.0).unwrap();
        for ts in [1000.0, 3000.0] {
            engine.buffer().append(Platform::Go, ts).unwrap();
        }

        // One late wake-up covers the whole first cycle.
        engine.advance_to(5.0);
        let events = engine.drain_events();
        assert_eq!(plan_for(&events, Platform::Go).notes.len(), 2);
        assert!(voices["Kick Drum"].triggers().unwrap().is_empty());
        assert_eq!(engine.transport().pending(), 1 + engine.platforms().len());
    }

    #[test]
    fn starting_twice_is_rejected() {
        let (mut engine, _) = engine(config());
        engine.start(0.0).unwrap();
        assert!(engine.start(1.0).is_err());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = config();
        config.loop_cycle = MusicalTime::ZERO;
        assert!(EchoEngine::new(config).is_err());
    }
}
