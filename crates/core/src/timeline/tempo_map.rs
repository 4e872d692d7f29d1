use super::musical_time::{MusicalTime, PPQ};

/// Slack applied when flooring seconds to ticks so that converting the
/// exact wall time of a tick lands on that tick.
const TICK_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoPoint {
    tick: i64,
    bpm: f64,
    /// Seconds since tick zero at which this point takes effect.
    seconds: f64,
}

/// Piecewise constant tempo curve over transport ticks.
///
/// The first point starts at tick zero until [`TempoMap::compact_before`]
/// moves it forward. Ticks before the first point extrapolate its tempo.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    points: Vec<TempoPoint>,
}

impl TempoMap {
    pub fn new(bpm: f64) -> Self {
        Self {
            points: vec![TempoPoint {
                tick: 0,
                bpm,
                seconds: 0.0,
            }],
        }
    }

    /// Tempo in effect at `at`.
    pub fn bpm_at(&self, at: MusicalTime) -> f64 {
        self.points[self.segment_for_tick(at.ticks())].bpm
    }

    /// Seconds elapsed between tick zero and `at`.
    pub fn seconds_at(&self, at: MusicalTime) -> f64 {
        let point = &self.points[self.segment_for_tick(at.ticks())];
        point.seconds + (at.ticks() - point.tick) as f64 * seconds_per_tick(point.bpm)
    }

    /// The last tick reached after `seconds` have elapsed since tick zero.
    pub fn tick_at(&self, seconds: f64) -> MusicalTime {
        let point = &self.points[self.segment_for_seconds(seconds)];
        let ticks = (seconds - point.seconds) / seconds_per_tick(point.bpm);
        MusicalTime::from_ticks(point.tick + (ticks + TICK_EPSILON).floor() as i64)
    }

    pub fn span_seconds(&self, from: MusicalTime, to: MusicalTime) -> f64 {
        self.seconds_at(to) - self.seconds_at(from)
    }

    /// Inserts a tempo change at `at`, replacing any change already at that
    /// tick. Everything before `at` keeps its wall time.
    pub fn set(&mut self, bpm: f64, at: MusicalTime) {
        let tick = at.ticks().max(self.points[0].tick);
        let index = match self.points.binary_search_by(|point| point.tick.cmp(&tick)) {
            Ok(index) => {
                self.points[index].bpm = bpm;
                index
            }
            Err(index) => {
                self.points.insert(
                    index,
                    TempoPoint {
                        tick,
                        bpm,
                        seconds: 0.0,
                    },
                );
                index
            }
        };
        self.recompute_from(index.max(1));
    }

    /// Forgets every change superseded before `at`. The change in effect at
    /// `at` becomes the first point and keeps its wall time, so conversions
    /// at or after `at` are unaffected.
    pub fn compact_before(&mut self, at: MusicalTime) {
        let index = self.segment_for_tick(at.ticks());
        if index > 0 {
            self.points.drain(..index);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn recompute_from(&mut self, start: usize) {
        for index in start..self.points.len() {
            let previous = self.points[index - 1];
            let point = &mut self.points[index];
            point.seconds =
                previous.seconds + (point.tick - previous.tick) as f64 * seconds_per_tick(previous.bpm);
        }
    }

    fn segment_for_tick(&self, tick: i64) -> usize {
        self.points
            .partition_point(|point| point.tick <= tick)
            .saturating_sub(1)
    }

    fn segment_for_seconds(&self, seconds: f64) -> usize {
        self.points
            .partition_point(|point| point.seconds <= seconds)
            .saturating_sub(1)
    }
}

fn seconds_per_tick(bpm: f64) -> f64 {
    60.0 / (bpm * PPQ as f64)
}
