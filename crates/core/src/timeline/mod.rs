//! Musical clock: tick based time, tempo curve and the callback transport.

mod musical_time;
mod tempo_map;

use std::{cmp::Ordering, collections::BinaryHeap, fmt};

pub use musical_time::{MusicalTime, BEATS_PER_BAR, PPQ, TICKS_PER_BAR};
pub use tempo_map::TempoMap;

use crate::{EchoError, Result};

/// Work scheduled on a [`Transport`].
///
/// The callback receives the transport itself (so it can schedule further
/// work or change tempo), the application context and the exact tick it was
/// scheduled for, regardless of how late the wall clock caught up with it.
pub type Callback<C> = Box<dyn FnMut(&mut Transport<C>, &mut C, MusicalTime)>;

/// Identifies a scheduled callback. Ids grow in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

struct Job<C> {
    at: MusicalTime,
    id: JobId,
    period: Option<MusicalTime>,
    callback: Callback<C>,
}

impl<C> Job<C> {
    fn key(&self) -> (MusicalTime, JobId) {
        (self.at, self.id)
    }
}

impl<C> PartialEq for Job<C> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<C> Eq for Job<C> {}

impl<C> PartialOrd for Job<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Job<C> {
    // Reversed so the max-heap pops the earliest tick, then the oldest id.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Transport shared by every component that schedules or reads musical
/// time.
///
/// Callbacks fire in ascending tick order. Callbacks due on the same tick
/// fire in registration order, and a repeating callback keeps its original
/// registration slot for every repetition. Nothing runs on its own: the
/// owner drives the transport with [`Transport::advance_to`] from whatever
/// wall clock it has.
pub struct Transport<C> {
    tempo: TempoMap,
    /// Wall-clock second at which tick zero happens, once started.
    origin: Option<f64>,
    position: MusicalTime,
    wall_position: MusicalTime,
    queue: BinaryHeap<Job<C>>,
    next_id: u64,
}

impl<C> Transport<C> {
    pub fn new(bpm: f64) -> Self {
        Self {
            tempo: TempoMap::new(bpm),
            origin: None,
            position: MusicalTime::ZERO,
            wall_position: MusicalTime::ZERO,
            queue: BinaryHeap::new(),
            next_id: 0,
        }
    }

    /// Anchors tick zero to `at_seconds` on the caller's wall clock.
    ///
    /// Starting an already running transport is ignored.
    pub fn start(&mut self, at_seconds: f64) {
        if self.origin.is_some() {
            tracing::debug!("transport already started");
            return;
        }
        tracing::info!(at_seconds, bpm = self.bpm(), "transport started");
        self.origin = Some(at_seconds);
    }

    pub fn is_started(&self) -> bool {
        self.origin.is_some()
    }

    /// Tick of the callback currently firing, or of the last wall time the
    /// transport was advanced to.
    pub fn position(&self) -> MusicalTime {
        self.position
    }

    /// Tick the driving wall clock had reached at the last
    /// [`Transport::advance_to`]. Runs ahead of [`Transport::position`] while
    /// overdue callbacks are still catching up.
    pub fn wall_position(&self) -> MusicalTime {
        self.wall_position.max(self.position)
    }

    pub fn bpm(&self) -> f64 {
        self.tempo.bpm_at(self.position)
    }

    pub fn bpm_at(&self, at: MusicalTime) -> f64 {
        self.tempo.bpm_at(at)
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo
    }

    /// Changes tempo from `at` onwards.
    ///
    /// The transport does not validate `bpm`; callers must pass a positive,
    /// finite value. A change requested before the current position takes
    /// effect at the current position instead, so ticks already played keep
    /// their wall time.
    pub fn set_tempo(&mut self, bpm: f64, at: MusicalTime) {
        let effective = if at < self.position {
            tracing::debug!(
                requested = at.ticks(),
                position = self.position.ticks(),
                "tempo change moved to current position"
            );
            self.position
        } else {
            at
        };
        self.tempo.set(bpm, effective);
    }

    /// Drops tempo history before `at` so the map stays bounded on a long
    /// run. Positions before `at` no longer convert faithfully; `at` is
    /// clamped to the current position.
    pub fn forget_tempo_before(&mut self, at: MusicalTime) {
        self.tempo.compact_before(at.min(self.position));
    }

    /// Wall-clock seconds at which `at` happens. Before [`Transport::start`]
    /// the transport is treated as anchored at zero.
    pub fn seconds_at(&self, at: MusicalTime) -> f64 {
        self.origin.unwrap_or(0.0) + self.tempo.seconds_at(at)
    }

    /// Musical position reached at `wall_seconds`.
    pub fn time_at(&self, wall_seconds: f64) -> MusicalTime {
        self.tempo.tick_at(wall_seconds - self.origin.unwrap_or(0.0))
    }

    /// Runs `callback` once at `at`.
    pub fn schedule_once<F>(&mut self, at: MusicalTime, callback: F) -> Result<JobId>
    where
        F: FnMut(&mut Transport<C>, &mut C, MusicalTime) + 'static,
    {
        self.push(at, None, Box::new(callback))
    }

    /// Runs `callback` once at the tick reached at `wall_seconds` under the
    /// tempo curve known right now.
    pub fn schedule_once_at_seconds<F>(&mut self, wall_seconds: f64, callback: F) -> Result<JobId>
    where
        F: FnMut(&mut Transport<C>, &mut C, MusicalTime) + 'static,
    {
        let at = self.time_at(wall_seconds);
        self.push(at, None, Box::new(callback))
    }

    /// Runs `callback` at `start` and then every `period` for the lifetime of
    /// the transport.
    pub fn schedule_repeating<F>(
        &mut self,
        callback: F,
        period: MusicalTime,
        start: MusicalTime,
    ) -> Result<JobId>
    where
        F: FnMut(&mut Transport<C>, &mut C, MusicalTime) + 'static,
    {
        if period.ticks() <= 0 {
            return Err(EchoError::InvalidInput("repeat period must be positive"));
        }
        self.push(start, Some(period), Box::new(callback))
    }

    /// Number of callbacks waiting to fire.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn next_due(&self) -> Option<MusicalTime> {
        self.queue.peek().map(|job| job.at)
    }

    /// Wall-clock second of the next callback, if the transport is running.
    pub fn next_due_seconds(&self) -> Option<f64> {
        self.origin?;
        self.next_due().map(|at| self.seconds_at(at))
    }

    /// Fires every callback due at or before `wall_seconds` and returns how
    /// many fired.
    ///
    /// The target tick is recomputed after every callback, so a tempo change
    /// made by one callback is honoured when deciding whether the next one
    /// is due.
    pub fn advance_to(&mut self, ctx: &mut C, wall_seconds: f64) -> usize {
        let Some(origin) = self.origin else {
            return 0;
        };

        let mut fired = 0;
        loop {
            let target = self.tempo.tick_at(wall_seconds - origin);
            self.wall_position = target;
            let due = matches!(self.queue.peek(), Some(job) if job.at <= target);
            if !due {
                self.position = self.position.max(target);
                break;
            }

            let Some(mut job) = self.queue.pop() else {
                break;
            };
            self.position = self.position.max(job.at);
            (job.callback)(self, ctx, job.at);
            fired += 1;

            if let Some(period) = job.period {
                job.at += period;
                self.queue.push(job);
            }
        }

        fired
    }

    fn push(
        &mut self,
        at: MusicalTime,
        period: Option<MusicalTime>,
        callback: Callback<C>,
    ) -> Result<JobId> {
        if at < self.position {
            return Err(EchoError::ScheduledInPast {
                at: at.ticks(),
                now: self.position.ticks(),
            });
        }

        let id = JobId(self.next_id);
        self.next_id += 1;
        self.queue.push(Job {
            at,
            id,
            period,
            callback,
        });
        Ok(id)
    }
}

impl<C> fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("origin", &self.origin)
            .field("position", &self.position)
            .field("bpm", &self.bpm())
            .field("pending", &self.queue.len())
            .finish()
    }
}
