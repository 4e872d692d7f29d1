use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{EchoError, Platform, Result};

/// Queues shared between the ingestion side and the sequence processors.
#[derive(Debug, Default)]
struct Queues {
    entries: HashMap<Platform, Vec<f64>>,
    /// Accepted appends since the tempo estimator last sampled.
    events_since_sample: u64,
}

/// Everything queued for one cycle, taken under a single lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleBatch {
    pub events: BTreeMap<Platform, Vec<f64>>,
    /// Accepted appends since the previous sample; equals the number of
    /// drained timestamps.
    pub event_count: u64,
}

impl CycleBatch {
    /// Removes and returns the platform's timestamps.
    pub fn take(&mut self, platform: Platform) -> Vec<f64> {
        self.events.remove(&platform).unwrap_or_default()
    }
}

/// Per-platform queues of raw event timestamps (milliseconds since the
/// epoch).
///
/// The handle is cheap to clone; every clone sees the same queues. Each
/// operation holds one lock for its whole duration, so an append racing a
/// drain lands either in the drained batch or in the fresh queue for the
/// next cycle, never in both.
#[derive(Clone, Default)]
pub struct EventBuffer {
    shared: Arc<Mutex<Queues>>,
}

impl EventBuffer {
    /// Creates queues for exactly the given platforms.
    pub fn new(platforms: impl IntoIterator<Item = Platform>) -> Self {
        let entries = platforms
            .into_iter()
            .map(|platform| (platform, Vec::new()))
            .collect();
        Self {
            shared: Arc::new(Mutex::new(Queues {
                entries,
                events_since_sample: 0,
            })),
        }
    }

    /// Appends a timestamp to the platform's queue.
    ///
    /// Returns `false` without touching anything when the platform has no
    /// queue.
    pub fn append(&self, platform: Platform, timestamp: f64) -> Result<bool> {
        let mut queues = self.lock()?;
        let Some(queue) = queues.entries.get_mut(&platform) else {
            return Ok(false);
        };
        queue.push(timestamp);
        queues.events_since_sample += 1;
        Ok(true)
    }

    /// Returns everything queued for the platform in arrival order and
    /// leaves the queue empty.
    pub fn drain_and_clear(&self, platform: Platform) -> Result<Vec<f64>> {
        let mut queues = self.lock()?;
        Ok(queues
            .entries
            .get_mut(&platform)
            .map(std::mem::take)
            .unwrap_or_default())
    }

    /// Returns the number of accepted appends since the previous call and
    /// resets the counter.
    pub fn take_event_count(&self) -> Result<u64> {
        let mut queues = self.lock()?;
        Ok(std::mem::take(&mut queues.events_since_sample))
    }

    /// Drains every queue and takes the event count in one step, so each
    /// event is counted in the same cycle it is played in.
    pub fn drain_cycle(&self) -> Result<CycleBatch> {
        let mut queues = self.lock()?;
        let event_count = std::mem::take(&mut queues.events_since_sample);
        let events = queues
            .entries
            .iter_mut()
            .map(|(platform, queue)| (*platform, std::mem::take(queue)))
            .collect();
        Ok(CycleBatch {
            events,
            event_count,
        })
    }

    pub fn len(&self, platform: Platform) -> Result<usize> {
        let queues = self.lock()?;
        Ok(queues.entries.get(&platform).map(Vec::len).unwrap_or(0))
    }

    pub fn contains(&self, platform: Platform) -> Result<bool> {
        Ok(self.lock()?.entries.contains_key(&platform))
    }

    /// Registered platforms in a stable order.
    pub fn platforms(&self) -> Result<Vec<Platform>> {
        let queues = self.lock()?;
        let mut platforms: Vec<Platform> = queues.entries.keys().copied().collect();
        platforms.sort();
        Ok(platforms)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Queues>> {
        self.shared
            .lock()
            .map_err(|_| EchoError::msg("event buffer has been poisoned"))
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer").finish()
    }
}
