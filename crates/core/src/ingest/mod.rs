//! Boundary between the raw event stream and the [`EventBuffer`].

use std::io::BufRead;

use serde::Serialize;

use crate::{EchoError, EventBuffer, Platform, Result};

/// One decoded error report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawEvent {
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since the epoch.
    pub timestamp: f64,
    pub platform: Platform,
}

/// Decodes a `[latitude, longitude, timestamp_ms, "platform"]` text frame.
pub fn decode_frame(text: &str) -> Result<RawEvent> {
    let (latitude, longitude, timestamp, platform): (f64, f64, f64, String) =
        serde_json::from_str(text)?;
    Ok(RawEvent {
        latitude,
        longitude,
        timestamp,
        platform: platform.parse()?,
    })
}

/// What happened to a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(Platform),
    /// A known platform without a queue, or a platform name outside the
    /// known set.
    UnknownPlatform,
    Malformed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub unknown_platform: u64,
    pub malformed: u64,
}

/// Feeds decoded frames into the buffer. Bad frames are counted and
/// dropped; nothing here returns an error to the stream.
#[derive(Debug, Clone)]
pub struct Ingestor {
    buffer: EventBuffer,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(buffer: EventBuffer) -> Self {
        Self {
            buffer,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn handle_frame(&mut self, frame: &str) -> IngestOutcome {
        let outcome = match decode_frame(frame) {
            Ok(event) => self.accept(event),
            Err(EchoError::UnknownPlatform(name)) => {
                tracing::trace!(platform = %name, "ignoring unknown platform");
                IngestOutcome::UnknownPlatform
            }
            Err(err) => {
                tracing::trace!(%err, "dropping malformed frame");
                IngestOutcome::Malformed
            }
        };

        match outcome {
            IngestOutcome::Accepted(_) => self.stats.accepted += 1,
            IngestOutcome::UnknownPlatform => self.stats.unknown_platform += 1,
            IngestOutcome::Malformed => self.stats.malformed += 1,
        }
        outcome
    }

    fn accept(&mut self, event: RawEvent) -> IngestOutcome {
        match self.buffer.append(event.platform, event.timestamp) {
            Ok(true) => IngestOutcome::Accepted(event.platform),
            Ok(false) => IngestOutcome::UnknownPlatform,
            Err(err) => {
                tracing::warn!(%err, "event buffer unavailable, dropping frame");
                IngestOutcome::Malformed
            }
        }
    }
}

/// Reads frames line by line until EOF.
///
/// Both bare newline-delimited frames and server-sent events are accepted:
/// a `data:` prefix is stripped, blank lines and `:` comments are skipped,
/// and other SSE fields (`event:`, `id:`, `retry:`) are ignored.
pub fn read_frames<R: BufRead>(reader: R, ingestor: &mut Ingestor) -> Result<IngestStats> {
    for line in reader.lines() {
        let line = line?;
        let Some(frame) = frame_payload(&line) else {
            continue;
        };
        ingestor.handle_frame(frame);
    }
    Ok(ingestor.stats())
}

fn frame_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        return Some(data.trim());
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    }
    Some(line)
}
