//! Core library for Error Echo.
//!
//! Error reports streamed from many platforms are buffered per platform,
//! counted to derive a tempo, and once per loop cycle turned into quantized
//! notes that play on a shared musical transport. Each module owns one
//! stage of that pipeline; [`EchoEngine`] wires them together.

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod platform;
pub mod render;
pub mod sequence;
pub mod tempo;
pub mod timeline;

pub use buffer::{CycleBatch, EventBuffer};
pub use config::{AppConfig, InstrumentGroupConfig, TransportConfig};
pub use dispatch::{
    DispatchReport, InstrumentDispatch, Pitch, RecordingVoice, TraceVoice, Voice, VoiceTrigger,
};
pub use engine::{EchoEngine, EchoState};
pub use error::{EchoError, Result};
pub use ingest::{decode_frame, read_frames, IngestOutcome, IngestStats, Ingestor, RawEvent};
pub use platform::Platform;
pub use render::{BridgeEvent, PlaybackBridge, PlaybackPlan, TempoReport};
pub use sequence::{QuantizedNote, SequenceConfig, SequenceProcessor, SCALE};
pub use tempo::{TempoConfig, TempoEstimator, TempoState};
pub use timeline::{JobId, MusicalTime, TempoMap, Transport, PPQ, TICKS_PER_BAR};
