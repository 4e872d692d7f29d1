use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{EchoError, MusicalTime, Platform, Result, SequenceConfig, TempoConfig};

/// Top-level configuration structure for the application.
///
/// Every field has a default, so a JSON document only needs to name what it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    /// Length of one loop cycle, shared by the tempo estimator and every
    /// sequence.
    pub loop_cycle: MusicalTime,
    pub tempo: TempoConfig,
    pub groups: Vec<InstrumentGroupConfig>,
    /// Sequence settings for platforms without an entry in `sequences`.
    pub sequence_defaults: SequenceConfig,
    pub sequences: BTreeMap<Platform, SequenceConfig>,
    /// Seed for the pitch walk. Without one the engine draws from the OS.
    pub seed: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            loop_cycle: MusicalTime::from_bars(4),
            tempo: TempoConfig::default(),
            groups: default_groups(),
            sequence_defaults: SequenceConfig::default(),
            sequences: BTreeMap::new(),
            seed: None,
        }
    }
}

impl AppConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_cycle.ticks() <= 0 {
            return Err(EchoError::config("loop_cycle must be longer than zero"));
        }
        self.transport.validate()?;
        self.tempo.validate()?;

        self.sequence_defaults
            .validate()
            .map_err(|err| EchoError::config(format!("sequence_defaults: {err}")))?;
        for (platform, sequence) in &self.sequences {
            sequence
                .validate()
                .map_err(|err| EchoError::config(format!("sequences.{platform}: {err}")))?;
        }

        let mut seen = BTreeSet::new();
        for group in &self.groups {
            if !(0..=9).contains(&group.octave) {
                return Err(EchoError::config(format!(
                    "group `{}` octave {} is outside 0..=9",
                    group.name, group.octave
                )));
            }
            for platform in &group.platforms {
                if !seen.insert(*platform) {
                    return Err(EchoError::config(format!(
                        "platform `{platform}` is assigned to more than one group"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Sequence settings for a platform.
    pub fn sequence_for(&self, platform: Platform) -> &SequenceConfig {
        self.sequences
            .get(&platform)
            .unwrap_or(&self.sequence_defaults)
    }

    /// Index into `groups` of the group that plays `platform`.
    pub fn group_of(&self, platform: Platform) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.platforms.contains(&platform))
    }

    /// Every platform that belongs to a group, in group order.
    pub fn grouped_platforms(&self) -> Vec<Platform> {
        self.groups
            .iter()
            .flat_map(|group| group.platforms.iter().copied())
            .collect()
    }
}

/// Configuration specific to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Tempo until the first estimate lands.
    pub initial_bpm: f64,
    /// Wall-clock delay between engine start and tick zero.
    pub start_delay_seconds: f64,
    /// How far behind the wall clock a note may start and still play.
    pub late_tolerance_seconds: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initial_bpm: 160.0,
            start_delay_seconds: 1.0,
            late_tolerance_seconds: 0.25,
        }
    }
}

impl TransportConfig {
    fn validate(&self) -> Result<()> {
        if !(self.initial_bpm.is_finite() && self.initial_bpm > 0.0) {
            return Err(EchoError::config("transport.initial_bpm must be positive"));
        }
        if !(self.start_delay_seconds.is_finite() && self.start_delay_seconds >= 0.0) {
            return Err(EchoError::config(
                "transport.start_delay_seconds must not be negative",
            ));
        }
        if !(self.late_tolerance_seconds.is_finite() && self.late_tolerance_seconds >= 0.0) {
            return Err(EchoError::config(
                "transport.late_tolerance_seconds must not be negative",
            ));
        }
        Ok(())
    }
}

/// A set of platforms sharing one instrument voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentGroupConfig {
    pub name: String,
    /// Octave appended to the scale letter of every note in the group.
    pub octave: i8,
    pub platforms: Vec<Platform>,
}

impl InstrumentGroupConfig {
    pub fn new(name: impl Into<String>, octave: i8, platforms: Vec<Platform>) -> Self {
        Self {
            name: name.into(),
            octave,
            platforms,
        }
    }
}

fn default_groups() -> Vec<InstrumentGroupConfig> {
    use Platform::*;

    vec![
        InstrumentGroupConfig::new("Lead Synth", 4, vec![Javascript, Node, Python, Ruby]),
        InstrumentGroupConfig::new("Kick Drum", 1, vec![Csharp, Elixir, Go, Php]),
        InstrumentGroupConfig::new("Bass Line", 2, vec![Java, Objc, C, Other]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.loop_cycle, "4:0:0".parse().unwrap());
        assert_eq!(config.grouped_platforms().len(), 12);
        assert_eq!(config.group_of(Platform::Go), Some(1));
        assert_eq!(config.group_of(Platform::Perl), None);
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let config = AppConfig::from_json_str(
            r#"{
                "loop_cycle": "2m",
                "tempo": { "bpm_divider": 2.5 },
                "sequences": { "go": { "quantize_to": "8n", "count_division": 2 } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.loop_cycle, MusicalTime::from_bars(2));
        assert_eq!(config.tempo.bpm_divider, 2.5);
        assert_eq!(config.tempo.min_bpm, TempoConfig::default().min_bpm);
        assert_eq!(config.sequence_for(Platform::Go).quantize_to, "8n".parse().unwrap());
        assert_eq!(config.sequence_for(Platform::Go).count_division, 2);
        assert_eq!(
            config.sequence_for(Platform::Ruby).count_division,
            config.sequence_defaults.count_division
        );
        assert_eq!(config.transport.initial_bpm, 160.0);
    }

    #[test]
    fn rejects_invalid_documents() {
        let cases = [
            r#"{ "loop_cycle": "0i" }"#,
            r#"{ "tempo": { "bpm_divider": 0 } }"#,
            r#"{ "transport": { "late_tolerance_seconds": -0.1 } }"#,
            r#"{ "sequence_defaults": { "count_division": 0 } }"#,
            r#"{ "sequences": { "go": { "quantize_to": "0i" } } }"#,
            r#"{ "groups": [
                { "name": "a", "octave": 3, "platforms": ["go"] },
                { "name": "b", "octave": 3, "platforms": ["go"] }
            ] }"#,
            r#"{ "loop_cycle": "forever" }"#,
            r#"{ "sequences": { "cobol": {} } }"#,
        ];

        for case in cases {
            assert!(AppConfig::from_json_str(case).is_err(), "{case} should be rejected");
        }
    }

    #[test]
    fn survives_a_json_round_trip() {
        let config = AppConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let back = AppConfig::from_json_str(&text).unwrap();
        assert_eq!(back.loop_cycle, config.loop_cycle);
        assert_eq!(back.groups.len(), config.groups.len());
    }
}
