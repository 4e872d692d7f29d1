use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::EchoError;

/// Ticks per quarter note.
pub const PPQ: i64 = 192;

/// Quarter notes per bar. The transport only knows 4/4.
pub const BEATS_PER_BAR: i64 = 4;

pub const TICKS_PER_BAR: i64 = PPQ * BEATS_PER_BAR;

/// A position or length in musical time, counted in transport ticks.
///
/// Values are signed so that configuration offsets can shift notes earlier.
/// The textual form follows transport notation:
///
/// * `"4:0:0"`: bars, beats and sixteenths
/// * `"16n"`, `"8n."`, `"8t"`: note values, dotted and triplet variants
/// * `"2m"`: whole measures
/// * `"96i"`: raw ticks
///
/// A leading `-` negates any of the above.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "TimeRepr", into = "String")]
pub struct MusicalTime(i64);

impl MusicalTime {
    pub const ZERO: MusicalTime = MusicalTime(0);

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn from_beats(beats: i64) -> Self {
        Self(beats * PPQ)
    }

    pub const fn from_bars(bars: i64) -> Self {
        Self(bars * TICKS_PER_BAR)
    }

    /// Converts a wall-clock span into ticks at a fixed tempo, rounding to
    /// the nearest tick.
    pub fn from_seconds(seconds: f64, bpm: f64) -> Self {
        Self((seconds * bpm / 60.0 * PPQ as f64).round() as i64)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    pub fn beats(self) -> f64 {
        self.0 as f64 / PPQ as f64
    }

    /// Length of this span in seconds at a fixed tempo.
    pub fn to_seconds(self, bpm: f64) -> f64 {
        self.0 as f64 * 60.0 / (bpm * PPQ as f64)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Snaps to the nearest multiple of `grid`, rounding halves up.
    ///
    /// A grid of zero or less leaves the value untouched. Values near the
    /// ends of the tick range saturate instead of overflowing.
    pub fn quantize(self, grid: MusicalTime) -> Self {
        if grid.0 <= 0 {
            return self;
        }
        let steps = self.0.saturating_add(grid.0 / 2).div_euclid(grid.0);
        Self(steps.saturating_mul(grid.0))
    }
}

impl Add for MusicalTime {
    type Output = MusicalTime;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for MusicalTime {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for MusicalTime {
    type Output = MusicalTime;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0 && self.0 % TICKS_PER_BAR == 0 {
            write!(f, "{}m", self.0 / TICKS_PER_BAR)
        } else {
            write!(f, "{}i", self.0)
        }
    }
}

impl FromStr for MusicalTime {
    type Err = EchoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let ticks = parse_unsigned(body).ok_or_else(|| EchoError::InvalidTime(s.to_string()))?;
        Ok(Self(if negative { -ticks } else { ticks }))
    }
}

impl From<MusicalTime> for String {
    fn from(value: MusicalTime) -> Self {
        value.to_string()
    }
}

/// Accepts either the textual notation or a bare tick count.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRepr {
    Ticks(i64),
    Text(String),
}

impl TryFrom<TimeRepr> for MusicalTime {
    type Error = EchoError;

    fn try_from(value: TimeRepr) -> Result<Self, Self::Error> {
        match value {
            TimeRepr::Ticks(ticks) => Ok(Self(ticks)),
            TimeRepr::Text(text) => text.parse(),
        }
    }
}

fn parse_unsigned(body: &str) -> Option<i64> {
    let whole_note = (PPQ * 4) as f64;

    if body.contains(':') {
        let mut parts = body.split(':');
        let bars = parse_amount(parts.next()?)?;
        let beats = parts.next().map(parse_amount).unwrap_or(Some(0.0))?;
        let sixteenths = parts.next().map(parse_amount).unwrap_or(Some(0.0))?;
        if parts.next().is_some() {
            return None;
        }
        return to_ticks(
            bars * TICKS_PER_BAR as f64 + beats * PPQ as f64 + sixteenths * PPQ as f64 / 4.0,
        );
    }

    if let Some(value) = body.strip_suffix("n.") {
        return to_ticks(whole_note / parse_divisor(value)? * 1.5);
    }
    if let Some(value) = body.strip_suffix('n') {
        return to_ticks(whole_note / parse_divisor(value)?);
    }
    if let Some(value) = body.strip_suffix('t') {
        return to_ticks(whole_note / parse_divisor(value)? * 2.0 / 3.0);
    }
    if let Some(value) = body.strip_suffix('m') {
        return to_ticks(parse_amount(value)? * TICKS_PER_BAR as f64);
    }
    if let Some(value) = body.strip_suffix('i') {
        return to_ticks(parse_amount(value)?);
    }

    None
}

fn parse_amount(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('-') || text.starts_with('+') {
        return None;
    }
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_divisor(text: &str) -> Option<f64> {
    parse_amount(text).filter(|value| *value > 0.0)
}

fn to_ticks(value: f64) -> Option<i64> {
    (value.is_finite() && value >= 0.0).then(|| value.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(text: &str) -> MusicalTime {
        text.parse().unwrap()
    }

    #[test]
    fn parses_transport_notation() {
        assert_eq!(time("4:0:0").ticks(), 4 * TICKS_PER_BAR);
        assert_eq!(time("0:1:2").ticks(), PPQ + PPQ / 2);
        assert_eq!(time("16n").ticks(), 48);
        assert_eq!(time("8n.").ticks(), 144);
        assert_eq!(time("8t").ticks(), 64);
        assert_eq!(time("2m").ticks(), 2 * TICKS_PER_BAR);
        assert_eq!(time("96i").ticks(), 96);
        assert_eq!(time("-16n").ticks(), -48);
    }

    #[test]
    fn rejects_garbage() {
        for text in ["", "abc", "0n", "-", "--4n", "1:2:3:4", "4x", "nann"] {
            assert!(text.parse::<MusicalTime>().is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        for ticks in [0, 1, 48, TICKS_PER_BAR, 3 * TICKS_PER_BAR, -TICKS_PER_BAR, -5] {
            let value = MusicalTime::from_ticks(ticks);
            assert_eq!(value.to_string().parse::<MusicalTime>().unwrap(), value);
        }
    }

    #[test]
    fn deserializes_text_or_ticks() {
        let from_text: MusicalTime = serde_json::from_str("\"16n\"").unwrap();
        let from_ticks: MusicalTime = serde_json::from_str("48").unwrap();
        assert_eq!(from_text, from_ticks);
        assert!(serde_json::from_str::<MusicalTime>("\"sixteenth\"").is_err());
    }

    #[test]
    fn quantize_snaps_to_nearest_grid_point() {
        let grid = time("16n");
        assert_eq!(MusicalTime::from_ticks(23).quantize(grid).ticks(), 0);
        assert_eq!(MusicalTime::from_ticks(24).quantize(grid).ticks(), 48);
        assert_eq!(MusicalTime::from_ticks(70).quantize(grid).ticks(), 48);
        assert_eq!(MusicalTime::from_ticks(73).quantize(grid).ticks(), 96);
    }

    #[test]
    fn quantize_is_idempotent() {
        let grid = time("8t");
        for ticks in 0..500 {
            let once = MusicalTime::from_ticks(ticks).quantize(grid);
            assert_eq!(once.quantize(grid), once);
        }
    }

    #[test]
    fn quantize_saturates_at_the_ends_of_the_range() {
        let grid = time("16n");
        let far = MusicalTime::from_seconds(1e17, 160.0);
        assert_eq!(far.ticks(), i64::MAX);
        assert!(far.quantize(grid).ticks() > i64::MAX - grid.ticks());
        assert_eq!(MusicalTime::from_ticks(i64::MIN).quantize(grid).ticks(), i64::MIN);
    }

    #[test]
    fn converts_between_seconds_and_ticks() {
        let two_seconds = MusicalTime::from_seconds(2.0, 60.0);
        assert_eq!(two_seconds, MusicalTime::from_beats(2));
        assert!((two_seconds.to_seconds(60.0) - 2.0).abs() < 1e-9);
        assert!((MusicalTime::from_bars(1).to_seconds(120.0) - 2.0).abs() < 1e-9);
    }
}
