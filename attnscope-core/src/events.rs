//! Performance event tokens.
//!
//! Performance documents carry one token per sequence position:
//! `TIME_SHIFT_<n>`, `NOTE_ON_<pitch>`, `NOTE_OFF_<pitch>` or `VELOCITY_<bin>`.
//! Unrecognised tokens are kept as [`MusicEvent::Other`] so that event
//! indices stay aligned with attention indices.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AttnError, Result};

/// One performance event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MusicEvent {
    TimeShift { steps: u32 },
    NoteOn { pitch: u8 },
    NoteOff { pitch: u8 },
    VelocityChange { bin: u8 },
    Other { token: String },
}

impl MusicEvent {
    pub fn is_time_shift(&self) -> bool {
        matches!(self, Self::TimeShift { .. })
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(TIME_SHIFT|NOTE_ON|NOTE_OFF|VELOCITY)_(.*)$")
            .expect("event token pattern is a valid regex")
    })
}

/// Parse a single event token.
pub fn parse_token(token: &str) -> Result<MusicEvent> {
    let Some(caps) = token_pattern().captures(token.trim()) else {
        return Ok(MusicEvent::Other {
            token: token.to_string(),
        });
    };
    let kind = &caps[1];
    let raw = &caps[2];
    let bad = || AttnError::malformed(format!("event token '{}' has an invalid value", token));

    let event = match kind {
        "TIME_SHIFT" => MusicEvent::TimeShift {
            steps: raw.parse().map_err(|_| bad())?,
        },
        "NOTE_ON" => MusicEvent::NoteOn {
            pitch: parse_pitch(raw).ok_or_else(bad)?,
        },
        "NOTE_OFF" => MusicEvent::NoteOff {
            pitch: parse_pitch(raw).ok_or_else(bad)?,
        },
        _ => MusicEvent::VelocityChange {
            bin: raw.parse().map_err(|_| bad())?,
        },
    };
    Ok(event)
}

fn parse_pitch(raw: &str) -> Option<u8> {
    raw.parse::<u8>().ok().filter(|p| *p < 128)
}

/// Parse a token stream, rewriting leading time shifts to `lead_in_steps`.
///
/// Returns the events and the total number of raw time-shift steps (before
/// the lead-in rewrite).
pub fn parse_tokens<S: AsRef<str>>(
    tokens: &[S],
    lead_in_steps: Option<u32>,
) -> Result<(Vec<MusicEvent>, u64)> {
    let mut events = tokens
        .iter()
        .map(|t| parse_token(t.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let total_steps = events
        .iter()
        .map(|e| match e {
            MusicEvent::TimeShift { steps } => u64::from(*steps),
            _ => 0,
        })
        .sum();

    let others = events
        .iter()
        .filter(|e| matches!(e, MusicEvent::Other { .. }))
        .count();
    if others > 0 {
        tracing::debug!(count = others, "Kept unrecognised event tokens as placeholders");
    }

    if let Some(lead_in) = lead_in_steps {
        for event in events.iter_mut() {
            match event {
                MusicEvent::TimeShift { steps } => *steps = lead_in,
                _ => break,
            }
        }
    }

    Ok((events, total_steps))
}

/// Lowest and highest note-on pitch, or `(128, 0)` when there are none.
pub fn pitch_range(events: &[MusicEvent]) -> (u8, u8) {
    events.iter().fold((128, 0), |(lo, hi), e| match e {
        MusicEvent::NoteOn { pitch } => (lo.min(*pitch), hi.max(*pitch)),
        _ => (lo, hi),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_kinds() {
        assert_eq!(
            parse_token("TIME_SHIFT_25").unwrap(),
            MusicEvent::TimeShift { steps: 25 }
        );
        assert_eq!(
            parse_token("NOTE_ON_60").unwrap(),
            MusicEvent::NoteOn { pitch: 60 }
        );
        assert_eq!(
            parse_token("NOTE_OFF_61").unwrap(),
            MusicEvent::NoteOff { pitch: 61 }
        );
        assert_eq!(
            parse_token("VELOCITY_12").unwrap(),
            MusicEvent::VelocityChange { bin: 12 }
        );
    }

    #[test]
    fn test_parse_unknown_token_is_kept() {
        assert_eq!(
            parse_token("<pad>").unwrap(),
            MusicEvent::Other {
                token: "<pad>".into()
            }
        );
    }

    #[test]
    fn test_parse_bad_value_is_malformed() {
        assert!(parse_token("NOTE_ON_x").is_err());
        assert!(parse_token("NOTE_ON_200").is_err());
        assert!(parse_token("TIME_SHIFT_").is_err());
    }

    #[test]
    fn test_lead_in_rewrite() {
        let tokens = ["TIME_SHIFT_100", "TIME_SHIFT_50", "NOTE_ON_60", "TIME_SHIFT_7"];
        let (events, total) = parse_tokens(&tokens, Some(10)).unwrap();
        assert_eq!(total, 157);
        assert_eq!(events[0], MusicEvent::TimeShift { steps: 10 });
        assert_eq!(events[1], MusicEvent::TimeShift { steps: 10 });
        assert_eq!(events[3], MusicEvent::TimeShift { steps: 7 });

        let (events, _) = parse_tokens(&tokens, None).unwrap();
        assert_eq!(events[0], MusicEvent::TimeShift { steps: 100 });
    }

    #[test]
    fn test_pitch_range() {
        let (events, _) =
            parse_tokens(&["NOTE_ON_64", "NOTE_ON_52", "NOTE_OFF_70"], None).unwrap();
        assert_eq!(pitch_range(&events), (52, 64));
        assert_eq!(pitch_range(&[]), (128, 0));
    }
}
