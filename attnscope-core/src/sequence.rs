//! Quantized note sequences for external playback.

use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Music};
use crate::events::MusicEvent;
use crate::timeline::{EventStreamMapper, TimeMapper, VOICES_PER_CHORD};

pub const CHORALE_STEPS_PER_QUARTER: u32 = 2;
pub const PERFORMANCE_STEPS_PER_QUARTER: u32 = 50;
pub const DEFAULT_QPM: f64 = 120.0;
/// Velocity of notes played before any velocity event.
pub const DEFAULT_VELOCITY: u8 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceNote {
    pub pitch: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    pub quantized_start_step: u64,
    pub quantized_end_step: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub steps_per_quarter: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    pub time: f64,
    pub qpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSequence {
    pub notes: Vec<SequenceNote>,
    pub total_quantized_steps: u64,
    pub quantization_info: QuantizationInfo,
    pub tempos: Vec<Tempo>,
    /// Steps of leading silence removed from the start of a performance.
    #[serde(default)]
    pub time_offset_steps: u64,
}

impl NoteSequence {
    pub fn from_dataset(dataset: &Dataset, velocity_bins: u32) -> Self {
        match &dataset.music {
            Music::Chorale { pitches } => Self::from_chorale(pitches),
            Music::Performance { events } => Self::from_performance(events, velocity_bins),
        }
    }

    /// One quantized step per chord; every voice lasts one step.
    pub fn from_chorale(pitches: &[u8]) -> Self {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &pitch)| {
                let step = (i / VOICES_PER_CHORD) as u64;
                SequenceNote {
                    pitch,
                    velocity: None,
                    quantized_start_step: step,
                    quantized_end_step: step + 1,
                }
            })
            .collect();
        Self {
            notes,
            total_quantized_steps: (pitches.len() / VOICES_PER_CHORD) as u64,
            quantization_info: QuantizationInfo {
                steps_per_quarter: CHORALE_STEPS_PER_QUARTER,
            },
            tempos: vec![Tempo {
                time: 0.0,
                qpm: DEFAULT_QPM,
            }],
            time_offset_steps: 0,
        }
    }

    /// Notes recovered from the event stream with the leading silence removed.
    pub fn from_performance(events: &[MusicEvent], velocity_bins: u32) -> Self {
        let mut shifted = events.to_vec();
        let mut offset = 0u64;
        for event in shifted.iter_mut() {
            let MusicEvent::TimeShift { steps } = event else {
                break;
            };
            offset += u64::from(*steps);
            *steps = 0;
        }

        let mapper = EventStreamMapper::build(&shifted, 1.0, 0.0);
        let notes = mapper
            .spans()
            .iter()
            .map(|span| SequenceNote {
                pitch: span.pitch,
                velocity: Some(
                    span.velocity_bin
                        .map_or(DEFAULT_VELOCITY, |bin| bin_to_velocity(bin, velocity_bins)),
                ),
                quantized_start_step: span.start_time as u64,
                quantized_end_step: span.end_time as u64,
            })
            .collect();

        Self {
            notes,
            total_quantized_steps: mapper.total_time() as u64,
            quantization_info: QuantizationInfo {
                steps_per_quarter: PERFORMANCE_STEPS_PER_QUARTER,
            },
            tempos: vec![Tempo {
                time: 0.0,
                qpm: DEFAULT_QPM,
            }],
            time_offset_steps: offset,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// MIDI velocity at the bottom of velocity bin `bin` (1-based).
pub fn bin_to_velocity(bin: u8, velocity_bins: u32) -> u8 {
    let bins = velocity_bins.max(1);
    let bin_size = 128u32.div_ceil(bins);
    let velocity = u32::from(bin).saturating_sub(1) * bin_size + 1;
    velocity.min(127) as u8
}
