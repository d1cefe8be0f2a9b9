//! Parsed attention datasets.
//!
//! A document is one of three kinds. Chorales carry interleaved four-voice
//! pitches, performances carry event tokens, and dual chorales carry two
//! attention sources over the same chorale. [`DataKind::parse`] turns a JSON
//! document into an immutable [`Dataset`] with scaled weights and the
//! timeline that gives its indices a position in time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AttnConfig;
use crate::dual::{AttentionSource, DualAttentionBundle, align};
use crate::error::{AttnError, Result};
use crate::events::{MusicEvent, parse_tokens, pitch_range};
use crate::normalize::scale_tensor;
use crate::tensor::{WeightTensor, parse_weights};
use crate::timeline::{
    EventStreamMapper, FixedGridMapper, TimeMapper, Timeline, VOICES_PER_CHORD,
};

/// The closed set of supported document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Chorale,
    Performance,
    DualChorale,
}

impl DataKind {
    /// Guess the kind from the fields present in a document.
    pub fn detect(json: &Value) -> Self {
        if json.get("music_text").is_some() {
            Self::Performance
        } else if json.get("attention_weights_regular").is_some() {
            Self::DualChorale
        } else {
            Self::Chorale
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chorale => "chorale",
            Self::Performance => "performance",
            Self::DualChorale => "dual",
        }
    }

    /// Build a dataset of this kind from a parsed JSON document.
    pub fn parse(self, json: &Value, config: &AttnConfig) -> Result<Dataset> {
        match self {
            Self::Chorale => parse_chorale(json, config, false),
            Self::DualChorale => parse_chorale(json, config, true),
            Self::Performance => parse_performance(json, config),
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = AttnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chorale" | "bach" => Ok(Self::Chorale),
            "performance" => Ok(Self::Performance),
            "dual" | "bach_duo" | "dual_chorale" => Ok(Self::DualChorale),
            other => Err(AttnError::config(format!("unknown data kind '{}'", other))),
        }
    }
}

/// The musical content of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Music {
    /// Pitches with the four voices of each chord interleaved.
    Chorale { pitches: Vec<u8> },
    Performance { events: Vec<MusicEvent> },
}

/// Scaled attention weights from one or two sources.
#[derive(Debug, Clone, PartialEq)]
pub enum Attention {
    Single(WeightTensor),
    Dual(DualAttentionBundle),
}

impl Attention {
    pub fn num_layers(&self) -> usize {
        match self {
            Self::Single(t) => t.num_layers(),
            Self::Dual(b) => b.num_layers(),
        }
    }

    pub fn num_heads(&self) -> usize {
        match self {
            Self::Single(t) => t.num_heads(),
            Self::Dual(b) => b.num_heads(),
        }
    }

    pub fn sequence_length(&self) -> usize {
        match self {
            Self::Single(t) => t.sequence_length(),
            Self::Dual(b) => b.sequence_length(),
        }
    }

    /// Sources in paint order: global before local.
    pub fn sources(&self) -> Vec<(AttentionSource, &WeightTensor)> {
        match self {
            Self::Single(t) => vec![(AttentionSource::Primary, t)],
            Self::Dual(b) => vec![
                (AttentionSource::Global, &b.global),
                (AttentionSource::Local, &b.local),
            ],
        }
    }

    pub fn tensor(&self, source: AttentionSource) -> Option<&WeightTensor> {
        match (self, source) {
            (Self::Single(t), AttentionSource::Primary) => Some(t),
            (Self::Dual(b), s) => b.source(s),
            _ => None,
        }
    }
}

/// Where and when a dataset was loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub label: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

/// A fully parsed, immutable dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub kind: DataKind,
    pub music: Music,
    pub attention: Attention,
    pub timeline: Timeline,
    pub min_pitch: u8,
    pub max_pitch: u8,
    /// Chords for chorales, raw time-shift steps for performances.
    pub total_steps: u64,
    pub info: DatasetInfo,
}

/// Scaled weights at or above `epsilon` for one head, over drawn steps in `[0, step]`.
pub type NoteHeat = Vec<(usize, f32)>;

impl Dataset {
    /// Parse a JSON document, detecting its kind unless one is given.
    pub fn from_json(json: &Value, kind: Option<DataKind>, config: &AttnConfig) -> Result<Self> {
        let kind = kind.unwrap_or_else(|| DataKind::detect(json));
        kind.parse(json, config)
    }

    pub fn from_json_str(text: &str, kind: Option<DataKind>, config: &AttnConfig) -> Result<Self> {
        let json: Value = serde_json::from_str(text)?;
        Self::from_json(&json, kind, config)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.info.label = Some(label.into());
        self
    }

    pub fn num_layers(&self) -> usize {
        self.attention.num_layers()
    }

    pub fn num_heads(&self) -> usize {
        self.attention.num_heads()
    }

    pub fn sequence_length(&self) -> usize {
        self.attention.sequence_length()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn is_dual(&self) -> bool {
        matches!(self.attention, Attention::Dual(_))
    }

    /// Whether `index` can be selected: inside the sequence and drawn.
    pub fn is_anchor(&self, index: usize) -> bool {
        index < self.sequence_length() && self.timeline.is_anchor(index)
    }

    /// Per-note colouring input for single-head display.
    pub fn note_heat(
        &self,
        source: AttentionSource,
        layer: usize,
        head: usize,
        step: usize,
        epsilon: f32,
    ) -> Result<NoteHeat> {
        let tensor = self.attention.tensor(source).ok_or_else(|| {
            AttnError::invalid_selection(format!("dataset has no {:?} attention", source))
        })?;
        let row = tensor.row(layer, head, step).ok_or_else(|| {
            AttnError::invalid_selection(format!(
                "no weights for layer {} head {} step {}",
                layer, head, step
            ))
        })?;
        Ok(row
            .iter()
            .enumerate()
            .take(step + 1)
            .filter(|&(s, &w)| w >= epsilon && self.is_anchor(s))
            .map(|(s, &w)| (s, w))
            .collect())
    }
}

fn required<'a>(json: &'a Value, field: &str) -> Result<&'a Value> {
    json.get(field)
        .ok_or_else(|| AttnError::malformed(format!("missing required field '{}'", field)))
}

fn is_sparse(json: &Value) -> bool {
    json.get("sparse").and_then(Value::as_bool).unwrap_or(false)
}

fn parse_pitches(json: &Value) -> Result<Vec<u8>> {
    let music = required(json, "music")?
        .as_array()
        .ok_or_else(|| AttnError::malformed("'music' is not an array of pitches"))?;
    music
        .iter()
        .map(|p| {
            p.as_u64()
                .filter(|p| *p < 128)
                .map(|p| p as u8)
                .ok_or_else(|| AttnError::malformed(format!("'{}' is not a MIDI pitch", p)))
        })
        .collect()
}

fn warn_length_mismatch(music_len: usize, sequence_length: usize) {
    if music_len != sequence_length {
        tracing::warn!(
            music_len,
            sequence_length,
            "Music and attention lengths differ; extra indices are not drawn"
        );
    }
}

fn parse_chorale(json: &Value, config: &AttnConfig, dual: bool) -> Result<Dataset> {
    let mut pitches = parse_pitches(json)?;
    let sparse = is_sparse(json);

    let attention = if dual {
        let local = parse_weights(required(json, "attention_weights")?, "attention_weights", sparse)?;
        let global = parse_weights(
            required(json, "attention_weights_regular")?,
            "attention_weights_regular",
            sparse,
        )?;
        // Dual documents carry one extra trailing note.
        pitches.pop();
        Attention::Dual(align(local, global)?)
    } else {
        let mut tensor =
            parse_weights(required(json, "attention_weights")?, "attention_weights", sparse)?;
        scale_tensor(&mut tensor);
        Attention::Single(tensor)
    };

    let (Some(&min_pitch), Some(&max_pitch)) = (pitches.iter().min(), pitches.iter().max()) else {
        return Err(AttnError::malformed("'music' contains no pitches"));
    };
    warn_length_mismatch(pitches.len(), attention.sequence_length());

    let timeline = Timeline::Grid(FixedGridMapper::from_layout(pitches.len(), &config.layout));
    let total_steps = attention.sequence_length().div_ceil(VOICES_PER_CHORD) as u64;

    Ok(Dataset {
        kind: if dual {
            DataKind::DualChorale
        } else {
            DataKind::Chorale
        },
        music: Music::Chorale { pitches },
        attention,
        timeline,
        min_pitch,
        max_pitch,
        total_steps,
        info: DatasetInfo {
            label: None,
            loaded_at: Utc::now(),
        },
    })
}

fn parse_performance(json: &Value, config: &AttnConfig) -> Result<Dataset> {
    let tokens = required(json, "music_text")?
        .as_array()
        .ok_or_else(|| AttnError::malformed("'music_text' is not an array of tokens"))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| AttnError::malformed(format!("event token {} is not a string", t)))
        })
        .collect::<Result<Vec<_>>>()?;
    let (events, total_steps) = parse_tokens(&tokens, config.performance.lead_in_steps)?;

    let mut tensor = parse_weights(
        required(json, "attention_weights")?,
        "attention_weights",
        is_sparse(json),
    )?;
    scale_tensor(&mut tensor);
    warn_length_mismatch(events.len(), tensor.sequence_length());

    let (min_pitch, max_pitch) = pitch_range(&events);
    let timeline = Timeline::Events(EventStreamMapper::from_layout(&events, &config.layout));
    if let Some(mapper) = timeline.as_events() {
        tracing::debug!(
            notes = mapper.spans().len(),
            total_time = mapper.total_time(),
            "Laid out performance events"
        );
    }

    Ok(Dataset {
        kind: DataKind::Performance,
        music: Music::Performance { events },
        attention: Attention::Single(tensor),
        timeline,
        min_pitch,
        max_pitch,
        total_steps,
        info: DatasetInfo {
            label: None,
            loaded_at: Utc::now(),
        },
    })
}
