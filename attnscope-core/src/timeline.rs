//! Mapping between sequence indices and the visual time axis.
//!
//! The ranker works in index space and the renderer in time space. Chorale
//! data lays indices out on a fixed four-voice grid; performance data derives
//! note spans from a stream of timed events. Both are exposed through
//! [`TimeMapper`] and chosen once per dataset via [`Timeline`].

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::LayoutConfig;
use crate::events::MusicEvent;

/// Voices per chord in chorale data; pitches are interleaved in this order.
pub const VOICES_PER_CHORD: usize = 4;

/// A half-open interval on the time axis owned by one drawable index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRegion {
    pub start: f64,
    pub end: f64,
}

impl TimeRegion {
    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time < self.end
    }
}

/// Translation between sequence indices and time.
pub trait TimeMapper {
    /// Number of sequence indices the mapper knows about.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time at which the event or note at `index` occurs.
    fn index_to_time(&self, index: usize) -> Option<f64>;

    /// Region drawn for `index`, or `None` when nothing is drawn for it.
    fn region(&self, index: usize) -> Option<TimeRegion>;

    /// Drawable indices whose region contains `time`, ascending.
    fn time_to_indices(&self, time: f64) -> Vec<usize>;

    /// End of the time axis.
    fn total_time(&self) -> f64;

    /// Whether `index` is drawn, and so can be a selection target or source.
    fn is_anchor(&self, index: usize) -> bool {
        self.region(index).is_some()
    }
}

// ---------------------------------------------------------------------------
// FixedGridMapper
// ---------------------------------------------------------------------------

/// Four interleaved voices per step, one step per `step_width` time units.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedGridMapper {
    note_count: usize,
    step_width: f64,
}

impl FixedGridMapper {
    pub fn new(note_count: usize, step_width: f64) -> Self {
        Self {
            note_count,
            step_width,
        }
    }

    pub fn from_layout(note_count: usize, layout: &LayoutConfig) -> Self {
        Self::new(note_count, layout.note_width)
    }

    /// `(step, voice)` of a flat index.
    pub fn index_to_step_voice(index: usize) -> (usize, usize) {
        (index / VOICES_PER_CHORD, index % VOICES_PER_CHORD)
    }

    /// Indices of the voices sounding at `step`, limited to existing notes.
    pub fn step_to_indices(&self, step: usize) -> Range<usize> {
        let start = step.saturating_mul(VOICES_PER_CHORD).min(self.note_count);
        let end = start.saturating_add(VOICES_PER_CHORD).min(self.note_count);
        start..end
    }

    /// Number of (possibly partial) chords.
    pub fn num_steps(&self) -> usize {
        self.note_count.div_ceil(VOICES_PER_CHORD)
    }
}

impl TimeMapper for FixedGridMapper {
    fn len(&self) -> usize {
        self.note_count
    }

    fn index_to_time(&self, index: usize) -> Option<f64> {
        (index < self.note_count)
            .then(|| Self::index_to_step_voice(index).0 as f64 * self.step_width)
    }

    fn region(&self, index: usize) -> Option<TimeRegion> {
        let start = self.index_to_time(index)?;
        Some(TimeRegion {
            start,
            end: start + self.step_width,
        })
    }

    fn time_to_indices(&self, time: f64) -> Vec<usize> {
        if time < 0.0 || self.step_width <= 0.0 {
            return Vec::new();
        }
        let step = (time / self.step_width).floor() as usize;
        if step >= self.num_steps() {
            return Vec::new();
        }
        self.step_to_indices(step).collect()
    }

    fn total_time(&self) -> f64 {
        self.num_steps() as f64 * self.step_width
    }
}

// ---------------------------------------------------------------------------
// EventStreamMapper
// ---------------------------------------------------------------------------

/// A sounding note recovered from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSpan {
    pub pitch: u8,
    pub start_time: f64,
    pub end_time: f64,
    /// Index of the note-on event.
    pub on_index: usize,
    /// Index of the matching note-off, `None` when the note was closed synthetically.
    pub off_index: Option<usize>,
    /// Velocity bin in effect when the note started.
    pub velocity_bin: Option<u8>,
}

/// A point on the velocity side channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityPoint {
    pub time: f64,
    pub bin: u8,
}

#[derive(Debug, Clone, Copy)]
struct OpenNote {
    start: f64,
    on_index: usize,
    velocity_bin: Option<u8>,
}

/// Note spans and index times derived from a performance event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStreamMapper {
    spans: Vec<NoteSpan>,
    event_times: Vec<f64>,
    anchors: BTreeMap<usize, TimeRegion>,
    off_for_on: BTreeMap<usize, usize>,
    velocity_curve: Vec<VelocityPoint>,
    total_time: f64,
}

impl EventStreamMapper {
    /// Scan `events` once with a running clock.
    pub fn build(events: &[MusicEvent], time_scale: f64, zero_length_half_span: f64) -> Self {
        let mut mapper = Self {
            spans: Vec::new(),
            event_times: Vec::with_capacity(events.len()),
            anchors: BTreeMap::new(),
            off_for_on: BTreeMap::new(),
            velocity_curve: Vec::new(),
            total_time: 0.0,
        };

        let mut open: HashMap<u8, OpenNote> = HashMap::new();
        let mut current_time = 0.0;
        let mut velocity_bin = None;

        for (index, event) in events.iter().enumerate() {
            match event {
                MusicEvent::TimeShift { steps } => {
                    current_time += f64::from(*steps) * time_scale;
                }
                MusicEvent::NoteOn { pitch } => {
                    if let Some(previous) = open.remove(pitch) {
                        tracing::warn!(
                            pitch,
                            index,
                            previous = previous.on_index,
                            "Note-on for a pitch that is already sounding; closing the earlier note"
                        );
                        mapper.close(*pitch, previous, current_time, None, zero_length_half_span);
                    }
                    open.insert(
                        *pitch,
                        OpenNote {
                            start: current_time,
                            on_index: index,
                            velocity_bin,
                        },
                    );
                }
                MusicEvent::NoteOff { pitch } => match open.remove(pitch) {
                    Some(note) => {
                        mapper.close(*pitch, note, current_time, Some(index), zero_length_half_span)
                    }
                    None => {
                        tracing::warn!(pitch, index, "Note-off without a matching note-on; skipping");
                    }
                },
                MusicEvent::VelocityChange { bin } => {
                    velocity_bin = Some(*bin);
                    mapper.velocity_curve.push(VelocityPoint {
                        time: current_time,
                        bin: *bin,
                    });
                }
                MusicEvent::Other { .. } => {}
            }
            mapper.event_times.push(current_time);
        }

        let mut dangling: Vec<(u8, OpenNote)> = open.into_iter().collect();
        dangling.sort_by_key(|(_, note)| note.on_index);
        for (pitch, note) in dangling {
            tracing::warn!(
                pitch,
                index = note.on_index,
                "Note-on never released; closing at end of stream"
            );
            mapper.close(pitch, note, current_time, None, zero_length_half_span);
        }

        mapper.spans.sort_by_key(|s| s.on_index);
        mapper.total_time = current_time;
        mapper
    }

    pub fn from_layout(events: &[MusicEvent], layout: &LayoutConfig) -> Self {
        Self::build(events, layout.time_scale, layout.zero_length_half_span)
    }

    fn close(
        &mut self,
        pitch: u8,
        note: OpenNote,
        end: f64,
        off_index: Option<usize>,
        zero_length_half_span: f64,
    ) {
        let mut half = (end - note.start) / 2.0;
        if half == 0.0 {
            half = zero_length_half_span;
        }
        let mid = note.start + half;
        self.anchors.insert(
            note.on_index,
            TimeRegion {
                start: note.start,
                end: mid,
            },
        );
        if let Some(off) = off_index {
            self.anchors.insert(
                off,
                TimeRegion {
                    start: mid,
                    end: mid + half,
                },
            );
            self.off_for_on.insert(note.on_index, off);
        }
        self.spans.push(NoteSpan {
            pitch,
            start_time: note.start,
            end_time: end,
            on_index: note.on_index,
            off_index,
            velocity_bin: note.velocity_bin,
        });
    }

    /// Recovered notes, ordered by note-on index.
    pub fn spans(&self) -> &[NoteSpan] {
        &self.spans
    }

    /// Index of the note-off that closed the note started at `on_index`.
    pub fn off_index_for(&self, on_index: usize) -> Option<usize> {
        self.off_for_on.get(&on_index).copied()
    }

    pub fn velocity_curve(&self) -> &[VelocityPoint] {
        &self.velocity_curve
    }

    /// All drawable indices, ascending.
    pub fn anchors(&self) -> impl Iterator<Item = usize> + '_ {
        self.anchors.keys().copied()
    }
}

impl TimeMapper for EventStreamMapper {
    fn len(&self) -> usize {
        self.event_times.len()
    }

    fn index_to_time(&self, index: usize) -> Option<f64> {
        self.event_times.get(index).copied()
    }

    fn region(&self, index: usize) -> Option<TimeRegion> {
        self.anchors.get(&index).copied()
    }

    fn time_to_indices(&self, time: f64) -> Vec<usize> {
        self.anchors
            .iter()
            .filter(|(_, region)| region.contains(time))
            .map(|(&index, _)| index)
            .collect()
    }

    fn total_time(&self) -> f64 {
        self.total_time
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// The timeline chosen for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Timeline {
    Grid(FixedGridMapper),
    Events(EventStreamMapper),
}

impl Timeline {
    pub fn as_grid(&self) -> Option<&FixedGridMapper> {
        match self {
            Self::Grid(grid) => Some(grid),
            Self::Events(_) => None,
        }
    }

    pub fn as_events(&self) -> Option<&EventStreamMapper> {
        match self {
            Self::Events(events) => Some(events),
            Self::Grid(_) => None,
        }
    }

    fn mapper(&self) -> &dyn TimeMapper {
        match self {
            Self::Grid(grid) => grid,
            Self::Events(events) => events,
        }
    }
}

impl TimeMapper for Timeline {
    fn len(&self) -> usize {
        self.mapper().len()
    }

    fn index_to_time(&self, index: usize) -> Option<f64> {
        self.mapper().index_to_time(index)
    }

    fn region(&self, index: usize) -> Option<TimeRegion> {
        self.mapper().region(index)
    }

    fn time_to_indices(&self, time: f64) -> Vec<usize> {
        self.mapper().time_to_indices(time)
    }

    fn total_time(&self) -> f64 {
        self.mapper().total_time()
    }

    fn is_anchor(&self, index: usize) -> bool {
        self.mapper().is_anchor(index)
    }
}
