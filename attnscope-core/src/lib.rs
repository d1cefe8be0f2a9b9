//! # attnscope-core — Attention Weights over Symbolic Music
//!
//! This crate turns the attention weights of a music transformer into the
//! ordered list of attentions to draw for a chosen layer, head and step.
//! It covers the three supported documents: four-voice chorales, dual-source
//! chorales and event-based piano performances.
//!
//! ## Pipeline
//!
//! 1. **Load** — fetch a JSON document from disk or HTTP and detect its kind
//! 2. **Parse** — expand sparse rows, scale every row to [0, 1], align dual sources
//! 3. **Map** — give every sequence index a place on the time axis
//! 4. **Select** — rank the weights for the current view (cutoff or top-K)

// Foundation
pub mod config;
pub mod error;

// Weights
pub mod dual;
pub mod normalize;
pub mod sparse;
pub mod tensor;

// Music and time
pub mod events;
pub mod sequence;
pub mod timeline;

// Datasets and selection
pub mod dataset;
pub mod loader;
pub mod ranker;
pub mod selection;
pub mod session;

// Re-exports
pub use config::{AttnConfig, LayoutConfig, PerformanceConfig, PlaybackConfig, RankingConfig};
pub use dataset::{Attention, DataKind, Dataset, Music};
pub use dual::{AttentionSource, DualAttentionBundle};
pub use error::{AttnError, Result};
pub use events::MusicEvent;
pub use loader::LoadSource;
pub use ranker::AttentionSelection;
pub use selection::{HeadSelector, SelectionState, select};
pub use sequence::NoteSequence;
pub use session::{LoadOutcome, LoadStatus, LoadTicket, Session};
pub use timeline::{EventStreamMapper, FixedGridMapper, NoteSpan, TimeMapper, TimeRegion, Timeline};
