//! The selection facade: which attentions to draw for the current view.
//!
//! The view is an explicit [`SelectionState`] (layer, head, target step and
//! the enabled-head mask) rather than ambient session fields, so any state
//! can be replayed against a dataset with [`select`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::RankingConfig;
use crate::dataset::Dataset;
use crate::error::{AttnError, Result};
use crate::ranker::{AttentionSelection, above_cutoff, rank};

/// One head, or every enabled head at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadSelector {
    #[default]
    All,
    Single(usize),
}

impl HeadSelector {
    /// `-1` means all heads.
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            -1 => Some(Self::All),
            h if h >= 0 => Some(Self::Single(h as usize)),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Self::All => -1,
            Self::Single(h) => h as i64,
        }
    }
}

impl fmt::Display for HeadSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Single(h) => write!(f, "{}", h),
        }
    }
}

impl FromStr for HeadSelector {
    type Err = AttnError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<i64>()
            .ok()
            .and_then(Self::from_raw)
            .ok_or_else(|| AttnError::invalid_selection(format!("'{}' is not a head", s)))
    }
}

/// The observable view state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub layer: usize,
    pub head: HeadSelector,
    /// Target step; `None` until something is selected.
    pub step: Option<usize>,
    /// Which heads take part in all-heads mode.
    pub enabled_heads: Vec<bool>,
}

impl SelectionState {
    /// Initial view for a dataset: last layer, all heads, nothing selected.
    pub fn initial(dataset: &Dataset) -> Self {
        Self {
            layer: dataset.num_layers().saturating_sub(1),
            head: HeadSelector::All,
            step: None,
            enabled_heads: vec![true; dataset.num_heads()],
        }
    }

    /// Switch layer. The selected step is kept so layers can be compared.
    pub fn set_layer(&mut self, layer: usize) {
        self.layer = layer;
    }

    /// Switch head. The selected step is kept.
    pub fn set_head(&mut self, head: HeadSelector) {
        self.head = head;
    }

    pub fn set_step(&mut self, step: usize) {
        self.step = Some(step);
    }

    /// Set the step from its raw form, where `-1` clears the selection.
    pub fn set_raw_step(&mut self, raw: i64) {
        self.step = usize::try_from(raw).ok();
    }

    pub fn raw_step(&self) -> i64 {
        self.step.map_or(-1, |s| s as i64)
    }

    /// Clear the selected step. The only way back to the initial no-selection state.
    pub fn reset(&mut self) {
        self.step = None;
    }

    /// Toggle a head in the all-heads mask. Heads outside the mask are ignored.
    pub fn set_head_enabled(&mut self, head: usize, enabled: bool) {
        if let Some(slot) = self.enabled_heads.get_mut(head) {
            *slot = enabled;
        }
    }
}

fn check_bounds(dataset: &Dataset, state: &SelectionState) -> Result<()> {
    if state.layer >= dataset.num_layers() {
        return Err(AttnError::invalid_selection(format!(
            "layer {} out of range (dataset has {})",
            state.layer,
            dataset.num_layers()
        )));
    }
    if let HeadSelector::Single(h) = state.head {
        if h >= dataset.num_heads() {
            return Err(AttnError::invalid_selection(format!(
                "head {} out of range (dataset has {})",
                h,
                dataset.num_heads()
            )));
        }
    }
    if let Some(step) = state.step {
        if step >= dataset.sequence_length() {
            return Err(AttnError::invalid_selection(format!(
                "step {} out of range (sequence length {})",
                step,
                dataset.sequence_length()
            )));
        }
    }
    Ok(())
}

/// The ordered attentions to draw for `state`.
///
/// Empty when no step is selected, when the step is the first one (nothing
/// precedes it) or when the step is not drawn by the timeline. Dual datasets
/// yield global selections first and local selections after them.
pub fn select(
    dataset: &Dataset,
    state: &SelectionState,
    config: &RankingConfig,
) -> Result<Vec<AttentionSelection>> {
    check_bounds(dataset, state)?;

    let target = match state.step {
        Some(step) if step > 0 && dataset.is_anchor(step) => step,
        _ => return Ok(Vec::new()),
    };
    let is_anchor = |s: usize| dataset.is_anchor(s);

    let mut selections = Vec::new();
    for (source, tensor) in dataset.attention.sources() {
        let Some(layer) = tensor.layer(state.layer) else {
            continue;
        };
        match state.head {
            HeadSelector::All => {
                selections.extend(rank(
                    source,
                    layer,
                    target,
                    &state.enabled_heads,
                    config,
                    is_anchor,
                ));
            }
            HeadSelector::Single(h) => {
                if let Some(head) = layer.heads.get(h) {
                    selections.extend(above_cutoff(
                        source,
                        h,
                        head,
                        target,
                        config.cutoff,
                        is_anchor,
                    ));
                }
            }
        }
    }

    tracing::trace!(
        layer = state.layer,
        head = %state.head,
        step = target,
        count = selections.len(),
        "Selected attentions"
    );
    Ok(selections)
}
