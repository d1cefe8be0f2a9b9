//! A single viewing session: the active dataset, the view state and the
//! load bookkeeping around them.

use std::fmt;

use crate::config::AttnConfig;
use crate::dataset::Dataset;
use crate::error::{AttnError, Result};
use crate::ranker::AttentionSelection;
use crate::selection::{HeadSelector, SelectionState, select};

/// Tag for one load request. Only the most recent ticket may install a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadTicket(u64);

impl LoadTicket {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoadTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the session is in its load cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Empty,
    Loading,
    Ready,
    Failed(String),
}

/// What happened to a completed load.
#[derive(Debug)]
pub enum LoadOutcome {
    Applied,
    /// A newer load was started; the result was dropped.
    Stale,
    /// The load failed; any previous dataset is still active.
    Failed(AttnError),
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub struct Session {
    config: AttnConfig,
    dataset: Option<Dataset>,
    state: Option<SelectionState>,
    status: LoadStatus,
    next_ticket: u64,
    latest: Option<LoadTicket>,
}

impl Session {
    pub fn new(config: AttnConfig) -> Self {
        Self {
            config,
            dataset: None,
            state: None,
            status: LoadStatus::Empty,
            next_ticket: 0,
            latest: None,
        }
    }

    pub fn config(&self) -> &AttnConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AttnConfig {
        &mut self.config
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn state(&self) -> Option<&SelectionState> {
        self.state.as_ref()
    }

    /// Start a load. Any load started earlier becomes stale.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.latest = Some(ticket);
        self.status = LoadStatus::Loading;
        tracing::debug!(ticket = ticket.id(), "Load started");
        ticket
    }

    /// Finish the load tagged `ticket`.
    pub fn complete_load(&mut self, ticket: LoadTicket, result: Result<Dataset>) -> LoadOutcome {
        if self.latest != Some(ticket) {
            tracing::debug!(
                ticket = ticket.id(),
                latest = self.latest.map(|t| t.id()),
                "Discarding result of a superseded load"
            );
            return LoadOutcome::Stale;
        }

        match result {
            Ok(dataset) => {
                tracing::info!(
                    ticket = ticket.id(),
                    kind = %dataset.kind,
                    layers = dataset.num_layers(),
                    heads = dataset.num_heads(),
                    sequence_length = dataset.sequence_length(),
                    "Dataset loaded"
                );
                self.state = Some(SelectionState::initial(&dataset));
                self.dataset = Some(dataset);
                self.status = LoadStatus::Ready;
                LoadOutcome::Applied
            }
            Err(e) => {
                tracing::warn!(ticket = ticket.id(), error = %e, "Load failed");
                self.status = LoadStatus::Failed(e.to_string());
                LoadOutcome::Failed(e)
            }
        }
    }

    /// Install a dataset directly.
    pub fn install(&mut self, dataset: Dataset) -> LoadOutcome {
        let ticket = self.begin_load();
        self.complete_load(ticket, Ok(dataset))
    }

    fn loaded(&self) -> Result<(&Dataset, &SelectionState)> {
        match (&self.dataset, &self.state) {
            (Some(d), Some(s)) => Ok((d, s)),
            _ => Err(AttnError::NotLoaded),
        }
    }

    fn loaded_mut(&mut self) -> Result<(&Dataset, &mut SelectionState)> {
        match (&self.dataset, &mut self.state) {
            (Some(d), Some(s)) => Ok((d, s)),
            _ => Err(AttnError::NotLoaded),
        }
    }

    /// Attentions to draw for the current view.
    pub fn select(&self) -> Result<Vec<AttentionSelection>> {
        let (dataset, state) = self.loaded()?;
        select(dataset, state, &self.config.ranking)
    }

    pub fn set_layer(&mut self, layer: usize) -> Result<()> {
        let (dataset, state) = self.loaded_mut()?;
        if layer >= dataset.num_layers() {
            return Err(AttnError::invalid_selection(format!(
                "layer {} out of range (dataset has {})",
                layer,
                dataset.num_layers()
            )));
        }
        state.set_layer(layer);
        Ok(())
    }

    pub fn set_head(&mut self, head: HeadSelector) -> Result<()> {
        let (dataset, state) = self.loaded_mut()?;
        if let HeadSelector::Single(h) = head {
            if h >= dataset.num_heads() {
                return Err(AttnError::invalid_selection(format!(
                    "head {} out of range (dataset has {})",
                    h,
                    dataset.num_heads()
                )));
            }
        }
        state.set_head(head);
        Ok(())
    }

    /// Move the head by `delta`, where one step below head 0 is "all heads".
    pub fn set_head_relative(&mut self, delta: i64) -> Result<HeadSelector> {
        let (dataset, state) = self.loaded_mut()?;
        let max = dataset.num_heads() as i64 - 1;
        // Once on a single head, stepping down stops at head 0.
        let min = match state.head {
            HeadSelector::All => -1,
            HeadSelector::Single(_) => 0,
        };
        let raw = state.head.to_raw().saturating_add(delta).clamp(min, max.max(min));
        let head = HeadSelector::from_raw(raw).unwrap_or_default();
        state.set_head(head);
        Ok(head)
    }

    pub fn set_step(&mut self, step: usize) -> Result<()> {
        let (dataset, state) = self.loaded_mut()?;
        if step >= dataset.sequence_length() {
            return Err(AttnError::invalid_selection(format!(
                "step {} out of range (sequence length {})",
                step,
                dataset.sequence_length()
            )));
        }
        state.set_step(step);
        Ok(())
    }

    pub fn set_head_enabled(&mut self, head: usize, enabled: bool) -> Result<()> {
        let (dataset, state) = self.loaded_mut()?;
        if head >= dataset.num_heads() {
            return Err(AttnError::invalid_selection(format!(
                "head {} out of range (dataset has {})",
                head,
                dataset.num_heads()
            )));
        }
        state.set_head_enabled(head, enabled);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        let (_, state) = self.loaded_mut()?;
        state.reset();
        Ok(())
    }

    /// Move to the next step that draws something. Stays put at the end.
    pub fn step_forward(&mut self) -> Result<Option<usize>> {
        let (dataset, state) = self.loaded_mut()?;
        let start = state.step.map_or(0, |s| s + 1);
        let next = (start..dataset.sequence_length()).find(|&s| paintable(dataset, state, s));
        if let Some(step) = next {
            state.set_step(step);
        }
        Ok(next)
    }

    /// Move to the previous step that draws something. Stays put at the start.
    pub fn step_backward(&mut self) -> Result<Option<usize>> {
        let (dataset, state) = self.loaded_mut()?;
        let Some(current) = state.step else {
            return Ok(None);
        };
        let previous = (0..current).rev().find(|&s| paintable(dataset, state, s));
        if let Some(step) = previous {
            state.set_step(step);
        }
        Ok(previous)
    }

    /// Clear the step so playback starts from the beginning.
    pub fn begin_playback(&mut self) -> Result<()> {
        self.reset()
    }

    /// Advance playback one step and return what to draw, or `None` at the end.
    pub fn tick(&mut self) -> Result<Option<(usize, Vec<AttentionSelection>)>> {
        match self.step_forward()? {
            Some(step) => Ok(Some((step, self.select()?))),
            None => Ok(None),
        }
    }
}

/// Step 0 attends to nothing before it, so it is only worth showing for a single head.
fn paintable(dataset: &Dataset, state: &SelectionState, step: usize) -> bool {
    let has_predecessors = step > 0 || matches!(state.head, HeadSelector::Single(_));
    has_predecessors && dataset.is_anchor(step)
}
