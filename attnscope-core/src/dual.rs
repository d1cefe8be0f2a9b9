//! Combining local and global attention sources.
//!
//! The two models behind a dual document may have been trained with a
//! different number of layers. The shorter one is padded by repeating its
//! last layer, which is an approximation kept for compatibility with
//! existing comparisons.

use serde::{Deserialize, Serialize};

use crate::error::{AttnError, Result};
use crate::normalize::scale_tensor;
use crate::tensor::WeightTensor;

/// Which attention source a selection was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionSource {
    /// The only source of a single-attention dataset.
    Primary,
    Local,
    Global,
}

/// Scaled local and global tensors sharing one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DualAttentionBundle {
    pub local: WeightTensor,
    pub global: WeightTensor,
}

impl DualAttentionBundle {
    pub fn num_layers(&self) -> usize {
        self.global.num_layers()
    }

    pub fn num_heads(&self) -> usize {
        self.global.num_heads()
    }

    pub fn sequence_length(&self) -> usize {
        self.global.sequence_length()
    }

    pub fn source(&self, source: AttentionSource) -> Option<&WeightTensor> {
        match source {
            AttentionSource::Local => Some(&self.local),
            AttentionSource::Global => Some(&self.global),
            AttentionSource::Primary => None,
        }
    }
}

/// Append copies of the last layer until `tensor` has `layers` layers.
pub fn pad_layers(tensor: &mut WeightTensor, layers: usize) {
    let Some(last) = tensor.layers.last().cloned() else {
        return;
    };
    while tensor.layers.len() < layers {
        tensor.layers.push(last.clone());
    }
}

/// Align layer counts without scaling.
pub fn align_layers(local: &mut WeightTensor, global: &mut WeightTensor) -> Result<()> {
    if local.sequence_length() != global.sequence_length() {
        return Err(AttnError::SequenceLengthMismatch {
            local: local.sequence_length(),
            global: global.sequence_length(),
        });
    }
    if local.num_heads() != global.num_heads() {
        return Err(AttnError::malformed(format!(
            "local attention has {} heads, global has {}",
            local.num_heads(),
            global.num_heads()
        )));
    }

    let target = local.num_layers().max(global.num_layers());
    let gap = local.num_layers().abs_diff(global.num_layers());
    if gap > 1 {
        tracing::warn!(
            local = local.num_layers(),
            global = global.num_layers(),
            "Attention sources differ by more than one layer; padding with repeated layers"
        );
    } else if gap == 1 {
        tracing::debug!(
            local = local.num_layers(),
            global = global.num_layers(),
            "Padding the shorter attention source with its last layer"
        );
    }
    pad_layers(local, target);
    pad_layers(global, target);
    Ok(())
}

/// Align two raw tensors and scale every row of both.
pub fn align(mut local: WeightTensor, mut global: WeightTensor) -> Result<DualAttentionBundle> {
    align_layers(&mut local, &mut global)?;
    scale_tensor(&mut local);
    scale_tensor(&mut global);
    Ok(DualAttentionBundle { local, global })
}
