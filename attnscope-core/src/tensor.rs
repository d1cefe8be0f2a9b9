//! The layered attention-weight model and the walker that builds it from JSON.
//!
//! Documents nest weights as `layer -> [batch] -> head -> step -> row`, where
//! the batch axis always has a single entry. Rows are either dense arrays or
//! sparse objects (see [`crate::sparse`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AttnError, Result};
use crate::sparse::{expand, sparse_row_from_json};

/// One head's weight matrix: `rows[target][source]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub rows: Vec<Vec<f32>>,
}

impl Head {
    /// The weights `target` pays to every source step.
    pub fn row(&self, target: usize) -> Option<&[f32]> {
        self.rows.get(target).map(Vec::as_slice)
    }
}

/// All heads of one transformer block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub heads: Vec<Head>,
}

/// Layers x heads x steps x steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightTensor {
    pub layers: Vec<Layer>,
}

impl WeightTensor {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn num_heads(&self) -> usize {
        self.layers.first().map_or(0, |l| l.heads.len())
    }

    pub fn sequence_length(&self) -> usize {
        self.layers
            .first()
            .and_then(|l| l.heads.first())
            .map_or(0, |h| h.rows.len())
    }

    pub fn layer(&self, layer: usize) -> Option<&Layer> {
        self.layers.get(layer)
    }

    pub fn row(&self, layer: usize, head: usize, target: usize) -> Option<&[f32]> {
        self.layers.get(layer)?.heads.get(head)?.row(target)
    }

    /// Check the shape invariants: square heads, equal head counts, equal lengths.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(AttnError::malformed("attention weights contain no layers"));
        }
        let num_heads = self.num_heads();
        let len = self.sequence_length();
        if num_heads == 0 {
            return Err(AttnError::malformed("layer 0 contains no heads"));
        }
        for (l, layer) in self.layers.iter().enumerate() {
            if layer.heads.len() != num_heads {
                return Err(AttnError::malformed(format!(
                    "layer {} has {} heads, expected {}",
                    l,
                    layer.heads.len(),
                    num_heads
                )));
            }
            for (h, head) in layer.heads.iter().enumerate() {
                if head.rows.len() != len {
                    return Err(AttnError::malformed(format!(
                        "layer {} head {} has {} rows, expected {}",
                        l,
                        h,
                        head.rows.len(),
                        len
                    )));
                }
                if let Some(s) = head.rows.iter().position(|r| r.len() != len) {
                    return Err(AttnError::malformed(format!(
                        "layer {} head {} step {} has {} weights, expected {}",
                        l,
                        h,
                        s,
                        head.rows[s].len(),
                        len
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Build a tensor from the JSON value stored under `field`.
///
/// With `sparse` set, every row is an object and is expanded to the
/// sequence length (the number of rows in each head).
pub fn parse_weights(value: &Value, field: &str, sparse: bool) -> Result<WeightTensor> {
    let layers = value
        .as_array()
        .ok_or_else(|| AttnError::malformed(format!("'{}' is not an array of layers", field)))?;

    let mut tensor = WeightTensor {
        layers: Vec::with_capacity(layers.len()),
    };
    for (l, layer) in layers.iter().enumerate() {
        let heads = layer
            .as_array()
            .and_then(|batch| batch.first())
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AttnError::malformed(format!("{}[{}][0] is not an array of heads", field, l))
            })?;

        let mut parsed = Layer {
            heads: Vec::with_capacity(heads.len()),
        };
        for (h, head) in heads.iter().enumerate() {
            let rows = head.as_array().ok_or_else(|| {
                AttnError::malformed(format!("{}[{}][0][{}] is not an array of rows", field, l, h))
            })?;
            let rows = rows
                .iter()
                .enumerate()
                .map(|(s, row)| parse_row(row, sparse, rows.len(), field, (l, h, s)))
                .collect::<Result<Vec<_>>>()?;
            parsed.heads.push(Head { rows });
        }
        tensor.layers.push(parsed);
    }

    tensor.validate()?;
    Ok(tensor)
}

fn parse_row(
    row: &Value,
    sparse: bool,
    len: usize,
    field: &str,
    (l, h, s): (usize, usize, usize),
) -> Result<Vec<f32>> {
    if sparse {
        let object = row.as_object().ok_or_else(|| {
            AttnError::malformed(format!(
                "{}[{}][0][{}][{}] is not a sparse row object",
                field, l, h, s
            ))
        })?;
        return expand(&sparse_row_from_json(object)?, len);
    }

    let values = row.as_array().ok_or_else(|| {
        AttnError::malformed(format!("{}[{}][0][{}][{}] is not an array", field, l, h, s))
    })?;
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                AttnError::malformed(format!(
                    "{}[{}][0][{}][{}] contains a non-numeric weight",
                    field, l, h, s
                ))
            })
        })
        .collect()
}
