//! Expansion of sparse attention rows.
//!
//! Compressed documents store each row as a JSON object mapping the step
//! index (as a string) to its weight. Absent steps are zero. Rows are
//! expanded here, before normalization, so the zeros take part in min-max.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{AttnError, Result};

/// Step index to weight; absent steps are zero.
pub type SparseRow = BTreeMap<usize, f32>;

/// Expand `sparse` into a dense row of `len` weights.
pub fn expand(sparse: &SparseRow, len: usize) -> Result<Vec<f32>> {
    let mut dense = vec![0.0; len];
    for (&index, &weight) in sparse {
        let slot = dense.get_mut(index).ok_or_else(|| {
            AttnError::malformed(format!(
                "sparse key {} is outside a row of length {}",
                index, len
            ))
        })?;
        *slot = weight;
    }
    Ok(dense)
}

/// Read a sparse row from its JSON object form.
pub fn sparse_row_from_json(object: &Map<String, Value>) -> Result<SparseRow> {
    object
        .iter()
        .map(|(key, value)| {
            let index = key.trim().parse::<usize>().map_err(|_| {
                AttnError::malformed(format!("sparse key '{}' is not a step index", key))
            })?;
            let weight = value.as_f64().ok_or_else(|| {
                AttnError::malformed(format!("sparse value for step {} is not a number", key))
            })?;
            Ok((index, weight as f32))
        })
        .collect()
}
