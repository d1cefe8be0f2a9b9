//! Ranking of attention weights for a target step.
//!
//! Two modes are supported. Cutoff mode returns, per enabled head, every
//! source step whose row-scaled weight exceeds the cutoff. Top mode pools
//! every enabled head, sorts by weight, re-scales the pooled values and keeps
//! the strongest few. The order of the output is the paint order: later
//! entries are drawn on top.

use serde::{Deserialize, Serialize};

use crate::config::RankingConfig;
use crate::dual::AttentionSource;
use crate::normalize::scale_row;
use crate::tensor::{Head, Layer};

/// One attention to draw, from `step` to the selected target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionSelection {
    pub source: AttentionSource,
    pub head: usize,
    /// Source step the target attends to.
    pub step: usize,
    /// Weight as stored in the (row-scaled) tensor.
    pub value: f32,
    /// Weight re-scaled over the selected subset; equal to `value` in cutoff mode.
    pub scaled_value: f32,
}

fn head_enabled(enabled_heads: &[bool], head: usize) -> bool {
    enabled_heads.get(head).copied().unwrap_or(false)
}

/// Rank the attentions `target` pays across the enabled heads of `layer`.
///
/// `is_anchor` tells which source steps are drawn at all; steps it rejects
/// are never returned and do not count towards `top_n`.
pub fn rank<F>(
    source: AttentionSource,
    layer: &Layer,
    target: usize,
    enabled_heads: &[bool],
    config: &RankingConfig,
    is_anchor: F,
) -> Vec<AttentionSelection>
where
    F: Fn(usize) -> bool,
{
    if target == 0 {
        return Vec::new();
    }
    if config.top_only {
        rank_top(
            source,
            layer,
            target,
            enabled_heads,
            config.epsilon,
            config.top_n,
            is_anchor,
        )
    } else {
        layer
            .heads
            .iter()
            .enumerate()
            .filter(|(h, _)| head_enabled(enabled_heads, *h))
            .flat_map(|(h, head)| {
                above_cutoff(source, h, head, target, config.cutoff, &is_anchor)
            })
            .collect()
    }
}

/// Source steps in `[0, target]` of one head whose weight exceeds `cutoff`.
pub fn above_cutoff<F>(
    source: AttentionSource,
    head_index: usize,
    head: &Head,
    target: usize,
    cutoff: f32,
    is_anchor: F,
) -> Vec<AttentionSelection>
where
    F: Fn(usize) -> bool,
{
    let Some(row) = head.row(target) else {
        return Vec::new();
    };
    row.iter()
        .enumerate()
        .take(target + 1)
        .filter(|&(s, &value)| value > cutoff && is_anchor(s))
        .map(|(s, &value)| AttentionSelection {
            source,
            head: head_index,
            step: s,
            value,
            scaled_value: value,
        })
        .collect()
}

/// The `top_n` strongest attentions to steps before `target` across enabled heads.
pub fn rank_top<F>(
    source: AttentionSource,
    layer: &Layer,
    target: usize,
    enabled_heads: &[bool],
    epsilon: f32,
    top_n: usize,
    is_anchor: F,
) -> Vec<AttentionSelection>
where
    F: Fn(usize) -> bool,
{
    let mut pooled: Vec<(usize, usize, f32)> = Vec::new();
    for (h, head) in layer.heads.iter().enumerate() {
        if !head_enabled(enabled_heads, h) {
            continue;
        }
        let Some(row) = head.row(target) else {
            continue;
        };
        pooled.extend(
            row.iter()
                .enumerate()
                .take(target)
                .filter(|&(_, &v)| v > epsilon)
                .map(|(s, &v)| (h, s, v)),
        );
    }

    // Stable: equal weights keep head-major encounter order.
    pooled.sort_by(|a, b| b.2.total_cmp(&a.2));

    let values: Vec<f32> = pooled.iter().map(|p| p.2).collect();
    let scaled = scale_row(&values);

    pooled
        .into_iter()
        .zip(scaled)
        .filter(|((_, s, _), _)| is_anchor(*s))
        .take(top_n)
        .map(|((head, step, value), scaled_value)| AttentionSelection {
            source,
            head,
            step,
            value,
            scaled_value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(rows_per_head: Vec<Vec<Vec<f32>>>) -> Layer {
        Layer {
            heads: rows_per_head.into_iter().map(|rows| Head { rows }).collect(),
        }
    }

    fn cutoff_config() -> RankingConfig {
        RankingConfig::default()
    }

    fn top_config(top_n: usize) -> RankingConfig {
        RankingConfig {
            top_only: true,
            top_n,
            ..RankingConfig::default()
        }
    }

    fn all(_: usize) -> bool {
        true
    }

    #[test]
    fn test_cutoff_mode_filters_steps_and_heads() {
        let rows = vec![vec![0.0; 3], vec![0.0; 3], vec![0.9, 0.2, 0.6]];
        let l = layer(vec![rows.clone(), rows]);
        let picked = rank(
            AttentionSource::Primary,
            &l,
            2,
            &[true, false],
            &cutoff_config(),
            all,
        );
        let steps: Vec<(usize, usize)> = picked.iter().map(|p| (p.head, p.step)).collect();
        assert_eq!(steps, vec![(0, 0), (0, 2)]);
        assert!(picked.iter().all(|p| p.value == p.scaled_value));
    }

    #[test]
    fn test_top_mode_returns_single_strongest() {
        let l = layer(vec![
            vec![vec![0.0; 3], vec![0.0; 3], vec![0.4, 0.3, 0.0]],
            vec![vec![0.0; 3], vec![0.0; 3], vec![0.2, 0.8, 0.0]],
        ]);
        let picked = rank(
            AttentionSource::Primary,
            &l,
            2,
            &[true, true],
            &top_config(1),
            all,
        );
        assert_eq!(picked.len(), 1);
        assert_eq!((picked[0].head, picked[0].step), (1, 1));
        assert_eq!(picked[0].value, 0.8);
        assert_eq!(picked[0].scaled_value, 1.0);
    }

    #[test]
    fn test_top_mode_rescales_and_orders() {
        let l = layer(vec![
            vec![vec![0.0; 4], vec![0.0; 4], vec![0.0; 4], vec![0.25, 0.75, 0.5, 1.0]],
            vec![vec![0.0; 4], vec![0.0; 4], vec![0.0; 4], vec![0.75, 0.0, 0.0, 1.0]],
        ]);
        let picked = rank(
            AttentionSource::Global,
            &l,
            3,
            &[true, true],
            &top_config(10),
            all,
        );
        let order: Vec<(usize, usize)> = picked.iter().map(|p| (p.head, p.step)).collect();
        // Target column excluded; equal weights keep head order.
        assert_eq!(order, vec![(0, 1), (1, 0), (0, 2), (0, 0)]);
        let scaled: Vec<f32> = picked.iter().map(|p| p.scaled_value).collect();
        assert_eq!(scaled, vec![1.0, 1.0, 0.5, 0.0]);
        assert!(picked.iter().all(|p| p.source == AttentionSource::Global));
    }

    #[test]
    fn test_top_mode_skips_non_anchor_steps_before_truncating() {
        let l = layer(vec![vec![
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.3, 0.9, 0.5, 0.0],
        ]]);
        let picked = rank(
            AttentionSource::Primary,
            &l,
            3,
            &[true],
            &top_config(2),
            |s| s != 1,
        );
        let steps: Vec<usize> = picked.iter().map(|p| p.step).collect();
        assert_eq!(steps, vec![2, 0]);
    }

    #[test]
    fn test_top_mode_epsilon() {
        let l = layer(vec![vec![vec![0.0; 2], vec![0.000001, 0.0]]]);
        assert!(
            rank(
                AttentionSource::Primary,
                &l,
                1,
                &[true],
                &top_config(10),
                all
            )
            .is_empty()
        );
    }

    #[test]
    fn test_target_zero_is_empty() {
        let l = layer(vec![vec![vec![1.0]]]);
        assert!(rank(AttentionSource::Primary, &l, 0, &[true], &cutoff_config(), all).is_empty());
        assert!(rank(AttentionSource::Primary, &l, 0, &[true], &top_config(3), all).is_empty());
    }

    #[test]
    fn test_missing_enabled_flags_disable_heads() {
        let rows = vec![vec![0.0; 2], vec![1.0, 1.0]];
        let l = layer(vec![rows.clone(), rows]);
        let picked = rank(AttentionSource::Primary, &l, 1, &[true], &cutoff_config(), all);
        assert!(picked.iter().all(|p| p.head == 0));
        assert_eq!(picked.len(), 2);
    }
}
