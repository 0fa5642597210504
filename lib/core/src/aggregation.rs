//! Vector and scalar aggregation
//!
//! ## Overview
//!
//! Weighted vectors are summed component-wise over their regular components.
//! Negative-filter components never take part in the sum; an output slot
//! stays a negative filter only when every contributor flags it, and
//! contributors must agree on the sentinel value stored there.
//!
//! Concatenation joins the per-space vectors of one entity into the index
//! vector, scaling each segment by its space weight.

use crate::error::{Error, Result};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Weight marking an item that must not influence an aggregate.
pub const NOT_AFFECTING_WEIGHT: f32 = 0.0;

/// Absolute tolerance under which a summed component counts as neutral.
pub const NEUTRAL_EPSILON: f32 = 1e-6;

/// Sum weighted vectors with negative-filter reconciliation.
///
/// Items weighted with [`NOT_AFFECTING_WEIGHT`] and empty vectors are
/// skipped. Returns an empty vector when nothing remains.
pub fn aggregate_weighted<'a>(
    items: impl IntoIterator<Item = (&'a Vector, f32)>,
) -> Result<Vector> {
    let items: Vec<(&Vector, f32)> = items
        .into_iter()
        .filter(|(vector, weight)| *weight != NOT_AFFECTING_WEIGHT && !vector.is_empty())
        .collect();

    match items.as_slice() {
        [] => return Ok(Vector::empty()),
        [(vector, weight)] => return Ok(*vector * *weight),
        _ => {}
    }

    let dim = items[0].0.dim();
    if let Some((vector, _)) = items.iter().find(|(v, _)| v.dim() != dim) {
        return Err(Error::InvalidDimension {
            expected: dim,
            actual: vector.dim(),
        });
    }

    let mut values = vec![0.0f32; dim];
    for (vector, weight) in &items {
        for (slot, value) in values.iter_mut().zip(vector.masked_values()) {
            *slot += value * weight;
        }
    }

    let mut negative_filter_indices = Vec::new();
    for index in 0..dim {
        let mut sentinel: Option<f32> = None;
        let mut flagged = 0usize;
        for (vector, _) in &items {
            if !vector.is_negative_filter(index) {
                continue;
            }
            flagged += 1;
            let value = vector.as_slice()[index];
            match sentinel {
                Some(first) if first != value => {
                    return Err(Error::NegativeFilterConflict {
                        index,
                        first,
                        second: value,
                    })
                }
                _ => sentinel = Some(value),
            }
        }
        if let Some(value) = sentinel {
            if flagged == items.len() && values[index].abs() <= NEUTRAL_EPSILON {
                values[index] = value;
                negative_filter_indices.push(index);
            }
        }
    }

    Vector::with_negative_filter(values, negative_filter_indices)
}

/// Scalar aggregation used for spaces aggregated in value space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NumberAggregation {
    #[default]
    Avg,
    Min,
    Max,
}

impl NumberAggregation {
    /// Aggregate weighted values. An empty input is an error.
    pub fn aggregate(&self, items: &[(f64, f32)]) -> Result<f64> {
        if items.is_empty() {
            return Err(Error::InvalidInput(
                "cannot aggregate an empty list of numbers".into(),
            ));
        }
        let values = items.iter().map(|(v, _)| *v);
        Ok(match self {
            NumberAggregation::Min => values.fold(f64::INFINITY, f64::min),
            NumberAggregation::Max => values.fold(f64::NEG_INFINITY, f64::max),
            NumberAggregation::Avg => {
                let weight_sum: f64 = items.iter().map(|(_, w)| f64::from(*w)).sum();
                if weight_sum.abs() <= f64::EPSILON {
                    values.sum::<f64>() / items.len() as f64
                } else {
                    items
                        .iter()
                        .map(|(v, w)| v * f64::from(*w))
                        .sum::<f64>()
                        / weight_sum
                }
            }
        })
    }
}

/// Concatenate per-space segments, each scaled by its weight.
///
/// With `normalize` the result is divided by the constant `sqrt(Σw²)`,
/// so a zero segment leaves the scale of the others untouched. Query
/// vectors pass `false`.
#[must_use]
pub fn concatenate_weighted(parts: &[(&Vector, f32)], normalize: bool) -> Vector {
    let weighted: Vec<Vector> = parts.iter().map(|(v, w)| *v * *w).collect();
    let joined = Vector::concatenate(weighted.iter());
    if normalize {
        joined.normalized_by(weight_norm(parts.iter().map(|(_, w)| *w)))
    } else {
        joined
    }
}

/// `sqrt(Σw²)`, or `1` when every weight is zero.
#[must_use]
pub fn weight_norm(weights: impl IntoIterator<Item = f32>) -> f32 {
    let norm = weights.into_iter().map(|w| w * w).sum::<f32>().sqrt();
    if norm == 0.0 {
        1.0
    } else {
        norm
    }
}

/// Split a concatenation into its segments, apply new weights and join
/// them again without normalizing.
pub fn reweight(vector: &Vector, lengths: &[usize], weights: &[f32]) -> Result<Vector> {
    if lengths.len() != weights.len() {
        return Err(Error::InvalidInput(format!(
            "{} segment lengths but {} weights",
            lengths.len(),
            weights.len()
        )));
    }
    let segments = vector.split(lengths)?;
    let parts: Vec<(&Vector, f32)> = segments.iter().zip(weights.iter().copied()).collect();
    Ok(concatenate_weighted(&parts, false))
}
