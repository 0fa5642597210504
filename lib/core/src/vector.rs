use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Mul;

/// A dense vector with a set of negative-filter component indices.
///
/// Negative-filter components carry sentinel values that repel non-matching
/// entities in similarity scoring. Scaling and normalization leave them
/// untouched and aggregation reconciles them separately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Vector {
    data: Vec<f32>,
    negative_filter_indices: BTreeSet<usize>,
}

impl Vector {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data,
            negative_filter_indices: BTreeSet::new(),
        }
    }

    /// Create a vector with negative-filter indices, rejecting out of range ones.
    pub fn with_negative_filter(
        data: Vec<f32>,
        negative_filter_indices: impl IntoIterator<Item = usize>,
    ) -> Result<Self> {
        let negative_filter_indices: BTreeSet<usize> =
            negative_filter_indices.into_iter().collect();
        if let Some(&index) = negative_filter_indices.iter().next_back() {
            if index >= data.len() {
                return Err(Error::InvalidInput(format!(
                    "negative filter index {} out of range for vector of length {}",
                    index,
                    data.len()
                )));
            }
        }
        Ok(Self {
            data,
            negative_filter_indices,
        })
    }

    #[inline]
    #[must_use]
    pub fn zeros(dim: usize) -> Self {
        Self::new(vec![0.0; dim])
    }

    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    #[must_use]
    pub fn negative_filter_indices(&self) -> &BTreeSet<usize> {
        &self.negative_filter_indices
    }

    #[inline]
    #[must_use]
    pub fn is_negative_filter(&self, index: usize) -> bool {
        self.negative_filter_indices.contains(&index)
    }

    /// Components with negative-filter slots replaced by zero.
    #[must_use]
    pub fn masked_values(&self) -> Vec<f32> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| if self.is_negative_filter(i) { 0.0 } else { *v })
            .collect()
    }

    /// L2 norm over the regular components.
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.masked_values().iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Dot product over all components, negative-filter slots included.
    #[inline]
    #[must_use]
    pub fn dot(&self, other: &Vector) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Divide the regular components by `denominator`; zero leaves the vector as is.
    #[must_use]
    pub fn normalized_by(&self, denominator: f32) -> Self {
        if denominator.abs() <= f32::EPSILON {
            return self.clone();
        }
        self * (1.0 / denominator)
    }

    /// Unit-length copy, computed over the regular components.
    #[inline]
    #[must_use]
    pub fn normalized(&self) -> Self {
        self.normalized_by(self.norm())
    }

    /// Replace the raw values, keeping the negative-filter indices.
    pub fn with_values(&self, data: Vec<f32>) -> Result<Self> {
        Self::with_negative_filter(data, self.negative_filter_indices.iter().copied())
    }

    /// Concatenate vectors end to end, shifting negative-filter indices.
    #[must_use]
    pub fn concatenate<'a>(vectors: impl IntoIterator<Item = &'a Vector>) -> Self {
        let mut data = Vec::new();
        let mut negative_filter_indices = BTreeSet::new();
        for vector in vectors {
            let offset = data.len();
            negative_filter_indices.extend(vector.negative_filter_indices.iter().map(|i| i + offset));
            data.extend_from_slice(&vector.data);
        }
        Self {
            data,
            negative_filter_indices,
        }
    }

    /// Split into consecutive segments of the given lengths.
    pub fn split(&self, lengths: &[usize]) -> Result<Vec<Vector>> {
        let total: usize = lengths.iter().sum();
        if total != self.dim() {
            return Err(Error::InvalidDimension {
                expected: total,
                actual: self.dim(),
            });
        }
        let mut offset = 0;
        let mut parts = Vec::with_capacity(lengths.len());
        for &length in lengths {
            let end = offset + length;
            let indices = self
                .negative_filter_indices
                .range(offset..end)
                .map(|i| i - offset);
            parts.push(Self::with_negative_filter(
                self.data[offset..end].to_vec(),
                indices,
            )?);
            offset = end;
        }
        Ok(parts)
    }
}

impl Mul<f32> for &Vector {
    type Output = Vector;

    fn mul(self, scalar: f32) -> Vector {
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(i, x)| {
                if self.negative_filter_indices.contains(&i) {
                    *x
                } else {
                    x * scalar
                }
            })
            .collect();
        Vector {
            data,
            negative_filter_indices: self.negative_filter_indices.clone(),
        }
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_includes_negative_filter_slots() {
        let a = Vector::with_negative_filter(vec![1.0, 0.0, -1.0], [2]).unwrap();
        let b = Vector::new(vec![1.0, 0.0, 1.0]);
        assert!(a.dot(&b).abs() < 1e-6);
        assert_eq!(a.dot(&Vector::new(vec![1.0])), 0.0);
    }

    #[test]
    fn test_scaling_skips_negative_filter() {
        let v = Vector::with_negative_filter(vec![1.0, 2.0, -5.0], [2]).unwrap();
        let scaled = &v * 2.0;
        assert_eq!(scaled.as_slice(), &[2.0, 4.0, -5.0]);
        assert!(scaled.is_negative_filter(2));
    }

    #[test]
    fn test_norm_ignores_negative_filter() {
        let v = Vector::with_negative_filter(vec![3.0, 4.0, -10.0], [2]).unwrap();
        assert!((v.norm() - 5.0).abs() < 1e-6);
        let n = v.normalized();
        assert!((n.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((n.as_slice()[2] + 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_concatenate_and_split() {
        let a = Vector::with_negative_filter(vec![1.0, 0.0, -1.0], [2]).unwrap();
        let b = Vector::with_negative_filter(vec![0.5, -1.0], [1]).unwrap();
        let joined = Vector::concatenate([&a, &b]);
        assert_eq!(joined.dim(), 5);
        assert!(joined.is_negative_filter(2));
        assert!(joined.is_negative_filter(4));

        let parts = joined.split(&[3, 2]).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
        assert!(joined.split(&[3, 3]).is_err());
    }

    #[test]
    fn test_out_of_range_negative_filter_rejected() {
        assert!(Vector::with_negative_filter(vec![1.0], [1]).is_err());
    }
}
