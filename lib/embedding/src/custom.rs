//! Caller-supplied vectors
//!
//! A custom space takes vectors computed outside the engine. They only have
//! to match the declared length; they are L2-normalized like model output.

use linkvec_core::{Error, Result, Vector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEmbedding {
    length: usize,
}

impl CustomEmbedding {
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(Error::InvalidConfig("custom vector length must be positive".into()));
        }
        Ok(Self { length })
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn embed(&self, values: &[f64]) -> Result<Vector> {
        if values.len() != self.length {
            return Err(Error::InvalidDimension {
                expected: self.length,
                actual: values.len(),
            });
        }
        Ok(Vector::new(values.iter().map(|v| *v as f32).collect()).normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_normalizes() {
        let custom = CustomEmbedding::new(2).unwrap();
        let vector = custom.embed(&[3.0, 4.0]).unwrap();
        assert_eq!(vector.as_slice(), &[0.6, 0.8]);
        assert_eq!(custom.embed(&[0.0, 0.0]).unwrap().as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_length_is_checked() {
        let custom = CustomEmbedding::new(3).unwrap();
        assert!(matches!(
            custom.embed(&[1.0, 2.0]),
            Err(Error::InvalidDimension { expected: 3, actual: 2 })
        ));
        assert!(CustomEmbedding::new(0).is_err());
    }
}
