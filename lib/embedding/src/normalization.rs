use linkvec_core::Vector;
use serde::{Deserialize, Serialize};

/// How a space rescales its vectors after embedding or aggregation.
/// Negative-filter components are never rescaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    /// Unit length over the regular components.
    L2,
    /// Divide by a fixed value.
    Constant { value: f32 },
}

impl Normalization {
    #[must_use]
    pub fn apply(&self, vector: &Vector) -> Vector {
        match self {
            Normalization::None => vector.clone(),
            Normalization::L2 => vector.normalized(),
            Normalization::Constant { value } => vector.normalized_by(*value),
        }
    }
}
