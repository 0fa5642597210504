//! Bounded number embedding
//!
//! A value in `[min, max]` is mapped to an angle on the first quarter of the
//! unit circle:
//!
//! ```text
//! θ = normalized(value) · π/2        vector = [sin θ, cos θ, flag]
//! ```
//!
//! `MAXIMUM` queries use `[1, 0, 1]`, so larger values score higher;
//! `MINIMUM` uses `[0, 1, 1]`. The third component is a negative filter: it
//! is `0` for in-range values and `negative_filter` for values outside the
//! range the mode accepts, which pushes them away from every query.

use linkvec_core::{Error, ExecutionContext, Result, Vector};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

const LOG_BASE: f64 = 10.0;
const VECTOR_LENGTH: usize = 3;
const NEGATIVE_FILTER_INDEX: usize = 2;
/// Fraction of the range used to place inverted out-of-range sentinels.
const OUT_OF_BOUNDS_BIAS: f64 = 1_000.0;
const ROUNDING_DIGITS: i32 = 10;

/// Which end of the range a number space prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberMode {
    /// Closer values are more similar; values outside the range are rejected.
    Similar,
    /// Smaller is better; values above `max` are rejected.
    Minimum,
    /// Larger is better; values below `min` are rejected.
    Maximum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberEmbeddingConfig {
    pub min: f64,
    pub max: f64,
    pub mode: NumberMode,
    #[serde(default)]
    pub log_scale: bool,
    #[serde(default)]
    pub negative_filter: f32,
}

impl NumberEmbeddingConfig {
    /// Validated configuration.
    pub fn new(min: f64, max: f64, mode: NumberMode) -> Result<Self> {
        let config = Self {
            min,
            max,
            mode,
            log_scale: false,
            negative_filter: 0.0,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_log_scale(mut self) -> Result<Self> {
        self.log_scale = true;
        self.validate()?;
        Ok(self)
    }

    pub fn with_negative_filter(mut self, negative_filter: f32) -> Result<Self> {
        self.negative_filter = negative_filter;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::InvalidConfig("number bounds must be finite".into()));
        }
        if self.max <= self.min {
            return Err(Error::InvalidConfig(format!(
                "number space max ({}) must be greater than min ({})",
                self.max, self.min
            )));
        }
        if self.log_scale && (self.min < 0.0 || self.max < 0.0) {
            return Err(Error::InvalidConfig(
                "log scale requires non-negative min and max".into(),
            ));
        }
        if self.negative_filter > 0.0 {
            return Err(Error::InvalidConfig(format!(
                "negative_filter must not be positive, got {}",
                self.negative_filter
            )));
        }
        Ok(())
    }
}

/// Number embedding transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberEmbedding {
    config: NumberEmbeddingConfig,
}

impl NumberEmbedding {
    pub fn new(config: NumberEmbeddingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &NumberEmbeddingConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        VECTOR_LENGTH
    }

    /// Embed a value. In query context, `MINIMUM` and `MAXIMUM` spaces ignore
    /// the value and return their preference vector.
    #[must_use]
    pub fn embed(&self, value: f64, context: &ExecutionContext) -> Vector {
        if context.is_query() && self.config.mode != NumberMode::Similar {
            return self.default_vector();
        }
        if self.is_out_of_bounds(value) {
            return self.sentinel([0.0, 0.0, self.config.negative_filter]);
        }
        let (low, high) = (self.transform(self.config.min), self.transform(self.config.max));
        let clamped = self.transform(value).clamp(low, high);
        let angle = (clamped - low) / (high - low) * FRAC_PI_2;
        self.sentinel([angle.sin() as f32, angle.cos() as f32, 0.0])
    }

    /// Recover the scalar from an embedded vector.
    ///
    /// Out-of-range sentinels come back just outside the accepted range so
    /// ordering is preserved.
    pub fn inverse_embed(&self, vector: &Vector) -> Result<f64> {
        if vector.dim() != VECTOR_LENGTH {
            return Err(Error::InvalidDimension {
                expected: VECTOR_LENGTH,
                actual: vector.dim(),
            });
        }
        let values = vector.as_slice();
        let (sin, cos) = (f64::from(values[0]), f64::from(values[1]));
        if sin == 0.0 && cos == 0.0 && values[NEGATIVE_FILTER_INDEX] == self.config.negative_filter {
            let bias = (self.config.max - self.config.min) / OUT_OF_BOUNDS_BIAS;
            return Ok(match self.config.mode {
                NumberMode::Maximum => self.config.min - bias,
                NumberMode::Minimum | NumberMode::Similar => self.config.max + bias,
            });
        }
        let fraction = sin.atan2(cos) / FRAC_PI_2;
        let (low, high) = (self.transform(self.config.min), self.transform(self.config.max));
        let transformed = low + fraction * (high - low);
        let value = if self.config.log_scale {
            LOG_BASE.powf(transformed) - 1.0
        } else {
            transformed
        };
        Ok(round(value, ROUNDING_DIGITS))
    }

    /// Preference vector of the mode; all zeros for `SIMILAR`.
    #[must_use]
    pub fn default_vector(&self) -> Vector {
        match self.config.mode {
            NumberMode::Similar => self.sentinel([0.0, 0.0, 0.0]),
            NumberMode::Minimum => self.sentinel([0.0, 1.0, 1.0]),
            NumberMode::Maximum => self.sentinel([1.0, 0.0, 1.0]),
        }
    }

    fn is_out_of_bounds(&self, value: f64) -> bool {
        let below = value < self.config.min;
        let above = value > self.config.max;
        match self.config.mode {
            NumberMode::Maximum => below,
            NumberMode::Minimum => above,
            NumberMode::Similar => below || above,
        }
    }

    fn transform(&self, value: f64) -> f64 {
        if self.config.log_scale {
            (1.0 + value).log(LOG_BASE)
        } else {
            value
        }
    }

    fn sentinel(&self, values: [f32; VECTOR_LENGTH]) -> Vector {
        Vector::with_negative_filter(values.to_vec(), [NEGATIVE_FILTER_INDEX])
            .unwrap_or_else(|_| Vector::new(values.to_vec()))
    }
}

fn round(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
