//! Multi-period recency embedding
//!
//! ## Overview
//!
//! Every `(period, weight)` bucket covers the window that ends at the next
//! midnight (shifted by `hour_offset`) and starts `period` earlier. A
//! timestamp inside the window becomes a point on a quarter circle:
//!
//! ```text
//! n = (ts - start) / (end - start)        (x, y) = (cos nπ/2, sin nπ/2) · weight
//! ```
//!
//! so fresh timestamps sit near `(0, w)` and timestamps about to leave the
//! window near `(w, 0)`. Timestamps outside a bucket's window give `(0, 0)`.
//!
//! One trailing component follows the largest period. It is `1` for query
//! vectors, `negative_filter` for timestamps older than the largest window,
//! and `0` otherwise. The whole vector is divided by `sqrt(Σ weight²)`.

use chrono::{DateTime, Duration, Utc};
use linkvec_core::{Error, ExecutionContext, Result, Vector};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

const SECONDS_PER_DAY: i64 = 86_400;
const QUERY_FLAG: f32 = 1.0;

/// One recency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodTime {
    pub period_secs: i64,
    #[serde(default = "default_period_weight")]
    pub weight: f32,
}

fn default_period_weight() -> f32 {
    1.0
}

impl PeriodTime {
    #[must_use]
    pub fn new(period: Duration, weight: f32) -> Self {
        Self {
            period_secs: period.num_seconds(),
            weight,
        }
    }

    #[must_use]
    pub fn days(days: i64) -> Self {
        Self::new(Duration::days(days), 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyEmbeddingConfig {
    pub periods: Vec<PeriodTime>,
    #[serde(default)]
    pub negative_filter: f32,
    #[serde(default)]
    pub hour_offset_secs: i64,
}

impl RecencyEmbeddingConfig {
    pub fn new(mut periods: Vec<PeriodTime>) -> Result<Self> {
        periods.sort_by_key(|p| p.period_secs);
        let config = Self {
            periods,
            negative_filter: 0.0,
            hour_offset_secs: 0,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_negative_filter(mut self, negative_filter: f32) -> Result<Self> {
        self.negative_filter = negative_filter;
        self.validate()?;
        Ok(self)
    }

    pub fn with_hour_offset(mut self, offset: Duration) -> Result<Self> {
        self.hour_offset_secs = offset.num_seconds();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.periods.is_empty() {
            return Err(Error::InvalidConfig("recency space needs at least one period".into()));
        }
        if let Some(period) = self.periods.iter().find(|p| p.period_secs <= 0) {
            return Err(Error::InvalidConfig(format!(
                "recency period must be positive, got {}s",
                period.period_secs
            )));
        }
        if !(0..SECONDS_PER_DAY).contains(&self.hour_offset_secs) {
            return Err(Error::InvalidConfig(
                "recency hour offset must be within one day".into(),
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyEmbedding {
    config: RecencyEmbeddingConfig,
}

impl RecencyEmbedding {
    pub fn new(mut config: RecencyEmbeddingConfig) -> Result<Self> {
        config.periods.sort_by_key(|p| p.period_secs);
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RecencyEmbeddingConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.config.periods.len() * 2 + 1
    }

    /// Joint normalization factor `sqrt(Σ weight²)`.
    #[must_use]
    pub fn norm_factor(&self) -> f32 {
        let sum: f32 = self.config.periods.iter().map(|p| p.weight * p.weight).sum();
        if sum > 0.0 {
            sum.sqrt()
        } else {
            1.0
        }
    }

    #[must_use]
    pub fn default_vector(&self) -> Vector {
        self.with_flag(vec![0.0; self.length()])
    }

    /// Embed a creation timestamp relative to `context.now()`.
    #[must_use]
    pub fn embed(&self, created_at: i64, context: &ExecutionContext) -> Vector {
        let end = self.window_end(context.now());
        let mut data = Vec::with_capacity(self.length());
        for period in &self.config.periods {
            let start = end - period.period_secs;
            if (start..=end).contains(&created_at) {
                let angle = (created_at - start) as f64 / (end - start) as f64 * FRAC_PI_2;
                data.push(angle.cos() as f32 * period.weight);
                data.push(angle.sin() as f32 * period.weight);
            } else {
                data.extend([0.0, 0.0]);
            }
        }

        let oldest_start = self
            .config
            .periods
            .last()
            .map_or(end, |p| end - p.period_secs);
        let flag = if context.is_query() {
            QUERY_FLAG
        } else if created_at < oldest_start {
            self.config.negative_filter
        } else {
            0.0
        };
        data.push(flag);
        self.with_flag(data).normalized_by(self.norm_factor())
    }

    /// Timestamp encoded in the largest period bucket. Values outside that
    /// window come back one second before its start.
    pub fn inverse_embed(&self, vector: &Vector, context: &ExecutionContext) -> Result<i64> {
        if vector.dim() != self.length() {
            return Err(Error::InvalidDimension {
                expected: self.length(),
                actual: vector.dim(),
            });
        }
        let values = vector.as_slice();
        let (x, y) = (
            f64::from(values[values.len() - 3]),
            f64::from(values[values.len() - 2]),
        );
        let end = self.window_end(context.now());
        let start = self
            .config
            .periods
            .last()
            .map_or(end, |p| end - p.period_secs);
        if x == 0.0 && y == 0.0 {
            return Ok(start - 1);
        }
        let fraction = y.atan2(x) / FRAC_PI_2;
        Ok(start + (fraction * (end - start) as f64).round() as i64)
    }

    fn window_end(&self, now: i64) -> i64 {
        let next_midnight = DateTime::<Utc>::from_timestamp(now, 0)
            .and_then(|t| t.date_naive().and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc().timestamp() + SECONDS_PER_DAY)
            .unwrap_or_else(|| now - now.rem_euclid(SECONDS_PER_DAY) + SECONDS_PER_DAY);
        next_midnight + self.config.hour_offset_secs
    }

    fn with_flag(&self, data: Vec<f32>) -> Vector {
        let flag_index = data.len().saturating_sub(1);
        Vector::with_negative_filter(data.clone(), [flag_index]).unwrap_or_else(|_| Vector::new(data))
    }
}
