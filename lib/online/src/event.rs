//! Temporal-decay event aggregation
//!
//! Each event blends the affecting entity's vector into the vector stored
//! for the affected entity. The metadata is updated with the event first;
//! the stored side then weighs `time_modifier × (count − 1) × (1 − temperature)`
//! and the new side `temperature`. Weights are L1-normalized before
//! aggregation.

use linkvec_core::{Error, EventMetadata, ExecutionContext, Result, Vector};
use linkvec_dag::EffectModifier;
use linkvec_embedding::EmbeddingTransform;

/// How much accumulated history still counts, in `[floor, 1]`, or `0` once
/// the average event is older than `max_age`.
///
/// Without `max_age` the age of the oldest event is used, so history never
/// expires but still fades towards `floor`.
#[must_use]
pub fn time_modifier(now: i64, oldest_ts: i64, avg_ts: i64, max_age: Option<i64>, floor: f32) -> f32 {
    let max_age = max_age.unwrap_or(now - oldest_ts);
    if max_age <= 0 {
        return 1.0;
    }
    let age = (now - avg_ts).max(0);
    if age > max_age {
        return 0.0;
    }
    let fresh = 1.0 - age as f32 / max_age as f32;
    fresh * (1.0 - floor) + floor
}

/// Account for `n` events created at `ts`.
#[must_use]
pub fn update_metadata(metadata: &EventMetadata, ts: i64, n: i64) -> EventMetadata {
    let count = metadata.effect_count + n;
    if count <= 0 {
        return *metadata;
    }
    let previous_avg = metadata.effect_avg_ts.unwrap_or(ts) as f64;
    let avg = (previous_avg * (count - n) as f64 + ts as f64 * n as f64) / count as f64;
    EventMetadata {
        effect_count: count,
        effect_avg_ts: Some(avg.ceil() as i64),
        effect_oldest_ts: Some(metadata.effect_oldest_ts.map_or(ts, |oldest| oldest.min(ts))),
    }
}

/// Blends one event into a stored event-aggregation vector.
pub struct EventAggregator<'a> {
    transform: &'a EmbeddingTransform,
    modifier: &'a EffectModifier,
}

impl<'a> EventAggregator<'a> {
    #[must_use]
    pub fn new(transform: &'a EmbeddingTransform, modifier: &'a EffectModifier) -> Self {
        Self { transform, modifier }
    }

    /// New stored vector after applying `affecting`, weighted by the mean
    /// weight of the passing filters. `metadata` already accounts for this
    /// event.
    pub fn aggregate(
        &self,
        stored: Option<&Vector>,
        metadata: &EventMetadata,
        affecting: &Vector,
        affecting_weight: f32,
        context: &ExecutionContext,
    ) -> Result<Vector> {
        if affecting.dim() != self.transform.length() {
            return Err(Error::InvalidDimension {
                expected: self.transform.length(),
                actual: affecting.dim(),
            });
        }
        let weighted = self.transform.aggregate(&[(affecting, affecting_weight)], context, false)?;
        let stored = match stored {
            Some(vector) if metadata.effect_count > 1 && !vector.is_empty() => vector,
            _ => return Ok(weighted),
        };

        let now = context.now();
        let modifier = time_modifier(
            now,
            metadata.effect_oldest_ts.unwrap_or(now),
            metadata.effect_avg_ts.unwrap_or(now),
            self.modifier.max_age_secs,
            self.modifier.time_decay_floor,
        );
        let stored_weight = modifier * (metadata.effect_count - 1) as f32 * (1.0 - self.modifier.temperature);
        let new_weight = self.modifier.temperature;
        let total = stored_weight.abs() + new_weight.abs();
        if total == 0.0 {
            return Ok(weighted);
        }
        self.transform.aggregate(
            &[(stored, stored_weight / total), (&weighted, new_weight / total)],
            context,
            false,
        )
    }
}
