//! Event effects
//!
//! A [`DagEffect`] declares that events of one schema move the stored
//! vector of an *affected* entity towards the vector of an *affecting*
//! entity, e.g. "a user who bought a product drifts towards that product".

use linkvec_core::{ComparisonFilter, Error, Result};
use serde::{Deserialize, Serialize};

/// Handle of a registered effect within a [`Dag`](crate::Dag).
pub type EffectId = usize;

/// Floor of the time modifier, keeping old history from vanishing entirely.
pub const DEFAULT_TIME_DECAY_FLOOR: f32 = 0.2;
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// A schema-reference field of the event schema and the entity type it points to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaReference {
    pub field: String,
    pub schema: String,
}

impl SchemaReference {
    #[must_use]
    pub fn new(field: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            schema: schema.into(),
        }
    }
}

/// A filter on event fields and the weight an event passing it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedFilter {
    pub filter: ComparisonFilter,
    pub weight: f32,
}

/// Temporal decay parameters of an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectModifier {
    /// History older than this many seconds carries no weight.
    /// Unset means the age of the oldest event.
    pub max_age_secs: Option<i64>,
    /// Blend between the new event (1.0) and accumulated history (0.0).
    pub temperature: f32,
    pub time_decay_floor: f32,
}

impl Default for EffectModifier {
    fn default() -> Self {
        Self {
            max_age_secs: None,
            temperature: DEFAULT_TEMPERATURE,
            time_decay_floor: DEFAULT_TIME_DECAY_FLOOR,
        }
    }
}

impl EffectModifier {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.time_decay_floor) {
            return Err(Error::InvalidConfig(format!(
                "time decay floor must be within [0, 1], got {}",
                self.time_decay_floor
            )));
        }
        if self.max_age_secs.is_some_and(|age| age < 0) {
            return Err(Error::InvalidConfig("max_age must not be negative".into()));
        }
        Ok(())
    }
}

/// How events of `event_schema` update stored vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagEffect {
    pub event_schema: String,
    pub affected: SchemaReference,
    pub affecting: SchemaReference,
    #[serde(default)]
    pub filters: Vec<WeightedFilter>,
    #[serde(default)]
    pub modifier: EffectModifier,
    /// Weight of the event-driven part relative to the entity's own vector.
    pub multiplier: f32,
}

impl DagEffect {
    #[must_use]
    pub fn new(event_schema: impl Into<String>, affected: SchemaReference, affecting: SchemaReference) -> Self {
        Self {
            event_schema: event_schema.into(),
            affected,
            affecting,
            filters: Vec::new(),
            modifier: EffectModifier::default(),
            multiplier: 1.0,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: ComparisonFilter, weight: f32) -> Self {
        self.filters.push(WeightedFilter { filter, weight });
        self
    }

    #[must_use]
    pub fn with_modifier(mut self, modifier: EffectModifier) -> Self {
        self.modifier = modifier;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.modifier.validate()?;
        if self.multiplier <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "effect multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        if self.affected.field == self.affecting.field {
            return Err(Error::InvalidConfig(format!(
                "effect on {} uses field {} as both affected and affecting reference",
                self.event_schema, self.affected.field
            )));
        }
        Ok(())
    }
}
