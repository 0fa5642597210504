//! Natural-language parameter filling

use crate::query::QueryDescriptor;
use async_trait::async_trait;
use linkvec_core::{EntitySchema, FieldValue, Result};
use linkvec_dag::Space;

/// Turns query text into query parameters, typically via an LLM.
///
/// The returned descriptor is only consulted for parameters the caller
/// left unset; see [`QueryDescriptor::merge_missing`].
#[async_trait]
pub trait NlqParamFiller: Send + Sync {
    async fn fill_params(&self, text: &str, schema: &EntitySchema, spaces: &[Space]) -> Result<QueryDescriptor>;
}

/// Routes the whole text to every text space of the schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSpaceFiller;

#[async_trait]
impl NlqParamFiller for TextSpaceFiller {
    async fn fill_params(&self, text: &str, schema: &EntitySchema, spaces: &[Space]) -> Result<QueryDescriptor> {
        Ok(spaces
            .iter()
            .filter(|space| space.transform.is_model_backed() && space.field_for(&schema.name).is_some())
            .fold(QueryDescriptor::new(schema.name.clone()), |query, space| {
                query.similar(space.name.clone(), FieldValue::String(text.to_string()), 1.0)
            }))
    }
}
