//! # linkvec DAG
//!
//! Content-addressed computation graph describing how index vectors are
//! computed from entity fields and events.
//!
//! Nodes are identified by a hash of their parameters and parent ids, so
//! building the same index twice yields the same ids and stored results stay
//! addressable across restarts.
//!
//! ```rust
//! use linkvec_core::{EntitySchema, FieldType, SchemaField};
//! use linkvec_dag::{IndexDefinition, Space};
//! use linkvec_embedding::{EmbeddingTransform, NumberEmbedding, NumberEmbeddingConfig, NumberMode};
//!
//! let rating = EmbeddingTransform::Number(
//!     NumberEmbedding::new(NumberEmbeddingConfig::new(1.0, 5.0, NumberMode::Maximum).unwrap()).unwrap(),
//! );
//! let dag = IndexDefinition::new("products")
//!     .schema(EntitySchema::entity("product", "id").field("rating", FieldType::Integer))
//!     .space(Space::new("rating", rating).with_field(SchemaField::new("product", "rating", FieldType::Integer)))
//!     .build()
//!     .unwrap();
//! let projection = dag.project_to_schema("product").unwrap();
//! assert_eq!(projection.terminals(), &[dag.index_node()]);
//! ```

pub mod builder;
pub mod dag;
pub mod effect;
pub mod index;
pub mod node;

pub use builder::DagBuilder;
pub use dag::{Dag, ProjectionTarget, SchemaDag};
pub use effect::{DagEffect, EffectId, EffectModifier, SchemaReference, WeightedFilter};
pub use index::{IndexDefinition, Space};
pub use node::{node_id, Node, NodeIndex, NodeKind, SpaceSegment};
