//! Business logic services.
//!
//! Services orchestrate the graph store and provide high-level operations.

mod annotations;
pub mod query_builder;

pub use annotations::{AnnotationsService, DeleteOutcome, WriteReceipt};
pub use query_builder::QueryBuilder;
