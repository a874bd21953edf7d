//! Data models for annotations.
//!
//! The annotation record, the predicate vocabulary, identifier extraction and
//! the inbound payload decoders.

mod annotation;
pub mod ontology;
pub mod payload;
pub mod uri;

pub use annotation::{Annotation, Annotations, Scope};
pub use ontology::{DEFAULT_PREDICATE, PredicateTable, RelationType};
pub use payload::{PayloadSchema, decode_annotations};
pub use uri::{extract_uuid, predicate_key, thing_url};
