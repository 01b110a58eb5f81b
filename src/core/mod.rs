//! Core data types and I/O operations.

pub mod loaders;
pub mod transforms;
pub mod wkb;
pub mod writers;

pub use loaders::{SurveyTable, Value};
pub use transforms::{ReferenceKind, SurveyReference, TransformError};
pub use writers::{write_vector_file, WriteError};
