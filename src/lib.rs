//! Peat depth field survey processing pipeline.
//!
//! This crate provides tools for:
//! - Reading surveyed point layers from GeoPackage and shapefile
//! - Remapping raw capture-device column names onto the data model
//! - Tagging records with a global site ID and survey or grant reference
//! - Appending tagged records to the peat depth PostGIS table
//! - Converting survey template spreadsheets to spatial files
//!
//! # Example
//!
//! ```no_run
//! use peat_pipeline::core::loaders::load_vector_file;
//! use peat_pipeline::core::transforms::{classify_reference, prepare_upload};
//!
//! let reference = classify_reference("pds12").unwrap();
//! let mut table = load_vector_file("survey.gpkg").unwrap();
//! prepare_upload(&mut table, &reference, "0017").unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod db;

pub use config::{DatabaseConfig, PipelineConfig, TemplateConfig, UploadConfig};
pub use core::loaders::{SurveyTable, Value};
pub use core::transforms::{ReferenceKind, SurveyReference};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
