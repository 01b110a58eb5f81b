//! Record-set transformations for the upload and convert pipelines.
//!
//! This module provides the survey/grant reference validator, the fixed
//! column remapper, identifier tagging, and the easting/northing point
//! geometry builder. Everything here is pure: no file or database access,
//! so every step is observable by tests before a write happens.

use geo_types::Point;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::loaders::{SurveyTable, Value};

/// Fixed mapping from survey template column names to destination schema
/// column names. Columns absent from this mapping are dropped on upload.
pub const FIELD_MAP: &[(&str, &str)] = &[
    ("STATION_ID", "peat_sample_id"),
    ("EVENT_DATE", "survey_date"),
    ("SURVEYOR", "surveyor"),
    ("GPS_ACC", "gps_accuracy"),
    ("DEPTH", "peat_depth"),
    ("COND", "peat_condition"),
    ("NOTES", "notes"),
];

/// Destination column for the opaque global identifier.
pub const GLOBAL_ID_COLUMN: &str = "global_id";

static SURVEY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)pds\d+$").expect("survey id pattern is valid"));
static GRANT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^50\d{4}$").expect("grant id pattern is valid"));

/// Errors raised by record-set transformations.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("invalid reference '{0}': expected a survey id like 'PDS123' or a grant id like '501234'")]
    InvalidReferenceFormat(String),

    #[error("coordinate column '{0}' is missing from the input")]
    MissingCoordinateColumn(String),

    #[error("column mapping is not injective: '{source_a}' and '{source_b}' both map to '{destination}'")]
    DuplicateDestination {
        source_a: String,
        source_b: String,
        destination: String,
    },

    #[error("identifier column '{0}' collides with a destination column name")]
    IdentifierCollision(String),
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Which kind of reference a string was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// A peat depth survey id, `PDS` followed by digits (case-insensitive).
    SurveyId,
    /// A grant id, `50` followed by exactly four digits.
    GrantId,
}

/// A validated survey or grant reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyReference {
    pub kind: ReferenceKind,
    /// The reference string exactly as supplied.
    pub value: String,
}

impl SurveyReference {
    /// Destination column this reference is written to.
    pub fn id_column(&self) -> &'static str {
        match self.kind {
            ReferenceKind::SurveyId => "peat_depth_survey_id",
            ReferenceKind::GrantId => "grant_id",
        }
    }
}

impl std::fmt::Display for SurveyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ReferenceKind::SurveyId => "survey",
            ReferenceKind::GrantId => "grant",
        };
        write!(f, "{} ({})", self.value, kind)
    }
}

/// Classify a user-supplied reference string.
///
/// A reference must match exactly one of the two formats; matching neither
/// (or, in principle, both) is a validation failure. This returns a typed
/// error rather than halting so the caller decides how to stop the run.
pub fn classify_reference(reference: &str) -> Result<SurveyReference> {
    let trimmed = reference.trim();
    let kind = match (SURVEY_ID_RE.is_match(trimmed), GRANT_ID_RE.is_match(trimmed)) {
        (true, false) => ReferenceKind::SurveyId,
        (false, true) => ReferenceKind::GrantId,
        _ => return Err(TransformError::InvalidReferenceFormat(trimmed.to_string())),
    };
    Ok(SurveyReference {
        kind,
        value: trimmed.to_string(),
    })
}

/// Rename columns per `mapping` and drop everything not in it.
///
/// Surviving columns keep the input table's order; the row count never
/// changes. Geometry is carried on the table struct and is unaffected.
///
/// # Errors
///
/// Fails if two mapping sources share a destination name.
pub fn remap_columns(table: &mut SurveyTable, mapping: &[(&str, &str)]) -> Result<()> {
    check_injective(mapping)?;

    let mut keep: Vec<usize> = Vec::with_capacity(table.columns.len());
    let mut renamed: Vec<String> = Vec::with_capacity(table.columns.len());
    for (i, column) in table.columns.iter().enumerate() {
        if let Some((_, destination)) = mapping.iter().find(|(source, _)| source == column) {
            keep.push(i);
            renamed.push(destination.to_string());
        }
    }

    for row in &mut table.rows {
        let old = std::mem::take(row);
        *row = keep.iter().map(|&i| old[i].clone()).collect();
    }
    table.columns = renamed;
    Ok(())
}

fn check_injective(mapping: &[(&str, &str)]) -> Result<()> {
    for (i, (source_a, destination)) in mapping.iter().enumerate() {
        if let Some((source_b, _)) = mapping[i + 1..]
            .iter()
            .find(|(_, other)| other == destination)
        {
            return Err(TransformError::DuplicateDestination {
                source_a: source_a.to_string(),
                source_b: source_b.to_string(),
                destination: destination.to_string(),
            });
        }
    }
    Ok(())
}

/// Tag every row with the global identifier and the survey/grant
/// identifier as new leading columns.
///
/// Resulting column order: `global_id`, then the reference's id column,
/// then the existing data columns.
///
/// # Errors
///
/// Fails if either identifier column name collides with a destination
/// column of the fixed field mapping.
pub fn insert_identifier_columns(
    table: &mut SurveyTable,
    reference: &SurveyReference,
    global_id: &str,
) -> Result<()> {
    for name in [GLOBAL_ID_COLUMN, reference.id_column()] {
        if FIELD_MAP.iter().any(|(_, destination)| *destination == name) {
            return Err(TransformError::IdentifierCollision(name.to_string()));
        }
    }

    table.insert_leading_column(reference.id_column(), Value::Text(reference.value.clone()));
    table.insert_leading_column(GLOBAL_ID_COLUMN, Value::Text(global_id.to_string()));
    Ok(())
}

/// Apply the full upload transformation: identifier tagging followed by
/// the fixed column remap.
///
/// The identifier columns are inserted before the remap and protected
/// from it by identity entries, so the output starts with `global_id`
/// and the reference's id column and continues with the renamed data
/// columns in their surviving source order.
pub fn prepare_upload(
    table: &mut SurveyTable,
    reference: &SurveyReference,
    global_id: &str,
) -> Result<()> {
    insert_identifier_columns(table, reference, global_id)?;

    let mut mapping: Vec<(&str, &str)> = vec![
        (GLOBAL_ID_COLUMN, GLOBAL_ID_COLUMN),
        (reference.id_column(), reference.id_column()),
    ];
    mapping.extend_from_slice(FIELD_MAP);
    remap_columns(table, &mapping)
}

/// Build a point geometry for every row from a pair of coordinate columns
/// and tag the table with a coordinate reference system.
///
/// Rows whose coordinates are null or non-numeric get a null geometry;
/// they never fail the whole operation, because the sink writers tolerate
/// null geometry.
///
/// # Errors
///
/// Fails if either coordinate column is absent.
pub fn build_points(
    table: &mut SurveyTable,
    x_col: &str,
    y_col: &str,
    crs_epsg: u32,
) -> Result<()> {
    let x_idx = table
        .column_index(x_col)
        .ok_or_else(|| TransformError::MissingCoordinateColumn(x_col.to_string()))?;
    let y_idx = table
        .column_index(y_col)
        .ok_or_else(|| TransformError::MissingCoordinateColumn(y_col.to_string()))?;

    let geometry = table
        .rows
        .iter()
        .map(|row| match (row[x_idx].as_f64(), row[y_idx].as_f64()) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            _ => None,
        })
        .collect();

    table.geometry = Some(geometry);
    table.crs = Some(crs_epsg);
    Ok(())
}
