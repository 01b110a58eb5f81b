//! Sink writers for spatial container formats.
//!
//! This module writes a survey table to one of two vector formats,
//! selected purely from the destination file's suffix:
//! - GeoPackage (`.gpkg`): a full container with the required metadata
//!   tables and GP geometry blobs, one feature layer per file
//! - Shapefile (`.shp`): point shapes with dbf attribute records
//!
//! Both writers use replace semantics: an existing file at the
//! destination path is overwritten in full.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use thiserror::Error;

use super::loaders::{file_extension, SurveyTable, Value};
use super::wkb;

/// GeoPackage application id, the ASCII bytes "GPKG".
const GPKG_APPLICATION_ID: i64 = 0x4750_4B47;

/// GeoPackage user version for the 1.3 format.
const GPKG_USER_VERSION: i64 = 10300;

/// dbf attribute field names are limited to this many bytes.
const DBF_NAME_LIMIT: usize = 10;

const WGS84_DEFINITION: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",\
    SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],\
    UNIT[\"degree\",0.0174532925199433],AUTHORITY[\"EPSG\",\"4326\"]]";

const BRITISH_NATIONAL_GRID_DEFINITION: &str = "PROJCS[\"OSGB36 / British National Grid\",\
    GEOGCS[\"OSGB36\",DATUM[\"Ordnance_Survey_of_Great_Britain_1936\",\
    SPHEROID[\"Airy 1830\",6377563.396,299.3249646]],PRIMEM[\"Greenwich\",0],\
    UNIT[\"degree\",0.0174532925199433]],PROJECTION[\"Transverse_Mercator\"],\
    PARAMETER[\"latitude_of_origin\",49],PARAMETER[\"central_meridian\",-2],\
    PARAMETER[\"scale_factor\",0.9996012717],PARAMETER[\"false_easting\",400000],\
    PARAMETER[\"false_northing\",-100000],UNIT[\"metre\",1],\
    AUTHORITY[\"EPSG\",\"27700\"]]";

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create or replace the destination file.
    #[error("failed to replace '{path}': {source}")]
    ReplaceFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// GeoPackage container error.
    #[error("GeoPackage write error: {0}")]
    Gpkg(#[from] rusqlite::Error),

    /// Shapefile writing error.
    #[error("shapefile write error: {0}")]
    Shapefile(#[from] shapefile::Error),

    /// A column name could not be used as a dbf field name.
    #[error("column name '{0}' is not usable as a dbf field name")]
    InvalidFieldName(String),

    /// The table has no geometry to write.
    #[error("table has no geometry column; build points before writing")]
    MissingGeometry,

    /// Rows without geometry cannot go into a point shapefile.
    #[error(
        "rows {rows:?} have a null geometry, which a point shapefile cannot store; \
         fix the coordinates or write GeoPackage output"
    )]
    NullGeometryRows { rows: Vec<usize> },

    /// The destination suffix matches neither supported format.
    #[error("unsupported output format: '{0}' (expected .gpkg or .shp)")]
    UnsupportedFormat(String),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Write a survey table to a vector file, selecting the container format
/// from the destination suffix.
///
/// The whole table is written as one layer named `layer`; any existing
/// file at `path` is replaced in full.
///
/// # Errors
///
/// Returns `UnsupportedFormat` for suffixes other than `.gpkg`/`.shp`,
/// `MissingGeometry` when no points were built, and container errors
/// otherwise.
pub fn write_vector_file<P: AsRef<Path>>(
    path: P,
    table: &SurveyTable,
    layer: &str,
) -> Result<()> {
    let path = path.as_ref();
    if table.geometry.is_none() {
        return Err(WriteError::MissingGeometry);
    }
    match file_extension(path).as_str() {
        "gpkg" => write_gpkg(path, table, layer),
        "shp" => write_shapefile(path, table),
        other => Err(WriteError::UnsupportedFormat(other.to_string())),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| WriteError::ReplaceFile {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

/// SQLite column type for an attribute column, from its first non-null
/// value.
fn gpkg_column_type(table: &SurveyTable, index: usize) -> &'static str {
    for row in &table.rows {
        match row[index] {
            Value::Int(_) => return "INTEGER",
            Value::Float(_) => return "REAL",
            Value::Date(_) => return "DATE",
            Value::Text(_) => return "TEXT",
            Value::Null => continue,
        }
    }
    "TEXT"
}

fn value_to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
    }
}

fn srs_definition(srs_id: i32) -> &'static str {
    match srs_id {
        4326 => WGS84_DEFINITION,
        27700 => BRITISH_NATIONAL_GRID_DEFINITION,
        _ => "undefined",
    }
}

fn write_gpkg(path: &Path, table: &SurveyTable, layer: &str) -> Result<()> {
    remove_if_exists(path)?;

    let geometry = table.geometry.as_ref().ok_or(WriteError::MissingGeometry)?;
    let srs_id = table.crs.map(|c| c as i32).unwrap_or(0);

    let mut conn = Connection::open(path)?;
    conn.pragma_update(None, "application_id", GPKG_APPLICATION_ID)?;
    conn.pragma_update(None, "user_version", GPKG_USER_VERSION)?;

    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE gpkg_spatial_ref_sys (
             srs_name TEXT NOT NULL,
             srs_id INTEGER PRIMARY KEY,
             organization TEXT NOT NULL,
             organization_coordsys_id INTEGER NOT NULL,
             definition TEXT NOT NULL,
             description TEXT
         );
         CREATE TABLE gpkg_contents (
             table_name TEXT NOT NULL PRIMARY KEY,
             data_type TEXT NOT NULL,
             identifier TEXT UNIQUE,
             description TEXT DEFAULT '',
             last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
             min_x DOUBLE,
             min_y DOUBLE,
             max_x DOUBLE,
             max_y DOUBLE,
             srs_id INTEGER,
             CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id)
                 REFERENCES gpkg_spatial_ref_sys(srs_id)
         );
         CREATE TABLE gpkg_geometry_columns (
             table_name TEXT NOT NULL,
             column_name TEXT NOT NULL,
             geometry_type_name TEXT NOT NULL,
             srs_id INTEGER NOT NULL,
             z TINYINT NOT NULL,
             m TINYINT NOT NULL,
             CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name)
         );",
    )?;

    // Required spatial reference records plus the layer's own.
    let mut srs_rows = vec![
        (-1, "Undefined cartesian SRS", "NONE", -1),
        (0, "Undefined geographic SRS", "NONE", 0),
        (4326, "WGS 84 geodetic", "EPSG", 4326),
    ];
    if !srs_rows.iter().any(|(id, ..)| *id == srs_id) {
        srs_rows.push((srs_id, "Layer SRS", "EPSG", srs_id));
    }
    for (id, name, organization, coordsys_id) in srs_rows {
        tx.execute(
            "INSERT INTO gpkg_spatial_ref_sys
                 (srs_name, srs_id, organization, organization_coordsys_id, definition)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![name, id, organization, coordsys_id, srs_definition(id)],
        )?;
    }

    // Bounding box over the non-null geometries.
    let mut envelope: Option<(f64, f64, f64, f64)> = None;
    for point in geometry.iter().flatten() {
        let (x, y) = (point.x(), point.y());
        envelope = Some(match envelope {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }

    tx.execute(
        "INSERT INTO gpkg_contents
             (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            layer,
            envelope.map(|e| e.0),
            envelope.map(|e| e.1),
            envelope.map(|e| e.2),
            envelope.map(|e| e.3),
            srs_id,
        ],
    )?;
    tx.execute(
        "INSERT INTO gpkg_geometry_columns
             (table_name, column_name, geometry_type_name, srs_id, z, m)
         VALUES (?1, 'geom', 'POINT', ?2, 0, 0)",
        rusqlite::params![layer, srs_id],
    )?;

    let attr_defs: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| format!("\"{}\" {}", name, gpkg_column_type(table, i)))
        .collect();
    tx.execute_batch(&format!(
        "CREATE TABLE \"{}\" (
             fid INTEGER PRIMARY KEY AUTOINCREMENT,
             geom BLOB{}{}
         );",
        layer,
        if attr_defs.is_empty() { "" } else { ",\n             " },
        attr_defs.join(",\n             ")
    ))?;

    let placeholders: Vec<String> = (1..=table.columns.len() + 1)
        .map(|i| format!("?{}", i))
        .collect();
    let quoted: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect();
    let insert_sql = format!(
        "INSERT INTO \"{}\" (geom{}{}) VALUES ({})",
        layer,
        if quoted.is_empty() { "" } else { ", " },
        quoted.join(", "),
        placeholders.join(", ")
    );

    {
        let mut stmt = tx.prepare(&insert_sql)?;
        for (row, point) in table.rows.iter().zip(geometry.iter()) {
            let mut params: Vec<SqlValue> = Vec::with_capacity(row.len() + 1);
            params.push(match point {
                Some(p) => SqlValue::Blob(wkb::encode_gpkg_blob(*p, srs_id)),
                None => SqlValue::Null,
            });
            params.extend(row.iter().map(value_to_sqlite));
            stmt.execute(rusqlite::params_from_iter(params))?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Shorten column names to the dbf 10-byte limit, uniquifying clashes
/// with a numeric suffix the way desktop GIS exporters do.
fn dbf_field_names(columns: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(columns.len());
    for column in columns {
        let mut name: String = column.chars().take(DBF_NAME_LIMIT).collect();
        let mut suffix = 1;
        while !seen.insert(name.clone()) {
            let tag = format!("_{}", suffix);
            let keep = DBF_NAME_LIMIT.saturating_sub(tag.len());
            name = format!("{}{}", column.chars().take(keep).collect::<String>(), tag);
            suffix += 1;
        }
        names.push(name);
    }
    names
}

/// dbf storage class for a column, from its first non-null value.
#[derive(Clone, Copy, PartialEq)]
enum DbfKind {
    Numeric,
    Character,
}

fn dbf_column_kind(table: &SurveyTable, index: usize) -> DbfKind {
    for row in &table.rows {
        match row[index] {
            Value::Int(_) | Value::Float(_) => return DbfKind::Numeric,
            Value::Text(_) | Value::Date(_) => return DbfKind::Character,
            Value::Null => continue,
        }
    }
    DbfKind::Character
}

fn write_shapefile(path: &Path, table: &SurveyTable) -> Result<()> {
    let geometry = table.geometry.as_ref().ok_or(WriteError::MissingGeometry)?;

    // Refuse up front rather than shrink the output: every input row must
    // appear in the written file.
    let null_rows: Vec<usize> = geometry
        .iter()
        .enumerate()
        .filter(|(_, point)| point.is_none())
        .map(|(i, _)| i)
        .collect();
    if !null_rows.is_empty() {
        return Err(WriteError::NullGeometryRows { rows: null_rows });
    }

    let field_names = dbf_field_names(&table.columns);
    let kinds: Vec<DbfKind> = (0..table.columns.len())
        .map(|i| dbf_column_kind(table, i))
        .collect();

    let mut builder = TableWriterBuilder::new();
    for (name, kind) in field_names.iter().zip(&kinds) {
        let field_name = FieldName::try_from(name.as_str())
            .map_err(|_| WriteError::InvalidFieldName(name.clone()))?;
        builder = match kind {
            DbfKind::Numeric => builder.add_numeric_field(field_name, 20, 6),
            DbfKind::Character => builder.add_character_field(field_name, 254),
        };
    }

    let mut writer = shapefile::Writer::from_path(path, builder)?;

    for (row, point) in table.rows.iter().zip(geometry.iter()) {
        let point = match point {
            Some(p) => shapefile::Point::new(p.x(), p.y()),
            None => continue,
        };

        let mut record = Record::default();
        for ((value, name), kind) in row.iter().zip(&field_names).zip(&kinds) {
            let field = match kind {
                DbfKind::Numeric => FieldValue::Numeric(value.as_f64()),
                DbfKind::Character => match value {
                    Value::Null => FieldValue::Character(None),
                    other => FieldValue::Character(Some(other.to_string())),
                },
            };
            record.insert(name.clone(), field);
        }

        writer.write_shape_and_record(&point, &record)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::load_vector_file;
    use geo_types::Point;
    use tempfile::tempdir;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn sample_table() -> SurveyTable {
        let mut table = SurveyTable::new(vec![
            "STATION_ID".into(),
            "DEPTH".into(),
            "NOTES".into(),
        ]);
        table.push_row(vec![text("S1"), Value::Float(1.2), text("wet")]);
        table.push_row(vec![text("S2"), Value::Float(0.8), Value::Null]);
        table.geometry = Some(vec![
            Some(Point::new(423500.0, 1098700.0)),
            Some(Point::new(423510.0, 1098710.0)),
        ]);
        table.crs = Some(27700);
        table
    }

    #[test]
    fn test_write_gpkg_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");
        let table = sample_table();

        write_vector_file(&path, &table, "peat_depth").unwrap();
        let loaded = load_vector_file(&path).unwrap();

        assert_eq!(loaded.columns, vec!["STATION_ID", "DEPTH", "NOTES"]);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.crs, Some(27700));
        assert_eq!(loaded.rows[0][0], text("S1"));
        assert_eq!(loaded.rows[0][1], Value::Float(1.2));
        assert_eq!(loaded.rows[1][2], Value::Null);

        let geometry = loaded.geometry.as_ref().unwrap();
        assert_eq!(geometry[0], Some(Point::new(423500.0, 1098700.0)));
        assert_eq!(geometry[1], Some(Point::new(423510.0, 1098710.0)));
    }

    #[test]
    fn test_write_gpkg_null_geometry_row_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");
        let mut table = sample_table();
        table.geometry = Some(vec![Some(Point::new(1.0, 2.0)), None]);

        write_vector_file(&path, &table, "peat_depth").unwrap();
        let loaded = load_vector_file(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        let geometry = loaded.geometry.as_ref().unwrap();
        assert!(geometry[0].is_some());
        assert!(geometry[1].is_none());
    }

    #[test]
    fn test_write_gpkg_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");

        write_vector_file(&path, &sample_table(), "peat_depth").unwrap();

        let mut smaller = sample_table();
        smaller.rows.truncate(1);
        smaller.geometry = Some(vec![Some(Point::new(5.0, 6.0))]);
        write_vector_file(&path, &smaller, "peat_depth").unwrap();

        let loaded = load_vector_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_write_shapefile_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.shp");
        let table = sample_table();

        write_vector_file(&path, &table, "peat_depth").unwrap();
        let loaded = load_vector_file(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        let geometry = loaded.geometry.as_ref().unwrap();
        assert_eq!(geometry[0], Some(Point::new(423500.0, 1098700.0)));

        // Column order follows the dbf header, which follows the input.
        assert_eq!(loaded.columns, vec!["STATION_ID", "DEPTH", "NOTES"]);
        assert_eq!(loaded.rows[0][0], text("S1"));
        assert_eq!(loaded.rows[1][1], Value::Float(0.8));
    }

    #[test]
    fn test_write_shapefile_rejects_null_geometry_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.shp");
        let mut table = sample_table();
        table.geometry = Some(vec![Some(Point::new(1.0, 2.0)), None]);

        let result = write_vector_file(&path, &table, "peat_depth");
        assert!(matches!(
            result,
            Err(WriteError::NullGeometryRows { rows }) if rows == vec![1]
        ));
        // Nothing was written: no partial file shrinks the record set.
        assert!(!path.exists());
    }

    #[test]
    fn test_unsupported_format() {
        let table = sample_table();
        let result = write_vector_file("out.geojson", &table, "peat_depth");
        assert!(matches!(result, Err(WriteError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_geometry() {
        let mut table = sample_table();
        table.geometry = None;
        let result = write_vector_file("out.gpkg", &table, "peat_depth");
        assert!(matches!(result, Err(WriteError::MissingGeometry)));
    }

    #[test]
    fn test_dbf_field_names_truncate_and_uniquify() {
        let columns = vec![
            "peat_depth_survey_id".to_string(),
            "peat_depth".to_string(),
            "peat_depths".to_string(),
        ];
        let names = dbf_field_names(&columns);

        assert_eq!(names[0], "peat_depth");
        assert_eq!(names[1], "peat_dep_1");
        assert_eq!(names[2], "peat_dep_2");
        assert!(names.iter().all(|n| n.len() <= DBF_NAME_LIMIT));
    }
}
