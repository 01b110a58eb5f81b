//! Data loaders for survey spreadsheets and vector files.
//!
//! This module provides the in-memory attribute table used across the
//! pipeline and parsers for:
//! - Template spreadsheets (xlsx/csv with a fixed header-skip count)
//! - GeoPackage point layers
//! - Shapefiles with dbf attributes

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader as XlsxReader, Xlsx};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use geo_types::Point;
use log::debug;
use rusqlite::{Connection, OpenFlags};
use shapefile::dbase::FieldValue;
use shapefile::Shape;
use thiserror::Error;

use super::wkb::{self, WkbError};
use crate::config::TemplateConfig;

/// Name of the optional data-management notes column in the survey template.
pub const DM_NOTES_COLUMN: &str = "DM_NOTES";

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet parsing error: {0}")]
    Xlsx(#[from] calamine::XlsxError),

    #[error("GeoPackage read error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("shapefile read error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("dbf attribute read error: {0}")]
    Dbf(#[from] shapefile::dbase::Error),

    #[error("geometry decode error: {0}")]
    Geometry(#[from] WkbError),

    #[error("no data rows in file: {0}")]
    EmptyFile(PathBuf),

    #[error("workbook '{path}' has no sheet at position {index}")]
    MissingSheet { path: PathBuf, index: usize },

    #[error("'{0}' does not contain a GeoPackage feature layer")]
    NoFeatureTable(PathBuf),

    #[error("unsupported geometry in input: {0} (only points are handled)")]
    UnsupportedGeometry(String),

    #[error("unsupported file format: '{0}'")]
    UnsupportedFormat(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// A single attribute cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    /// Parse a raw cell string into a typed value.
    ///
    /// Tries integer, float, then ISO (`2024-03-01`) and UK (`01/03/2024`)
    /// dates; anything else is kept as text. Empty cells become `Null`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Value::Date(d);
        }
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
            return Value::Date(d);
        }
        Value::Text(trimmed.to_string())
    }

    /// Returns true for `Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, used for coordinate columns.
    ///
    /// Non-numeric values return `None` rather than failing, so a bad
    /// coordinate produces a null geometry instead of aborting the run.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// An ordered table of survey records with an optional point geometry
/// per row.
///
/// Invariants: every row holds exactly `columns.len()` values, and
/// `geometry`, when present, has one entry per row.
#[derive(Debug, Clone, Default)]
pub struct SurveyTable {
    /// Column names in table order.
    pub columns: Vec<String>,
    /// Row data; inner vectors are parallel to `columns`.
    pub rows: Vec<Vec<Value>>,
    /// Optional point geometry per row (`None` entries are null geometries).
    pub geometry: Option<Vec<Option<Point<f64>>>>,
    /// EPSG code of the coordinate reference system, when known.
    pub crs: Option<u32>,
}

impl SurveyTable {
    /// Creates an empty table with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            geometry: None,
            crs: None,
        }
    }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns true if the table has a column with this exact name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Appends a row. The row must match the column count.
    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(
            row.len(),
            self.columns.len(),
            "row width must match column count"
        );
        self.rows.push(row);
    }

    /// Inserts a new leading column filled with a single repeated value.
    pub fn insert_leading_column(&mut self, name: &str, value: Value) {
        self.columns.insert(0, name.to_string());
        for row in &mut self.rows {
            row.insert(0, value.clone());
        }
    }

    /// Appends a trailing column filled with a single repeated value.
    pub fn push_column(&mut self, name: &str, value: Value) {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }
}

/// Lower-cased file extension, or empty string when there is none.
pub(crate) fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Load a survey template spreadsheet as an attribute table.
///
/// The template layout is fixed: `template.skip_rows` leading rows are
/// ignored, the next row is the column header, and everything after it is
/// data. For xlsx workbooks the data lives on the sheet at
/// `template.sheet_index`. A missing `DM_NOTES` column is added and
/// defaulted to an empty string.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the suffix is neither
/// `.xlsx` nor `.csv`, the sheet is missing, or no data rows remain after
/// the header skip.
pub fn load_spreadsheet<P: AsRef<Path>>(path: P, template: &TemplateConfig) -> Result<SurveyTable> {
    let path = path.as_ref();
    let mut table = match file_extension(path).as_str() {
        "xlsx" => read_template_xlsx(path, template),
        "csv" => read_template_csv(path, template),
        other => Err(LoaderError::UnsupportedFormat(other.to_string())),
    }?;

    if table.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    if !table.has_column(DM_NOTES_COLUMN) {
        debug!(
            "no {} column in {}, defaulting to empty",
            DM_NOTES_COLUMN,
            path.display()
        );
        table.push_column(DM_NOTES_COLUMN, Value::Text(String::new()));
    }

    Ok(table)
}

fn read_template_csv(path: &Path, template: &TemplateConfig) -> Result<SurveyTable> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut records = reader.records().skip(template.skip_rows);

    let header = match records.next() {
        Some(record) => record?,
        None => return Err(LoaderError::EmptyFile(path.to_path_buf())),
    };
    let columns: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();
    let width = columns.len();

    let mut table = SurveyTable::new(columns);
    for result in records {
        let record = result?;
        let mut row = Vec::with_capacity(width);
        for i in 0..width {
            row.push(Value::parse(record.get(i).unwrap_or("")));
        }
        table.push_row(row);
    }

    Ok(table)
}

fn read_template_xlsx(path: &Path, template: &TemplateConfig) -> Result<SurveyTable> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .get(template.sheet_index)
        .cloned()
        .ok_or_else(|| LoaderError::MissingSheet {
            path: path.to_path_buf(),
            index: template.sheet_index,
        })?;
    debug!("reading sheet '{}' from {}", sheet_name, path.display());

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows().skip(template.skip_rows);

    let header = match rows.next() {
        Some(row) => row,
        None => return Err(LoaderError::EmptyFile(path.to_path_buf())),
    };
    let columns: Vec<String> = header
        .iter()
        .map(|c| c.to_string().trim().to_string())
        .collect();
    let width = columns.len();

    let mut table = SurveyTable::new(columns);
    for row in rows {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get(i).map(cell_to_value).unwrap_or(Value::Null));
        }
        table.push_row(values);
    }

    Ok(table)
}

/// Convert a spreadsheet cell to a typed value.
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::parse(s),
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => {
            // Whole-number floats are almost always ids or counts in the
            // survey template.
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Value::Int(*f as i64)
            } else {
                Value::Float(*f)
            }
        }
        Data::Bool(b) => Value::Text(b.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::Date(d.date()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) => Value::parse(s),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) => Value::Null,
    }
}

/// Load a point vector file (`.gpkg` or `.shp`) as an attribute table
/// with geometry.
///
/// # Errors
///
/// Returns an error if the suffix matches neither supported format, the
/// container is malformed, the file has no rows, or a geometry is not a
/// point.
pub fn load_vector_file<P: AsRef<Path>>(path: P) -> Result<SurveyTable> {
    let path = path.as_ref();
    let table = match file_extension(path).as_str() {
        "gpkg" => read_gpkg(path),
        "shp" => read_shapefile(path),
        other => Err(LoaderError::UnsupportedFormat(other.to_string())),
    }?;

    if table.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    Ok(table)
}

fn read_gpkg(path: &Path) -> Result<SurveyTable> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let (layer, geom_column, srs_id): (String, String, i32) = conn
        .query_row(
            "SELECT table_name, column_name, srs_id FROM gpkg_geometry_columns LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => LoaderError::NoFeatureTable(path.to_path_buf()),
            other => LoaderError::Sqlite(other),
        })?;
    debug!(
        "GeoPackage layer '{}', geometry column '{}'",
        layer, geom_column
    );

    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", layer))?;
    let all_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    // Attribute columns exclude the primary key and the geometry column.
    let attr_indices: Vec<usize> = all_names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != "fid" && name.as_str() != geom_column)
        .map(|(i, _)| i)
        .collect();
    let geom_index = all_names.iter().position(|n| *n == geom_column);

    let columns: Vec<String> = attr_indices.iter().map(|&i| all_names[i].clone()).collect();
    let mut table = SurveyTable::new(columns);
    let mut geometry = Vec::new();

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(attr_indices.len());
        for &i in &attr_indices {
            values.push(sqlite_to_value(row.get_ref(i)?));
        }
        table.push_row(values);

        let point = match geom_index {
            Some(i) => match row.get_ref(i)? {
                rusqlite::types::ValueRef::Blob(blob) => Some(wkb::decode_gpkg_blob(blob)?.0),
                _ => None,
            },
            None => None,
        };
        geometry.push(point);
    }

    table.geometry = Some(geometry);
    if srs_id > 0 {
        table.crs = Some(srs_id as u32);
    }
    Ok(table)
}

fn sqlite_to_value(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::parse(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn read_shapefile(path: &Path) -> Result<SurveyTable> {
    let mut reader = shapefile::Reader::from_path(path)?;

    // Column order comes from the dbf header so it is stable run to run;
    // records themselves do not preserve field order.
    let dbf = shapefile::dbase::Reader::from_path(path.with_extension("dbf"))?;
    let columns: Vec<String> = dbf
        .fields()
        .iter()
        .map(|field| field.name().to_string())
        .filter(|name| name != "DeletionFlag")
        .collect();

    let mut table = SurveyTable::new(columns);
    let mut geometry = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let mut row = Vec::with_capacity(table.columns.len());
        for name in table.columns.clone() {
            let value = record.get(&name).map(dbase_to_value).unwrap_or(Value::Null);
            row.push(value);
        }
        table.push_row(row);

        let point = match shape {
            Shape::Point(p) => Some(Point::new(p.x, p.y)),
            Shape::PointM(p) => Some(Point::new(p.x, p.y)),
            Shape::PointZ(p) => Some(Point::new(p.x, p.y)),
            Shape::NullShape => None,
            other => {
                return Err(LoaderError::UnsupportedGeometry(
                    other.shapetype().to_string(),
                ))
            }
        };
        geometry.push(point);
    }

    table.geometry = Some(geometry);
    Ok(table)
}

fn dbase_to_value(field: &FieldValue) -> Value {
    match field {
        FieldValue::Character(Some(s)) => Value::parse(s),
        FieldValue::Character(None) => Value::Null,
        FieldValue::Numeric(Some(f)) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Value::Int(*f as i64)
            } else {
                Value::Float(*f)
            }
        }
        FieldValue::Numeric(None) => Value::Null,
        FieldValue::Float(Some(f)) => Value::Float(*f as f64),
        FieldValue::Float(None) => Value::Null,
        FieldValue::Integer(i) => Value::Int(*i as i64),
        FieldValue::Double(f) => Value::Float(*f),
        FieldValue::Logical(Some(b)) => Value::Text(b.to_string()),
        FieldValue::Logical(None) => Value::Null,
        FieldValue::Date(Some(d)) => NaiveDate::from_ymd_opt(d.year() as i32, d.month(), d.day())
            .map(Value::Date)
            .unwrap_or(Value::Null),
        FieldValue::Date(None) => Value::Null,
        FieldValue::Currency(f) => Value::Float(*f),
        FieldValue::Memo(s) => Value::Text(s.clone()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn default_template() -> TemplateConfig {
        TemplateConfig::default()
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse(""), Value::Null);
        assert_eq!(Value::parse("  "), Value::Null);
        assert_eq!(Value::parse("42"), Value::Int(42));
        assert_eq!(Value::parse("-3.5"), Value::Float(-3.5));
        assert_eq!(
            Value::parse("2024-03-01"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            Value::parse("01/03/2024"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(Value::parse("wet bog"), Value::Text("wet bog".to_string()));
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Text("x".into()).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_insert_leading_column() {
        let mut table = SurveyTable::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![Value::Int(1), Value::Int(2)]);
        table.insert_leading_column("id", Value::Text("G1".into()));

        assert_eq!(table.columns, vec!["id", "a", "b"]);
        assert_eq!(table.rows[0][0], Value::Text("G1".into()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_load_csv_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "Peat Depth Survey Template,,,,").unwrap();
        writeln!(file, "Fill in one row per probe,,,,").unwrap();
        writeln!(file, "STATION_ID,EASTING,NORTHING,EVENT_DATE,DEPTH").unwrap();
        writeln!(file, "S1,423500,1098700,2024-03-01,1.2").unwrap();
        writeln!(file, "S2,423510,1098710,2024-03-01,0.8").unwrap();
        drop(file);

        let table = load_spreadsheet(&path, &default_template()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.columns,
            vec!["STATION_ID", "EASTING", "NORTHING", "EVENT_DATE", "DEPTH", "DM_NOTES"]
        );
        assert_eq!(table.rows[0][0], Value::Text("S1".into()));
        assert_eq!(table.rows[0][1], Value::Int(423500));
        assert_eq!(table.rows[1][4], Value::Float(0.8));
        // DM_NOTES defaulted to empty string
        assert_eq!(table.rows[0][5], Value::Text(String::new()));
    }

    #[test]
    fn test_load_csv_keeps_existing_dm_notes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "title,,").unwrap();
        writeln!(file, "notes,,").unwrap();
        writeln!(file, "STATION_ID,DEPTH,DM_NOTES").unwrap();
        writeln!(file, "S1,1.2,checked").unwrap();
        drop(file);

        let table = load_spreadsheet(&path, &default_template()).unwrap();

        assert_eq!(table.columns, vec!["STATION_ID", "DEPTH", "DM_NOTES"]);
        assert_eq!(table.rows[0][2], Value::Text("checked".into()));
    }

    #[test]
    fn test_load_xlsx_template_third_sheet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet(); // instructions
        workbook.add_worksheet(); // lookups
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Peat Depth Survey Template").unwrap();
        sheet.write_string(1, 0, "Fill in one row per probe").unwrap();
        for (col, name) in ["STATION_ID", "EASTING", "NORTHING", "DEPTH"]
            .iter()
            .enumerate()
        {
            sheet.write_string(2, col as u16, *name).unwrap();
        }
        sheet.write_string(3, 0, "S1").unwrap();
        sheet.write_number(3, 1, 423500.0).unwrap();
        sheet.write_number(3, 2, 1098700.0).unwrap();
        sheet.write_number(3, 3, 1.25).unwrap();
        workbook.save(&path).unwrap();

        let table = load_spreadsheet(&path, &default_template()).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.columns[0], "STATION_ID");
        assert_eq!(table.rows[0][1], Value::Int(423500));
        assert_eq!(table.rows[0][3], Value::Float(1.25));
    }

    #[test]
    fn test_load_spreadsheet_unsupported_format() {
        let result = load_spreadsheet("survey.ods", &default_template());
        assert!(matches!(result, Err(LoaderError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_load_csv_no_data_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "title").unwrap();
        writeln!(file, "notes").unwrap();
        writeln!(file, "STATION_ID,DEPTH").unwrap();
        drop(file);

        let result = load_spreadsheet(&path, &default_template());
        assert!(matches!(result, Err(LoaderError::EmptyFile(_))));
    }

    #[test]
    fn test_load_vector_file_unsupported_format() {
        let result = load_vector_file("points.geojson");
        assert!(matches!(result, Err(LoaderError::UnsupportedFormat(_))));
    }
}
