//! Configuration types for the survey pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database connection parameters for the upload sink.
///
/// Credentials live in the YAML config file, not on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database user name
    #[serde(default = "default_db_user")]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database host
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database name
    #[serde(default = "default_db_name")]
    pub database: String,
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_name() -> String {
    "pa_data".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: default_db_user(),
            password: String::new(),
            host: default_db_host(),
            database: default_db_name(),
        }
    }
}

/// Destination table settings for the upload sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Schema containing the destination table
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Destination table name
    #[serde(default = "default_table")]
    pub table: String,

    /// Default answer at the confirmation prompt: "yes", "no" or "ask"
    #[serde(default = "default_confirm")]
    pub confirm_default: String,
}

fn default_schema() -> String {
    "test_data_model".to_string()
}

fn default_table() -> String {
    "peat_depth".to_string()
}

fn default_confirm() -> String {
    "yes".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            table: default_table(),
            confirm_default: default_confirm(),
        }
    }
}

/// Fixed layout of the survey template spreadsheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Leading rows to ignore before the column header
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,

    /// Zero-based position of the data sheet in xlsx workbooks
    #[serde(default = "default_sheet_index")]
    pub sheet_index: usize,

    /// Easting coordinate column name
    #[serde(default = "default_x_column")]
    pub x_column: String,

    /// Northing coordinate column name
    #[serde(default = "default_y_column")]
    pub y_column: String,

    /// EPSG code of the generated geometry (British National Grid)
    #[serde(default = "default_crs_epsg")]
    pub crs_epsg: u32,

    /// Layer name used in GeoPackage output
    #[serde(default = "default_layer")]
    pub layer: String,
}

fn default_skip_rows() -> usize {
    2
}

fn default_sheet_index() -> usize {
    2
}

fn default_x_column() -> String {
    "EASTING".to_string()
}

fn default_y_column() -> String {
    "NORTHING".to_string()
}

fn default_crs_epsg() -> u32 {
    27700
}

fn default_layer() -> String {
    "peat_depth".to_string()
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            skip_rows: default_skip_rows(),
            sheet_index: default_sheet_index(),
            x_column: default_x_column(),
            y_column: default_y_column(),
            crs_epsg: default_crs_epsg(),
            layer: default_layer(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub template: TemplateConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_config() {
        let config = TemplateConfig::default();
        assert_eq!(config.skip_rows, 2);
        assert_eq!(config.sheet_index, 2);
        assert_eq!(config.crs_epsg, 27700);
        assert_eq!(config.x_column, "EASTING");
    }

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.upload.schema, "test_data_model");
        assert_eq!(config.upload.table, "peat_depth");
        assert_eq!(config.upload.confirm_default, "yes");
        assert_eq!(config.database.host, "localhost");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("database:\n  user: surveyor\n").unwrap();
        assert_eq!(config.database.user, "surveyor");
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.template.skip_rows, 2);
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = PipelineConfig::default();
        config.database.database = "peat_test".to_string();
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.database.database, "peat_test");
        assert_eq!(loaded.upload.table, "peat_depth");
    }
}
