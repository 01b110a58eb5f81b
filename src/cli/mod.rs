//! Command-line interface for the survey pipeline.

pub mod prompt;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use crate::cli::prompt::AnswerDefault;
use crate::core::loaders;
use crate::core::transforms;
use crate::core::writers;
use crate::db;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "peat-pipeline")]
#[command(about = "Peat depth survey processing pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a surveyed point layer to the peat depth database table
    Upload {
        /// GeoPackage or shapefile containing the surveyed points
        filename: PathBuf,
        /// Survey reference (pdsNN) or grant reference (50NNNN)
        survey_ref: String,
        /// Global site identifier to tag every record with
        global_id: String,
    },

    /// Convert a survey template spreadsheet to a spatial file
    Convert {
        /// Input spreadsheet (.xlsx or .csv) in the survey template layout
        input: PathBuf,
        /// Output spatial file (.gpkg or .shp)
        output: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        println!("║ {:<20}: {:<39} ║", key, truncate_cell(value));
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Shorten a value to fit the summary box, counting characters so a
/// multibyte path never splits mid-character.
fn truncate_cell(value: &str) -> String {
    if value.chars().count() > 39 {
        let head: String = value.chars().take(36).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => {
            match PipelineConfig::from_yaml(path) {
                Ok(cfg) => {
                    info!("Loaded config from: {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                    PipelineConfig::default()
                }
            }
        }
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Upload { filename, survey_ref, global_id } => {
            cmd_upload(&filename, &survey_ref, &global_id, &config);
        }
        Commands::Convert { input, output } => {
            cmd_convert(&input, &output, &config);
        }
    }
}

fn cmd_upload(filename: &Path, survey_ref: &str, global_id: &str, config: &PipelineConfig) {
    let start = Instant::now();

    // Reject a bad reference before touching the file
    let reference = match transforms::classify_reference(survey_ref) {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let default = match AnswerDefault::from_str(&config.upload.confirm_default) {
        Ok(d) => d,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    println!("Uploading surveyed points...");
    println!("Input: {}", filename.display());

    let spinner = create_spinner("Reading spatial file...");

    let mut table = match loaders::load_vector_file(filename) {
        Ok(t) => t,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Failed to read {}: {}", filename.display(), e);
            std::process::exit(1);
        }
    };

    spinner.finish_and_clear();

    print_summary(
        "File information",
        &[
            ("File", filename.display().to_string()),
            ("Global ID", global_id.to_string()),
            ("Reference", reference.to_string()),
            ("Records", table.len().to_string()),
        ],
    );

    match prompt::confirm("Is this correct?", default) {
        Ok(true) => {}
        Ok(false) => {
            println!("Upload cancelled. Check the file, reference and global ID and try again.");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = transforms::prepare_upload(&mut table, &reference, global_id) {
        error!("Failed to prepare records: {}", e);
        std::process::exit(1);
    }

    let spinner = create_spinner("Appending to database...");

    match db::append_table(
        &config.database,
        &config.upload,
        &table,
        config.template.crs_epsg,
    ) {
        Ok(appended) => {
            spinner.finish_and_clear();

            print_summary(
                "Upload Complete",
                &[
                    ("Rows appended", appended.to_string()),
                    (
                        "Destination",
                        format!("{}.{}", config.upload.schema, config.upload.table),
                    ),
                    ("Reference", reference.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Upload failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_convert(input: &Path, output: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    println!("Converting survey template...");
    println!("Input: {}", input.display());
    println!("Output: {}", output.display());

    let spinner = create_spinner("Reading spreadsheet...");

    let mut table = match loaders::load_spreadsheet(input, &config.template) {
        Ok(t) => t,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Failed to read {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };

    spinner.set_message("Building point geometries...");

    if let Err(e) = transforms::build_points(
        &mut table,
        &config.template.x_column,
        &config.template.y_column,
        config.template.crs_epsg,
    ) {
        spinner.finish_and_clear();
        error!("Failed to build geometries: {}", e);
        std::process::exit(1);
    }

    spinner.set_message("Writing spatial file...");

    match writers::write_vector_file(output, &table, &config.template.layer) {
        Ok(()) => {
            spinner.finish_and_clear();

            print_summary(
                "Conversion Complete",
                &[
                    ("Input file", input.display().to_string()),
                    ("Output file", output.display().to_string()),
                    ("Records", table.len().to_string()),
                    ("CRS", format!("EPSG:{}", config.template.crs_epsg)),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Conversion failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_cell_short_values_unchanged() {
        assert_eq!(truncate_cell("surveys/peat.gpkg"), "surveys/peat.gpkg");
    }

    #[test]
    fn test_truncate_cell_counts_characters() {
        let long = "surveys/Tréshnish_Isles_peat_depth_2024_final.gpkg";
        let truncated = truncate_cell(long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 39);
    }

    #[test]
    fn test_truncate_cell_multibyte_boundary() {
        let value = "ß".repeat(45);
        assert_eq!(truncate_cell(&value), format!("{}...", "ß".repeat(36)));
    }
}
