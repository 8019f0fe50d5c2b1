use std::path::Path;

use crate::error::ImportExportError;
use crate::models::WorkoutTelemetry;

pub mod csv;

/// A row that could not be turned into telemetry
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    /// 1-based line in the source file, header included
    pub line: u64,
    pub reason: String,
}

/// Outcome of reading one telemetry file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub telemetry: Vec<WorkoutTelemetry>,
    pub skipped: Vec<SkippedRow>,
}

impl ImportReport {
    pub fn is_empty(&self) -> bool {
        self.telemetry.is_empty()
    }
}

/// Trait for reading workout telemetry from different file formats
pub trait ImportFormat {
    /// Check if this importer can handle the given file
    fn can_import(&self, file_path: &Path) -> bool;

    fn import_file(&self, file_path: &Path) -> Result<ImportReport, ImportExportError>;

    fn format_name(&self) -> &'static str;
}

/// Picks the importer for a file
pub struct ImportManager {
    importers: Vec<Box<dyn ImportFormat>>,
}

impl Default for ImportManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportManager {
    pub fn new() -> Self {
        let importers: Vec<Box<dyn ImportFormat>> = vec![Box::new(csv::TelemetryCsvImporter::new())];
        Self { importers }
    }

    /// Import a single file, auto-detecting the format
    pub fn import_file(&self, file_path: &Path) -> Result<ImportReport, ImportExportError> {
        let importer = self
            .importers
            .iter()
            .find(|i| i.can_import(file_path))
            .ok_or_else(|| ImportExportError::UnsupportedFormat {
                format: file_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            })?;

        tracing::info!(
            file = %file_path.display(),
            format = importer.format_name(),
            "Importing telemetry"
        );

        let report = importer.import_file(file_path)?;
        for skipped in &report.skipped {
            tracing::warn!(line = skipped.line, reason = %skipped.reason, "Skipped telemetry row");
        }
        Ok(report)
    }
}
