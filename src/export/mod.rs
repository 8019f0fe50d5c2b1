use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::calibration::CalibrationRecord;
use crate::derivation::TssCalibrationDataPoint;
use crate::error::ImportExportError;
use crate::models::DailyLoadState;

pub mod csv;
pub mod json;

/// Export format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = ImportExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(ImportExportError::UnsupportedFormat { format: s.to_string() }),
        }
    }
}

/// What to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportType {
    /// Daily fitness/fatigue/form series
    LoadHistory,
    /// Calibration records with their deltas
    CalibrationHistory,
    /// Learning data points
    DataPoints,
}

impl std::str::FromStr for ExportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "load" | "load_history" | "pmc" => Ok(ExportType::LoadHistory),
            "calibrations" | "calibration_history" => Ok(ExportType::CalibrationHistory),
            "points" | "data_points" => Ok(ExportType::DataPoints),
            _ => Err(format!("Unknown export type: {}", s)),
        }
    }
}

/// Date range filter for exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        DateRange { start, end }
    }

    /// Check if a date falls within this range
    pub fn contains(&self, date: &NaiveDate) -> bool {
        let after_start = self.start.map_or(true, |start| date >= &start);
        let before_end = self.end.map_or(true, |end| date <= &end);
        after_start && before_end
    }

    pub fn filter_states<'a>(&self, states: &'a [DailyLoadState]) -> Vec<&'a DailyLoadState> {
        states.iter().filter(|s| self.contains(&s.date)).collect()
    }

    pub fn filter_calibrations<'a>(
        &self,
        records: &'a [CalibrationRecord],
    ) -> Vec<&'a CalibrationRecord> {
        records
            .iter()
            .filter(|r| self.contains(&r.effective_date))
            .collect()
    }

    pub fn filter_points<'a>(
        &self,
        points: &'a [TssCalibrationDataPoint],
    ) -> Vec<&'a TssCalibrationDataPoint> {
        points
            .iter()
            .filter(|p| self.contains(&p.effective_date))
            .collect()
    }
}

/// Write rows in the chosen format to any writer
pub fn write_rows<T, W>(rows: &[&T], format: ExportFormat, writer: W) -> Result<(), ImportExportError>
where
    T: Serialize,
    W: Write,
{
    match format {
        ExportFormat::Csv => csv::write_records(rows, writer),
        ExportFormat::Json => json::write_json(&rows, writer),
    }
}

/// Write rows to a file, creating parent directories as needed
pub fn export_to_path<T, P>(
    rows: &[&T],
    format: ExportFormat,
    output_path: P,
) -> Result<usize, ImportExportError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = output_path.as_ref();
    let failed = |e: std::io::Error| ImportExportError::ExportFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(failed)?;
    }
    let file = File::create(path).map_err(failed)?;
    write_rows(rows, format, BufWriter::new(file))?;

    tracing::info!(path = %path.display(), rows = rows.len(), ?format, "Export written");
    Ok(rows.len())
}
