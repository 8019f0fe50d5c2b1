use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::ImportExportError;
use crate::import::{ImportFormat, ImportReport, SkippedRow};
use crate::models::{ActivityCategory, HeartRateInput, PaceInput, PowerInput, WorkoutTelemetry};

/// Telemetry CSV importer with flexible column mapping.
/// One row per workout; only `date`, `duration` and `category` are required.
pub struct TelemetryCsvImporter {
    column_mapping: HashMap<String, String>,
}

impl Default for TelemetryCsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCsvImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        // Common column name variations
        Self::add_mapping(&mut column_mapping, "id", &["id", "workout_id", "activity_id"]);
        Self::add_mapping(&mut column_mapping, "date", &["date", "day", "workout_date", "start_date"]);
        Self::add_mapping(
            &mut column_mapping,
            "duration",
            &["duration", "duration_seconds", "duration_s", "elapsed_time", "moving_time"],
        );
        Self::add_mapping(&mut column_mapping, "category", &["category", "sport", "activity_type", "type"]);
        Self::add_mapping(&mut column_mapping, "distance", &["distance", "distance_m", "distance_meters"]);
        Self::add_mapping(&mut column_mapping, "normalized_power", &["normalized_power", "np"]);
        Self::add_mapping(&mut column_mapping, "ftp", &["ftp", "functional_threshold_power"]);
        Self::add_mapping(
            &mut column_mapping,
            "normalized_pace",
            &["normalized_pace", "ngp", "normalized_graded_pace"],
        );
        Self::add_mapping(&mut column_mapping, "threshold_pace", &["threshold_pace", "ftpa"]);
        Self::add_mapping(&mut column_mapping, "swim_pace", &["swim_pace"]);
        Self::add_mapping(&mut column_mapping, "swim_threshold_pace", &["swim_threshold_pace", "css"]);
        Self::add_mapping(
            &mut column_mapping,
            "average_heart_rate",
            &["average_heart_rate", "avg_hr", "heart_rate", "hr"],
        );
        Self::add_mapping(&mut column_mapping, "lthr", &["lthr", "threshold_heart_rate"]);
        Self::add_mapping(&mut column_mapping, "max_heart_rate", &["max_heart_rate", "max_hr"]);
        Self::add_mapping(&mut column_mapping, "stress", &["stress", "tss", "training_stress_score"]);

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, String>, standard: &str, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard.to_string());
        }
    }

    fn normalize_column_name(&self, name: &str) -> String {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");

        self.column_mapping
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    fn parse_date(value: &str) -> Result<NaiveDate, String> {
        let formats = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
        let value = value.trim();

        for format in &formats {
            if let Ok(date) = NaiveDate::parse_from_str(value, format) {
                return Ok(date);
            }
            if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(value, format) {
                return Ok(datetime.date());
            }
        }

        Err(format!("unable to parse date '{}'", value))
    }

    /// Read telemetry rows from any reader
    pub fn read<R: Read>(&self, reader: R) -> Result<ImportReport, ImportExportError> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| self.normalize_column_name(h))
            .collect();

        for required in ["date", "duration", "category"] {
            if !headers.iter().any(|h| h == required) {
                return Err(ImportExportError::MissingData {
                    field: required.to_string(),
                });
            }
        }

        let mut report = ImportReport::default();
        for (index, record) in csv_reader.records().enumerate() {
            let line = record
                .as_ref()
                .ok()
                .and_then(|r| r.position())
                .map_or(index as u64 + 2, |p| p.line());

            match record
                .map_err(|e| e.to_string())
                .and_then(|r| Self::parse_row(&headers, &r))
            {
                Ok(telemetry) => report.telemetry.push(telemetry),
                Err(reason) => report.skipped.push(SkippedRow { line, reason }),
            }
        }

        Ok(report)
    }

    fn parse_row(headers: &[String], record: &StringRecord) -> Result<WorkoutTelemetry, String> {
        let row = Row { headers, record };
        let date = Self::parse_date(row.field("date").ok_or("missing date")?)?;
        let duration = row.number("duration")?.ok_or("missing duration")?;
        let category: ActivityCategory = row.field("category").ok_or("missing category")?.parse()?;

        let mut telemetry = WorkoutTelemetry::new(date, duration, category);
        telemetry.id = row.field("id").map(str::to_string);
        telemetry.distance_meters = row.number("distance")?;
        telemetry.precalculated_stress = row.number("stress")?;

        if let (Some(normalized_power), Some(ftp)) = (row.number("normalized_power")?, row.number("ftp")?) {
            telemetry.power = Some(PowerInput { normalized_power, ftp });
        }
        if let (Some(normalized_pace), Some(threshold_pace)) =
            (row.number("normalized_pace")?, row.number("threshold_pace")?)
        {
            telemetry.pace = Some(PaceInput { normalized_pace, threshold_pace });
        }
        if let (Some(normalized_pace), Some(threshold_pace)) =
            (row.number("swim_pace")?, row.number("swim_threshold_pace")?)
        {
            telemetry.swim = Some(PaceInput { normalized_pace, threshold_pace });
        }
        if let (Some(average_heart_rate), Some(lthr)) = (row.number("average_heart_rate")?, row.number("lthr")?) {
            telemetry.heart_rate = Some(HeartRateInput {
                average_heart_rate,
                lthr,
                // 0 disables the max-HR cap
                max_heart_rate: row.number("max_heart_rate")?.unwrap_or(0.0),
            });
        }

        Ok(telemetry)
    }
}

struct Row<'a> {
    headers: &'a [String],
    record: &'a StringRecord,
}

impl<'a> Row<'a> {
    fn field(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| self.record.get(i))
            .filter(|v| !v.is_empty())
    }

    fn number(&self, name: &str) -> Result<Option<f64>, String> {
        self.field(name)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| format!("invalid number '{}' in column {}", v, name))
            })
            .transpose()
    }
}

impl ImportFormat for TelemetryCsvImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
    }

    fn import_file(&self, file_path: &Path) -> Result<ImportReport, ImportExportError> {
        let file = std::fs::File::open(file_path).map_err(|e| ImportExportError::ParseError {
            format: "csv".to_string(),
            reason: format!("{}: {}", file_path.display(), e),
        })?;
        self.read(file)
    }

    fn format_name(&self) -> &'static str {
        "CSV"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
Date,Duration,Sport,NP,FTP,Avg HR,LTHR,TSS
2024-09-01,3600,Cycling,250,250,,,
2024-09-02,2700,run,,,150,165,
2024-09-03,1800,swim,,,,,42.5
2024-09-04,abc,run,,,,,
2024-09-05,3600,kayak,,,,,
";

    #[test]
    fn test_column_name_variations() {
        let importer = TelemetryCsvImporter::new();
        assert_eq!(importer.normalize_column_name("Avg HR"), "average_heart_rate");
        assert_eq!(importer.normalize_column_name("sport"), "category");
        assert_eq!(importer.normalize_column_name("TSS"), "stress");
        assert_eq!(importer.normalize_column_name("cadence"), "cadence");
    }

    #[test]
    fn test_reads_rows_and_reports_skips() {
        let report = TelemetryCsvImporter::new().read(SAMPLE.as_bytes()).unwrap();

        assert_eq!(report.telemetry.len(), 3);
        let ride = &report.telemetry[0];
        assert_eq!(ride.category, ActivityCategory::Bike);
        assert_eq!(ride.power, Some(PowerInput { normalized_power: 250.0, ftp: 250.0 }));

        let run = &report.telemetry[1];
        assert_eq!(run.heart_rate.unwrap().lthr, 165.0);
        assert_eq!(run.heart_rate.unwrap().max_heart_rate, 0.0);

        assert_eq!(report.telemetry[2].precalculated_stress, Some(42.5));

        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].line, 5);
        assert!(report.skipped[0].reason.contains("duration"));
        assert!(report.skipped[1].reason.contains("kayak"));
    }

    #[test]
    fn test_missing_required_column() {
        let result = TelemetryCsvImporter::new().read("date,sport\n2024-09-01,run\n".as_bytes());
        assert!(matches!(
            result,
            Err(ImportExportError::MissingData { field }) if field == "duration"
        ));
    }

    #[test]
    fn test_import_file_via_manager() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let report = crate::import::ImportManager::new().import_file(file.path()).unwrap();
        assert_eq!(report.telemetry.len(), 3);

        let unsupported = crate::import::ImportManager::new().import_file(Path::new("ride.fit"));
        assert!(matches!(unsupported, Err(ImportExportError::UnsupportedFormat { .. })));
    }
}
