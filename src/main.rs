use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use colored::*;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use loadcal::calibration::{CalibrationObservation, CalibrationRecord};
use loadcal::config::AppConfig;
use loadcal::correction::ApplyOutcome;
use loadcal::database::SqliteStore;
use loadcal::error::LoadCalError;
use loadcal::export::{self, DateRange, ExportFormat, ExportType};
use loadcal::import::ImportManager;
use loadcal::logging::{init_logging, LogLevel};
use loadcal::models::{ActivityCategory, CalibrationSource, HeartRateInput, PowerInput, WorkoutTelemetry};
use loadcal::pmc::FormInterpretation;
use loadcal::scaling::{ProfileHandle, ScalingProfile};
use loadcal::service::CalibrationService;
use loadcal::store::{LoadStore, StoreError};

/// loadcal - Training load calibration CLI
///
/// Tracks fitness, fatigue and form from workout stress, corrects the history
/// against readings from an external platform, and learns how far local
/// stress estimates drift from that platform.
#[derive(Parser)]
#[command(name = "loadcal")]
#[command(version)]
#[command(about = "Training load calibration CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides the configured location)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Anchor the load history to known fitness and fatigue values
    Seed {
        #[arg(long)]
        fitness: Decimal,

        #[arg(long)]
        fatigue: Decimal,

        /// Day the values belong to (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Record a single workout
    Workout {
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Duration in minutes
        #[arg(long)]
        minutes: f64,

        /// Activity category (run, bike, swim, strength, other)
        #[arg(short = 'k', long)]
        category: ActivityCategory,

        /// Normalized power in watts
        #[arg(long, requires = "ftp")]
        np: Option<f64>,

        #[arg(long, requires = "np")]
        ftp: Option<f64>,

        /// Average heart rate in bpm
        #[arg(long, requires = "lthr")]
        hr: Option<f64>,

        #[arg(long, requires = "hr")]
        lthr: Option<f64>,

        /// Stress score from another platform, used verbatim
        #[arg(long)]
        tss: Option<f64>,
    },

    /// Import workouts from a telemetry file
    Import {
        /// Input file path (CSV)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Record an external reading and calibrate against it
    Observe {
        /// Observation as JSON (fields as in the flags below)
        #[arg(short, long, conflicts_with_all = ["fitness", "fatigue", "form"])]
        file: Option<PathBuf>,

        #[arg(long)]
        fitness: Option<Decimal>,

        #[arg(long)]
        fatigue: Option<Decimal>,

        #[arg(long)]
        form: Option<Decimal>,

        /// Stress the platform reports for the day
        #[arg(long)]
        daily_stress: Option<Decimal>,

        /// Stress the platform reports for the last 7 days
        #[arg(long)]
        weekly_stress: Option<Decimal>,

        /// Day the reading represents (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Extraction confidence in [0, 1]
        #[arg(long, default_value = "1.0")]
        confidence: f64,

        /// screenshot, manual or api
        #[arg(short, long, default_value = "manual")]
        source: CalibrationSource,

        /// Store the record without applying it
        #[arg(long)]
        no_apply: bool,
    },

    /// Apply a stored calibration record to the history
    Apply { id: String },

    /// Delete a calibration record; rows it already shifted keep their values
    Remove { id: String },

    /// List calibration records
    History {
        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Show or reset the learned scaling profile
    Profile {
        /// Forget all learned factors
        #[arg(long)]
        reset: bool,

        /// Turn learning on or off
        #[arg(long)]
        learning: Option<bool>,
    },

    /// Show fitness, fatigue and form for a day
    Status {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Export load history, calibrations or data points
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// load, calibrations or points
        #[arg(short = 't', long = "type", default_value = "load")]
        export_type: ExportType,

        /// csv or json
        #[arg(short = 'f', long, default_value = "csv")]
        format: ExportFormat,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Date")]
    date: NaiveDate,
    #[tabled(rename = "Source")]
    source: CalibrationSource,
    #[tabled(rename = "Fitness (obs/calc)")]
    fitness: String,
    #[tabled(rename = "Fatigue (obs/calc)")]
    fatigue: String,
    #[tabled(rename = "Trusted")]
    trusted: String,
    #[tabled(rename = "Applied")]
    applied: String,
}

impl From<&CalibrationRecord> for HistoryRow {
    fn from(record: &CalibrationRecord) -> Self {
        let pair = |observed: Option<Decimal>, computed: Decimal| match observed {
            Some(value) => format!("{} / {}", value.round_dp(1), computed.round_dp(1)),
            None => format!("- / {}", computed.round_dp(1)),
        };
        let flag = |value: bool| if value { "yes" } else { "no" }.to_string();

        HistoryRow {
            id: record.id.chars().take(8).collect(),
            date: record.effective_date,
            source: record.source,
            fitness: pair(record.observed_fitness, record.computed_fitness),
            fatigue: pair(record.observed_fatigue, record.computed_fatigue),
            trusted: flag(record.trusted),
            applied: flag(record.applied),
        }
    }
}

#[derive(Tabled)]
struct ScalingRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Factor")]
    factor: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Samples")]
    samples: u32,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<LoadCalError>() {
            Some(err) => eprintln!("{} {}", "Error:".red().bold(), err.user_message()),
            None => eprintln!("{} {:#}", "Error:".red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default(),
    };

    // Set up logging based on verbosity
    config.logging.level = match cli.verbose {
        0 => config.logging.level,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(&config.logging)?;

    let db_path = cli.database.clone().unwrap_or_else(|| config.database_path());
    let mut store = open_store(&db_path)?;
    let profile = ProfileHandle::load(&mut store).map_err(LoadCalError::from)?;
    let service = CalibrationService::new(&config, profile);
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Seed { fitness, fatigue, date } => {
            let date = date.unwrap_or(today);
            let summary = service
                .seed(&mut store, fitness, fatigue, date)
                .map_err(LoadCalError::from)?;
            println!("{}", "✓ History seeded".green().bold());
            println!("  Date: {}", date);
            println!("  Fitness: {}  Fatigue: {}", fitness, fatigue);
            println!("  Rows adjusted: {}", summary.rows_shifted);
        }

        Commands::Workout {
            date,
            minutes,
            category,
            np,
            ftp,
            hr,
            lthr,
            tss,
        } => {
            let mut telemetry = WorkoutTelemetry::new(date.unwrap_or(today), minutes * 60.0, category);
            telemetry.precalculated_stress = tss;
            if let (Some(normalized_power), Some(ftp)) = (np, ftp) {
                telemetry.power = Some(PowerInput { normalized_power, ftp });
            }
            if let (Some(average_heart_rate), Some(lthr)) = (hr, lthr) {
                telemetry.heart_rate = Some(HeartRateInput {
                    average_heart_rate,
                    lthr,
                    max_heart_rate: 0.0,
                });
            }

            let workout = service
                .record_workout(&mut store, &telemetry)
                .map_err(LoadCalError::from)?;
            println!("{}", "✓ Workout recorded".green().bold());
            println!(
                "  {} {} stress {} ({})",
                workout.date, workout.category, workout.stress_score.round_dp(1), workout.method
            );
        }

        Commands::Import { file } => {
            println!("{}", "Importing workout data...".green().bold());
            let report = ImportManager::new()
                .import_file(&file)
                .map_err(LoadCalError::from)?;
            let workouts = service
                .import_workouts(&mut store, &report.telemetry)
                .map_err(LoadCalError::from)?;

            println!("{}", format!("✓ Imported {} workouts", workouts.len()).green());
            if !report.skipped.is_empty() {
                println!(
                    "{}",
                    format!("  {} rows skipped (see log for details)", report.skipped.len()).yellow()
                );
            }
        }

        Commands::Observe {
            file,
            fitness,
            fatigue,
            form,
            daily_stress,
            weekly_stress,
            date,
            confidence,
            source,
            no_apply,
        } => {
            let observation = match file {
                Some(path) => read_observation(&path)?,
                None => CalibrationObservation {
                    effective_date: date,
                    fitness,
                    fatigue,
                    form,
                    daily_stress,
                    weekly_stress,
                    confidence,
                    raw_text: String::new(),
                },
            };

            let service = service.with_auto_apply(config.settings.auto_apply && !no_apply);
            let outcome = service
                .calibrate(&mut store, &observation, source, today)
                .map_err(LoadCalError::from)?;
            print_outcome(&outcome);
        }

        Commands::Apply { id } => {
            let record_id = resolve_record_id(&store, &id)?;
            match service.apply(&mut store, &record_id).map_err(LoadCalError::from)? {
                ApplyOutcome::Applied(summary) => {
                    println!("{}", "✓ Calibration applied".green().bold());
                    println!(
                        "  {} rows shifted, {} rows filled",
                        summary.rows_shifted, summary.rows_materialized
                    );
                }
                ApplyOutcome::NotNeeded => {
                    println!("{}", "Computed values already match; nothing to apply".cyan());
                }
            }
        }

        Commands::Remove { id } => {
            let record_id = resolve_record_id(&store, &id)?;
            let record = service
                .remove(&mut store, &record_id)
                .map_err(LoadCalError::from)?;
            println!("{}", format!("✓ Removed calibration for {}", record.effective_date).green());
        }

        Commands::History { from, to } => {
            let records = store.calibrations().map_err(LoadCalError::from)?;
            let range = DateRange::new(from, to);
            let rows: Vec<HistoryRow> = range
                .filter_calibrations(&records)
                .into_iter()
                .map(HistoryRow::from)
                .collect();

            if rows.is_empty() {
                println!("{}", "No calibration records".dimmed());
            } else {
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{}", table);
            }
        }

        Commands::Profile { reset, learning } => {
            if reset || learning.is_some() {
                let updated = service.profile().update(|profile| {
                    if reset {
                        profile.reset_learning();
                    }
                    if let Some(enabled) = learning {
                        profile.learning_enabled = enabled;
                    }
                    store.save_profile(profile)?;
                    Ok::<_, StoreError>(profile.clone())
                });
                updated.map_err(LoadCalError::from)?;
                println!("{}", "✓ Scaling profile updated".green());
            }
            print_profile(&service.profile().snapshot());
        }

        Commands::Status { date } => {
            let date = date.unwrap_or(today);
            match service
                .computed_state_on(&store, date)
                .map_err(LoadCalError::from)?
            {
                Some(state) => {
                    let interpretation = FormInterpretation::from_form(state.form);
                    println!("{}", format!("Training load on {}", date).cyan().bold());
                    println!("  Fitness: {}", state.fitness.round_dp(1));
                    println!("  Fatigue: {}", state.fatigue.round_dp(1));
                    println!("  Form:    {}", state.form.round_dp(1));
                    println!("  {}", interpretation.description().dimmed());
                }
                None => println!("{}", "No load history yet; seed or record a workout".yellow()),
            }

            let stats = store.stats().map_err(LoadCalError::from)?;
            println!(
                "  {} workouts, {} days, {} calibrations ({} applied), {} data points",
                stats.workout_count,
                stats.daily_state_count,
                stats.calibration_count,
                stats.applied_calibration_count,
                stats.data_point_count
            );
        }

        Commands::Export {
            output,
            export_type,
            format,
            from,
            to,
        } => {
            let range = DateRange::new(from, to);
            let written = match export_type {
                ExportType::LoadHistory => {
                    let states = store.daily_states().map_err(LoadCalError::from)?;
                    export::export_to_path(&range.filter_states(&states), format, &output)
                }
                ExportType::CalibrationHistory => {
                    let records = store.calibrations().map_err(LoadCalError::from)?;
                    export::export_to_path(&range.filter_calibrations(&records), format, &output)
                }
                ExportType::DataPoints => {
                    let points = store.data_points().map_err(LoadCalError::from)?;
                    export::export_to_path(&range.filter_points(&points), format, &output)
                }
            }
            .map_err(LoadCalError::from)?;

            println!(
                "{}",
                format!("✓ Exported {} rows to {}", written, output.display()).yellow()
            );
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn read_observation(path: &Path) -> Result<CalibrationObservation> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read observation: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| "Failed to parse observation JSON")
}

/// Accept either a full record id or a unique prefix of one
fn resolve_record_id(store: &SqliteStore, id: &str) -> Result<String> {
    let matches: Vec<String> = store
        .calibrations()
        .map_err(LoadCalError::from)?
        .into_iter()
        .map(|r| r.id)
        .filter(|candidate| candidate.starts_with(id))
        .collect();

    match matches.as_slice() {
        [only] => Ok(only.clone()),
        [] => Ok(id.to_string()),
        _ => Err(LoadCalError::Validation(format!(
            "'{}' matches {} calibration records, use a longer prefix",
            id,
            matches.len()
        ))
        .into()),
    }
}

fn print_outcome(outcome: &loadcal::service::CalibrationOutcome) {
    let record = &outcome.record;
    println!("{}", format!("Calibration for {}", record.effective_date).cyan().bold());
    println!(
        "  Fitness delta: {}  Fatigue delta: {}  Form delta: {}",
        record.fitness_delta.round_dp(1),
        record.fatigue_delta.round_dp(1),
        record.form_delta.round_dp(1)
    );

    match &outcome.applied {
        Some(ApplyOutcome::Applied(summary)) => println!(
            "{}",
            format!("✓ Applied to {} rows", summary.rows_shifted + summary.rows_materialized).green()
        ),
        Some(ApplyOutcome::NotNeeded) => println!("{}", "  Within tolerance; history unchanged".dimmed()),
        None if record.needs_calibration => println!(
            "{}",
            format!("  Not applied. Run `loadcal apply {}` to apply.", &record.id[..8.min(record.id.len())])
                .yellow()
        ),
        None => {}
    }

    if let Some(report) = &outcome.learning {
        println!(
            "  Learning: {} data points ({} usable)",
            report.points_created, report.points_usable
        );
        if report.summary.as_ref().is_some_and(|s| s.suggest_disabling_calibration) {
            println!(
                "{}",
                "  Local estimates now track the platform closely; calibration can be turned off.".green()
            );
        }
    }
}

fn print_profile(profile: &ScalingProfile) {
    println!("{}", "Scaling profile".cyan().bold());

    let mut rows = vec![ScalingRow {
        scope: "global".to_string(),
        factor: format!("{:.3}", profile.global_factor),
        confidence: format!("{:.0}%", profile.global_confidence * 100.0),
        samples: profile.global_sample_count,
    }];
    rows.extend(profile.categories.iter().map(|(category, scaling)| ScalingRow {
        scope: category.to_string(),
        factor: format!("{:.3}", scaling.factor),
        confidence: format!("{:.0}%", scaling.confidence * 100.0),
        samples: scaling.sample_count,
    }));

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);

    println!(
        "  Learning: {}  Scaling applied: {}",
        if profile.learning_enabled { "on" } else { "off" },
        if profile.can_apply_scaling() { "yes" } else { "no" }
    );
}
