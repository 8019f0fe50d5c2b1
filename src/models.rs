use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Activity categories tracked by the load model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Run,
    Bike,
    Swim,
    Strength,
    Other,
}

impl ActivityCategory {
    /// Categories that carry their own learned scaling factor
    pub const LEARNABLE: [ActivityCategory; 3] =
        [ActivityCategory::Bike, ActivityCategory::Run, ActivityCategory::Swim];

    pub fn is_learnable(&self) -> bool {
        Self::LEARNABLE.contains(self)
    }
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityCategory::Run => "run",
            ActivityCategory::Bike => "bike",
            ActivityCategory::Swim => "swim",
            ActivityCategory::Strength => "strength",
            ActivityCategory::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for ActivityCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "run" | "running" => Ok(ActivityCategory::Run),
            "bike" | "cycling" | "ride" => Ok(ActivityCategory::Bike),
            "swim" | "swimming" => Ok(ActivityCategory::Swim),
            "strength" | "weights" => Ok(ActivityCategory::Strength),
            "other" => Ok(ActivityCategory::Other),
            _ => Err(format!("Unknown activity category: {}", s)),
        }
    }
}

/// Method used to derive a workout stress score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressMethod {
    PreCalculated, // Imported verbatim from a coaching platform export
    Power,
    Pace,
    Swim,
    HeartRate,
    Estimate,
}

impl StressMethod {
    /// Higher is better. Pace and swim share a rank.
    pub fn quality_rank(&self) -> u8 {
        match self {
            StressMethod::PreCalculated => 5,
            StressMethod::Power => 4,
            StressMethod::Pace | StressMethod::Swim => 3,
            StressMethod::HeartRate => 2,
            StressMethod::Estimate => 1,
        }
    }
}

impl fmt::Display for StressMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StressMethod::PreCalculated => "pre_calculated",
            StressMethod::Power => "power",
            StressMethod::Pace => "pace",
            StressMethod::Swim => "swim",
            StressMethod::HeartRate => "heart_rate",
            StressMethod::Estimate => "estimate",
        };
        f.write_str(s)
    }
}

impl FromStr for StressMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_calculated" => Ok(StressMethod::PreCalculated),
            "power" => Ok(StressMethod::Power),
            "pace" => Ok(StressMethod::Pace),
            "swim" => Ok(StressMethod::Swim),
            "heart_rate" => Ok(StressMethod::HeartRate),
            "estimate" => Ok(StressMethod::Estimate),
            _ => Err(format!("Unknown stress method: {}", s)),
        }
    }
}

/// Where the values of a daily row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Computed,
    ManualSeed,
    CalibrationAdjusted,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Computed => "computed",
            Provenance::ManualSeed => "manual_seed",
            Provenance::CalibrationAdjusted => "calibration_adjusted",
        };
        f.write_str(s)
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "computed" => Ok(Provenance::Computed),
            "manual_seed" => Ok(Provenance::ManualSeed),
            "calibration_adjusted" => Ok(Provenance::CalibrationAdjusted),
            _ => Err(format!("Unknown provenance: {}", s)),
        }
    }
}

/// Origin of a calibration record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    Screenshot,
    Manual,
    InitialSeed,
    Api,
}

impl fmt::Display for CalibrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalibrationSource::Screenshot => "screenshot",
            CalibrationSource::Manual => "manual",
            CalibrationSource::InitialSeed => "initial_seed",
            CalibrationSource::Api => "api",
        };
        f.write_str(s)
    }
}

impl FromStr for CalibrationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screenshot" => Ok(CalibrationSource::Screenshot),
            "manual" => Ok(CalibrationSource::Manual),
            "initial_seed" => Ok(CalibrationSource::InitialSeed),
            "api" => Ok(CalibrationSource::Api),
            _ => Err(format!("Unknown calibration source: {}", s)),
        }
    }
}

/// How a learning data point's extracted stress was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationMethod {
    Direct,
    DerivedFromFitness,
    DerivedFromFatigue,
    CrossValidated,
    Manual,
}

impl fmt::Display for DerivationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DerivationMethod::Direct => "direct",
            DerivationMethod::DerivedFromFitness => "derived_from_fitness",
            DerivationMethod::DerivedFromFatigue => "derived_from_fatigue",
            DerivationMethod::CrossValidated => "cross_validated",
            DerivationMethod::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl FromStr for DerivationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(DerivationMethod::Direct),
            "derived_from_fitness" => Ok(DerivationMethod::DerivedFromFitness),
            "derived_from_fatigue" => Ok(DerivationMethod::DerivedFromFatigue),
            "cross_validated" => Ok(DerivationMethod::CrossValidated),
            "manual" => Ok(DerivationMethod::Manual),
            _ => Err(format!("Unknown derivation method: {}", s)),
        }
    }
}

/// Training load state for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLoadState {
    /// Calendar day
    pub date: NaiveDate,

    /// Sum of the day's workout stress after prospective scaling
    pub total_stress: Decimal,

    /// Sum of the day's workout stress as estimated, before scaling
    pub raw_stress: Decimal,

    /// Fitness (CTL)
    pub fitness: Decimal,

    /// Fatigue (ATL)
    pub fatigue: Decimal,

    /// Form (TSB), always fitness - fatigue
    pub form: Decimal,

    pub provenance: Provenance,
}

impl DailyLoadState {
    pub fn new(
        date: NaiveDate,
        total_stress: Decimal,
        raw_stress: Decimal,
        fitness: Decimal,
        fatigue: Decimal,
        provenance: Provenance,
    ) -> Self {
        Self {
            date,
            total_stress,
            raw_stress,
            fitness,
            fatigue,
            form: fitness - fatigue,
            provenance,
        }
    }

    /// Empty row with zero load
    pub fn zero(date: NaiveDate) -> Self {
        Self::new(
            date,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Provenance::Computed,
        )
    }

    /// Set fitness and fatigue, re-deriving form
    pub fn set_levels(&mut self, fitness: Decimal, fatigue: Decimal) {
        self.fitness = fitness;
        self.fatigue = fatigue;
        self.form = fitness - fatigue;
    }

    /// Additive shift; a `None` delta leaves that channel untouched
    pub fn shift(&mut self, fitness_delta: Option<Decimal>, fatigue_delta: Option<Decimal>) {
        let fitness = self.fitness + fitness_delta.unwrap_or(Decimal::ZERO);
        let fatigue = self.fatigue + fatigue_delta.unwrap_or(Decimal::ZERO);
        self.set_levels(fitness, fatigue);
    }

    pub fn is_form_consistent(&self) -> bool {
        self.form == self.fitness - self.fatigue
    }
}

/// Per-workout stress score, immutable once computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutStressRecord {
    pub id: String,

    /// Day the workout counts towards
    pub date: NaiveDate,

    pub duration_seconds: f64,

    /// Distance in meters when known
    pub distance_meters: Option<f64>,

    pub category: ActivityCategory,

    /// Stress score before any learned scaling
    pub stress_score: Decimal,

    pub intensity_factor: Option<Decimal>,

    pub method: StressMethod,
}

/// Power inputs (normalized power and FTP, watts)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerInput {
    pub normalized_power: f64,
    pub ftp: f64,
}

/// Pace inputs in seconds per unit distance (lower is faster)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaceInput {
    pub normalized_pace: f64,
    pub threshold_pace: f64,
}

/// Heart-rate inputs in bpm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateInput {
    pub average_heart_rate: f64,
    pub lthr: f64,
    pub max_heart_rate: f64,
}

/// Raw workout telemetry as supplied by ingestion or import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutTelemetry {
    pub id: Option<String>,
    pub date: NaiveDate,
    pub duration_seconds: f64,
    #[serde(default)]
    pub distance_meters: Option<f64>,
    pub category: ActivityCategory,
    #[serde(default)]
    pub power: Option<PowerInput>,
    #[serde(default)]
    pub pace: Option<PaceInput>,
    #[serde(default)]
    pub swim: Option<PaceInput>,
    #[serde(default)]
    pub heart_rate: Option<HeartRateInput>,
    /// Stress score taken verbatim from an export
    #[serde(default)]
    pub precalculated_stress: Option<f64>,
}

impl WorkoutTelemetry {
    /// Telemetry with only duration and category; stress falls back to an estimate
    pub fn new(date: NaiveDate, duration_seconds: f64, category: ActivityCategory) -> Self {
        Self {
            id: None,
            date,
            duration_seconds,
            distance_meters: None,
            category,
            power: None,
            pace: None,
            swim: None,
            heart_rate: None,
            precalculated_stress: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_category_parsing() {
        assert_eq!("Running".parse::<ActivityCategory>().unwrap(), ActivityCategory::Run);
        assert_eq!("bike".parse::<ActivityCategory>().unwrap(), ActivityCategory::Bike);
        assert!("kayak".parse::<ActivityCategory>().is_err());
        assert!(ActivityCategory::Swim.is_learnable());
        assert!(!ActivityCategory::Strength.is_learnable());
    }

    #[test]
    fn test_method_quality_ordering() {
        assert!(StressMethod::PreCalculated.quality_rank() > StressMethod::Power.quality_rank());
        assert!(StressMethod::Power.quality_rank() > StressMethod::Pace.quality_rank());
        assert_eq!(StressMethod::Pace.quality_rank(), StressMethod::Swim.quality_rank());
        assert!(StressMethod::Swim.quality_rank() > StressMethod::HeartRate.quality_rank());
        assert!(StressMethod::HeartRate.quality_rank() > StressMethod::Estimate.quality_rank());
    }

    #[test]
    fn test_enum_string_round_trip() {
        for method in [
            DerivationMethod::Direct,
            DerivationMethod::DerivedFromFitness,
            DerivationMethod::DerivedFromFatigue,
            DerivationMethod::CrossValidated,
            DerivationMethod::Manual,
        ] {
            assert_eq!(method.to_string().parse::<DerivationMethod>().unwrap(), method);
        }
        assert_eq!(
            "calibration_adjusted".parse::<Provenance>().unwrap(),
            Provenance::CalibrationAdjusted
        );
    }

    #[test]
    fn test_daily_state_form_tracks_levels() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let mut state =
            DailyLoadState::new(date, dec!(80), dec!(80), dec!(50), dec!(60), Provenance::Computed);
        assert_eq!(state.form, dec!(-10));

        state.shift(Some(dec!(10)), None);
        assert_eq!(state.fitness, dec!(60));
        assert_eq!(state.fatigue, dec!(60));
        assert_eq!(state.form, dec!(0));
        assert!(state.is_form_consistent());
    }

    #[test]
    fn test_telemetry_deserializes_with_defaults() {
        let json = r#"{"id":null,"date":"2024-09-01","duration_seconds":3600.0,"category":"bike",
            "power":{"normalized_power":250.0,"ftp":250.0}}"#;
        let telemetry: WorkoutTelemetry = serde_json::from_str(json).unwrap();
        assert_eq!(telemetry.category, ActivityCategory::Bike);
        assert!(telemetry.power.is_some());
        assert!(telemetry.heart_rate.is_none());
    }
}
