//! Comparison of external observations against the computed load state.
//!
//! Every observation that passes the validity gate produces exactly one
//! [`CalibrationRecord`]. Trust (confidence and presence of values) and need
//! (any delta over the threshold) are decided here, independently of each other.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CalibrationSource, DailyLoadState};
use crate::store::StoreError;

/// Calibration thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Absolute delta (load units) above which a record needs calibration
    pub delta_threshold: Decimal,

    /// Minimum confidence for a record to be applied
    pub trust_confidence: f64,

    /// Minimum confidence for an observation to be recorded at all
    pub min_observation_confidence: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            delta_threshold: dec!(5.0),
            trust_confidence: 0.7,
            min_observation_confidence: 0.5,
        }
    }
}

/// Calibration flow errors
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Observation too uncertain or without any extracted values
    #[error("No usable values: {reason}")]
    NoUsableValues { reason: String },

    /// Record exists but is not trustworthy enough to apply
    #[error("Confidence {confidence:.2} is below the required {required:.2}")]
    LowConfidence { confidence: f64, required: f64 },

    #[error("Calibration {0} has already been applied")]
    AlreadyApplied(String),

    #[error("Calibration not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// External reading of fitness/fatigue/form, typically from screenshot extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationObservation {
    /// Day the values represent; defaults to the capture date
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub fitness: Option<Decimal>,
    #[serde(default)]
    pub fatigue: Option<Decimal>,
    #[serde(default)]
    pub form: Option<Decimal>,
    #[serde(default)]
    pub daily_stress: Option<Decimal>,
    #[serde(default)]
    pub weekly_stress: Option<Decimal>,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub raw_text: String,
}

impl CalibrationObservation {
    pub fn has_load_values(&self) -> bool {
        self.fitness.is_some() || self.fatigue.is_some() || self.form.is_some()
    }

    pub fn has_stress_values(&self) -> bool {
        self.daily_stress.is_some() || self.weekly_stress.is_some()
    }

    /// Recordable: confident enough and carries at least one load value
    pub fn is_valid(&self, config: &CalibrationConfig) -> bool {
        self.confidence.is_finite()
            && self.confidence >= config.min_observation_confidence
            && self.has_load_values()
    }

    /// Why `is_valid` failed, for the user-facing message
    pub fn rejection_reason(&self, config: &CalibrationConfig) -> Option<String> {
        if !self.has_load_values() {
            return Some("no fitness, fatigue or form value was extracted".to_string());
        }
        if !self.confidence.is_finite() || self.confidence < config.min_observation_confidence {
            return Some(format!(
                "extraction confidence {:.2} is below {:.2}",
                self.confidence, config.min_observation_confidence
            ));
        }
        None
    }

    /// Direct stress totals, or fitness/fatigue readings the deriver can pair with the day before
    pub fn has_learning_evidence(&self) -> bool {
        self.has_stress_values() || self.fitness.is_some() || self.fatigue.is_some()
    }
}

/// Persisted comparison between an observation and the computed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub id: String,

    pub effective_date: NaiveDate,

    pub created_at: DateTime<Utc>,

    pub observed_fitness: Option<Decimal>,
    pub observed_fatigue: Option<Decimal>,
    pub observed_form: Option<Decimal>,

    /// Directly stated stress totals, kept for learning
    pub observed_daily_stress: Option<Decimal>,
    pub observed_weekly_stress: Option<Decimal>,

    pub computed_fitness: Decimal,
    pub computed_fatigue: Decimal,
    pub computed_form: Decimal,

    /// observed - computed; zero where nothing was observed
    pub fitness_delta: Decimal,
    pub fatigue_delta: Decimal,
    pub form_delta: Decimal,

    /// Any delta exceeded the threshold at build time
    pub needs_calibration: bool,

    /// Confident enough and has at least one observed value
    pub trusted: bool,

    pub applied: bool,

    pub note: Option<String>,

    pub confidence: f64,

    pub source: CalibrationSource,

    pub raw_text: String,
}

impl CalibrationRecord {
    pub fn has_observed_values(&self) -> bool {
        self.observed_fitness.is_some()
            || self.observed_fatigue.is_some()
            || self.observed_form.is_some()
    }

    pub fn needs_calibration(&self) -> bool {
        self.needs_calibration
    }

    pub fn is_trustworthy(&self) -> bool {
        self.trusted
    }

    /// Shift for the fitness channel, only when fitness was observed
    pub fn fitness_shift(&self) -> Option<Decimal> {
        self.observed_fitness.map(|_| self.fitness_delta)
    }

    /// Shift for the fatigue channel, only when fatigue was observed
    pub fn fatigue_shift(&self) -> Option<Decimal> {
        self.observed_fatigue.map(|_| self.fatigue_delta)
    }
}

/// Builds calibration records from observations
#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    config: CalibrationConfig,
}

impl RecordBuilder {
    pub fn new(config: CalibrationConfig) -> Self {
        RecordBuilder { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Compare an observation with the computed row for its effective date.
    /// `computed` should already be projected to that date; `None` means zero load.
    pub fn build(
        &self,
        observation: &CalibrationObservation,
        computed: Option<&DailyLoadState>,
        source: CalibrationSource,
        capture_date: NaiveDate,
    ) -> CalibrationRecord {
        let effective_date = observation.effective_date.unwrap_or(capture_date);

        let (computed_fitness, computed_fatigue, computed_form) = computed
            .map(|s| (s.fitness, s.fatigue, s.form))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));

        // An absent reading counts as agreeing with the computed value
        let fitness_delta = observation
            .fitness
            .map_or(Decimal::ZERO, |v| v - computed_fitness);
        let fatigue_delta = observation
            .fatigue
            .map_or(Decimal::ZERO, |v| v - computed_fatigue);
        let form_delta = observation
            .form
            .map_or(Decimal::ZERO, |v| v - computed_form);

        let threshold = self.config.delta_threshold;
        let needs_calibration = [fitness_delta, fatigue_delta, form_delta]
            .iter()
            .any(|d| d.abs() > threshold);

        let trusted = observation.confidence.is_finite()
            && observation.confidence >= self.config.trust_confidence
            && observation.has_load_values();

        let record = CalibrationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            effective_date,
            created_at: Utc::now(),
            observed_fitness: observation.fitness,
            observed_fatigue: observation.fatigue,
            observed_form: observation.form,
            observed_daily_stress: observation.daily_stress,
            observed_weekly_stress: observation.weekly_stress,
            computed_fitness,
            computed_fatigue,
            computed_form,
            fitness_delta,
            fatigue_delta,
            form_delta,
            needs_calibration,
            trusted,
            applied: false,
            note: None,
            confidence: observation.confidence,
            source,
            raw_text: observation.raw_text.clone(),
        };

        tracing::info!(
            id = %record.id,
            date = %effective_date,
            source = %source,
            fitness_delta = %fitness_delta,
            fatigue_delta = %fatigue_delta,
            form_delta = %form_delta,
            needs_calibration,
            trusted,
            "Calibration record built"
        );

        record
    }

    /// Manual seed: maximum-confidence reading of fitness and fatigue
    pub fn seed(
        &self,
        fitness: Decimal,
        fatigue: Decimal,
        date: NaiveDate,
        computed: Option<&DailyLoadState>,
    ) -> CalibrationRecord {
        let observation = CalibrationObservation {
            effective_date: Some(date),
            fitness: Some(fitness),
            fatigue: Some(fatigue),
            form: Some(fitness - fatigue),
            daily_stress: None,
            weekly_stress: None,
            confidence: 1.0,
            raw_text: format!("Initial seed: fitness {}, fatigue {}", fitness, fatigue),
        };
        self.build(&observation, computed, CalibrationSource::InitialSeed, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    fn computed() -> DailyLoadState {
        DailyLoadState::new(date(), dec!(50), dec!(50), dec!(70), dec!(60), Provenance::Computed)
    }

    fn observation() -> CalibrationObservation {
        CalibrationObservation {
            effective_date: Some(date()),
            fitness: Some(dec!(80)),
            fatigue: None,
            form: None,
            daily_stress: None,
            weekly_stress: None,
            confidence: 0.9,
            raw_text: "Fitness 80".to_string(),
        }
    }

    #[test]
    fn test_deltas_and_need() {
        let builder = RecordBuilder::default();
        let record = builder.build(&observation(), Some(&computed()), CalibrationSource::Screenshot, date());

        assert_eq!(record.fitness_delta, dec!(10));
        assert_eq!(record.fatigue_delta, Decimal::ZERO);
        assert_eq!(record.form_delta, Decimal::ZERO);
        assert!(record.needs_calibration());
        assert!(record.is_trustworthy());
        assert_eq!(record.fitness_shift(), Some(dec!(10)));
        assert_eq!(record.fatigue_shift(), None);
        assert!(!record.applied);
    }

    #[test]
    fn test_small_delta_does_not_need_calibration() {
        let builder = RecordBuilder::default();
        let mut obs = observation();
        obs.fitness = Some(dec!(75));
        let record = builder.build(&obs, Some(&computed()), CalibrationSource::Screenshot, date());
        assert!(!record.needs_calibration());
        assert!(record.is_trustworthy());
    }

    #[test]
    fn test_trust_is_independent_of_need() {
        let builder = RecordBuilder::default();
        let mut obs = observation();
        obs.confidence = 0.6;
        let record = builder.build(&obs, Some(&computed()), CalibrationSource::Screenshot, date());
        assert!(record.needs_calibration());
        assert!(!record.is_trustworthy());
    }

    #[test]
    fn test_effective_date_defaults_to_capture() {
        let builder = RecordBuilder::default();
        let mut obs = observation();
        obs.effective_date = None;
        let capture = NaiveDate::from_ymd_opt(2024, 10, 5).unwrap();
        let record = builder.build(&obs, None, CalibrationSource::Manual, capture);
        assert_eq!(record.effective_date, capture);
        assert_eq!(record.fitness_delta, dec!(80));
    }

    #[test]
    fn test_observation_validity() {
        let config = CalibrationConfig::default();
        assert!(observation().is_valid(&config));

        let mut low = observation();
        low.confidence = 0.4;
        assert!(!low.is_valid(&config));
        assert!(low.rejection_reason(&config).unwrap().contains("confidence"));

        let mut empty = observation();
        empty.fitness = None;
        empty.daily_stress = Some(dec!(90));
        assert!(!empty.is_valid(&config));
        assert!(empty.has_learning_evidence());

        let mut nan = observation();
        nan.confidence = f64::NAN;
        assert!(!nan.is_valid(&config));
    }

    #[test]
    fn test_seed_record() {
        let builder = RecordBuilder::default();
        let record = builder.seed(dec!(45), dec!(30), date(), None);
        assert_eq!(record.source, CalibrationSource::InitialSeed);
        assert_eq!(record.confidence, 1.0);
        assert!(record.is_trustworthy());
        assert_eq!(record.observed_form, Some(dec!(15)));
    }
}
