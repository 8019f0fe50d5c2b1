//! Turns calibration events into weighted learning samples.
//!
//! A record yields a direct sample when the platform stated a stress total,
//! and a derived sample when fitness/fatigue readings exist for the record's
//! day and the day before, by inverting the load recurrence.

use chrono::{Days, NaiveDate};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationRecord;
use crate::models::{ActivityCategory, CalibrationSource, DerivationMethod};
use crate::pmc::{CategoryMix, LoadConfig};
use crate::store::{LoadStore, StoreError};

/// Minimum confidence for a sample to feed the learner
pub const MIN_LEARNING_CONFIDENCE: f64 = 0.5;

/// Default recency half-life in days
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Ratios outside this range are stored but flagged invalid
pub const PLAUSIBLE_RATIO_RANGE: (f64, f64) = (0.5, 3.0);

/// Learning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Half-life of a sample's time weight
    pub half_life_days: f64,

    /// Confidence multiplier for samples inferred from fitness/fatigue changes
    pub derived_confidence_discount: f64,

    /// Minimum agreement between the two derived estimates
    pub min_agreement: f64,

    /// Pseudo-weight shrinking confidence while evidence is thin
    pub prior_mass: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        LearningConfig {
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            derived_confidence_discount: 0.9,
            min_agreement: 0.8,
            prior_mass: 0.5,
        }
    }
}

/// One unit of evidence about the bias between computed and platform stress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TssCalibrationDataPoint {
    pub id: String,

    /// Record this sample came from
    pub calibration_id: String,

    pub effective_date: NaiveDate,

    pub extracted_stress: Decimal,

    /// Unscaled computed stress for the same day
    pub computed_stress: Decimal,

    pub extracted_weekly_stress: Option<Decimal>,
    pub computed_weekly_stress: Option<Decimal>,

    /// extracted / computed; `None` when computed stress is zero
    pub scaling_ratio: Option<f64>,

    /// Dominant category of the day
    pub category: Option<ActivityCategory>,

    pub multi_sport: bool,

    pub method: DerivationMethod,

    pub confidence: f64,

    pub valid: bool,

    pub invalidation_reason: Option<String>,
}

impl TssCalibrationDataPoint {
    #[allow(clippy::too_many_arguments)]
    fn new(
        record: &CalibrationRecord,
        extracted: Decimal,
        computed: Decimal,
        weekly: Option<(Decimal, Decimal)>,
        mix: CategoryMix,
        method: DerivationMethod,
        confidence: f64,
    ) -> Self {
        let ratio_source = weekly.unwrap_or((extracted, computed));
        let scaling_ratio = ratio(ratio_source.0, ratio_source.1);

        let mut point = TssCalibrationDataPoint {
            id: uuid::Uuid::new_v4().to_string(),
            calibration_id: record.id.clone(),
            effective_date: record.effective_date,
            extracted_stress: extracted,
            computed_stress: computed,
            extracted_weekly_stress: weekly.map(|(e, _)| e),
            computed_weekly_stress: weekly.map(|(_, c)| c),
            scaling_ratio,
            category: mix.dominant,
            multi_sport: mix.multi_sport,
            method,
            confidence: confidence.clamp(0.0, 1.0),
            valid: true,
            invalidation_reason: None,
        };

        if let Some(r) = scaling_ratio {
            let (low, high) = PLAUSIBLE_RATIO_RANGE;
            if !(low..=high).contains(&r) {
                point.invalidate(&format!("implausible scaling ratio {:.3}", r));
            }
        }

        point
    }

    pub fn invalidate(&mut self, reason: &str) {
        self.valid = false;
        self.invalidation_reason = Some(reason.to_string());
    }

    pub fn is_usable_for_learning(&self) -> bool {
        self.valid
            && self.scaling_ratio.is_some()
            && self.confidence >= MIN_LEARNING_CONFIDENCE
            && self.computed_stress > Decimal::ZERO
    }

    /// Single-sport sample attributable to one category
    pub fn is_single_sport(&self) -> bool {
        !self.multi_sport && self.category.is_some()
    }

    pub fn age_in_days(&self, as_of: NaiveDate) -> f64 {
        (as_of - self.effective_date).num_days().max(0) as f64
    }

    /// 0.5 ^ (age / half-life)
    pub fn time_weight_with(&self, as_of: NaiveDate, half_life_days: f64) -> f64 {
        let half_life = if half_life_days > 0.0 {
            half_life_days
        } else {
            DEFAULT_HALF_LIFE_DAYS
        };
        0.5_f64.powf(self.age_in_days(as_of) / half_life)
    }

    pub fn time_weight(&self, as_of: NaiveDate) -> f64 {
        self.time_weight_with(as_of, DEFAULT_HALF_LIFE_DAYS)
    }

    pub fn learning_weight_with(&self, as_of: NaiveDate, half_life_days: f64) -> f64 {
        self.time_weight_with(as_of, half_life_days) * self.confidence
    }

    pub fn learning_weight(&self, as_of: NaiveDate) -> f64 {
        self.learning_weight_with(as_of, DEFAULT_HALF_LIFE_DAYS)
    }
}

fn midpoint(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_add(b).map(|sum| sum / Decimal::TWO)
}

fn ratio(extracted: Decimal, computed: Decimal) -> Option<f64> {
    if computed <= Decimal::ZERO {
        return None;
    }
    extracted
        .checked_div(computed)
        .and_then(|r| r.to_f64())
        .filter(|r| r.is_finite())
}

/// Fitness and fatigue readings for one day
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoadReadings {
    pub fitness: Option<Decimal>,
    pub fatigue: Option<Decimal>,
}

impl LoadReadings {
    pub fn from_record(record: &CalibrationRecord) -> Self {
        LoadReadings {
            fitness: record.observed_fitness,
            fatigue: record.observed_fatigue,
        }
    }
}

/// Stress implied by a change in one load channel, clamped to zero
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedStress {
    pub stress: Decimal,
    pub method: DerivationMethod,
    pub confidence: f64,
}

/// Converts calibration records into learning samples
#[derive(Debug, Clone, Default)]
pub struct DataPointDeriver {
    config: LearningConfig,
    load: LoadConfig,
}

impl DataPointDeriver {
    pub fn new(config: LearningConfig, load: LoadConfig) -> Self {
        DataPointDeriver { config, load }
    }

    /// Invert the recurrence: stress = tau × (today - yesterday) + yesterday.
    /// `None` when the readings are too large to invert.
    pub fn invert(tau: Decimal, today: Decimal, yesterday: Decimal) -> Option<Decimal> {
        today
            .checked_sub(yesterday)?
            .checked_mul(tau)?
            .checked_add(yesterday)
    }

    /// 1 - |a - b| / mean(a, b); `None` when the mean is not positive
    pub fn agreement(a: Decimal, b: Decimal) -> Option<f64> {
        let mean = midpoint(a, b)?;
        if mean <= Decimal::ZERO {
            return None;
        }
        let spread = a.checked_sub(b)?.abs().checked_div(mean)?;
        (Decimal::ONE - spread).to_f64().filter(|v| v.is_finite())
    }

    /// Derive a stress estimate from two consecutive days of readings.
    /// With both channels present the estimates must cross-validate or nothing is returned.
    pub fn derive_from_readings(
        &self,
        today: LoadReadings,
        yesterday: LoadReadings,
        confidence: f64,
    ) -> Option<DerivedStress> {
        let from_fitness = today
            .fitness
            .zip(yesterday.fitness)
            .map(|(t, y)| Self::invert(self.load.fitness_tau(), t, y));
        let from_fatigue = today
            .fatigue
            .zip(yesterday.fatigue)
            .map(|(t, y)| Self::invert(self.load.fatigue_tau(), t, y));

        // A channel that was read but cannot be inverted spoils the pair
        if matches!(from_fitness, Some(None)) || matches!(from_fatigue, Some(None)) {
            tracing::debug!("Readings out of range for inversion, no derived stress");
            return None;
        }
        let (from_fitness, from_fatigue) = (from_fitness.flatten(), from_fatigue.flatten());

        let discounted = confidence * self.config.derived_confidence_discount;

        match (from_fitness, from_fatigue) {
            (Some(a), Some(b)) => self.cross_validate(a, b, confidence),
            (Some(a), None) => Some(DerivedStress {
                stress: a.max(Decimal::ZERO),
                method: DerivationMethod::DerivedFromFitness,
                confidence: discounted,
            }),
            (None, Some(b)) => Some(DerivedStress {
                stress: b.max(Decimal::ZERO),
                method: DerivationMethod::DerivedFromFatigue,
                confidence: discounted,
            }),
            (None, None) => None,
        }
    }

    fn cross_validate(&self, a: Decimal, b: Decimal, confidence: f64) -> Option<DerivedStress> {
        if a < Decimal::ZERO || b < Decimal::ZERO {
            tracing::debug!(fitness_estimate = %a, fatigue_estimate = %b, "Negative derived stress, rejecting");
            return None;
        }

        let agreement = Self::agreement(a, b)?;
        if agreement < self.config.min_agreement {
            tracing::debug!(
                fitness_estimate = %a,
                fatigue_estimate = %b,
                agreement,
                "Derived estimates disagree, rejecting"
            );
            return None;
        }

        Some(DerivedStress {
            stress: midpoint(a, b)?,
            method: DerivationMethod::CrossValidated,
            confidence: confidence * agreement.min(1.0),
        })
    }

    /// Produce zero or more samples for a stored record
    pub fn derive<S: LoadStore + ?Sized>(
        &self,
        store: &S,
        record: &CalibrationRecord,
    ) -> Result<Vec<TssCalibrationDataPoint>, StoreError> {
        let date = record.effective_date;
        let computed = store
            .daily_state(date)?
            .map(|s| s.raw_stress)
            .unwrap_or(Decimal::ZERO);
        let mix = CategoryMix::from_workouts(&store.workouts_on(date)?);

        let mut points = Vec::new();

        let direct_method = match record.source {
            CalibrationSource::Manual => DerivationMethod::Manual,
            _ => DerivationMethod::Direct,
        };

        if let Some(stress) = record.observed_daily_stress {
            points.push(TssCalibrationDataPoint::new(
                record,
                stress,
                computed,
                None,
                mix,
                direct_method,
                record.confidence,
            ));
        } else if let Some(weekly) = record.observed_weekly_stress {
            let week_start = date.checked_sub_days(Days::new(6)).unwrap_or(date);
            let computed_weekly = store
                .daily_states_between(week_start, date)?
                .iter()
                .try_fold(Decimal::ZERO, |total, s| total.checked_add(s.raw_stress))
                .unwrap_or(Decimal::MAX);
            let seven = Decimal::from(7);
            points.push(TssCalibrationDataPoint::new(
                record,
                weekly / seven,
                computed_weekly / seven,
                Some((weekly, computed_weekly)),
                mix,
                direct_method,
                record.confidence,
            ));
        }

        if let Some(yesterday) = self.previous_readings(store, date)? {
            let today = LoadReadings::from_record(record);
            if let Some(derived) = self.derive_from_readings(today, yesterday, record.confidence) {
                points.push(TssCalibrationDataPoint::new(
                    record,
                    derived.stress,
                    computed,
                    None,
                    mix,
                    derived.method,
                    derived.confidence,
                ));
            }
        }

        tracing::debug!(
            calibration_id = %record.id,
            date = %date,
            points = points.len(),
            "Derived calibration data points"
        );

        Ok(points)
    }

    /// Readings observed for the day before `date`, from the latest record that day
    fn previous_readings<S: LoadStore + ?Sized>(
        &self,
        store: &S,
        date: NaiveDate,
    ) -> Result<Option<LoadReadings>, StoreError> {
        let Some(previous_day) = date.pred_opt() else {
            return Ok(None);
        };
        Ok(store
            .calibration_on(previous_day)?
            .map(|r| LoadReadings::from_record(&r))
            .filter(|r| r.fitness.is_some() || r.fatigue.is_some()))
    }
}
