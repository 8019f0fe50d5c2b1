use crate::models::{
    ActivityCategory, HeartRateInput, PaceInput, PowerInput, StressMethod, WorkoutStressRecord,
    WorkoutTelemetry,
};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// Stress score sanity-check failures
#[derive(Error, Debug, PartialEq)]
pub enum TssError {
    #[error("Invalid workout data: {0}")]
    InvalidData(String),
    #[error("Stress score out of range: {0}")]
    OutOfRange(String),
}

/// Stress estimate with the method that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StressResult {
    pub stress: Decimal,
    pub method: StressMethod,
    pub intensity_factor: Option<Decimal>,
}

impl StressResult {
    fn zero(method: StressMethod) -> Self {
        StressResult {
            stress: Decimal::ZERO,
            method,
            intensity_factor: None,
        }
    }
}

/// Heart-rate bands as (upper fraction of LTHR, stress per hour)
const HEART_RATE_BANDS: [(Decimal, Decimal); 5] = [
    (dec!(0.81), dec!(30)),
    (dec!(0.89), dec!(50)),
    (dec!(0.94), dec!(65)),
    (dec!(1.00), dec!(80)),
    (dec!(1.03), dec!(95)),
];
const HEART_RATE_TOP_BAND: Decimal = dec!(110);

/// Best-effort per-workout stress estimator. Never fails: bad input yields 0.
pub struct StressCalculator;

impl StressCalculator {
    /// Estimate stress using the highest-quality source present
    pub fn calculate(telemetry: &WorkoutTelemetry) -> WorkoutStressRecord {
        let result = Self::best_estimate(telemetry);

        tracing::debug!(
            date = %telemetry.date,
            category = %telemetry.category,
            method = %result.method,
            stress = %result.stress,
            "Workout stress estimated"
        );

        WorkoutStressRecord {
            id: telemetry
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            date: telemetry.date,
            duration_seconds: telemetry.duration_seconds,
            distance_meters: telemetry.distance_meters,
            category: telemetry.category,
            stress_score: result.stress,
            intensity_factor: result.intensity_factor,
            method: result.method,
        }
    }

    /// Pick the highest-ranked source available in the telemetry
    pub fn best_estimate(telemetry: &WorkoutTelemetry) -> StressResult {
        if let Some(value) = telemetry.precalculated_stress {
            return Self::precalculated_stress(value);
        }

        if let Some(power) = &telemetry.power {
            return Self::power_stress(telemetry.duration_seconds, power);
        }

        if let Some(swim) = &telemetry.swim {
            return Self::swim_stress(telemetry.duration_seconds, swim);
        }

        if let Some(pace) = &telemetry.pace {
            return Self::pace_stress(telemetry.duration_seconds, pace);
        }

        if let Some(hr) = &telemetry.heart_rate {
            return Self::heart_rate_stress(telemetry.duration_seconds, hr);
        }

        Self::estimate_stress(telemetry.duration_seconds, telemetry.category)
    }

    /// Accept an imported score verbatim
    pub fn precalculated_stress(value: f64) -> StressResult {
        match to_decimal(value) {
            Some(stress) if stress >= Decimal::ZERO => StressResult {
                stress,
                method: StressMethod::PreCalculated,
                intensity_factor: None,
            },
            _ => StressResult::zero(StressMethod::PreCalculated),
        }
    }

    /// stress = hours × NP × IF / FTP × 100, IF = NP / FTP
    pub fn power_stress(duration_seconds: f64, input: &PowerInput) -> StressResult {
        let (Some(hours), Some(np), Some(ftp)) = (
            duration_hours(duration_seconds),
            to_decimal(input.normalized_power),
            to_decimal(input.ftp),
        ) else {
            return StressResult::zero(StressMethod::Power);
        };

        if ftp <= Decimal::ZERO || hours.is_zero() || np < Decimal::ZERO {
            return StressResult::zero(StressMethod::Power);
        }

        let Some(intensity_factor) = np.checked_div(ftp) else {
            return StressResult::zero(StressMethod::Power);
        };
        let Some(stress) = checked_product(&[hours, intensity_factor, intensity_factor]) else {
            return StressResult::zero(StressMethod::Power);
        };

        StressResult {
            stress,
            method: StressMethod::Power,
            intensity_factor: Some(intensity_factor),
        }
    }

    /// Running pace: IF = threshold / normalized graded pace (lower pace is faster)
    pub fn pace_stress(duration_seconds: f64, input: &PaceInput) -> StressResult {
        Self::inverted_pace_stress(duration_seconds, input, StressMethod::Pace)
    }

    /// Swim pace, same structure as running pace
    pub fn swim_stress(duration_seconds: f64, input: &PaceInput) -> StressResult {
        Self::inverted_pace_stress(duration_seconds, input, StressMethod::Swim)
    }

    fn inverted_pace_stress(
        duration_seconds: f64,
        input: &PaceInput,
        method: StressMethod,
    ) -> StressResult {
        let (Some(hours), Some(pace), Some(threshold)) = (
            duration_hours(duration_seconds),
            to_decimal(input.normalized_pace),
            to_decimal(input.threshold_pace),
        ) else {
            return StressResult::zero(method);
        };

        if threshold <= Decimal::ZERO || pace <= Decimal::ZERO || hours.is_zero() {
            return StressResult::zero(method);
        }

        let Some(intensity_factor) = threshold.checked_div(pace) else {
            return StressResult::zero(method);
        };
        let Some(stress) = checked_product(&[hours, intensity_factor, intensity_factor]) else {
            return StressResult::zero(method);
        };

        StressResult {
            stress,
            method,
            intensity_factor: Some(intensity_factor),
        }
    }

    /// TRIMP-style banded estimate from average heart rate relative to LTHR
    pub fn heart_rate_stress(duration_seconds: f64, input: &HeartRateInput) -> StressResult {
        let (Some(hours), Some(avg), Some(lthr), Some(max_hr)) = (
            duration_hours(duration_seconds),
            to_decimal(input.average_heart_rate),
            to_decimal(input.lthr),
            to_decimal(input.max_heart_rate),
        ) else {
            return StressResult::zero(StressMethod::HeartRate);
        };

        if lthr <= Decimal::ZERO || avg <= Decimal::ZERO || hours.is_zero() {
            return StressResult::zero(StressMethod::HeartRate);
        }

        // Average above max HR is a sensor glitch, cap it
        let capped = if max_hr > Decimal::ZERO { avg.min(max_hr) } else { avg };
        let Some(fraction) = capped.checked_div(lthr) else {
            return StressResult::zero(StressMethod::HeartRate);
        };

        let per_hour = HEART_RATE_BANDS
            .iter()
            .find(|(upper, _)| fraction < *upper)
            .map(|(_, rate)| *rate)
            .unwrap_or(HEART_RATE_TOP_BAND);

        let Some(stress) = hours.checked_mul(per_hour) else {
            return StressResult::zero(StressMethod::HeartRate);
        };

        StressResult {
            stress,
            method: StressMethod::HeartRate,
            intensity_factor: Some(fraction),
        }
    }

    /// Duration-only fallback
    pub fn estimate_stress(duration_seconds: f64, category: ActivityCategory) -> StressResult {
        let Some(hours) = duration_hours(duration_seconds) else {
            return StressResult::zero(StressMethod::Estimate);
        };

        let per_hour = match category {
            ActivityCategory::Bike => dec!(60),
            ActivityCategory::Run => dec!(70),
            ActivityCategory::Swim => dec!(80),
            ActivityCategory::Strength => dec!(40),
            ActivityCategory::Other => dec!(50),
        };

        let Some(stress) = hours.checked_mul(per_hour) else {
            return StressResult::zero(StressMethod::Estimate);
        };

        StressResult {
            stress,
            method: StressMethod::Estimate,
            intensity_factor: None,
        }
    }

    /// Sanity check for a computed score. Separate from estimation, which never rejects.
    pub fn validate_stress(stress: Decimal, duration_seconds: f64) -> Result<Decimal, TssError> {
        let hours = duration_hours(duration_seconds)
            .ok_or_else(|| TssError::InvalidData(format!("duration {}", duration_seconds)))?;

        if stress < Decimal::ZERO {
            return Err(TssError::OutOfRange("stress cannot be negative".to_string()));
        }

        // Roughly the ceiling for an all-out effort
        let max_reasonable = hours.checked_mul(dec!(300)).unwrap_or(Decimal::MAX);
        if stress > max_reasonable {
            return Err(TssError::OutOfRange(format!(
                "stress {} seems unreasonably high for {:.0}s",
                stress, duration_seconds
            )));
        }

        Ok(stress)
    }
}

/// Finite, non-negative duration in hours
fn duration_hours(duration_seconds: f64) -> Option<Decimal> {
    let seconds = to_decimal(duration_seconds)?;
    if seconds < Decimal::ZERO {
        return None;
    }
    Some(seconds / dec!(3600))
}

/// hours × IF² × 100 style products; `None` when the result leaves Decimal's range
fn checked_product(factors: &[Decimal]) -> Option<Decimal> {
    factors
        .iter()
        .try_fold(Decimal::ONE_HUNDRED, |acc, factor| acc.checked_mul(*factor))
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn telemetry(category: ActivityCategory, duration_seconds: f64) -> WorkoutTelemetry {
        WorkoutTelemetry::new(
            NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
            duration_seconds,
            category,
        )
    }

    #[test]
    fn test_one_hour_at_ftp_is_one_hundred() {
        let result = StressCalculator::power_stress(
            3600.0,
            &PowerInput {
                normalized_power: 250.0,
                ftp: 250.0,
            },
        );

        assert_eq!(result.method, StressMethod::Power);
        assert!((result.stress - dec!(100)).abs() <= dec!(0.1));
        assert_eq!(result.intensity_factor, Some(Decimal::ONE));
    }

    #[test]
    fn test_power_zero_ftp_or_duration_is_zero() {
        let input = PowerInput {
            normalized_power: 250.0,
            ftp: 0.0,
        };
        assert_eq!(StressCalculator::power_stress(3600.0, &input).stress, Decimal::ZERO);

        let input = PowerInput {
            normalized_power: 250.0,
            ftp: 250.0,
        };
        assert_eq!(StressCalculator::power_stress(0.0, &input).stress, Decimal::ZERO);
    }

    #[test]
    fn test_invalid_inputs_yield_zero() {
        let input = PowerInput {
            normalized_power: f64::NAN,
            ftp: 250.0,
        };
        assert_eq!(StressCalculator::power_stress(3600.0, &input).stress, Decimal::ZERO);
        assert_eq!(
            StressCalculator::estimate_stress(-60.0, ActivityCategory::Run).stress,
            Decimal::ZERO
        );
        assert_eq!(
            StressCalculator::estimate_stress(f64::INFINITY, ActivityCategory::Run).stress,
            Decimal::ZERO
        );
        assert_eq!(
            StressCalculator::precalculated_stress(f64::NAN).stress,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_pace_inverted_intensity() {
        // Faster than threshold: lower pace value means IF > 1
        let result = StressCalculator::pace_stress(
            3600.0,
            &PaceInput {
                normalized_pace: 240.0,
                threshold_pace: 300.0,
            },
        );
        assert_eq!(result.method, StressMethod::Pace);
        assert_eq!(result.intensity_factor, Some(dec!(1.25)));
        assert_eq!(result.stress, dec!(156.25));

        let zero_threshold = StressCalculator::pace_stress(
            3600.0,
            &PaceInput {
                normalized_pace: 240.0,
                threshold_pace: 0.0,
            },
        );
        assert_eq!(zero_threshold.stress, Decimal::ZERO);
    }

    #[test]
    fn test_heart_rate_bands() {
        let easy = StressCalculator::heart_rate_stress(
            3600.0,
            &HeartRateInput {
                average_heart_rate: 120.0,
                lthr: 170.0,
                max_heart_rate: 190.0,
            },
        );
        assert_eq!(easy.stress, dec!(30));

        let threshold = StressCalculator::heart_rate_stress(
            3600.0,
            &HeartRateInput {
                average_heart_rate: 170.0,
                lthr: 170.0,
                max_heart_rate: 190.0,
            },
        );
        assert_eq!(threshold.stress, dec!(95));
        assert_eq!(threshold.method, StressMethod::HeartRate);

        // Heart-rate estimates stay below a power score at the same intensity band top
        assert!(threshold.stress < dec!(110));
    }

    #[test]
    fn test_source_priority() {
        let mut workout = telemetry(ActivityCategory::Bike, 3600.0);
        workout.heart_rate = Some(HeartRateInput {
            average_heart_rate: 150.0,
            lthr: 165.0,
            max_heart_rate: 190.0,
        });
        assert_eq!(StressCalculator::best_estimate(&workout).method, StressMethod::HeartRate);

        workout.power = Some(PowerInput {
            normalized_power: 200.0,
            ftp: 250.0,
        });
        assert_eq!(StressCalculator::best_estimate(&workout).method, StressMethod::Power);

        workout.precalculated_stress = Some(88.0);
        let result = StressCalculator::best_estimate(&workout);
        assert_eq!(result.method, StressMethod::PreCalculated);
        assert_eq!(result.stress, dec!(88));
    }

    #[test]
    fn test_estimated_fallback() {
        let record = StressCalculator::calculate(&telemetry(ActivityCategory::Run, 3600.0));
        assert_eq!(record.method, StressMethod::Estimate);
        assert_eq!(record.stress_score, dec!(70));
        assert!(!record.id.is_empty());
    }

    #[test]
    fn test_stress_validation() {
        assert!(StressCalculator::validate_stress(dec!(100), 3600.0).is_ok());
        assert!(StressCalculator::validate_stress(dec!(-10), 3600.0).is_err());
        assert!(StressCalculator::validate_stress(dec!(1000), 3600.0).is_err());
        assert!(StressCalculator::validate_stress(dec!(10), f64::NAN).is_err());
    }

    #[test]
    fn test_extreme_finite_inputs_yield_zero() {
        let power = StressCalculator::power_stress(
            3600.0,
            &PowerInput {
                normalized_power: 1e15,
                ftp: 1e-6,
            },
        );
        assert_eq!(power.stress, Decimal::ZERO);
        assert_eq!(power.method, StressMethod::Power);

        let pace = StressCalculator::pace_stress(
            3600.0,
            &PaceInput {
                normalized_pace: 1e-12,
                threshold_pace: 1e16,
            },
        );
        assert_eq!(pace.stress, Decimal::ZERO);

        let hr = StressCalculator::heart_rate_stress(
            3600.0,
            &HeartRateInput {
                average_heart_rate: 1e25,
                lthr: 1e-20,
                max_heart_rate: 0.0,
            },
        );
        assert_eq!(hr.stress, Decimal::ZERO);

        assert!(StressCalculator::validate_stress(dec!(10), 1e28).is_ok());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_power_stress_properties(
            ftp in 150u16..350u16,
            np in 100u16..400u16,
            duration in 600u32..14400u32
        ) {
            let input = PowerInput { normalized_power: np as f64, ftp: ftp as f64 };
            let result = StressCalculator::power_stress(duration as f64, &input);

            prop_assert!(result.stress > Decimal::ZERO);
            let if_value = result.intensity_factor.unwrap();
            let hours = Decimal::from(duration) / dec!(3600);
            let expected = hours * if_value * if_value * Decimal::ONE_HUNDRED;
            prop_assert!((result.stress - expected).abs() < dec!(0.0001));
        }

        #[test]
        fn test_power_stress_never_panics(
            np in 0.0f64..1e20f64,
            ftp in 1e-12f64..1e6f64,
            duration in 0.0f64..1e9f64
        ) {
            let input = PowerInput { normalized_power: np, ftp };
            let result = StressCalculator::power_stress(duration, &input);
            prop_assert!(result.stress >= Decimal::ZERO);
        }

        #[test]
        fn test_estimator_never_negative(duration in -10000.0f64..20000.0f64) {
            let result = StressCalculator::estimate_stress(duration, ActivityCategory::Other);
            prop_assert!(result.stress >= Decimal::ZERO);
        }
    }
}
