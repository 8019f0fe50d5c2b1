//! Applies trusted calibration records to stored history.
//!
//! The shift is additive and uniform from the effective date onward, so the
//! day-to-day shape of the series is preserved. All shifted rows and the
//! updated record are written in one store transaction.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::calibration::{CalibrationConfig, CalibrationError, CalibrationRecord};
use crate::models::{CalibrationSource, DailyLoadState, Provenance};
use crate::pmc::{LoadConfig, PmcCalculator};
use crate::store::LoadStore;

/// What an application changed
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftSummary {
    pub record_id: String,
    pub effective_date: NaiveDate,
    pub fitness_shift: Option<Decimal>,
    pub fatigue_shift: Option<Decimal>,
    /// Rows on or after the effective date that were shifted
    pub rows_shifted: usize,
    /// Rest-day rows created to close a gap before shifting
    pub rows_materialized: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(ShiftSummary),
    /// Trusted, but every delta is within the threshold
    NotNeeded,
}

#[derive(Debug, Clone, Default)]
pub struct RetroactiveCorrector {
    config: CalibrationConfig,
    pmc: PmcCalculator,
}

impl RetroactiveCorrector {
    pub fn new(config: CalibrationConfig, load: LoadConfig) -> Self {
        RetroactiveCorrector {
            config,
            pmc: PmcCalculator::with_config(load),
        }
    }

    /// Apply a stored record by id
    pub fn apply<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        record_id: &str,
    ) -> Result<ApplyOutcome, CalibrationError> {
        let record = Self::find(store, record_id)?;
        self.check_applicable(&record)?;

        if !record.needs_calibration() {
            tracing::info!(
                id = %record.id,
                date = %record.effective_date,
                "Calibration within threshold, nothing to apply"
            );
            return Ok(ApplyOutcome::NotNeeded);
        }

        self.shift_history(store, record).map(ApplyOutcome::Applied)
    }

    /// Apply a seed record; seeds anchor even when the deltas are small
    pub fn apply_seed<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        record_id: &str,
    ) -> Result<ShiftSummary, CalibrationError> {
        let record = Self::find(store, record_id)?;
        self.check_applicable(&record)?;
        self.shift_history(store, record)
    }

    /// Delete a record. Rows it already shifted keep their values.
    pub fn remove_record<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        record_id: &str,
    ) -> Result<CalibrationRecord, CalibrationError> {
        let record = Self::find(store, record_id)?;
        store.delete_calibration(record_id)?;

        tracing::info!(
            id = %record.id,
            date = %record.effective_date,
            applied = record.applied,
            "Calibration record removed"
        );

        Ok(record)
    }

    fn find<S: LoadStore + ?Sized>(
        store: &S,
        record_id: &str,
    ) -> Result<CalibrationRecord, CalibrationError> {
        store
            .calibration(record_id)?
            .ok_or_else(|| CalibrationError::NotFound(record_id.to_string()))
    }

    fn check_applicable(&self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        if record.applied {
            return Err(CalibrationError::AlreadyApplied(record.id.clone()));
        }
        if !record.has_observed_values() {
            return Err(CalibrationError::NoUsableValues {
                reason: "the record carries no fitness, fatigue or form value".to_string(),
            });
        }
        if !record.is_trustworthy() {
            return Err(CalibrationError::LowConfidence {
                confidence: record.confidence,
                required: self.config.trust_confidence,
            });
        }
        Ok(())
    }

    /// Rows needed to cover the effective date when history has a gap there
    fn materialize_gap<S: LoadStore + ?Sized>(
        &self,
        store: &S,
        date: NaiveDate,
        next_existing: Option<NaiveDate>,
    ) -> Result<Vec<DailyLoadState>, CalibrationError> {
        // Fill up to the day before the next stored row, and at least to `date`
        let fill_end = next_existing
            .and_then(|d| d.pred_opt())
            .map_or(date, |d| d.max(date));

        let mut rows = Vec::new();
        let prior = match store.latest_state_on_or_before(date)? {
            Some(prior) => prior,
            None => {
                let zero = DailyLoadState::zero(date);
                rows.push(zero.clone());
                zero
            }
        };

        rows.extend(self.pmc.fill_forward(&prior, fill_end));
        Ok(rows)
    }

    fn shift_history<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        mut record: CalibrationRecord,
    ) -> Result<ShiftSummary, CalibrationError> {
        let date = record.effective_date;
        let fitness_shift = record.fitness_shift();
        let fatigue_shift = record.fatigue_shift();

        let mut existing = store.daily_states_from(date)?;

        let mut materialized = Vec::new();
        if existing.first().map(|s| s.date) != Some(date) {
            materialized = self.materialize_gap(&*store, date, existing.first().map(|s| s.date))?;
            tracing::debug!(
                date = %date,
                rows = materialized.len(),
                "Materialized missing rows before calibration"
            );
        }

        // Rows before the effective date are written unshifted
        let (before, from_date): (Vec<_>, Vec<_>) =
            materialized.into_iter().partition(|s| s.date < date);
        let rows_materialized = before.len() + from_date.len();

        let mut affected = from_date;
        affected.append(&mut existing);
        affected.sort_by_key(|s| s.date);

        let before_shape = day_to_day_differences(&affected);

        for row in affected.iter_mut() {
            row.shift(fitness_shift, fatigue_shift);
            row.provenance = if row.date == date && record.source == CalibrationSource::InitialSeed
            {
                Provenance::ManualSeed
            } else {
                Provenance::CalibrationAdjusted
            };
        }

        if day_to_day_differences(&affected) != before_shape {
            tracing::debug!(date = %date, "Day-to-day differences changed after calibration shift");
        }

        let rows_shifted = affected.len();
        record.applied = true;
        record.note = Some(shift_note(fitness_shift, fatigue_shift, rows_shifted, date));

        let mut batch = before;
        batch.extend(affected);
        store.commit_calibration(&batch, &record)?;

        tracing::info!(
            id = %record.id,
            date = %date,
            fitness_shift = ?fitness_shift,
            fatigue_shift = ?fatigue_shift,
            rows = rows_shifted,
            "Calibration applied"
        );

        Ok(ShiftSummary {
            record_id: record.id,
            effective_date: date,
            fitness_shift,
            fatigue_shift,
            rows_shifted,
            rows_materialized,
        })
    }
}

fn day_to_day_differences(rows: &[DailyLoadState]) -> Vec<(Decimal, Decimal)> {
    rows.windows(2)
        .map(|w| (w[1].fitness - w[0].fitness, w[1].fatigue - w[0].fatigue))
        .collect()
}

fn signed(delta: Decimal) -> String {
    let rounded = delta.round_dp(1);
    if rounded.is_sign_negative() {
        rounded.to_string()
    } else {
        format!("+{}", rounded)
    }
}

fn shift_note(
    fitness: Option<Decimal>,
    fatigue: Option<Decimal>,
    rows: usize,
    date: NaiveDate,
) -> String {
    let mut parts = Vec::new();
    if let Some(delta) = fitness {
        parts.push(format!("fitness {}", signed(delta)));
    }
    if let Some(delta) = fatigue {
        parts.push(format!("fatigue {}", signed(delta)));
    }
    if parts.is_empty() {
        parts.push("form only, levels unchanged".to_string());
    }
    format!("Shifted {} day(s) from {}: {}", rows, date, parts.join(", "))
}
