use crate::models::{ActivityCategory, DailyLoadState, Provenance, WorkoutStressRecord};
use crate::scaling::ScalingProfile;
use crate::store::{LoadStore, StoreError};
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load model configuration with customizable time constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Fitness (CTL) time constant in days (default: 42)
    pub fitness_time_constant: u16,

    /// Fatigue (ATL) time constant in days (default: 7)
    pub fatigue_time_constant: u16,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            fitness_time_constant: 42,
            fatigue_time_constant: 7,
        }
    }
}

impl LoadConfig {
    pub fn fitness_tau(&self) -> Decimal {
        Decimal::from(self.fitness_time_constant.max(1))
    }

    pub fn fatigue_tau(&self) -> Decimal {
        Decimal::from(self.fatigue_time_constant.max(1))
    }
}

/// Form interpretation ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormInterpretation {
    VeryFresh,    // +25 and above
    Fresh,        // +5 to +25
    Neutral,      // -10 to +5
    Fatigued,     // -30 to -10
    VeryFatigued, // Below -30
}

impl FormInterpretation {
    pub fn from_form(form: Decimal) -> Self {
        if form >= Decimal::from(25) {
            FormInterpretation::VeryFresh
        } else if form >= Decimal::from(5) {
            FormInterpretation::Fresh
        } else if form >= Decimal::from(-10) {
            FormInterpretation::Neutral
        } else if form >= Decimal::from(-30) {
            FormInterpretation::Fatigued
        } else {
            FormInterpretation::VeryFatigued
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FormInterpretation::VeryFresh => "Very fresh (may be losing fitness)",
            FormInterpretation::Fresh => "Fresh and ready for hard training/racing",
            FormInterpretation::Neutral => "Neutral (normal training)",
            FormInterpretation::Fatigued => "Fatigued (monitor closely)",
            FormInterpretation::VeryFatigued => "Very fatigued (rest needed)",
        }
    }
}

/// One day's aggregated workout stress
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DailyStress {
    /// Sum before learned scaling
    pub raw_stress: Decimal,

    /// Sum after per-category scaling, fed to the recurrence
    pub scaled_stress: Decimal,

    /// Raw stress per category
    pub category_stress: BTreeMap<ActivityCategory, Decimal>,

    pub workout_count: u16,
}

impl DailyStress {
    /// Add one workout. A workout whose stress would overflow the day's
    /// totals is left out and logged.
    fn add(&mut self, workout: &WorkoutStressRecord, factor: f64) {
        let factor = Decimal::from_f64(factor).unwrap_or(Decimal::ONE);
        let category_total = self
            .category_stress
            .get(&workout.category)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let totals = workout
            .stress_score
            .checked_mul(factor)
            .and_then(|scaled| self.scaled_stress.checked_add(scaled))
            .zip(self.raw_stress.checked_add(workout.stress_score))
            .zip(category_total.checked_add(workout.stress_score));

        let Some(((scaled, raw), category)) = totals else {
            tracing::warn!(
                id = %workout.id,
                date = %workout.date,
                stress = %workout.stress_score,
                "Workout stress overflows the daily total, skipped"
            );
            return;
        };

        self.scaled_stress = scaled;
        self.raw_stress = raw;
        self.category_stress.insert(workout.category, category);
        self.workout_count += 1;
    }

    /// The stress a stored row was computed from
    fn replay(row: &DailyLoadState) -> Self {
        DailyStress {
            raw_stress: row.raw_stress,
            scaled_stress: row.total_stress,
            ..DailyStress::default()
        }
    }

    pub fn category_mix(&self) -> CategoryMix {
        CategoryMix::from_category_stress(&self.category_stress)
    }
}

/// The day's dominant activity and whether several contributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryMix {
    pub dominant: Option<ActivityCategory>,
    pub multi_sport: bool,
}

impl CategoryMix {
    pub fn from_workouts(workouts: &[WorkoutStressRecord]) -> Self {
        let mut category_stress: BTreeMap<ActivityCategory, Decimal> = BTreeMap::new();
        for workout in workouts {
            *category_stress.entry(workout.category).or_insert(Decimal::ZERO) +=
                workout.stress_score;
        }
        Self::from_category_stress(&category_stress)
    }

    fn from_category_stress(category_stress: &BTreeMap<ActivityCategory, Decimal>) -> Self {
        let contributing = category_stress
            .values()
            .filter(|s| **s > Decimal::ZERO)
            .count();
        let multi_sport = if contributing > 0 {
            contributing > 1
        } else {
            category_stress.len() > 1
        };

        // Ties resolve to the first category in declaration order
        let mut dominant: Option<(ActivityCategory, Decimal)> = None;
        for (category, stress) in category_stress {
            if dominant.map_or(true, |(_, best)| *stress > best) {
                dominant = Some((*category, *stress));
            }
        }

        CategoryMix {
            dominant: dominant.map(|(category, _)| category),
            multi_sport,
        }
    }
}

/// Core load calculation engine
#[derive(Debug, Clone, Default)]
pub struct PmcCalculator {
    config: LoadConfig,
}

impl PmcCalculator {
    pub fn new() -> Self {
        PmcCalculator {
            config: LoadConfig::default(),
        }
    }

    pub fn with_config(config: LoadConfig) -> Self {
        PmcCalculator { config }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// One recurrence step: value_t = value_{t-1} + (stress_t - value_{t-1}) / tau
    pub fn next_day(
        &self,
        prev_fitness: Decimal,
        prev_fatigue: Decimal,
        stress: Decimal,
    ) -> (Decimal, Decimal) {
        (
            step(prev_fitness, stress, self.config.fitness_tau()),
            step(prev_fatigue, stress, self.config.fatigue_tau()),
        )
    }

    /// Next day's row from the previous one (or from zero)
    pub fn next_state(
        &self,
        prev: Option<&DailyLoadState>,
        date: NaiveDate,
        stress: &DailyStress,
    ) -> DailyLoadState {
        let (prev_fitness, prev_fatigue) = prev
            .map(|p| (p.fitness, p.fatigue))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let (fitness, fatigue) = self.next_day(prev_fitness, prev_fatigue, stress.scaled_stress);

        // Rows downstream of a calibrated day stay tagged as adjusted
        let provenance = match prev.map(|p| p.provenance) {
            Some(Provenance::ManualSeed) | Some(Provenance::CalibrationAdjusted) => {
                Provenance::CalibrationAdjusted
            }
            _ => Provenance::Computed,
        };

        DailyLoadState::new(
            date,
            stress.scaled_stress,
            stress.raw_stress,
            fitness,
            fatigue,
            provenance,
        )
    }

    /// Decay a row forward through rest days up to `date`.
    /// Returns the row unchanged when it is already on or past `date`.
    pub fn project_to(&self, state: &DailyLoadState, date: NaiveDate) -> DailyLoadState {
        self.fill_forward(state, date)
            .pop()
            .unwrap_or_else(|| state.clone())
    }

    /// Rest-day rows for every day after `state.date` through `date`
    pub fn fill_forward(&self, state: &DailyLoadState, date: NaiveDate) -> Vec<DailyLoadState> {
        let rest = DailyStress::default();
        let mut rows = Vec::new();
        let mut prev = state.clone();
        let mut current = state.date;

        while current < date {
            let Some(next) = current.succ_opt() else {
                break;
            };
            current = next;
            let row = self.next_state(Some(&prev), current, &rest);
            rows.push(row.clone());
            prev = row;
        }

        rows
    }

    /// Aggregate workouts per day, applying the learned per-category factor
    pub fn aggregate_daily_stress(
        &self,
        workouts: &[WorkoutStressRecord],
        profile: &ScalingProfile,
    ) -> BTreeMap<NaiveDate, DailyStress> {
        let mut daily: BTreeMap<NaiveDate, DailyStress> = BTreeMap::new();

        for workout in workouts {
            let factor = profile.scaling_factor(workout.category);
            daily.entry(workout.date).or_default().add(workout, factor);
        }

        daily
    }

    /// Build a contiguous series from `start` to `end`, one day at a time.
    /// Missing days are rest days; the caller supplies the row before `start`.
    ///
    /// `stored` holds the rows already persisted for the range. Each keeps
    /// whatever it carries beyond its own recurrence step (a calibration
    /// shift), so only changes in daily stress move a stored row. Seeded
    /// rows keep their levels outright.
    pub fn calculate_series(
        &self,
        prior: Option<&DailyLoadState>,
        daily: &BTreeMap<NaiveDate, DailyStress>,
        start: NaiveDate,
        end: NaiveDate,
        stored: &BTreeMap<NaiveDate, DailyLoadState>,
    ) -> Vec<DailyLoadState> {
        let rest = DailyStress::default();
        let mut series = Vec::new();
        let mut prev = prior.cloned();
        let mut prev_stored = prior.cloned();
        let mut current = start;

        while current <= end {
            let stress = daily.get(&current).unwrap_or(&rest);
            let mut row = self.next_state(prev.as_ref(), current, stress);

            let previous = match stored.get(&current) {
                // Seeded days are absolute
                Some(old) if old.provenance == Provenance::ManualSeed => {
                    row.set_levels(old.fitness, old.fatigue);
                    row.provenance = Provenance::ManualSeed;
                    old.clone()
                }
                Some(old) => {
                    let replayed =
                        self.next_state(prev_stored.as_ref(), current, &DailyStress::replay(old));
                    row.shift(
                        old.fitness.checked_sub(replayed.fitness),
                        old.fatigue.checked_sub(replayed.fatigue),
                    );
                    if old.provenance != Provenance::Computed {
                        row.provenance = old.provenance;
                    }
                    old.clone()
                }
                None => self.next_state(prev_stored.as_ref(), current, &rest),
            };

            series.push(row.clone());
            prev = Some(row);
            prev_stored = Some(previous);

            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }

        series
    }

    /// Rebuild every row from `from` onward after workouts changed
    pub fn recompute<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        from: NaiveDate,
        profile: &ScalingProfile,
    ) -> Result<Vec<DailyLoadState>, StoreError> {
        let prior = match from.pred_opt() {
            Some(day_before) => store.latest_state_on_or_before(day_before)?,
            None => None,
        };

        // Close any gap between the prior row and `from`
        let start = prior
            .as_ref()
            .and_then(|p| p.date.succ_opt())
            .map_or(from, |next| next.min(from));

        let workouts = store.workouts_from(start)?;
        let daily = self.aggregate_daily_stress(&workouts, profile);

        let last_workout = daily.keys().next_back().copied();
        let last_row = store.daily_states_from(start)?.last().map(|s| s.date);
        let end = [Some(from), last_workout, last_row]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(from);

        let stored: BTreeMap<NaiveDate, DailyLoadState> = store
            .daily_states_between(start, end)?
            .into_iter()
            .map(|s| (s.date, s))
            .collect();

        let series = self.calculate_series(prior.as_ref(), &daily, start, end, &stored);
        store.save_daily_states(&series)?;

        tracing::debug!(
            from = %start,
            to = %end,
            days = series.len(),
            carried = stored.len(),
            "Recomputed daily load"
        );

        Ok(series)
    }
}

/// Holds the previous value when the step would leave Decimal's range
fn step(prev: Decimal, stress: Decimal, tau: Decimal) -> Decimal {
    stress
        .checked_sub(prev)
        .and_then(|gap| gap.checked_div(tau))
        .and_then(|delta| prev.checked_add(delta))
        .unwrap_or(prev)
}
