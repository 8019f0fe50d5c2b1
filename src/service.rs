//! Orchestration of the calibration flow.
//!
//! Recording a calibration and learning from it are separate steps with
//! separate error channels. [`CalibrationService::record_observation`] returns
//! the persisted record plus an optional [`LearningTask`] the caller may run
//! now, later, or on another thread. [`CalibrationService::record_and_learn`]
//! runs both and only logs learning failures.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::calibration::{
    CalibrationError, CalibrationObservation, CalibrationRecord, RecordBuilder,
};
use crate::config::AppConfig;
use crate::correction::{ApplyOutcome, RetroactiveCorrector, ShiftSummary};
use crate::derivation::{DataPointDeriver, LearningConfig};
use crate::models::{CalibrationSource, DailyLoadState, WorkoutStressRecord, WorkoutTelemetry};
use crate::pmc::{LoadConfig, PmcCalculator};
use crate::scaling::{LearningError, LearningSummary, ProfileHandle, ScalingLearner};
use crate::store::{LoadStore, StoreError};
use crate::tss::StressCalculator;

/// Deferred learning step for one calibration record
#[derive(Debug, Clone)]
pub struct LearningTask {
    record: CalibrationRecord,
    as_of: NaiveDate,
    deriver: DataPointDeriver,
    learner: ScalingLearner,
}

/// What one learning step produced
#[derive(Debug, Clone, PartialEq)]
pub struct LearningReport {
    pub points_created: usize,
    pub points_usable: usize,
    /// `None` when learning is disabled on the profile
    pub summary: Option<LearningSummary>,
}

impl LearningTask {
    pub fn record_id(&self) -> &str {
        &self.record.id
    }

    /// Derive data points for the record, store them and refit the profile
    pub fn run<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        profile: &ProfileHandle,
    ) -> Result<LearningReport, LearningError> {
        let points = self.deriver.derive(&*store, &self.record)?;
        let points_usable = points.iter().filter(|p| p.is_usable_for_learning()).count();

        for point in points.iter().filter(|p| !p.valid) {
            tracing::debug!(
                id = %point.id,
                reason = point.invalidation_reason.as_deref().unwrap_or(""),
                "Data point stored as invalid"
            );
        }

        let summary = if points.is_empty() {
            None
        } else {
            self.learner
                .absorb_points(store, profile, &points, self.as_of)?
        };

        Ok(LearningReport {
            points_created: points.len(),
            points_usable,
            summary,
        })
    }
}

/// A persisted record and its pending learning step
#[derive(Debug, Clone)]
pub struct RecordedCalibration {
    pub record: CalibrationRecord,
    pub learning: Option<LearningTask>,
}

/// Result of the full calibrate flow
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub record: CalibrationRecord,
    /// `None` when auto-apply is off or the record was not applicable
    pub applied: Option<ApplyOutcome>,
    /// `None` when there was nothing to learn or learning failed
    pub learning: Option<LearningReport>,
}

/// Entry point tying the load model, calibration and learning together
#[derive(Debug, Clone)]
pub struct CalibrationService {
    pmc: PmcCalculator,
    builder: RecordBuilder,
    corrector: RetroactiveCorrector,
    deriver: DataPointDeriver,
    learner: ScalingLearner,
    profile: ProfileHandle,
    auto_apply: bool,
}

impl CalibrationService {
    pub fn new(config: &AppConfig, profile: ProfileHandle) -> Self {
        Self::from_parts(
            config.pmc.clone(),
            config.calibration.clone(),
            config.learning.clone(),
            profile,
        )
        .with_auto_apply(config.settings.auto_apply)
    }

    pub fn from_parts(
        load: LoadConfig,
        calibration: crate::calibration::CalibrationConfig,
        learning: LearningConfig,
        profile: ProfileHandle,
    ) -> Self {
        CalibrationService {
            pmc: PmcCalculator::with_config(load.clone()),
            builder: RecordBuilder::new(calibration.clone()),
            corrector: RetroactiveCorrector::new(calibration, load.clone()),
            deriver: DataPointDeriver::new(learning.clone(), load),
            learner: ScalingLearner::new(learning),
            profile,
            auto_apply: true,
        }
    }

    pub fn with_auto_apply(mut self, auto_apply: bool) -> Self {
        self.auto_apply = auto_apply;
        self
    }

    pub fn profile(&self) -> &ProfileHandle {
        &self.profile
    }

    pub fn pmc(&self) -> &PmcCalculator {
        &self.pmc
    }

    /// Computed state for `date`, decayed forward from the nearest earlier row
    pub fn computed_state_on<S: LoadStore + ?Sized>(
        &self,
        store: &S,
        date: NaiveDate,
    ) -> Result<Option<DailyLoadState>, StoreError> {
        Ok(store
            .latest_state_on_or_before(date)?
            .map(|state| self.pmc.project_to(&state, date)))
    }

    /// Validate, compare and persist an observation
    pub fn record_observation<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        observation: &CalibrationObservation,
        source: CalibrationSource,
        capture_date: NaiveDate,
    ) -> Result<RecordedCalibration, CalibrationError> {
        if let Some(reason) = observation.rejection_reason(self.builder.config()) {
            tracing::warn!(reason = %reason, "Observation rejected");
            return Err(CalibrationError::NoUsableValues { reason });
        }

        let effective_date = observation.effective_date.unwrap_or(capture_date);
        let computed = self.computed_state_on(&*store, effective_date)?;
        let record = self
            .builder
            .build(observation, computed.as_ref(), source, capture_date);

        store.save_calibration(&record)?;

        let learning = observation.has_learning_evidence().then(|| LearningTask {
            record: record.clone(),
            as_of: capture_date.max(effective_date),
            deriver: self.deriver.clone(),
            learner: self.learner.clone(),
        });

        Ok(RecordedCalibration { record, learning })
    }

    /// Record, then learn; learning failures are logged and swallowed
    pub fn record_and_learn<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        observation: &CalibrationObservation,
        source: CalibrationSource,
        capture_date: NaiveDate,
    ) -> Result<(CalibrationRecord, Option<LearningReport>), CalibrationError> {
        let recorded = self.record_observation(store, observation, source, capture_date)?;
        let report = recorded
            .learning
            .as_ref()
            .and_then(|task| self.run_learning(store, task));
        Ok((recorded.record, report))
    }

    /// Record, apply when trusted and needed (if auto-apply is on), then learn
    pub fn calibrate<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        observation: &CalibrationObservation,
        source: CalibrationSource,
        capture_date: NaiveDate,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let recorded = self.record_observation(store, observation, source, capture_date)?;

        let applied = if self.auto_apply && recorded.record.is_trustworthy() {
            Some(self.corrector.apply(store, &recorded.record.id)?)
        } else {
            None
        };

        // Re-read so the caller sees the applied flag and note
        let record = store
            .calibration(&recorded.record.id)?
            .unwrap_or(recorded.record);

        let learning = recorded
            .learning
            .as_ref()
            .and_then(|task| self.run_learning(store, task));

        Ok(CalibrationOutcome {
            record,
            applied,
            learning,
        })
    }

    fn run_learning<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        task: &LearningTask,
    ) -> Option<LearningReport> {
        match task.run(store, &self.profile) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(
                    calibration_id = %task.record_id(),
                    error = %e,
                    "Learning from calibration failed; the record is kept"
                );
                None
            }
        }
    }

    pub fn apply<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        record_id: &str,
    ) -> Result<ApplyOutcome, CalibrationError> {
        self.corrector.apply(store, record_id)
    }

    pub fn remove<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        record_id: &str,
    ) -> Result<CalibrationRecord, CalibrationError> {
        self.corrector.remove_record(store, record_id)
    }

    /// Anchor history to a known fitness/fatigue pair
    pub fn seed<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        fitness: Decimal,
        fatigue: Decimal,
        date: NaiveDate,
    ) -> Result<ShiftSummary, CalibrationError> {
        let computed = self.computed_state_on(&*store, date)?;
        let record = self.builder.seed(fitness, fatigue, date, computed.as_ref());
        store.save_calibration(&record)?;
        self.corrector.apply_seed(store, &record.id)
    }

    /// Estimate, persist and fold one workout into the daily series
    pub fn record_workout<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        telemetry: &WorkoutTelemetry,
    ) -> Result<WorkoutStressRecord, StoreError> {
        let workout = StressCalculator::calculate(telemetry);
        store.save_workout(&workout)?;
        self.pmc
            .recompute(store, workout.date, &self.profile.snapshot())?;
        Ok(workout)
    }

    /// Persist a batch of workouts and recompute once from the earliest date
    pub fn import_workouts<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        telemetry: &[WorkoutTelemetry],
    ) -> Result<Vec<WorkoutStressRecord>, StoreError> {
        let workouts: Vec<WorkoutStressRecord> =
            telemetry.iter().map(StressCalculator::calculate).collect();

        for workout in &workouts {
            if let Err(e) = StressCalculator::validate_stress(workout.stress_score, workout.duration_seconds) {
                tracing::warn!(id = %workout.id, date = %workout.date, error = %e, "Suspicious stress score");
            }
            store.save_workout(workout)?;
        }

        if let Some(earliest) = workouts.iter().map(|w| w.date).min() {
            let rows = self
                .pmc
                .recompute(store, earliest, &self.profile.snapshot())?;
            tracing::info!(
                workouts = workouts.len(),
                from = %earliest,
                days = rows.len(),
                "Imported workouts"
            );
        }

        Ok(workouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationConfig;
    use crate::derivation::TssCalibrationDataPoint;
    use crate::models::ActivityCategory;
    use crate::scaling::ScalingProfile;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn service() -> CalibrationService {
        CalibrationService::from_parts(
            LoadConfig::default(),
            CalibrationConfig::default(),
            LearningConfig::default(),
            ProfileHandle::default(),
        )
    }

    fn ride(d: u32, stress: f64) -> WorkoutTelemetry {
        let mut telemetry = WorkoutTelemetry::new(day(d), 3600.0, ActivityCategory::Bike);
        telemetry.id = Some(format!("ride-{}", d));
        telemetry.precalculated_stress = Some(stress);
        telemetry
    }

    fn observation(d: u32, fitness: Option<Decimal>, daily_stress: Option<Decimal>) -> CalibrationObservation {
        CalibrationObservation {
            effective_date: Some(day(d)),
            fitness,
            fatigue: None,
            form: None,
            daily_stress,
            weekly_stress: None,
            confidence: 0.9,
            raw_text: String::new(),
        }
    }

    /// Delegates to a memory store but refuses to store data points
    struct LearningFailsStore {
        inner: MemoryStore,
    }

    impl LoadStore for LearningFailsStore {
        fn save_workout(&mut self, workout: &WorkoutStressRecord) -> Result<(), StoreError> {
            self.inner.save_workout(workout)
        }
        fn workouts_on(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError> {
            self.inner.workouts_on(date)
        }
        fn workouts_from(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError> {
            self.inner.workouts_from(date)
        }
        fn daily_state(&self, date: NaiveDate) -> Result<Option<DailyLoadState>, StoreError> {
            self.inner.daily_state(date)
        }
        fn latest_state_on_or_before(&self, date: NaiveDate) -> Result<Option<DailyLoadState>, StoreError> {
            self.inner.latest_state_on_or_before(date)
        }
        fn daily_states_from(&self, date: NaiveDate) -> Result<Vec<DailyLoadState>, StoreError> {
            self.inner.daily_states_from(date)
        }
        fn daily_states_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyLoadState>, StoreError> {
            self.inner.daily_states_between(start, end)
        }
        fn save_daily_states(&mut self, states: &[DailyLoadState]) -> Result<(), StoreError> {
            self.inner.save_daily_states(states)
        }
        fn delete_daily_state(&mut self, date: NaiveDate) -> Result<bool, StoreError> {
            self.inner.delete_daily_state(date)
        }
        fn save_calibration(&mut self, record: &CalibrationRecord) -> Result<(), StoreError> {
            self.inner.save_calibration(record)
        }
        fn calibration(&self, id: &str) -> Result<Option<CalibrationRecord>, StoreError> {
            self.inner.calibration(id)
        }
        fn calibrations(&self) -> Result<Vec<CalibrationRecord>, StoreError> {
            self.inner.calibrations()
        }
        fn delete_calibration(&mut self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete_calibration(id)
        }
        fn commit_calibration(&mut self, states: &[DailyLoadState], record: &CalibrationRecord) -> Result<(), StoreError> {
            self.inner.commit_calibration(states, record)
        }
        fn save_data_points(&mut self, _points: &[TssCalibrationDataPoint]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("data point table is locked".to_string()))
        }
        fn data_points(&self) -> Result<Vec<TssCalibrationDataPoint>, StoreError> {
            self.inner.data_points()
        }
        fn invalidate_data_point(&mut self, id: &str, reason: &str) -> Result<bool, StoreError> {
            self.inner.invalidate_data_point(id, reason)
        }
        fn load_profile(&self) -> Result<Option<ScalingProfile>, StoreError> {
            self.inner.load_profile()
        }
        fn save_profile(&mut self, profile: &ScalingProfile) -> Result<(), StoreError> {
            self.inner.save_profile(profile)
        }
    }

    #[test]
    fn test_invalid_observation_is_rejected_without_record() {
        let mut store = MemoryStore::new();
        let mut obs = observation(1, None, Some(dec!(80)));
        obs.confidence = 0.9;

        let result = service().record_observation(&mut store, &obs, CalibrationSource::Screenshot, day(1));
        assert!(matches!(result, Err(CalibrationError::NoUsableValues { .. })));
        assert!(store.calibrations().unwrap().is_empty());
    }

    #[test]
    fn test_record_compares_against_projected_state() {
        let mut store = MemoryStore::new();
        let svc = service();
        svc.record_workout(&mut store, &ride(1, 100.0)).unwrap();

        let recorded = svc
            .record_observation(&mut store, &observation(4, Some(dec!(20)), None), CalibrationSource::Screenshot, day(4))
            .unwrap();

        let projected = svc.computed_state_on(&store, day(4)).unwrap().unwrap();
        assert_eq!(recorded.record.computed_fitness, projected.fitness);
        assert!(recorded.record.computed_fitness < store.daily_state(day(1)).unwrap().unwrap().fitness);
        assert!(recorded.learning.is_some());
    }

    #[test]
    fn test_learning_task_is_deferred() {
        let mut store = MemoryStore::new();
        let svc = service();
        svc.record_workout(&mut store, &ride(1, 100.0)).unwrap();

        let recorded = svc
            .record_observation(&mut store, &observation(1, Some(dec!(2.4)), Some(dec!(110))), CalibrationSource::Screenshot, day(1))
            .unwrap();
        assert!(store.data_points().unwrap().is_empty());

        let task = recorded.learning.unwrap();
        assert_eq!(task.record_id(), recorded.record.id);
        let report = task.run(&mut store, svc.profile()).unwrap();
        assert_eq!(report.points_created, 1);
        assert_eq!(report.points_usable, 1);
        assert_eq!(svc.profile().snapshot().global_sample_count, 1);
    }

    #[test]
    fn test_learning_failure_does_not_fail_recording() {
        let mut store = LearningFailsStore { inner: MemoryStore::new() };
        let svc = service();
        svc.record_workout(&mut store, &ride(1, 100.0)).unwrap();

        let obs = observation(1, Some(dec!(2.4)), Some(dec!(110)));
        let (record, report) = svc
            .record_and_learn(&mut store, &obs, CalibrationSource::Screenshot, day(1))
            .unwrap();

        assert!(report.is_none());
        assert!(store.calibration(&record.id).unwrap().is_some());

        let recorded = svc
            .record_observation(&mut store, &obs, CalibrationSource::Screenshot, day(1))
            .unwrap();
        let err = recorded.learning.unwrap().run(&mut store, svc.profile()).unwrap_err();
        assert!(matches!(err, LearningError::Store(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_calibrate_auto_applies_trusted_records() {
        let mut store = MemoryStore::new();
        let svc = service();
        for d in 1..=5 {
            svc.record_workout(&mut store, &ride(d, 80.0)).unwrap();
        }
        let computed = store.daily_state(day(3)).unwrap().unwrap().fitness;

        let outcome = svc
            .calibrate(&mut store, &observation(3, Some(computed + dec!(12)), None), CalibrationSource::Screenshot, day(5))
            .unwrap();

        assert!(matches!(outcome.applied, Some(ApplyOutcome::Applied(_))));
        assert!(outcome.record.applied);
        assert!(outcome.record.note.is_some());
        assert_eq!(store.daily_state(day(3)).unwrap().unwrap().fitness, computed + dec!(12));
    }

    #[test]
    fn test_calibrate_without_auto_apply_only_records() {
        let mut store = MemoryStore::new();
        let svc = service().with_auto_apply(false);
        svc.record_workout(&mut store, &ride(1, 80.0)).unwrap();
        let before = store.daily_states().unwrap();

        let outcome = svc
            .calibrate(&mut store, &observation(1, Some(dec!(40)), None), CalibrationSource::Screenshot, day(1))
            .unwrap();
        assert!(outcome.applied.is_none());
        assert!(!outcome.record.applied);
        assert_eq!(store.daily_states().unwrap(), before);
    }

    #[test]
    fn test_seed_then_workouts_continue_from_anchor() {
        let mut store = MemoryStore::new();
        let svc = service();
        svc.seed(&mut store, dec!(50), dec!(40), day(1)).unwrap();
        svc.record_workout(&mut store, &ride(2, 50.0)).unwrap();

        let row = store.daily_state(day(2)).unwrap().unwrap();
        assert_eq!(row.fitness, dec!(50));
        assert_eq!(row.fatigue, dec!(40) + (dec!(50) - dec!(40)) / dec!(7));
        assert_eq!(row.provenance, crate::models::Provenance::CalibrationAdjusted);
    }

    #[test]
    fn test_recompute_keeps_seed_anchor() {
        let mut store = MemoryStore::new();
        let svc = service();
        svc.seed(&mut store, dec!(50), dec!(40), day(3)).unwrap();

        // A late-arriving workout before the seed must not move the seeded day
        svc.record_workout(&mut store, &ride(1, 120.0)).unwrap();
        let seeded = store.daily_state(day(3)).unwrap().unwrap();
        assert_eq!(seeded.fitness, dec!(50));
        assert_eq!(seeded.fatigue, dec!(40));
    }

    #[test]
    fn test_import_recomputes_once() {
        let mut store = MemoryStore::new();
        let svc = service();
        let workouts = svc
            .import_workouts(&mut store, &[ride(3, 60.0), ride(1, 60.0), ride(2, 0.0)])
            .unwrap();
        assert_eq!(workouts.len(), 3);
        assert_eq!(store.daily_states().unwrap().len(), 3);
    }
}
