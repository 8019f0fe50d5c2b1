//! Persistence seam for daily load rows, workouts, calibration history,
//! learning data points and the scaling profile row.
//!
//! Batch writes (`save_daily_states`, `commit_calibration`) are all-or-nothing:
//! a reader never observes a partially shifted range.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::calibration::CalibrationRecord;
use crate::derivation::TssCalibrationDataPoint;
use crate::models::{DailyLoadState, WorkoutStressRecord};
use crate::scaling::ScalingProfile;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Storage operations the calibration engine relies on
pub trait LoadStore {
    fn save_workout(&mut self, workout: &WorkoutStressRecord) -> Result<(), StoreError>;

    fn workouts_on(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError>;

    /// Workouts dated on or after `date`, ascending
    fn workouts_from(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError>;

    fn daily_state(&self, date: NaiveDate) -> Result<Option<DailyLoadState>, StoreError>;

    fn latest_state_on_or_before(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyLoadState>, StoreError>;

    /// Rows dated on or after `date`, ascending
    fn daily_states_from(&self, date: NaiveDate) -> Result<Vec<DailyLoadState>, StoreError>;

    /// Rows in `[start, end]`, ascending
    fn daily_states_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyLoadState>, StoreError>;

    /// Upsert a batch of rows atomically
    fn save_daily_states(&mut self, states: &[DailyLoadState]) -> Result<(), StoreError>;

    /// Explicit user deletion of a day
    fn delete_daily_state(&mut self, date: NaiveDate) -> Result<bool, StoreError>;

    fn save_calibration(&mut self, record: &CalibrationRecord) -> Result<(), StoreError>;

    fn calibration(&self, id: &str) -> Result<Option<CalibrationRecord>, StoreError>;

    /// Full history ordered by effective date, then creation time
    fn calibrations(&self) -> Result<Vec<CalibrationRecord>, StoreError>;

    fn delete_calibration(&mut self, id: &str) -> Result<bool, StoreError>;

    /// Write shifted rows and the updated record in one transaction
    fn commit_calibration(
        &mut self,
        states: &[DailyLoadState],
        record: &CalibrationRecord,
    ) -> Result<(), StoreError>;

    fn save_data_points(&mut self, points: &[TssCalibrationDataPoint]) -> Result<(), StoreError>;

    fn data_points(&self) -> Result<Vec<TssCalibrationDataPoint>, StoreError>;

    fn invalidate_data_point(&mut self, id: &str, reason: &str) -> Result<bool, StoreError>;

    fn load_profile(&self) -> Result<Option<ScalingProfile>, StoreError>;

    fn save_profile(&mut self, profile: &ScalingProfile) -> Result<(), StoreError>;

    /// Most recent record for a given effective date
    fn calibration_on(&self, date: NaiveDate) -> Result<Option<CalibrationRecord>, StoreError> {
        Ok(self
            .calibrations()?
            .into_iter()
            .filter(|r| r.effective_date == date)
            .max_by_key(|r| r.created_at))
    }

    fn daily_states(&self) -> Result<Vec<DailyLoadState>, StoreError> {
        self.daily_states_from(NaiveDate::MIN)
    }
}

/// In-memory store for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    workouts: BTreeMap<String, WorkoutStressRecord>,
    states: BTreeMap<NaiveDate, DailyLoadState>,
    calibrations: Vec<CalibrationRecord>,
    data_points: Vec<TssCalibrationDataPoint>,
    profile: Option<ScalingProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadStore for MemoryStore {
    fn save_workout(&mut self, workout: &WorkoutStressRecord) -> Result<(), StoreError> {
        self.workouts.insert(workout.id.clone(), workout.clone());
        Ok(())
    }

    fn workouts_on(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError> {
        Ok(self
            .workouts
            .values()
            .filter(|w| w.date == date)
            .cloned()
            .collect())
    }

    fn workouts_from(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError> {
        let mut workouts: Vec<_> = self
            .workouts
            .values()
            .filter(|w| w.date >= date)
            .cloned()
            .collect();
        workouts.sort_by_key(|w| w.date);
        Ok(workouts)
    }

    fn daily_state(&self, date: NaiveDate) -> Result<Option<DailyLoadState>, StoreError> {
        Ok(self.states.get(&date).cloned())
    }

    fn latest_state_on_or_before(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyLoadState>, StoreError> {
        Ok(self
            .states
            .range(..=date)
            .next_back()
            .map(|(_, state)| state.clone()))
    }

    fn daily_states_from(&self, date: NaiveDate) -> Result<Vec<DailyLoadState>, StoreError> {
        Ok(self.states.range(date..).map(|(_, s)| s.clone()).collect())
    }

    fn daily_states_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyLoadState>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .states
            .range(start..=end)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn save_daily_states(&mut self, states: &[DailyLoadState]) -> Result<(), StoreError> {
        for state in states {
            self.states.insert(state.date, state.clone());
        }
        Ok(())
    }

    fn delete_daily_state(&mut self, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.states.remove(&date).is_some())
    }

    fn save_calibration(&mut self, record: &CalibrationRecord) -> Result<(), StoreError> {
        match self.calibrations.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.calibrations.push(record.clone()),
        }
        Ok(())
    }

    fn calibration(&self, id: &str) -> Result<Option<CalibrationRecord>, StoreError> {
        Ok(self.calibrations.iter().find(|r| r.id == id).cloned())
    }

    fn calibrations(&self) -> Result<Vec<CalibrationRecord>, StoreError> {
        let mut records = self.calibrations.clone();
        records.sort_by(|a, b| {
            a.effective_date
                .cmp(&b.effective_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(records)
    }

    fn delete_calibration(&mut self, id: &str) -> Result<bool, StoreError> {
        let before = self.calibrations.len();
        self.calibrations.retain(|r| r.id != id);
        Ok(self.calibrations.len() != before)
    }

    fn commit_calibration(
        &mut self,
        states: &[DailyLoadState],
        record: &CalibrationRecord,
    ) -> Result<(), StoreError> {
        // &mut self already excludes readers, so sequential writes are atomic here
        self.save_daily_states(states)?;
        self.save_calibration(record)
    }

    fn save_data_points(&mut self, points: &[TssCalibrationDataPoint]) -> Result<(), StoreError> {
        self.data_points.extend(points.iter().cloned());
        Ok(())
    }

    fn data_points(&self) -> Result<Vec<TssCalibrationDataPoint>, StoreError> {
        Ok(self.data_points.clone())
    }

    fn invalidate_data_point(&mut self, id: &str, reason: &str) -> Result<bool, StoreError> {
        match self.data_points.iter_mut().find(|p| p.id == id) {
            Some(point) => {
                point.invalidate(reason);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_profile(&self) -> Result<Option<ScalingProfile>, StoreError> {
        Ok(self.profile.clone())
    }

    fn save_profile(&mut self, profile: &ScalingProfile) -> Result<(), StoreError> {
        self.profile = Some(profile.clone());
        Ok(())
    }
}
