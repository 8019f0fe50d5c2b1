use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

use crate::calibration::CalibrationRecord;
use crate::derivation::TssCalibrationDataPoint;
use crate::models::{DailyLoadState, WorkoutStressRecord};
use crate::scaling::ScalingProfile;
use crate::store::{LoadStore, StoreError};

const WORKOUT_COLUMNS: &str = "id, date, duration_seconds, distance_meters, category, stress_score, intensity_factor, method";

const STATE_COLUMNS: &str = "date, total_stress, raw_stress, fitness, fatigue, form, provenance";

const CALIBRATION_COLUMNS: &str = r#"
    id, effective_date, created_at,
    observed_fitness, observed_fatigue, observed_form, observed_daily_stress, observed_weekly_stress,
    computed_fitness, computed_fatigue, computed_form,
    fitness_delta, fatigue_delta, form_delta,
    needs_calibration, trusted, applied, note, confidence, source, raw_text
"#;

const DATA_POINT_COLUMNS: &str = r#"
    id, calibration_id, effective_date, extracted_stress, computed_stress,
    extracted_weekly_stress, computed_weekly_stress, scaling_ratio, category, multi_sport,
    method, confidence, valid, invalidation_reason
"#;

/// SQLite-backed store
pub struct SqliteStore {
    conn: Connection,
}

/// Row counts for the status view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub workout_count: usize,
    pub daily_state_count: usize,
    pub calibration_count: usize,
    pub applied_calibration_count: usize,
    pub data_point_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

impl SqliteStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&mut self) -> Result<(), StoreError> {
        // journal_mode returns a row, so it cannot go through execute()
        self.conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
        self.conn.execute("PRAGMA synchronous=NORMAL", [])?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workouts (
                id TEXT PRIMARY KEY,
                date DATE NOT NULL,
                duration_seconds REAL NOT NULL,
                distance_meters REAL,
                category TEXT NOT NULL,
                stress_score TEXT NOT NULL,
                intensity_factor TEXT,
                method TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS daily_load (
                date DATE PRIMARY KEY,
                total_stress TEXT NOT NULL,
                raw_stress TEXT NOT NULL,
                fitness TEXT NOT NULL,
                fatigue TEXT NOT NULL,
                form TEXT NOT NULL,
                provenance TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS calibration_records (
                id TEXT PRIMARY KEY,
                effective_date DATE NOT NULL,
                created_at DATETIME NOT NULL,
                observed_fitness TEXT,
                observed_fatigue TEXT,
                observed_form TEXT,
                observed_daily_stress TEXT,
                observed_weekly_stress TEXT,
                computed_fitness TEXT NOT NULL,
                computed_fatigue TEXT NOT NULL,
                computed_form TEXT NOT NULL,
                fitness_delta TEXT NOT NULL,
                fatigue_delta TEXT NOT NULL,
                form_delta TEXT NOT NULL,
                needs_calibration BOOLEAN NOT NULL,
                trusted BOOLEAN NOT NULL,
                applied BOOLEAN NOT NULL DEFAULT FALSE,
                note TEXT,
                confidence REAL NOT NULL,
                source TEXT NOT NULL,
                raw_text TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS calibration_data_points (
                id TEXT PRIMARY KEY,
                calibration_id TEXT NOT NULL,
                effective_date DATE NOT NULL,
                extracted_stress TEXT NOT NULL,
                computed_stress TEXT NOT NULL,
                extracted_weekly_stress TEXT,
                computed_weekly_stress TEXT,
                scaling_ratio REAL,
                category TEXT,
                multi_sport BOOLEAN NOT NULL,
                method TEXT NOT NULL,
                confidence REAL NOT NULL,
                valid BOOLEAN NOT NULL,
                invalidation_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS scaling_profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                global_factor REAL NOT NULL,
                global_confidence REAL NOT NULL,
                global_sample_count INTEGER NOT NULL,
                categories TEXT NOT NULL,
                learning_enabled BOOLEAN NOT NULL,
                min_samples_for_confidence INTEGER NOT NULL,
                min_scaling_factor REAL NOT NULL,
                max_scaling_factor REAL NOT NULL,
                auto_disable_threshold REAL NOT NULL,
                calibration_complete BOOLEAN NOT NULL,
                calibration_feature_enabled BOOLEAN NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_workouts_date ON workouts (date);
            CREATE INDEX IF NOT EXISTS idx_calibration_effective_date ON calibration_records (effective_date);
            CREATE INDEX IF NOT EXISTS idx_data_points_calibration ON calibration_data_points (calibration_id);
            "#,
        )?;

        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as usize)
        };

        let (first_date, last_date): (Option<NaiveDate>, Option<NaiveDate>) = self.conn.query_row(
            "SELECT MIN(date), MAX(date) FROM daily_load",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            workout_count: count("SELECT COUNT(*) FROM workouts")?,
            daily_state_count: count("SELECT COUNT(*) FROM daily_load")?,
            calibration_count: count("SELECT COUNT(*) FROM calibration_records")?,
            applied_calibration_count: count(
                "SELECT COUNT(*) FROM calibration_records WHERE applied = 1",
            )?,
            data_point_count: count("SELECT COUNT(*) FROM calibration_data_points")?,
            first_date,
            last_date,
        })
    }

    fn query_states(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DailyLoadState>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, state_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_workouts(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<WorkoutStressRecord>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, workout_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_states(tx: &Transaction, states: &[DailyLoadState]) -> Result<(), StoreError> {
        let mut stmt = tx.prepare(&format!(
            "INSERT OR REPLACE INTO daily_load ({}, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)",
            STATE_COLUMNS
        ))?;
        for state in states {
            stmt.execute(params![
                state.date,
                state.total_stress.to_string(),
                state.raw_stress.to_string(),
                state.fitness.to_string(),
                state.fatigue.to_string(),
                state.form.to_string(),
                state.provenance.to_string(),
            ])?;
        }
        Ok(())
    }

    fn upsert_calibration(conn: &Connection, record: &CalibrationRecord) -> Result<(), StoreError> {
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO calibration_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                CALIBRATION_COLUMNS
            ),
            params![
                record.id,
                record.effective_date,
                record.created_at,
                record.observed_fitness.map(|d| d.to_string()),
                record.observed_fatigue.map(|d| d.to_string()),
                record.observed_form.map(|d| d.to_string()),
                record.observed_daily_stress.map(|d| d.to_string()),
                record.observed_weekly_stress.map(|d| d.to_string()),
                record.computed_fitness.to_string(),
                record.computed_fatigue.to_string(),
                record.computed_form.to_string(),
                record.fitness_delta.to_string(),
                record.fatigue_delta.to_string(),
                record.form_delta.to_string(),
                record.needs_calibration,
                record.trusted,
                record.applied,
                record.note,
                record.confidence,
                record.source.to_string(),
                record.raw_text,
            ],
        )?;
        Ok(())
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn decimal(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e.to_string()))
}

fn optional_decimal(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn parsed<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn optional_parsed<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn state_from_row(row: &Row) -> rusqlite::Result<DailyLoadState> {
    let fitness = decimal(row, 3)?;
    let fatigue = decimal(row, 4)?;
    let mut state = DailyLoadState::new(
        row.get(0)?,
        decimal(row, 1)?,
        decimal(row, 2)?,
        fitness,
        fatigue,
        parsed(row, 6)?,
    );
    state.form = decimal(row, 5)?;
    Ok(state)
}

fn workout_from_row(row: &Row) -> rusqlite::Result<WorkoutStressRecord> {
    Ok(WorkoutStressRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        duration_seconds: row.get(2)?,
        distance_meters: row.get(3)?,
        category: parsed(row, 4)?,
        stress_score: decimal(row, 5)?,
        intensity_factor: optional_decimal(row, 6)?,
        method: parsed(row, 7)?,
    })
}

fn calibration_from_row(row: &Row) -> rusqlite::Result<CalibrationRecord> {
    let created_at: DateTime<Utc> = row.get(2)?;
    Ok(CalibrationRecord {
        id: row.get(0)?,
        effective_date: row.get(1)?,
        created_at,
        observed_fitness: optional_decimal(row, 3)?,
        observed_fatigue: optional_decimal(row, 4)?,
        observed_form: optional_decimal(row, 5)?,
        observed_daily_stress: optional_decimal(row, 6)?,
        observed_weekly_stress: optional_decimal(row, 7)?,
        computed_fitness: decimal(row, 8)?,
        computed_fatigue: decimal(row, 9)?,
        computed_form: decimal(row, 10)?,
        fitness_delta: decimal(row, 11)?,
        fatigue_delta: decimal(row, 12)?,
        form_delta: decimal(row, 13)?,
        needs_calibration: row.get(14)?,
        trusted: row.get(15)?,
        applied: row.get(16)?,
        note: row.get(17)?,
        confidence: row.get(18)?,
        source: parsed(row, 19)?,
        raw_text: row.get(20)?,
    })
}

fn data_point_from_row(row: &Row) -> rusqlite::Result<TssCalibrationDataPoint> {
    Ok(TssCalibrationDataPoint {
        id: row.get(0)?,
        calibration_id: row.get(1)?,
        effective_date: row.get(2)?,
        extracted_stress: decimal(row, 3)?,
        computed_stress: decimal(row, 4)?,
        extracted_weekly_stress: optional_decimal(row, 5)?,
        computed_weekly_stress: optional_decimal(row, 6)?,
        scaling_ratio: row.get(7)?,
        category: optional_parsed(row, 8)?,
        multi_sport: row.get(9)?,
        method: parsed(row, 10)?,
        confidence: row.get(11)?,
        valid: row.get(12)?,
        invalidation_reason: row.get(13)?,
    })
}

impl LoadStore for SqliteStore {
    fn save_workout(&mut self, workout: &WorkoutStressRecord) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO workouts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                WORKOUT_COLUMNS
            ),
            params![
                workout.id,
                workout.date,
                workout.duration_seconds,
                workout.distance_meters,
                workout.category.to_string(),
                workout.stress_score.to_string(),
                workout.intensity_factor.map(|d| d.to_string()),
                workout.method.to_string(),
            ],
        )?;
        Ok(())
    }

    fn workouts_on(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError> {
        self.query_workouts(
            &format!("SELECT {} FROM workouts WHERE date = ?1 ORDER BY id", WORKOUT_COLUMNS),
            &[&date],
        )
    }

    fn workouts_from(&self, date: NaiveDate) -> Result<Vec<WorkoutStressRecord>, StoreError> {
        self.query_workouts(
            &format!(
                "SELECT {} FROM workouts WHERE date >= ?1 ORDER BY date, id",
                WORKOUT_COLUMNS
            ),
            &[&date],
        )
    }

    fn daily_state(&self, date: NaiveDate) -> Result<Option<DailyLoadState>, StoreError> {
        let state = self
            .conn
            .query_row(
                &format!("SELECT {} FROM daily_load WHERE date = ?1", STATE_COLUMNS),
                params![date],
                state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    fn latest_state_on_or_before(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyLoadState>, StoreError> {
        let state = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM daily_load WHERE date <= ?1 ORDER BY date DESC LIMIT 1",
                    STATE_COLUMNS
                ),
                params![date],
                state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    fn daily_states_from(&self, date: NaiveDate) -> Result<Vec<DailyLoadState>, StoreError> {
        self.query_states(
            &format!(
                "SELECT {} FROM daily_load WHERE date >= ?1 ORDER BY date",
                STATE_COLUMNS
            ),
            &[&date],
        )
    }

    fn daily_states_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyLoadState>, StoreError> {
        self.query_states(
            &format!(
                "SELECT {} FROM daily_load WHERE date >= ?1 AND date <= ?2 ORDER BY date",
                STATE_COLUMNS
            ),
            &[&start, &end],
        )
    }

    fn save_daily_states(&mut self, states: &[DailyLoadState]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        Self::upsert_states(&tx, states)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_daily_state(&mut self, date: NaiveDate) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM daily_load WHERE date = ?1", params![date])?;
        Ok(removed > 0)
    }

    fn save_calibration(&mut self, record: &CalibrationRecord) -> Result<(), StoreError> {
        Self::upsert_calibration(&self.conn, record)
    }

    fn calibration(&self, id: &str) -> Result<Option<CalibrationRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM calibration_records WHERE id = ?1",
                    CALIBRATION_COLUMNS
                ),
                params![id],
                calibration_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn calibrations(&self) -> Result<Vec<CalibrationRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM calibration_records ORDER BY effective_date, created_at",
            CALIBRATION_COLUMNS
        ))?;
        let records = stmt
            .query_map([], calibration_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn delete_calibration(&mut self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM calibration_records WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn commit_calibration(
        &mut self,
        states: &[DailyLoadState],
        record: &CalibrationRecord,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        Self::upsert_states(&tx, states)?;
        Self::upsert_calibration(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn save_data_points(&mut self, points: &[TssCalibrationDataPoint]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO calibration_data_points ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                DATA_POINT_COLUMNS
            ))?;
            for point in points {
                stmt.execute(params![
                    point.id,
                    point.calibration_id,
                    point.effective_date,
                    point.extracted_stress.to_string(),
                    point.computed_stress.to_string(),
                    point.extracted_weekly_stress.map(|d| d.to_string()),
                    point.computed_weekly_stress.map(|d| d.to_string()),
                    point.scaling_ratio,
                    point.category.map(|c| c.to_string()),
                    point.multi_sport,
                    point.method.to_string(),
                    point.confidence,
                    point.valid,
                    point.invalidation_reason,
                ])?;
            }
        } // Statement is dropped here
        tx.commit()?;
        Ok(())
    }

    fn data_points(&self) -> Result<Vec<TssCalibrationDataPoint>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM calibration_data_points ORDER BY effective_date, id",
            DATA_POINT_COLUMNS
        ))?;
        let points = stmt
            .query_map([], data_point_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(points)
    }

    fn invalidate_data_point(&mut self, id: &str, reason: &str) -> Result<bool, StoreError> {
        let updated = self.conn.execute(
            "UPDATE calibration_data_points SET valid = 0, invalidation_reason = ?2 WHERE id = ?1",
            params![id, reason],
        )?;
        Ok(updated > 0)
    }

    fn load_profile(&self) -> Result<Option<ScalingProfile>, StoreError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT global_factor, global_confidence, global_sample_count, categories,
                       learning_enabled, min_samples_for_confidence, min_scaling_factor,
                       max_scaling_factor, auto_disable_threshold, calibration_complete,
                       calibration_feature_enabled, updated_at
                FROM scaling_profile WHERE id = 1
                "#,
                [],
                |row| {
                    let categories: String = row.get(3)?;
                    Ok((
                        ScalingProfile {
                            global_factor: row.get(0)?,
                            global_confidence: row.get(1)?,
                            global_sample_count: row.get(2)?,
                            categories: Default::default(),
                            learning_enabled: row.get(4)?,
                            min_samples_for_confidence: row.get(5)?,
                            min_scaling_factor: row.get(6)?,
                            max_scaling_factor: row.get(7)?,
                            auto_disable_threshold: row.get(8)?,
                            calibration_complete: row.get(9)?,
                            calibration_feature_enabled: row.get(10)?,
                            updated_at: row.get(11)?,
                        },
                        categories,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mut profile, categories)) => {
                profile.categories = serde_json::from_str(&categories)?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    fn save_profile(&mut self, profile: &ScalingProfile) -> Result<(), StoreError> {
        let categories = serde_json::to_string(&profile.categories)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO scaling_profile (
                id, global_factor, global_confidence, global_sample_count, categories,
                learning_enabled, min_samples_for_confidence, min_scaling_factor,
                max_scaling_factor, auto_disable_threshold, calibration_complete,
                calibration_feature_enabled, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                profile.global_factor,
                profile.global_confidence,
                profile.global_sample_count,
                categories,
                profile.learning_enabled,
                profile.min_samples_for_confidence,
                profile.min_scaling_factor,
                profile.max_scaling_factor,
                profile.auto_disable_threshold,
                profile.calibration_complete,
                profile.calibration_feature_enabled,
                profile.updated_at,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationObservation, RecordBuilder};
    use crate::models::{ActivityCategory, CalibrationSource, DerivationMethod, Provenance, StressMethod};
    use crate::scaling::CategoryScaling;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
    }

    fn state(d: u32, fitness: Decimal, fatigue: Decimal) -> DailyLoadState {
        DailyLoadState::new(day(d), dec!(55.5), dec!(50), fitness, fatigue, Provenance::Computed)
    }

    #[test]
    fn test_daily_states_round_trip_with_decimals() {
        let mut store = SqliteStore::in_memory().unwrap();
        let rows = vec![
            state(1, dec!(40.123456), dec!(35.5)),
            state(2, dec!(41.0000001), dec!(38.25)),
            state(4, dec!(39.9), dec!(30)),
        ];
        store.save_daily_states(&rows).unwrap();

        assert_eq!(store.daily_states().unwrap(), rows);
        assert_eq!(store.daily_state(day(2)).unwrap(), Some(rows[1].clone()));
        assert_eq!(store.latest_state_on_or_before(day(3)).unwrap(), Some(rows[1].clone()));
        assert_eq!(store.daily_states_between(day(2), day(4)).unwrap().len(), 2);
        assert!(store.delete_daily_state(day(1)).unwrap());
        assert_eq!(store.daily_states_from(day(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_workouts_and_calibrations() {
        let mut store = SqliteStore::in_memory().unwrap();
        let workout = WorkoutStressRecord {
            id: "w1".to_string(),
            date: day(3),
            duration_seconds: 3600.0,
            distance_meters: Some(30000.0),
            category: ActivityCategory::Bike,
            stress_score: dec!(87.5),
            intensity_factor: Some(dec!(0.85)),
            method: StressMethod::Power,
        };
        store.save_workout(&workout).unwrap();
        assert_eq!(store.workouts_on(day(3)).unwrap(), vec![workout.clone()]);
        assert!(store.workouts_from(day(4)).unwrap().is_empty());

        let observation = CalibrationObservation {
            effective_date: Some(day(3)),
            fitness: Some(dec!(62)),
            fatigue: Some(dec!(70)),
            form: None,
            daily_stress: Some(dec!(92)),
            weekly_stress: None,
            confidence: 0.88,
            raw_text: "Fitness 62 Fatigue 70".to_string(),
        };
        let mut record = RecordBuilder::default().build(&observation, None, CalibrationSource::Screenshot, day(3));
        store.save_calibration(&record).unwrap();
        assert_eq!(store.calibration(&record.id).unwrap(), Some(record.clone()));

        record.applied = true;
        record.note = Some("applied".to_string());
        store.commit_calibration(&[state(3, dec!(62), dec!(70))], &record).unwrap();
        assert!(store.calibration(&record.id).unwrap().unwrap().applied);
        assert_eq!(store.daily_state(day(3)).unwrap().unwrap().form, dec!(-8));
        assert_eq!(store.calibration_on(day(3)).unwrap().map(|r| r.id), Some(record.id.clone()));

        assert!(store.delete_calibration(&record.id).unwrap());
        assert!(store.calibrations().unwrap().is_empty());
    }

    #[test]
    fn test_data_points_and_profile_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loadcal.db");

        let point = TssCalibrationDataPoint {
            id: "p1".to_string(),
            calibration_id: "c1".to_string(),
            effective_date: day(5),
            extracted_stress: dec!(110),
            computed_stress: dec!(100),
            extracted_weekly_stress: None,
            computed_weekly_stress: None,
            scaling_ratio: Some(1.1),
            category: Some(ActivityCategory::Run),
            multi_sport: false,
            method: DerivationMethod::CrossValidated,
            confidence: 0.8,
            valid: true,
            invalidation_reason: None,
        };

        let mut profile = ScalingProfile::default();
        profile.global_factor = 1.1;
        profile.global_sample_count = 4;
        profile.categories.insert(
            ActivityCategory::Run,
            CategoryScaling { factor: 1.15, confidence: 0.7, sample_count: 3 },
        );

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.save_data_points(&[point.clone()]).unwrap();
            store.save_profile(&profile).unwrap();
            assert!(store.invalidate_data_point("p1", "duplicate screenshot").unwrap());
            assert!(!store.invalidate_data_point("missing", "n/a").unwrap());
        }

        let store = SqliteStore::open(&path).unwrap();
        let points = store.data_points().unwrap();
        assert_eq!(points.len(), 1);
        assert!(!points[0].valid);
        assert_eq!(points[0].invalidation_reason.as_deref(), Some("duplicate screenshot"));
        assert_eq!(points[0].method, DerivationMethod::CrossValidated);

        let loaded = store.load_profile().unwrap().unwrap();
        assert_eq!(loaded.global_sample_count, 4);
        assert_eq!(loaded.categories[&ActivityCategory::Run].sample_count, 3);
        assert_eq!(loaded.updated_at.timestamp(), profile.updated_at.timestamp());
    }

    #[test]
    fn test_stats() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .save_daily_states(&[state(1, dec!(1), dec!(1)), state(9, dec!(2), dec!(2))])
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.daily_state_count, 2);
        assert_eq!(stats.first_date, Some(day(1)));
        assert_eq!(stats.last_date, Some(day(9)));
        assert_eq!(stats.calibration_count, 0);
    }
}
