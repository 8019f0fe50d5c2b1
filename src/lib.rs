// Library interface for the loadcal engine
// The CLI and the integration tests both go through these modules

pub mod calibration;
pub mod config;
pub mod correction;
pub mod database;
pub mod derivation;
pub mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod models;
pub mod pmc;
pub mod scaling;
pub mod service;
pub mod store;
pub mod tss;

pub use calibration::{CalibrationConfig, CalibrationError, CalibrationObservation, CalibrationRecord, RecordBuilder};
pub use config::AppConfig;
pub use correction::{ApplyOutcome, RetroactiveCorrector, ShiftSummary};
pub use database::SqliteStore;
pub use derivation::{DataPointDeriver, LearningConfig, TssCalibrationDataPoint};
pub use error::{LoadCalError, Result};
pub use models::{
    ActivityCategory, CalibrationSource, DailyLoadState, DerivationMethod, Provenance,
    WorkoutStressRecord, WorkoutTelemetry,
};
pub use pmc::{LoadConfig, PmcCalculator};
pub use scaling::{LearningError, ProfileHandle, ScalingLearner, ScalingProfile};
pub use service::{CalibrationOutcome, CalibrationService, LearningReport, LearningTask};
pub use store::{LoadStore, MemoryStore, StoreError};
