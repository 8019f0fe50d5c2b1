//! Learned correction between computed stress and what the external
//! platform reports.
//!
//! The profile is a single row shared by every calibration event. It is held
//! behind a [`ProfileHandle`] and only ever changed by read-modify-write under
//! its lock, so concurrent absorbs cannot lose sample counts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::derivation::{LearningConfig, TssCalibrationDataPoint};
use crate::models::ActivityCategory;
use crate::store::{LoadStore, StoreError};

/// Learning-path errors, kept apart from the calibration record path
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("Storage error during learning: {0}")]
    Store(#[from] StoreError),

    #[error("Learned profile is not usable: {0}")]
    InvalidProfile(String),
}

/// Learned factor for one activity category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScaling {
    pub factor: f64,
    pub confidence: f64,
    pub sample_count: u32,
}

/// The single persisted scaling row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingProfile {
    pub global_factor: f64,
    pub global_confidence: f64,
    pub global_sample_count: u32,

    /// Factors learned from single-sport samples
    #[serde(default)]
    pub categories: BTreeMap<ActivityCategory, CategoryScaling>,

    pub learning_enabled: bool,
    pub min_samples_for_confidence: u32,
    pub min_scaling_factor: f64,
    pub max_scaling_factor: f64,

    /// Confidence at which manual calibration input may be switched off
    pub auto_disable_threshold: f64,
    pub calibration_complete: bool,
    pub calibration_feature_enabled: bool,

    pub updated_at: DateTime<Utc>,
}

impl Default for ScalingProfile {
    fn default() -> Self {
        ScalingProfile {
            global_factor: 1.0,
            global_confidence: 0.0,
            global_sample_count: 0,
            categories: BTreeMap::new(),
            learning_enabled: true,
            min_samples_for_confidence: 3,
            min_scaling_factor: 0.8,
            max_scaling_factor: 1.5,
            auto_disable_threshold: 0.95,
            calibration_complete: false,
            calibration_feature_enabled: true,
            updated_at: Utc::now(),
        }
    }
}

impl ScalingProfile {
    /// Samples required before the completion signal is raised
    pub const COMPLETION_SAMPLE_COUNT: u32 = 10;

    /// Minimum global confidence for any factor to be used
    pub const MIN_APPLY_CONFIDENCE: f64 = 0.5;

    fn within_bounds(&self, factor: f64) -> bool {
        factor.is_finite() && factor >= self.min_scaling_factor && factor <= self.max_scaling_factor
    }

    pub fn can_apply_scaling(&self) -> bool {
        self.learning_enabled
            && self.global_sample_count >= self.min_samples_for_confidence
            && self.global_confidence >= Self::MIN_APPLY_CONFIDENCE
            && self.within_bounds(self.global_factor)
    }

    /// Multiplier for a workout's stress; 1.0 whenever scaling cannot be applied
    pub fn scaling_factor(&self, category: ActivityCategory) -> f64 {
        if !self.can_apply_scaling() {
            return 1.0;
        }

        match self.categories.get(&category) {
            Some(c)
                if c.sample_count >= self.min_samples_for_confidence
                    && self.within_bounds(c.factor) =>
            {
                c.factor
            }
            _ => self.global_factor,
        }
    }

    /// Advisory only; nothing flips `calibration_feature_enabled` automatically
    pub fn should_suggest_disabling_calibration(&self) -> bool {
        self.calibration_feature_enabled
            && self.global_confidence >= self.auto_disable_threshold
            && self.global_sample_count >= Self::COMPLETION_SAMPLE_COUNT
    }

    pub fn mark_calibration_complete(&mut self) {
        self.calibration_complete = true;
        self.calibration_feature_enabled = false;
        self.updated_at = Utc::now();
    }

    /// Clear learned values, keeping user settings
    pub fn reset_learning(&mut self) {
        self.global_factor = 1.0;
        self.global_confidence = 0.0;
        self.global_sample_count = 0;
        self.categories.clear();
        self.calibration_complete = false;
        self.updated_at = Utc::now();
    }
}

/// Shared handle to the one scaling profile
#[derive(Debug, Clone, Default)]
pub struct ProfileHandle {
    inner: Arc<Mutex<ScalingProfile>>,
}

impl ProfileHandle {
    pub fn new(profile: ScalingProfile) -> Self {
        ProfileHandle {
            inner: Arc::new(Mutex::new(profile)),
        }
    }

    /// Load the persisted row, creating it on first use
    pub fn load<S: LoadStore + ?Sized>(store: &mut S) -> Result<Self, StoreError> {
        let profile = match store.load_profile()? {
            Some(profile) => profile,
            None => {
                let profile = ScalingProfile::default();
                store.save_profile(&profile)?;
                profile
            }
        };
        Ok(Self::new(profile))
    }

    fn lock(&self) -> MutexGuard<'_, ScalingProfile> {
        // A panicked writer never stored its working copy
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ScalingProfile {
        self.lock().clone()
    }

    /// Read-modify-write under the lock. The change is kept only if `f` succeeds.
    pub fn update<T, E>(
        &self,
        f: impl FnOnce(&mut ScalingProfile) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut guard = self.lock();
        let mut working = guard.clone();
        let value = f(&mut working)?;
        *guard = working;
        Ok(value)
    }
}

/// Weighted summary of a set of ratios
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioFit {
    pub factor: f64,
    pub confidence: f64,
    pub sample_count: u32,
    pub total_weight: f64,
}

/// Result of one absorb pass
#[derive(Debug, Clone, PartialEq)]
pub struct LearningSummary {
    pub usable_points: usize,
    pub global: Option<RatioFit>,
    pub can_apply_scaling: bool,
    pub suggest_disabling_calibration: bool,
}

/// Refits the profile from stored data points
#[derive(Debug, Clone, Default)]
pub struct ScalingLearner {
    config: LearningConfig,
}

impl ScalingLearner {
    pub fn new(config: LearningConfig) -> Self {
        ScalingLearner { config }
    }

    /// Weighted mean ratio with confidence
    /// `(W / (W + prior_mass)) × max(0, 1 − σ/μ)`.
    pub fn fit_ratios(&self, samples: &[(f64, f64)]) -> Option<RatioFit> {
        let samples: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|(ratio, weight)| ratio.is_finite() && weight.is_finite() && *weight > 0.0)
            .collect();

        let total_weight: f64 = samples.iter().map(|(_, w)| w).sum();
        if samples.is_empty() || total_weight <= 0.0 {
            return None;
        }

        let mean = samples.iter().map(|(r, w)| r * w).sum::<f64>() / total_weight;
        if !mean.is_finite() || mean <= 0.0 {
            return None;
        }

        let variance = samples
            .iter()
            .map(|(r, w)| w * (r - mean).powi(2))
            .sum::<f64>()
            / total_weight;
        let dispersion = variance.sqrt() / mean;

        let mass = total_weight / (total_weight + self.config.prior_mass.max(0.0));
        let agreement = (1.0 - dispersion).max(0.0);

        Some(RatioFit {
            factor: mean,
            confidence: (mass * agreement).clamp(0.0, 1.0),
            sample_count: samples.len() as u32,
            total_weight,
        })
    }

    /// Replace the learned values of `profile` with a fit over `points`
    pub fn refit(
        &self,
        profile: &mut ScalingProfile,
        points: &[TssCalibrationDataPoint],
        as_of: NaiveDate,
    ) -> Result<LearningSummary, LearningError> {
        let usable: Vec<&TssCalibrationDataPoint> =
            points.iter().filter(|p| p.is_usable_for_learning()).collect();

        let sample = |p: &TssCalibrationDataPoint| -> Option<(f64, f64)> {
            p.scaling_ratio
                .map(|r| (r, p.learning_weight_with(as_of, self.config.half_life_days)))
        };

        let all: Vec<(f64, f64)> = usable.iter().filter_map(|p| sample(*p)).collect();
        let global = self.fit_ratios(&all);

        match global {
            Some(fit) => {
                if !fit.factor.is_finite() || !fit.confidence.is_finite() {
                    return Err(LearningError::InvalidProfile(format!(
                        "non-finite fit (factor {}, confidence {})",
                        fit.factor, fit.confidence
                    )));
                }
                profile.global_factor = fit.factor;
                profile.global_confidence = fit.confidence;
                profile.global_sample_count = fit.sample_count;
            }
            None => {
                profile.global_factor = 1.0;
                profile.global_confidence = 0.0;
                profile.global_sample_count = 0;
            }
        }

        profile.categories.clear();
        for category in ActivityCategory::LEARNABLE {
            let samples: Vec<(f64, f64)> = usable
                .iter()
                .filter(|p| p.is_single_sport() && p.category == Some(category))
                .filter_map(|p| sample(*p))
                .collect();

            if let Some(fit) = self.fit_ratios(&samples) {
                profile.categories.insert(
                    category,
                    CategoryScaling {
                        factor: fit.factor,
                        confidence: fit.confidence,
                        sample_count: fit.sample_count,
                    },
                );
            }
        }

        profile.updated_at = Utc::now();

        if let Some(fit) = global {
            if !profile.within_bounds(fit.factor) {
                tracing::warn!(
                    factor = fit.factor,
                    min = profile.min_scaling_factor,
                    max = profile.max_scaling_factor,
                    "Learned scaling factor is outside plausible bounds and will not be applied"
                );
            }
        }

        Ok(LearningSummary {
            usable_points: usable.len(),
            global,
            can_apply_scaling: profile.can_apply_scaling(),
            suggest_disabling_calibration: profile.should_suggest_disabling_calibration(),
        })
    }

    /// Refit from every stored point and persist, under the profile lock
    pub fn absorb<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        handle: &ProfileHandle,
        as_of: NaiveDate,
    ) -> Result<Option<LearningSummary>, LearningError> {
        self.absorb_points(store, handle, &[], as_of)
    }

    /// Store `new_points`, then refit from everything stored. Both happen
    /// under the profile lock so a writer on another connection cannot
    /// interleave its own points between the read and the refit.
    /// When `new_points` is non-empty but none of them is usable, the
    /// points are stored and the profile is left alone.
    pub fn absorb_points<S: LoadStore + ?Sized>(
        &self,
        store: &mut S,
        handle: &ProfileHandle,
        new_points: &[TssCalibrationDataPoint],
        as_of: NaiveDate,
    ) -> Result<Option<LearningSummary>, LearningError> {
        handle.update(|profile| {
            if !new_points.is_empty() {
                store.save_data_points(new_points)?;
                if !new_points.iter().any(|p| p.is_usable_for_learning()) {
                    return Ok(None);
                }
            }

            if !profile.learning_enabled {
                tracing::debug!("Learning disabled, profile left unchanged");
                return Ok(None);
            }

            let points = store.data_points()?;
            let summary = self.refit(profile, &points, as_of)?;
            store.save_profile(profile)?;
            tracing::info!(
                usable_points = summary.usable_points,
                factor = profile.global_factor,
                confidence = profile.global_confidence,
                samples = profile.global_sample_count,
                applies = summary.can_apply_scaling,
                "Scaling profile updated"
            );

            if summary.suggest_disabling_calibration {
                tracing::info!("Scaling is well established; manual calibration input can be disabled");
            }

            Ok(Some(summary))
        })
    }
}
