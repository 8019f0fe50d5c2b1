use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use loadcal::calibration::CalibrationObservation;
use loadcal::config::AppConfig;
use loadcal::derivation::LearningConfig;
use loadcal::models::{ActivityCategory, CalibrationSource, PowerInput, WorkoutTelemetry};
use loadcal::pmc::PmcCalculator;
use loadcal::scaling::{ProfileHandle, ScalingLearner, ScalingProfile};
use loadcal::service::CalibrationService;
use loadcal::store::MemoryStore;
use loadcal::tss::StressCalculator;

/// Performance benchmarks for the load engine
///
/// Covers the per-day recurrence, the retroactive shift and the learner
/// at history lengths from a week to several years.

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()
}

fn create_telemetry_series(days: u64) -> Vec<WorkoutTelemetry> {
    (0..days)
        .filter(|d| d % 7 != 6)
        .map(|d| {
            let date = start_date() + Days::new(d);
            let category = match d % 3 {
                0 => ActivityCategory::Bike,
                1 => ActivityCategory::Run,
                _ => ActivityCategory::Swim,
            };
            let mut telemetry = WorkoutTelemetry::new(date, 3600.0 + (d % 5) as f64 * 600.0, category);
            if category == ActivityCategory::Bike {
                telemetry.power = Some(PowerInput {
                    normalized_power: 200.0 + (d % 40) as f64,
                    ftp: 250.0,
                });
            }
            telemetry
        })
        .collect()
}

fn bench_stress_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stress Estimation");

    for &size in &[10, 100, 1000] {
        let telemetry = create_telemetry_series(size);

        group.throughput(Throughput::Elements(telemetry.len() as u64));
        group.bench_with_input(BenchmarkId::new("calculate", size), &telemetry, |b, telemetry| {
            b.iter(|| {
                for t in telemetry {
                    black_box(StressCalculator::calculate(t));
                }
            });
        });
    }

    group.finish();
}

fn bench_series_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Load Series");
    let calculator = PmcCalculator::new();
    let profile = ScalingProfile::default();

    for &days in &[7, 90, 365, 1095] {
        let workouts: Vec<_> = create_telemetry_series(days)
            .iter()
            .map(StressCalculator::calculate)
            .collect();
        let daily = calculator.aggregate_daily_stress(&workouts, &profile);
        let end = start_date() + Days::new(days - 1);

        group.throughput(Throughput::Elements(days));
        group.bench_with_input(BenchmarkId::new("calculate_series", days), &daily, |b, daily| {
            b.iter(|| {
                black_box(calculator.calculate_series(None, daily, start_date(), end, &BTreeMap::new()))
            });
        });
    }

    group.finish();
}

fn seeded_store(days: u64) -> (MemoryStore, CalibrationService) {
    let mut store = MemoryStore::new();
    let profile = ProfileHandle::load(&mut store).unwrap();
    let service = CalibrationService::new(&AppConfig::default(), profile);
    service
        .seed(&mut store, dec!(40), dec!(45), start_date())
        .unwrap();
    service
        .import_workouts(&mut store, &create_telemetry_series(days))
        .unwrap();
    (store, service)
}

fn bench_retroactive_shift(c: &mut Criterion) {
    let mut group = c.benchmark_group("Retroactive Shift");

    for &days in &[30, 365, 1095] {
        let (store, service) = seeded_store(days);
        let effective_date = start_date() + Days::new(days / 2);
        let observation = CalibrationObservation {
            effective_date: Some(effective_date),
            fitness: Some(dec!(80)),
            fatigue: Some(dec!(60)),
            form: None,
            daily_stress: None,
            weekly_stress: None,
            confidence: 0.95,
            raw_text: String::new(),
        };

        group.throughput(Throughput::Elements(days / 2));
        group.bench_with_input(BenchmarkId::new("calibrate", days), &observation, |b, observation| {
            b.iter_batched(
                || store.clone(),
                |mut store| {
                    black_box(
                        service
                            .calibrate(&mut store, observation, CalibrationSource::Screenshot, effective_date)
                            .unwrap(),
                    )
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_ratio_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("Scaling Learner");
    let learner = ScalingLearner::new(LearningConfig::default());

    for &size in &[10, 100, 1000] {
        let samples: Vec<(f64, f64)> = (0..size)
            .map(|i| (1.0 + (i % 20) as f64 / 100.0, 0.5_f64.powf(i as f64 / 30.0)))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("fit_ratios", size), &samples, |b, samples| {
            b.iter(|| black_box(learner.fit_ratios(samples)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_stress_estimation,
    bench_series_calculation,
    bench_retroactive_shift,
    bench_ratio_fit
);
criterion_main!(benches);
