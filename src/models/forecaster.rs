//! Weekday-seasonal spending forecaster.
//!
//! Each category keeps a mean and spread per weekday. A day is forecast from
//! its weekday profile while it lies within the span of observed history and
//! the weekday has enough observations; past that the forecast falls back to
//! the category's overall daily mean with widened bounds, and the point is
//! marked [`ForecastBasis::HistoricalMean`].

use crate::config::ForecasterConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_extractor::DailyHistory;
use crate::models::{Estimator, Fitted, ForecastModel};
use crate::types::prediction::{Forecast, ForecastBasis, ForecastPoint};
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeMap;

/// Daily spending statistics for one category
#[derive(Debug, Clone, PartialEq)]
struct CategoryProfile {
    mean: f64,
    std_dev: f64,
    weekday_mean: [f64; 7],
    weekday_std_dev: [f64; 7],
    weekday_count: [usize; 7],
}

impl CategoryProfile {
    fn from_series(series: &[f64], start: NaiveDate) -> Self {
        let (mean, std_dev) = mean_std(series);

        let mut by_weekday: [Vec<f64>; 7] = Default::default();
        for (offset, value) in series.iter().enumerate() {
            let weekday = weekday_index(start + Duration::days(offset as i64));
            by_weekday[weekday].push(*value);
        }

        let mut weekday_mean = [0.0; 7];
        let mut weekday_std_dev = [0.0; 7];
        let mut weekday_count = [0; 7];
        for (weekday, values) in by_weekday.iter().enumerate() {
            let (m, s) = mean_std(values);
            weekday_mean[weekday] = m;
            weekday_std_dev[weekday] = s;
            weekday_count[weekday] = values.len();
        }

        Self {
            mean,
            std_dev,
            weekday_mean,
            weekday_std_dev,
            weekday_count,
        }
    }
}

/// Fitted forecaster for one user's spending history.
#[derive(Debug, Clone)]
pub struct SeasonalForecaster {
    last_observed: NaiveDate,
    history_days: usize,
    max_horizon_days: u32,
    interval_z: f64,
    degraded_widening: f64,
    min_weekday_samples: usize,
    profiles: BTreeMap<String, CategoryProfile>,
}

impl SeasonalForecaster {
    pub fn train(history: &DailyHistory, config: &ForecasterConfig) -> Self {
        let profiles = history
            .categories
            .iter()
            .map(|(category, series)| {
                (
                    category.clone(),
                    CategoryProfile::from_series(series, history.start),
                )
            })
            .collect();

        Self {
            last_observed: history.end(),
            history_days: history.days,
            max_horizon_days: config.max_horizon_days,
            interval_z: config.interval_z,
            degraded_widening: config.degraded_widening,
            min_weekday_samples: config.min_weekday_samples,
            profiles,
        }
    }

    /// Fit and report in-sample error of the weekday profiles.
    pub fn fit(history: &DailyHistory, config: &ForecasterConfig) -> Fitted {
        let model = Self::train(history, config);

        let mut abs_error = 0.0;
        let mut points = 0usize;
        for (category, series) in &history.categories {
            let profile = &model.profiles[category];
            for (offset, actual) in series.iter().enumerate() {
                let weekday = weekday_index(history.date_at(offset));
                let predicted = if profile.weekday_count[weekday] >= model.min_weekday_samples {
                    profile.weekday_mean[weekday]
                } else {
                    profile.mean
                };
                abs_error += (actual - predicted).abs();
                points += 1;
            }
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("mae".to_string(), abs_error / points.max(1) as f64);
        metrics.insert("history_days".to_string(), history.days as f64);
        metrics.insert("categories".to_string(), model.profiles.len() as f64);

        Fitted {
            samples: history.days,
            metrics,
            estimator: Estimator::Forecaster(Box::new(model)),
        }
    }

    fn point(&self, profile: &CategoryProfile, offset: usize) -> ForecastPoint {
        let date = self.last_observed + Duration::days(offset as i64);
        let weekday = weekday_index(date);

        let seasonal = offset <= self.history_days
            && profile.weekday_count[weekday] >= self.min_weekday_samples;

        let (predicted, spread, basis) = if seasonal {
            (
                profile.weekday_mean[weekday],
                self.interval_z * profile.weekday_std_dev[weekday],
                ForecastBasis::Seasonal,
            )
        } else {
            (
                profile.mean,
                self.interval_z * profile.std_dev * self.degraded_widening,
                ForecastBasis::HistoricalMean,
            )
        };

        ForecastPoint {
            date,
            predicted_amount: predicted,
            lower_bound: (predicted - spread).max(0.0),
            upper_bound: predicted + spread,
            basis,
        }
    }
}

impl ForecastModel for SeasonalForecaster {
    fn forecast(&self, horizon_days: u32) -> PipelineResult<Forecast> {
        if horizon_days > self.max_horizon_days {
            return Err(PipelineError::Validation(format!(
                "horizon of {} days exceeds the {} day cap",
                horizon_days, self.max_horizon_days
            )));
        }
        if horizon_days == 0 {
            return Ok(Forecast::empty());
        }

        let categories = self
            .profiles
            .iter()
            .map(|(category, profile)| {
                let points = (1..=horizon_days as usize)
                    .map(|offset| self.point(profile, offset))
                    .collect();
                (category.clone(), points)
            })
            .collect();

        Ok(Forecast::new(horizon_days, categories))
    }
}

/// 0 = Monday .. 6 = Sunday
fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

/// Population mean and standard deviation; zeros for an empty slice.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
