//! Predictive surface engine — regression over scattered (x, y, z) points.
//!
//! A fitted [`PredictionModel`] never leaves the host that built it: it has
//! no serde impls, and each operation below fits its own from the training
//! points it is given and returns only derived artifacts.

use nalgebra::{DMatrix, DVector};
use quarry_core::analysis::{ModelEvaluation, ModelOptions, ModelSummary, ModelType};
use quarry_core::graph::SurfaceDataPoint;
use quarry_core::protocol::GridSpec;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::EngineError;
use crate::preconditions::require_points;
use crate::progress::Progress;

pub const DEFAULT_RESOLUTION: usize = 20;
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_PERIODS: usize = 5;
/// Largest accepted grid resolution (points per axis).
pub const MAX_RESOLUTION: usize = 1_000;
/// Largest accepted forecast horizon.
pub const MAX_PERIODS: usize = 10_000;
/// Share of shuffled points used for training during evaluation.
pub const TRAIN_FRACTION: f64 = 0.8;
/// Floor applied to z before taking logs in the exponential model.
const LOG_FLOOR: f64 = 1e-10;
/// Relative tolerance under which residual and total sums count as zero.
const SCORE_TOLERANCE: f64 = 1e-12;

// ── Model ─────────────────────────────────────────────────────────────────────

/// A fitted surface `z = f(x, y)`.
#[derive(Debug, Clone)]
pub struct PredictionModel {
    model_type: ModelType,
    training_points: usize,
    fit: Fit,
}

#[derive(Debug, Clone)]
enum Fit {
    /// Every training target was the same value; predicted exactly.
    Constant(f64),
    Ridge(RidgeFit),
    /// Ridge fit of ln(z); predictions are exponentiated.
    LogRidge(RidgeFit),
    Kernel(KernelFit),
}

impl PredictionModel {
    pub fn fit(points: &[SurfaceDataPoint], options: &ModelOptions) -> Result<Self, EngineError> {
        validate_options(options)?;
        if points.is_empty() {
            return Err(EngineError::FitFailed("no training points".into()));
        }
        if let Some(p) = points
            .iter()
            .find(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(EngineError::FitFailed(format!(
                "training point ({}, {}, {}) is not finite",
                p.x, p.y, p.z
            )));
        }

        let z: Vec<f64> = points.iter().map(|p| p.z).collect();
        let fit = if z.iter().all(|&v| v == z[0]) {
            Fit::Constant(z[0])
        } else {
            Self::fit_family(points, &z, options)?
        };
        Ok(Self {
            model_type: options.model_type,
            training_points: points.len(),
            fit,
        })
    }

    fn fit_family(
        points: &[SurfaceDataPoint],
        z: &[f64],
        options: &ModelOptions,
    ) -> Result<Fit, EngineError> {
        let lambda = options.regularization;
        Ok(match options.model_type {
            ModelType::Linear => Fit::Ridge(RidgeFit::fit(points, z, 1, lambda)?),
            ModelType::Polynomial => Fit::Ridge(RidgeFit::fit(points, z, options.degree, lambda)?),
            ModelType::Exponential => {
                let log_z: Vec<f64> = z.iter().map(|v| v.max(LOG_FLOOR).ln()).collect();
                Fit::LogRidge(RidgeFit::fit(points, &log_z, 1, lambda)?)
            }
            ModelType::Rbf => Fit::Kernel(KernelFit::fit(
                points,
                z,
                options.kernel_width,
                lambda,
                true,
            )?),
            // Posterior mean of a zero-mean process with the same kernel.
            ModelType::Gaussian => Fit::Kernel(KernelFit::fit(
                points,
                z,
                options.kernel_width,
                lambda,
                false,
            )?),
        })
    }

    /// Predicted z at (x, y). Non-finite output is an error.
    pub fn predict(&self, x: f64, y: f64) -> Result<f64, EngineError> {
        let z = match &self.fit {
            Fit::Constant(c) => *c,
            Fit::Ridge(r) => r.predict(x, y),
            Fit::LogRidge(r) => r.predict(x, y).exp(),
            Fit::Kernel(k) => k.predict(x, y),
        };
        if z.is_finite() {
            Ok(z)
        } else {
            Err(EngineError::NonFinite { x, y })
        }
    }

    pub fn summary(&self) -> ModelSummary {
        let parameter_count = match &self.fit {
            Fit::Constant(_) => 1,
            Fit::Ridge(r) | Fit::LogRidge(r) => r.weights.len() + 1,
            Fit::Kernel(k) => k.weights.len(),
        };
        ModelSummary {
            model_type: self.model_type,
            training_points: self.training_points,
            parameter_count,
        }
    }
}

fn validate_options(options: &ModelOptions) -> Result<(), EngineError> {
    if options.model_type == ModelType::Polynomial && !(1..=8).contains(&options.degree) {
        return Err(EngineError::InvalidOption(format!(
            "degree must lie in 1..=8, got {}",
            options.degree
        )));
    }
    if !(options.kernel_width.is_finite() && options.kernel_width > 0.0) {
        return Err(EngineError::InvalidOption(format!(
            "kernelWidth must be positive, got {}",
            options.kernel_width
        )));
    }
    if !(options.regularization.is_finite() && options.regularization >= 0.0) {
        return Err(EngineError::InvalidOption(format!(
            "regularization must be non-negative, got {}",
            options.regularization
        )));
    }
    Ok(())
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    values.sum::<f64>() / n as f64
}

fn solve(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>, EngineError> {
    matrix
        .lu()
        .solve(rhs)
        .ok_or_else(|| EngineError::FitFailed("normal equations are singular".into()))
}

/// Polynomial ridge regression on centered coordinates. Feature columns and
/// the target are centered too, so the intercept is the mean target and is
/// not penalized.
#[derive(Debug, Clone)]
struct RidgeFit {
    degree: u32,
    center: (f64, f64),
    feature_means: Vec<f64>,
    intercept: f64,
    weights: DVector<f64>,
}

impl RidgeFit {
    fn fit(
        points: &[SurfaceDataPoint],
        z: &[f64],
        degree: u32,
        lambda: f64,
    ) -> Result<Self, EngineError> {
        let center = (
            mean(points.iter().map(|p| p.x)),
            mean(points.iter().map(|p| p.y)),
        );
        let intercept = mean(z.iter().copied());
        let rows: Vec<Vec<f64>> = points
            .iter()
            .map(|p| monomials(p.x - center.0, p.y - center.1, degree))
            .collect();
        let width = rows[0].len();
        let feature_means: Vec<f64> = (0..width)
            .map(|j| mean(rows.iter().map(|r| r[j])))
            .collect();

        let design = DMatrix::from_fn(rows.len(), width, |i, j| rows[i][j] - feature_means[j]);
        let target = DVector::from_iterator(z.len(), z.iter().map(|v| v - intercept));
        let mut gram = design.transpose() * &design;
        for i in 0..width {
            gram[(i, i)] += lambda;
        }
        let rhs = design.transpose() * target;
        let weights = solve(gram, &rhs)?;
        Ok(Self {
            degree,
            center,
            feature_means,
            intercept,
            weights,
        })
    }

    fn predict(&self, x: f64, y: f64) -> f64 {
        let terms = monomials(x - self.center.0, y - self.center.1, self.degree);
        self.intercept
            + terms
                .iter()
                .zip(&self.feature_means)
                .zip(self.weights.iter())
                .map(|((t, m), w)| (t - m) * w)
                .sum::<f64>()
    }
}

/// All `x^i * y^j` with `1 <= i + j <= degree`, lowest total degree first.
fn monomials(x: f64, y: f64, degree: u32) -> Vec<f64> {
    let mut terms = Vec::new();
    for total in 1..=degree as i32 {
        for j in 0..=total {
            terms.push(x.powi(total - j) * y.powi(j));
        }
    }
    terms
}

/// Kernel ridge regression with a Gaussian kernel.
#[derive(Debug, Clone)]
struct KernelFit {
    centers: Vec<(f64, f64)>,
    width: f64,
    /// Constant added to every prediction: the mean target when centered,
    /// otherwise 0.
    offset: f64,
    weights: DVector<f64>,
}

impl KernelFit {
    fn fit(
        points: &[SurfaceDataPoint],
        z: &[f64],
        width: f64,
        lambda: f64,
        centered: bool,
    ) -> Result<Self, EngineError> {
        let centers: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
        let n = centers.len();
        let offset = if centered { mean(z.iter().copied()) } else { 0.0 };
        let mut gram = DMatrix::from_fn(n, n, |i, j| kernel(centers[i], centers[j], width));
        for i in 0..n {
            gram[(i, i)] += lambda;
        }
        let target = DVector::from_iterator(n, z.iter().map(|v| v - offset));
        let weights = solve(gram, &target)?;
        Ok(Self {
            centers,
            width,
            offset,
            weights,
        })
    }

    fn predict(&self, x: f64, y: f64) -> f64 {
        self.offset
            + self
                .centers
                .iter()
                .zip(self.weights.iter())
                .map(|(&c, w)| w * kernel((x, y), c, self.width))
                .sum::<f64>()
    }
}

fn kernel(a: (f64, f64), b: (f64, f64), width: f64) -> f64 {
    let d2 = (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2);
    (-d2 / (2.0 * width * width)).exp()
}

// ── Grids ─────────────────────────────────────────────────────────────────────

fn data_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn check_range(name: &str, (lo, hi): (f64, f64)) -> Result<(f64, f64), EngineError> {
    if lo.is_finite() && hi.is_finite() && lo <= hi {
        Ok((lo, hi))
    } else {
        Err(EngineError::InvalidOption(format!(
            "{name} must be a finite [min, max] pair, got [{lo}, {hi}]"
        )))
    }
}

/// `resolution x resolution` points, x-major, spanning the requested or the
/// data's bounding box.
fn grid_points(
    points: &[SurfaceDataPoint],
    grid: &GridSpec,
) -> Result<Vec<(f64, f64)>, EngineError> {
    let resolution = grid.resolution.unwrap_or(DEFAULT_RESOLUTION);
    if !(2..=MAX_RESOLUTION).contains(&resolution) {
        return Err(EngineError::InvalidOption(format!(
            "resolution must lie in 2..={MAX_RESOLUTION}, got {resolution}"
        )));
    }
    let cell_count = resolution
        .checked_mul(resolution)
        .ok_or_else(|| EngineError::InvalidOption(format!("resolution {resolution} overflows")))?;
    let (x_min, x_max) = check_range(
        "xRange",
        grid.x_range
            .unwrap_or_else(|| data_range(points.iter().map(|p| p.x))),
    )?;
    let (y_min, y_max) = check_range(
        "yRange",
        grid.y_range
            .unwrap_or_else(|| data_range(points.iter().map(|p| p.y))),
    )?;
    let x_step = (x_max - x_min) / (resolution - 1) as f64;
    let y_step = (y_max - y_min) / (resolution - 1) as f64;

    let mut cells = Vec::with_capacity(cell_count);
    for i in 0..resolution {
        for j in 0..resolution {
            cells.push((x_min + i as f64 * x_step, y_min + j as f64 * y_step));
        }
    }
    Ok(cells)
}

fn predict_grid(
    model: &PredictionModel,
    cells: &[(f64, f64)],
) -> Result<Vec<SurfaceDataPoint>, EngineError> {
    cells
        .iter()
        .map(|&(x, y)| Ok(SurfaceDataPoint::new(x, y, model.predict(x, y)?)))
        .collect()
}

// ── Operations ────────────────────────────────────────────────────────────────

pub fn create_model(
    points: &[SurfaceDataPoint],
    options: &ModelOptions,
    progress: &mut dyn Progress,
) -> Result<ModelSummary, EngineError> {
    require_points(points, "modeling")?;
    progress.checkpoint(10.0)?;
    let model = PredictionModel::fit(points, options)?;
    progress.checkpoint(90.0)?;
    let summary = model.summary();
    progress.checkpoint(100.0)?;
    Ok(summary)
}

pub fn generate_predictions(
    points: &[SurfaceDataPoint],
    options: &ModelOptions,
    grid: &GridSpec,
    progress: &mut dyn Progress,
) -> Result<Vec<SurfaceDataPoint>, EngineError> {
    require_points(points, "predictions")?;
    let cells = grid_points(points, grid)?;
    progress.checkpoint(10.0)?;
    let model = PredictionModel::fit(points, options)?;
    progress.checkpoint(40.0)?;
    let predictions = predict_grid(&model, &cells)?;
    progress.checkpoint(90.0)?;
    progress.checkpoint(100.0)?;
    Ok(predictions)
}

/// Fit on a shuffled 80% and score on the remaining 20%.
pub fn evaluate_model(
    points: &[SurfaceDataPoint],
    options: &ModelOptions,
    progress: &mut dyn Progress,
) -> Result<ModelEvaluation, EngineError> {
    require_points(points, "evaluation")?;
    progress.checkpoint(10.0)?;

    let mut rng = match options.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let mut shuffled = points.to_vec();
    shuffled.shuffle(&mut rng);
    let train_len = ((points.len() as f64 * TRAIN_FRACTION) as usize).clamp(1, points.len() - 1);
    let (train, test) = shuffled.split_at(train_len);
    progress.checkpoint(30.0)?;

    let model = PredictionModel::fit(train, options)?;
    progress.checkpoint(60.0)?;

    let predicted = test
        .iter()
        .map(|p| model.predict(p.x, p.y))
        .collect::<Result<Vec<f64>, _>>()?;
    let actual: Vec<f64> = test.iter().map(|p| p.z).collect();
    let evaluation = score_predictions(&actual, &predicted);
    progress.checkpoint(90.0)?;
    progress.checkpoint(100.0)?;
    Ok(evaluation)
}

/// R², MSE and MAE. With no variance in `actual`, R² is 1 for an exact fit
/// and 0 otherwise. Both sums are compared against a tolerance relative to
/// the magnitude of `actual`.
fn score_predictions(actual: &[f64], predicted: &[f64]) -> ModelEvaluation {
    let n = actual.len() as f64;
    let mean_actual = mean(actual.iter().copied());
    let tss: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
    let rss: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let abs: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
    let tolerance = SCORE_TOLERANCE * actual.iter().map(|a| a * a).sum::<f64>();
    let r2 = if tss <= tolerance {
        if rss <= tolerance {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - rss / tss
    };
    ModelEvaluation {
        r2,
        mse: rss / n,
        mae: abs / n,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBands {
    pub upper: Vec<SurfaceDataPoint>,
    pub lower: Vec<SurfaceDataPoint>,
    pub level: f64,
}

/// Grid predictions widened by `z * sigma`, where sigma is the sample
/// standard deviation of the training residuals.
pub fn generate_confidence_intervals(
    points: &[SurfaceDataPoint],
    options: &ModelOptions,
    grid: &GridSpec,
    level: Option<f64>,
    progress: &mut dyn Progress,
) -> Result<ConfidenceBands, EngineError> {
    require_points(points, "confidence intervals")?;
    let level = level.unwrap_or(DEFAULT_CONFIDENCE_LEVEL);
    if !(level > 0.0 && level < 1.0) {
        return Err(EngineError::InvalidOption(format!(
            "confidence level must lie in (0, 1), got {level}"
        )));
    }
    let cells = grid_points(points, grid)?;
    progress.checkpoint(10.0)?;

    let model = PredictionModel::fit(points, options)?;
    progress.checkpoint(40.0)?;
    let predictions = predict_grid(&model, &cells)?;
    progress.checkpoint(60.0)?;

    let residuals = points
        .iter()
        .map(|p| Ok(p.z - model.predict(p.x, p.y)?))
        .collect::<Result<Vec<f64>, EngineError>>()?;
    let residual_mean = mean(residuals.iter().copied());
    let variance = residuals
        .iter()
        .map(|r| (r - residual_mean).powi(2))
        .sum::<f64>()
        / (residuals.len() - 1) as f64;
    let standard = Normal::new(0.0, 1.0).map_err(|e| EngineError::FitFailed(e.to_string()))?;
    let margin = standard.inverse_cdf((1.0 + level) / 2.0) * variance.sqrt();
    progress.checkpoint(80.0)?;

    let upper = predictions
        .iter()
        .map(|p| SurfaceDataPoint::new(p.x, p.y, p.z + margin))
        .collect();
    let lower = predictions
        .iter()
        .map(|p| SurfaceDataPoint::new(p.x, p.y, p.z - margin))
        .collect();
    progress.checkpoint(100.0)?;
    Ok(ConfidenceBands {
        upper,
        lower,
        level,
    })
}

/// Treat `x` as time and extrapolate `periods` steps past the last sample,
/// holding `y` at its last observed value.
pub fn generate_forecast(
    points: &[SurfaceDataPoint],
    options: &ModelOptions,
    periods: Option<usize>,
    progress: &mut dyn Progress,
) -> Result<Vec<SurfaceDataPoint>, EngineError> {
    require_points(points, "forecasting")?;
    let periods = periods.unwrap_or(DEFAULT_PERIODS);
    if periods > MAX_PERIODS {
        return Err(EngineError::InvalidOption(format!(
            "periods must be at most {MAX_PERIODS}, got {periods}"
        )));
    }
    progress.checkpoint(10.0)?;

    let mut series = points.to_vec();
    series.sort_by(|a, b| a.x.total_cmp(&b.x));
    progress.checkpoint(30.0)?;

    let model = PredictionModel::fit(&series, options)?;
    progress.checkpoint(60.0)?;

    let n = series.len();
    let last = series[n - 1];
    let step = forecast_step(&series);
    let forecast = (1..=periods)
        .map(|i| {
            let x = last.x + i as f64 * step;
            Ok(SurfaceDataPoint::new(x, last.y, model.predict(x, last.y)?))
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    progress.checkpoint(100.0)?;
    Ok(forecast)
}

/// Spacing of the last two samples; mean spacing when those coincide, and
/// 1 when every sample shares the same x. `series` is sorted by x.
fn forecast_step(series: &[SurfaceDataPoint]) -> f64 {
    let n = series.len();
    let last_gap = series[n - 1].x - series[n - 2].x;
    if last_gap > 0.0 {
        return last_gap;
    }
    let mean_gap = (series[n - 1].x - series[0].x) / (n - 1) as f64;
    if mean_gap > 0.0 {
        mean_gap
    } else {
        1.0
    }
}
