//! Behavioral clustering: standardized features, seeded k-means++.

use crate::features::{BehavioralFeature, UserFeatures};
use linfa::prelude::*;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use storefront_core::{AnalyticsError, AnalyticsResult};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub features: Vec<BehavioralFeature>,
    pub k: usize,
    pub seed: u64,
    pub max_iterations: usize,
    /// Largest centroid shift still treated as converged.
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            features: BehavioralFeature::DEFAULT.to_vec(),
            k: 4,
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.k == 0 {
            return Err(AnalyticsError::configuration("cluster count k must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(AnalyticsError::configuration(
                "max_iterations must be positive",
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(AnalyticsError::configuration(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.features.is_empty() {
            return Err(AnalyticsError::configuration(
                "clustering needs at least one feature",
            ));
        }
        let mut seen = BTreeSet::new();
        for feature in &self.features {
            if !seen.insert(feature.as_str()) {
                return Err(AnalyticsError::configuration(format!(
                    "feature '{feature}' listed twice"
                )));
            }
        }
        Ok(())
    }
}

/// Column-wise z-score statistics, fitted through linfa's standard scaler
/// (population standard deviation). Constant columns get a unit deviation so
/// they standardize to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl StandardScaler {
    /// Fits the scaler and returns it with the standardized matrix.
    pub fn fit_transform(data: &Array2<f64>) -> AnalyticsResult<(Self, Array2<f64>)> {
        let dataset = Dataset::new(data.clone(), Array1::<f64>::zeros(data.nrows()));
        let fitted = LinearScaler::<f64>::standard()
            .fit(&dataset)
            .map_err(|e| AnalyticsError::empty_population(format!("cannot scale features: {e}")))?;
        let scaler = Self {
            means: fitted.offsets().to_vec(),
            stds: fitted.scales().iter().map(|scale| 1.0 / scale).collect(),
        };
        Ok((scaler, fitted.transform(data.clone())))
    }

    pub fn inverse_row(&self, row: ArrayView1<f64>) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, v)| v * self.stds[j] + self.means[j])
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl KMeans {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            k: config.k,
            seed: config.seed,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    /// Lloyd iterations from a k-means++ start. Deterministic for a given
    /// seed and row order.
    pub fn fit(&self, data: &Array2<f64>) -> AnalyticsResult<KMeansFit> {
        let n = data.nrows();
        if n == 0 {
            return Err(AnalyticsError::empty_population("no rows to cluster"));
        }
        if n < self.k {
            return Err(AnalyticsError::empty_population(format!(
                "{n} users cannot form {} clusters",
                self.k
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_plus_plus(data, &mut rng);
        let mut labels: Vec<usize> = vec![usize::MAX; n];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let next_labels: Vec<usize> = data
                .axis_iter(Axis(0))
                .map(|row| nearest(row, &centroids).0)
                .collect();
            let stable = next_labels == labels;
            labels = next_labels;

            let next_centroids = update_centroids(data, &labels, &centroids);
            let shift = centroids
                .axis_iter(Axis(0))
                .zip(next_centroids.axis_iter(Axis(0)))
                .map(|(a, b)| squared_distance(a, b).sqrt())
                .fold(0.0, f64::max);
            centroids = next_centroids;

            if stable || shift <= self.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                iterations,
                k = self.k,
                "k-means stopped at the iteration cap before converging"
            );
        }

        // Final assignment against the centroids being reported.
        let (labels, distances): (Vec<usize>, Vec<f64>) = data
            .axis_iter(Axis(0))
            .map(|row| nearest(row, &centroids))
            .unzip();
        let inertia = distances.iter().sum();

        Ok(KMeansFit {
            labels,
            centroids,
            inertia,
            iterations,
            converged,
        })
    }

    fn init_plus_plus(&self, data: &Array2<f64>, rng: &mut StdRng) -> Array2<f64> {
        let n = data.nrows();
        let mut centroids = Array2::<f64>::zeros((self.k, data.ncols()));
        let first = rng.gen_range(0..n);
        centroids.row_mut(0).assign(&data.row(first));

        let mut closest: Array1<f64> = data
            .axis_iter(Axis(0))
            .map(|row| squared_distance(row, data.row(first)))
            .collect();

        for c in 1..self.k {
            let total: f64 = closest.sum();
            let chosen = if total > 0.0 {
                let target = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                closest
                    .iter()
                    .position(|d| {
                        cumulative += d;
                        cumulative > target
                    })
                    .unwrap_or(n - 1)
            } else {
                // Every row sits on an existing centroid.
                rng.gen_range(0..n)
            };
            centroids.row_mut(c).assign(&data.row(chosen));
            for (i, row) in data.axis_iter(Axis(0)).enumerate() {
                let d = squared_distance(row, data.row(chosen));
                if d < closest[i] {
                    closest[i] = d;
                }
            }
        }
        centroids
    }
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Closest centroid; ties go to the lowest index.
fn nearest(row: ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Mean of each cluster's rows. An empty cluster keeps its previous centroid.
fn update_centroids(data: &Array2<f64>, labels: &[usize], previous: &Array2<f64>) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros(previous.raw_dim());
    let mut counts = vec![0usize; previous.nrows()];
    for (row, &label) in data.axis_iter(Axis(0)).zip(labels) {
        let mut target = sums.row_mut(label);
        target += &row;
        counts[label] += 1;
    }
    for (c, count) in counts.iter().enumerate() {
        if *count == 0 {
            sums.row_mut(c).assign(&previous.row(c));
        } else {
            sums.row_mut(c).mapv_inplace(|v| v / *count as f64);
        }
    }
    sums
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub user_id: String,
    pub cluster_id: usize,
    /// Unscaled feature values, in the configured feature order.
    pub feature_vector: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub size: u64,
    /// Mean unscaled feature values of the members.
    pub mean_features: Vec<f64>,
    /// Centroid mapped back to the original feature units.
    pub centroid: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResult {
    pub features: Vec<BehavioralFeature>,
    pub k: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Within-cluster sum of squares in standardized space.
    pub inertia: f64,
    pub scaler: StandardScaler,
    pub assignments: Vec<ClusterAssignment>,
    pub profiles: Vec<ClusterProfile>,
}

impl ClusteringResult {
    pub fn cluster_sizes(&self) -> Vec<u64> {
        self.profiles.iter().map(|p| p.size).collect()
    }

    /// Member sets independent of cluster numbering, for comparing runs.
    pub fn partition(&self) -> BTreeSet<BTreeSet<String>> {
        (0..self.k)
            .map(|c| {
                self.assignments
                    .iter()
                    .filter(|a| a.cluster_id == c)
                    .map(|a| a.user_id.clone())
                    .collect::<BTreeSet<_>>()
            })
            .filter(|members| !members.is_empty())
            .collect()
    }
}

/// Clusters the population on the configured behavioral features.
pub fn cluster_users(
    features: &[UserFeatures],
    config: &ClusteringConfig,
) -> AnalyticsResult<ClusteringResult> {
    config.validate()?;
    if features.is_empty() {
        return Err(AnalyticsError::empty_population("no users to cluster"));
    }

    let columns = config.features.len();
    let raw = Array2::from_shape_fn((features.len(), columns), |(i, j)| {
        features[i].value(config.features[j])
    });
    let (scaler, scaled) = StandardScaler::fit_transform(&raw)?;
    let fit = KMeans::from_config(config).fit(&scaled)?;

    let assignments: Vec<ClusterAssignment> = features
        .iter()
        .zip(&fit.labels)
        .enumerate()
        .map(|(i, (f, &cluster_id))| ClusterAssignment {
            user_id: f.user_id.clone(),
            cluster_id,
            feature_vector: raw.row(i).to_vec(),
        })
        .collect();

    let profiles = (0..config.k)
        .map(|c| {
            let members: Vec<usize> = (0..features.len()).filter(|&i| fit.labels[i] == c).collect();
            let mean_features = if members.is_empty() {
                vec![0.0; columns]
            } else {
                raw.select(Axis(0), &members)
                    .mean_axis(Axis(0))
                    .map(|m| m.to_vec())
                    .unwrap_or_else(|| vec![0.0; columns])
            };
            ClusterProfile {
                cluster_id: c,
                size: members.len() as u64,
                mean_features,
                centroid: scaler.inverse_row(fit.centroids.row(c)),
            }
        })
        .collect();

    debug!(
        users = features.len(),
        k = config.k,
        iterations = fit.iterations,
        converged = fit.converged,
        inertia = fit.inertia,
        "Clustering finished"
    );

    Ok(ClusteringResult {
        features: config.features.clone(),
        k: config.k,
        iterations: fit.iterations,
        converged: fit.converged,
        inertia: fit.inertia,
        scaler,
        assignments,
        profiles,
    })
}
