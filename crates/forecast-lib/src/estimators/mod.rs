//! Numeric estimators
//!
//! Small, dependency-free implementations of the statistical building blocks
//! the models are composed from. All randomized estimators take an explicit
//! seed so identical inputs give identical outputs.

pub mod arima;
pub mod dbscan;
pub mod decompose;
pub mod forest;
pub mod isolation;
pub mod kmeans;
pub mod linalg;
pub mod ridge;
pub mod stats;

pub use arima::{ArimaConfig, ArimaModel, ArimaOrder, InformationCriterion};
pub use dbscan::{cluster_count, dbscan, haversine_km, tune_eps, EpsSelection, NOISE};
pub use decompose::{decompose, Decomposition, DecompositionMode};
pub use forest::{ForestConfig, RandomForest};
pub use isolation::IsolationForest;
pub use kmeans::KMeans;
pub use ridge::{select_alpha, RidgeModel};
