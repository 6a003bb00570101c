//! Seeded k-means++ clustering

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, Result};

const MAX_ITERATIONS: usize = 100;

#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    pub inertia: f64,
    pub iterations: usize,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

impl KMeans {
    pub fn fit(data: &[Vec<f64>], k: usize, seed: u64) -> Result<Self> {
        if data.is_empty() || k == 0 {
            return Err(PipelineError::fit("k-means needs data and k >= 1"));
        }
        let k = k.min(data.len());
        let mut rng = StdRng::seed_from_u64(seed);

        // k-means++ seeding
        let mut centroids = vec![data[rng.gen_range(0..data.len())].clone()];
        while centroids.len() < k {
            let weights: Vec<f64> = data.iter().map(|p| nearest(p, &centroids).1).collect();
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                // fewer distinct points than k
                break;
            }
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = data.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            centroids.push(data[chosen].clone());
        }

        let mut labels = vec![0; data.len()];
        let mut iterations = 0;
        for _ in 0..MAX_ITERATIONS {
            iterations += 1;
            let mut changed = false;
            for (i, point) in data.iter().enumerate() {
                let (label, _) = nearest(point, &centroids);
                if labels[i] != label {
                    changed = true;
                    labels[i] = label;
                }
            }
            for (c, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<&Vec<f64>> = data
                    .iter()
                    .zip(&labels)
                    .filter(|(_, l)| **l == c)
                    .map(|(p, _)| p)
                    .collect();
                if members.is_empty() {
                    continue;
                }
                for (d, value) in centroid.iter_mut().enumerate() {
                    *value = members.iter().map(|m| m[d]).sum::<f64>() / members.len() as f64;
                }
            }
            if !changed && iterations > 1 {
                break;
            }
        }

        let inertia = data
            .iter()
            .zip(&labels)
            .map(|(p, &l)| squared_distance(p, &centroids[l]))
            .sum();
        Ok(Self {
            centroids,
            labels,
            inertia,
            iterations,
        })
    }
}
