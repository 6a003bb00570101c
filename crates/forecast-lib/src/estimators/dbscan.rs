//! Density-based clustering on geographic points

use std::collections::VecDeque;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Label for points outside every cluster
pub const NOISE: i32 = -1;

const UNVISITED: i32 = -2;

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// DBSCAN over `(lat, lon)` pairs. A point is core when at least
/// `min_samples` points (itself included) lie within `eps_km`.
/// Returns one label per point: cluster index or [`NOISE`].
pub fn dbscan(points: &[(f64, f64)], eps_km: f64, min_samples: usize) -> Vec<i32> {
    let n = points.len();
    let neighbours: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| {
                    haversine_km(points[i].0, points[i].1, points[j].0, points[j].1) <= eps_km
                })
                .collect()
        })
        .collect();

    let mut labels = vec![UNVISITED; n];
    let mut cluster = 0;
    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }
        if neighbours[i].len() < min_samples {
            labels[i] = NOISE;
            continue;
        }
        labels[i] = cluster;
        let mut queue: VecDeque<usize> = neighbours[i].iter().copied().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE {
                // border point
                labels[j] = cluster;
                continue;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = cluster;
            if neighbours[j].len() >= min_samples {
                queue.extend(neighbours[j].iter().copied());
            }
        }
        cluster += 1;
    }
    labels
}

pub fn cluster_count(labels: &[i32]) -> usize {
    labels
        .iter()
        .copied()
        .max()
        .filter(|&m| m >= 0)
        .map(|m| m as usize + 1)
        .unwrap_or(0)
}

/// Result of the eps search
#[derive(Debug, Clone, PartialEq)]
pub struct EpsSelection {
    pub eps_km: f64,
    pub clusters: usize,
    /// Cluster count per candidate, in ascending eps order
    pub counts: Vec<(f64, usize)>,
}

/// Pick eps from ascending candidates: the first whose cluster count equals
/// the next candidate's with at least one cluster, else the candidate with
/// the most clusters (smallest eps on ties).
pub fn tune_eps(points: &[(f64, f64)], candidates: &[f64], min_samples: usize) -> Option<EpsSelection> {
    let mut sorted: Vec<f64> = candidates.iter().copied().filter(|e| *e > 0.0).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    if sorted.is_empty() {
        return None;
    }

    let counts: Vec<(f64, usize)> = sorted
        .iter()
        .map(|&eps| (eps, cluster_count(&dbscan(points, eps, min_samples))))
        .collect();

    let plateau = counts
        .windows(2)
        .find(|w| w[0].1 == w[1].1 && w[0].1 >= 1)
        .map(|w| w[0]);
    let (eps_km, clusters) = plateau.unwrap_or_else(|| {
        counts
            .iter()
            .copied()
            .fold(counts[0], |best, c| if c.1 > best.1 { c } else { best })
    });

    Some(EpsSelection {
        eps_km,
        clusters,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three tight groups about 5 km apart plus one isolated point
    fn three_blobs() -> Vec<(f64, f64)> {
        let centres = [(40.70, -74.00), (40.75, -74.00), (40.70, -73.94)];
        let mut points = Vec::new();
        for (lat, lon) in centres {
            for k in 0..6 {
                let dx = (k % 3) as f64 * 0.001;
                let dy = (k / 3) as f64 * 0.001;
                points.push((lat + dy, lon + dx));
            }
        }
        points.push((41.5, -75.0));
        points
    }

    #[test]
    fn test_haversine_known_distance() {
        // one degree of latitude is about 111.19 km
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.05, "distance was {}", d);
        assert_eq!(haversine_km(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn test_dbscan_separates_blobs_and_noise() {
        let points = three_blobs();
        let labels = dbscan(&points, 0.5, 3);
        assert_eq!(cluster_count(&labels), 3);
        assert_eq!(*labels.last().unwrap(), NOISE);
    }

    #[test]
    fn test_min_samples_never_increases_cluster_count() {
        let points = three_blobs();
        let mut previous = usize::MAX;
        for min_samples in 1..=10 {
            let count = cluster_count(&dbscan(&points, 0.5, min_samples));
            assert!(count <= previous, "min_samples {} gave {}", min_samples, count);
            previous = count;
        }
        assert_eq!(cluster_count(&dbscan(&points, 0.5, 10)), 0);
    }

    #[test]
    fn test_tune_eps_finds_plateau() {
        let points = three_blobs();
        let selection = tune_eps(&points, &[0.5, 1.0, 1.5, 2.0], 3).unwrap();
        assert_eq!(selection.eps_km, 0.5);
        assert_eq!(selection.clusters, 3);
        assert_eq!(selection.counts.len(), 4);
    }

    #[test]
    fn test_tune_eps_without_candidates() {
        assert!(tune_eps(&three_blobs(), &[], 3).is_none());
    }
}
