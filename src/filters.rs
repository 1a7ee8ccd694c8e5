//! # Node Selection
//!
//! Spatial filters that pick mesh nodes by coordinate:
//!
//! - [`haversine_km`] / [`distances_km`]: great-circle distance on a 6371 km sphere
//! - [`NearestNodeFilter`]: the single node closest to a query point
//! - [`BoundingBoxFilter`]: every node inside a closed lon/lat rectangle
//!
//! Both filters return node indices in ascending order.

use crate::dataset::Mesh;
use crate::error::{CoraError, CoraResult};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula, in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers between two points given in degrees.
///
/// NaN in any coordinate yields NaN.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Distance from `point` to every node of the mesh, in node order.
pub fn distances_km(mesh: &Mesh, point: QueryPoint) -> Vec<f64> {
    mesh.lat()
        .iter()
        .zip(mesh.lon())
        .map(|(&lat, &lon)| haversine_km(lat, lon, point.lat, point.lon))
        .collect()
}

/// A caller-supplied location in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryPoint {
    pub lat: f64,
    pub lon: f64,
}

impl QueryPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        QueryPoint { lat, lon }
    }
}

/// Result of a nearest-node search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestNode {
    pub index: usize,
    pub distance_km: f64,
}

/// Finds the node closest to a query point.
///
/// Ties resolve to the lowest index. NaN distances never win.
#[derive(Debug, Clone, Copy)]
pub struct NearestNodeFilter {
    pub point: QueryPoint,
}

impl NearestNodeFilter {
    pub fn new(lat: f64, lon: f64) -> Self {
        NearestNodeFilter {
            point: QueryPoint::new(lat, lon),
        }
    }

    pub fn apply(&self, mesh: &Mesh) -> CoraResult<NearestNode> {
        nearest_node(mesh, self.point).ok_or_else(|| {
            CoraError::NodeLookup(format!(
                "no finite distance from ({}, {}) to any of {} nodes",
                self.point.lat,
                self.point.lon,
                mesh.len()
            ))
        })
    }
}

/// Index and distance of the closest node, or `None` for an empty mesh.
pub fn nearest_node(mesh: &Mesh, point: QueryPoint) -> Option<NearestNode> {
    let mut best: Option<NearestNode> = None;
    for (index, distance_km) in distances_km(mesh, point).into_iter().enumerate() {
        if distance_km.is_nan() {
            continue;
        }
        match best {
            Some(current) if distance_km >= current.distance_km => {}
            _ => best = Some(NearestNode { index, distance_km }),
        }
    }
    best
}

/// Closed lon/lat rectangle; every comparison is inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxFilter {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl BoundingBoxFilter {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        BoundingBoxFilter {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// Ascending indices of the nodes inside the box.
    pub fn apply(&self, mesh: &Mesh) -> Vec<usize> {
        mesh.lat()
            .iter()
            .zip(mesh.lon())
            .enumerate()
            .filter(|(_, (lat, lon))| self.contains(**lat, **lon))
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(points: &[(f64, f64)]) -> Mesh {
        Mesh::new(
            points.iter().map(|p| p.0).collect(),
            points.iter().map(|p| p.1).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris is roughly 344 km
        let d = haversine_km(51.5074, -0.1276, 48.8566, 2.3522);
        assert!((d - 344.0).abs() < 5.0, "Distance was {} km", d);

        // One degree of latitude along a meridian
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - EARTH_RADIUS_KM * 1f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_symmetry_and_identity() {
        let pairs = [
            ((0.0, 0.0), (10.0, 10.0)),
            ((-33.9, 151.2), (40.7, -74.0)),
            ((89.9, 179.9), (-89.9, -179.9)),
            ((29.3, -94.8), (29.31, -94.79)),
        ];
        for ((lat1, lon1), (lat2, lon2)) in pairs {
            assert_eq!(
                haversine_km(lat1, lon1, lat2, lon2),
                haversine_km(lat2, lon2, lat1, lon1)
            );
            assert_eq!(haversine_km(lat1, lon1, lat1, lon1), 0.0);
        }
    }

    #[test]
    fn test_haversine_nan_propagates() {
        assert!(haversine_km(f64::NAN, 0.0, 1.0, 1.0).is_nan());
    }

    #[test]
    fn test_nearest_exact_node() {
        let m = mesh(&[(0.0, 0.0), (10.0, 10.0), (-5.0, 5.0)]);
        for (i, &(lat, lon)) in [(0.0, 0.0), (10.0, 10.0), (-5.0, 5.0)].iter().enumerate() {
            let found = NearestNodeFilter::new(lat, lon).apply(&m).unwrap();
            assert_eq!(found.index, i);
            assert_eq!(found.distance_km, 0.0);
        }
    }

    #[test]
    fn test_nearest_scenario() {
        let m = mesh(&[(0.0, 0.0), (10.0, 10.0), (-5.0, 5.0)]);
        let found = NearestNodeFilter::new(0.1, 0.1).apply(&m).unwrap();
        assert_eq!(found.index, 0);
        assert!(found.distance_km > 0.0 && found.distance_km < 20.0);
    }

    #[test]
    fn test_nearest_tie_takes_lowest_index() {
        // Nodes 1 and 3 are duplicates, both equidistant from the query
        let m = mesh(&[(5.0, 5.0), (1.0, 1.0), (6.0, 6.0), (1.0, 1.0)]);
        let found = nearest_node(&m, QueryPoint::new(1.0, 1.0)).unwrap();
        assert_eq!(found.index, 1);

        // Symmetric about the equator
        let m = mesh(&[(9.0, 9.0), (1.0, 0.0), (-1.0, 0.0)]);
        let found = nearest_node(&m, QueryPoint::new(0.0, 0.0)).unwrap();
        assert_eq!(found.index, 1);
    }

    #[test]
    fn test_nearest_skips_nan_and_handles_empty() {
        let m = mesh(&[(f64::NAN, 0.0), (2.0, 2.0)]);
        assert_eq!(nearest_node(&m, QueryPoint::new(0.0, 0.0)).unwrap().index, 1);

        let empty = mesh(&[]);
        assert!(nearest_node(&empty, QueryPoint::new(0.0, 0.0)).is_none());
        assert!(matches!(
            NearestNodeFilter::new(0.0, 0.0).apply(&empty),
            Err(CoraError::NodeLookup(_))
        ));
    }

    #[test]
    fn test_bounding_box_inclusive() {
        let m = mesh(&[(0.0, 0.0), (10.0, 10.0), (-5.0, 5.0), (5.0, -1.0)]);

        let bbox = BoundingBoxFilter::new(0.0, 10.0, -5.0, 10.0);
        assert_eq!(bbox.apply(&m), vec![0, 1, 2]);

        let bbox = BoundingBoxFilter::new(-1.0, 0.0, 0.0, 5.0);
        assert_eq!(bbox.apply(&m), vec![0, 3]);
    }

    #[test]
    fn test_bounding_box_empty() {
        let m = mesh(&[(0.0, 0.0), (10.0, 10.0)]);
        let bbox = BoundingBoxFilter::new(20.0, 30.0, 20.0, 30.0);
        assert!(bbox.apply(&m).is_empty());
    }

    #[test]
    fn test_bounding_box_matches_predicate() {
        let points: Vec<(f64, f64)> = (0..50)
            .map(|i| ((i as f64 * 1.7) % 20.0 - 10.0, (i as f64 * 3.1) % 40.0 - 20.0))
            .collect();
        let m = mesh(&points);
        let bbox = BoundingBoxFilter::new(-5.0, 5.0, -3.0, 4.0);
        let expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, (lat, lon))| {
                -3.0 <= *lat && *lat <= 4.0 && -5.0 <= *lon && *lon <= 5.0
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(bbox.apply(&m), expected);
    }
}
