//! Pure distance math: Haversine, Vincenty's inverse formula, algorithm
//! selection, and unit conversion. No I/O, no shared state — safe to call
//! from any component or test without a constructed engine.

use crate::engine::model::Coordinate;

/// Mean Earth radius in metres, used by the Haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// WGS-84 semi-major axis, metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 semi-minor axis, metres.
const WGS84_B: f64 = 6_356_752.314245;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257223563;

const VINCENTY_MAX_ITERATIONS: u32 = 100;
const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Great-circle distance in metres via the Haversine formula.
pub fn haversine_distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let sin_half_dphi = (d_phi / 2.0).sin();
    let sin_half_dlambda = (d_lambda / 2.0).sin();

    let h = sin_half_dphi * sin_half_dphi + phi1.cos() * phi2.cos() * sin_half_dlambda * sin_half_dlambda;
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Geodesic distance in metres via Vincenty's inverse formula on the
/// WGS-84 ellipsoid. Falls back to [`haversine_distance_m`] if the
/// iteration does not converge within [`VINCENTY_MAX_ITERATIONS`].
pub fn vincenty_distance_m(a: Coordinate, b: Coordinate) -> f64 {
    if (a.lat - b.lat).abs() < 1e-12 && (a.lon - b.lon).abs() < 1e-12 {
        return 0.0;
    }

    let u1 = ((1.0 - WGS84_F) * a.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * b.lat.to_radians().tan()).atan();
    let l = (b.lon - a.lon).to_radians();

    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut iter_limit = VINCENTY_MAX_ITERATIONS;
    let (mut sin_sigma, mut cos_sigma, mut sigma, mut cos_sq_alpha, mut cos2_sigma_m);

    loop {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return 0.0; // coincident points
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        cos2_sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0 // equatorial line
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos2_sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos2_sigma_m * cos2_sigma_m)));

        iter_limit -= 1;
        if (lambda - lambda_prev).abs() <= VINCENTY_TOLERANCE || iter_limit == 0 {
            break;
        }
    }

    if iter_limit == 0 {
        // Non-convergence: fall back to Haversine per spec.
        return haversine_distance_m(a, b);
    }

    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let cap_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let cap_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = cap_b
        * sin_sigma
        * (cos2_sigma_m
            + cap_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos2_sigma_m * cos2_sigma_m)
                    - cap_b / 6.0
                        * cos2_sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos2_sigma_m * cos2_sigma_m)));

    WGS84_B * cap_a * (sigma - delta_sigma)
}

/// Algorithms callers may request explicitly, or let [`distance_auto`] pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceAlgorithm {
    Haversine,
    Vincenty,
    Auto,
}

/// Distance in metres using the selection rule of §6: rough-distance
/// (Haversine) under 100 m uses Haversine outright; between 100 m and
/// 20 km uses Vincenty; above that currently also falls back to Vincenty
/// (an index-backed distance is not available to this pure function).
pub fn distance_auto_m(a: Coordinate, b: Coordinate) -> f64 {
    let rough = haversine_distance_m(a, b);
    if rough < 100.0 {
        rough
    } else {
        vincenty_distance_m(a, b)
    }
}

pub fn distance_m(a: Coordinate, b: Coordinate, algorithm: DistanceAlgorithm) -> f64 {
    match algorithm {
        DistanceAlgorithm::Haversine => haversine_distance_m(a, b),
        DistanceAlgorithm::Vincenty => vincenty_distance_m(a, b),
        DistanceAlgorithm::Auto => distance_auto_m(a, b),
    }
}

/// Full pairwise distance matrix, metres.
pub fn distance_matrix_m(points: &[Coordinate], algorithm: DistanceAlgorithm) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = distance_m(points[i], points[j], algorithm);
            out[i][j] = d;
            out[j][i] = d;
        }
    }
    out
}

/// Returns the index of the point in `candidates` nearest to `from`,
/// along with its distance in metres. `None` if `candidates` is empty.
pub fn nearest_point(
    from: Coordinate,
    candidates: &[Coordinate],
    algorithm: DistanceAlgorithm,
) -> Option<(usize, f64)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance_m(from, *c, algorithm)))
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
}
