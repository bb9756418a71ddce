//! Pure polygon math: auto-closure, spherical area, self-intersection,
//! point-in-polygon, and polygon overlap.

use crate::engine::geo::distance::EARTH_RADIUS_M;
use crate::engine::model::Coordinate;

/// Closes the ring if the first and last vertices differ, returning a new
/// `Vec` (the input is never mutated in place so callers can compare
/// before/after).
pub fn auto_close(ring: &[Coordinate]) -> Vec<Coordinate> {
    let mut closed = ring.to_vec();
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if (first.lat - last.lat).abs() > 1e-12 || (first.lon - last.lon).abs() > 1e-12 {
            closed.push(*first);
        }
    }
    closed
}

/// Number of *distinct* vertices, ignoring the closing duplicate.
pub fn distinct_vertex_count(ring: &[Coordinate]) -> usize {
    let closed = auto_close(ring);
    if closed.is_empty() {
        0
    } else {
        closed.len() - 1
    }
}

/// Spherical shoelace polygon area in square metres, on a WGS-84-radius
/// sphere. Ring is assumed closed (auto-closed if not).
pub fn area_m2(ring: &[Coordinate]) -> f64 {
    let closed = auto_close(ring);
    if closed.len() < 4 {
        return 0.0;
    }
    let mut total = 0.0;
    for w in closed.windows(2) {
        let (p1, p2) = (w[0], w[1]);
        let lon1 = p1.lon.to_radians();
        let lat1 = p1.lat.to_radians();
        let lon2 = p2.lon.to_radians();
        let lat2 = p2.lat.to_radians();
        total += (lon2 - lon1) * (2.0 + lat1.sin() + lat2.sin());
    }
    (total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}

/// Segment-intersection test (proper crossing or collinear overlap) used
/// by both self-intersection checking and polygon overlap.
fn segments_intersect(p1: Coordinate, p2: Coordinate, p3: Coordinate, p4: Coordinate) -> bool {
    fn cross(o: Coordinate, a: Coordinate, b: Coordinate) -> f64 {
        (a.lon - o.lon) * (b.lat - o.lat) - (a.lat - o.lat) * (b.lon - o.lon)
    }
    fn on_segment(p: Coordinate, q: Coordinate, r: Coordinate) -> bool {
        q.lon <= p.lon.max(r.lon)
            && q.lon >= p.lon.min(r.lon)
            && q.lat <= p.lat.max(r.lat)
            && q.lat >= p.lat.min(r.lat)
    }

    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    if d1 == 0.0 && on_segment(p3, p1, p4) {
        return true;
    }
    if d2 == 0.0 && on_segment(p3, p2, p4) {
        return true;
    }
    if d3 == 0.0 && on_segment(p1, p3, p2) {
        return true;
    }
    if d4 == 0.0 && on_segment(p1, p4, p2) {
        return true;
    }
    false
}

/// Returns `true` if any two non-adjacent edges of the (auto-closed) ring
/// cross.
pub fn has_self_intersection(ring: &[Coordinate]) -> bool {
    let closed = auto_close(ring);
    let n = closed.len();
    if n < 4 {
        return false;
    }
    let edge_count = n - 1;
    for i in 0..edge_count {
        let (a1, a2) = (closed[i], closed[i + 1]);
        for j in (i + 1)..edge_count {
            // Skip edges that share a vertex (adjacent, or first/last wrap).
            if j == i || j == i + 1 {
                continue;
            }
            if i == 0 && j == edge_count - 1 {
                continue;
            }
            let (b1, b2) = (closed[j], closed[j + 1]);
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

/// Ray-casting point-in-polygon test on `(lon, lat)` coordinates. The ring
/// is auto-closed before the test. Points exactly on an edge are treated
/// as inside.
pub fn point_in_polygon(point: Coordinate, ring: &[Coordinate]) -> bool {
    let closed = auto_close(ring);
    if closed.len() < 4 {
        return false;
    }
    let (x, y) = (point.lon, point.lat);
    let mut inside = false;
    let n = closed.len() - 1;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (closed[i].lon, closed[i].lat);
        let (xj, yj) = (closed[j].lon, closed[j].lat);

        // Edge-inclusive boundary check.
        let cross = (xj - xi) * (y - yi) - (yj - yi) * (x - xi);
        let within_bbox = x.min(xi.min(xj)) <= x
            && x <= x.max(xi.max(xj))
            && y.min(yi.min(yj)) <= y
            && y <= y.max(yi.max(yj));
        if cross.abs() < 1e-12 && within_bbox {
            return true;
        }

        let intersects = ((yi > y) != (yj > y))
            && (x < (xj - xi) * (y - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Polygon overlap: any vertex of one ring inside the other, OR any pair
/// of edges intersects.
pub fn polygons_overlap(a: &[Coordinate], b: &[Coordinate]) -> bool {
    let closed_a = auto_close(a);
    let closed_b = auto_close(b);

    if closed_a.iter().any(|v| point_in_polygon(*v, &closed_b)) {
        return true;
    }
    if closed_b.iter().any(|v| point_in_polygon(*v, &closed_a)) {
        return true;
    }

    let edges_a = closed_a.len().saturating_sub(1);
    let edges_b = closed_b.len().saturating_sub(1);
    for i in 0..edges_a {
        for j in 0..edges_b {
            if segments_intersect(closed_a[i], closed_a[i + 1], closed_b[j], closed_b[j + 1]) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{BoundingBox, Coordinate};

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon)
    }

    #[test]
    fn test_auto_close() {
        let ring = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 1.0), c(1.0, 0.0)];
        let closed = auto_close(&ring);
        assert_eq!(closed.len(), 5);
        assert_eq!(closed.first(), closed.last());
    }

    #[test]
    fn test_distinct_vertex_count_boundary() {
        let triangle = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 0.0)];
        assert_eq!(distinct_vertex_count(&triangle), 3);
        let two = vec![c(0.0, 0.0), c(0.0, 1.0)];
        assert_eq!(distinct_vertex_count(&two), 2);
    }

    #[test]
    fn test_self_intersection_detected_scenario_2() {
        let bowtie = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 0.0), c(1.0, 1.0)];
        assert!(has_self_intersection(&bowtie));
    }

    #[test]
    fn test_simple_square_not_self_intersecting() {
        let square = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 1.0), c(1.0, 0.0)];
        assert!(!has_self_intersection(&square));
    }

    #[test]
    fn test_point_in_polygon_scenario_1() {
        let zone = vec![
            c(28.6139, 77.2090),
            c(28.6139, 77.2100),
            c(28.6149, 77.2100),
            c(28.6149, 77.2090),
        ];
        let point = c(28.6144, 77.2095);
        assert!(point_in_polygon(point, &zone));
    }

    #[test]
    fn test_point_outside_polygon() {
        let zone = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 1.0), c(1.0, 0.0)];
        assert!(!point_in_polygon(c(5.0, 5.0), &zone));
    }

    #[test]
    fn test_overlap_rejection_scenario_3() {
        let a = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 1.0), c(1.0, 0.0)];
        let b = vec![c(0.5, 0.5), c(0.5, 1.5), c(1.5, 1.5), c(1.5, 0.5)];
        assert!(polygons_overlap(&a, &b));
    }

    #[test]
    fn test_non_overlapping_polygons() {
        let a = vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 1.0), c(1.0, 0.0)];
        let b = vec![c(10.0, 10.0), c(10.0, 11.0), c(11.0, 11.0), c(11.0, 10.0)];
        assert!(!polygons_overlap(&a, &b));
    }

    #[test]
    fn test_bounding_box_from_ring() {
        let ring = vec![c(1.0, 2.0), c(3.0, -1.0), c(-2.0, 5.0)];
        let bbox = BoundingBox::from_ring(&ring);
        assert_eq!(bbox.min_lat, -2.0);
        assert_eq!(bbox.max_lat, 3.0);
        assert_eq!(bbox.min_lon, -1.0);
        assert_eq!(bbox.max_lon, 5.0);
    }

    #[test]
    fn test_area_minimum_boundary() {
        // A roughly 100 m^2 square near the equator: ~0.0000090 deg side.
        let side_deg = 0.00009;
        let ring = vec![
            c(0.0, 0.0),
            c(0.0, side_deg),
            c(side_deg, side_deg),
            c(side_deg, 0.0),
        ];
        let area = area_m2(&ring);
        assert!(area > 50.0 && area < 200.0, "area was {area}");
    }
}
