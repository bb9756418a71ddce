//! Property-based testing for the pure geo/distance math against the §8
//! Laws: distance symmetry, triangle inequality, and unit-conversion
//! round trip.

use proptest::prelude::*;

use geofence_engine::engine::geo::distance::{haversine_distance_m, vincenty_distance_m};
use geofence_engine::engine::model::{units, Coordinate};

fn lat_strategy() -> impl Strategy<Value = f64> {
    -89.9f64..89.9
}

fn lon_strategy() -> impl Strategy<Value = f64> {
    -179.9f64..179.9
}

fn coordinate_strategy() -> impl Strategy<Value = Coordinate> {
    (lat_strategy(), lon_strategy()).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
}

fn unit_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("m"), Just("km"), Just("mi"), Just("ft"), Just("nmi")]
}

proptest! {
    #[test]
    fn test_haversine_distance_is_symmetric(
        a in coordinate_strategy(),
        b in coordinate_strategy(),
    ) {
        prop_assert_eq!(haversine_distance_m(a, b), haversine_distance_m(b, a));
    }

    #[test]
    fn test_vincenty_distance_is_symmetric(
        a in coordinate_strategy(),
        b in coordinate_strategy(),
    ) {
        let ab = vincenty_distance_m(a, b);
        let ba = vincenty_distance_m(b, a);
        prop_assert!((ab - ba).abs() <= ab.max(ba) * 1e-6 + 1e-6);
    }

    #[test]
    fn test_vincenty_triangle_inequality(
        a in coordinate_strategy(),
        b in coordinate_strategy(),
        c in coordinate_strategy(),
    ) {
        let ab = vincenty_distance_m(a, b);
        let bc = vincenty_distance_m(b, c);
        let ac = vincenty_distance_m(a, c);
        prop_assert!(ac <= ab + bc + ab.max(bc).max(ac) * 1e-6 + 1e-3);
    }

    #[test]
    fn test_unit_conversion_round_trips(
        distance_m in 0.0f64..20_000_000.0,
        from in unit_strategy(),
        to in unit_strategy(),
    ) {
        let in_from = units::convert(distance_m, from).expect("unit recognized");
        let round_tripped_m = units::convert_units(in_from, from, "m").expect("unit recognized");
        prop_assert!((round_tripped_m - distance_m).abs() <= distance_m.abs() * 1e-9 + 1e-9);

        let converted = units::convert_units(in_from, from, to).expect("unit recognized");
        let back = units::convert_units(converted, to, from).expect("unit recognized");
        prop_assert!((back - in_from).abs() <= in_from.abs() * 1e-9 + 1e-9);
    }
}
