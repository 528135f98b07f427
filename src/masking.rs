use geo::{LineString, Polygon};
use geojson::{Feature, Value};

use crate::error::{MapError, Result};
use crate::types::Ring;

/// Ring covering the full WGS84 extent, counter-clockwise, `[lon, lat]`.
/// Used as the outer boundary of the white-out mask.
pub fn world_ring() -> Ring {
    vec![
        vec![-180.0, -90.0],
        vec![180.0, -90.0],
        vec![180.0, 90.0],
        vec![-180.0, 90.0],
        vec![-180.0, -90.0],
    ]
}

/// Checks that `ring` is a usable GeoJSON ring: closed, at least four
/// positions, and every position a finite `[lon, lat]` pair within WGS84
/// range. `what` names the ring in error messages.
pub fn validate_ring(ring: &Ring, what: &'static str) -> Result<()> {
    if ring.len() < 4 {
        return Err(MapError::MalformedGeometry {
            what,
            reason: format!("ring has {} positions, need at least 4", ring.len()),
        });
    }
    for (i, position) in ring.iter().enumerate() {
        if position.len() < 2 {
            return Err(MapError::MalformedGeometry {
                what,
                reason: format!("position #{i} has {} coordinates, need 2", position.len()),
            });
        }
        let (lon, lat) = (position[0], position[1]);
        if !lon.is_finite() || !lat.is_finite() {
            return Err(MapError::MalformedGeometry {
                what,
                reason: format!("position #{i} is not finite: [{lon}, {lat}]"),
            });
        }
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(MapError::MalformedGeometry {
                what,
                reason: format!(
                    "position #{i} out of range for [lon, lat]: [{lon}, {lat}] (axis order swapped?)"
                ),
            });
        }
    }
    let (first, last) = (&ring[0], &ring[ring.len() - 1]);
    if first != last {
        return Err(MapError::MalformedGeometry {
            what,
            reason: format!("ring is not closed: first {:?} != last {:?}", first, last),
        });
    }
    Ok(())
}

/// Builds the inverted world mask: a polygon whose exterior is `world`
/// and whose single hole is `country`, so that everything except the
/// country is covered.
///
/// Both rings are copied into the output untouched; the country ring in
/// particular is embedded position-for-position so downstream consumers
/// see exactly the ring that was read from the fixture. The same inputs
/// always produce the same feature.
pub fn build_mask(country: &Ring, world: &Ring) -> Result<Feature> {
    validate_ring(country, "country outer ring")?;
    validate_ring(world, "world ring")?;

    let geometry = geojson::Geometry::new(Value::Polygon(vec![world.clone(), country.clone()]));
    Ok(Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: None,
        foreign_members: None,
    })
}

/// The mask as a `geo` polygon (exterior = world, hole = country), for
/// rasterization and point queries.
pub fn mask_polygon(country: &Ring, world: &Ring) -> Result<Polygon<f64>> {
    validate_ring(country, "country outer ring")?;
    validate_ring(world, "world ring")?;
    Ok(Polygon::new(
        ring_to_line_string(world),
        vec![ring_to_line_string(country)],
    ))
}

pub fn ring_to_line_string(ring: &Ring) -> LineString<f64> {
    LineString::from(
        ring.iter()
            .map(|position| (position[0], position[1]))
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Contains, Point};

    fn rect_ring() -> Ring {
        vec![
            vec![14.0, 49.0],
            vec![24.0, 49.0],
            vec![24.0, 55.0],
            vec![14.0, 55.0],
            vec![14.0, 49.0],
        ]
    }

    #[test]
    fn world_ring_is_valid() {
        validate_ring(&world_ring(), "world ring").unwrap();
    }

    #[test]
    fn mask_has_exactly_two_rings_in_order() {
        let country = rect_ring();
        let world = world_ring();
        let feature = build_mask(&country, &world).unwrap();
        let geometry = feature.geometry.unwrap();
        match geometry.value {
            Value::Polygon(rings) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[0], world);
                assert_eq!(rings[1], country);
            }
            other => panic!("expected Polygon, got {:?}", other),
        }
    }

    #[test]
    fn country_ring_embedded_untouched() {
        // Deliberately unsorted, duplicated interior vertex: the builder
        // must not normalize anything.
        let country = vec![
            vec![20.0, 50.0],
            vec![18.0, 54.0],
            vec![18.0, 54.0],
            vec![16.0, 51.0],
            vec![20.0, 50.0],
        ];
        let feature = build_mask(&country, &world_ring()).unwrap();
        match feature.geometry.unwrap().value {
            Value::Polygon(rings) => assert_eq!(rings[1], country),
            other => panic!("expected Polygon, got {:?}", other),
        }
    }

    #[test]
    fn building_twice_yields_identical_masks() {
        let country = rect_ring();
        let world = world_ring();
        let first = build_mask(&country, &world).unwrap();
        let second = build_mask(&country, &world).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn open_ring_is_rejected() {
        let mut country = rect_ring();
        country.pop();
        country.push(vec![14.0, 49.5]);
        let err = build_mask(&country, &world_ring()).unwrap_err();
        assert!(matches!(err, MapError::MalformedGeometry { .. }));
        assert!(err.to_string().contains("not closed"));
    }

    #[test]
    fn short_ring_is_rejected() {
        let country = vec![vec![14.0, 49.0], vec![24.0, 49.0], vec![14.0, 49.0]];
        let err = build_mask(&country, &world_ring()).unwrap_err();
        assert!(err.to_string().contains("at least 4"));
    }

    #[test]
    fn lat_lon_ordered_world_ring_is_rejected() {
        // [lat, lon] ordering puts +/-180 in the latitude slot, which the
        // range check catches.
        let swapped = vec![
            vec![-90.0, -180.0],
            vec![-90.0, 180.0],
            vec![90.0, 180.0],
            vec![90.0, -180.0],
            vec![-90.0, -180.0],
        ];
        let err = build_mask(&rect_ring(), &swapped).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn mask_polygon_excludes_country_interior() {
        let mask = mask_polygon(&rect_ring(), &world_ring()).unwrap();
        // Inside the country hole: not covered by the mask.
        assert!(!mask.contains(&Point::new(19.0, 52.0)));
        // Outside the country: covered.
        assert!(mask.contains(&Point::new(0.0, 0.0)));
        assert!(mask.contains(&Point::new(30.0, 52.0)));
    }
}
