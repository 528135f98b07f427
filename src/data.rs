use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, Value};

use crate::config::InputConfig;
use crate::error::{MapError, Result};
use crate::masking::validate_ring;
use crate::types::{LineFeature, RegionRecord, RegionShape, Ring, ATTRIBUTE_FIELDS};

/// Everything `generate` and `serve` consume, loaded once and immutable
/// from then on. Slots for unconfigured fixtures stay empty.
#[derive(Debug, Default)]
pub struct Fixtures {
    pub country_ring: Option<Ring>,
    pub regions: Vec<RegionShape>,
    pub lines: Vec<LineFeature>,
    pub records: Vec<RegionRecord>,
}

impl Fixtures {
    /// Loads every configured fixture, failing on the first broken one.
    /// The server uses this: it refuses to start on unreadable inputs.
    pub fn load(input: &InputConfig) -> Result<Self> {
        let country_ring = Some(load_country_ring(&input.country)?);
        let records = load_region_records(&input.centroids)?;
        let regions = match &input.regions {
            Some(path) => load_region_shapes(path)?,
            None => Vec::new(),
        };
        let lines = match &input.lines {
            Some(path) => load_line_features(path)?,
            None => Vec::new(),
        };
        Ok(Self {
            country_ring,
            regions,
            lines,
            records,
        })
    }

    /// Loads fixtures for tile generation. A fixture that fails to load is
    /// reported and its slot left empty, so the layers that do have data
    /// still generate.
    pub fn load_lenient(input: &InputConfig) -> Self {
        let mut fixtures = Self::default();
        match load_country_ring(&input.country) {
            Ok(ring) => fixtures.country_ring = Some(ring),
            Err(error) => tracing::error!(
                "country fixture {:?} failed to load, skipping mask layer: {error}",
                input.country
            ),
        }
        match load_region_records(&input.centroids) {
            Ok(records) => fixtures.records = records,
            Err(error) => tracing::error!(
                "centroid fixture {:?} failed to load, skipping chart layers: {error}",
                input.centroids
            ),
        }
        if let Some(path) = &input.regions {
            match load_region_shapes(path) {
                Ok(shapes) => fixtures.regions = shapes,
                Err(error) => tracing::error!(
                    "regions fixture {path:?} failed to load, skipping region layer: {error}"
                ),
            }
        }
        if let Some(path) = &input.lines {
            match load_line_features(path) {
                Ok(lines) => fixtures.lines = lines,
                Err(error) => tracing::error!(
                    "lines fixture {path:?} failed to load, skipping line layer: {error}"
                ),
            }
        }
        fixtures
    }
}

pub fn read_geojson(path: &Path) -> Result<GeoJson> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(GeoJson::from_reader(reader)?)
}

pub fn load_country_ring(path: &Path) -> Result<Ring> {
    let document = read_geojson(path)?;
    country_outer_ring(&document)
}

pub fn load_region_shapes(path: &Path) -> Result<Vec<RegionShape>> {
    region_shapes_from(feature_collection(read_geojson(path)?, "regions")?)
}

pub fn load_line_features(path: &Path) -> Result<Vec<LineFeature>> {
    line_features_from(feature_collection(read_geojson(path)?, "lines")?)
}

pub fn load_region_records(path: &Path) -> Result<Vec<RegionRecord>> {
    region_records_from(feature_collection(read_geojson(path)?, "centroids")?)
}

/// Extracts the country's flat outer ring, whatever wrapper the fixture
/// uses: a bare `Geometry`, a `Feature`, or a `FeatureCollection` (first
/// feature). For a `MultiPolygon` the largest-area part wins, so a
/// coastal islet can never displace the mainland outline. The returned
/// ring is validated and otherwise untouched.
pub fn country_outer_ring(document: &GeoJson) -> Result<Ring> {
    let geometry = match document {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .first()
            .and_then(|feature| feature.geometry.as_ref())
            .ok_or_else(|| {
                MapError::UnsupportedFixture(
                    "country fixture has no feature with a geometry".to_string(),
                )
            })?,
        GeoJson::Feature(feature) => feature.geometry.as_ref().ok_or_else(|| {
            MapError::UnsupportedFixture("country feature has no geometry".to_string())
        })?,
        GeoJson::Geometry(geometry) => geometry,
    };

    let ring = match &geometry.value {
        Value::Polygon(rings) => {
            rings
                .first()
                .cloned()
                .ok_or_else(|| MapError::MalformedGeometry {
                    what: "country outer ring",
                    reason: "polygon has no rings".to_string(),
                })?
        }
        Value::MultiPolygon(polygons) => largest_outer_ring(polygons)?,
        _ => {
            return Err(MapError::UnsupportedFixture(
                "country geometry must be a Polygon or MultiPolygon".to_string(),
            ))
        }
    };
    validate_ring(&ring, "country outer ring")?;
    Ok(ring)
}

fn largest_outer_ring(polygons: &[geojson::PolygonType]) -> Result<Ring> {
    polygons
        .iter()
        .filter_map(|rings| rings.first())
        .max_by(|a, b| ring_area(a).total_cmp(&ring_area(b)))
        .cloned()
        .ok_or_else(|| MapError::MalformedGeometry {
            what: "country outer ring",
            reason: "multipolygon has no rings".to_string(),
        })
}

/// Planar shoelace area, used only to rank multipolygon parts.
fn ring_area(ring: &Ring) -> f64 {
    let mut doubled = 0.0;
    for pair in ring.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.len() < 2 || b.len() < 2 {
            return 0.0;
        }
        doubled += a[0] * b[1] - b[0] * a[1];
    }
    (doubled / 2.0).abs()
}

pub fn region_shapes_from(collection: FeatureCollection) -> Result<Vec<RegionShape>> {
    let mut shapes = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let name = feature_name(&feature);
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry: geo::Geometry<f64> = geometry.value.try_into()?;
        let geometry = match geometry {
            geo::Geometry::MultiPolygon(multi) => multi,
            geo::Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            _ => {
                tracing::warn!("skipping non-areal feature {name:?} in regions fixture");
                continue;
            }
        };
        shapes.push(RegionShape { name, geometry });
    }
    Ok(shapes)
}

pub fn line_features_from(collection: FeatureCollection) -> Result<Vec<LineFeature>> {
    let mut lines = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry: geo::Geometry<f64> = geometry.value.try_into()?;
        match geometry {
            geo::Geometry::LineString(line) => lines.push(LineFeature { geometry: line }),
            geo::Geometry::MultiLineString(multi) => {
                lines.extend(multi.into_iter().map(|line| LineFeature { geometry: line }));
            }
            _ => {
                tracing::warn!("skipping non-line feature in lines fixture");
            }
        }
    }
    Ok(lines)
}

/// Converts centroid features into typed records, in input order. Every
/// record must carry a finite `[lon, lat]` point and numeric `dane1`,
/// `dane2`, `dane3` properties; anything else aborts the load naming the
/// record and field, so bad attributes surface here instead of as odd
/// glyphs later.
pub fn region_records_from(collection: FeatureCollection) -> Result<Vec<RegionRecord>> {
    let mut records = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.iter().enumerate() {
        let position = match feature.geometry.as_ref().map(|geometry| &geometry.value) {
            Some(Value::Point(position)) => position,
            _ => {
                return Err(MapError::MalformedGeometry {
                    what: "region centroid",
                    reason: format!("record #{index} has no point geometry"),
                })
            }
        };
        if position.len() < 2 {
            return Err(MapError::MalformedGeometry {
                what: "region centroid",
                reason: format!("record #{index} has {} coordinates, need 2", position.len()),
            });
        }
        let (lon, lat) = (position[0], position[1]);
        if !lon.is_finite()
            || !lat.is_finite()
            || !(-180.0..=180.0).contains(&lon)
            || !(-90.0..=90.0).contains(&lat)
        {
            return Err(MapError::MalformedGeometry {
                what: "region centroid",
                reason: format!(
                    "record #{index} out of range for [lon, lat]: [{lon}, {lat}] (axis order swapped?)"
                ),
            });
        }
        let [dane1, dane2, dane3] = attribute_values(index, feature.properties.as_ref())?;
        records.push(RegionRecord {
            name: feature_name(feature),
            centroid: geo::Point::new(lon, lat),
            dane1,
            dane2,
            dane3,
        });
    }
    Ok(records)
}

fn attribute_values(index: usize, properties: Option<&JsonObject>) -> Result<[f64; 3]> {
    let mut values = [0.0; 3];
    for (slot, field) in ATTRIBUTE_FIELDS.into_iter().enumerate() {
        let raw = match properties.and_then(|props| props.get(field)) {
            None => {
                return Err(MapError::InvalidRegionRecord {
                    index,
                    field,
                    problem: "missing",
                })
            }
            Some(serde_json::Value::Number(number)) => number.as_f64(),
            Some(_) => None,
        };
        match raw {
            Some(number) if number.is_finite() => values[slot] = number,
            _ => {
                return Err(MapError::InvalidRegionRecord {
                    index,
                    field,
                    problem: "not numeric",
                })
            }
        }
    }
    Ok(values)
}

fn feature_name(feature: &Feature) -> Option<String> {
    let properties = feature.properties.as_ref()?;
    for key in ["name", "nazwa"] {
        if let Some(serde_json::Value::String(value)) = properties.get(key) {
            return Some(value.clone());
        }
    }
    None
}

fn feature_collection(document: GeoJson, what: &'static str) -> Result<FeatureCollection> {
    match document {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(MapError::UnsupportedFixture(format!(
            "{what} fixture must be a FeatureCollection"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GeoJson {
        json.parse().unwrap()
    }

    fn parse_collection(json: &str) -> FeatureCollection {
        match parse(json) {
            GeoJson::FeatureCollection(collection) => collection,
            other => panic!("expected FeatureCollection, got {:?}", other),
        }
    }

    #[test]
    fn unreadable_fixture_files_surface_io_and_parse_errors() {
        let dir = tempfile::tempdir().unwrap();

        let err = read_geojson(&dir.path().join("absent.geo.json")).unwrap_err();
        assert!(matches!(err, MapError::Io(_)));

        let path = dir.path().join("broken.geo.json");
        std::fs::write(&path, "{ not geojson").unwrap();
        let err = read_geojson(&path).unwrap_err();
        assert!(matches!(err, MapError::Json(_)));
    }

    #[test]
    fn outer_ring_from_nested_feature_collection() {
        // The common fixture shape: FeatureCollection wrapping a
        // MultiPolygon, ring at coordinates[0][0].
        let document = parse(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "MultiPolygon",
                        "coordinates": [[[[14.0, 49.0], [24.0, 49.0], [24.0, 55.0], [14.0, 55.0], [14.0, 49.0]]]]
                    }
                }]
            }"#,
        );
        let ring = country_outer_ring(&document).unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], vec![14.0, 49.0]);
        assert_eq!(ring[2], vec![24.0, 55.0]);
    }

    #[test]
    fn outer_ring_from_bare_polygon_geometry() {
        let document = parse(
            r#"{
                "type": "Polygon",
                "coordinates": [[[14.0, 49.0], [24.0, 49.0], [24.0, 55.0], [14.0, 49.0]]]
            }"#,
        );
        let ring = country_outer_ring(&document).unwrap();
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn multipolygon_mainland_beats_islet() {
        let document = parse(
            r#"{
                "type": "MultiPolygon",
                "coordinates": [
                    [[[18.0, 54.6], [18.1, 54.6], [18.1, 54.7], [18.0, 54.6]]],
                    [[[14.0, 49.0], [24.0, 49.0], [24.0, 55.0], [14.0, 55.0], [14.0, 49.0]]]
                ]
            }"#,
        );
        let ring = country_outer_ring(&document).unwrap();
        assert_eq!(ring[1], vec![24.0, 49.0]);
    }

    #[test]
    fn open_country_ring_fails_at_ingestion() {
        let document = parse(
            r#"{
                "type": "Polygon",
                "coordinates": [[[14.0, 49.0], [24.0, 49.0], [24.0, 55.0], [14.0, 55.0]]]
            }"#,
        );
        let err = country_outer_ring(&document).unwrap_err();
        assert!(matches!(err, MapError::MalformedGeometry { .. }));
    }

    #[test]
    fn point_country_geometry_is_unsupported() {
        let document = parse(r#"{ "type": "Point", "coordinates": [19.0, 52.0] }"#);
        let err = country_outer_ring(&document).unwrap_err();
        assert!(matches!(err, MapError::UnsupportedFixture(_)));
    }

    #[test]
    fn records_preserve_order_and_values() {
        let collection = parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "properties": {"name": "A", "dane1": 10, "dane2": 20, "dane3": 30},
                        "geometry": {"type": "Point", "coordinates": [19.0, 52.0]}
                    },
                    {
                        "type": "Feature",
                        "properties": {"nazwa": "B", "dane1": 1.5, "dane2": 2.5, "dane3": 3.5},
                        "geometry": {"type": "Point", "coordinates": [17.0, 51.0]}
                    }
                ]
            }"#,
        );
        let records = region_records_from(collection).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("A"));
        assert_eq!(records[0].values(), [10.0, 20.0, 30.0]);
        assert_eq!(records[1].name.as_deref(), Some("B"));
        assert_eq!(records[1].centroid.x(), 17.0);
        assert_eq!(records[1].values(), [1.5, 2.5, 3.5]);
    }

    #[test]
    fn missing_attribute_names_the_field() {
        let collection = parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {"dane1": 10, "dane3": 30},
                    "geometry": {"type": "Point", "coordinates": [19.0, 52.0]}
                }]
            }"#,
        );
        let err = region_records_from(collection).unwrap_err();
        match err {
            MapError::InvalidRegionRecord {
                index,
                field,
                problem,
            } => {
                assert_eq!(index, 0);
                assert_eq!(field, "dane2");
                assert_eq!(problem, "missing");
            }
            other => panic!("expected InvalidRegionRecord, got {:?}", other),
        }
    }

    #[test]
    fn string_attribute_is_not_coerced() {
        let collection = parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {"dane1": 10, "dane2": 20, "dane3": "30"},
                    "geometry": {"type": "Point", "coordinates": [19.0, 52.0]}
                }]
            }"#,
        );
        let err = region_records_from(collection).unwrap_err();
        match err {
            MapError::InvalidRegionRecord { field, problem, .. } => {
                assert_eq!(field, "dane3");
                assert_eq!(problem, "not numeric");
            }
            other => panic!("expected InvalidRegionRecord, got {:?}", other),
        }
    }

    #[test]
    fn lat_lon_swapped_centroid_is_rejected() {
        let collection = parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {"dane1": 1, "dane2": 2, "dane3": 3},
                    "geometry": {"type": "Point", "coordinates": [52.0, 119.0]}
                }]
            }"#,
        );
        let err = region_records_from(collection).unwrap_err();
        assert!(err.to_string().contains("axis order swapped"));
    }

    #[test]
    fn region_shapes_pick_up_either_name_key() {
        let collection = parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "properties": {"nazwa": "mazowieckie"},
                        "geometry": {
                            "type": "Polygon",
                            "coordinates": [[[20.0, 51.5], [22.0, 51.5], [22.0, 53.0], [20.0, 53.0], [20.0, 51.5]]]
                        }
                    }
                ]
            }"#,
        );
        let shapes = region_shapes_from(collection).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].name.as_deref(), Some("mazowieckie"));
        assert_eq!(shapes[0].geometry.0.len(), 1);
    }

    #[test]
    fn multilinestring_is_flattened() {
        let collection = parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "MultiLineString",
                        "coordinates": [
                            [[16.0, 50.0], [17.0, 51.0]],
                            [[18.0, 52.0], [19.0, 53.0], [20.0, 54.0]]
                        ]
                    }
                }]
            }"#,
        );
        let lines = line_features_from(collection).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].geometry.0.len(), 3);
    }
}
