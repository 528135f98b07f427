use geojson::{Feature, FeatureCollection, JsonObject, Value};
use serde_json::json;

use crate::error::{MapError, Result};
use crate::types::{ChartFeature, ChartKind, ChartStyle, RegionRecord, ATTRIBUTE_FIELDS};

/// Slice colors in attribute order: dane1 red, dane2 blue, dane3 green.
pub const SLICE_COLORS: [&str; 3] = ["#ec2020ff", "#1f6bb8ff", "#71f571ff"];
/// Near-black outline shared by every glyph.
pub const STROKE_COLOR: &str = "#0a0a0aff";
pub const STROKE_WIDTH: f64 = 0.7;
/// Glyph radius in screen pixels.
pub const GLYPH_RADIUS: f64 = 25.0;

/// The one styling every chart feature carries. Not configurable: the
/// palette is part of the layer's visual identity and identical across
/// chart kinds.
pub fn chart_style() -> ChartStyle {
    ChartStyle {
        colors: SLICE_COLORS,
        stroke_color: STROKE_COLOR,
        stroke_width: STROKE_WIDTH,
        radius: GLYPH_RADIUS,
    }
}

/// Projects region statistics records into renderable chart features.
///
/// Emits one feature per record, in input order, with the record's
/// centroid run through `project` (geographic `(lon, lat)` in, whatever
/// plane the caller renders in out). The projection is applied to the
/// centroid only; values pass through untouched and the label is the
/// three raw values joined with `", "`.
///
/// Records with a non-finite attribute are rejected rather than skipped,
/// naming the offending field. Pure: the same records and kind always
/// yield the same features.
pub fn project_regions<F>(
    records: &[RegionRecord],
    kind: ChartKind,
    project: F,
) -> Result<Vec<ChartFeature>>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let mut features = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let values = record.values();
        for (field, value) in ATTRIBUTE_FIELDS.into_iter().zip(values) {
            if !value.is_finite() {
                return Err(MapError::InvalidRegionRecord {
                    index,
                    field,
                    problem: "not a finite number",
                });
            }
        }
        features.push(ChartFeature {
            position: project(record.centroid.x(), record.centroid.y()),
            kind,
            values,
            label: format!("{}, {}, {}", values[0], values[1], values[2]),
            style: chart_style(),
        });
    }
    Ok(features)
}

/// Serializes chart features as a GeoJSON FeatureCollection of points,
/// the shape the statistics API returns. Positions are emitted as-is, so
/// this expects features built with the identity projection.
pub fn to_feature_collection(features: &[ChartFeature]) -> FeatureCollection {
    let features = features
        .iter()
        .map(|chart| {
            let (x, y) = chart.position;
            let mut properties = JsonObject::new();
            properties.insert("chartKind".into(), json!(chart.kind.name()));
            properties.insert("values".into(), json!(chart.values));
            properties.insert("label".into(), json!(chart.label));
            properties.insert(
                "style".into(),
                json!({
                    "colors": chart.style.colors,
                    "strokeColor": chart.style.stroke_color,
                    "strokeWidth": chart.style.stroke_width,
                    "radius": chart.style.radius,
                }),
            );
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(Value::Point(vec![x, y]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
