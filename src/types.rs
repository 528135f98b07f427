use geo::{LineString, MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// A GeoJSON ring: ordered `[lon, lat]` positions, first equal to last.
/// Positions keep the fixture's raw `Vec<f64>` shape so a ring embedded in
/// a derived geometry is byte-for-byte the ring that was read.
pub type Ring = Vec<Vec<f64>>;

/// Names of the three numeric attributes every centroid record carries,
/// in the fixed order their values appear in chart glyphs.
pub const ATTRIBUTE_FIELDS: [&str; 3] = ["dane1", "dane2", "dane3"];

/// One administrative region boundary, used for the region layer and the
/// point-lookup API.
#[derive(Debug, Clone)]
pub struct RegionShape {
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

/// One river/route line feature.
#[derive(Debug, Clone)]
pub struct LineFeature {
    pub geometry: LineString<f64>,
}

/// One per-region statistics record: the region's representative centroid
/// plus the three generic numeric attributes from the fixture.
///
/// Loaded once, never mutated; every derived chart layer is rebuilt from
/// these records in full.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRecord {
    pub name: Option<String>,
    pub centroid: Point<f64>,
    pub dane1: f64,
    pub dane2: f64,
    pub dane3: f64,
}

impl RegionRecord {
    /// The value 3-tuple in fixed attribute order.
    pub fn values(&self) -> [f64; 3] {
        [self.dane1, self.dane2, self.dane3]
    }
}

/// Chart glyph families supported by the statistics overlay. The wire
/// names (`pie`, `bar`, `pie3D`, `donut`) match the fixture conventions
/// and are what tile paths and the API use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartKind {
    #[serde(rename = "pie")]
    Pie,
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "pie3D", alias = "pie3d")]
    Pie3d,
    #[serde(rename = "donut")]
    Donut,
}

impl ChartKind {
    pub const ALL: &'static [ChartKind] = &[Self::Pie, Self::Bar, Self::Pie3d, Self::Donut];

    /// Stable name used in tile paths and API parameters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pie => "pie",
            Self::Bar => "bar",
            Self::Pie3d => "pie3D",
            Self::Donut => "donut",
        }
    }
}

impl std::str::FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pie" => Ok(Self::Pie),
            "bar" => Ok(Self::Bar),
            "pie3d" => Ok(Self::Pie3d),
            "donut" => Ok(Self::Donut),
            other => Err(format!("unknown chart kind: {other}")),
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The glyph styling embedded in every chart feature. All fields are
/// fixed constants (see `processing`); the struct is still carried per
/// feature because each feature owns its style object outright and the
/// whole set is discarded on every chart-kind change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartStyle {
    /// Slice colors in value order, `#rrggbbaa` hex.
    pub colors: [&'static str; 3],
    pub stroke_color: &'static str,
    pub stroke_width: f64,
    /// Glyph radius in screen pixels.
    pub radius: f64,
}

/// A renderable point feature derived from one [`RegionRecord`]: the
/// reprojected centroid plus the chart-glyph parameterization. Immutable
/// value object; recreated wholesale whenever the chart kind changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFeature {
    /// Centroid in the coordinate space of the projection function the
    /// feature set was built with.
    pub position: (f64, f64),
    pub kind: ChartKind,
    /// Attribute values in fixed order; slice i is drawn with color i.
    pub values: [f64; 3],
    /// Display label: the three raw values joined with `", "`.
    pub label: String,
    pub style: ChartStyle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_kind_wire_names() {
        assert_eq!(ChartKind::Pie.name(), "pie");
        assert_eq!(ChartKind::Pie3d.name(), "pie3D");
        assert_eq!("pie3D".parse::<ChartKind>().unwrap(), ChartKind::Pie3d);
        assert_eq!("donut".parse::<ChartKind>().unwrap(), ChartKind::Donut);
        assert!("scatter".parse::<ChartKind>().is_err());
    }

    #[test]
    fn chart_kind_serde_round_trip() {
        let json = serde_json::to_string(&ChartKind::Pie3d).unwrap();
        assert_eq!(json, "\"pie3D\"");
        let back: ChartKind = serde_json::from_str("\"pie3d\"").unwrap();
        assert_eq!(back, ChartKind::Pie3d);
    }

    #[test]
    fn record_values_in_attribute_order() {
        let record = RegionRecord {
            name: None,
            centroid: Point::new(19.0, 52.0),
            dane1: 1.0,
            dane2: 2.0,
            dane3: 3.0,
        };
        assert_eq!(record.values(), [1.0, 2.0, 3.0]);
    }
}
