//! Error types for polmap.
//!
//! Every variant is a deterministic input-validation failure. The fixtures
//! are static documents bundled with the application, so nothing here is
//! retryable: a failure means the document is wrong, and it is reported at
//! the boundary where the document is first consumed, never from deep
//! inside rendering.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    /// A ring that cannot be used as mask or outline geometry: not closed,
    /// too few points, a position with fewer than two axes, or a
    /// coordinate outside the `[lon, lat]` value ranges.
    #[error("malformed geometry ({what}): {reason}")]
    MalformedGeometry { what: &'static str, reason: String },

    /// A centroid record whose numeric attributes cannot be read. `field`
    /// names the offending attribute (`dane1`, `dane2` or `dane3`) so the
    /// broken fixture entry can be found directly.
    #[error("invalid region record #{index}: attribute `{field}` is {problem}")]
    InvalidRegionRecord {
        index: usize,
        field: &'static str,
        problem: &'static str,
    },

    /// A fixture whose top-level shape is not usable at all, e.g. a
    /// country-outline document with no polygonal geometry in it.
    #[error("unsupported fixture shape: {0}")]
    UnsupportedFixture(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MapError>;
