use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{ensure, Context, Result};

use crate::types::ChartKind;

/// The u32 tile-grid arithmetic tops out at zoom 24.
const MAX_ZOOM: u8 = 24;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub layers: LayersConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    pub output: OutputConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Country boundary fixture (GeoJSON; outer ring is extracted).
    pub country: PathBuf,
    /// Per-region centroid records with dane1..dane3 attributes.
    pub centroids: PathBuf,
    /// Region boundaries layer fixture.
    pub regions: Option<PathBuf>,
    /// Rivers/routes line layer fixture.
    pub lines: Option<PathBuf>,
}

/// Initial viewport advertised to clients via the layers API.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ViewConfig {
    #[serde(default = "default_center")]
    pub center: [f64; 2], // [lon, lat]
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    #[serde(default)]
    pub bounds: MapBounds,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            center: default_center(),
            zoom: default_zoom(),
            bounds: MapBounds::default(),
        }
    }
}

fn default_center() -> [f64; 2] {
    [19.0, 52.0]
}

fn default_zoom() -> u8 {
    6
}

/// Geographic extent that tile generation covers.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct MapBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Default for MapBounds {
    fn default() -> Self {
        // Poland plus a small margin.
        Self {
            min_lon: 14.1,
            min_lat: 49.0,
            max_lon: 24.2,
            max_lat: 55.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayersConfig {
    #[serde(default = "LayerStyle::mask")]
    pub mask: LayerStyle,
    #[serde(default = "LayerStyle::regions")]
    pub regions: LayerStyle,
    #[serde(default = "LayerStyle::lines")]
    pub lines: LayerStyle,
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self {
            mask: LayerStyle::mask(),
            regions: LayerStyle::regions(),
            lines: LayerStyle::lines(),
        }
    }
}

/// Stroke/fill styling for one base layer, with the enabled flag that
/// decides whether its tile set is generated and advertised.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LayerStyle {
    pub enabled: bool,
    pub color: String,
    pub weight: f64,
    pub fill_color: Option<String>,
    pub fill_opacity: f64,
}

impl LayerStyle {
    fn mask() -> Self {
        Self {
            enabled: true,
            color: "#fff".to_string(),
            weight: 1.0,
            fill_color: Some("#fff".to_string()),
            fill_opacity: 0.9,
        }
    }

    fn regions() -> Self {
        Self {
            enabled: true,
            color: "#1d1f1d".to_string(),
            weight: 2.0,
            fill_color: Some("#3a994f".to_string()),
            fill_opacity: 0.6,
        }
    }

    fn lines() -> Self {
        Self {
            enabled: false,
            color: "#007BFF".to_string(),
            weight: 1.0,
            fill_color: None,
            fill_opacity: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatisticsConfig {
    /// Chart kinds to pre-render tile sets for.
    #[serde(default = "all_chart_kinds")]
    pub kinds: Vec<ChartKind>,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            kinds: all_chart_kinds(),
        }
    }
}

fn all_chart_kinds() -> Vec<ChartKind> {
    ChartKind::ALL.to_vec()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub tile_dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.output.min_zoom <= self.output.max_zoom,
            "min_zoom {} exceeds max_zoom {}",
            self.output.min_zoom,
            self.output.max_zoom
        );
        ensure!(
            self.output.max_zoom <= MAX_ZOOM,
            "max_zoom {} exceeds the supported maximum {}",
            self.output.max_zoom,
            MAX_ZOOM
        );
        Ok(())
    }
}
