use crate::config::{AppConfig, LayerStyle, ViewConfig};
use crate::data::Fixtures;
use crate::processing::{project_regions, to_feature_collection};
use crate::types::{ChartKind, RegionRecord, RegionShape, ATTRIBUTE_FIELDS};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use geo::algorithm::contains::Contains;
use geo::{Point, Rect};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

// Wrapper for RTree indexing
struct RegionIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RegionIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub regions: Vec<RegionShape>,
    pub records: Vec<RegionRecord>,
    pub tree: RTree<RegionIndex>,
    pub config: AppConfig,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct QueryResponse {
    name: Option<String>,
    attributes: Option<AttributeValues>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AttributeValues {
    dane1: f64,
    dane2: f64,
    dane3: f64,
}

#[derive(Deserialize)]
pub struct StatisticsParams {
    kind: Option<String>,
}

#[derive(Serialize)]
struct LayersResponse {
    view: ViewConfig,
    layers: Vec<LayerEntry>,
    charts: Vec<ChartTileSet>,
    attributes: [&'static str; 3],
}

#[derive(Serialize)]
struct LayerEntry {
    name: &'static str,
    tiles: String,
    enabled: bool,
    style: LayerStyle,
}

#[derive(Serialize)]
struct ChartTileSet {
    kind: &'static str,
    tiles: String,
}

pub async fn start_server(config: AppConfig, fixtures: Fixtures) -> Result<()> {
    tracing::info!("Building spatial index for API...");
    let tree = build_region_tree(&fixtures.regions);
    tracing::info!("Spatial index built over {} regions.", fixtures.regions.len());

    let state = Arc::new(AppState {
        regions: fixtures.regions,
        records: fixtures.records,
        tree,
        config: config.clone(),
    });

    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    tracing::info!("Starting server on http://{}", addr);

    let tile_service = ServeDir::new(&config.output.tile_dir);

    let app = Router::new()
        .route("/api/query", get(query_handler))
        .route("/api/layers", get(layers_handler))
        .route("/api/statistics", get(statistics_handler))
        .nest_service("/tiles", tile_service)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_region_tree(regions: &[RegionShape]) -> RTree<RegionIndex> {
    let items: Vec<RegionIndex> = regions
        .iter()
        .enumerate()
        .map(|(i, region)| {
            use geo::bounding_rect::BoundingRect;
            let rect = region.geometry.bounding_rect().unwrap_or(Rect::new(
                geo::Coord { x: 0.0, y: 0.0 },
                geo::Coord { x: 0.0, y: 0.0 },
            ));
            RegionIndex {
                index: i,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            }
        })
        .collect();
    RTree::bulk_load(items)
}

fn region_at<'a>(
    regions: &'a [RegionShape],
    tree: &RTree<RegionIndex>,
    point: Point<f64>,
) -> Option<&'a RegionShape> {
    let envelope = AABB::from_point([point.x(), point.y()]);
    tree.locate_in_envelope_intersecting(&envelope)
        .filter_map(|candidate| regions.get(candidate.index))
        .find(|region| region.geometry.contains(&point))
}

/// Joins a region to its statistics record: the record whose centroid
/// the region contains.
fn attributes_for(records: &[RegionRecord], region: &RegionShape) -> Option<AttributeValues> {
    records
        .iter()
        .find(|record| region.geometry.contains(&record.centroid))
        .map(|record| AttributeValues {
            dane1: record.dane1,
            dane2: record.dane2,
            dane3: record.dane3,
        })
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    let point = Point::new(params.lon, params.lat);
    let region = region_at(&state.regions, &state.tree, point);
    Json(region.map(|region| QueryResponse {
        name: region.name.clone(),
        attributes: attributes_for(&state.records, region),
    }))
}

async fn layers_handler(State(state): State<Arc<AppState>>) -> Json<LayersResponse> {
    let layers = &state.config.layers;
    let entries = vec![
        layer_entry("mask", &layers.mask),
        layer_entry("regions", &layers.regions),
        layer_entry("lines", &layers.lines),
    ];
    let charts = state
        .config
        .statistics
        .kinds
        .iter()
        .map(|kind| ChartTileSet {
            kind: kind.name(),
            tiles: format!("/tiles/charts/{}/{{z}}/{{x}}/{{y}}.png", kind.name()),
        })
        .collect();
    Json(LayersResponse {
        view: state.config.view.clone(),
        layers: entries,
        charts,
        attributes: ATTRIBUTE_FIELDS,
    })
}

fn layer_entry(name: &'static str, style: &LayerStyle) -> LayerEntry {
    LayerEntry {
        name,
        tiles: format!("/tiles/{name}/{{z}}/{{x}}/{{y}}.png"),
        enabled: style.enabled,
        style: style.clone(),
    }
}

/// Chart features as GeoJSON, rebuilt from the records on every request;
/// a kind switch is a fresh projection, never a mutation of prior
/// output. Defaults to `pie` when no kind is given.
async fn statistics_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatisticsParams>,
) -> Result<Json<geojson::FeatureCollection>, (StatusCode, String)> {
    let kind = match params.kind.as_deref() {
        None => ChartKind::Pie,
        Some(raw) => raw
            .parse::<ChartKind>()
            .map_err(|message| (StatusCode::BAD_REQUEST, message))?,
    };
    let features = project_regions(&state.records, kind, |lon, lat| (lon, lat))
        .map_err(|error| (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?;
    Ok(Json(to_feature_collection(&features)))
}
