use crate::config::{AppConfig, MapBounds};
use crate::data::Fixtures;
use crate::masking::{build_mask, mask_polygon, world_ring};
use crate::processing::project_regions;
use crate::types::{ChartFeature, ChartKind, LineFeature, RegionRecord, RegionShape, Ring};
use anyhow::{Context, Result};
use geo::{Contains, LineString, Point, Polygon};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

// Constants for Web Mercator
const TILE_SIZE: u32 = 256;

// Pie-3D glyph: vertical squash of the ellipse and skirt depth as a
// fraction of the radius.
const PIE3D_SQUASH: f64 = 0.6;
const PIE3D_DEPTH: f64 = 0.25;
const PIE3D_SKIRT_SHADE: f64 = 0.65;

/// Rasterizes every enabled layer (and every requested chart kind) into
/// its own XYZ tile pyramid under `{tile_dir}/{layer}/{z}/{x}/{y}.png`,
/// and writes the mask feature itself as `{tile_dir}/mask.geo.json`.
///
/// Layers are independent: one failing to render is reported and the
/// rest still generate. Zoom levels render in parallel.
pub fn generate_tiles(config: &AppConfig, fixtures: &Fixtures) -> Result<()> {
    tracing::info!(
        "Generating tiles from min_zoom {} to max_zoom {}...",
        config.output.min_zoom,
        config.output.max_zoom
    );

    if config.layers.mask.enabled {
        if let Some(ring) = &fixtures.country_ring {
            if let Err(error) = write_mask_feature(&config.output.tile_dir, ring) {
                tracing::error!("mask feature not written: {error}");
            }
        }
    }

    let mask = build_mask_layer(config, fixtures);

    (config.output.min_zoom..=config.output.max_zoom)
        .into_par_iter()
        .for_each(|zoom| {
            if let Some(mask) = &mask {
                if let Err(error) = render_mask_level(config, mask, zoom) {
                    tracing::error!("mask layer failed at zoom {zoom}: {error}");
                }
            }
            if config.layers.regions.enabled && !fixtures.regions.is_empty() {
                if let Err(error) = render_regions_level(config, &fixtures.regions, zoom) {
                    tracing::error!("regions layer failed at zoom {zoom}: {error}");
                }
            }
            if config.layers.lines.enabled && !fixtures.lines.is_empty() {
                if let Err(error) = render_lines_level(config, &fixtures.lines, zoom) {
                    tracing::error!("lines layer failed at zoom {zoom}: {error}");
                }
            }
            if !fixtures.records.is_empty() {
                for &kind in &config.statistics.kinds {
                    if let Err(error) = render_chart_level(config, &fixtures.records, kind, zoom) {
                        tracing::error!("{kind} chart layer failed at zoom {zoom}: {error}");
                    }
                }
            }
        });

    Ok(())
}

/// Writes the mask feature next to the tile pyramids, so vector-capable
/// clients can draw it without re-deriving the hole.
fn write_mask_feature(tile_dir: &Path, ring: &Ring) -> Result<()> {
    let mask = build_mask(ring, &world_ring())?;
    fs::create_dir_all(tile_dir)
        .with_context(|| format!("Failed to create tile dir {:?}", tile_dir))?;
    let path = tile_dir.join("mask.geo.json");
    let body = serde_json::to_string(&mask).context("Failed to encode mask feature")?;
    fs::write(&path, body)
        .with_context(|| format!("Failed to write mask feature to {:?}", path))?;
    tracing::info!("Mask feature written to {:?}", path);
    Ok(())
}

fn build_mask_layer(config: &AppConfig, fixtures: &Fixtures) -> Option<Polygon<f64>> {
    if !config.layers.mask.enabled {
        return None;
    }
    let ring = fixtures.country_ring.as_ref()?;
    match mask_polygon(ring, &world_ring()) {
        Ok(polygon) => Some(polygon),
        Err(error) => {
            tracing::error!("mask layer skipped: {error}");
            None
        }
    }
}

fn render_mask_level(config: &AppConfig, mask: &Polygon<f64>, zoom: u8) -> Result<()> {
    let style = &config.layers.mask;
    let mut canvas = TileCanvas::new(zoom, &config.view.bounds);
    if let Some(fill) = &style.fill_color {
        let color = with_opacity(hex_to_rgba(fill), style.fill_opacity);
        canvas.for_each_pixel(|lon, lat| {
            mask.contains(&Point::new(lon, lat)).then_some(color)
        });
    }
    // The country outline is the mask's hole boundary.
    let stroke = hex_to_rgba(&style.color);
    for ring in mask.interiors() {
        stroke_line_string(&mut canvas, ring, stroke, style.weight, zoom);
    }
    canvas.save(&config.output.tile_dir, "mask")
}

fn render_regions_level(config: &AppConfig, regions: &[RegionShape], zoom: u8) -> Result<()> {
    let style = &config.layers.regions;
    let mut canvas = TileCanvas::new(zoom, &config.view.bounds);
    if let Some(fill) = &style.fill_color {
        let color = with_opacity(hex_to_rgba(fill), style.fill_opacity);
        canvas.for_each_pixel(|lon, lat| {
            let point = Point::new(lon, lat);
            regions
                .iter()
                .any(|region| region.geometry.contains(&point))
                .then_some(color)
        });
    }
    let stroke = hex_to_rgba(&style.color);
    for region in regions {
        for polygon in &region.geometry {
            stroke_line_string(&mut canvas, polygon.exterior(), stroke, style.weight, zoom);
            for interior in polygon.interiors() {
                stroke_line_string(&mut canvas, interior, stroke, style.weight, zoom);
            }
        }
    }
    canvas.save(&config.output.tile_dir, "regions")
}

fn render_lines_level(config: &AppConfig, lines: &[LineFeature], zoom: u8) -> Result<()> {
    let style = &config.layers.lines;
    let mut canvas = TileCanvas::new(zoom, &config.view.bounds);
    let stroke = hex_to_rgba(&style.color);
    for line in lines {
        stroke_line_string(&mut canvas, &line.geometry, stroke, style.weight, zoom);
    }
    canvas.save(&config.output.tile_dir, "lines")
}

fn render_chart_level(
    config: &AppConfig,
    records: &[RegionRecord],
    kind: ChartKind,
    zoom: u8,
) -> Result<()> {
    let features = project_regions(records, kind, |lon, lat| {
        lat_lon_to_global_pixel(lat, lon, zoom)
    })?;
    let mut canvas = TileCanvas::new(zoom, &config.view.bounds);
    for feature in &features {
        draw_chart_glyph(&mut canvas, feature);
    }
    canvas.save(&config.output.tile_dir, &format!("charts/{}", kind.name()))
}

/// Sparse tile grid for one layer at one zoom level, addressed in global
/// pixel coordinates. Only touched tiles materialize, so empty tiles are
/// never written to disk.
pub struct TileCanvas {
    zoom: u8,
    xs: RangeInclusive<u32>,
    ys: RangeInclusive<u32>,
    tiles: HashMap<(u32, u32), RgbaImage>,
}

impl TileCanvas {
    pub fn new(zoom: u8, bounds: &MapBounds) -> Self {
        let (xs, ys) = tiles_for_bounds(bounds, zoom);
        Self {
            zoom,
            xs,
            ys,
            tiles: HashMap::new(),
        }
    }

    /// Source-over blend at a global pixel. Out-of-range pixels are
    /// dropped silently so callers can stroke without clipping first.
    pub fn blend(&mut self, gx: i64, gy: i64, color: Rgba<u8>) {
        if gx < 0 || gy < 0 {
            return;
        }
        let tile_size = TILE_SIZE as i64;
        let (tx, ty) = ((gx / tile_size) as u32, (gy / tile_size) as u32);
        if !self.xs.contains(&tx) || !self.ys.contains(&ty) {
            return;
        }
        let tile = self
            .tiles
            .entry((tx, ty))
            .or_insert_with(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));
        let (px, py) = ((gx % tile_size) as u32, (gy % tile_size) as u32);
        blend_pixel(tile.get_pixel_mut(px, py), color);
    }

    /// Shades every pixel in range: `shade` gets the `(lon, lat)` of the
    /// pixel center and returns the color to blend, if any. Tiles where
    /// nothing was shaded stay unmaterialized.
    pub fn for_each_pixel<F>(&mut self, shade: F)
    where
        F: Fn(f64, f64) -> Option<Rgba<u8>>,
    {
        for tx in self.xs.clone() {
            for ty in self.ys.clone() {
                let existing = self.tiles.remove(&(tx, ty));
                let mut touched = existing.is_some();
                let mut tile =
                    existing.unwrap_or_else(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));
                for py in 0..TILE_SIZE {
                    for px in 0..TILE_SIZE {
                        let gx = (tx * TILE_SIZE + px) as f64 + 0.5;
                        let gy = (ty * TILE_SIZE + py) as f64 + 0.5;
                        let (lat, lon) = global_pixel_to_lat_lon(gx, gy, self.zoom);
                        if let Some(color) = shade(lon, lat) {
                            blend_pixel(tile.get_pixel_mut(px, py), color);
                            touched = true;
                        }
                    }
                }
                if touched {
                    self.tiles.insert((tx, ty), tile);
                }
            }
        }
    }

    pub fn tile(&self, x: u32, y: u32) -> Option<&RgbaImage> {
        self.tiles.get(&(x, y))
    }

    /// Saves tiles as `{tile_dir}/{layer}/{z}/{x}/{y}.png`.
    pub fn save(&self, tile_dir: &Path, layer: &str) -> Result<()> {
        let z_dir = tile_dir.join(layer).join(self.zoom.to_string());
        fs::create_dir_all(&z_dir)
            .with_context(|| format!("Failed to create zoom directory {:?}", z_dir))?;

        self.tiles.par_iter().for_each(|((x, y), tile)| {
            let x_dir = z_dir.join(x.to_string());
            if !x_dir.exists() {
                let _ = fs::create_dir_all(&x_dir);
            }
            let path = x_dir.join(format!("{}.png", y));

            if let Err(error) = tile.save(&path) {
                tracing::error!("Failed to save tile {:?}: {error}", path);
            }
        });

        Ok(())
    }
}

/// Tile index ranges covering `bounds` at `zoom`, clamped to the tile
/// grid. North is the smaller y index.
pub fn tiles_for_bounds(bounds: &MapBounds, zoom: u8) -> (RangeInclusive<u32>, RangeInclusive<u32>) {
    let max_tile = (1u32 << zoom) - 1;
    let (west, south, _, _) = lat_lon_to_tile_pixel(bounds.min_lat, bounds.min_lon, zoom);
    let (east, north, _, _) = lat_lon_to_tile_pixel(bounds.max_lat, bounds.max_lon, zoom);
    (
        west.min(max_tile)..=east.min(max_tile),
        north.min(max_tile)..=south.min(max_tile),
    )
}

// Coordinate conversions
pub fn lat_lon_to_global_pixel(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32) * TILE_SIZE as f64;
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;
    (x, y)
}

pub fn lat_lon_to_tile_pixel(lat: f64, lon: f64, zoom: u8) -> (u32, u32, u32, u32) {
    let (gx, gy) = lat_lon_to_global_pixel(lat, lon, zoom);
    let tile = TILE_SIZE as f64;

    let tx = (gx / tile) as u32;
    let ty = (gy / tile) as u32;

    let px = (gx - tx as f64 * tile) as u32;
    let py = (gy - ty as f64 * tile) as u32;

    (tx, ty, px, py)
}

fn global_pixel_to_lat_lon(gx: f64, gy: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32) * TILE_SIZE as f64;
    let lon = gx / n * 360.0 - 180.0;
    let lat = (PI * 2.0 * (0.5 - gy / n)).sinh().atan().to_degrees();
    (lat, lon)
}

/// Parses `#rgb`, `#rrggbb`, and `#rrggbbaa` hex colors; malformed
/// channels fall back to 0.
pub fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let expanded;
    let hex = if hex.len() == 3 {
        expanded = hex.chars().flat_map(|c| [c, c]).collect::<String>();
        expanded.as_str()
    } else {
        hex
    };
    let channel = |range: std::ops::Range<usize>| -> u8 {
        hex.get(range)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .unwrap_or(0)
    };
    let alpha = if hex.len() == 8 { channel(6..8) } else { 255 };
    Rgba([channel(0..2), channel(2..4), channel(4..6), alpha])
}

pub fn with_opacity(color: Rgba<u8>, opacity: f64) -> Rgba<u8> {
    let alpha = (color.0[3] as f64 * opacity.clamp(0.0, 1.0)).round() as u8;
    Rgba([color.0[0], color.0[1], color.0[2], alpha])
}

fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let src_a = src.0[3] as f64 / 255.0;
    if src_a <= 0.0 {
        return;
    }
    if src_a >= 1.0 {
        *dst = src;
        return;
    }
    let dst_a = dst.0[3] as f64 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    let channel = |s: u8, d: u8| -> u8 {
        let s = s as f64 / 255.0;
        let d = d as f64 / 255.0;
        (((s * src_a + d * dst_a * (1.0 - src_a)) / out_a) * 255.0).round() as u8
    };
    *dst = Rgba([
        channel(src.0[0], dst.0[0]),
        channel(src.0[1], dst.0[1]),
        channel(src.0[2], dst.0[2]),
        (out_a * 255.0).round() as u8,
    ]);
}

fn darken(color: Rgba<u8>, factor: f64) -> Rgba<u8> {
    let scale = |c: u8| (c as f64 * factor).round() as u8;
    Rgba([
        scale(color.0[0]),
        scale(color.0[1]),
        scale(color.0[2]),
        color.0[3],
    ])
}

fn stroke_line_string(
    canvas: &mut TileCanvas,
    line: &LineString<f64>,
    color: Rgba<u8>,
    width: f64,
    zoom: u8,
) {
    let points: Vec<(f64, f64)> = line
        .coords()
        .map(|coord| lat_lon_to_global_pixel(coord.y, coord.x, zoom))
        .collect();
    for pair in points.windows(2) {
        stroke_segment(canvas, pair[0], pair[1], color, width);
    }
}

fn stroke_segment(
    canvas: &mut TileCanvas,
    a: (f64, f64),
    b: (f64, f64),
    color: Rgba<u8>,
    width: f64,
) {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length = dx.hypot(dy);
    let steps = (length / 0.75).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        stamp(canvas, a.0 + dx * t, a.1 + dy * t, color, width);
    }
}

fn stamp(canvas: &mut TileCanvas, gx: f64, gy: f64, color: Rgba<u8>, width: f64) {
    let radius = (width / 2.0).max(0.5);
    let reach = radius.ceil() as i64;
    let (cx, cy) = (gx.floor() as i64, gy.floor() as i64);
    for oy in -reach..=reach {
        for ox in -reach..=reach {
            let (px, py) = (cx + ox, cy + oy);
            let center_dx = px as f64 + 0.5 - gx;
            let center_dy = py as f64 + 0.5 - gy;
            if center_dx.hypot(center_dy) <= radius {
                canvas.blend(px, py, color);
            }
        }
    }
}

fn draw_chart_glyph(canvas: &mut TileCanvas, feature: &ChartFeature) {
    let (cx, cy) = feature.position;
    let radius = feature.style.radius;
    let extent = radius + radius * PIE3D_DEPTH + feature.style.stroke_width + 1.0;
    let (min_gx, max_gx) = ((cx - extent).floor() as i64, (cx + extent).ceil() as i64);
    let (min_gy, max_gy) = ((cy - extent).floor() as i64, (cy + extent).ceil() as i64);
    for gy in min_gy..=max_gy {
        for gx in min_gx..=max_gx {
            let dx = gx as f64 + 0.5 - cx;
            let dy = gy as f64 + 0.5 - cy;
            if let Some(color) = glyph_pixel(feature, dx, dy) {
                canvas.blend(gx, gy, color);
            }
        }
    }
}

/// The glyph color at offset `(dx, dy)` from the feature's center, or
/// `None` where the glyph is transparent. Pure so each glyph family is
/// testable without a canvas.
fn glyph_pixel(feature: &ChartFeature, dx: f64, dy: f64) -> Option<Rgba<u8>> {
    let radius = feature.style.radius;
    match feature.kind {
        ChartKind::Pie => disc_pixel(feature, dx, dy, radius, 0.0),
        ChartKind::Donut => disc_pixel(feature, dx, dy, radius, radius * 0.5),
        ChartKind::Pie3d => pie3d_pixel(feature, dx, dy),
        ChartKind::Bar => bar_pixel(feature, dx, dy),
    }
}

/// Shared pie/donut shading: slices run clockwise from 12 o'clock, the
/// perimeter (and for a donut the inner rim) takes the stroke color. An
/// all-zero record has no slices and shades as stroke only.
fn disc_pixel(feature: &ChartFeature, dx: f64, dy: f64, outer: f64, inner: f64) -> Option<Rgba<u8>> {
    let width = feature.style.stroke_width;
    let dist = dx.hypot(dy);
    if dist > outer {
        return None;
    }
    if dist >= outer - width {
        return Some(hex_to_rgba(feature.style.stroke_color));
    }
    if inner > 0.0 {
        if dist < inner {
            return None;
        }
        if dist < inner + width {
            return Some(hex_to_rgba(feature.style.stroke_color));
        }
    }
    slice_color(feature, angle_fraction(dx, dy))
}

fn pie3d_pixel(feature: &ChartFeature, dx: f64, dy: f64) -> Option<Rgba<u8>> {
    let radius = feature.style.radius;
    let width = feature.style.stroke_width;
    let depth = radius * PIE3D_DEPTH;
    let top = dx.hypot(dy / PIE3D_SQUASH);
    if top <= radius {
        if top >= radius - width {
            return Some(hex_to_rgba(feature.style.stroke_color));
        }
        return slice_color(feature, angle_fraction(dx, dy / PIE3D_SQUASH));
    }
    // Skirt below the ellipse, shaded darker for the depth cue.
    if dy > 0.0 {
        let skirt = dx.hypot((dy - depth) / PIE3D_SQUASH);
        if skirt <= radius {
            return slice_color(feature, angle_fraction(dx, (dy - depth) / PIE3D_SQUASH))
                .map(|color| darken(color, PIE3D_SKIRT_SHADE));
        }
    }
    None
}

fn bar_pixel(feature: &ChartFeature, dx: f64, dy: f64) -> Option<Rgba<u8>> {
    let radius = feature.style.radius;
    let width = feature.style.stroke_width;
    let stroke = hex_to_rgba(feature.style.stroke_color);
    let bar_width = radius * 0.5;
    let baseline = radius * 0.5;
    let left = -1.5 * bar_width;
    let max = feature
        .values
        .iter()
        .copied()
        .fold(0.0_f64, f64::max);
    if max <= 0.0 {
        // Nothing to scale against: just the baseline stroke.
        let on_baseline = (dy - baseline).abs() <= width
            && dx >= left
            && dx <= left + 3.0 * bar_width;
        return on_baseline.then_some(stroke);
    }
    let slot = ((dx - left) / bar_width).floor();
    if !(0.0..3.0).contains(&slot) {
        return None;
    }
    let slot = slot as usize;
    let height = radius * (feature.values[slot].max(0.0) / max);
    let top = baseline - height;
    if dy > baseline || dy < top {
        return None;
    }
    let x_in_bar = (dx - left) - slot as f64 * bar_width;
    let on_border = x_in_bar <= width
        || bar_width - x_in_bar <= width
        || baseline - dy <= width
        || dy - top <= width;
    Some(if on_border {
        stroke
    } else {
        hex_to_rgba(feature.style.colors[slot])
    })
}

/// Fraction of a full turn measured clockwise from 12 o'clock, in [0, 1).
fn angle_fraction(dx: f64, dy: f64) -> f64 {
    let mut theta = dx.atan2(-dy);
    if theta < 0.0 {
        theta += 2.0 * PI;
    }
    theta / (2.0 * PI)
}

/// Color of the slice covering `fraction` of the turn, by cumulative
/// value share. Negative values count as zero; an all-zero total has no
/// slices at all.
fn slice_color(feature: &ChartFeature, fraction: f64) -> Option<Rgba<u8>> {
    let total: f64 = feature.values.iter().map(|value| value.max(0.0)).sum();
    if total <= 0.0 {
        return None;
    }
    let mut cumulative = 0.0;
    for (value, color) in feature.values.iter().zip(feature.style.colors) {
        cumulative += value.max(0.0) / total;
        if fraction < cumulative + 1e-9 {
            return Some(hex_to_rgba(color));
        }
    }
    Some(hex_to_rgba(feature.style.colors[2]))
}
