//! Thematic map-of-Poland toolkit: builds a white world mask around the
//! country outline, projects per-region statistics into chart glyphs,
//! rasterizes every layer to web-mercator XYZ tiles, and serves the
//! result with a small JSON API.

pub mod config;
pub mod data;
pub mod error;
pub mod masking;
pub mod processing;
pub mod render;
pub mod server;
pub mod types;
