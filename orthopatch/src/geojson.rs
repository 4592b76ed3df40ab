//! GeoJSON model and validation for patch requests.
//!
//! A patch request is a `FeatureCollection` of polygons, each carrying the
//! recoloring triple for the graph layer and the id of the source image
//! whose pixels replace the ortho layer. The same model is reused for the
//! persisted patch logs, where applied features additionally carry their
//! `patchId` and the list of tiles they modified.

use crate::pyramid::TileCoord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A GeoJSON feature collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<Crs>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// An empty collection, as persisted for a cache with no patches.
    pub fn empty() -> Self {
        FeatureCollection {
            kind: "FeatureCollection".to_string(),
            crs: None,
            features: Vec::new(),
        }
    }
}

/// A named coordinate reference system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: CrsProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrsProperties {
    pub name: String,
}

impl Crs {
    pub fn named(name: impl Into<String>) -> Self {
        Crs {
            kind: "name".to_string(),
            properties: CrsProperties { name: name.into() },
        }
    }
}

/// One polygon edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: Properties,
}

/// Polygon geometry; only the exterior ring is rasterized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl Geometry {
    /// The exterior ring, empty when the geometry carries no ring at all.
    pub fn exterior(&self) -> &[[f64; 2]] {
        self.coordinates.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Feature properties.
///
/// `patch_id` and `tiles` are absent on incoming requests and filled in by
/// the history once the patch has been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Properties {
    /// RGB triple painted onto the graph layer
    pub color: [u8; 3],
    /// Basename of the source image whose pixels patch the ortho layer
    #[serde(rename = "sourceImageId")]
    pub source_image: String,
    /// Id of the applied patch this feature belongs to
    #[serde(rename = "patchId", skip_serializing_if = "Option::is_none")]
    pub patch_id: Option<u32>,
    /// Tiles modified by that patch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<TileCoord>>,
}

/// Validation failures, rejected before any geometry or raster work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request body is not a FeatureCollection")]
    NotAFeatureCollection,

    #[error("missing or unsupported coordinate reference system")]
    UnsupportedCrs,

    #[error("feature {index}: geometry is not a polygon")]
    NotAPolygon { index: usize },

    #[error("feature {index}: polygon ring must be closed with at least four points")]
    OpenRing { index: usize },

    #[error("feature {index}: invalid source image id {name:?}")]
    InvalidSourceImageId { index: usize, name: String },
}

/// Validate a patch request.
///
/// Checks the collection type, the presence of a named CRS, and for every
/// feature: a polygon geometry whose exterior ring is closed with at least
/// four points, and a source image id restricted to `[A-Za-z0-9_-]`.
pub fn validate(collection: &FeatureCollection) -> Result<(), ValidationError> {
    if collection.kind != "FeatureCollection" {
        return Err(ValidationError::NotAFeatureCollection);
    }
    match &collection.crs {
        Some(crs) if crs.kind == "name" && !crs.properties.name.is_empty() => {}
        _ => return Err(ValidationError::UnsupportedCrs),
    }
    for (index, feature) in collection.features.iter().enumerate() {
        if feature.geometry.kind != "Polygon" {
            return Err(ValidationError::NotAPolygon { index });
        }
        let ring = feature.geometry.exterior();
        if ring.len() < 4 || ring.first() != ring.last() {
            return Err(ValidationError::OpenRing { index });
        }
        let name = &feature.properties.source_image;
        let name_ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !name_ok {
            return Err(ValidationError::InvalidSourceImageId {
                index,
                name: name.clone(),
            });
        }
    }
    Ok(())
}
