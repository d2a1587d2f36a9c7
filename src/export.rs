use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Geometry, Value};
use serde_json::json;

use crate::types::HullPolygon;

/// Builds the interchange artifact: one `Polygon` feature per hull, carrying
/// the aggregated properties plus `id`, `groupId` and `groupField`.
pub fn feature_collection(polygons: &[HullPolygon]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: polygons.iter().map(to_feature).collect(),
        foreign_members: None,
    }
}

fn to_feature(polygon: &HullPolygon) -> Feature {
    let ring: Vec<Vec<f64>> = polygon.ring.iter().map(|c| vec![c[0], c[1]]).collect();
    let mut properties = polygon.properties.clone();
    properties.insert("id".to_string(), json!(polygon.id));
    properties.insert("groupId".to_string(), json!(polygon.group_id));
    properties.insert("groupField".to_string(), json!(polygon.group_field));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
        id: Some(Id::String(polygon.id.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

pub fn write_geojson(path: &Path, polygons: &[HullPolygon]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {parent:?}"))?;
    }
    let collection = feature_collection(polygons);
    let contents = serde_json::to_string_pretty(&collection)
        .context("failed to serialize GeoJSON feature collection")?;
    fs::write(path, contents).with_context(|| format!("failed to write GeoJSON: {path:?}"))
}
