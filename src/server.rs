use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use geo::{Contains, Coord, LineString, Point, Polygon};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::ServerConfig;
use crate::export;
use crate::types::HullPolygon;

// Wrapper for RTree indexing of polygon bounding boxes.
struct PolygonIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    polygons: Vec<HullPolygon>,
    shapes: Vec<Polygon<f64>>,
    tree: RTree<PolygonIndex>,
    collection: serde_json::Value,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lon: f64,
    lat: f64,
}

#[derive(Serialize)]
pub struct QueryResponse {
    id: String,
    group_id: String,
    group_field: String,
    properties: serde_json::Map<String, serde_json::Value>,
}

pub async fn start_server(config: &ServerConfig, polygons: Vec<HullPolygon>) -> Result<()> {
    let shapes: Vec<Polygon<f64>> = polygons
        .iter()
        .map(|p| {
            let coords: Vec<Coord<f64>> =
                p.ring.iter().map(|c| Coord { x: c[0], y: c[1] }).collect();
            Polygon::new(LineString::from(coords), vec![])
        })
        .collect();

    let tree_items: Vec<PolygonIndex> = polygons
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let mut min = [f64::INFINITY, f64::INFINITY];
            let mut max = [f64::NEG_INFINITY, f64::NEG_INFINITY];
            for c in &p.ring {
                min[0] = min[0].min(c[0]);
                min[1] = min[1].min(c[1]);
                max[0] = max[0].max(c[0]);
                max[1] = max[1].max(c[1]);
            }
            PolygonIndex {
                index,
                aabb: AABB::from_corners(min, max),
            }
        })
        .collect();
    let tree = RTree::bulk_load(tree_items);

    let collection = serde_json::to_value(export::feature_collection(&polygons))
        .context("failed to serialize polygon collection")?;

    let state = Arc::new(AppState {
        polygons,
        shapes,
        tree,
        collection,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!(%addr, "starting server");

    let mut app = Router::new()
        .route("/api/polygons", get(polygons_handler))
        .route("/api/query", get(query_handler));
    if let Some(static_dir) = &config.static_dir {
        app = app.nest_service("/", ServeDir::new(static_dir));
    }
    let app = app.layer(CorsLayer::permissive()).with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn polygons_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.collection.clone())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    let point = Point::new(params.lon, params.lat);
    let envelope = AABB::from_point([params.lon, params.lat]);

    for candidate in state.tree.locate_in_envelope_intersecting(&envelope) {
        let (Some(polygon), Some(shape)) = (
            state.polygons.get(candidate.index),
            state.shapes.get(candidate.index),
        ) else {
            continue;
        };
        if shape.contains(&point) {
            return Json(Some(QueryResponse {
                id: polygon.id.clone(),
                group_id: polygon.group_id.clone(),
                group_field: polygon.group_field.clone(),
                properties: polygon.properties.clone(),
            }));
        }
    }

    Json(None)
}
