use std::collections::{HashMap, HashSet};

use geo::{ConcaveHull, LineString, MultiPoint, Point, Polygon, Simplify};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::types::{GeoPoint, HullEvent, HullPolygon};
use crate::worker::EventSink;

/// A progress event is emitted every this many processed groups.
pub const PROGRESS_GROUPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HullMethod {
    #[default]
    Concave,
    Simplified,
}

impl HullMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HullMethod::Concave => "concave",
            HullMethod::Simplified => "simplified",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HullParams {
    /// Attribute used to partition points; missing or empty values fall back
    /// to the "default" group.
    pub group_field: String,
    /// Tightness of the concave hull; higher values give smoother, looser
    /// boundaries approaching the convex hull.
    pub concavity: f64,
    pub method: HullMethod,
    /// Douglas-Peucker tolerance, only applied by the simplified method.
    pub simplify_tolerance: Option<f64>,
}

/// Entry point for one hull-generation run. Group-level degeneracies are
/// skipped with a warning; only setup problems terminate the run with an
/// `Error` event.
pub fn run_generate(points: &[GeoPoint], params: &HullParams, sink: &EventSink<HullEvent>) {
    if let Err(message) = validate_params(params) {
        sink.emit(HullEvent::Error { message });
        return;
    }

    let groups = partition(points, &params.group_field);
    let total_groups = groups.len();
    let mut polygons = Vec::new();

    for (processed, (key, members)) in groups.iter().enumerate() {
        if members.len() < 3 {
            warn!(group = %key, points = members.len(), "skipping group with fewer than 3 points");
        } else if let Some(ring) = build_ring(members, params) {
            polygons.push(HullPolygon {
                id: format!("polygon-{key}"),
                group_id: key.clone(),
                group_field: params.group_field.clone(),
                ring,
                properties: aggregate_properties(members, params),
            });
        }

        let processed = processed + 1;
        if processed % PROGRESS_GROUPS == 0 {
            sink.emit(HullEvent::Progress {
                groups_processed: processed,
                total_groups,
                current_group: key.clone(),
            });
        }
        if sink.is_stale() {
            return;
        }
    }

    sink.emit(HullEvent::Complete { polygons });
}

fn validate_params(params: &HullParams) -> Result<(), String> {
    if !params.concavity.is_finite() || params.concavity <= 0.0 {
        return Err(format!(
            "concavity must be a positive finite number, got {}",
            params.concavity
        ));
    }
    if let Some(tolerance) = params.simplify_tolerance {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(format!(
                "simplify tolerance must be a non-negative finite number, got {tolerance}"
            ));
        }
    }
    Ok(())
}

/// Partitions points by the group field, preserving first-seen group order.
fn partition<'a>(points: &'a [GeoPoint], field: &str) -> Vec<(String, Vec<&'a GeoPoint>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&GeoPoint>)> = Vec::new();
    for point in points {
        let key = point
            .attributes
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or("default");
        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            groups.push((key.to_string(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(point);
    }
    groups
}

/// Computes the closed hull ring for one group, or `None` when the hull
/// degenerates.
fn build_ring(members: &[&GeoPoint], params: &HullParams) -> Option<Vec<[f64; 2]>> {
    let cloud = MultiPoint::new(members.iter().map(|p| Point::new(p.lon, p.lat)).collect());
    let hull: Polygon<f64> = cloud.concave_hull(params.concavity);

    let mut exterior: LineString<f64> = hull.exterior().clone();
    if params.method == HullMethod::Simplified {
        if let Some(tolerance) = params.simplify_tolerance.filter(|t| *t > 0.0) {
            exterior = exterior.simplify(&tolerance);
        }
    }

    let mut ring: Vec<[f64; 2]> = exterior.coords().map(|c| [c.x, c.y]).collect();
    if ring.iter().any(|c| !c[0].is_finite() || !c[1].is_finite()) {
        warn!("discarding hull with non-finite coordinates");
        return None;
    }
    close_ring(&mut ring);
    // 3 distinct vertices plus the closing point.
    if ring.len() < 4 {
        warn!(vertices = ring.len(), "discarding degenerate hull");
        return None;
    }
    Some(ring)
}

/// Appends a copy of the first vertex whenever the ring is not closed, e.g.
/// after simplification.
fn close_ring(ring: &mut Vec<[f64; 2]>) {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
}

/// Summarizes the group's attributes: a shared value is stored as-is; a
/// heterogeneous one keeps the first-seen value next to a
/// `<key>_unique_count` with the number of distinct values.
fn aggregate_properties(
    members: &[&GeoPoint],
    params: &HullParams,
) -> serde_json::Map<String, serde_json::Value> {
    let mut properties = serde_json::Map::new();
    properties.insert("pointCount".to_string(), json!(members.len()));
    properties.insert("method".to_string(), json!(params.method.as_str()));

    let Some(first) = members.first() else {
        return properties;
    };
    for (key, first_value) in &first.attributes {
        let distinct: HashSet<&str> = members
            .iter()
            .map(|m| m.attributes.get(key).map(String::as_str).unwrap_or(""))
            .collect();
        properties.insert(key.clone(), json!(first_value));
        if distinct.len() > 1 {
            properties.insert(format!("{key}_unique_count"), json!(distinct.len()));
        }
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HullEvent;
    use crate::worker;
    use geo::{Area, Coord, Intersects};
    use std::collections::HashMap;

    fn point(id: usize, lon: f64, lat: f64, attrs: &[(&str, &str)]) -> GeoPoint {
        GeoPoint {
            id: format!("point-{id}"),
            lon,
            lat,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn params(group_field: &str) -> HullParams {
        HullParams {
            group_field: group_field.to_string(),
            concavity: 2.0,
            method: HullMethod::Concave,
            simplify_tolerance: None,
        }
    }

    async fn generate(points: Vec<GeoPoint>, params: HullParams) -> HullEvent {
        let (runner, mut stream) = worker::channel::<HullEvent>();
        runner.start(move |sink| run_generate(&points, &params, sink));
        loop {
            match stream.recv().await {
                Some(event @ (HullEvent::Complete { .. } | HullEvent::Error { .. })) => {
                    return event;
                }
                Some(HullEvent::Progress { .. }) => continue,
                None => panic!("stream closed without terminal event"),
            }
        }
    }

    fn square_with_center(group: &str) -> Vec<GeoPoint> {
        vec![
            point(0, 0.0, 0.0, &[("g", group)]),
            point(1, 1.0, 0.0, &[("g", group)]),
            point(2, 1.0, 1.0, &[("g", group)]),
            point(3, 0.0, 1.0, &[("g", group)]),
            point(4, 0.5, 0.5, &[("g", group)]),
        ]
    }

    fn as_polygon(p: &HullPolygon) -> geo::Polygon<f64> {
        let coords: Vec<Coord<f64>> = p.ring.iter().map(|c| Coord { x: c[0], y: c[1] }).collect();
        geo::Polygon::new(LineString::from(coords), vec![])
    }

    #[tokio::test]
    async fn hull_ring_is_closed_and_covers_source_points() {
        let points = square_with_center("a");
        let HullEvent::Complete { polygons } = generate(points.clone(), params("g")).await else {
            panic!("expected Complete");
        };
        assert_eq!(polygons.len(), 1);
        let polygon = &polygons[0];
        assert_eq!(polygon.id, "polygon-a");
        assert_eq!(polygon.group_id, "a");
        assert!(polygon.ring.len() >= 4);
        assert_eq!(polygon.ring.first(), polygon.ring.last());

        let shape = as_polygon(polygon);
        assert!(shape.unsigned_area() > 0.0);
        for p in &points {
            assert!(
                shape.intersects(&Point::new(p.lon, p.lat)),
                "{} not covered by hull",
                p.id
            );
        }
    }

    #[tokio::test]
    async fn small_groups_are_skipped_silently() {
        let mut points = square_with_center("a");
        points.push(point(10, 10.0, 10.0, &[("g", "b")]));
        points.push(point(11, 10.0, 11.0, &[("g", "b")]));

        let HullEvent::Complete { polygons } = generate(points, params("g")).await else {
            panic!("expected Complete");
        };
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].group_id, "a");
    }

    #[tokio::test]
    async fn end_to_end_single_group_scenario() {
        let points = vec![
            point(0, 0.0, 0.0, &[("g", "A")]),
            point(1, 0.0, 1.0, &[("g", "A")]),
            point(2, 1.0, 0.0, &[("g", "A")]),
            point(3, 10.0, 10.0, &[("g", "B")]),
        ];
        let HullEvent::Complete { polygons } = generate(points, params("g")).await else {
            panic!("expected Complete");
        };
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].group_id, "A");
        assert_eq!(polygons[0].properties.get("pointCount"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn missing_group_field_uses_default_group() {
        let points = square_with_center("a")
            .into_iter()
            .map(|mut p| {
                p.attributes = HashMap::new();
                p
            })
            .collect::<Vec<_>>();
        let HullEvent::Complete { polygons } = generate(points, params("nope")).await else {
            panic!("expected Complete");
        };
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].group_id, "default");
        assert_eq!(polygons[0].id, "polygon-default");
    }

    #[tokio::test]
    async fn shared_and_heterogeneous_attributes_aggregate() {
        let mut points = square_with_center("a");
        for (i, p) in points.iter_mut().enumerate() {
            p.attributes.insert("city".to_string(), "dublin".to_string());
            p.attributes.insert("kind".to_string(), format!("k{}", i % 2));
        }
        let HullEvent::Complete { polygons } = generate(points, params("g")).await else {
            panic!("expected Complete");
        };
        let props = &polygons[0].properties;
        assert_eq!(props.get("city"), Some(&json!("dublin")));
        assert!(!props.contains_key("city_unique_count"));
        assert_eq!(props.get("kind"), Some(&json!("k0")));
        assert_eq!(props.get("kind_unique_count"), Some(&json!(2)));
        assert_eq!(props.get("method"), Some(&json!("concave")));
    }

    #[tokio::test]
    async fn generation_is_idempotent_on_vertex_sets() {
        let points = square_with_center("a");
        let HullEvent::Complete { polygons: first } =
            generate(points.clone(), params("g")).await
        else {
            panic!("expected Complete");
        };
        let HullEvent::Complete { polygons: second } = generate(points, params("g")).await else {
            panic!("expected Complete");
        };

        let vertex_set = |p: &HullPolygon| {
            let mut vs: Vec<String> = p.ring.iter().map(|c| format!("{:?}", c)).collect();
            vs.sort();
            vs
        };
        assert_eq!(vertex_set(&first[0]), vertex_set(&second[0]));
    }

    #[tokio::test]
    async fn simplified_method_keeps_ring_closed() {
        // Collinear midpoints on the square's edges should be removed.
        let mut points = square_with_center("a");
        points.push(point(20, 0.5, 0.0, &[("g", "a")]));
        points.push(point(21, 1.0, 0.5, &[("g", "a")]));

        let p = HullParams {
            group_field: "g".to_string(),
            concavity: 5.0,
            method: HullMethod::Simplified,
            simplify_tolerance: Some(0.01),
        };
        let HullEvent::Complete { polygons } = generate(points, p).await else {
            panic!("expected Complete");
        };
        assert_eq!(polygons.len(), 1);
        let ring = &polygons[0].ring;
        assert!(ring.len() >= 4);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(polygons[0].properties.get("method"), Some(&json!("simplified")));
    }

    #[tokio::test]
    async fn invalid_concavity_is_a_setup_error() {
        let points = square_with_center("a");
        let mut bad = params("g");
        bad.concavity = f64::NAN;
        let HullEvent::Error { message } = generate(points, bad).await else {
            panic!("expected Error");
        };
        assert!(message.contains("concavity"));
    }

    #[tokio::test]
    async fn group_order_follows_first_occurrence() {
        let points = vec![
            point(0, 0.0, 0.0, &[("g", "b")]),
            point(1, 1.0, 0.0, &[("g", "b")]),
            point(2, 0.0, 1.0, &[("g", "b")]),
            point(3, 5.0, 5.0, &[("g", "a")]),
            point(4, 6.0, 5.0, &[("g", "a")]),
            point(5, 5.0, 6.0, &[("g", "a")]),
        ];
        let HullEvent::Complete { polygons } = generate(points, params("g")).await else {
            panic!("expected Complete");
        };
        let order: Vec<&str> = polygons.iter().map(|p| p.group_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
