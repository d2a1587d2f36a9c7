use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::worker::RunEvent;

/// One valid geo-referenced CSV row. Coordinates are always finite and in
/// range by the time a point exists.
#[derive(Debug, Clone, Serialize)]
pub struct GeoPoint {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
    /// All non-coordinate CSV columns, preserved verbatim.
    pub attributes: HashMap<String, String>,
}

/// A row that failed coordinate parsing or range validation. Accumulated per
/// run; never aborts ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    /// 1-based data row number (header row not counted).
    pub row: usize,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

/// The column mapping resolved once per file, before any row is parsed.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedColumns {
    pub longitude: String,
    pub latitude: String,
    pub group: Option<String>,
}

/// A closed-ring concave-hull polygon for one group of points.
#[derive(Debug, Clone, Serialize)]
pub struct HullPolygon {
    pub id: String,
    pub group_id: String,
    pub group_field: String,
    /// [lon, lat] pairs; first == last, length >= 4.
    pub ring: Vec<[f64; 2]>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Events produced by one ingestion run, in order; `Complete`/`Error` is
/// always last and carries the whole-run outcome.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Progress {
        rows_processed: usize,
    },
    Chunk {
        points: Vec<GeoPoint>,
        rows_processed: usize,
    },
    Complete {
        /// The final partial batch not yet flushed as a chunk.
        points: Vec<GeoPoint>,
        errors: Vec<RowError>,
        columns: DetectedColumns,
    },
    Error {
        message: String,
    },
}

impl RunEvent for IngestEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, IngestEvent::Complete { .. } | IngestEvent::Error { .. })
    }

    fn is_failure(&self) -> bool {
        matches!(self, IngestEvent::Error { .. })
    }
}

/// Events produced by one hull-generation run.
#[derive(Debug, Clone)]
pub enum HullEvent {
    Progress {
        groups_processed: usize,
        total_groups: usize,
        current_group: String,
    },
    Complete {
        polygons: Vec<HullPolygon>,
    },
    Error {
        message: String,
    },
}

impl RunEvent for HullEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, HullEvent::Complete { .. } | HullEvent::Error { .. })
    }

    fn is_failure(&self) -> bool {
        matches!(self, HullEvent::Error { .. })
    }
}
