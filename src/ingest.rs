use std::fs::File;
use std::io::BufReader;
use std::mem;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::StringRecord;
use tracing::{debug, warn};

use crate::coords::normalize_coordinate;
use crate::detect::{detect_columns, ColumnOverrides};
use crate::types::{DetectedColumns, GeoPoint, IngestEvent, RowError};
use crate::worker::EventSink;

/// Points buffered before a chunk is flushed to the caller.
pub const CHUNK_SIZE: usize = 25_000;
/// A progress event is emitted every this many rows, chunk or not.
pub const PROGRESS_INTERVAL: usize = 10_000;

/// Entry point for one ingestion run. All failures, row-level or fatal, are
/// reported through the sink; the terminal event is always `Complete` or
/// `Error`.
pub fn run_ingest(path: &Path, overrides: &ColumnOverrides, sink: &EventSink<IngestEvent>) {
    if let Err(err) = ingest_file(path, overrides, sink) {
        sink.emit(IngestEvent::Error {
            message: format!("{err:#}"),
        });
    }
}

/// Per-run accumulator state. Allocated fresh for every run so successive or
/// superseded runs can never share buffers.
struct IngestRun {
    buffer: Vec<GeoPoint>,
    errors: Vec<RowError>,
    rows_processed: usize,
    valid_rows: usize,
    swapped_rows: usize,
}

fn ingest_file(path: &Path, overrides: &ColumnOverrides, sink: &EventSink<IngestEvent>) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open CSV file: {path:?}"))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()
        .context("failed to read CSV header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let columns = detect_columns(&headers, overrides)
        .resolve()
        .map_err(|msg| anyhow::anyhow!("{msg} (headers: {})", headers.join(", ")))?;
    let lon_idx = column_index(&headers, &columns.longitude)?;
    let lat_idx = column_index(&headers, &columns.latitude)?;
    debug!(
        longitude = %columns.longitude,
        latitude = %columns.latitude,
        group = columns.group.as_deref().unwrap_or("<none>"),
        "resolved CSV columns"
    );

    let mut run = IngestRun {
        buffer: Vec::new(),
        errors: Vec::new(),
        rows_processed: 0,
        valid_rows: 0,
        swapped_rows: 0,
    };

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        match record {
            Ok(record) => run.push_row(index, &record, &headers, lon_idx, lat_idx),
            Err(err) => run.errors.push(RowError {
                row,
                message: format!("malformed row: {err}"),
            }),
        }
        run.rows_processed = row;

        if row % PROGRESS_INTERVAL == 0 {
            sink.emit(IngestEvent::Progress {
                rows_processed: row,
            });
        }
        if run.buffer.len() >= CHUNK_SIZE {
            sink.emit(IngestEvent::Chunk {
                points: mem::take(&mut run.buffer),
                rows_processed: row,
            });
        }
        if sink.is_stale() {
            // Superseded: nothing downstream will see this run's output.
            return Ok(());
        }
    }

    if run.valid_rows == 0 {
        let samples: Vec<String> = run.errors.iter().take(3).map(RowError::to_string).collect();
        if samples.is_empty() {
            bail!("CSV file contains no data rows");
        }
        bail!(
            "no valid rows in {} data rows; first failures: {}",
            run.rows_processed,
            samples.join("; ")
        );
    }

    if run.swapped_rows > 0 {
        warn!(
            rows = run.swapped_rows,
            "accepted rows with swapped longitude/latitude"
        );
    }

    sink.emit(IngestEvent::Complete {
        points: run.buffer,
        errors: run.errors,
        columns,
    });
    Ok(())
}

impl IngestRun {
    fn push_row(
        &mut self,
        index: usize,
        record: &StringRecord,
        headers: &[String],
        lon_idx: usize,
        lat_idx: usize,
    ) {
        let row = index + 1;
        let raw_lon = record.get(lon_idx).unwrap_or("");
        let raw_lat = record.get(lat_idx).unwrap_or("");

        let (Some(lon), Some(lat)) = (normalize_coordinate(raw_lon), normalize_coordinate(raw_lat))
        else {
            self.errors.push(RowError {
                row,
                message: format!("invalid coordinates (lon={raw_lon:?}, lat={raw_lat:?})"),
            });
            return;
        };

        let (lon, lat) = if in_range(lon, lat) {
            (lon, lat)
        } else if in_range(lat, lon) {
            // Columns were likely mislabelled for this row; the swapped
            // reading is valid, so take it.
            warn!(row, lon, lat, "coordinates out of range, accepting swapped interpretation");
            self.swapped_rows += 1;
            (lat, lon)
        } else {
            self.errors.push(RowError {
                row,
                message: format!("coordinates out of range (lon={lon}, lat={lat})"),
            });
            return;
        };

        let attributes = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != lon_idx && *i != lat_idx)
            .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();

        self.buffer.push(GeoPoint {
            id: format!("point-{index}"),
            lon,
            lat,
            attributes,
        });
        self.valid_rows += 1;
    }
}

fn in_range(lon: f64, lat: f64) -> bool {
    (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)
}

fn column_index(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("column '{name}' not found in CSV header"))
}
