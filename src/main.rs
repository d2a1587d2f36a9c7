use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hullmap::config::AppConfig;
use hullmap::detect::ColumnOverrides;
use hullmap::hull::{self, HullParams};
use hullmap::ingest;
use hullmap::types::{DetectedColumns, GeoPoint, HullEvent, HullPolygon, IngestEvent, RowError};
use hullmap::worker;
use hullmap::{export, server};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the CSV, generate hull polygons and write the GeoJSON artifact
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run the pipeline, then serve the polygons and query API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            let app_config = AppConfig::load_from_file(config)?;
            let polygons = run_pipeline(&app_config).await?;
            export::write_geojson(&app_config.output.geojson, &polygons)?;
            info!(
                polygons = polygons.len(),
                output = ?app_config.output.geojson,
                "generation complete"
            );
        }
        Commands::Serve { config } => {
            let app_config = AppConfig::load_from_file(config)?;
            let polygons = run_pipeline(&app_config).await?;
            server::start_server(&app_config.server, polygons).await?;
        }
    }

    Ok(())
}

async fn run_pipeline(config: &AppConfig) -> Result<Vec<HullPolygon>> {
    let (points, errors, columns) = ingest_csv(config).await?;
    info!(
        points = points.len(),
        errors = errors.len(),
        "ingestion complete"
    );
    for error in errors.iter().take(5) {
        warn!(%error, "skipped row");
    }
    if errors.len() > 5 {
        warn!(skipped = errors.len(), "total rows skipped");
    }

    let group_field = config
        .hull
        .group_field
        .clone()
        .or(columns.group)
        .unwrap_or_else(|| "default".to_string());
    generate_hulls(config, group_field, points).await
}

async fn ingest_csv(
    config: &AppConfig,
) -> Result<(Vec<GeoPoint>, Vec<RowError>, DetectedColumns)> {
    let (runner, mut events) = worker::channel::<IngestEvent>();
    let path = config.input.data_csv.clone();
    let overrides = ColumnOverrides {
        longitude: config.input.longitude_column.clone(),
        latitude: config.input.latitude_column.clone(),
        group: config.input.group_column.clone(),
    };
    runner.start(move |sink| ingest::run_ingest(&path, &overrides, sink));

    let mut points = Vec::new();
    loop {
        match events.recv().await {
            Some(IngestEvent::Progress { rows_processed }) => {
                info!(rows_processed, "parsing CSV");
            }
            Some(IngestEvent::Chunk {
                points: batch,
                rows_processed,
            }) => {
                info!(rows_processed, batch = batch.len(), "received point chunk");
                points.extend(batch);
            }
            Some(IngestEvent::Complete {
                points: rest,
                errors,
                columns,
            }) => {
                points.extend(rest);
                return Ok((points, errors, columns));
            }
            Some(IngestEvent::Error { message }) => bail!("ingestion failed: {message}"),
            None => bail!("ingestion channel closed unexpectedly"),
        }
    }
}

async fn generate_hulls(
    config: &AppConfig,
    group_field: String,
    points: Vec<GeoPoint>,
) -> Result<Vec<HullPolygon>> {
    let (runner, mut events) = worker::channel::<HullEvent>();
    let params = HullParams {
        group_field,
        concavity: config.hull.concavity,
        method: config.hull.method,
        simplify_tolerance: config.hull.simplify_tolerance,
    };
    runner.start(move |sink| hull::run_generate(&points, &params, sink));

    loop {
        match events.recv().await {
            Some(HullEvent::Progress {
                groups_processed,
                total_groups,
                current_group,
            }) => {
                info!(
                    groups_processed,
                    total_groups,
                    current_group = %current_group,
                    "generating hulls"
                );
            }
            Some(HullEvent::Complete { polygons }) => return Ok(polygons),
            Some(HullEvent::Error { message }) => bail!("hull generation failed: {message}"),
            None => bail!("hull generation channel closed unexpectedly"),
        }
    }
}
