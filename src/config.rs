use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::hull::HullMethod;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub hull: HullConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_csv: PathBuf,
    /// Explicit column names; when unset, columns are auto-detected from the
    /// header row.
    pub longitude_column: Option<String>,
    pub latitude_column: Option<String>,
    pub group_column: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HullConfig {
    /// Attribute to group points by; defaults to the detected group column.
    pub group_field: Option<String>,
    pub concavity: f64,
    pub method: HullMethod,
    pub simplify_tolerance: Option<f64>,
}

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            group_field: None,
            concavity: 2.0,
            method: HullMethod::Concave,
            simplify_tolerance: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub geojson: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Optional frontend directory served at `/`.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: None,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
