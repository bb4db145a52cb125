//! Coverage snapshot loading
//!
//! A snapshot lists per-cell target/actual counts plus QA health metrics.
//! Sources are tried in order, one attempt each: the configured HTTP
//! endpoint, then the cached snapshot file candidates. When every source
//! fails the allocator runs without coverage weighting.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cells::{build_cell_key, is_blank};

/// Coverage snapshot errors
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("coverage snapshot not found")]
    NotFound,

    #[error("coverage snapshot at {path} is not valid JSON: {reason}")]
    Invalid { path: String, reason: String },

    #[error("coverage endpoint failed: {0}")]
    Endpoint(String),
}

/// Where the snapshot in use came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    Endpoint(String),
    File(PathBuf),
}

/// One coverage cell record
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageCell {
    pub cell_key: String,
    /// `None` when the record carried no numeric target
    pub target: Option<f64>,
    pub count: f64,
    pub deficit: Option<f64>,
    pub median_f1: Option<f64>,
    /// Share in [0, 1]
    pub cues_in_bounds_pct: Option<f64>,
}

impl CoverageCell {
    /// Completion ratio clamped to [0, 1]; `None` without a positive target
    pub fn completion_ratio(&self) -> Option<f64> {
        let target = self.target.filter(|t| *t > 0.0)?;
        Some((self.count / target).clamp(0.0, 1.0))
    }

    fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let cell_key = match object.get("cell_key").and_then(Value::as_str).map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.to_lowercase(),
            _ => build_cell_key(
                object.get("dialect_family"),
                object
                    .get("subregion")
                    .filter(|v| !is_blank(v))
                    .or_else(|| object.get("dialect_subregion")),
                object.get("apparent_gender"),
                object.get("apparent_age_band"),
            ),
        };

        let qa = object.get("qa_metrics").and_then(Value::as_object);
        let metric = |key: &str| {
            qa.and_then(|m| m.get(key))
                .or_else(|| object.get(key))
                .and_then(as_number)
        };

        Some(Self {
            cell_key,
            target: object.get("target").and_then(as_number),
            count: object
                .get("count")
                .and_then(as_number)
                .filter(|c| *c >= 0.0)
                .unwrap_or(0.0),
            deficit: object.get("deficit").and_then(as_number),
            median_f1: metric("median_f1"),
            cues_in_bounds_pct: metric("cues_in_bounds_pct").map(as_share),
        })
    }
}

/// Numbers or numeric strings
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Percentages above 1 are rescaled to a share
fn as_share(value: f64) -> f64 {
    if value > 1.0 {
        (value / 100.0).clamp(0.0, 1.0)
    } else {
        value.max(0.0)
    }
}

/// Parsed coverage snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSnapshot {
    pub cells: Vec<CoverageCell>,
}

impl CoverageSnapshot {
    /// Lenient parse; records that are not objects are skipped
    pub fn from_json(value: &Value) -> Self {
        let cells = value
            .get("cells")
            .and_then(Value::as_array)
            .map(|cells| cells.iter().filter_map(CoverageCell::from_json).collect())
            .unwrap_or_default();
        Self { cells }
    }

    /// Index by cell key; the first record for a key wins
    pub fn index(&self) -> HashMap<String, CoverageCell> {
        let mut index = HashMap::with_capacity(self.cells.len());
        for cell in &self.cells {
            index
                .entry(cell.cell_key.clone())
                .or_insert_with(|| cell.clone());
        }
        index
    }
}

/// Loads coverage snapshots from the endpoint or cached files
#[derive(Debug, Clone)]
pub struct CoverageLoader {
    http: reqwest::Client,
    endpoint: Option<String>,
    snapshot_paths: Vec<PathBuf>,
    timeout: Duration,
}

impl CoverageLoader {
    pub fn new(
        http: reqwest::Client,
        endpoint: Option<String>,
        snapshot_paths: Vec<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint,
            snapshot_paths,
            timeout,
        }
    }

    /// Single GET against the coverage endpoint
    pub async fn fetch_endpoint(&self) -> Result<Option<Value>, CoverageError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(None);
        };

        let response = self
            .http
            .get(endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoverageError::Endpoint(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoverageError::Endpoint(format!("HTTP {}", response.status())));
        }

        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|e| CoverageError::Endpoint(e.to_string()))
    }

    /// First readable snapshot file among the candidates
    pub async fn load_file(&self) -> Result<(Value, PathBuf), CoverageError> {
        for path in &self.snapshot_paths {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    debug!("Coverage snapshot candidate {} unreadable: {}", path.display(), e);
                    continue;
                }
            };
            return serde_json::from_str::<Value>(&content)
                .map(|value| (value, path.clone()))
                .map_err(|e| CoverageError::Invalid {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
        }
        Err(CoverageError::NotFound)
    }

    /// Endpoint, then file; `None` when both fail
    pub async fn load(&self) -> Option<(CoverageSnapshot, SnapshotSource)> {
        match self.fetch_endpoint().await {
            Ok(Some(value)) => {
                let endpoint = self.endpoint.clone().unwrap_or_default();
                info!(endpoint = %endpoint, "Coverage snapshot loaded from endpoint");
                return Some((CoverageSnapshot::from_json(&value), SnapshotSource::Endpoint(endpoint)));
            }
            Ok(None) => {}
            Err(e) => warn!("Coverage endpoint fetch failed: {}", e),
        }

        match self.load_file().await {
            Ok((value, path)) => {
                info!(path = %path.display(), "Coverage snapshot loaded from file");
                Some((CoverageSnapshot::from_json(&value), SnapshotSource::File(path)))
            }
            Err(CoverageError::NotFound) => {
                debug!("No coverage snapshot available, running unweighted");
                None
            }
            Err(e) => {
                warn!("{}, running unweighted", e);
                None
            }
        }
    }
}
