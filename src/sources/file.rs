use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use super::provider::{PredictionSource, SourceBatch};

/// Reads a previously exported batch from a JSON file, for offline runs and
/// backtests.
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file")
            .to_string();
        JsonFileSource { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PredictionSource for JsonFileSource {
    async fn fetch(&self, date: Option<NaiveDate>) -> Result<SourceBatch> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let mut batch: SourceBatch = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        if let Some(day) = date {
            // Keep the neighbouring days too; the matcher tolerates one day
            // of timezone skew.
            let near = |d: Option<NaiveDate>| d.map_or(true, |d| (d - day).num_days().abs() <= 1);
            batch.predictions.retain(|p| near(p.date));
            batch.lines.retain(|l| near(l.date));
            batch.results.retain(|r| near(r.date));
        }
        debug!("[{}] loaded {} records", self.name, batch.len());
        Ok(batch)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
