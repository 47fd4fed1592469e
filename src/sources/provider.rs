use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::models::{RawMarketLine, RawPrediction, RawResult};

/// Structured records one adapter delivers for a cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBatch {
    #[serde(default)]
    pub predictions: Vec<RawPrediction>,
    #[serde(default)]
    pub lines: Vec<RawMarketLine>,
    #[serde(default)]
    pub results: Vec<RawResult>,
}

impl SourceBatch {
    pub fn len(&self) -> usize {
        self.predictions.len() + self.lines.len() + self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend(&mut self, other: SourceBatch) {
        self.predictions.extend(other.predictions);
        self.lines.extend(other.lines);
        self.results.extend(other.results);
    }
}

/// Trait that every prediction, odds or results adapter must implement.
#[async_trait]
pub trait PredictionSource: Send + Sync {
    /// Records for `date`, or everything the source holds when `None`.
    async fn fetch(&self, date: Option<NaiveDate>) -> Result<SourceBatch>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
