use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the fusion engine.
///
/// Per-record errors (`UnknownTeam`, `AmbiguousAlias`, `IncompleteRecord`,
/// `UnresolvedGameMatch`, `ConflictingVenue`) are attached to the record that caused them and never
/// abort a batch. `ConflictingResult` and `OutOfOrderReplay` are fatal to the
/// game or backtest run they affect. Source failures only degrade the cycle.
#[derive(Error, Debug)]
pub enum FusionError {
    // Identity resolution
    #[error("Unknown team '{raw_name}' from source '{source_id}' (best similarity {best_score:.2})")]
    UnknownTeam {
        raw_name: String,
        source_id: String,
        best_score: f64,
    },

    #[error("Ambiguous team '{raw_name}' from source '{source_id}': candidates {candidates:?}")]
    AmbiguousAlias {
        raw_name: String,
        source_id: String,
        candidates: Vec<String>,
    },

    // Record validation
    #[error("Incomplete record from '{source_id}' (game {game_id:?}): missing '{field}'")]
    IncompleteRecord {
        source_id: String,
        game_id: Option<String>,
        field: String,
    },

    #[error("No schema registered for prediction source '{0}'")]
    UnknownSource(String),

    #[error("Record from '{source_id}' matches several games {candidates:?}; held as unresolved")]
    UnresolvedGameMatch {
        source_id: String,
        candidates: Vec<String>,
    },

    // Results
    #[error(
        "Conflicting final score for game {game_id}: have {existing_home}-{existing_away}, got {reported_home}-{reported_away}"
    )]
    ConflictingResult {
        game_id: String,
        existing_home: u32,
        existing_away: u32,
        reported_home: u32,
        reported_away: u32,
    },

    #[error("Record from '{source_id}' places game {game_id} at {reported}, already known as {recorded}")]
    ConflictingVenue {
        game_id: String,
        source_id: String,
        recorded: String,
        reported: String,
    },

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    // Backtesting
    #[error(
        "Out-of-order replay: cannot settle {game_id} ({date}) before {blocking_game_id} ({blocking_date}) is settled"
    )]
    OutOfOrderReplay {
        game_id: String,
        date: NaiveDate,
        blocking_game_id: String,
        blocking_date: NaiveDate,
    },

    #[error("Invalid state transition for {game_id}: from {from} to {to}")]
    InvalidTransition {
        game_id: String,
        from: String,
        to: String,
    },

    // Sources
    #[error("Source '{source_id}' timed out after {timeout:?}")]
    SourceTimeout { source_id: String, timeout: Duration },

    #[error("Source '{source_id}' failed: {reason}")]
    SourceFailed { source_id: String, reason: String },

    // Infrastructure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FusionError {
    /// Whether the error must be surfaced to the caller instead of being
    /// attached to a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FusionError::ConflictingResult { .. }
                | FusionError::OutOfOrderReplay { .. }
                | FusionError::InvalidTransition { .. }
                | FusionError::Database(_)
                | FusionError::Io(_)
        )
    }

    /// Source-level failures degrade a collection cycle but never halt it.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            FusionError::SourceTimeout { .. } | FusionError::SourceFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
