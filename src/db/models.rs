use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TeamId = String;
pub type GameId = String;
pub type SourceId = String;
pub type BookId = String;

// ── Inbound records (delivered by source adapters) ─────────────────────────────

/// A prediction as scraped from one provider, in its native field layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawPrediction {
    pub source_id: SourceId,
    pub raw_home_team: String,
    pub raw_away_team: String,
    pub date: Option<NaiveDate>,
    /// Native numeric fields, e.g. "spread", "home_adj_oe", "win_prob_home"
    #[serde(default)]
    pub fields: HashMap<String, f64>,
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub neutral_site: Option<bool>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub home_conference: Option<String>,
    #[serde(default)]
    pub away_conference: Option<String>,
}

/// A posted line from one sportsbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawMarketLine {
    pub book_id: BookId,
    pub raw_home_team: String,
    pub raw_away_team: String,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub spread_home: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub moneyline_home: Option<i32>,
    #[serde(default)]
    pub moneyline_away: Option<i32>,
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub neutral_site: Option<bool>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

/// A final score reported after the game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawResult {
    #[serde(default = "default_result_source")]
    pub source_id: SourceId,
    pub raw_home_team: String,
    pub raw_away_team: String,
    pub date: Option<NaiveDate>,
    pub final_home_score: u32,
    pub final_away_score: u32,
    #[serde(default)]
    pub neutral_site: Option<bool>,
}

fn default_result_source() -> SourceId {
    "results".to_string()
}

// ── Fused view ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VenueType {
    /// The canonical home team plays on its own court
    Home,
    Neutral,
}

impl VenueType {
    pub fn from_hint(neutral_site: Option<bool>) -> Self {
        if neutral_site.unwrap_or(false) {
            VenueType::Neutral
        } else {
            VenueType::Home
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueType::Home => "home",
            VenueType::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "neutral" {
            VenueType::Neutral
        } else {
            VenueType::Home
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinalScore {
    pub home: u32,
    pub away: u32,
}

impl FinalScore {
    /// Home points minus away points.
    pub fn margin(&self) -> f64 {
        self.home as f64 - self.away as f64
    }

    pub fn total(&self) -> f64 {
        (self.home + self.away) as f64
    }
}

/// A real-world game that one or more source records describe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub venue: VenueType,
    /// False while the venue is assumed from records without a neutral-site flag
    #[serde(default)]
    pub venue_stated: bool,
    pub start_time: DateTime<Utc>,
    pub final_score: Option<FinalScore>,
    /// Set when two different final scores were reported.
    #[serde(default)]
    pub conflicted: bool,
}

/// A prediction expressed in common units, home-team perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrediction {
    pub game_id: GameId,
    pub source_id: SourceId,
    /// Home points minus away points
    pub predicted_margin: Option<f64>,
    pub predicted_total: Option<f64>,
    pub win_prob_home: Option<f64>,
    /// Away rank minus home rank (positive: home ranked better)
    pub rank_signal: Option<f64>,
    /// Native fields that were required but absent
    pub missing_fields: Vec<String>,
    pub as_of: DateTime<Utc>,
    /// Home-court points included in `predicted_margin`
    #[serde(default)]
    pub home_court: f64,
    /// `win_prob_home` was stated by the source rather than read off the curve
    #[serde(default)]
    pub win_prob_stated: bool,
}

impl ModelPrediction {
    pub fn is_incomplete(&self) -> bool {
        !self.missing_fields.is_empty()
    }
}

/// A sportsbook line re-expressed from the game's home perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketLine {
    pub game_id: GameId,
    pub book_id: BookId,
    /// Book convention: negative means the home team is favored
    pub spread_home: Option<f64>,
    pub total: Option<f64>,
    pub moneyline_home: Option<i32>,
    pub moneyline_away: Option<i32>,
    pub as_of: DateTime<Utc>,
}

// ── Derived signals ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    Spread,
    Total,
    Moneyline,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Spread => "spread",
            EdgeType::Total => "total",
            EdgeType::Moneyline => "moneyline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spread" => Some(EdgeType::Spread),
            "total" => Some(EdgeType::Total),
            "moneyline" => Some(EdgeType::Moneyline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    FavorsHome,
    FavorsAway,
    FavorsOver,
    FavorsUnder,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::FavorsHome => "favorsHome",
            Direction::FavorsAway => "favorsAway",
            Direction::FavorsOver => "favorsOver",
            Direction::FavorsUnder => "favorsUnder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "favorsHome" => Some(Direction::FavorsHome),
            "favorsAway" => Some(Direction::FavorsAway),
            "favorsOver" => Some(Direction::FavorsOver),
            "favorsUnder" => Some(Direction::FavorsUnder),
            _ => None,
        }
    }
}

/// A model-versus-market discrepancy. Recomputed on demand, never stored as
/// ground truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub game_id: GameId,
    pub source_id: SourceId,
    pub edge_type: EdgeType,
    /// Points for spread/total, probability units for moneyline
    pub edge_value: f64,
    pub direction: Direction,
    pub confidence: f64,
    /// Model value in market units (implied margin, total, or win probability)
    pub model_value: f64,
    pub market_value: f64,
    pub prediction_as_of: DateTime<Utc>,
    pub line_as_of: DateTime<Utc>,
    pub books: usize,
    pub low_confidence_market: bool,
    /// Estimated probability that a bet in `direction` wins
    pub cover_probability: f64,
    /// American price the stake is sized at
    pub price: i32,
    /// Fractional-Kelly stake as a fraction of bankroll
    pub suggested_stake: f64,
    /// True for the confidence-weighted ensemble row
    pub ensemble: bool,
}

/// A hypothetical bet placed by the backtest simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BetOutcome {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub source_id: SourceId,
    pub edge_type: EdgeType,
    pub side: Direction,
    pub edge_at_decision_time: f64,
    /// Spread or total line at decision time (0 for moneyline)
    pub line: f64,
    /// American price the bet was settled at
    pub price: i32,
    pub cover_probability: f64,
    pub prediction_as_of: DateTime<Utc>,
    pub line_as_of: DateTime<Utc>,
    /// Final margin (spread, moneyline) or total points; None until settled
    pub actual_margin_or_total: Option<f64>,
    pub won: Option<bool>,
    pub push: bool,
    /// None while the game is only decided
    pub units_won_lost: Option<f64>,
}

impl BetOutcome {
    pub fn is_settled(&self) -> bool {
        self.units_won_lost.is_some()
    }
}

/// Parameters and results of one backtest replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub source_filter: Vec<SourceId>,
    pub min_edge_threshold: f64,
    pub results: Vec<BetOutcome>,
}
