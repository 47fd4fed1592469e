use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Slope of the default probability-to-margin curve: 50% → 0 points,
/// 85% → +10 points.
pub fn default_win_prob_slope() -> f64 {
    (0.85f64 / 0.15).ln() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Rank current edges for a single date
    Scan,
    /// Replay historical games and report realized accuracy
    Backtest,
}

/// Cross-source prediction fusion and edge detection
#[derive(Parser, Debug, Clone)]
#[command(name = "edge-fusion", version, about)]
pub struct Config {
    /// What to run
    #[arg(long, env = "MODE", value_enum, default_value = "scan")]
    pub mode: RunMode,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "edge_fusion.db")]
    pub database_path: String,

    /// JSON source batch files (one per provider), may be repeated
    #[arg(long = "input", env = "INPUT_FILES", value_delimiter = ',')]
    pub inputs: Vec<PathBuf>,

    /// Scan date (YYYY-MM-DD); defaults to today (UTC)
    #[arg(long, env = "SCAN_DATE")]
    pub date: Option<NaiveDate>,

    /// First date of the backtest window
    #[arg(long, env = "START_DATE")]
    pub start_date: Option<NaiveDate>,

    /// Last date of the backtest window; defaults to today (UTC)
    #[arg(long, env = "END_DATE")]
    pub end_date: Option<NaiveDate>,

    /// Restrict to these prediction sources (default: all)
    #[arg(long = "source", env = "SOURCES", value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Minimum spread/total edge in points to be ranked
    #[arg(long, env = "MIN_EDGE", default_value = "3.0")]
    pub min_edge: f64,

    /// Minimum moneyline edge in probability units (e.g. 0.05 = 5%)
    #[arg(long, env = "MIN_MONEYLINE_EDGE", default_value = "0.05")]
    pub min_moneyline_edge: f64,

    /// Home-court advantage in points for non-neutral games
    #[arg(long, env = "HOME_COURT", default_value = "3.0")]
    pub home_court: f64,

    /// Minimum token-sort similarity for fuzzy team-name matches
    #[arg(long, env = "FUZZY_MATCH_THRESHOLD", default_value = "0.85")]
    pub fuzzy_match_threshold: f64,

    /// Also report a confidence-weighted ensemble edge per game
    #[arg(long, env = "ENSEMBLE_MODE", default_value = "false")]
    pub ensemble_mode: bool,

    /// Settled bets considered when weighting a source's accuracy
    #[arg(long, env = "TRAILING_WINDOW_GAMES", default_value = "100")]
    pub trailing_window_games: usize,

    /// Logistic slope of the probability-to-margin curve (per point)
    #[arg(long, env = "WIN_PROB_SLOPE")]
    pub win_prob_slope: Option<f64>,

    /// Points per rating unit for rating-differential sources
    #[arg(long, env = "POINTS_PER_RATING_UNIT", default_value = "1.0")]
    pub points_per_rating_unit: f64,

    /// Minutes before tip-off at which backtest bets are decided
    #[arg(long, env = "DECISION_LEAD_MINUTES", default_value = "60")]
    pub decision_lead_minutes: i64,

    /// Assumed tip-off hour (UTC) when a record carries no start time
    #[arg(long, env = "DEFAULT_TIPOFF_HOUR_UTC", default_value = "16")]
    pub default_tipoff_hour_utc: u32,

    /// American price assumed for spread and total bets
    #[arg(long, env = "STANDARD_JUICE", default_value = "-110", allow_hyphen_values = true)]
    pub standard_juice: i32,

    /// Fractional Kelly multiplier for stake suggestions (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.25")]
    pub kelly_fraction: f64,

    /// Cap on a single suggested stake as fraction of bankroll
    #[arg(long, env = "MAX_STAKE_FRACTION", default_value = "0.05")]
    pub max_stake_fraction: f64,

    /// Half-life in hours of the prediction recency term
    #[arg(long, env = "RECENCY_HALF_LIFE_HOURS", default_value = "24.0")]
    pub recency_half_life_hours: f64,

    /// Per-source fetch timeout in seconds
    #[arg(long, env = "SOURCE_TIMEOUT_SECS", default_value = "10")]
    pub source_timeout_secs: u64,

    /// Retries per source after a failed or timed-out fetch
    #[arg(long, env = "SOURCE_RETRIES", default_value = "2")]
    pub source_retries: u32,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == RunMode::Backtest && self.start_date.is_none() {
            anyhow::bail!("--start-date is required in backtest mode");
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                anyhow::bail!("end_date {} is before start_date {}", end, start);
            }
        }
        if self.min_edge < 0.0 {
            anyhow::bail!("min_edge must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.min_moneyline_edge) {
            anyhow::bail!("min_moneyline_edge must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.fuzzy_match_threshold) {
            anyhow::bail!("fuzzy_match_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_stake_fraction) {
            anyhow::bail!("max_stake_fraction must be between 0.0 and 1.0");
        }
        if self.trailing_window_games == 0 {
            anyhow::bail!("trailing_window_games must be at least 1");
        }
        if let Some(slope) = self.win_prob_slope {
            if slope <= 0.0 {
                anyhow::bail!("win_prob_slope must be positive");
            }
        }
        if self.default_tipoff_hour_utc > 23 {
            anyhow::bail!("default_tipoff_hour_utc must be between 0 and 23");
        }
        if self.standard_juice > -100 && self.standard_juice < 100 {
            anyhow::bail!("standard_juice must be an American price (<= -100 or >= 100)");
        }
        if self.recency_half_life_hours <= 0.0 {
            anyhow::bail!("recency_half_life_hours must be positive");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            min_edge_threshold: self.min_edge,
            min_moneyline_edge: self.min_moneyline_edge,
            home_court_constant: self.home_court,
            fuzzy_match_threshold: self.fuzzy_match_threshold,
            ensemble_mode: self.ensemble_mode,
            trailing_window_games: self.trailing_window_games,
            win_prob_slope: self.win_prob_slope.unwrap_or_else(default_win_prob_slope),
            points_per_rating_unit: self.points_per_rating_unit,
            decision_lead_minutes: self.decision_lead_minutes,
            default_tipoff_hour_utc: self.default_tipoff_hour_utc,
            standard_juice: self.standard_juice,
            kelly_fraction: self.kelly_fraction,
            max_stake_fraction: self.max_stake_fraction,
            recency_half_life_hours: self.recency_half_life_hours,
            ..EngineConfig::default()
        }
    }
}

/// Tunables consumed by the fusion engine and the backtest simulator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_edge_threshold: f64,
    pub min_moneyline_edge: f64,
    pub home_court_constant: f64,
    pub fuzzy_match_threshold: f64,
    /// Fuzzy scores within this distance of the best score count as ties.
    pub fuzzy_tie_epsilon: f64,
    pub ensemble_mode: bool,
    pub trailing_window_games: usize,
    pub win_prob_slope: f64,
    pub points_per_rating_unit: f64,
    pub decision_lead_minutes: i64,
    pub default_tipoff_hour_utc: u32,
    pub standard_juice: i32,
    pub kelly_fraction: f64,
    pub max_stake_fraction: f64,
    pub recency_half_life_hours: f64,
    /// Confidence weights: trailing accuracy, source agreement, recency.
    pub accuracy_weight: f64,
    pub agreement_weight: f64,
    pub recency_weight: f64,
    /// Pseudo-observations pulling a thin accuracy record toward 50%.
    pub accuracy_prior_games: f64,
    /// Agreeing sources needed for a full agreement score.
    pub agreement_saturation: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_edge_threshold: 3.0,
            min_moneyline_edge: 0.05,
            home_court_constant: 3.0,
            fuzzy_match_threshold: 0.85,
            fuzzy_tie_epsilon: 0.01,
            ensemble_mode: false,
            trailing_window_games: 100,
            win_prob_slope: default_win_prob_slope(),
            points_per_rating_unit: 1.0,
            decision_lead_minutes: 60,
            default_tipoff_hour_utc: 16,
            standard_juice: -110,
            kelly_fraction: 0.25,
            max_stake_fraction: 0.05,
            recency_half_life_hours: 24.0,
            accuracy_weight: 0.5,
            agreement_weight: 0.3,
            recency_weight: 0.2,
            accuracy_prior_games: 10.0,
            agreement_saturation: 3.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["edge-fusion"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = parse(&[]);
        assert!(cfg.validate().is_ok());
        let engine = cfg.engine_config();
        assert_relative_eq!(engine.min_edge_threshold, 3.0);
        assert_relative_eq!(engine.home_court_constant, 3.0);
        assert_relative_eq!(engine.fuzzy_match_threshold, 0.85);
        assert!(!engine.ensemble_mode);
        assert_eq!(engine.trailing_window_games, 100);
        assert_eq!(engine.standard_juice, -110);
    }

    #[test]
    fn default_slope_maps_85_percent_to_ten_points() {
        let k = default_win_prob_slope();
        let p = 1.0 / (1.0 + (-k * 10.0).exp());
        assert_relative_eq!(p, 0.85, epsilon = 1e-9);
    }

    #[test]
    fn backtest_requires_start_date() {
        let cfg = parse(&["--mode", "backtest"]);
        assert!(cfg.validate().is_err());
        let cfg = parse(&["--mode", "backtest", "--start-date", "2025-01-01"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_date_range() {
        let cfg = parse(&[
            "--mode",
            "backtest",
            "--start-date",
            "2025-03-01",
            "--end-date",
            "2025-02-01",
        ]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let cfg = parse(&["--fuzzy-match-threshold", "1.5"]);
        assert!(cfg.validate().is_err());
        let cfg = parse(&["--standard-juice", "-50"]);
        assert!(cfg.validate().is_err());
    }
}
