use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::models::{BacktestRun, BetOutcome, EdgeType, SourceId};
use crate::fusion::calibration::logloss;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub units_won_lost: f64,
}

impl Tally {
    fn add(&mut self, bet: &BetOutcome) {
        let Some(units) = bet.units_won_lost else { return };
        self.bets += 1;
        self.units_won_lost += units;
        match bet.won {
            Some(true) => self.wins += 1,
            Some(false) => self.losses += 1,
            None => self.pushes += 1,
        }
    }

    /// Units per unit staked, in percent. Pushes return the stake and do not
    /// count as risked.
    pub fn roi_percent(&self) -> f64 {
        let staked = (self.wins + self.losses) as f64;
        if staked == 0.0 {
            0.0
        } else {
            self.units_won_lost / staked * 100.0
        }
    }

    pub fn win_percent(&self) -> f64 {
        let decided = (self.wins + self.losses) as f64;
        if decided == 0.0 {
            0.0
        } else {
            self.wins as f64 / decided * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyResult {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub tally: Tally,
    pub cumulative_units: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub source_id: SourceId,
    #[serde(flatten)]
    pub tally: Tally,
    pub roi_percent: f64,
    /// Every bet type
    pub win_percent: f64,
    /// Spread bets only
    pub ats_win_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub total_bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub units_won_lost: f64,
    pub roi_percent: f64,
    /// Every bet type
    pub win_percent: f64,
    /// Spread bets only
    pub ats_win_percent: f64,
    /// Mean log-loss of cover probabilities over decided (non-push) bets
    pub log_loss: Option<f64>,
    pub daily: Vec<DailyResult>,
    pub by_source: Vec<SourceResult>,
}

/// Aggregate metrics over the settled outcomes of a run. Unsettled bets are
/// ignored.
pub fn summarize(run: &BacktestRun) -> BacktestSummary {
    let settled: Vec<&BetOutcome> = run.results.iter().filter(|b| b.is_settled()).collect();

    let mut overall = Tally::default();
    let mut daily: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    let mut by_source: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut ats = Tally::default();
    let mut ats_by_source: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut loss_sum = 0.0;
    let mut loss_n = 0usize;

    for bet in &settled {
        overall.add(bet);
        daily.entry(bet.date).or_default().add(bet);
        by_source.entry(bet.source_id.as_str()).or_default().add(bet);
        if bet.edge_type == EdgeType::Spread {
            ats.add(bet);
            ats_by_source.entry(bet.source_id.as_str()).or_default().add(bet);
        }
        if let Some(won) = bet.won {
            loss_sum += logloss(bet.cover_probability, if won { 1.0 } else { 0.0 });
            loss_n += 1;
        }
    }

    let mut cumulative = 0.0;
    let daily = daily
        .into_iter()
        .map(|(date, tally)| {
            cumulative += tally.units_won_lost;
            DailyResult {
                date,
                tally,
                cumulative_units: cumulative,
            }
        })
        .collect();

    let by_source = by_source
        .into_iter()
        .map(|(source, tally)| SourceResult {
            source_id: source.to_string(),
            roi_percent: tally.roi_percent(),
            win_percent: tally.win_percent(),
            ats_win_percent: ats_by_source
                .get(source)
                .map_or(0.0, Tally::win_percent),
            tally,
        })
        .collect();

    BacktestSummary {
        total_bets: overall.bets,
        wins: overall.wins,
        losses: overall.losses,
        pushes: overall.pushes,
        units_won_lost: overall.units_won_lost,
        roi_percent: overall.roi_percent(),
        win_percent: overall.win_percent(),
        ats_win_percent: ats.win_percent(),
        log_loss: (loss_n > 0).then(|| loss_sum / loss_n as f64),
        daily,
        by_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Direction, EdgeType};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn bet(day: u32, source: &str, won: Option<bool>, units: Option<f64>) -> BetOutcome {
        let ts = Utc.with_ymd_and_hms(2025, 1, day, 8, 0, 0).unwrap();
        BetOutcome {
            game_id: format!("g{}", day),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            source_id: source.into(),
            edge_type: EdgeType::Spread,
            side: Direction::FavorsHome,
            edge_at_decision_time: 4.0,
            line: -5.5,
            price: -110,
            cover_probability: 0.6,
            prediction_as_of: ts,
            line_as_of: ts,
            actual_margin_or_total: units.map(|_| 7.0),
            won,
            push: units.is_some() && won.is_none(),
            units_won_lost: units,
        }
    }

    fn run(results: Vec<BetOutcome>) -> BacktestRun {
        BacktestRun {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            source_filter: Vec::new(),
            min_edge_threshold: 3.0,
            results,
        }
    }

    #[test]
    fn metrics_cover_only_settled_bets() {
        let win = 100.0 / 110.0;
        let summary = summarize(&run(vec![
            bet(4, "kenpom", Some(true), Some(win)),
            bet(4, "kenpom", Some(false), Some(-1.0)),
            bet(5, "dratings", None, Some(0.0)),
            bet(5, "dratings", Some(true), Some(win)),
            bet(6, "dratings", None, None),
        ]));
        assert_eq!(summary.total_bets, 4);
        assert_eq!((summary.wins, summary.losses, summary.pushes), (2, 1, 1));
        assert_relative_eq!(summary.units_won_lost, 2.0 * win - 1.0, epsilon = 1e-12);
        assert_relative_eq!(summary.roi_percent, (2.0 * win - 1.0) / 3.0 * 100.0, epsilon = 1e-9);
        assert_relative_eq!(summary.ats_win_percent, 200.0 / 3.0, epsilon = 1e-9);

        let expected_ll = (2.0 * -(0.6f64.ln()) + -(0.4f64.ln())) / 3.0;
        assert_relative_eq!(summary.log_loss.unwrap(), expected_ll, epsilon = 1e-9);
    }

    #[test]
    fn daily_and_source_breakdowns() {
        let win = 100.0 / 110.0;
        let summary = summarize(&run(vec![
            bet(4, "kenpom", Some(true), Some(win)),
            bet(5, "kenpom", Some(false), Some(-1.0)),
            bet(5, "dratings", Some(true), Some(win)),
        ]));
        assert_eq!(summary.daily.len(), 2);
        assert_relative_eq!(summary.daily[1].cumulative_units, 2.0 * win - 1.0, epsilon = 1e-12);
        let kenpom = summary.by_source.iter().find(|s| s.source_id == "kenpom").unwrap();
        assert_eq!(kenpom.tally.bets, 2);
        assert_relative_eq!(kenpom.ats_win_percent, 50.0);
    }

    #[test]
    fn ats_rate_counts_only_spread_bets() {
        let win = 100.0 / 110.0;
        let total_loss = BetOutcome {
            edge_type: EdgeType::Total,
            side: Direction::FavorsOver,
            ..bet(5, "kenpom", Some(false), Some(-1.0))
        };
        let summary = summarize(&run(vec![bet(4, "kenpom", Some(true), Some(win)), total_loss]));
        assert_relative_eq!(summary.win_percent, 50.0);
        assert_relative_eq!(summary.ats_win_percent, 100.0);
        let kenpom = &summary.by_source[0];
        assert_relative_eq!(kenpom.win_percent, 50.0);
        assert_relative_eq!(kenpom.ats_win_percent, 100.0);
    }

    #[test]
    fn empty_run_has_no_log_loss() {
        let summary = summarize(&run(Vec::new()));
        assert_eq!(summary.total_bets, 0);
        assert!(summary.log_loss.is_none());
        assert_relative_eq!(summary.roi_percent, 0.0);
    }
}
