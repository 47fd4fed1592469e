//! Time-ordered replay of historical games.
//!
//! Each game moves `Pending → Decided → Settled`. A game is decided at
//! `start_time − decision_lead` using only inputs posted by then, and settled
//! from its final score. Settling requires every earlier-dated game in the
//! run to be settled first, and the trailing accuracy that feeds confidence
//! is built only from bets this run has already settled. A full run decides
//! every game on a date before settling any of them, so a day's results only
//! reach decisions on later days.

use std::collections::HashMap;
use std::fmt;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::db::models::{BacktestRun, BetOutcome, EdgeType, GameId, SourceId};
use crate::error::{FusionError, Result};
use crate::fusion::context::AccuracyTable;
use crate::fusion::edge::{compute_edges, EdgeInputs, Thresholds};
use crate::fusion::engine::{FusionEngine, GameAggregate};
use crate::fusion::normalizer::margin_to_spread;

use super::settlement::settle_bet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Pending,
    Decided,
    Settled,
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplayState::Pending => "pending",
            ReplayState::Decided => "decided",
            ReplayState::Settled => "settled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct BacktestParams {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Empty means every source
    pub sources: Vec<SourceId>,
    pub min_edge_threshold: f64,
}

struct ReplayGame {
    aggregate: GameAggregate,
    state: ReplayState,
    /// Indices into the simulator's outcome list
    bets: Vec<usize>,
}

pub struct BacktestSimulator<'a> {
    cfg: &'a EngineConfig,
    params: BacktestParams,
    games: Vec<ReplayGame>,
    positions: HashMap<GameId, usize>,
    outcomes: Vec<BetOutcome>,
    accuracy: AccuracyTable,
}

impl<'a> BacktestSimulator<'a> {
    /// Build the timeline from games in the date range that hold an
    /// undisputed final score, sorted by date, start time and id.
    pub fn new(timeline: Vec<GameAggregate>, params: BacktestParams, cfg: &'a EngineConfig) -> Self {
        let mut games: Vec<ReplayGame> = timeline
            .into_iter()
            .filter(|a| a.game.date >= params.start_date && a.game.date <= params.end_date)
            .filter(|a| a.game.final_score.is_some() && !a.game.conflicted)
            .map(|aggregate| ReplayGame {
                aggregate,
                state: ReplayState::Pending,
                bets: Vec::new(),
            })
            .collect();
        games.sort_by(|a, b| {
            let (ga, gb) = (&a.aggregate.game, &b.aggregate.game);
            ga.date
                .cmp(&gb.date)
                .then_with(|| ga.start_time.cmp(&gb.start_time))
                .then_with(|| ga.game_id.cmp(&gb.game_id))
        });
        let positions = games
            .iter()
            .enumerate()
            .map(|(i, g)| (g.aggregate.game.game_id.clone(), i))
            .collect();
        BacktestSimulator {
            cfg,
            params,
            games,
            positions,
            outcomes: Vec::new(),
            accuracy: AccuracyTable::new(cfg.trailing_window_games),
        }
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn state(&self, game_id: &str) -> Option<ReplayState> {
        self.positions.get(game_id).map(|&i| self.games[i].state)
    }

    pub fn outcomes(&self) -> &[BetOutcome] {
        &self.outcomes
    }

    pub fn accuracy(&self) -> &AccuracyTable {
        &self.accuracy
    }

    fn position(&self, game_id: &str) -> Result<usize> {
        self.positions
            .get(game_id)
            .copied()
            .ok_or_else(|| FusionError::UnknownGame(game_id.to_string()))
    }

    fn transition(&mut self, idx: usize, from: ReplayState, to: ReplayState) -> Result<()> {
        let game = &mut self.games[idx];
        if game.state != from {
            return Err(FusionError::InvalidTransition {
                game_id: game.aggregate.game.game_id.clone(),
                from: game.state.to_string(),
                to: to.to_string(),
            });
        }
        game.state = to;
        Ok(())
    }

    /// Pending → Decided: record a pending bet for every qualifying edge as
    /// of the decision time. Returns the number of bets placed.
    pub fn decide(&mut self, game_id: &str) -> Result<usize> {
        let idx = self.position(game_id)?;
        if self.games[idx].state != ReplayState::Pending {
            return self.transition(idx, ReplayState::Pending, ReplayState::Decided).map(|_| 0);
        }

        let agg = &self.games[idx].aggregate;
        let decision_time = agg.game.start_time - Duration::minutes(self.cfg.decision_lead_minutes);
        let inputs = EdgeInputs {
            game: &agg.game,
            predictions: &agg.predictions,
            market: &agg.market,
            accuracy: &self.accuracy,
        };
        let thresholds = Thresholds {
            min_edge: self.params.min_edge_threshold,
            min_moneyline_edge: self.cfg.min_moneyline_edge,
        };
        let report = compute_edges(&inputs, decision_time, &self.params.sources, thresholds, self.cfg);

        let mut placed = Vec::new();
        for edge in report.ranked {
            let line = match edge.edge_type {
                EdgeType::Spread => margin_to_spread(edge.market_value),
                EdgeType::Total => edge.market_value,
                EdgeType::Moneyline => 0.0,
            };
            placed.push(BetOutcome {
                game_id: edge.game_id,
                date: agg.game.date,
                source_id: edge.source_id,
                edge_type: edge.edge_type,
                side: edge.direction,
                edge_at_decision_time: edge.edge_value,
                line,
                price: edge.price,
                cover_probability: edge.cover_probability,
                prediction_as_of: edge.prediction_as_of,
                line_as_of: edge.line_as_of,
                actual_margin_or_total: None,
                won: None,
                push: false,
                units_won_lost: None,
            });
        }

        let count = placed.len();
        let first = self.outcomes.len();
        self.outcomes.extend(placed);
        self.games[idx].bets = (first..first + count).collect();
        self.transition(idx, ReplayState::Pending, ReplayState::Decided)?;
        debug!("Decided {}: {} bets", game_id, count);
        Ok(count)
    }

    /// Decided → Settled. Fails with `OutOfOrderReplay` while any game dated
    /// earlier in this run is unsettled.
    pub fn settle(&mut self, game_id: &str) -> Result<()> {
        let idx = self.position(game_id)?;
        let date = self.games[idx].aggregate.game.date;
        if let Some(blocking) = self.games[..idx]
            .iter()
            .find(|g| g.aggregate.game.date < date && g.state != ReplayState::Settled)
        {
            return Err(FusionError::OutOfOrderReplay {
                game_id: game_id.to_string(),
                date,
                blocking_game_id: blocking.aggregate.game.game_id.clone(),
                blocking_date: blocking.aggregate.game.date,
            });
        }
        self.transition(idx, ReplayState::Decided, ReplayState::Settled)?;

        let Some(score) = self.games[idx].aggregate.game.final_score else {
            return Err(FusionError::IncompleteRecord {
                source_id: "backtest".to_string(),
                game_id: Some(game_id.to_string()),
                field: "final_score".to_string(),
            });
        };
        let bets = self.games[idx].bets.clone();
        for i in bets {
            let bet = &mut self.outcomes[i];
            let s = settle_bet(bet.edge_type, bet.side, bet.line, bet.price, score);
            bet.actual_margin_or_total = Some(s.actual);
            bet.won = s.won;
            bet.push = s.push;
            bet.units_won_lost = Some(s.units);
            if let Some(won) = s.won {
                self.accuracy.push(&bet.source_id, won);
            }
        }
        Ok(())
    }

    /// Decide and settle every game in timeline order, one date at a time.
    pub fn run(&mut self) -> Result<()> {
        let mut start = 0;
        while start < self.games.len() {
            let date = self.games[start].aggregate.game.date;
            let end = self.games[start..]
                .iter()
                .position(|g| g.aggregate.game.date != date)
                .map_or(self.games.len(), |n| start + n);
            let ids: Vec<GameId> = self.games[start..end]
                .iter()
                .map(|g| g.aggregate.game.game_id.clone())
                .collect();
            for id in &ids {
                self.decide(id)?;
            }
            for id in &ids {
                self.settle(id)?;
            }
            start = end;
        }
        Ok(())
    }

    pub fn into_run(self) -> BacktestRun {
        BacktestRun {
            start_date: self.params.start_date,
            end_date: self.params.end_date,
            source_filter: self.params.sources,
            min_edge_threshold: self.params.min_edge_threshold,
            results: self.outcomes,
        }
    }
}

/// Replay the engine's games in `params`' date range.
pub fn run_backtest(engine: &FusionEngine, params: BacktestParams) -> Result<BacktestRun> {
    let timeline = engine.timeline(params.start_date, params.end_date);
    let mut sim = BacktestSimulator::new(timeline, params, engine.config());
    info!("Replaying {} settled games", sim.len());
    sim.run()?;
    let run = sim.into_run();
    info!(
        "Backtest {}..{}: {} bets",
        run.start_date,
        run.end_date,
        run.results.len()
    );
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FinalScore, Game, MarketLine, ModelPrediction, VenueType};
    use crate::fusion::edge::ENSEMBLE_SOURCE;
    use crate::fusion::market::MarketBook;
    use approx::assert_relative_eq;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap()
    }

    /// Game on January `day` with a model margin, a -5.5 market and a score.
    fn aggregate(day: u32, home: &str, margin: f64, score: (u32, u32)) -> GameAggregate {
        let game_id = format!("2025-01-{:02}:{}:zz-away", day, home);
        let mut market = MarketBook::default();
        for book in ["dk", "fd"] {
            market.add(MarketLine {
                game_id: game_id.clone(),
                book_id: book.into(),
                spread_home: Some(-5.5),
                total: None,
                moneyline_home: None,
                moneyline_away: None,
                as_of: at(day, 9),
            });
        }
        GameAggregate {
            game: Game {
                game_id: game_id.clone(),
                date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
                home_team_id: home.into(),
                away_team_id: "zz-away".into(),
                venue: VenueType::Home,
                venue_stated: true,
                start_time: at(day, 19),
                final_score: Some(FinalScore {
                    home: score.0,
                    away: score.1,
                }),
                conflicted: false,
            },
            predictions: vec![ModelPrediction {
                game_id,
                source_id: "kenpom".into(),
                predicted_margin: Some(margin),
                predicted_total: None,
                win_prob_home: None,
                rank_signal: None,
                missing_fields: Vec::new(),
                as_of: at(day, 8),
                home_court: 0.0,
                win_prob_stated: false,
            }],
            market,
        }
    }

    fn params() -> BacktestParams {
        BacktestParams {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            sources: Vec::new(),
            min_edge_threshold: 3.0,
        }
    }

    #[test]
    fn full_run_settles_every_bet() {
        let cfg = EngineConfig::default();
        let timeline = vec![
            aggregate(5, "b-home", 10.0, (77, 70)),
            aggregate(4, "a-home", 10.0, (75, 70)),
        ];
        let mut sim = BacktestSimulator::new(timeline, params(), &cfg);
        sim.run().unwrap();
        let run = sim.into_run();
        assert_eq!(run.results.len(), 2);
        assert!(run.results.iter().all(|b| b.is_settled()));
        // Jan 4: margin 5 vs -5.5 → loss; Jan 5: margin 7 → win.
        assert_eq!(run.results[0].date, NaiveDate::from_ymd_opt(2025, 1, 4).unwrap());
        assert_eq!(run.results[0].won, Some(false));
        assert_eq!(run.results[1].won, Some(true));
        assert_relative_eq!(run.results[1].units_won_lost.unwrap(), 0.909_090_9, epsilon = 1e-6);
        assert_relative_eq!(run.results[1].line, -5.5);
    }

    #[test]
    fn settling_ahead_of_earlier_games_fails() {
        let cfg = EngineConfig::default();
        let timeline = vec![
            aggregate(4, "a-home", 10.0, (75, 70)),
            aggregate(5, "b-home", 10.0, (77, 70)),
        ];
        let mut sim = BacktestSimulator::new(timeline, params(), &cfg);
        let later = "2025-01-05:b-home:zz-away";
        sim.decide(later).unwrap();
        match sim.settle(later) {
            Err(FusionError::OutOfOrderReplay { blocking_game_id, .. }) => {
                assert_eq!(blocking_game_id, "2025-01-04:a-home:zz-away");
            }
            other => panic!("expected out-of-order error, got {:?}", other),
        }
        assert_eq!(sim.state(later), Some(ReplayState::Decided));
    }

    #[test]
    fn settled_is_terminal() {
        let cfg = EngineConfig::default();
        let mut sim = BacktestSimulator::new(vec![aggregate(4, "a-home", 10.0, (75, 70))], params(), &cfg);
        let id = "2025-01-04:a-home:zz-away";
        assert!(matches!(sim.settle(id), Err(FusionError::InvalidTransition { .. })));
        sim.decide(id).unwrap();
        sim.settle(id).unwrap();
        assert!(matches!(sim.settle(id), Err(FusionError::InvalidTransition { .. })));
        assert!(matches!(sim.decide(id), Err(FusionError::InvalidTransition { .. })));
        assert_eq!(sim.state(id), Some(ReplayState::Settled));
    }

    #[test]
    fn accuracy_only_reflects_settled_bets() {
        let cfg = EngineConfig::default();
        let timeline = vec![
            aggregate(4, "a-home", 10.0, (80, 70)),
            aggregate(5, "b-home", 10.0, (80, 70)),
        ];
        let mut sim = BacktestSimulator::new(timeline, params(), &cfg);
        sim.decide("2025-01-04:a-home:zz-away").unwrap();
        sim.decide("2025-01-05:b-home:zz-away").unwrap();
        assert_eq!(sim.accuracy().record("kenpom"), (0, 0));
        sim.settle("2025-01-04:a-home:zz-away").unwrap();
        assert_eq!(sim.accuracy().record("kenpom"), (1, 1));
        // The second game's bet was decided before the first result was known.
        let second = &sim.outcomes()[1];
        let first = &sim.outcomes()[0];
        assert_relative_eq!(second.edge_at_decision_time, first.edge_at_decision_time);
    }

    #[test]
    fn same_day_results_do_not_feed_later_decisions() {
        let cfg = EngineConfig {
            ensemble_mode: true,
            ..EngineConfig::default()
        };
        let with_second_source = |mut agg: GameAggregate, margin: f64| {
            agg.predictions.push(ModelPrediction {
                source_id: "barttorvik".into(),
                predicted_margin: Some(margin),
                ..agg.predictions[0].clone()
            });
            agg
        };
        // In the early game kenpom covers and barttorvik does not.
        let early = with_second_source(aggregate(4, "a-home", 10.0, (80, 70)), -2.0);
        let mut late = with_second_source(aggregate(4, "b-home", 20.0, (80, 70)), 0.0);
        late.game.start_time = at(4, 21);

        let mut sim = BacktestSimulator::new(vec![late, early], params(), &cfg);
        sim.run().unwrap();
        let ensemble = sim
            .outcomes()
            .iter()
            .find(|b| b.game_id == "2025-01-04:b-home:zz-away" && b.source_id == ENSEMBLE_SOURCE)
            .expect("ensemble bet on the late game");
        // Untouched accuracy weighs both sources equally: mean of 20 and 0
        // against a 5.5-point market margin.
        assert_relative_eq!(ensemble.edge_at_decision_time, 4.5, epsilon = 1e-9);
        assert_eq!(sim.accuracy().record("kenpom"), (2, 2));
        assert_eq!(sim.accuracy().record("barttorvik"), (0, 2));
    }

    #[test]
    fn unscored_and_conflicted_games_are_left_out() {
        let cfg = EngineConfig::default();
        let mut unscored = aggregate(4, "a-home", 10.0, (0, 0));
        unscored.game.final_score = None;
        let mut disputed = aggregate(5, "b-home", 10.0, (77, 70));
        disputed.game.conflicted = true;
        let sim = BacktestSimulator::new(vec![unscored, disputed], params(), &cfg);
        assert!(sim.is_empty());
    }

    #[test]
    fn predictions_after_the_decision_point_are_ignored() {
        let cfg = EngineConfig::default();
        let mut agg = aggregate(4, "a-home", 10.0, (80, 70));
        // Posted 30 minutes before tip, inside the 60-minute decision lead.
        agg.predictions.push(ModelPrediction {
            as_of: at(4, 18) + Duration::minutes(30),
            predicted_margin: Some(-20.0),
            ..agg.predictions[0].clone()
        });
        let mut sim = BacktestSimulator::new(vec![agg], params(), &cfg);
        sim.run().unwrap();
        let bet = &sim.outcomes()[0];
        assert_eq!(bet.side, crate::db::models::Direction::FavorsHome);
        assert!(bet.prediction_as_of <= at(4, 18));
    }
}
