//! Model-versus-market edge computation for a single game.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::db::models::{Direction, EdgeRecord, EdgeType, Game, GameId, ModelPrediction, SourceId};

use super::calibration::WinProbCurve;
use super::context::AccuracyTable;
use super::market::{ConsensusLine, MarketBook};
use super::matcher::{hours_between, last_instant_before};
use super::normalizer::spread_to_margin;
use super::odds::{kelly_stake, probability_to_american};

pub const ENSEMBLE_SOURCE: &str = "ensemble";

/// Everything the calculator reads for one game.
pub struct EdgeInputs<'a> {
    pub game: &'a Game,
    /// Full prediction history for the game, any order
    pub predictions: &'a [ModelPrediction],
    pub market: &'a MarketBook,
    pub accuracy: &'a AccuracyTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeReport {
    pub game_id: GameId,
    /// Latest instant any contributing input may carry
    pub cutoff: DateTime<Utc>,
    pub consensus: Option<ConsensusLine>,
    pub ranked: Vec<EdgeRecord>,
    /// Edges that did not clear their threshold; still queryable
    pub below_threshold: Vec<EdgeRecord>,
    pub ranking_agreement: Option<f64>,
}

/// Thresholds for one edge query.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Points, for spread and total edges
    pub min_edge: f64,
    /// Probability units, for moneyline edges
    pub min_moneyline_edge: f64,
}

impl Thresholds {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Thresholds {
            min_edge: cfg.min_edge_threshold,
            min_moneyline_edge: cfg.min_moneyline_edge,
        }
    }

    fn passes(&self, edge: &EdgeRecord) -> bool {
        match edge.edge_type {
            EdgeType::Spread | EdgeType::Total => edge.edge_value.abs() >= self.min_edge,
            EdgeType::Moneyline => edge.edge_value.abs() >= self.min_moneyline_edge,
        }
    }
}

/// Edges for one game as of `as_of`, never using data posted at or after
/// tip-off. An empty `sources` slice means every source.
pub fn compute_edges(
    inputs: &EdgeInputs<'_>,
    as_of: DateTime<Utc>,
    sources: &[SourceId],
    thresholds: Thresholds,
    cfg: &EngineConfig,
) -> EdgeReport {
    let game = inputs.game;
    let cutoff = as_of.min(last_instant_before(game.start_time));
    let mut report = EdgeReport {
        game_id: game.game_id.clone(),
        cutoff,
        consensus: None,
        ranked: Vec::new(),
        below_threshold: Vec::new(),
        ranking_agreement: None,
    };
    if game.conflicted {
        return report;
    }

    let latest = latest_per_source(inputs.predictions, cutoff, sources);

    let Some(consensus) = inputs.market.consensus(&game.game_id, cutoff) else {
        return report;
    };
    report.ranking_agreement = ranking_agreement(&latest, &consensus);

    let curve = WinProbCurve::new(cfg.win_prob_slope);
    let best = inputs.market.best_lines(cutoff);

    let mut edges: Vec<EdgeRecord> = Vec::new();
    for pred in latest.values() {
        let base = |edge_type: EdgeType, edge_value: f64, direction, model_value, market_value| EdgeRecord {
            game_id: game.game_id.clone(),
            source_id: pred.source_id.clone(),
            edge_type,
            edge_value,
            direction,
            confidence: 0.0,
            model_value,
            market_value,
            prediction_as_of: pred.as_of,
            line_as_of: consensus.latest_line_as_of,
            books: consensus.books_for(edge_type),
            low_confidence_market: consensus.low_confidence(edge_type),
            cover_probability: 0.5,
            price: cfg.standard_juice,
            suggested_stake: 0.0,
            ensemble: false,
        };

        if let (Some(margin), Some(spread)) = (pred.predicted_margin, consensus.spread_home) {
            if !pred.is_incomplete() {
                let market_margin = spread_to_margin(spread);
                let edge = margin - market_margin;
                if edge != 0.0 {
                    let dir = if edge > 0.0 {
                        Direction::FavorsHome
                    } else {
                        Direction::FavorsAway
                    };
                    edges.push(base(EdgeType::Spread, edge, dir, margin, market_margin));
                }
            }
        }

        if let (Some(total), Some(market_total)) = (pred.predicted_total, consensus.total) {
            let edge = total - market_total;
            if edge != 0.0 {
                let dir = if edge > 0.0 {
                    Direction::FavorsOver
                } else {
                    Direction::FavorsUnder
                };
                edges.push(base(EdgeType::Total, edge, dir, total, market_total));
            }
        }

        if let (Some(p), Some(q)) = (pred.win_prob_home, consensus.home_win_prob) {
            let edge = p - q;
            if edge != 0.0 {
                let dir = if edge > 0.0 {
                    Direction::FavorsHome
                } else {
                    Direction::FavorsAway
                };
                let mut rec = base(EdgeType::Moneyline, edge, dir, p, q);
                let (side_prob, side_quote, market_side_prob) = match dir {
                    Direction::FavorsHome => (p, best.home_moneyline.as_ref(), q),
                    _ => (1.0 - p, best.away_moneyline.as_ref(), 1.0 - q),
                };
                rec.cover_probability = side_prob;
                rec.price = side_quote
                    .map(|quote| quote.value as i32)
                    .unwrap_or_else(|| probability_to_american(market_side_prob));
                edges.push(rec);
            }
        }
    }

    let agreement = agreement_counts(&edges);
    for edge in &mut edges {
        let agreeing = agreement
            .get(&(edge.edge_type, edge.direction))
            .copied()
            .unwrap_or(0);
        edge.confidence = confidence(
            inputs.accuracy,
            &edge.source_id,
            agreeing,
            hours_between(edge.prediction_as_of, cutoff),
            cfg,
        );
        if edge.edge_type != EdgeType::Moneyline {
            edge.cover_probability = curve.cover_probability(edge.edge_value);
        }
        edge.suggested_stake = kelly_stake(
            edge.cover_probability,
            edge.price,
            cfg.kelly_fraction,
            cfg.max_stake_fraction,
        );
    }

    if cfg.ensemble_mode {
        let ensemble = ensemble_edges(&edges, &curve, cfg);
        edges.extend(ensemble);
    }

    let (mut ranked, mut below): (Vec<_>, Vec<_>) =
        edges.into_iter().partition(|e| thresholds.passes(e));
    rank_edges(&mut ranked);
    rank_edges(&mut below);
    report.consensus = Some(consensus);
    report.ranked = ranked;
    report.below_threshold = below;
    report
}

/// Latest prediction per source with `as_of <= cutoff`.
fn latest_per_source<'a>(
    predictions: &'a [ModelPrediction],
    cutoff: DateTime<Utc>,
    sources: &[SourceId],
) -> BTreeMap<&'a str, &'a ModelPrediction> {
    let mut latest: BTreeMap<&str, &ModelPrediction> = BTreeMap::new();
    for p in predictions {
        if p.as_of > cutoff || p.source_id == ENSEMBLE_SOURCE {
            continue;
        }
        if !sources.is_empty() && !sources.iter().any(|s| *s == p.source_id) {
            continue;
        }
        let slot = latest.entry(p.source_id.as_str()).or_insert(p);
        if p.as_of > slot.as_of {
            *slot = p;
        }
    }
    latest
}

/// Distinct sources backing each (edge type, direction).
fn agreement_counts(edges: &[EdgeRecord]) -> HashMap<(EdgeType, Direction), usize> {
    let mut counts = HashMap::new();
    for e in edges {
        *counts.entry((e.edge_type, e.direction)).or_insert(0) += 1;
    }
    counts
}

/// Weighted blend of trailing accuracy, cross-source agreement and recency,
/// in [0, 1].
pub fn confidence(
    accuracy: &AccuracyTable,
    source_id: &str,
    agreeing_sources: usize,
    age_hours: f64,
    cfg: &EngineConfig,
) -> f64 {
    let acc = accuracy.shrunk_win_rate(source_id, cfg.accuracy_prior_games);
    let agree = (agreeing_sources as f64 / cfg.agreement_saturation.max(1.0)).min(1.0);
    let recency = 0.5f64.powf(age_hours.max(0.0) / cfg.recency_half_life_hours);
    let weights = cfg.accuracy_weight + cfg.agreement_weight + cfg.recency_weight;
    if weights <= 0.0 {
        return 0.0;
    }
    ((cfg.accuracy_weight * acc + cfg.agreement_weight * agree + cfg.recency_weight * recency)
        / weights)
        .clamp(0.0, 1.0)
}

/// Confidence-weighted mean per edge type, labelled as an ensemble.
fn ensemble_edges(edges: &[EdgeRecord], curve: &WinProbCurve, cfg: &EngineConfig) -> Vec<EdgeRecord> {
    let mut by_type: BTreeMap<EdgeType, Vec<&EdgeRecord>> = BTreeMap::new();
    for e in edges.iter().filter(|e| !e.ensemble) {
        by_type.entry(e.edge_type).or_default().push(e);
    }

    let mut out = Vec::new();
    for (edge_type, group) in by_type {
        let weight: f64 = group.iter().map(|e| e.confidence).sum();
        let Some(first) = group.first() else { continue };
        if weight <= 0.0 {
            continue;
        }
        let model = group.iter().map(|e| e.model_value * e.confidence).sum::<f64>() / weight;
        let market = first.market_value;
        let edge = model - market;
        if edge == 0.0 {
            continue;
        }
        let direction = match (edge_type, edge > 0.0) {
            (EdgeType::Total, true) => Direction::FavorsOver,
            (EdgeType::Total, false) => Direction::FavorsUnder,
            (_, true) => Direction::FavorsHome,
            (_, false) => Direction::FavorsAway,
        };
        let cover_probability = match edge_type {
            EdgeType::Moneyline if edge > 0.0 => model,
            EdgeType::Moneyline => 1.0 - model,
            _ => curve.cover_probability(edge),
        };
        // Moneyline price follows the member quoting the chosen side.
        let price = group
            .iter()
            .find(|e| e.direction == direction)
            .map(|e| e.price)
            .unwrap_or(cfg.standard_juice);
        out.push(EdgeRecord {
            game_id: first.game_id.clone(),
            source_id: ENSEMBLE_SOURCE.to_string(),
            edge_type,
            edge_value: edge,
            direction,
            confidence: group.iter().map(|e| e.confidence).sum::<f64>() / group.len() as f64,
            model_value: model,
            market_value: market,
            prediction_as_of: group.iter().map(|e| e.prediction_as_of).max().unwrap_or(first.prediction_as_of),
            line_as_of: first.line_as_of,
            books: first.books,
            low_confidence_market: first.low_confidence_market,
            cover_probability,
            price,
            suggested_stake: kelly_stake(cover_probability, price, cfg.kelly_fraction, cfg.max_stake_fraction),
            ensemble: true,
        });
    }
    out
}

/// Share of rank-only sources whose favorite matches the market favorite.
fn ranking_agreement(
    latest: &BTreeMap<&str, &ModelPrediction>,
    consensus: &ConsensusLine,
) -> Option<f64> {
    let market_margin = spread_to_margin(consensus.spread_home?);
    if market_margin == 0.0 {
        return None;
    }
    let signals: Vec<f64> = latest
        .values()
        .filter(|p| p.predicted_margin.is_none())
        .filter_map(|p| p.rank_signal)
        .filter(|s| *s != 0.0)
        .collect();
    if signals.is_empty() {
        return None;
    }
    let agreeing = signals
        .iter()
        .filter(|s| s.signum() == market_margin.signum())
        .count();
    Some(agreeing as f64 / signals.len() as f64)
}

/// Confidence descending, then absolute edge descending.
pub fn rank_edges(edges: &mut [EdgeRecord]) {
    edges.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.edge_value.abs().total_cmp(&a.edge_value.abs()))
            .then_with(|| a.game_id.cmp(&b.game_id))
            .then_with(|| a.source_id.cmp(&b.source_id))
            .then_with(|| a.edge_type.cmp(&b.edge_type))
    });
}
