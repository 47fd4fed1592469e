//! Standard settlement rules for spread, total and moneyline bets.
//!
//! A bet risks one unit. A win pays the price's profit per unit, a loss costs
//! the unit, and an exact cover is a push worth zero.

use crate::db::models::{Direction, EdgeType, FinalScore};
use crate::fusion::odds::profit_per_unit;

/// Scores are integers and lines are half-point multiples; anything this
/// close to the line is an exact cover.
const PUSH_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    /// None on a push
    pub won: Option<bool>,
    pub push: bool,
    pub units: f64,
    /// Final margin (spread/moneyline) or total points
    pub actual: f64,
}

/// Settle one bet against a final score.
///
/// `line` is the home-perspective spread (`spread_home`, negative = home
/// favored) for spread bets, the posted total for totals, ignored for
/// moneylines.
pub fn settle_bet(
    edge_type: EdgeType,
    side: Direction,
    line: f64,
    price: i32,
    score: FinalScore,
) -> Settlement {
    let actual = match edge_type {
        EdgeType::Total => score.total(),
        EdgeType::Spread | EdgeType::Moneyline => score.margin(),
    };
    settle_against(edge_type, side, line, price, actual)
}

/// Settle against an actual home margin (spread, moneyline) or total.
pub fn settle_against(
    edge_type: EdgeType,
    side: Direction,
    line: f64,
    price: i32,
    actual: f64,
) -> Settlement {
    let home_or_over = match edge_type {
        EdgeType::Spread => actual + line,
        EdgeType::Total => actual - line,
        EdgeType::Moneyline => actual,
    };
    let cover_margin = match side {
        Direction::FavorsAway | Direction::FavorsUnder => -home_or_over,
        Direction::FavorsHome | Direction::FavorsOver => home_or_over,
    };

    if cover_margin.abs() < PUSH_EPSILON {
        return Settlement {
            won: None,
            push: true,
            units: 0.0,
            actual,
        };
    }
    let won = cover_margin > 0.0;
    Settlement {
        won: Some(won),
        push: false,
        units: if won { profit_per_unit(price) } else { -1.0 },
        actual,
    }
}
