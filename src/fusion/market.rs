//! Per-game sportsbook line history and consensus.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{BookId, EdgeType, GameId, MarketLine};

use super::matcher::last_instant_before;
use super::odds::no_vig_probabilities;

/// Median market view at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusLine {
    pub game_id: GameId,
    /// Query time the consensus was taken at
    pub as_of: DateTime<Utc>,
    pub spread_home: Option<f64>,
    pub total: Option<f64>,
    /// Median no-vig home win probability across books quoting both sides
    pub home_win_prob: Option<f64>,
    /// Latest timestamp among the contributing lines
    pub latest_line_as_of: DateTime<Utc>,
    /// Books with any line at or before `as_of`
    pub books: usize,
    pub spread_books: usize,
    pub total_books: usize,
    /// Books quoting both moneyline sides
    pub moneyline_books: usize,
}

impl ConsensusLine {
    /// Books behind the consensus value an edge of `edge_type` is measured
    /// against.
    pub fn books_for(&self, edge_type: EdgeType) -> usize {
        match edge_type {
            EdgeType::Spread => self.spread_books,
            EdgeType::Total => self.total_books,
            EdgeType::Moneyline => self.moneyline_books,
        }
    }

    pub fn low_confidence(&self, edge_type: EdgeType) -> bool {
        self.books_for(edge_type) < 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookQuote {
    pub book_id: BookId,
    pub value: f64,
    pub as_of: DateTime<Utc>,
}

/// The most favorable quote for each side across books.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestLines {
    /// Highest `spread_home` (fewest points laid / most taken by home)
    pub home_spread: Option<BookQuote>,
    /// Lowest `spread_home` (best number for an away bettor)
    pub away_spread: Option<BookQuote>,
    pub home_moneyline: Option<BookQuote>,
    pub away_moneyline: Option<BookQuote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMovement {
    pub opening_spread: Option<f64>,
    pub closing_spread: Option<f64>,
    pub opening_total: Option<f64>,
    pub closing_total: Option<f64>,
}

impl LineMovement {
    /// Positive when the line moved toward the away side.
    pub fn spread_move(&self) -> Option<f64> {
        Some(self.closing_spread? - self.opening_spread?)
    }

    pub fn total_move(&self) -> Option<f64> {
        Some(self.closing_total? - self.opening_total?)
    }
}

/// Every line posted for one game, by book, in `as_of` order.
#[derive(Debug, Clone, Default)]
pub struct MarketBook {
    lines: BTreeMap<BookId, Vec<MarketLine>>,
}

impl MarketBook {
    /// Append a line. Returns false for a duplicate `(book, as_of)`.
    pub fn add(&mut self, line: MarketLine) -> bool {
        let history = self.lines.entry(line.book_id.clone()).or_default();
        match history.binary_search_by(|l| l.as_of.cmp(&line.as_of)) {
            Ok(_) => false,
            Err(pos) => {
                history.insert(pos, line);
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarketLine> {
        self.lines.values().flatten()
    }

    /// Rewrite every stored line in place; `as_of` must not change.
    pub fn update_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut MarketLine),
    {
        self.lines.values_mut().flatten().for_each(|l| f(l));
    }

    /// Each book's latest line with `as_of <= at`.
    fn latest_per_book(&self, at: DateTime<Utc>) -> Vec<&MarketLine> {
        self.lines
            .values()
            .filter_map(|history| history.iter().rev().find(|l| l.as_of <= at))
            .collect()
    }

    fn first_per_book(&self) -> Vec<&MarketLine> {
        self.lines.values().filter_map(|h| h.first()).collect()
    }

    /// Median line across books using only lines posted at or before `at`.
    pub fn consensus(&self, game_id: &GameId, at: DateTime<Utc>) -> Option<ConsensusLine> {
        build_consensus(game_id, at, &self.latest_per_book(at))
    }

    /// Consensus of each book's first posted line.
    pub fn opening(&self, game_id: &GameId) -> Option<ConsensusLine> {
        let first = self.first_per_book();
        let at = first.iter().map(|l| l.as_of).max()?;
        build_consensus(game_id, at, &first)
    }

    /// Consensus strictly before tip-off.
    pub fn closing(&self, game_id: &GameId, start_time: DateTime<Utc>) -> Option<ConsensusLine> {
        self.consensus(game_id, last_instant_before(start_time))
    }

    pub fn movement(&self, game_id: &GameId, start_time: DateTime<Utc>) -> Option<LineMovement> {
        let open = self.opening(game_id)?;
        let close = self.closing(game_id, start_time)?;
        Some(LineMovement {
            opening_spread: open.spread_home,
            closing_spread: close.spread_home,
            opening_total: open.total,
            closing_total: close.total,
        })
    }

    /// Line shopping: best available number per side as of `at`.
    pub fn best_lines(&self, at: DateTime<Utc>) -> BestLines {
        let mut best = BestLines::default();
        for line in self.latest_per_book(at) {
            let quote = |value: f64| BookQuote {
                book_id: line.book_id.clone(),
                value,
                as_of: line.as_of,
            };
            if let Some(s) = line.spread_home {
                if best.home_spread.as_ref().map_or(true, |b| s > b.value) {
                    best.home_spread = Some(quote(s));
                }
                if best.away_spread.as_ref().map_or(true, |b| s < b.value) {
                    best.away_spread = Some(quote(s));
                }
            }
            if let Some(ml) = line.moneyline_home {
                let ml = ml as f64;
                if best.home_moneyline.as_ref().map_or(true, |b| ml > b.value) {
                    best.home_moneyline = Some(quote(ml));
                }
            }
            if let Some(ml) = line.moneyline_away {
                let ml = ml as f64;
                if best.away_moneyline.as_ref().map_or(true, |b| ml > b.value) {
                    best.away_moneyline = Some(quote(ml));
                }
            }
        }
        best
    }
}

fn build_consensus(
    game_id: &GameId,
    at: DateTime<Utc>,
    lines: &[&MarketLine],
) -> Option<ConsensusLine> {
    let latest_line_as_of = lines.iter().map(|l| l.as_of).max()?;
    let spreads: Vec<f64> = lines.iter().filter_map(|l| l.spread_home).collect();
    let totals: Vec<f64> = lines.iter().filter_map(|l| l.total).collect();
    let probs: Vec<f64> = lines
        .iter()
        .filter_map(|l| match (l.moneyline_home, l.moneyline_away) {
            (Some(h), Some(a)) => Some(no_vig_probabilities(h, a).0),
            _ => None,
        })
        .collect();
    Some(ConsensusLine {
        game_id: game_id.clone(),
        as_of: at,
        spread_books: spreads.len(),
        total_books: totals.len(),
        moneyline_books: probs.len(),
        spread_home: median(spreads),
        total: median(totals),
        home_win_prob: median(probs),
        latest_line_as_of,
        books: lines.len(),
    })
}

/// Median; even counts average the two middle values.
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 4, hour, 0, 0).unwrap()
    }

    fn line(book: &str, spread: f64, total: f64, hour: u32) -> MarketLine {
        MarketLine {
            game_id: "g".into(),
            book_id: book.into(),
            spread_home: Some(spread),
            total: Some(total),
            moneyline_home: Some(-250),
            moneyline_away: Some(200),
            as_of: t(hour),
        }
    }

    fn gid() -> GameId {
        "g".to_string()
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(vec![]), None);
        assert_relative_eq!(median(vec![3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_relative_eq!(median(vec![-6.5, -7.0, -6.0, -5.5]).unwrap(), -6.25);
    }

    #[test]
    fn consensus_ignores_lines_posted_after_query() {
        let mut book = MarketBook::default();
        book.add(line("dk", -6.5, 140.5, 8));
        book.add(line("fd", -7.0, 141.0, 9));
        book.add(line("mgm", -6.0, 139.5, 10));
        book.add(line("dk", -9.0, 143.0, 14));

        let c = book.consensus(&gid(), t(12)).unwrap();
        assert_eq!(c.books, 3);
        assert!(!c.low_confidence(EdgeType::Spread));
        assert_relative_eq!(c.spread_home.unwrap(), -6.5);
        assert_relative_eq!(c.total.unwrap(), 140.5);
        assert!(c.latest_line_as_of <= t(12));

        let later = book.consensus(&gid(), t(15)).unwrap();
        assert_relative_eq!(later.spread_home.unwrap(), -7.0);
    }

    #[test]
    fn single_book_is_low_confidence() {
        let mut book = MarketBook::default();
        book.add(line("dk", -3.0, 150.0, 8));
        book.add(line("fd", -4.0, 151.0, 11));
        let c = book.consensus(&gid(), t(9)).unwrap();
        assert_eq!(c.books, 1);
        assert!(c.low_confidence(EdgeType::Spread));
        assert!(book.consensus(&gid(), t(7)).is_none());
    }

    #[test]
    fn book_counts_are_per_quantity() {
        let mut book = MarketBook::default();
        book.add(line("dk", -3.0, 150.0, 8));
        let mut totals_only = line("fd", -3.5, 151.0, 8);
        totals_only.spread_home = None;
        totals_only.moneyline_away = None;
        book.add(totals_only);
        let c = book.consensus(&gid(), t(9)).unwrap();
        assert_eq!(c.books, 2);
        assert_eq!(c.spread_books, 1);
        assert_eq!(c.total_books, 2);
        assert_eq!(c.moneyline_books, 1);
        assert!(c.low_confidence(EdgeType::Spread));
        assert!(!c.low_confidence(EdgeType::Total));
        assert!(c.low_confidence(EdgeType::Moneyline));
    }

    #[test]
    fn duplicate_book_timestamp_is_ignored() {
        let mut book = MarketBook::default();
        assert!(book.add(line("dk", -3.0, 150.0, 8)));
        assert!(!book.add(line("dk", -3.0, 150.0, 8)));
        assert_eq!(book.iter().count(), 1);
    }

    #[test]
    fn opening_closing_and_movement() {
        let mut book = MarketBook::default();
        book.add(line("dk", -5.0, 140.0, 8));
        book.add(line("fd", -5.5, 141.0, 9));
        book.add(line("dk", -7.0, 142.0, 18));
        book.add(line("fd", -7.5, 143.0, 19));
        // Posted at tip-off: never part of the closing line.
        book.add(line("fd", -20.0, 160.0, 20));

        let start = t(20);
        let mv = book.movement(&gid(), start).unwrap();
        assert_relative_eq!(mv.opening_spread.unwrap(), -5.25);
        assert_relative_eq!(mv.closing_spread.unwrap(), -7.25);
        assert_relative_eq!(mv.spread_move().unwrap(), -2.0);
        assert_relative_eq!(mv.total_move().unwrap(), 2.0);
        let close = book.closing(&gid(), start).unwrap();
        assert!(close.latest_line_as_of < start);
        assert!(close.as_of == start - Duration::seconds(1));
    }

    #[test]
    fn best_lines_pick_each_side() {
        let mut book = MarketBook::default();
        let mut a = line("dk", -6.5, 140.0, 8);
        a.moneyline_home = Some(-260);
        a.moneyline_away = Some(210);
        let mut b = line("fd", -7.0, 140.0, 8);
        b.moneyline_home = Some(-240);
        b.moneyline_away = Some(195);
        book.add(a);
        book.add(b);
        let best = book.best_lines(t(12));
        assert_eq!(best.home_spread.unwrap().book_id, "dk");
        assert_eq!(best.away_spread.unwrap().book_id, "fd");
        assert_eq!(best.home_moneyline.unwrap().book_id, "fd");
        assert_eq!(best.away_moneyline.unwrap().book_id, "dk");
    }

    #[test]
    fn moneyline_consensus_is_vig_free() {
        let mut book = MarketBook::default();
        book.add(line("dk", -6.5, 140.0, 8));
        let c = book.consensus(&gid(), t(9)).unwrap();
        let p = c.home_win_prob.unwrap();
        assert!(p > 0.6 && p < 0.7);
    }
}
