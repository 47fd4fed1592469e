use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::db::models::{FinalScore, Game, GameId, VenueType};
use crate::error::{FusionError, Result};

/// Records dated this many days either side of a game may belong to it.
pub const DATE_TOLERANCE_DAYS: i64 = 1;

/// What the matcher needs to know about one inbound record, with both teams
/// already resolved.
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    pub source_id: &'a str,
    pub home_team_id: &'a str,
    pub away_team_id: &'a str,
    pub date: Option<NaiveDate>,
    pub neutral_site: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    /// Only result records carry a score; used as a tiebreaker.
    pub final_score: Option<FinalScore>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub game_id: GameId,
    /// The record's home team is the game's away team.
    pub flipped: bool,
    /// Set when no existing game matched and a new one must be registered.
    pub created: Option<Game>,
}

impl MatchOutcome {
    /// Re-express a home-perspective signed value from the game's side.
    pub fn orient(&self, value: f64) -> f64 {
        if self.flipped {
            -value
        } else {
            value
        }
    }
}

/// Deterministic game id: date plus the sorted team pair.
pub fn game_id_for(date: NaiveDate, team_a: &str, team_b: &str) -> GameId {
    let (lo, hi) = if team_a <= team_b {
        (team_a, team_b)
    } else {
        (team_b, team_a)
    };
    format!("{}:{}:{}", date.format("%Y-%m-%d"), lo, hi)
}

/// Decide which game a record belongs to.
///
/// `existing` may contain any games; only those with the same team pair
/// within the date tolerance are considered.
pub fn match_record(
    req: &MatchRequest<'_>,
    existing: &[Game],
    default_tipoff_hour_utc: u32,
) -> Result<MatchOutcome> {
    let date = req.date.ok_or_else(|| FusionError::IncompleteRecord {
        source_id: req.source_id.to_string(),
        game_id: None,
        field: "date".to_string(),
    })?;
    if req.home_team_id == req.away_team_id {
        return Err(FusionError::IncompleteRecord {
            source_id: req.source_id.to_string(),
            game_id: None,
            field: "away_team".to_string(),
        });
    }

    let mut candidates: Vec<&Game> = existing
        .iter()
        .filter(|g| same_pair(g, req) && (g.date - date).num_days().abs() <= DATE_TOLERANCE_DAYS)
        .collect();

    if candidates.is_empty() {
        return Ok(MatchOutcome {
            game_id: game_id_for(date, req.home_team_id, req.away_team_id),
            flipped: false,
            created: Some(new_game(req, date, default_tipoff_hour_utc)),
        });
    }

    if candidates.len() > 1 {
        narrow(&mut candidates, |g| venue_agrees(g, req));
    }
    if candidates.len() > 1 {
        narrow(&mut candidates, |g| score_agrees(g, req));
    }

    match candidates.as_slice() {
        [game] => Ok(MatchOutcome {
            game_id: game.game_id.clone(),
            flipped: game.home_team_id != req.home_team_id,
            created: None,
        }),
        many => Err(FusionError::UnresolvedGameMatch {
            source_id: req.source_id.to_string(),
            candidates: many.iter().map(|g| g.game_id.clone()).collect(),
        }),
    }
}

/// Apply a tiebreaker, unless it would eliminate every candidate.
fn narrow<F>(candidates: &mut Vec<&Game>, keep: F)
where
    F: Fn(&Game) -> bool,
{
    let kept: Vec<&Game> = candidates.iter().copied().filter(|g| keep(g)).collect();
    if !kept.is_empty() {
        *candidates = kept;
    }
}

fn same_pair(g: &Game, req: &MatchRequest<'_>) -> bool {
    (g.home_team_id == req.home_team_id && g.away_team_id == req.away_team_id)
        || (g.home_team_id == req.away_team_id && g.away_team_id == req.home_team_id)
}

fn venue_agrees(g: &Game, req: &MatchRequest<'_>) -> bool {
    if !g.venue_stated {
        return true;
    }
    match req.neutral_site {
        Some(true) => g.venue == VenueType::Neutral,
        Some(false) => g.venue == VenueType::Home && g.home_team_id == req.home_team_id,
        None => true,
    }
}

fn score_agrees(g: &Game, req: &MatchRequest<'_>) -> bool {
    match (g.final_score, req.final_score) {
        (Some(have), Some(reported)) => {
            let reported = if g.home_team_id == req.home_team_id {
                reported
            } else {
                FinalScore {
                    home: reported.away,
                    away: reported.home,
                }
            };
            have == reported
        }
        _ => true,
    }
}

/// Assumed start time for a game whose sources give none.
pub fn default_start(date: NaiveDate, tipoff_hour: u32) -> DateTime<Utc> {
    let tipoff = NaiveTime::from_hms_opt(tipoff_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    date.and_time(tipoff).and_utc()
}

fn new_game(req: &MatchRequest<'_>, date: NaiveDate, tipoff_hour: u32) -> Game {
    Game {
        game_id: game_id_for(date, req.home_team_id, req.away_team_id),
        date,
        home_team_id: req.home_team_id.to_string(),
        away_team_id: req.away_team_id.to_string(),
        venue: VenueType::from_hint(req.neutral_site),
        venue_stated: req.neutral_site.is_some(),
        start_time: req.start_time.unwrap_or_else(|| default_start(date, tipoff_hour)),
        final_score: req.final_score,
        conflicted: false,
    }
}

/// Signed gap between two instants in fractional hours.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 3600.0
}

/// One second before tip-off: the latest instant any input may carry.
pub fn last_instant_before(start_time: DateTime<Utc>) -> DateTime<Utc> {
    start_time - Duration::seconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn req<'a>(home: &'a str, away: &'a str, date: &str) -> MatchRequest<'a> {
        MatchRequest {
            source_id: "test",
            home_team_id: home,
            away_team_id: away,
            date: Some(d(date)),
            neutral_site: None,
            start_time: None,
            final_score: None,
        }
    }

    fn game(home: &str, away: &str, date: &str, venue: VenueType) -> Game {
        Game {
            game_id: game_id_for(d(date), home, away),
            date: d(date),
            home_team_id: home.into(),
            away_team_id: away.into(),
            venue,
            venue_stated: true,
            start_time: d(date).and_hms_opt(19, 0, 0).unwrap().and_utc(),
            final_score: None,
            conflicted: false,
        }
    }

    #[test]
    fn game_id_is_order_independent() {
        assert_eq!(
            game_id_for(d("2025-01-04"), "duke", "virginia"),
            game_id_for(d("2025-01-04"), "virginia", "duke")
        );
        assert_eq!(game_id_for(d("2025-01-04"), "virginia", "duke"), "2025-01-04:duke:virginia");
    }

    #[test]
    fn missing_date_is_incomplete() {
        let mut r = req("duke", "virginia", "2025-01-04");
        r.date = None;
        match match_record(&r, &[], 16) {
            Err(FusionError::IncompleteRecord { field, .. }) => assert_eq!(field, "date"),
            other => panic!("expected incomplete record, got {:?}", other),
        }
    }

    #[test]
    fn new_game_uses_default_tipoff() {
        let out = match_record(&req("duke", "virginia", "2025-01-04"), &[], 16).unwrap();
        let g = out.created.unwrap();
        assert_eq!(g.start_time, d("2025-01-04").and_hms_opt(16, 0, 0).unwrap().and_utc());
        assert_eq!(g.venue, VenueType::Home);
        assert!(!g.venue_stated);
        assert!(!out.flipped);
    }

    #[test]
    fn assumed_venue_does_not_break_a_tie() {
        let mut assumed = game("duke", "virginia", "2025-03-13", VenueType::Home);
        assumed.venue_stated = false;
        let existing = vec![assumed, game("duke", "virginia", "2025-03-14", VenueType::Neutral)];
        let mut r = req("duke", "virginia", "2025-03-13");
        r.neutral_site = Some(true);
        assert!(matches!(
            match_record(&r, &existing, 16),
            Err(FusionError::UnresolvedGameMatch { .. })
        ));
    }

    #[test]
    fn next_day_record_matches_and_flips_orientation() {
        let existing = vec![game("duke", "virginia", "2025-01-04", VenueType::Home)];
        let out = match_record(&req("virginia", "duke", "2025-01-05"), &existing, 16).unwrap();
        assert_eq!(out.game_id, existing[0].game_id);
        assert!(out.flipped);
        assert!(out.created.is_none());
        assert_eq!(out.orient(-4.5), 4.5);
    }

    #[test]
    fn two_plausible_games_are_held_not_guessed() {
        let existing = vec![
            game("duke", "virginia", "2025-03-13", VenueType::Neutral),
            game("duke", "virginia", "2025-03-14", VenueType::Neutral),
        ];
        let mut r = req("duke", "virginia", "2025-03-13");
        r.neutral_site = Some(true);
        match match_record(&r, &existing, 16) {
            Err(FusionError::UnresolvedGameMatch { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected unresolved match, got {:?}", other),
        }
    }

    #[test]
    fn venue_hint_breaks_the_tie() {
        let existing = vec![
            game("duke", "virginia", "2025-03-13", VenueType::Home),
            game("duke", "virginia", "2025-03-14", VenueType::Neutral),
        ];
        let mut r = req("duke", "virginia", "2025-03-13");
        r.neutral_site = Some(true);
        let out = match_record(&r, &existing, 16).unwrap();
        assert_eq!(out.game_id, existing[1].game_id);
    }

    #[test]
    fn score_hint_breaks_the_tie() {
        let mut first = game("duke", "virginia", "2025-03-13", VenueType::Neutral);
        first.final_score = Some(FinalScore { home: 70, away: 60 });
        let second = game("duke", "virginia", "2025-03-14", VenueType::Neutral);
        let mut r = req("virginia", "duke", "2025-03-14");
        r.final_score = Some(FinalScore { home: 65, away: 71 });
        let out = match_record(&r, &[first, second.clone()], 16).unwrap();
        assert_eq!(out.game_id, second.game_id);
        assert!(out.flipped);
    }
}
