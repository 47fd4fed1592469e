//! The fused view: games, their predictions and their market lines.
//!
//! Locking: the game index (`RwLock`) is only held to find or create a game;
//! all writes to a game happen under that game's own `Mutex`. The index lock
//! is always taken before a game lock, never the other way round.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::models::{
    EdgeRecord, FinalScore, Game, GameId, MarketLine, ModelPrediction, RawMarketLine,
    RawPrediction, RawResult, SourceId, TeamId, VenueType,
};
use crate::error::{FusionError, Result};

use super::calibration::{fit_slope, FitResult, WinProbCurve};
use super::context::FusionContext;
use super::edge::{compute_edges, rank_edges, EdgeInputs, EdgeReport, Thresholds};
use super::market::{BestLines, ConsensusLine, LineMovement, MarketBook};
use super::matcher::{
    default_start, game_id_for, last_instant_before, match_record, MatchOutcome, MatchRequest,
};
use super::normalizer::{normalize, remove_home_court, swap_sides, SchemaRegistry};
use super::odds::is_valid_american;
use super::resolver::{ResolveHint, TeamResolver};
use super::teams::TeamRegistry;

/// One game with everything ingested for it.
#[derive(Debug, Clone)]
pub struct GameAggregate {
    pub game: Game,
    /// Append-only, one entry per (source, as_of)
    pub predictions: Vec<ModelPrediction>,
    pub market: MarketBook,
}

impl GameAggregate {
    pub fn new(game: Game) -> Self {
        GameAggregate {
            game,
            predictions: Vec::new(),
            market: MarketBook::default(),
        }
    }

    fn has_prediction(&self, source_id: &str, as_of: DateTime<Utc>) -> bool {
        self.predictions
            .iter()
            .any(|p| p.source_id == source_id && p.as_of == as_of)
    }

    /// Append a normalized prediction unless `(source, as_of)` is present.
    pub fn add_prediction(&mut self, prediction: ModelPrediction) -> bool {
        if self.has_prediction(&prediction.source_id, prediction.as_of) {
            return false;
        }
        self.predictions.push(prediction);
        true
    }

    /// The first explicit venue hint replaces an assumed venue; later hints
    /// must agree with it. Returns whether the record is flipped afterwards.
    fn settle_venue(&mut self, req: &MatchRequest<'_>, flipped: bool, curve: &WinProbCurve) -> Result<bool> {
        let Some(neutral) = req.neutral_site else {
            return Ok(flipped);
        };
        if !self.game.venue_stated {
            self.game.venue_stated = true;
            if neutral {
                self.game.venue = VenueType::Neutral;
                for p in &mut self.predictions {
                    remove_home_court(p, curve);
                }
                return Ok(flipped);
            }
            if flipped {
                debug!("{} is hosted by {}", self.game.game_id, self.game.away_team_id);
                self.swap_home_away(curve);
            }
            return Ok(false);
        }
        let agrees = match self.game.venue {
            VenueType::Neutral => neutral,
            VenueType::Home => !neutral && !flipped,
        };
        if agrees {
            return Ok(flipped);
        }
        let court = |team: &str| format!("{}'s court", team);
        Err(FusionError::ConflictingVenue {
            game_id: self.game.game_id.clone(),
            source_id: req.source_id.to_string(),
            recorded: match self.game.venue {
                VenueType::Neutral => "a neutral site".to_string(),
                VenueType::Home => court(&self.game.home_team_id),
            },
            reported: if neutral {
                "a neutral site".to_string()
            } else {
                court(req.home_team_id)
            },
        })
    }

    fn swap_home_away(&mut self, curve: &WinProbCurve) {
        let game = &mut self.game;
        std::mem::swap(&mut game.home_team_id, &mut game.away_team_id);
        game.final_score = game.final_score.map(|s| FinalScore {
            home: s.away,
            away: s.home,
        });
        for p in &mut self.predictions {
            swap_sides(p, curve);
        }
        self.market.update_each(|l| {
            l.spread_home = l.spread_home.map(|s| -s);
            std::mem::swap(&mut l.moneyline_home, &mut l.moneyline_away);
        });
    }

    /// A stated start time replaces the assumed default tip-off.
    fn adopt_start_time(&mut self, start_time: Option<DateTime<Utc>>, tipoff_hour: u32) {
        if let Some(start_time) = start_time {
            if self.game.start_time == default_start(self.game.date, tipoff_hour) {
                self.game.start_time = start_time;
            }
        }
    }

    fn move_to_date(&mut self, game_id: &GameId, date: NaiveDate, tipoff_hour: u32) {
        if self.game.start_time == default_start(self.game.date, tipoff_hour) {
            self.game.start_time = default_start(date, tipoff_hour);
        }
        self.game.game_id = game_id.clone();
        self.game.date = date;
        for p in &mut self.predictions {
            p.game_id = game_id.clone();
        }
        self.market.update_each(|l| l.game_id = game_id.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Accepted(GameId),
    Duplicate(GameId),
}

/// A record that matched several games, kept for a later retry.
#[derive(Debug, Clone)]
pub enum PendingRecord {
    Prediction(RawPrediction),
    Line(RawMarketLine),
    Result(RawResult),
}

#[derive(Debug)]
pub struct RecordError {
    pub kind: &'static str,
    pub index: usize,
    pub error: FusionError,
}

/// Outcome of ingesting a batch. Per-record failures never abort the batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub errors: Vec<RecordError>,
}

impl IngestReport {
    fn record(&mut self, kind: &'static str, index: usize, outcome: Result<Ingested>) {
        match outcome {
            Ok(Ingested::Accepted(_)) => self.accepted += 1,
            Ok(Ingested::Duplicate(_)) => self.duplicates += 1,
            Err(error) => {
                warn!("Rejected {} #{}: {}", kind, index, error);
                self.errors.push(RecordError { kind, index, error });
            }
        }
    }

    pub fn merge(&mut self, other: IngestReport) {
        self.accepted += other.accepted;
        self.duplicates += other.duplicates;
        self.errors.extend(other.errors);
    }

    /// Errors that must not be resolved silently (conflicting results).
    pub fn fatal(&self) -> impl Iterator<Item = &RecordError> {
        self.errors.iter().filter(|e| e.error.is_fatal())
    }
}

/// Serializable per-game market summary for reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub game_id: GameId,
    pub consensus: Option<ConsensusLine>,
    pub movement: Option<LineMovement>,
    pub best: BestLines,
}

#[derive(Default)]
struct GameIndex {
    games: HashMap<GameId, Arc<Mutex<GameAggregate>>>,
    /// Sorted team pair → games between them
    by_pair: HashMap<(TeamId, TeamId), Vec<GameId>>,
    /// (old, new) ids of games re-keyed onto an earlier date
    renamed: Vec<(GameId, GameId)>,
}

impl GameIndex {
    fn insert(&mut self, aggregate: GameAggregate) -> Arc<Mutex<GameAggregate>> {
        let game_id = aggregate.game.game_id.clone();
        let key = pair_key(&aggregate.game.home_team_id, &aggregate.game.away_team_id);
        let slot = Arc::new(Mutex::new(aggregate));
        self.games.insert(game_id.clone(), Arc::clone(&slot));
        let ids = self.by_pair.entry(key).or_default();
        if !ids.contains(&game_id) {
            ids.push(game_id);
        }
        slot
    }

    fn rename(&mut self, old: &str, new: &GameId, key: &(TeamId, TeamId)) {
        if let Some(slot) = self.games.remove(old) {
            self.games.insert(new.clone(), slot);
        }
        if let Some(ids) = self.by_pair.get_mut(key) {
            ids.iter_mut().filter(|id| id.as_str() == old).for_each(|id| *id = new.clone());
        }
        self.renamed.push((old.to_string(), new.clone()));
    }
}

fn pair_key(a: &str, b: &str) -> (TeamId, TeamId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn lock(slot: &Mutex<GameAggregate>) -> MutexGuard<'_, GameAggregate> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Season label for a game date: November 2024 belongs to 2025.
pub fn season_of(date: NaiveDate) -> u16 {
    let year = date.year() as u16;
    if date.month() >= 7 {
        year + 1
    } else {
        year
    }
}

pub struct FusionEngine {
    cfg: EngineConfig,
    ctx: Arc<FusionContext>,
    resolver: TeamResolver,
    schemas: SchemaRegistry,
    index: RwLock<GameIndex>,
    unresolved: Mutex<Vec<PendingRecord>>,
}

impl FusionEngine {
    pub fn new(cfg: EngineConfig, ctx: Arc<FusionContext>) -> Self {
        let resolver = TeamResolver::new(
            TeamRegistry::seeded(),
            cfg.fuzzy_match_threshold,
            cfg.fuzzy_tie_epsilon,
        );
        let schemas = SchemaRegistry::with_defaults(cfg.points_per_rating_unit);
        FusionEngine {
            cfg,
            ctx,
            resolver,
            schemas,
            index: RwLock::new(GameIndex::default()),
            unresolved: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn context(&self) -> &Arc<FusionContext> {
        &self.ctx
    }

    pub fn resolver(&self) -> &TeamResolver {
        &self.resolver
    }

    // ── Ingestion ───────────────────────────────────────────────────────────

    fn resolve_pair(
        &self,
        source_id: &str,
        raw_home: &str,
        raw_away: &str,
        date: Option<NaiveDate>,
        conferences: (Option<&str>, Option<&str>),
    ) -> Result<(TeamId, TeamId)> {
        let season = date.map(season_of);
        let hint = |conf: Option<&str>| ResolveHint {
            conference: conf.map(str::to_string),
            season,
        };
        let home = self
            .resolver
            .resolve(&self.ctx, raw_home, source_id, &hint(conferences.0))?;
        let away = self
            .resolver
            .resolve(&self.ctx, raw_away, source_id, &hint(conferences.1))?;
        Ok((home.team_id, away.team_id))
    }

    /// Find or create the game a resolved record belongs to. Creation and
    /// re-keying are atomic under the index write lock.
    ///
    /// A game is keyed on the earliest date any of its records carries, so
    /// its id does not depend on which record arrived first.
    fn locate(&self, req: &MatchRequest<'_>) -> Result<(Arc<Mutex<GameAggregate>>, MatchOutcome)> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let key = pair_key(req.home_team_id, req.away_team_id);
        let existing: Vec<Game> = index
            .by_pair
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| index.games.get(id))
            .map(|slot| lock(slot).game.clone())
            .collect();

        let tipoff_hour = self.cfg.default_tipoff_hour_utc;
        let mut outcome = match_record(req, &existing, tipoff_hour)?;
        if let Some(game) = &outcome.created {
            debug!("New game {} ({} vs {})", game.game_id, game.home_team_id, game.away_team_id);
            let slot = index.insert(GameAggregate::new(game.clone()));
            return Ok((slot, outcome));
        }

        let slot = index
            .games
            .get(&outcome.game_id)
            .cloned()
            .ok_or_else(|| FusionError::UnknownGame(outcome.game_id.clone()))?;
        let mut agg = lock(&slot);
        let curve = WinProbCurve::new(self.cfg.win_prob_slope);
        outcome.flipped = agg.settle_venue(req, outcome.flipped, &curve)?;
        agg.adopt_start_time(req.start_time, tipoff_hour);

        if let Some(date) = req.date.filter(|d| *d < agg.game.date) {
            let new_id = game_id_for(date, req.home_team_id, req.away_team_id);
            if index.games.contains_key(&new_id) {
                warn!("Cannot re-key {} as {}: id already in use", outcome.game_id, new_id);
            } else {
                debug!("Re-keying {} as {}", outcome.game_id, new_id);
                agg.move_to_date(&new_id, date, tipoff_hour);
                index.rename(&outcome.game_id, &new_id, &key);
                outcome.game_id = new_id;
            }
        }
        drop(agg);
        Ok((slot, outcome))
    }

    /// Games re-keyed since the last call, as (old id, new id).
    pub fn take_renamed(&self) -> Vec<(GameId, GameId)> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut index.renamed)
    }

    fn hold(&self, record: PendingRecord) {
        self.unresolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Resolve, match, normalize and append one prediction.
    ///
    /// An incomplete prediction is still stored (with its missing fields
    /// listed) but reported as `IncompleteRecord`.
    pub fn ingest_prediction(&self, raw: &RawPrediction) -> Result<Ingested> {
        let schema = self.schemas.get(&raw.source_id)?;
        let (home, away) = self.resolve_pair(
            &raw.source_id,
            &raw.raw_home_team,
            &raw.raw_away_team,
            raw.date,
            (raw.home_conference.as_deref(), raw.away_conference.as_deref()),
        )?;
        let req = MatchRequest {
            source_id: &raw.source_id,
            home_team_id: &home,
            away_team_id: &away,
            date: raw.date,
            neutral_site: raw.neutral_site,
            start_time: raw.start_time,
            final_score: None,
        };
        let (slot, outcome) = match self.locate(&req) {
            Err(e @ FusionError::UnresolvedGameMatch { .. }) => {
                self.hold(PendingRecord::Prediction(raw.clone()));
                return Err(e);
            }
            other => other?,
        };

        let mut agg = lock(&slot);
        if agg.has_prediction(&raw.source_id, raw.as_of) {
            return Ok(Ingested::Duplicate(outcome.game_id));
        }
        let prediction = normalize(
            raw,
            &outcome.game_id,
            schema,
            agg.game.venue,
            outcome.flipped,
            &self.cfg,
        );
        let missing = prediction.missing_fields.join(",");
        agg.add_prediction(prediction);

        if !missing.is_empty() {
            return Err(FusionError::IncompleteRecord {
                source_id: raw.source_id.clone(),
                game_id: Some(outcome.game_id),
                field: missing,
            });
        }
        Ok(Ingested::Accepted(outcome.game_id))
    }

    /// Append one book's line, re-expressed from the game's home side. A
    /// moneyline strictly between -100 and +100 rejects the whole line.
    pub fn ingest_line(&self, raw: &RawMarketLine) -> Result<Ingested> {
        for (field, price) in [
            ("moneyline_home", raw.moneyline_home),
            ("moneyline_away", raw.moneyline_away),
        ] {
            if price.is_some_and(|p| !is_valid_american(p)) {
                return Err(FusionError::IncompleteRecord {
                    source_id: raw.book_id.clone(),
                    game_id: None,
                    field: field.to_string(),
                });
            }
        }
        let (home, away) =
            self.resolve_pair(&raw.book_id, &raw.raw_home_team, &raw.raw_away_team, raw.date, (None, None))?;
        let req = MatchRequest {
            source_id: &raw.book_id,
            home_team_id: &home,
            away_team_id: &away,
            date: raw.date,
            neutral_site: raw.neutral_site,
            start_time: raw.start_time,
            final_score: None,
        };
        let (slot, outcome) = match self.locate(&req) {
            Err(e @ FusionError::UnresolvedGameMatch { .. }) => {
                self.hold(PendingRecord::Line(raw.clone()));
                return Err(e);
            }
            other => other?,
        };

        let (moneyline_home, moneyline_away) = if outcome.flipped {
            (raw.moneyline_away, raw.moneyline_home)
        } else {
            (raw.moneyline_home, raw.moneyline_away)
        };
        let line = MarketLine {
            game_id: outcome.game_id.clone(),
            book_id: raw.book_id.clone(),
            spread_home: raw.spread_home.map(|s| outcome.orient(s)),
            total: raw.total,
            moneyline_home,
            moneyline_away,
            as_of: raw.as_of,
        };
        if lock(&slot).market.add(line) {
            Ok(Ingested::Accepted(outcome.game_id))
        } else {
            Ok(Ingested::Duplicate(outcome.game_id))
        }
    }

    /// Attach a final score. A second, different score marks the game
    /// conflicted and is returned as `ConflictingResult`.
    pub fn ingest_result(&self, raw: &RawResult) -> Result<Ingested> {
        let (home, away) =
            self.resolve_pair(&raw.source_id, &raw.raw_home_team, &raw.raw_away_team, raw.date, (None, None))?;
        let reported = FinalScore {
            home: raw.final_home_score,
            away: raw.final_away_score,
        };
        let req = MatchRequest {
            source_id: &raw.source_id,
            home_team_id: &home,
            away_team_id: &away,
            date: raw.date,
            neutral_site: raw.neutral_site,
            start_time: None,
            final_score: Some(reported),
        };
        let (slot, outcome) = match self.locate(&req) {
            Err(e @ FusionError::UnresolvedGameMatch { .. }) => {
                self.hold(PendingRecord::Result(raw.clone()));
                return Err(e);
            }
            other => other?,
        };
        if outcome.created.is_some() {
            return Ok(Ingested::Accepted(outcome.game_id));
        }

        let score = if outcome.flipped {
            FinalScore {
                home: reported.away,
                away: reported.home,
            }
        } else {
            reported
        };
        let mut agg = lock(&slot);
        match agg.game.final_score {
            None => {
                agg.game.final_score = Some(score);
                Ok(Ingested::Accepted(outcome.game_id))
            }
            Some(existing) if existing == score => Ok(Ingested::Duplicate(outcome.game_id)),
            Some(existing) => {
                agg.game.conflicted = true;
                Err(FusionError::ConflictingResult {
                    game_id: outcome.game_id,
                    existing_home: existing.home,
                    existing_away: existing.away,
                    reported_home: score.home,
                    reported_away: score.away,
                })
            }
        }
    }

    pub fn ingest_predictions(&self, records: &[RawPrediction]) -> IngestReport {
        let mut report = IngestReport::default();
        for (i, raw) in records.iter().enumerate() {
            report.record("prediction", i, self.ingest_prediction(raw));
        }
        report
    }

    pub fn ingest_lines(&self, records: &[RawMarketLine]) -> IngestReport {
        let mut report = IngestReport::default();
        for (i, raw) in records.iter().enumerate() {
            report.record("line", i, self.ingest_line(raw));
        }
        report
    }

    pub fn ingest_results(&self, records: &[RawResult]) -> IngestReport {
        let mut report = IngestReport::default();
        for (i, raw) in records.iter().enumerate() {
            report.record("result", i, self.ingest_result(raw));
        }
        report
    }

    /// Retry records held as ambiguous matches. Those still ambiguous go
    /// back into the queue.
    pub fn retry_unresolved(&self) -> IngestReport {
        let pending: Vec<PendingRecord> = std::mem::take(
            &mut *self.unresolved.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut report = IngestReport::default();
        for (i, record) in pending.iter().enumerate() {
            match record {
                PendingRecord::Prediction(raw) => report.record("prediction", i, self.ingest_prediction(raw)),
                PendingRecord::Line(raw) => report.record("line", i, self.ingest_line(raw)),
                PendingRecord::Result(raw) => report.record("result", i, self.ingest_result(raw)),
            }
        }
        if !pending.is_empty() {
            info!(
                "Retried {} unresolved records: {} accepted, {} still failing",
                pending.len(),
                report.accepted,
                report.errors.len()
            );
        }
        report
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register a game restored from storage.
    pub fn restore_game(&self, aggregate: GameAggregate) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.insert(aggregate);
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    fn slots(&self) -> Vec<Arc<Mutex<GameAggregate>>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.games.values().cloned().collect()
    }

    fn slot(&self, game_id: &str) -> Result<Arc<Mutex<GameAggregate>>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .games
            .get(game_id)
            .cloned()
            .ok_or_else(|| FusionError::UnknownGame(game_id.to_string()))
    }

    pub fn game(&self, game_id: &str) -> Result<Game> {
        let slot = self.slot(game_id)?;
        let game = lock(&slot).game.clone();
        Ok(game)
    }

    pub fn game_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .games
            .len()
    }

    /// Games on `date`, by start time then id.
    pub fn games_on(&self, date: NaiveDate) -> Vec<Game> {
        let mut games: Vec<Game> = self
            .slots()
            .iter()
            .map(|s| lock(s).game.clone())
            .filter(|g| g.date == date)
            .collect();
        games.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.game_id.cmp(&b.game_id)));
        games
    }

    /// Snapshot of every game in `[start, end]`, ordered by date, start time
    /// and id.
    pub fn timeline(&self, start: NaiveDate, end: NaiveDate) -> Vec<GameAggregate> {
        let mut games: Vec<GameAggregate> = self
            .slots()
            .iter()
            .map(|s| lock(s).clone())
            .filter(|a| a.game.date >= start && a.game.date <= end)
            .collect();
        games.sort_by(|a, b| {
            a.game
                .date
                .cmp(&b.game.date)
                .then_with(|| a.game.start_time.cmp(&b.game.start_time))
                .then_with(|| a.game.game_id.cmp(&b.game.game_id))
        });
        games
    }

    pub fn snapshot(&self) -> Vec<GameAggregate> {
        self.slots().iter().map(|s| lock(s).clone()).collect()
    }

    /// Edges for one game using the live accuracy context.
    pub fn compute_edges(
        &self,
        game_id: &str,
        as_of: DateTime<Utc>,
        sources: &[SourceId],
        thresholds: Thresholds,
    ) -> Result<EdgeReport> {
        let slot = self.slot(game_id)?;
        let agg = lock(&slot);
        let accuracy = self.ctx.accuracy();
        let inputs = EdgeInputs {
            game: &agg.game,
            predictions: &agg.predictions,
            market: &agg.market,
            accuracy: &accuracy,
        };
        Ok(compute_edges(&inputs, as_of, sources, thresholds, &self.cfg))
    }

    /// Qualifying edges for every game on `date`, ranked by confidence then
    /// absolute edge. Conflicted games contribute nothing.
    pub fn ranked_edges(
        &self,
        date: NaiveDate,
        min_edge: f64,
        sources: &[SourceId],
        as_of: DateTime<Utc>,
    ) -> Vec<EdgeRecord> {
        let thresholds = Thresholds {
            min_edge,
            min_moneyline_edge: self.cfg.min_moneyline_edge,
        };
        let mut edges = Vec::new();
        for game in self.games_on(date) {
            if game.conflicted {
                warn!("Skipping conflicted game {}", game.game_id);
                continue;
            }
            match self.compute_edges(&game.game_id, as_of, sources, thresholds) {
                Ok(report) => edges.extend(report.ranked),
                Err(e) => warn!("Edge computation failed for {}: {}", game.game_id, e),
            }
        }
        rank_edges(&mut edges);
        edges
    }

    pub fn consensus(&self, game_id: &str, as_of: DateTime<Utc>) -> Result<Option<ConsensusLine>> {
        let slot = self.slot(game_id)?;
        let agg = lock(&slot);
        Ok(agg.market.consensus(&agg.game.game_id, as_of))
    }

    pub fn market_summary(&self, game_id: &str, as_of: DateTime<Utc>) -> Result<MarketSummary> {
        let slot = self.slot(game_id)?;
        let agg = lock(&slot);
        let cutoff = as_of.min(last_instant_before(agg.game.start_time));
        Ok(MarketSummary {
            game_id: agg.game.game_id.clone(),
            consensus: agg.market.consensus(&agg.game.game_id, cutoff),
            movement: agg.market.movement(&agg.game.game_id, agg.game.start_time),
            best: agg.market.best_lines(cutoff),
        })
    }

    /// Refit the probability-to-margin slope from settled games, pairing each
    /// source's last pre-game margin with whether the home team won.
    pub fn calibrate_win_prob_slope(&self) -> Option<FitResult> {
        let mut samples = Vec::new();
        for agg in self.snapshot() {
            let Some(score) = agg.game.final_score else { continue };
            if agg.game.conflicted || score.home == score.away {
                continue;
            }
            let home_won = if score.home > score.away { 1.0 } else { 0.0 };
            let cutoff = last_instant_before(agg.game.start_time);
            let mut latest: HashMap<&str, &ModelPrediction> = HashMap::new();
            for p in agg.predictions.iter().filter(|p| p.as_of <= cutoff) {
                let slot = latest.entry(p.source_id.as_str()).or_insert(p);
                if p.as_of > slot.as_of {
                    *slot = p;
                }
            }
            samples.extend(latest.values().filter_map(|p| p.predicted_margin).map(|m| (m, home_won)));
        }
        let fit = fit_slope(&samples, WinProbCurve::new(self.cfg.win_prob_slope), 500, 0.5)?;
        info!(
            "Win-prob slope fit on {} samples: {:.4} → {:.4} (log-loss {:.4} → {:.4})",
            samples.len(),
            self.cfg.win_prob_slope,
            fit.curve.slope,
            fit.metrics.logloss_before,
            fit.metrics.logloss_after
        );
        Some(fit)
    }
}
