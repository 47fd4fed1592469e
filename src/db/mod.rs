use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub mod models;
use models::*;

use crate::fusion::GameAggregate;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Aliases ───────────────────────────────────────────────────────────────

    /// Upsert confirmed (source, raw name) → team mappings
    pub fn save_aliases<'a, I>(&self, aliases: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a SourceId, &'a String, &'a TeamId)>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut n = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO team_aliases (source_id, raw_name, team_id, confirmed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source_id, raw_name) DO UPDATE SET
                    team_id=excluded.team_id,
                    confirmed_at=excluded.confirmed_at
                 WHERE team_aliases.team_id != excluded.team_id",
            )?;
            let now = Utc::now();
            for (source_id, raw, team_id) in aliases {
                n += stmt.execute(params![source_id, raw, team_id, now])?;
            }
        }
        tx.commit()?;
        Ok(n)
    }

    pub fn load_aliases(&self) -> Result<Vec<(SourceId, String, TeamId)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT source_id, raw_name, team_id FROM team_aliases")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Games ─────────────────────────────────────────────────────────────────

    /// Persist a game with its predictions and lines. Records already stored
    /// under the same (source, as_of) key keep their raw values; only their
    /// home-side orientation follows the game.
    pub fn save_game_aggregate(&self, agg: &GameAggregate) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let g = &agg.game;
        tx.execute(
            "INSERT INTO games (
                game_id, date, home_team_id, away_team_id, venue, venue_stated,
                start_time, final_home_score, final_away_score, conflicted
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(game_id) DO UPDATE SET
                home_team_id=excluded.home_team_id,
                away_team_id=excluded.away_team_id,
                venue=excluded.venue,
                venue_stated=excluded.venue_stated,
                start_time=excluded.start_time,
                final_home_score=excluded.final_home_score,
                final_away_score=excluded.final_away_score,
                conflicted=excluded.conflicted",
            params![
                g.game_id,
                g.date,
                g.home_team_id,
                g.away_team_id,
                g.venue.as_str(),
                g.venue_stated,
                g.start_time,
                g.final_score.map(|s| s.home),
                g.final_score.map(|s| s.away),
                g.conflicted,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO predictions (
                    game_id, source_id, predicted_margin, predicted_total,
                    win_prob_home, rank_signal, missing_fields, as_of,
                    home_court, win_prob_stated
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                 ON CONFLICT(game_id, source_id, as_of) DO UPDATE SET
                    predicted_margin=excluded.predicted_margin,
                    win_prob_home=excluded.win_prob_home,
                    rank_signal=excluded.rank_signal,
                    home_court=excluded.home_court",
            )?;
            for p in &agg.predictions {
                stmt.execute(params![
                    p.game_id,
                    p.source_id,
                    p.predicted_margin,
                    p.predicted_total,
                    p.win_prob_home,
                    p.rank_signal,
                    serde_json::to_string(&p.missing_fields)?,
                    p.as_of,
                    p.home_court,
                    p.win_prob_stated,
                ])?;
            }
            let mut stmt = tx.prepare(
                "INSERT INTO market_lines (
                    game_id, book_id, spread_home, total,
                    moneyline_home, moneyline_away, as_of
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(game_id, book_id, as_of) DO UPDATE SET
                    spread_home=excluded.spread_home,
                    moneyline_home=excluded.moneyline_home,
                    moneyline_away=excluded.moneyline_away",
            )?;
            for l in agg.market.iter() {
                stmt.execute(params![
                    l.game_id,
                    l.book_id,
                    l.spread_home,
                    l.total,
                    l.moneyline_home,
                    l.moneyline_away,
                    l.as_of,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Rebuild every stored game with its predictions and lines
    pub fn load_aggregates(&self) -> Result<Vec<GameAggregate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT game_id, date, home_team_id, away_team_id, venue, venue_stated,
                    start_time, final_home_score, final_away_score, conflicted
             FROM games ORDER BY date, start_time, game_id",
        )?;
        let games = stmt
            .query_map([], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut predictions: HashMap<GameId, Vec<ModelPrediction>> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT game_id, source_id, predicted_margin, predicted_total,
                    win_prob_home, rank_signal, missing_fields, as_of,
                    home_court, win_prob_stated
             FROM predictions ORDER BY id",
        )?;
        for p in stmt.query_map([], map_prediction)? {
            let p = p?;
            predictions.entry(p.game_id.clone()).or_default().push(p);
        }

        let mut lines: HashMap<GameId, Vec<MarketLine>> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT game_id, book_id, spread_home, total, moneyline_home, moneyline_away, as_of
             FROM market_lines ORDER BY id",
        )?;
        for l in stmt.query_map([], map_market_line)? {
            let l = l?;
            lines.entry(l.game_id.clone()).or_default().push(l);
        }

        let aggregates = games
            .into_iter()
            .map(|game| {
                let mut agg = GameAggregate::new(game);
                for p in predictions.remove(&agg.game.game_id).unwrap_or_default() {
                    agg.add_prediction(p);
                }
                for l in lines.remove(&agg.game.game_id).unwrap_or_default() {
                    agg.market.add(l);
                }
                agg
            })
            .collect();
        Ok(aggregates)
    }

    /// Remove a game stored under an id it no longer carries
    pub fn drop_game(&self, game_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM predictions WHERE game_id = ?1", params![game_id])?;
        tx.execute("DELETE FROM market_lines WHERE game_id = ?1", params![game_id])?;
        tx.execute("DELETE FROM games WHERE game_id = ?1", params![game_id])?;
        tx.commit()?;
        Ok(())
    }

    // ── Backtests ─────────────────────────────────────────────────────────────

    /// Store a backtest run and its bets; returns the run id
    pub fn save_backtest_run(&self, run: &BacktestRun) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO backtest_runs (start_date, end_date, source_filter, min_edge_threshold, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                run.start_date,
                run.end_date,
                serde_json::to_string(&run.source_filter)?,
                run.min_edge_threshold,
                Utc::now(),
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO bet_outcomes (
                    run_id, game_id, date, source_id, edge_type, side,
                    edge_at_decision_time, line, price, cover_probability,
                    prediction_as_of, line_as_of, actual_margin_or_total,
                    won, push, units_won_lost
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            )?;
            for b in &run.results {
                stmt.execute(params![
                    run_id,
                    b.game_id,
                    b.date,
                    b.source_id,
                    b.edge_type.as_str(),
                    b.side.as_str(),
                    b.edge_at_decision_time,
                    b.line,
                    b.price,
                    b.cover_probability,
                    b.prediction_as_of,
                    b.line_as_of,
                    b.actual_margin_or_total,
                    b.won,
                    b.push,
                    b.units_won_lost,
                ])?;
            }
        }
        tx.commit()?;
        Ok(run_id)
    }

    pub fn load_backtest_run(&self, run_id: i64) -> Result<Option<BacktestRun>> {
        let conn = self.conn();
        let header = conn
            .query_row(
                "SELECT start_date, end_date, source_filter, min_edge_threshold
                 FROM backtest_runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, NaiveDate>(0)?,
                        row.get::<_, NaiveDate>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((start_date, end_date, filter, min_edge_threshold)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT game_id, date, source_id, edge_type, side,
                    edge_at_decision_time, line, price, cover_probability,
                    prediction_as_of, line_as_of, actual_margin_or_total,
                    won, push, units_won_lost
             FROM bet_outcomes WHERE run_id = ?1 ORDER BY id",
        )?;
        let results = stmt
            .query_map(params![run_id], map_bet_outcome)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(BacktestRun {
            start_date,
            end_date,
            source_filter: serde_json::from_str(&filter)?,
            min_edge_threshold,
            results,
        }))
    }

    /// Most recent settled, non-push bets as (source, won), oldest first;
    /// seeds the trailing accuracy table at startup. A bet replayed by several
    /// runs counts once, as recorded by the latest run.
    pub fn recent_source_results(&self, per_source: usize) -> Result<Vec<(SourceId, bool)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH latest AS (
                SELECT source_id, won, push, date, id,
                       ROW_NUMBER() OVER (
                           PARTITION BY game_id, source_id, edge_type
                           ORDER BY run_id DESC, id DESC
                       ) AS replay
                FROM bet_outcomes
             ), ranked AS (
                SELECT source_id, won, date, id,
                       ROW_NUMBER() OVER (PARTITION BY source_id ORDER BY date DESC, id DESC) AS rn
                FROM latest
                WHERE replay = 1 AND won IS NOT NULL AND push = 0
             )
             SELECT source_id, won FROM ranked WHERE rn <= ?1 ORDER BY date, id",
        )?;
        let rows = stmt
            .query_map(params![per_source as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn bad_value(col: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
    let venue: String = row.get(4)?;
    let home: Option<u32> = row.get(7)?;
    let away: Option<u32> = row.get(8)?;
    Ok(Game {
        game_id: row.get(0)?,
        date: row.get(1)?,
        home_team_id: row.get(2)?,
        away_team_id: row.get(3)?,
        venue: VenueType::parse(&venue),
        venue_stated: row.get(5)?,
        start_time: row.get(6)?,
        final_score: home.zip(away).map(|(home, away)| FinalScore { home, away }),
        conflicted: row.get(9)?,
    })
}

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<ModelPrediction> {
    let missing: String = row.get(6)?;
    Ok(ModelPrediction {
        game_id: row.get(0)?,
        source_id: row.get(1)?,
        predicted_margin: row.get(2)?,
        predicted_total: row.get(3)?,
        win_prob_home: row.get(4)?,
        rank_signal: row.get(5)?,
        missing_fields: serde_json::from_str(&missing)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        as_of: row.get(7)?,
        home_court: row.get(8)?,
        win_prob_stated: row.get(9)?,
    })
}

fn map_market_line(row: &rusqlite::Row) -> rusqlite::Result<MarketLine> {
    Ok(MarketLine {
        game_id: row.get(0)?,
        book_id: row.get(1)?,
        spread_home: row.get(2)?,
        total: row.get(3)?,
        moneyline_home: row.get(4)?,
        moneyline_away: row.get(5)?,
        as_of: row.get(6)?,
    })
}

fn map_bet_outcome(row: &rusqlite::Row) -> rusqlite::Result<BetOutcome> {
    let edge_type: String = row.get(3)?;
    let side: String = row.get(4)?;
    Ok(BetOutcome {
        game_id: row.get(0)?,
        date: row.get(1)?,
        source_id: row.get(2)?,
        edge_type: EdgeType::parse(&edge_type).ok_or_else(|| bad_value(3, edge_type.clone()))?,
        side: Direction::parse(&side).ok_or_else(|| bad_value(4, side.clone()))?,
        edge_at_decision_time: row.get(5)?,
        line: row.get(6)?,
        price: row.get(7)?,
        cover_probability: row.get(8)?,
        prediction_as_of: row.get(9)?,
        line_as_of: row.get(10)?,
        actual_margin_or_total: row.get(11)?,
        won: row.get(12)?,
        push: row.get(13)?,
        units_won_lost: row.get(14)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS team_aliases (
    source_id    TEXT NOT NULL,
    raw_name     TEXT NOT NULL,
    team_id      TEXT NOT NULL,
    confirmed_at TEXT NOT NULL,
    PRIMARY KEY (source_id, raw_name)
);

CREATE TABLE IF NOT EXISTS games (
    game_id          TEXT    PRIMARY KEY,
    date             TEXT    NOT NULL,
    home_team_id     TEXT    NOT NULL,
    away_team_id     TEXT    NOT NULL,
    venue            TEXT    NOT NULL DEFAULT 'home',
    venue_stated     INTEGER NOT NULL DEFAULT 0,
    start_time       TEXT    NOT NULL,
    final_home_score INTEGER,
    final_away_score INTEGER,
    conflicted       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS predictions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id          TEXT    NOT NULL,
    source_id        TEXT    NOT NULL,
    predicted_margin REAL,
    predicted_total  REAL,
    win_prob_home    REAL,
    rank_signal      REAL,
    missing_fields   TEXT    NOT NULL DEFAULT '[]',
    as_of            TEXT    NOT NULL,
    home_court       REAL    NOT NULL DEFAULT 0,
    win_prob_stated  INTEGER NOT NULL DEFAULT 0,
    UNIQUE (game_id, source_id, as_of),
    FOREIGN KEY (game_id) REFERENCES games(game_id)
);

CREATE TABLE IF NOT EXISTS market_lines (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id        TEXT    NOT NULL,
    book_id        TEXT    NOT NULL,
    spread_home    REAL,
    total          REAL,
    moneyline_home INTEGER,
    moneyline_away INTEGER,
    as_of          TEXT    NOT NULL,
    UNIQUE (game_id, book_id, as_of),
    FOREIGN KEY (game_id) REFERENCES games(game_id)
);

CREATE TABLE IF NOT EXISTS backtest_runs (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    start_date         TEXT    NOT NULL,
    end_date           TEXT    NOT NULL,
    source_filter      TEXT    NOT NULL DEFAULT '[]',
    min_edge_threshold REAL    NOT NULL,
    created_at         TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS bet_outcomes (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id                 INTEGER NOT NULL,
    game_id                TEXT    NOT NULL,
    date                   TEXT    NOT NULL,
    source_id              TEXT    NOT NULL,
    edge_type              TEXT    NOT NULL,
    side                   TEXT    NOT NULL,
    edge_at_decision_time  REAL    NOT NULL,
    line                   REAL    NOT NULL,
    price                  INTEGER NOT NULL,
    cover_probability      REAL    NOT NULL,
    prediction_as_of       TEXT    NOT NULL,
    line_as_of             TEXT    NOT NULL,
    actual_margin_or_total REAL,
    won                    INTEGER,
    push                   INTEGER NOT NULL DEFAULT 0,
    units_won_lost         REAL,
    FOREIGN KEY (run_id) REFERENCES backtest_runs(id)
);

CREATE INDEX IF NOT EXISTS idx_games_date ON games(date);
CREATE INDEX IF NOT EXISTS idx_predictions_game ON predictions(game_id);
CREATE INDEX IF NOT EXISTS idx_market_lines_game ON market_lines(game_id);
CREATE INDEX IF NOT EXISTS idx_bet_outcomes_run ON bet_outcomes(run_id);
CREATE INDEX IF NOT EXISTS idx_bet_outcomes_source ON bet_outcomes(source_id, date);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap()
    }

    fn aggregate() -> GameAggregate {
        let mut agg = GameAggregate::new(Game {
            game_id: "2025-01-04:duke:virginia".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
            home_team_id: "duke".into(),
            away_team_id: "virginia".into(),
            venue: VenueType::Home,
            venue_stated: true,
            start_time: ts(4, 17),
            final_score: Some(FinalScore { home: 75, away: 66 }),
            conflicted: false,
        });
        agg.add_prediction(ModelPrediction {
            game_id: agg.game.game_id.clone(),
            source_id: "kenpom".into(),
            predicted_margin: Some(11.28),
            predicted_total: Some(128.4),
            win_prob_home: Some(0.87),
            rank_signal: None,
            missing_fields: Vec::new(),
            as_of: ts(4, 9),
            home_court: 3.0,
            win_prob_stated: false,
        });
        agg.add_prediction(ModelPrediction {
            game_id: agg.game.game_id.clone(),
            source_id: "barttorvik".into(),
            predicted_margin: None,
            predicted_total: None,
            win_prob_home: None,
            rank_signal: None,
            missing_fields: vec!["home_adj_tempo".into()],
            as_of: ts(4, 8),
            home_court: 0.0,
            win_prob_stated: false,
        });
        agg.market.add(MarketLine {
            game_id: agg.game.game_id.clone(),
            book_id: "dk".into(),
            spread_home: Some(-6.5),
            total: Some(132.5),
            moneyline_home: Some(-280),
            moneyline_away: Some(230),
            as_of: ts(4, 10),
        });
        agg
    }

    #[test]
    fn game_aggregate_round_trips() {
        let db = Database::open(":memory:").unwrap();
        let agg = aggregate();
        db.save_game_aggregate(&agg).unwrap();
        // second save is a no-op for already stored records
        db.save_game_aggregate(&agg).unwrap();

        let loaded = db.load_aggregates().unwrap();
        assert_eq!(loaded.len(), 1);
        let back = &loaded[0];
        assert_eq!(back.game, agg.game);
        assert_eq!(back.predictions.len(), 2);
        assert!(back.predictions.iter().any(|p| p.is_incomplete()));
        assert_eq!(back.market.iter().count(), 1);
        assert_eq!(back.market.iter().next().unwrap().moneyline_away, Some(230));
    }

    #[test]
    fn final_score_update_is_persisted() {
        let db = Database::open(":memory:").unwrap();
        let mut agg = aggregate();
        agg.game.final_score = None;
        db.save_game_aggregate(&agg).unwrap();
        agg.game.final_score = Some(FinalScore { home: 70, away: 71 });
        agg.game.conflicted = true;
        db.save_game_aggregate(&agg).unwrap();
        let back = db.load_aggregates().unwrap().remove(0);
        assert_eq!(back.game.final_score, Some(FinalScore { home: 70, away: 71 }));
        assert!(back.game.conflicted);
    }

    #[test]
    fn aliases_upsert() {
        let db = Database::open(":memory:").unwrap();
        let (src, raw) = ("dratings".to_string(), "Miami (OH)".to_string());
        let id = "miami-oh".to_string();
        assert_eq!(db.save_aliases([(&src, &raw, &id)]).unwrap(), 1);
        assert_eq!(db.save_aliases([(&src, &raw, &id)]).unwrap(), 0);
        let loaded = db.load_aliases().unwrap();
        assert_eq!(loaded, vec![(src, raw, id)]);
    }

    #[test]
    fn re_keyed_game_replaces_its_stored_copy() {
        let db = Database::open(":memory:").unwrap();
        let mut agg = aggregate();
        db.save_game_aggregate(&agg).unwrap();

        let new_id = "2025-01-03:duke:virginia".to_string();
        agg.game.game_id = new_id.clone();
        agg.game.date = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        for p in &mut agg.predictions {
            p.game_id = new_id.clone();
        }
        agg.market.update_each(|l| l.game_id = new_id.clone());
        db.drop_game("2025-01-04:duke:virginia").unwrap();
        db.save_game_aggregate(&agg).unwrap();

        let loaded = db.load_aggregates().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].game.game_id, new_id);
        assert_eq!(loaded[0].predictions.len(), 2);
        assert_eq!(loaded[0].market.iter().count(), 1);
    }

    #[test]
    fn reoriented_records_overwrite_stored_values() {
        let db = Database::open(":memory:").unwrap();
        let mut agg = aggregate();
        db.save_game_aggregate(&agg).unwrap();
        agg.predictions[0].predicted_margin = Some(8.28);
        agg.predictions[0].home_court = 0.0;
        agg.market.update_each(|l| l.spread_home = Some(6.5));
        db.save_game_aggregate(&agg).unwrap();

        let back = db.load_aggregates().unwrap().remove(0);
        let kenpom = back.predictions.iter().find(|p| p.source_id == "kenpom").unwrap();
        assert_eq!(kenpom.predicted_margin, Some(8.28));
        assert_eq!(kenpom.home_court, 0.0);
        assert_eq!(back.market.iter().next().unwrap().spread_home, Some(6.5));
    }

    #[test]
    fn backtest_run_round_trips_and_seeds_accuracy() {
        let db = Database::open(":memory:").unwrap();
        let bet = |day: u32, source: &str, won: Option<bool>, push: bool| BetOutcome {
            game_id: format!("g{}", day),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            source_id: source.into(),
            edge_type: EdgeType::Spread,
            side: Direction::FavorsAway,
            edge_at_decision_time: -4.0,
            line: -5.5,
            price: -110,
            cover_probability: 0.6,
            prediction_as_of: ts(day, 8),
            line_as_of: ts(day, 9),
            actual_margin_or_total: Some(3.0),
            won,
            push,
            units_won_lost: Some(if push { 0.0 } else { 1.0 }),
        };
        let run = BacktestRun {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            source_filter: vec!["kenpom".into()],
            min_edge_threshold: 3.0,
            results: vec![
                bet(2, "kenpom", Some(true), false),
                bet(3, "kenpom", None, true),
                bet(4, "kenpom", Some(false), false),
                bet(5, "kenpom", Some(true), false),
            ],
        };
        let id = db.save_backtest_run(&run).unwrap();
        assert_eq!(db.load_backtest_run(id).unwrap(), Some(run));
        assert!(db.load_backtest_run(id + 1).unwrap().is_none());

        let recent = db.recent_source_results(2).unwrap();
        assert_eq!(
            recent,
            vec![("kenpom".to_string(), false), ("kenpom".to_string(), true)]
        );
    }

    #[test]
    fn replaying_a_range_does_not_double_count_results() {
        let db = Database::open(":memory:").unwrap();
        let bet = |day: u32, won: bool| BetOutcome {
            game_id: format!("g{}", day),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            source_id: "kenpom".into(),
            edge_type: EdgeType::Spread,
            side: Direction::FavorsHome,
            edge_at_decision_time: 4.0,
            line: -5.5,
            price: -110,
            cover_probability: 0.6,
            prediction_as_of: ts(day, 8),
            line_as_of: ts(day, 9),
            actual_margin_or_total: Some(7.0),
            won: Some(won),
            push: false,
            units_won_lost: Some(if won { 100.0 / 110.0 } else { -1.0 }),
        };
        let mut run = BacktestRun {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            source_filter: Vec::new(),
            min_edge_threshold: 3.0,
            results: vec![bet(2, true), bet(3, false), bet(4, true)],
        };
        db.save_backtest_run(&run).unwrap();
        // Same range again; the rerun now grades game 4 differently.
        run.results[2] = bet(4, false);
        db.save_backtest_run(&run).unwrap();

        let recent = db.recent_source_results(10).unwrap();
        let outcomes: Vec<bool> = recent.iter().map(|(_, won)| *won).collect();
        assert_eq!(outcomes, vec![true, false, false]);
    }
}
