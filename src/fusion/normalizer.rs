//! Conversion of native source predictions into common units.
//!
//! Every source declares a [`SourceSchema`]: how it expresses a prediction and
//! which of its payload keys hold each input. Normalization reads only the
//! declared keys; nothing is guessed at runtime and nothing is defaulted.
//! Outputs are always from the game's home-team perspective.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::db::models::{GameId, ModelPrediction, RawPrediction, SourceId, VenueType};
use crate::error::{FusionError, Result};

use super::calibration::WinProbCurve;

/// Inputs a schema can map to a native payload key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    /// Book convention: negative = record's home team favored
    Spread,
    Total,
    WinProbHome,
    WinProbAway,
    HomeAdjOe,
    HomeAdjDe,
    HomeTempo,
    AwayAdjOe,
    AwayAdjDe,
    AwayTempo,
    HomeRating,
    AwayRating,
    HomeRank,
    AwayRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Representation {
    /// A posted-style point spread
    Spread,
    /// Adjusted offensive/defensive efficiency per 100 possessions plus tempo
    EfficiencyMargin,
    WinProbability,
    /// Composite rating scale; one unit is worth `points_per_unit` points
    RatingDifferential { points_per_unit: f64 },
    /// Ordinal rank only; cannot produce a point margin
    CompositeRank,
}

impl Representation {
    /// Whether predictions of this kind can feed point-spread edges.
    pub fn yields_margin(&self) -> bool {
        !matches!(self, Representation::CompositeRank)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub representation: Representation,
    pub field_map: BTreeMap<CanonicalField, String>,
}

impl SourceSchema {
    pub fn new(representation: Representation) -> Self {
        SourceSchema {
            representation,
            field_map: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: CanonicalField, key: &str) -> Self {
        self.field_map.insert(field, key.to_string());
        self
    }

    /// Native key for a canonical field; unmapped fields use the snake-case
    /// canonical name.
    pub fn key(&self, field: CanonicalField) -> String {
        self.field_map
            .get(&field)
            .cloned()
            .unwrap_or_else(|| default_key(field).to_string())
    }

    pub fn spread() -> Self {
        SourceSchema::new(Representation::Spread)
            .with_field(CanonicalField::Spread, "predicted_spread")
            .with_field(CanonicalField::Total, "predicted_total")
            .with_field(CanonicalField::WinProbHome, "model_win_prob_home")
            .with_field(CanonicalField::WinProbAway, "model_win_prob_away")
    }

    pub fn efficiency() -> Self {
        SourceSchema::new(Representation::EfficiencyMargin)
    }

    pub fn win_probability() -> Self {
        SourceSchema::new(Representation::WinProbability)
    }

    pub fn rating(points_per_unit: f64) -> Self {
        SourceSchema::new(Representation::RatingDifferential { points_per_unit })
    }

    pub fn composite_rank() -> Self {
        SourceSchema::new(Representation::CompositeRank)
            .with_field(CanonicalField::HomeRank, "home_net_rank")
            .with_field(CanonicalField::AwayRank, "away_net_rank")
    }
}

fn default_key(field: CanonicalField) -> &'static str {
    use CanonicalField::*;
    match field {
        Spread => "spread",
        Total => "total",
        WinProbHome => "win_prob_home",
        WinProbAway => "win_prob_away",
        HomeAdjOe => "home_adj_oe",
        HomeAdjDe => "home_adj_de",
        HomeTempo => "home_adj_tempo",
        AwayAdjOe => "away_adj_oe",
        AwayAdjDe => "away_adj_de",
        AwayTempo => "away_adj_tempo",
        HomeRating => "home_rating",
        AwayRating => "away_rating",
        HomeRank => "home_rank",
        AwayRank => "away_rank",
    }
}

/// Declared schemas per source id.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<SourceId, SourceSchema>,
}

impl SchemaRegistry {
    /// Schemas for the providers the engine knows out of the box.
    pub fn with_defaults(points_per_rating_unit: f64) -> Self {
        let mut reg = SchemaRegistry::default();
        reg.register("dratings", SourceSchema::spread());
        for src in ["barttorvik", "trank", "kenpom", "haslametrics"] {
            reg.register(src, SourceSchema::efficiency());
        }
        reg.register("massey", SourceSchema::rating(points_per_rating_unit));
        reg.register("espn_bpi", SourceSchema::win_probability());
        for src in ["warren_nolan", "ncaa_net"] {
            reg.register(src, SourceSchema::composite_rank());
        }
        reg
    }

    pub fn register(&mut self, source_id: &str, schema: SourceSchema) {
        self.schemas.insert(source_id.to_string(), schema);
    }

    pub fn get(&self, source_id: &str) -> Result<&SourceSchema> {
        self.schemas
            .get(source_id)
            .ok_or_else(|| FusionError::UnknownSource(source_id.to_string()))
    }
}

/// Reads declared fields out of a raw payload, remembering which were absent.
struct FieldReader<'a> {
    raw: &'a RawPrediction,
    schema: &'a SourceSchema,
    missing: Vec<String>,
}

impl<'a> FieldReader<'a> {
    fn optional(&self, field: CanonicalField) -> Option<f64> {
        self.raw
            .fields
            .get(&self.schema.key(field))
            .copied()
            .filter(|v| v.is_finite())
    }

    /// A probability field; values outside [0, 1] are treated as absent.
    fn probability(&self, field: CanonicalField) -> Option<f64> {
        self.optional(field).filter(|p| (0.0..=1.0).contains(p))
    }

    fn required(&mut self, field: CanonicalField) -> Option<f64> {
        let value = self.optional(field);
        if value.is_none() {
            self.missing.push(self.schema.key(field));
        }
        value
    }
}

/// Convert a raw prediction into common units.
///
/// `flipped` means the record's home team is the game's away team. Missing
/// required inputs are listed in `missing_fields` and the affected values are
/// left empty.
pub fn normalize(
    raw: &RawPrediction,
    game_id: &GameId,
    schema: &SourceSchema,
    venue: VenueType,
    flipped: bool,
    cfg: &EngineConfig,
) -> ModelPrediction {
    use CanonicalField::*;

    let curve = WinProbCurve::new(cfg.win_prob_slope);
    let home_court = match venue {
        VenueType::Home => cfg.home_court_constant,
        VenueType::Neutral => 0.0,
    };
    let orient = |v: f64| if flipped { -v } else { v };

    let mut r = FieldReader {
        raw,
        schema,
        missing: Vec::new(),
    };

    // Record-perspective home win probability, if the source states one.
    let stated_prob = r
        .probability(WinProbHome)
        .or_else(|| r.probability(WinProbAway).map(|away| 1.0 - away));

    let mut margin = None;
    let mut total = r.optional(Total);
    let mut rank_signal = None;
    let mut applied_home_court = 0.0;

    match schema.representation {
        Representation::Spread => {
            // Spread already carries the venue; only the sign flips.
            margin = r.required(Spread).map(|s| orient(spread_to_margin(s)));
        }
        Representation::EfficiencyMargin => {
            let inputs = [
                r.required(HomeAdjOe),
                r.required(HomeAdjDe),
                r.required(HomeTempo),
                r.required(AwayAdjOe),
                r.required(AwayAdjDe),
                r.required(AwayTempo),
            ];
            if let [Some(h_oe), Some(h_de), Some(h_tempo), Some(a_oe), Some(a_de), Some(a_tempo)] =
                inputs
            {
                let pace = (h_tempo + a_tempo) / 2.0;
                let neutral = ((h_oe - h_de) - (a_oe - a_de)) * pace / 100.0;
                margin = Some(orient(neutral) + home_court);
                applied_home_court = home_court;
                total = total.or(Some(
                    ((h_oe + a_de) / 2.0 + (a_oe + h_de) / 2.0) * pace / 100.0,
                ));
            }
        }
        Representation::WinProbability => {
            // A percent-scaled or otherwise out-of-range value counts as missing.
            if stated_prob.is_none() {
                r.missing.push(schema.key(WinProbHome));
            }
            margin = stated_prob.map(|p| orient(curve.prob_to_margin(p)));
        }
        Representation::RatingDifferential { points_per_unit } => {
            let home = r.required(HomeRating);
            let away = r.required(AwayRating);
            if let (Some(h), Some(a)) = (home, away) {
                margin = Some(orient((h - a) * points_per_unit) + home_court);
                applied_home_court = home_court;
            }
        }
        Representation::CompositeRank => {
            let home = r.required(HomeRank);
            let away = r.required(AwayRank);
            if let (Some(h), Some(a)) = (home, away) {
                // Lower rank is better: positive favors the home side.
                rank_signal = Some(orient(a - h));
            }
        }
    }

    let win_prob_home = match (stated_prob, margin) {
        (Some(p), _) if flipped => Some(1.0 - p),
        (Some(p), _) => Some(p),
        (None, Some(m)) => Some(curve.margin_to_prob(m)),
        (None, None) => None,
    };

    ModelPrediction {
        game_id: game_id.clone(),
        source_id: raw.source_id.clone(),
        predicted_margin: margin,
        predicted_total: total,
        win_prob_home,
        rank_signal,
        missing_fields: r.missing,
        as_of: raw.as_of,
        home_court: applied_home_court,
        win_prob_stated: stated_prob.is_some(),
    }
}

/// Take the home-court points back out of a prediction normalized before the
/// game was known to be at a neutral site.
pub fn remove_home_court(p: &mut ModelPrediction, curve: &WinProbCurve) {
    if p.home_court == 0.0 {
        return;
    }
    if let Some(m) = p.predicted_margin.as_mut() {
        *m -= p.home_court;
    }
    p.home_court = 0.0;
    if !p.win_prob_stated {
        p.win_prob_home = p.predicted_margin.map(|m| curve.margin_to_prob(m));
    }
}

/// Re-express a prediction after the game's home and away sides swap. The
/// home-court points move to the new host.
pub fn swap_sides(p: &mut ModelPrediction, curve: &WinProbCurve) {
    if let Some(m) = p.predicted_margin.as_mut() {
        *m = 2.0 * p.home_court - *m;
    }
    if let Some(s) = p.rank_signal.as_mut() {
        *s = -*s;
    }
    p.win_prob_home = if p.win_prob_stated {
        p.win_prob_home.map(|q| 1.0 - q)
    } else {
        p.predicted_margin.map(|m| curve.margin_to_prob(m))
    };
}

/// Home-perspective margin from a book-convention spread (negative = home
/// favored): a -4.5 home favorite is a +4.5 margin.
pub fn spread_to_margin(spread_home: f64) -> f64 {
    -spread_home
}

/// Inverse of [`spread_to_margin`].
pub fn margin_to_spread(margin: f64) -> f64 {
    -margin
}
