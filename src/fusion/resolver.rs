//! Team identity resolution.
//!
//! Resolution order:
//!   1. exact alias-table hit (source-specific, then global)
//!   2. normalized exact match against canonical names, name+mascot and
//!      registered aliases, retried with a trailing mascot stripped
//!   3. fuzzy token-sort similarity above the configured threshold
//!
//! Steps 2 and 3 may produce several candidates; conference and season
//! context narrows them. Anything still ambiguous or below threshold is an
//! error, never a guess. Mappings confirmed without context are written back
//! to the alias table so the next lookup is a step-1 hit.

use std::collections::{BTreeSet, HashMap};

use strsim::normalized_levenshtein;
use tracing::debug;

use crate::db::models::TeamId;
use crate::error::{FusionError, Result};

use super::context::FusionContext;
use super::teams::{canonical_conference, TeamRegistry};

/// Optional hints that can break a tie between candidates.
#[derive(Debug, Clone, Default)]
pub struct ResolveHint {
    pub conference: Option<String>,
    /// Season label, e.g. 2025 for the 2024-25 season
    pub season: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionMethod {
    Alias,
    Normalized,
    Fuzzy { score: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub team_id: TeamId,
    pub method: ResolutionMethod,
    /// True when conference/season context was needed to decide.
    pub used_context: bool,
}

pub struct TeamResolver {
    registry: TeamRegistry,
    /// normalized key → candidate team ids
    index: HashMap<String, BTreeSet<TeamId>>,
    fuzzy_threshold: f64,
    tie_epsilon: f64,
}

impl TeamResolver {
    pub fn new(registry: TeamRegistry, fuzzy_threshold: f64, tie_epsilon: f64) -> Self {
        let mut resolver = TeamResolver {
            registry,
            index: HashMap::new(),
            fuzzy_threshold,
            tie_epsilon,
        };
        resolver.build_index();
        resolver
    }

    fn build_index(&mut self) {
        let mut index: HashMap<String, BTreeSet<TeamId>> = HashMap::new();
        for team in self.registry.iter() {
            let mut keys = vec![
                normalize_name(team.name),
                normalize_name(&format!("{} {}", team.name, team.mascot)),
            ];
            keys.extend(team.aliases.iter().map(|a| normalize_name(a)));
            for key in keys.into_iter().filter(|k| !k.is_empty()) {
                index.entry(key).or_default().insert(team.id.to_string());
            }
        }
        self.index = index;
    }

    pub fn registry(&self) -> &TeamRegistry {
        &self.registry
    }

    /// Resolve a raw team name from `source_id` to a canonical id.
    pub fn resolve(
        &self,
        ctx: &FusionContext,
        raw_name: &str,
        source_id: &str,
        hint: &ResolveHint,
    ) -> Result<Resolution> {
        if let Some(team_id) = ctx.aliases().lookup(raw_name, source_id) {
            return Ok(Resolution {
                team_id: team_id.clone(),
                method: ResolutionMethod::Alias,
                used_context: false,
            });
        }

        let normalized = normalize_name(raw_name);
        let stripped = self.strip_mascot(&normalized);

        let (candidates, method, score) = match self.normalized_candidates(&normalized, &stripped) {
            Some(c) => (c, ResolutionMethod::Normalized, 1.0),
            None => {
                let (c, score) = self.fuzzy_candidates(&normalized, &stripped);
                if c.is_empty() {
                    return Err(FusionError::UnknownTeam {
                        raw_name: raw_name.to_string(),
                        source_id: source_id.to_string(),
                        best_score: score,
                    });
                }
                (c, ResolutionMethod::Fuzzy { score }, score)
            }
        };

        let (team_id, used_context) =
            self.disambiguate(candidates, raw_name, source_id, hint, score)?;

        if !used_context {
            if let Some(version) = ctx.confirm_alias(raw_name, source_id, &team_id) {
                debug!(
                    "Alias confirmed: '{}' ({}) → {} [{:?}, table v{}]",
                    raw_name, source_id, team_id, method, version
                );
            }
        }

        Ok(Resolution {
            team_id,
            method,
            used_context,
        })
    }

    fn normalized_candidates(&self, normalized: &str, stripped: &str) -> Option<Vec<TeamId>> {
        [normalized, stripped]
            .iter()
            .filter(|k| !k.is_empty())
            .find_map(|k| self.index.get(*k))
            .map(|set| set.iter().cloned().collect())
    }

    /// Team ids whose best key similarity is within `tie_epsilon` of the
    /// overall best, provided the best clears the threshold. Also returns the
    /// best score seen.
    fn fuzzy_candidates(&self, normalized: &str, stripped: &str) -> (Vec<TeamId>, f64) {
        let query_keys: Vec<&str> = [normalized, stripped]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();

        let mut best_by_team: HashMap<&TeamId, f64> = HashMap::new();
        for (key, ids) in &self.index {
            let score = query_keys
                .iter()
                .map(|p| token_sort_ratio(p, key))
                .fold(0.0f64, f64::max);
            for id in ids {
                let entry = best_by_team.entry(id).or_insert(0.0);
                if score > *entry {
                    *entry = score;
                }
            }
        }

        let best = best_by_team.values().copied().fold(0.0f64, f64::max);
        if best < self.fuzzy_threshold {
            return (Vec::new(), best);
        }
        let mut ids: Vec<TeamId> = best_by_team
            .into_iter()
            .filter(|(_, s)| best - *s <= self.tie_epsilon)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        (ids, best)
    }

    fn disambiguate(
        &self,
        candidates: Vec<TeamId>,
        raw_name: &str,
        source_id: &str,
        hint: &ResolveHint,
        best_score: f64,
    ) -> Result<(TeamId, bool)> {
        let mut narrowed = candidates.clone();

        // A program cannot play a game before it joined Division I.
        if let Some(season) = hint.season {
            narrowed.retain(|id| {
                self.registry
                    .get(id)
                    .map(|t| t.first_season <= season)
                    .unwrap_or(false)
            });
            if narrowed.is_empty() {
                return Err(FusionError::UnknownTeam {
                    raw_name: raw_name.to_string(),
                    source_id: source_id.to_string(),
                    best_score,
                });
            }
        }

        if narrowed.len() > 1 {
            if let Some(conf) = hint.conference.as_deref() {
                let want = canonical_conference(conf);
                let in_conf: Vec<TeamId> = narrowed
                    .iter()
                    .filter(|id| {
                        self.registry
                            .get(id)
                            .map(|t| canonical_conference(t.conference) == want)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                if !in_conf.is_empty() {
                    narrowed = in_conf;
                }
            }
        }

        if narrowed.len() == 1 {
            let used_context = candidates.len() > 1;
            return Ok((narrowed.swap_remove(0), used_context));
        }

        Err(FusionError::AmbiguousAlias {
            raw_name: raw_name.to_string(),
            source_id: source_id.to_string(),
            candidates: narrowed,
        })
    }

    /// Drop a trailing mascot ("duke blue devils" → "duke"), keeping the name
    /// when nothing would remain.
    fn strip_mascot(&self, normalized: &str) -> String {
        for mascot in self.registry.mascots() {
            let suffix = format!(" {}", normalize_name(mascot));
            if let Some(rest) = normalized.strip_suffix(suffix.as_str()) {
                if !rest.trim().is_empty() {
                    return rest.trim().to_string();
                }
            }
        }
        normalized.to_string()
    }
}

/// Case, diacritic and punctuation insensitive form of a team name.
/// A leading "st" becomes "saint", any other "st" becomes "state".
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '\'' && *c != '\u{2019}' && *c != '.')
        .map(fold_diacritic)
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .enumerate()
        .map(|(i, tok)| match (i, tok) {
            (0, "st") => "saint",
            (_, "st") => "state",
            (_, "univ") | (_, "university") => "",
            (_, t) => t,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        _ => c,
    }
}

/// Similarity of two strings after sorting their tokens, in [0, 1].
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fn sorted(s: &str) -> String {
        let mut toks: Vec<&str> = s.split_whitespace().collect();
        toks.sort_unstable();
        toks.join(" ")
    }
    normalized_levenshtein(&sorted(a), &sorted(b))
}
