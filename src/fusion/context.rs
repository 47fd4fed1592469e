//! Process-wide state shared by every ingestion path.
//!
//! Both tables are published as immutable `Arc` snapshots. Readers take a
//! snapshot and never hold the lock while working; writers are serialized by
//! the `RwLock`, copy the current snapshot, apply their change and publish a
//! new version.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use crate::db::models::{SourceId, TeamId};

/// Source id under which source-independent aliases are stored.
pub const GLOBAL_SOURCE: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    pub version: u64,
    /// (source id, trimmed raw name) → canonical team id
    entries: HashMap<(SourceId, String), TeamId>,
}

impl AliasTable {
    /// Source-specific entry first, then the global one.
    pub fn lookup(&self, raw_name: &str, source_id: &str) -> Option<&TeamId> {
        let raw = raw_name.trim().to_string();
        self.entries
            .get(&(source_id.to_string(), raw.clone()))
            .or_else(|| self.entries.get(&(GLOBAL_SOURCE.to_string(), raw)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(SourceId, String), &TeamId)> {
        self.entries.iter()
    }
}

/// Rolling record of settled, non-push bets per source.
#[derive(Debug, Clone, Default)]
pub struct AccuracyTable {
    pub version: u64,
    window: usize,
    per_source: HashMap<SourceId, VecDeque<bool>>,
}

impl AccuracyTable {
    pub fn new(window: usize) -> Self {
        AccuracyTable {
            version: 0,
            window: window.max(1),
            per_source: HashMap::new(),
        }
    }

    /// Append one decided bet, dropping the oldest beyond the window.
    pub fn push(&mut self, source_id: &str, won: bool) {
        let window = self.window;
        let record = self.per_source.entry(source_id.to_string()).or_default();
        record.push_back(won);
        while record.len() > window {
            record.pop_front();
        }
    }

    /// (wins, decided bets) over the trailing window.
    pub fn record(&self, source_id: &str) -> (usize, usize) {
        self.per_source
            .get(source_id)
            .map(|r| (r.iter().filter(|w| **w).count(), r.len()))
            .unwrap_or((0, 0))
    }

    /// Win rate shrunk toward 50% by `prior_games` pseudo-observations.
    pub fn shrunk_win_rate(&self, source_id: &str, prior_games: f64) -> f64 {
        let (wins, n) = self.record(source_id);
        (wins as f64 + 0.5 * prior_games) / (n as f64 + prior_games).max(f64::EPSILON)
    }
}

/// Explicitly passed, versioned context holding the alias table and the
/// trailing accuracy statistics.
pub struct FusionContext {
    aliases: RwLock<Arc<AliasTable>>,
    accuracy: RwLock<Arc<AccuracyTable>>,
}

impl FusionContext {
    pub fn new(trailing_window_games: usize) -> Self {
        FusionContext {
            aliases: RwLock::new(Arc::new(AliasTable::default())),
            accuracy: RwLock::new(Arc::new(AccuracyTable::new(trailing_window_games))),
        }
    }

    pub fn aliases(&self) -> Arc<AliasTable> {
        Arc::clone(&self.aliases.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn accuracy(&self) -> Arc<AccuracyTable> {
        Arc::clone(&self.accuracy.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Record a confirmed alias. Returns the new table version, or `None`
    /// when the mapping was already present.
    pub fn confirm_alias(&self, raw_name: &str, source_id: &str, team_id: &str) -> Option<u64> {
        let mut guard = self.aliases.write().unwrap_or_else(PoisonError::into_inner);
        let key = (source_id.to_string(), raw_name.trim().to_string());
        if guard.entries.get(&key).map(String::as_str) == Some(team_id) {
            return None;
        }
        let mut next = AliasTable::clone(&guard);
        next.entries.insert(key, team_id.to_string());
        next.version += 1;
        let version = next.version;
        *guard = Arc::new(next);
        Some(version)
    }

    /// Bulk-load aliases (e.g. from the database) as a single new version.
    pub fn load_aliases<I>(&self, aliases: I) -> u64
    where
        I: IntoIterator<Item = (SourceId, String, TeamId)>,
    {
        let mut guard = self.aliases.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = AliasTable::clone(&guard);
        for (source_id, raw, team_id) in aliases {
            next.entries.insert((source_id, raw.trim().to_string()), team_id);
        }
        next.version += 1;
        let version = next.version;
        *guard = Arc::new(next);
        version
    }

    /// Append settled (source, won) results as a single new version.
    pub fn record_results<'a, I>(&self, results: I) -> u64
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut guard = self.accuracy.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = AccuracyTable::clone(&guard);
        for (source_id, won) in results {
            next.push(source_id, won);
        }
        next.version += 1;
        let version = next.version;
        *guard = Arc::new(next);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn alias_lookup_prefers_source_specific_entry() {
        let ctx = FusionContext::new(10);
        ctx.load_aliases(vec![
            (GLOBAL_SOURCE.to_string(), "UNC".to_string(), "north-carolina".to_string()),
            ("oddsbook".to_string(), "UNC".to_string(), "unc-wilmington".to_string()),
        ]);
        let table = ctx.aliases();
        assert_eq!(table.lookup("UNC", "oddsbook").map(String::as_str), Some("unc-wilmington"));
        assert_eq!(table.lookup(" UNC ", "kenpom").map(String::as_str), Some("north-carolina"));
    }

    #[test]
    fn snapshots_are_stable_across_writes() {
        let ctx = FusionContext::new(10);
        let before = ctx.aliases();
        let v = ctx.confirm_alias("Dook", "trank", "duke");
        assert_eq!(v, Some(1));
        assert!(before.lookup("Dook", "trank").is_none());
        assert_eq!(ctx.aliases().lookup("Dook", "trank").map(String::as_str), Some("duke"));
        // Re-confirming the same mapping publishes nothing new.
        assert_eq!(ctx.confirm_alias("Dook", "trank", "duke"), None);
        assert_eq!(ctx.aliases().version, 1);
    }

    #[test]
    fn accuracy_window_drops_oldest_results() {
        let ctx = FusionContext::new(3);
        ctx.record_results(vec![("kenpom", false), ("kenpom", true), ("kenpom", true)]);
        ctx.record_results(vec![("kenpom", true)]);
        let acc = ctx.accuracy();
        assert_eq!(acc.record("kenpom"), (3, 3));
        assert_eq!(acc.version, 2);
    }

    #[test]
    fn shrunk_rate_starts_at_coin_flip() {
        let acc = AccuracyTable::new(100);
        assert_relative_eq!(acc.shrunk_win_rate("nobody", 10.0), 0.5, epsilon = 1e-12);
        let ctx = FusionContext::new(100);
        ctx.record_results((0..10).map(|_| ("hot", true)));
        let rate = ctx.accuracy().shrunk_win_rate("hot", 10.0);
        assert_relative_eq!(rate, 0.75, epsilon = 1e-12);
    }
}
