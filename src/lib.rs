//! Fuses college basketball predictions from heterogeneous rating sources
//! into one per-game view, compares them against sportsbook consensus, and
//! replays historical games to measure realized edge.

pub mod backtest;
pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod sources;
