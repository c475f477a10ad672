//! Narrow interface to the remote statistics API.
//!
//! Every operation takes an explicit per-attempt timeout so the retry layer can
//! bound each call without knowing which endpoint it wraps.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::entities::{EntityId, Player, Team};

pub mod nba;

/// One row of a result set, keyed by column header.
pub type StatRow = Map<String, Value>;

/// A normalized API response: result-set name to rows.
pub type StatTables = BTreeMap<String, Vec<StatRow>>;

/// Stat categories collected for league leader boards.
pub const LEADER_CATEGORIES: &[&str] = &[
    "PTS", "REB", "AST", "STL", "BLK", "FG_PCT", "FT_PCT", "FG3_PCT",
];

/// Fetch-by-id access to the statistics API.
pub trait StatsSource: Send + Sync {
    /// Every player known to the API.
    fn all_players(&self, timeout: Duration) -> Result<Vec<Player>>;

    /// Every current franchise.
    fn all_teams(&self) -> Vec<Team>;

    /// Biographical info for one player.
    fn player_info(&self, player_id: EntityId, timeout: Duration) -> Result<StatTables>;

    /// Season-by-season and career totals for one player.
    fn player_career_stats(&self, player_id: EntityId, timeout: Duration) -> Result<StatTables>;

    /// Background, arena and ownership details for one team.
    fn team_details(&self, team_id: EntityId, timeout: Duration) -> Result<StatTables>;

    /// Year-by-year records for one team.
    fn team_history(&self, team_id: EntityId, timeout: Duration) -> Result<StatTables>;

    /// League standings for a season such as `2023-24`.
    fn standings(&self, season: &str, timeout: Duration) -> Result<StatTables>;

    /// Per-game leaders for one stat category in a season.
    fn league_leaders(&self, season: &str, stat: &str, timeout: Duration) -> Result<StatTables>;

    /// Scoreboard `day_offset` days from today.
    fn scoreboard(&self, day_offset: i64, timeout: Duration) -> Result<StatTables>;

    /// Traditional box score for one game.
    fn box_score(&self, game_id: &str, timeout: Duration) -> Result<StatTables>;
}

/// First row of a named result set, if present.
pub fn first_row<'a>(tables: &'a StatTables, name: &str) -> Option<&'a StatRow> {
    tables.get(name).and_then(|rows| rows.first())
}

/// Rows of a named result set, empty when absent.
pub fn rows<'a>(tables: &'a StatTables, name: &str) -> &'a [StatRow] {
    tables.get(name).map(Vec::as_slice).unwrap_or(&[])
}
