//! Resumable collection of raw statistics into per-entity JSON records.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cache::FetchCache;
use crate::checkpoint::{collected_ids, read_json, record_path, write_json_atomic};
use crate::driver::{BulkDriver, BulkOutcome, CircuitBreakerConfig};
use crate::entities::{Entity, EntityId, EntityKind, Player, Team};
use crate::retry::RetryPolicy;
use crate::stats::{rows, StatTables, StatsSource, LEADER_CATEGORIES};

/// Player reference list.
pub const ALL_PLAYERS_FILE: &str = "all_players.json";
/// Team reference list.
pub const ALL_TEAMS_FILE: &str = "all_teams.json";
/// Scoreboard plus box scores.
pub const RECENT_GAMES_FILE: &str = "recent_games.json";

/// Days of scoreboard history pulled by a default collection run.
pub const DEFAULT_RECENT_DAYS: i64 = 30;

/// Record written for one player once both sub-fetches succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Reference row the record was collected for.
    pub player: Player,
    /// Biographical result sets.
    pub info: StatTables,
    /// Season and career totals.
    pub career_stats: StatTables,
}

/// Record written for one team once both sub-fetches succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    /// Reference row the record was collected for.
    pub team: Team,
    /// Background, arena and ownership.
    pub details: StatTables,
    /// Year-by-year records.
    pub history: StatTables,
}

/// Standings and per-category leaders for one season.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueRecord {
    /// Season such as `2023-24`.
    pub season: String,
    /// Standings result sets.
    pub standings: StatTables,
    /// Leader boards keyed by stat category.
    pub leaders: BTreeMap<String, StatTables>,
}

/// Scoreboard plus the box scores that could be fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentGamesRecord {
    /// Scoreboard result sets.
    pub games: StatTables,
    /// Box scores keyed by game id.
    pub details: BTreeMap<String, StatTables>,
}

/// File name of the league record for `season`.
pub fn league_file_name(season: &str) -> String {
    format!("league_{season}.json")
}

/// Which sub-collections a run performs.
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    /// Collect per-player records.
    pub players: bool,
    /// Collect per-team records.
    pub teams: bool,
    /// Collect league standings and leaders.
    pub league: bool,
    /// Collect recent games.
    pub games: bool,
    /// Only the first `n` players of the reference list.
    pub player_limit: Option<usize>,
    /// Seasons for league collection.
    pub seasons: Vec<String>,
    /// Days of scoreboard to look back over.
    pub recent_days: i64,
    /// Worker pool shared by player and team collection.
    pub driver: BulkDriver,
    /// Breaker for player collection.
    pub player_breaker: CircuitBreakerConfig,
    /// Breaker for team collection.
    pub team_breaker: CircuitBreakerConfig,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            players: true,
            teams: true,
            league: true,
            games: true,
            player_limit: None,
            seasons: vec!["2023-24".to_string()],
            recent_days: DEFAULT_RECENT_DAYS,
            driver: BulkDriver::default(),
            player_breaker: CircuitBreakerConfig::PLAYERS,
            team_breaker: CircuitBreakerConfig::TEAMS,
        }
    }
}

/// Fetches through cache and retry, and checkpoints results under `raw_dir`.
pub struct Collector<S> {
    source: S,
    cache: FetchCache,
    retry: RetryPolicy,
    raw_dir: PathBuf,
}

impl<S: StatsSource> Collector<S> {
    /// Wraps `source` with `cache` and `retry`, checkpointing under `raw_dir`.
    pub fn new(source: S, cache: FetchCache, retry: RetryPolicy, raw_dir: PathBuf) -> Self {
        Self {
            source,
            cache,
            retry,
            raw_dir,
        }
    }

    /// Directory collected records are written to.
    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Underlying stats source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Player reference list, reusing `all_players.json` when present.
    pub fn collect_all_players(&self) -> Result<Vec<Player>> {
        let path = self.raw_dir.join(ALL_PLAYERS_FILE);
        if path.exists() {
            match read_json::<Vec<Player>>(&path) {
                Ok(players) => {
                    info!(count = players.len(), "reusing player reference list");
                    return Ok(players);
                }
                Err(err) => warn!("ignoring unreadable player list: {err:#}"),
            }
        }
        info!("collecting all players");
        let players = self
            .retry
            .call("all players", |timeout| self.source.all_players(timeout))?;
        write_json_atomic(&path, &players)?;
        info!(count = players.len(), "collected player reference list");
        Ok(players)
    }

    /// Team reference list from the static franchise table.
    pub fn collect_all_teams(&self) -> Result<Vec<Team>> {
        let teams = self.source.all_teams();
        write_json_atomic(&self.raw_dir.join(ALL_TEAMS_FILE), &teams)?;
        info!(count = teams.len(), "collected team reference list");
        Ok(teams)
    }

    /// Biographical info for one player.
    pub fn collect_player_info(&self, player_id: EntityId) -> Result<StatTables> {
        self.fetch(&format!("player_info_{player_id}"), |timeout| {
            self.source.player_info(player_id, timeout)
        })
    }

    /// Career totals for one player.
    pub fn collect_player_career_stats(&self, player_id: EntityId) -> Result<StatTables> {
        self.fetch(&format!("player_career_{player_id}"), |timeout| {
            self.source.player_career_stats(player_id, timeout)
        })
    }

    /// Background details for one team.
    pub fn collect_team_details(&self, team_id: EntityId) -> Result<StatTables> {
        self.fetch(&format!("team_details_{team_id}"), |timeout| {
            self.source.team_details(team_id, timeout)
        })
    }

    /// Year-by-year history for one team.
    pub fn collect_team_history(&self, team_id: EntityId) -> Result<StatTables> {
        self.fetch(&format!("team_history_{team_id}"), |timeout| {
            self.source.team_history(team_id, timeout)
        })
    }

    /// Standings for `season`.
    pub fn collect_standings(&self, season: &str) -> Result<StatTables> {
        self.fetch(&format!("standings_{season}"), |timeout| {
            self.source.standings(season, timeout)
        })
    }

    /// Leader board for `stat` in `season`.
    pub fn collect_league_leaders(&self, season: &str, stat: &str) -> Result<StatTables> {
        self.fetch(&format!("league_leaders_{season}_{stat}"), |timeout| {
            self.source.league_leaders(season, stat, timeout)
        })
    }

    /// Scoreboard covering `days` back from today.
    pub fn collect_recent_games(&self, days: i64) -> Result<StatTables> {
        self.fetch(&format!("recent_games_{days}"), |timeout| {
            self.source.scoreboard(-days, timeout)
        })
    }

    /// Box score for one game.
    pub fn collect_game_details(&self, game_id: &str) -> Result<StatTables> {
        self.fetch(&format!("game_details_{game_id}"), |timeout| {
            self.source.box_score(game_id, timeout)
        })
    }

    /// Collects every player not yet checkpointed.
    pub fn collect_data_for_all_players(
        &self,
        limit: Option<usize>,
        driver: &BulkDriver,
    ) -> Result<BulkOutcome> {
        let mut players = self.collect_all_players()?;
        if let Some(limit) = limit {
            players.truncate(limit);
        }
        let pending = self.pending(players);
        Ok(driver.run(pending, |player| self.collect_one_player(player)))
    }

    /// Collects every team not yet checkpointed.
    pub fn collect_data_for_all_teams(&self, driver: &BulkDriver) -> Result<BulkOutcome> {
        let teams = self.collect_all_teams()?;
        let pending = self.pending(teams);
        Ok(driver.run(pending, |team| self.collect_one_team(team)))
    }

    /// Standings and leaders per season; a failing season is skipped.
    pub fn collect_league_data(&self, seasons: &[String]) -> usize {
        let mut written = 0;
        for season in seasons {
            match self.collect_one_season(season) {
                Ok(()) => {
                    info!(%season, "collected league data");
                    written += 1;
                }
                Err(err) => error!(%season, "error collecting league data: {err:#}"),
            }
        }
        written
    }

    /// Scoreboard plus per-game box scores; failing games are omitted.
    pub fn collect_recent_game_data(&self, days_back: i64) -> Result<usize> {
        let games = self.collect_recent_games(days_back)?;
        let game_ids: Vec<String> = rows(&games, "GameHeader")
            .iter()
            .filter_map(|row| row.get("GAME_ID").and_then(|id| id.as_str()))
            .map(str::to_string)
            .collect();

        let mut details = BTreeMap::new();
        for game_id in &game_ids {
            match self.collect_game_details(game_id) {
                Ok(tables) => {
                    details.insert(game_id.clone(), tables);
                }
                Err(err) => error!(%game_id, "error collecting game details: {err:#}"),
            }
        }

        let record = RecentGamesRecord { games, details };
        write_json_atomic(&self.raw_dir.join(RECENT_GAMES_FILE), &record)?;
        info!(games = game_ids.len(), "collected recent games");
        Ok(game_ids.len())
    }

    /// Runs the enabled sub-collections in order: players, teams, league, games.
    pub fn run_collection(&self, options: &CollectionOptions) -> Result<()> {
        let started = Instant::now();
        info!(raw_dir = %self.raw_dir.display(), "starting collection");
        std::fs::create_dir_all(&self.raw_dir)
            .with_context(|| format!("failed to create {:?}", self.raw_dir))?;

        if options.players {
            let driver = options.driver.with_breaker(options.player_breaker);
            let outcome = self.collect_data_for_all_players(options.player_limit, &driver)?;
            info!(?outcome, "player collection done");
        }
        if options.teams {
            let driver = options.driver.with_breaker(options.team_breaker);
            let outcome = self.collect_data_for_all_teams(&driver)?;
            info!(?outcome, "team collection done");
        }
        if options.league {
            self.collect_league_data(&options.seasons);
        }
        if options.games {
            if let Err(err) = self.collect_recent_game_data(options.recent_days) {
                error!("error collecting recent game data: {err:#}");
            }
        }

        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            "collection completed"
        );
        Ok(())
    }

    fn fetch<F>(&self, key: &str, op: F) -> Result<StatTables>
    where
        F: FnMut(Duration) -> Result<StatTables>,
    {
        self.cache.get_or_fetch(key, || self.retry.call(key, op))
    }

    fn pending<E: Entity>(&self, entities: Vec<E>) -> Vec<E> {
        let done: HashSet<EntityId> = collected_ids(&self.raw_dir, E::KIND);
        let total = entities.len();
        let pending: Vec<E> = entities
            .into_iter()
            .filter(|entity| !done.contains(&entity.id()))
            .collect();
        info!(
            kind = %E::KIND,
            total,
            already_collected = total - pending.len(),
            remaining = pending.len(),
            "resuming collection"
        );
        pending
    }

    fn collect_one_player(&self, player: &Player) -> Result<()> {
        let result = (|| {
            let info = self.collect_player_info(player.id)?;
            let career_stats = self.collect_player_career_stats(player.id)?;
            let record = PlayerRecord {
                player: player.clone(),
                info,
                career_stats,
            };
            write_json_atomic(&record_path(&self.raw_dir, EntityKind::Player, player.id), &record)
        })();
        if let Err(err) = &result {
            error!(player_id = player.id, name = %player.full_name, "error collecting player: {err:#}");
        }
        result
    }

    fn collect_one_team(&self, team: &Team) -> Result<()> {
        let result = (|| {
            let details = self.collect_team_details(team.id)?;
            let history = self.collect_team_history(team.id)?;
            let record = TeamRecord {
                team: team.clone(),
                details,
                history,
            };
            write_json_atomic(&record_path(&self.raw_dir, EntityKind::Team, team.id), &record)
        })();
        if let Err(err) = &result {
            error!(team_id = team.id, name = %team.full_name, "error collecting team: {err:#}");
        }
        result
    }

    fn collect_one_season(&self, season: &str) -> Result<()> {
        let standings = self.collect_standings(season)?;
        let mut leaders = BTreeMap::new();
        for stat in LEADER_CATEGORIES {
            leaders.insert(stat.to_string(), self.collect_league_leaders(season, stat)?);
        }
        let record = LeagueRecord {
            season: season.to_string(),
            standings,
            leaders,
        };
        write_json_atomic(&self.raw_dir.join(league_file_name(season)), &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedSource {
        calls: AtomicUsize,
        broken_games: Vec<&'static str>,
    }

    fn table(name: &str, row: serde_json::Value) -> StatTables {
        let mut tables = StatTables::new();
        let row = row.as_object().cloned().unwrap_or_default();
        tables.insert(name.to_string(), vec![row]);
        tables
    }

    impl StatsSource for ScriptedSource {
        fn all_players(&self, _timeout: Duration) -> Result<Vec<Player>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        fn all_teams(&self) -> Vec<Team> {
            Vec::new()
        }
        fn player_info(&self, _id: EntityId, _timeout: Duration) -> Result<StatTables> {
            unreachable!()
        }
        fn player_career_stats(&self, _id: EntityId, _timeout: Duration) -> Result<StatTables> {
            unreachable!()
        }
        fn team_details(&self, _id: EntityId, _timeout: Duration) -> Result<StatTables> {
            unreachable!()
        }
        fn team_history(&self, _id: EntityId, _timeout: Duration) -> Result<StatTables> {
            unreachable!()
        }
        fn standings(&self, season: &str, _timeout: Duration) -> Result<StatTables> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if season == "1999-00" {
                return Err(anyhow!("no standings"));
            }
            Ok(table("Standings", json!({"TeamName": "Celtics"})))
        }
        fn league_leaders(&self, _season: &str, stat: &str, _timeout: Duration) -> Result<StatTables> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(table("LeagueLeaders", json!({"PLAYER": "Someone", "STAT": stat})))
        }
        fn scoreboard(&self, _day_offset: i64, _timeout: Duration) -> Result<StatTables> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut tables = StatTables::new();
            tables.insert(
                "GameHeader".into(),
                ["001", "002", "003"]
                    .iter()
                    .map(|id| json!({"GAME_ID": id}).as_object().cloned().unwrap_or_default())
                    .collect(),
            );
            Ok(tables)
        }
        fn box_score(&self, game_id: &str, _timeout: Duration) -> Result<StatTables> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken_games.contains(&game_id) {
                return Err(anyhow!("box score unavailable"));
            }
            Ok(table("PlayerStats", json!({"GAME_ID": game_id})))
        }
    }

    fn collector(source: ScriptedSource, dir: &Path) -> Collector<ScriptedSource> {
        Collector::new(
            source,
            FetchCache::new(Duration::ZERO),
            RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1)),
            dir.to_path_buf(),
        )
    }

    #[test]
    fn league_data_skips_failing_seasons() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collector = collector(ScriptedSource::default(), dir.path());

        let written =
            collector.collect_league_data(&["2023-24".to_string(), "1999-00".to_string()]);
        assert_eq!(written, 1);

        let record: LeagueRecord =
            read_json(&dir.path().join("league_2023-24.json")).expect("league record");
        assert_eq!(record.leaders.len(), LEADER_CATEGORIES.len());
        assert!(!dir.path().join("league_1999-00.json").exists());
    }

    #[test]
    fn recent_games_omit_failed_box_scores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = ScriptedSource {
            broken_games: vec!["002"],
            ..Default::default()
        };
        let collector = collector(source, dir.path());

        let games = collector.collect_recent_game_data(7).expect("recent games");
        assert_eq!(games, 3);

        let record: RecentGamesRecord =
            read_json(&dir.path().join(RECENT_GAMES_FILE)).expect("recent record");
        let ids: Vec<_> = record.details.keys().cloned().collect();
        assert_eq!(ids, vec!["001".to_string(), "003".to_string()]);
    }

    #[test]
    fn cached_fetches_are_not_repeated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collector = collector(ScriptedSource::default(), dir.path());

        collector.collect_standings("2023-24").expect("first");
        collector.collect_standings("2023-24").expect("second");
        assert_eq!(collector.source().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn existing_player_list_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let players = vec![Player {
            id: 7,
            full_name: "Seven".into(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
        }];
        write_json_atomic(&dir.path().join(ALL_PLAYERS_FILE), &players).expect("seed");
        let collector = collector(ScriptedSource::default(), dir.path());

        assert_eq!(collector.collect_all_players().expect("players"), players);
        assert_eq!(collector.source().calls.load(Ordering::SeqCst), 0);
    }
}
