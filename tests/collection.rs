use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use pretty_assertions::assert_eq;
use serde_json::json;
use statline::checkpoint::sorted_collected_ids;
use statline::collector::PlayerRecord;
use statline::{
    BulkDriver, CircuitBreakerConfig, Collector, EntityId, EntityKind, FetchCache, Player,
    RetryPolicy, StatTables, StatsSource, Team,
};

/// In-memory stats API that counts every remote call.
struct FakeApi {
    players: Vec<Player>,
    teams: Vec<Team>,
    failing: Mutex<HashSet<EntityId>>,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl FakeApi {
    fn new(player_count: u64) -> Self {
        let players = (1..=player_count)
            .map(|id| Player {
                id,
                full_name: format!("Player {id}"),
                first_name: "Player".into(),
                last_name: id.to_string(),
                is_active: true,
            })
            .collect();
        let teams = vec![team(1610612738, "Boston Celtics"), team(1610612747, "Los Angeles Lakers")];
        Self {
            players,
            teams,
            failing: Mutex::new(HashSet::new()),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        *self.failing.lock().expect("lock") = ids.into_iter().collect();
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tables(&self, id: EntityId, name: &str) -> Result<StatTables> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.healthy.load(Ordering::SeqCst) || self.failing.lock().expect("lock").contains(&id)
        {
            return Err(anyhow!("connection reset for {id}"));
        }
        let mut tables = StatTables::new();
        let row = json!({"ID": id}).as_object().cloned().unwrap_or_default();
        tables.insert(name.to_string(), vec![row]);
        Ok(tables)
    }
}

fn team(id: EntityId, full_name: &str) -> Team {
    Team {
        id,
        full_name: full_name.into(),
        abbreviation: "TST".into(),
        nickname: "Testers".into(),
        city: "Test".into(),
        state: "Test".into(),
        year_founded: 1946,
    }
}

impl StatsSource for &FakeApi {
    fn all_players(&self, _timeout: Duration) -> Result<Vec<Player>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.players.clone())
    }
    fn all_teams(&self) -> Vec<Team> {
        self.teams.clone()
    }
    fn player_info(&self, id: EntityId, _timeout: Duration) -> Result<StatTables> {
        self.tables(id, "CommonPlayerInfo")
    }
    fn player_career_stats(&self, id: EntityId, _timeout: Duration) -> Result<StatTables> {
        self.tables(id, "SeasonTotalsRegularSeason")
    }
    fn team_details(&self, id: EntityId, _timeout: Duration) -> Result<StatTables> {
        self.tables(id, "TeamBackground")
    }
    fn team_history(&self, id: EntityId, _timeout: Duration) -> Result<StatTables> {
        self.tables(id, "TeamStats")
    }
    fn standings(&self, _season: &str, _timeout: Duration) -> Result<StatTables> {
        self.tables(0, "Standings")
    }
    fn league_leaders(&self, _season: &str, _stat: &str, _timeout: Duration) -> Result<StatTables> {
        self.tables(0, "LeagueLeaders")
    }
    fn scoreboard(&self, _day_offset: i64, _timeout: Duration) -> Result<StatTables> {
        self.tables(0, "GameHeader")
    }
    fn box_score(&self, _game_id: &str, _timeout: Duration) -> Result<StatTables> {
        self.tables(0, "PlayerStats")
    }
}

fn collector<'a>(api: &'a FakeApi, raw_dir: &Path) -> Collector<&'a FakeApi> {
    Collector::new(
        api,
        FetchCache::new(Duration::ZERO),
        RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1)),
        raw_dir.to_path_buf(),
    )
}

fn serial_driver(breaker: CircuitBreakerConfig) -> BulkDriver {
    BulkDriver::new(1, Duration::ZERO..=Duration::ZERO, breaker)
}

#[test]
fn second_run_makes_no_remote_calls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(6);
    let driver = serial_driver(CircuitBreakerConfig::PLAYERS);

    let first = collector(&api, dir.path());
    let outcome = first
        .collect_data_for_all_players(None, &driver)
        .expect("first run");
    first
        .collect_data_for_all_teams(&driver.with_breaker(CircuitBreakerConfig::TEAMS))
        .expect("teams");
    assert_eq!(outcome.succeeded, 6);
    let calls_after_first = api.calls();
    assert_eq!(calls_after_first, 1 + 6 * 2 + 2 * 2);

    let second = collector(&api, dir.path());
    let players = second
        .collect_data_for_all_players(None, &driver)
        .expect("second run");
    let teams = second
        .collect_data_for_all_teams(&driver)
        .expect("second teams");
    assert_eq!(players.dispatched, 0);
    assert_eq!(teams.dispatched, 0);
    assert_eq!(api.calls(), calls_after_first);
}

#[test]
fn resume_only_fetches_missing_entities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(5).failing([3]);
    let driver = serial_driver(CircuitBreakerConfig::PLAYERS);

    let outcome = collector(&api, dir.path())
        .collect_data_for_all_players(None, &driver)
        .expect("first run");
    assert_eq!(outcome.failed, 1);
    assert_eq!(
        sorted_collected_ids(dir.path(), EntityKind::Player),
        vec![1, 2, 4, 5]
    );

    api.failing.lock().expect("lock").clear();
    let before = api.calls();
    let outcome = collector(&api, dir.path())
        .collect_data_for_all_players(None, &driver)
        .expect("second run");
    assert_eq!(outcome.dispatched, 1);
    assert_eq!(api.calls() - before, 2);

    let record: PlayerRecord = statline::checkpoint::read_json(&dir.path().join("player_3.json"))
        .expect("player record");
    assert_eq!(record.player.full_name, "Player 3");
    assert!(record.info.contains_key("CommonPlayerInfo"));
}

#[test]
fn breaker_keeps_going_below_threshold() {
    let dir = tempfile::tempdir().expect("tempdir");
    // four failures in each window of ten
    let api = FakeApi::new(30).failing([1, 3, 5, 7, 11, 13, 15, 17, 21, 23, 25, 27]);
    let driver = serial_driver(CircuitBreakerConfig::new(10, 5));

    let outcome = collector(&api, dir.path())
        .collect_data_for_all_players(None, &driver)
        .expect("run");
    assert!(!outcome.aborted);
    assert_eq!(outcome.dispatched, 30);
    assert_eq!(outcome.failed, 12);
}

#[test]
fn breaker_stops_dispatch_at_threshold() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(30).failing([2, 4, 6, 8, 10]);
    let driver = serial_driver(CircuitBreakerConfig::new(10, 5));

    let outcome = collector(&api, dir.path())
        .collect_data_for_all_players(None, &driver)
        .expect("run");
    assert!(outcome.aborted);
    assert_eq!(outcome.dispatched, 10);
    assert_eq!(outcome.succeeded, 5);
    assert_eq!(
        sorted_collected_ids(dir.path(), EntityKind::Player),
        vec![1, 3, 5, 7, 9]
    );
}

#[test]
fn player_limit_truncates_reference_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(8);
    let driver = serial_driver(CircuitBreakerConfig::PLAYERS);

    let outcome = collector(&api, dir.path())
        .collect_data_for_all_players(Some(3), &driver)
        .expect("run");
    assert_eq!(outcome.succeeded, 3);
    assert_eq!(
        sorted_collected_ids(dir.path(), EntityKind::Player),
        vec![1, 2, 3]
    );
}

#[test]
fn outage_leaves_no_partial_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(4);
    api.healthy.store(false, Ordering::SeqCst);
    let driver = serial_driver(CircuitBreakerConfig::new(2, 2));

    let outcome = collector(&api, dir.path())
        .collect_data_for_all_players(None, &driver)
        .expect("run");
    assert!(outcome.aborted);
    assert!(sorted_collected_ids(dir.path(), EntityKind::Player).is_empty());
    assert!(dir.path().join("all_players.json").exists());
}
