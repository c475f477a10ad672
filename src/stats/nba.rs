//! Blocking client for the public stats.nba.com endpoints.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use serde_json::{Map, Value};

use super::{rows, StatTables, StatsSource};
use crate::entities::{static_teams, EntityId, Player, Team};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://stats.nba.com/stats";

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const LEAGUE_ID: &str = "00";
const SEASON_TYPE: &str = "Regular Season";

/// Stats API client. Cheap to clone; shares the underlying connection pool.
#[derive(Clone)]
pub struct NbaStatsClient {
    client: Client,
    base_url: String,
    reference_season: String,
}

impl NbaStatsClient {
    /// Builds a client rooted at `base_url`.
    ///
    /// `reference_season` selects the season used when listing all players.
    pub fn new(base_url: String, reference_season: String) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "stats API base must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.nba.com"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build stats API HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            reference_season,
        })
    }

    fn get(&self, endpoint: &str, params: &[(&str, String)], timeout: Duration) -> Result<StatTables> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(params)
            .timeout(timeout)
            .send()
            .with_context(|| format!("request to {endpoint} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("{endpoint} returned {status}: {body}");
        }
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to parse {endpoint} response"))?;
        normalize_response(payload).with_context(|| format!("unexpected {endpoint} payload"))
    }
}

impl StatsSource for NbaStatsClient {
    fn all_players(&self, timeout: Duration) -> Result<Vec<Player>> {
        let tables = self.get(
            "commonallplayers",
            &[
                ("LeagueID", LEAGUE_ID.to_string()),
                ("Season", self.reference_season.clone()),
                ("IsOnlyCurrentSeason", "0".to_string()),
            ],
            timeout,
        )?;
        Ok(rows(&tables, "CommonAllPlayers")
            .iter()
            .filter_map(player_from_row)
            .collect())
    }

    fn all_teams(&self) -> Vec<Team> {
        static_teams()
    }

    fn player_info(&self, player_id: EntityId, timeout: Duration) -> Result<StatTables> {
        self.get(
            "commonplayerinfo",
            &[("PlayerID", player_id.to_string()), ("LeagueID", String::new())],
            timeout,
        )
    }

    fn player_career_stats(&self, player_id: EntityId, timeout: Duration) -> Result<StatTables> {
        self.get(
            "playercareerstats",
            &[
                ("PlayerID", player_id.to_string()),
                ("PerMode", "Totals".to_string()),
                ("LeagueID", String::new()),
            ],
            timeout,
        )
    }

    fn team_details(&self, team_id: EntityId, timeout: Duration) -> Result<StatTables> {
        self.get("teamdetails", &[("TeamID", team_id.to_string())], timeout)
    }

    fn team_history(&self, team_id: EntityId, timeout: Duration) -> Result<StatTables> {
        self.get(
            "teamyearbyyearstats",
            &[
                ("TeamID", team_id.to_string()),
                ("LeagueID", LEAGUE_ID.to_string()),
                ("PerMode", "Totals".to_string()),
                ("SeasonType", SEASON_TYPE.to_string()),
            ],
            timeout,
        )
    }

    fn standings(&self, season: &str, timeout: Duration) -> Result<StatTables> {
        self.get(
            "leaguestandingsv3",
            &[
                ("LeagueID", LEAGUE_ID.to_string()),
                ("Season", season.to_string()),
                ("SeasonType", SEASON_TYPE.to_string()),
            ],
            timeout,
        )
    }

    fn league_leaders(&self, season: &str, stat: &str, timeout: Duration) -> Result<StatTables> {
        self.get(
            "leagueleaders",
            &[
                ("LeagueID", LEAGUE_ID.to_string()),
                ("PerMode", "PerGame".to_string()),
                ("Scope", "S".to_string()),
                ("Season", season.to_string()),
                ("SeasonType", SEASON_TYPE.to_string()),
                ("StatCategory", stat.to_string()),
            ],
            timeout,
        )
    }

    fn scoreboard(&self, day_offset: i64, timeout: Duration) -> Result<StatTables> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        self.get(
            "scoreboardv2",
            &[
                ("DayOffset", day_offset.to_string()),
                ("GameDate", today),
                ("LeagueID", LEAGUE_ID.to_string()),
            ],
            timeout,
        )
    }

    fn box_score(&self, game_id: &str, timeout: Duration) -> Result<StatTables> {
        self.get(
            "boxscoretraditionalv2",
            &[
                ("GameID", game_id.to_string()),
                ("StartPeriod", "0".to_string()),
                ("EndPeriod", "10".to_string()),
                ("StartRange", "0".to_string()),
                ("EndRange", "28800".to_string()),
                ("RangeType", "0".to_string()),
            ],
            timeout,
        )
    }
}

/// Converts the API's `resultSets` (header list + row arrays) into keyed rows.
///
/// Accepts both the plural `resultSets` array and the singular `resultSet`
/// object some endpoints return.
pub fn normalize_response(payload: Value) -> Result<StatTables> {
    let sets = match payload {
        Value::Object(mut root) => match root.remove("resultSets").or_else(|| root.remove("resultSet")) {
            Some(Value::Array(sets)) => sets,
            Some(single @ Value::Object(_)) => vec![single],
            Some(other) => anyhow::bail!("result sets have unexpected type: {other}"),
            None => anyhow::bail!("response has no result sets"),
        },
        other => anyhow::bail!("response is not an object: {other}"),
    };

    let mut tables = StatTables::new();
    for set in sets {
        let name = set
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("result set without a name"))?
            .to_string();
        let headers: Vec<String> = set
            .get("headers")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("result set {name} has no headers"))?
            .iter()
            .map(|h| h.as_str().unwrap_or_default().to_string())
            .collect();
        let row_set = set
            .get("rowSet")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut rows = Vec::with_capacity(row_set.len());
        for raw in row_set {
            let Value::Array(values) = raw else {
                anyhow::bail!("result set {name} has a non-array row");
            };
            let row: Map<String, Value> = headers.iter().cloned().zip(values).collect();
            rows.push(row);
        }
        tables.insert(name, rows);
    }
    Ok(tables)
}

fn player_from_row(row: &Map<String, Value>) -> Option<Player> {
    let id = row.get("PERSON_ID")?.as_u64()?;
    let full_name = row
        .get("DISPLAY_FIRST_LAST")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let (last_name, first_name) = row
        .get("DISPLAY_LAST_COMMA_FIRST")
        .and_then(Value::as_str)
        .and_then(|value| value.split_once(','))
        .map(|(last, first)| (last.trim().to_string(), first.trim().to_string()))
        .unwrap_or_else(|| (full_name.clone(), String::new()));
    let is_active = row
        .get("ROSTERSTATUS")
        .map(|status| status.as_i64() == Some(1) || status.as_str() == Some("1"))
        .unwrap_or(false);
    Some(Player {
        id,
        full_name,
        first_name,
        last_name,
        is_active,
    })
}
