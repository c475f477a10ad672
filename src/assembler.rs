//! Turns collected records into natural-language documents.
//!
//! Every formatter degrades to a short placeholder when its record is missing
//! or malformed, so one bad file never removes an entity from the output.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::checkpoint::{read_json, record_path, sorted_collected_ids, write_json_atomic};
use crate::collector::{
    league_file_name, LeagueRecord, PlayerRecord, RecentGamesRecord, TeamRecord, ALL_PLAYERS_FILE,
    ALL_TEAMS_FILE, RECENT_GAMES_FILE,
};
use crate::entities::{lookup_by_id, EntityId, EntityKind, Player, Team};
use crate::error::PipelineError;
use crate::stats::{first_row, rows, StatRow};

/// Player documents.
pub const PROCESSED_PLAYERS_FILE: &str = "processed_players.json";
/// Team documents.
pub const PROCESSED_TEAMS_FILE: &str = "processed_teams.json";
/// Standings and leader documents.
pub const PROCESSED_LEAGUE_FILE: &str = "processed_league.json";
/// Recent game summaries.
pub const PROCESSED_GAMES_FILE: &str = "processed_games.json";
/// Every document family, stamped with timestamps.
pub const ALL_PROCESSED_FILE: &str = "all_processed_data.json";

const STANDINGS_PER_CONFERENCE: usize = 8;
const STANDINGS_OVERALL: usize = 10;
const LEADERS_LISTED: usize = 10;
const TEAM_SEASONS_LISTED: usize = 10;

/// Document families written by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Biography and career overview.
    Player,
    /// Per-season or career player numbers.
    PlayerStats,
    /// Franchise background and history.
    Team,
    /// Per-season team records.
    TeamStats,
    /// Standings and leader boards.
    League,
    /// Recent game summaries.
    Game,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Player => "player",
            Category::PlayerStats => "player_stats",
            Category::Team => "team",
            Category::TeamStats => "team_stats",
            Category::League => "league",
            Category::Game => "game",
        };
        f.write_str(label)
    }
}

/// One unit of retrievable text plus the fields stored next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Natural-language body that gets embedded.
    pub text: String,
    /// Document family.
    pub category: Category,
    /// Player or team id, or a synthetic id such as `standings_0`.
    pub entity_id: String,
    /// Season string, or `career`, `all`, `current`.
    pub season: String,
    /// Free-form fields stored next to the text.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Set when the combined output is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Set when the combined output is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Builds a document; non-object `metadata` becomes an empty map.
    pub fn new(
        text: String,
        category: Category,
        entity_id: impl Into<String>,
        season: impl Into<String>,
        metadata: Value,
    ) -> Self {
        let metadata = match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            text,
            category,
            entity_id: entity_id.into(),
            season: season.into(),
            metadata,
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets both timestamps to `now`.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.created_at = Some(now);
        self.updated_at = Some(now);
    }
}

/// Reads raw records from `raw_dir` and writes document lists to `processed_dir`.
pub struct Assembler {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    players: HashMap<EntityId, Player>,
    teams: HashMap<EntityId, Team>,
}

impl Assembler {
    /// Loads the player and team reference lists; both must exist.
    pub fn new(raw_dir: PathBuf, processed_dir: PathBuf) -> Result<Self> {
        let players: Vec<Player> = load_reference(&raw_dir.join(ALL_PLAYERS_FILE))?;
        let teams: Vec<Team> = load_reference(&raw_dir.join(ALL_TEAMS_FILE))?;
        info!(
            teams = teams.len(),
            players = players.len(),
            "loaded reference data"
        );
        fs::create_dir_all(&processed_dir)
            .with_context(|| format!("failed to create {:?}", processed_dir))?;
        Ok(Self {
            raw_dir,
            processed_dir,
            players: lookup_by_id(&players),
            teams: lookup_by_id(&teams),
        })
    }

    /// Directory the document lists are written to.
    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Documents for every collected player, in ascending id order.
    pub fn process_player_data(&self, limit: Option<usize>) -> Result<Vec<Document>> {
        info!("processing player data");
        let mut ids = sorted_collected_ids(&self.raw_dir, EntityKind::Player);
        if let Some(limit) = limit {
            ids.truncate(limit);
        }

        let mut documents = Vec::new();
        for player_id in ids {
            let record = self.load_player(player_id);
            let name = self
                .players
                .get(&player_id)
                .map(|player| player.full_name.clone())
                .unwrap_or_else(|| format!("Player {player_id}"));
            let entity_id = player_id.to_string();

            let basic = record
                .as_ref()
                .map(|r| self.format_player_basic_info(r))
                .unwrap_or_else(|| format!("Information about player with ID {player_id}."));
            documents.push(Document::new(
                basic,
                Category::Player,
                entity_id.clone(),
                "career",
                json!({"player_name": name, "doc_type": "basic_info"}),
            ));

            let career = record
                .as_ref()
                .map(format_player_career_stats)
                .unwrap_or_else(|| format!("Career statistics for player with ID {player_id}."));
            documents.push(Document::new(
                career,
                Category::PlayerStats,
                entity_id.clone(),
                "career",
                json!({"player_name": name, "doc_type": "career_stats"}),
            ));

            let seasons = record
                .as_ref()
                .map(|r| self.format_player_season_stats(r))
                .unwrap_or_else(|| vec![format!("Season statistics for player with ID {player_id}.")]);
            for (i, text) in seasons.into_iter().enumerate() {
                documents.push(Document::new(
                    text,
                    Category::PlayerStats,
                    entity_id.clone(),
                    format!("season_{i}"),
                    json!({"player_name": name, "doc_type": "season_stats"}),
                ));
            }
        }

        self.save(PROCESSED_PLAYERS_FILE, &documents)?;
        info!(count = documents.len(), "processed player documents");
        Ok(documents)
    }

    /// Documents for every collected team, in ascending id order.
    pub fn process_team_data(&self) -> Result<Vec<Document>> {
        info!("processing team data");
        let mut documents = Vec::new();
        for team_id in sorted_collected_ids(&self.raw_dir, EntityKind::Team) {
            let record = self.load_team(team_id);
            let name = self
                .teams
                .get(&team_id)
                .map(|team| team.full_name.clone())
                .unwrap_or_else(|| format!("Team {team_id}"));
            let entity_id = team_id.to_string();

            let basic = record
                .as_ref()
                .map(format_team_basic_info)
                .unwrap_or_else(|| format!("Information about team with ID {team_id}."));
            documents.push(Document::new(
                basic,
                Category::Team,
                entity_id.clone(),
                "all",
                json!({"team_name": name, "doc_type": "basic_info"}),
            ));

            let history = record
                .as_ref()
                .map(format_team_history)
                .unwrap_or_else(|| format!("History of team with ID {team_id}."));
            documents.push(Document::new(
                history,
                Category::Team,
                entity_id.clone(),
                "all",
                json!({"team_name": name, "doc_type": "history"}),
            ));

            let seasons = record
                .as_ref()
                .map(format_team_season_stats)
                .unwrap_or_else(|| vec![format!("Season statistics for team with ID {team_id}.")]);
            for (i, text) in seasons.into_iter().enumerate() {
                documents.push(Document::new(
                    text,
                    Category::TeamStats,
                    entity_id.clone(),
                    format!("season_{i}"),
                    json!({"team_name": name, "doc_type": "season_stats"}),
                ));
            }
        }

        self.save(PROCESSED_TEAMS_FILE, &documents)?;
        info!(count = documents.len(), "processed team documents");
        Ok(documents)
    }

    /// Standings and leader documents for each season.
    pub fn process_league_data(&self, seasons: &[String]) -> Result<Vec<Document>> {
        info!("processing league data");
        let mut documents = Vec::new();
        for season in seasons {
            let record = self.load_league(season);

            let standings = record
                .as_ref()
                .map(|r| self.format_league_standings(r))
                .unwrap_or_else(|| vec![format!("Standings for the {season} NBA season.")]);
            push_parts(&mut documents, standings, "standings", season);

            let leaders = record
                .as_ref()
                .map(|r| self.format_league_leaders(r))
                .unwrap_or_else(|| vec![format!("Statistical leaders for the {season} NBA season.")]);
            push_parts(&mut documents, leaders, "leaders", season);
        }

        self.save(PROCESSED_LEAGUE_FILE, &documents)?;
        info!(count = documents.len(), "processed league documents");
        Ok(documents)
    }

    /// One summary per recently played game.
    pub fn process_game_data(&self) -> Result<Vec<Document>> {
        info!("processing game data");
        let summaries = load_record::<RecentGamesRecord>(&self.raw_dir.join(RECENT_GAMES_FILE))
            .map(|r| self.format_recent_games(&r))
            .unwrap_or_else(|| vec!["Recent NBA games.".to_string()]);
        let documents: Vec<Document> = summaries
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                Document::new(
                    text,
                    Category::Game,
                    format!("recent_{i}"),
                    "current",
                    json!({"doc_type": "game_summary"}),
                )
            })
            .collect();

        self.save(PROCESSED_GAMES_FILE, &documents)?;
        info!(count = documents.len(), "processed game documents");
        Ok(documents)
    }

    /// Runs every family and writes the stamped combined list.
    pub fn process_all_data(
        &self,
        player_limit: Option<usize>,
        seasons: &[String],
    ) -> Result<Vec<Document>> {
        let mut documents = self.process_player_data(player_limit)?;
        documents.extend(self.process_team_data()?);
        documents.extend(self.process_league_data(seasons)?);
        documents.extend(self.process_game_data()?);

        let now = Utc::now();
        for document in &mut documents {
            document.stamp(now);
        }
        self.save(ALL_PROCESSED_FILE, &documents)?;
        info!(count = documents.len(), "processed all documents");
        Ok(documents)
    }

    fn save(&self, name: &str, documents: &[Document]) -> Result<()> {
        write_json_atomic(&self.processed_dir.join(name), documents)
    }

    fn load_player(&self, player_id: EntityId) -> Option<PlayerRecord> {
        load_record(&record_path(&self.raw_dir, EntityKind::Player, player_id))
    }

    fn load_team(&self, team_id: EntityId) -> Option<TeamRecord> {
        load_record(&record_path(&self.raw_dir, EntityKind::Team, team_id))
    }

    fn load_league(&self, season: &str) -> Option<LeagueRecord> {
        load_record(&self.raw_dir.join(league_file_name(season)))
    }

    fn team_name(&self, team_id: Option<EntityId>) -> Option<&str> {
        team_id
            .and_then(|id| self.teams.get(&id))
            .map(|team| team.full_name.as_str())
    }

    fn team_abbreviation(&self, row: &StatRow) -> String {
        id_field(row, &["TEAM_ID", "TeamID"])
            .and_then(|id| self.teams.get(&id))
            .map(|team| team.abbreviation.clone())
            .unwrap_or_else(|| text_field(row, &["TEAM", "TEAM_ABBREVIATION"]))
    }

    fn format_player_basic_info(&self, record: &PlayerRecord) -> String {
        let info = first_row(&record.info, "CommonPlayerInfo").cloned().unwrap_or_default();
        let name = &record.player.full_name;
        let team_name = self
            .team_name(id_field(&info, &["TEAM_ID"]))
            .map(str::to_string)
            .or_else(|| {
                let city = text_field(&info, &["TEAM_CITY"]);
                let nickname = text_field(&info, &["TEAM_NAME"]);
                (!nickname.is_empty()).then(|| format!("{city} {nickname}").trim().to_string())
            });

        let mut text = format!("{name} is a professional basketball player");
        if let Some(team) = &team_name {
            text.push_str(&format!(" for the {team}"));
        }
        text.push('.');

        let birthdate = text_field(&info, &["BIRTHDATE"]);
        if let Ok(born) = NaiveDateTime::parse_from_str(&birthdate, "%Y-%m-%dT%H:%M:%S") {
            text.push_str(&format!(" Born on {}", born.format("%B %d, %Y")));
            let country = text_field(&info, &["COUNTRY"]);
            if !country.is_empty() && !country.eq_ignore_ascii_case("usa") {
                text.push_str(&format!(" in {country}"));
            }
            text.push('.');
        }

        let height = text_field(&info, &["HEIGHT"]);
        let weight = text_field(&info, &["WEIGHT"]);
        match (height.is_empty(), weight.is_empty()) {
            (false, false) => text.push_str(&format!(
                " He stands {height} and weighs {weight} pounds."
            )),
            (false, true) => text.push_str(&format!(" He stands {height}.")),
            (true, false) => text.push_str(&format!(" He weighs {weight} pounds.")),
            (true, true) => {}
        }

        let position = text_field(&info, &["POSITION"]);
        if !position.is_empty() {
            text.push_str(&format!(" He plays the {position} position."));
        }

        let draft_year = text_field(&info, &["DRAFT_YEAR"]);
        let draft_round = text_field(&info, &["DRAFT_ROUND"]);
        let draft_number = text_field(&info, &["DRAFT_NUMBER"]);
        let drafted = [&draft_year, &draft_round, &draft_number]
            .iter()
            .all(|field| !field.is_empty() && !field.eq_ignore_ascii_case("undrafted"));
        if drafted {
            if draft_round == "1" && draft_number == "1" {
                text.push_str(&format!(
                    " He was selected first overall in the {draft_year} NBA Draft"
                ));
            } else {
                text.push_str(&format!(
                    " He was selected {} in round {draft_round} of the {draft_year} NBA Draft",
                    ordinal(&draft_number)
                ));
            }
            text.push('.');
        }

        let school = text_field(&info, &["SCHOOL"]);
        if !school.is_empty() && !school.eq_ignore_ascii_case("none") {
            text.push_str(&format!(" He attended {school}."));
        }
        text
    }

    fn format_player_season_stats(&self, record: &PlayerRecord) -> Vec<String> {
        let name = &record.player.full_name;
        let seasons = rows(&record.career_stats, "SeasonTotalsRegularSeason");
        if seasons.is_empty() {
            return vec![format!("{name} has no recorded season statistics in the NBA.")];
        }

        seasons
            .iter()
            .filter_map(|season| {
                let games = num_field(season, &["GP"]);
                if games <= 0.0 {
                    return None;
                }
                let team = self
                    .team_name(id_field(season, &["TEAM_ID"]))
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        let abbreviation = text_field(season, &["TEAM_ABBREVIATION"]);
                        if abbreviation.is_empty() {
                            "N/A".to_string()
                        } else {
                            abbreviation
                        }
                    });
                let per_game = |key: &str| num_field(season, &[key]) / games;
                Some(format!(
                    "In the {} NBA season, {name} played for the {team} and averaged {:.1} points, \
                     {:.1} rebounds, {:.1} assists, {:.1} steals, and {:.1} blocks per game while \
                     shooting {:.1}% from the field, {:.1}% from three-point range, and {:.1}% from \
                     the free throw line across {games} games.",
                    text_field(season, &["SEASON_ID"]),
                    per_game("PTS"),
                    per_game("REB"),
                    per_game("AST"),
                    per_game("STL"),
                    per_game("BLK"),
                    num_field(season, &["FG_PCT"]) * 100.0,
                    num_field(season, &["FG3_PCT"]) * 100.0,
                    num_field(season, &["FT_PCT"]) * 100.0,
                ))
            })
            .collect()
    }

    fn format_league_standings(&self, record: &LeagueRecord) -> Vec<String> {
        let season = &record.season;
        let standings = rows(&record.standings, "Standings");
        if standings.is_empty() {
            return vec![format!("No standings data available for the {season} NBA season.")];
        }

        let conference = |name: &str| {
            let mut teams: Vec<&StatRow> = standings
                .iter()
                .filter(|row| text_field(row, &["CONFERENCE", "Conference"]) == name)
                .collect();
            teams.sort_by_key(|row| rank(row, &["CONFERENCE_RANK", "PlayoffRank"]));
            teams
        };
        let mut overall: Vec<&StatRow> = standings.iter().collect();
        overall.sort_by_key(|row| rank(row, &["LEAGUE_RANK", "LeagueRank"]));

        vec![
            format!(
                "Eastern Conference Standings for the {season} NBA season:\n{}",
                self.standings_list(&conference("East"), STANDINGS_PER_CONFERENCE)
            ),
            format!(
                "Western Conference Standings for the {season} NBA season:\n{}",
                self.standings_list(&conference("West"), STANDINGS_PER_CONFERENCE)
            ),
            format!(
                "Overall NBA Standings for the {season} season:\n{}",
                self.standings_list(&overall, STANDINGS_OVERALL)
            ),
        ]
    }

    fn standings_list(&self, teams: &[&StatRow], limit: usize) -> String {
        teams
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, row)| {
                let name = self
                    .team_name(id_field(row, &["TEAM_ID", "TeamID"]))
                    .map(str::to_string)
                    .unwrap_or_else(|| "N/A".to_string());
                format!(
                    "{}. {name}: {}-{}",
                    i + 1,
                    text_field(row, &["WINS"]),
                    text_field(row, &["LOSSES"])
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn format_league_leaders(&self, record: &LeagueRecord) -> Vec<String> {
        let season = &record.season;
        if record.leaders.is_empty() {
            return vec![format!("No league leaders data available for the {season} NBA season.")];
        }

        let boards = [("PTS", "Scoring", "PPG"), ("REB", "Rebounding", "RPG"), ("AST", "Assist", "APG")];
        boards
            .iter()
            .filter_map(|(stat, title, unit)| {
                let leaders = rows(record.leaders.get(*stat)?, "LeagueLeaders");
                if leaders.is_empty() {
                    return None;
                }
                let list = leaders
                    .iter()
                    .take(LEADERS_LISTED)
                    .enumerate()
                    .map(|(i, row)| {
                        let player = id_field(row, &["PLAYER_ID"])
                            .and_then(|id| self.players.get(&id))
                            .map(|player| player.full_name.clone())
                            .unwrap_or_else(|| text_field(row, &["PLAYER"]));
                        format!(
                            "{}. {player} ({}): {:.1} {unit}",
                            i + 1,
                            self.team_abbreviation(row),
                            num_field(row, &[*stat])
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(format!("NBA {title} Leaders for the {season} season:\n{list}"))
            })
            .collect()
    }

    fn format_recent_games(&self, record: &RecentGamesRecord) -> Vec<String> {
        let mut headers: Vec<&StatRow> = rows(&record.games, "GameHeader").iter().collect();
        if headers.is_empty() {
            return vec!["No recent NBA games data available.".to_string()];
        }
        headers.sort_by_key(|row| std::cmp::Reverse(text_field(row, &["GAME_DATE_EST"])));
        let line_scores = rows(&record.games, "LineScore");
        headers
            .into_iter()
            .map(|header| self.format_game_summary(header, line_scores))
            .collect()
    }

    fn format_game_summary(&self, header: &StatRow, line_scores: &[StatRow]) -> String {
        let game_id = text_field(header, &["GAME_ID"]);
        let home_id = id_field(header, &["HOME_TEAM_ID"]);
        let visitor_id = id_field(header, &["VISITOR_TEAM_ID"]);
        let home = self.team_name(home_id).unwrap_or("Home Team");
        let visitor = self.team_name(visitor_id).unwrap_or("Visiting Team");

        let score = |key: &str, team_id: Option<EntityId>| -> i64 {
            header
                .get(key)
                .and_then(Value::as_i64)
                .or_else(|| {
                    line_scores
                        .iter()
                        .find(|row| {
                            text_field(row, &["GAME_ID"]) == game_id
                                && id_field(row, &["TEAM_ID"]) == team_id
                        })
                        .map(|row| num_field(row, &["PTS"]) as i64)
                })
                .unwrap_or(0)
        };
        let home_score = score("HOME_TEAM_SCORE", home_id);
        let visitor_score = score("VISITOR_TEAM_SCORE", visitor_id);

        let raw_date = text_field(header, &["GAME_DATE_EST"]);
        let date = raw_date
            .get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
            .map(|day| day.format("%B %d, %Y").to_string())
            .unwrap_or(raw_date);

        let result = match home_score.cmp(&visitor_score) {
            std::cmp::Ordering::Greater => {
                format!("the {home} defeated the {visitor} {home_score}-{visitor_score}")
            }
            std::cmp::Ordering::Less => {
                format!("the {visitor} defeated the {home} {visitor_score}-{home_score}")
            }
            std::cmp::Ordering::Equal => {
                format!("the {home} and the {visitor} tied {home_score}-{visitor_score}")
            }
        };
        format!("On {date}, {result}.")
    }
}

fn format_player_career_stats(record: &PlayerRecord) -> String {
    let name = &record.player.full_name;
    let Some(totals) = first_row(&record.career_stats, "CareerTotalsRegularSeason") else {
        return format!("{name} has no recorded career statistics in the NBA.");
    };
    let games = num_field(totals, &["GP"]);
    if games <= 0.0 {
        return format!("{name} has not played any games in the NBA.");
    }
    let per_game = |key: &str| num_field(totals, &[key]) / games;
    let mut text = format!(
        "{name} Career NBA Statistics: {:.1} points per game, {:.1} rebounds per game, \
         {:.1} assists per game, {:.1} steals per game, {:.1} blocks per game, \
         {:.1}% field goal percentage, {:.1}% three-point percentage, {:.1}% free throw percentage",
        per_game("PTS"),
        per_game("REB"),
        per_game("AST"),
        per_game("STL"),
        per_game("BLK"),
        num_field(totals, &["FG_PCT"]) * 100.0,
        num_field(totals, &["FG3_PCT"]) * 100.0,
        num_field(totals, &["FT_PCT"]) * 100.0,
    );

    let seasons = rows(&record.career_stats, "SeasonTotalsRegularSeason")
        .iter()
        .map(|row| text_field(row, &["SEASON_ID"]))
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    match seasons {
        0 => text.push('.'),
        1 => text.push_str(" in 1 season."),
        n => text.push_str(&format!(" across {n} seasons.")),
    }
    text
}

fn format_team_basic_info(record: &TeamRecord) -> String {
    let team = &record.team;
    let background = first_row(&record.details, "TeamBackground").cloned().unwrap_or_default();
    let name = &team.full_name;

    let mut text = format!(
        "The {name} are an American professional basketball team based in {}",
        team.city
    );
    if !team.state.is_empty() {
        text.push_str(&format!(", {}", team.state));
    }
    text.push_str(". The team competes in the National Basketball Association");
    if let Some(details) = first_row(&record.details, "TeamDetails") {
        let conference = text_field(details, &["CONFERENCE"]);
        let division = text_field(details, &["DIVISION"]);
        if !conference.is_empty() && !division.is_empty() {
            text.push_str(&format!(
                " as a member of the league's {conference} Conference {division} Division"
            ));
        }
    }
    text.push('.');

    let arena = text_field(&background, &["ARENA"]);
    if !arena.is_empty() {
        text.push_str(&format!(" The {name} play their home games at {arena}"));
        let capacity = text_field(&background, &["ARENACAPACITY"]);
        if !capacity.is_empty() {
            text.push_str(&format!(", which has a capacity of {capacity}"));
        }
        text.push('.');
    }

    let founded = text_field(&background, &["YEARFOUNDED"]);
    if !founded.is_empty() {
        text.push_str(&format!(" The franchise was founded in {founded}."));
    }
    let owner = text_field(&background, &["OWNER"]);
    if !owner.is_empty() {
        text.push_str(&format!(" The team is owned by {owner}."));
    }
    let coach = text_field(&background, &["HEADCOACH"]);
    if !coach.is_empty() {
        text.push_str(&format!(" The current head coach is {coach}."));
    }
    text
}

fn format_team_history(record: &TeamRecord) -> String {
    let name = &record.team.full_name;
    let seasons = rows(&record.history, "TeamYearByYearStats");
    if seasons.is_empty() {
        return format!("The {name} have no recorded history in the NBA.");
    }

    let championships = seasons.iter().filter(|row| won_title(row)).count();
    let playoffs = seasons.iter().filter(|row| made_playoffs(row)).count();

    let mut parts = Vec::new();
    match championships {
        0 => {}
        1 => parts.push("1 NBA championship".to_string()),
        n => parts.push(format!("{n} NBA championships")),
    }
    match playoffs {
        0 => {}
        1 => parts.push("1 playoff appearance".to_string()),
        n => parts.push(format!("{n} playoff appearances")),
    }
    let summary = if parts.is_empty() {
        "no NBA championships or playoff appearances".to_string()
    } else {
        parts.join(" and ")
    };
    let mut text = format!("The {name} franchise history includes {summary}.");

    let best = seasons.iter().max_by(|a, b| {
        num_field(a, &["WIN_PCT"])
            .partial_cmp(&num_field(b, &["WIN_PCT"]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if let Some(best) = best {
        text.push_str(&format!(
            " The team's best regular season record was {}-{} during the {} season.",
            text_field(best, &["WINS"]),
            text_field(best, &["LOSSES"]),
            text_field(best, &["YEAR"])
        ));
    }
    text
}

fn format_team_season_stats(record: &TeamRecord) -> Vec<String> {
    let name = &record.team.full_name;
    let mut seasons: Vec<&StatRow> = rows(&record.history, "TeamYearByYearStats").iter().collect();
    if seasons.is_empty() {
        return vec![format!("The {name} have no recorded season statistics in the NBA.")];
    }
    seasons.sort_by_key(|row| std::cmp::Reverse(text_field(row, &["YEAR"])));

    seasons
        .into_iter()
        .take(TEAM_SEASONS_LISTED)
        .map(|season| {
            let mut text = format!(
                "In the {} NBA season, the {name} finished with a record of {}-{} ({:.1}% win percentage)",
                text_field(season, &["YEAR"]),
                text_field(season, &["WINS"]),
                text_field(season, &["LOSSES"]),
                num_field(season, &["WIN_PCT"]) * 100.0
            );
            let games = num_field(season, &["GP"]);
            let points = num_field(season, &["PTS"]);
            if games > 0.0 && points > 0.0 {
                text.push_str(&format!(", averaging {:.1} points per game", points / games));
                let allowed = num_field(season, &["OPP_PTS"]);
                if allowed > 0.0 {
                    text.push_str(&format!(
                        " while allowing {:.1} points per game",
                        allowed / games
                    ));
                }
            }
            text.push('.');
            if made_playoffs(season) {
                if won_title(season) {
                    text.push_str(" The team made the playoffs and won the NBA championship.");
                } else {
                    text.push_str(" The team made the playoffs.");
                }
            } else {
                text.push_str(" The team did not make the playoffs.");
            }
            text
        })
        .collect()
}

fn push_parts(documents: &mut Vec<Document>, texts: Vec<String>, kind: &str, season: &str) {
    let total = texts.len();
    for (i, text) in texts.into_iter().enumerate() {
        documents.push(Document::new(
            text,
            Category::League,
            format!("{kind}_{i}"),
            season,
            json!({"doc_type": kind, "part": i + 1, "total_parts": total}),
        ));
    }
}

fn load_reference<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        error!(path = %path.display(), "reference data not found");
        return Err(PipelineError::MissingInput(path.to_path_buf()).into());
    }
    read_json(path)
}

/// Reads a raw record, logging and swallowing failures so callers can fall back.
fn load_record<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match read_json(path) {
        Ok(record) => Some(record),
        Err(err) => {
            error!("unusable record, writing placeholder: {err:#}");
            None
        }
    }
}

fn made_playoffs(row: &StatRow) -> bool {
    let value = text_field(row, &["PLAYOFF_APPEARANCE"]);
    value == "Y" || num_field(row, &["PO_WINS"]) > 0.0 || num_field(row, &["PO_LOSSES"]) > 0.0
}

fn won_title(row: &StatRow) -> bool {
    text_field(row, &["LEAGUE_CHAMPION"]) == "Y"
        || text_field(row, &["NBA_FINALS_APPEARANCE"]) == "LEAGUE CHAMPION"
}

fn rank(row: &StatRow, keys: &[&str]) -> u64 {
    let value = num_field(row, keys);
    if value > 0.0 {
        value as u64
    } else {
        99
    }
}

fn ordinal(number: &str) -> String {
    let Ok(n) = number.parse::<u32>() else {
        return number.to_string();
    };
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// First present, non-null field among `keys`, rendered as text.
fn text_field(row: &StatRow, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find_map(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// First numeric field among `keys`; numeric strings count, everything else is 0.
fn num_field(row: &StatRow, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0)
}

fn id_field(row: &StatRow, keys: &[&str]) -> Option<EntityId> {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

/// Loads a document list written by [`Assembler`].
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::static_teams;
    use crate::stats::StatTables;
    use pretty_assertions::assert_eq;

    fn row(value: Value) -> StatRow {
        value.as_object().cloned().unwrap_or_default()
    }

    fn tables(name: &str, rows: Vec<Value>) -> StatTables {
        let mut tables = StatTables::new();
        tables.insert(name.to_string(), rows.into_iter().map(row).collect());
        tables
    }

    fn player(id: EntityId, name: &str) -> Player {
        Player {
            id,
            full_name: name.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
        }
    }

    fn seed(dir: &Path, players: &[Player]) {
        write_json_atomic(&dir.join(ALL_PLAYERS_FILE), players).expect("players");
        write_json_atomic(&dir.join(ALL_TEAMS_FILE), &static_teams()).expect("teams");
    }

    #[test]
    fn missing_reference_data_is_a_precondition_failure() {
        let raw = tempfile::tempdir().expect("raw");
        let out = tempfile::tempdir().expect("out");
        let err = match Assembler::new(raw.path().to_path_buf(), out.path().to_path_buf()) {
            Ok(_) => panic!("assembler should require reference data"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput(_))
        ));
    }

    #[test]
    fn player_documents_follow_id_order_and_degrade_to_placeholders() {
        let raw = tempfile::tempdir().expect("raw");
        let out = tempfile::tempdir().expect("out");
        seed(raw.path(), &[player(7, "Broken Record"), player(30, "Stephen Curry")]);

        let career = tables(
            "CareerTotalsRegularSeason",
            vec![json!({"GP": 2, "PTS": 50, "REB": 10, "AST": 12, "STL": 4, "BLK": 0,
                        "FG_PCT": 0.5, "FG3_PCT": 0.4, "FT_PCT": 0.9})],
        );
        let mut career_stats = career.clone();
        career_stats.extend(tables(
            "SeasonTotalsRegularSeason",
            vec![json!({"SEASON_ID": "2023-24", "TEAM_ID": 1610612744, "GP": 2, "PTS": 50,
                        "REB": 10, "AST": 12, "STL": 4, "BLK": 0,
                        "FG_PCT": 0.5, "FG3_PCT": 0.4, "FT_PCT": 0.9})],
        ));
        let record = PlayerRecord {
            player: player(30, "Stephen Curry"),
            info: tables(
                "CommonPlayerInfo",
                vec![json!({"TEAM_ID": 1610612744, "POSITION": "Guard",
                            "BIRTHDATE": "1988-03-14T00:00:00", "COUNTRY": "USA",
                            "HEIGHT": "6-2", "WEIGHT": "185", "DRAFT_YEAR": "2009",
                            "DRAFT_ROUND": "1", "DRAFT_NUMBER": "7", "SCHOOL": "Davidson"})],
            ),
            career_stats,
        };
        write_json_atomic(&record_path(raw.path(), EntityKind::Player, 30), &record).expect("record");
        fs::write(record_path(raw.path(), EntityKind::Player, 7), "{not json").expect("broken");

        let assembler =
            Assembler::new(raw.path().to_path_buf(), out.path().to_path_buf()).expect("assembler");
        let docs = assembler.process_player_data(None).expect("players");

        let ids: Vec<&str> = docs.iter().map(|d| d.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["7", "7", "7", "30", "30", "30"]);
        assert_eq!(docs[0].text, "Information about player with ID 7.");
        assert_eq!(docs[2].season, "season_0");

        assert!(docs[3].text.starts_with(
            "Stephen Curry is a professional basketball player for the Golden State Warriors."
        ));
        assert!(docs[3].text.contains("Born on March 14, 1988."));
        assert!(docs[3].text.contains("selected 7th in round 1 of the 2009 NBA Draft"));
        assert_eq!(
            docs[4].text,
            "Stephen Curry Career NBA Statistics: 25.0 points per game, 5.0 rebounds per game, \
             6.0 assists per game, 2.0 steals per game, 0.0 blocks per game, 50.0% field goal \
             percentage, 40.0% three-point percentage, 90.0% free throw percentage in 1 season."
        );
        assert_eq!(docs[5].category, Category::PlayerStats);
        assert_eq!(docs[5].metadata["doc_type"], "season_stats");

        let saved = load_documents(&out.path().join(PROCESSED_PLAYERS_FILE)).expect("saved");
        assert_eq!(saved.len(), 6);
    }

    #[test]
    fn league_documents_are_numbered_parts() {
        let raw = tempfile::tempdir().expect("raw");
        let out = tempfile::tempdir().expect("out");
        seed(raw.path(), &[player(201939, "Stephen Curry")]);
        let mut leaders = std::collections::BTreeMap::new();
        leaders.insert(
            "PTS".to_string(),
            tables(
                "LeagueLeaders",
                vec![json!({"PLAYER_ID": 201939, "PLAYER": "S. Curry", "TEAM_ID": 1610612744, "PTS": 26.43})],
            ),
        );
        let record = LeagueRecord {
            season: "2023-24".into(),
            standings: tables(
                "Standings",
                vec![
                    json!({"TeamID": 1610612738, "Conference": "East", "PlayoffRank": 1, "WINS": 64, "LOSSES": 18, "LeagueRank": 1}),
                    json!({"TeamID": 1610612760, "Conference": "West", "PlayoffRank": 1, "WINS": 57, "LOSSES": 25, "LeagueRank": 2}),
                ],
            ),
            leaders,
        };
        write_json_atomic(&raw.path().join(league_file_name("2023-24")), &record).expect("league");

        let assembler =
            Assembler::new(raw.path().to_path_buf(), out.path().to_path_buf()).expect("assembler");
        let docs = assembler
            .process_league_data(&["2023-24".to_string(), "1990-91".to_string()])
            .expect("league");

        let ids: Vec<&str> = docs.iter().map(|d| d.entity_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["standings_0", "standings_1", "standings_2", "leaders_0", "standings_0", "leaders_0"]
        );
        assert!(docs[0].text.ends_with("1. Boston Celtics: 64-18"));
        assert_eq!(
            docs[3].text,
            "NBA Scoring Leaders for the 2023-24 season:\n1. Stephen Curry (GSW): 26.4 PPG"
        );
        assert_eq!(docs[2].metadata["part"], 3);
        assert_eq!(docs[2].metadata["total_parts"], 3);
        assert_eq!(docs[4].text, "Standings for the 1990-91 NBA season.");
    }

    #[test]
    fn game_summaries_use_line_scores() {
        let raw = tempfile::tempdir().expect("raw");
        let out = tempfile::tempdir().expect("out");
        seed(raw.path(), &[]);
        let mut games = tables(
            "GameHeader",
            vec![json!({"GAME_ID": "0022300001", "GAME_DATE_EST": "2024-01-15T00:00:00",
                        "HOME_TEAM_ID": 1610612747, "VISITOR_TEAM_ID": 1610612738})],
        );
        games.extend(tables(
            "LineScore",
            vec![
                json!({"GAME_ID": "0022300001", "TEAM_ID": 1610612747, "PTS": 110}),
                json!({"GAME_ID": "0022300001", "TEAM_ID": 1610612738, "PTS": 114}),
            ],
        ));
        let record = RecentGamesRecord {
            games,
            details: Default::default(),
        };
        write_json_atomic(&raw.path().join(RECENT_GAMES_FILE), &record).expect("games");

        let assembler =
            Assembler::new(raw.path().to_path_buf(), out.path().to_path_buf()).expect("assembler");
        let docs = assembler.process_game_data().expect("games");
        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].text,
            "On January 15, 2024, the Boston Celtics defeated the Los Angeles Lakers 114-110."
        );
        assert_eq!(docs[0].entity_id, "recent_0");
    }

    #[test]
    fn combined_output_is_stamped() {
        let raw = tempfile::tempdir().expect("raw");
        let out = tempfile::tempdir().expect("out");
        seed(raw.path(), &[]);
        let assembler =
            Assembler::new(raw.path().to_path_buf(), out.path().to_path_buf()).expect("assembler");
        let docs = assembler.process_all_data(None, &[]).expect("all");

        // Only the recent-games placeholder exists without raw records.
        assert_eq!(docs.len(), 1);
        assert!(docs.iter().all(|d| d.created_at.is_some() && d.created_at == d.updated_at));
        assert!(out.path().join(ALL_PROCESSED_FILE).exists());
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal("1"), "1st");
        assert_eq!(ordinal("12"), "12th");
        assert_eq!(ordinal("22"), "22nd");
        assert_eq!(ordinal("43"), "43rd");
    }
}
