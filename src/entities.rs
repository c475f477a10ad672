//! Player and team reference records loaded once per run.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier assigned by the stats API.
pub type EntityId = u64;

/// The two entity families collected in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Individual players.
    Player,
    /// Franchises.
    Team,
}

impl EntityKind {
    /// Filename prefix used for collected records of this kind.
    pub fn file_prefix(self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Team => "team",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// Static player reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stats API person id.
    pub id: EntityId,
    /// Display name, e.g. "LeBron James".
    pub full_name: String,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Whether the player is on a current roster.
    #[serde(default)]
    pub is_active: bool,
}

/// Static franchise reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Stats API team id.
    pub id: EntityId,
    /// Display name, e.g. "Boston Celtics".
    pub full_name: String,
    /// Three-letter abbreviation.
    pub abbreviation: String,
    /// Nickname, e.g. "Celtics".
    pub nickname: String,
    /// Home city or region.
    pub city: String,
    /// Home state or province.
    pub state: String,
    /// First season of the franchise.
    pub year_founded: u16,
}

/// Anything with a stable id and a human readable name.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Family the entity belongs to.
    const KIND: EntityKind;

    /// Stats API id.
    fn id(&self) -> EntityId;

    /// Display name used in logs.
    fn display_name(&self) -> &str;
}

impl Entity for Player {
    const KIND: EntityKind = EntityKind::Player;

    fn id(&self) -> EntityId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.full_name
    }
}

impl Entity for Team {
    const KIND: EntityKind = EntityKind::Team;

    fn id(&self) -> EntityId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.full_name
    }
}

/// Builds an id-keyed lookup from a reference list.
pub fn lookup_by_id<E: Entity>(entities: &[E]) -> HashMap<EntityId, E> {
    entities
        .iter()
        .map(|entity| (entity.id(), entity.clone()))
        .collect()
}

const TEAM_TABLE: &[(EntityId, &str, &str, &str, &str, &str, u16)] = &[
    (1610612737, "Atlanta Hawks", "ATL", "Hawks", "Atlanta", "Georgia", 1949),
    (1610612738, "Boston Celtics", "BOS", "Celtics", "Boston", "Massachusetts", 1946),
    (1610612739, "Cleveland Cavaliers", "CLE", "Cavaliers", "Cleveland", "Ohio", 1970),
    (1610612740, "New Orleans Pelicans", "NOP", "Pelicans", "New Orleans", "Louisiana", 2002),
    (1610612741, "Chicago Bulls", "CHI", "Bulls", "Chicago", "Illinois", 1966),
    (1610612742, "Dallas Mavericks", "DAL", "Mavericks", "Dallas", "Texas", 1980),
    (1610612743, "Denver Nuggets", "DEN", "Nuggets", "Denver", "Colorado", 1976),
    (1610612744, "Golden State Warriors", "GSW", "Warriors", "Golden State", "California", 1946),
    (1610612745, "Houston Rockets", "HOU", "Rockets", "Houston", "Texas", 1967),
    (1610612746, "Los Angeles Clippers", "LAC", "Clippers", "Los Angeles", "California", 1970),
    (1610612747, "Los Angeles Lakers", "LAL", "Lakers", "Los Angeles", "California", 1948),
    (1610612748, "Miami Heat", "MIA", "Heat", "Miami", "Florida", 1988),
    (1610612749, "Milwaukee Bucks", "MIL", "Bucks", "Milwaukee", "Wisconsin", 1968),
    (1610612750, "Minnesota Timberwolves", "MIN", "Timberwolves", "Minnesota", "Minnesota", 1989),
    (1610612751, "Brooklyn Nets", "BKN", "Nets", "Brooklyn", "New York", 1976),
    (1610612752, "New York Knicks", "NYK", "Knicks", "New York", "New York", 1946),
    (1610612753, "Orlando Magic", "ORL", "Magic", "Orlando", "Florida", 1989),
    (1610612754, "Indiana Pacers", "IND", "Pacers", "Indiana", "Indiana", 1976),
    (1610612755, "Philadelphia 76ers", "PHI", "76ers", "Philadelphia", "Pennsylvania", 1949),
    (1610612756, "Phoenix Suns", "PHX", "Suns", "Phoenix", "Arizona", 1968),
    (1610612757, "Portland Trail Blazers", "POR", "Trail Blazers", "Portland", "Oregon", 1970),
    (1610612758, "Sacramento Kings", "SAC", "Kings", "Sacramento", "California", 1948),
    (1610612759, "San Antonio Spurs", "SAS", "Spurs", "San Antonio", "Texas", 1976),
    (1610612760, "Oklahoma City Thunder", "OKC", "Thunder", "Oklahoma City", "Oklahoma", 1967),
    (1610612761, "Toronto Raptors", "TOR", "Raptors", "Toronto", "Ontario", 1995),
    (1610612762, "Utah Jazz", "UTA", "Jazz", "Utah", "Utah", 1974),
    (1610612763, "Memphis Grizzlies", "MEM", "Grizzlies", "Memphis", "Tennessee", 1995),
    (1610612764, "Washington Wizards", "WAS", "Wizards", "Washington", "District of Columbia", 1961),
    (1610612765, "Detroit Pistons", "DET", "Pistons", "Detroit", "Michigan", 1948),
    (1610612766, "Charlotte Hornets", "CHA", "Hornets", "Charlotte", "North Carolina", 1988),
];

/// The thirty current franchises.
pub fn static_teams() -> Vec<Team> {
    TEAM_TABLE
        .iter()
        .map(
            |&(id, full_name, abbreviation, nickname, city, state, year_founded)| Team {
                id,
                full_name: full_name.to_string(),
                abbreviation: abbreviation.to_string(),
                nickname: nickname.to_string(),
                city: city.to_string(),
                state: state.to_string(),
                year_founded,
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn static_team_table_is_unique() {
        let teams = static_teams();
        assert_eq!(teams.len(), 30);
        let ids: HashSet<_> = teams.iter().map(|team| team.id).collect();
        assert_eq!(ids.len(), 30);
        let abbreviations: HashSet<_> = teams.iter().map(|team| team.abbreviation.as_str()).collect();
        assert_eq!(abbreviations.len(), 30);
    }

    #[test]
    fn lookup_keys_by_id() {
        let lookup = lookup_by_id(&static_teams());
        assert_eq!(lookup[&1610612738].nickname, "Celtics");
    }
}
