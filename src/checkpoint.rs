//! Filesystem checkpoints for resumable collection.
//!
//! A collected entity is recorded as `<prefix>_<id>.json` inside the raw data
//! directory, where `<prefix>` is `player` or `team` and `<id>` is the
//! decimal stats API id with no sign or padding. The file only appears once
//! every sub-fetch for the entity succeeded; its presence is the sole signal
//! that the entity is done.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::entities::{EntityId, EntityKind};

const RECORD_SUFFIX: &str = ".json";

/// Path of the collected record for one entity.
pub fn record_path(dir: &Path, kind: EntityKind, id: EntityId) -> PathBuf {
    dir.join(record_file_name(kind, id))
}

/// File name of the collected record for one entity.
pub fn record_file_name(kind: EntityKind, id: EntityId) -> String {
    format!("{}_{}{}", kind.file_prefix(), id, RECORD_SUFFIX)
}

/// Extracts the entity id from a record file name, if it follows the grammar.
pub fn parse_entity_id(kind: EntityKind, file_name: &str) -> Option<EntityId> {
    let rest = file_name.strip_prefix(kind.file_prefix())?;
    let rest = rest.strip_prefix('_')?;
    let digits = rest.strip_suffix(RECORD_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Ids of every entity of `kind` that already has a record in `dir`.
///
/// An unreadable directory is treated as an empty checkpoint set.
pub fn collected_ids(dir: &Path, kind: EntityKind) -> HashSet<EntityId> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), %kind, "cannot list checkpoint directory: {err}");
            return HashSet::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            parse_entity_id(kind, name.to_str()?)
        })
        .collect()
}

/// Sorted ids of collected records, for deterministic downstream processing.
pub fn sorted_collected_ids(dir: &Path, kind: EntityKind) -> Vec<EntityId> {
    let mut ids: Vec<_> = collected_ids(dir, kind).into_iter().collect();
    ids.sort_unstable();
    ids
}

/// Serializes `value` to `path` through a temp file and rename.
///
/// Readers either see the previous file or the complete new one.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {:?}", dir))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value)
            .with_context(|| format!("failed to serialize {:?}", path))?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to move temp file onto {:?}", path))?;
    Ok(())
}

/// Loads a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid JSON in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_only_well_formed_names() {
        assert_eq!(parse_entity_id(EntityKind::Player, "player_2544.json"), Some(2544));
        assert_eq!(parse_entity_id(EntityKind::Team, "team_1610612738.json"), Some(1610612738));
        assert_eq!(parse_entity_id(EntityKind::Player, "team_12.json"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "player_.json"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "player_-3.json"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "player_+3.json"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "player_12.json.tmp"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "player_12a.json"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "players_12.json"), None);
        assert_eq!(parse_entity_id(EntityKind::Player, "all_players.json"), None);
    }

    #[test]
    fn file_names_round_trip_through_parser() {
        let name = record_file_name(EntityKind::Team, 77);
        assert_eq!(name, "team_77.json");
        assert_eq!(parse_entity_id(EntityKind::Team, &name), Some(77));
    }

    #[test]
    fn scans_directory_for_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["player_1.json", "player_30.json", "team_5.json", "all_players.json"] {
            fs::write(dir.path().join(name), "{}").expect("write fixture");
        }

        assert_eq!(sorted_collected_ids(dir.path(), EntityKind::Player), vec![1, 30]);
        assert_eq!(sorted_collected_ids(dir.path(), EntityKind::Team), vec![5]);
    }

    #[test]
    fn missing_directory_means_nothing_collected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("never-created");
        assert!(collected_ids(&missing, EntityKind::Player).is_empty());
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("player_9.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).expect("first write");
        write_json_atomic(&path, &serde_json::json!({"v": 2})).expect("second write");

        let value: serde_json::Value = read_json(&path).expect("read back");
        assert_eq!(value["v"], 2);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }
}
