use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{ActorId, EntityId, LabelId, Location};

pub const RECORD_FILE_NAME: &str = "npcs.json";
pub const RECORD_FILE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("failed to read record file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write record file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid record file {path} at `{field_path}`: {message}")]
    Parse {
        path: PathBuf,
        field_path: String,
        message: String,
    },
    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDescriptor {
    pub id: LabelId,
    #[serde(default)]
    pub lines: Vec<String>,
}

/// Durable intent for one island's actor.
///
/// `is_deferred_world: None` means the record predates the flag; it is
/// classified at runtime and never read as `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub location: Location,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deferred_world: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelDescriptor>,
}

impl ActorRecord {
    pub fn new(location: Location, is_deferred_world: bool) -> Self {
        Self {
            location,
            hidden: false,
            is_deferred_world: Some(is_deferred_world),
            actor_id: None,
            dialog_id: None,
            label: None,
        }
    }

    pub fn world(&self) -> &str {
        &self.location.world
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    version: u32,
    #[serde(default)]
    npcs: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct RecordFileRef<'a> {
    version: u32,
    npcs: &'a BTreeMap<EntityId, ActorRecord>,
}

/// In-memory authoritative map of records. Durability is the writer's job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    records: BTreeMap<EntityId, ActorRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, entity: &EntityId) -> Option<&ActorRecord> {
        self.records.get(entity)
    }

    pub(crate) fn get_mut(&mut self, entity: &EntityId) -> Option<&mut ActorRecord> {
        self.records.get_mut(entity)
    }

    pub fn contains(&self, entity: &EntityId) -> bool {
        self.records.contains_key(entity)
    }

    pub fn put(&mut self, entity: EntityId, record: ActorRecord) -> Option<ActorRecord> {
        self.records.insert(entity, record)
    }

    pub fn delete(&mut self, entity: &EntityId) -> Option<ActorRecord> {
        self.records.remove(entity)
    }

    pub fn all_records(&self) -> impl Iterator<Item = (&EntityId, &ActorRecord)> {
        self.records.iter()
    }

    pub fn entity_ids_in_world(&self, world: &str) -> Vec<EntityId> {
        self.records
            .iter()
            .filter(|(_, record)| record.world() == world)
            .map(|(entity, _)| *entity)
            .collect()
    }

    /// Serializes the whole map as of now; the caller may hand the text to
    /// another thread.
    pub fn snapshot_json(&self) -> Result<String, RecordStoreError> {
        let file = RecordFileRef {
            version: RECORD_FILE_VERSION,
            npcs: &self.records,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

pub fn parse_records_json(path: &Path, raw: &str) -> Result<RecordStore, RecordStoreError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let file: RecordFile =
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            RecordStoreError::Parse {
                path: path.to_path_buf(),
                field_path: error.path().to_string(),
                message: error.inner().to_string(),
            }
        })?;

    if file.version > RECORD_FILE_VERSION {
        warn!(
            version = file.version,
            supported = RECORD_FILE_VERSION,
            "record_file_version_newer_than_supported"
        );
    }

    let mut store = RecordStore::new();
    for (key, value) in file.npcs {
        let entity = match key.parse::<EntityId>() {
            Ok(entity) => entity,
            Err(error) => {
                warn!(key = %key, error = %error, "record_skipped_invalid_entity_id");
                continue;
            }
        };
        match serde_json::from_value::<ActorRecord>(value) {
            Ok(record) => {
                store.put(entity, record);
            }
            Err(error) => {
                warn!(entity = %entity, error = %error, "record_skipped_invalid_body");
            }
        }
    }
    Ok(store)
}

/// Missing file means no records yet.
pub fn load_records(path: &Path) -> Result<RecordStore, RecordStoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "record_file_missing_starting_empty");
            return Ok(RecordStore::new());
        }
        Err(source) => {
            return Err(RecordStoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let store = parse_records_json(path, &raw)?;
    let legacy = store
        .all_records()
        .filter(|(_, record)| record.is_deferred_world.is_none())
        .count();
    info!(
        path = %path.display(),
        records = store.len(),
        unclassified = legacy,
        "records_loaded"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::write_text_atomic;

    const E1: &str = "6f1c2b9e-3d4a-4c5b-8e6f-7a8b9c0d1e2f";

    fn entity(raw: &str) -> EntityId {
        raw.parse().expect("uuid")
    }

    #[test]
    fn delete_is_visible_immediately() {
        let mut store = RecordStore::new();
        let id = entity(E1);
        store.put(id, ActorRecord::new(Location::new("w", 0.0, 0.0, 0.0), false));
        assert!(store.get(&id).is_some());
        assert!(store.delete(&id).is_some());
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn legacy_record_without_flag_stays_unclassified() {
        let raw = format!(
            r#"{{ "version": 1, "npcs": {{ "{E1}": {{
                "location": {{ "world": "skyblock_1", "x": 100.0, "y": 64.0, "z": 205.0 }},
                "hidden": true,
                "actor_id": "17"
            }} }} }}"#
        );
        let store = parse_records_json(Path::new("npcs.json"), &raw).expect("parse");
        let record = store.get(&entity(E1)).expect("record");
        assert_eq!(record.is_deferred_world, None);
        assert!(record.hidden);
        assert_eq!(record.actor_id, Some(ActorId("17".to_string())));
        assert_eq!(record.location.yaw, 0.0);
    }

    #[test]
    fn invalid_keys_and_bodies_are_skipped() {
        let raw = format!(
            r#"{{ "version": 1, "npcs": {{
                "not-a-uuid": {{ "location": {{ "world": "w", "x": 0, "y": 0, "z": 0 }} }},
                "{E1}": {{ "location": "broken" }}
            }} }}"#
        );
        let store = parse_records_json(Path::new("npcs.json"), &raw).expect("parse");
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_envelope_reports_path() {
        let error = parse_records_json(Path::new("npcs.json"), r#"{ "version": "one" }"#)
            .expect_err("error");
        let RecordStoreError::Parse { field_path, .. } = error else {
            panic!("expected parse error");
        };
        assert_eq!(field_path, "version");
    }

    #[test]
    fn snapshot_survives_disk_and_keeps_flag() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join(RECORD_FILE_NAME);
        let mut store = RecordStore::new();
        let mut record = ActorRecord::new(Location::new("island_7", 1.0, 2.0, 3.0), true);
        record.label = Some(LabelDescriptor {
            id: entity(E1).label_id(),
            lines: vec!["alice's Island".to_string()],
        });
        store.put(entity(E1), record);

        write_text_atomic(&path, &store.snapshot_json().expect("snapshot")).expect("write");
        let loaded = load_records(&path).expect("load");
        assert_eq!(loaded, store);
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = TempDir::new().expect("temp");
        let store = load_records(&temp.path().join(RECORD_FILE_NAME)).expect("load");
        assert!(store.is_empty());
    }
}
