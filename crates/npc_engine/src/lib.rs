use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod facade;
pub mod host;
pub mod interaction;
pub mod providers;
pub mod readiness;
pub mod reconcile;
pub mod registry;
pub mod settings;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use facade::{
    tokenize_line, CommandError, CommandFacade, CommandReply, CommandSender, FacadeCommand,
    PlayerContext, ADMIN_PERMISSION,
};
pub use host::{EngineMetricsSnapshot, MetricsHandle, Scheduler, TaskHandle};
pub use interaction::InteractionOutcome;
pub use providers::{
    ActorProvider, DeferredWorldSupport, DialogProvider, HideModel, LabelProvider,
    OwnershipProvider, ProviderError, Providers, QuestBridge, WorldCatalog,
};
pub use readiness::{ProcessingGuard, WorldReadiness};
pub use reconcile::{
    CreateOutcome, DestroyOutcome, HostTask, MoveOutcome, PassReport, ReconcileError, Reconciler,
    RepairReport, Trigger, TriggerOutcome, TriggerSender, VisibilityOutcome,
};
pub use registry::{ActorRegistry, LiveActor};
pub use settings::{
    load_settings, parse_settings_json, LabelStyle, NpcSettings, RenderOptions, SettingsError,
    TimingSettings, SETTINGS_FILE_NAME,
};
pub use store::{
    load_records, ActorRecord, DebouncedWriter, FileSink, FlushMode, FlushOutcome,
    LabelDescriptor, RecordStore, RecordStoreError, SnapshotSink, RECORD_FILE_NAME,
};
pub use types::{ActorId, EntityId, LabelId, Location, PlayerId, WorldLoadKind};

pub const DATA_DIR_ENV_VAR: &str = "ISLANDNPC_DATA_DIR";
pub const COMMAND_PORT_ENV_VAR: &str = "ISLANDNPC_COMMAND_PORT";
pub const DEFAULT_COMMAND_PORT: u16 = 46101;
const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub settings_path: PathBuf,
    pub records_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to create data directory at {path}: {source}")]
    CreateDataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{DATA_DIR_ENV_VAR} points at a file, not a directory: {path}")]
    DataDirIsFile { path: PathBuf },
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Records(#[from] RecordStoreError),
}

/// Resolves `$ISLANDNPC_DATA_DIR` (default `./data`) and creates it.
pub fn resolve_data_paths() -> Result<DataPaths, StartupError> {
    let data_dir = match env::var(DATA_DIR_ENV_VAR) {
        Ok(value) => PathBuf::from(value),
        Err(env::VarError::NotPresent) => PathBuf::from(DEFAULT_DATA_DIR),
        Err(source) => {
            return Err(StartupError::EnvVar {
                var: DATA_DIR_ENV_VAR,
                source,
            })
        }
    };
    data_paths_in(&data_dir)
}

pub fn data_paths_in(data_dir: &Path) -> Result<DataPaths, StartupError> {
    if data_dir.is_file() {
        return Err(StartupError::DataDirIsFile {
            path: data_dir.to_path_buf(),
        });
    }
    fs::create_dir_all(data_dir).map_err(|source| StartupError::CreateDataDir {
        path: data_dir.to_path_buf(),
        source,
    })?;
    let data_dir = normalize_path(data_dir);

    Ok(DataPaths {
        settings_path: data_dir.join(SETTINGS_FILE_NAME),
        records_path: data_dir.join(RECORD_FILE_NAME),
        data_dir,
    })
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_paths_are_created_under_the_data_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("nested").join("data");
        let paths = data_paths_in(&dir).expect("paths");
        assert!(dir.is_dir());
        assert_eq!(paths.settings_path.file_name().expect("name"), "settings.json");
        assert_eq!(paths.records_path.file_name().expect("name"), "npcs.json");
        assert!(paths.records_path.starts_with(&paths.data_dir));
    }

    #[test]
    fn data_dir_cannot_be_a_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("plain");
        fs::write(&file, "x").expect("write");
        assert!(matches!(
            data_paths_in(&file),
            Err(StartupError::DataDirIsFile { .. })
        ));
    }
}
