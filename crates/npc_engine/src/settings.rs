use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::write_text_atomic;
use crate::types::Location;

pub const SUPPORTED_CONFIG_VERSION: u32 = 2;
pub const SETTINGS_FILE_NAME: &str = "settings.json";
const OWNER_PLACEHOLDER: &str = "{owner}";
const UNKNOWN_OWNER_NAME: &str = "Unknown";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path} at `{field_path}`: {message}")]
    Parse {
        path: PathBuf,
        field_path: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NpcSettings {
    pub config_version: u32,
    pub debug: bool,
    pub npc: ActorSettings,
    pub label: LabelSettings,
    pub timing: TimingSettings,
    pub permissions: PermissionSettings,
}

impl Default for NpcSettings {
    fn default() -> Self {
        Self {
            config_version: SUPPORTED_CONFIG_VERSION,
            debug: false,
            npc: ActorSettings::default(),
            label: LabelSettings::default(),
            timing: TimingSettings::default(),
            permissions: PermissionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorSettings {
    pub provider: String,
    pub entity_type: String,
    pub skin: String,
    pub dialog_id: String,
    pub spawn_offset: SpawnOffset,
    pub rotation: Rotation,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            provider: "CITIZENS".to_string(),
            entity_type: "VILLAGER".to_string(),
            skin: String::new(),
            dialog_id: "default_dialog".to_string(),
            spawn_offset: SpawnOffset::default(),
            rotation: Rotation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for SpawnOffset {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            yaw: 180.0,
            pitch: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    pub enabled: bool,
    pub provider: String,
    pub lines: Vec<String>,
    pub y_offset: f64,
    pub line_spacing: f64,
    pub view_range: u32,
    pub background: LabelBackground,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "FANCYHOLOGRAMS".to_string(),
            lines: vec![
                "{owner}'s Island".to_string(),
                "Right-click to interact".to_string(),
            ],
            y_offset: 2.8,
            line_spacing: 0.3,
            view_range: 30,
            background: LabelBackground::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelBackground {
    pub enabled: bool,
    pub color: String,
}

impl Default for LabelBackground {
    fn default() -> Self {
        Self {
            enabled: false,
            color: "0x00000000".to_string(),
        }
    }
}

/// Delays are measured in host ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub ticks_per_second: u32,
    pub save_debounce_ticks: u64,
    pub entity_created_delay_ticks: u64,
    pub world_load_delay_ticks: u64,
    pub deferred_world_load_delay_ticks: u64,
    pub startup_reconcile_delay_ticks: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            ticks_per_second: 20,
            save_debounce_ticks: 20,
            entity_created_delay_ticks: 20,
            world_load_delay_ticks: 80,
            deferred_world_load_delay_ticks: 60,
            startup_reconcile_delay_ticks: 100,
        }
    }
}

impl TimingSettings {
    /// All delays zeroed. Used by tests and by hosts that do their own pacing.
    pub fn immediate() -> Self {
        Self {
            save_debounce_ticks: 0,
            entity_created_delay_ticks: 0,
            world_load_delay_ticks: 0,
            deferred_world_load_delay_ticks: 0,
            startup_reconcile_delay_ticks: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    pub default_allow: bool,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            default_allow: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Villager,
    Player,
    WanderingTrader,
    IronGolem,
    Allay,
    Fox,
    Cat,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Villager => "VILLAGER",
            Self::Player => "PLAYER",
            Self::WanderingTrader => "WANDERING_TRADER",
            Self::IronGolem => "IRON_GOLEM",
            Self::Allay => "ALLAY",
            Self::Fox => "FOX",
            Self::Cat => "CAT",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "VILLAGER" => Ok(Self::Villager),
            "PLAYER" => Ok(Self::Player),
            "WANDERING_TRADER" => Ok(Self::WanderingTrader),
            "IRON_GOLEM" => Ok(Self::IronGolem),
            "ALLAY" => Ok(Self::Allay),
            "FOX" => Ok(Self::Fox),
            "CAT" => Ok(Self::Cat),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

/// What the actor backend needs to render an island's actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub entity_kind: EntityKind,
    pub skin: Option<String>,
    pub dialog_id: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelStyle {
    pub background_argb: Option<u32>,
    pub view_range: u32,
    pub line_spacing_milli: u32,
}

impl NpcSettings {
    pub fn entity_kind(&self) -> EntityKind {
        match self.npc.entity_type.parse::<EntityKind>() {
            Ok(kind) => kind,
            Err(reason) => {
                warn!(
                    value = %self.npc.entity_type,
                    reason = %reason,
                    fallback = EntityKind::Villager.as_str(),
                    "settings_invalid_entity_type"
                );
                EntityKind::Villager
            }
        }
    }

    pub fn render_options(&self, display_name: String, dialog_id: Option<&str>) -> RenderOptions {
        let entity_kind = self.entity_kind();
        let skin = (entity_kind == EntityKind::Player && !self.npc.skin.trim().is_empty())
            .then(|| self.npc.skin.trim().to_string());
        let dialog_id = dialog_id
            .map(str::to_string)
            .or_else(|| self.default_dialog_id());
        RenderOptions {
            entity_kind,
            skin,
            dialog_id,
            display_name,
        }
    }

    pub fn default_dialog_id(&self) -> Option<String> {
        let trimmed = self.npc.dialog_id.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Anchor plus the configured offset, facing the configured rotation.
    pub fn spawn_location(&self, anchor: &Location) -> Location {
        let offset = self.npc.spawn_offset;
        anchor
            .offset(offset.x, offset.y, offset.z)
            .with_rotation(self.npc.rotation.yaw, self.npc.rotation.pitch)
    }

    pub fn label_location(&self, actor_location: &Location) -> Location {
        actor_location.offset(0.0, self.label.y_offset, 0.0)
    }

    pub fn label_lines(&self, owner_name: Option<&str>) -> Vec<String> {
        let owner = owner_name.unwrap_or(UNKNOWN_OWNER_NAME);
        let source = if self.label.lines.is_empty() {
            LabelSettings::default().lines
        } else {
            self.label.lines.clone()
        };
        source
            .iter()
            .map(|line| line.replace(OWNER_PLACEHOLDER, owner))
            .collect()
    }

    pub fn label_style(&self) -> LabelStyle {
        let background_argb = self
            .label
            .background
            .enabled
            .then(|| parse_argb_color(&self.label.background.color));
        LabelStyle {
            background_argb,
            view_range: self.label.view_range,
            line_spacing_milli: (self.label.line_spacing.max(0.0) * 1000.0).round() as u32,
        }
    }

    pub fn is_newer_than_supported(&self) -> bool {
        self.config_version > SUPPORTED_CONFIG_VERSION
    }
}

/// Accepts `0xAARRGGBB` hex or a plain decimal. Anything else is transparent.
pub fn parse_argb_color(raw: &str) -> u32 {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => trimmed.parse::<u32>().ok(),
    };
    match parsed {
        Some(color) => color,
        None => {
            warn!(value = %raw, fallback = "0x00000000", "settings_invalid_label_color");
            0
        }
    }
}

pub fn parse_settings_json(path: &Path, raw: &str) -> Result<NpcSettings, SettingsError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, NpcSettings>(&mut deserializer).map_err(|error| {
        SettingsError::Parse {
            path: path.to_path_buf(),
            field_path: error.path().to_string(),
            message: error.inner().to_string(),
        }
    })
}

/// Reads `settings.json`, writing the defaults out when the file is missing.
pub fn load_settings(path: &Path) -> Result<NpcSettings, SettingsError> {
    if !path.exists() {
        let defaults = NpcSettings::default();
        let text = serde_json::to_string_pretty(&defaults).map_err(|error| SettingsError::Parse {
            path: path.to_path_buf(),
            field_path: ".".to_string(),
            message: error.to_string(),
        })?;
        write_text_atomic(path, &text).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "settings_defaults_written");
        return Ok(defaults);
    }

    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = parse_settings_json(path, &raw)?;
    if settings.is_newer_than_supported() {
        warn!(
            config_version = settings.config_version,
            supported = SUPPORTED_CONFIG_VERSION,
            "settings_version_newer_than_supported"
        );
    }
    info!(
        path = %path.display(),
        config_version = settings.config_version,
        npc_provider = %settings.npc.provider,
        label_provider = %settings.label.provider,
        "settings_loaded"
    );
    Ok(settings)
}
