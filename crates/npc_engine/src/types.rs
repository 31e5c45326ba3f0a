use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable identity of an island. Assigned by the ownership provider and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn label_id(&self) -> LabelId {
        LabelId(format!("island_{}", self.0))
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier handed out by an actor backend (numeric for some, string for others).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(pub String);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            world: self.world.clone(),
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
            yaw: self.yaw,
            pitch: self.pitch,
        }
    }

    pub fn same_position(&self, other: &Location) -> bool {
        self.world == other.world && self.x == other.x && self.y == other.y && self.z == other.z
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@({:.2},{:.2},{:.2}) yaw={:.1} pitch={:.1}",
            self.world, self.x, self.y, self.z, self.yaw, self.pitch
        )
    }
}

/// Which world-load signal a reconciliation pass answers to.
///
/// A world reported ready by the generic loader only reconciles standard
/// records; the lazy-loading backend's own signal only reconciles deferred
/// records. Both may fire for the same world name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorldLoadKind {
    Standard,
    Deferred,
}

impl WorldLoadKind {
    pub fn from_deferred_flag(is_deferred: bool) -> Self {
        if is_deferred {
            Self::Deferred
        } else {
            Self::Standard
        }
    }

    pub fn is_deferred(self) -> bool {
        matches!(self, Self::Deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_id_uses_island_prefix() {
        let id: EntityId = "6f1c2b9e-3d4a-4c5b-8e6f-7a8b9c0d1e2f".parse().expect("uuid");
        assert_eq!(
            id.label_id().0,
            "island_6f1c2b9e-3d4a-4c5b-8e6f-7a8b9c0d1e2f"
        );
        assert_eq!(id.short(), "6f1c2b9e");
    }

    #[test]
    fn offset_keeps_world_and_rotation() {
        let anchor = Location::new("skyblock_1", 100.0, 64.0, 200.0).with_rotation(90.0, 10.0);
        let moved = anchor.offset(0.0, 0.0, 5.0);
        assert_eq!(moved.world, "skyblock_1");
        assert_eq!(moved.z, 205.0);
        assert_eq!(moved.yaw, 90.0);
        assert!(!moved.same_position(&anchor));
    }

    #[test]
    fn location_without_rotation_deserializes() {
        let loc: Location =
            serde_json::from_str(r#"{"world":"w","x":1.0,"y":2.0,"z":3.0}"#).expect("parse");
        assert_eq!(loc.yaw, 0.0);
        assert_eq!(loc.pitch, 0.0);
    }
}
