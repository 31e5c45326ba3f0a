use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::types::WorldLoadKind;

static READINESS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Default)]
struct ReadinessState {
    loaded: BTreeSet<String>,
    processing: HashSet<(String, WorldLoadKind)>,
}

/// Loaded worlds plus the per-world "pass in progress" guard.
///
/// The guard is keyed by world and load kind: a standard pass and a deferred
/// pass for the same world partition the records between them and may both
/// run, while a second signal of the same kind is rejected.
#[derive(Debug, Default)]
pub struct WorldReadiness {
    state: Mutex<ReadinessState>,
}

impl WorldReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReadinessState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                if READINESS_LOCK_POISON_WARNED
                    .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!("world readiness lock poisoned; recovered inner value");
                }
                poisoned.into_inner()
            }
        }
    }

    /// Returns whether the flag changed.
    pub fn set_loaded(&self, world: &str, loaded: bool) -> bool {
        let mut state = self.lock();
        if loaded {
            state.loaded.insert(world.to_string())
        } else {
            state.loaded.remove(world)
        }
    }

    pub fn is_loaded(&self, world: &str) -> bool {
        self.lock().loaded.contains(world)
    }

    pub fn loaded_worlds(&self) -> Vec<String> {
        self.lock().loaded.iter().cloned().collect()
    }

    pub fn is_processing(&self, world: &str, kind: WorldLoadKind) -> bool {
        self.lock()
            .processing
            .contains(&(world.to_string(), kind))
    }

    /// Atomic check-and-set of the in-progress flag.
    pub fn try_begin_processing(&self, world: &str, kind: WorldLoadKind) -> bool {
        self.lock().processing.insert((world.to_string(), kind))
    }

    pub fn end_processing(&self, world: &str, kind: WorldLoadKind) {
        self.lock().processing.remove(&(world.to_string(), kind));
    }
}

/// Clears the in-progress flag when dropped, on every exit path.
#[must_use = "dropping the guard immediately ends processing"]
pub struct ProcessingGuard {
    readiness: Arc<WorldReadiness>,
    world: String,
    kind: WorldLoadKind,
}

impl ProcessingGuard {
    /// Takes over a flag already set with `try_begin_processing`.
    pub fn adopt(readiness: Arc<WorldReadiness>, world: String, kind: WorldLoadKind) -> Self {
        Self {
            readiness,
            world,
            kind,
        }
    }

    pub fn world(&self) -> &str {
        &self.world
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.readiness.end_processing(&self.world, self.kind);
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    #[test]
    fn second_begin_for_same_kind_is_rejected() {
        let readiness = WorldReadiness::new();
        assert!(readiness.try_begin_processing("island_7", WorldLoadKind::Standard));
        assert!(!readiness.try_begin_processing("island_7", WorldLoadKind::Standard));
        assert!(readiness.try_begin_processing("island_7", WorldLoadKind::Deferred));
        readiness.end_processing("island_7", WorldLoadKind::Standard);
        assert!(readiness.try_begin_processing("island_7", WorldLoadKind::Standard));
    }

    #[test]
    fn guard_releases_flag_even_on_panic() {
        let readiness = Arc::new(WorldReadiness::new());
        assert!(readiness.try_begin_processing("w", WorldLoadKind::Deferred));
        let shared = Arc::clone(&readiness);
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let _guard = ProcessingGuard::adopt(shared, "w".to_string(), WorldLoadKind::Deferred);
            panic!("pass failed");
        }));
        assert!(result.is_err());
        assert!(!readiness.is_processing("w", WorldLoadKind::Deferred));
    }

    #[test]
    fn loaded_set_tracks_transitions() {
        let readiness = WorldReadiness::new();
        assert!(readiness.set_loaded("b", true));
        assert!(readiness.set_loaded("a", true));
        assert!(!readiness.set_loaded("a", true));
        assert_eq!(readiness.loaded_worlds(), vec!["a".to_string(), "b".to_string()]);
        assert!(readiness.set_loaded("a", false));
        assert!(!readiness.is_loaded("a"));
    }
}
