use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

static METRICS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_metrics_lock_poison_once(operation: &'static str) {
    if METRICS_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "metrics lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub tick: u64,
    pub live_actors: usize,
    pub records: usize,
    pub actors_spawned: u64,
    pub duplicate_creates_suppressed: u64,
    pub world_passes: u64,
    pub reconcile_failures: u64,
    pub flushes_ok: u64,
    pub flushes_failed: u64,
}

impl EngineMetricsSnapshot {
    pub fn render_status_line(&self) -> String {
        format!(
            "tick:{} live:{} records:{} spawned:{} dup_suppressed:{} passes:{} failures:{} flushes_ok:{} flushes_failed:{}",
            self.tick,
            self.live_actors,
            self.records,
            self.actors_spawned,
            self.duplicate_creates_suppressed,
            self.world_passes,
            self.reconcile_failures,
            self.flushes_ok,
            self.flushes_failed
        )
    }
}

/// Read side of the engine counters, safe to clone onto other threads.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    snapshot: Arc<RwLock<EngineMetricsSnapshot>>,
}

impl Default for MetricsHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(EngineMetricsSnapshot::default())),
        }
    }
}

impl MetricsHandle {
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("read");
                *poisoned.into_inner()
            }
        }
    }

    pub(crate) fn publish(&self, snapshot: EngineMetricsSnapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("write");
                let mut guard = poisoned.into_inner();
                *guard = snapshot;
            }
        }
    }
}

/// Monotonic counters owned by the engine on the main context.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EngineCounters {
    pub(crate) actors_spawned: u64,
    pub(crate) duplicate_creates_suppressed: u64,
    pub(crate) world_passes: u64,
    pub(crate) reconcile_failures: u64,
    pub(crate) flushes_ok: u64,
    pub(crate) flushes_failed: u64,
}

impl EngineCounters {
    pub(crate) fn to_snapshot(
        self,
        tick: u64,
        live_actors: usize,
        records: usize,
    ) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            tick,
            live_actors,
            records,
            actors_spawned: self.actors_spawned,
            duplicate_creates_suppressed: self.duplicate_creates_suppressed,
            world_passes: self.world_passes,
            reconcile_failures: self.reconcile_failures,
            flushes_ok: self.flushes_ok,
            flushes_failed: self.flushes_failed,
        }
    }
}
