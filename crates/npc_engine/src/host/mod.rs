mod metrics;
mod scheduler;

pub use metrics::{EngineMetricsSnapshot, MetricsHandle};
pub(crate) use metrics::EngineCounters;
pub use scheduler::{Scheduler, TaskHandle};
