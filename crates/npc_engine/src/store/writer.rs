use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use super::atomic_io::write_text_atomic;
use super::records::{RecordStore, RecordStoreError};
use crate::host::{Scheduler, TaskHandle};

/// Destination for serialized record snapshots.
pub trait SnapshotSink: Send {
    fn write_snapshot(&mut self, path: &Path, text: &str) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

impl SnapshotSink for FileSink {
    fn write_snapshot(&mut self, path: &Path, text: &str) -> io::Result<()> {
        write_text_atomic(path, text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Written { bytes: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Writes on the calling thread. Tests and shutdown use this.
    Inline,
    /// Writes on a dedicated background thread.
    Worker,
}

struct FlushJob {
    path: PathBuf,
    text: String,
}

struct FlushWorker {
    jobs: Option<Sender<FlushJob>>,
    outcomes: Receiver<FlushOutcome>,
    thread: Option<JoinHandle<Option<Box<dyn SnapshotSink>>>>,
}

/// The worker thread could not start; the sink is handed back untouched.
struct WorkerSpawnError {
    error: io::Error,
    sink: Box<dyn SnapshotSink>,
}

impl FlushWorker {
    /// The sink only moves to the thread once it is running.
    fn spawn(sink: Box<dyn SnapshotSink>) -> Result<Self, WorkerSpawnError> {
        let (sink_tx, sink_rx) = mpsc::channel::<Box<dyn SnapshotSink>>();
        let (job_tx, job_rx) = mpsc::channel::<FlushJob>();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("record-flush".to_string())
            .spawn(move || {
                let mut sink = sink_rx.recv().ok()?;
                while let Ok(job) = job_rx.recv() {
                    let outcome = run_job(sink.as_mut(), &job);
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }
                }
                Some(sink)
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => return Err(WorkerSpawnError { error, sink }),
        };
        if let Err(mpsc::SendError(sink)) = sink_tx.send(sink) {
            return Err(WorkerSpawnError {
                error: io::Error::new(io::ErrorKind::BrokenPipe, "record flush worker exited"),
                sink,
            });
        }
        Ok(Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
            thread: Some(thread),
        })
    }

    fn submit(&self, job: FlushJob) -> Result<(), FlushJob> {
        match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|mpsc::SendError(job)| job),
            None => Err(job),
        }
    }

    /// Closes the job channel and waits for queued writes to finish.
    fn stop(&mut self) -> Option<Box<dyn SnapshotSink>> {
        self.jobs.take();
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(sink) => sink,
            Err(_) => {
                error!("record_flush_worker_panicked");
                None
            }
        }
    }
}

fn run_job(sink: &mut dyn SnapshotSink, job: &FlushJob) -> FlushOutcome {
    match sink.write_snapshot(&job.path, &job.text) {
        Ok(()) => FlushOutcome::Written {
            bytes: job.text.len(),
        },
        Err(error) => FlushOutcome::Failed {
            error: error.to_string(),
        },
    }
}

enum SinkSlot {
    Inline(Box<dyn SnapshotSink>),
    Worker(FlushWorker),
    Stopped,
}

/// Coalesces record mutations into one durable write per debounce window.
///
/// Each mutation cancels the pending flush task and schedules a new one, so a
/// burst produces a single write once the store has been quiet for
/// `debounce_ticks`.
pub struct DebouncedWriter {
    path: PathBuf,
    debounce_ticks: u64,
    pending: Option<TaskHandle>,
    slot: SinkSlot,
    inline_outcomes: VecDeque<FlushOutcome>,
}

impl DebouncedWriter {
    pub fn new(
        path: PathBuf,
        debounce_ticks: u64,
        sink: Box<dyn SnapshotSink>,
        mode: FlushMode,
    ) -> Self {
        let slot = match mode {
            FlushMode::Inline => SinkSlot::Inline(sink),
            FlushMode::Worker => worker_slot(FlushWorker::spawn(sink)),
        };
        Self::with_slot(path, debounce_ticks, slot)
    }

    fn with_slot(path: PathBuf, debounce_ticks: u64, slot: SinkSlot) -> Self {
        Self {
            path,
            debounce_ticks,
            pending: None,
            slot,
            inline_outcomes: VecDeque::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debounce_ticks(&self) -> u64 {
        self.debounce_ticks
    }

    pub fn set_debounce_ticks(&mut self, ticks: u64) {
        self.debounce_ticks = ticks;
    }

    pub fn has_pending_flush(&self) -> bool {
        self.pending.is_some()
    }

    pub fn mark_dirty<T>(&mut self, scheduler: &mut Scheduler<T>, flush_task: T) {
        if let Some(handle) = self.pending.take() {
            scheduler.cancel(handle);
        }
        self.pending = Some(scheduler.schedule_after(self.debounce_ticks, flush_task));
    }

    /// Runs when the scheduled flush task fires. The snapshot is taken here,
    /// on the caller's thread, before any I/O is handed off.
    pub fn flush(&mut self, store: &RecordStore) {
        self.pending = None;
        let text = match store.snapshot_json() {
            Ok(text) => text,
            Err(error) => {
                self.inline_outcomes.push_back(FlushOutcome::Failed {
                    error: error.to_string(),
                });
                return;
            }
        };
        let job = FlushJob {
            path: self.path.clone(),
            text,
        };
        match &mut self.slot {
            SinkSlot::Inline(sink) => {
                let outcome = run_job(sink.as_mut(), &job);
                self.inline_outcomes.push_back(outcome);
            }
            SinkSlot::Worker(worker) => {
                if let Err(job) = worker.submit(job) {
                    warn!(path = %job.path.display(), "record_flush_worker_gone_writing_inline");
                    self.inline_outcomes.extend(worker.outcomes.try_iter());
                    let mut sink = worker.stop().unwrap_or_else(|| Box::new(FileSink));
                    let outcome = run_job(sink.as_mut(), &job);
                    self.inline_outcomes.push_back(outcome);
                    self.slot = SinkSlot::Inline(sink);
                }
            }
            SinkSlot::Stopped => {
                self.inline_outcomes.push_back(FlushOutcome::Failed {
                    error: "writer already shut down".to_string(),
                });
            }
        }
    }

    /// Outcomes of flushes finished since the last call. Failures are logged
    /// here; the next mutation schedules the retry.
    pub fn drain_outcomes(&mut self) -> Vec<FlushOutcome> {
        let mut drained: Vec<FlushOutcome> = self.inline_outcomes.drain(..).collect();
        if let SinkSlot::Worker(worker) = &self.slot {
            drained.extend(worker.outcomes.try_iter());
        }
        for outcome in &drained {
            log_outcome(&self.path, outcome);
        }
        drained
    }

    /// Cancels any pending debounce, waits for in-flight writes, then writes
    /// the final snapshot synchronously.
    pub fn shutdown<T>(
        &mut self,
        scheduler: &mut Scheduler<T>,
        store: &RecordStore,
    ) -> Result<Vec<FlushOutcome>, RecordStoreError> {
        if let Some(handle) = self.pending.take() {
            scheduler.cancel(handle);
        }
        let mut sink = match std::mem::replace(&mut self.slot, SinkSlot::Stopped) {
            SinkSlot::Inline(sink) => sink,
            SinkSlot::Worker(mut worker) => {
                let sink = worker.stop();
                self.inline_outcomes.extend(worker.outcomes.try_iter());
                sink.unwrap_or_else(|| Box::new(FileSink))
            }
            SinkSlot::Stopped => Box::new(FileSink),
        };
        let text = store.snapshot_json()?;
        let result = sink.write_snapshot(&self.path, &text);
        let bytes = text.len();
        let mut outcomes = self.drain_outcomes();
        match result {
            Ok(()) => {
                let outcome = FlushOutcome::Written { bytes };
                log_outcome(&self.path, &outcome);
                outcomes.push(outcome);
                Ok(outcomes)
            }
            Err(source) => Err(RecordStoreError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        if let SinkSlot::Worker(worker) = &mut self.slot {
            worker.stop();
        }
    }
}

fn worker_slot(spawned: Result<FlushWorker, WorkerSpawnError>) -> SinkSlot {
    match spawned {
        Ok(worker) => SinkSlot::Worker(worker),
        Err(failed) => {
            warn!(error = %failed.error, "record_flush_worker_spawn_failed_writing_inline");
            SinkSlot::Inline(failed.sink)
        }
    }
}

fn log_outcome(path: &Path, outcome: &FlushOutcome) {
    match outcome {
        FlushOutcome::Written { bytes } => {
            debug!(path = %path.display(), bytes, "records_flushed");
        }
        FlushOutcome::Failed { error } => {
            warn!(path = %path.display(), error = %error, "records_flush_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::store::{load_records, ActorRecord};
    use crate::types::{EntityId, Location};

    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<String>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl SnapshotSink for RecordingSink {
        fn write_snapshot(&mut self, _path: &Path, text: &str) -> io::Result<()> {
            if *self.fail.lock().expect("fail flag") {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.writes.lock().expect("writes").push(text.to_string());
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Flush;

    fn store_with(n: usize) -> RecordStore {
        let mut store = RecordStore::new();
        for i in 0..n {
            store.put(
                EntityId::new_random(),
                ActorRecord::new(Location::new("w", i as f64, 64.0, 0.0), false),
            );
        }
        store
    }

    fn run_ticks(
        scheduler: &mut Scheduler<Flush>,
        writer: &mut DebouncedWriter,
        store: &RecordStore,
        ticks: u64,
    ) {
        for _ in 0..ticks {
            for _ in scheduler.advance() {
                writer.flush(store);
            }
        }
    }

    #[test]
    fn burst_of_mutations_flushes_once() {
        let sink = RecordingSink::default();
        let mut writer = DebouncedWriter::new(
            PathBuf::from("npcs.json"),
            20,
            Box::new(sink.clone()),
            FlushMode::Inline,
        );
        let mut scheduler = Scheduler::new();
        let store = store_with(3);

        for _ in 0..10 {
            writer.mark_dirty(&mut scheduler, Flush);
            run_ticks(&mut scheduler, &mut writer, &store, 1);
        }
        assert_eq!(scheduler.pending_count(), 1);
        run_ticks(&mut scheduler, &mut writer, &store, 20);
        assert_eq!(sink.writes.lock().expect("writes").len(), 1);
        assert!(!writer.has_pending_flush());

        writer.mark_dirty(&mut scheduler, Flush);
        run_ticks(&mut scheduler, &mut writer, &store, 20);
        assert_eq!(sink.writes.lock().expect("writes").len(), 2);
        assert_eq!(writer.drain_outcomes().len(), 2);
    }

    #[test]
    fn failed_flush_is_reported_and_retried_on_next_mutation() {
        let sink = RecordingSink::default();
        *sink.fail.lock().expect("fail") = true;
        let mut writer = DebouncedWriter::new(
            PathBuf::from("npcs.json"),
            1,
            Box::new(sink.clone()),
            FlushMode::Inline,
        );
        let mut scheduler = Scheduler::new();
        let store = store_with(1);

        writer.mark_dirty(&mut scheduler, Flush);
        run_ticks(&mut scheduler, &mut writer, &store, 1);
        let outcomes = writer.drain_outcomes();
        assert!(matches!(outcomes.as_slice(), [FlushOutcome::Failed { .. }]));

        *sink.fail.lock().expect("fail") = false;
        writer.mark_dirty(&mut scheduler, Flush);
        run_ticks(&mut scheduler, &mut writer, &store, 1);
        assert_eq!(sink.writes.lock().expect("writes").len(), 1);
    }

    #[test]
    fn worker_spawn_failure_keeps_the_given_sink() {
        let sink = RecordingSink::default();
        let slot = worker_slot(Err(WorkerSpawnError {
            error: io::Error::new(io::ErrorKind::Other, "no threads left"),
            sink: Box::new(sink.clone()),
        }));
        let mut writer = DebouncedWriter::with_slot(PathBuf::from("npcs.json"), 0, slot);
        let mut scheduler = Scheduler::new();
        let store = store_with(2);

        writer.mark_dirty(&mut scheduler, Flush);
        run_ticks(&mut scheduler, &mut writer, &store, 1);
        assert_eq!(sink.writes.lock().expect("writes").len(), 1);
        assert!(matches!(
            writer.drain_outcomes().as_slice(),
            [FlushOutcome::Written { .. }]
        ));
    }

    #[test]
    fn worker_mode_writes_file_and_shutdown_flushes_final_state() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join("npcs.json");
        let mut writer =
            DebouncedWriter::new(path.clone(), 0, Box::new(FileSink), FlushMode::Worker);
        let mut scheduler = Scheduler::new();
        let mut store = store_with(2);

        writer.mark_dirty(&mut scheduler, Flush);
        run_ticks(&mut scheduler, &mut writer, &store, 1);

        store = store_with(5);
        writer.mark_dirty(&mut scheduler, Flush);
        let outcomes = writer.shutdown(&mut scheduler, &store).expect("shutdown");
        assert!(matches!(outcomes.last(), Some(FlushOutcome::Written { .. })));
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(load_records(&path).expect("load").len(), 5);
    }
}
