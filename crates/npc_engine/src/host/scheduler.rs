use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// Tick-indexed delayed task queue for the main context.
///
/// Tasks are plain values. Due tasks come back from [`Scheduler::advance`]
/// in the order they were scheduled, grouped by due tick.
#[derive(Debug)]
pub struct Scheduler<T> {
    current_tick: u64,
    next_id: u64,
    queue: BTreeMap<(u64, u64), T>,
    due_by_id: HashMap<u64, u64>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            current_tick: 0,
            next_id: 0,
            queue: BTreeMap::new(),
            due_by_id: HashMap::new(),
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// A delay of zero runs on the next advance, same as a delay of one.
    pub fn schedule_after(&mut self, delay_ticks: u64, task: T) -> TaskHandle {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        let due_tick = self.current_tick.saturating_add(delay_ticks.max(1));
        self.queue.insert((due_tick, id), task);
        self.due_by_id.insert(id, due_tick);
        TaskHandle(id)
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.due_by_id.remove(&handle.0) {
            Some(due_tick) => self.queue.remove(&(due_tick, handle.0)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.due_by_id.contains_key(&handle.0)
    }

    pub fn advance(&mut self) -> Vec<T> {
        self.current_tick = self.current_tick.saturating_add(1);
        let not_due = self.queue.split_off(&(self.current_tick + 1, 0));
        let due = std::mem::replace(&mut self.queue, not_due);
        due.into_iter()
            .map(|((_, id), task)| {
                self.due_by_id.remove(&id);
                task
            })
            .collect()
    }

    /// Removes and returns every pending task regardless of due tick.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.due_by_id.clear();
        std::mem::take(&mut self.queue).into_values().collect()
    }
}
