//! Tick-based deferred tasks tagged with the level generation they belong to
//!
//! A task whose generation no longer matches the current level is dropped when
//! it comes due, so a settle timer armed for one level can never spawn into
//! the next.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    /// The level has had time to settle; request the local actor
    SettledSpawn,
    /// Retry after a failed creation
    RetrySpawn { attempt: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    due_tick: u64,
    generation: u64,
    task: ScheduledTask,
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    entries: Vec<Entry>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due_tick: u64, generation: u64, task: ScheduledTask) {
        debug!(
            "Scheduled {:?} for tick {} (generation {})",
            task, due_tick, generation
        );
        self.entries.push(Entry {
            due_tick,
            generation,
            task,
        });
    }

    /// Drop everything, e.g. on disconnect
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.entries.len();
        self.entries.clear();
        cancelled
    }

    /// Remove and return every task due at `tick`, in scheduling order
    ///
    /// Due tasks from another generation are discarded.
    pub fn take_due(&mut self, tick: u64, generation: u64) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        self.entries.retain(|entry| {
            if entry.due_tick > tick {
                return true;
            }
            if entry.generation == generation {
                due.push(entry.task);
            } else {
                debug!(
                    "Dropping stale {:?} from generation {} (current {})",
                    entry.task, entry.generation, generation
                );
            }
            false
        });
        due
    }

    /// Whether a task for `generation` is still waiting
    pub fn has_pending(&self, generation: u64) -> bool {
        self.entries.iter().any(|e| e.generation == generation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exponential backoff in ticks for retry `attempt` (1-based), capped
pub fn retry_delay(attempt: u32, base_ticks: u64, cap_ticks: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(16);
    base_ticks.saturating_mul(1 << shift).min(cap_ticks).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_fire_when_due() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(10, 1, ScheduledTask::SettledSpawn);

        assert!(scheduler.take_due(9, 1).is_empty());
        assert_eq!(scheduler.take_due(10, 1), vec![ScheduledTask::SettledSpawn]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(10, 1, ScheduledTask::SettledSpawn);
        scheduler.schedule(12, 2, ScheduledTask::SettledSpawn);

        assert!(scheduler.take_due(11, 2).is_empty());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.take_due(12, 2), vec![ScheduledTask::SettledSpawn]);
    }

    #[test]
    fn test_cancel_all() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(5, 1, ScheduledTask::SettledSpawn);
        scheduler.schedule(6, 1, ScheduledTask::RetrySpawn { attempt: 1 });
        assert!(scheduler.has_pending(1));
        assert_eq!(scheduler.cancel_all(), 2);
        assert!(scheduler.take_due(100, 1).is_empty());
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        assert_eq!(retry_delay(1, 10, 200), 10);
        assert_eq!(retry_delay(2, 10, 200), 20);
        assert_eq!(retry_delay(3, 10, 200), 40);
        assert_eq!(retry_delay(10, 10, 200), 200);
        assert_eq!(retry_delay(1, 0, 200), 1);
    }
}
