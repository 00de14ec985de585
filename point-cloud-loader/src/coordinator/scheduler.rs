/// Deferred incremental geometry updates
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::worker::LoadId;

/// Decides whether a mid-stream chunk may trigger another update.
#[derive(Debug, Clone, Copy)]
pub struct UpdateThrottle {
    interval: Duration,
}

impl UpdateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Admit an update if `interval` has passed since the last one,
    /// recording `now` when it does.
    pub fn admit(&self, last_update: &mut Option<Instant>, now: Instant) -> bool {
        let due = last_update.is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            *last_update = Some(now);
        }
        due
    }
}

/// When scheduled tasks become runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Run once the event queue is drained, or at the latest after `timeout`.
    Idle { timeout: Duration },
    /// Run after a fixed delay regardless of load.
    Timer { delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleTask {
    pub filename: String,
    pub load_id: LoadId,
    deadline: Instant,
}

#[derive(Debug)]
pub struct IdleScheduler {
    policy: IdlePolicy,
    tasks: VecDeque<IdleTask>,
}

impl IdleScheduler {
    pub fn new(policy: IdlePolicy) -> Self {
        Self {
            policy,
            tasks: VecDeque::new(),
        }
    }

    pub fn schedule(&mut self, filename: &str, load_id: LoadId, now: Instant) {
        let wait = match self.policy {
            IdlePolicy::Idle { timeout } => timeout,
            IdlePolicy::Timer { delay } => delay,
        };
        self.tasks.push_back(IdleTask {
            filename: filename.to_string(),
            load_id,
            deadline: now + wait,
        });
    }

    /// Remove and return runnable tasks in scheduling order.
    /// `idle` reports that no worker events are waiting.
    pub fn take_due(&mut self, now: Instant, idle: bool) -> Vec<IdleTask> {
        let run_all = idle && matches!(self.policy, IdlePolicy::Idle { .. });
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .tasks
            .drain(..)
            .partition(|task| run_all || now >= task.deadline);
        self.tasks = waiting.into();
        due
    }

    /// Earliest point at which a pending task must run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|task| task.deadline).min()
    }

    /// Drop pending tasks for a load that has ended.
    pub fn discard(&mut self, load_id: LoadId) {
        self.tasks.retain(|task| task.load_id != load_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn throttle_spaces_updates_by_interval() {
        let throttle = UpdateThrottle::new(500 * MS);
        let start = Instant::now();
        let mut last = Some(start);

        assert!(!throttle.admit(&mut last, start + 499 * MS));
        assert!(throttle.admit(&mut last, start + 500 * MS));
        assert_eq!(last, Some(start + 500 * MS));
        assert!(!throttle.admit(&mut last, start + 700 * MS));
        assert!(throttle.admit(&mut None, start));
    }

    #[test]
    fn idle_tasks_run_when_idle_or_past_deadline() {
        let mut scheduler = IdleScheduler::new(IdlePolicy::Idle { timeout: 100 * MS });
        let start = Instant::now();
        scheduler.schedule("a.ply", 1, start);
        scheduler.schedule("b.ply", 2, start + 50 * MS);

        assert!(scheduler.take_due(start + 10 * MS, false).is_empty());

        let overdue = scheduler.take_due(start + 120 * MS, false);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].filename, "a.ply");

        let idle = scheduler.take_due(start + 121 * MS, true);
        assert_eq!(idle[0].load_id, 2);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn timer_policy_ignores_idleness() {
        let mut scheduler = IdleScheduler::new(IdlePolicy::Timer { delay: 16 * MS });
        let start = Instant::now();
        scheduler.schedule("a.ply", 1, start);

        assert!(scheduler.take_due(start, true).is_empty());
        assert_eq!(scheduler.next_deadline(), Some(start + 16 * MS));
        assert_eq!(scheduler.take_due(start + 16 * MS, false).len(), 1);
    }
}
