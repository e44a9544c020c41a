//! Cancelable periodic tasks that run on the control loop.
//!
//! Nothing here spawns threads: the owner polls [`TaskQueue::due`] with the
//! current monotonic reading and dispatches whatever came due. Each
//! [`TaskQueue::every`] call hands back a [`TaskHandle`] that the caller keeps
//! and cancels when the work it belongs to ends.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Debug)]
struct Task<T> {
    handle: TaskHandle,
    kind: T,
    next_due: Duration,
    period: Duration,
}

#[derive(Debug)]
pub struct TaskQueue<T> {
    next_id: u64,
    tasks: Vec<Task<T>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            tasks: Vec::new(),
        }
    }
}

impl<T: Clone> TaskQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// first run is one `period` after `now`
    pub fn every(&mut self, now: Duration, period: Duration, kind: T) -> TaskHandle {
        let period = period.max(Duration::from_millis(1));
        self.next_id += 1;
        let handle = TaskHandle(self.next_id);
        self.tasks.push(Task {
            handle,
            kind,
            next_due: now + period,
            period,
        });
        handle
    }

    /// Returns true if the handle was still scheduled.
    /// Cancelling an already finished or cancelled task is a no-op.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.handle != handle);
        before != self.tasks.len()
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Collects every task due at `now`, in scheduling order.
    ///
    /// A periodic task fires at most once per call. If the loop fell behind
    /// by more than a period the missed runs are dropped rather than
    /// replayed in a burst.
    pub fn due(&mut self, now: Duration) -> Vec<(TaskHandle, T)> {
        let mut fired = Vec::new();
        for task in self.tasks.iter_mut().filter(|task| task.next_due <= now) {
            fired.push((task.handle, task.kind.clone()));
            task.next_due += task.period;
            if task.next_due <= now {
                task.next_due = now + task.period;
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn periodic_task_fires_each_period() {
        let mut queue = TaskQueue::new();
        let handle = queue.every(secs(0), secs(3), "check");

        assert!(queue.due(secs(2)).is_empty());
        assert_eq!(queue.due(secs(3)), vec![(handle, "check")]);
        assert!(queue.due(secs(4)).is_empty());
        assert_eq!(queue.due(secs(6)), vec![(handle, "check")]);
    }

    #[test]
    fn late_poll_does_not_burst() {
        let mut queue = TaskQueue::new();
        queue.every(secs(0), secs(1), ());

        assert_eq!(queue.due(secs(10)).len(), 1);
        assert!(queue.due(secs(10)).is_empty());
        assert_eq!(queue.due(secs(11)).len(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut queue = TaskQueue::new();
        let fade = queue.every(secs(0), secs(1), "fade");
        let monitor = queue.every(secs(0), secs(3), "monitor");

        assert!(queue.cancel(fade));
        assert!(!queue.cancel(fade));
        assert_eq!(queue.due(secs(3)), vec![(monitor, "monitor")]);

        queue.cancel_all();
        assert!(queue.is_empty());
        assert!(!queue.cancel(monitor));
    }
}
