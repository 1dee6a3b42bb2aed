//! Scheduling collaborator.
//!
//! All callbacks in this crate run on one logical task. The connection and
//! client never block; whenever they need to defer work they hand a closure
//! to a [`Scheduler`]:
//! - `next_tick` runs the closure on the next scheduling turn
//! - `timer` runs it once the delay has elapsed
//!
//! Both preserve FIFO order among closures scheduled for the same turn.
//!
//! [`ManualScheduler`] drives turns explicitly, which makes it the natural
//! fit for tests and for embedding in a foreign event loop. The tokio
//! implementation lives in [`crate::transport::TokioScheduler`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

/// Deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Scheduling collaborator consumed by connections and clients.
pub trait Scheduler {
    /// Run `task` on the next scheduling turn, never synchronously.
    fn next_tick(&self, task: Task);

    /// Run `task` after `delay`.
    fn timer(&self, delay: Duration, task: Task);
}

/// Scheduler whose turns and clock advance only when asked.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use fraggle_client::scheduler::{ManualScheduler, Scheduler};
///
/// let sched = ManualScheduler::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// sched.next_tick(Box::new(move || flag.set(true)));
///
/// assert!(!ran.get());
/// sched.tick();
/// assert!(ran.get());
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    ready: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<(Duration, u64, Task)>>,
    now: Cell<Duration>,
    seq: Cell<u64>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one turn: everything queued before the call, in FIFO order.
    ///
    /// Work scheduled while the turn runs waits for the next turn.
    /// Returns the number of tasks run.
    pub fn tick(&self) -> usize {
        let batch: Vec<Task> = self.ready.borrow_mut().drain(..).collect();
        let n = batch.len();
        for task in batch {
            task();
        }
        n
    }

    /// Run turns until nothing is queued.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.tick();
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    /// Move the clock forward and queue every timer that came due.
    ///
    /// Due timers join the ready queue in deadline order; call `tick` to run them.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
        let now = self.now.get();

        let mut due = Vec::new();
        {
            let mut timers = self.timers.borrow_mut();
            let mut i = 0;
            while i < timers.len() {
                if timers[i].0 <= now {
                    due.push(timers.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        due.sort_by_key(|(deadline, seq, _)| (*deadline, *seq));
        let mut ready = self.ready.borrow_mut();
        for (_, _, task) in due {
            ready.push_back(task);
        }
    }

    /// Number of tasks waiting for the next turn.
    pub fn pending(&self) -> usize {
        self.ready.borrow().len()
    }

    /// Number of timers not yet due.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }
}

impl Scheduler for ManualScheduler {
    fn next_tick(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
    }

    fn timer(&self, delay: Duration, task: Task) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let deadline = self.now.get() + delay;
        self.timers.borrow_mut().push((deadline, seq, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_tick_preserves_fifo() {
        let sched = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            sched.next_tick(Box::new(move || log.borrow_mut().push(i)));
        }

        assert_eq!(sched.tick(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_work_scheduled_during_tick_waits() {
        let sched = Rc::new(ManualScheduler::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (sched.clone(), log.clone());
        sched.next_tick(Box::new(move || {
            l.borrow_mut().push("first");
            let l = l.clone();
            s.next_tick(Box::new(move || l.borrow_mut().push("second")));
        }));

        sched.tick();
        assert_eq!(*log.borrow(), vec!["first"]);
        assert_eq!(sched.pending(), 1);

        sched.tick();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let sched = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (name, ms) in [("slow", 300), ("fast", 100), ("mid", 200)] {
            let log = log.clone();
            sched.timer(
                Duration::from_millis(ms),
                Box::new(move || log.borrow_mut().push(name)),
            );
        }

        sched.advance(Duration::from_millis(150));
        sched.tick();
        assert_eq!(*log.borrow(), vec!["fast"]);
        assert_eq!(sched.pending_timers(), 2);

        sched.advance(Duration::from_millis(500));
        sched.tick();
        assert_eq!(*log.borrow(), vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn test_run_until_idle() {
        let sched = Rc::new(ManualScheduler::new());
        let count = Rc::new(Cell::new(0));

        let (s, c) = (sched.clone(), count.clone());
        sched.next_tick(Box::new(move || {
            c.set(c.get() + 1);
            let c = c.clone();
            s.next_tick(Box::new(move || c.set(c.get() + 1)));
        }));

        assert_eq!(sched.run_until_idle(), 2);
        assert_eq!(count.get(), 2);
    }
}
