//! Deferred callbacks on the host's single event-processing thread.
//!
//! Debounce windows and re-probe intervals are driven through a
//! [`Scheduler`] so that tests can use [`ManualScheduler`], a fake clock,
//! instead of real wall-clock delays.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Cancels a callback registered with [`Scheduler::after`].
///
/// Clones share the same flag. Cancelling after the callback ran is a no-op.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Timer facility of the host event loop.
pub trait Scheduler {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Run `task` once, after `delay_ms`, unless the returned token is
    /// cancelled first. Never runs `task` synchronously.
    ///
    /// A timer that cannot be armed is reported by returning an already
    /// cancelled token; `task` is then dropped unrun.
    fn after(&self, delay_ms: u64, task: Task) -> CancelToken;
}

// ── Manual clock ────────────────────────────────────────────────────

/// A fake clock: time only moves when [`advance`](Self::advance) is called.
///
/// Clones share the same clock.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tasklist_store::{ManualScheduler, Scheduler};
///
/// let clock = ManualScheduler::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = Rc::clone(&fired);
/// clock.after(100, Box::new(move || flag.set(true)));
///
/// clock.advance(99);
/// assert!(!fired.get());
/// clock.advance(1);
/// assert!(fired.get());
/// ```
#[derive(Clone, Default)]
pub struct ManualScheduler {
    clock: Rc<RefCell<ManualClock>>,
}

#[derive(Default)]
struct ManualClock {
    now: u64,
    next_seq: u64,
    timers: Vec<Timer>,
}

struct Timer {
    due: u64,
    seq: u64,
    token: CancelToken,
    task: Task,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at `now_ms` instead of zero.
    pub fn starting_at(now_ms: u64) -> Self {
        let scheduler = Self::default();
        scheduler.clock.borrow_mut().now = now_ms;
        scheduler
    }

    /// Move time forward by `ms`, running every callback that falls due, in
    /// due order (registration order on ties). Callbacks registered while
    /// advancing run too if they fall inside the window.
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.clock.borrow().now.saturating_add(ms);
        let mut ran = 0;
        while let Some(timer) = self.pop_due(target) {
            // The clock borrow is released: tasks may schedule more work.
            if !timer.token.is_cancelled() {
                (timer.task)();
                ran += 1;
            }
        }
        self.clock.borrow_mut().now = target;
        ran
    }

    /// Number of registered callbacks that have neither run nor been
    /// cancelled.
    pub fn pending(&self) -> usize {
        self.clock
            .borrow()
            .timers
            .iter()
            .filter(|t| !t.token.is_cancelled())
            .count()
    }

    fn pop_due(&self, target: u64) -> Option<Timer> {
        let mut clock = self.clock.borrow_mut();
        let index = clock
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        let timer = clock.timers.swap_remove(index);
        clock.now = clock.now.max(timer.due);
        Some(timer)
    }
}

impl Scheduler for ManualScheduler {
    fn now_ms(&self) -> u64 {
        self.clock.borrow().now
    }

    fn after(&self, delay_ms: u64, task: Task) -> CancelToken {
        let token = CancelToken::new();
        let mut clock = self.clock.borrow_mut();
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now.saturating_add(delay_ms);
        clock.timers.push(Timer {
            due,
            seq,
            token: token.clone(),
            task,
        });
        token
    }
}

// ── Tokio ───────────────────────────────────────────────────────────

/// Scheduler backed by tokio timers on the current thread's `LocalSet`.
///
/// Every callback is spawned with `tokio::task::spawn_local`, so the store
/// must be driven from inside `LocalSet::run_until` (or a task spawned on
/// it).
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[cfg(feature = "tokio")]
impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "tokio")]
impl Scheduler for TokioScheduler {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn after(&self, delay_ms: u64, task: Task) -> CancelToken {
        let token = CancelToken::new();
        let guard = token.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            if !guard.is_cancelled() {
                task();
            }
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |name: &'static str| -> Task {
            let sink = Rc::clone(&sink);
            Box::new(move || sink.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn runs_in_due_order() {
        let clock = ManualScheduler::new();
        let (log, task) = recorder();

        clock.after(30, task("late"));
        clock.after(10, task("early"));
        clock.after(10, task("early-second"));

        assert_eq!(clock.advance(50), 3);
        assert_eq!(*log.borrow(), vec!["early", "early-second", "late"]);
        assert_eq!(clock.now_ms(), 50);
    }

    #[test]
    fn cancelled_callbacks_never_run() {
        let clock = ManualScheduler::new();
        let (log, task) = recorder();

        let token = clock.after(10, task("cancelled"));
        clock.after(10, task("kept"));
        token.cancel();

        assert_eq!(clock.pending(), 1);
        clock.advance(10);
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn callbacks_can_schedule_within_the_window() {
        let clock = ManualScheduler::starting_at(1_000);
        let fired = Rc::new(Cell::new(0u64));

        let inner_clock = clock.clone();
        let seen = Rc::clone(&fired);
        clock.after(
            10,
            Box::new(move || {
                let seen = Rc::clone(&seen);
                let at = inner_clock.clone();
                inner_clock.after(5, Box::new(move || seen.set(at.now_ms())));
            }),
        );

        clock.advance(20);
        assert_eq!(fired.get(), 1_015);
        assert_eq!(clock.now_ms(), 1_020);
    }

    #[test]
    fn nothing_runs_before_due() {
        let clock = ManualScheduler::new();
        let (log, task) = recorder();
        clock.after(0, task("zero"));
        assert!(log.borrow().is_empty());
        clock.advance(0);
        assert_eq!(*log.borrow(), vec!["zero"]);
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn tokio_scheduler_fires_and_cancels() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let (log, task) = recorder();

                scheduler.after(5, task("fired"));
                let token = scheduler.after(5, task("cancelled"));
                token.cancel();

                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                assert_eq!(*log.borrow(), vec!["fired"]);
            })
            .await;
    }
}
