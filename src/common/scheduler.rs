//! Serialization point between producer threads and the main event loop.
//!
//! Producers either raise a [`MainEvent`] or append a task; both paths only
//! hold the internal mutex for the push itself. The dispatcher parks on a
//! condition variable until something is pending, then reads and clears the
//! whole event set in one step.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::common::event::{EventSet, MainEvent};

/// A unit of work executed on the dispatcher with exclusive access to `T`.
pub type Task<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

struct Pending<T> {
    events: EventSet,
    tasks: VecDeque<Task<T>>,
}

struct Inner<T> {
    pending: Mutex<Pending<T>>,
    wake: Condvar,
    dispatcher: Mutex<Option<ThreadId>>,
}

pub struct Scheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(Pending {
                    events: EventSet::EMPTY,
                    tasks: VecDeque::new(),
                }),
                wake: Condvar::new(),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending<T>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `task` to the queue and wakes the dispatcher.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        {
            let mut pending = self.lock();
            pending.tasks.push_back(Box::new(task));
            pending.events.insert(MainEvent::ScheduledTasks);
        }
        self.inner.wake.notify_one();
    }

    /// Raises `event` and wakes the dispatcher.
    pub fn notify(&self, event: MainEvent) {
        self.lock().events.insert(event);
        self.inner.wake.notify_one();
    }

    /// Blocks until at least one event is pending, then takes them all.
    pub fn wait(&self) -> EventSet {
        let mut pending = self.lock();
        while pending.events.is_empty() {
            pending = self
                .inner
                .wake
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        pending.events.take()
    }

    /// Takes the pending events without blocking.
    pub fn take_events(&self) -> EventSet {
        self.lock().events.take()
    }

    /// Moves every queued task out, in enqueue order.
    pub fn take_tasks(&self) -> VecDeque<Task<T>> {
        std::mem::take(&mut self.lock().tasks)
    }

    /// Records the calling thread as the dispatcher.
    pub fn bind_dispatcher(&self) {
        *self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
    }

    /// Returns `true` when called from the thread bound as dispatcher.
    pub fn is_dispatcher(&self) -> bool {
        let bound = *self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        bound == Some(thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn tasks_run_in_enqueue_order() {
        let scheduler: Scheduler<Vec<u32>> = Scheduler::new();
        for i in 0..5 {
            scheduler.schedule(move |log: &mut Vec<u32>| log.push(i));
        }

        let events = scheduler.take_events();
        assert!(events.contains(MainEvent::ScheduledTasks));

        let mut log = Vec::new();
        for task in scheduler.take_tasks() {
            task(&mut log);
        }
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
        assert!(scheduler.take_tasks().is_empty());
    }

    #[test]
    fn wait_returns_every_event_raised_before_the_wake() {
        let scheduler: Scheduler<()> = Scheduler::new();
        scheduler.notify(MainEvent::ClockTick);
        scheduler.notify(MainEvent::NetworkError);
        scheduler.notify(MainEvent::ClockTick);

        let events = scheduler.wait();
        assert_eq!(
            events.iter().collect::<Vec<_>>(),
            vec![MainEvent::NetworkError, MainEvent::ClockTick]
        );
        assert!(scheduler.take_events().is_empty());
    }

    #[test]
    fn wait_wakes_on_schedule_from_another_thread() {
        let scheduler: Scheduler<u32> = Scheduler::new();
        let producer = scheduler.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.schedule(|value: &mut u32| *value += 1);
        });

        let events = scheduler.wait();
        handle.join().expect("producer thread panicked");
        assert!(events.contains(MainEvent::ScheduledTasks));

        let mut value = 0;
        for task in scheduler.take_tasks() {
            task(&mut value);
        }
        assert_eq!(value, 1);
    }

    #[test]
    fn dispatcher_identity_follows_binding_thread() {
        let scheduler: Scheduler<()> = Scheduler::new();
        assert!(!scheduler.is_dispatcher());

        scheduler.bind_dispatcher();
        assert!(scheduler.is_dispatcher());

        let other = scheduler.clone();
        let seen = thread::spawn(move || other.is_dispatcher())
            .join()
            .expect("thread panicked");
        assert!(!seen);
    }
}
