//! Scheduler core: a single worker driving commands by per-task time windows.
//!
//! Producers submit named tasks over a bounded ingress channel; one worker
//! moves them between a waiting queue (earliest eligibility in the future)
//! and a pending queue (execution window open), or parks them in the idle
//! ring, and executes at most one command per tick. Command failures surface
//! on a bounded error stream and never stop the worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::{MonoClock, MonoTime};
use crate::command::Command;
use crate::error::{CommandError, SchedulerError};
use crate::queue::{TaskQueue, TimedTask};
use crate::ring::IdleRing;
use crate::schedule::{Schedule, ScheduleFlags, Task};

type Registry = Arc<Mutex<HashMap<Arc<str>, Arc<Task>>>>;

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    added: AtomicU64,
    removed: AtomicU64,
    executions: AtomicU64,
    command_errors: AtomicU64,
    retired: AtomicU64,
}

/// Point-in-time view of the scheduler counters, cumulative since
/// construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Tasks accepted by `add`.
    pub added: u64,
    /// Successful external `remove` calls.
    pub removed: u64,
    /// Commands executed (success or failure).
    pub executions: u64,
    /// Errors reported on the error stream.
    pub command_errors: u64,
    /// Tasks retired and finalized.
    pub retired: u64,
}

// ============================================================================
// Scheduler surface
// ============================================================================

struct Lifecycle {
    ingress: Option<mpsc::Sender<Arc<Task>>>,
    worker: Option<JoinHandle<()>>,
}

/// Drives user commands according to per-task schedules, one at a time.
///
/// Construct with [`Scheduler::new`], spawn the worker with
/// [`Scheduler::start`], then submit and retract tasks from any number of
/// producers. A stopped scheduler can be started again.
pub struct Scheduler {
    ingress_buffer: usize,
    registry: Registry,
    lifecycle: Mutex<Lifecycle>,
    counters: Arc<Counters>,
}

impl Scheduler {
    /// Create an unstarted scheduler. `ingress_buffer` sizes the
    /// producer-to-worker channel; higher values use more memory but can
    /// avoid producer stalls, and a value around 10 is usually sufficient.
    ///
    /// # Panics
    /// Panics if `ingress_buffer` is zero; a bounded channel needs at least
    /// one slot.
    pub fn new(ingress_buffer: usize) -> Self {
        assert!(ingress_buffer > 0, "ingress buffer must be at least 1");
        Self {
            ingress_buffer,
            registry: Arc::new(Mutex::new(HashMap::new())),
            lifecycle: Mutex::new(Lifecycle {
                ingress: None,
                worker: None,
            }),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Spawn the worker and return the error stream. `error_backlog` sizes
    /// the stream (clamped to at least one slot); once it is full, the worker
    /// blocks before reporting the next error, so consumers must drain.
    ///
    /// Must be called within a tokio runtime. Fails with
    /// [`SchedulerError::AlreadyRunning`] until a previous worker has been
    /// reaped by [`Scheduler::wait_stop`].
    pub fn start(
        &self,
        error_backlog: usize,
    ) -> Result<mpsc::Receiver<CommandError>, SchedulerError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(self.ingress_buffer);
        let (error_tx, error_rx) = mpsc::channel(error_backlog.max(1));
        self.registry.lock().unwrap().clear();

        let worker = Worker {
            clock: MonoClock::new(),
            ingress: ingress_rx,
            errors: error_tx,
            registry: Arc::clone(&self.registry),
            waiting: TaskQueue::with_capacity(self.ingress_buffer),
            pending: TaskQueue::with_capacity(self.ingress_buffer),
            idle: IdleRing::new(),
            counters: Arc::clone(&self.counters),
        };
        lifecycle.ingress = Some(ingress_tx);
        lifecycle.worker = Some(tokio::spawn(worker.run()));
        info!("scheduler started");
        Ok(error_rx)
    }

    /// Submit a new task. The command first becomes eligible
    /// `schedule.min_wait` after intake and is targeted to run by
    /// `schedule.max_wait`; an `IDLE` task instead joins the idle ring.
    ///
    /// Fails if a live task already carries `name`, if the window is
    /// inverted, or if the scheduler is not running. Blocks while the ingress
    /// channel is full.
    pub async fn add(
        &self,
        name: &str,
        command: impl Command + 'static,
        schedule: Schedule,
    ) -> Result<(), SchedulerError> {
        if schedule.max_wait < schedule.min_wait {
            return Err(SchedulerError::InvalidWindow {
                min_wait: schedule.min_wait,
                max_wait: schedule.max_wait,
            });
        }
        let ingress = {
            let lifecycle = self.lifecycle.lock().unwrap();
            lifecycle
                .ingress
                .clone()
                .ok_or(SchedulerError::NotRunning)?
        };
        let task = {
            let mut registry = self.registry.lock().unwrap();
            if registry.get(name).is_some_and(|t| !t.is_removed()) {
                return Err(SchedulerError::DuplicateName(name.to_owned()));
            }
            let task = Arc::new(Task::new(name, Box::new(command), schedule));
            registry.insert(Arc::clone(task.name()), Arc::clone(&task));
            task
        };
        // The registry lock is not held across the send: a full channel must
        // block this producer, not `remove` callers or the worker's retire
        // path.
        if ingress.send(task).await.is_err() {
            self.registry.lock().unwrap().remove(name);
            return Err(SchedulerError::NotRunning);
        }
        self.counters.added.fetch_add(1, Ordering::Relaxed);
        debug!(task = name, "task submitted");
        Ok(())
    }

    /// Mark the named task removed. Takes effect before any execution that
    /// has not yet started; an in-flight command is never interrupted. The
    /// worker reaps the task at its next encounter, which for a long window
    /// can be as late as the task's current deadline.
    pub fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        let registry = self.registry.lock().unwrap();
        match registry.get(name) {
            Some(task) if !task.is_removed() => {
                task.mark_removed();
                self.counters.removed.fetch_add(1, Ordering::Relaxed);
                debug!(task = name, "task marked removed");
                Ok(())
            }
            _ => Err(SchedulerError::UnknownName(name.to_owned())),
        }
    }

    /// Close the ingress channel, letting the worker drain and exit. Does not
    /// wait; idempotent, and a no-op when not running.
    pub fn signal_stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.ingress.take().is_some() {
            info!("scheduler stop signalled");
        }
    }

    /// Wait for the worker to drain and exit after [`Scheduler::signal_stop`].
    /// Without a stop signal this waits until one arrives from elsewhere.
    pub async fn wait_stop(&self) {
        let worker = self.lifecycle.lock().unwrap().worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
            info!("scheduler stopped");
        }
    }

    /// [`Scheduler::signal_stop`] and [`Scheduler::wait_stop`] in one call.
    pub async fn stop(&self) {
        self.signal_stop();
        self.wait_stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().unwrap().worker.is_some()
    }

    /// Snapshot the execution counters.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            added: self.counters.added.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
            executions: self.counters.executions.load(Ordering::Relaxed),
            command_errors: self.counters.command_errors.load(Ordering::Relaxed),
            retired: self.counters.retired.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

enum Intake {
    Task(Arc<Task>),
    Nothing,
    Closed,
}

struct Worker {
    clock: MonoClock,
    ingress: mpsc::Receiver<Arc<Task>>,
    errors: mpsc::Sender<CommandError>,
    registry: Registry,
    waiting: TaskQueue,
    pending: TaskQueue,
    idle: IdleRing<Arc<Task>>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(mut self) {
        debug!("worker loop entered");
        while self.tick().await {}
        debug!(
            waiting = self.waiting.len(),
            pending = self.pending.len(),
            idle = self.idle.len(),
            "worker loop exited"
        );
        // Dropping `self.errors` closes the error stream for the consumer.
    }

    /// One scheduling tick. Returns false once ingress is closed and drained.
    async fn tick(&mut self) -> bool {
        let mut now = self.clock.now();

        // Promote at most one due task from waiting into its pending window.
        if self.waiting.peek().is_some_and(|head| head.due <= now) {
            let mut candidate = self.waiting.pop().expect("peeked waiting head");
            let window = candidate.task.max_wait() - candidate.task.min_wait();
            candidate.due = candidate.due + window;
            self.pending.push(candidate);
        }

        // Execute one pending task whose deadline has passed. Strictly `<`,
        // unlike the promotion above: with a zero-width window the promoted
        // deadline equals the waiting deadline, and the task must not be
        // promoted and executed within the same instant.
        let mut did_execute = false;
        if self.pending.peek().is_some_and(|head| head.due < now) {
            let mut candidate = self.pending.pop().expect("peeked pending head");
            let keep = !self.execute(&candidate.task).await;
            did_execute = true;
            if keep {
                candidate.due = candidate.due + candidate.task.min_wait();
                let flags = candidate.task.flags();
                if candidate.due < now && !flags.contains(ScheduleFlags::BURST) {
                    // Behind schedule: drop the backlog instead of firing
                    // back-to-back.
                    candidate.due = now + candidate.task.min_wait();
                }
                self.waiting.push(candidate);
            }
        }

        // One idle task, but only on an otherwise empty tick.
        if !did_execute {
            if let Some(task) = self.idle.next().cloned() {
                let remove = self.execute(&task).await;
                did_execute = true;
                if remove {
                    self.idle.remove();
                }
            }
        }

        // Wait for the next deadline or for a new submission. When work was
        // done or is already due, only poll ingress so a loaded scheduler
        // neither starves producers nor sleeps on due work.
        let later = [self.waiting.peek(), self.pending.peek()]
            .into_iter()
            .flatten()
            .map(|entry| entry.due)
            .min()
            .unwrap_or(MonoTime::FAR_FUTURE);

        let intake = if did_execute || later <= now {
            match self.ingress.try_recv() {
                Ok(task) => Intake::Task(task),
                Err(mpsc::error::TryRecvError::Empty) => Intake::Nothing,
                Err(mpsc::error::TryRecvError::Disconnected) => Intake::Closed,
            }
        } else if later == MonoTime::FAR_FUTURE {
            // Nothing scheduled at all; sleep until a producer shows up.
            match self.ingress.recv().await {
                Some(task) => {
                    now = self.clock.now();
                    Intake::Task(task)
                }
                None => Intake::Closed,
            }
        } else {
            tokio::select! {
                received = self.ingress.recv() => match received {
                    Some(task) => {
                        now = self.clock.now();
                        Intake::Task(task)
                    }
                    None => Intake::Closed,
                },
                _ = tokio::time::sleep(later.since(now)) => Intake::Nothing,
            }
        };

        match intake {
            Intake::Task(task) => {
                if task.flags().contains(ScheduleFlags::IDLE) {
                    debug!(task = %task.name(), "task joined the idle ring");
                    self.idle.insert(task);
                } else {
                    let due = now + task.min_wait();
                    debug!(task = %task.name(), "task queued");
                    self.waiting.push(TimedTask { due, task });
                }
                true
            }
            Intake::Nothing => true,
            Intake::Closed => false,
        }
    }

    /// Run one candidate command, unless its task is already marked removed.
    /// Returns whether the task should leave the scheduler; when it should,
    /// it is retired here before returning.
    async fn execute(&self, task: &Arc<Task>) -> bool {
        let flags = task.flags();
        let mut should_remove = false;
        if flags.contains(ScheduleFlags::REMOVED) {
            should_remove = true;
        } else {
            self.counters.executions.fetch_add(1, Ordering::Relaxed);
            if let Err(error) = task.command().execute().await {
                debug!(task = %task.name(), "command failed: {error:#}");
                self.counters.command_errors.fetch_add(1, Ordering::Relaxed);
                let report = CommandError {
                    task: Arc::clone(task.name()),
                    error,
                };
                // Blocks while the stream is full: consumers must drain. A
                // dropped receiver only discards the report.
                let _ = self.errors.send(report).await;
                if flags.contains(ScheduleFlags::REMOVE_ON_ERROR) {
                    should_remove = true;
                }
            }
        }
        if !flags.contains(ScheduleFlags::REPEAT) {
            should_remove = true;
        }
        if should_remove {
            self.retire(task);
        }
        should_remove
    }

    /// Permanently retire a task: mark it removed, drop its registry entry,
    /// then fire the one-shot finalizer outside the registry lock.
    fn retire(&self, task: &Arc<Task>) {
        task.mark_removed();
        {
            let mut registry = self.registry.lock().unwrap();
            // The name may have been reused after an external remove; only
            // delete the entry if it still refers to this task.
            if registry
                .get(task.name().as_ref())
                .is_some_and(|live| Arc::ptr_eq(live, task))
            {
                registry.remove(task.name().as_ref());
            }
        }
        task.finalize();
        self.counters.retired.fetch_add(1, Ordering::Relaxed);
        debug!(task = %task.name(), "task retired");
    }
}
