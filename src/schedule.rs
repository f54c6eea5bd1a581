//! Schedule descriptors and the internal task record.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::command::Command;

/// Bitset of scheduling behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleFlags(u32);

impl ScheduleFlags {
    /// Keep the task after an execution instead of retiring it.
    pub const REPEAT: ScheduleFlags = ScheduleFlags(1);
    /// Run the task only when no timed task is due.
    pub const IDLE: ScheduleFlags = ScheduleFlags(1 << 1);
    /// Preserve the execution backlog when the worker falls behind, instead
    /// of skipping missed periods. Only meaningful together with `REPEAT`.
    pub const BURST: ScheduleFlags = ScheduleFlags(1 << 2);
    /// Retire the task when its command returns an error. Only meaningful
    /// together with `REPEAT`.
    pub const REMOVE_ON_ERROR: ScheduleFlags = ScheduleFlags(1 << 3);

    /// Task is logically retired. Internal; set at most once, never cleared.
    pub(crate) const REMOVED: ScheduleFlags = ScheduleFlags(1 << 4);

    pub const fn empty() -> ScheduleFlags {
        ScheduleFlags(0)
    }

    pub const fn contains(self, other: ScheduleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn bits(self) -> u32 {
        self.0
    }

    pub(crate) const fn from_bits(bits: u32) -> ScheduleFlags {
        ScheduleFlags(bits)
    }
}

impl BitOr for ScheduleFlags {
    type Output = ScheduleFlags;

    fn bitor(self, rhs: ScheduleFlags) -> ScheduleFlags {
        ScheduleFlags(self.0 | rhs.0)
    }
}

/// How a command should be driven.
///
/// A task first becomes eligible `min_wait` after intake (or after its
/// previous run) and is targeted to execute by `max_wait`. The upper bound is
/// best effort: a busy worker, or a window narrower than the timer
/// resolution, can exceed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Schedule {
    pub flags: ScheduleFlags,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

/// Internal record for a submitted schedule.
///
/// Everything except the `REMOVED` flag bit and the finalize latch is
/// immutable after submission; both of those are atomic. Deadlines live
/// outside this record, owned by the worker.
pub(crate) struct Task {
    name: Arc<str>,
    flags: AtomicU32,
    min_wait: Duration,
    max_wait: Duration,
    command: Box<dyn Command>,
    finalized: AtomicBool,
}

impl Task {
    pub fn new(name: &str, command: Box<dyn Command>, schedule: Schedule) -> Self {
        Self {
            name: Arc::from(name),
            flags: AtomicU32::new(schedule.flags.bits()),
            min_wait: schedule.min_wait,
            max_wait: schedule.max_wait,
            command,
            finalized: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn min_wait(&self) -> Duration {
        self.min_wait
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn command(&self) -> &dyn Command {
        self.command.as_ref()
    }

    /// Atomically load the flag set.
    pub fn flags(&self) -> ScheduleFlags {
        ScheduleFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// Atomically set the `REMOVED` bit.
    pub fn mark_removed(&self) {
        self.flags
            .fetch_or(ScheduleFlags::REMOVED.bits(), Ordering::AcqRel);
    }

    pub fn is_removed(&self) -> bool {
        self.flags().contains(ScheduleFlags::REMOVED)
    }

    /// Run the command finalizer, at most once across the task lifetime.
    pub fn finalize(&self) {
        if !self.finalized.swap(true, Ordering::AcqRel) {
            self.command.finalize();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("flags", &self.flags())
            .field("min_wait", &self.min_wait)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}
