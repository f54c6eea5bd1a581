//! Cadence - single-worker task scheduler with per-task time windows.
//!
//! Producers submit named commands with a [`schedule::Schedule`]; one worker
//! executes at most one command per tick, promoting tasks between a waiting
//! queue and a pending queue, and cycling background tasks through an idle
//! ring when nothing timed is due.

pub mod clock;
pub mod command;
pub mod error;
pub mod ring;
pub mod schedule;
pub mod scheduler;

mod queue;

pub use command::{Command, FnCommand};
pub use error::{CommandError, SchedulerError};
pub use schedule::{Schedule, ScheduleFlags};
pub use scheduler::{Scheduler, StatsSnapshot};
