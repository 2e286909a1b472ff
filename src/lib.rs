//! Baton: a cooperative, priority-driven task scheduler
//!
//! Runs many native threads as if they shared a single processor: exactly one
//! task executes at a time, and control moves between tasks only at explicit
//! yield points, according to priority and a round-robin time quantum.

pub mod config;
pub mod error;
pub mod queue;
pub mod scenario;
pub mod scheduler;
pub mod task;


// Re-export main public APIs
pub use config::{MAX_DEVICES, MAX_PRIORITY, SchedConfig};
pub use error::{InvalidArgument, Result, SchedError};
pub use scheduler::{DispatchReason, SchedEvent, Scheduler};
pub use task::{Priority, TaskId, TaskInfo, TaskState};
