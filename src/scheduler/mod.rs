//! Cooperative scheduler running tasks on native threads, one at a time.
//! The Scheduler is the "top dog" - every hand-off between tasks flows through it.

mod dispatch;
mod gate;
pub mod scheduler;
mod trace;

pub(crate) use gate::Gate;
pub use scheduler::*;
pub use trace::{DispatchReason, SchedEvent};
