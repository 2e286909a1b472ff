// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Error types returned by scheduler operations.
//! Every failure is reported synchronously to the caller and leaves scheduler state untouched.

use crate::task::Priority;
use thiserror::Error;

/// Scheduler error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// Malformed configuration, priority, or call context
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] InvalidArgument),

    /// The native thread substrate (or the configured thread limit) refused a new task
    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    /// Device index outside the configured range
    #[error("invalid device {device}: {configured} device(s) configured")]
    InvalidDevice { device: usize, configured: usize },
}

/// Reasons an argument or call was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidArgument {
    #[error("a scheduler is already initialized")]
    AlreadyInitialized,

    #[error("time quantum must be positive")]
    ZeroQuantum,

    #[error("{requested} I/O devices requested, at most {max} supported")]
    TooManyDevices { requested: usize, max: usize },

    #[error("priority {priority} is above the maximum of {max}")]
    PriorityOutOfRange { priority: Priority, max: Priority },

    #[error("the scheduler has been torn down")]
    NotInitialized,

    #[error("the calling thread is not a scheduled task")]
    NotScheduled,

    #[error("cannot parse {var}={value:?}")]
    Config { var: String, value: String },
}

pub type Result<T> = std::result::Result<T, SchedError>;
