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

//! Scheduler configuration and system-wide limits.

use crate::error::{InvalidArgument, Result};
use crate::task::Priority;
use std::str::FromStr;

/// Highest priority a task may be forked with
pub const MAX_PRIORITY: Priority = 5;

/// Highest number of I/O devices a scheduler may be configured with
pub const MAX_DEVICES: usize = 256;

/// Default soft ceiling on the number of tasks admitted over a scheduler's lifetime
pub const DEFAULT_MAX_THREADS: usize = 500;

/// Default number of events kept in the scheduling trace
pub const DEFAULT_TRACE_CAPACITY: usize = 4096;

/// Configuration for a scheduler instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedConfig {
    /// Ticks a task may consume before it rotates with equal-priority peers
    pub quantum: u32,
    /// Number of I/O devices tasks may wait on
    pub io_devices: usize,
    /// Soft limit on admitted tasks
    pub max_threads: usize,
    /// Stack size for native task threads, platform default when unset
    pub stack_size: Option<usize>,
    /// Prefix for native thread names
    pub thread_name: String,
    /// Trace events retained, 0 disables tracing
    pub trace_capacity: usize,
}

impl SchedConfig {
    pub fn new(quantum: u32, io_devices: usize) -> Self {
        Self {
            quantum,
            io_devices,
            max_threads: DEFAULT_MAX_THREADS,
            stack_size: None,
            thread_name: "baton-task".to_string(),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Check the configuration against the system limits
    pub fn validate(&self) -> Result<()> {
        if self.quantum == 0 {
            return Err(InvalidArgument::ZeroQuantum.into());
        }
        if self.io_devices > MAX_DEVICES {
            return Err(InvalidArgument::TooManyDevices {
                requested: self.io_devices,
                max: MAX_DEVICES,
            }
            .into());
        }
        Ok(())
    }

    /// Overlay `BATON_*` environment variables on top of this configuration.
    ///
    /// Recognized: `BATON_QUANTUM`, `BATON_IO_DEVICES`, `BATON_MAX_THREADS`,
    /// `BATON_TRACE_CAPACITY`. Unset variables leave the field alone.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.overlay(|var| std::env::var(var).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(quantum) = parse_var(&lookup, "BATON_QUANTUM")? {
            self.quantum = quantum;
        }
        if let Some(io_devices) = parse_var(&lookup, "BATON_IO_DEVICES")? {
            self.io_devices = io_devices;
        }
        if let Some(max_threads) = parse_var(&lookup, "BATON_MAX_THREADS")? {
            self.max_threads = max_threads;
        }
        if let Some(capacity) = parse_var(&lookup, "BATON_TRACE_CAPACITY")? {
            self.trace_capacity = capacity;
        }
        Ok(self)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            InvalidArgument::Config {
                var: var.to_string(),
                value,
            }
            .into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedError;
    use std::collections::HashMap;

    #[test]
    fn test_validate_limits() {
        assert!(SchedConfig::new(1, 0).validate().is_ok());
        assert!(SchedConfig::new(10, MAX_DEVICES).validate().is_ok());

        assert_eq!(
            SchedConfig::new(0, 1).validate(),
            Err(SchedError::InvalidArgument(InvalidArgument::ZeroQuantum))
        );
        assert_eq!(
            SchedConfig::new(1, MAX_DEVICES + 1).validate(),
            Err(SchedError::InvalidArgument(InvalidArgument::TooManyDevices {
                requested: MAX_DEVICES + 1,
                max: MAX_DEVICES,
            }))
        );
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [("BATON_QUANTUM", "7"), ("BATON_MAX_THREADS", " 12 ")]
            .into_iter()
            .collect();

        let config = SchedConfig::new(2, 3)
            .overlay(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.quantum, 7);
        assert_eq!(config.io_devices, 3);
        assert_eq!(config.max_threads, 12);
        assert_eq!(config.trace_capacity, DEFAULT_TRACE_CAPACITY);
    }

    #[test]
    fn test_env_overrides_read_process_environment() {
        let base = SchedConfig::new(2, 3).with_thread_name("env");
        let expected = base.clone().overlay(|var| std::env::var(var).ok());

        assert_eq!(base.with_env_overrides(), expected);
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let result = SchedConfig::new(2, 3).overlay(|var| {
            (var == "BATON_IO_DEVICES").then(|| "lots".to_string())
        });

        assert_eq!(
            result,
            Err(SchedError::InvalidArgument(InvalidArgument::Config {
                var: "BATON_IO_DEVICES".to_string(),
                value: "lots".to_string(),
            }))
        );
    }
}
