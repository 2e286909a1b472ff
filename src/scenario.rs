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

//! Line-oriented scenario scripts for exercising the scheduler.
//!
//! ```text
//! # comments start with '#'
//! init 2 1                       # quantum, device count
//! task a 5 fork:b exec wait:0    # name, priority, operations
//! task b 5 exec signal:0
//! main a                         # task forked by the embedding thread
//! ```
//!
//! Operations are `exec`, `wait:<device>`, `signal:<device>` and `fork:<task>`.
//! Each task appends one log line per operation once the operation returns, so the
//! log reads in the order the tasks actually held the processor.

use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::scheduler::{SchedEvent, Scheduler};
use crate::task::{Priority, TaskId, TaskInfo};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("no main task declared")]
    MissingMain,
    #[error("task {0:?} is not declared")]
    UnknownTask(String),
    #[error(transparent)]
    Sched(#[from] SchedError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Exec,
    Wait(usize),
    Signal(usize),
    Fork(String),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Exec => write!(f, "exec"),
            Op::Wait(device) => write!(f, "wait:{device}"),
            Op::Signal(device) => write!(f, "signal:{device}"),
            Op::Fork(task) => write!(f, "fork:{task}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub priority: Priority,
    pub ops: Vec<Op>,
}

/// Result of running a scenario to completion
#[derive(Debug, Clone)]
pub struct Report {
    pub log: Vec<String>,
    pub trace: im::Vector<SchedEvent>,
    pub tasks: Vec<TaskInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub quantum: u32,
    pub devices: usize,
    pub tasks: HashMap<String, TaskSpec>,
    pub main: Option<String>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            quantum: 2,
            devices: 1,
            tasks: HashMap::new(),
            main: None,
        }
    }
}

type Log = Arc<Mutex<Vec<String>>>;

impl Scenario {
    pub fn parse(source: &str) -> Result<Self, ScenarioError> {
        let mut scenario = Scenario::default();
        for (index, line) in source.lines().enumerate() {
            scenario.apply_line(index + 1, line)?;
        }
        Ok(scenario)
    }

    /// Apply a single script line; blank lines and comments are ignored
    pub fn apply_line(&mut self, line: usize, text: &str) -> Result<(), ScenarioError> {
        let text = text.split('#').next().unwrap_or_default();
        let words: Vec<&str> = text.split_whitespace().collect();
        let error = |message: String| ScenarioError::Parse { line, message };

        match words.as_slice() {
            [] => {}
            ["init", quantum, devices] => {
                self.quantum = parse_number(quantum).map_err(error)?;
                self.devices = parse_number(devices).map_err(error)?;
            }
            ["task", name, priority, ops @ ..] => {
                let priority = parse_number(priority).map_err(error)?;
                let ops = ops
                    .iter()
                    .map(|op| parse_op(op))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(error)?;
                self.tasks.insert(
                    name.to_string(),
                    TaskSpec {
                        name: name.to_string(),
                        priority,
                        ops,
                    },
                );
            }
            ["main", name] => self.main = Some(name.to_string()),
            [keyword, ..] => return Err(error(format!("unrecognized directive {keyword:?}"))),
        }
        Ok(())
    }

    /// Every task reachable by name must be declared
    pub fn check(&self) -> Result<&TaskSpec, ScenarioError> {
        let main = self.main.as_deref().ok_or(ScenarioError::MissingMain)?;
        let referenced = self.tasks.values().flat_map(|spec| {
            spec.ops.iter().filter_map(|op| match op {
                Op::Fork(task) => Some(task.as_str()),
                _ => None,
            })
        });
        for name in std::iter::once(main).chain(referenced) {
            if !self.tasks.contains_key(name) {
                return Err(ScenarioError::UnknownTask(name.to_string()));
            }
        }
        Ok(&self.tasks[main])
    }

    /// Run the scenario on a fresh scheduler and wait for every task to finish
    pub fn run(&self) -> Result<Report, ScenarioError> {
        let main = self.check()?;
        let scheduler = Scheduler::init(SchedConfig::new(self.quantum, self.devices))?;

        let specs = Arc::new(self.tasks.clone());
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let forked = fork_spec(&scheduler, &specs, &main.name, &log);
        scheduler.teardown();
        forked?;

        let log = log.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(Report {
            log,
            trace: scheduler.trace(),
            tasks: scheduler.tasks(),
        })
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "init {} {}", self.quantum, self.devices)?;
        let mut names: Vec<&String> = self.tasks.keys().collect();
        names.sort();
        for name in names {
            let spec = &self.tasks[name];
            write!(f, "task {} {}", spec.name, spec.priority)?;
            for op in &spec.ops {
                write!(f, " {op}")?;
            }
            writeln!(f)?;
        }
        if let Some(main) = &self.main {
            writeln!(f, "main {main}")?;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(word: &str) -> Result<T, String> {
    word.parse().map_err(|_| format!("expected a number, found {word:?}"))
}

fn parse_op(word: &str) -> Result<Op, String> {
    match word.split_once(':') {
        None if word == "exec" => Ok(Op::Exec),
        Some(("wait", device)) => parse_number(device).map(Op::Wait),
        Some(("signal", device)) => parse_number(device).map(Op::Signal),
        Some(("fork", task)) if !task.is_empty() => Ok(Op::Fork(task.to_string())),
        _ => Err(format!("unrecognized operation {word:?}")),
    }
}

fn fork_spec(
    scheduler: &Scheduler,
    specs: &Arc<HashMap<String, TaskSpec>>,
    name: &str,
    log: &Log,
) -> Result<TaskId, SchedError> {
    let spec = &specs[name];
    let (scheduler_ref, specs_ref, log_ref) = (scheduler.clone(), specs.clone(), log.clone());
    let name = name.to_string();
    scheduler.fork(spec.priority, move |_| {
        run_ops(&scheduler_ref, &specs_ref, &name, &log_ref)
    })
}

fn run_ops(scheduler: &Scheduler, specs: &Arc<HashMap<String, TaskSpec>>, name: &str, log: &Log) {
    let record = |line: String| {
        log.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{name} {line}"));
    };

    for op in &specs[name].ops {
        let outcome = match op {
            Op::Exec => {
                scheduler.exec();
                Ok(op.to_string())
            }
            Op::Wait(device) => scheduler.wait(*device).map(|()| op.to_string()),
            Op::Signal(device) => scheduler
                .signal(*device)
                .map(|woken| format!("{op} woke {woken}")),
            Op::Fork(child) => {
                fork_spec(scheduler, specs, child, log).map(|id| format!("{op} -> {id}"))
            }
        };
        match outcome {
            Ok(line) => record(line),
            Err(err) => record(format!("{op} failed: {err}")),
        }
    }
    record("done".to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::test_support::serial;

    #[test]
    fn test_parse_script() {
        let scenario = Scenario::parse(
            "# demo\n\
             init 3 2\n\
             task a 4 fork:b exec wait:1   # trailing comment\n\
             task b 1 signal:1\n\
             main a\n",
        )
        .unwrap();

        assert_eq!(scenario.quantum, 3);
        assert_eq!(scenario.devices, 2);
        assert_eq!(scenario.main.as_deref(), Some("a"));
        assert_eq!(
            scenario.tasks["a"].ops,
            vec![Op::Fork("b".to_string()), Op::Exec, Op::Wait(1)]
        );
        assert_eq!(scenario.tasks["b"].priority, 1);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = Scenario::parse("init 2 1\ntask a x\n").unwrap_err();
        assert!(matches!(err, ScenarioError::Parse { line: 2, .. }));

        let err = Scenario::parse("task a 1 jump\n").unwrap_err();
        assert_eq!(
            err,
            ScenarioError::Parse {
                line: 1,
                message: "unrecognized operation \"jump\"".to_string()
            }
        );

        let err = Scenario::parse("launch a\n").unwrap_err();
        assert!(matches!(err, ScenarioError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_check_references() {
        let scenario = Scenario::parse("task a 1 exec\n").unwrap();
        assert_eq!(scenario.check().unwrap_err(), ScenarioError::MissingMain);

        let scenario = Scenario::parse("task a 1 fork:ghost\nmain a\n").unwrap();
        assert_eq!(
            scenario.check().unwrap_err(),
            ScenarioError::UnknownTask("ghost".to_string())
        );
    }

    #[test]
    fn test_display_round_trips() {
        let source = "init 2 1\ntask a 5 fork:b exec\ntask b 5 wait:0\nmain a\n";
        let scenario = Scenario::parse(source).unwrap();
        assert_eq!(scenario.to_string(), source);
        assert_eq!(Scenario::parse(&scenario.to_string()).unwrap(), scenario);
    }

    #[test]
    fn test_run_reports_failures_inline() {
        let _serial = serial();

        let scenario = Scenario::parse("init 1 1\ntask a 2 wait:4 signal:0\nmain a\n").unwrap();
        let report = scenario.run().unwrap();

        assert_eq!(
            report.log,
            vec![
                "a wait:4 failed: invalid device 4: 1 device(s) configured",
                "a signal:0 woke 0",
                "a done",
            ]
        );
    }

    #[test]
    fn test_run_rejects_bad_config() {
        let _serial = serial();

        let scenario = Scenario::parse("init 0 1\ntask a 2 exec\nmain a\n").unwrap();
        assert!(matches!(
            scenario.run(),
            Err(ScenarioError::Sched(SchedError::InvalidArgument(_)))
        ));
    }
}
