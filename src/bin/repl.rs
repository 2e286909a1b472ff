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

//! Interactive shell for building and running scheduling scenarios.
//! Provides readline support, history, and a printout of every run's schedule.

use baton::scenario::{Report, Scenario};
use baton::{DispatchReason, SchedEvent};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

/// REPL state: the scenario being edited
pub struct Repl {
    scenario: Scenario,
    editor: DefaultEditor,
    line: usize,
}

impl Repl {
    pub fn new() -> std::result::Result<Self, ReadlineError> {
        Ok(Self {
            scenario: Scenario::default(),
            editor: DefaultEditor::new()?,
            line: 0,
        })
    }

    /// Apply one line of input, returning what to print
    pub fn eval(&mut self, input: &str) -> std::result::Result<String, Box<dyn std::error::Error>> {
        match input {
            "run" => {
                let report = self.scenario.run()?;
                Ok(format_report(&report))
            }
            "show" => Ok(self.scenario.to_string()),
            "clear" => {
                self.scenario = Scenario::default();
                Ok("scenario cleared".to_string())
            }
            _ => {
                if let Some(path) = input.strip_prefix("load ") {
                    let source = std::fs::read_to_string(path.trim())?;
                    self.scenario = Scenario::parse(&source)?;
                    return Ok(format!("loaded {} task(s)", self.scenario.tasks.len()));
                }
                self.line += 1;
                self.scenario.apply_line(self.line, input)?;
                Ok(String::new())
            }
        }
    }

    /// Run the main REPL loop
    pub fn run(&mut self) -> std::result::Result<(), ReadlineError> {
        println!("Baton scheduler shell");
        println!("Describe tasks, then 'run' to schedule them. 'help' lists commands.");
        println!();

        loop {
            match self.editor.readline("baton> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    if line == "quit" || line == "exit" || line == ":q" {
                        println!("Goodbye!");
                        break;
                    }

                    if line == "help" || line == ":help" {
                        print_help();
                        continue;
                    }

                    self.editor.add_history_entry(line)?;

                    match self.eval(line) {
                        Ok(output) if output.is_empty() => {}
                        Ok(output) => println!("{}", output.trim_end()),
                        Err(err) => println!("Error: {err}"),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("^D");
                    break;
                }
                Err(err) => {
                    println!("Error: {err:?}");
                    break;
                }
            }
        }

        Ok(())
    }
}

const HELP: &str = "\
Scenario lines:
  init <quantum> <devices>         ; scheduler configuration (default 2 1)
  task <name> <priority> <op>...   ; declare or replace a task
  main <name>                      ; task forked by the shell

Operations:
  exec          ; consume a tick, maybe yield
  wait:<d>      ; block on device d
  signal:<d>    ; wake everything blocked on device d
  fork:<name>   ; start another declared task

Commands:
  run           ; run the scenario and print the schedule
                ; blocks until every task finishes, so a wait
                ; nothing signals hangs the shell
  show          ; print the scenario as a script
  load <file>   ; replace the scenario with a script file
  clear         ; start over
  help, :help   ; show this help
  quit, exit, :q; exit the shell
";

fn print_help() {
    println!("{HELP}");
}

fn format_event(event: &SchedEvent) -> String {
    match event {
        SchedEvent::Admitted { task, priority } => format!("admit    {task} at priority {priority}"),
        SchedEvent::Dispatched { task, reason } => {
            let why = match reason {
                DispatchReason::Idle => "processor idle",
                DispatchReason::Preemption => "preempted lower priority",
                DispatchReason::RoundRobin => "quantum expired",
                DispatchReason::Blocked => "previous task blocked",
                DispatchReason::Completion => "previous task finished",
            };
            format!("dispatch {task} ({why})")
        }
        SchedEvent::Blocked { task, device } => format!("block    {task} on device {device}"),
        SchedEvent::Woken { task, device } => format!("wake     {task} from device {device}"),
        SchedEvent::Terminated { task } => format!("finish   {task}"),
    }
}

fn format_report(report: &Report) -> String {
    let mut out = String::from("log:\n");
    for line in &report.log {
        out.push_str(&format!("  {line}\n"));
    }
    out.push_str("schedule:\n");
    for event in report.trace.iter() {
        out.push_str(&format!("  {}\n", format_event(event)));
    }
    out
}

fn main() {
    env_logger::init();

    // A script argument runs once without the interactive shell
    if let Some(path) = std::env::args().nth(1) {
        let outcome = std::fs::read_to_string(&path)
            .map_err(|err| err.to_string())
            .and_then(|source| Scenario::parse(&source).map_err(|err| err.to_string()))
            .and_then(|scenario| scenario.run().map_err(|err| err.to_string()));
        match outcome {
            Ok(report) => print!("{}", format_report(&report)),
            Err(err) => {
                eprintln!("{path}: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    let outcome = Repl::new().and_then(|mut repl| repl.run());
    if let Err(err) = outcome {
        eprintln!("REPL error: {err}");
        std::process::exit(1);
    }
}
