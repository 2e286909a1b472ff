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

//! Standalone hand-off benchmark.
//! Two equal-priority tasks ping-pong the baton through round-robin rotation.
//! Configure with `BATON_QUANTUM` (default 1, so every yield rotates).

use baton::{DispatchReason, SchedConfig, SchedEvent, Scheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Baton Hand-off Benchmark");
    println!("========================");

    let config = SchedConfig::new(1, 0)
        .with_trace_capacity(1 << 20)
        .with_env_overrides()?;
    let yields_per_task: u64 = 100_000;
    println!(
        "Two tasks, {yields_per_task} yields each, quantum {}",
        config.quantum
    );

    let scheduler = Scheduler::init(config)?;
    let yields = Arc::new(AtomicU64::new(0));

    let start_time = Instant::now();

    let (inner, counter) = (scheduler.clone(), yields.clone());
    scheduler.fork(3, move |_| {
        let (peer, peer_counter) = (inner.clone(), counter.clone());
        if let Err(err) = inner.fork(3, move |_| {
            for _ in 0..yields_per_task {
                peer_counter.fetch_add(1, Ordering::Relaxed);
                peer.exec();
            }
        }) {
            eprintln!("Failed to fork peer: {err}");
            return;
        }
        for _ in 0..yields_per_task {
            counter.fetch_add(1, Ordering::Relaxed);
            inner.exec();
        }
    })?;
    scheduler.teardown();

    let total_time = start_time.elapsed();
    let rotations = scheduler
        .trace()
        .iter()
        .filter(|event| {
            matches!(
                event,
                SchedEvent::Dispatched {
                    reason: DispatchReason::RoundRobin,
                    ..
                }
            )
        })
        .count();
    let total_yields = yields.load(Ordering::Relaxed);

    println!("Benchmark completed!");
    println!("Total time: {total_time:?}");
    println!("Yields: {total_yields}");
    println!("Round-robin hand-offs (traced): {rotations}");
    if rotations > 0 {
        println!("Average per hand-off: {:?}", total_time / rotations as u32);
    }

    Ok(())
}
