//! Scheduling decisions.
//!
//! `Core` is the state guarded by the baton: the ready queue, the running slot and
//! the trace. Every method runs with the core lock held and only decides; the
//! caller grants the gate of the task it returns after releasing the lock.

use crate::queue::PriorityQueue;
use crate::scheduler::trace::{DispatchReason, SchedEvent, Trace};
use crate::task::{TaskId, TaskState, Tcb};
use std::sync::Arc;

pub(crate) struct Core {
    quantum: u32,
    ready: PriorityQueue<Arc<Tcb>>,
    running: Option<Arc<Tcb>>,
    trace: Trace,
}

impl Core {
    pub fn new(quantum: u32, trace_capacity: usize) -> Self {
        Self {
            quantum,
            ready: PriorityQueue::new(),
            running: None,
            trace: Trace::new(trace_capacity),
        }
    }

    pub fn running(&self) -> Option<&Arc<Tcb>> {
        self.running.as_ref()
    }

    pub fn ready_ids(&self) -> Vec<TaskId> {
        self.ready.iter().map(|tcb| tcb.id()).collect()
    }

    pub fn trace(&self) -> im::Vector<SchedEvent> {
        self.trace.snapshot()
    }

    /// Make a freshly created task eligible to run
    pub fn admit(&mut self, tcb: &Arc<Tcb>) {
        self.trace.record(SchedEvent::Admitted {
            task: tcb.id(),
            priority: tcb.priority(),
        });
        self.enqueue(tcb.clone());
    }

    fn enqueue(&mut self, tcb: Arc<Tcb>) {
        log::trace!("task {} ready at priority {}", tcb.id(), tcb.priority());
        tcb.set_state(TaskState::Ready);
        self.ready.push(tcb);
    }

    fn promote(&mut self, tcb: Arc<Tcb>, reason: DispatchReason) -> Arc<Tcb> {
        log::debug!("dispatch task {} ({reason:?})", tcb.id());
        tcb.set_state(TaskState::Running);
        tcb.refill(self.quantum);
        self.trace.record(SchedEvent::Dispatched {
            task: tcb.id(),
            reason,
        });
        self.running = Some(tcb.clone());
        tcb
    }

    /// Pop the head of the ready queue and give it the processor
    pub fn dispatch_next(&mut self, reason: DispatchReason) -> Option<Arc<Tcb>> {
        let next = self.ready.pop()?;
        Some(self.promote(next, reason))
    }

    /// Voluntary yield on behalf of the running task.
    ///
    /// Returns the task whose gate must be granted: the running task itself when
    /// it keeps the processor, a successor on hand-off, or `None` when the running
    /// task went off-CPU and nothing is ready.
    pub fn reschedule(&mut self) -> Option<Arc<Tcb>> {
        let Some(current) = self.running.clone() else {
            return self.dispatch_next(DispatchReason::Idle);
        };

        let left = current.tick();
        log::trace!("task {} ticks, {left} left", current.id());
        let off_cpu = current.state().is_off_cpu();

        let Some(next) = self.ready.peek().cloned() else {
            if off_cpu {
                // Processor idles until a signal from outside re-dispatches
                self.running = None;
                return None;
            }
            return Some(current);
        };

        if off_cpu || current.priority() < next.priority() {
            self.ready.pop();
            let reason = if off_cpu {
                DispatchReason::Blocked
            } else {
                // Preempted tasks keep whatever is left of their quantum
                self.enqueue(current);
                DispatchReason::Preemption
            };
            return Some(self.promote(next, reason));
        }

        if left <= 0 {
            if next.priority() == current.priority() {
                self.ready.pop();
                current.refill(self.quantum);
                self.enqueue(current);
                return Some(self.promote(next, DispatchReason::RoundRobin));
            }
            current.refill(self.quantum);
        }
        Some(current)
    }

    /// Park the running task on a device; the following reschedule hands off
    pub fn block(&mut self, tcb: &Arc<Tcb>, device: usize) {
        log::debug!("task {} waits on device {device}", tcb.id());
        tcb.block_on(device);
        self.trace.record(SchedEvent::Blocked {
            task: tcb.id(),
            device,
        });
    }

    /// Move every task waiting on `device` to the ready queue, in table order
    pub fn wake<'a>(
        &mut self,
        table: impl IntoIterator<Item = &'a Arc<Tcb>>,
        device: usize,
    ) -> usize {
        let mut woken = 0;
        for tcb in table {
            if tcb.state().is_waiting() && tcb.blocked_device() == Some(device) {
                tcb.clear_device();
                self.trace.record(SchedEvent::Woken {
                    task: tcb.id(),
                    device,
                });
                self.enqueue(tcb.clone());
                woken += 1;
            }
        }
        log::debug!("signal on device {device} woke {woken} task(s)");
        woken
    }

    /// Completion hand-off: retire `tcb` and pick its successor
    pub fn complete(&mut self, tcb: &Arc<Tcb>) -> Option<Arc<Tcb>> {
        tcb.set_state(TaskState::Terminated);
        self.trace.record(SchedEvent::Terminated { task: tcb.id() });
        if self
            .running
            .as_ref()
            .is_some_and(|running| Arc::ptr_eq(running, tcb))
        {
            self.running = None;
        }
        if self.running.is_some() {
            return None;
        }
        self.dispatch_next(DispatchReason::Completion)
    }

    /// Drop scheduling state; the trace stays readable for post-mortems
    pub fn clear(&mut self) {
        self.ready.clear();
        self.running = None;
    }
}
