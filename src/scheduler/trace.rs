//! Bounded log of scheduling decisions.
//! Snapshots are persistent vectors, so handing one to an observer is O(1).

use crate::task::{Priority, TaskId};

/// Why a task was given the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReason {
    /// Nothing was running
    Idle,
    /// The running task had strictly lower priority
    Preemption,
    /// The running task exhausted its quantum against an equal-priority peer
    RoundRobin,
    /// The running task blocked on a device
    Blocked,
    /// The running task's work function returned
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedEvent {
    Admitted { task: TaskId, priority: Priority },
    Dispatched { task: TaskId, reason: DispatchReason },
    Blocked { task: TaskId, device: usize },
    Woken { task: TaskId, device: usize },
    Terminated { task: TaskId },
}

#[derive(Debug, Clone)]
pub(crate) struct Trace {
    events: im::Vector<SchedEvent>,
    capacity: usize,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: im::Vector::new(),
            capacity,
        }
    }

    pub fn record(&mut self, event: SchedEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn snapshot(&self) -> im::Vector<SchedEvent> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminated(index: usize) -> SchedEvent {
        SchedEvent::Terminated {
            task: TaskId(index),
        }
    }

    #[test]
    fn test_bounded_capacity() {
        let mut trace = Trace::new(2);
        trace.record(terminated(0));
        trace.record(terminated(1));
        trace.record(terminated(2));

        let events: Vec<SchedEvent> = trace.snapshot().into_iter().collect();
        assert_eq!(events, vec![terminated(1), terminated(2)]);
    }

    #[test]
    fn test_disabled_trace() {
        let mut trace = Trace::new(0);
        trace.record(terminated(0));
        assert!(trace.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mut trace = Trace::new(8);
        trace.record(terminated(0));
        let snapshot = trace.snapshot();

        trace.record(terminated(1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(trace.snapshot().len(), 2);
    }
}
