//! Thread control blocks for cooperatively scheduled tasks.
//! Each task is backed by one native thread and owns a private execution gate.

use crate::queue::Prioritized;
use crate::scheduler::Gate;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::thread::ThreadId;

/// Task priority, higher runs first
pub type Priority = u32;

/// Sentinel for "not blocked on any device"
const NO_DEVICE: usize = usize::MAX;

/// Index of a task in the scheduler's thread table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task execution states
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New = 0,        // Allocated, native thread not yet admitted
    Ready = 1,      // In the ready queue
    Running = 2,    // Holds the baton
    Waiting = 3,    // Blocked on an I/O device
    Terminated = 4, // Work function returned
}

impl From<u8> for TaskState {
    fn from(value: u8) -> Self {
        match value {
            0 => TaskState::New,
            1 => TaskState::Ready,
            2 => TaskState::Running,
            3 => TaskState::Waiting,
            _ => TaskState::Terminated,
        }
    }
}

macro_rules! state_predicates {
    ($($state:ident),* $(,)?) => {
        paste::paste! {
            impl TaskState {
                $(
                    pub fn [<is_ $state:snake>](self) -> bool {
                        self == TaskState::$state
                    }
                )*
            }
        }
    };
}

state_predicates!(New, Ready, Running, Waiting, Terminated);

impl TaskState {
    /// Blocked or finished: the task cannot keep the processor
    pub fn is_off_cpu(self) -> bool {
        matches!(self, TaskState::Waiting | TaskState::Terminated)
    }
}

/// Thread control block.
///
/// Identity and priority are fixed at admission. The mutable fields are atomics so
/// observers can read them at any time, but they are only written by whichever
/// thread holds the baton.
pub struct Tcb {
    id: TaskId,
    priority: Priority,
    state: AtomicU8,
    remaining_quantum: AtomicI64,
    blocked_device: AtomicUsize,
    native: OnceLock<ThreadId>,
    panicked: AtomicBool,
    gate: Gate,
}

impl Tcb {
    pub(crate) fn new(id: TaskId, priority: Priority, quantum: u32) -> Self {
        Self {
            id,
            priority,
            state: AtomicU8::new(TaskState::New as u8),
            remaining_quantum: AtomicI64::new(i64::from(quantum)),
            blocked_device: AtomicUsize::new(NO_DEVICE),
            native: OnceLock::new(),
            panicked: AtomicBool::new(false),
            gate: Gate::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn remaining_quantum(&self) -> i64 {
        self.remaining_quantum.load(Ordering::SeqCst)
    }

    pub(crate) fn refill(&self, quantum: u32) {
        self.remaining_quantum
            .store(i64::from(quantum), Ordering::SeqCst);
    }

    /// Consume one tick, returning what is left
    pub(crate) fn tick(&self) -> i64 {
        self.remaining_quantum.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn blocked_device(&self) -> Option<usize> {
        match self.blocked_device.load(Ordering::SeqCst) {
            NO_DEVICE => None,
            device => Some(device),
        }
    }

    pub(crate) fn block_on(&self, device: usize) {
        self.blocked_device.store(device, Ordering::SeqCst);
        self.set_state(TaskState::Waiting);
    }

    pub(crate) fn clear_device(&self) {
        self.blocked_device.store(NO_DEVICE, Ordering::SeqCst);
    }

    /// Native thread backing this task, set once the thread is spawned
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.native.get().copied()
    }

    pub(crate) fn bind_thread(&self, thread: ThreadId) {
        // Only the admitting thread binds, exactly once
        let _ = self.native.set(thread);
    }

    pub fn panicked(&self) -> bool {
        self.panicked.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_panicked(&self) {
        self.panicked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Point-in-time copy of the observable fields
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            thread: self.thread_id(),
            priority: self.priority,
            state: self.state(),
            remaining_quantum: self.remaining_quantum(),
            blocked_device: self.blocked_device(),
            panicked: self.panicked(),
        }
    }
}

impl Prioritized for Tcb {
    fn priority(&self) -> Priority {
        self.priority
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("remaining_quantum", &self.remaining_quantum())
            .field("blocked_device", &self.blocked_device())
            .finish()
    }
}

/// Snapshot of a task as seen by observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub thread: Option<ThreadId>,
    pub priority: Priority,
    pub state: TaskState,
    pub remaining_quantum: i64,
    pub blocked_device: Option<usize>,
    pub panicked: bool,
}
