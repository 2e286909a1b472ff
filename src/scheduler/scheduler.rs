//! Central runtime scheduler - the "top dog" of the system.
//! Owns the thread table and the baton, and drives hand-offs between native threads.
//!
//! Every task runs on its own native thread, but only the holder of the baton
//! executes. A task gives the baton up only at a yield point (`exec`, `wait`,
//! `signal`, `fork`, or returning from its work function); the scheduler then
//! picks a successor and grants that task's gate.

use crate::config::{MAX_PRIORITY, SchedConfig};
use crate::error::{InvalidArgument, Result, SchedError};
use crate::scheduler::dispatch::Core;
use crate::scheduler::trace::{DispatchReason, SchedEvent};
use crate::task::{Priority, TaskId, TaskInfo, Tcb};
use once_cell::sync::Lazy;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

type Work = Box<dyn FnOnce(Priority) + Send + 'static>;

/// The live scheduler; at most one exists between `init` and `teardown`
static INSTANCE: Lazy<Mutex<Option<Scheduler>>> = Lazy::new(|| Mutex::new(None));

thread_local! {
    /// Task backed by the current native thread
    static CURRENT_TASK: RefCell<Option<Arc<Tcb>>> = const { RefCell::new(None) };
}

fn current_tcb() -> Option<Arc<Tcb>> {
    CURRENT_TASK.with(|current| current.borrow().clone())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

struct Shared {
    config: SchedConfig,

    /// The baton: whoever holds this lock decides the next hand-off
    core: Mutex<Core>,

    /// Every task ever admitted, in admission order
    tasks: boxcar::Vec<Arc<Tcb>>,

    /// Native threads not yet joined by teardown
    threads: Mutex<Vec<JoinHandle<()>>>,

    live: AtomicBool,
}

/// Handle to the scheduler. Clones share the same instance; work functions
/// capture a clone to call back into it.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create the scheduler. Fails while another instance is live.
    pub fn init(config: SchedConfig) -> Result<Scheduler> {
        let mut slot = lock(&INSTANCE);
        if slot.is_some() {
            return Err(InvalidArgument::AlreadyInitialized.into());
        }
        config.validate()?;

        let scheduler = Scheduler {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::new(config.quantum, config.trace_capacity)),
                config,
                tasks: boxcar::Vec::new(),
                threads: Mutex::new(Vec::new()),
                live: AtomicBool::new(true),
            }),
        };
        *slot = Some(scheduler.clone());

        log::info!(
            "scheduler initialized: quantum {}, {} device(s)",
            scheduler.shared.config.quantum,
            scheduler.shared.config.io_devices
        );
        Ok(scheduler)
    }

    /// Get the live scheduler, if one is initialized
    pub fn instance() -> Option<Scheduler> {
        lock(&INSTANCE).clone()
    }

    /// Task run by the calling thread, `None` outside scheduled tasks
    pub fn current() -> Option<TaskId> {
        current_tcb().map(|tcb| tcb.id())
    }

    pub fn config(&self) -> &SchedConfig {
        &self.shared.config
    }

    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(InvalidArgument::NotInitialized.into())
        }
    }

    fn check_device(&self, device: usize) -> Result<()> {
        let configured = self.shared.config.io_devices;
        if device < configured {
            Ok(())
        } else {
            Err(SchedError::InvalidDevice { device, configured })
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        lock(&self.shared.core)
    }

    /// Admit a new task running `work` at `priority`.
    ///
    /// The work function receives the task's priority. Called from a scheduled
    /// task this is a yield point, and a higher-priority newcomer takes over
    /// immediately.
    pub fn fork<F>(&self, priority: Priority, work: F) -> Result<TaskId>
    where
        F: FnOnce(Priority) + Send + 'static,
    {
        self.ensure_live()?;
        if priority > MAX_PRIORITY {
            return Err(InvalidArgument::PriorityOutOfRange {
                priority,
                max: MAX_PRIORITY,
            }
            .into());
        }

        let caller = current_tcb();
        let mut core = self.lock_core();

        let admitted = self.shared.tasks.count();
        if admitted >= self.shared.config.max_threads {
            return Err(SchedError::ResourceExhausted {
                reason: format!("task limit of {} reached", self.shared.config.max_threads),
            });
        }

        let tcb = Arc::new(Tcb::new(
            TaskId(admitted),
            priority,
            self.shared.config.quantum,
        ));
        // The new thread parks on its gate before touching anything shared
        let handle = self.spawn(tcb.clone(), Box::new(work))?;
        tcb.bind_thread(handle.thread().id());
        self.shared.tasks.push(tcb.clone());
        lock(&self.shared.threads).push(handle);

        core.admit(&tcb);
        log::debug!("forked task {} at priority {priority}", tcb.id());

        self.hand_off(core, caller.as_ref());
        Ok(tcb.id())
    }

    /// Consume one tick and let the scheduler pick who runs next
    pub fn exec(&self) {
        if !self.is_live() {
            log::warn!("exec on a torn down scheduler ignored");
            return;
        }
        match current_tcb() {
            Some(me) => {
                let core = self.lock_core();
                self.hand_off(core, Some(&me));
            }
            None => log::warn!("exec outside a scheduled task ignored"),
        }
    }

    /// Block the calling task on `device` until a matching `signal`
    pub fn wait(&self, device: usize) -> Result<()> {
        self.ensure_live()?;
        self.check_device(device)?;
        let me = current_tcb().ok_or(InvalidArgument::NotScheduled)?;

        let mut core = self.lock_core();
        core.block(&me, device);
        self.hand_off(core, Some(&me));
        Ok(())
    }

    /// Wake every task waiting on `device`, returning how many were woken
    pub fn signal(&self, device: usize) -> Result<usize> {
        self.ensure_live()?;
        self.check_device(device)?;

        let caller = current_tcb();
        let mut core = self.lock_core();
        let woken = core.wake(self.shared.tasks.iter().map(|(_, tcb)| tcb), device);
        self.hand_off(core, caller.as_ref());
        Ok(woken)
    }

    /// Wait for every task to finish, then retire the scheduler.
    ///
    /// Tasks still waiting on a device nobody will signal make this block forever.
    pub fn teardown(&self) {
        if !self.is_live() {
            return;
        }
        if current_tcb().is_some() {
            log::warn!("teardown from inside a scheduled task ignored");
            return;
        }

        // Running tasks may fork more while we join, so drain until empty
        loop {
            let Some(handle) = lock(&self.shared.threads).pop() else {
                break;
            };
            if handle.join().is_err() {
                log::error!("task thread exited abnormally");
            }
        }

        self.shared.live.store(false, Ordering::SeqCst);
        self.lock_core().clear();

        let mut slot = lock(&INSTANCE);
        if slot
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(&live.shared, &self.shared))
        {
            *slot = None;
        }
        log::info!(
            "scheduler torn down after {} task(s)",
            self.shared.tasks.count()
        );
    }

    /// Give up the baton after a state change made under `core`.
    ///
    /// A scheduled caller yields and blocks until its gate is granted again. An
    /// outside caller holds no baton, so it only starts a task on an idle processor.
    fn hand_off(&self, mut core: MutexGuard<'_, Core>, caller: Option<&Arc<Tcb>>) {
        let grant = match caller {
            Some(me) => {
                debug_assert!(
                    core.running().is_some_and(|running| Arc::ptr_eq(running, me)),
                    "yield from a task that does not hold the baton"
                );
                core.reschedule()
            }
            None if core.running().is_none() => core.dispatch_next(DispatchReason::Idle),
            None => None,
        };
        drop(core);

        if let Some(next) = grant {
            next.gate().grant();
        }
        if let Some(me) = caller {
            me.gate().acquire();
        }
    }

    fn spawn(&self, tcb: Arc<Tcb>, work: Work) -> Result<JoinHandle<()>> {
        let config = &self.shared.config;
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", config.thread_name, tcb.id().index()));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let scheduler = self.clone();
        builder
            .spawn(move || scheduler.run_task(tcb, work))
            .map_err(|err| SchedError::ResourceExhausted {
                reason: format!("cannot spawn task thread: {err}"),
            })
    }

    /// Body of every task thread
    fn run_task(self, tcb: Arc<Tcb>, work: Work) {
        tcb.gate().acquire();
        CURRENT_TASK.with(|current| *current.borrow_mut() = Some(tcb.clone()));

        let priority = tcb.priority();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || work(priority)));
        CURRENT_TASK.with(|current| current.borrow_mut().take());

        if let Err(payload) = outcome {
            tcb.mark_panicked();
            log::error!("task {} panicked: {}", tcb.id(), panic_message(&*payload));
        }

        // Completion hand-off
        let next = self.lock_core().complete(&tcb);
        log::debug!("task {} terminated", tcb.id());
        if let Some(next) = next {
            next.gate().grant();
        }
    }

    /// Task holding the baton, if any
    pub fn running(&self) -> Option<TaskId> {
        self.lock_core().running().map(|tcb| tcb.id())
    }

    /// Ready tasks in the order they would be dispatched
    pub fn ready_queue(&self) -> Vec<TaskId> {
        self.lock_core().ready_ids()
    }

    pub fn task(&self, id: TaskId) -> Option<TaskInfo> {
        self.shared.tasks.get(id.index()).map(|tcb| tcb.info())
    }

    /// Snapshot of every admitted task, in admission order
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.shared.tasks.iter().map(|(_, tcb)| tcb.info()).collect()
    }

    /// Recent scheduling events, oldest first
    pub fn trace(&self) -> im::Vector<SchedEvent> {
        self.lock_core().trace()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("live", &self.is_live())
            .field("tasks", &self.shared.tasks.count())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    static SERIAL: Mutex<()> = Mutex::new(());

    /// Tests share the single live instance, so they take turns
    pub fn serial() -> MutexGuard<'static, ()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let guard = lock(&SERIAL);
        // A failed test may have left its scheduler registered
        lock(&INSTANCE).take();
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::serial;
    use super::*;
    use crate::task::TaskState;
    use std::sync::mpsc;

    #[test]
    fn test_init_rejects_bad_config() {
        let _serial = serial();

        assert_eq!(
            Scheduler::init(SchedConfig::new(0, 1)).unwrap_err(),
            SchedError::InvalidArgument(InvalidArgument::ZeroQuantum)
        );
        assert!(matches!(
            Scheduler::init(SchedConfig::new(1, crate::config::MAX_DEVICES + 1)),
            Err(SchedError::InvalidArgument(InvalidArgument::TooManyDevices { .. }))
        ));
        assert!(Scheduler::instance().is_none());
    }

    #[test]
    fn test_single_live_instance() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 1)).unwrap();
        assert!(scheduler.is_live());
        assert_eq!(
            Scheduler::init(SchedConfig::new(2, 1)).unwrap_err(),
            SchedError::InvalidArgument(InvalidArgument::AlreadyInitialized)
        );
        assert!(Scheduler::instance().is_some());

        scheduler.teardown();
        assert!(!scheduler.is_live());
        assert!(Scheduler::instance().is_none());

        // Second teardown is a no-op, and a fresh init works again
        scheduler.teardown();
        let again = Scheduler::init(SchedConfig::new(3, 0)).unwrap();
        again.teardown();
    }

    #[test]
    fn test_operations_after_teardown() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 1)).unwrap();
        scheduler.teardown();

        let not_initialized = SchedError::InvalidArgument(InvalidArgument::NotInitialized);
        assert_eq!(scheduler.fork(1, |_| {}).unwrap_err(), not_initialized);
        assert_eq!(scheduler.signal(0).unwrap_err(), not_initialized);
        assert_eq!(scheduler.wait(0).unwrap_err(), not_initialized);
        scheduler.exec();
    }

    #[test]
    fn test_fork_validates_priority() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 1)).unwrap();
        assert_eq!(
            scheduler.fork(MAX_PRIORITY + 1, |_| {}).unwrap_err(),
            SchedError::InvalidArgument(InvalidArgument::PriorityOutOfRange {
                priority: MAX_PRIORITY + 1,
                max: MAX_PRIORITY,
            })
        );
        // Nothing was admitted
        assert!(scheduler.tasks().is_empty());
        scheduler.teardown();
    }

    #[test]
    fn test_device_range_checks() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 2)).unwrap();
        assert_eq!(
            scheduler.signal(2).unwrap_err(),
            SchedError::InvalidDevice {
                device: 2,
                configured: 2
            }
        );
        assert_eq!(
            scheduler.wait(5).unwrap_err(),
            SchedError::InvalidDevice {
                device: 5,
                configured: 2
            }
        );
        // In range, but the embedding thread cannot block
        assert_eq!(
            scheduler.wait(1).unwrap_err(),
            SchedError::InvalidArgument(InvalidArgument::NotScheduled)
        );
        assert_eq!(scheduler.signal(1), Ok(0));
        scheduler.teardown();
    }

    #[test]
    fn test_work_receives_priority() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 0)).unwrap();
        let (tx, rx) = mpsc::channel();
        let id = scheduler
            .fork(4, move |priority| {
                tx.send((priority, Scheduler::current())).unwrap();
            })
            .unwrap();
        scheduler.teardown();

        assert_eq!(rx.recv().unwrap(), (4, Some(id)));
        assert_eq!(Scheduler::current(), None);
    }

    #[test]
    fn test_task_limit() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 0).with_max_threads(1)).unwrap();
        let (tx, rx) = mpsc::channel();
        let inner = scheduler.clone();
        scheduler
            .fork(1, move |_| {
                tx.send(inner.fork(1, |_| {})).unwrap();
            })
            .unwrap();
        scheduler.teardown();

        assert!(matches!(
            rx.recv().unwrap(),
            Err(SchedError::ResourceExhausted { .. })
        ));
        assert_eq!(scheduler.tasks().len(), 1);
    }

    #[test]
    fn test_spawn_failure_leaves_no_trace() {
        let _serial = serial();

        // No host can back a 64 TiB stack
        let config = SchedConfig::new(2, 1).with_stack_size(1usize << 46);
        let scheduler = Scheduler::init(config).unwrap();

        assert!(matches!(
            scheduler.fork(1, |_| {}),
            Err(SchedError::ResourceExhausted { .. })
        ));
        assert!(scheduler.tasks().is_empty());
        assert!(scheduler.ready_queue().is_empty());
        assert_eq!(scheduler.running(), None);
        assert!(
            !scheduler
                .trace()
                .iter()
                .any(|event| matches!(event, SchedEvent::Admitted { .. }))
        );
        scheduler.teardown();
    }

    #[test]
    fn test_tasks_end_terminated() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(1, 0).with_thread_name("probe")).unwrap();
        let inner = scheduler.clone();
        let (tx, rx) = mpsc::channel();
        scheduler
            .fork(2, move |_| {
                inner.fork(3, |_| {}).unwrap();
                inner.exec();
                tx.send(thread::current().name().map(str::to_string)).unwrap();
            })
            .unwrap();
        scheduler.teardown();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("probe-0"));
        let tasks = scheduler.tasks();
        assert_eq!(tasks.len(), 2);
        for task in &tasks {
            assert_eq!(task.state, TaskState::Terminated);
            assert!(task.thread.is_some());
        }
        assert_eq!(scheduler.running(), None);
        assert!(scheduler.ready_queue().is_empty());
    }

    #[test]
    fn test_panicking_task_still_hands_off() {
        let _serial = serial();

        let scheduler = Scheduler::init(SchedConfig::new(2, 0)).unwrap();
        let inner = scheduler.clone();
        let (tx, rx) = mpsc::channel();
        let victim = scheduler
            .fork(3, move |_| {
                inner.fork(1, move |_| tx.send("survivor ran").unwrap()).unwrap();
                panic!("boom");
            })
            .unwrap();
        scheduler.teardown();

        assert_eq!(rx.recv().unwrap(), "survivor ran");
        let info = scheduler.task(victim).unwrap();
        assert!(info.panicked);
        assert_eq!(info.state, TaskState::Terminated);
    }
}
