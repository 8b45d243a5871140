//! Thread-per-unit scheduler.
//!
//! Every execution unit is a host thread that runs the registered user entry
//! closure with the unit's process and register frame. "User code" is that
//! closure: it issues syscalls through [`crate::syscall::dispatch`].
//!
//! Leaving a unit (`exit_current`) and replacing its image (`enter_user`)
//! cannot return, so both unwind with a private marker payload that the
//! unit's runner catches. Any other panic inside a unit is kept and
//! re-raised by [`HostedScheduler::join_all`].

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use spin::Mutex;

use crate::process::{Process, ProcessContext};
use crate::scheduler::{SchedError, Scheduler};

/// User code run by every execution unit.
pub type UserMain = dyn Fn(Arc<Process>, ProcessContext) + Send + Sync;

/// Unwind payload marking an execution unit that left on purpose.
struct UnitExit;

thread_local! {
    /// Process bound to the execution unit running on this thread.
    static CURRENT: RefCell<Option<Arc<Process>>> = const { RefCell::new(None) };
}

/// Process bound to the calling execution unit, if any.
pub fn current_process() -> Option<Arc<Process>> {
    CURRENT.with(|current| current.borrow().clone())
}

#[derive(Default)]
pub struct HostedScheduler {
    user_main: Mutex<Option<Arc<UserMain>>>,
    fail_spawn: AtomicBool,
    units: Mutex<Vec<JoinHandle<()>>>,
    /// Every frame passed to `enter_user`, oldest first
    entered: Mutex<Vec<ProcessContext>>,
}

impl HostedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the closure every unit runs.
    pub fn set_user_main(&self, main: impl Fn(Arc<Process>, ProcessContext) + Send + Sync + 'static) {
        *self.user_main.lock() = Some(Arc::new(main));
    }

    /// Make the next spawn fail with `TooManyThreads`.
    pub fn fail_next_spawn(&self) {
        self.fail_spawn.store(true, Ordering::Release);
    }

    /// Frames handed to `enter_user` so far.
    pub fn entered_frames(&self) -> Vec<ProcessContext> {
        self.entered.lock().clone()
    }

    /// Run `f` as the execution unit of `process` on the calling thread.
    ///
    /// Returns `true` if the unit left through `exit_current` or
    /// `enter_user`, `false` if `f` returned normally.
    pub fn run_as(&self, process: Arc<Process>, f: impl FnOnce()) -> bool {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(process));
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        CURRENT.with(|current| *current.borrow_mut() = previous);
        match result {
            Ok(()) => false,
            Err(payload) if payload.is::<UnitExit>() => true,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Wait for every unit, including units spawned while waiting.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic that escaped a unit.
    pub fn join_all(&self) {
        loop {
            let units = core::mem::take(&mut *self.units.lock());
            if units.is_empty() {
                return;
            }
            for unit in units {
                if let Err(payload) = unit.join() {
                    panic::resume_unwind(payload);
                }
            }
        }
    }

    fn user_main(&self) -> Option<Arc<UserMain>> {
        self.user_main.lock().clone()
    }

    fn leave() -> ! {
        panic::resume_unwind(Box::new(UnitExit))
    }
}

impl Scheduler for HostedScheduler {
    fn spawn_user_thread(
        &self,
        name: &str,
        process: Arc<Process>,
        frame: ProcessContext,
    ) -> Result<(), SchedError> {
        if self.fail_spawn.swap(false, Ordering::AcqRel) {
            return Err(SchedError::TooManyThreads);
        }

        let main = self.user_main();
        let pid = process.pid();
        let unit = thread::Builder::new()
            .name(format!("{}:{}", name, pid))
            .spawn(move || {
                CURRENT.with(|current| *current.borrow_mut() = Some(process.clone()));
                let result = panic::catch_unwind(AssertUnwindSafe(|| match main {
                    Some(main) => main(process, frame),
                    None => warn!("[SCHED] No user entry registered, unit for {} idles out", pid),
                }));
                CURRENT.with(|current| *current.borrow_mut() = None);
                match result {
                    Ok(()) => warn!("[SCHED] User code of process {} returned without exiting", pid),
                    Err(payload) if payload.is::<UnitExit>() => {}
                    Err(payload) => panic::resume_unwind(payload),
                }
            })
            .map_err(|_| SchedError::OutOfMemory)?;

        debug!("[SCHED] Spawned unit for process {}", pid);
        self.units.lock().push(unit);
        Ok(())
    }

    fn enter_user(&self, frame: ProcessContext) -> ! {
        self.entered.lock().push(frame);
        if let (Some(process), Some(main)) = (current_process(), self.user_main()) {
            main(process, frame);
        }
        Self::leave()
    }

    fn exit_current(&self) -> ! {
        Self::leave()
    }
}
