//! Threads: named, prioritised units of execution with an observable lifecycle.
//!
//! A [Thread] is configured while [ThreadState::Stopped], started once, and joined by any
//! other task. Each started thread runs on its own host thread; inside it [Thread::current]
//! returns the handle it was started from.
use core::{cell::RefCell, fmt};
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::{self as host, JoinHandle, ThreadId},
};

use config::{THREAD_DEFAULT_STACK_SIZE, THREAD_JOIN_POLL_INTERVAL_TICKS, THREAD_MIN_STACK_SIZE};
use log::{error, info};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    error::{Error, Result},
    interrupt::ensure_task_context,
    mutex::Mutex,
    time::{Tick, delay_ticks, get_ticks},
};

/// Host threads need headroom over the firmware stack budget for formatting and unwinding.
const HOST_STACK_HEADROOM: usize = 64 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum ThreadState {
    Stopped,
    Starting,
    Running,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
pub enum ThreadPriority {
    None = 0,
    Idle = 1,
    Lower = 2,
    Low = 3,
    Normal = 4,
    High = 5,
    Higher = 6,
    Critical = 7,
}

pub type MainFunction = Arc<dyn Fn() -> i32 + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(ThreadState) + Send + Sync>;

struct ThreadData {
    name: String,
    stack_size: usize,
    priority: ThreadPriority,
    affinity: Option<u32>,
    main: Option<MainFunction>,
    state_callback: Option<StateCallback>,
    state: ThreadState,
    return_code: i32,
    handle: Option<JoinHandle<()>>,
}

/// Shared handle to a thread. Clones refer to the same thread.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<Mutex<ThreadData>>,
}

thread_local! {
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
}

fn validate_stack_size(stack_size: usize) -> Result<()> {
    if stack_size < THREAD_MIN_STACK_SIZE || stack_size % 4 != 0 {
        Err(Error::InvalidArgument)
    } else {
        Ok(())
    }
}

fn notify(callback: Option<StateCallback>, state: ThreadState) {
    if let Some(callback) = callback {
        callback(state);
    }
}

impl Thread {
    pub fn new() -> Thread {
        Thread {
            inner: Arc::new(Mutex::new(ThreadData {
                name: String::from("unnamed"),
                stack_size: THREAD_DEFAULT_STACK_SIZE,
                priority: ThreadPriority::Normal,
                affinity: None,
                main: None,
                state_callback: None,
                state: ThreadState::Stopped,
                return_code: 0,
                handle: None,
            })),
        }
    }

    /// Create a fully configured thread that is ready to [start](Thread::start).
    pub fn with_main<F>(name: &str, stack_size: usize, main: F) -> Result<Thread>
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        let thread = Thread::new();
        thread.set_name(name)?;
        thread.set_stack_size(stack_size)?;
        thread.set_main_function(main)?;
        Ok(thread)
    }

    /// The thread started through [Thread::start] that is calling this, if any.
    pub fn current() -> Option<Thread> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn ptr_eq(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Apply `f` to the configuration, which is only mutable while stopped.
    fn configure(&self, f: impl FnOnce(&mut ThreadData)) -> Result<()> {
        let mut data = self.inner.lock();
        if data.state != ThreadState::Stopped {
            return Err(Error::InvalidState);
        }
        f(&mut data);
        Ok(())
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.configure(|data| data.name = String::from(name))
    }

    pub fn set_stack_size(&self, stack_size: usize) -> Result<()> {
        validate_stack_size(stack_size)?;
        self.configure(|data| data.stack_size = stack_size)
    }

    /// Pin the thread to a core. Recorded only: the host scheduler places threads itself.
    pub fn set_affinity(&self, affinity: Option<u32>) -> Result<()> {
        self.configure(|data| data.affinity = affinity)
    }

    pub fn set_priority(&self, priority: ThreadPriority) -> Result<()> {
        self.configure(|data| data.priority = priority)
    }

    pub fn set_main_function<F>(&self, main: F) -> Result<()>
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        self.configure(|data| data.main = Some(Arc::new(main)))
    }

    /// Called with the new state on every transition, from the thread causing it.
    pub fn set_state_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(ThreadState) + Send + Sync + 'static,
    {
        self.configure(|data| data.state_callback = Some(Arc::new(callback)))
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn stack_size(&self) -> usize {
        self.inner.lock().stack_size
    }

    pub fn priority(&self) -> ThreadPriority {
        self.inner.lock().priority
    }

    pub fn affinity(&self) -> Option<u32> {
        self.inner.lock().affinity
    }

    pub fn state(&self) -> ThreadState {
        self.inner.lock().state
    }

    /// Host id of the running thread; [None] before start and after join.
    pub fn task_id(&self) -> Option<ThreadId> {
        self.inner.lock().handle.as_ref().map(|handle| handle.thread().id())
    }

    /// Value returned by the main function. Only available while stopped.
    pub fn return_code(&self) -> Result<i32> {
        let data = self.inner.lock();
        match data.state {
            ThreadState::Stopped => Ok(data.return_code),
            _ => Err(Error::InvalidState),
        }
    }

    /// Unused stack in bytes. The host does not expose stack high-water marks.
    pub fn stack_space(&self) -> Result<usize> {
        Err(Error::NotSupported)
    }

    fn set_state(&self, state: ThreadState) {
        let callback = {
            let mut data = self.inner.lock();
            data.state = state;
            data.state_callback.clone()
        };
        notify(callback, state);
    }

    pub fn start(&self) -> Result<()> {
        let (name, stack_size, main, callback) = {
            let mut data = self.inner.lock();
            if data.state != ThreadState::Stopped {
                return Err(Error::InvalidState);
            }
            // a stopped thread that was never joined is reaped here
            if let Some(finished) = data.handle.take() {
                if finished.is_finished() {
                    let _ = finished.join();
                }
            }
            let main = data.main.clone().ok_or(Error::MissingParameter)?;
            data.state = ThreadState::Starting;
            (data.name.clone(), data.stack_size, main, data.state_callback.clone())
        };
        notify(callback, ThreadState::Starting);

        let thread = self.clone();
        let spawned = host::Builder::new()
            .name(name.clone())
            .stack_size(stack_size + HOST_STACK_HEADROOM)
            .spawn(move || thread.run(main));
        match spawned {
            Ok(handle) => {
                self.inner.lock().handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!("Failed to spawn {name}: {err}");
                self.set_state(ThreadState::Stopped);
                Err(Error::Resource)
            }
        }
    }

    fn run(self, main: MainFunction) {
        CURRENT.with(|current| *current.borrow_mut() = Some(self.clone()));
        let name = self.name();
        info!("Starting {name}");
        self.set_state(ThreadState::Running);

        let code = match catch_unwind(AssertUnwindSafe(|| main())) {
            Ok(code) => code,
            Err(_) => {
                error!("{name} panicked");
                Error::Undefined.into()
            }
        };
        self.inner.lock().return_code = code;

        self.set_state(ThreadState::Stopped);
        info!("Stopped {name}");
        CURRENT.with(|current| current.borrow_mut().take());
    }

    /// Wait for the thread to exit, checking every `poll_interval` ticks for at most
    /// `timeout` ticks. A thread cannot join itself.
    pub fn join(&self, timeout: Tick, poll_interval: Tick) -> Result<()> {
        ensure_task_context()?;
        if Thread::current().is_some_and(|current| current.ptr_eq(self)) {
            return Err(Error::InvalidState);
        }

        let start_ticks = get_ticks();
        loop {
            let handle = {
                let mut data = self.inner.lock();
                match &data.handle {
                    None => return Ok(()),
                    Some(handle) if handle.is_finished() => data.handle.take(),
                    Some(_) => None,
                }
            };
            if let Some(handle) = handle {
                // the entry point catches panics so the host thread cannot fail here
                let _ = handle.join();
                return Ok(());
            }
            if get_ticks().wrapping_sub(start_ticks) > timeout {
                return Err(Error::Timeout);
            }
            delay_ticks(poll_interval);
        }
    }

    /// [Thread::join] with the default poll interval.
    pub fn join_for(&self, timeout: Tick) -> Result<()> {
        self.join(timeout, THREAD_JOIN_POLL_INTERVAL_TICKS as Tick)
    }
}

impl Default for Thread {
    fn default() -> Self {
        Thread::new()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.lock();
        f.debug_struct("Thread")
            .field("name", &data.name)
            .field("state", &data.state)
            .field("priority", &data.priority)
            .finish()
    }
}
