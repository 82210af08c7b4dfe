//! Software timers served by a single timer-service thread.
//!
//! Every control operation is a message on a bounded command queue. Callers wait at most the
//! supplied timeout for queue space and get [Error::Timeout] if it stays full. Timer callbacks
//! and pended functions all run on the service thread, one at a time.
use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering},
};
use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Instant,
};

use config::{TIMER_QUEUE_LENGTH, TIMER_SERVICE_PRIORITY, TIMER_SERVICE_STACK_SIZE};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use lazy_static::lazy_static;
use log::error;

use crate::{
    error::{Error, Result},
    interrupt::{ensure_task_context, is_isr_context},
    task::thread::{Thread, ThreadPriority},
    time::{Tick, deadline_after, get_ticks, ticks_to_duration},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    /// Fire once per start.
    Once,
    /// Fire every period until stopped.
    Periodic,
}

type PendingCall = Box<dyn FnOnce() + Send>;

enum Command {
    /// (Re)arm a timer one period from now.
    Arm(Arc<TimerShared>),
    Disarm(usize),
    Call(PendingCall),
}

struct TimerShared {
    id: usize,
    kind: TimerType,
    period: AtomicU32,
    running: AtomicBool,
    expiry: AtomicU32,
    deleted: AtomicBool,
    callback: Box<dyn Fn() + Send + Sync>,
}

static NEXT_TIMER_ID: AtomicUsize = AtomicUsize::new(1);
static CALLBACK_PRIORITY: AtomicU8 = AtomicU8::new(TIMER_SERVICE_PRIORITY as u8);

lazy_static! {
    static ref TIMER_SERVICE: Option<Sender<Command>> = spawn_service();
}

fn spawn_service() -> Option<Sender<Command>> {
    let (sender, receiver) = channel::bounded(TIMER_QUEUE_LENGTH);
    let service = Thread::with_main("timer-service", TIMER_SERVICE_STACK_SIZE, move || {
        serve(&receiver);
        0
    })
    .and_then(|thread| {
        let priority = ThreadPriority::try_from(TIMER_SERVICE_PRIORITY as u8).unwrap_or(ThreadPriority::Critical);
        thread.set_priority(priority)?;
        thread.start()
    });
    match service {
        Ok(()) => Some(sender),
        Err(err) => {
            error!("Failed to start timer service: {err}");
            None
        }
    }
}

fn serve(receiver: &Receiver<Command>) {
    let mut armed: HashMap<usize, (Instant, Arc<TimerShared>)> = HashMap::new();
    loop {
        let next = armed.values().map(|(at, _)| *at).min();
        let received = match next {
            Some(at) => receiver.recv_deadline(at),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Command::Arm(timer)) => {
                let at = Instant::now() + ticks_to_duration(timer.period.load(Ordering::Acquire));
                armed.insert(timer.id, (at, timer));
            }
            Ok(Command::Disarm(id)) => {
                armed.remove(&id);
            }
            Ok(Command::Call(call)) => run_guarded("pending call", call),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        fire_due(&mut armed);
    }
}

fn fire_due(armed: &mut HashMap<usize, (Instant, Arc<TimerShared>)>) {
    let now = Instant::now();
    let due: Vec<usize> = armed.iter().filter(|(_, (at, _))| *at <= now).map(|(id, _)| *id).collect();
    for id in due {
        let Some((at, timer)) = armed.remove(&id) else {
            continue;
        };
        if timer.deleted.load(Ordering::Acquire) {
            continue;
        }
        if timer.kind == TimerType::Periodic {
            let period = timer.period.load(Ordering::Acquire);
            timer.expiry.store(get_ticks().wrapping_add(period), Ordering::Release);
            armed.insert(id, (at + ticks_to_duration(period), timer.clone()));
        } else {
            timer.running.store(false, Ordering::Release);
        }
        run_guarded("timer callback", || (timer.callback)());
    }
}

/// Run `f` on the service thread. A panic is logged and does not stop the service.
fn run_guarded(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("{what} panicked");
    }
}

fn post(command: Command, timeout: Tick) -> Result<()> {
    let sender = TIMER_SERVICE.as_ref().ok_or(Error::Resource)?;
    match deadline_after(timeout) {
        None => sender.send(command).map_err(|_| Error::Resource),
        Some(deadline) => sender.send_deadline(command, deadline).map_err(|err| match err {
            SendTimeoutError::Timeout(_) => Error::Timeout,
            SendTimeoutError::Disconnected(_) => Error::Resource,
        }),
    }
}

/// Handle to a software timer. Dropping it deletes the timer.
pub struct Timer {
    shared: Arc<TimerShared>,
}

impl Timer {
    pub fn new<F>(kind: TimerType, period: Tick, callback: F) -> Result<Timer>
    where
        F: Fn() + Send + Sync + 'static,
    {
        ensure_task_context()?;
        if period == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(Timer {
            shared: Arc::new(TimerShared {
                id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                period: AtomicU32::new(period),
                running: AtomicBool::new(false),
                expiry: AtomicU32::new(0),
                deleted: AtomicBool::new(false),
                callback: Box::new(callback),
            }),
        })
    }

    pub fn kind(&self) -> TimerType {
        self.shared.kind
    }

    pub fn period(&self) -> Tick {
        self.shared.period.load(Ordering::Acquire)
    }

    fn arm(&self, timeout: Tick) -> Result<()> {
        ensure_task_context()?;
        let was_running = self.shared.running.swap(true, Ordering::AcqRel);
        self.shared.expiry.store(get_ticks().wrapping_add(self.period()), Ordering::Release);
        post(Command::Arm(self.shared.clone()), timeout).inspect_err(|_| {
            self.shared.running.store(was_running, Ordering::Release);
        })
    }

    /// Arm the timer to fire one period from now. Starting a running timer restarts it.
    pub fn start(&self, timeout: Tick) -> Result<()> {
        self.arm(timeout)
    }

    pub fn stop(&self, timeout: Tick) -> Result<()> {
        ensure_task_context()?;
        post(Command::Disarm(self.shared.id), timeout)?;
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    /// Push the expiry one full period from now.
    pub fn reset(&self, timeout: Tick) -> Result<()> {
        self.arm(timeout)
    }

    pub fn reset_with_interval(&self, interval: Tick, timeout: Tick) -> Result<()> {
        if interval == 0 {
            return Err(Error::InvalidArgument);
        }
        self.shared.period.store(interval, Ordering::Release);
        self.arm(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Tick count at which the timer fires next.
    pub fn expiry_time(&self) -> Tick {
        self.shared.expiry.load(Ordering::Acquire)
    }

    /// Run `callback` once on the timer-service thread.
    ///
    /// From interrupt context the call cannot wait for queue space, so `timeout` must be `0`.
    pub fn set_pending_callback<F>(&self, callback: F, timeout: Tick) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !is_isr_context() {
            return post(Command::Call(Box::new(callback)), timeout);
        }
        if timeout != 0 {
            return Err(Error::InvalidArgument);
        }
        let sender = TIMER_SERVICE.as_ref().ok_or(Error::Resource)?;
        sender.try_send(Command::Call(Box::new(callback))).map_err(|err| match err {
            TrySendError::Full(_) => Error::Timeout,
            TrySendError::Disconnected(_) => Error::Resource,
        })
    }

    /// Priority requested for the timer-service thread. Recorded only on a hosted scheduler.
    pub fn set_callback_priority(&self, priority: ThreadPriority) -> Result<()> {
        ensure_task_context()?;
        CALLBACK_PRIORITY.store(priority.into(), Ordering::Relaxed);
        Ok(())
    }

    pub fn callback_priority() -> ThreadPriority {
        ThreadPriority::try_from(CALLBACK_PRIORITY.load(Ordering::Relaxed)).unwrap_or(ThreadPriority::Critical)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.deleted.store(true, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        if let Some(sender) = TIMER_SERVICE.as_ref() {
            // a full queue only delays cleanup; the deleted flag already silences the timer
            let _ = sender.try_send(Command::Disarm(self.shared.id));
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("period", &self.period())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interrupt::IsrContext,
        time::{MAX_TICKS, delay_millis},
    };

    fn counting(kind: TimerType, period: Tick) -> (Timer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let timer = Timer::new(kind, period, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (timer, count)
    }

    #[test]
    fn start_and_stop_change_running_state() {
        let (timer, _) = counting(TimerType::Once, 1000);
        assert!(!timer.is_running());
        timer.start(MAX_TICKS).unwrap();
        assert!(timer.is_running());
        assert!(timer.expiry_time() > get_ticks());
        timer.stop(MAX_TICKS).unwrap();
        assert!(!timer.is_running());
    }

    #[test]
    fn one_shot_fires_once() {
        let (timer, count) = counting(TimerType::Once, 10);
        timer.start(MAX_TICKS).unwrap();
        delay_millis(100);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn periodic_fires_until_stopped() {
        let (timer, count) = counting(TimerType::Periodic, 10);
        timer.start(MAX_TICKS).unwrap();
        delay_millis(100);
        assert!(count.load(Ordering::SeqCst) >= 3);
        assert!(timer.is_running());
        timer.stop(MAX_TICKS).unwrap();
        delay_millis(20);
        let settled = count.load(Ordering::SeqCst);
        delay_millis(50);
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn reset_with_interval_shortens_the_wait() {
        let (timer, count) = counting(TimerType::Once, 10_000);
        timer.start(MAX_TICKS).unwrap();
        timer.reset_with_interval(10, MAX_TICKS).unwrap();
        assert_eq!(timer.period(), 10);
        delay_millis(100);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_timer_never_fires() {
        let (timer, count) = counting(TimerType::Once, 20);
        timer.start(MAX_TICKS).unwrap();
        drop(timer);
        delay_millis(80);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pending_callback_runs_on_service() {
        let (timer, _) = counting(TimerType::Once, 10);
        let (sender, receiver) = channel::bounded(1);
        timer
            .set_pending_callback(move || sender.send(0x1234_5678u32).unwrap(), MAX_TICKS)
            .unwrap();
        assert_eq!(receiver.recv_timeout(std::time::Duration::from_secs(1)), Ok(0x1234_5678));
    }

    #[test]
    fn service_survives_a_panicking_callback() {
        let broken = Timer::new(TimerType::Once, 5, || panic!("callback failure")).unwrap();
        broken.start(MAX_TICKS).unwrap();
        broken
            .set_pending_callback(|| panic!("pending failure"), MAX_TICKS)
            .unwrap();
        delay_millis(100);

        let (timer, count) = counting(TimerType::Once, 10);
        assert_eq!(timer.start(MAX_TICKS), Ok(()));
        delay_millis(100);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn isr_rules() {
        let (timer, _) = counting(TimerType::Once, 10);
        let _isr = IsrContext::enter();
        assert_eq!(timer.start(0), Err(Error::IsrStatus));
        assert_eq!(timer.set_pending_callback(|| {}, 5), Err(Error::InvalidArgument));
        assert_eq!(timer.set_pending_callback(|| {}, 0), Ok(()));
        assert!(Timer::new(TimerType::Once, 10, || {}).is_err());
    }
}
