//! Thread-safe queue of deferred calls, drained by whichever task owns the consuming side.
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;

use config::DISPATCHER_BACKPRESSURE_WARNING_COUNT;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{error, warn};

use crate::{
    error::{Error, Result},
    mutex::Mutex,
    time::{MAX_TICKS, Tick, deadline_after},
};

/// Lock wait while draining, in ticks.
const CONSUME_LOCK_TIMEOUT: Tick = 10;

type Callback = Box<dyn FnOnce() + Send>;

pub struct Dispatcher {
    queue: Mutex<VecDeque<Callback>>,
    // capacity one: a pending wake-up is a set flag
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    shutdown: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        let (wake_tx, wake_rx) = channel::bounded(1);
        Dispatcher {
            queue: Mutex::new(VecDeque::new()),
            wake_tx,
            wake_rx,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn dispatch<F: FnOnce() + Send + 'static>(&self, callback: F) -> Result<()> {
        self.dispatch_timed(callback, MAX_TICKS)
    }

    /// Queue `callback`, waiting at most `timeout` ticks for the queue lock.
    pub fn dispatch_timed<F: FnOnce() + Send + 'static>(&self, callback: F, timeout: Tick) -> Result<()> {
        let mut queue = self.queue.try_lock_for(timeout).inspect_err(|_| {
            error!("Queue lock acquisition timeout");
        })?;
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::InvalidState);
        }
        queue.push_back(Box::new(callback));
        if queue.len() == DISPATCHER_BACKPRESSURE_WARNING_COUNT {
            warn!("Backpressure: not consuming fast enough ({DISPATCHER_BACKPRESSURE_WARNING_COUNT} queued)");
        }
        drop(queue);
        self.wake();
        Ok(())
    }

    pub fn consume(&self) -> Result<()> {
        self.consume_timed(MAX_TICKS)
    }

    /// Wait at most `timeout` ticks for work, then run queued callbacks until the queue is
    /// empty. The timeout does not bound the time spent running callbacks.
    pub fn consume_timed(&self, timeout: Tick) -> Result<()> {
        let woken = match deadline_after(timeout) {
            Some(deadline) => self.wake_rx.recv_deadline(deadline),
            None => self.wake_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match woken {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::Resource),
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::InvalidState);
        }

        let mut processing = true;
        while processing && !self.shutdown.load(Ordering::Acquire) {
            let Ok(mut queue) = self.queue.try_lock_for(CONSUME_LOCK_TIMEOUT) else {
                warn!("Queue lock acquisition timeout");
                continue;
            };
            let next = queue.pop_front();
            processing = !queue.is_empty();
            // callbacks may dispatch more work
            drop(queue);
            match next {
                Some(callback) => callback(),
                None => processing = false,
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further work and wake any waiting consumer. Queued callbacks are dropped.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.wake();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn wake(&self) {
        // already signalled when full
        let _ = self.wake_tx.try_send(());
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::task::thread::Thread;

    #[test]
    fn consume_runs_everything_queued() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            dispatcher
                .dispatch(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(dispatcher.len(), 3);
        dispatcher.consume_timed(0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn consume_times_out_without_work() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.consume_timed(5), Err(Error::Timeout));
    }

    #[test]
    fn shutdown_refuses_work() {
        let dispatcher = Dispatcher::new();
        dispatcher.shutdown();
        assert_eq!(dispatcher.dispatch(|| {}), Err(Error::InvalidState));
        assert_eq!(dispatcher.consume_timed(0), Err(Error::InvalidState));
    }

    #[test]
    fn dispatch_from_another_thread() {
        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let (producer_dispatcher, producer_hits) = (dispatcher.clone(), hits.clone());
        let producer = Thread::with_main("producer", 4096, move || {
            let hits = producer_hits.clone();
            producer_dispatcher
                .dispatch(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .map_or(-1, |()| 0)
        })
        .unwrap();
        producer.start().unwrap();
        dispatcher.consume_timed(MAX_TICKS).unwrap();
        producer.join(MAX_TICKS, 1).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(producer.return_code(), Ok(0));
    }
}
