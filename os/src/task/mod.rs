//! Execution primitives: task ids, threads, timers, event groups and the dispatcher.

pub mod dispatcher;
pub mod event_group;
pub mod thread;
pub mod tid;
pub mod timer;

pub use dispatcher::Dispatcher;
pub use event_group::EventGroup;
pub use thread::{Thread, ThreadPriority, ThreadState};
pub use timer::{Timer, TimerType};
