use crate::mutex::Mutex;

/// Hands out task ids, starting at `1` so that `0` can mean "no task".
pub struct TaskIdAllocator {
    current: usize,
    recycled: Vec<usize>,
}

impl TaskIdAllocator {
    pub const fn new() -> TaskIdAllocator {
        TaskIdAllocator {
            current: 1,
            recycled: Vec::new(),
        }
    }

    /// Allocate an tid.
    ///
    /// Use [alloc_tid] for safety.
    pub unsafe fn alloc(&mut self) -> usize {
        if let Some(tid) = self.recycled.pop() {
            tid
        } else {
            let res = self.current;
            self.current += 1;
            res
        }
    }

    /// Free a tid.
    /// **Duplicated free may lead to undefined behavior**
    pub unsafe fn free(&mut self, tid: usize) {
        self.recycled.push(tid);
    }
}

impl Default for TaskIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Safe wrapper around tids that frees the managed tid on drop.
#[derive(Debug)]
pub struct TaskId {
    inner: usize,
}

impl TaskId {
    pub fn value(&self) -> usize {
        self.inner
    }
}

impl Drop for TaskId {
    fn drop(&mut self) {
        unsafe {
            TID_ALLOC.lock().free(self.inner);
        }
    }
}

pub static TID_ALLOC: Mutex<TaskIdAllocator> = Mutex::new(TaskIdAllocator::new());

pub fn alloc_tid() -> TaskId {
    TaskId {
        inner: unsafe { TID_ALLOC.lock().alloc() },
    }
}

thread_local! {
    static CURRENT_TID: TaskId = alloc_tid();
}

/// Id of the calling task. Stable for the task's lifetime, recycled after it exits.
pub fn current_tid() -> usize {
    CURRENT_TID.with(TaskId::value)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn ids_are_per_task_and_non_zero() {
        let here = current_tid();
        assert_ne!(here, 0);
        assert_eq!(here, current_tid());
        let there = thread::spawn(current_tid).join().unwrap();
        assert_ne!(there, 0);
        assert_ne!(here, there);
    }

    #[test]
    fn freed_ids_are_reused() {
        let mut alloc = TaskIdAllocator::new();
        unsafe {
            let a = alloc.alloc();
            let b = alloc.alloc();
            assert_eq!((a, b), (1, 2));
            alloc.free(a);
            assert_eq!(alloc.alloc(), a);
        }
    }
}
