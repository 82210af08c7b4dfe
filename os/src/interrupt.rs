//! Interrupt-context bookkeeping.
//!
//! The hosted scheduler has no real interrupt domain. Code that plays the role of an
//! interrupt handler (a simulated tearing-effect or touch GPIO, for example) runs inside an
//! [IsrContext], and the blocking primitives consult [is_isr_context] to refuse blocking.
use crate::error::{Error, Result};
use core::{cell::Cell, marker::PhantomData};

thread_local! {
    static ISR_DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub fn is_isr_context() -> bool {
    ISR_DEPTH.with(|depth| depth.get() > 0)
}

/// Marks the current thread as running in interrupt context until dropped.
/// Nesting is allowed.
#[derive(Debug)]
pub struct IsrContext {
    // pinned to the thread that entered it
    _marker: PhantomData<*const ()>,
}

impl IsrContext {
    pub fn enter() -> IsrContext {
        ISR_DEPTH.with(|depth| depth.set(depth.get() + 1));
        IsrContext {
            _marker: PhantomData,
        }
    }
}

impl Drop for IsrContext {
    fn drop(&mut self) {
        ISR_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Fail with [Error::IsrStatus] when called from interrupt context.
pub(crate) fn ensure_task_context() -> Result<()> {
    if is_isr_context() {
        Err(Error::IsrStatus)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_nests_and_restores() {
        assert!(!is_isr_context());
        {
            let _outer = IsrContext::enter();
            {
                let _inner = IsrContext::enter();
                assert!(is_isr_context());
            }
            assert!(is_isr_context());
            assert_eq!(ensure_task_context(), Err(Error::IsrStatus));
        }
        assert!(!is_isr_context());
        assert_eq!(ensure_task_context(), Ok(()));
    }
}
