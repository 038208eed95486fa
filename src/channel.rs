//! The typed handshake carried by every coroutine.
//!
//! One pending value per direction, overwritten on each transfer. The unit type
//! marks a direction that carries nothing, which gives the four shapes:
//! `Channel<(), ()>`, `Channel<I, ()>`, `Channel<(), O>` and `Channel<I, O>`.

use std::cell::Cell;

use ucontext::Suspender;

pub(crate) struct Channel<I, O> {
    input: Cell<Option<I>>,
    output: Cell<Option<O>>,
}

impl<I, O> Channel<I, O> {
    pub(crate) fn new() -> Self {
        Self {
            input: Cell::new(None),
            output: Cell::new(None),
        }
    }

    #[inline(always)]
    pub(crate) fn put_input(&self, value: I) {
        self.input.set(Some(value));
    }
    #[inline(always)]
    pub(crate) fn take_input(&self) -> Option<I> {
        self.input.take()
    }
    #[inline(always)]
    pub(crate) fn put_output(&self, value: O) {
        self.output.set(Some(value));
    }
    #[inline(always)]
    pub(crate) fn take_output(&self) -> Option<O> {
        self.output.take()
    }

    /// Drops whatever is still pending in both directions
    pub(crate) fn clear(&self) {
        self.input.take();
        self.output.take();
    }
}

/// Callee side of a coroutine, only ever lent to its body.
///
/// `O` is what the body hands out on each suspension and `I` what it gets
/// back when resumed.
pub struct Yielder<'y, I, O> {
    suspender: &'y Suspender,
    channel: &'y Channel<I, O>,
}

impl<'y, I, O> Yielder<'y, I, O> {
    pub(crate) fn new(suspender: &'y Suspender, channel: &'y Channel<I, O>) -> Self {
        Self { suspender, channel }
    }

    /// Hands `value` to the caller, suspends, and returns the input of the
    /// next resume.
    pub fn suspend_with(&self, value: O) -> I {
        self.channel.put_output(value);
        self.suspender.suspend();
        match self.channel.take_input() {
            Some(input) => input,
            None => ucontext::die("Coroutine resumed without an input"),
        }
    }
}

impl<I> Yielder<'_, I, ()> {
    /// Suspends without output and returns the input of the next resume
    #[inline]
    pub fn suspend(&self) -> I {
        self.suspend_with(())
    }
}

impl<I, O> std::fmt::Debug for Yielder<'_, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Yielder")
            .field("slot", &self.suspender.id())
            .finish()
    }
}
