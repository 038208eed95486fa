use std::rc::Rc;

use ucontext::{ExecutionSlot, SlotState, Suspender, Transfer};

use crate::channel::{Channel, Yielder};
use crate::{Error, Result};

/// Outcome of one step of a coroutine
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resumed<O> {
    /// The body suspended, handing out a value
    Yielded(O),
    /// The body returned, the coroutine is finished
    Returned,
}

impl<O> Resumed<O> {
    pub fn into_yielded(self) -> Option<O> {
        match self {
            Resumed::Yielded(value) => Some(value),
            Resumed::Returned => None,
        }
    }
    pub fn is_returned(&self) -> bool {
        matches!(self, Resumed::Returned)
    }
}

/// Coroutine factory, configures the dedicated stack
#[derive(Debug, Clone)]
pub struct Builder {
    stack_size: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            stack_size: ucontext::DEFAULT_STACK_SIZE,
        }
    }

    /// Usable stack size of the coroutine, rounded up to whole pages and
    /// never below [`ucontext::min_stack_size`]
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Allocates the coroutine ; `body` does not run before the first resume,
    /// which also provides its first input.
    pub fn build<'a, I, O, F>(self, body: F) -> std::io::Result<Coroutine<'a, I, O>>
    where
        I: 'a,
        O: 'a,
        F: FnOnce(&Yielder<'_, I, O>, I) + 'a,
    {
        let channel = Rc::new(Channel::new());
        let shared = channel.clone();
        let slot = ExecutionSlot::with_stack_size(
            move |suspender: &Suspender| {
                let yielder = Yielder::new(suspender, &shared);
                let input = match shared.take_input() {
                    Some(input) => input,
                    None => ucontext::die("Coroutine started without an input"),
                };
                body(&yielder, input);
            },
            self.stack_size,
        )?;
        log::trace!("coroutine {:?}: built", slot.id());
        Ok(Coroutine { slot, channel })
    }
}

/// A function running on its own stack that exchanges one `O` for one `I` at
/// each suspension.
///
/// The unit type marks a direction without value:
///
/// ```
/// use lazyco::Coroutine;
///
/// let mut lengths = Coroutine::new(|yielder, mut text: String| loop {
///     text = yielder.suspend_with(text.len());
/// });
/// assert_eq!(lengths.resume_with("ab".to_string()), Ok(2));
/// assert_eq!(lengths.resume_with("abcd".to_string()), Ok(4));
/// ```
///
/// Dropping a coroutine whose body is suspended unwinds the body, running the
/// destructors of everything it holds.
pub struct Coroutine<'a, I = (), O = ()> {
    slot: ExecutionSlot<'a>,
    channel: Rc<Channel<I, O>>,
}

impl<'a, I: 'a, O: 'a> Coroutine<'a, I, O> {
    /// Creates a coroutine with the default stack size.
    ///
    /// Aborts when the stack can not be allocated, see [`Builder::build`] for
    /// the fallible version.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Yielder<'_, I, O>, I) + 'a,
    {
        match Builder::new().build(body) {
            Ok(coroutine) => coroutine,
            Err(err) => ucontext::die(&format!("Failed to allocate a coroutine stack: {err}")),
        }
    }

    /// Passes `input` to the body and runs it until its next suspension.
    ///
    /// # Errors
    /// [`Error::AlreadyFinished`] when the body returned before this call.
    pub fn step_with(&mut self, input: I) -> Result<Resumed<O>> {
        if self.slot.is_finished() {
            log::debug!("coroutine {:?}: resumed after its body returned", self.slot.id());
            return Err(Error::AlreadyFinished);
        }
        self.channel.put_input(input);
        match self.slot.resume() {
            Transfer::Suspended => match self.channel.take_output() {
                Some(value) => Ok(Resumed::Yielded(value)),
                None => ucontext::die("Coroutine suspended without an output"),
            },
            Transfer::Returned => {
                self.channel.clear();
                Ok(Resumed::Returned)
            }
        }
    }

    /// Passes `input` to the body and returns what it yields next.
    ///
    /// # Errors
    /// [`Error::AlreadyFinished`] when the body has returned, before or
    /// during this call.
    pub fn resume_with(&mut self, input: I) -> Result<O> {
        match self.step_with(input)? {
            Resumed::Yielded(value) => Ok(value),
            Resumed::Returned => Err(Error::AlreadyFinished),
        }
    }

    /// `true` until the body returns
    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.slot.is_finished()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.slot.is_finished()
    }

    pub fn state(&self) -> SlotState {
        self.slot.state()
    }

    pub fn stack_size(&self) -> usize {
        self.slot.stack_size()
    }
}

impl<'a, O: 'a> Coroutine<'a, (), O> {
    /// Runs the body until its next suspension
    #[inline]
    pub fn step(&mut self) -> Result<Resumed<O>> {
        self.step_with(())
    }

    /// Runs the body and returns what it yields next
    #[inline]
    pub fn resume(&mut self) -> Result<O> {
        self.resume_with(())
    }
}

impl<I, O> std::fmt::Debug for Coroutine<'_, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine").field("slot", &self.slot).finish()
    }
}
