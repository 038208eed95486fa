//! Stackful coroutines exchanging typed values with their caller.
//!
//! A [`Coroutine`] runs its body on a dedicated stack. The body may suspend
//! anywhere, however deep in its own calls, through the [`Yielder`] it
//! receives; the caller resumes it with [`Coroutine::resume_with`] (or
//! [`Coroutine::resume`] when it carries no input).
//!
//! ```
//! use lazyco::{Coroutine, Error};
//!
//! let mut counter = Coroutine::new(|yielder, ()| {
//!     for i in 0..3 {
//!         yielder.suspend_with(i);
//!     }
//! });
//! assert_eq!(counter.resume(), Ok(0));
//! assert_eq!(counter.resume(), Ok(1));
//! assert_eq!(counter.resume(), Ok(2));
//! assert_eq!(counter.resume(), Err(Error::AlreadyFinished));
//! assert!(!counter.is_alive());
//! ```

mod channel;
mod coroutine;
mod error;
mod generator;

pub use channel::Yielder;
pub use coroutine::{Builder, Coroutine, Resumed};
pub use error::{Error, Result};
pub use generator::{generator_fn, Generator};
pub use ucontext::{SlotState, DEFAULT_STACK_SIZE};
