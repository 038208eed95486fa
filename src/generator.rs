use std::iter::FusedIterator;

use crate::{Builder, Coroutine, Yielder};

/// An output-only coroutine consumed as an iterator.
///
/// ```
/// use lazyco::Generator;
///
/// let squares = Generator::new(|yielder| {
///     for i in 1..=4u32 {
///         yielder.suspend_with(i * i);
///     }
/// });
/// assert_eq!(squares.collect::<Vec<_>>(), [1, 4, 9, 16]);
/// ```
pub struct Generator<'a, T> {
    coroutine: Coroutine<'a, (), T>,
}

impl<'a, T: 'a> Generator<'a, T> {
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Yielder<'_, (), T>) + 'a,
    {
        Self {
            coroutine: Coroutine::new(move |yielder: &Yielder<'_, (), T>, ()| body(yielder)),
        }
    }

    pub fn with_builder<F>(builder: Builder, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(&Yielder<'_, (), T>) + 'a,
    {
        let coroutine = builder.build(move |yielder: &Yielder<'_, (), T>, ()| body(yielder))?;
        Ok(Self { coroutine })
    }

    pub fn is_alive(&self) -> bool {
        self.coroutine.is_alive()
    }

    pub fn into_inner(self) -> Coroutine<'a, (), T> {
        self.coroutine
    }
}

impl<'a, T: 'a> Iterator for Generator<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.coroutine.resume().ok()
    }
}

impl<'a, T: 'a> FusedIterator for Generator<'a, T> {}

impl<T> std::fmt::Debug for Generator<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("coroutine", &self.coroutine)
            .finish()
    }
}

/// Turns a body taking trailing arguments into a generator factory.
///
/// Each call of the returned function binds its argument to a copy of `body`
/// and starts a fresh generator.
///
/// ```
/// use lazyco::{generator_fn, Yielder};
///
/// let countdown = generator_fn(|yielder: &Yielder<'_, (), u32>, from: u32| {
///     for i in (0..=from).rev() {
///         yielder.suspend_with(i);
///     }
/// });
/// assert_eq!(countdown(3).collect::<Vec<_>>(), [3, 2, 1, 0]);
/// assert_eq!(countdown(1).collect::<Vec<_>>(), [1, 0]);
/// ```
pub fn generator_fn<'a, A, T, F>(body: F) -> impl Fn(A) -> Generator<'a, T>
where
    A: 'a,
    T: 'a,
    F: Fn(&Yielder<'_, (), T>, A) + Clone + 'a,
{
    move |args: A| {
        let body = body.clone();
        Generator::new(move |yielder: &Yielder<'_, (), T>| body(yielder, args))
    }
}
