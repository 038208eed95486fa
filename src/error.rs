use std::io::ErrorKind;

/// Failure of a [`Coroutine`](crate::Coroutine) call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// The body already returned, there is nothing left to resume
    AlreadyFinished,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AlreadyFinished => f.write_str("coroutine already finished, nothing to yield"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for ErrorKind {
    fn from(value: Error) -> Self {
        match value {
            Error::AlreadyFinished => ErrorKind::UnexpectedEof,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        std::io::Error::new(ErrorKind::from(value), value)
    }
}
