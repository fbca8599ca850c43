use failure::{
    Backtrace,
    Context,
    Fail,
};
use std::{
    fmt,
    sync::PoisonError,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "participant {} is not registered", participant_id)]
    UnknownParticipant { participant_id: String },

    #[fail(display = "transaction {} is not known to this coordinator", transaction_id)]
    UnknownTransaction { transaction_id: String },

    #[fail(display = "lock poisoned")]
    LockPoisoned,

    #[fail(display = "message codec error")]
    MessageError {
        #[fail(cause)]
        cause: threepc_message::errors::Error,
    },

    #[fail(display = "i/o error talking to a participant")]
    IoError,

    #[fail(display = "timed out talking to a participant")]
    Timeout,
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Error {
        ErrorKind::LockPoisoned.into()
    }
}

impl From<threepc_message::errors::Error> for Error {
    fn from(cause: threepc_message::errors::Error) -> Error {
        ErrorKind::MessageError { cause }.into()
    }
}

impl From<std::io::Error> for Error {
    fn from(_err: std::io::Error) -> Error {
        ErrorKind::IoError.into()
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_err: tokio::time::error::Elapsed) -> Error {
        ErrorKind::Timeout.into()
    }
}
