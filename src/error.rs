//! Error types shared by every module in this crate.

use std::error::Error as StdError;
use std::fmt;

/// The different ways a cgroup operation can fail.
#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A control group file could not be written to.
    WriteFailed,

    /// A control group file could not be read from.
    ReadFailed,

    /// A control group file's contents did not match the documented format.
    ///
    /// The offending token, if one was captured, is embedded in the error's cause.
    ParseError,

    /// The resolved backend for a [`crate::resource::Resource`] is
    /// [`crate::discovery::BackendVersion::Unavailable`], or the operation has no v2 equivalent
    /// (e.g. `memory.swappiness` on a unified-hierarchy host).
    ControllerMissing,

    /// Defensive, total-dispatch fallback. Reaching this indicates a logic bug in this crate,
    /// not a runtime host condition: every controller this crate recognizes is classified as
    /// `Unavailable`, `V1` or `V2` during discovery, so a dispatch should never observe anything
    /// else.
    UnknownVersion,

    /// The caller passed a value this crate will not forward to the kernel (an unknown
    /// `SetBlkioLimit` op/unit, an out-of-range CPU priority, ...).
    InvalidArgument,

    /// An unknown error has occurred.
    Other,
}

/// A cgroup operation failure, optionally wrapping the underlying I/O or parse cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: Option<Box<dyn StdError + Send>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self.kind {
            ErrorKind::WriteFailed => "unable to write to a control group file",
            ErrorKind::ReadFailed => "unable to read a control group file",
            ErrorKind::ParseError => "unable to parse control group file contents",
            ErrorKind::ControllerMissing => "the requested controller is not available",
            ErrorKind::UnknownVersion => "internal error: unresolvable backend version",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Other => "an unknown error",
        };
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", msg, cause),
            None => write!(f, "{}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.cause {
            Some(cause) => Some(&**cause as &(dyn StdError + 'static)),
            None => None,
        }
    }
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, cause: None }
    }

    pub(crate) fn with_cause<E>(kind: ErrorKind, cause: E) -> Self
    where
        E: 'static + Send + StdError,
    {
        Self {
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    /// Builds a [`ErrorKind::ParseError`] carrying the offending raw token for diagnosis.
    pub(crate) fn parse(raw: impl Into<String>) -> Self {
        Self::with_cause(ErrorKind::ParseError, RawToken(raw.into()))
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_cause(ErrorKind::InvalidArgument, RawToken(message.into()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

/// Wraps an offending raw value so it can ride along in [`Error::cause`] as a `dyn StdError`.
#[derive(Debug)]
struct RawToken(String);

impl fmt::Display for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for RawToken {}

pub type Result<T> = ::std::result::Result<T, Error>;
