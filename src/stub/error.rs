use crate::target::TargetError;

/// Fatal server errors. Anything recoverable is reported to the client as an
/// `E xx` reply instead and never reaches this type.
#[derive(Debug)]
pub enum Error<C> {
    /// The transport failed.
    Connection(C),
    /// The platform could not be reset.
    PlatformReset(TargetError),
}

impl<C: core::fmt::Display> core::fmt::Display for Error<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::PlatformReset(e) => write!(f, "{}", e),
        }
    }
}

impl<C: core::fmt::Debug + core::fmt::Display> std::error::Error for Error<C> {}

/// Lets handlers use `?` directly on connection-level writes.
impl<C> From<C> for Error<C> {
    fn from(e: C) -> Error<C> {
        Error::Connection(e)
    }
}
