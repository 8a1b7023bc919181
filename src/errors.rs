//! Definition of errors.

use core::fmt;

use std::error::Error;

/// Error used when the argument is invalid.
#[derive(Debug)]
pub struct InvalidArgumentError {
    msg: &'static str,
}

/// Error used when a caller breaks the contract of a search or model operation.
#[derive(Debug)]
pub struct ConsistencyError {
    msg: &'static str,
}

/// The error type for Rubeam.
#[derive(Debug)]
pub enum RubeamError {
    /// Invalid configuration.
    InvalidArgument(InvalidArgumentError),

    /// Contract violation detected at run time.
    Consistency(ConsistencyError),
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}", self.msg)
    }
}

impl Error for InvalidArgumentError {}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConsistencyError: {}", self.msg)
    }
}

impl Error for ConsistencyError {}

impl RubeamError {
    /// Creates a new [`InvalidArgumentError`].
    pub const fn invalid_argument(msg: &'static str) -> Self {
        Self::InvalidArgument(InvalidArgumentError { msg })
    }

    /// Creates a new [`ConsistencyError`].
    pub const fn consistency(msg: &'static str) -> Self {
        Self::Consistency(ConsistencyError { msg })
    }
}

impl fmt::Display for RubeamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidArgument(e) => e.fmt(f),
            Self::Consistency(e) => e.fmt(f),
        }
    }
}

impl Error for RubeamError {}

/// A specialized Result type.
pub type Result<T, E = RubeamError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            "InvalidArgumentError: beam_size must not be 0",
            RubeamError::invalid_argument("beam_size must not be 0").to_string(),
        );
        assert_eq!(
            "ConsistencyError: empty agenda",
            RubeamError::consistency("empty agenda").to_string(),
        );
    }
}
