//! Error types.

use std::process::{ExitCode, Termination};

use thiserror::Error;

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A top-level error from within the application.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Application error.
    #[error(transparent)]
    App(#[from] anyhow::Error),
}

/// Application exit condition.
///
/// In the [`Termination`] implementation for `Exit`, we print any errors that
/// occur for the user.
#[derive(Debug)]
pub enum Exit {
    /// Exit success.
    Success,
    /// Exit failure.
    ///
    /// Reports the error's cause chain, then returns a non-zero exit code.
    Failure(Error),
}

impl<E: Into<Error>> From<E> for Exit {
    fn from(err: E) -> Self {
        Self::Failure(err.into())
    }
}

impl Termination for Exit {
    fn report(self) -> ExitCode {
        match self {
            Exit::Success => ExitCode::SUCCESS,
            Exit::Failure(err) => {
                let Error::App(err) = err;
                log::error!("{err:#}");
                ExitCode::FAILURE
            }
        }
    }
}
