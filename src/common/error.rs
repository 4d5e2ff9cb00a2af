//! Crate-wide error type.
//!
//! The optimization core is total on valid IR and never reports errors;
//! everything that can actually fail lives at the tool boundary: reading
//! the input file, parsing IR text, and post-pass verification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A syntax or semantic error in the IR text, with a 1-based line number.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The IR failed structural verification.
    #[error("verification failed in @{function}: {message}")]
    Verify { function: String, message: String },

    #[error("{0}")]
    Usage(String),
}

impl Error {
    pub fn parse(line: usize, message: impl Into<String>) -> Error {
        Error::Parse { line, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
