//! Errors raised while parsing or decoding fundamental types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}
