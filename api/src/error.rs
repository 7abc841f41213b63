//! Error type of the device substrate.

use std::io;
use thiserror::Error;

/// Errors produced by devices and their controllers.
/// The `#[error]` tag takes care of the `Display` implementation, and the
/// `#[from]` tag lets the `?` operator convert `io::Error`s raised while
/// manipulating a backing image, as seen in
/// [`controller.rs`](../controller/index.html).
#[derive(Error, Debug)]
pub enum DiskError {
    /// Error caused when performing IO on the storage backing a device
    #[error("io failure in the disk controller: {0}")]
    Io(#[from] io::Error),
    /// A sector index past the end of the device
    #[error("sector out of range: {0}")]
    OutOfRange(&'static str),
    /// Invalid input to a device constructor or operation
    #[error("invalid controller input: {0}")]
    Invalid(&'static str),
}

/// Define a generic alias for a `Result` with the error type `DiskError`.
pub type Result<T> = std::result::Result<T, DiskError>;
