//! Resilient single-file transfer: copy into a `.moving` temp file,
//! validate, commit by rename, delete the source.

mod error;
mod mover;

pub use error::TransferError;
pub use mover::{FileMover, TransferControls, COPY_BUFFER_SIZE, MOVING_SUFFIX};
