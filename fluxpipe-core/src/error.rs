use crate::digest::DigestError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while launching or streaming through a subprocess
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("subprocess {0} stream is not available")]
    StreamUnavailable(&'static str),

    #[error("header length {header_len} exceeds payload length {payload_len}")]
    HeaderOutOfRange { header_len: usize, payload_len: usize },

    #[error("transfer exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("pipe writer thread panicked")]
    WriterPanicked,

    #[error(transparent)]
    Digest(#[from] DigestError),
}
