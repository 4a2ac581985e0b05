#![warn(missing_docs)]
//! FluxPipe Core
//!
//! Building blocks for driving a black-box transform binary through its
//! standard pipes:
//! - [`StreamingDigest`]: incremental 128-bit content digest
//! - [`SubprocessHandle`] / [`Launcher`]: spawned process capability, with an
//!   OS-backed and an in-memory loopback implementation
//! - [`PipeTransferEngine`]: concurrent write/read of a payload through a
//!   subprocess without pipe deadlock
//! - [`Payload`]: immutable shared byte buffer, file-backed or synthetic

mod digest;
mod error;
mod measure;
mod payload;
mod process;
mod transfer;

pub use digest::{DIGEST_LEN, Digest, DigestError, StreamingDigest};
pub use error::PipeError;
pub use measure::Timer;
pub use payload::{
    Base64Table, Payload, PayloadError, SYNTHETIC_BODY_REPS, SYNTHETIC_HEADER, SyntheticPayload,
};
pub use process::{
    ChannelReader, ChannelWriter, ChunkTransform, CommandSpec, Launcher, LoopbackLauncher,
    LoopbackProcess, OsLauncher, OsProcess, ProcessExit, StderrMode, SubprocessHandle,
};
pub use transfer::{PipeTransferEngine, TransferRequest, TransferResult};

/// Block size used when streaming a payload into a subprocess (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Default number of in-flight chunks buffered by a loopback pipe
pub const LOOPBACK_CAPACITY: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(CHUNK_SIZE, 65_536);
        assert_eq!(DIGEST_LEN, 16);
        assert!(LOOPBACK_CAPACITY > 0);
    }
}
