//! Benchmark Payloads
//!
//! A payload is loaded once and then shared read-only by every worker. When no
//! input file is given, a synthetic payload is assembled from a fixed header
//! followed by a repeated body pattern. The body pattern is stored base64
//! encoded and decoded with a [`Base64Table`] owned by the builder.

use crate::digest::Digest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Header prefixed to the synthetic payload (JPEG SOI + JFIF APP0 segment)
pub const SYNTHETIC_HEADER: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x01, 0x00, 0x00,
];

/// Default number of body repetitions in the synthetic payload
pub const SYNTHETIC_BODY_REPS: usize = 16_384;

const SYNTHETIC_BODY_B64: &[u8] =
    b"Eag/1mwFmjPLYvWMJr9Q6YUcq0LYcQ6nP9Zh+JIrxF35gBe+RO1yG6NK3WQOlzjBbfSDKrBZ5o8XvknQegOsNQ==";

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const BASE64_PAD: u8 = b'=';

/// Errors raised while loading a payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable byte sequence shared by all workers of a run
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Arc<[u8]>,
}

impl Payload {
    /// Wrap an owned buffer
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read a whole file into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PayloadError> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::from_vec(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PayloadError::NotFound(path.to_path_buf()))
            }
            Err(source) => Err(PayloadError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Built-in synthetic payload with default sizing
    pub fn synthetic() -> Self {
        SyntheticPayload::new().build()
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Digest of the whole payload
    pub fn digest(&self) -> Digest {
        Digest::of(&self.bytes)
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("len", &self.len()).finish()
    }
}

/// Base64 reverse lookup table, built at compile time.
///
/// Characters outside the alphabet (including `=`) map to zero.
pub struct Base64Table {
    lut: [u8; 256],
}

impl Base64Table {
    /// Build the table
    pub const fn new() -> Self {
        let mut lut = [0u8; 256];
        let mut i = 0;
        while i < BASE64_ALPHABET.len() {
            lut[BASE64_ALPHABET[i] as usize] = i as u8;
            i += 1;
        }
        Self { lut }
    }

    /// Decode base64 text in place, truncating the buffer to the decoded length.
    ///
    /// Trailing `=` padding is optional; a trailing partial group of two or
    /// three characters yields one or two bytes.
    pub fn decode_in_place(&self, data: &mut Vec<u8>) {
        let end = data.len() - data.iter().rev().take_while(|&&b| b == BASE64_PAD).count();
        let mut read = 0;
        let mut written = 0;

        while read < end {
            let mut sextets = [0u8; 4];
            for (offset, sextet) in sextets.iter_mut().enumerate() {
                if read + offset < end {
                    *sextet = self.lut[data[read + offset] as usize];
                }
            }
            let decoded = [
                (sextets[0] << 2) | (sextets[1] >> 4),
                (sextets[1] << 4) | (sextets[2] >> 2),
                ((sextets[2] << 6) & 0xc0) | sextets[3],
            ];
            // 4 chars -> 3 bytes, 3 -> 2, 2 -> 1
            let produced = (end - read).min(4).saturating_sub(1);
            data[written..written + produced].copy_from_slice(&decoded[..produced]);
            written += produced;
            read += 4;
        }

        data.truncate(written);
    }
}

impl Default for Base64Table {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the synthetic benchmark payload
pub struct SyntheticPayload {
    table: Base64Table,
    body_reps: usize,
}

impl SyntheticPayload {
    /// Builder with the default body repetition count
    pub fn new() -> Self {
        Self {
            table: Base64Table::new(),
            body_reps: SYNTHETIC_BODY_REPS,
        }
    }

    /// Set the number of body repetitions
    pub fn body_reps(mut self, reps: usize) -> Self {
        self.body_reps = reps;
        self
    }

    /// Decoded body pattern
    pub fn body(&self) -> Vec<u8> {
        let mut body = SYNTHETIC_BODY_B64.to_vec();
        self.table.decode_in_place(&mut body);
        body
    }

    /// Assemble header + repeated body
    pub fn build(&self) -> Payload {
        let body = self.body();
        let mut bytes = Vec::with_capacity(SYNTHETIC_HEADER.len() + body.len() * self.body_reps);
        bytes.extend_from_slice(SYNTHETIC_HEADER);
        for _ in 0..self.body_reps {
            bytes.extend_from_slice(&body);
        }
        Payload::from_vec(bytes)
    }
}

impl Default for SyntheticPayload {
    fn default() -> Self {
        Self::new()
    }
}
