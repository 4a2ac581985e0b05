#![warn(missing_docs)]
//! FluxPipe Logic - Round-Trip Verification
//!
//! Checks that streaming data through a transform is lossless:
//! - first encode with a baseline self-check of the harness digesting
//! - per-invocation digest comparison against a known-good digest
//! - configurable reaction to corruption (abort the process, or report)

mod verification;

pub use verification::{
    EncodedPayload, FIRST_ENCODE_HEADER_LEN, MismatchPolicy, MismatchReport, MismatchStage,
    RoundTripVerifier, STDERR_EXCERPT_LEN, VerifyError,
};
