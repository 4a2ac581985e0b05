//! Report Metadata

use crate::supervisor::TransformCommands;
use chrono::Utc;
use fluxpipe_core::Payload;
use fluxpipe_report::{REPORT_SCHEMA_VERSION, ReportMeta};

/// Build report metadata for a run over `payload`
pub fn build_report_meta(payload: &Payload, commands: &TransformCommands) -> ReportMeta {
    ReportMeta {
        schema_version: REPORT_SCHEMA_VERSION,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        payload_bytes: payload.len() as u64,
        payload_digest: payload.digest().to_hex(),
        encoder: commands.encode.to_string(),
        decoder: commands.decode.to_string(),
    }
}
