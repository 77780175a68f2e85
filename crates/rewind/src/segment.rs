use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{RewindError, RewindResult};

/// Number of bytes to request when only the metadata header of a segment is
/// needed. Media segments start with a plain-text header of `Key: Value`
/// lines; 2000 bytes is always enough to cover it.
pub const METADATA_LENGTH: u64 = 2000;

/// Metadata parsed from the text header of a media segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMetadata {
    pub sequence_number: u64,
    pub ingestion_walltime: DateTime<Utc>,
    pub duration: TimeDelta,
}

impl SegmentMetadata {
    /// Timestamp associated with a segment.
    pub fn time(&self) -> DateTime<Utc> {
        self.ingestion_walltime
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.ingestion_walltime + self.duration
    }

    /// Parses segment metadata from a prefix of a media segment.
    ///
    /// The input is not null-terminated: anything after the text header is
    /// arbitrary media bytes. Both CRLF and LF line endings are accepted.
    pub fn parse(bytes: &[u8]) -> RewindResult<Self> {
        let sequence_number = extract_field(bytes, "Sequence-Number")?
            .parse::<u64>()
            .map_err(|e| invalid("Sequence-Number", e))?;

        let walltime_us = extract_field(bytes, "Ingestion-Walltime-Us")?
            .parse::<i64>()
            .map_err(|e| invalid("Ingestion-Walltime-Us", e))?;
        let ingestion_walltime = DateTime::from_timestamp_micros(walltime_us)
            .ok_or(RewindError::WalltimeOutOfRange(walltime_us))?;

        let duration_us = extract_field(bytes, "Target-Duration-Us")?
            .parse::<i64>()
            .map_err(|e| invalid("Target-Duration-Us", e))?;

        Ok(Self {
            sequence_number,
            ingestion_walltime,
            duration: TimeDelta::microseconds(duration_us),
        })
    }
}

fn invalid(field: &'static str, err: std::num::ParseIntError) -> RewindError {
    RewindError::MetadataFieldInvalid {
        field,
        message: err.to_string(),
    }
}

/// Extracts the value of a metadata field from `bytes`.
fn extract_field(bytes: &[u8], field: &'static str) -> RewindResult<String> {
    let token = format!("{field}: ");
    let index = find(bytes, token.as_bytes())
        .ok_or(RewindError::MetadataFieldMissing(field))?;

    let value_start = index + token.len();
    let rest = &bytes[value_start..];
    let value = match rest.iter().position(|&b| b == b'\n') {
        Some(line_end) => &rest[..line_end],
        None => rest,
    };
    let value = value.strip_suffix(b"\r").unwrap_or(value);

    String::from_utf8(value.to_vec()).map_err(|e| RewindError::MetadataFieldInvalid {
        field,
        message: e.to_string(),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
