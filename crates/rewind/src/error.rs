use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::moment::MomentParseError;

#[derive(Error, Debug)]
pub enum RewindError {
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("missing '{0}' response header")]
    MissingHeader(&'static str),

    #[error("metadata field '{0}' not present")]
    MetadataFieldMissing(&'static str),

    #[error("converting metadata field '{field}': {message}")]
    MetadataFieldInvalid {
        field: &'static str,
        message: String,
    },

    #[error("walltime out of range: {0}us")]
    WalltimeOutOfRange(i64),

    #[error("no base URL for itag '{0}'")]
    MissingBaseUrl(String),

    #[error("fetching segment metadata, sq={sq}: {source}")]
    SegmentMetadataFetch {
        sq: u64,
        #[source]
        source: Box<RewindError>,
    },

    #[error("segment search did not converge after {limit} jumps, probed: {track:?}")]
    JumpBudgetExhausted { limit: usize, track: Vec<u64> },

    #[error("refreshing base URLs before retry: {0}")]
    RefreshBaseUrls(#[source] Box<RewindError>),

    #[error("time {0} is after the current head segment")]
    TimeAfterHead(DateTime<Utc>),

    #[error("segment {sq} is not yet available, current head: {head}")]
    SequenceAfterHead { sq: u64, head: u64 },

    #[error("start is after end")]
    StartAfterEnd,

    #[error("keyword '{0}' is not supported yet")]
    UnsupportedKeyword(String),

    #[error("unsupported moment type: {0}")]
    BadMomentType(&'static str),

    #[error("resolving {position} moment '{moment}': {source}")]
    ResolveMoment {
        position: &'static str,
        moment: String,
        #[source]
        source: Box<RewindError>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("parsing presentation timestamp from '{0}'")]
    InvalidPresentationTimestamp(String),

    #[error("rebuilding request URL: {0}")]
    UrlRebuild(String),

    #[error("invalid info dump: {0}")]
    InfoDump(String),

    #[error("writing manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    Parse(#[from] MomentParseError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    WhichError(#[from] which::Error),
}

pub type RewindResult<T> = Result<T, RewindError>;
