use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{RewindError, RewindResult};
use crate::info::StreamInfo;
use crate::provider::InfoProvider;
use crate::segment::{SegmentMetadata, METADATA_LENGTH};
use crate::util;

mod locate;

pub use locate::{RewindInterval, RewindMoment};

/// Response header carrying the newest sequence number of a live stream.
pub const HEAD_SEQNUM_HEADER: &str = "X-Head-Seqnum";

/// Retry behavior for upstream segment requests.
///
/// A 403 means the signed base URLs expired: they are refreshed through the
/// info provider and the request is retargeted before the retry. A 503 is
/// retried against the same URL with exponential backoff. Everything else
/// fails immediately.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let wait = self.min_backoff.saturating_mul(2u32.saturating_pow(attempt));
        wait.min(self.max_backoff)
    }
}

/// A playback session for one live stream.
///
/// Owns the per-itag base URL table and the HTTP client used for all
/// metadata probes and segment downloads. The table is replaced atomically
/// on refresh; concurrent requests always observe a complete snapshot.
pub struct Playback {
    info: StreamInfo,
    probe_itag: String,
    base_urls: RwLock<Arc<HashMap<String, Url>>>,
    provider: Box<dyn InfoProvider + Send + Sync>,
    client: Client,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Playback {
    pub async fn new(provider: Box<dyn InfoProvider + Send + Sync>) -> RewindResult<Self> {
        let info = provider.fetch_info().await?;

        let probe_itag = info
            .video_streams
            .first()
            .ok_or_else(|| RewindError::InfoDump("stream has no video variants".to_string()))?
            .itag
            .clone();

        let mut base_urls = HashMap::new();
        for stream in &info.audio_streams {
            base_urls.insert(stream.itag.clone(), stream.base_url.clone());
        }
        for stream in &info.video_streams {
            base_urls.insert(stream.itag.clone(), stream.base_url.clone());
        }

        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            info,
            probe_itag,
            base_urls: RwLock::new(Arc::new(base_urls)),
            provider,
            client,
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Itag used for all metadata probes, so that every search runs in the
    /// same reference frame.
    pub fn probe_itag(&self) -> &str {
        &self.probe_itag
    }

    /// Current snapshot of the itag to base URL table.
    pub fn base_urls(&self) -> Arc<HashMap<String, Url>> {
        self.base_urls.read().unwrap().clone()
    }

    fn base_url(&self, itag: &str) -> RewindResult<Url> {
        self.base_urls()
            .get(itag)
            .cloned()
            .ok_or_else(|| RewindError::MissingBaseUrl(itag.to_string()))
    }

    /// Replaces the base URL table with a fresh one from the info provider.
    pub async fn refresh_base_urls(&self) -> RewindResult<()> {
        tracing::debug!("refreshing base URLs");
        let table = self.provider.fetch_base_urls().await?;
        *self.base_urls.write().unwrap() = Arc::new(table);
        Ok(())
    }

    /// Most recent sequence number available upstream, read from the
    /// `X-Head-Seqnum` header of a HEAD response on the probe base URL.
    pub async fn head_sequence_number(&self) -> RewindResult<u64> {
        tracing::debug!("requesting head sequence number");

        let url = self.base_url(self.probe_itag())?;
        let response = self.request(Method::HEAD, url, None).await?;

        let raw = response
            .headers()
            .get(HEAD_SEQNUM_HEADER)
            .ok_or(RewindError::MissingHeader(HEAD_SEQNUM_HEADER))?
            .to_str()
            .map_err(|e| RewindError::MetadataFieldInvalid {
                field: HEAD_SEQNUM_HEADER,
                message: e.to_string(),
            })?;
        tracing::debug!(sq = raw, "got head sequence number");

        raw.parse::<u64>()
            .map_err(|e| RewindError::MetadataFieldInvalid {
                field: HEAD_SEQNUM_HEADER,
                message: e.to_string(),
            })
    }

    /// Metadata of the most recent segment.
    pub async fn head_metadata(&self) -> RewindResult<SegmentMetadata> {
        let sq = self.head_sequence_number().await?;
        self.fetch_segment_metadata(self.probe_itag(), sq).await
    }

    /// Fetches the metadata header of one segment with a byte-range request.
    pub async fn fetch_segment_metadata(
        &self,
        itag: &str,
        sq: u64,
    ) -> RewindResult<SegmentMetadata> {
        self.fetch_segment_metadata_inner(itag, sq)
            .await
            .map_err(|e| RewindError::SegmentMetadataFetch {
                sq,
                source: Box::new(e),
            })
    }

    async fn fetch_segment_metadata_inner(
        &self,
        itag: &str,
        sq: u64,
    ) -> RewindResult<SegmentMetadata> {
        let url = util::url::build_segment_url(&self.base_url(itag)?, sq)?;
        let range = format!("bytes=0-{}", METADATA_LENGTH - 1);
        let response = self.request(Method::GET, url, Some(&range)).await?;

        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let body = response.bytes().await?;
        let length = if partial {
            body.len().min(METADATA_LENGTH as usize)
        } else {
            body.len()
        };

        SegmentMetadata::parse(&body[..length])
    }

    /// Streams the full bytes of one segment into `sink`.
    pub async fn stream_segment<W>(&self, itag: &str, sq: u64, sink: &mut W) -> RewindResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let url = util::url::build_segment_url(&self.base_url(itag)?, sq)?;
        let mut response = self.request(Method::GET, url, None).await?;

        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
        }
        sink.flush().await?;

        Ok(())
    }

    /// Downloads one segment into memory.
    pub async fn download_segment(&self, itag: &str, sq: u64) -> RewindResult<bytes::Bytes> {
        let url = util::url::build_segment_url(&self.base_url(itag)?, sq)?;
        let response = self.request(Method::GET, url, None).await?;
        Ok(response.bytes().await?)
    }

    /// One logical request: a loop of attempts driven by the retry policy.
    async fn request(
        &self,
        method: Method,
        mut url: Url,
        range: Option<&str>,
    ) -> RewindResult<reqwest::Response> {
        let mut rebuilt: Option<Url> = None;
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RewindError::Cancelled);
            }

            let mut builder = self.client.request(method.clone(), url.clone());
            if let Some(range) = range {
                builder = builder.header(header::RANGE, range);
            }
            if let Some(rebuilt) = &rebuilt {
                builder = builder.header("X-Request-Url", rebuilt.as_str());
            }

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Err(RewindError::Cancelled),
                result = builder.send() => result?,
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            match status {
                StatusCode::FORBIDDEN | StatusCode::SERVICE_UNAVAILABLE
                    if attempt < self.retry.max_retries =>
                {
                    tracing::warn!(%status, %url, "got transient HTTP error, retrying");

                    if status == StatusCode::FORBIDDEN {
                        self.refresh_base_urls()
                            .await
                            .map_err(|e| RewindError::RefreshBaseUrls(Box::new(e)))?;
                        url = self.rebuild_url(&url)?;
                        rebuilt = Some(url.clone());
                    }

                    let wait = self.retry.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "retrying request in {:?}, attempt {} of {}",
                        wait,
                        attempt,
                        self.retry.max_retries
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(RewindError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                _ => return Err(RewindError::HttpStatus(status)),
            }
        }
    }

    /// Rebuilds a request URL after a base URL refresh. The segment path
    /// encodes the now-stale base URL, so the itag is extracted from it and
    /// resolved against the refreshed table; an `sq` component is carried
    /// over when present.
    fn rebuild_url(&self, old: &Url) -> RewindResult<Url> {
        let path = old.path().to_string();
        let Some(itag) = util::url::extract_parameter(&path, "itag") else {
            return Ok(old.clone());
        };
        let base = self.base_url(&itag)?;

        match util::url::extract_parameter(&path, "sq") {
            Some(sq) => {
                let sq = sq.parse::<u64>().map_err(|e| {
                    RewindError::UrlRebuild(format!("invalid sq component '{sq}': {e}"))
                })?;
                util::url::build_segment_url(&base, sq)
            }
            None => Ok(base),
        }
    }
}
