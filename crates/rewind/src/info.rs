use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

/// Description of one live stream, immutable after the initial info fetch.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub actual_start_time: Option<DateTime<Utc>>,
    /// Nominal duration of every media segment of the stream.
    pub segment_duration: TimeDelta,
    pub audio_streams: Vec<AudioStream>,
    pub video_streams: Vec<VideoStream>,
}

#[derive(Debug, Clone)]
pub struct AudioStream {
    pub itag: String,
    pub base_url: Url,
    pub mime_type: String,
    pub codecs: String,
    pub sampling_rate: u32,
}

#[derive(Debug, Clone)]
pub struct VideoStream {
    pub itag: String,
    pub base_url: Url,
    pub mime_type: String,
    pub codecs: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl StreamInfo {
    /// Video variant with the largest frame, preferring higher frame rates
    /// between equally sized ones.
    pub fn best_video(&self) -> Option<&VideoStream> {
        let mut streams = self.video_streams.iter();
        let mut best = streams.next()?;
        for stream in streams {
            if stream.height > best.height
                || (stream.height == best.height && stream.frame_rate > best.frame_rate)
            {
                best = stream;
            }
        }
        Some(best)
    }
}
