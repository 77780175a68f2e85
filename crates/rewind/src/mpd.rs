//! DASH manifest composition.
//!
//! Manifests reference segments through the embedded server, so their media
//! template points at the local `segments/` route rather than upstream.

use chrono::{SecondsFormat, TimeDelta};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{RewindError, RewindResult};
use crate::info::StreamInfo;
use crate::playback::{RewindInterval, RewindMoment};
use crate::util;

const MPD_NAMESPACE: &str = "urn:mpeg:DASH:schema:MPD:2011";
const MPD_PROFILES: &str = "urn:mpeg:dash:profile:isoff-main:2011";
const SEGMENT_MEDIA_URL: &str = "segments/itag/$RepresentationID$/sq/$Number$";
const TIMESCALE: i64 = 1000;

enum Addressing {
    /// A `SegmentTimeline` with one run-length entry covering the interval.
    Timeline { segment_count: u64 },
    /// A plain `duration` attribute for live manifests.
    Duration,
}

struct SegmentTemplateInfo {
    start_number: u64,
    presentation_time_offset_ms: i64,
    segment_duration_ms: i64,
    addressing: Addressing,
}

/// Composes a static manifest spanning a located interval.
///
/// `presentation_time_offset` is the media-internal timestamp, in seconds,
/// of the first segment of the interval.
pub fn compose_static(
    info: &StreamInfo,
    interval: &RewindInterval,
    server_base: &str,
    presentation_time_offset: f64,
) -> RewindResult<String> {
    let media_duration = format_mpd_duration(interval.duration());

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_declaration(&mut writer)?;

    let mut mpd = BytesStart::new("MPD");
    mpd.push_attribute(("xmlns", MPD_NAMESPACE));
    mpd.push_attribute(("profiles", MPD_PROFILES));
    mpd.push_attribute(("type", "static"));
    mpd.push_attribute(("mediaPresentationDuration", media_duration.as_str()));
    writer
        .write_event(Event::Start(mpd))
        .map_err(manifest_error)?;

    write_program_information(&mut writer, info)?;

    let mut period = BytesStart::new("Period");
    period.push_attribute(("duration", media_duration.as_str()));
    writer
        .write_event(Event::Start(period))
        .map_err(manifest_error)?;

    let template = SegmentTemplateInfo {
        start_number: interval.start.metadata.sequence_number,
        presentation_time_offset_ms: (presentation_time_offset * TIMESCALE as f64).round() as i64,
        segment_duration_ms: info.segment_duration.num_milliseconds(),
        addressing: Addressing::Timeline {
            segment_count: interval.segment_count(),
        },
    };
    write_adaptation_sets(&mut writer, info, server_base, &template)?;

    writer
        .write_event(Event::End(BytesEnd::new("Period")))
        .map_err(manifest_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("MPD")))
        .map_err(manifest_error)?;

    finish(writer)
}

/// Composes a dynamic (live) manifest anchored on a located moment.
pub fn compose_dynamic(
    info: &StreamInfo,
    moment: &RewindMoment,
    server_base: &str,
    presentation_time_offset: f64,
) -> RewindResult<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_declaration(&mut writer)?;

    let mut mpd = BytesStart::new("MPD");
    mpd.push_attribute(("xmlns", MPD_NAMESPACE));
    mpd.push_attribute(("profiles", MPD_PROFILES));
    mpd.push_attribute(("type", "dynamic"));
    mpd.push_attribute((
        "availabilityStartTime",
        moment
            .actual_time
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .as_str(),
    ));
    mpd.push_attribute((
        "minimumUpdatePeriod",
        format_mpd_duration(info.segment_duration).as_str(),
    ));
    writer
        .write_event(Event::Start(mpd))
        .map_err(manifest_error)?;

    write_program_information(&mut writer, info)?;

    writer
        .write_event(Event::Start(BytesStart::new("Period")))
        .map_err(manifest_error)?;

    let template = SegmentTemplateInfo {
        start_number: moment.metadata.sequence_number,
        presentation_time_offset_ms: (presentation_time_offset * TIMESCALE as f64).round() as i64,
        segment_duration_ms: info.segment_duration.num_milliseconds(),
        addressing: Addressing::Duration,
    };
    write_adaptation_sets(&mut writer, info, server_base, &template)?;

    writer
        .write_event(Event::End(BytesEnd::new("Period")))
        .map_err(manifest_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("MPD")))
        .map_err(manifest_error)?;

    finish(writer)
}

fn write_declaration(writer: &mut Writer<Vec<u8>>) -> RewindResult<()> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(manifest_error)
}

fn write_program_information(writer: &mut Writer<Vec<u8>>, info: &StreamInfo) -> RewindResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new("ProgramInformation")))
        .map_err(manifest_error)?;
    write_text_element(writer, "Title", &info.title)?;
    write_text_element(writer, "Source", &util::url::build_video_live_url(&info.id))?;
    writer
        .write_event(Event::End(BytesEnd::new("ProgramInformation")))
        .map_err(manifest_error)
}

fn write_adaptation_sets(
    writer: &mut Writer<Vec<u8>>,
    info: &StreamInfo,
    server_base: &str,
    template: &SegmentTemplateInfo,
) -> RewindResult<()> {
    // One adaptation set per mime type, audio variants first.
    let mut mime_types: Vec<&str> = Vec::new();
    for stream in &info.audio_streams {
        if !mime_types.contains(&stream.mime_type.as_str()) {
            mime_types.push(&stream.mime_type);
        }
    }
    for stream in &info.video_streams {
        if !mime_types.contains(&stream.mime_type.as_str()) {
            mime_types.push(&stream.mime_type);
        }
    }

    for (id, mime_type) in mime_types.iter().enumerate() {
        let mut set = BytesStart::new("AdaptationSet");
        set.push_attribute(("id", id.to_string().as_str()));
        set.push_attribute(("mimeType", *mime_type));
        set.push_attribute(("subsegmentAlignment", "true"));
        writer
            .write_event(Event::Start(set))
            .map_err(manifest_error)?;

        for stream in &info.audio_streams {
            if stream.mime_type == *mime_type {
                let mut representation = BytesStart::new("Representation");
                representation.push_attribute(("id", stream.itag.as_str()));
                representation.push_attribute(("codecs", stream.codecs.as_str()));
                representation.push_attribute((
                    "audioSamplingRate",
                    stream.sampling_rate.to_string().as_str(),
                ));
                write_representation(writer, representation, server_base, template)?;
            }
        }
        for stream in &info.video_streams {
            if stream.mime_type == *mime_type {
                let mut representation = BytesStart::new("Representation");
                representation.push_attribute(("id", stream.itag.as_str()));
                representation.push_attribute(("codecs", stream.codecs.as_str()));
                representation.push_attribute(("width", stream.width.to_string().as_str()));
                representation.push_attribute(("height", stream.height.to_string().as_str()));
                representation
                    .push_attribute(("frameRate", stream.frame_rate.to_string().as_str()));
                write_representation(writer, representation, server_base, template)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("AdaptationSet")))
            .map_err(manifest_error)?;
    }

    Ok(())
}

fn write_representation(
    writer: &mut Writer<Vec<u8>>,
    representation: BytesStart<'_>,
    server_base: &str,
    template: &SegmentTemplateInfo,
) -> RewindResult<()> {
    writer
        .write_event(Event::Start(representation))
        .map_err(manifest_error)?;

    // The trailing slash keeps the relative media template below the server
    // root instead of replacing its last path component.
    write_text_element(writer, "BaseURL", &format!("{server_base}/"))?;

    let mut segment_template = BytesStart::new("SegmentTemplate");
    segment_template.push_attribute(("media", SEGMENT_MEDIA_URL));
    segment_template.push_attribute(("startNumber", template.start_number.to_string().as_str()));
    segment_template.push_attribute(("timescale", TIMESCALE.to_string().as_str()));
    segment_template.push_attribute((
        "presentationTimeOffset",
        template.presentation_time_offset_ms.to_string().as_str(),
    ));

    match template.addressing {
        Addressing::Timeline { segment_count } => {
            writer
                .write_event(Event::Start(segment_template))
                .map_err(manifest_error)?;

            writer
                .write_event(Event::Start(BytesStart::new("SegmentTimeline")))
                .map_err(manifest_error)?;
            let mut s = BytesStart::new("S");
            s.push_attribute((
                "t",
                template.presentation_time_offset_ms.to_string().as_str(),
            ));
            s.push_attribute(("d", template.segment_duration_ms.to_string().as_str()));
            s.push_attribute(("r", (segment_count - 1).to_string().as_str()));
            writer
                .write_event(Event::Empty(s))
                .map_err(manifest_error)?;
            writer
                .write_event(Event::End(BytesEnd::new("SegmentTimeline")))
                .map_err(manifest_error)?;

            writer
                .write_event(Event::End(BytesEnd::new("SegmentTemplate")))
                .map_err(manifest_error)?;
        }
        Addressing::Duration => {
            segment_template
                .push_attribute(("duration", template.segment_duration_ms.to_string().as_str()));
            writer
                .write_event(Event::Empty(segment_template))
                .map_err(manifest_error)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("Representation")))
        .map_err(manifest_error)
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> RewindResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(manifest_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(manifest_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(manifest_error)
}

fn finish(writer: Writer<Vec<u8>>) -> RewindResult<String> {
    let mut out = writer.into_inner();
    out.push(b'\n');
    String::from_utf8(out).map_err(|e| RewindError::Manifest(e.to_string()))
}

fn manifest_error<E: std::fmt::Display>(e: E) -> RewindError {
    RewindError::Manifest(e.to_string())
}

/// Renders a duration as an MPD duration value, e.g. `PT1H2M3.5S`,
/// rounded to 100 ms.
fn format_mpd_duration(d: TimeDelta) -> String {
    let rounded_ms = ((d.num_milliseconds() + 50) / 100) * 100;
    let hours = rounded_ms / 3_600_000;
    let minutes = (rounded_ms % 3_600_000) / 60_000;
    let seconds = (rounded_ms % 60_000) / 1_000;
    let tenths = (rounded_ms % 1_000) / 100;

    let seconds_part = if tenths > 0 {
        format!("{seconds}.{tenths}S")
    } else {
        format!("{seconds}S")
    };

    if hours > 0 {
        format!("PT{hours}H{minutes}M{seconds_part}")
    } else if minutes > 0 {
        format!("PT{minutes}M{seconds_part}")
    } else {
        format!("PT{seconds_part}")
    }
}
