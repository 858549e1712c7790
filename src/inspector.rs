use crate::error::{Error, Result};
use crate::process;
use crate::types::{AudioStream, FormatInfo, MediaInfo, SubtitleStream, VideoStream};
use crate::util::parse_time_to_seconds;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    format_name: String,
    #[serde(default)]
    format_long_name: String,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDisposition {
    #[serde(rename = "default")]
    default_flag: Option<i64>,
    forced: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    index: u32,
    codec_name: Option<String>,
    codec_long_name: Option<String>,
    profile: Option<String>,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    color_space: Option<String>,
    color_range: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    channel_layout: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
    disposition: Option<ProbeDisposition>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl ProbeStream {
    fn is_default(&self) -> bool {
        self.disposition
            .as_ref()
            .and_then(|d| d.default_flag)
            .map(|v| v != 0)
            .unwrap_or(true)
    }

    fn is_forced(&self) -> bool {
        self.disposition
            .as_ref()
            .and_then(|d| d.forced)
            .map(|v| v != 0)
            .unwrap_or(false)
    }
}

/// Look up a tag value, honoring the MKV `_STATISTICS_TAGS` listing.
///
/// Matches the exact name first, then any listed tag that starts with the
/// name followed by `-`, `_` or `.` (so `BPS` matches `BPS-eng` and
/// `BPS_HINDI` but not `BPSX`).
fn tag_value<'a>(tags: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(listing) = tags.get("_STATISTICS_TAGS") {
        let available: Vec<&str> = listing.split_whitespace().collect();
        if available.contains(&name) {
            return tags.get(name).map(String::as_str);
        }
        for candidate in available {
            if candidate.len() > name.len()
                && candidate.starts_with(name)
                && matches!(candidate.as_bytes()[name.len()], b'-' | b'_' | b'.')
            {
                return tags.get(candidate).map(String::as_str);
            }
        }
        return None;
    }
    tags.get(name).map(String::as_str)
}

fn tag_bitrate(stream: &ProbeStream) -> u64 {
    let direct = stream
        .bit_rate
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    if direct > 0 {
        return direct;
    }
    tag_value(&stream.tags, "BPS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

fn tag_duration(stream: &ProbeStream) -> f64 {
    if let Some(duration) = stream.duration.as_deref() {
        return duration.parse::<f64>().unwrap_or(0.0);
    }
    tag_value(&stream.tags, "DURATION")
        .map(parse_time_to_seconds)
        .unwrap_or(0.0)
}

fn tag_frame_count(stream: &ProbeStream) -> Option<u64> {
    tag_value(&stream.tags, "NUMBER_OF_FRAMES").and_then(|s| s.parse::<u64>().ok())
}

fn tag_encoder(tags: &HashMap<String, String>) -> Option<String> {
    tags.get("_STATISTICS_WRITING_APP")
        .or_else(|| tags.get("encoder"))
        .filter(|s| !s.is_empty())
        .cloned()
}

fn parse_fps(stream: &ProbeStream) -> f64 {
    let rate = stream
        .r_frame_rate
        .as_deref()
        .filter(|r| !r.is_empty() && *r != "0/0")
        .or(stream.avg_frame_rate.as_deref())
        .unwrap_or("0/1");
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(0.0);
            if den != 0.0 { num / den } else { 0.0 }
        }
        None => rate.parse().unwrap_or(0.0),
    }
}

fn parse_format(probe: &ProbeOutput) -> FormatInfo {
    let format = &probe.format;
    let tags = &format.tags;

    let encoder = tags
        .get("ENCODER")
        .or_else(|| tags.get("encoder"))
        .or_else(|| tags.get("_STATISTICS_WRITING_APP"))
        .filter(|s| !s.is_empty())
        .cloned();
    let creation_time = tags
        .get("creation_time")
        .or_else(|| tags.get("_STATISTICS_WRITING_DATE_UTC"))
        .filter(|s| !s.is_empty())
        .cloned();

    FormatInfo {
        format_name: format.format_name.clone(),
        format_long_name: format.format_long_name.clone(),
        duration: format
            .duration
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0),
        size: format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        bitrate: format
            .bit_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        encoder,
        creation_time,
    }
}

fn parse_video_stream(stream: &ProbeStream) -> VideoStream {
    VideoStream {
        index: stream.index,
        codec: stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        codec_long: stream.codec_long_name.clone().unwrap_or_default(),
        profile: stream.profile.clone().unwrap_or_default(),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps: parse_fps(stream),
        bitrate: tag_bitrate(stream),
        duration: tag_duration(stream),
        pix_fmt: stream.pix_fmt.clone().unwrap_or_default(),
        color_space: stream.color_space.clone().filter(|s| !s.is_empty()),
        color_range: stream.color_range.clone().filter(|s| !s.is_empty()),
        title: stream.tags.get("title").filter(|s| !s.is_empty()).cloned(),
        frame_count: tag_frame_count(stream),
        encoder: tag_encoder(&stream.tags),
        is_default: stream.is_default(),
    }
}

fn parse_audio_stream(stream: &ProbeStream) -> AudioStream {
    AudioStream {
        index: stream.index,
        codec: stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        codec_long: stream.codec_long_name.clone().unwrap_or_default(),
        profile: stream.profile.clone().unwrap_or_default(),
        language: stream
            .tags
            .get("language")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "und".to_string()),
        channels: stream.channels.unwrap_or(0),
        channel_layout: stream.channel_layout.clone().filter(|s| !s.is_empty()),
        sample_rate: stream
            .sample_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        bitrate: tag_bitrate(stream),
        duration: tag_duration(stream),
        title: stream.tags.get("title").filter(|s| !s.is_empty()).cloned(),
        frame_count: tag_frame_count(stream),
        encoder: tag_encoder(&stream.tags),
        is_default: stream.is_default(),
    }
}

fn parse_subtitle_stream(stream: &ProbeStream) -> SubtitleStream {
    SubtitleStream {
        index: stream.index,
        codec: stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        language: stream
            .tags
            .get("language")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "und".to_string()),
        title: stream.tags.get("title").filter(|s| !s.is_empty()).cloned(),
        forced: stream.is_forced(),
        frame_count: tag_frame_count(stream),
        encoder: tag_encoder(&stream.tags),
        is_default: stream.is_default(),
    }
}

/// Build a MediaInfo from raw ffprobe JSON.
pub fn parse_probe_json(json: &str) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Inspection(format!("failed to parse ffprobe output: {e}")))?;

    let format = parse_format(&probe);
    let mut video_streams = Vec::new();
    let mut audio_streams = Vec::new();
    let mut subtitle_streams = Vec::new();

    for stream in &probe.streams {
        match stream.codec_type.as_deref().unwrap_or("").to_lowercase().as_str() {
            "video" => video_streams.push(parse_video_stream(stream)),
            "audio" => audio_streams.push(parse_audio_stream(stream)),
            "subtitle" => subtitle_streams.push(parse_subtitle_stream(stream)),
            other => debug!("skipping stream {} of type {other:?}", stream.index),
        }
    }

    Ok(MediaInfo {
        duration: format.duration,
        size: format.size,
        bitrate: format.bitrate,
        format,
        video_streams,
        audio_streams,
        subtitle_streams,
    })
}

/// Inspects media files with ffprobe.
#[derive(Debug, Default)]
pub struct MediaInspector;

impl MediaInspector {
    pub fn new() -> Self {
        Self
    }

    /// Run ffprobe against the source and parse the result into a MediaInfo.
    pub async fn inspect(&self, input: &Path) -> Result<MediaInfo> {
        if !input.exists() {
            return Err(Error::Inspection(format!(
                "file not found: {}",
                input.display()
            )));
        }
        if !input.is_file() {
            return Err(Error::Inspection(format!(
                "not a file: {}",
                input.display()
            )));
        }

        info!("inspecting {}", input.display());

        let stdout = process::run_ffprobe(
            input,
            &["-print_format", "json", "-show_format", "-show_streams"],
        )
        .await
        .map_err(|e| Error::Inspection(format!("ffprobe failed: {e}")))?;

        let media_info = parse_probe_json(&stdout)?;

        info!(
            "found {} video, {} audio, {} subtitle streams",
            media_info.video_streams.len(),
            media_info.audio_streams.len(),
            media_info.subtitle_streams.len()
        );

        Ok(media_info)
    }

    /// Soft pre-transcoding checks. Warnings are advisory, never fatal.
    pub fn validate_for_transcoding(&self, media_info: &MediaInfo) -> Vec<String> {
        let mut warnings = Vec::new();

        if !media_info.has_video() {
            warnings.push("No video streams found".to_string());
        }

        if let Some(video) = media_info.primary_video() {
            if video.width == 0 || video.height == 0 {
                warnings.push("Invalid video resolution".to_string());
            }
            if video.fps == 0.0 {
                warnings.push("Invalid or missing frame rate".to_string());
            }
            if ["av1", "vp9"].contains(&video.codec.as_str()) {
                warnings.push(format!(
                    "Video codec '{}' may have limited hardware support",
                    video.codec
                ));
            }
        }

        if !media_info.has_audio() {
            warnings.push("No audio streams found".to_string());
        }
        if media_info.size == 0 {
            warnings.push("File size is 0 bytes".to_string());
        }
        if media_info.duration == 0.0 {
            warnings.push("Duration is 0 seconds".to_string());
        }

        for warning in &warnings {
            warn!("{warning}");
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_json() -> &'static str {
        r#"{
            "format": {
                "format_name": "matroska,webm",
                "format_long_name": "Matroska / WebM",
                "duration": "120.000000",
                "size": "1073741824",
                "bit_rate": "71582788",
                "tags": {"ENCODER": "libebml v1.4.2", "creation_time": "2024-01-01T00:00:00Z"}
            },
            "streams": [
                {
                    "index": 0,
                    "codec_name": "h264",
                    "codec_long_name": "H.264 / AVC",
                    "profile": "High",
                    "codec_type": "video",
                    "width": 1920,
                    "height": 1080,
                    "pix_fmt": "yuv420p",
                    "r_frame_rate": "30/1",
                    "avg_frame_rate": "30/1",
                    "disposition": {"default": 1, "forced": 0},
                    "tags": {
                        "_STATISTICS_TAGS": "BPS DURATION NUMBER_OF_FRAMES",
                        "BPS": "5000000",
                        "DURATION": "00:02:00.000000000",
                        "NUMBER_OF_FRAMES": "3600"
                    }
                },
                {
                    "index": 1,
                    "codec_name": "aac",
                    "codec_type": "audio",
                    "channels": 2,
                    "channel_layout": "stereo",
                    "sample_rate": "48000",
                    "disposition": {"default": 1, "forced": 0},
                    "tags": {
                        "language": "eng",
                        "_STATISTICS_TAGS": "BPS-eng DURATION-eng NUMBER_OF_FRAMES-eng",
                        "BPS-eng": "736522",
                        "DURATION-eng": "00:02:00.000000000",
                        "NUMBER_OF_FRAMES-eng": "5625"
                    }
                },
                {
                    "index": 2,
                    "codec_name": "subrip",
                    "codec_type": "subtitle",
                    "disposition": {"default": 0, "forced": 1},
                    "tags": {"language": "eng", "title": "English (SDH)"}
                }
            ]
        }"#
    }

    #[test]
    fn test_parse_probe_json() {
        let info = parse_probe_json(probe_json()).unwrap();
        assert_eq!(info.duration, 120.0);
        assert_eq!(info.video_streams.len(), 1);
        assert_eq!(info.audio_streams.len(), 1);
        assert_eq!(info.subtitle_streams.len(), 1);

        let video = &info.video_streams[0];
        assert_eq!(video.width, 1920);
        assert_eq!(video.fps, 30.0);
        assert_eq!(video.bitrate, 5_000_000);
        assert_eq!(video.duration, 120.0);
        assert_eq!(video.frame_count, Some(3600));
        assert!(video.is_default);
    }

    #[test]
    fn test_bitrate_from_suffixed_statistics_tag() {
        // Stream-level bit_rate is absent, only the BPS-eng tag carries it.
        let info = parse_probe_json(probe_json()).unwrap();
        let audio = &info.audio_streams[0];
        assert_eq!(audio.bitrate, 736_522);
        assert_eq!(audio.language, "eng");
        assert_eq!(audio.duration, 120.0);
    }

    #[test]
    fn test_subtitle_disposition_flags() {
        let info = parse_probe_json(probe_json()).unwrap();
        let sub = &info.subtitle_streams[0];
        assert!(sub.forced);
        assert!(!sub.is_default);
        assert_eq!(sub.display_name(), "ENG - English (SDH) - (Forced)");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let first = parse_probe_json(probe_json()).unwrap();
        let second = parse_probe_json(probe_json()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tag_value_prefix_matching() {
        let mut tags = HashMap::new();
        tags.insert(
            "_STATISTICS_TAGS".to_string(),
            "BPS_HINDI DURATION_HINDI".to_string(),
        );
        tags.insert("BPS_HINDI".to_string(), "123456".to_string());
        assert_eq!(tag_value(&tags, "BPS"), Some("123456"));
        assert_eq!(tag_value(&tags, "NUMBER_OF_FRAMES"), None);

        // Without a statistics listing the name is looked up directly.
        let mut plain = HashMap::new();
        plain.insert("BPS".to_string(), "999".to_string());
        assert_eq!(tag_value(&plain, "BPS"), Some("999"));
    }

    #[test]
    fn test_missing_disposition_defaults() {
        let json = r#"{
            "format": {"format_name": "mp4", "duration": "10.0"},
            "streams": [
                {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 640, "height": 360, "r_frame_rate": "0/0", "avg_frame_rate": "24/1"}
            ]
        }"#;
        let info = parse_probe_json(json).unwrap();
        let video = &info.video_streams[0];
        assert!(video.is_default);
        assert_eq!(video.fps, 24.0);
    }

    #[test]
    fn test_zero_denominator_fps() {
        let json = r#"{
            "format": {"format_name": "mp4"},
            "streams": [
                {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 640, "height": 360, "r_frame_rate": "30/0", "avg_frame_rate": "30/0"}
            ]
        }"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.video_streams[0].fps, 0.0);
    }

    #[test]
    fn test_invalid_json_is_inspection_error() {
        assert!(matches!(
            parse_probe_json("not json"),
            Err(Error::Inspection(_))
        ));
    }

    #[test]
    fn test_validation_warnings() {
        let inspector = MediaInspector::new();
        let mut info = parse_probe_json(probe_json()).unwrap();
        assert!(inspector.validate_for_transcoding(&info).is_empty());

        info.video_streams[0].fps = 0.0;
        info.video_streams[0].codec = "av1".to_string();
        info.size = 0;
        let warnings = inspector.validate_for_transcoding(&info);
        assert_eq!(warnings.len(), 3);
    }

    #[tokio::test]
    async fn test_inspect_missing_file() {
        let inspector = MediaInspector::new();
        let result = inspector
            .inspect(Path::new("/nonexistent/video.mkv"))
            .await;
        assert!(matches!(result, Err(Error::Inspection(_))));
    }
}
