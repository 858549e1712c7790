use crate::error::Result;
use crate::util::channel_layout_name;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const AUDIO_GROUP_ID: &str = "audio";
pub const SUBTITLE_GROUP_ID: &str = "subtitles";

/// H.264 High Profile / HEVC Main Profile / AAC-LC codec strings as they
/// appear in CODECS attributes.
const H264_CODEC: &str = "avc1.640028";
const HEVC_CODEC: &str = "hvc1.1.6.L120.90";
const AAC_CODEC: &str = "mp4a.40.2";

#[derive(Debug, Clone)]
pub struct VideoVariantInfo {
    pub quality: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub framerate: f64,
    pub codecs: String,
    pub playlist_path: PathBuf,
    pub segment_count: u32,
    pub has_embedded_audio: bool,
}

impl VideoVariantInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quality: impl Into<String>,
        width: u32,
        height: u32,
        bitrate: u32,
        framerate: f64,
        playlist_path: PathBuf,
        segment_count: u32,
        codec: &str,
        has_embedded_audio: bool,
    ) -> Self {
        let video_codec = match codec {
            "h264" => H264_CODEC,
            "h265" | "hevc" => HEVC_CODEC,
            other => other,
        };
        let codecs = if has_embedded_audio {
            format!("{video_codec},{AAC_CODEC}")
        } else {
            video_codec.to_string()
        };
        Self {
            quality: quality.into(),
            width,
            height,
            bitrate,
            framerate,
            codecs,
            playlist_path,
            segment_count,
            has_embedded_audio,
        }
    }

    pub fn bandwidth(&self) -> u64 {
        self.bitrate as u64 * 1000
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone)]
pub struct AudioTrackInfo {
    pub name: String,
    pub language: String,
    pub channels: u32,
    pub sample_rate: u32,
    pub bitrate: u32,
    pub codecs: String,
    pub playlist_path: PathBuf,
    pub is_default: bool,
}

impl AudioTrackInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        language: impl Into<String>,
        channels: u32,
        sample_rate: u32,
        bitrate: u32,
        playlist_path: PathBuf,
        is_default: bool,
        codec: &str,
    ) -> Self {
        let codecs = if codec == "aac" {
            AAC_CODEC.to_string()
        } else {
            codec.to_string()
        };
        Self {
            name: name.into(),
            language: language.into(),
            channels,
            sample_rate,
            bitrate,
            codecs,
            playlist_path,
            is_default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubtitleTrackInfo {
    pub name: String,
    pub language: String,
    pub file_path: PathBuf,
    pub is_default: bool,
    pub forced: bool,
}

/// Emits the HLS master playlist and the metadata sidecar.
pub struct PlaylistGenerator {
    output_dir: PathBuf,
    version: u32,
}

impl PlaylistGenerator {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            version: 7,
        }
    }

    /// Write `master.m3u8`: audio media entries first, then subtitles,
    /// then the variant streams sorted by bitrate descending.
    pub fn generate_master_playlist(
        &self,
        video_variants: &[VideoVariantInfo],
        audio_tracks: &[AudioTrackInfo],
        subtitle_tracks: &[SubtitleTrackInfo],
    ) -> Result<PathBuf> {
        if video_variants.is_empty() {
            return Err(crate::error::Error::Validation(
                "at least one video variant is required".to_string(),
            ));
        }

        info!("generating master playlist");
        let mut lines: Vec<String> = vec![
            "#EXTM3U".to_string(),
            format!("#EXT-X-VERSION:{}", self.version),
            String::new(),
        ];

        let has_audio = !audio_tracks.is_empty();
        let has_subtitles = !subtitle_tracks.is_empty();

        if has_audio {
            lines.push("# Audio tracks".to_string());
            let mut sorted: Vec<&AudioTrackInfo> = audio_tracks.iter().collect();
            sorted.sort_by(|a, b| {
                (!a.is_default, &a.language, std::cmp::Reverse(a.bitrate))
                    .cmp(&(!b.is_default, &b.language, std::cmp::Reverse(b.bitrate)))
            });
            for (i, track) in sorted.iter().enumerate() {
                lines.push(self.audio_entry(track, i == 0));
            }
            lines.push(String::new());
        }

        if has_subtitles {
            lines.push("# Subtitle tracks".to_string());
            let mut sorted: Vec<&SubtitleTrackInfo> = subtitle_tracks.iter().collect();
            sorted.sort_by(|a, b| {
                (!a.is_default, !a.forced, &a.language).cmp(&(!b.is_default, !b.forced, &b.language))
            });
            for track in sorted {
                lines.push(self.subtitle_entry(track));
            }
            lines.push(String::new());
        }

        lines.push("# Video variants".to_string());
        let mut sorted: Vec<&VideoVariantInfo> = video_variants.iter().collect();
        sorted.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));
        for variant in sorted {
            lines.extend(self.variant_entry(variant, has_audio, has_subtitles));
        }

        let master_path = self.output_dir.join("master.m3u8");
        std::fs::write(&master_path, lines.join("\n") + "\n")?;

        info!(
            "generated {} ({} variants, {} audio, {} subtitle tracks)",
            master_path.display(),
            video_variants.len(),
            audio_tracks.len(),
            subtitle_tracks.len()
        );
        Ok(master_path)
    }

    fn audio_entry(&self, track: &AudioTrackInfo, is_first: bool) -> String {
        let uri = self.relative_path(&track.playlist_path);
        let mut attrs = vec![
            "TYPE=AUDIO".to_string(),
            format!("GROUP-ID=\"{AUDIO_GROUP_ID}\""),
            format!("NAME=\"{}\"", track.name),
            format!("LANGUAGE=\"{}\"", track.language),
            format!("URI=\"{uri}\""),
        ];
        // Exactly one track is the default: the first after sorting.
        if is_first {
            attrs.push("DEFAULT=YES".to_string());
            attrs.push("AUTOSELECT=YES".to_string());
        } else {
            attrs.push("DEFAULT=NO".to_string());
            attrs.push("AUTOSELECT=NO".to_string());
        }
        format!("#EXT-X-MEDIA:{}", attrs.join(","))
    }

    fn subtitle_entry(&self, track: &SubtitleTrackInfo) -> String {
        let uri = self.relative_path(&track.file_path);
        let mut attrs = vec![
            "TYPE=SUBTITLES".to_string(),
            format!("GROUP-ID=\"{SUBTITLE_GROUP_ID}\""),
            format!("NAME=\"{}\"", track.name),
            format!("LANGUAGE=\"{}\"", track.language),
            format!("URI=\"{uri}\""),
        ];
        if track.is_default {
            attrs.push("DEFAULT=YES".to_string());
            attrs.push("AUTOSELECT=YES".to_string());
        } else {
            attrs.push("DEFAULT=NO".to_string());
        }
        if track.forced {
            attrs.push("FORCED=YES".to_string());
        }
        format!("#EXT-X-MEDIA:{}", attrs.join(","))
    }

    fn variant_entry(
        &self,
        variant: &VideoVariantInfo,
        has_audio: bool,
        has_subtitles: bool,
    ) -> Vec<String> {
        let uri = self.relative_path(&variant.playlist_path);

        // Separate-audio variants advertise the typical audio rendition
        // bitrate on top of their own.
        let separate_audio = has_audio && !variant.has_embedded_audio;
        let mut bandwidth = variant.bandwidth();
        let mut average_bandwidth = variant.bitrate as u64 * 900;
        if separate_audio {
            bandwidth += 128_000;
            average_bandwidth += 115_200;
        }

        let codecs = if separate_audio {
            variant
                .codecs
                .split(',')
                .next()
                .unwrap_or(&variant.codecs)
                .to_string()
        } else {
            variant.codecs.clone()
        };

        let mut attrs = vec![
            format!("BANDWIDTH={bandwidth}"),
            format!("AVERAGE-BANDWIDTH={average_bandwidth}"),
            format!("RESOLUTION={}", variant.resolution()),
            format!("FRAME-RATE={:.3}", variant.framerate),
            format!("CODECS=\"{codecs}\""),
        ];
        if separate_audio {
            attrs.push(format!("AUDIO=\"{AUDIO_GROUP_ID}\""));
        }
        if has_subtitles {
            attrs.push(format!("SUBTITLES=\"{SUBTITLE_GROUP_ID}\""));
        }

        vec![format!("#EXT-X-STREAM-INF:{}", attrs.join(",")), uri]
    }

    /// Paths inside the output tree are emitted relative to the master
    /// playlist's directory; anything else falls back to absolute.
    fn relative_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.output_dir) {
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    /// Write `metadata.json`, the machine-readable package summary.
    pub fn generate_metadata(
        &self,
        video_variants: &[VideoVariantInfo],
        audio_tracks: &[AudioTrackInfo],
        subtitle_tracks: &[SubtitleTrackInfo],
        source_info: Option<serde_json::Value>,
        transcoding_info: Option<serde_json::Value>,
    ) -> Result<PathBuf> {
        info!("generating metadata file");

        let mut metadata = json!({
            "version": "1.0",
            "generated_by": "hlspack",
            "master_playlist": "master.m3u8",
            "video": {
                "variants": video_variants.iter().map(|v| json!({
                    "quality": v.quality,
                    "resolution": v.resolution(),
                    "width": v.width,
                    "height": v.height,
                    "bitrate": v.bitrate,
                    "framerate": v.framerate,
                    "codecs": v.codecs,
                    "playlist": self.relative_path(&v.playlist_path),
                    "segments": v.segment_count,
                })).collect::<Vec<_>>(),
                "count": video_variants.len(),
            },
        });

        if !audio_tracks.is_empty() {
            metadata["audio"] = json!({
                "tracks": audio_tracks.iter().map(|a| json!({
                    "name": a.name,
                    "language": a.language,
                    "channels": a.channels,
                    "channel_layout": channel_layout_name(a.channels),
                    "sample_rate": a.sample_rate,
                    "bitrate": a.bitrate,
                    "codecs": a.codecs,
                    "playlist": self.relative_path(&a.playlist_path),
                    "default": a.is_default,
                })).collect::<Vec<_>>(),
                "count": audio_tracks.len(),
            });
        }

        if !subtitle_tracks.is_empty() {
            metadata["subtitles"] = json!({
                "tracks": subtitle_tracks.iter().map(|s| json!({
                    "name": s.name,
                    "language": s.language,
                    "file": self.relative_path(&s.file_path),
                    "default": s.is_default,
                    "forced": s.forced,
                })).collect::<Vec<_>>(),
                "count": subtitle_tracks.len(),
            });
        }

        if let Some(source) = source_info {
            metadata["source"] = source;
        }
        if let Some(transcoding) = transcoding_info {
            metadata["transcoding"] = transcoding;
        }

        let metadata_path = self.output_dir.join("metadata.json");
        std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)? + "\n")
            .map_err(crate::error::Error::Io)?;

        debug!("generated {}", metadata_path.display());
        Ok(metadata_path)
    }

    /// Advisory checks on the audio track set before emission.
    pub fn validate_audio_tracks(audio_tracks: &[AudioTrackInfo]) -> Vec<String> {
        let mut warnings = Vec::new();
        if audio_tracks.is_empty() {
            return warnings;
        }

        let defaults = audio_tracks.iter().filter(|t| t.is_default).count();
        if defaults == 0 {
            warnings.push("No audio track marked as default, players may not auto-select".into());
        } else if defaults > 1 {
            warnings.push(format!(
                "Multiple audio tracks marked as default ({defaults}), only first will be used"
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for track in audio_tracks {
            if !seen.insert((track.language.clone(), track.bitrate, track.channels)) {
                warnings.push(format!(
                    "Duplicate audio track: {} @ {}kbps with {} channels",
                    track.language, track.bitrate, track.channels
                ));
            }
        }
        warnings
    }
}
