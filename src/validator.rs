use crate::playlist::{AudioTrackInfo, SubtitleTrackInfo, VideoVariantInfo};
use crate::types::ValidationResult;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sprite artifacts to verify.
#[derive(Debug, Clone)]
pub struct SpriteOutput {
    pub sheet_paths: Vec<PathBuf>,
    pub vtt_path: PathBuf,
    pub thumbnail_count: u32,
}

/// Structural re-read checks over the emitted output tree.
///
/// Validation is pure: it only reads the filesystem, so running it twice
/// over the same tree yields the same result. It never fails the pipeline;
/// the caller decides what a non-empty error list means.
pub struct OutputValidator {
    output_dir: PathBuf,
}

impl OutputValidator {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn validate(
        &self,
        video_variants: &[VideoVariantInfo],
        audio_tracks: &[AudioTrackInfo],
        subtitle_tracks: &[SubtitleTrackInfo],
        sprite: Option<&SpriteOutput>,
        metadata_file: Option<&Path>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        info!("validating output in {}", self.output_dir.display());

        if !self.check_master_playlist(video_variants, audio_tracks, subtitle_tracks, &mut result) {
            result.master_playlist_valid = false;
        }
        if !self.check_video_variants(video_variants, &mut result) {
            result.all_segments_present = false;
        }
        if !self.check_audio_tracks(audio_tracks, &mut result) {
            result.audio_tracks_valid = false;
        }
        if !self.check_subtitle_tracks(subtitle_tracks, &mut result) {
            result.subtitle_files_valid = false;
        }
        self.check_sprites(sprite, &mut result);
        self.check_metadata(metadata_file, &mut result);

        if !result.is_valid() {
            warn!(
                "validation failed with {} error(s) and {} warning(s)",
                result.errors.len(),
                result.warnings.len()
            );
        } else if result.has_warnings() {
            warn!("validation passed with {} warning(s)", result.warnings.len());
        } else {
            info!("validation passed");
        }

        result
    }

    fn check_master_playlist(
        &self,
        video_variants: &[VideoVariantInfo],
        audio_tracks: &[AudioTrackInfo],
        subtitle_tracks: &[SubtitleTrackInfo],
        result: &mut ValidationResult,
    ) -> bool {
        let master_path = self.output_dir.join("master.m3u8");

        if !master_path.exists() {
            result.add_error(format!("Master playlist not found: {}", master_path.display()));
            return false;
        }
        let content = match std::fs::read_to_string(&master_path) {
            Ok(content) if !content.is_empty() => content,
            Ok(_) => {
                result.add_error("Master playlist is empty".to_string());
                return false;
            }
            Err(e) => {
                result.add_error(format!("Failed to read master playlist: {e}"));
                return false;
            }
        };

        if !content.starts_with("#EXTM3U") {
            result.add_error("Master playlist missing #EXTM3U header".to_string());
            return false;
        }
        if !content.contains("#EXT-X-VERSION:") {
            result.add_warning("Master playlist missing #EXT-X-VERSION tag".to_string());
        }
        if !video_variants.is_empty() && !content.contains("#EXT-X-STREAM-INF:") {
            result.add_error("Master playlist missing video variant entries".to_string());
            return false;
        }
        if !audio_tracks.is_empty() && !content.contains("TYPE=AUDIO") {
            result.add_warning("Master playlist missing audio track entries".to_string());
        }
        if !subtitle_tracks.is_empty() && !content.contains("TYPE=SUBTITLES") {
            result.add_warning("Master playlist missing subtitle entries".to_string());
        }

        debug!("master playlist validated");
        true
    }

    fn check_media_playlist(
        &self,
        playlist_path: &Path,
        label: &str,
        expected_segments: u32,
        result: &mut ValidationResult,
    ) -> bool {
        if !playlist_path.exists() {
            result.add_error(format!("{label} playlist not found: {}", playlist_path.display()));
            return false;
        }
        let content = match std::fs::read_to_string(playlist_path) {
            Ok(content) => content,
            Err(e) => {
                result.add_error(format!("Failed to read {label} playlist: {e}"));
                return false;
            }
        };

        if !content.starts_with("#EXTM3U") {
            result.add_error(format!("{label} playlist missing #EXTM3U header"));
            return false;
        }
        if !content.contains("#EXTINF:") {
            result.add_error(format!("{label} playlist missing segment entries"));
            return false;
        }

        let found = content.matches("#EXTINF:").count() as u32;
        if expected_segments > 0 && found != expected_segments {
            result.add_warning(format!(
                "{label} playlist segment count mismatch (expected {expected_segments}, found {found})"
            ));
        }

        let parent = playlist_path.parent().unwrap_or(&self.output_dir);
        let missing: Vec<PathBuf> = extract_segment_paths(&content, parent)
            .into_iter()
            .filter(|segment| !segment.exists())
            .collect();
        if !missing.is_empty() {
            result.add_error(format!("{label} missing {} segment(s)", missing.len()));
            return false;
        }

        debug!("{label} playlist validated");
        true
    }

    fn check_video_variants(
        &self,
        video_variants: &[VideoVariantInfo],
        result: &mut ValidationResult,
    ) -> bool {
        if video_variants.is_empty() {
            result.add_warning("No video variants to validate".to_string());
            return true;
        }
        let mut all_valid = true;
        for variant in video_variants {
            let label = format!("Video variant {}", variant.quality);
            if !self.check_media_playlist(
                &variant.playlist_path,
                &label,
                variant.segment_count,
                result,
            ) {
                all_valid = false;
            }
        }
        all_valid
    }

    fn check_audio_tracks(
        &self,
        audio_tracks: &[AudioTrackInfo],
        result: &mut ValidationResult,
    ) -> bool {
        let mut all_valid = true;
        for track in audio_tracks {
            let label = format!("Audio track {}", track.name);
            if !self.check_media_playlist(&track.playlist_path, &label, 0, result) {
                all_valid = false;
            }
        }
        all_valid
    }

    fn check_subtitle_tracks(
        &self,
        subtitle_tracks: &[SubtitleTrackInfo],
        result: &mut ValidationResult,
    ) -> bool {
        let mut all_valid = true;
        for track in subtitle_tracks {
            if !track.file_path.exists() {
                result.add_error(format!(
                    "Subtitle file not found: {} ({})",
                    track.language,
                    track.file_path.display()
                ));
                all_valid = false;
                continue;
            }
            let content = match std::fs::read_to_string(&track.file_path) {
                Ok(content) => content,
                Err(e) => {
                    result.add_error(format!("Failed to read subtitle {}: {e}", track.language));
                    all_valid = false;
                    continue;
                }
            };
            if content.is_empty() {
                result.add_warning(format!("Subtitle file is empty: {}", track.language));
                continue;
            }
            let is_vtt = track
                .file_path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("vtt"));
            if is_vtt && !content.starts_with("WEBVTT") {
                result.add_error(format!(
                    "WebVTT subtitle missing WEBVTT header: {}",
                    track.language
                ));
                all_valid = false;
            }
        }
        all_valid
    }

    fn check_sprites(&self, sprite: Option<&SpriteOutput>, result: &mut ValidationResult) -> bool {
        let Some(sprite) = sprite else {
            return true;
        };

        for sheet in &sprite.sheet_paths {
            if !sheet.exists() {
                result.add_error(format!("Sprite image not found: {}", sheet.display()));
                return false;
            }
        }
        if !sprite.vtt_path.exists() {
            result.add_error(format!(
                "Sprite VTT file not found: {}",
                sprite.vtt_path.display()
            ));
            return false;
        }
        let content = match std::fs::read_to_string(&sprite.vtt_path) {
            Ok(content) => content,
            Err(e) => {
                result.add_error(format!("Failed to read sprite VTT: {e}"));
                return false;
            }
        };
        if !content.starts_with("WEBVTT") {
            result.add_error("Sprite VTT missing WEBVTT header".to_string());
            return false;
        }
        let cue_count = content.matches("-->").count() as u32;
        if cue_count != sprite.thumbnail_count {
            result.add_warning(format!(
                "Sprite VTT cue count mismatch (expected {}, found {cue_count})",
                sprite.thumbnail_count
            ));
        }
        debug!("sprite files validated ({} sheet(s))", sprite.sheet_paths.len());
        true
    }

    fn check_metadata(&self, metadata_file: Option<&Path>, result: &mut ValidationResult) -> bool {
        let Some(metadata_path) = metadata_file else {
            result.add_warning("No metadata file specified".to_string());
            return true;
        };

        if !metadata_path.exists() {
            result.add_warning(format!(
                "Metadata file not found: {}",
                metadata_path.display()
            ));
            return false;
        }
        let content = match std::fs::read_to_string(metadata_path) {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => {
                result.add_warning("Metadata file is empty".to_string());
                return false;
            }
            Err(e) => {
                result.add_warning(format!("Failed to read metadata: {e}"));
                return false;
            }
        };

        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(metadata) => {
                for key in ["version", "master_playlist"] {
                    if metadata.get(key).is_none() {
                        result.add_warning(format!("Metadata missing key: {key}"));
                    }
                }
                debug!("metadata file validated");
                true
            }
            Err(e) => {
                result.add_warning(format!("Invalid JSON in metadata file: {e}"));
                false
            }
        }
    }
}

/// Segment references are the non-comment lines with media extensions.
fn extract_segment_paths(playlist_content: &str, playlist_dir: &Path) -> Vec<PathBuf> {
    playlist_content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            [".ts", ".m4s", ".mp4", ".aac"]
                .iter()
                .any(|ext| line.ends_with(ext))
        })
        .map(|line| playlist_dir.join(line))
        .collect()
}
