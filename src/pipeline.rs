use crate::config::TranscoderConfig;
use crate::error::Result;
use crate::executor::{ParallelExecutor, ProgressHook};
use crate::hardware::HardwareDetector;
use crate::inspector::MediaInspector;
use crate::planner::ExecutionPlanner;
use crate::playlist::{AudioTrackInfo, PlaylistGenerator, SubtitleTrackInfo, VideoVariantInfo};
use crate::types::{ExecutionSummary, MediaInfo, TaskKind, ValidationResult};
use crate::validator::{OutputValidator, SpriteOutput};
use crate::workers::sprite;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub profile: String,
    pub original_only: bool,
    pub include_audio: bool,
    pub include_subtitles: bool,
    pub include_sprites: bool,
    pub test_encoders: bool,
    pub max_concurrent: Option<u32>,
}

impl PipelineOptions {
    pub fn new(input: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            input,
            output_dir,
            profile: "medium".to_string(),
            original_only: false,
            include_audio: true,
            include_subtitles: true,
            include_sprites: true,
            test_encoders: false,
            max_concurrent: None,
        }
    }
}

/// Everything the caller needs to judge one run.
#[derive(Debug)]
pub struct PipelineReport {
    pub media_info: MediaInfo,
    pub inspection_warnings: Vec<String>,
    pub summary: ExecutionSummary,
    pub validation: ValidationResult,
    pub master_playlist: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub hardware_used: String,
}

/// One full run: inspect, detect, plan, execute, emit playlists, validate.
///
/// Task failures never abort the run; they surface through the summary and
/// the validation result. This only fails when the run cannot start at all
/// (bad config, unreadable source, no encoders).
pub async fn run(
    config: &TranscoderConfig,
    options: &PipelineOptions,
    progress: Option<ProgressHook>,
) -> Result<PipelineReport> {
    config.validate()?;

    let detector = HardwareDetector::new();
    let hardware_info = detector
        .detect(&config.hardware.prefer, options.test_encoders)
        .await?;
    let hardware_used = hardware_info
        .selected_encoder
        .as_ref()
        .map(|e| e.name.clone())
        .unwrap_or_else(|| "software".to_string());

    let inspector = MediaInspector::new();
    let media_info = inspector.inspect(&options.input).await?;
    let inspection_warnings = inspector.validate_for_transcoding(&media_info);

    let planner = ExecutionPlanner::new(
        &options.input,
        &media_info,
        &hardware_info,
        config,
        &options.output_dir,
        &options.profile,
    )?;
    let plan = planner.create_plan(
        options.include_audio,
        options.include_subtitles,
        options.include_sprites,
        options.original_only,
    )?;
    let strategy = planner.create_execution_strategy(&plan, options.max_concurrent);

    tokio::fs::create_dir_all(&options.output_dir).await?;

    let media_info = Arc::new(media_info);
    let hardware_info = Arc::new(hardware_info);
    let shared_config = Arc::new(config.clone());

    let executor = ParallelExecutor::new(
        media_info.clone(),
        hardware_info.clone(),
        shared_config,
        strategy,
    );
    let summary = executor
        .execute(
            &plan.video_tasks,
            &plan.audio_tasks,
            &plan.subtitle_tasks,
            plan.sprite_task.as_ref(),
            progress,
        )
        .await;

    if summary.has_failures() {
        warn!(
            "transcoding completed with {} failure(s)",
            summary.failed_tasks
        );
    }

    let (video_variants, audio_tracks, subtitle_tracks, sprite_output) =
        collect_outputs(&summary, &media_info);

    let mut master_playlist = None;
    let mut metadata_path = None;
    if !video_variants.is_empty() {
        let generator = PlaylistGenerator::new(&options.output_dir);
        match generator.generate_master_playlist(&video_variants, &audio_tracks, &subtitle_tracks)
        {
            Ok(path) => master_playlist = Some(path),
            Err(e) => warn!("failed to generate master playlist: {e}"),
        }

        if config.output.create_metadata {
            let source_info = json!({
                "filename": options
                    .input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                "size": media_info.size,
                "duration": media_info.duration,
            });
            let transcoding_info = json!({
                "encoder": hardware_used,
                "hardware": hardware_info.detected_type.as_str(),
                "total_tasks": summary.total_tasks,
                "duration_seconds": summary.total_duration,
                "completed_at": chrono::Utc::now().to_rfc3339(),
            });
            match generator.generate_metadata(
                &video_variants,
                &audio_tracks,
                &subtitle_tracks,
                Some(source_info),
                Some(transcoding_info),
            ) {
                Ok(path) => metadata_path = Some(path),
                Err(e) => warn!("failed to generate metadata: {e}"),
            }
        }
    } else {
        warn!("no successful video variants, skipping playlist generation");
    }

    let validator = OutputValidator::new(&options.output_dir);
    let validation = validator.validate(
        &video_variants,
        &audio_tracks,
        &subtitle_tracks,
        sprite_output.as_ref(),
        metadata_path.as_deref(),
    );

    info!(
        "pipeline finished: {}/{} tasks, validation {}",
        summary.completed_tasks,
        summary.total_tasks,
        if validation.is_valid() { "passed" } else { "failed" }
    );

    Ok(PipelineReport {
        media_info: (*media_info).clone(),
        inspection_warnings,
        summary,
        validation,
        master_playlist,
        metadata_path,
        hardware_used,
    })
}

/// Display name for an audio rendition: upper-cased language, plus a
/// channel descriptor when it is not plain stereo.
fn audio_track_name(language: &str, channels: u32) -> String {
    let mut name = language.to_uppercase();
    if channels != 2 {
        let channel_desc = match channels {
            1 => "Mono".to_string(),
            6 => "5.1".to_string(),
            8 => "7.1".to_string(),
            n => format!("{n}ch"),
        };
        name.push(' ');
        name.push_str(&channel_desc);
    }
    name
}

fn count_segments(playlist_path: &Path) -> u32 {
    std::fs::read_to_string(playlist_path)
        .map(|content| content.matches("#EXTINF:").count() as u32)
        .unwrap_or(0)
}

/// Turn successful execution results into playlist/validation inputs.
pub(crate) fn collect_outputs(
    summary: &ExecutionSummary,
    media_info: &MediaInfo,
) -> (
    Vec<VideoVariantInfo>,
    Vec<AudioTrackInfo>,
    Vec<SubtitleTrackInfo>,
    Option<SpriteOutput>,
) {
    let mut video_variants = Vec::new();
    let mut audio_tracks = Vec::new();
    let mut subtitle_tracks = Vec::new();
    let mut sprite_output = None;

    let framerate = media_info.primary_video().map(|v| v.fps).unwrap_or(0.0);
    let default_audio_index = media_info.audio_streams.first().map(|s| s.index);

    for result in &summary.results {
        if !result.success {
            continue;
        }
        let Some(output_path) = &result.output_path else {
            continue;
        };

        match &result.task.kind {
            TaskKind::Video(spec) => {
                video_variants.push(VideoVariantInfo::new(
                    spec.quality.clone(),
                    spec.width,
                    spec.height,
                    spec.bitrate_kbps,
                    framerate,
                    output_path.clone(),
                    count_segments(output_path),
                    "h264",
                    false,
                ));
            }
            TaskKind::Audio(spec) => {
                let Some(stream) = media_info
                    .audio_streams
                    .iter()
                    .find(|s| s.index == spec.stream_index)
                else {
                    warn!(
                        "audio stream {} not found in media info, skipping track",
                        spec.stream_index
                    );
                    continue;
                };
                audio_tracks.push(AudioTrackInfo::new(
                    audio_track_name(&stream.language, stream.channels),
                    stream.language.clone(),
                    stream.channels,
                    stream.sample_rate,
                    crate::util::bitrate_kbps(&spec.bitrate),
                    output_path.clone(),
                    default_audio_index == Some(stream.index),
                    &spec.codec,
                ));
            }
            TaskKind::Subtitle(spec) => {
                let stream = media_info
                    .subtitle_streams
                    .iter()
                    .find(|s| s.index == spec.stream_index);
                subtitle_tracks.push(SubtitleTrackInfo {
                    name: spec.language.to_uppercase(),
                    language: spec.language.clone(),
                    file_path: output_path.clone(),
                    is_default: stream.map(|s| s.is_default).unwrap_or(false),
                    forced: stream.map(|s| s.forced).unwrap_or(false),
                });
            }
            TaskKind::Sprite(spec) => {
                let thumbnails = sprite::thumbnail_count(media_info.duration, spec.interval);
                let sheets = sprite::sheet_count(thumbnails, spec);
                let sheet_paths = (0..sheets)
                    .map(|i| {
                        result
                            .task
                            .output_dir
                            .join(sprite::sheet_filename(sheets, i))
                    })
                    .collect();
                sprite_output = Some(SpriteOutput {
                    sheet_paths,
                    vtt_path: output_path.clone(),
                    thumbnail_count: thumbnails,
                });
            }
        }
    }

    (video_variants, audio_tracks, subtitle_tracks, sprite_output)
}
