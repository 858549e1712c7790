use crate::config::{QualityVariantConfig, TranscoderConfig};
use crate::error::{Error, Result};
use crate::hardware::{HardwareInfo, HardwareType};
use crate::types::{
    AudioSpec, MediaInfo, SpriteSpec, SubtitleSpec, Task, TaskKind, TaskPlan, VideoSpec,
};
use crate::util::{should_include_quality, target_resolution};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Standard quality presets: bitrate / maxrate / bufsize in kbps.
#[derive(Debug, Clone, Copy)]
pub struct QualityPreset {
    pub name: &'static str,
    pub height: u32,
    pub bitrate: u32,
    pub maxrate: u32,
    pub bufsize: u32,
}

pub const QUALITY_PRESETS: [QualityPreset; 6] = [
    QualityPreset { name: "2160p", height: 2160, bitrate: 12000, maxrate: 18000, bufsize: 24000 },
    QualityPreset { name: "1440p", height: 1440, bitrate: 8000, maxrate: 12000, bufsize: 16000 },
    QualityPreset { name: "1080p", height: 1080, bitrate: 5000, maxrate: 7500, bufsize: 10000 },
    QualityPreset { name: "720p", height: 720, bitrate: 3000, maxrate: 4500, bufsize: 6000 },
    QualityPreset { name: "480p", height: 480, bitrate: 1500, maxrate: 2250, bufsize: 3000 },
    QualityPreset { name: "360p", height: 360, bitrate: 800, maxrate: 1200, bufsize: 1600 },
];

pub fn preset_for(quality: &str) -> Option<&'static QualityPreset> {
    QUALITY_PRESETS.iter().find(|p| p.name == quality)
}

fn preset_for_height(height: u32) -> Option<&'static QualityPreset> {
    QUALITY_PRESETS.iter().find(|p| p.height == height)
}

/// One rung of the quality ladder after resolution math.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderEntry {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub maxrate: u32,
    pub bufsize: u32,
    pub crf: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceEstimate {
    pub estimated_duration: f64,
    pub estimated_output_size: u64,
    pub peak_memory_mb: u64,
    pub disk_space_needed: u64,
    pub cpu_cores_needed: u32,
    pub gpu_memory_mb: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionStrategy {
    pub video_concurrency: u32,
    pub audio_concurrency: u32,
    pub subtitle_concurrency: u32,
    pub sprite_separate: bool,
    pub max_total_concurrent: u32,
}

impl ExecutionStrategy {
    /// All concurrency values are clamped to at least 1.
    pub fn new(
        video_concurrency: u32,
        audio_concurrency: u32,
        subtitle_concurrency: u32,
        sprite_separate: bool,
        max_total_concurrent: u32,
    ) -> Self {
        Self {
            video_concurrency: video_concurrency.max(1),
            audio_concurrency: audio_concurrency.max(1),
            subtitle_concurrency: subtitle_concurrency.max(1),
            sprite_separate,
            max_total_concurrent: max_total_concurrent.max(1),
        }
    }

    pub fn total_workers(&self) -> u32 {
        self.video_concurrency
            + self.audio_concurrency
            + self.subtitle_concurrency
            + u32::from(self.sprite_separate)
    }
}

/// Encoding speed relative to realtime, by hardware family.
fn speed_multiplier(hardware_type: HardwareType) -> f64 {
    match hardware_type {
        HardwareType::Nvidia => 3.0,
        HardwareType::Apple | HardwareType::Intel | HardwareType::Amd => 2.5,
        HardwareType::Vaapi => 2.0,
        HardwareType::Software => 0.5,
    }
}

/// Derives the quality ladder and the full task set for one run.
pub struct ExecutionPlanner<'a> {
    input: &'a Path,
    media_info: &'a MediaInfo,
    hardware_info: &'a HardwareInfo,
    config: &'a TranscoderConfig,
    output_dir: PathBuf,
    profile_name: String,
    profile: Vec<QualityVariantConfig>,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new(
        input: &'a Path,
        media_info: &'a MediaInfo,
        hardware_info: &'a HardwareInfo,
        config: &'a TranscoderConfig,
        output_dir: &Path,
        profile_name: &str,
    ) -> Result<Self> {
        let profile = config.get_profile(profile_name).cloned().ok_or_else(|| {
            Error::Config(format!(
                "profile {profile_name:?} not found, available: {}",
                config.profile_names().join(", ")
            ))
        })?;
        Ok(Self {
            input,
            media_info,
            hardware_info,
            config,
            output_dir: output_dir.to_path_buf(),
            profile_name: profile_name.to_string(),
            profile,
        })
    }

    pub fn create_plan(
        &self,
        include_audio: bool,
        include_subtitles: bool,
        include_sprites: bool,
        original_only: bool,
    ) -> Result<TaskPlan> {
        if self.media_info.duration <= 0.0 {
            return Err(Error::Transcoding(
                "source has no usable duration".to_string(),
            ));
        }

        info!("creating execution plan (profile {})", self.profile_name);
        let mut plan = TaskPlan::default();

        let ladder = self.quality_ladder(original_only);
        plan.video_tasks = self.video_tasks(&ladder);
        info!("created {} video tasks", plan.video_tasks.len());

        if include_audio && self.media_info.has_audio() {
            plan.audio_tasks = self.audio_tasks();
            info!("created {} audio tasks", plan.audio_tasks.len());
        }

        if include_subtitles && self.media_info.has_subtitles() {
            plan.subtitle_tasks = self.subtitle_tasks();
            info!("created {} subtitle tasks", plan.subtitle_tasks.len());
        }

        if include_sprites && self.config.sprites.enabled {
            plan.sprite_task = Some(self.sprite_task());
            info!("created sprite generation task");
        }

        let estimate = self.estimate_resources(&plan);
        plan.estimated_duration = estimate.estimated_duration;
        plan.estimated_size = estimate.estimated_output_size;

        info!(
            "plan complete: {} tasks, ~{:.1}s, ~{}",
            plan.total_tasks(),
            estimate.estimated_duration,
            crate::util::format_size(estimate.estimated_output_size)
        );

        Ok(plan)
    }

    /// The central planning decision: which resolutions to produce.
    pub fn quality_ladder(&self, original_only: bool) -> Vec<LadderEntry> {
        let Some(source) = self.media_info.primary_video() else {
            return Vec::new();
        };
        let (source_width, source_height) = (source.width, source.height);
        debug!("quality ladder from source {source_width}x{source_height}");

        if original_only {
            let entry = match preset_for_height(source_height) {
                Some(preset) => LadderEntry {
                    name: "original".to_string(),
                    width: source_width,
                    height: source_height,
                    bitrate: preset.bitrate,
                    maxrate: preset.maxrate,
                    bufsize: preset.bufsize,
                    crf: None,
                },
                None => {
                    // Rule of thumb for non-standard frames: ~0.1 bits per pixel.
                    let bitrate = (source_width as u64 * source_height as u64 / 10 / 1000) as u32;
                    LadderEntry {
                        name: "original".to_string(),
                        width: source_width,
                        height: source_height,
                        bitrate,
                        maxrate: bitrate * 3 / 2,
                        bufsize: bitrate * 2,
                        crf: None,
                    }
                }
            };
            info!("original-only mode: {}x{}", entry.width, entry.height);
            return vec![entry];
        }

        let mut ladder: Vec<LadderEntry> = Vec::new();
        for variant in &self.profile {
            if variant.quality == "original" {
                continue;
            }
            let Some(preset) = preset_for(&variant.quality) else {
                warn!("unknown quality preset: {}", variant.quality);
                continue;
            };
            if !should_include_quality(source_height, &variant.quality, false) {
                debug!("skipping {} (would require upscaling)", variant.quality);
                continue;
            }
            let (width, height) = target_resolution(source_width, source_height, &variant.quality);
            ladder.push(LadderEntry {
                name: variant.quality.clone(),
                width,
                height,
                bitrate: preset.bitrate,
                maxrate: preset.maxrate,
                bufsize: preset.bufsize,
                crf: Some(variant.crf),
            });
        }

        ladder.sort_by(|a, b| b.height.cmp(&a.height));
        info!(
            "quality ladder: {} ({} variants)",
            ladder
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            ladder.len()
        );
        ladder
    }

    fn video_tasks(&self, ladder: &[LadderEntry]) -> Vec<Arc<Task>> {
        let Some(source) = self.media_info.primary_video() else {
            return Vec::new();
        };
        let encoder = self
            .hardware_info
            .selected_encoder
            .as_ref()
            .map(|e| e.name.clone())
            .unwrap_or_else(|| "libx264".to_string());

        ladder
            .iter()
            .map(|entry| {
                Arc::new(Task::new(
                    format!("video_{}", entry.name),
                    self.input.to_path_buf(),
                    self.output_dir.join(format!("video_{}", entry.name)),
                    TaskKind::Video(VideoSpec {
                        quality: entry.name.clone(),
                        width: entry.width,
                        height: entry.height,
                        bitrate_kbps: entry.bitrate,
                        maxrate_kbps: entry.maxrate,
                        bufsize_kbps: entry.bufsize,
                        crf: entry.crf,
                        encoder: encoder.clone(),
                        stream_index: source.index,
                    }),
                ))
            })
            .collect()
    }

    fn audio_tasks(&self) -> Vec<Arc<Task>> {
        self.media_info
            .audio_streams
            .iter()
            .map(|stream| {
                let language = if stream.language.is_empty() {
                    "und".to_string()
                } else {
                    stream.language.clone()
                };
                Arc::new(Task::new(
                    format!("audio_{}_{}", stream.index, language),
                    self.input.to_path_buf(),
                    self.output_dir.join(format!("audio_{language}")),
                    TaskKind::Audio(AudioSpec {
                        stream_index: stream.index,
                        language,
                        codec: self.config.audio.codec.clone(),
                        bitrate: self.config.audio.bitrate.clone(),
                    }),
                ))
            })
            .collect()
    }

    fn subtitle_tasks(&self) -> Vec<Arc<Task>> {
        self.media_info
            .subtitle_streams
            .iter()
            .map(|stream| {
                let language = if stream.language.is_empty() {
                    "und".to_string()
                } else {
                    stream.language.clone()
                };
                Arc::new(Task::new(
                    format!("subtitle_{}_{}", stream.index, language),
                    self.input.to_path_buf(),
                    self.output_dir.join("subtitles"),
                    TaskKind::Subtitle(SubtitleSpec {
                        stream_index: stream.index,
                        language,
                        format: "webvtt".to_string(),
                    }),
                ))
            })
            .collect()
    }

    fn sprite_task(&self) -> Arc<Task> {
        let sprites = &self.config.sprites;
        Arc::new(Task::new(
            "sprites",
            self.input.to_path_buf(),
            self.output_dir.join("sprites"),
            TaskKind::Sprite(SpriteSpec {
                interval: sprites.interval,
                width: sprites.width,
                height: sprites.height,
                columns: sprites.columns,
                rows: sprites.rows,
            }),
        ))
    }

    pub fn estimate_resources(&self, plan: &TaskPlan) -> ResourceEstimate {
        let duration = self
            .media_info
            .primary_video()
            .map(|v| if v.duration > 0.0 { v.duration } else { self.media_info.duration })
            .unwrap_or(self.media_info.duration);

        let speed = speed_multiplier(self.hardware_info.detected_type);
        // The four task classes run on independent axes, so the estimate is
        // the slowest axis, not the sum.
        let video_duration = if plan.video_tasks.is_empty() { 0.0 } else { duration / speed };
        let audio_duration = if plan.audio_tasks.is_empty() { 0.0 } else { duration / 4.0 };
        let subtitle_duration = if plan.subtitle_tasks.is_empty() { 0.0 } else { duration / 10.0 };
        let sprite_duration = if plan.sprite_task.is_none() { 0.0 } else { duration / 5.0 };
        let estimated_duration = video_duration
            .max(audio_duration)
            .max(subtitle_duration)
            .max(sprite_duration);

        let mut total_size: u64 = 0;
        let mut video_memory: u64 = 0;
        for task in &plan.video_tasks {
            if let TaskKind::Video(spec) = &task.kind {
                total_size += (spec.bitrate_kbps as u64 * 1000) * duration as u64 / 8;
                video_memory += (spec.width as u64 * spec.height as u64) * 50 / 1_000_000;
            }
        }
        for task in &plan.audio_tasks {
            if let TaskKind::Audio(spec) = &task.kind {
                total_size += crate::util::parse_bitrate(&spec.bitrate) * duration as u64 / 8;
            }
        }
        total_size += plan.subtitle_tasks.len() as u64 * 50 * 1024;
        if let Some(task) = &plan.sprite_task {
            if let TaskKind::Sprite(spec) = &task.kind {
                let thumbnails = crate::util::segment_count(duration, spec.interval) as u64;
                let per_sheet = spec.thumbnails_per_sheet() as u64;
                let sheets = thumbnails.div_ceil(per_sheet.max(1));
                total_size += sheets * 100 * 1024;
            }
        }

        let peak_memory_mb = 100
            + video_memory
            + plan.audio_tasks.len() as u64 * 50
            + if plan.sprite_task.is_some() { 200 } else { 0 };

        let gpu_memory_mb = if self.hardware_info.detected_type == HardwareType::Software {
            0
        } else {
            plan.video_tasks.len() as u64 * 500
        };

        ResourceEstimate {
            estimated_duration,
            estimated_output_size: total_size,
            peak_memory_mb,
            disk_space_needed: (total_size as f64 * 1.3) as u64,
            cpu_cores_needed: (plan.total_tasks() as u32).min(8),
            gpu_memory_mb,
        }
    }

    pub fn create_execution_strategy(
        &self,
        plan: &TaskPlan,
        max_concurrent: Option<u32>,
    ) -> ExecutionStrategy {
        let max_concurrent =
            max_concurrent.unwrap_or(self.config.performance.max_parallel_tasks);

        let video_count = plan.video_tasks.len() as u32;
        let audio_count = plan.audio_tasks.len() as u32;
        let subtitle_count = plan.subtitle_tasks.len() as u32;

        let mut hw_limit = self.config.hardware.max_instances;
        if self.hardware_info.detected_type == HardwareType::Software {
            let cpu_count = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(4);
            hw_limit = (cpu_count / 2).max(1);
        }

        let video_concurrency = video_count.min(hw_limit).min(max_concurrent);
        let remaining = max_concurrent.saturating_sub(video_concurrency);
        let audio_concurrency = audio_count.min((remaining / 2).max(1));
        let remaining = max_concurrent
            .saturating_sub(video_concurrency)
            .saturating_sub(audio_concurrency);
        let subtitle_concurrency = subtitle_count.min(remaining.max(1));

        let sprite_separate = plan.sprite_task.is_some() && video_count + audio_count > 2;

        let strategy = ExecutionStrategy::new(
            video_concurrency,
            audio_concurrency,
            subtitle_concurrency,
            sprite_separate,
            max_concurrent,
        );

        info!(
            "execution strategy: video={}, audio={}, subtitle={}, sprites={}",
            strategy.video_concurrency,
            strategy.audio_concurrency,
            strategy.subtitle_concurrency,
            if strategy.sprite_separate { "separate" } else { "parallel" }
        );

        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{software_hardware_info, test_media_info};

    fn planner_fixture<'a>(
        media: &'a MediaInfo,
        hardware: &'a HardwareInfo,
        config: &'a TranscoderConfig,
    ) -> ExecutionPlanner<'a> {
        ExecutionPlanner::new(
            Path::new("/media/source.mkv"),
            media,
            hardware,
            config,
            Path::new("/media/out"),
            "medium",
        )
        .unwrap()
    }

    #[test]
    fn test_medium_profile_1080p_source() {
        let media = test_media_info(1920, 1080);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);

        let plan = planner.create_plan(true, true, false, false).unwrap();
        assert_eq!(plan.video_tasks.len(), 3);
        assert_eq!(plan.audio_tasks.len(), 1);
        assert_eq!(plan.subtitle_tasks.len(), 1);
        assert!(plan.sprite_task.is_none());

        let ladder = planner.quality_ladder(false);
        let names: Vec<&str> = ladder.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["1080p", "720p", "480p"]);
        assert_eq!(ladder[0].bitrate, 5000);
        assert_eq!(ladder[1].bitrate, 3000);
        assert_eq!(ladder[2].bitrate, 1500);
    }

    #[test]
    fn test_no_upscaling() {
        let media = test_media_info(1280, 720);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);

        let ladder = planner.quality_ladder(false);
        let names: Vec<&str> = ladder.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["720p", "480p"]);
        assert!(ladder.iter().all(|e| e.height <= 720));
    }

    #[test]
    fn test_ladder_sorted_descending() {
        let media = test_media_info(3840, 2160);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = ExecutionPlanner::new(
            Path::new("/media/source.mkv"),
            &media,
            &hardware,
            &config,
            Path::new("/media/out"),
            "ultra",
        )
        .unwrap();

        let ladder = planner.quality_ladder(false);
        assert!(ladder.windows(2).all(|w| w[0].height > w[1].height));
    }

    #[test]
    fn test_original_only_4k() {
        let media = test_media_info(3840, 2160);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);

        let ladder = planner.quality_ladder(true);
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder[0].name, "original");
        assert_eq!((ladder[0].width, ladder[0].height), (3840, 2160));
        // 2160 matches a known preset, so its rates are copied.
        assert_eq!(ladder[0].bitrate, 12000);
    }

    #[test]
    fn test_original_only_nonstandard_height_estimates_bitrate() {
        let media = test_media_info(1366, 768);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);

        let ladder = planner.quality_ladder(true);
        assert_eq!(ladder.len(), 1);
        let expected = 1366 * 768 / 10 / 1000;
        assert_eq!(ladder[0].bitrate, expected);
        assert_eq!(ladder[0].maxrate, expected * 3 / 2);
        assert_eq!(ladder[0].bufsize, expected * 2);
    }

    #[test]
    fn test_nonstandard_aspect_720p_target() {
        let media = test_media_info(1366, 768);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);

        let ladder = planner.quality_ladder(false);
        let entry = ladder.iter().find(|e| e.name == "720p").unwrap();
        assert_eq!((entry.width, entry.height), (1280, 720));
        let source_aspect = 1366.0 / 768.0;
        let target_aspect = entry.width as f64 / entry.height as f64;
        assert!((source_aspect - target_aspect).abs() < 0.01);
    }

    #[test]
    fn test_zero_duration_refused() {
        let mut media = test_media_info(1920, 1080);
        media.duration = 0.0;
        media.video_streams[0].duration = 0.0;
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);
        assert!(planner.create_plan(true, true, true, false).is_err());
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let media = test_media_info(1920, 1080);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let result = ExecutionPlanner::new(
            Path::new("/media/source.mkv"),
            &media,
            &hardware,
            &config,
            Path::new("/media/out"),
            "nope",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_task_ids_and_directories() {
        let media = test_media_info(1920, 1080);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);
        let plan = planner.create_plan(true, true, true, false).unwrap();

        assert_eq!(plan.video_tasks[0].id, "video_1080p");
        assert!(plan.video_tasks[0].output_dir.ends_with("video_1080p"));
        assert_eq!(plan.audio_tasks[0].id, "audio_1_eng");
        assert!(plan.audio_tasks[0].output_dir.ends_with("audio_eng"));
        assert_eq!(plan.subtitle_tasks[0].id, "subtitle_2_eng");
        assert!(plan.subtitle_tasks[0].output_dir.ends_with("subtitles"));
        assert_eq!(plan.sprite_task.as_ref().unwrap().id, "sprites");

        // All tasks reference the same source path.
        assert!(
            plan.all_tasks()
                .iter()
                .all(|t| t.input == Path::new("/media/source.mkv"))
        );
    }

    #[test]
    fn test_strategy_concurrency_split() {
        let media = test_media_info(1920, 1080);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);
        let plan = planner.create_plan(true, true, true, false).unwrap();
        let strategy = planner.create_execution_strategy(&plan, Some(4));

        assert!(strategy.video_concurrency >= 1);
        assert!(strategy.video_concurrency <= 4);
        assert_eq!(strategy.audio_concurrency, 1);
        assert_eq!(strategy.subtitle_concurrency, 1);
        // 3 video + 1 audio tasks with a sprite: runs separately.
        assert!(strategy.sprite_separate);
        assert_eq!(strategy.max_total_concurrent, 4);
    }

    #[test]
    fn test_strategy_clamps_to_one() {
        let strategy = ExecutionStrategy::new(0, 0, 0, false, 0);
        assert_eq!(strategy.video_concurrency, 1);
        assert_eq!(strategy.audio_concurrency, 1);
        assert_eq!(strategy.subtitle_concurrency, 1);
        assert_eq!(strategy.max_total_concurrent, 1);
    }

    #[test]
    fn test_resource_estimate() {
        let media = test_media_info(1920, 1080);
        let hardware = software_hardware_info();
        let config = TranscoderConfig::create_default();
        let planner = planner_fixture(&media, &hardware, &config);
        let plan = planner.create_plan(true, true, true, false).unwrap();
        let estimate = planner.estimate_resources(&plan);

        // Software encoding at half realtime dominates the other axes.
        assert_eq!(estimate.estimated_duration, 240.0);
        assert!(estimate.estimated_output_size > 0);
        assert_eq!(
            estimate.disk_space_needed,
            (estimate.estimated_output_size as f64 * 1.3) as u64
        );
        assert_eq!(estimate.cpu_cores_needed, 6);
        assert_eq!(estimate.gpu_memory_mb, 0);
        assert!(estimate.peak_memory_mb >= 300);
    }
}
