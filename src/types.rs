use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::util::channel_layout_name;

// ---------------------------------------------------------------------------
// Media model (inspection result)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormatInfo {
    pub format_name: String,
    pub format_long_name: String,
    pub duration: f64,
    pub size: u64,
    pub bitrate: u64,
    pub encoder: Option<String>,
    pub creation_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStream {
    pub index: u32,
    pub codec: String,
    pub codec_long: String,
    pub profile: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate: u64,
    pub duration: f64,
    pub pix_fmt: String,
    pub color_space: Option<String>,
    pub color_range: Option<String>,
    pub title: Option<String>,
    pub frame_count: Option<u64>,
    pub encoder: Option<String>,
    pub is_default: bool,
}

impl VideoStream {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0 {
            self.width as f64 / self.height as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioStream {
    pub index: u32,
    pub codec: String,
    pub codec_long: String,
    pub profile: String,
    pub language: String,
    pub channels: u32,
    pub channel_layout: Option<String>,
    pub sample_rate: u32,
    pub bitrate: u64,
    pub duration: f64,
    pub title: Option<String>,
    pub frame_count: Option<u64>,
    pub encoder: Option<String>,
    pub is_default: bool,
}

impl AudioStream {
    /// Channel layout from the container, or a name derived from the count.
    pub fn channel_layout_name(&self) -> String {
        self.channel_layout
            .clone()
            .unwrap_or_else(|| channel_layout_name(self.channels))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleStream {
    pub index: u32,
    pub codec: String,
    pub language: String,
    pub title: Option<String>,
    pub forced: bool,
    pub frame_count: Option<u64>,
    pub encoder: Option<String>,
    pub is_default: bool,
}

impl SubtitleStream {
    pub fn display_name(&self) -> String {
        let mut parts = vec![self.language.to_uppercase()];
        if let Some(title) = &self.title {
            parts.push(title.clone());
        }
        if self.forced {
            parts.push("(Forced)".to_string());
        }
        parts.join(" - ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
    pub duration: f64,
    pub size: u64,
    pub bitrate: u64,
}

impl MediaInfo {
    pub fn primary_video(&self) -> Option<&VideoStream> {
        self.video_streams.first()
    }

    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    pub fn has_subtitles(&self) -> bool {
        !self.subtitle_streams.is_empty()
    }

    pub fn audio_by_language(&self, language: &str) -> Option<&AudioStream> {
        self.audio_streams
            .iter()
            .find(|s| s.language.eq_ignore_ascii_case(language))
    }

    pub fn subtitle_by_language(&self, language: &str) -> Option<&SubtitleStream> {
        self.subtitle_streams
            .iter()
            .find(|s| s.language.eq_ignore_ascii_case(language))
    }
}

// ---------------------------------------------------------------------------
// Task model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Mutable task state. The worker running the task is the only writer;
/// display code may read `progress`/`speed` concurrently, so those are
/// plain atomics and stale reads are fine.
#[derive(Debug)]
pub struct TaskState {
    status: Mutex<TaskStatus>,
    progress_bits: AtomicU64,
    speed_bits: AtomicU64,
    error: Mutex<Option<String>>,
    started_at: Mutex<Option<Instant>>,
    completed_at: Mutex<Option<Instant>>,
    retry_count: AtomicU32,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: Mutex::new(TaskStatus::Pending),
            progress_bits: AtomicU64::new(0f64.to_bits()),
            speed_bits: AtomicU64::new(f64::NAN.to_bits()),
            error: Mutex::new(None),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
            retry_count: AtomicU32::new(0),
        }
    }
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap()
    }

    /// Transition the status. Terminal states are final: a transition out of
    /// one is ignored and reported as false.
    pub fn set_status(&self, next: TaskStatus) -> bool {
        let mut status = self.status.lock().unwrap();
        if status.is_terminal() {
            return false;
        }
        *status = next;
        true
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    pub fn set_progress(&self, progress: f64) {
        let clamped = progress.clamp(0.0, 1.0);
        self.progress_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn speed(&self) -> Option<f64> {
        let value = f64::from_bits(self.speed_bits.load(Ordering::Relaxed));
        if value.is_nan() { None } else { Some(value) }
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.lock().unwrap() = Some(message.into());
    }

    pub fn mark_started(&self) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
    }

    pub fn mark_completed(&self) {
        *self.completed_at.lock().unwrap() = Some(Instant::now());
    }

    /// Wall-clock runtime, available once the task reached a terminal state.
    pub fn duration(&self) -> Option<f64> {
        let started = (*self.started_at.lock().unwrap())?;
        let completed = (*self.completed_at.lock().unwrap())?;
        Some(completed.duration_since(started).as_secs_f64())
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn bump_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct VideoSpec {
    pub quality: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
    pub crf: Option<u32>,
    pub encoder: String,
    pub stream_index: u32,
}

#[derive(Debug, Clone)]
pub struct AudioSpec {
    pub stream_index: u32,
    pub language: String,
    pub codec: String,
    pub bitrate: String,
}

#[derive(Debug, Clone)]
pub struct SubtitleSpec {
    pub stream_index: u32,
    pub language: String,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct SpriteSpec {
    pub interval: u32,
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
}

impl SpriteSpec {
    pub fn thumbnails_per_sheet(&self) -> u32 {
        self.columns * self.rows
    }
}

/// Per-type task payload. Closed set, dispatched by tag.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Video(VideoSpec),
    Audio(AudioSpec),
    Subtitle(SubtitleSpec),
    Sprite(SpriteSpec),
}

impl TaskKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskKind::Video(_) => "video",
            TaskKind::Audio(_) => "audio",
            TaskKind::Subtitle(_) => "subtitle",
            TaskKind::Sprite(_) => "sprite",
        }
    }
}

/// One unit of work: a typed payload plus shared mutable state.
#[derive(Debug)]
pub struct Task {
    pub id: String,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub kind: TaskKind,
    pub state: TaskState,
}

impl Task {
    pub fn new(id: impl Into<String>, input: PathBuf, output_dir: PathBuf, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            input,
            output_dir,
            kind,
            state: TaskState::default(),
        }
    }
}

/// The full set of tasks for one run. All tasks reference the same source.
#[derive(Debug, Default)]
pub struct TaskPlan {
    pub video_tasks: Vec<std::sync::Arc<Task>>,
    pub audio_tasks: Vec<std::sync::Arc<Task>>,
    pub subtitle_tasks: Vec<std::sync::Arc<Task>>,
    pub sprite_task: Option<std::sync::Arc<Task>>,
    pub estimated_duration: f64,
    pub estimated_size: u64,
}

impl TaskPlan {
    pub fn total_tasks(&self) -> usize {
        self.video_tasks.len()
            + self.audio_tasks.len()
            + self.subtitle_tasks.len()
            + usize::from(self.sprite_task.is_some())
    }

    pub fn all_tasks(&self) -> Vec<std::sync::Arc<Task>> {
        let mut tasks: Vec<_> = self
            .video_tasks
            .iter()
            .chain(&self.audio_tasks)
            .chain(&self.subtitle_tasks)
            .cloned()
            .collect();
        if let Some(sprite) = &self.sprite_task {
            tasks.push(sprite.clone());
        }
        tasks
    }
}

// ---------------------------------------------------------------------------
// Execution results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task: std::sync::Arc<Task>,
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    pub duration: f64,
}

#[derive(Debug)]
pub struct ExecutionSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub total_duration: f64,
    pub results: Vec<ExecutionResult>,
}

impl ExecutionSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.completed_tasks as f64 / self.total_tasks as f64 * 100.0
    }

    pub fn has_failures(&self) -> bool {
        self.failed_tasks > 0
    }
}

// ---------------------------------------------------------------------------
// Validation result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub master_playlist_valid: bool,
    pub all_segments_present: bool,
    pub audio_tracks_valid: bool,
    pub subtitle_files_valid: bool,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            master_playlist_valid: true,
            all_segments_present: true,
            audio_tracks_valid: true,
            subtitle_files_valid: true,
        }
    }
}

impl ValidationResult {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal_is_final() {
        let state = TaskState::default();
        assert!(state.set_status(TaskStatus::Running));
        assert!(state.set_status(TaskStatus::Completed));
        assert!(!state.set_status(TaskStatus::Running));
        assert_eq!(state.status(), TaskStatus::Completed);
    }

    #[test]
    fn test_task_state_progress_clamped() {
        let state = TaskState::default();
        state.set_progress(1.7);
        assert_eq!(state.progress(), 1.0);
        state.set_progress(-0.2);
        assert_eq!(state.progress(), 0.0);
        assert!(state.speed().is_none());
        state.set_speed(62.5);
        assert_eq!(state.speed(), Some(62.5));
    }

    #[test]
    fn test_summary_arithmetic() {
        let summary = ExecutionSummary {
            total_tasks: 4,
            completed_tasks: 3,
            failed_tasks: 1,
            cancelled_tasks: 0,
            total_duration: 10.0,
            results: Vec::new(),
        };
        assert_eq!(summary.success_rate(), 75.0);
        assert!(summary.has_failures());

        let empty = ExecutionSummary {
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            total_duration: 0.0,
            results: Vec::new(),
        };
        assert_eq!(empty.success_rate(), 0.0);
    }

    #[test]
    fn test_channel_layout_fallback() {
        let stream = AudioStream {
            index: 1,
            codec: "aac".to_string(),
            codec_long: String::new(),
            profile: String::new(),
            language: "eng".to_string(),
            channels: 6,
            channel_layout: None,
            sample_rate: 48000,
            bitrate: 0,
            duration: 0.0,
            title: None,
            frame_count: None,
            encoder: None,
            is_default: true,
        };
        assert_eq!(stream.channel_layout_name(), "5.1");
    }

    #[test]
    fn test_validation_result() {
        let mut result = ValidationResult::default();
        assert!(result.is_valid());
        result.add_warning("minor");
        assert!(result.is_valid());
        result.add_error("broken");
        assert!(!result.is_valid());
    }
}
