pub mod audio;
pub mod sprite;
pub mod subtitle;
pub mod video;

use crate::config::TranscoderConfig;
use crate::error::Result;
use crate::hardware::HardwareInfo;
use crate::types::{MediaInfo, Task, TaskKind};
use std::path::PathBuf;
use std::sync::Arc;

/// Dispatch one task to its worker. Returns the primary output path
/// (variant playlist, audio playlist, subtitle file, or sprite VTT).
pub async fn run_task(
    task: &Arc<Task>,
    media_info: &MediaInfo,
    hardware_info: &HardwareInfo,
    config: &TranscoderConfig,
) -> Result<PathBuf> {
    match &task.kind {
        TaskKind::Video(spec) => video::transcode(task, spec, media_info, hardware_info, config).await,
        TaskKind::Audio(spec) => audio::extract(task, spec, media_info, config).await,
        TaskKind::Subtitle(spec) => subtitle::extract(task, spec, media_info).await,
        TaskKind::Sprite(spec) => sprite::generate(task, spec, media_info).await,
    }
}
