use crate::error::{Error, Result};
use crate::process::{CommandBuilder, FfmpegProcess};
use crate::types::{MediaInfo, SpriteSpec, Task};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const EXTRACTION_TIMEOUT_SECS: f64 = 600.0;
const COMPOSITION_TIMEOUT_SECS: f64 = 300.0;

pub(crate) fn thumbnail_count(duration: f64, interval: u32) -> u32 {
    if interval == 0 {
        return 1;
    }
    ((duration / interval as f64).ceil() as u32).max(1)
}

pub(crate) fn sheet_count(thumbnails: u32, spec: &SpriteSpec) -> u32 {
    thumbnails.div_ceil(spec.thumbnails_per_sheet().max(1))
}

/// A single full sheet is `sprite.png`; overflow produces `sprite_<i>.png`.
pub(crate) fn sheet_filename(sheets: u32, index: u32) -> String {
    if sheets == 1 {
        "sprite.png".to_string()
    } else {
        format!("sprite_{index}.png")
    }
}

fn thumbnail_command(task: &Task, spec: &SpriteSpec, temp_dir: &Path, count: u32) -> Vec<String> {
    let pattern = temp_dir.join("thumb_%04d.jpg");
    CommandBuilder::new()
        .global("-y")
        .input(&task.input, &[])
        .output(
            &pattern,
            &[
                "-vf".to_string(),
                format!(
                    "fps=1/{},scale={}:{}",
                    spec.interval, spec.width, spec.height
                ),
                "-frames:v".to_string(),
                count.to_string(),
                "-q:v".to_string(),
                "2".to_string(),
            ],
        )
        .build()
}

fn sheet_command(
    spec: &SpriteSpec,
    temp_dir: &Path,
    sheet_path: &Path,
    sheet_thumbs: u32,
    start_number: u32,
) -> Vec<String> {
    // The final sheet may be partial: its grid shrinks to fit what is left
    // rather than padding up to the configured rows.
    let columns = spec.columns.min(sheet_thumbs).max(1);
    let rows = sheet_thumbs.div_ceil(columns);
    let pattern = temp_dir.join("thumb_%04d.jpg");

    vec![
        "ffmpeg".to_string(),
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-start_number".to_string(),
        start_number.to_string(),
        "-i".to_string(),
        pattern.display().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-filter_complex".to_string(),
        format!("tile={columns}x{rows}"),
        "-c:v".to_string(),
        "png".to_string(),
        "-f".to_string(),
        "image2".to_string(),
        sheet_path.display().to_string(),
    ]
}

fn format_vtt_timestamp(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = seconds % 60.0;
    format!("{hours:02}:{minutes:02}:{secs:06.3}")
}

/// WebVTT cue index mapping each time range to a tile in a sheet.
pub(crate) fn build_vtt(
    spec: &SpriteSpec,
    sheet_names: &[String],
    thumbnails: u32,
    duration: f64,
) -> String {
    let tiles_per_sheet = spec.thumbnails_per_sheet().max(1);
    let mut lines: Vec<String> = vec!["WEBVTT".to_string(), String::new()];

    for i in 0..thumbnails {
        let start = i as f64 * spec.interval as f64;
        let end = ((i + 1) as f64 * spec.interval as f64).min(duration);

        let sheet_idx = (i / tiles_per_sheet) as usize;
        let tile = i % tiles_per_sheet;
        let col = tile % spec.columns;
        let row = tile / spec.columns;
        let x = col * spec.width;
        let y = row * spec.height;

        lines.push(format!(
            "{} --> {}",
            format_vtt_timestamp(start),
            format_vtt_timestamp(end)
        ));
        lines.push(format!(
            "{}#xywh={x},{y},{},{}",
            sheet_names[sheet_idx], spec.width, spec.height
        ));
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Generate the thumbnail sprite sheets and their WebVTT cue index.
///
/// Three phases: extract thumbnails (60% of progress), compose tiles into
/// sheets (30%), write the VTT (10%). The temporary thumbnail directory is
/// removed whether or not generation succeeds.
pub async fn generate(
    task: &Arc<Task>,
    spec: &SpriteSpec,
    media_info: &MediaInfo,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&task.output_dir).await?;
    let temp_dir = task.output_dir.join("temp_thumbnails");
    tokio::fs::create_dir_all(&temp_dir).await?;

    let result = run_phases(task, spec, media_info, &temp_dir).await;

    if let Err(e) = tokio::fs::remove_dir_all(&temp_dir).await {
        warn!("failed to clean up {}: {e}", temp_dir.display());
    }

    result
}

async fn run_phases(
    task: &Arc<Task>,
    spec: &SpriteSpec,
    media_info: &MediaInfo,
    temp_dir: &Path,
) -> Result<PathBuf> {
    let duration = media_info.duration;
    let thumbnails = thumbnail_count(duration, spec.interval);
    let sheets = sheet_count(thumbnails, spec);

    info!(
        "generating {thumbnails} thumbnails ({}x{}) at {}s intervals across {sheets} sheet(s)",
        spec.width, spec.height, spec.interval
    );

    // Phase 1: thumbnail extraction.
    let command = thumbnail_command(task, spec, temp_dir, thumbnails);
    debug!("thumbnail command: {}", command.join(" "));
    let progress_task = Arc::clone(task);
    FfmpegProcess::new(command)
        .with_timeout(EXTRACTION_TIMEOUT_SECS)
        .with_progress(move |progress, _| progress_task.state.set_progress(progress * 0.6))
        .run()
        .await
        .map_err(|e| Error::Transcoding(format!("thumbnail extraction failed: {e}")))?;

    let mut extracted = 0usize;
    let mut entries = tokio::fs::read_dir(temp_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with("thumb_") {
            extracted += 1;
        }
    }
    if extracted == 0 {
        return Err(Error::Transcoding("no thumbnails were generated".to_string()));
    }
    debug!("extracted {extracted} thumbnails");

    // Phase 2: tile composition, one sheet at a time.
    let tiles_per_sheet = spec.thumbnails_per_sheet();
    let mut sheet_names: Vec<String> = Vec::with_capacity(sheets as usize);
    for sheet_idx in 0..sheets {
        let start = sheet_idx * tiles_per_sheet;
        let end = (start + tiles_per_sheet).min(thumbnails);
        let filename = sheet_filename(sheets, sheet_idx);
        let sheet_path = task.output_dir.join(&filename);

        let command = sheet_command(spec, temp_dir, &sheet_path, end - start, start + 1);
        debug!("sheet command: {}", command.join(" "));
        FfmpegProcess::new(command)
            .with_timeout(COMPOSITION_TIMEOUT_SECS)
            .run()
            .await
            .map_err(|e| {
                Error::Transcoding(format!("sprite sheet {sheet_idx} creation failed: {e}"))
            })?;

        if !sheet_path.exists() {
            return Err(Error::Transcoding(format!(
                "sprite sheet {sheet_idx} was not created"
            )));
        }
        sheet_names.push(filename);
        task.state
            .set_progress(0.6 + 0.3 * (sheet_idx + 1) as f64 / sheets as f64);
    }

    // Phase 3: WebVTT cue index.
    let vtt_path = task.output_dir.join("sprite.vtt");
    let vtt = build_vtt(spec, &sheet_names, thumbnails, duration);
    tokio::fs::write(&vtt_path, vtt).await?;
    task.state.set_progress(1.0);

    info!(
        "generated {sheets} sprite sheet(s) and {} cues",
        thumbnails
    );
    Ok(vtt_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite_spec() -> SpriteSpec {
        SpriteSpec {
            interval: 10,
            width: 160,
            height: 90,
            columns: 10,
            rows: 10,
        }
    }

    #[test]
    fn test_thumbnail_count() {
        assert_eq!(thumbnail_count(2000.0, 10), 200);
        assert_eq!(thumbnail_count(95.0, 10), 10);
        assert_eq!(thumbnail_count(3.0, 10), 1);
        assert_eq!(thumbnail_count(0.0, 10), 1);
    }

    #[test]
    fn test_sheet_count() {
        let spec = sprite_spec();
        assert_eq!(sheet_count(100, &spec), 1);
        assert_eq!(sheet_count(101, &spec), 2);
        assert_eq!(sheet_count(200, &spec), 2);
        assert_eq!(sheet_count(1, &spec), 1);
    }

    #[test]
    fn test_sheet_filenames() {
        assert_eq!(sheet_filename(1, 0), "sprite.png");
        assert_eq!(sheet_filename(2, 0), "sprite_0.png");
        assert_eq!(sheet_filename(2, 1), "sprite_1.png");
    }

    #[test]
    fn test_format_vtt_timestamp() {
        assert_eq!(format_vtt_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_vtt_timestamp(75.5), "00:01:15.500");
        assert_eq!(format_vtt_timestamp(3725.25), "01:02:05.250");
    }

    #[test]
    fn test_vtt_overflow_across_sheets() {
        // 2000s at 10s intervals with a 10x10 grid: 200 cues over 2 sheets.
        let spec = sprite_spec();
        let thumbnails = thumbnail_count(2000.0, spec.interval);
        assert_eq!(thumbnails, 200);
        let sheets = sheet_count(thumbnails, &spec);
        assert_eq!(sheets, 2);

        let names: Vec<String> = (0..sheets).map(|i| sheet_filename(sheets, i)).collect();
        let vtt = build_vtt(&spec, &names, thumbnails, 2000.0);

        assert!(vtt.starts_with("WEBVTT"));
        assert_eq!(vtt.matches("-->").count(), 200);
        assert_eq!(vtt.matches("sprite_0.png").count(), 100);
        assert_eq!(vtt.matches("sprite_1.png").count(), 100);

        // Cue 0 is the first tile of sheet 0.
        assert!(vtt.contains("00:00:00.000 --> 00:00:10.000\nsprite_0.png#xywh=0,0,160,90"));
        // Cue 100 wraps to the first tile of sheet 1.
        assert!(vtt.contains("00:16:40.000 --> 00:16:50.000\nsprite_1.png#xywh=0,0,160,90"));
    }

    #[test]
    fn test_vtt_tile_positions() {
        let spec = sprite_spec();
        let names = vec!["sprite.png".to_string()];
        let vtt = build_vtt(&spec, &names, 12, 120.0);

        // Thumbnail 11 sits at column 1, row 1.
        assert!(vtt.contains("sprite.png#xywh=160,90,160,90"));
        // The final cue is clamped to the media duration.
        assert!(vtt.contains("00:01:50.000 --> 00:02:00.000"));
    }

    #[test]
    fn test_sheet_command_partial_final_sheet() {
        let spec = sprite_spec();
        // 23 thumbnails left on the final sheet: 10 columns, 3 rows.
        let command = sheet_command(
            &spec,
            Path::new("/tmp/thumbs"),
            Path::new("/out/sprite_1.png"),
            23,
            101,
        );
        assert!(command.contains(&"tile=10x3".to_string()));
        assert!(command.windows(2).any(|w| w[0] == "-start_number" && w[1] == "101"));
        assert!(command.windows(2).any(|w| w[0] == "-frames:v" && w[1] == "1"));
    }

    #[test]
    fn test_thumbnail_command_shape() {
        let spec = sprite_spec();
        let task = Task::new(
            "sprites",
            PathBuf::from("/media/in.mkv"),
            PathBuf::from("/media/out/sprites"),
            crate::types::TaskKind::Sprite(spec.clone()),
        );
        let command = thumbnail_command(&task, &spec, Path::new("/media/out/sprites/temp_thumbnails"), 12);
        assert!(command.contains(&"fps=1/10,scale=160:90".to_string()));
        assert!(command.windows(2).any(|w| w[0] == "-frames:v" && w[1] == "12"));
        assert!(command.last().unwrap().ends_with("thumb_%04d.jpg"));
    }
}
