use crate::error::{Error, Result};
use crate::process::FfmpegProcess;
use crate::types::{MediaInfo, SubtitleSpec, SubtitleStream, Task};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const EXTRACTION_TIMEOUT_SECS: f64 = 300.0;

fn codec_for(format: &str, input_codec: &str) -> String {
    let codec = match format.to_lowercase().as_str() {
        "webvtt" | "vtt" => "webvtt",
        "srt" => "srt",
        "ass" | "ssa" => "ass",
        _ => "webvtt",
    };
    if input_codec.eq_ignore_ascii_case(codec) {
        "copy".to_string()
    } else {
        codec.to_string()
    }
}

fn extension_for(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "srt" => "srt",
        "ass" | "ssa" => "ass",
        _ => "vtt",
    }
}

pub(crate) fn output_filename(spec: &SubtitleSpec, forced: bool) -> String {
    let forced_suffix = if forced { "_forced" } else { "" };
    format!(
        "subtitle_{}{forced_suffix}.{}",
        spec.language,
        extension_for(&spec.format)
    )
}

pub(crate) fn build_command(
    task: &Task,
    spec: &SubtitleSpec,
    stream: &SubtitleStream,
) -> (Vec<String>, PathBuf) {
    let output = task.output_dir.join(output_filename(spec, stream.forced));
    let command = vec![
        "ffmpeg".to_string(),
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        task.input.display().to_string(),
        "-map".to_string(),
        format!("0:{}", spec.stream_index),
        "-c:s".to_string(),
        codec_for(&spec.format, &stream.codec),
        output.display().to_string(),
    ];
    (command, output)
}

/// Extract one subtitle stream, converting to WebVTT by default.
pub async fn extract(
    task: &Arc<Task>,
    spec: &SubtitleSpec,
    media_info: &MediaInfo,
) -> Result<PathBuf> {
    let stream = media_info
        .subtitle_streams
        .iter()
        .find(|s| s.index == spec.stream_index)
        .ok_or_else(|| {
            Error::Transcoding(format!("subtitle stream {} not found", spec.stream_index))
        })?;

    tokio::fs::create_dir_all(&task.output_dir).await?;

    let (command, output) = build_command(task, spec, stream);
    info!(
        "extracting subtitle stream {} ({}) to {}",
        spec.stream_index,
        spec.language,
        output.display()
    );
    debug!("subtitle command: {}", command.join(" "));

    let progress_task = Arc::clone(task);
    FfmpegProcess::new(command)
        .with_timeout(EXTRACTION_TIMEOUT_SECS)
        .with_progress(move |progress, _| progress_task.state.set_progress(progress))
        .run()
        .await
        .map_err(|e| match e {
            Error::Ffmpeg { .. } | Error::Timeout { .. } => {
                Error::Transcoding(format!("{} failed: {e}", task.id))
            }
            other => other,
        })?;

    if !output.exists() {
        return Err(Error::Transcoding(
            "subtitle extraction completed but output file not created".to_string(),
        ));
    }

    info!("extracted subtitle {}", output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_media_info;
    use crate::types::TaskKind;

    fn subtitle_task(format: &str) -> (Task, SubtitleSpec) {
        let spec = SubtitleSpec {
            stream_index: 2,
            language: "eng".to_string(),
            format: format.to_string(),
        };
        let task = Task::new(
            "subtitle_2_eng",
            PathBuf::from("/media/in.mkv"),
            PathBuf::from("/media/out/subtitles"),
            TaskKind::Subtitle(spec.clone()),
        );
        (task, spec)
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(codec_for("webvtt", "subrip"), "webvtt");
        assert_eq!(codec_for("vtt", "subrip"), "webvtt");
        assert_eq!(codec_for("srt", "ass"), "srt");
        assert_eq!(codec_for("ass", "subrip"), "ass");
        assert_eq!(codec_for("unknown", "subrip"), "webvtt");
        // Source already in target codec is copied.
        assert_eq!(codec_for("webvtt", "webvtt"), "copy");
        assert_eq!(codec_for("srt", "srt"), "copy");
    }

    #[test]
    fn test_output_filename() {
        let (_, spec) = subtitle_task("webvtt");
        assert_eq!(output_filename(&spec, false), "subtitle_eng.vtt");
        assert_eq!(output_filename(&spec, true), "subtitle_eng_forced.vtt");

        let (_, spec) = subtitle_task("ass");
        assert_eq!(output_filename(&spec, false), "subtitle_eng.ass");
    }

    #[test]
    fn test_command_shape() {
        let media = test_media_info(1920, 1080);
        let (task, spec) = subtitle_task("webvtt");
        let (command, output) = build_command(&task, &spec, &media.subtitle_streams[0]);

        assert_eq!(command[0], "ffmpeg");
        assert_eq!(command[1], "-hide_banner");
        assert!(command.windows(2).any(|w| w[0] == "-map" && w[1] == "0:2"));
        assert!(command.windows(2).any(|w| w[0] == "-c:s" && w[1] == "webvtt"));
        assert!(output.ends_with("subtitles/subtitle_eng.vtt"));
    }
}
