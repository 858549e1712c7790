use crate::config::TranscoderConfig;
use crate::error::{Error, Result};
use crate::process::{CommandBuilder, FfmpegProcess};
use crate::types::{AudioSpec, AudioStream, MediaInfo, Task};
use crate::util::bitrate_kbps;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Filename stem for one audio rendition, e.g. `audio_eng_128k`.
pub(crate) fn track_name(language: &str, bitrate: &str) -> String {
    format!("audio_{language}_{}k", bitrate_kbps(bitrate))
}

/// Stream copy is allowed when the source already matches the target:
/// same codec (AAC), same sample rate, same channel count.
pub(crate) fn can_stream_copy(
    spec: &AudioSpec,
    stream: &AudioStream,
    config: &TranscoderConfig,
) -> bool {
    if !config.audio.copy_if_possible {
        return false;
    }
    let target_rate = match config.audio.sample_rate.value() {
        0 => stream.sample_rate,
        rate => rate,
    };
    let target_channels = match config.audio.channels.value() {
        0 => stream.channels,
        channels => channels,
    };
    spec.codec.eq_ignore_ascii_case("aac")
        && stream.codec.eq_ignore_ascii_case("aac")
        && stream.sample_rate == target_rate
        && stream.channels == target_channels
}

fn audio_options(spec: &AudioSpec, stream: &AudioStream, config: &TranscoderConfig) -> Vec<String> {
    if can_stream_copy(spec, stream, config) {
        info!(
            "audio stream {} already compatible ({} {}Hz {}ch), using stream copy",
            stream.index, stream.codec, stream.sample_rate, stream.channels
        );
        return vec!["-c:a".into(), "copy".into()];
    }

    let target_rate = match config.audio.sample_rate.value() {
        0 => stream.sample_rate,
        rate => rate,
    };
    let target_channels = match config.audio.channels.value() {
        0 => stream.channels,
        channels => channels,
    };

    info!(
        "transcoding audio: {} -> {}, {}Hz -> {}Hz, {}ch -> {}ch",
        stream.codec, spec.codec, stream.sample_rate, target_rate, stream.channels, target_channels
    );

    vec![
        "-c:a".into(),
        spec.codec.clone(),
        "-b:a".into(),
        format!("{}k", bitrate_kbps(&spec.bitrate)),
        "-ar".into(),
        target_rate.to_string(),
        "-ac".into(),
        target_channels.to_string(),
    ]
}

pub(crate) fn build_command(
    task: &Task,
    spec: &AudioSpec,
    stream: &AudioStream,
    config: &TranscoderConfig,
) -> (Vec<String>, PathBuf) {
    let stem = track_name(&spec.language, &spec.bitrate);
    let playlist = task.output_dir.join(format!("{stem}.m3u8"));
    let segment_pattern = task.output_dir.join(format!("{stem}_%03d.ts"));

    let mut output_options = vec!["-map".to_string(), format!("0:{}", spec.stream_index)];
    output_options.extend(audio_options(spec, stream, config));
    output_options.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        config.audio.segment_duration.to_string(),
        "-hls_segment_filename".to_string(),
        segment_pattern.display().to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_flags".to_string(),
        "independent_segments".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
    ]);

    let command = CommandBuilder::new()
        .global("-y")
        .input(&task.input, &[])
        .output(&playlist, &output_options)
        .build();

    (command, playlist)
}

/// Extract one audio stream into its own HLS rendition playlist.
pub async fn extract(
    task: &Arc<Task>,
    spec: &AudioSpec,
    media_info: &MediaInfo,
    config: &TranscoderConfig,
) -> Result<PathBuf> {
    let stream = media_info
        .audio_streams
        .iter()
        .find(|s| s.index == spec.stream_index)
        .ok_or_else(|| {
            Error::Transcoding(format!("audio stream {} not found", spec.stream_index))
        })?;

    tokio::fs::create_dir_all(&task.output_dir).await?;

    info!(
        "extracting audio track {} ({}) at {}",
        stream.index, spec.language, spec.bitrate
    );

    let (command, playlist) = build_command(task, spec, stream, config);
    debug!("audio command: {}", command.join(" "));

    let progress_task = Arc::clone(task);
    FfmpegProcess::new(command)
        .with_progress(move |progress, speed| {
            progress_task.state.set_progress(progress);
            if let Some(speed) = speed {
                progress_task.state.set_speed(speed);
            }
        })
        .run()
        .await
        .map_err(|e| match e {
            Error::Ffmpeg { .. } | Error::Timeout { .. } => {
                Error::Transcoding(format!("{} failed: {e}", task.id))
            }
            other => other,
        })?;

    if !playlist.exists() {
        return Err(Error::Transcoding(format!(
            "audio extraction completed but output not found: {}",
            playlist.display()
        )));
    }

    info!("completed audio track {}", spec.language);
    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoOr;
    use crate::testutil::test_media_info;
    use crate::types::TaskKind;

    fn audio_task(codec: &str, bitrate: &str) -> (Task, AudioSpec) {
        let spec = AudioSpec {
            stream_index: 1,
            language: "eng".to_string(),
            codec: codec.to_string(),
            bitrate: bitrate.to_string(),
        };
        let task = Task::new(
            "audio_1_eng",
            PathBuf::from("/media/in.mkv"),
            PathBuf::from("/media/out/audio_eng"),
            TaskKind::Audio(spec.clone()),
        );
        (task, spec)
    }

    #[test]
    fn test_track_name() {
        assert_eq!(track_name("eng", "128k"), "audio_eng_128k");
        assert_eq!(track_name("hin", "192k"), "audio_hin_192k");
    }

    #[test]
    fn test_stream_copy_when_source_matches() {
        let media = test_media_info(1920, 1080);
        let config = TranscoderConfig::create_default();
        let (task, spec) = audio_task("aac", "128k");
        // Source is aac/48000/2ch and targets are auto: copy applies.
        assert!(can_stream_copy(&spec, &media.audio_streams[0], &config));

        let (command, playlist) = build_command(&task, &spec, &media.audio_streams[0], &config);
        assert!(command.windows(2).any(|w| w[0] == "-c:a" && w[1] == "copy"));
        assert!(!command.contains(&"-b:a".to_string()));
        assert!(playlist.ends_with("audio_eng/audio_eng_128k.m3u8"));
    }

    #[test]
    fn test_transcode_when_channels_differ() {
        let media = test_media_info(1920, 1080);
        let mut config = TranscoderConfig::create_default();
        config.audio.channels = AutoOr::Fixed(6);
        let (task, spec) = audio_task("aac", "192k");

        assert!(!can_stream_copy(&spec, &media.audio_streams[0], &config));
        let (command, _) = build_command(&task, &spec, &media.audio_streams[0], &config);
        assert!(command.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
        assert!(command.windows(2).any(|w| w[0] == "-b:a" && w[1] == "192k"));
        assert!(command.windows(2).any(|w| w[0] == "-ar" && w[1] == "48000"));
        assert!(command.windows(2).any(|w| w[0] == "-ac" && w[1] == "6"));
    }

    #[test]
    fn test_no_copy_for_non_aac_source() {
        let mut media = test_media_info(1920, 1080);
        media.audio_streams[0].codec = "ac3".to_string();
        let config = TranscoderConfig::create_default();
        let (_, spec) = audio_task("aac", "128k");
        assert!(!can_stream_copy(&spec, &media.audio_streams[0], &config));
    }

    #[test]
    fn test_copy_disabled_by_config() {
        let media = test_media_info(1920, 1080);
        let mut config = TranscoderConfig::create_default();
        config.audio.copy_if_possible = false;
        let (_, spec) = audio_task("aac", "128k");
        assert!(!can_stream_copy(&spec, &media.audio_streams[0], &config));
    }

    #[test]
    fn test_hls_tail_uses_audio_segment_duration() {
        let media = test_media_info(1920, 1080);
        let config = TranscoderConfig::create_default();
        let (task, spec) = audio_task("aac", "128k");
        let (command, _) = build_command(&task, &spec, &media.audio_streams[0], &config);
        assert!(command.windows(2).any(|w| w[0] == "-hls_time" && w[1] == "10"));
        assert!(command.windows(2).any(|w| w[0] == "-map" && w[1] == "0:1"));
        let pattern = command
            .iter()
            .position(|a| a == "-hls_segment_filename")
            .unwrap();
        assert!(command[pattern + 1].ends_with("audio_eng_128k_%03d.ts"));
    }
}
