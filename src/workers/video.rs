use crate::config::TranscoderConfig;
use crate::error::{Error, Result};
use crate::hardware::{HardwareInfo, HardwareType};
use crate::process::{CommandBuilder, FfmpegProcess};
use crate::types::{MediaInfo, Task, VideoSpec, VideoStream};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Keyframe cadence in seconds; GOP size follows the stream fps.
const KEYFRAME_INTERVAL_SECS: f64 = 2.0;

/// Encoder family inferred from the encoder name, so a task whose encoder
/// was swapped (hardware fallback) gets matching argv without re-detection.
fn family_of(encoder: &str) -> HardwareType {
    if encoder.contains("nvenc") {
        HardwareType::Nvidia
    } else if encoder.contains("qsv") {
        HardwareType::Intel
    } else if encoder.contains("amf") {
        HardwareType::Amd
    } else if encoder.contains("videotoolbox") {
        HardwareType::Apple
    } else if encoder.contains("vaapi") {
        HardwareType::Vaapi
    } else {
        HardwareType::Software
    }
}

fn gop_size(fps: f64) -> u32 {
    let gop = (fps * KEYFRAME_INTERVAL_SECS).round() as u32;
    if gop == 0 { 48 } else { gop }
}

fn decoder_options(family: HardwareType) -> Vec<&'static str> {
    match family {
        HardwareType::Nvidia => vec!["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"],
        HardwareType::Intel => vec!["-hwaccel", "qsv", "-hwaccel_output_format", "qsv"],
        HardwareType::Amd => vec!["-hwaccel", "d3d11va"],
        HardwareType::Apple => vec!["-hwaccel", "videotoolbox"],
        HardwareType::Vaapi => vec![
            "-init_hw_device",
            "vaapi=va:/dev/dri/renderD128",
            "-hwaccel",
            "vaapi",
            "-hwaccel_output_format",
            "vaapi",
            "-hwaccel_device",
            "va",
        ],
        HardwareType::Software => vec![],
    }
}

fn scale_filter(family: HardwareType, width: u32, height: u32) -> String {
    match family {
        HardwareType::Intel => format!("scale_qsv={width}:{height}"),
        HardwareType::Vaapi => format!("scale_vaapi=w={width}:h={height}:format=nv12"),
        _ => format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        ),
    }
}

fn encoder_options(spec: &VideoSpec, stream: &VideoStream, preset: &str) -> Vec<String> {
    let family = family_of(&spec.encoder);
    let gop = gop_size(stream.fps).to_string();
    let mut args: Vec<String> = vec!["-c:v".into(), spec.encoder.clone()];

    match family {
        HardwareType::Nvidia => {
            args.extend(["-preset", "p4", "-rc:v", "vbr"].map(String::from));
        }
        HardwareType::Intel => {
            args.extend(["-preset".to_string(), preset.to_string()]);
        }
        HardwareType::Amd => {
            args.extend(["-quality", "balanced", "-rc", "vbr_peak"].map(String::from));
        }
        // VideoToolbox and VAAPI use implicit rate control.
        HardwareType::Apple | HardwareType::Vaapi => {}
        HardwareType::Software => {
            args.extend(["-preset".to_string(), preset.to_string()]);
            if let Some(crf) = spec.crf {
                args.extend(["-crf".to_string(), crf.to_string()]);
            }
        }
    }

    args.extend([
        "-b:v".to_string(),
        format!("{}k", spec.bitrate_kbps),
        "-maxrate:v".to_string(),
        format!("{}k", spec.maxrate_kbps),
        "-bufsize:v".to_string(),
        format!("{}k", spec.bufsize_kbps),
        "-g".to_string(),
        gop.clone(),
        "-keyint_min".to_string(),
        gop,
        "-sc_threshold".to_string(),
        "0".to_string(),
        "-vf".to_string(),
        scale_filter(family, spec.width, spec.height),
    ]);

    args
}

fn hls_options(segment_duration: u32, segment_pattern: &PathBuf) -> Vec<String> {
    vec![
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        segment_duration.to_string(),
        "-hls_segment_filename".into(),
        segment_pattern.display().to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-hls_segment_type".into(),
        "mpegts".into(),
    ]
}

pub(crate) fn build_command(
    task: &Task,
    spec: &VideoSpec,
    stream: &VideoStream,
    config: &TranscoderConfig,
) -> (Vec<String>, PathBuf) {
    let playlist = task.output_dir.join(format!("{}.m3u8", spec.quality));
    let segment_pattern = task.output_dir.join(format!("{}_%03d.ts", spec.quality));
    let family = family_of(&spec.encoder);

    let mut output_options = encoder_options(spec, stream, &config.performance.preset);
    // Audio and subtitles are produced by their own workers.
    output_options.push("-an".into());
    output_options.push("-sn".into());
    output_options.extend(hls_options(config.hls.segment_duration, &segment_pattern));

    let command = CommandBuilder::new()
        .global("-y")
        .input(&task.input, &decoder_options(family))
        .output(&playlist, &output_options)
        .build();

    (command, playlist)
}

/// Transcode one quality variant into an HLS variant playlist.
pub async fn transcode(
    task: &Arc<Task>,
    spec: &VideoSpec,
    media_info: &MediaInfo,
    _hardware_info: &HardwareInfo,
    config: &TranscoderConfig,
) -> Result<PathBuf> {
    let stream = media_info
        .video_streams
        .iter()
        .find(|s| s.index == spec.stream_index)
        .ok_or_else(|| {
            Error::Transcoding(format!("video stream {} not found", spec.stream_index))
        })?;

    tokio::fs::create_dir_all(&task.output_dir).await?;

    info!(
        "transcoding {} to {} ({}x{} @ {}k, {})",
        task.input.display(),
        spec.quality,
        spec.width,
        spec.height,
        spec.bitrate_kbps,
        spec.encoder
    );

    let (command, playlist) = build_command(task, spec, stream, config);
    debug!("video command: {}", command.join(" "));

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
            "transcoding completed but output not found: {}",
            playlist.display()
        )));
    }

    info!("completed variant {}", spec.quality);
    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_media_info;
    use crate::types::TaskKind;

    fn video_task(encoder: &str, crf: Option<u32>) -> (Task, VideoSpec) {
        let spec = VideoSpec {
            quality: "720p".to_string(),
            width: 1280,
            height: 720,
            bitrate_kbps: 3000,
            maxrate_kbps: 4500,
            bufsize_kbps: 6000,
            crf,
            encoder: encoder.to_string(),
            stream_index: 0,
        };
        let task = Task::new(
            "video_720p",
            PathBuf::from("/media/in.mkv"),
            PathBuf::from("/media/out/video_720p"),
            TaskKind::Video(spec.clone()),
        );
        (task, spec)
    }

    #[test]
    fn test_family_inference() {
        assert_eq!(family_of("h264_nvenc"), HardwareType::Nvidia);
        assert_eq!(family_of("h264_qsv"), HardwareType::Intel);
        assert_eq!(family_of("h264_amf"), HardwareType::Amd);
        assert_eq!(family_of("h264_videotoolbox"), HardwareType::Apple);
        assert_eq!(family_of("h264_vaapi"), HardwareType::Vaapi);
        assert_eq!(family_of("libx264"), HardwareType::Software);
    }

    #[test]
    fn test_gop_size() {
        assert_eq!(gop_size(30.0), 60);
        assert_eq!(gop_size(23.976), 48);
        assert_eq!(gop_size(0.0), 48);
    }

    #[test]
    fn test_software_command_shape() {
        let media = test_media_info(1920, 1080);
        let config = TranscoderConfig::create_default();
        let (task, spec) = video_task("libx264", Some(25));
        let (command, playlist) = build_command(&task, &spec, &media.video_streams[0], &config);

        assert_eq!(command[0], "ffmpeg");
        assert!(command.contains(&"-hide_banner".to_string()));
        assert!(command.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libx264"));
        assert!(command.windows(2).any(|w| w[0] == "-preset" && w[1] == "medium"));
        assert!(command.windows(2).any(|w| w[0] == "-crf" && w[1] == "25"));
        assert!(command.windows(2).any(|w| w[0] == "-b:v" && w[1] == "3000k"));
        assert!(command.windows(2).any(|w| w[0] == "-maxrate:v" && w[1] == "4500k"));
        assert!(command.windows(2).any(|w| w[0] == "-bufsize:v" && w[1] == "6000k"));
        assert!(command.windows(2).any(|w| w[0] == "-g" && w[1] == "60"));
        assert!(command.contains(&"-an".to_string()));
        assert!(command.contains(&"-sn".to_string()));
        assert!(command.windows(2).any(|w| w[0] == "-hls_playlist_type" && w[1] == "vod"));
        assert!(command.windows(2).any(|w| w[0] == "-hls_segment_type" && w[1] == "mpegts"));
        // No hardware decoder for software encoding.
        assert!(!command.contains(&"-hwaccel".to_string()));
        let filter = &command[command.iter().position(|a| a == "-vf").unwrap() + 1];
        assert!(filter.contains("scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1280:720:(ow-iw)/2:(oh-ih)/2"));
        assert!(playlist.ends_with("video_720p/720p.m3u8"));
    }

    #[test]
    fn test_nvenc_command_shape() {
        let media = test_media_info(1920, 1080);
        let config = TranscoderConfig::create_default();
        let (task, spec) = video_task("h264_nvenc", None);
        let (command, _) = build_command(&task, &spec, &media.video_streams[0], &config);

        assert!(command.windows(2).any(|w| w[0] == "-hwaccel" && w[1] == "cuda"));
        assert!(command.windows(2).any(|w| w[0] == "-preset" && w[1] == "p4"));
        assert!(command.windows(2).any(|w| w[0] == "-rc:v" && w[1] == "vbr"));
        // Hardware decoder options come before the input.
        let hwaccel = command.iter().position(|a| a == "-hwaccel").unwrap();
        let input = command.iter().position(|a| a == "-i").unwrap();
        assert!(hwaccel < input);
    }

    #[test]
    fn test_qsv_and_vaapi_scale_filters() {
        let media = test_media_info(1920, 1080);
        let config = TranscoderConfig::create_default();

        let (task, spec) = video_task("h264_qsv", None);
        let (command, _) = build_command(&task, &spec, &media.video_streams[0], &config);
        assert!(command.contains(&"scale_qsv=1280:720".to_string()));

        let (task, spec) = video_task("h264_vaapi", None);
        let (command, _) = build_command(&task, &spec, &media.video_streams[0], &config);
        assert!(command.contains(&"scale_vaapi=w=1280:h=720:format=nv12".to_string()));
        assert!(command.contains(&"vaapi=va:/dev/dri/renderD128".to_string()));
    }

    #[test]
    fn test_amf_command_shape() {
        let media = test_media_info(1920, 1080);
        let config = TranscoderConfig::create_default();
        let (task, spec) = video_task("h264_amf", None);
        let (command, _) = build_command(&task, &spec, &media.video_streams[0], &config);
        assert!(command.windows(2).any(|w| w[0] == "-hwaccel" && w[1] == "d3d11va"));
        assert!(command.windows(2).any(|w| w[0] == "-rc" && w[1] == "vbr_peak"));
        assert!(command.windows(2).any(|w| w[0] == "-quality" && w[1] == "balanced"));
    }
}
