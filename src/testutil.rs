// Shared fixtures for unit tests.

use crate::hardware::{EncoderInfo, HardwareInfo, HardwareType};
use crate::types::{AudioStream, FormatInfo, MediaInfo, SubtitleStream, VideoStream};

pub(crate) fn test_media_info(width: u32, height: u32) -> MediaInfo {
    MediaInfo {
        format: FormatInfo {
            format_name: "matroska,webm".to_string(),
            duration: 120.0,
            size: 1_000_000_000,
            bitrate: 8_000_000,
            ..Default::default()
        },
        video_streams: vec![VideoStream {
            index: 0,
            codec: "h264".to_string(),
            codec_long: String::new(),
            profile: "High".to_string(),
            width,
            height,
            fps: 30.0,
            bitrate: 8_000_000,
            duration: 120.0,
            pix_fmt: "yuv420p".to_string(),
            color_space: None,
            color_range: None,
            title: None,
            frame_count: Some(3600),
            encoder: None,
            is_default: true,
        }],
        audio_streams: vec![AudioStream {
            index: 1,
            codec: "aac".to_string(),
            codec_long: String::new(),
            profile: "LC".to_string(),
            language: "eng".to_string(),
            channels: 2,
            channel_layout: Some("stereo".to_string()),
            sample_rate: 48000,
            bitrate: 128_000,
            duration: 120.0,
            title: None,
            frame_count: None,
            encoder: None,
            is_default: true,
        }],
        subtitle_streams: vec![SubtitleStream {
            index: 2,
            codec: "subrip".to_string(),
            language: "eng".to_string(),
            title: None,
            forced: false,
            frame_count: None,
            encoder: None,
            is_default: true,
        }],
        duration: 120.0,
        size: 1_000_000_000,
        bitrate: 8_000_000,
    }
}

pub(crate) fn software_hardware_info() -> HardwareInfo {
    let encoder = EncoderInfo {
        name: "libx264".to_string(),
        hardware_type: HardwareType::Software,
        display_name: "Software H.264 (x264)".to_string(),
        available: true,
        tested: false,
        error: None,
    };
    HardwareInfo {
        detected_type: HardwareType::Software,
        encoders: vec![encoder.clone()],
        selected_encoder: Some(encoder),
        platform: "linux".to_string(),
    }
}

pub(crate) fn nvidia_hardware_info() -> HardwareInfo {
    let nvenc = EncoderInfo {
        name: "h264_nvenc".to_string(),
        hardware_type: HardwareType::Nvidia,
        display_name: "NVIDIA NVENC H.264".to_string(),
        available: true,
        tested: true,
        error: None,
    };
    let x264 = EncoderInfo {
        name: "libx264".to_string(),
        hardware_type: HardwareType::Software,
        display_name: "Software H.264 (x264)".to_string(),
        available: true,
        tested: false,
        error: None,
    };
    HardwareInfo {
        detected_type: HardwareType::Nvidia,
        encoders: vec![nvenc.clone(), x264],
        selected_encoder: Some(nvenc),
        platform: "linux".to_string(),
    }
}
