// Shared helpers for sizes, durations, bitrates, and resolution math.

/// Format a byte count as a human-readable size (e.g. "1.5 GB").
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}

/// Format a duration in seconds as HH:MM:SS.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Parse "HH:MM:SS.mmm", "MM:SS.mmm" or "SS.mmm" into seconds.
pub fn parse_time_to_seconds(time_str: &str) -> f64 {
    let parts: Vec<&str> = time_str.split(':').collect();
    let parse = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
    match parts.as_slice() {
        [h, m, s] => parse(h) * 3600.0 + parse(m) * 60.0 + parse(s),
        [m, s] => parse(m) * 60.0 + parse(s),
        [s] => parse(s),
        _ => 0.0,
    }
}

/// Parse a bitrate string like "128k", "5M" or "1000" into bits per second.
pub fn parse_bitrate(bitrate: &str) -> u64 {
    let trimmed = bitrate.trim();
    let (digits, unit): (String, String) = trimmed
        .chars()
        .partition(|c| c.is_ascii_digit() || *c == '.');
    let value: f64 = digits.parse().unwrap_or(0.0);
    match unit.trim().to_ascii_uppercase().as_str() {
        "K" => (value * 1_000.0) as u64,
        "M" => (value * 1_000_000.0) as u64,
        "G" => (value * 1_000_000_000.0) as u64,
        _ => value as u64,
    }
}

/// Kilobit value of a bitrate string like "5000k".
pub fn bitrate_kbps(bitrate: &str) -> u32 {
    (parse_bitrate(bitrate) / 1000) as u32
}

const STANDARD_RESOLUTIONS: [(&str, u32, u32); 7] = [
    ("2160p", 3840, 2160),
    ("1440p", 2560, 1440),
    ("1080p", 1920, 1080),
    ("720p", 1280, 720),
    ("480p", 854, 480),
    ("360p", 640, 360),
    ("240p", 426, 240),
];

/// Quality label for a source height, preferring the closest label at or
/// below the height so the label never implies upscaling.
pub fn quality_from_height(height: u32) -> Option<&'static str> {
    for (label, _, std_height) in STANDARD_RESOLUTIONS {
        if height == std_height {
            return Some(label);
        }
    }
    for (label, _, std_height) in STANDARD_RESOLUTIONS {
        if height >= std_height {
            return Some(label);
        }
    }
    Some("240p")
}

pub fn standard_resolution(quality: &str) -> Option<(u32, u32)> {
    STANDARD_RESOLUTIONS
        .iter()
        .find(|(label, _, _)| *label == quality)
        .map(|(_, w, h)| (*w, *h))
}

/// Target dimensions for a quality label, preserving the source aspect
/// ratio. Both dimensions are forced even (codec requirement).
pub fn target_resolution(source_width: u32, source_height: u32, quality: &str) -> (u32, u32) {
    if quality == "original" {
        return (source_width, source_height);
    }
    let Some((_, std_height)) = standard_resolution(quality) else {
        return (source_width, source_height);
    };
    if source_height == 0 {
        return (source_width, std_height);
    }
    let aspect = source_width as f64 / source_height as f64;
    let mut target_height = std_height;
    let mut target_width = (target_height as f64 * aspect) as u32;
    if target_width % 2 != 0 {
        target_width -= 1;
    }
    if target_height % 2 != 0 {
        target_height -= 1;
    }
    (target_width, target_height)
}

/// Whether a quality variant belongs in the ladder for a given source height.
pub fn should_include_quality(source_height: u32, quality: &str, allow_upscaling: bool) -> bool {
    if quality == "original" {
        return true;
    }
    match standard_resolution(quality) {
        Some((_, target_height)) => allow_upscaling || target_height <= source_height,
        None => false,
    }
}

/// Number of HLS segments for a duration and segment length.
pub fn segment_count(duration: f64, segment_duration: u32) -> u32 {
    if segment_duration == 0 {
        return 0;
    }
    (duration / segment_duration as f64).ceil() as u32
}

/// Derived channel layout name when the container does not carry one.
pub fn channel_layout_name(channels: u32) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        6 => "5.1".to_string(),
        8 => "7.1".to_string(),
        n => format!("{n}ch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(5445.0), "01:30:45");
    }

    #[test]
    fn test_parse_time_to_seconds() {
        assert_eq!(parse_time_to_seconds("01:30:45"), 5445.0);
        assert_eq!(parse_time_to_seconds("02:05.5"), 125.5);
        assert_eq!(parse_time_to_seconds("42.25"), 42.25);
    }

    #[test]
    fn test_parse_bitrate() {
        assert_eq!(parse_bitrate("128k"), 128_000);
        assert_eq!(parse_bitrate("5M"), 5_000_000);
        assert_eq!(parse_bitrate("1000"), 1000);
        assert_eq!(bitrate_kbps("5000k"), 5000);
    }

    #[test]
    fn test_quality_from_height() {
        assert_eq!(quality_from_height(1080), Some("1080p"));
        assert_eq!(quality_from_height(1088), Some("1080p"));
        assert_eq!(quality_from_height(768), Some("720p"));
        assert_eq!(quality_from_height(144), Some("240p"));
    }

    #[test]
    fn test_target_resolution_preserves_aspect() {
        // 1366x768 at 720p: 1366*720/768 = 1280.625, floored to even 1280
        assert_eq!(target_resolution(1366, 768, "720p"), (1280, 720));
        assert_eq!(target_resolution(1920, 1080, "480p"), (852, 480));
        assert_eq!(target_resolution(3840, 2160, "original"), (3840, 2160));
    }

    #[test]
    fn test_target_resolution_even_dimensions() {
        let (w, h) = target_resolution(1998, 1080, "720p");
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
    }

    #[test]
    fn test_should_include_quality() {
        assert!(should_include_quality(1080, "720p", false));
        assert!(!should_include_quality(1080, "1440p", false));
        assert!(should_include_quality(1080, "1440p", true));
        assert!(should_include_quality(480, "original", false));
        assert!(!should_include_quality(1080, "999p", false));
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count(120.0, 6), 20);
        assert_eq!(segment_count(121.0, 6), 21);
        assert_eq!(segment_count(0.0, 6), 0);
    }

    #[test]
    fn test_channel_layout_name() {
        assert_eq!(channel_layout_name(1), "mono");
        assert_eq!(channel_layout_name(2), "stereo");
        assert_eq!(channel_layout_name(6), "5.1");
        assert_eq!(channel_layout_name(8), "7.1");
        assert_eq!(channel_layout_name(3), "3ch");
    }
}
