use crate::error::{Error, Result};
use crate::process::FfmpegProcess;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT_SECS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareType {
    Nvidia,
    Intel,
    Amd,
    Apple,
    Vaapi,
    Software,
}

impl HardwareType {
    pub fn as_str(self) -> &'static str {
        match self {
            HardwareType::Nvidia => "nvidia",
            HardwareType::Intel => "intel",
            HardwareType::Amd => "amd",
            HardwareType::Apple => "apple",
            HardwareType::Vaapi => "vaapi",
            HardwareType::Software => "software",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "nvidia" | "nvenc" => Some(HardwareType::Nvidia),
            "intel" | "qsv" => Some(HardwareType::Intel),
            "amd" | "amf" => Some(HardwareType::Amd),
            "apple" | "videotoolbox" => Some(HardwareType::Apple),
            "vaapi" => Some(HardwareType::Vaapi),
            "software" | "none" => Some(HardwareType::Software),
            _ => None,
        }
    }
}

/// Auto-detection priority, fastest family first.
const PRIORITY: [HardwareType; 6] = [
    HardwareType::Nvidia,
    HardwareType::Apple,
    HardwareType::Intel,
    HardwareType::Amd,
    HardwareType::Vaapi,
    HardwareType::Software,
];

/// Known encoders: (ffmpeg name, family, display name).
const ENCODER_CATALOG: [(&str, HardwareType, &str); 12] = [
    ("h264_nvenc", HardwareType::Nvidia, "NVIDIA NVENC H.264"),
    ("hevc_nvenc", HardwareType::Nvidia, "NVIDIA NVENC H.265"),
    ("h264_qsv", HardwareType::Intel, "Intel Quick Sync H.264"),
    ("hevc_qsv", HardwareType::Intel, "Intel Quick Sync H.265"),
    ("h264_amf", HardwareType::Amd, "AMD AMF H.264"),
    ("hevc_amf", HardwareType::Amd, "AMD AMF H.265"),
    ("h264_videotoolbox", HardwareType::Apple, "Apple VideoToolbox H.264"),
    ("hevc_videotoolbox", HardwareType::Apple, "Apple VideoToolbox H.265"),
    ("h264_vaapi", HardwareType::Vaapi, "VA-API H.264"),
    ("hevc_vaapi", HardwareType::Vaapi, "VA-API H.265"),
    ("libx264", HardwareType::Software, "Software H.264 (x264)"),
    ("libx265", HardwareType::Software, "Software H.265 (x265)"),
];

#[derive(Debug, Clone, Serialize)]
pub struct EncoderInfo {
    pub name: String,
    pub hardware_type: HardwareType,
    pub display_name: String,
    pub available: bool,
    pub tested: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareInfo {
    pub detected_type: HardwareType,
    pub encoders: Vec<EncoderInfo>,
    pub selected_encoder: Option<EncoderInfo>,
    pub platform: String,
}

impl HardwareInfo {
    pub fn has_hardware_encoding(&self) -> bool {
        self.encoders
            .iter()
            .any(|e| e.available && e.hardware_type != HardwareType::Software)
    }

    pub fn available_hardware_types(&self) -> Vec<HardwareType> {
        let mut types: Vec<HardwareType> = Vec::new();
        for encoder in &self.encoders {
            if encoder.available
                && encoder.hardware_type != HardwareType::Software
                && !types.contains(&encoder.hardware_type)
            {
                types.push(encoder.hardware_type);
            }
        }
        types
    }

    pub fn get_encoder(&self, hardware_type: HardwareType) -> Option<&EncoderInfo> {
        self.encoders
            .iter()
            .find(|e| e.hardware_type == hardware_type && e.available)
    }
}

/// Parse `ffmpeg -encoders` output: video encoder lines have a first
/// column beginning with `V`.
fn parse_encoder_list(output: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('V') {
            let mut parts = trimmed.split_whitespace();
            if let (Some(_), Some(name)) = (parts.next(), parts.next()) {
                if name != "=" {
                    names.insert(name.to_string());
                }
            }
        }
    }
    names
}

fn determine_hardware_type(encoders: &[EncoderInfo], prefer: &str) -> HardwareType {
    if prefer != "auto" {
        match HardwareType::parse(prefer) {
            Some(preferred) => {
                if encoders
                    .iter()
                    .any(|e| e.available && e.hardware_type == preferred)
                {
                    info!("using preferred hardware type: {}", preferred.as_str());
                    return preferred;
                }
            }
            None => warn!("invalid hardware preference: {prefer}"),
        }
    }

    for hw_type in PRIORITY {
        if encoders
            .iter()
            .any(|e| e.available && e.hardware_type == hw_type)
        {
            info!("detected hardware type: {}", hw_type.as_str());
            return hw_type;
        }
    }
    HardwareType::Software
}

/// Pick the concrete H.264 encoder workers should use: the detected
/// family's h264 encoder, else any available h264 encoder.
fn select_encoder(encoders: &[EncoderInfo], detected: HardwareType) -> Option<EncoderInfo> {
    if let Some(encoder) = encoders
        .iter()
        .find(|e| e.hardware_type == detected && e.available && e.name.contains("h264"))
    {
        info!("selected encoder: {}", encoder.display_name);
        return Some(encoder.clone());
    }
    if let Some(encoder) = encoders
        .iter()
        .find(|e| e.available && e.name.contains("h264"))
    {
        warn!("falling back to encoder: {}", encoder.display_name);
        return Some(encoder.clone());
    }
    None
}

/// Probe argv for one encoder: a 25-frame encode of a generated black
/// frame, with family-specific device init and upload filters.
fn probe_command(ffmpeg: &str, encoder: &EncoderInfo) -> Vec<String> {
    let mut command: Vec<String> = vec![ffmpeg.to_string(), "-loglevel".into(), "error".into()];

    match encoder.hardware_type {
        HardwareType::Nvidia => command.extend(
            ["-init_hw_device", "cuda=cu:0", "-filter_hw_device", "cu"].map(String::from),
        ),
        HardwareType::Intel => command.extend(
            ["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"].map(String::from),
        ),
        HardwareType::Vaapi => command.extend(
            [
                "-init_hw_device",
                "vaapi=va:/dev/dri/renderD128",
                "-filter_hw_device",
                "va",
            ]
            .map(String::from),
        ),
        _ => {}
    }

    command.extend(["-f", "lavfi", "-i", "color=black:s=1280x720:d=1"].map(String::from));

    match encoder.hardware_type {
        HardwareType::Nvidia => {
            command.extend(["-vf", "format=nv12,hwupload_cuda"].map(String::from))
        }
        HardwareType::Intel => command
            .extend(["-vf", "format=nv12,hwupload=extra_hw_frames=64"].map(String::from)),
        HardwareType::Vaapi => command.extend(["-vf", "format=nv12,hwupload"].map(String::from)),
        _ => {}
    }

    command.extend(["-c:v".to_string(), encoder.name.clone()]);
    command.extend(["-frames:v", "25", "-f", "null", "-"].map(String::from));
    command
}

/// Detects which encoders the local ffmpeg exposes and selects one.
/// Results are memoized until `clear_cache`.
#[derive(Debug, Default)]
pub struct HardwareDetector {
    cache: Mutex<Option<HardwareInfo>>,
}

impl HardwareDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn detect(&self, prefer: &str, test_encoding: bool) -> Result<HardwareInfo> {
        if let Some(cached) = self.cache.lock().unwrap().clone() {
            debug!("using cached hardware detection results");
            return Ok(cached);
        }

        info!("detecting hardware acceleration capabilities");

        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| Error::Hardware("ffmpeg not found in PATH".to_string()))?;
        let ffmpeg = ffmpeg.display().to_string();

        let output = FfmpegProcess::new(vec![
            ffmpeg.clone(),
            "-hide_banner".to_string(),
            "-encoders".to_string(),
        ])
        .run()
        .await
        .map_err(|e| Error::Hardware(format!("failed to list encoders: {e}")))?;

        let available = parse_encoder_list(&output.stdout);
        debug!("found {} video encoders", available.len());

        let mut encoders: Vec<EncoderInfo> = ENCODER_CATALOG
            .iter()
            .map(|(name, hw_type, display)| EncoderInfo {
                name: name.to_string(),
                hardware_type: *hw_type,
                display_name: display.to_string(),
                available: available.contains(*name),
                tested: false,
                error: None,
            })
            .collect();

        if !encoders
            .iter()
            .any(|e| e.available && e.hardware_type == HardwareType::Software)
        {
            return Err(Error::Hardware(
                "no software encoder available in this ffmpeg build".to_string(),
            ));
        }

        if test_encoding {
            self.test_encoders(&ffmpeg, &mut encoders).await;
        }

        let detected_type = determine_hardware_type(&encoders, prefer);
        let selected_encoder = select_encoder(&encoders, detected_type);

        let hardware_info = HardwareInfo {
            detected_type,
            encoders,
            selected_encoder,
            platform: std::env::consts::OS.to_string(),
        };

        log_detection_results(&hardware_info);
        *self.cache.lock().unwrap() = Some(hardware_info.clone());
        Ok(hardware_info)
    }

    /// Run a short real encode through each available hardware encoder and
    /// mark the ones that fail as unavailable.
    async fn test_encoders(&self, ffmpeg: &str, encoders: &mut [EncoderInfo]) {
        info!("probe-testing hardware encoders");

        for encoder in encoders.iter_mut() {
            if !encoder.available || encoder.hardware_type == HardwareType::Software {
                continue;
            }

            debug!("testing encoder: {}", encoder.name);
            let command = probe_command(ffmpeg, encoder);
            match FfmpegProcess::new(command)
                .with_timeout(PROBE_TIMEOUT_SECS)
                .run()
                .await
            {
                Ok(_) => {
                    encoder.tested = true;
                    debug!("{} test passed", encoder.name);
                }
                Err(Error::Timeout { .. }) => {
                    encoder.available = false;
                    encoder.error = Some("test encoding timed out".to_string());
                    warn!("{} test timed out", encoder.name);
                }
                Err(e) => {
                    encoder.available = false;
                    encoder.error = Some("test encoding failed".to_string());
                    warn!("{} test failed: {e}", encoder.name);
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        *self.cache.lock().unwrap() = None;
        debug!("hardware detection cache cleared");
    }
}

fn log_detection_results(info: &HardwareInfo) {
    info!("platform: {}", info.platform);
    info!("detected type: {}", info.detected_type.as_str());
    for encoder in &info.encoders {
        if encoder.available {
            let tested = if encoder.tested { " (tested)" } else { "" };
            info!("  {} available{tested}", encoder.display_name);
        } else if let Some(error) = &encoder.error {
            info!("  {} unavailable ({error})", encoder.display_name);
        }
    }
    if let Some(selected) = &info.selected_encoder {
        info!("selected: {}", selected.display_name);
    }
}
