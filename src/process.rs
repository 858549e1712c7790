use crate::error::{Error, Result};
use regex::Regex;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2}\.\d{2})").unwrap());
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d{2}):(\d{2}):(\d{2}\.\d{2})").unwrap());
static FPS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"fps=\s*(\d+\.?\d*)").unwrap());
static SPEED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"speed=\s*(\d+\.?\d*)x").unwrap());

const ERROR_PATTERNS: [&str; 7] = [
    r"Error while (opening|decoding|encoding)",
    r"Invalid data found",
    r"No such file or directory",
    r"Permission denied",
    r"Unknown encoder",
    r"Codec .* is not supported",
    r"Invalid argument",
];

/// Progress callback: (progress in [0,1], speed in fps if known).
pub type ProgressFn = Box<dyn Fn(f64, Option<f64>) + Send + Sync>;

#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One ffmpeg (or ffprobe) invocation with streaming stderr parsing,
/// progress reporting, and timeout handling.
pub struct FfmpegProcess {
    command: Vec<String>,
    timeout: Option<f64>,
    progress: Option<ProgressFn>,
}

impl FfmpegProcess {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: None,
            progress: None,
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_progress(
        mut self,
        callback: impl Fn(f64, Option<f64>) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Spawn the child and wait for it, draining stdout and stderr
    /// concurrently. Reading one pipe at a time can deadlock once the
    /// other pipe's buffer fills, so both reads always run together.
    pub async fn run(self) -> Result<ProcessOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::NonRetryable("empty command".to_string()))?;

        info!("running {} with {} args", program, args.len());
        debug!("full command: {}", self.command.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let progress = self.progress;

        let communicate = async {
            let stdout_fut = async {
                let mut buf = String::new();
                if let Some(mut pipe) = stdout_pipe {
                    let _ = pipe.read_to_string(&mut buf).await;
                }
                buf
            };
            let stderr_fut = async {
                let mut lines_out: Vec<String> = Vec::new();
                if let Some(pipe) = stderr_pipe {
                    let mut lines = BufReader::new(pipe).lines();
                    let mut total_duration: Option<f64> = None;
                    while let Ok(Some(line)) = lines.next_line().await {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if total_duration.is_none() {
                            total_duration = parse_duration(&line);
                            if let Some(d) = total_duration {
                                debug!("detected duration: {d:.2}s");
                            }
                        }
                        if let (Some(duration), Some(callback)) = (total_duration, &progress) {
                            if let Some(time) = parse_progress(&line) {
                                let fraction = (time / duration).min(1.0);
                                let speed = parse_speed(&line);
                                let call = AssertUnwindSafe(|| callback(fraction, speed));
                                if std::panic::catch_unwind(call).is_err() {
                                    warn!("progress callback panicked");
                                }
                            }
                        }
                        lines_out.push(line);
                    }
                }
                lines_out.join("\n")
            };
            let (stdout, stderr) = tokio::join!(stdout_fut, stderr_fut);
            let status = child.wait().await;
            (stdout, stderr, status)
        };

        let (stdout, stderr, status) = match self.timeout {
            Some(seconds) => {
                let outcome =
                    tokio::time::timeout(Duration::from_secs_f64(seconds), communicate).await;
                match outcome {
                    Ok(output) => output,
                    Err(_) => {
                        error!("process exceeded timeout of {seconds}s, terminating");
                        terminate(&mut child).await;
                        return Err(Error::Timeout { seconds });
                    }
                }
            }
            None => communicate.await,
        };

        let status = status?;
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let message = format!(
                "{program} exited with code {code}: {}",
                extract_error_message(&stderr)
            );
            error!("{message}");
            return Err(Error::ffmpeg(message, &self.command, stderr));
        }

        debug!("{program} completed successfully");
        Ok(ProcessOutput { stdout, stderr })
    }
}

/// Graceful termination: SIGTERM, up to 5 s of grace, then SIGKILL.
/// Safe to call after the child has already exited.
pub async fn terminate(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
            if tokio::time::timeout(Duration::from_secs(5), child.wait())
                .await
                .is_ok()
            {
                debug!("process terminated gracefully");
                return;
            }
            warn!("process ignored SIGTERM, killing");
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn hms_to_seconds(h: &str, m: &str, s: &str) -> f64 {
    let parse = |v: &str| v.parse::<f64>().unwrap_or(0.0);
    parse(h) * 3600.0 + parse(m) * 60.0 + parse(s)
}

pub(crate) fn parse_duration(line: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(line)?;
    Some(hms_to_seconds(&caps[1], &caps[2], &caps[3]))
}

pub(crate) fn parse_progress(line: &str) -> Option<f64> {
    let caps = PROGRESS_RE.captures(line)?;
    Some(hms_to_seconds(&caps[1], &caps[2], &caps[3]))
}

/// Instantaneous speed in fps. When only a realtime multiplier is present,
/// approximate with a 30 fps base.
pub(crate) fn parse_speed(line: &str) -> Option<f64> {
    if let Some(caps) = FPS_RE.captures(line) {
        return caps[1].parse::<f64>().ok();
    }
    if let Some(caps) = SPEED_RE.captures(line) {
        return caps[1].parse::<f64>().ok().map(|s| s * 30.0);
    }
    None
}

/// Pick the most useful lines out of a failed invocation's stderr: the
/// first known error line plus the two lines after it, or the last three
/// non-empty lines when nothing matches.
pub(crate) fn extract_error_message(stderr: &str) -> String {
    static ERROR_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        ERROR_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    });

    let lines: Vec<&str> = stderr.lines().collect();
    for re in ERROR_RES.iter() {
        for (i, line) in lines.iter().enumerate() {
            if re.is_match(line) {
                let end = (i + 3).min(lines.len());
                return lines[i..end].join(" | ");
            }
        }
    }

    let non_empty: Vec<&str> = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .copied()
        .collect();
    if non_empty.is_empty() {
        return "Unknown error".to_string();
    }
    let start = non_empty.len().saturating_sub(3);
    non_empty[start..].join(" | ")
}

/// Fluent builder for ffmpeg argument lists. `-hide_banner` is always set.
#[derive(Debug, Default)]
pub struct CommandBuilder {
    globals: Vec<String>,
    inputs: Vec<(Vec<String>, String)>,
    outputs: Vec<(Vec<String>, String)>,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, option: &str) -> Self {
        self.globals.push(option.to_string());
        self
    }

    pub fn global_with_value(mut self, option: &str, value: &str) -> Self {
        self.globals.push(option.to_string());
        self.globals.push(value.to_string());
        self
    }

    pub fn input(mut self, path: &Path, options: &[&str]) -> Self {
        self.inputs.push((
            options.iter().map(|s| s.to_string()).collect(),
            path.display().to_string(),
        ));
        self
    }

    pub fn output(mut self, path: &Path, options: &[String]) -> Self {
        self.outputs
            .push((options.to_vec(), path.display().to_string()));
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut command = vec!["ffmpeg".to_string(), "-hide_banner".to_string()];
        command.extend(self.globals);
        for (options, path) in self.inputs {
            command.extend(options);
            command.push("-i".to_string());
            command.push(path);
        }
        for (options, path) in self.outputs {
            command.extend(options);
            command.push(path);
        }
        command
    }
}

/// Run ffprobe quietly with additional arguments and return stdout.
pub async fn run_ffprobe(input: &Path, args: &[&str]) -> Result<String> {
    let mut command = vec!["ffprobe".to_string(), "-v".to_string(), "quiet".to_string()];
    command.extend(args.iter().map(|s| s.to_string()));
    command.push(input.display().to_string());

    let output = FfmpegProcess::new(command).run().await?;
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_duration_line() {
        let line = "  Duration: 00:02:00.05, start: 0.000000, bitrate: 5000 kb/s";
        assert_eq!(parse_duration(line), Some(120.05));
        assert_eq!(parse_duration("frame= 100"), None);
    }

    #[test]
    fn test_parse_progress_line() {
        let line = "frame= 1800 fps= 60 q=28.0 size=   12000KiB time=00:01:00.00 bitrate=1638.4kbits/s speed=2.01x";
        assert_eq!(parse_progress(line), Some(60.0));
        assert_eq!(parse_speed(line), Some(60.0));
    }

    #[test]
    fn test_parse_speed_multiplier_fallback() {
        let line = "size= 1024KiB time=00:00:10.00 bitrate= 838.9kbits/s speed=2.5x";
        assert_eq!(parse_speed(line), Some(75.0));
        assert_eq!(parse_speed("nothing here"), None);
    }

    #[test]
    fn test_extract_error_message_known_pattern() {
        let stderr = "Input #0, matroska\nError while decoding stream #0:0\ndetail one\ndetail two\ntrailing";
        let message = extract_error_message(stderr);
        assert_eq!(
            message,
            "Error while decoding stream #0:0 | detail one | detail two"
        );
    }

    #[test]
    fn test_extract_error_message_fallback() {
        let stderr = "line one\n\nline two\nline three\nline four";
        assert_eq!(
            extract_error_message(stderr),
            "line two | line three | line four"
        );
        assert_eq!(extract_error_message(""), "Unknown error");
    }

    #[test]
    fn test_command_builder_shape() {
        let command = CommandBuilder::new()
            .global("-y")
            .input(&PathBuf::from("in.mkv"), &["-hwaccel", "cuda"])
            .output(
                &PathBuf::from("out.m3u8"),
                &["-c:v".to_string(), "libx264".to_string()],
            )
            .build();
        assert_eq!(
            command,
            vec![
                "ffmpeg",
                "-hide_banner",
                "-y",
                "-hwaccel",
                "cuda",
                "-i",
                "in.mkv",
                "-c:v",
                "libx264",
                "out.m3u8",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let output = FfmpegProcess::new(vec!["echo".to_string(), "hello".to_string()])
            .run()
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_error() {
        let result = FfmpegProcess::new(vec!["false".to_string()]).run().await;
        assert!(matches!(result, Err(Error::Ffmpeg { .. })));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let result = FfmpegProcess::new(vec!["sleep".to_string(), "5".to_string()])
            .with_timeout(0.2)
            .run()
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
