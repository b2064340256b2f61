//! ffmpeg and ffprobe wrappers for audio preparation

use std::path::Path;
use std::process::Stdio;

use tempfile::TempPath;
use tokio::process::Command;

use super::EngineError;

/// Sample rate expected by Whisper
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Convert any supported media file to 16 kHz mono PCM WAV
    pub async fn convert_to_wav(
        &self,
        input: &Path,
        output: &Path,
        is_video: bool,
    ) -> Result<(), EngineError> {
        let args = conversion_args(input, output, is_video);
        tracing::debug!("Running {} {:?}", self.ffmpeg_path, args);

        let result = media_command(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::InvalidAudio(format!("failed to run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(EngineError::InvalidAudio(format!(
                "ffmpeg exited with {}: {}",
                result.status, tail
            )));
        }
        Ok(())
    }

    /// Media duration in seconds, `None` when ffprobe cannot tell
    pub async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let output = media_command(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                parse_probe_duration(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                tracing::debug!("ffprobe failed for {}: {}", input.display(), out.status);
                None
            }
            Err(e) => {
                tracing::warn!("Could not run ffprobe: {}", e);
                None
            }
        }
    }
}

/// A child process that is killed if its future is dropped, e.g. by a job time limit
pub fn media_command(program: &str) -> Command {
    let mut command = Command::new(program);
    command.stdin(Stdio::null()).kill_on_drop(true);
    command
}

/// Arguments for `ffmpeg`; video input drops the video stream first
pub fn conversion_args(input: &Path, output: &Path, is_video: bool) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.display().to_string()];
    if is_video {
        args.extend(["-vn", "-acodec", "pcm_s16le"].map(String::from));
    }
    args.extend([
        "-ar".to_string(),
        TARGET_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-y".to_string(),
        output.display().to_string(),
    ]);
    args
}

pub fn parse_probe_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// An empty `.wav` path in the system temp dir, deleted when dropped
pub fn temp_wav() -> std::io::Result<TempPath> {
    Ok(tempfile::Builder::new()
        .prefix("s2t-")
        .suffix(".wav")
        .tempfile()?
        .into_temp_path())
}
