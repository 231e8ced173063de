use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::item::QueueItem;

/// Callback reporting conversion progress in the 0-100 range.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Result of one conversion attempt.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub success: bool,
    pub output_size: Option<u64>,
    pub error_message: Option<String>,
}

impl ConversionOutcome {
    pub fn success(output_size: u64) -> Self {
        Self {
            success: true,
            output_size: Some(output_size),
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            output_size: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// The external conversion operation, opaque to the queue core.
///
/// Implementations report 0-100 progress through the callback and honor the
/// cancellation token; a cancelled conversion returns an error with the
/// token in the cancelled state, which the processor treats as cancellation
/// rather than failure.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        item: &QueueItem,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<ConversionOutcome>;
}

/// FFmpeg-backed converter producing .mp4 output.
pub struct FfmpegConverter {
    config: Config,
}

impl FfmpegConverter {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get duration of a media file in seconds using ffprobe.
    async fn probe_duration(&self, item: &QueueItem) -> Result<f64> {
        let mut cmd = Command::new("ffprobe");
        cmd.args([
            "-v",
            "quiet",
            "-show_entries",
            "format=duration",
            "-of",
            "csv=p=0",
        ]);
        cmd.arg(&item.source_path);

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("ffprobe failed: {stderr}"));
        }

        let duration_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
        duration_str
            .parse::<f64>()
            .map_err(|e| anyhow!("Failed to parse duration '{}': {}", duration_str, e))
    }

    fn build_command(&self, item: &QueueItem) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-fflags", "+genpts", "-avoid_negative_ts", "make_zero"]);
        cmd.arg("-i");
        cmd.arg(&item.source_path);
        cmd.args([
            "-c:v",
            "libx264",
            "-preset",
            &self.config.ffmpeg_preset,
            "-crf",
            &self.config.ffmpeg_crf,
            "-c:a",
            "aac",
            "-b:a",
            &self.config.ffmpeg_audio_bitrate,
        ]);
        cmd.args(["-progress", "pipe:1", "-nostats", "-loglevel", "error", "-y"]);
        cmd.arg(item.output_path());
        cmd
    }
}

/// Parse an `out_time_ms=` line from ffmpeg's `-progress` output.
/// Despite the name, ffmpeg reports this value in microseconds.
fn parse_out_time_us(line: &str) -> Option<u64> {
    line.strip_prefix("out_time_ms=")?.trim().parse().ok()
}

/// Map elapsed output time to a 0-100 percentage, capped at 99 so only a
/// finished conversion reports 100.
fn percent_for(out_time_us: u64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 {
        return 0;
    }
    let ratio = out_time_us as f64 / (duration_secs * 1_000_000.0);
    (ratio * 100.0).min(99.0) as u8
}

#[async_trait]
impl Converter for FfmpegConverter {
    async fn convert(
        &self,
        item: &QueueItem,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<ConversionOutcome> {
        if !item.source_path.exists() {
            return Ok(ConversionOutcome::failure(format!(
                "Input file does not exist: {:?}",
                item.source_path
            )));
        }

        let output_path = item.output_path();
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Duration is only needed for progress granularity; a failed probe
        // degrades to coarse 0 -> 100 reporting.
        let duration = self.probe_duration(item).await.unwrap_or_else(|e| {
            debug!("Duration probe failed for {:?}: {}", item.source_path, e);
            0.0
        });

        info!("🚀 Starting conversion for: {:?}", item.source_path);

        let mut cmd = self.build_command(item);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        debug!("Executing FFmpeg command: {:?}", cmd);

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("FFmpeg stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("FFmpeg stderr not captured"))?;

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    let _ = tokio::fs::remove_file(&output_path).await;
                    return Err(anyhow!("conversion cancelled: {:?}", item.source_path));
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(out_time_us) = parse_out_time_us(&line) {
                            progress(percent_for(out_time_us, duration));
                        }
                    }
                    None => break,
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let mut message = String::new();
            let _ = stderr.read_to_string(&mut message).await;
            let message = message.trim();
            error!("FFmpeg failed: {}", message);
            return Ok(ConversionOutcome::failure(format!(
                "FFmpeg conversion failed: {message}"
            )));
        }

        progress(100);
        let output_size = tokio::fs::metadata(&output_path).await?.len();
        info!(
            "✅ Conversion successful: {:?} -> {:?}",
            item.source_path, output_path
        );
        Ok(ConversionOutcome::success(output_size))
    }
}
