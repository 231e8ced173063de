use std::env;
use std::path::PathBuf;

/// Configuration for FFmpeg and queue behavior.
#[derive(Debug, Clone)]
pub struct Config {
    pub ffmpeg_preset: String,
    pub ffmpeg_crf: String,
    pub ffmpeg_audio_bitrate: String,
    /// Path of the durable queue document.
    pub data_file: PathBuf,
    /// Capacity of the wake buffer between producers and the loop.
    pub wake_buffer_capacity: usize,
    /// How long `stop` waits for the loop before aborting it.
    pub shutdown_grace_secs: u64,
    /// Optional per-item conversion timeout. None means unbounded.
    pub item_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            ffmpeg_preset: env::var("MEDIAQ_FFMPEG_PRESET")
                .unwrap_or_else(|_| "veryfast".to_string()),
            ffmpeg_crf: env::var("MEDIAQ_FFMPEG_CRF").unwrap_or_else(|_| "23".to_string()),
            ffmpeg_audio_bitrate: env::var("MEDIAQ_FFMPEG_AUDIO_BITRATE")
                .unwrap_or_else(|_| "128k".to_string()),
            data_file: env::var("MEDIAQ_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("mediaq-queue.json")),
            wake_buffer_capacity: env::var("MEDIAQ_BUFFER_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
            shutdown_grace_secs: env::var("MEDIAQ_SHUTDOWN_GRACE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            item_timeout_secs: env::var("MEDIAQ_ITEM_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_preset: "veryfast".to_string(),
            ffmpeg_crf: "23".to_string(),
            ffmpeg_audio_bitrate: "128k".to_string(),
            data_file: PathBuf::from("mediaq-queue.json"),
            wake_buffer_capacity: 2048,
            shutdown_grace_secs: 10,
            item_timeout_secs: None,
        }
    }
}
