use anyhow::{Context, Result};
use rollcall_core::StabilityConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration: defaults, overlaid by an optional TOML file
/// (`ROLLCALL_CONFIG`), overlaid by `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
    /// Frame hand-off buffer size, clamped to 1..=3.
    pub buffer_capacity: usize,
    /// How long the inference worker waits for a frame before re-checking
    /// the stop signal.
    pub pop_timeout_ms: u64,
    /// Motion EMA threshold in grid pixels.
    pub motion_threshold: f32,
    pub motion_alpha: f32,
    /// Seconds the motion EMA must stay under the threshold.
    pub stable_secs: f32,
    /// Consecutive passing frames required to confirm.
    pub required_hits: u32,
    /// Re-run subject localisation every N frames.
    pub locate_every: u32,
    /// Euclidean distance under which a face matches.
    pub match_threshold: f32,
    /// Registry database, roster and ledger live here.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            warmup_frames: 4,
            buffer_capacity: 2,
            pop_timeout_ms: 250,
            motion_threshold: 5.0,
            motion_alpha: 0.25,
            stable_secs: 0.5,
            required_hits: 4,
            locate_every: 12,
            match_threshold: 0.5,
            data_dir: default_data_dir(),
            model_dir: rollcall_vision::default_model_dir(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

impl Config {
    /// Load the layered configuration from the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalise();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Overlay `ROLLCALL_*` variables. Unparseable values are ignored with a
    /// warning and the previous value is kept.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = &lookup;
        set_string(lookup, "ROLLCALL_CAMERA_DEVICE", &mut self.camera_device);
        set_parsed(lookup, "ROLLCALL_FRAME_WIDTH", &mut self.frame_width);
        set_parsed(lookup, "ROLLCALL_FRAME_HEIGHT", &mut self.frame_height);
        set_parsed(lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        set_parsed(lookup, "ROLLCALL_BUFFER_CAPACITY", &mut self.buffer_capacity);
        set_parsed(lookup, "ROLLCALL_POP_TIMEOUT_MS", &mut self.pop_timeout_ms);
        set_parsed(lookup, "ROLLCALL_MOTION_THRESHOLD", &mut self.motion_threshold);
        set_parsed(lookup, "ROLLCALL_MOTION_ALPHA", &mut self.motion_alpha);
        set_parsed(lookup, "ROLLCALL_STABLE_SECS", &mut self.stable_secs);
        set_parsed(lookup, "ROLLCALL_REQUIRED_HITS", &mut self.required_hits);
        set_parsed(lookup, "ROLLCALL_LOCATE_EVERY", &mut self.locate_every);
        set_parsed(lookup, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold);
        set_parsed(lookup, "ROLLCALL_DATA_DIR", &mut self.data_dir);
        set_parsed(lookup, "ROLLCALL_MODEL_DIR", &mut self.model_dir);
        set_parsed(lookup, "ROLLCALL_LISTEN_ADDR", &mut self.listen_addr);
    }

    /// Pull out-of-range values back into their valid ranges.
    pub fn normalise(&mut self) {
        self.buffer_capacity = self.buffer_capacity.clamp(1, rollcall_hw::buffer::MAX_CAPACITY);
        self.required_hits = self.required_hits.max(1);
        self.locate_every = self.locate_every.max(1);
        self.motion_alpha = self.motion_alpha.clamp(0.0, 1.0);
        if !self.stable_secs.is_finite() || self.stable_secs < 0.0 {
            self.stable_secs = 0.0;
        }
    }

    pub fn stability(&self) -> StabilityConfig {
        StabilityConfig {
            motion_threshold: self.motion_threshold,
            alpha: self.motion_alpha,
            stable_for: Duration::from_secs_f32(self.stable_secs),
        }
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("faces.db")
    }

    pub fn roster_path(&self) -> PathBuf {
        self.data_dir.join("students.csv")
    }

    pub fn ledger_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn set_string(lookup: &dyn Fn(&str) -> Option<String>, key: &str, slot: &mut String) {
    if let Some(v) = lookup(key) {
        *slot = v;
    }
}

fn set_parsed<T: std::str::FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
    }
}
