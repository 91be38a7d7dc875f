//! # Configuration Management
//!
//! This module loads the server configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - A TOML configuration file (`config.toml`, or `--config <file>`)
//! - Environment variables (`WYOMING_WHISPER__MODEL__NAME=base.en`)
//! - Command line flags (see `cli.rs`)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Command line flags
//! 2. Environment variables with the `WYOMING_WHISPER__` prefix
//! 3. Configuration file
//! 4. Default values
//!
//! ## Process-wide values:
//! Model name, engine cache directory, language hint and beam size are read
//! once at startup and seed every session. Nothing here changes at runtime.

use crate::cli::Cli;
use crate::protocol::event::FrameLimits;
use crate::server::ServerUri;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Prefix for environment overrides, e.g. `WYOMING_WHISPER__TRANSCRIPTION__BEAM_SIZE=3`.
const ENV_PREFIX: &str = "WYOMING_WHISPER";

/// Main configuration that groups every section.
///
/// ## Why separate config structs:
/// Each section maps to one `[table]` in `config.toml` and one component
/// of the server (listener, model guard, decoder options, worker pool,
/// health endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub transcription: TranscriptionConfig,
    pub performance: PerformanceConfig,
    pub health: HealthConfig,
}

/// Listener settings.
///
/// ## Fields:
/// - `uri`: `tcp://host:port` or `unix:///path/to/socket`
/// - `max_header_bytes`: longest accepted JSON header line of one event
/// - `max_payload_bytes`: largest data block or audio payload one event may carry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub uri: String,
    pub max_header_bytes: usize,
    pub max_payload_bytes: usize,
}

impl ServerConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_header_bytes: self.max_header_bytes,
            max_block_bytes: self.max_payload_bytes,
        }
    }
}

/// Speech model settings consumed by the model lifecycle guard.
///
/// ## Fields:
/// - `name`: Whisper model identifier ("tiny.en", "base", "openai/whisper-small", ...)
/// - `cache_dir`: where compiled engines are written (`<cache_dir>/<name>.engine`)
/// - `data_dirs`: extra read-only directories searched for a compiled engine
/// - `download_dir`: Hugging Face download cache for source weights
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `dtype`: floating point type of the compiled engine ("f32", "f16", "bf16")
/// - `preload`: load the engine before accepting connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub cache_dir: PathBuf,
    pub data_dirs: Vec<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub device: String,
    pub dtype: String,
    pub preload: bool,
}

/// Decoder options passed to every transcription call.
///
/// ## Fields:
/// - `language`: ISO 639-1 hint; `None` lets the model detect the language
/// - `beam_size`: beam width, always passed to the engine (1 = greedy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub language: Option<String>,
    pub beam_size: usize,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_inference`: blocking jobs (load, inference) allowed at once
/// - `temp_dir`: where WAV files are packaged for the engine (system temp dir when unset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_inference: usize,
    pub temp_dir: Option<PathBuf>,
}

/// Optional HTTP health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                uri: "tcp://0.0.0.0:10300".to_string(),
                max_header_bytes: FrameLimits::default().max_header_bytes,
                max_payload_bytes: FrameLimits::default().max_block_bytes,
            },
            model: ModelConfig {
                name: "tiny.en".to_string(),
                cache_dir: default_cache_dir(),
                data_dirs: Vec::new(),
                download_dir: None,
                device: "auto".to_string(),
                dtype: "f32".to_string(),
                preload: false,
            },
            transcription: TranscriptionConfig {
                language: None,
                beam_size: 5,
            },
            performance: PerformanceConfig {
                max_concurrent_inference: 1,
                temp_dir: None,
            },
            health: HealthConfig {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 10301,
            },
        }
    }
}

/// `~/.cache/wyoming-whisper`, or `./.cache/wyoming-whisper` when there is no home.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("wyoming-whisper")
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Merge the config file (`--config`, or `config.toml` if it exists)
    /// 3. Merge `WYOMING_WHISPER__*` environment variables
    /// 4. Apply command line flags as overrides
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        settings = match &cli.config {
            Some(path) => settings.add_source(config::File::from(path.as_path())),
            None => settings.add_source(config::File::with_name("config").required(false)),
        };

        settings = settings.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        // Flags win over everything else
        if let Some(uri) = &cli.uri {
            settings = settings.set_override("server.uri", uri.as_str())?;
        }
        if let Some(model) = &cli.model {
            settings = settings.set_override("model.name", model.as_str())?;
        }
        if let Some(dir) = &cli.model_dir {
            settings = settings.set_override("model.cache_dir", dir.to_string_lossy().to_string())?;
        }
        if !cli.data_dirs.is_empty() {
            let dirs: Vec<String> = cli
                .data_dirs
                .iter()
                .map(|dir| dir.to_string_lossy().to_string())
                .collect();
            settings = settings.set_override("model.data_dirs", dirs)?;
        }
        if let Some(dir) = &cli.download_dir {
            settings =
                settings.set_override("model.download_dir", dir.to_string_lossy().to_string())?;
        }
        if let Some(device) = &cli.device {
            settings = settings.set_override("model.device", device.as_str())?;
        }
        if cli.preload {
            settings = settings.set_override("model.preload", true)?;
        }
        if let Some(language) = &cli.language {
            settings = settings.set_override("transcription.language", language.as_str())?;
        }
        if let Some(beam_size) = cli.beam_size {
            settings = settings.set_override("transcription.beam_size", beam_size as u64)?;
        }
        if let Some(port) = cli.health_port {
            settings = settings
                .set_override("health.enabled", true)?
                .set_override("health.port", u64::from(port))?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The listen URI parses as `tcp://` or `unix://`
    /// - Model name is not empty
    /// - A configured language hint is a known language code
    /// - Beam size and worker permits are at least 1
    /// - Device and dtype are known values
    /// - Health port is not 0 when the endpoint is enabled
    pub fn validate(&self) -> Result<()> {
        self.server
            .uri
            .parse::<ServerUri>()
            .map_err(|e| anyhow!("Invalid server uri '{}': {}", self.server.uri, e))?;

        if self.server.max_header_bytes == 0 {
            return Err(anyhow!("Max header bytes must be greater than 0"));
        }

        if self.server.max_payload_bytes == 0 {
            return Err(anyhow!("Max payload bytes must be greater than 0"));
        }

        if self.model.name.trim().is_empty() {
            return Err(anyhow!("Model name cannot be empty"));
        }

        self.model
            .device
            .parse::<crate::device::DevicePreference>()?;

        if !matches!(self.model.dtype.as_str(), "f32" | "f16" | "bf16") {
            return Err(anyhow!("Unknown engine dtype: {}", self.model.dtype));
        }

        if let Some(language) = &self.transcription.language {
            if !crate::transcription::registry::is_known_language(language) {
                return Err(anyhow!("Unknown transcription language: {}", language));
            }
        }

        if self.transcription.beam_size == 0 {
            return Err(anyhow!("Beam size must be greater than 0"));
        }

        if self.performance.max_concurrent_inference == 0 {
            return Err(anyhow!("Max concurrent inference must be greater than 0"));
        }

        if self.health.enabled && self.health.port == 0 {
            return Err(anyhow!("Health port cannot be 0"));
        }

        Ok(())
    }
}
