//! Command line flags.
//!
//! Every flag is optional so that values left out fall through to the
//! configuration file, the environment and finally the built-in defaults
//! (see `config::AppConfig::load`).

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Default, Parser)]
#[command(name = "wyoming-whisper")]
#[command(version, about = "Wyoming speech-to-text server backed by Whisper")]
pub struct Cli {
    /// Configuration file (default: ./config.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// unix:// or tcp:// URI to listen on (default: tcp://0.0.0.0:10300)
    #[arg(long)]
    pub uri: Option<String>,

    /// Name of the Whisper model to use (default: tiny.en)
    #[arg(long)]
    pub model: Option<String>,

    /// Directory holding compiled engines (default: ~/.cache/wyoming-whisper)
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Language for transcription (default: auto-detect)
    #[arg(long)]
    pub language: Option<String>,

    /// Beam size for decoding (default: 5)
    #[arg(long)]
    pub beam_size: Option<usize>,

    /// Extra directory to check for an already compiled engine (repeatable)
    #[arg(long = "data-dir")]
    pub data_dirs: Vec<PathBuf>,

    /// Directory to download source model weights into
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Compute device: auto, cpu, cuda or metal
    #[arg(long)]
    pub device: Option<String>,

    /// Load the model before accepting connections; exit if that fails
    #[arg(long)]
    pub preload: bool,

    /// Serve GET /health and GET /info on this port
    #[arg(long)]
    pub health_port: Option<u16>,

    /// Log DEBUG messages
    #[arg(long)]
    pub debug: bool,
}
