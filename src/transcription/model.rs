//! # Whisper Engine (candle)
//!
//! Concrete [`SpeechEngine`] and [`EngineLoader`] backed by candle's Whisper
//! implementation.
//!
//! ## Engine File:
//! One safetensors file per model name. Besides the weights (cast to the
//! configured dtype) it carries the model's `config.json` and
//! `tokenizer.json` as raw `u8` tensors, so loading never touches the network.
//! The file is written next to its final path with a `.partial` suffix and
//! renamed once complete.
//!
//! ## Building:
//! 1. Resolve the model name to a Hugging Face repo (see `registry.rs`)
//! 2. Download `config.json`, `tokenizer.json` and `model.safetensors` with hf-hub
//! 3. Cast float weights, attach the JSON blobs, save, load the result
//!
//! ## Decoding:
//! WAV → 16 kHz mono → log-mel (30 s segments) → beam search per segment.
//! Timestamp tokens are never produced. Multilingual checkpoints detect the
//! language from the first segment when no hint is given.

use crate::audio::processor::{read_wav_mono_16k, WHISPER_SAMPLE_RATE};
use crate::transcription::backend::{DecodeOptions, EngineLoader, SpeechEngine, TranscriptionOutput};
use crate::transcription::mel::{mel_filters, N_FFT};
use crate::transcription::registry::{self, LANGUAGES};
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;

const CONFIG_KEY: &str = "__wyoming.config_json";
const TOKENIZER_KEY: &str = "__wyoming.tokenizer_json";

/// Vocabulary size of multilingual checkpoints; English-only ones are one smaller.
const MULTILINGUAL_VOCAB: usize = 51865;

/// Builds and loads Whisper engines on one device.
pub struct WhisperLoader {
    device: Device,
    dtype: DType,
    download_dir: Option<PathBuf>,
}

impl WhisperLoader {
    pub fn new(device: Device, dtype: DType, download_dir: Option<PathBuf>) -> Self {
        Self {
            device,
            dtype,
            download_dir,
        }
    }

    /// "f32" | "f16" | "bf16"
    pub fn parse_dtype(name: &str) -> Result<DType> {
        match name {
            "f32" => Ok(DType::F32),
            "f16" => Ok(DType::F16),
            "bf16" => Ok(DType::BF16),
            other => Err(anyhow!("Unsupported engine dtype: {}", other)),
        }
    }

    fn hub_api(&self) -> Result<hf_hub::api::sync::Api> {
        let mut builder = hf_hub::api::sync::ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        if let Some(dir) = &self.download_dir {
            tracing::debug!(dir = %dir.display(), "Using custom download directory");
            builder = builder.with_cache_dir(dir.clone());
        }
        builder.build().context("Failed to create Hugging Face API client")
    }
}

impl EngineLoader for WhisperLoader {
    fn load_engine(&self, path: &Path) -> Result<Arc<dyn SpeechEngine>> {
        let engine = WhisperEngine::load(path, &self.device, self.dtype)?;
        Ok(Arc::new(engine))
    }

    fn build_engine(&self, model_name: &str, path: &Path) -> Result<Arc<dyn SpeechEngine>> {
        let repo_id = registry::repo_id(model_name);
        tracing::info!(model = model_name, repo = %repo_id, "Downloading model weights");

        let api = self.hub_api()?;
        let repo = api.model(repo_id.clone());
        let config_path = repo
            .get("config.json")
            .with_context(|| format!("Failed to download config.json from {}", repo_id))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .with_context(|| format!("Failed to download tokenizer.json from {}", repo_id))?;
        let weights_path = repo
            .get("model.safetensors")
            .with_context(|| format!("Failed to download model.safetensors from {}", repo_id))?;

        let start = Instant::now();
        let mut tensors = candle_core::safetensors::load(&weights_path, &Device::Cpu)
            .with_context(|| format!("Failed to read {}", weights_path.display()))?;

        for tensor in tensors.values_mut() {
            if tensor.dtype().is_float() && tensor.dtype() != self.dtype {
                *tensor = tensor.to_dtype(self.dtype)?;
            }
        }
        tensors.insert(CONFIG_KEY.to_string(), blob_tensor(std::fs::read(&config_path)?)?);
        tensors.insert(TOKENIZER_KEY.to_string(), blob_tensor(std::fs::read(&tokenizer_path)?)?);

        let partial = path.with_extension("partial");
        candle_core::safetensors::save(&tensors, &partial)
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        std::fs::rename(&partial, path)
            .with_context(|| format!("Failed to move engine into {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            tensors = tensors.len(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Engine written"
        );

        self.load_engine(path)
    }
}

fn blob_tensor(bytes: Vec<u8>) -> Result<Tensor> {
    let len = bytes.len();
    Ok(Tensor::from_vec(bytes, len, &Device::Cpu)?)
}

fn take_blob(tensors: &mut HashMap<String, Tensor>, key: &str) -> Result<Vec<u8>> {
    let tensor = tensors
        .remove(key)
        .ok_or_else(|| anyhow!("Engine file is missing the {} entry", key))?;
    Ok(tensor.to_vec1::<u8>()?)
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Token '{}' not found in vocabulary", token))
}

/// Special tokens resolved once per engine.
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    /// (language code, token id) for every language the tokenizer knows
    languages: Vec<(&'static str, u32)>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let languages = LANGUAGES
            .iter()
            .filter_map(|(code, _)| {
                tokenizer
                    .token_to_id(&format!("<|{}|>", code))
                    .map(|id| (*code, id))
            })
            .collect();

        Ok(Self {
            sot: token_id(tokenizer, m::SOT_TOKEN)?,
            eot: token_id(tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            languages,
        })
    }

    fn language(&self, code: &str) -> Option<u32> {
        self.languages
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    log_prob: f32,
}

impl Hypothesis {
    /// Length-normalised score used to compare finished hypotheses.
    fn score(&self) -> f32 {
        self.log_prob / self.tokens.len().max(1) as f32
    }
}

/// A loaded Whisper model ready for transcription.
///
/// The candle model keeps a KV cache and needs `&mut` for every forward
/// pass, so it sits behind a mutex; calls on one engine run one at a time.
pub struct WhisperEngine {
    model: Mutex<m::model::Whisper>,
    config: Config,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    mel_filters: Vec<f32>,
    device: Device,
    dtype: DType,
}

impl WhisperEngine {
    /// Load an engine file written by [`WhisperLoader::build_engine`].
    pub fn load(path: &Path, device: &Device, dtype: DType) -> Result<Self> {
        let start = Instant::now();
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .with_context(|| format!("Failed to read engine {}", path.display()))?;

        let config: Config = serde_json::from_slice(&take_blob(&mut tensors, CONFIG_KEY)?)
            .context("Engine carries an invalid model config")?;
        let tokenizer = Tokenizer::from_bytes(take_blob(&mut tensors, TOKENIZER_KEY)?)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::resolve(&tokenizer)?;

        let vb = VarBuilder::from_tensors(tensors, dtype, device);
        let model = m::model::Whisper::load(&vb, config.clone())?;
        let mel_filters = mel_filters(config.num_mel_bins, N_FFT, WHISPER_SAMPLE_RATE);

        tracing::info!(
            path = %path.display(),
            mel_bins = config.num_mel_bins,
            vocab = config.vocab_size,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Whisper engine loaded"
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            tokenizer,
            tokens,
            mel_filters,
            device: device.clone(),
            dtype,
        })
    }

    fn is_multilingual(&self) -> bool {
        self.config.vocab_size >= MULTILINGUAL_VOCAB
    }

    fn mel(&self, pcm: &[f32]) -> Result<Tensor> {
        let mel = m::audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let frames = mel.len() / n_mels;
        Ok(Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?.to_dtype(self.dtype)?)
    }

    /// Log-probabilities over the vocabulary for the token after `tokens`.
    ///
    /// The decoder's KV cache is flushed and the whole prefix runs again on
    /// every call, because beams diverge and the model holds a single cache.
    /// A window therefore costs O(beam_size * len^2) decoder positions, with
    /// `len` capped at half of `max_target_positions`.
    fn next_log_probs(
        &self,
        model: &mut m::model::Whisper,
        features: &Tensor,
        tokens: &[u32],
    ) -> Result<Vec<f32>> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let ys = model.decoder.forward(&input, features, true)?;
        let (_, seq_len, _) = ys.dims3()?;
        let logits = model
            .decoder
            .final_linear(&ys.i((.., seq_len - 1.., ..))?)?
            .i(0)?
            .i(0)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        Ok(log_probs.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    fn detect_language(
        &self,
        model: &mut m::model::Whisper,
        features: &Tensor,
    ) -> Result<Option<&'static str>> {
        let log_probs = self.next_log_probs(model, features, &[self.tokens.sot])?;
        let best = self
            .tokens
            .languages
            .iter()
            .filter_map(|(code, id)| log_probs.get(*id as usize).map(|p| (*code, *p)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(code, _)| code);
        Ok(best)
    }

    /// Beam search over one segment. Width 1 is greedy decoding.
    fn beam_search(
        &self,
        model: &mut m::model::Whisper,
        features: &Tensor,
        prompt: &[u32],
        beam_size: usize,
    ) -> Result<Vec<u32>> {
        let beam_size = beam_size.max(1);
        let max_len = self.config.max_target_positions / 2;
        let eot = self.tokens.eot;

        let mut beams = vec![Hypothesis {
            tokens: prompt.to_vec(),
            log_prob: 0.0,
        }];
        let mut finished: Vec<Hypothesis> = Vec::new();

        for _ in 0..max_len {
            let mut candidates: Vec<(usize, u32, f32)> = Vec::new();
            for (index, beam) in beams.iter().enumerate() {
                let log_probs = self.next_log_probs(model, features, &beam.tokens)?;
                // Only text tokens and end-of-text; no timestamps or other specials
                let mut ranked: Vec<(u32, f32)> = log_probs
                    .iter()
                    .enumerate()
                    .take(eot as usize + 1)
                    .map(|(token, p)| (token as u32, beam.log_prob + p))
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                candidates.extend(ranked.into_iter().take(beam_size).map(|(t, p)| (index, t, p)));
            }
            candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

            let mut next = Vec::with_capacity(beam_size);
            for (index, token, log_prob) in candidates {
                let mut tokens = beams[index].tokens.clone();
                if token == eot {
                    finished.push(Hypothesis { tokens, log_prob });
                } else {
                    tokens.push(token);
                    next.push(Hypothesis { tokens, log_prob });
                }
                if next.len() == beam_size || finished.len() >= beam_size {
                    break;
                }
            }

            beams = next;
            if beams.is_empty() || finished.len() >= beam_size {
                break;
            }
        }

        // Running out of positions still yields the best partial hypothesis
        let best = finished
            .into_iter()
            .chain(beams)
            .max_by(|a, b| a.score().total_cmp(&b.score()))
            .map(|hypothesis| hypothesis.tokens)
            .unwrap_or_default();

        Ok(best.into_iter().skip(prompt.len()).collect())
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(
        &self,
        audio_file: &Path,
        options: &DecodeOptions,
    ) -> Result<TranscriptionOutput> {
        let start = Instant::now();
        let pcm = read_wav_mono_16k(audio_file)?;
        if pcm.is_empty() {
            return Ok(TranscriptionOutput::default());
        }

        let mel = self.mel(&pcm)?;
        let (_, _, frames) = mel.dims3()?;
        // pcm_to_mel appends silence; only windows starting inside the audio are decoded
        let content_frames = pcm.len().div_ceil(m::HOP_LENGTH).clamp(1, frames);

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("Whisper model lock poisoned"))?;

        let mut language = options.language.clone();
        let mut language_token = match language.as_deref() {
            Some(code) => {
                let token = self.tokens.language(code);
                if token.is_none() && self.is_multilingual() {
                    tracing::warn!(language = code, "Unknown language hint, detecting instead");
                }
                token
            }
            None => None,
        };

        let mut pieces: Vec<String> = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let segment_frames = usize::min(frames - seek, m::N_FRAMES);
            let segment = mel.narrow(2, seek, segment_frames)?;
            let features = model.encoder.forward(&segment, true)?;

            if self.is_multilingual() && language_token.is_none() {
                if let Some(code) = self.detect_language(&mut model, &features)? {
                    tracing::debug!(language = code, "Detected language");
                    language = Some(code.to_string());
                    language_token = self.tokens.language(code);
                }
            }

            let mut prompt = vec![self.tokens.sot];
            if let Some(token) = language_token.filter(|_| self.is_multilingual()) {
                prompt.push(token);
            }
            prompt.push(self.tokens.transcribe);
            prompt.push(self.tokens.no_timestamps);

            let tokens = self.beam_search(&mut model, &features, &prompt, options.beam_size)?;
            let text = self
                .tokenizer
                .decode(&tokens, true)
                .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
            pieces.push(text.trim().to_string());

            seek += segment_frames;
        }

        let text = pieces
            .into_iter()
            .filter(|piece| !piece.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::debug!(
            audio_secs = pcm.len() as f64 / WHISPER_SAMPLE_RATE as f64,
            elapsed_ms = start.elapsed().as_millis() as u64,
            beam_size = options.beam_size,
            "Whisper decode finished"
        );

        Ok(TranscriptionOutput {
            text: Some(text),
            language: if self.is_multilingual() { language } else { Some("en".to_string()) },
        })
    }

    fn describe(&self) -> String {
        format!(
            "whisper ({} mel bins, {:?}, {})",
            self.config.num_mel_bins,
            self.dtype,
            crate::device::device_label(&self.device)
        )
    }
}
