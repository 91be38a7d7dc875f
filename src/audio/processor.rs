//! # Audio Processing
//!
//! Moves utterance audio between raw PCM, WAV files and the float samples
//! the model consumes.
//!
//! ## Key Functions:
//! - **write_wav_tempfile**: package raw PCM as a WAV file that removes itself on drop
//! - **read_wav_mono_16k**: decode a WAV file to 16 kHz mono `f32` samples
//! - **resample_linear**: sample rate conversion used by the decoder

use crate::audio::buffer::AudioFormat;
use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Sample rate every Whisper model expects.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Write `audio` (interleaved little-endian PCM in `format`) to a fresh WAV
/// file inside `dir`.
///
/// ## Supported widths:
/// - **1**: unsigned 8-bit
/// - **2**: signed 16-bit
/// - **3**: signed 24-bit
///
/// A trailing partial frame is dropped. The file is deleted when the
/// returned handle goes out of scope, whether or not transcription succeeded.
pub fn write_wav_tempfile(dir: &Path, audio: &[u8], format: AudioFormat) -> Result<NamedTempFile> {
    if format.rate == 0 || format.channels == 0 {
        return Err(anyhow!("Invalid audio format {}", format));
    }

    let whole = audio.len() - audio.len() % format.frame_bytes().max(1);
    let pcm = &audio[..whole];

    let samples = match format.width {
        1 => wav::BitDepth::Eight(pcm.to_vec()),
        2 => {
            let mut samples = vec![0i16; pcm.len() / 2];
            LittleEndian::read_i16_into(pcm, &mut samples);
            wav::BitDepth::Sixteen(samples)
        }
        3 => wav::BitDepth::TwentyFour(pcm.chunks_exact(3).map(LittleEndian::read_i24).collect()),
        other => return Err(anyhow!("Unsupported sample width: {} bytes", other)),
    };

    let header = wav::Header::new(
        wav::WAV_FORMAT_PCM,
        format.channels,
        format.rate,
        format.width * 8,
    );

    let mut file = tempfile::Builder::new()
        .prefix("wyoming-")
        .suffix(".wav")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary WAV in {}", dir.display()))?;

    wav::write(header, &samples, file.as_file_mut()).context("Failed to write WAV data")?;
    file.as_file_mut().flush()?;

    tracing::debug!(
        path = %file.path().display(),
        bytes = whole,
        format = %format,
        "Packaged utterance as WAV"
    );
    Ok(file)
}

/// Decode a WAV file to mono `f32` samples at [`WHISPER_SAMPLE_RATE`].
///
/// Channels are averaged; other rates are resampled linearly.
pub fn read_wav_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (header, data) = wav::read(&mut file).context("Failed to parse WAV file")?;

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    let mono = downmix(&interleaved, header.channel_count as usize);
    Ok(resample_linear(&mono, header.sampling_rate, WHISPER_SAMPLE_RATE))
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear interpolation resampler.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let index = (pos.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = (pos - index as f64) as f32;
            samples[index] * (1.0 - frac) + samples[next] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_roundtrip_16bit() {
        let dir = tempfile::tempdir().unwrap();
        let pcm: Vec<u8> = [0i16, 16384, -16384, 32767]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let file = write_wav_tempfile(dir.path(), &pcm, AudioFormat::default()).unwrap();
        let name = file.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("wyoming-"));
        assert!(name.ends_with(".wav"));

        let samples = read_wav_mono_16k(file.path()).unwrap();
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.5).abs() < 1e-4);
        assert!((samples[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_tempfile_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_wav_tempfile(dir.path(), &[0, 0, 0, 0], AudioFormat::default()).unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_header_matches_format() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(22050, 2, 2);
        let file = write_wav_tempfile(dir.path(), &[0u8; 8], format).unwrap();

        let mut reader = File::open(file.path()).unwrap();
        let (header, data) = wav::read(&mut reader).unwrap();
        assert_eq!(header.sampling_rate, 22050);
        assert_eq!(header.channel_count, 2);
        assert_eq!(header.bits_per_sample, 16);
        assert!(matches!(data, wav::BitDepth::Sixteen(ref s) if s.len() == 4));
    }

    #[test]
    fn test_partial_frame_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_wav_tempfile(dir.path(), &[1, 0, 2], AudioFormat::default()).unwrap();
        let mut reader = File::open(file.path()).unwrap();
        let (_, data) = wav::read(&mut reader).unwrap();
        assert!(matches!(data, wav::BitDepth::Sixteen(ref s) if s == &vec![1i16]));
    }

    #[test]
    fn test_unsupported_width_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_wav_tempfile(dir.path(), &[0u8; 8], AudioFormat::new(16000, 4, 1))
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported sample width"));
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
        let output = resample_linear(&input, 32000, 16000);
        assert_eq!(output.len(), 16);
        assert_eq!(output[0], 0.0);
        assert_eq!(output[1], 2.0);
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }
}
