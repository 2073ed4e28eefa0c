//! Batch file processing — render WAV files on disk through a pipeline.
//!
//! Each input is decoded with `hound`, rendered offline and written next
//! to the output directory as `<stem>_effetuned.wav` (24-bit PCM). A file
//! that fails is reported and the batch moves on; a cancellation stops the
//! whole batch.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dsp::AudioBuffer;
use crate::dsp::renderer::encode_wav_24;
use crate::error::FileProcessingError;
use crate::offline::{OfflineRenderer, RenderOutcome};
use crate::plugin::PluginSnapshot;

const OUTPUT_SUFFIX: &str = "_effetuned.wav";

/// Result for one file of a batch.
#[derive(Debug)]
pub struct FileReport {
    pub input: PathBuf,
    /// Path of the written file, or why this file failed.
    pub result: Result<PathBuf, FileProcessingError>,
}

/// Decode a WAV file into per-channel float samples.
pub fn decode_wav(path: &Path) -> Result<AudioBuffer, FileProcessingError> {
    let decode_err = |e: hound::Error| FileProcessingError::Decode {
        file: path.display().to_string(),
        reason: e.to_string(),
    };
    let reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => FileProcessingError::Io(io),
        other => decode_err(other),
    })?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(FileProcessingError::UnsupportedFormat(format!(
            "{}: no channels",
            path.display()
        )));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
    };

    Ok(AudioBuffer::from_interleaved(&samples, channels, spec.sample_rate))
}

/// `<dir>/<stem>_effetuned.wav` for an input path.
pub fn output_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    out_dir.join(format!("{stem}{OUTPUT_SUFFIX}"))
}

/// Decode, render and write one file.
pub fn process_file(
    renderer: &OfflineRenderer,
    input: &Path,
    out_dir: &Path,
    plugins: &[PluginSnapshot],
    progress: &mut dyn FnMut(u8),
) -> Result<RenderOutcome<PathBuf>, FileProcessingError> {
    renderer.cancel_handle().clear();
    render_file(renderer, input, out_dir, plugins, progress)
}

fn render_file(
    renderer: &OfflineRenderer,
    input: &Path,
    out_dir: &Path,
    plugins: &[PluginSnapshot],
    progress: &mut dyn FnMut(u8),
) -> Result<RenderOutcome<PathBuf>, FileProcessingError> {
    let buffer = decode_wav(input)?;
    let RenderOutcome::Completed(rendered) = renderer.render_blocks(&buffer, plugins, progress)?
    else {
        return Ok(RenderOutcome::Cancelled);
    };
    let path = output_path(input, out_dir);
    fs::write(&path, encode_wav_24(&rendered))?;
    Ok(RenderOutcome::Completed(path))
}

/// Process every file in order.
///
/// `progress` sees the whole batch as 0..=100. A cancel issued while the
/// batch runs, during a file or between two, returns
/// [`RenderOutcome::Cancelled`] and discards the reports. Files already
/// written stay on disk.
pub fn process_files(
    renderer: &OfflineRenderer,
    inputs: &[PathBuf],
    out_dir: &Path,
    plugins: &[PluginSnapshot],
    progress: &mut dyn FnMut(u8),
) -> RenderOutcome<Vec<FileReport>> {
    let total = inputs.len().max(1);
    let mut reports = Vec::with_capacity(inputs.len());
    let cancel = renderer.cancel_handle();
    cancel.clear();

    for (index, input) in inputs.iter().enumerate() {
        if cancel.is_cancelled() {
            log::info!("Batch cancelled before {}", input.display());
            return RenderOutcome::Cancelled;
        }
        let mut file_progress = |p: u8| {
            let overall = (index * 100 + p as usize) / total;
            progress(overall.min(100) as u8);
        };
        let result = match render_file(renderer, input, out_dir, plugins, &mut file_progress) {
            Ok(RenderOutcome::Completed(path)) => {
                log::info!("Wrote {}", path.display());
                Ok(path)
            }
            Ok(RenderOutcome::Cancelled) => {
                log::info!("Batch cancelled at {}", input.display());
                return RenderOutcome::Cancelled;
            }
            Err(e) => {
                log::error!("Failed to process {}: {e}", input.display());
                Err(e)
            }
        };
        reports.push(FileReport {
            input: input.clone(),
            result,
        });
    }
    progress(100);
    RenderOutcome::Completed(reports)
}
