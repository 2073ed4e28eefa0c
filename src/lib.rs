pub mod config;
pub mod context;
pub mod dsp;
pub mod error;
#[cfg(feature = "files")]
pub mod files;
pub mod history;
pub mod offline;
pub mod pipeline;
pub mod plugin;
pub mod preset;
pub mod realtime;

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::config::EngineConfig;
use crate::dsp::AudioBuffer;
use crate::error::{FileProcessingError, PipelineError};
use crate::offline::{OfflineRenderer, RenderOutcome};
use crate::pipeline::Pipeline;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the effetune-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Render a channel-segment sample buffer through a pipeline given as
/// JSON and encode the result as 24-bit WAV.
///
/// Invalid plugin entries are skipped (and logged); the rest render.
pub fn render_pipeline_wav(
    pipeline_json: &str,
    samples: &[f32],
    channels: usize,
    sample_rate: u32,
) -> Result<Vec<u8>, PipelineError> {
    let (pipeline, _skipped) = Pipeline::from_json(pipeline_json)?;
    let input = AudioBuffer::from_segments(samples, channels, sample_rate);
    let renderer = OfflineRenderer::new(EngineConfig::default());
    match renderer.render_wav(&input, &pipeline.snapshot(), &mut |_| {})? {
        RenderOutcome::Completed(wav) => Ok(wav),
        RenderOutcome::Cancelled => Err(FileProcessingError::Render("cancelled".into()).into()),
    }
}

/// WASM-exposed: render samples (channel-segment layout) through a
/// pipeline JSON document to WAV bytes.
#[wasm_bindgen]
pub fn render_wav(
    pipeline_json: &str,
    samples: &[f32],
    channels: usize,
    sample_rate: u32,
) -> Result<Vec<u8>, JsValue> {
    render_pipeline_wav(pipeline_json, samples, channels, sample_rate)
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: convert a plugin state object between the short
/// (`nm`/`en`/...) and long (`name`/`enabled`/`parameters`) shapes.
#[wasm_bindgen]
pub fn convert_plugin_state(value: JsValue, to_long: bool) -> Result<JsValue, JsValue> {
    let json: serde_json::Value =
        serde_wasm_bindgen::from_value(value).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let converted =
        preset::convert_state(json, to_long).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    converted
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pipeline_json_to_wav() {
        let samples = vec![0.5f32; 2 * 300];
        let wav = render_pipeline_wav(
            r#"[{"nm":"Polarity Inversion"},{"nm":"Unknown Thing"}]"#,
            &samples,
            2,
            48_000,
        )
        .unwrap();
        assert_eq!(wav.len(), 44 + 300 * 2 * 3);
        // -0.5 * 2^23 = -4194304 = 0xC00000
        assert_eq!(&wav[44..47], &[0x00, 0x00, 0xC0]);
    }

    #[test]
    fn malformed_pipeline_json_is_a_validation_error() {
        let err = render_pipeline_wav("{", &[0.0; 4], 1, 48_000).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn empty_input_is_a_file_error() {
        let err = render_pipeline_wav("[]", &[], 2, 48_000).unwrap_err();
        assert!(matches!(err, PipelineError::File(FileProcessingError::Render(_))));
    }
}
