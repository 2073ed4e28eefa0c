use thiserror::Error;

/// Top-level error for pipeline operations that can fail hard.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("File processing error: {0}")]
    File(#[from] FileProcessingError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// The audio device or context could not be opened.
///
/// This is the only class of error escalated to callers of the realtime
/// executor; the executor stays `Idle` when it is returned.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),
    #[error("Invalid block size: {0} (must be a non-zero power of two)")]
    InvalidBlockSize(usize),
}

/// A processing unit failed on one block.
///
/// Recovered locally by passing the plugin's input through; only logged.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("{unit} failed: {reason}")]
    Failed { unit: &'static str, reason: String },
    #[error("{unit} produced a non-finite sample at index {index}")]
    MalformedOutput { unit: &'static str, index: usize },
    #[error("{unit} panicked")]
    Panicked { unit: &'static str },
}

/// Per-file failure during offline or batch rendering.
#[derive(Debug, Error)]
pub enum FileProcessingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode '{file}': {reason}")]
    Decode { file: String, reason: String },
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Processing failed: {0}")]
    Render(String),
}

/// A serialized plugin state or pipeline could not be loaded.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Plugin '{0}' is not available")]
    UnknownPlugin(String),
    #[error("Plugin state has no name")]
    MissingName,
    #[error("Bus index {0} is out of range")]
    InvalidBus(u8),
    #[error("Invalid channel selector '{0}'")]
    InvalidChannel(String),
    #[error("Malformed plugin state: {0}")]
    Json(#[from] serde_json::Error),
}

/// The engine configuration could not be parsed or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
