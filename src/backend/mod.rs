//! Backend abstraction for speech-to-text engines.
//!
//! The HTTP layer depends on the [`Transcriber`] trait instead of a concrete
//! implementation, which keeps request handling decoupled from inference code.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::AppError;

pub mod whisper_rs;

/// Fixed decoding beam width used for every transcription.
pub const BEAM_SIZE: i32 = 3;

/// Whisper model size selectable per upload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Parses the `model` form field. Unknown sizes are reported as a
    /// transcription failure, mirroring a model library rejecting the name.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "" | "tiny" => Ok(Self::Tiny),
            "base" => Ok(Self::Base),
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(AppError::transcription(format!(
                "unknown model size {other:?}; expected one of tiny,base,small,medium,large"
            ))),
        }
    }

    /// Canonical size name used in model filenames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

/// Device choice as requested by the client form.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceRequest {
    Cpu,
    Gpu,
}

impl DeviceRequest {
    /// Parses the `device` form field. Anything other than `"gpu"` takes the
    /// CPU path, matching the upstream tool.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("gpu") {
            Self::Gpu
        } else {
            Self::Cpu
        }
    }
}

/// Device the transcription actually runs on.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Device {
    Cpu,
    Gpu,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

/// Compute precision paired with the resolved device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ComputeKind {
    /// Lower-precision quantized weights for CPU inference.
    Int8,
    /// Half-precision weights for GPU inference.
    Float16,
}

impl ComputeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Float16 => "float16",
        }
    }
}

/// Resolves the requested device against actual GPU availability.
///
/// A GPU request without a GPU runtime silently downgrades to CPU; the
/// precision follows the resolved device (`int8` on CPU, `float16` on GPU).
pub fn resolve_device(requested: DeviceRequest, gpu_available: bool) -> (Device, ComputeKind) {
    match requested {
        DeviceRequest::Gpu if gpu_available => (Device::Gpu, ComputeKind::Float16),
        _ => (Device::Cpu, ComputeKind::Int8),
    }
}

/// Input payload consumed by a transcription backend.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    /// Staged media file to transcribe.
    pub audio_path: PathBuf,
    /// Selected model size.
    pub model: ModelSize,
    /// Resolved execution device.
    pub device: Device,
    /// Resolved compute precision.
    pub compute: ComputeKind,
}

/// Timestamped transcript chunk.
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    /// Segment start time in seconds.
    pub start_secs: f64,
    /// Segment end time in seconds.
    pub end_secs: f64,
    /// Text content for this segment.
    pub text: String,
}

/// Full inference result returned by a backend.
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    /// Segment-level timing and text details, in decode order.
    pub segments: Vec<TranscriptSegment>,
    /// Detected language code.
    pub language: String,
    /// Detection confidence in `[0, 1]`.
    pub language_probability: f64,
}

/// Backend contract implemented by speech-to-text engines.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Whether a GPU runtime is available for inference.
    fn gpu_available(&self) -> bool;

    /// Runs inference on a staged media file and returns a transcript result.
    async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscriptResult, AppError>;
}

/// Builds the whisper-rs backend.
pub fn build_backend(cfg: &AppConfig) -> Arc<dyn Transcriber> {
    Arc::new(whisper_rs::WhisperRsBackend::new(cfg.clone()))
}

#[cfg(test)]
mod tests {
    use super::{resolve_device, ComputeKind, Device, DeviceRequest, ModelSize};

    #[test]
    fn device_resolution_table() {
        assert_eq!(
            resolve_device(DeviceRequest::Cpu, false),
            (Device::Cpu, ComputeKind::Int8)
        );
        assert_eq!(
            resolve_device(DeviceRequest::Cpu, true),
            (Device::Cpu, ComputeKind::Int8)
        );
        assert_eq!(
            resolve_device(DeviceRequest::Gpu, false),
            (Device::Cpu, ComputeKind::Int8)
        );
        assert_eq!(
            resolve_device(DeviceRequest::Gpu, true),
            (Device::Gpu, ComputeKind::Float16)
        );
    }

    #[test]
    fn unknown_device_strings_take_cpu_path() {
        assert_eq!(DeviceRequest::parse("tpu"), DeviceRequest::Cpu);
        assert_eq!(DeviceRequest::parse(""), DeviceRequest::Cpu);
        assert_eq!(DeviceRequest::parse("GPU"), DeviceRequest::Gpu);
    }

    #[test]
    fn model_size_parsing() {
        assert_eq!(ModelSize::parse("").unwrap(), ModelSize::Tiny);
        assert_eq!(ModelSize::parse("medium").unwrap(), ModelSize::Medium);
        assert!(ModelSize::parse("huge").is_err());
    }
}
