//! `whisper-rs` backend implementation.
//!
//! Models are resolved and loaded on demand per `(size, precision)` pair and
//! kept in memory afterwards; inference runs on blocking worker threads.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task;
use tracing::info;
use whisper_rs::{
    get_lang_str, FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
};

use crate::audio::decode_to_mono_16khz_f32;
use crate::backend::{
    ComputeKind, Device, ModelSize, TranscribeRequest, Transcriber, TranscriptResult,
    TranscriptSegment, BEAM_SIZE,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::model_store;

type ContextKey = (ModelSize, ComputeKind);
type ContextMap = HashMap<ContextKey, Arc<Mutex<WhisperContext>>>;

/// Local inference backend powered by `whisper-rs`.
pub struct WhisperRsBackend {
    cfg: AppConfig,
    contexts: Arc<Mutex<ContextMap>>,
}

impl WhisperRsBackend {
    /// Creates the backend; model weights load lazily on first use.
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            cfg,
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperRsBackend {
    fn gpu_available(&self) -> bool {
        gpu_runtime_present()
    }

    async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscriptResult, AppError> {
        let cfg = self.cfg.clone();
        let contexts = Arc::clone(&self.contexts);
        task::spawn_blocking(move || run_whisper_rs(req, &cfg, &contexts))
            .await
            .map_err(|err| AppError::transcription(format!("whisper worker task failed: {err}")))?
    }
}

/// Compile-time GPU runtime detection: CUDA when built with the `cuda`
/// feature, Metal on macOS builds with the `metal` feature.
fn gpu_runtime_present() -> bool {
    if cfg!(feature = "cuda") {
        return true;
    }
    cfg!(all(feature = "metal", target_os = "macos"))
}

fn run_whisper_rs(
    req: TranscribeRequest,
    cfg: &AppConfig,
    contexts: &Mutex<ContextMap>,
) -> Result<TranscriptResult, AppError> {
    let model_path = model_store::ensure_model(cfg, req.model, req.compute)?;
    let context = load_or_reuse_context(contexts, &model_path, &req)?;
    let samples = decode_to_mono_16khz_f32(&req.audio_path)?;

    let context_guard = context
        .lock()
        .map_err(|_| AppError::transcription("failed to lock whisper model context"))?;

    let mut state = context_guard
        .create_state()
        .map_err(|err| AppError::transcription(format!("failed to create whisper state: {err}")))?;

    let mut params = FullParams::new(SamplingStrategy::BeamSearch {
        beam_size: BEAM_SIZE,
        patience: 1.0,
    });
    params.set_no_timestamps(false);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_detect_language(true);

    state.full(params, &samples).map_err(|err| {
        AppError::transcription(format!(
            "whisper inference failed using {:?}: {err}",
            model_path
        ))
    })?;

    let segments = extract_segments(&state)?;

    let detected = get_lang_str(state.full_lang_id_from_state()).map(ToOwned::to_owned);
    // whisper.cpp reports the winning language id without its softmax score,
    // so the confidence collapses to detected-or-not.
    let (language, language_probability) = match detected {
        Some(code) => (code, 1.0),
        None => ("unknown".to_string(), 0.0),
    };

    info!(
        model = req.model.as_str(),
        device = req.device.as_str(),
        compute = req.compute.as_str(),
        language = %language,
        segment_count = segments.len(),
        "transcription finished"
    );

    Ok(TranscriptResult {
        segments,
        language,
        language_probability,
    })
}

fn load_or_reuse_context(
    contexts: &Mutex<ContextMap>,
    model_path: &Path,
    req: &TranscribeRequest,
) -> Result<Arc<Mutex<WhisperContext>>, AppError> {
    let key = (req.model, req.compute);

    let mut map = contexts
        .lock()
        .map_err(|_| AppError::transcription("failed to lock whisper context cache"))?;
    if let Some(existing) = map.get(&key) {
        return Ok(Arc::clone(existing));
    }

    let mut params = WhisperContextParameters::default();
    params.use_gpu(req.device == Device::Gpu);

    let path_str = model_path.to_string_lossy();
    let context = WhisperContext::new_with_params(&path_str, params).map_err(|err| {
        AppError::transcription(format!(
            "failed to load model at {:?} on device={}: {err}",
            model_path,
            req.device.as_str()
        ))
    })?;

    info!(
        model = req.model.as_str(),
        compute = req.compute.as_str(),
        device = req.device.as_str(),
        path = %path_str,
        "loaded whisper model"
    );

    let context = Arc::new(Mutex::new(context));
    map.insert(key, Arc::clone(&context));
    Ok(context)
}

fn extract_segments(
    state: &whisper_rs::WhisperState,
) -> Result<Vec<TranscriptSegment>, AppError> {
    let count = state.full_n_segments();
    let mut segments = Vec::with_capacity(count as usize);
    for i in 0..count {
        let Some(seg) = state.get_segment(i) else {
            continue;
        };
        let text = seg
            .to_str_lossy()
            .map_err(|err| {
                AppError::transcription(format!("failed to read segment text: {err}"))
            })?
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }

        segments.push(TranscriptSegment {
            start_secs: (seg.start_timestamp() as f64) * 0.01,
            end_secs: (seg.end_timestamp() as f64) * 0.01,
            text,
        });
    }

    Ok(segments)
}
