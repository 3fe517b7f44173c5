//! Model file resolution and on-demand Hugging Face download.
//!
//! The upstream tool downloads models by size name on first use; this module
//! does the same for ggml model files, guaranteeing the returned path points
//! to a readable local file before inference starts.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;

use crate::backend::{ComputeKind, ModelSize};
use crate::config::AppConfig;
use crate::error::AppError;

const LOCK_TIMEOUT: Duration = Duration::from_secs(120);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Maps a model size and compute precision to its ggml filename.
///
/// `int8` selects the q8_0 quantization, `float16` the plain f16 conversion,
/// matching the layout of the `ggerganov/whisper.cpp` repository.
pub fn model_filename(size: ModelSize, compute: ComputeKind) -> String {
    match compute {
        ComputeKind::Int8 => format!("ggml-{}-q8_0.bin", size.as_str()),
        ComputeKind::Float16 => format!("ggml-{}.bin", size.as_str()),
    }
}

/// Ensures the model file for `(size, compute)` exists locally, downloading it
/// into the cache directory if allowed.
///
/// Blocking; callers run this on a blocking worker thread alongside inference.
pub fn ensure_model(
    cfg: &AppConfig,
    size: ModelSize,
    compute: ComputeKind,
) -> Result<PathBuf, AppError> {
    let filename = model_filename(size, compute);
    let target_path = Path::new(&cfg.cache_dir).join(&filename);

    if model_file_exists(&target_path) {
        return Ok(target_path);
    }

    if !cfg.auto_download {
        return Err(AppError::transcription(format!(
            "model file not found at {:?}; download it or enable WHISPER_AUTO_DOWNLOAD",
            target_path
        )));
    }

    fs::create_dir_all(&cfg.cache_dir).map_err(|err| {
        AppError::transcription(format!(
            "failed to create model cache directory {:?}: {err}",
            cfg.cache_dir
        ))
    })?;

    let lock_path = lock_path_for(&target_path);
    let _guard = acquire_lock(&lock_path)?;

    // Another request may have finished the download while we waited.
    if model_file_exists(&target_path) {
        return Ok(target_path);
    }

    download_model_to_path(cfg, &filename, &target_path)?;
    Ok(target_path)
}

fn model_file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn lock_path_for(target_path: &Path) -> PathBuf {
    let lock_name = format!(
        "{}.lock",
        target_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("model")
    );
    target_path.with_file_name(lock_name)
}

fn acquire_lock(path: &Path) -> Result<LockGuard, AppError> {
    let start = Instant::now();
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "pid={}", std::process::id());
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if start.elapsed() >= LOCK_TIMEOUT {
                    return Err(AppError::transcription(format!(
                        "timed out waiting for model download lock at {:?}",
                        path
                    )));
                }
                thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(err) => {
                return Err(AppError::transcription(format!(
                    "failed to acquire model download lock at {:?}: {err}",
                    path
                )));
            }
        }
    }
}

fn download_model_to_path(
    cfg: &AppConfig,
    filename: &str,
    target_path: &Path,
) -> Result<(), AppError> {
    let url = hf_resolve_url(&cfg.hf_repo, filename);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(600))
        .build()
        .map_err(|err| AppError::transcription(format!("failed to create HTTP client: {err}")))?;

    let mut request = client.get(&url);
    if let Some(token) = cfg.hf_token.as_deref() {
        request = request.bearer_auth(token);
    }

    let mut response = request.send().map_err(|err| {
        AppError::transcription(format!(
            "failed to download model from {url}: {err}; check network connectivity"
        ))
    })?;

    if !response.status().is_success() {
        return match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AppError::transcription(format!(
                    "Hugging Face rejected model download from {url} with {}; set HF_TOKEN for authenticated access",
                    response.status()
                )))
            }
            StatusCode::NOT_FOUND => Err(AppError::transcription(format!(
                "model not found at {url}; verify WHISPER_HF_REPO"
            ))),
            status => Err(AppError::transcription(format!(
                "model download failed from {url} with HTTP status {status}"
            ))),
        };
    }

    let tmp_path = target_path.with_extension("part");
    let mut out = File::create(&tmp_path).map_err(|err| {
        AppError::transcription(format!(
            "failed to create temporary model file {:?}: {err}",
            tmp_path
        ))
    })?;
    std::io::copy(&mut response, &mut out).map_err(|err| {
        AppError::transcription(format!(
            "failed writing downloaded model to {:?}: {err}",
            tmp_path
        ))
    })?;
    out.flush().map_err(|err| {
        AppError::transcription(format!(
            "failed to flush downloaded model file {:?}: {err}",
            tmp_path
        ))
    })?;

    let size = out.metadata().map(|m| m.len()).unwrap_or_default();
    if size == 0 {
        let _ = fs::remove_file(&tmp_path);
        return Err(AppError::transcription(format!(
            "downloaded empty model file from {url}; refusing to continue"
        )));
    }

    fs::rename(&tmp_path, target_path).map_err(|err| {
        AppError::transcription(format!(
            "failed to move model from {:?} to {:?}: {err}",
            tmp_path, target_path
        ))
    })?;

    Ok(())
}

fn hf_resolve_url(repo: &str, filename: &str) -> String {
    format!(
        "https://huggingface.co/{}/resolve/main/{}",
        repo.trim_matches('/'),
        filename.trim_matches('/')
    )
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
