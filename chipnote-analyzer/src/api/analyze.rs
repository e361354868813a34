//! Upload submission
//!
//! POST /analyze accepts a multipart form with a `file` field and an
//! optional `bpm_hint`. The upload is validated, staged to disk, and handed
//! to the pipeline; the response carries the new job id immediately.

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use chipnote_common::{JobId, JobStatus};
use serde::Serialize;
use std::io::Write;
use tempfile::TempPath;
use tracing::info;

use crate::config::{extension_of, UploadConfig};
use crate::error::{ApiError, ApiResult};
use crate::services::StagedUpload;
use crate::AppState;

/// Accepted `bpm_hint` range
pub const MIN_BPM_HINT: u32 = 20;
pub const MAX_BPM_HINT: u32 = 300;

/// POST /analyze response
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub job_id: JobId,
    pub message: String,
    pub status: JobStatus,
}

/// POST /analyze
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<AnalyzeResponse>> {
    let upload_config = &state.config.upload;
    let mut upload: Option<(String, Bytes)> = None;
    let mut bpm_hint_field: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read uploaded file: {e}"))
                })?;
                upload = Some((filename, data));
            }
            Some("bpm_hint") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read bpm_hint: {e}")))?;
                bpm_hint_field = Some(text);
            }
            _ => {}
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    validate_upload(upload_config, &filename, data.len())?;
    let bpm_hint = parse_bpm_hint(
        bpm_hint_field.as_deref(),
        state.config.analysis.default_bpm_hint,
    )?;

    let file_size = data.len() as u64;
    let staged = stage_upload(upload_config, &filename, data).await?;
    let job_id = state.pipeline.submit(staged, filename.clone(), file_size, bpm_hint);

    info!(job_id = %job_id, filename = %filename, file_size, bpm_hint, "Upload accepted");

    Ok(Json(AnalyzeResponse {
        job_id,
        message: "Analysis starting...".to_string(),
        status: JobStatus::Starting,
    }))
}

/// Reject uploads the pipeline should never see
pub fn validate_upload(config: &UploadConfig, filename: &str, size: usize) -> ApiResult<()> {
    if filename.trim().is_empty() {
        return Err(ApiError::BadRequest("No file selected".into()));
    }
    if !config.is_allowed(filename) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported file type. Allowed: {}",
            config.allowed_extensions.join(", ")
        )));
    }
    if size == 0 {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }
    if size > config.max_file_size_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "{} bytes exceeds the {} byte limit",
            size, config.max_file_size_bytes
        )));
    }
    Ok(())
}

/// Parse the optional tempo hint; blank means the default
pub fn parse_bpm_hint(raw: Option<&str>, default: u32) -> ApiResult<u32> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    let bpm: u32 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("bpm_hint must be an integer, got '{raw}'")))?;
    if !(MIN_BPM_HINT..=MAX_BPM_HINT).contains(&bpm) {
        return Err(ApiError::BadRequest(format!(
            "bpm_hint must be between {MIN_BPM_HINT} and {MAX_BPM_HINT}, got {bpm}"
        )));
    }
    Ok(bpm)
}

/// Write the upload to the staging dir, keeping its extension for decoding
async fn stage_upload(config: &UploadConfig, filename: &str, data: Bytes) -> ApiResult<StagedUpload> {
    let dir = config.staging_dir();
    let suffix = extension_of(filename)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let temp = tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
        std::fs::create_dir_all(&dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("chipnote-upload-")
            .suffix(&suffix)
            .tempfile_in(&dir)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(file.into_temp_path())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Staging task failed: {e}")))??;

    Ok(StagedUpload::temporary(temp))
}

/// Build submission routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_hint_parsing() {
        assert_eq!(parse_bpm_hint(None, 120).unwrap(), 120);
        assert_eq!(parse_bpm_hint(Some("  "), 120).unwrap(), 120);
        assert_eq!(parse_bpm_hint(Some("95"), 120).unwrap(), 95);
        assert!(parse_bpm_hint(Some("fast"), 120).is_err());
        assert!(parse_bpm_hint(Some("-5"), 120).is_err());
        assert!(parse_bpm_hint(Some("1000"), 120).is_err());
    }

    #[test]
    fn test_upload_validation() {
        let config = UploadConfig::default();
        assert!(validate_upload(&config, "song.wav", 1000).is_ok());
        assert!(matches!(
            validate_upload(&config, "", 1000),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            validate_upload(&config, "song.exe", 1000),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            validate_upload(&config, "song.wav", 0),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            validate_upload(&config, "song.wav", config.max_file_size_bytes + 1),
            Err(ApiError::PayloadTooLarge(_))
        ));
    }
}
