use std::path::Path;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Load configuration from a JSON file
///
/// Missing keys fall back to their defaults, so a partial file is valid.
/// A missing file is an error; callers that treat the file as optional
/// should check `path` before calling.
pub async fn load_config(path: &Path) -> Result<AppConfig> {
    let raw = tokio::fs::read(path).await.map_err(|e| {
        AppError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let config: AppConfig = serde_json::from_slice(&raw).map_err(|e| {
        AppError::Config(format!("Invalid config {}: {}", path.display(), e))
    })?;

    validate(&config)?;

    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Reject values the rest of the service cannot work with
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.device.reference_width == 0 || config.device.reference_height == 0 {
        return Err(AppError::Config(
            "device reference resolution must be non-zero".to_string(),
        ));
    }
    if config.stream.fps == 0 {
        return Err(AppError::Config("stream fps must be non-zero".to_string()));
    }
    if config.webrtc.gathering_timeout_ms == 0 {
        return Err(AppError::Config(
            "webrtc gathering timeout must be non-zero".to_string(),
        ));
    }
    Ok(())
}
