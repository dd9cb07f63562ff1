use std::sync::Arc;

use crate::config::AppConfig;
use crate::device::DeviceShell;
use crate::webrtc::SessionManager;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Effective configuration (file plus CLI overrides)
    pub config: Arc<AppConfig>,
    /// Single-tenant WebRTC session owner
    pub sessions: SessionManager,
}

impl AppState {
    pub fn new(config: AppConfig, shell: Arc<dyn DeviceShell>) -> Arc<Self> {
        let config = Arc::new(config);
        Arc::new(Self {
            sessions: SessionManager::new(config.clone(), shell),
            config,
        })
    }
}
