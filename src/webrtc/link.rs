//! Media and control wiring of one session
//!
//! The link owns everything that must be released when a session ends: the
//! video sink, the control channel and the relay with its capture process.
//! It reacts to connectivity changes independently of the peer connection
//! so the lifecycle can be driven directly in tests.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::signaling::{advance_connection, ConnectionState};
use crate::control::ControlChannel;
use crate::device::{DeviceResolution, ProcessSpec};
use crate::video::{MediaRelay, VideoSink};

pub struct SessionLink {
    session_id: String,
    resolution: DeviceResolution,
    sink: RwLock<Option<Arc<dyn VideoSink>>>,
    control: RwLock<Option<Arc<ControlChannel>>>,
    relay: MediaRelay,
    capture: ProcessSpec,
    connection: watch::Sender<ConnectionState>,
    relay_started: AtomicBool,
    /// Set once teardown has completed
    torn_down: Mutex<bool>,
}

impl SessionLink {
    pub fn new(
        session_id: impl Into<String>,
        resolution: DeviceResolution,
        sink: Arc<dyn VideoSink>,
        control: Arc<ControlChannel>,
        relay: MediaRelay,
        capture: ProcessSpec,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::New);
        Self {
            session_id: session_id.into(),
            resolution,
            sink: RwLock::new(Some(sink)),
            control: RwLock::new(Some(control)),
            relay,
            capture,
            connection,
            relay_started: AtomicBool::new(false),
            torn_down: Mutex::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn resolution(&self) -> DeviceResolution {
        self.resolution
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Current control channel, `None` after teardown
    pub fn control(&self) -> Option<Arc<ControlChannel>> {
        self.control.read().clone()
    }

    pub async fn relay_active(&self) -> bool {
        self.relay.is_active().await
    }

    pub fn frames_sent(&self) -> u64 {
        self.relay.frames_sent()
    }

    /// Apply a connectivity change
    ///
    /// The first `Connected` starts the relay. Terminal states tear the
    /// link down. Returns the new state when the transition was applied.
    pub async fn on_connectivity(&self, state: ConnectionState) -> Option<ConnectionState> {
        if !advance_connection(&self.connection, state) {
            return None;
        }
        info!("Session {} connectivity: {}", self.session_id, state);

        if state == ConnectionState::Connected {
            self.start_relay().await;
        } else if state.is_terminal() {
            self.teardown().await;
        }
        Some(state)
    }

    async fn start_relay(&self) {
        // Hold the teardown lock so a concurrent teardown cannot miss the run
        let torn_down = self.torn_down.lock().await;
        if *torn_down || self.relay_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(sink) = self.sink.read().clone() else {
            return;
        };

        match self.relay.start(sink, &self.capture).await {
            Ok(true) => {}
            Ok(false) => debug!("Session {} relay already active", self.session_id),
            Err(e) => warn!("Session {} failed to start capture: {}", self.session_id, e),
        }
    }

    /// Stop the relay, reap its process and release sink and channel
    ///
    /// Safe to call repeatedly and concurrently; later callers wait for the
    /// first teardown to finish.
    pub async fn teardown(&self) {
        let mut torn_down = self.torn_down.lock().await;
        if *torn_down {
            return;
        }

        let sink = self.sink.write().take();
        if let Some(ref sink) = sink {
            sink.release();
        }

        self.relay.stop().await;

        if let Some(control) = self.control.write().take() {
            control.close();
        }

        advance_connection(&self.connection, ConnectionState::Closed);
        *torn_down = true;
        info!("Session {} torn down", self.session_id);
    }

    pub async fn is_torn_down(&self) -> bool {
        *self.torn_down.lock().await
    }
}
