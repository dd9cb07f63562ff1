//! WebRTC session negotiation and lifecycle
//!
//! One [`Session`] per accepted offer; [`SessionManager`] keeps at most one
//! alive and serializes negotiations.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use super::config::WebRtcConfig;
use super::link::SessionLink;
use super::mdns::{default_mdns_host_name, mdns_mode, mdns_mode_label};
use super::signaling::{
    advance_signaling, ConnectionState, SdpType, SessionDescription, SignalingState,
};
use crate::config::AppConfig;
use crate::control::ControlChannel;
use crate::device::{probe_resolution, DeviceResolution, DeviceShell, ResolutionScale};
use crate::error::{AppError, Result};
use crate::video::{MediaRelay, TrackSink, VideoSink};

/// Snapshot of the current session for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub signaling: SignalingState,
    pub connection: ConnectionState,
    pub resolution: DeviceResolution,
    pub candidates: usize,
    pub relay_active: bool,
    pub frames_sent: u64,
}

fn build_api(config: &WebRtcConfig, session_id: &str) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::Negotiation(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::Negotiation(format!("Failed to register interceptors: {}", e)))?;

    let mut setting_engine = SettingEngine::default();
    let mode = mdns_mode(config.mdns_mode.as_deref());
    setting_engine.set_ice_multicast_dns_mode(mode);
    if mode == MulticastDnsMode::QueryAndGather {
        setting_engine.set_multicast_dns_host_name(default_mdns_host_name(session_id));
    }
    debug!("Session {} mDNS mode: {}", session_id, mdns_mode_label(mode));

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// One negotiated peer with its media and control wiring
pub struct Session {
    session_id: String,
    created_at: DateTime<Utc>,
    pc: Arc<RTCPeerConnection>,
    link: Arc<SessionLink>,
    signaling: watch::Sender<SignalingState>,
    candidates: Arc<AtomicUsize>,
    gathering_timeout: Duration,
}

impl Session {
    /// Create the peer connection, video track and control handler
    pub async fn create(
        config: &AppConfig,
        shell: Arc<dyn DeviceShell>,
        resolution: DeviceResolution,
    ) -> Result<Arc<Self>> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let api = build_api(&config.webrtc, &session_id)?;

        let ice_servers = config
            .webrtc
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create peer connection: {}", e)))?,
        );

        let sink = Arc::new(TrackSink::h264(&config.webrtc.track_id, &config.webrtc.stream_id));
        let rtp_sender = match pc
            .add_track(sink.track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    debug!("Peer close after failed add_track: {}", close_err);
                }
                return Err(AppError::Negotiation(format!("Failed to add video track: {}", e)));
            }
        };

        // RTCP must be drained for the interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let scale = ResolutionScale::new(
            config.device.reference_width,
            config.device.reference_height,
            resolution,
        );
        let control = Arc::new(ControlChannel::new(
            shell.clone(),
            scale,
            config.control.dispatch,
            config.control.default_swipe_ms,
        ));
        let relay = MediaRelay::new(session_id.clone(), config.stream.pacing, config.stream.fps);
        let capture = config.stream.capture.to_spec(shell.as_ref());
        debug!("Session {} capture command: {}", session_id, capture);

        let link = Arc::new(SessionLink::new(
            session_id.clone(),
            resolution,
            sink as Arc<dyn VideoSink>,
            control,
            relay,
            capture,
        ));

        let (signaling, _) = watch::channel(SignalingState::Idle);
        let session = Arc::new(Self {
            session_id,
            created_at: Utc::now(),
            pc,
            link,
            signaling,
            candidates: Arc::new(AtomicUsize::new(0)),
            gathering_timeout: Duration::from_millis(config.webrtc.gathering_timeout_ms),
        });
        session.setup_event_handlers();

        info!(
            "Session {} created (device {}x{}, scale {:.3}x{:.3})",
            session.session_id,
            resolution.width,
            resolution.height,
            scale.scale_x(),
            scale.scale_y()
        );
        Ok(session)
    }

    fn setup_event_handlers(&self) {
        // Callbacks hold the peer weakly so it can be dropped after close
        let pc_weak: Weak<RTCPeerConnection> = Arc::downgrade(&self.pc);
        let link = self.link.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let link = link.clone();
                let pc_weak = pc_weak.clone();

                Box::pin(async move {
                    let Some(state) = ConnectionState::from_ice(state) else {
                        return;
                    };
                    if let Some(applied) = link.on_connectivity(state).await {
                        if applied.is_terminal() {
                            if let Some(pc) = pc_weak.upgrade() {
                                // Closing from inside the callback would wait on ourselves
                                tokio::spawn(async move {
                                    if let Err(e) = pc.close().await {
                                        debug!("Peer close failed: {}", e);
                                    }
                                });
                            }
                        }
                    }
                })
            }));

        let candidates = self.candidates.clone();
        let session_id = self.session_id.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidates = candidates.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    match candidate {
                        Some(c) => {
                            candidates.fetch_add(1, Ordering::Relaxed);
                            debug!("Session {} ICE candidate: {}", session_id, c);
                        }
                        None => debug!("Session {} candidate gathering complete", session_id),
                    }
                })
            }));

        let link = self.link.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let link = link.clone();

                Box::pin(async move {
                    info!(
                        "Session {} data channel opened: {}",
                        link.session_id(),
                        dc.label()
                    );

                    dc.on_message(Box::new(move |msg: DataChannelMessage| {
                        if let Some(control) = link.control() {
                            control.on_message(&msg.data);
                        }
                        Box::pin(async {})
                    }));
                })
            }));
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn link(&self) -> &Arc<SessionLink> {
        &self.link
    }

    pub fn signaling_state(&self) -> SignalingState {
        *self.signaling.borrow()
    }

    /// Apply the offer and return an answer carrying every gathered candidate
    pub async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription> {
        advance_signaling(&self.signaling, SignalingState::Negotiating);

        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP offer: {}", e)))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;

        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;
        advance_signaling(&self.signaling, SignalingState::GatheringCandidates);

        tokio::time::timeout(self.gathering_timeout, gathering_complete.recv())
            .await
            .map_err(|_| {
                AppError::Negotiation(format!(
                    "Candidate gathering timed out after {:?}",
                    self.gathering_timeout
                ))
            })?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Negotiation("No local description after gathering".into()))?;

        advance_signaling(&self.signaling, SignalingState::Answered);
        info!(
            "Session {} answered with {} candidates",
            self.session_id,
            self.candidates.load(Ordering::Relaxed)
        );

        Ok(SessionDescription::answer(local.sdp))
    }

    /// Tear down media and control, then close the peer
    pub async fn close(&self) {
        self.link.teardown().await;
        if let Err(e) = self.pc.close().await {
            debug!("Session {} peer close: {}", self.session_id, e);
        }
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            signaling: self.signaling_state(),
            connection: self.link.connection_state(),
            resolution: self.link.resolution(),
            candidates: self.candidates.load(Ordering::Relaxed),
            relay_active: self.link.relay_active().await,
            frames_sent: self.link.frames_sent(),
        }
    }
}

/// Closes a session whose negotiation future was dropped before finishing
///
/// Dropped while the negotiation lock is still held, so `current` holds
/// this session.
struct PendingSession<'a> {
    current: &'a ArcSwapOption<Session>,
    session: Option<Arc<Session>>,
}

impl<'a> PendingSession<'a> {
    fn new(current: &'a ArcSwapOption<Session>, session: Arc<Session>) -> Self {
        Self {
            current,
            session: Some(session),
        }
    }

    fn disarm(&mut self) {
        self.session = None;
    }
}

impl Drop for PendingSession<'_> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        warn!("Session {} negotiation cancelled", session.session_id());
        self.current.store(None);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { session.close().await });
            }
            Err(_) => warn!("No runtime to close session {}", session.session_id()),
        }
    }
}

/// Single-tenant session owner
pub struct SessionManager {
    config: Arc<AppConfig>,
    shell: Arc<dyn DeviceShell>,
    /// Held across the whole offer to answer path
    negotiation: Mutex<()>,
    current: ArcSwapOption<Session>,
}

impl SessionManager {
    pub fn new(config: Arc<AppConfig>, shell: Arc<dyn DeviceShell>) -> Self {
        Self {
            config,
            shell,
            negotiation: Mutex::new(()),
            current: ArcSwapOption::empty(),
        }
    }

    /// Negotiate a new session from `offer`
    ///
    /// An existing session is torn down first. On failure the new session
    /// is torn down and no session remains.
    pub async fn handle_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.sdp_type != SdpType::Offer {
            return Err(AppError::BadRequest(format!(
                "expected an offer, got {:?}",
                offer.sdp_type
            )));
        }

        let _negotiation = self.negotiation.lock().await;

        if let Some(previous) = self.current.swap(None) {
            info!("Replacing session {}", previous.session_id());
            previous.close().await;
        }

        let resolution = probe_resolution(self.shell.as_ref()).await;
        let session = Session::create(&self.config, self.shell.clone(), resolution).await?;
        self.current.store(Some(session.clone()));
        let mut pending = PendingSession::new(&self.current, session.clone());

        match session.negotiate(offer).await {
            Ok(answer) => {
                pending.disarm();
                Ok(answer)
            }
            Err(e) => {
                warn!("Session {} negotiation failed: {}", session.session_id(), e);
                pending.disarm();
                self.current.store(None);
                session.close().await;
                Err(e)
            }
        }
    }

    /// Current session, live or closed
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    pub async fn status(&self) -> Option<SessionStatus> {
        match self.current.load_full() {
            Some(session) => Some(session.status().await),
            None => None,
        }
    }

    /// Close the current session and wait for its capture process
    pub async fn shutdown(&self) {
        let _negotiation = self.negotiation.lock().await;
        if let Some(session) = self.current.swap(None) {
            info!("Closing session {} on shutdown", session.session_id());
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::RecordingShell;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    fn test_config() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        // No STUN so gathering finishes on host candidates alone
        config.webrtc.stun_servers.clear();
        config.webrtc.mdns_mode = Some("disabled".into());
        Arc::new(config)
    }

    /// Browser-like offer: receive-only video plus a control data channel
    async fn client_offer() -> (Arc<RTCPeerConnection>, SessionDescription) {
        let api = build_api(&test_config().webrtc, "client").unwrap();
        let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await.unwrap());
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .unwrap();
        pc.create_data_channel("control", None).await.unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        pc.set_local_description(offer.clone()).await.unwrap();
        (
            pc,
            SessionDescription {
                sdp_type: SdpType::Offer,
                sdp: offer.sdp,
            },
        )
    }

    #[tokio::test]
    async fn test_offer_is_answered_after_gathering() {
        let manager = SessionManager::new(test_config(), Arc::new(RecordingShell::new()));
        let (client, offer) = client_offer().await;

        let answer = manager.handle_offer(offer).await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert!(answer.sdp.starts_with("v=0"));
        assert!(answer.sdp.contains("m=video"));
        assert!(answer.sdp.contains("a=candidate"));

        let status = manager.status().await.unwrap();
        assert_eq!(status.signaling, SignalingState::Answered);
        assert!(!status.relay_active);
        // RecordingShell answers `wm size` with nothing, so the fallback applies
        assert_eq!((status.resolution.width, status.resolution.height), (1080, 1920));

        manager.shutdown().await;
        assert!(manager.status().await.is_none());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_offer_replaces_session() {
        let manager = SessionManager::new(test_config(), Arc::new(RecordingShell::new()));

        let (client_a, offer_a) = client_offer().await;
        manager.handle_offer(offer_a).await.unwrap();
        let first = manager.current().unwrap();

        let (client_b, offer_b) = client_offer().await;
        manager.handle_offer(offer_b).await.unwrap();
        let second = manager.current().unwrap();

        assert_ne!(first.session_id(), second.session_id());
        assert!(first.link().is_torn_down().await);
        assert!(!second.link().is_torn_down().await);

        manager.shutdown().await;
        client_a.close().await.unwrap();
        client_b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_negotiation_closes_session() {
        let mut config = (*test_config()).clone();
        // Unroutable STUN server keeps gathering busy
        config.webrtc.stun_servers = vec!["stun:10.255.255.1:3478".into()];
        let manager = SessionManager::new(Arc::new(config), Arc::new(RecordingShell::new()));
        let (client, offer) = client_offer().await;

        let session = {
            let negotiation = manager.handle_offer(offer);
            tokio::pin!(negotiation);
            let pending = tokio::time::timeout(Duration::from_millis(300), &mut negotiation).await;
            assert!(pending.is_err(), "gathering finished before the timeout");
            manager.current().expect("session published during gathering")
        };

        assert!(manager.current().is_none());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !session.link().is_torn_down().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cancelled session was not torn down");

        // The negotiation lock went with the dropped future
        assert!(manager.negotiation.try_lock().is_ok());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_offer_rejected() {
        let manager = SessionManager::new(test_config(), Arc::new(RecordingShell::new()));
        let err = manager
            .handle_offer(SessionDescription::answer("v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_invalid_sdp_leaves_no_session() {
        let manager = SessionManager::new(test_config(), Arc::new(RecordingShell::new()));
        let err = manager
            .handle_offer(SessionDescription {
                sdp_type: SdpType::Offer,
                sdp: "definitely not sdp".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Negotiation(_)));
        assert!(manager.current().is_none());
    }
}
