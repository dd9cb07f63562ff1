//! Media relay
//!
//! Runs one capture process per relay run, frames its stdout into NAL units
//! and writes them to the session's video sink. The process is killed and
//! reaped on every exit path before the run reports back.

use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::MediaFrame;
use super::nal::NalFramer;
use super::sink::VideoSink;
use crate::device::ProcessSpec;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;

/// Sample duration under `asap` pacing
const ASAP_SAMPLE_DURATION: Duration = Duration::from_millis(1);

/// Upper bound for a realtime sample duration
const MAX_SAMPLE_DURATION: Duration = Duration::from_secs(1);

/// Frames between progress log lines
const LOG_EVERY_FRAMES: u64 = 100;

/// How sample durations are assigned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePacing {
    /// Fixed 1 ms per sample; the browser renders on arrival
    #[default]
    Asap,
    /// Wall time since the previous sample
    Realtime,
}

/// Per-run sample duration generator
#[derive(Debug)]
struct Pacer {
    pacing: FramePacing,
    nominal: Duration,
    last: Option<Instant>,
}

impl Pacer {
    fn new(pacing: FramePacing, fps: u32) -> Self {
        Self {
            pacing,
            nominal: Duration::from_secs(1) / fps.max(1),
            last: None,
        }
    }

    fn next_duration(&mut self) -> Duration {
        match self.pacing {
            FramePacing::Asap => ASAP_SAMPLE_DURATION,
            FramePacing::Realtime => {
                let now = Instant::now();
                let duration = match self.last {
                    Some(last) => now.duration_since(last).min(MAX_SAMPLE_DURATION),
                    None => self.nominal,
                };
                self.last = Some(now);
                duration
            }
        }
    }
}

/// Why a relay run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayExit {
    /// The sink went away
    SinkClosed,
    /// The capture process closed stdout (normal exit or crash)
    StreamEnded,
    /// Corrupt or unreadable byte stream
    FramingError,
    /// Stopped by the owner
    Cancelled,
}

/// Outcome of one relay run
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub frames_sent: u64,
    pub exit: RelayExit,
    /// Exit code of the capture process, `None` if killed by a signal
    pub exit_code: Option<i32>,
}

/// Capture process bound to one relay run
struct CaptureProcess {
    child: Child,
    label: String,
}

impl CaptureProcess {
    fn spawn(spec: &ProcessSpec) -> Result<(Self, ChildStdout)> {
        let mut child = spec
            .command()
            .spawn()
            .map_err(|e| AppError::Capture(format!("failed to start {}: {}", spec.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Capture("capture stdout is not piped".to_string()))?;

        Ok((
            Self {
                child,
                label: spec.program.clone(),
            },
            stdout,
        ))
    }

    /// Kill the process and wait for it to exit
    async fn shutdown(mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.start_kill() {
            debug!("Capture process {} kill: {}", self.label, e);
        }
        match self.child.wait().await {
            Ok(status) => {
                debug!("Capture process {} reaped: {}", self.label, status);
                Some(status)
            }
            Err(e) => {
                warn!("Failed to reap capture process {}: {}", self.label, e);
                None
            }
        }
    }
}

/// Relay `stdout` to `sink` until the run ends, then reap `process`
async fn relay_loop(
    process: CaptureProcess,
    stdout: ChildStdout,
    sink: Arc<dyn VideoSink>,
    pacing: FramePacing,
    fps: u32,
    counter: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> RelayReport {
    let mut framer = NalFramer::new(stdout);
    let mut pacer = Pacer::new(pacing, fps);
    let throttler = LogThrottler::with_secs(5);
    let mut frames_sent = 0u64;

    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayExit::Cancelled,
            next = framer.next_frame() => next,
        };

        let data = match next {
            Ok(Some(data)) => data,
            Ok(None) => break RelayExit::StreamEnded,
            Err(e) => {
                warn!("Capture stream framing stopped: {}", e);
                break RelayExit::FramingError;
            }
        };

        if !sink.is_available() {
            break RelayExit::SinkClosed;
        }

        let frame = MediaFrame::new(data, pacer.next_duration());
        if let Err(e) = sink.write_frame(&frame).await {
            if !sink.is_available() {
                break RelayExit::SinkClosed;
            }
            if throttler.should_log("sample_write") {
                warn!("Failed to write video sample: {}", e);
            }
            continue;
        }

        frames_sent += 1;
        counter.fetch_add(1, Ordering::Relaxed);
        if frames_sent % LOG_EVERY_FRAMES == 0 {
            debug!("Relayed {} frames", frames_sent);
        }
    };

    let status = process.shutdown().await;
    info!(
        "Capture stopped after {} frames ({:?}, process status {:?})",
        frames_sent, exit, status
    );

    RelayReport {
        frames_sent,
        exit,
        exit_code: status.and_then(|s| s.code()),
    }
}

struct RelayRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the relay runs of one session
pub struct MediaRelay {
    session_id: String,
    pacing: FramePacing,
    fps: u32,
    run: Mutex<Option<RelayRun>>,
    frames: Arc<AtomicU64>,
}

impl MediaRelay {
    pub fn new(session_id: impl Into<String>, pacing: FramePacing, fps: u32) -> Self {
        Self {
            session_id: session_id.into(),
            pacing,
            fps,
            run: Mutex::new(None),
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a run writing to `sink`
    ///
    /// Returns `Ok(false)` without spawning anything when a run is still
    /// active. A spawn failure is returned as [`AppError::Capture`].
    pub async fn start(&self, sink: Arc<dyn VideoSink>, spec: &ProcessSpec) -> Result<bool> {
        let mut slot = self.run.lock().await;
        if slot.as_ref().is_some_and(|run| !run.handle.is_finished()) {
            debug!("Session {} relay already running, start ignored", self.session_id);
            return Ok(false);
        }

        let (process, stdout) = CaptureProcess::spawn(spec)?;
        info!("Session {} capture started: {}", self.session_id, spec);

        let cancel = CancellationToken::new();
        let session_id = self.session_id.clone();
        let handle = tokio::spawn(relay_loop(
            process,
            stdout,
            sink,
            self.pacing,
            self.fps,
            self.frames.clone(),
            cancel.clone(),
        ));
        let handle = tokio::spawn(async move {
            match handle.await {
                Ok(report) => debug!("Session {} relay run ended: {:?}", session_id, report),
                Err(e) => warn!("Session {} relay task failed: {}", session_id, e),
            }
        });

        *slot = Some(RelayRun { cancel, handle });
        Ok(true)
    }

    /// Cancel the current run and wait until its process is reaped
    pub async fn stop(&self) {
        let run = self.run.lock().await.take();
        if let Some(run) = run {
            run.cancel.cancel();
            if let Err(e) = run.handle.await {
                warn!("Session {} relay task join failed: {}", self.session_id, e);
            }
            debug!("Session {} relay stopped", self.session_id);
        }
    }

    pub async fn is_active(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Frames written across all runs of this relay
    pub fn frames_sent(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::sink::testing::CollectingSink;

    /// SPS + PPS + IDR header bytes, three complete units once stdout closes
    const THREE_UNITS: &str = r"\000\000\000\001\147\102\000\000\001\150\316\000\000\001\145\210";

    /// One run to completion on the calling task
    async fn run_capture(
        sink: Arc<dyn VideoSink>,
        spec: &ProcessSpec,
        pacing: FramePacing,
        fps: u32,
        cancel: CancellationToken,
    ) -> Result<RelayReport> {
        let (process, stdout) = CaptureProcess::spawn(spec)?;
        Ok(relay_loop(process, stdout, sink, pacing, fps, Arc::new(AtomicU64::new(0)), cancel).await)
    }

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_stream_ends_with_process() {
        let sink = Arc::new(CollectingSink::new());
        let report = run_capture(
            sink.clone(),
            &sh(&format!("printf '{}'", THREE_UNITS)),
            FramePacing::Asap,
            30,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.exit, RelayExit::StreamEnded);
        assert_eq!(report.frames_sent, 3);
        assert_eq!(report.exit_code, Some(0));

        let frames = sink.frames.lock();
        assert_eq!(frames[0].data.as_ref(), &[0x67, 0x42]);
        assert_eq!(frames[1].data.as_ref(), &[0x68, 0xce]);
        assert_eq!(frames[2].data.as_ref(), &[0x65, 0x88]);
        assert!(frames.iter().all(|f| f.duration == ASAP_SAMPLE_DURATION));
    }

    #[tokio::test]
    async fn test_crash_ends_run_without_restart() {
        let sink = Arc::new(CollectingSink::new());
        let report = run_capture(
            sink.clone(),
            &sh(&format!("printf '{}'; exit 3", THREE_UNITS)),
            FramePacing::Asap,
            30,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.exit, RelayExit::StreamEnded);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(sink.frame_count(), 3);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let sink = Arc::new(CollectingSink::new());
        let result = run_capture(
            sink,
            &ProcessSpec::new("/nonexistent/droidlink-capture", vec![]),
            FramePacing::Asap,
            30,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Capture(_))));
    }

    #[tokio::test]
    async fn test_sink_loss_kills_process() {
        let sink = Arc::new(CollectingSink::releasing_after(1));
        let report = tokio::time::timeout(
            Duration::from_secs(10),
            run_capture(
                sink.clone(),
                &sh(&format!("printf '{}'; exec sleep 30", THREE_UNITS)),
                FramePacing::Asap,
                30,
                CancellationToken::new(),
            ),
        )
        .await
        .expect("relay did not stop on sink loss")
        .unwrap();

        assert_eq!(report.exit, RelayExit::SinkClosed);
        assert_eq!(report.frames_sent, 1);
        assert_eq!(report.exit_code, None);
    }

    #[tokio::test]
    async fn test_start_once_and_stop() {
        let relay = MediaRelay::new("test", FramePacing::Asap, 30);
        let sink: Arc<dyn VideoSink> = Arc::new(CollectingSink::new());
        let spec = sh("exec sleep 30");

        assert!(relay.start(sink.clone(), &spec).await.unwrap());
        assert!(relay.is_active().await);
        assert!(!relay.start(sink.clone(), &spec).await.unwrap());

        tokio::time::timeout(Duration::from_secs(10), relay.stop())
            .await
            .expect("stop did not reap the process");
        assert!(!relay.is_active().await);

        // Second stop is a no-op
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_relay_counts_frames() {
        let relay = MediaRelay::new("test", FramePacing::Asap, 30);
        let sink = Arc::new(CollectingSink::new());

        assert!(relay
            .start(sink.clone(), &sh(&format!("printf '{}'", THREE_UNITS)))
            .await
            .unwrap());

        tokio::time::timeout(Duration::from_secs(10), async {
            while relay.is_active().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(relay.frames_sent(), 3);
        assert_eq!(sink.frame_count(), 3);
    }

    #[test]
    fn test_realtime_pacing() {
        let mut pacer = Pacer::new(FramePacing::Realtime, 20);
        assert_eq!(pacer.next_duration(), Duration::from_millis(50));
        assert!(pacer.next_duration() <= MAX_SAMPLE_DURATION);

        let mut pacer = Pacer::new(FramePacing::Asap, 20);
        assert_eq!(pacer.next_duration(), ASAP_SAMPLE_DURATION);
        assert_eq!(pacer.next_duration(), ASAP_SAMPLE_DURATION);
    }

    #[test]
    fn test_pacing_serde() {
        assert_eq!(
            serde_json::from_str::<FramePacing>("\"realtime\"").unwrap(),
            FramePacing::Realtime
        );
        assert_eq!(serde_json::to_string(&FramePacing::Asap).unwrap(), "\"asap\"");
    }
}
