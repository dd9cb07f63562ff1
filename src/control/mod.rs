//! Control channel
//!
//! Decodes data channel messages into [`InputCommand`]s and runs them on the
//! device with the session's resolution scale. Ingestion never waits for a
//! device command to finish.

pub mod executor;
pub mod types;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::{DeviceShell, ResolutionScale};
use crate::utils::{now_millis, LogThrottler};

pub use executor::{device_args, execute};
pub use types::{InputCommand, InputMessage, KeyCode};

/// Commands a session may have waiting or running before new ones are dropped
pub const CONTROL_QUEUE_CAPACITY: usize = 64;

/// How decoded commands are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    /// One queue per session, commands run in arrival order
    #[default]
    Ordered,
    /// One task per command, no ordering guarantee
    Concurrent,
}

struct Executor {
    shell: Arc<dyn DeviceShell>,
    scale: ResolutionScale,
    default_swipe_ms: u32,
}

impl Executor {
    async fn run(&self, command: InputCommand) {
        execute(self.shell.as_ref(), &command, &self.scale, self.default_swipe_ms).await;
    }
}

/// Per-session control channel handler
pub struct ControlChannel {
    executor: Arc<Executor>,
    policy: DispatchPolicy,
    queue: Mutex<Option<mpsc::Sender<InputCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// In-flight limit for the concurrent policy
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    throttler: LogThrottler,
}

impl ControlChannel {
    /// Create a channel; under [`DispatchPolicy::Ordered`] this spawns the
    /// queue worker and must be called inside a tokio runtime.
    pub fn new(
        shell: Arc<dyn DeviceShell>,
        scale: ResolutionScale,
        policy: DispatchPolicy,
        default_swipe_ms: u32,
    ) -> Self {
        let executor = Arc::new(Executor {
            shell,
            scale,
            default_swipe_ms,
        });

        let (queue, worker) = match policy {
            DispatchPolicy::Ordered => {
                let (tx, mut rx) = mpsc::channel::<InputCommand>(CONTROL_QUEUE_CAPACITY);
                let executor = executor.clone();
                let worker = tokio::spawn(async move {
                    while let Some(command) = rx.recv().await {
                        executor.run(command).await;
                    }
                    debug!("Control queue worker stopped");
                });
                (Some(tx), Some(worker))
            }
            DispatchPolicy::Concurrent => (None, None),
        };

        Self {
            executor,
            policy,
            queue: Mutex::new(queue),
            worker: Mutex::new(worker),
            permits: Arc::new(Semaphore::new(CONTROL_QUEUE_CAPACITY)),
            closed: AtomicBool::new(false),
            throttler: LogThrottler::with_secs(5),
        }
    }

    /// Handle one raw message; returns whether it was accepted for execution
    pub fn on_message(&self, raw: &[u8]) -> bool {
        let receive_ms = now_millis();

        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let message = match InputMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                if self.throttler.should_log("decode") {
                    warn!("Dropping undecodable control message: {}", e);
                }
                return false;
            }
        };

        if message.timestamp > 0 {
            info!(
                "Received {} (latency {} ms)",
                message.command.kind(),
                receive_ms - message.timestamp
            );
        } else {
            info!("Received {}", message.command.kind());
        }

        match self.policy {
            DispatchPolicy::Ordered => {
                let queue = self.queue.lock();
                let Some(tx) = queue.as_ref() else {
                    return false;
                };
                match tx.try_send(message.command) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(command)) => {
                        self.log_dropped(&command);
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            }
            DispatchPolicy::Concurrent => match self.permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    let executor = self.executor.clone();
                    tokio::spawn(async move {
                        executor.run(message.command).await;
                        drop(permit);
                    });
                    true
                }
                Err(_) => {
                    self.log_dropped(&message.command);
                    false
                }
            },
        }
    }

    fn log_dropped(&self, command: &InputCommand) {
        if self.throttler.should_log("queue_full") {
            warn!(
                "Control queue full ({} pending), dropping {}",
                CONTROL_QUEUE_CAPACITY,
                command.kind()
            );
        }
    }

    /// Stop accepting messages and drop queued commands
    ///
    /// A command already running on the device is not interrupted under
    /// the concurrent policy. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        debug!("Control channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}
