//! Connection setup off the execution thread
//!
//! [`ConnectWatchdog`] drives `poll_connect` for a set of links on its own
//! thread, waiting between rounds on a [`CancelToken`] so shutdown never
//! waits out a full poll interval. Once a link is connected the watchdog
//! keeps checking its medium for a vanished or extra peer.

use crate::transporter::Transporter;
use ndb_common::error::TransporterError;
use ndb_common::ids::NodeId;
use ndb_common::link::ConnectPolicy;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared link handle as held by the registry.
pub type SharedTransporter = Arc<Mutex<Transporter>>;

#[derive(Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Cancellable wait shared between a waiter and the threads that stop it.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Fresh, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter.
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.cond.notify_all();
    }

    /// Whether `cancel` was called since the last `reset`.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Clear a consumed cancellation.
    pub fn reset(&self) {
        *self.inner.cancelled.lock() = false;
    }

    /// Wait up to `timeout`; true if cancelled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        if !*cancelled {
            self.inner.cond.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Background thread bringing links up and watching them afterwards.
pub struct ConnectWatchdog {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl ConnectWatchdog {
    /// Start connecting `links` under `policy`.
    pub fn spawn(
        links: Vec<(NodeId, SharedTransporter)>,
        policy: ConnectPolicy,
    ) -> std::io::Result<Self> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("ndb-connect".to_string())
            .spawn(move || run(links, policy, token))?;
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Whether the thread has nothing left to do.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Connect watchdog thread panicked");
            }
        }
    }
}

impl Drop for ConnectWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(links: Vec<(NodeId, SharedTransporter)>, policy: ConnectPolicy, cancel: CancelToken) {
    let started = Instant::now();
    let mut pending = links;
    let mut established: Vec<(NodeId, SharedTransporter)> = Vec::new();
    debug!("Connect watchdog started for {} links", pending.len());

    while !cancel.is_cancelled() {
        pending.retain(|(node, link)| {
            let mut transporter = link.lock();
            match transporter.poll_connect() {
                Ok(true) => {
                    established.push((*node, Arc::clone(link)));
                    false
                }
                Ok(false) if started.elapsed() >= policy.timeout() => {
                    transporter.disconnect_with(TransporterError::ConnectTimeout);
                    false
                }
                Ok(false) => true,
                Err(e) => {
                    debug!("Setup of link to {} ended: {}", node, e);
                    false
                }
            }
        });

        established.retain(|(_, link)| link.lock().check_connected().is_ok());

        if pending.is_empty() && established.is_empty() {
            break;
        }
        cancel.wait_for(policy.interval());
    }
    info!("Connect watchdog stopped");
}
