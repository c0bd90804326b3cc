//! Process-wide escape hatch for unrecoverable transport conditions.
//!
//! The channel holds a single slot. The first report wins; later reports are dropped because the
//! process is already on its way down.

use crate::upstream::UpstreamError;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal condition on {key}: {source}")]
pub struct FatalError {
    pub key: String,
    #[source]
    pub source: UpstreamError,
}

#[derive(Debug, Clone)]
pub struct FatalSender {
    tx: mpsc::Sender<FatalError>,
}

impl FatalSender {
    /// Reports without blocking the request path.
    pub fn report(&self, fatal: FatalError) {
        error!(key = %fatal.key, error = %fatal.source, "fatal upstream condition, requesting restart");
        match self.tx.try_send(fatal) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("fatal condition already reported"),
            Err(TrySendError::Closed(_)) => warn!("fatal channel has no consumer"),
        }
    }
}

/// Creates the single-slot fatal channel. The receiver must have exactly one consumer.
#[must_use]
pub fn fatal_channel() -> (FatalSender, mpsc::Receiver<FatalError>) {
    let (tx, rx) = mpsc::channel(1);
    (FatalSender { tx }, rx)
}
