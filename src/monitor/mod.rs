pub mod scanner;
pub mod session;

pub use session::SerialMonitor;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decoder::InvalidSegmentPolicy;
use crate::transport::OpenParams;

/// Lifecycle of the single connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection; device scanning may be active.
    Disconnected,
    /// Scanning paused, permission/open sequence in progress.
    Connecting,
    /// Connection open, reader task consuming the stream.
    Connected,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Cadence of the device scan loop.
    pub scan_interval: Duration,
    pub open_params: OpenParams,
    pub decode_policy: InvalidSegmentPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            open_params: OpenParams::default(),
            decode_policy: InvalidSegmentPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Connection already open or in progress")]
    AlreadyConnected,

    #[error("No connection open")]
    NotConnected,

    #[error("Device scanning already active")]
    AlreadyScanning,

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Platform error: {0}")]
    Platform(#[from] crate::platform::PlatformError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
