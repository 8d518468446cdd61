pub mod serial;

pub use serial::UsbSerialTransport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One transport delivery: the received bytes as uppercase hex text.
pub type RawChunk = String;

/// A discovered USB serial device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Opaque transport identifier, valid until the device detaches.
    pub device_id: String,
    pub vid: u16,
    pub pid: u16,
    pub product: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            device_id: device_id.into(),
            vid,
            pid,
            product: None,
            last_seen: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

/// Port parameters for `UsbTransport::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenParams {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

/// The fixed parameters the sender transmits at: 9600 baud, 8N1.
impl Default for OpenParams {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Device not found: {0}")]
    DeviceGone(String),

    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// The device transport layer: enumeration, per-device permission, open.
#[async_trait]
pub trait UsbTransport: Send + Sync {
    /// Enumerate currently attached USB serial devices.
    async fn list(&self) -> Result<Vec<DeviceInfo>>;

    /// Ask the host for access to one device. `Ok(false)` is a refusal,
    /// `Err` a failure of the request itself.
    async fn try_request_permission(&self, device_id: &str) -> Result<bool>;

    /// Open a device. Incoming data arrives on the returned channel, one
    /// `RawChunk` per delivery; the channel closing signals disconnection.
    async fn open(
        &self,
        device_id: &str,
        params: &OpenParams,
    ) -> Result<(Box<dyn SerialConnection>, mpsc::Receiver<RawChunk>)>;
}

/// An open serial connection. Held by exactly one owner; `close` is called
/// exactly once, after which the chunk channel drains and closes.
#[async_trait]
pub trait SerialConnection: Send {
    async fn close(&mut self) -> Result<()>;
}
