use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serialport::{SerialPortType, DataBits as SpDataBits, Parity as SpParity, StopBits as SpStopBits};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    DataBits, DeviceInfo, OpenParams, Parity, RawChunk, Result, SerialConnection, StopBits,
    TransportError, UsbTransport,
};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_BUFFER_SIZE: usize = 512;
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// `serialport`-backed transport. Enumerates USB CDC ports, optionally
/// filtered to one VID/PID pair.
pub struct UsbSerialTransport {
    filter: Option<(u16, u16)>,
}

impl UsbSerialTransport {
    pub fn new() -> Self {
        Self { filter: None }
    }

    /// Only report devices matching the given VID/PID.
    pub fn with_filter(vid: u16, pid: u16) -> Self {
        Self {
            filter: Some((vid, pid)),
        }
    }
}

impl Default for UsbSerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsbTransport for UsbSerialTransport {
    async fn list(&self) -> Result<Vec<DeviceInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

        let mut devices = Vec::new();
        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                if let Some((vid, pid)) = self.filter {
                    if usb_info.vid != vid || usb_info.pid != pid {
                        continue;
                    }
                }
                devices.push(DeviceInfo {
                    device_id: port.port_name.clone(),
                    vid: usb_info.vid,
                    pid: usb_info.pid,
                    product: usb_info.product.clone(),
                    last_seen: Utc::now(),
                });
            }
        }

        Ok(devices)
    }

    async fn try_request_permission(&self, device_id: &str) -> Result<bool> {
        // Desktop hosts have no per-device permission broker; access control
        // is file permissions on the port node and surfaces at open time.
        log::debug!("No permission broker on this host, granting {}", device_id);
        Ok(true)
    }

    async fn open(
        &self,
        device_id: &str,
        params: &OpenParams,
    ) -> Result<(Box<dyn SerialConnection>, mpsc::Receiver<RawChunk>)> {
        let port = serialport::new(device_id, params.baud_rate)
            .data_bits(map_data_bits(params.data_bits))
            .parity(map_parity(params.parity))
            .stop_bits(map_stop_bits(params.stop_bits))
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        log::info!(
            "Opened {} at {} baud",
            device_id,
            params.baud_rate
        );

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));

        let reader = spawn_read_loop(port, chunk_tx, shutdown.clone(), device_id.to_string());

        let connection = UsbSerialConnection {
            device_id: device_id.to_string(),
            shutdown,
            reader: Some(reader),
        };

        Ok((Box::new(connection), chunk_rx))
    }
}

/// Blocking read loop: each successful read is hex-encoded (uppercase, the
/// form the sender's sentinel framing is defined over) and sent down the
/// chunk channel. Timeouts keep the loop alive; any other error ends it,
/// which drops the sender and closes the channel.
fn spawn_read_loop(
    mut port: Box<dyn serialport::SerialPort>,
    chunk_tx: mpsc::Sender<RawChunk>,
    shutdown: Arc<AtomicBool>,
    device_id: String,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match port.read(&mut buffer) {
                Ok(0) => continue,
                Ok(n) => {
                    let chunk = hex::encode_upper(&buffer[..n]);
                    if chunk_tx.blocking_send(chunk).is_err() {
                        // Receiver gone, owner tore the session down.
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    log::warn!("Read error on {}: {}", device_id, e);
                    break;
                }
            }
        }
        log::debug!("Read loop for {} finished", device_id);
    })
}

struct UsbSerialConnection {
    device_id: String,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl SerialConnection for UsbSerialConnection {
    async fn close(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            // The loop notices the flag within one read timeout.
            let _ = reader.await;
        }
        log::info!("Closed {}", self.device_id);
        Ok(())
    }
}

fn map_data_bits(bits: DataBits) -> SpDataBits {
    match bits {
        DataBits::Seven => SpDataBits::Seven,
        DataBits::Eight => SpDataBits::Eight,
    }
}

fn map_parity(parity: Parity) -> SpParity {
    match parity {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

fn map_stop_bits(bits: StopBits) -> SpStopBits {
    match bits {
        StopBits::One => SpStopBits::One,
        StopBits::Two => SpStopBits::Two,
    }
}
