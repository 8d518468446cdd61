use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::decoder::FrameDecoder;
use crate::platform::{Notifier, Permission, PermissionBroker};
use crate::transport::{DeviceInfo, RawChunk, SerialConnection, UsbTransport};

use super::scanner::{scan_loop, ScanSession};
use super::{ConnectionState, MonitorConfig, MonitorError, Result};

/// How long to wait for a task to wind down after its stop signal.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle for a running reader task.
struct ReaderSession {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// The lifecycle controller: owns the scan task, the reader task, the
/// connection state, and the latest-value channel. Scanning and an open
/// connection are mutually exclusive; at most one connection attempt is
/// ever in flight.
pub struct SerialMonitor {
    inner: Arc<MonitorInner>,
}

pub(crate) struct MonitorInner {
    transport: Arc<dyn UsbTransport>,
    permissions: Arc<dyn PermissionBroker>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    decoder: FrameDecoder,
    state: Mutex<ConnectionState>,
    scan_task: Mutex<Option<ScanSession>>,
    reader_task: Mutex<Option<ReaderSession>>,
    latest_tx: watch::Sender<String>,
}

impl SerialMonitor {
    pub fn new(
        transport: Arc<dyn UsbTransport>,
        permissions: Arc<dyn PermissionBroker>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        let (latest_tx, _) = watch::channel(String::new());
        Self {
            inner: Arc::new(MonitorInner {
                decoder: FrameDecoder::new(config.decode_policy),
                transport,
                permissions,
                notifier,
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                scan_task: Mutex::new(None),
                reader_task: Mutex::new(None),
                latest_tx,
            }),
        }
    }

    /// Start the device acquisition loop.
    pub async fn start_scanning(&self) -> Result<()> {
        MonitorInner::start_scanning(&self.inner).await
    }

    /// Manual connect trigger: pauses scanning and runs the permission/open
    /// sequence, re-querying for a target device. Returns the resulting
    /// state (`Disconnected` when a refusal aborted the sequence). Neither
    /// a refusal nor a sequence failure resumes scanning.
    pub async fn connect(&self) -> Result<ConnectionState> {
        if !self.inner.try_begin_connecting().await {
            return Err(MonitorError::AlreadyConnected);
        }
        self.inner.stop_scanning().await;
        MonitorInner::run_connect(&self.inner, None).await
    }

    /// Tear down the active connection: the reader closes the port, clears
    /// the state, and restarts scanning, in that order.
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.inner.reader_task.lock().await.take();
        match session {
            Some(session) => {
                let _ = session.stop_tx.send(()).await;
                let _ = timeout(STOP_TIMEOUT, session.task).await;
                Ok(())
            }
            None => Err(MonitorError::NotConnected),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    /// The most recently decoded frame, as its comma-joined display string.
    pub fn latest_value(&self) -> String {
        self.inner.latest_tx.borrow().clone()
    }

    /// Watch the latest value; every decode event replaces it.
    pub fn subscribe_latest(&self) -> watch::Receiver<String> {
        self.inner.latest_tx.subscribe()
    }
}

impl MonitorInner {
    pub(crate) fn transport(&self) -> &dyn UsbTransport {
        self.transport.as_ref()
    }

    pub(crate) fn scan_interval(&self) -> Duration {
        self.config.scan_interval
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.lock().await = state;
    }

    /// Guarded Disconnected -> Connecting transition. Fails when a
    /// connection attempt or an open connection already holds the slot.
    async fn try_begin_connecting(&self) -> bool {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Disconnected {
            *state = ConnectionState::Connecting;
            true
        } else {
            false
        }
    }

    pub(crate) async fn start_scanning(inner: &Arc<MonitorInner>) -> Result<()> {
        {
            let state = inner.state.lock().await;
            if *state != ConnectionState::Disconnected {
                return Err(MonitorError::AlreadyConnected);
            }
        }

        let mut slot = inner.scan_task.lock().await;
        if slot.is_some() {
            return Err(MonitorError::AlreadyScanning);
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(scan_loop(inner.clone(), stop_rx));
        *slot = Some(ScanSession { stop_tx, task });

        log::info!("Device scanning started");
        Ok(())
    }

    async fn stop_scanning(&self) {
        let session = self.scan_task.lock().await.take();
        if let Some(session) = session {
            let _ = session.stop_tx.send(()).await;
            let _ = timeout(STOP_TIMEOUT, session.task).await;
        }
    }

    /// The scan loop removes its own session before handing over, so a
    /// later `stop_scanning` has nothing to wait on.
    pub(crate) async fn clear_scan_slot(&self) {
        self.scan_task.lock().await.take();
    }

    /// Entry point for the scan loop once it has found a device.
    pub(crate) async fn connect_acquired(inner: &Arc<MonitorInner>, device: DeviceInfo) {
        if !inner.try_begin_connecting().await {
            log::warn!(
                "Dropping acquired device {}: a connection attempt is already in flight",
                device.device_id
            );
            return;
        }
        // Failures are logged and surfaced inside run_connect; the scan
        // loop is gone either way and only a manual trigger retries.
        let _ = Self::run_connect(inner, Some(device)).await;
    }

    /// Permission/open sequence wrapper: anything the sequence itself did
    /// not surface ends in a log line, a user notice, and Disconnected.
    async fn run_connect(
        inner: &Arc<Self>,
        target: Option<DeviceInfo>,
    ) -> Result<ConnectionState> {
        match Self::connect_sequence(inner, target).await {
            Ok(state) => Ok(state),
            Err(e) => {
                log::error!("Error requesting permission: {}", e);
                inner.notifier.notify("Permission request failed");
                inner.set_state(ConnectionState::Disconnected).await;
                Err(e)
            }
        }
    }

    /// The permission/open sequence. State is `Connecting` on entry; every
    /// exit path leaves it at `Connected` or `Disconnected`. Refusals
    /// surface a notice and abort without retry.
    async fn connect_sequence(
        inner: &Arc<Self>,
        target: Option<DeviceInfo>,
    ) -> Result<ConnectionState> {
        if !inner
            .permissions
            .request(Permission::ExternalStorage)
            .await?
        {
            inner.notifier.notify("Storage permission denied");
            inner.set_state(ConnectionState::Disconnected).await;
            return Ok(ConnectionState::Disconnected);
        }

        let device = match target {
            Some(device) => device,
            None => {
                let mut devices = inner.transport.list().await?;
                if devices.is_empty() {
                    inner.notifier.notify("No USB devices found");
                    inner.set_state(ConnectionState::Disconnected).await;
                    return Ok(ConnectionState::Disconnected);
                }
                devices.remove(0)
            }
        };

        if !inner
            .transport
            .try_request_permission(&device.device_id)
            .await?
        {
            inner.notifier.notify("USB permission denied");
            inner.set_state(ConnectionState::Disconnected).await;
            return Ok(ConnectionState::Disconnected);
        }
        inner.notifier.notify("USB permission granted");

        let (connection, chunk_rx) = inner
            .transport
            .open(&device.device_id, &inner.config.open_params)
            .await?;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(reader_loop(inner.clone(), connection, chunk_rx, stop_rx));
        *inner.reader_task.lock().await = Some(ReaderSession { stop_tx, task });
        inner.set_state(ConnectionState::Connected).await;

        log::info!("Connected to {}", device.device_id);
        Ok(ConnectionState::Connected)
    }
}

/// Single consumer of the chunk channel: decodes each chunk in order and
/// republishes the frame as the latest value. Ends on a stop signal or on
/// the channel closing (external disconnection), then tears down exactly
/// once: close the connection, clear the state, restart scanning.
fn reader_loop(
    inner: Arc<MonitorInner>,
    mut connection: Box<dyn SerialConnection>,
    mut chunk_rx: mpsc::Receiver<RawChunk>,
    mut stop_rx: mpsc::Receiver<()>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    // Boxed with an explicit `Send` bound to break the async `Send`
    // inference cycle: reader_loop -> start_scanning -> scan_loop ->
    // connect_sequence -> reader_loop.
    Box::pin(async move {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                log::info!("Reader received stop signal");
                break;
            }
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => match inner.decoder.decode(&chunk) {
                    Ok(frame) => {
                        log::debug!("Decoded frame of {} values", frame.len());
                        let _ = inner.latest_tx.send(frame.to_string());
                    }
                    Err(e) => {
                        log::warn!("Dropping undecodable chunk: {}", e);
                    }
                },
                None => {
                    log::info!("Chunk channel closed, device disconnected");
                    break;
                }
            }
        }
    }

    if let Err(e) = connection.close().await {
        log::warn!("Error closing connection: {}", e);
    }
    inner.set_state(ConnectionState::Disconnected).await;
    inner.reader_task.lock().await.take();

    if let Err(e) = MonitorInner::start_scanning(&inner).await {
        log::warn!("Could not restart scanning after disconnect: {}", e);
    }
    })
}
