#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use serialwatch::platform::{self, Notifier, Permission, PermissionBroker, PlatformError};
use serialwatch::transport::{
    self, DeviceInfo, OpenParams, RawChunk, SerialConnection, TransportError, UsbTransport,
};
use serialwatch::{ConnectionState, MonitorConfig, SerialMonitor};

/// Shared journal of externally visible transport calls, for asserting
/// ordering (e.g. close-before-rescan).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    List,
    Open(String),
    Close(String),
}

#[derive(Default)]
pub struct Journal(Mutex<Vec<Event>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

pub fn device(id: &str) -> DeviceInfo {
    DeviceInfo::new(id, 0x2E8A, 0x000A)
}

/// Scripted transport: tests control the visible device set, the
/// device-permission answer, and the open stream.
pub struct MockTransport {
    pub journal: Arc<Journal>,
    visible: Mutex<Vec<DeviceInfo>>,
    fail_list: AtomicBool,
    grant_device: AtomicBool,
    pub list_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub close_calls: Arc<AtomicUsize>,
    last_open_params: Mutex<Option<OpenParams>>,
    stream_tx: Arc<Mutex<Option<mpsc::Sender<RawChunk>>>>,
}

impl MockTransport {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            visible: Mutex::new(Vec::new()),
            fail_list: AtomicBool::new(false),
            grant_device: AtomicBool::new(true),
            list_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            close_calls: Arc::new(AtomicUsize::new(0)),
            last_open_params: Mutex::new(None),
            stream_tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn attach(&self, info: DeviceInfo) {
        self.visible.lock().unwrap().push(info);
    }

    pub fn detach_all(&self) {
        self.visible.lock().unwrap().clear();
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_grant_device(&self, grant: bool) {
        self.grant_device.store(grant, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn last_open_params(&self) -> Option<OpenParams> {
        *self.last_open_params.lock().unwrap()
    }

    /// Deliver one raw chunk on the open stream.
    pub async fn feed(&self, chunk: &str) {
        let tx = self.stream_tx.lock().unwrap().clone();
        let tx = tx.expect("no stream open");
        tx.send(chunk.to_string()).await.expect("stream receiver gone");
    }

    /// Simulate external disconnection: the chunk channel closes.
    pub fn drop_stream(&self) {
        self.stream_tx.lock().unwrap().take();
    }
}

#[async_trait]
impl UsbTransport for MockTransport {
    async fn list(&self) -> transport::Result<Vec<DeviceInfo>> {
        self.journal.record(Event::List);
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(TransportError::EnumerationFailed("scripted failure".into()));
        }
        Ok(self.visible.lock().unwrap().clone())
    }

    async fn try_request_permission(&self, _device_id: &str) -> transport::Result<bool> {
        Ok(self.grant_device.load(Ordering::SeqCst))
    }

    async fn open(
        &self,
        device_id: &str,
        params: &OpenParams,
    ) -> transport::Result<(Box<dyn SerialConnection>, mpsc::Receiver<RawChunk>)> {
        self.journal.record(Event::Open(device_id.to_string()));
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_open_params.lock().unwrap() = Some(*params);

        let (tx, rx) = mpsc::channel(16);
        *self.stream_tx.lock().unwrap() = Some(tx);

        let connection = MockConnection {
            journal: self.journal.clone(),
            device_id: device_id.to_string(),
            close_calls: self.close_calls.clone(),
            stream_tx: self.stream_tx.clone(),
        };
        Ok((Box::new(connection), rx))
    }
}

pub struct MockConnection {
    journal: Arc<Journal>,
    device_id: String,
    close_calls: Arc<AtomicUsize>,
    stream_tx: Arc<Mutex<Option<mpsc::Sender<RawChunk>>>>,
}

#[async_trait]
impl SerialConnection for MockConnection {
    async fn close(&mut self) -> transport::Result<()> {
        self.journal.record(Event::Close(self.device_id.clone()));
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_tx.lock().unwrap().take();
        Ok(())
    }
}

pub struct MockPermissions {
    grant_storage: AtomicBool,
    fail: AtomicBool,
    pub requests: AtomicUsize,
}

impl MockPermissions {
    pub fn new() -> Self {
        Self {
            grant_storage: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn set_grant_storage(&self, grant: bool) {
        self.grant_storage.store(grant, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionBroker for MockPermissions {
    async fn request(&self, _permission: Permission) -> platform::Result<bool> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::RequestFailed("scripted failure".into()));
        }
        Ok(self.grant_storage.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub struct Harness {
    pub monitor: SerialMonitor,
    pub transport: Arc<MockTransport>,
    pub permissions: Arc<MockPermissions>,
    pub notifier: Arc<RecordingNotifier>,
    pub journal: Arc<Journal>,
}

pub fn harness() -> Harness {
    harness_with(MonitorConfig::default())
}

pub fn harness_with(config: MonitorConfig) -> Harness {
    let journal = Arc::new(Journal::default());
    let transport = Arc::new(MockTransport::new(journal.clone()));
    let permissions = Arc::new(MockPermissions::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = SerialMonitor::new(
        transport.clone(),
        permissions.clone(),
        notifier.clone(),
        config,
    );
    Harness {
        monitor,
        transport,
        permissions,
        notifier,
        journal,
    }
}

/// Poll a condition under the paused test clock.
pub async fn wait_until(what: &str, max: Duration, cond: impl Fn() -> bool) {
    let start = tokio::time::Instant::now();
    while !cond() {
        if start.elapsed() > max {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub async fn wait_for_state(monitor: &SerialMonitor, want: ConnectionState, max: Duration) {
    let start = tokio::time::Instant::now();
    while monitor.state().await != want {
        if start.elapsed() > max {
            panic!("timed out waiting for state {:?}", want);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
