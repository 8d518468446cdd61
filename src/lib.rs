//! USB serial stream watcher.
//!
//! Scans for an attached USB serial device, runs a permission/open sequence
//! against the first one found, opens it at 9600 8N1, decodes the incoming
//! sentinel-framed hex stream into frames, and republishes the latest frame
//! as a comma-joined display string. On disconnection the session tears
//! down once and scanning resumes.

pub mod decoder;
pub mod monitor;
pub mod platform;
pub mod transport;

pub use decoder::{Frame, FrameDecoder, InvalidSegmentPolicy, FRAME_SENTINEL};
pub use monitor::{ConnectionState, MonitorConfig, MonitorError, SerialMonitor};
pub use platform::{GrantAll, LogNotifier, Notifier, Permission, PermissionBroker};
pub use transport::{DeviceInfo, OpenParams, UsbSerialTransport, UsbTransport};
