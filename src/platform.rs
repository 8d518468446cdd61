use async_trait::async_trait;

/// OS permissions the connect sequence may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ExternalStorage,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Permission request failed: {0}")]
    RequestFailed(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Host permission dialog. `Ok(false)` is a user refusal, `Err` a failure
/// of the request itself. May wait indefinitely on an OS dialog.
#[async_trait]
pub trait PermissionBroker: Send + Sync {
    async fn request(&self, permission: Permission) -> Result<bool>;
}

/// User-visible notice surface. Fire-and-forget; never blocks.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Broker for hosts without permission dialogs: everything is granted.
pub struct GrantAll;

#[async_trait]
impl PermissionBroker for GrantAll {
    async fn request(&self, permission: Permission) -> Result<bool> {
        log::debug!("No permission dialog on this host, granting {:?}", permission);
        Ok(true)
    }
}

/// Routes notices to the log when no UI surface is attached.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        log::warn!("Notice: {}", message);
    }
}
